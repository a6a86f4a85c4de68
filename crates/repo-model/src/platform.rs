//! Contract between the reconciler and a platform API client.
//!
//! The client owns transport, authentication and wire encoding. The
//! reconciler only needs typed list/create/update/delete per resource
//! collection plus an actor lookup for deferred-resolution tokens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actor::ActorKind;
use crate::address::{ResourceAddress, ResourceKind, Scope};
use crate::error::ApiResult;
use crate::repository::{RepoRef, RepositoryCreation, RepositorySettings};
use crate::resource::Resource;

/// One listable collection of resources within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    Collaborators,
    Teams,
    Labels,
    Webhooks,
    DeployKeys,
    CustomProperties,
    Autolinks,
    Environments,
    Secrets(Scope),
    Variables(Scope),
    /// Deployment branch policies of the named environment.
    DeploymentBranchPolicies(String),
    Rulesets,
}

impl Collection {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Collaborators => ResourceKind::Collaborator,
            Self::Teams => ResourceKind::TeamAccess,
            Self::Labels => ResourceKind::Label,
            Self::Webhooks => ResourceKind::Webhook,
            Self::DeployKeys => ResourceKind::DeployKey,
            Self::CustomProperties => ResourceKind::CustomProperty,
            Self::Autolinks => ResourceKind::Autolink,
            Self::Environments => ResourceKind::Environment,
            Self::Secrets(_) => ResourceKind::Secret,
            Self::Variables(_) => ResourceKind::Variable,
            Self::DeploymentBranchPolicies(_) => ResourceKind::DeploymentBranchPolicy,
            Self::Rulesets => ResourceKind::Ruleset,
        }
    }

    /// The collection an address lives in. `None` for the repository itself.
    pub fn containing(address: &ResourceAddress) -> Option<Self> {
        let collection = match address.kind {
            ResourceKind::Repository => return None,
            ResourceKind::Collaborator => Self::Collaborators,
            ResourceKind::TeamAccess => Self::Teams,
            ResourceKind::Label => Self::Labels,
            ResourceKind::Webhook => Self::Webhooks,
            ResourceKind::DeployKey => Self::DeployKeys,
            ResourceKind::CustomProperty => Self::CustomProperties,
            ResourceKind::Autolink => Self::Autolinks,
            ResourceKind::Environment => Self::Environments,
            ResourceKind::Secret => Self::Secrets(address.scope.clone()),
            ResourceKind::Variable => Self::Variables(address.scope.clone()),
            ResourceKind::DeploymentBranchPolicy => {
                Self::DeploymentBranchPolicies(address.scope.environment_name()?.to_string())
            }
            ResourceKind::Ruleset => Self::Rulesets,
        };
        Some(collection)
    }
}

/// Platform-assigned identifiers captured on create and persisted by the
/// orchestrator across passes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Identifiers {
    pub fn with_id(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.node_id.is_none() && self.etag.is_none() && self.url.is_none()
    }
}

/// A live resource together with its platform identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote<T> {
    pub ids: Identifiers,
    pub resource: T,
}

impl<T> Remote<T> {
    pub fn new(ids: Identifiers, resource: T) -> Self {
        Self { ids, resource }
    }
}

/// Typed operations a platform client must offer.
///
/// Payloads handed to `create`/`update` are fully resolved: every actor
/// reference is a numeric id.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Read repository metadata. A missing repository is a 404.
    async fn get_repository(&self, repo: &RepoRef) -> ApiResult<Remote<RepositorySettings>>;

    async fn create_repository(
        &self,
        repo: &RepoRef,
        settings: &RepositorySettings,
        creation: &RepositoryCreation,
    ) -> ApiResult<Identifiers>;

    async fn list(&self, repo: &RepoRef, collection: &Collection) -> ApiResult<Vec<Remote<Resource>>>;

    async fn create(&self, repo: &RepoRef, resource: &Resource) -> ApiResult<Identifiers>;

    async fn update(&self, repo: &RepoRef, ids: &Identifiers, resource: &Resource) -> ApiResult<Identifiers>;

    async fn delete(&self, repo: &RepoRef, ids: &Identifiers, address: &ResourceAddress) -> ApiResult<()>;

    /// Resolve a user login, team slug or app slug to its numeric id.
    async fn lookup_actor(&self, kind: ActorKind, name: &str) -> ApiResult<u64>;
}
