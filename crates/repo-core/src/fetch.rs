//! Live-state fetching.
//!
//! Reads only what the pass needs: kinds with desired entries plus kinds the
//! applied-state record says were managed before. Listings are tracked per
//! `(kind, scope)`; only a scope that was actually listed is authoritative
//! enough for the differ to delete from.

use std::collections::{BTreeMap, BTreeSet};

use repo_model::{
    ActorKind, ActorRef, Collection, Environment, ErrorClass, Platform, Remote, RepoRef, RepositorySettings,
    Resource, ResourceAddress, ResourceKind, Scope, SourceType,
};

use crate::normalize::DesiredState;
use crate::retry::RetryPolicy;
use crate::state::AppliedState;
use crate::{Error, Result};

/// Name -> id snapshot taken at fetch time.
///
/// Only used to compare symbolic desired actors with numeric live ones.
/// Payloads are always resolved afresh by the applier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorDirectory {
    entries: BTreeMap<(ActorKind, String), u64>,
}

impl ActorDirectory {
    pub fn insert(&mut self, kind: ActorKind, name: impl Into<String>, id: u64) {
        self.entries.insert((kind, name.into()), id);
    }

    pub fn get(&self, kind: ActorKind, name: &str) -> Option<u64> {
        self.entries.get(&(kind, name.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of `resource` with every known name replaced by its id.
    /// Unknown names stay symbolic.
    pub fn substitute(&self, resource: &Resource) -> Resource {
        let mut resolved = resource.clone();
        resolved.for_each_actor_mut(|kind, actor| {
            if let ActorRef::Name(name) = actor
                && let Some(id) = self.get(kind, name)
            {
                *actor = ActorRef::Id(id);
            }
        });
        resolved
    }
}

/// The platform's view of one repository at the start of a pass.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    /// `None` when the repository does not exist yet.
    pub repository: Option<Remote<RepositorySettings>>,
    pub resources: BTreeMap<ResourceAddress, Remote<Resource>>,
    pub(crate) listed: BTreeSet<(ResourceKind, Scope)>,
    pub directory: ActorDirectory,
}

impl LiveState {
    pub fn exists(&self) -> bool {
        self.repository.is_some()
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&Remote<Resource>> {
        self.resources.get(address)
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        match self.resources.get(&ResourceAddress::new(ResourceKind::Environment, name)) {
            Some(Remote {
                resource: Resource::Environment(env),
                ..
            }) => Some(env),
            _ => None,
        }
    }

    /// Whether the scope holding `address` was listed in full this pass.
    pub fn is_listed(&self, address: &ResourceAddress) -> bool {
        self.listed.contains(&(address.kind, address.scope.clone()))
    }

    pub fn mark_listed(&mut self, kind: ResourceKind, scope: Scope) {
        self.listed.insert((kind, scope));
    }

    pub fn insert(&mut self, remote: Remote<Resource>) {
        self.resources.insert(remote.resource.address(), remote);
    }
}

pub struct Fetcher<'a> {
    platform: &'a dyn Platform,
    repo: &'a RepoRef,
    retry: &'a RetryPolicy,
}

impl<'a> Fetcher<'a> {
    pub fn new(platform: &'a dyn Platform, repo: &'a RepoRef, retry: &'a RetryPolicy) -> Self {
        Self { platform, repo, retry }
    }

    pub async fn fetch(&self, desired: &DesiredState, applied: &AppliedState) -> Result<LiveState> {
        let mut live = LiveState::default();

        match self
            .retry
            .run("get repository", || self.platform.get_repository(self.repo))
            .await
        {
            Ok(remote) => live.repository = Some(remote),
            Err(e) if e.class() == ErrorClass::NotFound => {
                tracing::info!(repo = %self.repo, "repository does not exist yet");
                return Ok(live);
            }
            Err(source) => {
                return Err(Error::Fetch {
                    what: "repository".into(),
                    source,
                });
            }
        }

        let mut kinds = desired.kinds();
        kinds.extend(applied.managed_kinds());
        kinds.remove(&ResourceKind::Repository);

        let scopes = Self::scopes(desired, applied);
        let needs_environments = kinds.iter().any(|kind| {
            matches!(
                kind,
                ResourceKind::Environment
                    | ResourceKind::Secret
                    | ResourceKind::Variable
                    | ResourceKind::DeploymentBranchPolicy
            )
        });
        if needs_environments {
            self.list_into(&mut live, Collection::Environments).await?;
            if kinds.contains(&ResourceKind::Environment) {
                live.mark_listed(ResourceKind::Environment, Scope::Repository);
            }
        }

        for kind in &kinds {
            match kind {
                ResourceKind::Repository | ResourceKind::Environment => {}
                ResourceKind::Secret | ResourceKind::Variable => {
                    for scope in scopes.get(kind).into_iter().flatten() {
                        self.fetch_actions_values(&mut live, *kind, scope).await?;
                    }
                }
                ResourceKind::DeploymentBranchPolicy => {
                    let mut envs: BTreeSet<&str> = scopes
                        .get(kind)
                        .into_iter()
                        .flatten()
                        .filter_map(Scope::environment_name)
                        .collect();
                    envs.extend(desired.resources().filter_map(|resource| match resource {
                        Resource::Environment(env) if env.allows_custom_branch_policies() => Some(env.name.as_str()),
                        _ => None,
                    }));
                    for env in envs {
                        self.fetch_branch_policies(&mut live, env).await?;
                    }
                }
                other => {
                    if let Some(collection) = collection_for(*other) {
                        self.list_into(&mut live, collection).await?;
                        live.mark_listed(*other, Scope::Repository);
                    }
                }
            }
        }

        live.directory = self.build_directory(desired).await;

        tracing::debug!(
            repo = %self.repo,
            resources = live.resources.len(),
            actors = live.directory.len(),
            "fetched live state"
        );
        Ok(live)
    }

    /// Scopes to list for each scoped kind: those named by desired entries
    /// or by the applied-state record.
    fn scopes(desired: &DesiredState, applied: &AppliedState) -> BTreeMap<ResourceKind, BTreeSet<Scope>> {
        let mut scopes: BTreeMap<ResourceKind, BTreeSet<Scope>> = BTreeMap::new();
        let desired_addresses = desired.resources().map(Resource::address);
        for address in desired_addresses.chain(applied.addresses().cloned()) {
            if matches!(
                address.kind,
                ResourceKind::Secret | ResourceKind::Variable | ResourceKind::DeploymentBranchPolicy
            ) {
                scopes.entry(address.kind).or_default().insert(address.scope);
            }
        }
        scopes
    }

    async fn list(&self, collection: &Collection) -> repo_model::ApiResult<Vec<Remote<Resource>>> {
        let what = format!("list {}", collection.kind());
        self.retry.run(&what, || self.platform.list(self.repo, collection)).await
    }

    async fn list_into(&self, live: &mut LiveState, collection: Collection) -> Result<()> {
        let items = self.list(&collection).await.map_err(|source| Error::Fetch {
            what: collection.kind().to_string(),
            source,
        })?;
        for remote in items {
            if let Resource::Ruleset(ruleset) = &remote.resource
                && ruleset.source_type == SourceType::Organization
            {
                continue;
            }
            live.insert(remote);
        }
        Ok(())
    }

    async fn fetch_actions_values(&self, live: &mut LiveState, kind: ResourceKind, scope: &Scope) -> Result<()> {
        if let Some(env) = scope.environment_name()
            && live.environment(env).is_none()
        {
            // Nothing can live under an environment that does not exist.
            live.mark_listed(kind, scope.clone());
            return Ok(());
        }

        let collection = match kind {
            ResourceKind::Secret => Collection::Secrets(scope.clone()),
            _ => Collection::Variables(scope.clone()),
        };
        let items = self.list(&collection).await.map_err(|source| Error::Fetch {
            what: format!("{} in {}", kind, scope),
            source,
        })?;
        for remote in items {
            live.insert(remote);
        }
        live.mark_listed(kind, scope.clone());
        Ok(())
    }

    async fn fetch_branch_policies(&self, live: &mut LiveState, env: &str) -> Result<()> {
        let scope = Scope::environment(env);
        let allows_custom = live
            .environment(env)
            .is_some_and(Environment::allows_custom_branch_policies);

        if allows_custom {
            let collection = Collection::DeploymentBranchPolicies(env.to_string());
            match self.list(&collection).await {
                Ok(items) => {
                    for remote in items {
                        live.insert(remote);
                    }
                }
                Err(e) if e.class() == ErrorClass::NotFound => {
                    tracing::debug!(environment = env, "branch policies not configured");
                }
                Err(source) => {
                    return Err(Error::Fetch {
                        what: format!("deployment branch policies of {}", env),
                        source,
                    });
                }
            }
        }

        live.mark_listed(ResourceKind::DeploymentBranchPolicy, scope);
        Ok(())
    }

    /// Look up every symbolic actor the desired state references. Names the
    /// platform does not know are left out and compare as different.
    async fn build_directory(&self, desired: &DesiredState) -> ActorDirectory {
        let names: BTreeSet<(ActorKind, String)> = desired
            .resources()
            .flat_map(Resource::actor_refs)
            .filter_map(|(kind, actor)| actor.name().map(|name| (kind, name.to_string())))
            .collect();

        let mut directory = ActorDirectory::default();
        for (kind, name) in names {
            let what = format!("look up {} {}", kind, name);
            let looked_up = self.retry.run(&what, || self.platform.lookup_actor(kind, &name)).await;
            match looked_up {
                Ok(id) => directory.insert(kind, name, id),
                Err(e) => tracing::debug!(%kind, name = %name, error = %e, "actor not resolvable at fetch time"),
            }
        }
        directory
    }
}

fn collection_for(kind: ResourceKind) -> Option<Collection> {
    let collection = match kind {
        ResourceKind::Collaborator => Collection::Collaborators,
        ResourceKind::TeamAccess => Collection::Teams,
        ResourceKind::Label => Collection::Labels,
        ResourceKind::Webhook => Collection::Webhooks,
        ResourceKind::DeployKey => Collection::DeployKeys,
        ResourceKind::CustomProperty => Collection::CustomProperties,
        ResourceKind::Autolink => Collection::Autolinks,
        ResourceKind::Environment => Collection::Environments,
        ResourceKind::Ruleset => Collection::Rulesets,
        ResourceKind::Repository
        | ResourceKind::Secret
        | ResourceKind::Variable
        | ResourceKind::DeploymentBranchPolicy => return None,
    };
    Some(collection)
}
