//! Applying one operation against the platform.
//!
//! Every operation maps to one logical transaction. Symbolic actors are
//! resolved immediately before the call that needs them, never from the
//! fetch-time directory. Conflicts left behind by an earlier partial pass
//! are recovered here: a create that finds the entry already present turns
//! into an update (or nothing), a delete that finds it gone is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use repo_model::{
    ActorKind, ActorRef, ApiError, Collection, ErrorClass, Identifiers, Platform, Remote, RepoRef,
    RepositoryCreation, Resource, ResourceAddress,
};

use crate::diff::{Action, Operation};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// What an operation ended up doing on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub action: Action,
    pub ids: Identifiers,
}

impl Applied {
    fn new(action: Action, ids: Identifiers) -> Self {
        Self { action, ids }
    }
}

pub struct Applier {
    platform: Arc<dyn Platform>,
    repo: RepoRef,
    retry: RetryPolicy,
    creation: RepositoryCreation,
}

impl Applier {
    pub fn new(platform: Arc<dyn Platform>, repo: RepoRef, retry: RetryPolicy, creation: RepositoryCreation) -> Self {
        Self {
            platform,
            repo,
            retry,
            creation,
        }
    }

    pub async fn apply(&self, op: &Operation) -> Result<Applied> {
        let applied = match (op.action, &op.desired) {
            (Action::NoOp, _) => Applied::new(Action::NoOp, op.ids.clone()),
            (Action::Delete, _) => self.delete(&op.address, &op.ids).await?,
            (Action::Create, Some(resource)) => {
                let resolved = self.resolve(&op.address, resource).await?;
                self.create(&op.address, resolved).await?
            }
            (Action::Update, Some(resource)) => {
                let resolved = self.resolve(&op.address, resource).await?;
                let ids = self.update(&op.address, &op.ids, &resolved).await?;
                Applied::new(Action::Update, ids)
            }
            (Action::Replace, Some(resource)) => {
                let resolved = self.resolve(&op.address, resource).await?;
                self.delete(&op.address, &op.ids).await?;
                let ids = self.create_call(&op.address, &resolved).await?;
                Applied::new(Action::Replace, ids)
            }
            (action, None) => {
                return Err(Error::validation(
                    op.address.to_string(),
                    format!("{} operation has no desired descriptor", action),
                ));
            }
        };

        tracing::info!(address = %op.address, action = %applied.action, "applied");
        Ok(applied)
    }

    /// Copy of `resource` with every symbolic actor replaced by its current id.
    async fn resolve(&self, address: &ResourceAddress, resource: &Resource) -> Result<Resource> {
        let mut ids: BTreeMap<(ActorKind, String), u64> = BTreeMap::new();
        for (kind, actor) in resource.actor_refs() {
            let ActorRef::Name(name) = actor else {
                continue;
            };
            if ids.contains_key(&(kind, name.clone())) {
                continue;
            }
            let lookup = self
                .retry
                .run("lookup actor", || self.platform.lookup_actor(kind, name))
                .await;
            match lookup {
                Ok(id) => {
                    tracing::debug!(%kind, name = %name, id, "resolved actor");
                    ids.insert((kind, name.clone()), id);
                }
                Err(e) if e.class() == ErrorClass::NotFound => {
                    return Err(Error::UnresolvedActor {
                        kind,
                        name: name.clone(),
                    });
                }
                Err(source) => {
                    return Err(Error::Api {
                        address: address.clone(),
                        source,
                    });
                }
            }
        }

        let mut resolved = resource.clone();
        resolved.for_each_actor_mut(|kind, actor| {
            if let ActorRef::Name(name) = actor
                && let Some(id) = ids.get(&(kind, name.clone()))
            {
                *actor = ActorRef::Id(*id);
            }
        });
        Ok(resolved)
    }

    async fn create(&self, address: &ResourceAddress, resource: Resource) -> Result<Applied> {
        match self.try_create(&resource).await {
            Ok(ids) => Ok(Applied::new(Action::Create, ids)),
            Err(e) if e.class() == ErrorClass::Conflict => {
                tracing::warn!(address = %address, error = %e, "already exists, re-reading live entry");
                self.recover_conflict(address, &resource, e).await
            }
            Err(source) => Err(Error::Api {
                address: address.clone(),
                source,
            }),
        }
    }

    async fn create_call(&self, address: &ResourceAddress, resource: &Resource) -> Result<Identifiers> {
        self.try_create(resource).await.map_err(|source| Error::Api {
            address: address.clone(),
            source,
        })
    }

    async fn try_create(&self, resource: &Resource) -> std::result::Result<Identifiers, ApiError> {
        match resource {
            Resource::Repository(settings) => {
                self.retry
                    .run("create repository", || {
                        self.platform.create_repository(&self.repo, settings, &self.creation)
                    })
                    .await
            }
            // A child created right after its parent can see a 404 until the
            // parent has propagated.
            _ => {
                self.retry
                    .run_retrying(
                        "create",
                        |class| matches!(class, ErrorClass::Transient | ErrorClass::NotFound),
                        || self.platform.create(&self.repo, resource),
                    )
                    .await
            }
        }
    }

    /// A create hit an existing entry: re-read it and update, or do nothing
    /// when it already matches.
    async fn recover_conflict(
        &self,
        address: &ResourceAddress,
        resource: &Resource,
        conflict: ApiError,
    ) -> Result<Applied> {
        let existing = self.read_existing(address).await?;
        let Some(existing) = existing else {
            return Err(Error::Api {
                address: address.clone(),
                source: conflict,
            });
        };

        let matches = resource.write_only_value().is_none() && same_descriptor(resource, &existing.resource);
        if matches {
            return Ok(Applied::new(Action::NoOp, existing.ids));
        }
        let ids = self.update(address, &existing.ids, resource).await?;
        Ok(Applied::new(Action::Update, ids))
    }

    async fn read_existing(&self, address: &ResourceAddress) -> Result<Option<Remote<Resource>>> {
        let fetch_error = |source| Error::Fetch {
            what: address.to_string(),
            source,
        };
        match Collection::containing(address) {
            None => {
                let remote = self
                    .retry
                    .run("get repository", || self.platform.get_repository(&self.repo))
                    .await
                    .map_err(fetch_error)?;
                Ok(Some(Remote::new(remote.ids, Resource::Repository(remote.resource))))
            }
            Some(collection) => {
                let listed = self
                    .retry
                    .run("list", || self.platform.list(&self.repo, &collection))
                    .await
                    .map_err(fetch_error)?;
                Ok(listed.into_iter().find(|remote| remote.resource.address() == *address))
            }
        }
    }

    async fn update(&self, address: &ResourceAddress, ids: &Identifiers, resource: &Resource) -> Result<Identifiers> {
        let updated = self
            .retry
            .run("update", || self.platform.update(&self.repo, ids, resource))
            .await
            .map_err(|source| Error::Api {
                address: address.clone(),
                source,
            })?;
        Ok(if updated.is_empty() { ids.clone() } else { updated })
    }

    async fn delete(&self, address: &ResourceAddress, ids: &Identifiers) -> Result<Applied> {
        let result = self
            .retry
            .run("delete", || self.platform.delete(&self.repo, ids, address))
            .await;
        match result {
            Ok(()) => Ok(Applied::new(Action::Delete, Identifiers::default())),
            Err(e) if matches!(e.class(), ErrorClass::NotFound | ErrorClass::Conflict) => {
                tracing::warn!(address = %address, error = %e, "already deleted");
                Ok(Applied::new(Action::NoOp, Identifiers::default()))
            }
            Err(source) => Err(Error::Api {
                address: address.clone(),
                source,
            }),
        }
    }
}

fn same_descriptor(desired: &Resource, live: &Resource) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(live)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
