//! [`MemoryPlatform`]: an in-memory [`Platform`] with a call log and fault
//! injection.
//!
//! It behaves like the hosted platform where the reconciler cares:
//!
//! - reads of a missing repository, environment or entry are 404s
//! - creating an existing entry is a 422 `already_exists`
//! - branch-policy listings fail with 404 unless the environment allows
//!   custom policies
//! - deleting an environment removes its secrets, variables and policies
//! - webhook secrets read back as `********`, secret values never
//! - payloads must carry numeric actor ids
//!
//! Out-of-band edits ([`MemoryPlatform::seed`], [`MemoryPlatform::modify`],
//! [`MemoryPlatform::remove`]) bypass the call log.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use repo_model::{
    ActorKind, ApiError, ApiResult, Collection, Identifiers, Platform, Remote, RepoRef, RepositoryCreation,
    RepositorySettings, Resource, ResourceAddress, ResourceKind, Scope,
};

/// The platform's redaction marker for webhook secrets.
pub const REDACTED: &str = "********";

/// Which trait method a call or fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetRepository,
    CreateRepository,
    List,
    Create,
    Update,
    Delete,
    LookupActor,
}

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetRepository,
    CreateRepository,
    List(Collection),
    Create(ResourceAddress),
    Update(ResourceAddress),
    Delete(ResourceAddress),
    LookupActor(ActorKind, String),
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Self::GetRepository => Method::GetRepository,
            Self::CreateRepository => Method::CreateRepository,
            Self::List(_) => Method::List,
            Self::Create(_) => Method::Create,
            Self::Update(_) => Method::Update,
            Self::Delete(_) => Method::Delete,
            Self::LookupActor(..) => Method::LookupActor,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.method(),
            Method::CreateRepository | Method::Create | Method::Update | Method::Delete
        )
    }

    /// The resource kind the call touches, if any.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Self::GetRepository | Self::CreateRepository => Some(ResourceKind::Repository),
            Self::List(collection) => Some(collection.kind()),
            Self::Create(address) | Self::Update(address) | Self::Delete(address) => Some(address.kind),
            Self::LookupActor(..) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    method: Method,
    kind: Option<ResourceKind>,
    error: ApiError,
    remaining: usize,
    /// Perform the call, then report the error (an ambiguous outcome).
    after_apply: bool,
}

#[derive(Debug, Default)]
struct Inner {
    repository: Option<Remote<RepositorySettings>>,
    creation: Option<RepositoryCreation>,
    resources: BTreeMap<ResourceAddress, Remote<Resource>>,
    secret_values: BTreeMap<ResourceAddress, String>,
    actors: BTreeMap<(ActorKind, String), u64>,
    faults: Vec<Fault>,
    calls: Vec<Call>,
    next_id: u64,
}

impl Inner {
    fn next_ids(&mut self, kind: ResourceKind) -> Identifiers {
        self.next_id += 1;
        let id = self.next_id;
        let prefix = match kind {
            ResourceKind::Repository => "R",
            ResourceKind::Ruleset => "RRS",
            ResourceKind::Environment => "EN",
            ResourceKind::Label => "LA",
            ResourceKind::Webhook => "HK",
            _ => "N",
        };
        Identifiers {
            id: Some(id),
            node_id: Some(format!("{}_{}", prefix, id)),
            etag: Some(format!("W/\"{:x}\"", id)),
            url: None,
        }
    }

    /// Record a call and return the fault to inject, if one matches.
    fn enter(&mut self, call: Call) -> Option<Fault> {
        let method = call.method();
        let kind = call.kind();
        self.calls.push(call);

        let position = self
            .faults
            .iter()
            .position(|f| f.method == method && (f.kind.is_none() || f.kind == kind))?;
        let fault = self.faults[position].clone();
        self.faults[position].remaining -= 1;
        if self.faults[position].remaining == 0 {
            self.faults.remove(position);
        }
        Some(fault)
    }

    fn require_repository(&self) -> ApiResult<()> {
        match self.repository {
            Some(_) => Ok(()),
            None => Err(ApiError::not_found("repository not found")),
        }
    }

    fn environment_allows_custom(&self, name: &str) -> Option<bool> {
        match self.resources.get(&ResourceAddress::new(ResourceKind::Environment, name)) {
            Some(Remote {
                resource: Resource::Environment(env),
                ..
            }) => Some(env.allows_custom_branch_policies()),
            _ => None,
        }
    }

    /// Reject payloads the platform would refuse regardless of state.
    fn validate_payload(&self, resource: &Resource) -> ApiResult<()> {
        if !resource.is_resolved() {
            return Err(ApiError::new(422, "actor ids must be numeric"));
        }
        if let Some(env) = resource.scope().environment_name() {
            match self.environment_allows_custom(env) {
                None => return Err(ApiError::not_found(format!("environment {} not found", env))),
                Some(false) if resource.kind() == ResourceKind::DeploymentBranchPolicy => {
                    return Err(ApiError::new(
                        422,
                        "deployment branch policy type is not custom_branch_policies",
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn store(&mut self, ids: Identifiers, resource: &Resource) {
        let address = resource.address();
        if let Resource::Secret(secret) = resource
            && let Some(value) = &secret.value
        {
            self.secret_values.insert(address.clone(), value.clone());
        }
        self.resources.insert(address, Remote::new(ids, resource.clone()));
        if let Resource::Environment(env) = resource
            && !env.allows_custom_branch_policies()
        {
            let scope = Scope::environment(&env.name);
            self.resources
                .retain(|address, _| !(address.kind == ResourceKind::DeploymentBranchPolicy && address.scope == scope));
        }
    }

    fn remove(&mut self, address: &ResourceAddress) -> Option<Remote<Resource>> {
        let removed = self.resources.remove(address)?;
        self.secret_values.remove(address);
        if address.kind == ResourceKind::Environment {
            let scope = Scope::environment(&address.key);
            self.resources.retain(|child, _| child.scope != scope);
            self.secret_values.retain(|child, _| child.scope != scope);
        }
        Some(removed)
    }

    /// What a read returns: write-only values stripped or redacted.
    fn read_back(remote: &Remote<Resource>) -> Remote<Resource> {
        let mut remote = remote.clone();
        match &mut remote.resource {
            Resource::Secret(secret) => secret.value = None,
            Resource::Webhook(hook) => {
                if hook.secret.is_some() {
                    hook.secret = Some(REDACTED.to_string());
                }
            }
            _ => {}
        }
        remote
    }
}

/// In-memory platform holding one repository.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    inner: Mutex<Inner>,
}

impl MemoryPlatform {
    /// A platform on which the repository does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform with an existing repository at platform defaults.
    pub fn with_repository(name: &str) -> Self {
        let platform = Self::new();
        platform.seed_repository(RepositorySettings::with_defaults(name));
        platform
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn seed_repository(&self, settings: RepositorySettings) {
        let mut inner = self.lock();
        let ids = inner.next_ids(ResourceKind::Repository);
        inner.repository = Some(Remote::new(ids, settings));
    }

    /// Add or replace an entry out of band. Returns its identifiers.
    pub fn seed(&self, resource: Resource) -> Identifiers {
        let mut inner = self.lock();
        let ids = match resource.kind() {
            ResourceKind::Secret | ResourceKind::Variable => Identifiers::default(),
            kind => inner.next_ids(kind),
        };
        inner.store(ids.clone(), &resource);
        ids
    }

    /// Edit an entry out of band. Returns false when it does not exist.
    pub fn modify<F>(&self, address: &ResourceAddress, edit: F) -> bool
    where
        F: FnOnce(&mut Resource),
    {
        let mut inner = self.lock();
        match inner.resources.get_mut(address) {
            Some(remote) => {
                edit(&mut remote.resource);
                true
            }
            None => false,
        }
    }

    pub fn modify_repository<F>(&self, edit: F)
    where
        F: FnOnce(&mut RepositorySettings),
    {
        if let Some(remote) = self.lock().repository.as_mut() {
            edit(&mut remote.resource);
        }
    }

    /// Delete an entry out of band.
    pub fn remove(&self, address: &ResourceAddress) -> Option<Resource> {
        self.lock().remove(address).map(|remote| remote.resource)
    }

    pub fn add_actor(&self, kind: ActorKind, name: &str, id: u64) {
        self.lock().actors.insert((kind, name.to_string()), id);
    }

    /// Fail the next `times` calls of `method` (optionally only for `kind`).
    pub fn fail(&self, method: Method, kind: Option<ResourceKind>, error: ApiError, times: usize) {
        self.lock().faults.push(Fault {
            method,
            kind,
            error,
            remaining: times.max(1),
            after_apply: false,
        });
    }

    pub fn fail_next(&self, method: Method, error: ApiError) {
        self.fail(method, None, error, 1);
    }

    /// Carry out the next matching call but report `error`, as when a
    /// response is lost after the server committed the change.
    pub fn fail_after_apply(&self, method: Method, kind: Option<ResourceKind>, error: ApiError) {
        self.lock().faults.push(Fault {
            method,
            kind,
            error,
            remaining: 1,
            after_apply: true,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.lock().calls.iter().filter(|call| call.is_write()).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn repository(&self) -> Option<RepositorySettings> {
        self.lock().repository.as_ref().map(|remote| remote.resource.clone())
    }

    /// Create-only options the repository was created with.
    pub fn creation(&self) -> Option<RepositoryCreation> {
        self.lock().creation.clone()
    }

    /// An entry as a read would return it.
    pub fn get(&self, address: &ResourceAddress) -> Option<Remote<Resource>> {
        self.lock().resources.get(address).map(Inner::read_back)
    }

    pub fn resource(&self, address: &ResourceAddress) -> Option<Resource> {
        self.get(address).map(|remote| remote.resource)
    }

    pub fn addresses(&self) -> Vec<ResourceAddress> {
        self.lock().resources.keys().cloned().collect()
    }

    /// The last value written to a secret.
    pub fn secret_value(&self, address: &ResourceAddress) -> Option<String> {
        self.lock().secret_values.get(address).cloned()
    }

    /// The webhook secret as stored, unredacted.
    pub fn webhook_secret(&self, address: &ResourceAddress) -> Option<String> {
        match self.lock().resources.get(address) {
            Some(Remote {
                resource: Resource::Webhook(hook),
                ..
            }) => hook.secret.clone(),
            _ => None,
        }
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn get_repository(&self, _repo: &RepoRef) -> ApiResult<Remote<RepositorySettings>> {
        let mut inner = self.lock();
        if let Some(fault) = inner.enter(Call::GetRepository) {
            return Err(fault.error);
        }
        inner
            .repository
            .clone()
            .ok_or_else(|| ApiError::not_found("repository not found"))
    }

    async fn create_repository(
        &self,
        _repo: &RepoRef,
        settings: &RepositorySettings,
        creation: &RepositoryCreation,
    ) -> ApiResult<Identifiers> {
        let mut inner = self.lock();
        let fault = inner.enter(Call::CreateRepository);
        if let Some(fault) = &fault
            && !fault.after_apply
        {
            return Err(fault.error.clone());
        }
        if inner.repository.is_some() {
            return Err(ApiError::already_exists("name already exists on this account"));
        }

        let ids = inner.next_ids(ResourceKind::Repository);
        inner.repository = Some(Remote::new(ids.clone(), settings.clone()));
        inner.creation = Some(creation.clone());
        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(ids),
        }
    }

    async fn list(&self, _repo: &RepoRef, collection: &Collection) -> ApiResult<Vec<Remote<Resource>>> {
        let mut inner = self.lock();
        if let Some(fault) = inner.enter(Call::List(collection.clone())) {
            return Err(fault.error);
        }
        inner.require_repository()?;

        match collection {
            Collection::DeploymentBranchPolicies(env) => match inner.environment_allows_custom(env) {
                Some(true) => {}
                Some(false) => {
                    return Err(ApiError::not_found(
                        "deployment branch policies are not enabled for this environment",
                    ));
                }
                None => return Err(ApiError::not_found(format!("environment {} not found", env))),
            },
            Collection::Secrets(Scope::Environment(env)) | Collection::Variables(Scope::Environment(env)) => {
                if inner.environment_allows_custom(env).is_none() {
                    return Err(ApiError::not_found(format!("environment {} not found", env)));
                }
            }
            _ => {}
        }

        Ok(inner
            .resources
            .iter()
            .filter(|(address, _)| Collection::containing(address).as_ref() == Some(collection))
            .map(|(_, remote)| Inner::read_back(remote))
            .collect())
    }

    async fn create(&self, _repo: &RepoRef, resource: &Resource) -> ApiResult<Identifiers> {
        let address = resource.address();
        let mut inner = self.lock();
        let fault = inner.enter(Call::Create(address.clone()));
        if let Some(fault) = &fault
            && !fault.after_apply
        {
            return Err(fault.error.clone());
        }
        inner.require_repository()?;
        inner.validate_payload(resource)?;
        if inner.resources.contains_key(&address) {
            return Err(ApiError::already_exists(format!("{} already exists", address)));
        }

        let ids = match resource.kind() {
            ResourceKind::Secret | ResourceKind::Variable => Identifiers::default(),
            kind => inner.next_ids(kind),
        };
        inner.store(ids.clone(), resource);
        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(ids),
        }
    }

    async fn update(&self, _repo: &RepoRef, _ids: &Identifiers, resource: &Resource) -> ApiResult<Identifiers> {
        let address = resource.address();
        let mut inner = self.lock();
        let fault = inner.enter(Call::Update(address.clone()));
        if let Some(fault) = &fault
            && !fault.after_apply
        {
            return Err(fault.error.clone());
        }
        inner.require_repository()?;

        if let Resource::Repository(settings) = resource {
            if let Some(remote) = inner.repository.as_mut() {
                remote.resource = settings.clone();
            }
            let ids = inner.repository.as_ref().map(|remote| remote.ids.clone()).unwrap_or_default();
            return match fault {
                Some(fault) => Err(fault.error),
                None => Ok(ids),
            };
        }

        inner.validate_payload(resource)?;
        let Some(existing) = inner.resources.get(&address) else {
            return Err(ApiError::not_found(format!("{} not found", address)));
        };
        match (&existing.resource, resource) {
            (Resource::DeployKey(_), _) | (Resource::Autolink(_), _) => {
                return Err(ApiError::new(422, format!("{} cannot be updated", address.kind)));
            }
            (Resource::Ruleset(live), Resource::Ruleset(wanted)) if live.target != wanted.target => {
                return Err(ApiError::new(422, "ruleset target cannot be changed"));
            }
            _ => {}
        }

        let ids = existing.ids.clone();
        inner.store(ids.clone(), resource);
        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(ids),
        }
    }

    async fn delete(&self, _repo: &RepoRef, _ids: &Identifiers, address: &ResourceAddress) -> ApiResult<()> {
        let mut inner = self.lock();
        let fault = inner.enter(Call::Delete(address.clone()));
        if let Some(fault) = &fault
            && !fault.after_apply
        {
            return Err(fault.error.clone());
        }
        inner.require_repository()?;
        if inner.remove(address).is_none() {
            return Err(ApiError::not_found(format!("{} not found", address)));
        }
        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(()),
        }
    }

    async fn lookup_actor(&self, kind: ActorKind, name: &str) -> ApiResult<u64> {
        let mut inner = self.lock();
        if let Some(fault) = inner.enter(Call::LookupActor(kind, name.to_string())) {
            return Err(fault.error);
        }
        inner
            .actors
            .get(&(kind, name.to_string()))
            .copied()
            .ok_or_else(|| ApiError::not_found(format!("{} {} not found", kind, name)))
    }
}
