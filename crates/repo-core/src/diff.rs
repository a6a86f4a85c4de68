//! Desired vs live comparison.
//!
//! Descriptors are compared as JSON values so every update can name the
//! dotted paths it touches (`protection_rules.0.wait_timer`). Ordered
//! sequences compare by position, so a reorder is a change; unordered sets
//! are stored sorted and compare as sets.
//!
//! Write-only values never come back from the platform. They are compared
//! against the digest recorded in the applied state instead.

use std::collections::BTreeSet;
use std::fmt;

use repo_model::{Identifiers, RepositorySettings, Resource, ResourceAddress, ResourceKind, SecurityAndAnalysis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::fetch::LiveState;
use crate::normalize::DesiredState;
use crate::state::{AppliedState, compute_checksum};

/// What happens to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Delete then create; used where the platform cannot update in place.
    Replace,
    Delete,
    NoOp,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// One planned change.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub address: ResourceAddress,
    pub action: Action,
    /// Desired descriptor, still carrying symbolic actor names. `None` for deletes.
    pub desired: Option<Resource>,
    /// Live identifiers; empty for creates.
    pub ids: Identifiers,
    /// Dotted paths of changed fields.
    pub changes: Vec<String>,
    /// Operations that must complete first. Filled in by the sequencer.
    pub depends_on: Vec<ResourceAddress>,
}

impl Operation {
    pub fn create(resource: Resource) -> Self {
        Self {
            address: resource.address(),
            action: Action::Create,
            desired: Some(resource),
            ids: Identifiers::default(),
            changes: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn update(resource: Resource, ids: Identifiers, changes: Vec<String>) -> Self {
        Self {
            address: resource.address(),
            action: Action::Update,
            desired: Some(resource),
            ids,
            changes,
            depends_on: Vec::new(),
        }
    }

    pub fn replace(resource: Resource, ids: Identifiers, changes: Vec<String>) -> Self {
        Self {
            action: Action::Replace,
            ..Self::update(resource, ids, changes)
        }
    }

    pub fn delete(address: ResourceAddress, ids: Identifiers) -> Self {
        Self {
            address,
            action: Action::Delete,
            desired: None,
            ids,
            changes: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.address.kind
    }
}

/// Result of comparing desired and live state.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub operations: Vec<Operation>,
    /// Converged resources with their live identifiers.
    pub unchanged: Vec<(ResourceAddress, Identifiers)>,
    /// Previously applied resources that are gone from the platform and no
    /// longer desired. Nothing to do for them but drop the record.
    pub vanished: Vec<ResourceAddress>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Classify every desired and live resource as create, update, replace,
/// delete or unchanged.
pub fn diff(desired: &DesiredState, live: &LiveState, applied: &AppliedState) -> Result<Diff> {
    let mut result = Diff::default();

    if let Some(settings) = desired.repository() {
        match &live.repository {
            None => result
                .operations
                .push(Operation::create(Resource::Repository(settings.clone()))),
            Some(remote) => {
                let comparable = with_unmanaged_from_live(settings, &remote.resource);
                let changes = changed_fields(&serde_json::to_value(&comparable)?, &serde_json::to_value(&remote.resource)?);
                let resource = Resource::Repository(settings.clone());
                if changes.is_empty() {
                    result.unchanged.push((resource.address(), remote.ids.clone()));
                } else {
                    result.operations.push(Operation::update(resource, remote.ids.clone(), changes));
                }
            }
        }
    }

    for resource in desired.resources() {
        if resource.kind() == ResourceKind::Repository {
            continue;
        }
        let address = resource.address();
        let Some(remote) = live.get(&address) else {
            result.operations.push(Operation::create(resource.clone()));
            continue;
        };

        let comparable = live.directory.substitute(resource);
        let mut changes = changed_fields(&descriptor(&comparable)?, &descriptor(&remote.resource)?);
        changes.extend(write_only_change(resource, &remote.resource, applied.digest(&address)));

        if changes.is_empty() {
            result.unchanged.push((address, remote.ids.clone()));
        } else if requires_replace(resource, &remote.resource) {
            result
                .operations
                .push(Operation::replace(resource.clone(), remote.ids.clone(), changes));
        } else {
            result
                .operations
                .push(Operation::update(resource.clone(), remote.ids.clone(), changes));
        }
    }

    let doomed: Vec<(&ResourceAddress, &Identifiers)> = live
        .resources
        .iter()
        .filter(|(address, _)| !desired.contains(address) && live.is_listed(address))
        .map(|(address, remote)| (address, &remote.ids))
        .collect();
    let doomed_environments: BTreeSet<&ResourceAddress> = doomed
        .iter()
        .filter(|(address, _)| address.kind == ResourceKind::Environment)
        .map(|(address, _)| *address)
        .collect();

    for (address, ids) in doomed {
        // The platform removes environment children together with the environment.
        if let Some(owner) = address.owning_environment()
            && doomed_environments.contains(&owner)
        {
            continue;
        }
        result.operations.push(Operation::delete(address.clone(), ids.clone()));
    }

    result.vanished = applied
        .addresses()
        .filter(|address| !desired.contains(address) && live.get(address).is_none() && live.is_listed(address))
        .cloned()
        .collect();

    tracing::debug!(
        operations = result.operations.len(),
        unchanged = result.unchanged.len(),
        vanished = result.vanished.len(),
        "computed diff"
    );
    Ok(result)
}

/// The descriptor body of a resource, without its kind tag.
fn descriptor(resource: &Resource) -> Result<Value> {
    let mut value = serde_json::to_value(resource)?;
    let spec = value.get_mut("spec").map(Value::take);
    Ok(spec.unwrap_or(value))
}

/// Copy of `desired` with fields it leaves unmanaged taken from `live`.
fn with_unmanaged_from_live(desired: &RepositorySettings, live: &RepositorySettings) -> RepositorySettings {
    let mut comparable = desired.clone();
    let wanted = &desired.security_and_analysis;
    let current = &live.security_and_analysis;
    comparable.security_and_analysis = SecurityAndAnalysis {
        advanced_security: wanted.advanced_security.or(current.advanced_security),
        secret_scanning: wanted.secret_scanning.or(current.secret_scanning),
        secret_scanning_push_protection: wanted
            .secret_scanning_push_protection
            .or(current.secret_scanning_push_protection),
    };
    comparable
}

fn write_only_change(desired: &Resource, live: &Resource, last_digest: Option<&str>) -> Option<String> {
    let field = match desired {
        Resource::Secret(_) => "value",
        Resource::Webhook(_) => "secret",
        _ => return None,
    };
    match desired.write_only_value() {
        Some(value) if last_digest != Some(compute_checksum(value).as_str()) => Some(field.to_string()),
        Some(_) => None,
        // Desired has no secret: only a change if the live hook still has one.
        None => match live {
            Resource::Webhook(hook) if hook.secret.is_some() => Some(field.to_string()),
            _ => None,
        },
    }
}

/// Whether a change can only be applied by deleting and recreating.
fn requires_replace(desired: &Resource, live: &Resource) -> bool {
    match (desired, live) {
        (Resource::Ruleset(wanted), Resource::Ruleset(current)) => wanted.target != current.target,
        (Resource::DeployKey(_), Resource::DeployKey(_)) | (Resource::Autolink(_), Resource::Autolink(_)) => true,
        _ => false,
    }
}

/// Dotted paths at which `desired` and `live` differ.
///
/// Objects recurse per key; arrays of equal length recurse per index; any
/// other mismatch (including arrays of different length) reports the path
/// itself.
pub fn changed_fields(desired: &Value, live: &Value) -> Vec<String> {
    let mut changes = Vec::new();
    collect_changes("", desired, live, &mut changes);
    changes
}

fn collect_changes(path: &str, desired: &Value, live: &Value, out: &mut Vec<String>) {
    match (desired, live) {
        (Value::Object(wanted), Value::Object(current)) => {
            let keys: BTreeSet<&String> = wanted.keys().chain(current.keys()).collect();
            for key in keys {
                let child = join(path, key);
                match (wanted.get(key.as_str()), current.get(key.as_str())) {
                    (Some(a), Some(b)) => collect_changes(&child, a, b, out),
                    _ => out.push(child),
                }
            }
        }
        (Value::Array(wanted), Value::Array(current)) if wanted.len() == current.len() => {
            for (index, (a, b)) in wanted.iter().zip(current).enumerate() {
                collect_changes(&join(path, &index.to_string()), a, b, out);
            }
        }
        _ if desired == live => {}
        _ => out.push(if path.is_empty() { ".".to_string() } else { path.to_string() }),
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}
