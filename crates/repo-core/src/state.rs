//! Applied-state record
//!
//! What earlier passes did: platform identifiers per resource, digests of
//! write-only values as last applied, and the document key each entry was
//! declared under. The orchestrator persists it between passes (TOML or
//! JSON); the engine takes it as input and returns an updated copy.
//!
//! Every address in the record counts as managed: its kind is fetched even
//! when the desired state no longer lists any entry of that kind, so removed
//! entries are deleted.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use repo_model::{Identifiers, ResourceAddress, ResourceKind, Scope};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

/// SHA-256 of a write-only value, hex encoded.
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedState {
    /// Record format version for forward compatibility
    version: String,
    #[serde(default)]
    resources: BTreeMap<ResourceAddress, AppliedResource>,
}

/// One managed resource as last applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResource {
    #[serde(default)]
    pub ids: Identifiers,
    /// Checksum of the write-only value last sent, if the resource has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Document key, when it differs from the match key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub applied_at: DateTime<Utc>,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppliedState {
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            resources: BTreeMap::new(),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&AppliedResource> {
        self.resources.get(address)
    }

    pub fn ids(&self, address: &ResourceAddress) -> Option<&Identifiers> {
        self.resources.get(address).map(|entry| &entry.ids)
    }

    pub fn digest(&self, address: &ResourceAddress) -> Option<&str> {
        self.resources.get(address).and_then(|entry| entry.digest.as_deref())
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resources.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ResourceAddress> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Kinds with at least one managed entry.
    pub fn managed_kinds(&self) -> BTreeSet<ResourceKind> {
        self.resources.keys().map(|address| address.kind).collect()
    }

    /// Record a resource as applied. Empty identifiers keep the previous
    /// ones; a `None` digest keeps the previous digest.
    pub fn record(
        &mut self,
        address: ResourceAddress,
        ids: Identifiers,
        digest: Option<String>,
        alias: Option<String>,
    ) {
        let now = Utc::now();
        match self.resources.get_mut(&address) {
            Some(entry) => {
                if !ids.is_empty() {
                    entry.ids = ids;
                }
                if digest.is_some() {
                    entry.digest = digest;
                }
                if alias.is_some() {
                    entry.alias = alias;
                }
                entry.applied_at = now;
            }
            None => {
                self.resources.insert(
                    address,
                    AppliedResource {
                        ids,
                        digest,
                        alias,
                        applied_at: now,
                    },
                );
            }
        }
    }

    pub fn forget(&mut self, address: &ResourceAddress) -> Option<AppliedResource> {
        self.resources.remove(address)
    }

    /// Drop every entry scoped to the named environment; the platform
    /// deletes them along with it.
    pub fn forget_environment_children(&mut self, environment: &str) {
        let scope = Scope::environment(environment);
        self.resources.retain(|address, _| address.scope != scope);
    }

    /// Identifiers of one kind keyed by document key (or match key when the
    /// entry has no alias), e.g. webhook URLs by logical name.
    pub fn identifiers_by_key(&self, kind: ResourceKind) -> BTreeMap<String, Identifiers> {
        self.resources
            .iter()
            .filter(|(address, _)| address.kind == kind)
            .map(|(address, entry)| {
                let key = entry.alias.clone().unwrap_or_else(|| address.key.clone());
                (key, entry.ids.clone())
            })
            .collect()
    }
}
