//! Resource addressing.
//!
//! A [`ResourceAddress`] names one managed entity inside a repository. It is
//! the join key between desired state, live state, the applied-state record
//! and the per-resource report.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every resource kind the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Repository,
    Collaborator,
    TeamAccess,
    Label,
    Webhook,
    DeployKey,
    CustomProperty,
    Autolink,
    Environment,
    Secret,
    Variable,
    DeploymentBranchPolicy,
    Ruleset,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 13] = [
        ResourceKind::Repository,
        ResourceKind::Collaborator,
        ResourceKind::TeamAccess,
        ResourceKind::Label,
        ResourceKind::Webhook,
        ResourceKind::DeployKey,
        ResourceKind::CustomProperty,
        ResourceKind::Autolink,
        ResourceKind::Environment,
        ResourceKind::Secret,
        ResourceKind::Variable,
        ResourceKind::DeploymentBranchPolicy,
        ResourceKind::Ruleset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Collaborator => "collaborator",
            Self::TeamAccess => "team_access",
            Self::Label => "label",
            Self::Webhook => "webhook",
            Self::DeployKey => "deploy_key",
            Self::CustomProperty => "custom_property",
            Self::Autolink => "autolink",
            Self::Environment => "environment",
            Self::Secret => "secret",
            Self::Variable => "variable",
            Self::DeploymentBranchPolicy => "deployment_branch_policy",
            Self::Ruleset => "ruleset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{}'", s))
    }
}

/// Where a scoped resource lives: the repository itself or one environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Scope {
    #[default]
    Repository,
    Environment(String),
}

impl Scope {
    pub fn environment(name: impl Into<String>) -> Self {
        Self::Environment(name.into())
    }

    /// The environment name, if this scope is environment-bound.
    pub fn environment_name(&self) -> Option<&str> {
        match self {
            Self::Repository => None,
            Self::Environment(name) => Some(name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repository => f.write_str("repo"),
            Self::Environment(name) => write!(f, "env:{}", name),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repo" => Ok(Self::Repository),
            other => other
                .strip_prefix("env:")
                .filter(|name| !name.is_empty())
                .map(Self::environment)
                .ok_or_else(|| format!("invalid scope '{}'", other)),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Unique name of one managed entity within a repository.
///
/// Rendered as `kind.key` for repository-scoped resources and
/// `kind[env:name].key` for environment-scoped ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceAddress {
    pub kind: ResourceKind,
    pub scope: Scope,
    pub key: String,
}

impl ResourceAddress {
    /// Address of a repository-scoped resource.
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Scope::Repository,
            key: key.into(),
        }
    }

    pub fn scoped(kind: ResourceKind, scope: Scope, key: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            key: key.into(),
        }
    }

    /// Address of the environment that owns this resource, if any.
    pub fn owning_environment(&self) -> Option<ResourceAddress> {
        self.scope
            .environment_name()
            .map(|name| ResourceAddress::new(ResourceKind::Environment, name))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Repository => write!(f, "{}.{}", self.kind, self.key),
            scope => write!(f, "{}[{}].{}", self.kind, scope, self.key),
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .find(['.', '['])
            .ok_or_else(|| format!("invalid resource address '{}'", s))?;
        let kind: ResourceKind = s[..split].parse()?;
        let rest = &s[split..];

        if let Some(scoped) = rest.strip_prefix('[') {
            let (scope, key) = scoped
                .split_once("].")
                .ok_or_else(|| format!("invalid resource address '{}'", s))?;
            Ok(Self::scoped(kind, scope.parse()?, key))
        } else {
            Ok(Self::new(kind, &rest[1..]))
        }
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
