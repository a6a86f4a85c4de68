//! The raw desired-state document.
//!
//! A document describes one repository as loosely-typed maps and sequences,
//! keyed the way operators write them (`environments.staging.wait_timer`,
//! `rulesets.default.rules.pull_request`). Nothing here is validated beyond
//! shape; [`crate::normalize`] turns a document into typed descriptors.
//!
//! Documents load from TOML, JSON or YAML. The format is detected from the
//! file extension.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Serialization format of a document on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Detect the format from a file extension:
    /// - `.toml` -> TOML
    /// - `.json` -> JSON
    /// - `.yaml`, `.yml` -> YAML
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension.to_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(Error::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
        }
    }
}

/// Desired configuration of a single repository.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryDocument {
    /// When false the pass is a no-op and no API call is made.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub owner: String,
    pub name: String,

    pub description: Option<String>,
    pub homepage_url: Option<String>,
    pub visibility: Option<String>,
    pub archived: Option<bool>,
    pub has_issues: Option<bool>,
    pub has_projects: Option<bool>,
    pub has_discussions: Option<bool>,
    pub has_wiki: Option<bool>,
    pub has_downloads: Option<bool>,
    pub is_template: Option<bool>,
    pub allow_squash_merge: Option<bool>,
    pub squash_merge_commit_title: Option<String>,
    pub squash_merge_commit_message: Option<String>,
    pub allow_merge_commit: Option<bool>,
    pub merge_commit_title: Option<String>,
    pub merge_commit_message: Option<String>,
    pub allow_rebase_merge: Option<bool>,
    pub allow_auto_merge: Option<bool>,
    pub allow_update_branch: Option<bool>,
    pub delete_branch_on_merge: Option<bool>,
    pub web_commit_signoff_required: Option<bool>,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub security_and_analysis: Option<SecurityDocument>,

    /// Create-only: initialise the repository with an empty commit.
    #[serde(default)]
    pub auto_init: bool,
    /// Create-only: generate the repository from a template.
    pub template: Option<TemplateDocument>,

    #[serde(default)]
    pub autolink_references: BTreeMap<String, AutolinkDocument>,
    #[serde(default)]
    pub labels: BTreeMap<String, LabelDocument>,
    /// Team slug -> permission.
    #[serde(default)]
    pub teams: BTreeMap<String, String>,
    /// User login -> permission.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    #[serde(default)]
    pub deploy_keys: BTreeMap<String, DeployKeyDocument>,
    #[serde(default)]
    pub webhooks: BTreeMap<String, WebhookDocument>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, PropertyDocument>,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentDocument>,
    #[serde(default)]
    pub rulesets: BTreeMap<String, RulesetDocument>,

    /// Engine tuning for passes driven by this document.
    #[serde(default)]
    pub reconcile: ReconcileOptions,
}

fn default_true() -> bool {
    true
}

impl RepositoryDocument {
    /// An enabled document that manages nothing beyond repository metadata.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            owner: owner.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load a document from a file, detecting the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format).map_err(|message| Error::DocumentParse {
            path: path.to_path_buf(),
            format: format.name().into(),
            message,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    fn parse(content: &str, format: DocumentFormat) -> std::result::Result<Self, String> {
        match format {
            DocumentFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            DocumentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityDocument {
    pub advanced_security: Option<bool>,
    pub secret_scanning: Option<bool>,
    pub secret_scanning_push_protection: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateDocument {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub include_all_branches: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutolinkDocument {
    pub key_prefix: String,
    pub target_url: String,
    #[serde(default = "default_true")]
    pub is_alphanumeric: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelDocument {
    pub color: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployKeyDocument {
    pub title: String,
    pub key: String,
    #[serde(default = "default_true")]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookDocument {
    pub url: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub insecure_ssl: bool,
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A custom property value; exactly one field must be set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDocument {
    pub string: Option<String>,
    pub single_select: Option<String>,
    pub multi_select: Option<Vec<String>>,
    pub boolean: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDocument {
    /// Minutes; zero means no wait timer.
    #[serde(default)]
    pub wait_timer: u32,
    #[serde(default = "default_true")]
    pub can_admins_bypass: bool,
    #[serde(default)]
    pub prevent_self_review: bool,
    #[serde(default)]
    pub reviewers: ReviewersDocument,
    pub deployment_branch_policy: Option<BranchPolicyDocument>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewersDocument {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub teams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchPolicyDocument {
    #[serde(default)]
    pub protected_branches: bool,
    #[serde(default)]
    pub custom_branch_policies: bool,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesetDocument {
    /// Display name; defaults to the document key.
    pub name: Option<String>,
    pub enforcement: Option<String>,
    pub target: Option<String>,
    #[serde(default)]
    pub conditions: ConditionsDocument,
    #[serde(default)]
    pub bypass_actors: Vec<BypassActorDocument>,
    /// Rule kind -> parameters. Parameter shapes depend on the kind and are
    /// checked during normalization.
    #[serde(default)]
    pub rules: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionsDocument {
    #[serde(default)]
    pub ref_name: RefNameDocument,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefNameDocument {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BypassActorDocument {
    /// Numeric id, team slug, app slug or repository role name.
    pub actor_id: Option<Value>,
    pub actor_type: String,
    pub bypass_mode: Option<String>,
}

/// Tuning knobs for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileOptions {
    /// Maximum operations in flight within one level.
    pub concurrency: usize,
    /// Attempts per platform call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Compute and report the plan without applying it.
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            dry_run: false,
        }
    }
}
