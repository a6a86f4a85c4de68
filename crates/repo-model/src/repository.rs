//! Repository identity and top-level settings.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Owner and name of the repository a reconciliation pass targets.
///
/// Threaded explicitly through every fetch and apply call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    Enabled,
    Disabled,
}

/// Security features; `None` leaves a feature unmanaged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityAndAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_security: Option<FeatureStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_scanning: Option<FeatureStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_scanning_push_protection: Option<FeatureStatus>,
}

/// Mutable repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub homepage_url: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub archived: bool,
    pub has_issues: bool,
    pub has_projects: bool,
    pub has_discussions: bool,
    pub has_wiki: bool,
    pub has_downloads: bool,
    pub is_template: bool,
    pub allow_squash_merge: bool,
    pub squash_merge_commit_title: String,
    pub squash_merge_commit_message: String,
    pub allow_merge_commit: bool,
    pub merge_commit_title: String,
    pub merge_commit_message: String,
    pub allow_rebase_merge: bool,
    pub allow_auto_merge: bool,
    pub allow_update_branch: bool,
    pub delete_branch_on_merge: bool,
    pub web_commit_signoff_required: bool,
    pub default_branch: String,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default)]
    pub security_and_analysis: SecurityAndAnalysis,
}

impl RepositorySettings {
    /// Platform defaults for a freshly created repository.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            homepage_url: String::new(),
            visibility: Visibility::Private,
            archived: false,
            has_issues: true,
            has_projects: true,
            has_discussions: false,
            has_wiki: true,
            has_downloads: true,
            is_template: false,
            allow_squash_merge: true,
            squash_merge_commit_title: "COMMIT_OR_PR_TITLE".to_string(),
            squash_merge_commit_message: "COMMIT_MESSAGES".to_string(),
            allow_merge_commit: true,
            merge_commit_title: "MERGE_MESSAGE".to_string(),
            merge_commit_message: "PR_TITLE".to_string(),
            allow_rebase_merge: true,
            allow_auto_merge: false,
            allow_update_branch: false,
            delete_branch_on_merge: false,
            web_commit_signoff_required: false,
            default_branch: "main".to_string(),
            topics: BTreeSet::new(),
            security_and_analysis: SecurityAndAnalysis::default(),
        }
    }
}

/// Template a repository is generated from at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub include_all_branches: bool,
}

/// Create-only options; ignored once the repository exists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryCreation {
    #[serde(default)]
    pub auto_init: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
}
