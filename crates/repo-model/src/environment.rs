//! Deployment environments and their branch policies.

use serde::{Deserialize, Serialize};

use crate::actor::ActorRef;

/// A deployment environment.
///
/// Protection rules are kept in the platform's canonical order:
/// `wait_timer`, `required_reviewers`, `branch_policy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub can_admins_bypass: bool,
    #[serde(default)]
    pub protection_rules: Vec<ProtectionRule>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_admins_bypass: true,
            protection_rules: Vec::new(),
        }
    }

    pub fn wait_timer(&self) -> Option<u32> {
        self.protection_rules.iter().find_map(|rule| match rule {
            ProtectionRule::WaitTimer { wait_timer } => Some(*wait_timer),
            _ => None,
        })
    }

    /// Whether deployment branch policies can be attached to this environment.
    pub fn allows_custom_branch_policies(&self) -> bool {
        self.protection_rules.iter().any(|rule| {
            matches!(
                rule,
                ProtectionRule::BranchPolicy {
                    custom_branch_policies: true,
                    ..
                }
            )
        })
    }

    pub fn reviewers(&self) -> &[Reviewer] {
        self.protection_rules
            .iter()
            .find_map(|rule| match rule {
                ProtectionRule::RequiredReviewers { reviewers, .. } => Some(reviewers.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

/// One protection gate on an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtectionRule {
    WaitTimer {
        wait_timer: u32,
    },
    RequiredReviewers {
        reviewers: Vec<Reviewer>,
        prevent_self_review: bool,
    },
    BranchPolicy {
        protected_branches: bool,
        custom_branch_policies: bool,
    },
}

impl ProtectionRule {
    /// Position in the platform's canonical rule ordering.
    pub fn rank(&self) -> u8 {
        match self {
            Self::WaitTimer { .. } => 0,
            Self::RequiredReviewers { .. } => 1,
            Self::BranchPolicy { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReviewerType {
    User,
    Team,
}

/// A required reviewer; `id` stays symbolic until the applier resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    #[serde(rename = "type")]
    pub reviewer_type: ReviewerType,
    pub id: ActorRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Tag => "tag",
        }
    }
}

/// A branch or tag pattern allowed to deploy to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentBranchPolicy {
    pub environment: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub name: String,
}

impl DeploymentBranchPolicy {
    /// Key unique within the owning environment, e.g. `branch:main`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.ref_type.as_str(), self.name)
    }
}
