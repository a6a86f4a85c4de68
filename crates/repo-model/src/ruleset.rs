//! Repository rulesets.
//!
//! A ruleset applies a list of rules to the branches or tags matched by its
//! ref-name conditions. Bypass actors and ref patterns are ordered: the
//! platform evaluates them in sequence, so a reorder is a real change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::actor::ActorRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub target: RulesetTarget,
    pub enforcement: Enforcement,
    /// Read-only on the platform; repository rulesets are always `Repository`.
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub conditions: RefNameCondition,
    #[serde(default)]
    pub bypass_actors: Vec<BypassActor>,
    /// Rules sorted by [`RuleKind`], at most one per kind.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Ruleset {
    pub fn rule(&self, kind: RuleKind) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.kind() == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulesetTarget {
    Branch,
    Tag,
}

impl RulesetTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Tag => "tag",
        }
    }

    /// Prefix applied to bare ref patterns for this target.
    pub fn ref_prefix(&self) -> &'static str {
        match self {
            Self::Branch => "refs/heads/",
            Self::Tag => "refs/tags/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    #[default]
    Active,
    Disabled,
    Evaluate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceType {
    #[default]
    Repository,
    Organization,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefNameCondition {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassActor {
    pub actor_id: ActorRef,
    pub actor_type: ActorType,
    pub bypass_mode: BypassMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorType {
    OrganizationAdmin,
    RepositoryRole,
    Team,
    Integration,
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OrganizationAdmin" => Ok(Self::OrganizationAdmin),
            "RepositoryRole" => Ok(Self::RepositoryRole),
            "Team" => Ok(Self::Team),
            "Integration" => Ok(Self::Integration),
            other => Err(format!("unknown actor type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassMode {
    Always,
    PullRequest,
}

/// Every rule kind a ruleset can carry, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Creation,
    Update,
    Deletion,
    RequiredLinearHistory,
    RequiredSignatures,
    NonFastForward,
    BranchNamePattern,
    TagNamePattern,
    CommitAuthorEmailPattern,
    CommitMessagePattern,
    CommitterEmailPattern,
    PullRequest,
    RequiredDeployments,
    RequiredStatusChecks,
    MergeQueue,
}

impl RuleKind {
    pub const ALL: [RuleKind; 15] = [
        RuleKind::Creation,
        RuleKind::Update,
        RuleKind::Deletion,
        RuleKind::RequiredLinearHistory,
        RuleKind::RequiredSignatures,
        RuleKind::NonFastForward,
        RuleKind::BranchNamePattern,
        RuleKind::TagNamePattern,
        RuleKind::CommitAuthorEmailPattern,
        RuleKind::CommitMessagePattern,
        RuleKind::CommitterEmailPattern,
        RuleKind::PullRequest,
        RuleKind::RequiredDeployments,
        RuleKind::RequiredStatusChecks,
        RuleKind::MergeQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::Update => "update",
            Self::Deletion => "deletion",
            Self::RequiredLinearHistory => "required_linear_history",
            Self::RequiredSignatures => "required_signatures",
            Self::NonFastForward => "non_fast_forward",
            Self::BranchNamePattern => "branch_name_pattern",
            Self::TagNamePattern => "tag_name_pattern",
            Self::CommitAuthorEmailPattern => "commit_author_email_pattern",
            Self::CommitMessagePattern => "commit_message_pattern",
            Self::CommitterEmailPattern => "committer_email_pattern",
            Self::PullRequest => "pull_request",
            Self::RequiredDeployments => "required_deployments",
            Self::RequiredStatusChecks => "required_status_checks",
            Self::MergeQueue => "merge_queue",
        }
    }

    /// Whether the platform accepts this rule kind for the given target.
    ///
    /// Tag rulesets accept a strict subset of the shared kinds; the name
    /// pattern rule is the one target-specific exception in each direction.
    pub fn is_valid_for(&self, target: RulesetTarget) -> bool {
        match self {
            Self::PullRequest
            | Self::RequiredDeployments
            | Self::RequiredStatusChecks
            | Self::MergeQueue
            | Self::RequiredLinearHistory
            | Self::BranchNamePattern => target == RulesetTarget::Branch,
            Self::TagNamePattern => target == RulesetTarget::Tag,
            _ => true,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown rule kind '{}'", s))
    }
}

/// One rule, in the platform's `{type, parameters}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum Rule {
    Creation,
    Update { update_allows_fetch_and_merge: bool },
    Deletion,
    RequiredLinearHistory,
    RequiredSignatures,
    NonFastForward,
    BranchNamePattern(PatternRule),
    TagNamePattern(PatternRule),
    CommitAuthorEmailPattern(PatternRule),
    CommitMessagePattern(PatternRule),
    CommitterEmailPattern(PatternRule),
    PullRequest(PullRequestRule),
    RequiredDeployments(RequiredDeploymentsRule),
    RequiredStatusChecks(StatusChecksRule),
    MergeQueue(MergeQueueRule),
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Self::Creation => RuleKind::Creation,
            Self::Update { .. } => RuleKind::Update,
            Self::Deletion => RuleKind::Deletion,
            Self::RequiredLinearHistory => RuleKind::RequiredLinearHistory,
            Self::RequiredSignatures => RuleKind::RequiredSignatures,
            Self::NonFastForward => RuleKind::NonFastForward,
            Self::BranchNamePattern(_) => RuleKind::BranchNamePattern,
            Self::TagNamePattern(_) => RuleKind::TagNamePattern,
            Self::CommitAuthorEmailPattern(_) => RuleKind::CommitAuthorEmailPattern,
            Self::CommitMessagePattern(_) => RuleKind::CommitMessagePattern,
            Self::CommitterEmailPattern(_) => RuleKind::CommitterEmailPattern,
            Self::PullRequest(_) => RuleKind::PullRequest,
            Self::RequiredDeployments(_) => RuleKind::RequiredDeployments,
            Self::RequiredStatusChecks(_) => RuleKind::RequiredStatusChecks,
            Self::MergeQueue(_) => RuleKind::MergeQueue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternOperator {
    StartsWith,
    EndsWith,
    Contains,
    Regex,
}

impl FromStr for PatternOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starts_with" => Ok(Self::StartsWith),
            "ends_with" => Ok(Self::EndsWith),
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown pattern operator '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub negate: bool,
    pub operator: PatternOperator,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PullRequestRule {
    pub dismiss_stale_reviews_on_push: bool,
    pub require_code_owner_review: bool,
    pub require_last_push_approval: bool,
    pub required_approving_review_count: u32,
    pub required_review_thread_resolution: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequiredDeploymentsRule {
    pub required_deployment_environments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusChecksRule {
    pub required_status_checks: Vec<StatusCheck>,
    pub strict_required_status_checks_policy: bool,
    pub do_not_enforce_on_create: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub context: String,
    /// The app that must report the check; symbolic until resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<ActorRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupingStrategy {
    #[default]
    Allgreen,
    Headgreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeQueueRule {
    pub check_response_timeout_minutes: u32,
    pub grouping_strategy: GroupingStrategy,
    pub max_entries_to_build: u32,
    pub max_entries_to_merge: u32,
    pub merge_method: MergeMethod,
    pub min_entries_to_merge: u32,
    pub min_entries_to_merge_wait_minutes: u32,
}

impl Default for MergeQueueRule {
    fn default() -> Self {
        Self {
            check_response_timeout_minutes: 60,
            grouping_strategy: GroupingStrategy::Allgreen,
            max_entries_to_build: 5,
            max_entries_to_merge: 5,
            merge_method: MergeMethod::Merge,
            min_entries_to_merge: 1,
            min_entries_to_merge_wait_minutes: 5,
        }
    }
}
