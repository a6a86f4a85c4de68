//! Resource descriptors for repository reconciliation.
//!
//! Every manageable sub-resource of a hosted repository has a typed
//! descriptor here. Descriptors are plain data: the desired-state normalizer
//! produces them from a configuration document, the live-state fetcher
//! produces them from the platform, and the differ compares the two.
//!
//! The [`platform`] module holds the contract the reconciler expects from an
//! API client; the client itself lives outside this workspace.

pub mod access;
pub mod actor;
pub mod address;
pub mod environment;
pub mod error;
pub mod keyed;
pub mod platform;
pub mod repository;
pub mod resource;
pub mod ruleset;

pub use access::{Collaborator, Permission, TeamAccess};
pub use actor::{ActorKind, ActorRef};
pub use address::{ResourceAddress, ResourceKind, Scope};
pub use environment::{DeploymentBranchPolicy, Environment, ProtectionRule, RefType, Reviewer, ReviewerType};
pub use error::{ApiError, ApiResult, ErrorClass};
pub use keyed::{Autolink, ContentType, CustomProperty, DeployKey, Label, PropertyValue, Secret, Variable, Webhook};
pub use platform::{Collection, Identifiers, Platform, Remote};
pub use repository::{FeatureStatus, RepoRef, RepositoryCreation, RepositorySettings, SecurityAndAnalysis, Template, Visibility};
pub use resource::Resource;
pub use ruleset::{
    ActorType, BypassActor, BypassMode, Enforcement, GroupingStrategy, MergeMethod, MergeQueueRule,
    PatternOperator, PatternRule, PullRequestRule, RefNameCondition, RequiredDeploymentsRule, Rule,
    RuleKind, Ruleset, RulesetTarget, SourceType, StatusCheck, StatusChecksRule,
};
