//! Desired-state documents shared by the test suites.
//!
//! Stored as YAML under `test-fixtures/desired/` at the workspace root.

/// Every managed kind on one repository: environments with branch policies,
/// actions values at both scopes, a webhook with a secret and a branch
/// ruleset with pattern, review, deployment and status-check rules.
pub const COMPLETE: &str = include_str!("../../../test-fixtures/desired/complete.yaml");

/// Custom properties, a reviewer-protected environment, team and user
/// access, and a ruleset whose actors are given by name.
pub const MINIMUM: &str = include_str!("../../../test-fixtures/desired/minimum.yaml");

/// A tag ruleset with a regex name pattern.
pub const TAGS: &str = include_str!("../../../test-fixtures/desired/tags.yaml");

/// A repository created from a template.
pub const TEMPLATE: &str = include_str!("../../../test-fixtures/desired/template.yaml");

/// A disabled document.
pub const DISABLED: &str = include_str!("../../../test-fixtures/desired/disabled.yaml");

/// Login of the user the minimum fixture names as reviewer and collaborator.
pub const TEST_USER: &str = "cloudposse-test-bot";

/// Team the minimum fixture grants push access and ruleset bypass.
pub const TEST_TEAM: &str = "test-team";

/// Team the minimum fixture grants admin access.
pub const ADMIN_TEAM: &str = "admin";
