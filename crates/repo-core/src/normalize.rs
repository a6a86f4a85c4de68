//! Desired-state normalization.
//!
//! Turns a [`RepositoryDocument`] into typed descriptors keyed by
//! [`ResourceAddress`], applying defaults and rejecting invalid or
//! mutually-exclusive fields before any API call is made. Every validation
//! error names the offending field as a dotted path, e.g.
//! `rulesets.default.rules.pull_request`.
//!
//! Actor names (team slugs, user logins, app slugs) are kept as
//! [`ActorRef::Name`] tokens; the applier resolves them right before the
//! call that needs them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use repo_model::{
    ActorRef, ActorType, Autolink, BypassActor, BypassMode, Collaborator, ContentType, CustomProperty,
    DeployKey, DeploymentBranchPolicy, Enforcement, Environment, FeatureStatus, GroupingStrategy, Label,
    MergeMethod, MergeQueueRule, PatternOperator, PatternRule, Permission, PropertyValue, ProtectionRule,
    PullRequestRule, RefNameCondition, RefType, RepoRef, RepositoryCreation, RepositorySettings,
    RequiredDeploymentsRule, Resource, ResourceAddress, ResourceKind, Reviewer, ReviewerType, Rule, RuleKind,
    Ruleset, RulesetTarget, Scope, Secret, SecurityAndAnalysis, SourceType, StatusCheck, StatusChecksRule,
    TeamAccess, Template, Variable, Visibility, Webhook,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::document::{
    BranchPolicyDocument, BypassActorDocument, EnvironmentDocument, PropertyDocument, RepositoryDocument,
    RulesetDocument, SecurityDocument,
};
use crate::{Error, Result};

/// Longest wait timer the platform accepts, in minutes (30 days).
pub const MAX_WAIT_TIMER: u32 = 43_200;

/// Most required reviewers an environment may list.
pub const MAX_REVIEWERS: usize = 6;

static LABEL_COLOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{6}$").unwrap());
static ACTIONS_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static TOPIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,49}$").unwrap());
static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://\S+$").unwrap());

/// The validated desired state of one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub repo: RepoRef,
    /// False when the document switches the repository off; nothing is managed.
    pub enabled: bool,
    /// Create-only options, used only when the repository does not exist yet.
    pub creation: RepositoryCreation,
    resources: BTreeMap<ResourceAddress, Resource>,
    aliases: BTreeMap<ResourceAddress, String>,
}

impl DesiredState {
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            enabled: true,
            creation: RepositoryCreation::default(),
            resources: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn disabled(repo: RepoRef) -> Self {
        Self {
            enabled: false,
            ..Self::new(repo)
        }
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&Resource> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resources.contains_key(address)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Kinds with at least one desired entry.
    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.resources.keys().map(|address| address.kind).collect()
    }

    pub fn repository(&self) -> Option<&RepositorySettings> {
        self.resources.values().find_map(|resource| match resource {
            Resource::Repository(settings) => Some(settings),
            _ => None,
        })
    }

    /// Names of every environment in the desired state.
    pub fn environment_names(&self) -> BTreeSet<&str> {
        self.resources
            .values()
            .filter_map(|resource| match resource {
                Resource::Environment(env) => Some(env.name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The document key an entry was declared under, when it differs from
    /// its match key (webhooks, deploy keys, autolinks, rulesets).
    pub fn alias(&self, address: &ResourceAddress) -> Option<&str> {
        self.aliases.get(address).map(String::as_str)
    }

    /// Add a resource, rejecting a second entry with the same address.
    pub fn insert(&mut self, field: &str, resource: Resource, alias: Option<String>) -> Result<()> {
        let address = resource.address();
        if let Some(existing) = self.aliases.get(&address) {
            return Err(Error::validation(field, format!("duplicates the entry declared as '{}'", existing)));
        }
        if self.resources.contains_key(&address) {
            return Err(Error::validation(field, format!("duplicates {}", address)));
        }
        if let Some(alias) = alias {
            self.aliases.insert(address.clone(), alias);
        }
        self.resources.insert(address, resource);
        Ok(())
    }
}

/// Validate a document and produce its desired state.
pub fn normalize(doc: &RepositoryDocument) -> Result<DesiredState> {
    if doc.owner.trim().is_empty() {
        return Err(Error::validation("owner", "must not be empty"));
    }
    if doc.name.trim().is_empty() {
        return Err(Error::validation("name", "must not be empty"));
    }

    let repo = RepoRef::new(doc.owner.trim(), doc.name.trim());
    if !doc.enabled {
        tracing::debug!(repo = %repo, "repository disabled, desired state is empty");
        return Ok(DesiredState::disabled(repo));
    }

    let mut desired = DesiredState::new(repo);
    desired.creation = RepositoryCreation {
        auto_init: doc.auto_init,
        template: doc.template.as_ref().map(|template| Template {
            owner: template.owner.clone(),
            name: template.name.clone(),
            include_all_branches: template.include_all_branches,
        }),
    };

    desired.insert("name", Resource::Repository(repository_settings(doc)?), None)?;

    for (login, permission) in &doc.users {
        let field = format!("users.{}", login);
        let permission = parse_permission(&field, permission)?;
        let collaborator = Collaborator {
            login: login.clone(),
            permission,
        };
        desired.insert(&field, Resource::Collaborator(collaborator), None)?;
    }

    for (slug, permission) in &doc.teams {
        let field = format!("teams.{}", slug);
        let permission = parse_permission(&field, permission)?;
        let team = TeamAccess {
            slug: slug.clone(),
            permission,
        };
        desired.insert(&field, Resource::TeamAccess(team), None)?;
    }

    for (name, label) in &doc.labels {
        let field = format!("labels.{}", name);
        let color = label.color.trim_start_matches('#');
        if !LABEL_COLOR.is_match(color) {
            return Err(Error::validation(
                format!("{}.color", field),
                format!("'{}' is not a six digit hex color", label.color),
            ));
        }
        let label = Label {
            name: name.clone(),
            color: color.to_lowercase(),
            description: label.description.clone(),
        };
        desired.insert(&field, Resource::Label(label), None)?;
    }

    for (key, hook) in &doc.webhooks {
        let field = format!("webhooks.{}", key);
        if !HTTP_URL.is_match(&hook.url) {
            return Err(Error::validation(format!("{}.url", field), "must be an http(s) URL"));
        }
        if hook.events.is_empty() {
            return Err(Error::validation(format!("{}.events", field), "must list at least one event"));
        }
        let content_type = match hook.content_type.as_deref() {
            None | Some("json") => ContentType::Json,
            Some("form") => ContentType::Form,
            Some(other) => {
                return Err(Error::validation(
                    format!("{}.content_type", field),
                    format!("unknown content type '{}'", other),
                ));
            }
        };
        let webhook = Webhook {
            url: hook.url.clone(),
            content_type,
            insecure_ssl: hook.insecure_ssl,
            events: hook.events.iter().cloned().collect(),
            active: hook.active,
            secret: hook.secret.clone(),
        };
        desired.insert(&field, Resource::Webhook(webhook), Some(key.clone()))?;
    }

    for (key, deploy_key) in &doc.deploy_keys {
        let field = format!("deploy_keys.{}", key);
        if deploy_key.title.trim().is_empty() {
            return Err(Error::validation(format!("{}.title", field), "must not be empty"));
        }
        if deploy_key.key.trim().is_empty() {
            return Err(Error::validation(format!("{}.key", field), "must not be empty"));
        }
        let resource = Resource::DeployKey(DeployKey {
            title: deploy_key.title.clone(),
            key: deploy_key.key.trim().to_string(),
            read_only: deploy_key.read_only,
        });
        desired.insert(&field, resource, Some(key.clone()))?;
    }

    for (name, property) in &doc.custom_properties {
        let field = format!("custom_properties.{}", name);
        let value = property_value(&field, property)?;
        desired.insert(
            &field,
            Resource::CustomProperty(CustomProperty {
                name: name.clone(),
                value,
            }),
            None,
        )?;
    }

    for (key, link) in &doc.autolink_references {
        let field = format!("autolink_references.{}", key);
        if !link.target_url.contains("<num>") {
            return Err(Error::validation(format!("{}.target_url", field), "must contain the <num> placeholder"));
        }
        let resource = Resource::Autolink(Autolink {
            key_prefix: link.key_prefix.clone(),
            url_template: link.target_url.clone(),
            is_alphanumeric: link.is_alphanumeric,
        });
        desired.insert(&field, resource, Some(key.clone()))?;
    }

    insert_actions_values(&mut desired, "", Scope::Repository, &doc.variables, &doc.secrets)?;

    for (name, env) in &doc.environments {
        insert_environment(&mut desired, name, env)?;
    }

    let declared: BTreeSet<&str> = doc.environments.keys().map(String::as_str).collect();
    for (key, ruleset) in &doc.rulesets {
        let field = format!("rulesets.{}", key);
        let ruleset = normalize_ruleset(&field, key, ruleset, &declared)?;
        desired.insert(&field, Resource::Ruleset(ruleset), Some(key.clone()))?;
    }

    tracing::debug!(repo = %desired.repo, resources = desired.len(), "normalized desired state");
    Ok(desired)
}

fn repository_settings(doc: &RepositoryDocument) -> Result<RepositorySettings> {
    let mut settings = RepositorySettings::with_defaults(doc.name.trim());

    if let Some(visibility) = &doc.visibility {
        settings.visibility = match visibility.as_str() {
            "public" => Visibility::Public,
            "private" => Visibility::Private,
            "internal" => Visibility::Internal,
            other => {
                return Err(Error::validation("visibility", format!("unknown visibility '{}'", other)));
            }
        };
    }

    macro_rules! overlay {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = &doc.$field {
                settings.$field = value.clone();
            })*
        };
    }
    overlay!(
        description,
        homepage_url,
        archived,
        has_issues,
        has_projects,
        has_discussions,
        has_wiki,
        has_downloads,
        is_template,
        allow_squash_merge,
        squash_merge_commit_title,
        squash_merge_commit_message,
        allow_merge_commit,
        merge_commit_title,
        merge_commit_message,
        allow_rebase_merge,
        allow_auto_merge,
        allow_update_branch,
        delete_branch_on_merge,
        web_commit_signoff_required,
        default_branch,
    );

    for (index, topic) in doc.topics.iter().enumerate() {
        if !TOPIC.is_match(topic) {
            return Err(Error::validation(
                format!("topics.{}", index),
                format!("'{}' must be lowercase letters, digits and hyphens", topic),
            ));
        }
    }
    settings.topics = doc.topics.iter().cloned().collect();

    if let Some(security) = &doc.security_and_analysis {
        settings.security_and_analysis = security_settings(security);
    }

    Ok(settings)
}

fn security_settings(doc: &SecurityDocument) -> SecurityAndAnalysis {
    let status = |flag: Option<bool>| {
        flag.map(|enabled| {
            if enabled {
                FeatureStatus::Enabled
            } else {
                FeatureStatus::Disabled
            }
        })
    };
    SecurityAndAnalysis {
        advanced_security: status(doc.advanced_security),
        secret_scanning: status(doc.secret_scanning),
        secret_scanning_push_protection: status(doc.secret_scanning_push_protection),
    }
}

fn parse_permission(field: &str, raw: &str) -> Result<Permission> {
    raw.parse().map_err(|message: String| Error::validation(field, message))
}

fn property_value(field: &str, doc: &PropertyDocument) -> Result<PropertyValue> {
    let value = match (&doc.string, &doc.single_select, &doc.multi_select, doc.boolean) {
        (Some(text), None, None, None) => PropertyValue::String(text.clone()),
        (None, Some(choice), None, None) => PropertyValue::SingleSelect(choice.clone()),
        (None, None, Some(choices), None) => {
            if choices.is_empty() {
                return Err(Error::validation(
                    format!("{}.multi_select", field),
                    "must select at least one value",
                ));
            }
            PropertyValue::MultiSelect(choices.iter().cloned().collect())
        }
        (None, None, None, Some(flag)) => PropertyValue::Boolean(flag),
        _ => {
            return Err(Error::validation(
                field,
                "exactly one of string, single_select, multi_select or boolean must be set",
            ));
        }
    };
    Ok(value)
}

fn insert_actions_values(
    desired: &mut DesiredState,
    prefix: &str,
    scope: Scope,
    variables: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
) -> Result<()> {
    for (name, value) in variables {
        let field = format!("{}variables.{}", prefix, name);
        check_actions_name(&field, name)?;
        let variable = Variable {
            scope: scope.clone(),
            name: name.clone(),
            value: value.clone(),
        };
        desired.insert(&field, Resource::Variable(variable), None)?;
    }
    for (name, value) in secrets {
        let field = format!("{}secrets.{}", prefix, name);
        check_actions_name(&field, name)?;
        let secret = Secret {
            scope: scope.clone(),
            name: name.clone(),
            value: Some(value.clone()),
        };
        desired.insert(&field, Resource::Secret(secret), None)?;
    }
    Ok(())
}

fn check_actions_name(field: &str, name: &str) -> Result<()> {
    if !ACTIONS_NAME.is_match(name) {
        return Err(Error::validation(field, "names may only contain letters, digits and underscores"));
    }
    if name.to_uppercase().starts_with("GITHUB_") {
        return Err(Error::validation(field, "names must not start with GITHUB_"));
    }
    Ok(())
}

fn insert_environment(desired: &mut DesiredState, name: &str, doc: &EnvironmentDocument) -> Result<()> {
    let field = format!("environments.{}", name);
    let mut env = Environment::new(name);
    env.can_admins_bypass = doc.can_admins_bypass;

    if doc.wait_timer > MAX_WAIT_TIMER {
        return Err(Error::validation(
            format!("{}.wait_timer", field),
            format!("{} exceeds the maximum of {} minutes", doc.wait_timer, MAX_WAIT_TIMER),
        ));
    }
    if doc.wait_timer > 0 {
        env.protection_rules.push(ProtectionRule::WaitTimer {
            wait_timer: doc.wait_timer,
        });
    }

    let reviewers: Vec<Reviewer> = doc
        .reviewers
        .users
        .iter()
        .map(|user| (ReviewerType::User, user))
        .chain(doc.reviewers.teams.iter().map(|team| (ReviewerType::Team, team)))
        .map(|(reviewer_type, raw)| Reviewer {
            reviewer_type,
            id: ActorRef::parse(raw),
        })
        .collect();

    if reviewers.len() > MAX_REVIEWERS {
        return Err(Error::validation(
            format!("{}.reviewers", field),
            format!("at most {} reviewers are allowed", MAX_REVIEWERS),
        ));
    }
    if doc.prevent_self_review && reviewers.is_empty() {
        return Err(Error::validation(
            format!("{}.prevent_self_review", field),
            "requires at least one reviewer",
        ));
    }
    if !reviewers.is_empty() {
        env.protection_rules.push(ProtectionRule::RequiredReviewers {
            reviewers,
            prevent_self_review: doc.prevent_self_review,
        });
    }

    let policies = match &doc.deployment_branch_policy {
        Some(policy) => {
            env.protection_rules.push(branch_policy_rule(&field, policy)?);
            branch_policies(name, policy)
        }
        None => Vec::new(),
    };

    desired.insert(&field, Resource::Environment(env), None)?;
    for policy in policies {
        let policy_field = format!("{}.deployment_branch_policy.{}s.{}", field, policy.ref_type.as_str(), policy.name);
        desired.insert(&policy_field, Resource::DeploymentBranchPolicy(policy), None)?;
    }

    insert_actions_values(
        desired,
        &format!("{}.", field),
        Scope::environment(name),
        &doc.variables,
        &doc.secrets,
    )
}

fn branch_policy_rule(field: &str, doc: &BranchPolicyDocument) -> Result<ProtectionRule> {
    let field = format!("{}.deployment_branch_policy", field);
    match (doc.protected_branches, doc.custom_branch_policies) {
        (true, true) => Err(Error::validation(
            field,
            "protected_branches and custom_branch_policies are mutually exclusive",
        )),
        (false, false) => Err(Error::validation(
            field,
            "one of protected_branches or custom_branch_policies must be true",
        )),
        (_, false) if !doc.branches.is_empty() || !doc.tags.is_empty() => Err(Error::validation(
            format!("{}.custom_branch_policies", field),
            "branch and tag patterns require custom_branch_policies",
        )),
        (protected_branches, custom_branch_policies) => Ok(ProtectionRule::BranchPolicy {
            protected_branches,
            custom_branch_policies,
        }),
    }
}

fn branch_policies(environment: &str, doc: &BranchPolicyDocument) -> Vec<DeploymentBranchPolicy> {
    let branches = doc.branches.iter().map(|name| (RefType::Branch, name));
    let tags = doc.tags.iter().map(|name| (RefType::Tag, name));
    branches
        .chain(tags)
        .map(|(ref_type, name)| DeploymentBranchPolicy {
            environment: environment.to_string(),
            ref_type,
            name: name.clone(),
        })
        .collect()
}

/// Prefix a bare ref pattern for its target. `~ALL`, `~DEFAULT_BRANCH` and
/// patterns already under `refs/` are kept as written.
pub fn normalize_ref(pattern: &str, target: RulesetTarget) -> String {
    if pattern.starts_with('~') || pattern.starts_with("refs/") {
        pattern.to_string()
    } else {
        format!("{}{}", target.ref_prefix(), pattern)
    }
}

/// Numeric id of a built-in repository role.
pub fn repository_role_id(role: &str) -> Option<u64> {
    match role {
        "maintain" => Some(2),
        "write" => Some(4),
        "admin" => Some(5),
        _ => None,
    }
}

fn normalize_ruleset(
    field: &str,
    key: &str,
    doc: &RulesetDocument,
    environments: &BTreeSet<&str>,
) -> Result<Ruleset> {
    let name = doc.name.clone().unwrap_or_else(|| key.to_string());
    if name.trim().is_empty() {
        return Err(Error::validation(format!("{}.name", field), "must not be empty"));
    }

    let target = match doc.target.as_deref() {
        None | Some("branch") => RulesetTarget::Branch,
        Some("tag") => RulesetTarget::Tag,
        Some(other) => {
            return Err(Error::validation(format!("{}.target", field), format!("unknown target '{}'", other)));
        }
    };

    let enforcement = match doc.enforcement.as_deref() {
        None | Some("active") => Enforcement::Active,
        Some("disabled") => Enforcement::Disabled,
        Some("evaluate") => Enforcement::Evaluate,
        Some(other) => {
            return Err(Error::validation(
                format!("{}.enforcement", field),
                format!("unknown enforcement '{}'", other),
            ));
        }
    };

    let ref_name = &doc.conditions.ref_name;
    let conditions = RefNameCondition {
        include: ref_name.include.iter().map(|p| normalize_ref(p, target)).collect(),
        exclude: ref_name.exclude.iter().map(|p| normalize_ref(p, target)).collect(),
    };

    let bypass_actors = doc
        .bypass_actors
        .iter()
        .enumerate()
        .map(|(index, actor)| bypass_actor(&format!("{}.bypass_actors.{}", field, index), actor))
        .collect::<Result<Vec<_>>>()?;

    let mut rules = Vec::with_capacity(doc.rules.len());
    for (raw_kind, params) in &doc.rules {
        let rule_field = format!("{}.rules.{}", field, raw_kind);
        let kind: RuleKind = raw_kind
            .parse()
            .map_err(|message: String| Error::validation(&rule_field, message))?;
        if !kind.is_valid_for(target) {
            return Err(Error::validation(
                &rule_field,
                format!("rule '{}' is not valid for target '{}'", kind, target.as_str()),
            ));
        }
        if let Some(rule) = parse_rule(&rule_field, kind, params, environments)? {
            rules.push(rule);
        }
    }
    rules.sort_by_key(Rule::kind);

    Ok(Ruleset {
        name,
        target,
        enforcement,
        source_type: SourceType::Repository,
        conditions,
        bypass_actors,
        rules,
    })
}

fn bypass_actor(field: &str, doc: &BypassActorDocument) -> Result<BypassActor> {
    let actor_type: ActorType = doc
        .actor_type
        .parse()
        .map_err(|message: String| Error::validation(format!("{}.actor_type", field), message))?;

    let bypass_mode = match doc.bypass_mode.as_deref() {
        None | Some("always") => BypassMode::Always,
        Some("pull_request") => BypassMode::PullRequest,
        Some(other) => {
            return Err(Error::validation(
                format!("{}.bypass_mode", field),
                format!("unknown bypass mode '{}'", other),
            ));
        }
    };

    let id_field = format!("{}.actor_id", field);
    let raw = doc.actor_id.as_ref().and_then(actor_ref);
    let actor_id = match actor_type {
        ActorType::OrganizationAdmin => ActorRef::Id(0),
        ActorType::RepositoryRole => match raw {
            Some(ActorRef::Id(id)) => ActorRef::Id(id),
            Some(ActorRef::Name(role)) => repository_role_id(&role)
                .map(ActorRef::Id)
                .ok_or_else(|| Error::validation(&id_field, format!("unknown repository role '{}'", role)))?,
            None => return Err(Error::validation(&id_field, "is required for RepositoryRole")),
        },
        ActorType::Team | ActorType::Integration => {
            raw.ok_or_else(|| Error::validation(&id_field, "is required"))?
        }
    };

    Ok(BypassActor {
        actor_id,
        actor_type,
        bypass_mode,
    })
}

fn actor_ref(value: &Value) -> Option<ActorRef> {
    match value {
        Value::Number(number) => number.as_u64().map(ActorRef::Id),
        Value::String(raw) if !raw.trim().is_empty() => Some(ActorRef::parse(raw)),
        _ => None,
    }
}

/// An optional actor reference; present but unusable values are rejected.
fn optional_actor(field: &str, value: Option<&Value>) -> Result<Option<ActorRef>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => actor_ref(value)
            .map(Some)
            .ok_or_else(|| Error::validation(field, format!("expected a numeric id or a name, got {}", value))),
    }
}

fn parse_params<T: DeserializeOwned>(field: &str, params: &Value) -> Result<T> {
    serde_json::from_value(params.clone()).map_err(|e| Error::validation(field, e.to_string()))
}

/// Flag rules are switched on with `true` or an empty table.
fn flag_enabled(field: &str, params: &Value) -> Result<bool> {
    match params {
        Value::Bool(enabled) => Ok(*enabled),
        Value::Null => Ok(false),
        Value::Object(map) if map.is_empty() => Ok(true),
        _ => Err(Error::validation(field, "expected true, false or an empty table")),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateParams {
    #[serde(default)]
    update_allows_fetch_and_merge: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternParams {
    name: Option<String>,
    #[serde(default)]
    negate: bool,
    operator: String,
    pattern: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PullRequestParams {
    #[serde(default)]
    dismiss_stale_reviews_on_push: bool,
    #[serde(default)]
    require_code_owner_review: bool,
    #[serde(default)]
    require_last_push_approval: bool,
    #[serde(default)]
    required_approving_review_count: u32,
    #[serde(default)]
    required_review_thread_resolution: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RequiredDeploymentsParams {
    #[serde(alias = "environments")]
    required_deployment_environments: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusChecksParams {
    #[serde(alias = "required_status_checks")]
    required_check: Vec<StatusCheckParams>,
    #[serde(default)]
    strict_required_status_checks_policy: bool,
    #[serde(default)]
    do_not_enforce_on_create: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusCheckParams {
    context: String,
    integration_id: Option<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MergeQueueParams {
    check_response_timeout_minutes: Option<u32>,
    grouping_strategy: Option<String>,
    max_entries_to_build: Option<u32>,
    max_entries_to_merge: Option<u32>,
    merge_method: Option<String>,
    min_entries_to_merge: Option<u32>,
    min_entries_to_merge_wait_minutes: Option<u32>,
}

fn parse_rule(
    field: &str,
    kind: RuleKind,
    params: &Value,
    environments: &BTreeSet<&str>,
) -> Result<Option<Rule>> {
    let rule = match kind {
        RuleKind::Creation
        | RuleKind::Deletion
        | RuleKind::RequiredLinearHistory
        | RuleKind::RequiredSignatures
        | RuleKind::NonFastForward => {
            if !flag_enabled(field, params)? {
                return Ok(None);
            }
            match kind {
                RuleKind::Creation => Rule::Creation,
                RuleKind::Deletion => Rule::Deletion,
                RuleKind::RequiredLinearHistory => Rule::RequiredLinearHistory,
                RuleKind::RequiredSignatures => Rule::RequiredSignatures,
                _ => Rule::NonFastForward,
            }
        }
        RuleKind::Update => match params {
            Value::Bool(false) | Value::Null => return Ok(None),
            Value::Bool(true) => Rule::Update {
                update_allows_fetch_and_merge: false,
            },
            _ => {
                let params: UpdateParams = parse_params(field, params)?;
                Rule::Update {
                    update_allows_fetch_and_merge: params.update_allows_fetch_and_merge,
                }
            }
        },
        RuleKind::BranchNamePattern
        | RuleKind::TagNamePattern
        | RuleKind::CommitAuthorEmailPattern
        | RuleKind::CommitMessagePattern
        | RuleKind::CommitterEmailPattern => {
            let pattern = pattern_rule(field, parse_params(field, params)?)?;
            match kind {
                RuleKind::BranchNamePattern => Rule::BranchNamePattern(pattern),
                RuleKind::TagNamePattern => Rule::TagNamePattern(pattern),
                RuleKind::CommitAuthorEmailPattern => Rule::CommitAuthorEmailPattern(pattern),
                RuleKind::CommitMessagePattern => Rule::CommitMessagePattern(pattern),
                _ => Rule::CommitterEmailPattern(pattern),
            }
        }
        RuleKind::PullRequest => {
            let params: PullRequestParams = parse_params(field, params)?;
            Rule::PullRequest(PullRequestRule {
                dismiss_stale_reviews_on_push: params.dismiss_stale_reviews_on_push,
                require_code_owner_review: params.require_code_owner_review,
                require_last_push_approval: params.require_last_push_approval,
                required_approving_review_count: params.required_approving_review_count,
                required_review_thread_resolution: params.required_review_thread_resolution,
            })
        }
        RuleKind::RequiredDeployments => {
            let params: RequiredDeploymentsParams = parse_params(field, params)?;
            if let Some(missing) = params
                .required_deployment_environments
                .iter()
                .find(|name| !environments.contains(name.as_str()))
            {
                return Err(Error::validation(
                    field,
                    format!("environment '{}' is not declared in this document", missing),
                ));
            }
            Rule::RequiredDeployments(RequiredDeploymentsRule {
                required_deployment_environments: params.required_deployment_environments,
            })
        }
        RuleKind::RequiredStatusChecks => {
            let params: StatusChecksParams = parse_params(field, params)?;
            let checks = params
                .required_check
                .into_iter()
                .enumerate()
                .map(|(n, check)| {
                    let id_field = format!("{}.required_check.{}.integration_id", field, n);
                    Ok(StatusCheck {
                        context: check.context,
                        integration_id: optional_actor(&id_field, check.integration_id.as_ref())?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Rule::RequiredStatusChecks(StatusChecksRule {
                required_status_checks: checks,
                strict_required_status_checks_policy: params.strict_required_status_checks_policy,
                do_not_enforce_on_create: params.do_not_enforce_on_create,
            })
        }
        RuleKind::MergeQueue => Rule::MergeQueue(merge_queue_rule(field, parse_params(field, params)?)?),
    };
    Ok(Some(rule))
}

fn pattern_rule(field: &str, params: PatternParams) -> Result<PatternRule> {
    let operator: PatternOperator = params
        .operator
        .parse()
        .map_err(|message: String| Error::validation(format!("{}.operator", field), message))?;
    if operator == PatternOperator::Regex
        && let Err(e) = Regex::new(&params.pattern)
    {
        return Err(Error::validation(format!("{}.pattern", field), e.to_string()));
    }
    Ok(PatternRule {
        name: params.name,
        negate: params.negate,
        operator,
        pattern: params.pattern,
    })
}

fn merge_queue_rule(field: &str, params: MergeQueueParams) -> Result<MergeQueueRule> {
    let defaults = MergeQueueRule::default();
    let grouping_strategy = match params.grouping_strategy.as_deref() {
        None => defaults.grouping_strategy,
        Some("ALLGREEN") => GroupingStrategy::Allgreen,
        Some("HEADGREEN") => GroupingStrategy::Headgreen,
        Some(other) => {
            return Err(Error::validation(
                format!("{}.grouping_strategy", field),
                format!("unknown grouping strategy '{}'", other),
            ));
        }
    };
    let merge_method = match params.merge_method.as_deref() {
        None => defaults.merge_method,
        Some("MERGE") => MergeMethod::Merge,
        Some("SQUASH") => MergeMethod::Squash,
        Some("REBASE") => MergeMethod::Rebase,
        Some(other) => {
            return Err(Error::validation(
                format!("{}.merge_method", field),
                format!("unknown merge method '{}'", other),
            ));
        }
    };
    Ok(MergeQueueRule {
        check_response_timeout_minutes: params
            .check_response_timeout_minutes
            .unwrap_or(defaults.check_response_timeout_minutes),
        grouping_strategy,
        max_entries_to_build: params.max_entries_to_build.unwrap_or(defaults.max_entries_to_build),
        max_entries_to_merge: params.max_entries_to_merge.unwrap_or(defaults.max_entries_to_merge),
        merge_method,
        min_entries_to_merge: params.min_entries_to_merge.unwrap_or(defaults.min_entries_to_merge),
        min_entries_to_merge_wait_minutes: params
            .min_entries_to_merge_wait_minutes
            .unwrap_or(defaults.min_entries_to_merge_wait_minutes),
    })
}
