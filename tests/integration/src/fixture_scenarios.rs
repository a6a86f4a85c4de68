//! Full passes over the shared fixture documents.
//!
//! Each scenario applies a document to a fresh in-memory platform, checks
//! what the platform ended up holding, then runs a second pass that must
//! make no write at all.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use repo_core::{AppliedState, ReconcileOptions, ReconcileOutcome, Reconciler, RepositoryDocument};
use repo_model::{
    ActorKind, ActorRef, ActorType, BypassActor, BypassMode, DeploymentBranchPolicy, Environment, FeatureStatus,
    GroupingStrategy, MergeMethod, Permission, Platform, PropertyValue, ProtectionRule, RefType, Resource,
    ResourceAddress, ResourceKind, Reviewer, ReviewerType, Rule, Ruleset, RulesetTarget, Scope, Visibility,
};
use repo_test_utils::fixtures::{self, ADMIN_TEAM, TEST_TEAM, TEST_USER};
use repo_test_utils::{MemoryPlatform, REDACTED, init_tracing};

const TEST_USER_ID: u64 = 1001;
const TEST_TEAM_ID: u64 = 2002;

async fn reconcile(platform: &Arc<MemoryPlatform>, doc: &RepositoryDocument, state: &AppliedState) -> ReconcileOutcome {
    let client: Arc<dyn Platform> = platform.clone();
    let options = ReconcileOptions {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..ReconcileOptions::default()
    };
    Reconciler::new(client)
        .with_options(options)
        .reconcile(doc, state)
        .await
        .unwrap()
}

/// Second pass against an unchanged platform: nothing written.
async fn assert_idempotent(platform: &Arc<MemoryPlatform>, doc: &RepositoryDocument, state: &AppliedState) {
    platform.clear_calls();
    let again = reconcile(platform, doc, state).await;
    assert_eq!(again.report.to_string(), "Resources: 0 added, 0 changed, 0 destroyed.");
    assert!(again.report.is_success());
    assert_eq!(platform.write_calls(), Vec::new(), "second pass wrote to the platform");
}

fn resource(platform: &MemoryPlatform, kind: ResourceKind, key: &str) -> Resource {
    platform
        .resource(&ResourceAddress::new(kind, key))
        .unwrap_or_else(|| panic!("{}.{} missing on the platform", kind, key))
}

#[tokio::test]
async fn complete_repository_round_trip() {
    init_tracing();
    let platform = Arc::new(MemoryPlatform::new());
    let doc = RepositoryDocument::from_yaml_str(fixtures::COMPLETE).unwrap();

    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert!(first.report.is_success(), "failures: {:?}", first.report.failures().collect::<Vec<_>>());
    assert_eq!(first.report.to_string(), "Resources: 19 added, 0 changed, 0 destroyed.");

    let repo = platform.repository().unwrap();
    assert_eq!(repo.name, "terraform-github-repository-test");
    assert_eq!(repo.description, "Terraform acceptance tests");
    assert_eq!(repo.homepage_url, "http://example.com/");
    assert_eq!(repo.visibility, Visibility::Public);
    assert!(repo.has_discussions && repo.is_template && repo.web_commit_signoff_required);
    assert!(repo.delete_branch_on_merge && repo.allow_update_branch);
    assert_eq!(repo.squash_merge_commit_title, "COMMIT_OR_PR_TITLE");
    assert_eq!(repo.merge_commit_message, "PR_TITLE");
    assert_eq!(repo.security_and_analysis.advanced_security, None);
    assert_eq!(repo.security_and_analysis.secret_scanning, Some(FeatureStatus::Enabled));
    assert_eq!(
        repo.topics.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["github", "terraform", "test"]
    );
    assert!(platform.creation().unwrap().auto_init);

    let Resource::Autolink(autolink) = resource(&platform, ResourceKind::Autolink, "JIRA-") else {
        panic!("not an autolink");
    };
    assert_eq!(autolink.url_template, "https://jira.example.com/browse/<num>");

    let Resource::Label(bug) = resource(&platform, ResourceKind::Label, "bug2") else {
        panic!("not a label");
    };
    assert_eq!(bug.color, "a73a4a");
    assert_eq!(bug.description, "🐛 An issue with the system");

    let hook_address = ResourceAddress::new(ResourceKind::Webhook, "https://hooks.example.com/github");
    assert_eq!(platform.webhook_secret(&hook_address).as_deref(), Some("webhook-s3cret"));
    let Some(Resource::Webhook(hook)) = platform.resource(&hook_address) else {
        panic!("webhook missing");
    };
    assert_eq!(hook.secret.as_deref(), Some(REDACTED));
    assert_eq!(
        hook.events.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["pull_request", "push"]
    );

    let environments: Vec<String> = platform
        .addresses()
        .into_iter()
        .filter(|address| address.kind == ResourceKind::Environment)
        .map(|address| address.key)
        .collect();
    assert_eq!(environments, vec!["development", "production", "staging"]);

    let Resource::Environment(staging) = resource(&platform, ResourceKind::Environment, "staging") else {
        panic!("not an environment");
    };
    assert_eq!(
        staging,
        Environment {
            name: "staging".into(),
            can_admins_bypass: true,
            protection_rules: vec![
                ProtectionRule::WaitTimer { wait_timer: 1 },
                ProtectionRule::BranchPolicy {
                    protected_branches: true,
                    custom_branch_policies: false,
                },
            ],
        }
    );

    let production = Scope::environment("production");
    let policies: Vec<Resource> = platform
        .addresses()
        .into_iter()
        .filter(|address| address.kind == ResourceKind::DeploymentBranchPolicy)
        .filter_map(|address| platform.resource(&address))
        .collect();
    assert_eq!(
        policies,
        vec![
            Resource::DeploymentBranchPolicy(DeploymentBranchPolicy {
                environment: "production".into(),
                ref_type: RefType::Branch,
                name: "main".into(),
            }),
            Resource::DeploymentBranchPolicy(DeploymentBranchPolicy {
                environment: "production".into(),
                ref_type: RefType::Tag,
                name: "v1.0.0".into(),
            }),
        ]
    );
    let production_secret = ResourceAddress::scoped(ResourceKind::Secret, production, "TEST_SECRET");
    assert_eq!(platform.secret_value(&production_secret).as_deref(), Some("production-secret"));
    let staging_variable = ResourceAddress::scoped(ResourceKind::Variable, Scope::environment("staging"), "TEST_VARIABLE_2");
    assert!(platform.resource(&staging_variable).is_some());

    let Resource::Ruleset(ruleset) = resource(&platform, ResourceKind::Ruleset, "Default protection") else {
        panic!("not a ruleset");
    };
    assert_eq!(ruleset.target, RulesetTarget::Branch);
    assert_eq!(ruleset.conditions.include, vec!["~ALL".to_string()]);
    assert_eq!(
        ruleset.conditions.exclude,
        vec!["refs/heads/releases".to_string(), "refs/heads/main".to_string()]
    );
    let bypass: Vec<(ActorType, ActorRef, BypassMode)> = ruleset
        .bypass_actors
        .iter()
        .map(|actor| (actor.actor_type, actor.actor_id.clone(), actor.bypass_mode))
        .collect();
    assert_eq!(
        bypass,
        vec![
            (ActorType::OrganizationAdmin, ActorRef::Id(0), BypassMode::Always),
            (ActorType::RepositoryRole, ActorRef::Id(2), BypassMode::PullRequest),
            (ActorType::RepositoryRole, ActorRef::Id(4), BypassMode::PullRequest),
            (ActorType::RepositoryRole, ActorRef::Id(5), BypassMode::PullRequest),
        ]
    );
    let negated: Vec<bool> = ruleset
        .rules
        .iter()
        .filter_map(|rule| match rule {
            Rule::CommitAuthorEmailPattern(pattern) => Some(pattern.negate),
            _ => None,
        })
        .collect();
    assert_eq!(negated, vec![true]);
    assert!(ruleset.rules.iter().any(|rule| matches!(
        rule,
        Rule::RequiredDeployments(deployments)
            if deployments.required_deployment_environments == vec!["staging".to_string(), "production".to_string()]
    )));

    // Outputs keyed the way the document names them.
    let hooks = first.state.identifiers_by_key(ResourceKind::Webhook);
    assert!(hooks["notify-on-push"].id.is_some());
    let rulesets = first.state.identifiers_by_key(ResourceKind::Ruleset);
    assert!(rulesets["default"].node_id.as_deref().is_some_and(|id| id.starts_with("RRS_")));

    assert_idempotent(&platform, &doc, &first.state).await;
}

#[tokio::test]
async fn minimum_repository_resolves_actors_by_name() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.add_actor(ActorKind::User, TEST_USER, TEST_USER_ID);
    platform.add_actor(ActorKind::Team, TEST_TEAM, TEST_TEAM_ID);
    let doc = RepositoryDocument::from_yaml_str(fixtures::MINIMUM).unwrap();

    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert!(first.report.is_success(), "failures: {:?}", first.report.failures().collect::<Vec<_>>());
    assert_eq!(first.report.to_string(), "Resources: 11 added, 0 changed, 0 destroyed.");
    assert_eq!(platform.repository().unwrap().visibility, Visibility::Public);

    let properties: Vec<(String, PropertyValue)> = platform
        .addresses()
        .into_iter()
        .filter(|address| address.kind == ResourceKind::CustomProperty)
        .filter_map(|address| match platform.resource(&address) {
            Some(Resource::CustomProperty(property)) => Some((property.name, property.value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        properties,
        vec![
            ("test-boolean".to_string(), PropertyValue::Boolean(true)),
            (
                "test-multi-select".to_string(),
                PropertyValue::MultiSelect(["Value 2".to_string(), "Value 3".to_string()].into_iter().collect())
            ),
            ("test-single-select".to_string(), PropertyValue::SingleSelect("Value 1".into())),
            ("test-string".to_string(), PropertyValue::String("Test text value".into())),
        ]
    );

    let Resource::Environment(staging) = resource(&platform, ResourceKind::Environment, "staging") else {
        panic!("not an environment");
    };
    assert_eq!(
        staging.protection_rules,
        vec![ProtectionRule::RequiredReviewers {
            reviewers: vec![Reviewer {
                reviewer_type: ReviewerType::User,
                id: ActorRef::Id(TEST_USER_ID),
            }],
            prevent_self_review: true,
        }]
    );

    let Resource::DeployKey(key) = resource(&platform, ResourceKind::DeployKey, "CI/CD Deploy Key") else {
        panic!("not a deploy key");
    };
    assert!(key.read_only);

    for (slug, permission) in [(ADMIN_TEAM, Permission::Admin), (TEST_TEAM, Permission::Push)] {
        let Resource::TeamAccess(team) = resource(&platform, ResourceKind::TeamAccess, slug) else {
            panic!("not a team");
        };
        assert_eq!(team.permission, permission);
    }
    let Resource::Collaborator(user) = resource(&platform, ResourceKind::Collaborator, TEST_USER) else {
        panic!("not a collaborator");
    };
    assert_eq!(user.permission, Permission::Admin);

    let Resource::Ruleset(Ruleset {
        bypass_actors, rules, ..
    }) = resource(&platform, ResourceKind::Ruleset, "Default protection")
    else {
        panic!("not a ruleset");
    };
    assert_eq!(
        bypass_actors,
        vec![
            BypassActor {
                actor_id: ActorRef::Id(TEST_TEAM_ID),
                actor_type: ActorType::Team,
                bypass_mode: BypassMode::Always,
            },
            BypassActor {
                actor_id: ActorRef::Id(1199797),
                actor_type: ActorType::Integration,
                bypass_mode: BypassMode::Always,
            },
        ]
    );
    let Some(Rule::MergeQueue(queue)) = rules.iter().find(|rule| matches!(rule, Rule::MergeQueue(_))) else {
        panic!("merge queue rule missing");
    };
    assert_eq!(queue.grouping_strategy, GroupingStrategy::Allgreen);
    assert_eq!(queue.merge_method, MergeMethod::Merge);
    assert_eq!(queue.max_entries_to_merge, 15);
    let Some(Rule::RequiredStatusChecks(checks)) =
        rules.iter().find(|rule| matches!(rule, Rule::RequiredStatusChecks(_)))
    else {
        panic!("status check rule missing");
    };
    assert_eq!(checks.required_status_checks[0].integration_id, Some(ActorRef::Id(1199797)));
    assert!(checks.strict_required_status_checks_policy && checks.do_not_enforce_on_create);

    assert_idempotent(&platform, &doc, &first.state).await;
}

#[tokio::test]
async fn tag_ruleset_uses_tag_refs() {
    let platform = Arc::new(MemoryPlatform::new());
    let doc = RepositoryDocument::from_yaml_str(fixtures::TAGS).unwrap();

    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert_eq!(first.report.to_string(), "Resources: 2 added, 0 changed, 0 destroyed.");

    let Resource::Ruleset(ruleset) = resource(&platform, ResourceKind::Ruleset, "Default protection") else {
        panic!("not a ruleset");
    };
    assert_eq!(ruleset.target, RulesetTarget::Tag);
    assert_eq!(ruleset.conditions.include, vec!["refs/tags/v.*".to_string()]);
    let [Rule::TagNamePattern(pattern)] = ruleset.rules.as_slice() else {
        panic!("unexpected rules {:?}", ruleset.rules);
    };
    assert_eq!(pattern.pattern, "v.*");
    assert_eq!(pattern.name.as_deref(), Some("Tag name"));
    assert!(!pattern.negate);

    assert_idempotent(&platform, &doc, &first.state).await;
}

#[tokio::test]
async fn template_options_apply_only_on_creation() {
    let platform = Arc::new(MemoryPlatform::new());
    let doc = RepositoryDocument::from_yaml_str(fixtures::TEMPLATE).unwrap();

    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert_eq!(first.report.to_string(), "Resources: 1 added, 0 changed, 0 destroyed.");
    let template = platform.creation().and_then(|creation| creation.template).unwrap();
    assert_eq!(template.owner, "cloudposse-tests");
    assert_eq!(template.name, "test-terraform-github-repository-template");
    assert!(template.include_all_branches);

    // Dropping the template later is not a change to an existing repository.
    let mut without_template = doc.clone();
    without_template.template = None;
    assert_idempotent(&platform, &without_template, &first.state).await;
}

#[tokio::test]
async fn disabled_document_makes_no_calls() {
    let platform = Arc::new(MemoryPlatform::new());
    let doc = RepositoryDocument::from_yaml_str(fixtures::DISABLED).unwrap();

    let outcome = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert_eq!(outcome.report.to_string(), "Resources: 0 added, 0 changed, 0 destroyed.");
    assert!(outcome.report.outcomes.is_empty());
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn applied_state_survives_a_round_trip_through_toml() {
    let platform = Arc::new(MemoryPlatform::new());
    let doc = RepositoryDocument::from_yaml_str(fixtures::COMPLETE).unwrap();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;

    let restored = AppliedState::from_toml(&first.state.to_toml().unwrap()).unwrap();
    assert_eq!(restored, first.state);
    assert_idempotent(&platform, &doc, &restored).await;
}
