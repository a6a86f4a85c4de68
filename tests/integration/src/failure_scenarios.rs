//! Drift, partial failure, retries and interrupted passes.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use repo_core::{Action, AppliedState, OutcomeStatus, ReconcileOptions, ReconcileOutcome, Reconciler, RepositoryDocument};
use repo_model::{ActorKind, ApiError, Label, Platform, Resource, ResourceAddress, ResourceKind, Scope};
use repo_test_utils::fixtures::{self, TEST_TEAM, TEST_USER};
use repo_test_utils::{Call, MemoryPlatform, Method, init_tracing};
use tokio::sync::watch;

fn options() -> ReconcileOptions {
    ReconcileOptions {
        concurrency: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..ReconcileOptions::default()
    }
}

fn reconciler(platform: &Arc<MemoryPlatform>, options: ReconcileOptions) -> Reconciler {
    let client: Arc<dyn Platform> = platform.clone();
    Reconciler::new(client).with_options(options)
}

async fn reconcile(platform: &Arc<MemoryPlatform>, doc: &RepositoryDocument, state: &AppliedState) -> ReconcileOutcome {
    reconciler(platform, options()).reconcile(doc, state).await.unwrap()
}

fn complete() -> RepositoryDocument {
    RepositoryDocument::from_yaml_str(fixtures::COMPLETE).unwrap()
}

fn status_of<'a>(outcome: &'a ReconcileOutcome, address: &ResourceAddress) -> &'a OutcomeStatus {
    &outcome
        .report
        .outcome(address)
        .unwrap_or_else(|| panic!("no outcome for {}", address))
        .status
}

#[tokio::test]
async fn out_of_band_changes_are_corrected() {
    init_tracing();
    let platform = Arc::new(MemoryPlatform::new());
    let doc = complete();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;

    let label = ResourceAddress::new(ResourceKind::Label, "bug2");
    assert!(platform.modify(&label, |resource| {
        if let Resource::Label(label) = resource {
            label.color = "ffffff".into();
        }
    }));
    let variable = ResourceAddress::scoped(ResourceKind::Variable, Scope::environment("staging"), "TEST_VARIABLE");
    assert!(platform.remove(&variable).is_some());
    platform.seed(Resource::Label(Label {
        name: "stray".into(),
        color: "000000".into(),
        description: String::new(),
    }));
    platform.modify_repository(|settings| settings.description = "edited in the UI".into());
    platform.clear_calls();

    let second = reconcile(&platform, &doc, &first.state).await;
    assert_eq!(second.report.to_string(), "Resources: 1 added, 2 changed, 1 destroyed.");

    let label_outcome = second.report.outcome(&label).unwrap();
    assert_eq!(label_outcome.action, Action::Update);
    assert_eq!(label_outcome.changes, vec!["color".to_string()]);
    assert_eq!(
        second
            .report
            .outcome(&ResourceAddress::new(ResourceKind::Repository, "terraform-github-repository-test"))
            .map(|o| o.changes.clone()),
        Some(vec!["description".to_string()])
    );
    assert_eq!(second.report.outcome(&variable).map(|o| o.action), Some(Action::Create));

    // Labels are managed, so the unlisted one goes.
    let stray_address = ResourceAddress::new(ResourceKind::Label, "stray");
    assert_eq!(second.report.outcome(&stray_address).map(|o| o.action), Some(Action::Delete));
    assert!(platform.calls().contains(&Call::Delete(stray_address.clone())));

    let Some(Resource::Label(fixed)) = platform.resource(&label) else {
        panic!("label missing");
    };
    assert_eq!(fixed.color, "a73a4a");
    assert_eq!(platform.repository().unwrap().description, "Terraform acceptance tests");
}

#[tokio::test]
async fn rotated_secret_is_rewritten() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut doc = complete();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;

    doc.secrets.insert("TEST_SECRET".into(), "rotated".into());
    platform.clear_calls();
    let second = reconcile(&platform, &doc, &first.state).await;

    let secret = ResourceAddress::new(ResourceKind::Secret, "TEST_SECRET");
    assert_eq!(platform.write_calls(), vec![Call::Update(secret.clone())]);
    assert_eq!(second.report.outcome(&secret).unwrap().changes, vec!["value".to_string()]);
    assert_eq!(platform.secret_value(&secret).as_deref(), Some("rotated"));
    assert_ne!(second.state.digest(&secret), first.state.digest(&secret));
}

#[tokio::test]
async fn fatal_error_halts_its_kind_and_dependents() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.fail(
        Method::Create,
        Some(ResourceKind::Environment),
        ApiError::forbidden("resource not accessible by integration"),
        1,
    );
    let doc = complete();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert!(!first.report.is_success());

    let environments: Vec<&OutcomeStatus> = ["development", "production", "staging"]
        .iter()
        .map(|name| status_of(&first, &ResourceAddress::new(ResourceKind::Environment, *name)))
        .collect();
    let failed = environments
        .iter()
        .filter(|status| matches!(status, OutcomeStatus::Failed { error } if error.contains("403")))
        .count();
    let halted = environments
        .iter()
        .filter(|status| matches!(status, OutcomeStatus::Skipped { reason } if reason.contains("halted")))
        .count();
    assert_eq!((failed, halted), (1, 2));

    // Children and the ruleset requiring the environments never ran.
    for address in [
        ResourceAddress::scoped(ResourceKind::Variable, Scope::environment("staging"), "TEST_VARIABLE"),
        ResourceAddress::scoped(ResourceKind::Secret, Scope::environment("production"), "TEST_SECRET"),
        ResourceAddress::scoped(ResourceKind::DeploymentBranchPolicy, Scope::environment("production"), "branch:main"),
        ResourceAddress::new(ResourceKind::Ruleset, "Default protection"),
    ] {
        assert!(
            matches!(status_of(&first, &address), OutcomeStatus::Skipped { .. }),
            "{} should have been skipped",
            address
        );
        assert!(platform.resource(&address).is_none());
    }

    // Unrelated kinds went ahead.
    assert_eq!(
        status_of(&first, &ResourceAddress::new(ResourceKind::Label, "bug2")),
        &OutcomeStatus::Applied
    );
    assert!(!first.state.contains(&ResourceAddress::new(ResourceKind::Environment, "staging")));

    // The next pass picks up exactly what is missing.
    let second = reconcile(&platform, &doc, &first.state).await;
    assert!(second.report.is_success());
    assert_eq!(second.report.to_string(), "Resources: 10 added, 0 changed, 0 destroyed.");
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let platform = Arc::new(MemoryPlatform::with_repository("widgets"));
    platform.fail(Method::Create, Some(ResourceKind::Label), ApiError::rate_limited(), 2);
    let doc = RepositoryDocument::from_yaml_str(
        "owner: acme\nname: widgets\nlabels:\n  bug:\n    color: \"d73a4a\"\n",
    )
    .unwrap();

    let outcome = reconcile(&platform, &doc, &AppliedState::new()).await;
    let label = ResourceAddress::new(ResourceKind::Label, "bug");
    assert_eq!(status_of(&outcome, &label), &OutcomeStatus::Applied);
    assert_eq!(platform.write_calls(), vec![Call::Create(label.clone()); 3]);
}

#[tokio::test]
async fn retries_give_up_after_max_attempts() {
    let platform = Arc::new(MemoryPlatform::with_repository("widgets"));
    platform.fail(Method::Create, Some(ResourceKind::Label), ApiError::new(502, "bad gateway"), 10);
    let doc = RepositoryDocument::from_yaml_str(
        "owner: acme\nname: widgets\nlabels:\n  bug:\n    color: \"d73a4a\"\n",
    )
    .unwrap();
    let options = ReconcileOptions {
        max_attempts: 3,
        ..options()
    };

    let outcome = reconciler(&platform, options)
        .reconcile(&doc, &AppliedState::new())
        .await
        .unwrap();
    let label = ResourceAddress::new(ResourceKind::Label, "bug");
    assert!(matches!(status_of(&outcome, &label), OutcomeStatus::Failed { error } if error.contains("502")));
    assert_eq!(platform.write_calls().len(), 3);
}

#[tokio::test]
async fn lost_create_response_converges_without_duplicate() {
    let platform = Arc::new(MemoryPlatform::with_repository("widgets"));
    platform.fail_after_apply(Method::Create, Some(ResourceKind::Label), ApiError::timeout());
    let doc = RepositoryDocument::from_yaml_str(
        "owner: acme\nname: widgets\nlabels:\n  bug:\n    color: \"d73a4a\"\n",
    )
    .unwrap();

    let outcome = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert!(outcome.report.is_success());

    let label = ResourceAddress::new(ResourceKind::Label, "bug");
    let live = platform.get(&label).unwrap();
    assert_eq!(outcome.state.ids(&label), Some(&live.ids));
    assert_eq!(
        platform.write_calls(),
        vec![Call::Create(label.clone()), Call::Create(label)],
        "the retry found the committed entry and stopped"
    );
}

#[tokio::test]
async fn unknown_reviewer_fails_only_its_environment() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.add_actor(ActorKind::Team, TEST_TEAM, 2002);
    let doc = RepositoryDocument::from_yaml_str(fixtures::MINIMUM).unwrap();

    let outcome = reconcile(&platform, &doc, &AppliedState::new()).await;
    let staging = ResourceAddress::new(ResourceKind::Environment, "staging");
    assert!(matches!(
        status_of(&outcome, &staging),
        OutcomeStatus::Failed { error } if error.contains(TEST_USER)
    ));
    assert!(platform.resource(&staging).is_none());
    assert_eq!(
        status_of(&outcome, &ResourceAddress::new(ResourceKind::Ruleset, "Default protection")),
        &OutcomeStatus::Applied
    );
    assert_eq!(outcome.report.failures().count(), 1);
}

#[tokio::test]
async fn removed_environment_takes_its_children() {
    let platform = Arc::new(MemoryPlatform::with_repository("widgets"));
    let doc = RepositoryDocument::from_yaml_str(
        r#"
owner: acme
name: widgets
environments:
  staging: {}
  production:
    deployment_branch_policy:
      custom_branch_policies: true
      branches: ["main"]
    secrets:
      DEPLOY_TOKEN: s3cret
"#,
    )
    .unwrap();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    assert_eq!(first.report.to_string(), "Resources: 4 added, 0 changed, 0 destroyed.");

    let mut trimmed = doc.clone();
    trimmed.environments.remove("production");
    platform.clear_calls();
    let second = reconcile(&platform, &trimmed, &first.state).await;

    let production = ResourceAddress::new(ResourceKind::Environment, "production");
    assert_eq!(platform.write_calls(), vec![Call::Delete(production.clone())]);
    assert_eq!(second.report.to_string(), "Resources: 0 added, 0 changed, 1 destroyed.");
    assert!(second.state.addresses().all(|address| address.scope == Scope::Repository));

    platform.clear_calls();
    let third = reconcile(&platform, &trimmed, &second.state).await;
    assert!(third.report.changes().next().is_none());
    assert!(platform.write_calls().is_empty());
}

#[tokio::test]
async fn resource_gone_and_undeclared_is_forgotten() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut doc = complete();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;

    let feature = ResourceAddress::new(ResourceKind::Label, "feature2");
    assert!(platform.remove(&feature).is_some());
    doc.labels.remove("feature2");
    platform.clear_calls();

    let second = reconcile(&platform, &doc, &first.state).await;
    assert!(second.report.outcome(&feature).is_none());
    assert!(platform.write_calls().is_empty());
    assert!(!second.state.contains(&feature));
    assert_eq!(second.state.len(), first.state.len() - 1);
    assert_eq!(
        second
            .state
            .identifiers_by_key(ResourceKind::Label)
            .into_keys()
            .collect::<Vec<_>>(),
        vec!["bug2".to_string()]
    );

    let third = reconcile(&platform, &doc, &second.state).await;
    assert_eq!(third.state.addresses().collect::<Vec<_>>(), second.state.addresses().collect::<Vec<_>>());
}

#[tokio::test]
async fn environment_gone_and_undeclared_is_forgotten_with_children() {
    let platform = Arc::new(MemoryPlatform::with_repository("widgets"));
    let doc = RepositoryDocument::from_yaml_str(
        r#"
owner: acme
name: widgets
environments:
  staging: {}
  preview:
    variables:
      PREVIEW_URL: https://preview.example.com
"#,
    )
    .unwrap();
    let first = reconcile(&platform, &doc, &AppliedState::new()).await;
    let preview_scope = Scope::environment("preview");
    assert!(first.state.addresses().any(|address| address.scope == preview_scope));

    let preview = ResourceAddress::new(ResourceKind::Environment, "preview");
    assert!(platform.remove(&preview).is_some());
    let mut trimmed = doc.clone();
    trimmed.environments.remove("preview");
    platform.clear_calls();

    let second = reconcile(&platform, &trimmed, &first.state).await;
    assert!(platform.write_calls().is_empty());
    assert!(second.report.changes().next().is_none());
    assert!(!second.state.contains(&preview));
    assert!(second.state.addresses().all(|address| address.scope != preview_scope));
}

#[tokio::test]
async fn not_found_on_create_is_retried() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.fail(
        Method::Create,
        Some(ResourceKind::Secret),
        ApiError::not_found("environment production"),
        1,
    );

    let outcome = reconcile(&platform, &complete(), &AppliedState::new()).await;
    assert!(outcome.report.is_success(), "{:?}", outcome.report.failures().collect::<Vec<_>>());
    assert_eq!(outcome.report.to_string(), "Resources: 19 added, 0 changed, 0 destroyed.");

    let secret_creates = platform
        .write_calls()
        .iter()
        .filter(|call| call.method() == Method::Create && call.kind() == Some(ResourceKind::Secret))
        .count();
    assert_eq!(secret_creates, 5);
}

#[tokio::test]
async fn persistent_not_found_on_create_halts_nothing() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.fail(
        Method::Create,
        Some(ResourceKind::Secret),
        ApiError::not_found("environment production"),
        100,
    );

    let outcome = reconcile(&platform, &complete(), &AppliedState::new()).await;
    let secrets: Vec<&OutcomeStatus> = outcome
        .report
        .outcomes
        .iter()
        .filter(|o| o.address.kind == ResourceKind::Secret)
        .map(|o| &o.status)
        .collect();
    assert_eq!(secrets.len(), 4);
    assert!(
        secrets
            .iter()
            .all(|status| matches!(status, OutcomeStatus::Failed { error } if error.contains("404"))),
        "every secret is attempted on its own: {:?}",
        secrets
    );
    assert_eq!(outcome.report.failures().count(), 4);
}

#[tokio::test]
async fn fatal_error_halts_only_its_scope() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.fail(
        Method::Create,
        Some(ResourceKind::Secret),
        ApiError::forbidden("resource not accessible by integration"),
        1,
    );

    let outcome = reconcile(&platform, &complete(), &AppliedState::new()).await;
    let secrets: Vec<(&ResourceAddress, &OutcomeStatus)> = outcome
        .report
        .outcomes
        .iter()
        .filter(|o| o.address.kind == ResourceKind::Secret)
        .map(|o| (&o.address, &o.status))
        .collect();
    let failed: Vec<&ResourceAddress> = secrets
        .iter()
        .filter(|(_, status)| matches!(status, OutcomeStatus::Failed { .. }))
        .map(|(address, _)| *address)
        .collect();
    let halted: Vec<&ResourceAddress> = secrets
        .iter()
        .filter(|(_, status)| matches!(status, OutcomeStatus::Skipped { reason } if reason.contains("halted")))
        .map(|(address, _)| *address)
        .collect();
    let applied = secrets
        .iter()
        .filter(|(_, status)| **status == OutcomeStatus::Applied)
        .count();

    assert_eq!((failed.len(), halted.len(), applied), (1, 1, 2));
    assert_eq!(failed[0].scope, halted[0].scope);
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let platform = Arc::new(MemoryPlatform::new());
    let options = ReconcileOptions {
        dry_run: true,
        ..options()
    };

    let outcome = reconciler(&platform, options)
        .reconcile(&complete(), &AppliedState::new())
        .await
        .unwrap();
    assert_eq!(outcome.report.to_string(), "Resources: 19 added, 0 changed, 0 destroyed.");
    assert!(outcome.report.outcomes.iter().all(|o| o.status == OutcomeStatus::Planned));
    assert!(platform.write_calls().is_empty());
    assert!(outcome.state.is_empty());
}

#[tokio::test]
async fn cancelled_pass_starts_nothing() {
    let platform = Arc::new(MemoryPlatform::new());
    let (cancel, cancelled) = watch::channel(false);
    cancel.send(true).unwrap();

    let outcome = reconciler(&platform, options())
        .with_cancellation(cancelled)
        .reconcile(&complete(), &AppliedState::new())
        .await
        .unwrap();
    assert_eq!(outcome.report.outcomes.len(), 19);
    assert!(outcome.report.outcomes.iter().all(|o| o.status == OutcomeStatus::Cancelled));
    assert!(platform.write_calls().is_empty());
    assert!(platform.repository().is_none());
}
