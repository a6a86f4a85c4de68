//! The reconciliation driver.
//!
//! One pass: normalize the document, read live state, diff, sequence, then
//! apply level by level. Operations inside a level run concurrently up to
//! the configured limit; a level starts only after every operation of the
//! previous one has settled. Failures stay local: an operation is skipped
//! when something it depends on did not complete, and a fatal platform
//! error halts the rest of its kind within the same scope for this pass.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use repo_model::{ErrorClass, Identifiers, Platform, ResourceAddress, ResourceKind, Scope};
use tokio::sync::{Semaphore, watch};
use tokio::task::{Id, JoinSet};

use crate::apply::{Applied, Applier};
use crate::diff::{Action, Operation, diff};
use crate::document::{ReconcileOptions, RepositoryDocument};
use crate::fetch::Fetcher;
use crate::normalize::{DesiredState, normalize};
use crate::plan::Plan;
use crate::report::{OutcomeStatus, ReconcileReport, ResourceOutcome};
use crate::retry::RetryPolicy;
use crate::state::{AppliedState, compute_checksum};
use crate::{Error, Result};

/// Result of one pass: what happened, and the applied state to persist.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub report: ReconcileReport,
    pub state: AppliedState,
}

/// Everything computed before the first write.
struct Prepared {
    desired: DesiredState,
    unchanged: Vec<(ResourceAddress, Identifiers)>,
    vanished: Vec<ResourceAddress>,
    plan: Plan,
}

type Halted = Mutex<BTreeSet<(ResourceKind, Scope)>>;

enum TaskResult {
    Done(Result<Applied>),
    Halted,
}

pub struct Reconciler {
    platform: Arc<dyn Platform>,
    options: Option<ReconcileOptions>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            options: None,
            cancel: None,
        }
    }

    /// Use these options instead of the document's `[reconcile]` table.
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Stop starting new levels once `cancel` reads `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn options_for(&self, doc: &RepositoryDocument) -> ReconcileOptions {
        self.options.clone().unwrap_or_else(|| doc.reconcile.clone())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Compute the sequenced plan without applying anything.
    pub async fn plan(&self, doc: &RepositoryDocument, applied: &AppliedState) -> Result<Plan> {
        let options = self.options_for(doc);
        Ok(self.prepare(doc, applied, &RetryPolicy::from(&options)).await?.plan)
    }

    async fn prepare(&self, doc: &RepositoryDocument, applied: &AppliedState, retry: &RetryPolicy) -> Result<Prepared> {
        let desired = normalize(doc)?;
        if !desired.enabled {
            return Ok(Prepared {
                desired,
                unchanged: Vec::new(),
                vanished: Vec::new(),
                plan: Plan::default(),
            });
        }

        let live = Fetcher::new(self.platform.as_ref(), &desired.repo, retry)
            .fetch(&desired, applied)
            .await?;
        let diff = diff(&desired, &live, applied)?;
        let plan = Plan::build(diff.operations)?;
        Ok(Prepared {
            desired,
            unchanged: diff.unchanged,
            vanished: diff.vanished,
            plan,
        })
    }

    /// Run one reconciliation pass.
    ///
    /// Validation, fetch and sequencing errors abort the pass before any
    /// write. Errors from individual operations are reported per resource.
    pub async fn reconcile(&self, doc: &RepositoryDocument, applied: &AppliedState) -> Result<ReconcileOutcome> {
        let options = self.options_for(doc);
        let retry = RetryPolicy::from(&options);
        let prepared = self.prepare(doc, applied, &retry).await?;
        let desired = &prepared.desired;

        let mut report = ReconcileReport::new(desired.repo.clone());
        let mut state = applied.clone();
        tracing::info!(pass_id = %report.pass_id, repo = %desired.repo, "starting reconciliation");

        if !desired.enabled {
            tracing::info!(repo = %desired.repo, "repository disabled, nothing to reconcile");
            report.finish();
            return Ok(ReconcileOutcome { report, state });
        }

        let alias_of = |address: &ResourceAddress| -> Option<String> {
            desired
                .alias(address)
                .or_else(|| applied.get(address).and_then(|entry| entry.alias.as_deref()))
                .map(String::from)
        };

        for (address, ids) in &prepared.unchanged {
            state.record(address.clone(), ids.clone(), None, alias_of(address));
            report.push(ResourceOutcome {
                address: address.clone(),
                alias: alias_of(address),
                action: Action::NoOp,
                status: OutcomeStatus::Unchanged,
                changes: Vec::new(),
                identifiers: ids.clone(),
            });
        }

        let outcome_for = |op: &Operation, status: OutcomeStatus| ResourceOutcome {
            address: op.address.clone(),
            alias: alias_of(&op.address),
            action: op.action,
            status,
            changes: op.changes.clone(),
            identifiers: op.ids.clone(),
        };

        if options.dry_run {
            for op in prepared.plan.operations() {
                report.push(outcome_for(op, OutcomeStatus::Planned));
            }
            report.finish();
            tracing::info!(summary = %report.summary(), "dry run complete");
            return Ok(ReconcileOutcome { report, state });
        }

        for address in &prepared.vanished {
            tracing::info!(address = %address, "gone from the platform and no longer declared, forgetting");
            state.forget(address);
        }

        let applier = Arc::new(Applier::new(
            Arc::clone(&self.platform),
            desired.repo.clone(),
            retry,
            desired.creation.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let halted: Arc<Halted> = Arc::default();
        let mut blocked: BTreeSet<ResourceAddress> = BTreeSet::new();
        let mut cancelled = false;

        for (level, ops) in prepared.plan.into_levels().into_iter().enumerate() {
            if !cancelled && !ops.is_empty() && self.is_cancelled() {
                tracing::warn!(level, "reconciliation cancelled");
                cancelled = true;
            }
            if cancelled {
                for op in &ops {
                    report.push(outcome_for(op, OutcomeStatus::Cancelled));
                }
                continue;
            }

            let mut tasks = JoinSet::new();
            let mut running: HashMap<Id, Operation> = HashMap::new();
            for op in ops {
                if let Some(dependency) = op.depends_on.iter().find(|dep| blocked.contains(*dep)) {
                    tracing::warn!(address = %op.address, dependency = %dependency, "skipping");
                    let reason = format!("dependency {} did not complete", dependency);
                    blocked.insert(op.address.clone());
                    report.push(outcome_for(&op, OutcomeStatus::Skipped { reason }));
                    continue;
                }

                let applier = Arc::clone(&applier);
                let semaphore = Arc::clone(&semaphore);
                let halted = Arc::clone(&halted);
                let pending = op.clone();
                let handle = tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    if is_halted(&halted, &op.address) {
                        return (op, TaskResult::Halted);
                    }
                    let result = applier.apply(&op).await;
                    if let Err(e) = &result
                        && halts(op.action, e)
                        && let Ok(mut halted) = halted.lock()
                    {
                        halted.insert((op.kind(), op.address.scope.clone()));
                    }
                    (op, TaskResult::Done(result))
                });
                running.insert(handle.id(), pending);
            }

            while let Some(joined) = tasks.join_next_with_id().await {
                let (op, result) = match joined {
                    Ok((id, finished)) => {
                        running.remove(&id);
                        finished
                    }
                    Err(e) => {
                        let Some(op) = running.remove(&e.id()) else {
                            continue;
                        };
                        (op, TaskResult::Done(Err(Error::Join(e))))
                    }
                };
                match result {
                    TaskResult::Done(Ok(applied_op)) => {
                        if op.action == Action::Delete {
                            state.forget(&op.address);
                            if op.address.kind == ResourceKind::Environment {
                                state.forget_environment_children(&op.address.key);
                            }
                        } else {
                            let digest = op
                                .desired
                                .as_ref()
                                .and_then(|resource| resource.write_only_value())
                                .map(compute_checksum);
                            state.record(op.address.clone(), applied_op.ids.clone(), digest, alias_of(&op.address));
                        }
                        let status = if applied_op.action == Action::NoOp {
                            OutcomeStatus::Unchanged
                        } else {
                            OutcomeStatus::Applied
                        };
                        report.push(ResourceOutcome {
                            action: applied_op.action,
                            identifiers: applied_op.ids,
                            ..outcome_for(&op, status)
                        });
                    }
                    TaskResult::Done(Err(e)) => {
                        tracing::error!(address = %op.address, error = %e, "operation failed");
                        blocked.insert(op.address.clone());
                        report.push(outcome_for(&op, OutcomeStatus::Failed { error: e.to_string() }));
                    }
                    TaskResult::Halted => {
                        let reason = match &op.address.scope {
                            Scope::Repository => format!("{} operations halted after a fatal error", op.kind()),
                            scope => format!("{} operations in {} halted after a fatal error", op.kind(), scope),
                        };
                        blocked.insert(op.address.clone());
                        report.push(outcome_for(&op, OutcomeStatus::Skipped { reason }));
                    }
                }
            }
        }

        report.finish();
        tracing::info!(
            pass_id = %report.pass_id,
            summary = %report.summary(),
            failures = report.failures().count(),
            "reconciliation finished"
        );
        Ok(ReconcileOutcome { report, state })
    }
}

fn is_halted(halted: &Halted, address: &ResourceAddress) -> bool {
    halted
        .lock()
        .map(|halted| halted.contains(&(address.kind, address.scope.clone())))
        .unwrap_or(false)
}

/// Whether a failure should stop further operations of the same kind and
/// scope. A missing update target is fatal; a create that keeps seeing 404
/// only fails itself.
fn halts(action: Action, error: &Error) -> bool {
    match error {
        Error::Api { source, .. } => match source.class() {
            ErrorClass::Fatal => true,
            ErrorClass::NotFound => action == Action::Update,
            _ => false,
        },
        _ => false,
    }
}
