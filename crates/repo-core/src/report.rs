//! Per-pass reconciliation report.

use std::fmt;

use chrono::{DateTime, Utc};
use repo_model::{Identifiers, RepoRef, ResourceAddress};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::Action;

/// How one resource fared in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The operation was carried out.
    Applied,
    /// Desired and live already matched.
    Unchanged,
    /// Dry run: the operation would have been carried out.
    Planned,
    Failed { error: String },
    /// Not attempted because a dependency failed or its kind was halted.
    Skipped { reason: String },
    /// Not started because the pass was cancelled.
    Cancelled,
}

/// One resource's line in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub address: ResourceAddress,
    /// Document key, when the entry was declared under one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub action: Action,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    #[serde(default)]
    pub identifiers: Identifiers,
}

impl ResourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Applied | OutcomeStatus::Unchanged | OutcomeStatus::Planned
        )
    }

    /// The outcome counts towards the summary: it changed (or would change) something.
    fn took_effect(&self) -> bool {
        matches!(self.status, OutcomeStatus::Applied | OutcomeStatus::Planned)
    }
}

/// Terraform-style change counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resources: {} added, {} changed, {} destroyed.",
            self.added, self.changed, self.destroyed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub pass_id: Uuid,
    pub repository: RepoRef,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ResourceOutcome>,
}

impl ReconcileReport {
    pub fn new(repository: RepoRef) -> Self {
        let now = Utc::now();
        Self {
            pass_id: Uuid::new_v4(),
            repository,
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ResourceOutcome) {
        self.outcomes.push(outcome);
    }

    /// Stamp the finish time and order outcomes by address.
    pub fn finish(&mut self) {
        self.outcomes.sort_by(|a, b| a.address.cmp(&b.address));
        self.finished_at = Utc::now();
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for outcome in self.outcomes.iter().filter(|o| o.took_effect()) {
            match outcome.action {
                Action::Create => summary.added += 1,
                Action::Update => summary.changed += 1,
                Action::Delete => summary.destroyed += 1,
                Action::Replace => {
                    summary.added += 1;
                    summary.destroyed += 1;
                }
                Action::NoOp => {}
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ResourceOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn outcome(&self, address: &ResourceAddress) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.address == *address)
    }

    /// Outcomes whose operation changed (or would change) something.
    pub fn changes(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.took_effect() && o.action != Action::NoOp)
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.summary(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_model::ResourceKind;

    fn outcome(key: &str, action: Action, status: OutcomeStatus) -> ResourceOutcome {
        ResourceOutcome {
            address: ResourceAddress::new(ResourceKind::Label, key),
            alias: None,
            action,
            status,
            changes: Vec::new(),
            identifiers: Identifiers::default(),
        }
    }

    #[test]
    fn empty_report_summary() {
        let report = ReconcileReport::new(RepoRef::new("acme", "widgets"));
        assert_eq!(report.to_string(), "Resources: 0 added, 0 changed, 0 destroyed.");
        assert!(report.is_success());
    }

    #[test]
    fn summary_counts_only_effective_outcomes() {
        let mut report = ReconcileReport::new(RepoRef::new("acme", "widgets"));
        report.push(outcome("a", Action::Create, OutcomeStatus::Applied));
        report.push(outcome("b", Action::Replace, OutcomeStatus::Applied));
        report.push(outcome("c", Action::Update, OutcomeStatus::Failed { error: "boom".into() }));
        report.push(outcome("d", Action::Delete, OutcomeStatus::Planned));
        report.push(outcome("e", Action::NoOp, OutcomeStatus::Unchanged));

        assert_eq!(
            report.summary(),
            Summary {
                added: 2,
                changed: 0,
                destroyed: 2
            }
        );
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.changes().count(), 3);
    }

    #[test]
    fn outcome_serializes_status_inline() {
        let json = serde_json::to_value(outcome("bug", Action::Update, OutcomeStatus::Skipped {
            reason: "dependency failed".into(),
        }))
        .unwrap();
        assert_eq!(json["address"], "label.bug");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "dependency failed");
    }
}
