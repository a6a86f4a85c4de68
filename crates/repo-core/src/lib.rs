//! Reconciliation engine for repository configuration
//!
//! Given a desired-state document and the platform's live state, this crate
//! computes and applies the operations that converge them:
//!
//! - **Normalizer**: validates the raw document into typed descriptors
//! - **Fetcher**: reads the live state of every kind the pass manages
//! - **Differ**: classifies each resource as create, update, replace or delete
//! - **Sequencer**: orders operations into fixed dependency levels
//! - **Applier**: carries out one operation, recovering from conflicts
//! - **Reconciler**: drives a full pass and reports one outcome per resource
//!
//! # Architecture
//!
//! ```text
//!   RepositoryDocument ──normalize──> DesiredState ─┐
//!                                                   ├─diff──> Plan ──apply──> ReconcileReport
//!   Platform ──────────fetch───────> LiveState ─────┘                         + AppliedState
//! ```
//!
//! The platform client and the store that persists [`AppliedState`] between
//! passes live outside this crate.
//!
//! # Example
//!
//! ```ignore
//! use repo_core::{AppliedState, Reconciler, RepositoryDocument};
//!
//! async fn example(platform: std::sync::Arc<dyn repo_model::Platform>) -> repo_core::Result<()> {
//!     let doc = RepositoryDocument::load("repository.yaml".as_ref())?;
//!     let outcome = Reconciler::new(platform).reconcile(&doc, &AppliedState::new()).await?;
//!     println!("{}", outcome.report);
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod diff;
pub mod document;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod plan;
pub mod report;
pub mod retry;
pub mod state;

pub use apply::{Applied, Applier};
pub use diff::{Action, Diff, Operation, changed_fields};
pub use document::{DocumentFormat, ReconcileOptions, RepositoryDocument};
pub use engine::{ReconcileOutcome, Reconciler};
pub use error::{Error, Result};
pub use fetch::{ActorDirectory, Fetcher, LiveState};
pub use normalize::{DesiredState, normalize, normalize_ref, repository_role_id};
pub use plan::{LEVELS, Plan, level_of};
pub use report::{OutcomeStatus, ReconcileReport, ResourceOutcome, Summary};
pub use retry::RetryPolicy;
pub use state::{AppliedResource, AppliedState, compute_checksum};
