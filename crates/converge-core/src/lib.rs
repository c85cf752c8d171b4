//! Converge Core - Core types and algorithms for GitOps reconciliation
//!
//! This crate provides the cluster-independent building blocks used
//! throughout Converge:
//! - `Environment`: deployment targets with per-environment sync policies
//! - `ResourceId` / `ResourceSpec`: resource identity and parsed manifests
//! - `DesiredState` / `LiveState`: the two sides of a reconciliation pass
//! - `diff`: the pure diff engine producing a `Delta`
//! - `Phase` / `decide`: the sync-scheduler state machine
//! - `SyncOperation`: the record of one apply attempt
//! - `Backoff`: bounded retry state for transient failures
//!
//! Nothing in this crate talks to a cluster; everything is unit-testable.

pub mod diff;
pub mod environment;
pub mod error;
pub mod labels;
pub mod resource;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod sync;

pub use diff::{Delta, OpKind, Operation, diff};
pub use environment::{Environment, EnvironmentSet, ResourceBudget, ServiceExposure, SyncPolicy, Timeouts};
pub use error::{CoreError, Result};
pub use resource::{ApplyTier, ResourceId, ResourceSpec, parse_manifest};
pub use retry::Backoff;
pub use scheduler::{Decision, DeltaCause, EnvState, Phase, decide};
pub use state::{DesiredState, LiveState, ObservedResource};
pub use sync::{SyncOperation, SyncOutcome, SyncTrigger};
