//! Converge Kube - cluster integration for the Converge reconciler
//!
//! Everything that talks to a Kubernetes API server lives here:
//! - `observer`: read-only live-state snapshots, ownership-filtered
//! - `apply`: tiered delta application with optimistic concurrency
//! - `health`: per-kind readiness evaluation and crash-loop detection
//! - `controller`: the per-environment reconciliation loop and its command
//!   surface
//! - `notify`: lifecycle event sinks
//!
//! The reconciliation core (diff, scheduler, policies) is deliberately free
//! of cluster types and lives in `converge-core`; this crate feeds it
//! snapshots and executes its decisions.

pub mod apply;
pub mod controller;
mod dynamic;
pub mod error;
pub mod health;
pub mod notify;
pub mod observer;

pub use apply::{Applier, ApplyReport, plan};
pub use controller::{
    ControllerConfig, ControllerHandle, EnvStatus, EnvironmentController, PassReport,
};
pub use error::{KubeError, Result};
pub use health::{EnvironmentHealth, HealthEvaluator, HealthState, ResourceHealth, rollup};
pub use notify::{ChannelSink, Notification, NotificationSink, TracingSink};
pub use observer::LiveStateObserver;
