//! Sync operation records
//!
//! One `SyncOperation` is created when an apply begins and finalized exactly
//! once when the applier completes, fails, or is aborted. Every operation
//! reaches a terminal outcome with a human-readable cause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::SyncPolicy;
use crate::resource::ResourceId;

/// What started a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTrigger {
    /// Scheduler decided automatically (new revision under an auto policy)
    Automatic,
    /// Drift corrected by an auto-self-heal policy
    SelfHeal,
    /// Explicit trigger-sync command
    Manual,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTrigger::Automatic => write!(f, "automatic"),
            SyncTrigger::SelfHeal => write!(f, "self-heal"),
            SyncTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Terminal outcome of a sync operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum SyncOutcome {
    /// Every operation in the delta applied
    Succeeded,
    /// Nothing usable happened (source, cluster, or first apply failed)
    Failed { cause: String },
    /// Some operations applied before a fatal rejection aborted the rest
    Partial {
        applied: Vec<ResourceId>,
        failed: Vec<(ResourceId, String)>,
    },
    /// Operator abort; already-applied operations are left in place
    Aborted { applied: Vec<ResourceId> },
}

impl SyncOutcome {
    /// Human-readable cause for reporting
    pub fn cause(&self) -> String {
        match self {
            SyncOutcome::Succeeded => "all operations applied".to_string(),
            SyncOutcome::Failed { cause } => cause.clone(),
            SyncOutcome::Partial { applied, failed } => format!(
                "{} applied, {} failed ({})",
                applied.len(),
                failed.len(),
                failed
                    .iter()
                    .map(|(id, msg)| format!("{}: {}", id, msg))
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            SyncOutcome::Aborted { applied } => {
                format!("aborted after {} operations", applied.len())
            }
        }
    }
}

/// One attempt to apply a delta
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Target environment
    pub environment: String,

    /// Triggering revision
    pub revision: String,

    /// Policy in effect when the sync was decided
    pub policy: SyncPolicy,

    /// What started it
    pub trigger: SyncTrigger,

    /// Terminal outcome, set exactly once
    pub outcome: Option<SyncOutcome>,

    /// When the apply began
    pub started_at: DateTime<Utc>,

    /// When the apply finished
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Start a new sync record
    pub fn begin(
        environment: impl Into<String>,
        revision: impl Into<String>,
        policy: SyncPolicy,
        trigger: SyncTrigger,
    ) -> Self {
        Self {
            environment: environment.into(),
            revision: revision.into(),
            policy,
            trigger,
            outcome: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Finalize with a terminal outcome
    pub fn finish(&mut self, outcome: SyncOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(SyncOutcome::Succeeded))
    }
}
