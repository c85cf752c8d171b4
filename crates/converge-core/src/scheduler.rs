//! Sync scheduler state machine
//!
//! Each environment runs `Idle -> Diffing -> (NoOp | PendingApproval |
//! Applying) -> Idle`. Policy dispatch happens once per reconciliation pass
//! over a tagged delta cause, not through inheritance: the three policy
//! kinds differ only in which causes reach `Applying` on their own.
//!
//! Concurrency rule: at most one `Applying` per environment. A pass that
//! arrives while an apply is in flight sets a queued flag and is re-diffed
//! after completion; it never interrupts the apply.

use serde::{Deserialize, Serialize};

use crate::environment::SyncPolicy;

/// Why a delta exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaCause {
    /// The desired-state revision changed since the last synced revision
    NewRevision,
    /// Live state diverged while the revision stayed the same
    Drift,
}

impl std::fmt::Display for DeltaCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeltaCause::NewRevision => write!(f, "new revision"),
            DeltaCause::Drift => write!(f, "drift"),
        }
    }
}

/// What the scheduler decided for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Empty delta; nothing to do
    NoOp,
    /// Apply the delta now
    Apply,
    /// Report the delta and wait for an explicit trigger
    Hold,
}

/// Decide whether a delta gets applied, per policy
///
/// An explicit operator trigger overrides every policy: trigger-sync is the
/// only path to `Applying` for manual environments, and also forces held
/// drift through for `Auto` environments.
pub fn decide(
    policy: SyncPolicy,
    cause: DeltaCause,
    delta_empty: bool,
    explicit_trigger: bool,
) -> Decision {
    if delta_empty {
        return Decision::NoOp;
    }
    if explicit_trigger {
        return Decision::Apply;
    }
    match (policy, cause) {
        (SyncPolicy::AutoSelfHeal, _) => Decision::Apply,
        (SyncPolicy::Auto, DeltaCause::NewRevision) => Decision::Apply,
        (SyncPolicy::Auto, DeltaCause::Drift) => Decision::Hold,
        (SyncPolicy::Manual, _) => Decision::Hold,
    }
}

/// Reconciliation phase of one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "phase")]
pub enum Phase {
    Idle,
    Diffing,
    /// A delta is waiting for an explicit trigger
    PendingApproval { cause: DeltaCause, revision: String },
    /// An apply is in flight
    Applying { revision: String },
}

impl Phase {
    pub fn is_applying(&self) -> bool {
        matches!(self, Phase::Applying { .. })
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Diffing => write!(f, "diffing"),
            Phase::PendingApproval { cause, .. } => write!(f, "pending approval ({})", cause),
            Phase::Applying { revision } => write!(f, "applying {}", revision),
        }
    }
}

/// Per-environment scheduler state
///
/// Serializes passes: `begin_pass` fails while an apply is in flight and
/// records that a re-diff is owed once it finishes.
#[derive(Debug, Clone, Default)]
pub struct EnvState {
    phase: Option<Phase>,
    queued: bool,
}

impl EnvState {
    pub fn new() -> Self {
        Self {
            phase: Some(Phase::Idle),
            queued: false,
        }
    }

    pub fn phase(&self) -> &Phase {
        self.phase.as_ref().unwrap_or(&Phase::Idle)
    }

    /// Try to start a reconciliation pass
    ///
    /// Returns false (and queues the pass) if an apply is in flight.
    pub fn begin_pass(&mut self) -> bool {
        if self.phase().is_applying() {
            self.queued = true;
            return false;
        }
        self.phase = Some(Phase::Diffing);
        true
    }

    /// Record the scheduler decision for the current pass
    pub fn record(&mut self, decision: Decision, cause: DeltaCause, revision: &str) {
        self.phase = Some(match decision {
            Decision::NoOp => Phase::Idle,
            Decision::Hold => Phase::PendingApproval {
                cause,
                revision: revision.to_string(),
            },
            Decision::Apply => Phase::Applying {
                revision: revision.to_string(),
            },
        });
    }

    /// Finish the current pass and return to idle
    pub fn finish_pass(&mut self) {
        self.phase = Some(Phase::Idle);
    }

    /// Take the queued flag, if a pass arrived mid-apply
    pub fn take_queued(&mut self) -> bool {
        std::mem::take(&mut self.queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_heal_applies_everything() {
        for cause in [DeltaCause::NewRevision, DeltaCause::Drift] {
            assert_eq!(
                decide(SyncPolicy::AutoSelfHeal, cause, false, false),
                Decision::Apply
            );
        }
    }

    #[test]
    fn test_auto_holds_drift_but_applies_revisions() {
        assert_eq!(
            decide(SyncPolicy::Auto, DeltaCause::NewRevision, false, false),
            Decision::Apply
        );
        assert_eq!(
            decide(SyncPolicy::Auto, DeltaCause::Drift, false, false),
            Decision::Hold
        );
    }

    #[test]
    fn test_manual_never_applies_without_trigger() {
        for cause in [DeltaCause::NewRevision, DeltaCause::Drift] {
            assert_eq!(
                decide(SyncPolicy::Manual, cause, false, false),
                Decision::Hold
            );
            assert_eq!(
                decide(SyncPolicy::Manual, cause, false, true),
                Decision::Apply
            );
        }
    }

    #[test]
    fn test_empty_delta_is_noop_even_when_triggered() {
        assert_eq!(
            decide(SyncPolicy::Manual, DeltaCause::NewRevision, true, true),
            Decision::NoOp
        );
    }

    #[test]
    fn test_trigger_forces_held_drift_through() {
        assert_eq!(
            decide(SyncPolicy::Auto, DeltaCause::Drift, false, true),
            Decision::Apply
        );
    }

    #[test]
    fn test_env_state_serializes_passes() {
        let mut state = EnvState::new();
        assert!(state.begin_pass());
        state.record(Decision::Apply, DeltaCause::NewRevision, "rev2");
        assert!(state.phase().is_applying());

        // A pass arriving mid-apply is queued, not started
        assert!(!state.begin_pass());
        assert!(state.phase().is_applying());

        state.finish_pass();
        assert_eq!(state.phase(), &Phase::Idle);
        assert!(state.take_queued());
        assert!(!state.take_queued());
    }

    #[test]
    fn test_env_state_pending_approval() {
        let mut state = EnvState::new();
        assert!(state.begin_pass());
        state.record(Decision::Hold, DeltaCause::Drift, "rev2");
        match state.phase() {
            Phase::PendingApproval { cause, revision } => {
                assert_eq!(*cause, DeltaCause::Drift);
                assert_eq!(revision, "rev2");
            }
            other => panic!("unexpected phase: {}", other),
        }

        // Pending approval does not block the next pass
        assert!(state.begin_pass());
    }
}
