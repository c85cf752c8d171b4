//! Notification sinks for sync and health events
//!
//! The controller publishes lifecycle events through `NotificationSink` so
//! operators can watch reconciliation without polling. Health transitions are
//! only published from fresh evaluations; a stale Healthy is never replayed.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use converge_core::{DeltaCause, SyncOperation, SyncOutcome};

use crate::health::{EnvironmentHealth, HealthState};

/// One published event
#[derive(Debug, Clone)]
pub enum Notification {
    /// A sync reached a terminal outcome
    SyncFinished {
        environment: String,
        revision: String,
        outcome: SyncOutcome,
    },
    /// The environment health state changed
    HealthChanged {
        environment: String,
        from: Option<HealthState>,
        to: HealthState,
    },
    /// A delta is held waiting for an explicit trigger
    ApprovalPending {
        environment: String,
        cause: DeltaCause,
        summary: String,
    },
}

/// Receives reconciliation lifecycle events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// A sync operation reached its terminal outcome
    async fn sync_finished(&self, operation: &SyncOperation);

    /// The environment's health state changed
    async fn health_changed(
        &self,
        environment: &str,
        from: Option<HealthState>,
        health: &EnvironmentHealth,
    );

    /// A delta is waiting for operator approval
    async fn approval_pending(&self, environment: &str, cause: DeltaCause, summary: &str);
}

/// Sink that writes events to the tracing pipeline
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn sync_finished(&self, operation: &SyncOperation) {
        let outcome = operation
            .outcome
            .as_ref()
            .map(|o| o.cause())
            .unwrap_or_else(|| "unfinished".to_string());
        if operation.succeeded() {
            info!(
                environment = %operation.environment,
                revision = %operation.revision,
                trigger = %operation.trigger,
                "sync succeeded"
            );
        } else {
            warn!(
                environment = %operation.environment,
                revision = %operation.revision,
                trigger = %operation.trigger,
                outcome = %outcome,
                "sync did not succeed"
            );
        }
    }

    async fn health_changed(
        &self,
        environment: &str,
        from: Option<HealthState>,
        health: &EnvironmentHealth,
    ) {
        match health.state {
            HealthState::Healthy => {
                info!(environment, from = ?from, "environment healthy");
            }
            state => {
                warn!(environment, from = ?from, to = %state, detail = %health.summary(), "environment not healthy");
            }
        }
    }

    async fn approval_pending(&self, environment: &str, cause: DeltaCause, summary: &str) {
        info!(environment, cause = %cause, summary, "delta held pending approval");
    }
}

/// Sink that forwards events over a channel, for tests and embedding
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn sync_finished(&self, operation: &SyncOperation) {
        let _ = self.tx.send(Notification::SyncFinished {
            environment: operation.environment.clone(),
            revision: operation.revision.clone(),
            outcome: operation
                .outcome
                .clone()
                .unwrap_or(SyncOutcome::Failed {
                    cause: "unfinished".to_string(),
                }),
        });
    }

    async fn health_changed(
        &self,
        environment: &str,
        from: Option<HealthState>,
        health: &EnvironmentHealth,
    ) {
        let _ = self.tx.send(Notification::HealthChanged {
            environment: environment.to_string(),
            from,
            to: health.state,
        });
    }

    async fn approval_pending(&self, environment: &str, cause: DeltaCause, summary: &str) {
        let _ = self.tx.send(Notification::ApprovalPending {
            environment: environment.to_string(),
            cause,
            summary: summary.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{SyncPolicy, SyncTrigger};

    #[tokio::test]
    async fn test_channel_sink_forwards_sync_events() {
        let (sink, mut rx) = ChannelSink::new();

        let mut op = SyncOperation::begin(
            "staging",
            "abc123",
            SyncPolicy::Auto,
            SyncTrigger::Automatic,
        );
        op.finish(SyncOutcome::Succeeded);
        sink.sync_finished(&op).await;

        match rx.recv().await.unwrap() {
            Notification::SyncFinished {
                environment,
                revision,
                outcome,
            } => {
                assert_eq!(environment, "staging");
                assert_eq!(revision, "abc123");
                assert_eq!(outcome, SyncOutcome::Succeeded);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_health_transitions() {
        let (sink, mut rx) = ChannelSink::new();

        let health = EnvironmentHealth {
            environment: "production".to_string(),
            state: HealthState::Degraded,
            resources: vec![],
            checked_at: chrono::Utc::now(),
        };
        sink.health_changed("production", Some(HealthState::Healthy), &health)
            .await;

        match rx.recv().await.unwrap() {
            Notification::HealthChanged { from, to, .. } => {
                assert_eq!(from, Some(HealthState::Healthy));
                assert_eq!(to, HealthState::Degraded);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_approval_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.approval_pending("production", DeltaCause::Drift, "1 to update")
            .await;

        match rx.recv().await.unwrap() {
            Notification::ApprovalPending { cause, summary, .. } => {
                assert_eq!(cause, DeltaCause::Drift);
                assert_eq!(summary, "1 to update");
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }
}
