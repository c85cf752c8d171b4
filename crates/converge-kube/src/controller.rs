//! Per-environment reconciliation controller
//!
//! One controller task owns one environment and runs the full loop on every
//! pass: fetch desired state, snapshot live state, diff, decide per policy,
//! apply, evaluate health. Passes are serialized through `EnvState`; a pass
//! arriving mid-apply is queued and re-diffed afterwards, never merged.
//!
//! Commands reach the controller over a channel. Abort is a watch flag the
//! applier checks between tiers, so it takes effect mid-sync without the
//! command loop being free. Status is published the same way: the controller
//! pushes snapshots into a watch channel as a pass progresses, and handles
//! read the latest value without waiting on the command loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use converge_core::{
    Decision, DeltaCause, EnvState, Environment, Phase, SyncOperation, SyncTrigger, decide, diff,
};
use converge_source::Source;

use crate::apply::Applier;
use crate::error::{KubeError, Result};
use crate::health::{EnvironmentHealth, HealthEvaluator};
use crate::notify::NotificationSink;
use crate::observer::LiveStateObserver;

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Revision to track (branch or tag resolved on every pass)
    pub track: String,

    /// Interval between automatic reconciliation passes
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            track: "main".to_string(),
            poll_interval: Duration::from_secs(180),
        }
    }
}

/// What one reconciliation pass concluded
#[derive(Debug, Clone)]
pub enum PassReport {
    /// An apply was in flight; the pass was queued for a re-diff
    Queued,
    /// The delta was empty
    NoOp { revision: String },
    /// The delta is held waiting for an explicit trigger
    Held {
        cause: DeltaCause,
        summary: String,
        revision: String,
    },
    /// A sync ran to a terminal outcome
    Synced {
        operation: SyncOperation,
        health: Option<EnvironmentHealth>,
    },
}

/// Point-in-time controller status
#[derive(Debug, Clone)]
pub struct EnvStatus {
    pub environment: String,
    pub phase: Phase,
    pub last_synced_revision: Option<String>,
    pub last_sync: Option<SyncOperation>,
    pub health: Option<EnvironmentHealth>,
}

enum Command {
    TriggerSync {
        revision: Option<String>,
        reply: oneshot::Sender<Result<PassReport>>,
    },
}

/// Client half of a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    environment: String,
    commands: mpsc::Sender<Command>,
    abort: Arc<watch::Sender<bool>>,
    status: watch::Receiver<EnvStatus>,
}

impl ControllerHandle {
    /// Trigger a sync, optionally at a specific revision
    ///
    /// Waits for the pass to reach a terminal report.
    pub async fn trigger_sync(&self, revision: Option<String>) -> Result<PassReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::TriggerSync { revision, reply })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Raise the abort flag for an in-flight sync
    ///
    /// Takes effect between apply tiers; already-applied operations are left
    /// in place.
    pub fn abort_sync(&self) {
        self.abort.send_replace(true);
    }

    /// Read the controller's current status
    ///
    /// Status rides a watch channel, so it answers while a pass (including a
    /// long health wait) is in flight.
    pub fn status(&self) -> EnvStatus {
        self.status.borrow().clone()
    }

    fn gone(&self) -> KubeError {
        KubeError::ClusterUnreachable {
            message: format!("controller for '{}' has stopped", self.environment),
        }
    }
}

/// Reconciliation controller for one environment
pub struct EnvironmentController<S: Source> {
    env: Environment,
    source: S,
    observer: LiveStateObserver,
    applier: Applier,
    evaluator: HealthEvaluator,
    sinks: Vec<Arc<dyn NotificationSink>>,
    config: ControllerConfig,

    state: EnvState,
    last_synced_revision: Option<String>,
    last_sync: Option<SyncOperation>,
    health: Option<EnvironmentHealth>,

    commands: mpsc::Receiver<Command>,
    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<EnvStatus>,
}

impl<S: Source + 'static> EnvironmentController<S> {
    /// Build a controller and its handle
    pub fn new(
        env: Environment,
        source: S,
        observer: LiveStateObserver,
        applier: Applier,
        evaluator: HealthEvaluator,
        sinks: Vec<Arc<dyn NotificationSink>>,
        config: ControllerConfig,
    ) -> (Self, ControllerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (abort_tx, abort_rx) = watch::channel(false);
        let abort_tx = Arc::new(abort_tx);
        let (status_tx, status_rx) = watch::channel(EnvStatus {
            environment: env.name.clone(),
            phase: Phase::Idle,
            last_synced_revision: None,
            last_sync: None,
            health: None,
        });

        let handle = ControllerHandle {
            environment: env.name.clone(),
            commands: cmd_tx,
            abort: abort_tx.clone(),
            status: status_rx,
        };

        let controller = Self {
            env,
            source,
            observer,
            applier,
            evaluator,
            sinks,
            config,
            state: EnvState::new(),
            last_synced_revision: None,
            last_sync: None,
            health: None,
            commands: cmd_rx,
            abort_tx,
            abort_rx,
            status_tx,
        };

        (controller, handle)
    }

    /// Spawn the controller loop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the controller loop until every handle is dropped
    pub async fn run(mut self) {
        info!(
            environment = %self.env.name,
            policy = %self.env.policy,
            interval = ?self.config.poll_interval,
            "controller started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile(None).await {
                        // One failed pass never stops the loop; the next tick
                        // retries from scratch.
                        error!(environment = %self.env.name, error = %e, "reconciliation pass failed");
                    }
                    self.drain_queue().await;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::TriggerSync { revision, reply }) => {
                        let report = self.reconcile(Some(revision)).await;
                        let _ = reply.send(report);
                        self.drain_queue().await;
                    }
                    None => break,
                }
            }
        }

        info!(environment = %self.env.name, "controller stopped");
    }

    /// Push the current status to every handle
    fn publish_status(&self) {
        self.status_tx.send_replace(EnvStatus {
            environment: self.env.name.clone(),
            phase: self.state.phase().clone(),
            last_synced_revision: self.last_synced_revision.clone(),
            last_sync: self.last_sync.clone(),
            health: self.health.clone(),
        });
    }

    async fn drain_queue(&mut self) {
        while self.state.take_queued() {
            if let Err(e) = self.reconcile(None).await {
                error!(environment = %self.env.name, error = %e, "queued pass failed");
            }
        }
    }

    /// One reconciliation pass
    ///
    /// `trigger` is `Some` for explicit trigger-sync commands, carrying an
    /// optional revision override.
    pub async fn reconcile(&mut self, trigger: Option<Option<String>>) -> Result<PassReport> {
        if !self.state.begin_pass() {
            return Ok(PassReport::Queued);
        }
        // Fresh pass, fresh abort flag
        self.abort_tx.send_replace(false);
        self.publish_status();

        let explicit = trigger.is_some();
        let requested = trigger
            .flatten()
            .unwrap_or_else(|| self.config.track.clone());

        let result = self.reconcile_inner(&requested, explicit).await;
        if result.is_err() {
            self.state.finish_pass();
        }
        self.publish_status();
        result
    }

    async fn reconcile_inner(&mut self, requested: &str, explicit: bool) -> Result<PassReport> {
        let desired = self
            .source
            .fetch(
                requested,
                self.env.manifest_path(),
                &self.env.name,
                &self.env.namespace,
            )
            .await?;
        let revision = desired.revision.clone();

        let live = self.observer.snapshot(&self.env, &desired).await?;
        let delta = diff(&desired, &live, self.env.prune)?;

        let cause = if self.last_synced_revision.as_deref() == Some(revision.as_str()) {
            DeltaCause::Drift
        } else {
            DeltaCause::NewRevision
        };
        let decision = decide(self.env.policy, cause, delta.is_empty(), explicit);
        self.state.record(decision, cause, &revision);
        // Mid-pass phases (Applying, PendingApproval) are visible to handles
        // right away.
        self.publish_status();

        debug!(
            environment = %self.env.name,
            revision = %revision,
            cause = %cause,
            delta = %delta.summary(),
            decision = ?decision,
            "pass decided"
        );

        match decision {
            Decision::NoOp => {
                // An empty delta at a new revision means the cluster already
                // matches it; record the revision as synced.
                self.last_synced_revision = Some(revision.clone());
                self.refresh_health(&desired).await;
                self.state.finish_pass();
                Ok(PassReport::NoOp { revision })
            }
            Decision::Hold => {
                let summary = delta.summary();
                for sink in &self.sinks {
                    sink.approval_pending(&self.env.name, cause, &summary).await;
                }
                // Phase stays PendingApproval until the next pass
                Ok(PassReport::Held {
                    cause,
                    summary,
                    revision,
                })
            }
            Decision::Apply => {
                let trigger_kind = if explicit {
                    SyncTrigger::Manual
                } else if cause == DeltaCause::Drift {
                    SyncTrigger::SelfHeal
                } else {
                    SyncTrigger::Automatic
                };

                let mut operation = SyncOperation::begin(
                    self.env.name.clone(),
                    revision.clone(),
                    self.env.policy,
                    trigger_kind,
                );
                info!(
                    environment = %self.env.name,
                    revision = %revision,
                    trigger = %trigger_kind,
                    delta = %delta.summary(),
                    "sync started"
                );

                let report = self
                    .applier
                    .apply(&self.env, &desired, &live, &delta, &self.abort_rx)
                    .await;
                operation.finish(report.into_outcome());

                if operation.succeeded() {
                    self.last_synced_revision = Some(revision.clone());
                }
                for sink in &self.sinks {
                    sink.sync_finished(&operation).await;
                }
                self.last_sync = Some(operation.clone());
                self.state.finish_pass();

                // Health runs only after a full apply; a partial or aborted
                // sync leaves the last evaluation in place.
                let health = if operation.succeeded() {
                    match self.evaluator.wait_healthy(&self.env, &desired).await {
                        Ok(h) => {
                            self.publish_health(h.clone()).await;
                            Some(h)
                        }
                        Err(e) => {
                            warn!(environment = %self.env.name, error = %e, "health evaluation failed");
                            None
                        }
                    }
                } else {
                    None
                };

                Ok(PassReport::Synced { operation, health })
            }
        }
    }

    /// One-shot health refresh, for passes that did not apply anything
    async fn refresh_health(&mut self, desired: &converge_core::DesiredState) {
        match self.evaluator.check_once(&self.env, desired).await {
            Ok(h) => self.publish_health(h).await,
            Err(e) => {
                warn!(environment = %self.env.name, error = %e, "health refresh failed");
            }
        }
    }

    /// Store a fresh evaluation and notify sinks on state transitions
    async fn publish_health(&mut self, health: EnvironmentHealth) {
        let previous = self.health.as_ref().map(|h| h.state);
        if previous != Some(health.state) {
            for sink in &self.sinks {
                sink.health_changed(&self.env.name, previous, &health).await;
            }
        }
        self.health = Some(health);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_config_default() {
        let config = ControllerConfig::default();
        assert_eq!(config.track, "main");
        assert_eq!(config.poll_interval, Duration::from_secs(180));
    }

    #[test]
    fn test_status_is_served_outside_the_command_loop() {
        // No task is draining the command channel here; status still answers
        // because it reads the watch channel directly.
        let (commands, _commands_rx) = mpsc::channel(1);
        let (abort_tx, _abort_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(EnvStatus {
            environment: "staging".to_string(),
            phase: Phase::Applying {
                revision: "abc123".to_string(),
            },
            last_synced_revision: None,
            last_sync: None,
            health: None,
        });
        let handle = ControllerHandle {
            environment: "staging".to_string(),
            commands,
            abort: Arc::new(abort_tx),
            status: status_rx,
        };

        assert!(handle.status().phase.is_applying());

        status_tx.send_replace(EnvStatus {
            environment: "staging".to_string(),
            phase: Phase::Idle,
            last_synced_revision: Some("abc123".to_string()),
            last_sync: None,
            health: None,
        });
        assert_eq!(handle.status().phase, Phase::Idle);
        assert_eq!(handle.status().last_synced_revision.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_trigger_kind_selection() {
        // Mirrors the dispatch in reconcile_inner
        let kind = |explicit: bool, cause: DeltaCause| {
            if explicit {
                SyncTrigger::Manual
            } else if cause == DeltaCause::Drift {
                SyncTrigger::SelfHeal
            } else {
                SyncTrigger::Automatic
            }
        };
        assert_eq!(kind(true, DeltaCause::Drift), SyncTrigger::Manual);
        assert_eq!(kind(false, DeltaCause::Drift), SyncTrigger::SelfHeal);
        assert_eq!(kind(false, DeltaCause::NewRevision), SyncTrigger::Automatic);
    }
}
