//! Sync command - trigger one reconciliation pass with an explicit trigger

use std::sync::Arc;
use std::time::Duration;

use console::style;
use converge_kube::{
    Applier, ControllerConfig, EnvironmentController, HealthEvaluator, HealthState,
    LiveStateObserver, PassReport, TracingSink,
};

use crate::Globals;
use crate::context;
use crate::display;
use crate::error::{CliError, Result};

/// Run the sync command
pub async fn run(globals: &Globals, environment: &str, revision: Option<String>) -> Result<()> {
    let set = context::load_environments(&globals.config)?;
    let env = context::require_env(&set, environment)?.clone();
    let source = context::build_source(
        globals.repo.as_deref(),
        globals.remote.as_deref(),
        &globals.dir,
    );

    let client = context::kube_client().await?;
    let observer = LiveStateObserver::new(client.clone()).await?;
    let applier = Applier::new(client.clone()).await?;
    let evaluator = HealthEvaluator::new(client);

    let config = ControllerConfig {
        track: globals.track.clone(),
        poll_interval: Duration::from_secs(180),
    };
    let (mut controller, _handle) = EnvironmentController::new(
        env,
        source,
        observer,
        applier,
        evaluator,
        vec![Arc::new(TracingSink)],
        config,
    );

    // An explicit trigger forces held deltas through regardless of policy
    let report = controller.reconcile(Some(revision)).await?;
    match report {
        PassReport::NoOp { revision } => {
            println!(
                "{} '{}' is already in sync at {}",
                style("✓").green(),
                environment,
                style(revision).cyan()
            );
            Ok(())
        }
        PassReport::Synced { operation, health } => {
            display::print_sync(&operation);
            if let Some(health) = &health {
                display::print_health(health);
            }

            if !operation.succeeded() {
                let cause = operation
                    .outcome
                    .map(|o| o.cause())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(CliError::sync_failed(cause));
            }
            if let Some(health) = health
                && health.state != HealthState::Healthy
            {
                return Err(CliError::degraded(health.summary()));
            }
            Ok(())
        }
        PassReport::Held { summary, .. } => {
            // Unreachable for explicit triggers; surfaced for completeness
            Err(CliError::sync_failed(format!("delta held: {}", summary)))
        }
        PassReport::Queued => Err(CliError::internal("sync queued behind another pass")),
    }
}
