//! Run command - reconciliation controllers for every environment

use std::sync::Arc;
use std::time::Duration;

use converge_kube::{
    Applier, ControllerConfig, EnvironmentController, HealthEvaluator, LiveStateObserver,
    TracingSink,
};
use tracing::info;

use crate::Globals;
use crate::context;
use crate::error::Result;

/// Run controllers until interrupted
///
/// Each environment gets its own controller task; one environment's failures
/// never stall the others. Ctrl-C raises the abort flag on every controller
/// so in-flight syncs stop at the next tier boundary.
pub async fn run(globals: &Globals, interval: u64) -> Result<()> {
    let set = context::load_environments(&globals.config)?;
    let client = context::kube_client().await?;

    let mut tasks = Vec::new();
    let mut handles = Vec::new();

    for env in set.environments.clone() {
        let source = context::build_source(
            globals.repo.as_deref(),
            globals.remote.as_deref(),
            &globals.dir,
        );
        let observer = LiveStateObserver::new(client.clone()).await?;
        let applier = Applier::new(client.clone()).await?;
        let evaluator = HealthEvaluator::new(client.clone());
        let config = ControllerConfig {
            track: globals.track.clone(),
            poll_interval: Duration::from_secs(interval),
        };

        let (controller, handle) = EnvironmentController::new(
            env,
            source,
            observer,
            applier,
            evaluator,
            vec![Arc::new(TracingSink)],
            config,
        );
        tasks.push(controller.spawn());
        handles.push(handle);
    }

    info!(
        environments = handles.len(),
        interval, "controllers running; Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    for handle in &handles {
        handle.abort_sync();
    }
    // Dropping the handles closes the command channels and stops the loops
    drop(handles);
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
