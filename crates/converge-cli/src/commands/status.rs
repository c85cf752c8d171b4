//! Status command - show sync and health status for an environment

use console::style;
use converge_kube::{HealthEvaluator, LiveStateObserver};
use converge_source::Source;

use crate::Globals;
use crate::context;
use crate::display;
use crate::error::Result;

/// Run the status command
pub async fn run(globals: &Globals, environment: &str) -> Result<()> {
    let set = context::load_environments(&globals.config)?;
    let env = context::require_env(&set, environment)?;
    let source = context::build_source(
        globals.repo.as_deref(),
        globals.remote.as_deref(),
        &globals.dir,
    );

    let desired = source
        .fetch(
            &globals.track,
            env.manifest_path(),
            &env.name,
            &env.namespace,
        )
        .await?;

    let client = context::kube_client().await?;
    let observer = LiveStateObserver::new(client.clone()).await?;
    let live = observer.snapshot(env, &desired).await?;
    let delta = converge_core::diff(&desired, &live, env.prune)?;

    println!("{}", style("ENVIRONMENT").bold().underlined());
    println!("  Name:      {}", style(&env.name).cyan());
    println!("  Namespace: {}", env.namespace);
    println!("  Policy:    {}", env.policy);
    println!("  Revision:  {}", style(&desired.revision).cyan());
    let sync_state = if delta.is_empty() {
        style("in sync".to_string()).green()
    } else {
        style(format!("out of sync ({})", delta.summary())).yellow()
    };
    println!("  Sync:      {}", sync_state);
    println!();

    let health = HealthEvaluator::new(client).check_once(env, &desired).await?;
    display::print_health(&health);

    Ok(())
}
