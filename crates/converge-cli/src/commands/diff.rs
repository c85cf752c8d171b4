//! Diff command - show the delta between desired and live state

use converge_source::Source;
use converge_kube::LiveStateObserver;

use crate::Globals;
use crate::context;
use crate::display;
use crate::error::Result;

/// Run the diff command
pub async fn run(globals: &Globals, environment: &str, revision: Option<&str>) -> Result<()> {
    let set = context::load_environments(&globals.config)?;
    let env = context::require_env(&set, environment)?;
    let source = context::build_source(
        globals.repo.as_deref(),
        globals.remote.as_deref(),
        &globals.dir,
    );

    let desired = source
        .fetch(
            revision.unwrap_or(&globals.track),
            env.manifest_path(),
            &env.name,
            &env.namespace,
        )
        .await?;

    let client = context::kube_client().await?;
    let observer = LiveStateObserver::new(client).await?;
    let live = observer.snapshot(env, &desired).await?;

    let delta = converge_core::diff(&desired, &live, env.prune)?;
    display::print_delta(&delta);

    Ok(())
}
