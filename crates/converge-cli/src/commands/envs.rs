//! Envs command - list configured environments

use console::style;

use crate::Globals;
use crate::context;
use crate::error::Result;

/// Run the envs command
pub fn run(globals: &Globals) -> Result<()> {
    let set = context::load_environments(&globals.config)?;

    println!(
        "{:<14} {:<16} {:>8}  {:<16} {:<10} {:<5}",
        style("NAME").bold(),
        style("NAMESPACE").bold(),
        style("REPLICAS").bold(),
        style("POLICY").bold(),
        style("EXPOSURE").bold(),
        style("PRUNE").bold(),
    );
    for env in &set.environments {
        println!(
            "{:<14} {:<16} {:>8}  {:<16} {:<10} {:<5}",
            style(&env.name).cyan(),
            env.namespace,
            env.replicas,
            env.policy,
            format!("{:?}", env.exposure).to_lowercase(),
            env.prune,
        );
    }

    Ok(())
}
