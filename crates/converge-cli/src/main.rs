//! Converge CLI - GitOps reconciliation for Kubernetes environments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod context;
mod display;
mod error;
mod exit_codes;

use error::CliError;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "GitOps reconciliation for Kubernetes environments", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Environment configuration file
    #[arg(
        long,
        global = true,
        default_value = "environments.yaml",
        env = "CONVERGE_CONFIG"
    )]
    config: PathBuf,

    /// Git clone to read manifests from (a plain directory is used otherwise)
    #[arg(long, global = true, env = "CONVERGE_REPO")]
    repo: Option<PathBuf>,

    /// Remote to fetch before resolving revisions
    #[arg(long, global = true, requires = "repo")]
    remote: Option<String>,

    /// Manifest directory when no repo is given
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Revision to track (branch, tag, or commit)
    #[arg(long, global = true, default_value = "main", env = "CONVERGE_TRACK")]
    track: String,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reconciliation controllers for every environment
    Run {
        /// Seconds between reconciliation passes
        #[arg(long, default_value_t = 180)]
        interval: u64,
    },

    /// Trigger one sync for an environment
    Sync {
        /// Environment name
        environment: String,

        /// Sync a specific revision instead of the tracked one
        #[arg(long)]
        revision: Option<String>,
    },

    /// Show the delta between desired and live state
    Diff {
        /// Environment name
        environment: String,

        /// Diff against a specific revision instead of the tracked one
        #[arg(long)]
        revision: Option<String>,
    },

    /// Show sync and health status for an environment
    Status {
        /// Environment name
        environment: String,
    },

    /// List configured environments
    Envs,
}

/// Flags shared by every command
pub struct Globals {
    pub config: PathBuf,
    pub repo: Option<PathBuf>,
    pub remote: Option<String>,
    pub dir: PathBuf,
    pub track: String,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let globals = Globals {
        config: cli.config,
        repo: cli.repo,
        remote: cli.remote,
        dir: cli.dir,
        track: cli.track,
    };

    let result: Result<(), CliError> = match cli.command {
        Commands::Run { interval } => commands::run::run(&globals, interval).await,
        Commands::Sync {
            environment,
            revision,
        } => commands::sync::run(&globals, &environment, revision).await,
        Commands::Diff {
            environment,
            revision,
        } => commands::diff::run(&globals, &environment, revision.as_deref()).await,
        Commands::Status { environment } => commands::status::run(&globals, &environment).await,
        Commands::Envs => commands::envs::run(&globals),
    };

    if let Err(e) = result {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
    Ok(())
}
