//! Shared command context: environment config, source selection, client
//! construction

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use converge_core::{DesiredState, Environment, EnvironmentSet};
use converge_source::{DirSource, GitSource, Source};

use crate::error::{CliError, Result};

/// Where desired state comes from, chosen by CLI flags
#[derive(Debug, Clone)]
pub enum AnySource {
    Git(GitSource),
    Dir(DirSource),
}

#[async_trait]
impl Source for AnySource {
    async fn resolve(&self, revision: &str) -> converge_source::Result<String> {
        match self {
            AnySource::Git(s) => s.resolve(revision).await,
            AnySource::Dir(s) => s.resolve(revision).await,
        }
    }

    async fn fetch(
        &self,
        revision: &str,
        path: &str,
        environment: &str,
        namespace: &str,
    ) -> converge_source::Result<DesiredState> {
        match self {
            AnySource::Git(s) => s.fetch(revision, path, environment, namespace).await,
            AnySource::Dir(s) => s.fetch(revision, path, environment, namespace).await,
        }
    }
}

/// Build the desired-state source from CLI flags
///
/// `--repo` selects a Git clone; otherwise the manifest directory is read
/// as-is.
pub fn build_source(
    repo: Option<&Path>,
    remote: Option<&str>,
    dir: &Path,
) -> AnySource {
    match repo {
        Some(repo) => {
            let mut source = GitSource::new(repo);
            if let Some(remote) = remote {
                source = source.with_remote(remote);
            }
            AnySource::Git(source)
        }
        None => AnySource::Dir(DirSource::new(dir)),
    }
}

/// Load and validate the environment set
pub fn load_environments(path: &PathBuf) -> Result<EnvironmentSet> {
    if !path.is_file() {
        return Err(CliError::config_with_help(
            format!("environment config '{}' not found", path.display()),
            "pass --config or set CONVERGE_CONFIG",
        ));
    }
    Ok(EnvironmentSet::load(path)?)
}

/// Look up one environment by name
pub fn require_env<'a>(set: &'a EnvironmentSet, name: &str) -> Result<&'a Environment> {
    set.get(name).ok_or_else(|| {
        let known = set
            .environments
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        CliError::config_with_help(
            format!("unknown environment '{}'", name),
            format!("configured environments: {}", known),
        )
    })
}

/// Connect to the cluster from the ambient kubeconfig
pub async fn kube_client() -> Result<kube::Client> {
    kube::Client::try_default()
        .await
        .map_err(|e| CliError::Cluster {
            message: format!("failed to build client: {}", e),
        })
}
