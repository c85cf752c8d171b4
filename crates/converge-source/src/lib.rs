//! Converge Source - desired-state sources
//!
//! A `Source` turns (revision, path) into the `DesiredState` for one
//! environment. Two implementations:
//! - `GitSource`: reads manifests straight out of a Git revision, the source
//!   of truth in a GitOps setup
//! - `DirSource`: reads a plain directory tree, for local workflows and
//!   tests
//!
//! Sources are read-only pull interfaces; nothing here ever writes to the
//! repository or the cluster.

use async_trait::async_trait;
use thiserror::Error;

use converge_core::{CoreError, DesiredState};

pub mod dir;
pub mod git;

pub use dir::DirSource;
pub use git::GitSource;

/// Errors from desired-state sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// The revision could not be fetched or resolved
    #[error("source unreachable at revision '{revision}': {message}")]
    Unreachable { revision: String, message: String },

    /// A manifest failed to parse; carries the offending identity
    #[error(transparent)]
    Parse(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn unreachable(revision: &str, message: impl Into<String>) -> Self {
        Self::Unreachable {
            revision: revision.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// A read-only desired-state source
#[async_trait]
pub trait Source: Send + Sync {
    /// Resolve a symbolic revision (branch, tag) to a stable identifier
    async fn resolve(&self, revision: &str) -> Result<String>;

    /// Fetch the desired state for one environment at one revision
    ///
    /// `path` is the manifest directory relative to the source root;
    /// `environment` and `namespace` scope the resulting state.
    async fn fetch(
        &self,
        revision: &str,
        path: &str,
        environment: &str,
        namespace: &str,
    ) -> Result<DesiredState>;
}

/// File extensions recognized as manifests
pub(crate) fn is_manifest_path(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_manifest_path() {
        assert!(is_manifest_path("envs/dev/deployment.yaml"));
        assert!(is_manifest_path("service.yml"));
        assert!(!is_manifest_path("README.md"));
        assert!(!is_manifest_path("kustomization.yaml.bak"));
    }
}
