//! Git desired-state source
//!
//! Reads manifests straight out of a Git revision without touching the
//! working tree: `git rev-parse` pins the revision, `git ls-tree` lists the
//! manifest blobs under the path, `git show` reads each blob. Runs against a
//! local clone; `fetch_remote` refreshes it first when a remote is
//! configured.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use converge_core::{DesiredState, ResourceSpec, parse_manifest};

use crate::{Result, Source, SourceError, is_manifest_path};

/// Desired-state source backed by a Git repository
#[derive(Debug, Clone)]
pub struct GitSource {
    /// Path to the local clone
    repo: PathBuf,

    /// Remote to fetch before resolving, if any
    remote: Option<String>,
}

impl GitSource {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            remote: None,
        }
    }

    /// Fetch from this remote before resolving revisions
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    async fn git(&self, revision: &str, args: &[&str]) -> Result<String> {
        let output: Output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .await
            .map_err(|e| SourceError::unreachable(revision, format!("git not available: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::unreachable(
                revision,
                format!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Refresh the clone from its remote
    pub async fn fetch_remote(&self, revision: &str) -> Result<()> {
        if let Some(remote) = &self.remote {
            self.git(revision, &["fetch", "--prune", remote]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Source for GitSource {
    async fn resolve(&self, revision: &str) -> Result<String> {
        self.fetch_remote(revision).await?;
        let sha = self
            .git(revision, &["rev-parse", "--verify", &format!("{}^{{commit}}", revision)])
            .await?;
        Ok(sha.trim().to_string())
    }

    async fn fetch(
        &self,
        revision: &str,
        path: &str,
        environment: &str,
        namespace: &str,
    ) -> Result<DesiredState> {
        let sha = self.resolve(revision).await?;

        let listing = self
            .git(revision, &["ls-tree", "-r", "--name-only", &sha, "--", path])
            .await?;
        let files = manifest_paths(&listing);
        debug!(revision = %sha, path, files = files.len(), "listed manifests");

        let mut specs: Vec<ResourceSpec> = Vec::new();
        for file in files {
            let content = self
                .git(revision, &["show", &format!("{}:{}", sha, file)])
                .await?;
            specs.extend(parse_manifest(&content, namespace)?);
        }

        Ok(DesiredState::new(environment, sha, specs)?)
    }
}

/// Filter `git ls-tree --name-only` output down to manifest files, sorted
/// for deterministic resource ordering
fn manifest_paths(listing: &str) -> Vec<String> {
    let mut paths: Vec<String> = listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| is_manifest_path(l))
        .map(String::from)
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_paths_filters_and_sorts() {
        let listing = "envs/dev/service.yaml\nenvs/dev/README.md\nenvs/dev/deployment.yaml\n\nenvs/dev/patch.yml\n";
        let paths = manifest_paths(listing);
        assert_eq!(
            paths,
            vec![
                "envs/dev/deployment.yaml",
                "envs/dev/patch.yml",
                "envs/dev/service.yaml",
            ]
        );
    }

    #[test]
    fn test_manifest_paths_empty_listing() {
        assert!(manifest_paths("").is_empty());
        assert!(manifest_paths("README.md\nMakefile\n").is_empty());
    }

    #[test]
    fn test_with_remote() {
        let source = GitSource::new("/srv/repo").with_remote("origin");
        assert_eq!(source.remote.as_deref(), Some("origin"));
    }
}
