//! Directory-tree desired-state source
//!
//! Walks `<root>/<path>` for YAML manifests and parses them into a
//! `DesiredState`. The revision is an opaque label supplied by the caller
//! (DirSource has no history of its own); `resolve` echoes it back.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use walkdir::WalkDir;

use converge_core::{DesiredState, ResourceSpec, parse_manifest};

use crate::{Result, Source, SourceError, is_manifest_path};

/// Desired-state source backed by a plain directory tree
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collect_specs(&self, revision: &str, path: &str, namespace: &str) -> Result<Vec<ResourceSpec>> {
        let dir = self.root.join(path);
        if !dir.is_dir() {
            return Err(SourceError::unreachable(
                revision,
                format!("manifest directory '{}' not found", dir.display()),
            ));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| is_manifest_path(&p.to_string_lossy()))
            .collect();
        // Deterministic resource ordering across platforms
        files.sort();

        let mut specs = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(&file)?;
            let parsed = parse_manifest(&content, namespace)?;
            debug!(file = %file.display(), resources = parsed.len(), "parsed manifest file");
            specs.extend(parsed);
        }

        Ok(specs)
    }
}

#[async_trait]
impl Source for DirSource {
    async fn resolve(&self, revision: &str) -> Result<String> {
        Ok(revision.to_string())
    }

    async fn fetch(
        &self,
        revision: &str,
        path: &str,
        environment: &str,
        namespace: &str,
    ) -> Result<DesiredState> {
        let specs = self.collect_specs(revision, path, namespace)?;
        Ok(DesiredState::new(environment, revision, specs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_parses_directory_tree() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "development/deployment.yaml",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 2\n",
        );
        write(
            tmp.path(),
            "development/service.yaml",
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n",
        );
        write(tmp.path(), "development/notes.md", "not a manifest");

        let source = DirSource::new(tmp.path());
        let desired = source
            .fetch("local", "development", "development", "hello-dev")
            .await
            .unwrap();

        assert_eq!(desired.len(), 2);
        assert_eq!(desired.revision, "local");
        let kinds: Vec<_> = desired.resources.keys().map(|id| id.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "Service"]);
        // Namespace defaulted from the environment
        assert!(
            desired
                .resources
                .keys()
                .all(|id| id.namespace.as_deref() == Some("hello-dev"))
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirSource::new(tmp.path());
        let err = source
            .fetch("local", "nonexistent", "development", "hello-dev")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_malformed_manifest_reports_identity() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "development/broken.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  labels: {}\n",
        );

        let source = DirSource::new(tmp.path());
        let err = source
            .fetch("local", "development", "development", "hello-dev")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ConfigMap"));
    }

    #[tokio::test]
    async fn test_resolve_echoes_revision() {
        let source = DirSource::new("/tmp");
        assert_eq!(source.resolve("whatever").await.unwrap(), "whatever");
    }
}
