//! Resource identity, parsed specifications, and apply ordering
//!
//! Key features:
//! - `ResourceId`: (kind, namespace, name) identity used as the diff key
//! - `ResourceSpec`: one parsed manifest document
//! - `parse_manifest`: multi-document YAML parsing with per-identity errors
//! - `ApplyTier`: dependency ordering for the applier

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;

use crate::error::{CoreError, Result};

/// Identity of a Kubernetes resource within one environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource kind (Deployment, Service, etc.)
    pub kind: String,

    /// Resource namespace (None for cluster-scoped)
    pub namespace: Option<String>,

    /// Resource name
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(String::from),
            name: name.into(),
        }
    }

    /// Namespaced helper for tests and builders
    pub fn namespaced(kind: &str, namespace: &str, name: &str) -> Self {
        Self::new(kind, Some(namespace), name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// One parsed manifest document ready for diffing and applying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource identity
    pub id: ResourceId,

    /// apiVersion as written (e.g. "apps/v1")
    pub api_version: String,

    /// The full parsed document
    pub value: Value,
}

impl ResourceSpec {
    /// Apply tier for this resource
    pub fn tier(&self) -> ApplyTier {
        ApplyTier::from_kind(&self.id.kind)
    }

    /// Desired replica count, when the spec declares one
    pub fn replicas(&self) -> Option<i64> {
        self.value
            .get("spec")
            .and_then(|s| s.get("replicas"))
            .and_then(|r| r.as_i64())
    }
}

/// Dependency tier for apply ordering
///
/// Creates and updates run tier by tier in ascending order; deletes run in
/// descending order. Workloads come before network-facing resources so a
/// Service never selects pods that cannot exist yet, and autoscaling
/// policies and disruption budgets attach last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApplyTier {
    /// Namespace - created before anything scoped to it
    Namespace = 0,
    /// ResourceQuota, LimitRange
    NamespaceConfig = 1,
    /// ConfigMap, Secret, ServiceAccount, RBAC
    Config = 2,
    /// PersistentVolume, PersistentVolumeClaim, StorageClass
    Storage = 3,
    /// Deployment, StatefulSet, DaemonSet, Job, CronJob, Pod
    Workload = 4,
    /// Service, Ingress, NetworkPolicy
    Network = 5,
    /// HorizontalPodAutoscaler, PodDisruptionBudget
    Autoscaling = 6,
    /// Everything else
    Other = 7,
}

impl ApplyTier {
    /// Categorize a resource by its kind
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ConfigMap" | "Secret" | "ServiceAccount" | "Role" | "RoleBinding" | "ClusterRole"
            | "ClusterRoleBinding" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" | "Job"
            | "CronJob" => Self::Workload,
            "Service" | "Ingress" | "IngressClass" | "NetworkPolicy" | "Endpoints" => Self::Network,
            "HorizontalPodAutoscaler" | "VerticalPodAutoscaler" | "PodDisruptionBudget" => {
                Self::Autoscaling
            }
            _ => Self::Other,
        }
    }

    /// All tiers in apply order
    pub fn ordered() -> [ApplyTier; 8] {
        [
            Self::Namespace,
            Self::NamespaceConfig,
            Self::Config,
            Self::Storage,
            Self::Workload,
            Self::Network,
            Self::Autoscaling,
            Self::Other,
        ]
    }
}

/// Kinds that are cluster-scoped and never get a namespace defaulted in
fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "CustomResourceDefinition"
            | "PersistentVolume"
            | "StorageClass"
            | "IngressClass"
            | "PriorityClass"
    )
}

/// Parse a multi-document YAML manifest into resource specifications
///
/// Namespaced resources without an explicit namespace inherit
/// `default_namespace`. Documents that fail to parse report the offending
/// identity when one can be recovered, or the document index otherwise.
pub fn parse_manifest(manifest: &str, default_namespace: &str) -> Result<Vec<ResourceSpec>> {
    let mut specs = Vec::new();

    for (index, doc) in manifest.split("\n---").enumerate() {
        let doc = doc.trim().trim_start_matches("---").trim();
        if doc.is_empty() {
            continue;
        }

        // Skip comment-only documents
        if doc
            .lines()
            .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        {
            continue;
        }

        specs.push(parse_document(doc, index, default_namespace)?);
    }

    Ok(specs)
}

fn parse_document(doc: &str, index: usize, default_namespace: &str) -> Result<ResourceSpec> {
    let value: Value = serde_yaml::from_str(doc).map_err(|e| CoreError::ParseError {
        identity: format!("document {}", index),
        message: e.to_string(),
    })?;

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| CoreError::ParseError {
            identity: format!("document {}", index),
            message: "missing kind".to_string(),
        })?;

    let api_version = value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| CoreError::ParseError {
            identity: format!("{}/document {}", kind, index),
            message: "missing apiVersion".to_string(),
        })?;

    let metadata = value.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .map(String::from)
        .ok_or_else(|| CoreError::ParseError {
            identity: format!("{}/document {}", kind, index),
            message: "missing metadata.name".to_string(),
        })?;

    let namespace = if is_cluster_scoped(&kind) {
        None
    } else {
        metadata
            .and_then(|m| m.get("namespace"))
            .and_then(|n| n.as_str())
            .map(String::from)
            .or_else(|| Some(default_namespace.to_string()))
    };

    Ok(ResourceSpec {
        id: ResourceId {
            kind,
            namespace,
            name,
        },
        api_version,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        let namespaced = ResourceId::namespaced("Deployment", "staging", "web");
        assert_eq!(namespaced.to_string(), "staging/Deployment/web");

        let cluster = ResourceId::new("Namespace", None, "staging");
        assert_eq!(cluster.to_string(), "Namespace/staging");
    }

    #[test]
    fn test_parse_manifest_defaults_namespace() {
        let manifest = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
---
apiVersion: v1
kind: Namespace
metadata:
  name: staging
"#;
        let specs = parse_manifest(manifest, "staging").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id.namespace.as_deref(), Some("staging"));
        assert_eq!(specs[0].replicas(), Some(2));
        assert_eq!(specs[1].id.namespace, None);
    }

    #[test]
    fn test_parse_manifest_explicit_namespace_wins() {
        let manifest = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
  namespace: other
data:
  key: value
"#;
        let specs = parse_manifest(manifest, "staging").unwrap();
        assert_eq!(specs[0].id.namespace.as_deref(), Some("other"));
    }

    #[test]
    fn test_parse_manifest_reports_identity() {
        let manifest = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  labels: {}
"#;
        let err = parse_manifest(manifest, "staging").unwrap_err();
        match err {
            CoreError::ParseError { identity, message } => {
                assert!(identity.contains("Deployment"));
                assert!(message.contains("metadata.name"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_parse_manifest_skips_comments_and_empties() {
        let manifest = "# only a comment\n---\n\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm";
        let specs = parse_manifest(manifest, "default").unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id.name, "cm");
    }

    #[test]
    fn test_apply_tier_ordering() {
        assert!(ApplyTier::Namespace < ApplyTier::Config);
        assert!(ApplyTier::Config < ApplyTier::Workload);
        assert!(ApplyTier::Workload < ApplyTier::Network);
        assert!(ApplyTier::Network < ApplyTier::Autoscaling);
        assert_eq!(ApplyTier::from_kind("Service"), ApplyTier::Network);
        assert_eq!(
            ApplyTier::from_kind("PodDisruptionBudget"),
            ApplyTier::Autoscaling
        );
        assert_eq!(ApplyTier::from_kind("SomethingCustom"), ApplyTier::Other);
    }

    #[test]
    fn test_cluster_scoped_kinds() {
        assert!(is_cluster_scoped("Namespace"));
        assert!(is_cluster_scoped("ClusterRole"));
        assert!(!is_cluster_scoped("Deployment"));
    }
}
