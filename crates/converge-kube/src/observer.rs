//! Live-state observation
//!
//! Takes a read-only snapshot of the cluster resources relevant to one
//! environment:
//! - lists owned resources per kind via the ownership label selector, for
//!   every kind the desired state references plus a sweep catalog of
//!   commonly managed kinds, so owned orphans whose kind dropped out of the
//!   manifests entirely stay visible to pruning
//! - point-reads desired identities the listing missed, so unlabeled
//!   resources that collide with desired ones are adopted into the snapshot
//!
//! A snapshot is atomic: any API failure fails the whole observation rather
//! than returning a partial view that would diff as mass drift.

use indexmap::IndexMap;
use kube::{
    Client,
    api::{DynamicObject, ListParams},
    discovery::Discovery,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use converge_core::{
    DesiredState, Environment, LiveState, ObservedResource, ResourceId,
    labels::{is_owned_by, ownership_selector},
};

use crate::dynamic::{parse_gvk, resolve_api};
use crate::error::{KubeError, Result};

/// Read-only observer producing `LiveState` snapshots
pub struct LiveStateObserver {
    client: Client,
    discovery: Discovery,
}

impl LiveStateObserver {
    /// Create a new observer, running API discovery once up front
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(KubeError::Api)?;
        Ok(Self { client, discovery })
    }

    /// Create from an existing client and discovery cache
    pub fn with_discovery(client: Client, discovery: Discovery) -> Self {
        Self { client, discovery }
    }

    /// Snapshot the live state for one environment
    ///
    /// Bounded by the environment's observe timeout; a timeout or any API
    /// failure surfaces as `ClusterUnreachable`.
    pub async fn snapshot(&self, env: &Environment, desired: &DesiredState) -> Result<LiveState> {
        match tokio::time::timeout(env.timeouts.observe, self.snapshot_inner(env, desired)).await {
            Ok(result) => result,
            Err(_) => Err(KubeError::ClusterUnreachable {
                message: format!(
                    "observation timed out after {:?} for environment '{}'",
                    env.timeouts.observe, env.name
                ),
            }),
        }
    }

    async fn snapshot_inner(&self, env: &Environment, desired: &DesiredState) -> Result<LiveState> {
        let mut observed: IndexMap<ResourceId, ObservedResource> = IndexMap::new();

        // One list per kind, filtered down to resources this environment
        // owns. Kinds come from the desired state plus the sweep catalog.
        let selector = ownership_selector(&env.name);
        let required: BTreeSet<(String, String)> = desired_kinds(desired).into_iter().collect();
        for (api_version, kind) in snapshot_kinds(desired) {
            let (api, _scope) = match resolve_api(
                &self.client,
                &self.discovery,
                &api_version,
                &kind,
                &env.namespace,
            ) {
                Ok(resolved) => resolved,
                // A swept kind the cluster does not serve is skipped; a kind
                // the desired state references must resolve.
                Err(KubeError::UnknownKind { .. })
                    if !required.contains(&(api_version.clone(), kind.clone())) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };
            let lp = ListParams::default().labels(&selector);
            let list = api.list(&lp).await.map_err(|e| KubeError::ClusterUnreachable {
                message: format!("failed to list {}: {}", kind, e),
            })?;

            for obj in list.items {
                let resource = to_observed(&api_version, &kind, &env.name, obj)?;
                observed.insert(resource.id.clone(), resource);
            }
        }

        // Point reads for desired identities the listing missed. This is how
        // pre-existing unlabeled resources enter the snapshot: they show up
        // with owned=false and are never candidates for pruning.
        for (id, spec) in &desired.resources {
            if observed.contains_key(id) {
                continue;
            }
            let (api, _scope) = resolve_api(
                &self.client,
                &self.discovery,
                &spec.api_version,
                &id.kind,
                &env.namespace,
            )?;
            match api.get_opt(&id.name).await {
                Ok(Some(obj)) => {
                    let resource = to_observed(&spec.api_version, &id.kind, &env.name, obj)?;
                    if !resource.owned {
                        warn!(resource = %id, environment = %env.name, "adopting unlabeled resource");
                    }
                    observed.insert(resource.id.clone(), resource);
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(KubeError::ClusterUnreachable {
                        message: format!("failed to read {}: {}", id, e),
                    });
                }
            }
        }

        debug!(
            environment = %env.name,
            resources = observed.len(),
            "live-state snapshot complete"
        );
        Ok(LiveState::new(env.name.clone(), observed.into_values().collect()))
    }

    /// Hand the discovery cache to another component on the same cluster
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }
}

/// Kinds swept for owned orphans even when the desired state no longer
/// references them
///
/// Without the sweep, deleting the last manifest of a kind in one revision
/// would drop the kind from the listing and its owned survivors could never
/// be pruned.
const SWEEP_KINDS: &[(&str, &str)] = &[
    ("v1", "Namespace"),
    ("v1", "ConfigMap"),
    ("v1", "Secret"),
    ("v1", "Service"),
    ("v1", "ServiceAccount"),
    ("v1", "PersistentVolumeClaim"),
    ("v1", "ResourceQuota"),
    ("v1", "LimitRange"),
    ("apps/v1", "Deployment"),
    ("apps/v1", "StatefulSet"),
    ("apps/v1", "DaemonSet"),
    ("batch/v1", "Job"),
    ("batch/v1", "CronJob"),
    ("networking.k8s.io/v1", "Ingress"),
    ("networking.k8s.io/v1", "NetworkPolicy"),
    ("autoscaling/v2", "HorizontalPodAutoscaler"),
    ("policy/v1", "PodDisruptionBudget"),
    ("rbac.authorization.k8s.io/v1", "Role"),
    ("rbac.authorization.k8s.io/v1", "RoleBinding"),
];

/// Kinds to list for one snapshot: every kind the desired state references
/// plus the sweep catalog, deduplicated
fn snapshot_kinds(desired: &DesiredState) -> Vec<(String, String)> {
    let mut seen = BTreeSet::new();
    let mut kinds = Vec::new();
    for key in desired_kinds(desired) {
        if seen.insert(key.clone()) {
            kinds.push(key);
        }
    }
    for (api_version, kind) in SWEEP_KINDS {
        let key = (api_version.to_string(), kind.to_string());
        if seen.insert(key.clone()) {
            kinds.push(key);
        }
    }
    kinds
}

/// Distinct (apiVersion, kind) pairs in a desired state, in first-seen order
fn desired_kinds(desired: &DesiredState) -> Vec<(String, String)> {
    let mut seen = BTreeSet::new();
    let mut kinds = Vec::new();
    for (id, spec) in &desired.resources {
        let key = (spec.api_version.clone(), id.kind.clone());
        if seen.insert(key.clone()) {
            kinds.push(key);
        }
    }
    kinds
}

/// Convert a fetched object into an `ObservedResource`
///
/// List responses omit per-item apiVersion/kind, so both are restored from
/// the request before the value is handed to the diff engine.
fn to_observed(
    api_version: &str,
    kind: &str,
    environment: &str,
    obj: DynamicObject,
) -> Result<ObservedResource> {
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| KubeError::InvalidManifest("observed resource missing name".to_string()))?;
    let namespace = obj.metadata.namespace.clone();
    let resource_version = obj.metadata.resource_version.clone();
    let owned = obj
        .metadata
        .labels
        .as_ref()
        .map(|labels| is_owned_by(labels, environment))
        .unwrap_or(false);

    let mut value: serde_yaml::Value = serde_yaml::to_value(&obj)?;
    if let serde_yaml::Value::Mapping(map) = &mut value {
        map.insert("apiVersion".into(), api_version.into());
        map.insert("kind".into(), kind.into());
    }

    let id = ResourceId::new(kind, namespace.as_deref(), name);

    Ok(ObservedResource {
        id,
        value,
        resource_version,
        owned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::ResourceSpec;
    use kube::discovery::ApiResource;

    fn spec(api_version: &str, kind: &str, name: &str) -> ResourceSpec {
        let value: serde_yaml::Value = serde_yaml::from_str(&format!(
            "apiVersion: {}\nkind: {}\nmetadata:\n  name: {}\n",
            api_version, kind, name
        ))
        .unwrap();
        ResourceSpec {
            id: ResourceId::namespaced(kind, "hello-dev", name),
            api_version: api_version.to_string(),
            value,
        }
    }

    #[test]
    fn test_desired_kinds_deduplicates() {
        let desired = DesiredState::new(
            "development",
            "abc123",
            vec![
                spec("apps/v1", "Deployment", "web"),
                spec("v1", "Service", "web"),
                spec("apps/v1", "Deployment", "worker"),
            ],
        )
        .unwrap();

        let kinds = desired_kinds(&desired);
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&("apps/v1".to_string(), "Deployment".to_string())));
        assert!(kinds.contains(&("v1".to_string(), "Service".to_string())));
    }

    #[test]
    fn test_snapshot_kinds_cover_orphaned_kinds() {
        // The desired state references only a Deployment; an owned ConfigMap
        // orphaned by this revision must still be listed so the diff can
        // prune it.
        let desired = DesiredState::new(
            "development",
            "abc123",
            vec![spec("apps/v1", "Deployment", "web")],
        )
        .unwrap();

        let kinds = snapshot_kinds(&desired);
        assert!(kinds.contains(&("v1".to_string(), "ConfigMap".to_string())));
        assert!(kinds.contains(&("v1".to_string(), "Service".to_string())));
        // A desired kind is not listed twice
        assert_eq!(kinds.iter().filter(|(_, k)| k == "Deployment").count(), 1);
    }

    #[test]
    fn test_to_observed_restores_type_meta_and_ownership() {
        let mut obj = DynamicObject::new(
            "web",
            &ApiResource::from_gvk(&parse_gvk("apps/v1", "Deployment")),
        );
        obj.metadata.namespace = Some("hello-dev".to_string());
        obj.metadata.resource_version = Some("42".to_string());
        obj.metadata.labels = Some(
            [
                ("app.kubernetes.io/managed-by".to_string(), "converge".to_string()),
                ("converge.io/environment".to_string(), "development".to_string()),
            ]
            .into(),
        );

        let observed = to_observed("apps/v1", "Deployment", "development", obj).unwrap();
        assert_eq!(observed.id.to_string(), "hello-dev/Deployment/web");
        assert_eq!(observed.resource_version.as_deref(), Some("42"));
        assert!(observed.owned);
        assert_eq!(
            observed.value.get("kind").and_then(|v| v.as_str()),
            Some("Deployment")
        );
    }

    #[test]
    fn test_to_observed_unlabeled_is_not_owned() {
        let obj = DynamicObject::new(
            "legacy",
            &ApiResource::from_gvk(&parse_gvk("v1", "ConfigMap")),
        );
        let observed = to_observed("v1", "ConfigMap", "development", obj).unwrap();
        assert!(!observed.owned);
    }
}
