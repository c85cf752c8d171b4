//! Diff engine: compute the delta between desired and live state
//!
//! Key features:
//! - Pure function of one `DesiredState` and one `LiveState`
//! - Ownership-filtered comparison: live values are projected onto the key
//!   structure of the desired value, so cluster-defaulted fields and status
//!   never produce perpetual false diffs
//! - Prune gating: only controller-owned live resources are delete
//!   candidates, and `converge.io/prune: "false"` opts a resource out

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::labels;
use crate::resource::{ApplyTier, ResourceId};
use crate::state::{DesiredState, LiveState};

/// The kind of change one operation performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Resource exists in desired state only
    Create,
    /// Resource exists in both with differing managed fields; carries the
    /// observed resourceVersion for the optimistic-concurrency check
    Update { resource_version: Option<String> },
    /// Controller-owned resource exists in live state only
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Create => write!(f, "create"),
            OpKind::Update { .. } => write!(f, "update"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// One operation needed to move live state toward desired state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Target resource
    pub id: ResourceId,

    /// What to do
    pub kind: OpKind,

    /// Dependency tier for apply ordering
    pub tier: ApplyTier,
}

/// The set of operations for one reconciliation pass
///
/// Computed fresh on every pass and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    /// Owning environment name
    pub environment: String,

    /// Revision the desired side was resolved from
    pub revision: String,

    /// Operations in manifest order (creates/updates), deletes last
    pub operations: Vec<Operation>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    fn count(&self, matcher: impl Fn(&OpKind) -> bool) -> usize {
        self.operations.iter().filter(|op| matcher(&op.kind)).count()
    }

    /// Human-readable summary ("2 to create, 1 to update")
    pub fn summary(&self) -> String {
        let creates = self.count(|k| matches!(k, OpKind::Create));
        let updates = self.count(|k| matches!(k, OpKind::Update { .. }));
        let deletes = self.count(|k| matches!(k, OpKind::Delete));

        let mut parts = Vec::new();
        if creates > 0 {
            parts.push(format!("{} to create", creates));
        }
        if updates > 0 {
            parts.push(format!("{} to update", updates));
        }
        if deletes > 0 {
            parts.push(format!("{} to delete", deletes));
        }

        if parts.is_empty() {
            "in sync".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Compute the delta between desired and live state
///
/// Both snapshots must belong to the same environment; comparing across
/// environments is forbidden.
pub fn diff(desired: &DesiredState, live: &LiveState, prune: bool) -> Result<Delta> {
    if desired.environment != live.environment {
        return Err(CoreError::EnvironmentMismatch {
            desired: desired.environment.clone(),
            live: live.environment.clone(),
        });
    }

    let mut operations = Vec::new();

    for (id, spec) in &desired.resources {
        match live.resources.get(id) {
            None => operations.push(Operation {
                id: id.clone(),
                kind: OpKind::Create,
                tier: spec.tier(),
            }),
            Some(observed) => {
                let live_value = normalize(&observed.value);
                if !projected_equal(&spec.value, &live_value) {
                    operations.push(Operation {
                        id: id.clone(),
                        kind: OpKind::Update {
                            resource_version: observed.resource_version.clone(),
                        },
                        tier: spec.tier(),
                    });
                }
            }
        }
    }

    if prune {
        for (id, observed) in &live.resources {
            if desired.resources.contains_key(id) {
                continue;
            }
            // Only resources this controller owns are prune candidates
            if !observed.owned {
                continue;
            }
            if keeps_on_prune(&observed.value) {
                continue;
            }
            operations.push(Operation {
                id: id.clone(),
                kind: OpKind::Delete,
                tier: ApplyTier::from_kind(&id.kind),
            });
        }
    }

    Ok(Delta {
        environment: desired.environment.clone(),
        revision: desired.revision.clone(),
        operations,
    })
}

/// Strip fields the controller does not own from a live value
///
/// Removes `status` and server-managed `metadata` fields, plus Converge's
/// own ownership labels, so a desired spec that never mentions them still
/// compares clean.
pub fn normalize(value: &Value) -> Value {
    let mut value = value.clone();

    if let Value::Mapping(map) = &mut value {
        map.remove(Value::String("status".to_string()));

        if let Some(Value::Mapping(metadata)) = map.get_mut(Value::String("metadata".to_string())) {
            for field in [
                "uid",
                "resourceVersion",
                "generation",
                "creationTimestamp",
                "managedFields",
                "selfLink",
                "ownerReferences",
                "finalizers",
            ] {
                metadata.remove(Value::String(field.to_string()));
            }

            if let Some(Value::Mapping(lbls)) = metadata.get_mut(Value::String("labels".to_string()))
            {
                lbls.remove(Value::String(labels::MANAGED_BY_LABEL.to_string()));
                lbls.remove(Value::String(labels::ENVIRONMENT_LABEL.to_string()));
                if lbls.is_empty() {
                    metadata.remove(Value::String("labels".to_string()));
                }
            }
        }
    }

    value
}

/// Compare a desired value against a live value, ignoring live-only fields
///
/// Mappings match when every desired key matches the live side recursively;
/// extra live keys (cluster defaulting, admission mutation) are ignored. A
/// desired `null` asserts absence. Sequences compare element-wise in full,
/// since list order and length are owned by the manifest author.
pub fn projected_equal(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Mapping(d), Value::Mapping(l)) => d.iter().all(|(key, dv)| match l.get(key) {
            Some(lv) => projected_equal(dv, lv),
            None => dv.is_null(),
        }),
        (Value::Sequence(d), Value::Sequence(l)) => {
            d.len() == l.len() && d.iter().zip(l.iter()).all(|(dv, lv)| projected_equal(dv, lv))
        }
        (d, l) => d == l,
    }
}

fn keeps_on_prune(value: &Value) -> bool {
    let annotations: BTreeMap<String, String> = value
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| serde_yaml::from_value(a.clone()).ok())
        .unwrap_or_default();
    labels::keeps_on_prune(&annotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::parse_manifest;
    use crate::state::ObservedResource;

    fn desired(manifest: &str) -> DesiredState {
        let specs = parse_manifest(manifest, "dev").unwrap();
        DesiredState::new("development", "rev1", specs).unwrap()
    }

    fn observed(manifest: &str, owned: bool) -> Vec<ObservedResource> {
        parse_manifest(manifest, "dev")
            .unwrap()
            .into_iter()
            .map(|spec| ObservedResource {
                id: spec.id,
                value: spec.value,
                resource_version: Some("100".to_string()),
                owned,
            })
            .collect()
    }

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: web
          image: registry.example.com/hello:1.0
"#;

    #[test]
    fn test_diff_of_identical_states_is_empty() {
        let d = desired(DEPLOYMENT);
        let l = LiveState::new("development", observed(DEPLOYMENT, true));
        let delta = diff(&d, &l, true).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.summary(), "in sync");
    }

    #[test]
    fn test_diff_against_empty_cluster_creates() {
        let d = desired(DEPLOYMENT);
        let l = LiveState::empty("development");
        let delta = diff(&d, &l, true).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.operations[0].kind, OpKind::Create);
        assert_eq!(delta.operations[0].tier, ApplyTier::Workload);
    }

    #[test]
    fn test_diff_detects_replica_drift() {
        let d = desired(DEPLOYMENT);
        let drifted = DEPLOYMENT.replace("replicas: 2", "replicas: 5");
        let l = LiveState::new("development", observed(&drifted, true));
        let delta = diff(&d, &l, false).unwrap();

        assert_eq!(delta.len(), 1);
        match &delta.operations[0].kind {
            OpKind::Update { resource_version } => {
                assert_eq!(resource_version.as_deref(), Some("100"));
            }
            other => panic!("expected update, got {}", other),
        }
    }

    #[test]
    fn test_cluster_defaulted_fields_do_not_drift() {
        let d = desired(DEPLOYMENT);

        // Live side carries status, server metadata, ownership labels, and
        // defaulted spec fields the manifest never declared.
        let live_manifest = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  uid: 9f6b1a
  resourceVersion: "4213"
  creationTimestamp: "2026-01-01T00:00:00Z"
  labels:
    app.kubernetes.io/managed-by: converge
    converge.io/environment: development
spec:
  replicas: 2
  progressDeadlineSeconds: 600
  revisionHistoryLimit: 10
  template:
    spec:
      containers:
        - name: web
          image: registry.example.com/hello:1.0
          imagePullPolicy: IfNotPresent
          terminationMessagePath: /dev/termination-log
status:
  readyReplicas: 2
"#;
        let mut obs = observed(live_manifest, true);
        for o in &mut obs {
            o.value = normalize(&o.value);
        }
        let l = LiveState::new("development", obs);
        let delta = diff(&d, &l, true).unwrap();
        assert!(delta.is_empty(), "defaulted fields caused a false diff");
    }

    #[test]
    fn test_prune_deletes_owned_orphans_only() {
        let d = desired(DEPLOYMENT);
        let orphan = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: leftover
"#;
        let mut obs = observed(DEPLOYMENT, true);
        obs.extend(observed(orphan, true));
        let l = LiveState::new("development", obs);

        let delta = diff(&d, &l, true).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.operations[0].kind, OpKind::Delete);
        assert_eq!(delta.operations[0].id.name, "leftover");

        // Without the prune flag the orphan stays
        let delta = diff(&d, &l, false).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_prune_skips_unowned_resources() {
        let d = desired(DEPLOYMENT);
        let foreign = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: someone-elses
"#;
        let mut obs = observed(DEPLOYMENT, true);
        obs.extend(observed(foreign, false));
        let l = LiveState::new("development", obs);

        let delta = diff(&d, &l, true).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_prune_honors_keep_annotation() {
        let d = desired(DEPLOYMENT);
        let kept = r#"
apiVersion: v1
kind: Secret
metadata:
  name: precious
  annotations:
    converge.io/prune: "false"
"#;
        let mut obs = observed(DEPLOYMENT, true);
        obs.extend(observed(kept, true));
        let l = LiveState::new("development", obs);

        let delta = diff(&d, &l, true).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_cross_environment_comparison_is_rejected() {
        let d = desired(DEPLOYMENT);
        let l = LiveState::empty("staging");
        let err = diff(&d, &l, false).unwrap_err();
        assert!(matches!(err, CoreError::EnvironmentMismatch { .. }));
    }

    #[test]
    fn test_applying_delta_converges() {
        // Simulate applying the delta by copying desired specs over the live
        // side, then verify the next pass sees no work.
        let d = desired(DEPLOYMENT);
        let drifted = DEPLOYMENT.replace("replicas: 2", "replicas: 5");
        let l = LiveState::new("development", observed(&drifted, true));

        let delta = diff(&d, &l, true).unwrap();
        assert!(!delta.is_empty());

        let converged = LiveState::new("development", observed(DEPLOYMENT, true));
        let next = diff(&d, &converged, true).unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn test_desired_null_asserts_absence() {
        let d_val: Value = serde_yaml::from_str("a: 1\nb: null").unwrap();
        let live_without: Value = serde_yaml::from_str("a: 1").unwrap();
        let live_with: Value = serde_yaml::from_str("a: 1\nb: 2").unwrap();
        assert!(projected_equal(&d_val, &live_without));
        assert!(!projected_equal(&d_val, &live_with));
    }

    #[test]
    fn test_sequences_compare_in_full() {
        let d_val: Value = serde_yaml::from_str("items: [1, 2]").unwrap();
        let longer: Value = serde_yaml::from_str("items: [1, 2, 3]").unwrap();
        let reordered: Value = serde_yaml::from_str("items: [2, 1]").unwrap();
        assert!(!projected_equal(&d_val, &longer));
        assert!(!projected_equal(&d_val, &reordered));
    }
}
