//! Health evaluation for synced environments
//!
//! Key features:
//! - Per-kind readiness: Deployments need ready == updated == available ==
//!   desired, StatefulSets additionally need revision convergence, Jobs need
//!   completion
//! - Crash-loop detection over the environment's owned pods
//! - Polling with a hard deadline: still-progressing resources become
//!   Degraded when the window closes
//! - API failures mark a resource Unknown instead of failing the evaluation

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use converge_core::{
    DesiredState, Environment, ResourceId,
    labels::{ownership_selector, skips_health},
};

use crate::error::Result;

/// Health of one resource or one whole environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthState {
    /// Applied but not yet ready
    Progressing,
    /// All readiness conditions hold
    Healthy,
    /// Crash-looping, failed, or timed out while progressing
    Degraded,
    /// Could not be observed
    Unknown,
}

impl HealthState {
    /// Severity for rollups; higher dominates
    fn severity(self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Progressing => 1,
            HealthState::Unknown => 2,
            HealthState::Degraded => 3,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Progressing => write!(f, "progressing"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHealth {
    /// Resource identity
    pub id: ResourceId,

    /// Evaluated state
    pub state: HealthState,

    /// Ready replicas, where the kind has them
    pub ready: Option<i32>,

    /// Desired replicas
    pub desired: Option<i32>,

    /// Additional status message
    pub message: Option<String>,
}

impl ResourceHealth {
    /// Display string for readiness columns
    pub fn readiness_display(&self) -> String {
        match (self.ready, self.desired) {
            (Some(r), Some(d)) => format!("{}/{}", r, d),
            _ => self.state.to_string(),
        }
    }
}

/// Health of one environment at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentHealth {
    /// Environment name
    pub environment: String,

    /// Worst-of rollup across evaluated resources
    pub state: HealthState,

    /// Individual resource health
    pub resources: Vec<ResourceHealth>,

    /// When the evaluation ran
    pub checked_at: DateTime<Utc>,
}

impl EnvironmentHealth {
    fn new(environment: &str, resources: Vec<ResourceHealth>) -> Self {
        Self {
            environment: environment.to_string(),
            state: rollup(&resources),
            resources,
            checked_at: Utc::now(),
        }
    }

    /// Resources that are not healthy
    pub fn pending(&self) -> Vec<&ResourceHealth> {
        self.resources
            .iter()
            .filter(|r| r.state != HealthState::Healthy)
            .collect()
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        match self.state {
            HealthState::Healthy => format!("healthy: {} resources ready", self.resources.len()),
            state => {
                let pending = self.pending();
                let detail = pending
                    .iter()
                    .map(|r| format!("{} ({})", r.id, r.state))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {}", state, detail)
            }
        }
    }
}

/// Worst-of rollup; an empty set is trivially healthy
pub fn rollup(resources: &[ResourceHealth]) -> HealthState {
    resources
        .iter()
        .map(|r| r.state)
        .max_by_key(|s| s.severity())
        .unwrap_or(HealthState::Healthy)
}

/// Kinds with a meaningful readiness signal; everything else is healthy by
/// existence
fn checkable(kind: &str) -> bool {
    matches!(kind, "Deployment" | "StatefulSet" | "DaemonSet" | "Job")
}

/// Waiting reasons that mark a pod as degraded rather than progressing
fn is_crash_reason(reason: &str) -> bool {
    matches!(reason, "CrashLoopBackOff" | "ImagePullBackOff" | "ErrImagePull")
}

/// Evaluates environment health against the cluster
pub struct HealthEvaluator {
    client: kube::Client,
}

impl HealthEvaluator {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// One evaluation pass, no retries
    pub async fn check_once(
        &self,
        env: &Environment,
        desired: &DesiredState,
    ) -> Result<EnvironmentHealth> {
        let mut resources = Vec::new();

        for (id, spec) in &desired.resources {
            if !checkable(&id.kind) {
                continue;
            }
            if spec_skips_health(&spec.value) {
                debug!(resource = %id, "health check skipped by annotation");
                continue;
            }
            let health = self.check_resource(env, id).await;
            resources.push(health);
        }

        resources.extend(self.crash_looping_pods(env).await);

        Ok(EnvironmentHealth::new(&env.name, resources))
    }

    /// Poll until the environment is healthy, degraded, or the health window
    /// closes
    ///
    /// On timeout, resources still progressing are reported Degraded so the
    /// terminal state is unambiguous.
    pub async fn wait_healthy(
        &self,
        env: &Environment,
        desired: &DesiredState,
    ) -> Result<EnvironmentHealth> {
        let deadline = tokio::time::Instant::now() + env.timeouts.health;

        loop {
            let mut health = self.check_once(env, desired).await?;
            match health.state {
                HealthState::Healthy | HealthState::Degraded => return Ok(health),
                HealthState::Progressing | HealthState::Unknown => {}
            }

            if tokio::time::Instant::now() >= deadline {
                for resource in &mut health.resources {
                    if resource.state == HealthState::Progressing {
                        resource.state = HealthState::Degraded;
                        resource.message = Some(format!(
                            "still progressing after {:?}",
                            env.timeouts.health
                        ));
                    }
                }
                health.state = rollup(&health.resources);
                return Ok(health);
            }

            tokio::time::sleep(env.timeouts.health_interval).await;
        }
    }

    async fn check_resource(&self, env: &Environment, id: &ResourceId) -> ResourceHealth {
        let namespace = id.namespace.as_deref().unwrap_or(&env.namespace);
        let result = match id.kind.as_str() {
            "Deployment" => self.check_deployment(namespace, &id.name).await,
            "StatefulSet" => self.check_statefulset(namespace, &id.name).await,
            "DaemonSet" => self.check_daemonset(namespace, &id.name).await,
            "Job" => self.check_job(namespace, &id.name).await,
            _ => Ok((HealthState::Healthy, None, None, None)),
        };

        match result {
            Ok((state, ready, desired, message)) => ResourceHealth {
                id: id.clone(),
                state,
                ready,
                desired,
                message,
            },
            // The resource could not be observed; never guess
            Err(e) => ResourceHealth {
                id: id.clone(),
                state: HealthState::Unknown,
                ready: None,
                desired: None,
                message: Some(e.to_string()),
            },
        }
    }

    /// A Deployment is healthy when every replica is updated, ready, and
    /// available
    async fn check_deployment(&self, namespace: &str, name: &str) -> CheckResult {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = match api.get(name).await {
            Ok(d) => d,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok((
                    HealthState::Progressing,
                    Some(0),
                    None,
                    Some("not found".to_string()),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let spec = deployment.spec.as_ref();
        let status = deployment.status.as_ref();

        let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
        let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

        let state = if ready == desired && updated == desired && available == desired {
            HealthState::Healthy
        } else {
            HealthState::Progressing
        };

        let message = (state != HealthState::Healthy).then(|| {
            format!(
                "{}/{} ready, {}/{} updated, {}/{} available",
                ready, desired, updated, desired, available, desired
            )
        });

        Ok((state, Some(ready), Some(desired), message))
    }

    /// A StatefulSet is healthy when all replicas are ready and the rollout
    /// revision has converged
    async fn check_statefulset(&self, namespace: &str, name: &str) -> CheckResult {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let sts = match api.get(name).await {
            Ok(s) => s,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok((
                    HealthState::Progressing,
                    Some(0),
                    None,
                    Some("not found".to_string()),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let spec = sts.spec.as_ref();
        let status = sts.status.as_ref();

        let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let revision_match = status.and_then(|s| s.current_revision.as_ref())
            == status.and_then(|s| s.update_revision.as_ref());

        let state = if ready == desired && revision_match {
            HealthState::Healthy
        } else {
            HealthState::Progressing
        };

        let message = (state != HealthState::Healthy).then(|| {
            format!(
                "{}/{} ready, revision converged: {}",
                ready, desired, revision_match
            )
        });

        Ok((state, Some(ready), Some(desired), message))
    }

    /// A DaemonSet is healthy when every scheduled pod is ready and updated
    async fn check_daemonset(&self, namespace: &str, name: &str) -> CheckResult {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let ds = match api.get(name).await {
            Ok(d) => d,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok((
                    HealthState::Progressing,
                    Some(0),
                    None,
                    Some("not found".to_string()),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let status = ds.status.as_ref();
        let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
        let ready = status.map(|s| s.number_ready).unwrap_or(0);
        let updated = status.and_then(|s| s.updated_number_scheduled).unwrap_or(0);

        let state = if desired > 0 && ready == desired && updated == desired {
            HealthState::Healthy
        } else {
            HealthState::Progressing
        };

        let message = (state != HealthState::Healthy).then(|| {
            format!("{}/{} ready, {}/{} updated", ready, desired, updated, desired)
        });

        Ok((state, Some(ready), Some(desired), message))
    }

    /// A Job is healthy once it completed; a permanently failed Job is
    /// degraded
    async fn check_job(&self, namespace: &str, name: &str) -> CheckResult {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = match api.get(name).await {
            Ok(j) => j,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok((
                    HealthState::Progressing,
                    Some(0),
                    Some(1),
                    Some("not found".to_string()),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let status = job.status.as_ref();
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);
        let active = status.and_then(|s| s.active).unwrap_or(0);

        let failed_condition = status
            .and_then(|s| s.conditions.as_ref())
            .map(|c| c.iter().any(|cond| cond.type_ == "Failed" && cond.status == "True"))
            .unwrap_or(false);

        let (state, message) = if succeeded > 0 {
            (HealthState::Healthy, None)
        } else if failed_condition || (failed > 0 && active == 0) {
            (
                HealthState::Degraded,
                Some(format!("job failed after {} attempt(s)", failed)),
            )
        } else {
            (
                HealthState::Progressing,
                Some(format!("{} active, {} succeeded", active, succeeded)),
            )
        };

        Ok((state, Some(succeeded), Some(1), message))
    }

    /// Pods owned by this environment that are stuck in a crash or image-pull
    /// loop
    async fn crash_looping_pods(&self, env: &Environment) -> Vec<ResourceHealth> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &env.namespace);
        let lp = ListParams::default().labels(&ownership_selector(&env.name));

        let pods = match api.list(&lp).await {
            Ok(list) => list.items,
            Err(e) => {
                return vec![ResourceHealth {
                    id: ResourceId::namespaced("Pod", &env.namespace, "*"),
                    state: HealthState::Unknown,
                    ready: None,
                    desired: None,
                    message: Some(format!("failed to list pods: {}", e)),
                }];
            }
        };

        let mut degraded = Vec::new();
        for pod in pods {
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            let statuses = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref());
            let Some(statuses) = statuses else { continue };

            for cs in statuses {
                let reason = cs
                    .state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.as_deref());
                if let Some(reason) = reason
                    && is_crash_reason(reason)
                {
                    degraded.push(ResourceHealth {
                        id: ResourceId::namespaced("Pod", &env.namespace, &name),
                        state: HealthState::Degraded,
                        ready: None,
                        desired: None,
                        message: Some(format!("container '{}': {}", cs.name, reason)),
                    });
                    break;
                }
            }
        }
        degraded
    }
}

type CheckResult =
    Result<(HealthState, Option<i32>, Option<i32>, Option<String>)>;

fn spec_skips_health(value: &serde_yaml::Value) -> bool {
    let annotations: BTreeMap<String, String> = value
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| serde_yaml::from_value(a.clone()).ok())
        .unwrap_or_default();
    skips_health(&annotations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: &str, name: &str, state: HealthState) -> ResourceHealth {
        ResourceHealth {
            id: ResourceId::namespaced(kind, "dev", name),
            state,
            ready: Some(1),
            desired: Some(1),
            message: None,
        }
    }

    #[test]
    fn test_rollup_is_worst_of() {
        assert_eq!(rollup(&[]), HealthState::Healthy);
        assert_eq!(
            rollup(&[resource("Deployment", "a", HealthState::Healthy)]),
            HealthState::Healthy
        );
        assert_eq!(
            rollup(&[
                resource("Deployment", "a", HealthState::Healthy),
                resource("Deployment", "b", HealthState::Progressing),
            ]),
            HealthState::Progressing
        );
        assert_eq!(
            rollup(&[
                resource("Deployment", "a", HealthState::Progressing),
                resource("Pod", "b", HealthState::Degraded),
                resource("Job", "c", HealthState::Unknown),
            ]),
            HealthState::Degraded
        );
        assert_eq!(
            rollup(&[
                resource("Deployment", "a", HealthState::Healthy),
                resource("Job", "c", HealthState::Unknown),
            ]),
            HealthState::Unknown
        );
    }

    #[test]
    fn test_checkable_kinds() {
        assert!(checkable("Deployment"));
        assert!(checkable("Job"));
        assert!(!checkable("Service"));
        assert!(!checkable("ConfigMap"));
    }

    #[test]
    fn test_crash_reasons() {
        assert!(is_crash_reason("CrashLoopBackOff"));
        assert!(is_crash_reason("ImagePullBackOff"));
        assert!(!is_crash_reason("ContainerCreating"));
    }

    #[test]
    fn test_skip_health_annotation() {
        let with: serde_yaml::Value = serde_yaml::from_str(
            "metadata:\n  annotations:\n    converge.io/skip-health: \"true\"\n",
        )
        .unwrap();
        let without: serde_yaml::Value = serde_yaml::from_str("metadata:\n  name: x\n").unwrap();
        assert!(spec_skips_health(&with));
        assert!(!spec_skips_health(&without));
    }

    #[test]
    fn test_environment_health_summary() {
        let healthy = EnvironmentHealth::new(
            "development",
            vec![resource("Deployment", "web", HealthState::Healthy)],
        );
        assert_eq!(healthy.state, HealthState::Healthy);
        assert!(healthy.summary().contains("1 resources ready"));

        let degraded = EnvironmentHealth::new(
            "development",
            vec![
                resource("Deployment", "web", HealthState::Healthy),
                resource("Pod", "web-abc", HealthState::Degraded),
            ],
        );
        assert_eq!(degraded.state, HealthState::Degraded);
        assert!(degraded.summary().contains("dev/Pod/web-abc"));
    }

    #[test]
    fn test_readiness_display() {
        let r = resource("Deployment", "web", HealthState::Healthy);
        assert_eq!(r.readiness_display(), "1/1");

        let unknown = ResourceHealth {
            id: ResourceId::namespaced("Job", "dev", "migrate"),
            state: HealthState::Unknown,
            ready: None,
            desired: None,
            message: None,
        };
        assert_eq!(unknown.readiness_display(), "unknown");
    }
}
