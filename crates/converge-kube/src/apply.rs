//! Tiered delta application
//!
//! Key features:
//! - Creates and updates run tier by tier in dependency order; deletes run
//!   after all applies, in reverse tier order
//! - Operations within one tier run concurrently
//! - Updates overlay the desired document onto the observed live object, so
//!   cluster-populated immutable fields survive the replace
//! - A 409 re-reads the live object and retries with bounded exponential
//!   backoff; validation rejections (400/422) are fatal and stop the
//!   remaining tiers, leaving a partial outcome
//! - An abort signal stops the pass at the next tier boundary; completed
//!   operations are left in place

use std::time::Duration;

use kube::{
    Client,
    api::{DeleteParams, DynamicObject, PostParams},
    discovery::Discovery,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use converge_core::{
    Backoff, Delta, DesiredState, Environment, LiveState, OpKind, Operation, ResourceId,
    ResourceSpec, labels::ownership_labels,
};

use crate::dynamic::resolve_api;
use crate::error::{KubeError, Result};

/// What one apply pass actually did
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Operations that completed
    pub applied: Vec<ResourceId>,

    /// Operations that failed, with their causes
    pub failed: Vec<(ResourceId, String)>,

    /// Whether the pass was stopped by an abort signal
    pub aborted: bool,
}

impl ApplyReport {
    /// Fold the report into a terminal sync outcome
    pub fn into_outcome(self) -> converge_core::SyncOutcome {
        use converge_core::SyncOutcome;
        if self.aborted {
            SyncOutcome::Aborted {
                applied: self.applied,
            }
        } else if self.failed.is_empty() {
            SyncOutcome::Succeeded
        } else if self.applied.is_empty() {
            let cause = self
                .failed
                .iter()
                .map(|(id, msg)| format!("{}: {}", id, msg))
                .collect::<Vec<_>>()
                .join("; ");
            SyncOutcome::Failed { cause }
        } else {
            SyncOutcome::Partial {
                applied: self.applied,
                failed: self.failed,
            }
        }
    }
}

/// Group a delta's operations into execution order
///
/// Creates and updates first, grouped by ascending tier; deletes after every
/// apply completed, grouped by descending tier. Each group may run its
/// operations concurrently; groups themselves are strictly sequential.
pub fn plan(delta: &Delta) -> Vec<Vec<Operation>> {
    let mut groups = Vec::new();

    for tier in converge_core::ApplyTier::ordered() {
        let ops: Vec<Operation> = delta
            .operations
            .iter()
            .filter(|op| op.tier == tier && !matches!(op.kind, OpKind::Delete))
            .cloned()
            .collect();
        if !ops.is_empty() {
            groups.push(ops);
        }
    }

    for tier in converge_core::ApplyTier::ordered().into_iter().rev() {
        let ops: Vec<Operation> = delta
            .operations
            .iter()
            .filter(|op| op.tier == tier && matches!(op.kind, OpKind::Delete))
            .cloned()
            .collect();
        if !ops.is_empty() {
            groups.push(ops);
        }
    }

    groups
}

/// Applies deltas to the cluster
pub struct Applier {
    client: Client,
    discovery: Discovery,
}

impl Applier {
    /// Create a new applier, running API discovery once up front
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

    /// Apply a delta
    ///
    /// `live` supplies the observed objects updates are merged onto and the
    /// apiVersion for delete targets. The abort receiver is checked before
    /// every tier; a raised flag stops the pass without rolling anything
    /// back.
    pub async fn apply(
        &self,
        env: &Environment,
        desired: &DesiredState,
        live: &LiveState,
        delta: &Delta,
        abort: &watch::Receiver<bool>,
    ) -> ApplyReport {
        let report =
            run_groups(plan(delta), abort, |op| self.apply_one(env, desired, live, op)).await;

        if report.aborted {
            warn!(environment = %env.name, "sync aborted between tiers");
        }
        info!(
            environment = %env.name,
            applied = report.applied.len(),
            failed = report.failed.len(),
            aborted = report.aborted,
            "apply pass finished"
        );
        report
    }

    async fn apply_one(
        &self,
        env: &Environment,
        desired: &DesiredState,
        live: &LiveState,
        op: Operation,
    ) -> Result<()> {
        match op.kind {
            OpKind::Create => {
                let spec = desired_spec(desired, &op.id)?;
                self.create(env, spec, &op.id).await
            }
            OpKind::Update { resource_version } => {
                let spec = desired_spec(desired, &op.id)?;
                let observed = live.resources.get(&op.id).map(|r| &r.value);
                self.update(env, spec, &op.id, observed, resource_version)
                    .await
            }
            OpKind::Delete => {
                let api_version = live
                    .resources
                    .get(&op.id)
                    .and_then(|r| r.value.get("apiVersion"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        KubeError::InvalidManifest(format!(
                            "delete target {} missing from live snapshot",
                            op.id
                        ))
                    })?
                    .to_string();
                self.delete(env, &api_version, &op.id).await
            }
        }
    }

    async fn create(&self, env: &Environment, spec: &ResourceSpec, id: &ResourceId) -> Result<()> {
        let (api, _) = resolve_api(
            &self.client,
            &self.discovery,
            &spec.api_version,
            &id.kind,
            &env.namespace,
        )?;
        let obj = to_dynamic(spec, &env.name)?;

        let mut backoff = Backoff::for_apply();
        loop {
            let err = match self
                .bounded(env, api.create(&PostParams::default(), &obj))
                .await
            {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => KubeError::Api(e),
                Err(e) => e,
            };

            // AlreadyExists: someone created it since the snapshot. Switch to
            // an update against the current object.
            if err.is_conflict() {
                return self.update(env, spec, id, None, None).await;
            }
            if !err.is_transient() {
                return Err(fatal(id, err));
            }
            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            }
        }
    }

    /// Replace a live resource with the desired document merged over it
    ///
    /// The observed object is the base, so server-populated fields a replace
    /// must round-trip (a Service's clusterIP, a PVC's volumeName) are kept.
    /// The resourceVersion rides along; a 409 re-reads the object and
    /// retries against the fresh base.
    async fn update(
        &self,
        env: &Environment,
        spec: &ResourceSpec,
        id: &ResourceId,
        observed: Option<&serde_yaml::Value>,
        resource_version: Option<String>,
    ) -> Result<()> {
        let (api, _) = resolve_api(
            &self.client,
            &self.discovery,
            &spec.api_version,
            &id.kind,
            &env.namespace,
        )?;
        let desired = desired_json(spec, &env.name)?;

        let (mut base, mut revision) = match (observed, resource_version) {
            (Some(value), Some(rv)) => (serde_json::to_value(value)?, rv),
            _ => self.read_current(&api, env, id).await?,
        };

        let mut backoff = Backoff::for_apply();
        loop {
            let mut body = merge_for_replace(&desired, &base);
            set_resource_version(&mut body, &revision);
            let obj: DynamicObject = serde_json::from_value(body)?;

            let err = match self
                .bounded(env, api.replace(&id.name, &PostParams::default(), &obj))
                .await
            {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => KubeError::Api(e),
                Err(e) => e,
            };

            match update_step(err, &mut backoff, id) {
                UpdateStep::Retry(delay) => tokio::time::sleep(delay).await,
                UpdateStep::Refresh(delay) => {
                    tokio::time::sleep(delay).await;
                    (base, revision) = self.read_current(&api, env, id).await?;
                }
                UpdateStep::GiveUp(err) => return Err(err),
            }
        }
    }

    async fn delete(&self, env: &Environment, api_version: &str, id: &ResourceId) -> Result<()> {
        let (api, _) = resolve_api(
            &self.client,
            &self.discovery,
            api_version,
            &id.kind,
            &env.namespace,
        )?;

        let mut backoff = Backoff::for_apply();
        loop {
            let err = match self
                .bounded(env, api.delete(&id.name, &DeleteParams::background()))
                .await
            {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(kube::Error::Api(resp))) if resp.code == 404 => return Ok(()),
                Ok(Err(e)) => KubeError::Api(e),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(fatal(id, err));
            }
            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            }
        }
    }

    /// Current live object and its resourceVersion
    async fn read_current(
        &self,
        api: &kube::Api<DynamicObject>,
        env: &Environment,
        id: &ResourceId,
    ) -> Result<(serde_json::Value, String)> {
        let obj = match self.bounded(env, api.get(&id.name)).await {
            Ok(Ok(obj)) => obj,
            Ok(Err(e)) => return Err(fatal(id, KubeError::Api(e))),
            Err(e) => return Err(e),
        };
        let revision = obj
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest(format!("{} has no resourceVersion", id)))?;
        Ok((serde_json::to_value(&obj)?, revision))
    }

    /// Bound one API call by the environment's apply timeout
    async fn bounded<T, F>(&self, env: &Environment, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::time::timeout(env.timeouts.apply, fut)
            .await
            .map_err(|_| KubeError::ClusterUnreachable {
                message: format!("operation timed out after {:?}", env.timeouts.apply),
            })
    }
}

/// Execute planned groups with a per-operation executor
///
/// Groups run sequentially; operations within a group run concurrently. A
/// failed group stops the ones after it, and a raised abort flag stops the
/// pass at the next group boundary.
async fn run_groups<F, Fut>(
    groups: Vec<Vec<Operation>>,
    abort: &watch::Receiver<bool>,
    exec: F,
) -> ApplyReport
where
    F: Fn(Operation) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut report = ApplyReport::default();

    for group in groups {
        if *abort.borrow() {
            report.aborted = true;
            break;
        }

        let results = futures::future::join_all(group.into_iter().map(|op| {
            let id = op.id.clone();
            let fut = exec(op);
            async move { (id, fut.await) }
        }))
        .await;

        let mut group_failed = false;
        for (id, result) in results {
            match result {
                Ok(()) => {
                    debug!(resource = %id, "operation applied");
                    report.applied.push(id);
                }
                Err(e) => {
                    warn!(resource = %id, error = %e, "operation failed");
                    report.failed.push((id, e.to_string()));
                    group_failed = true;
                }
            }
        }

        // A tier must fully succeed before its dependents run
        if group_failed {
            break;
        }
    }

    report
}

/// What to do after one failed replace attempt
#[derive(Debug)]
enum UpdateStep {
    /// Transient failure; retry the same body after the delay
    Retry(Duration),
    /// Conflict; re-read the live object and retry against it
    Refresh(Duration),
    /// Terminal failure
    GiveUp(KubeError),
}

/// Classify one failed replace attempt against the retry schedule
fn update_step(err: KubeError, backoff: &mut Backoff, id: &ResourceId) -> UpdateStep {
    if err.is_conflict() {
        return match backoff.next_delay() {
            Some(delay) => UpdateStep::Refresh(delay),
            None => UpdateStep::GiveUp(KubeError::ApplyConflict {
                id: id.to_string(),
                attempts: backoff.attempts(),
            }),
        };
    }
    if !err.is_transient() {
        return UpdateStep::GiveUp(fatal(id, err));
    }
    match backoff.next_delay() {
        Some(delay) => UpdateStep::Retry(delay),
        None => UpdateStep::GiveUp(err),
    }
}

/// The desired document as JSON with ownership labels stamped in
fn desired_json(spec: &ResourceSpec, environment: &str) -> Result<serde_json::Value> {
    let mut json: serde_json::Value = serde_json::to_value(&spec.value)?;

    let metadata = json
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidManifest(format!("{} is not a mapping", spec.id)))?
        .entry("metadata")
        .or_insert_with(|| serde_json::json!({}));
    let labels = metadata
        .as_object_mut()
        .ok_or_else(|| {
            KubeError::InvalidManifest(format!("{} metadata is not a mapping", spec.id))
        })?
        .entry("labels")
        .or_insert_with(|| serde_json::json!({}));
    if let Some(labels) = labels.as_object_mut() {
        for (key, value) in ownership_labels(environment) {
            labels.insert(key, serde_json::Value::String(value));
        }
    }

    Ok(json)
}

/// Build the object a create sends
fn to_dynamic(spec: &ResourceSpec, environment: &str) -> Result<DynamicObject> {
    Ok(serde_json::from_value(desired_json(spec, environment)?)?)
}

/// Overlay the desired document onto the observed live object
///
/// Mappings merge recursively with desired keys winning; keys only the live
/// side has are kept. A desired null removes the field; sequences are taken
/// from the desired side whole.
fn merge_for_replace(desired: &serde_json::Value, live: &serde_json::Value) -> serde_json::Value {
    match (desired, live) {
        (serde_json::Value::Object(d), serde_json::Value::Object(l)) => {
            let mut merged = l.clone();
            for (key, dv) in d {
                if dv.is_null() {
                    merged.remove(key);
                    continue;
                }
                let entry = match merged.get(key) {
                    Some(lv) => merge_for_replace(dv, lv),
                    None => dv.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            serde_json::Value::Object(merged)
        }
        _ => desired.clone(),
    }
}

fn set_resource_version(body: &mut serde_json::Value, revision: &str) {
    if let Some(metadata) = body.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        metadata.insert(
            "resourceVersion".to_string(),
            serde_json::Value::String(revision.to_string()),
        );
    }
}

fn desired_spec<'a>(desired: &'a DesiredState, id: &ResourceId) -> Result<&'a ResourceSpec> {
    desired
        .resources
        .get(id)
        .ok_or_else(|| KubeError::InvalidManifest(format!("{} missing from desired state", id)))
}

/// Promote a validation rejection into its dedicated error
fn fatal(id: &ResourceId, err: KubeError) -> KubeError {
    if err.is_rejection() {
        KubeError::ApplyRejected {
            id: id.to_string(),
            message: err.to_string(),
        }
    } else {
        err
    }
}
