//! Desired and live state snapshots
//!
//! `DesiredState` is built once per source revision and never mutated;
//! `LiveState` is a point-in-time snapshot taken fresh on every
//! reconciliation pass and discarded afterwards, so stale reads cannot leak
//! between passes.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{CoreError, Result};
use crate::resource::{ResourceId, ResourceSpec};

/// The resolved set of resource specifications for one environment at one
/// source revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredState {
    /// Owning environment name
    pub environment: String,

    /// Source revision this state was resolved from
    pub revision: String,

    /// Resources keyed by identity, in manifest order
    pub resources: IndexMap<ResourceId, ResourceSpec>,
}

impl DesiredState {
    /// Build a desired state, rejecting duplicate identities
    pub fn new(
        environment: impl Into<String>,
        revision: impl Into<String>,
        specs: Vec<ResourceSpec>,
    ) -> Result<Self> {
        let mut resources = IndexMap::with_capacity(specs.len());
        for spec in specs {
            let id = spec.id.clone();
            if resources.insert(id.clone(), spec).is_some() {
                return Err(CoreError::DuplicateResource {
                    identity: id.to_string(),
                });
            }
        }

        Ok(Self {
            environment: environment.into(),
            revision: revision.into(),
            resources,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

/// One resource as observed in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Resource identity
    pub id: ResourceId,

    /// The observed specification (including cluster-defaulted fields)
    pub value: Value,

    /// resourceVersion at observation time, for optimistic concurrency
    pub resource_version: Option<String>,

    /// Whether this resource carries Converge's ownership labels for the
    /// observed environment
    pub owned: bool,
}

/// The observed set of resources for one environment
///
/// Read-only to the reconciliation core; the cluster mutates it underneath
/// us continuously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveState {
    /// Owning environment name
    pub environment: String,

    /// Snapshot timestamp
    pub observed_at: DateTime<Utc>,

    /// Resources keyed by identity
    pub resources: IndexMap<ResourceId, ObservedResource>,
}

impl LiveState {
    /// Empty snapshot for an environment with nothing running
    pub fn empty(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            observed_at: Utc::now(),
            resources: IndexMap::new(),
        }
    }

    /// Build a snapshot from observed resources
    pub fn new(environment: impl Into<String>, observed: Vec<ObservedResource>) -> Self {
        let mut resources = IndexMap::with_capacity(observed.len());
        for res in observed {
            resources.insert(res.id.clone(), res);
        }
        Self {
            environment: environment.into(),
            observed_at: Utc::now(),
            resources,
        }
    }

    /// resourceVersion of a live resource, if observed
    pub fn resource_version(&self, id: &ResourceId) -> Option<&str> {
        self.resources
            .get(id)
            .and_then(|r| r.resource_version.as_deref())
    }
}
