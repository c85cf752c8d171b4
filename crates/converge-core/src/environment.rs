//! Environment definitions and configuration loading
//!
//! An environment is one deployment target: a namespace, a sync policy, and
//! the knobs the reconciler needs (timeouts, exposure, quota). Environments
//! are declared statically in a YAML file and only change through config
//! edits; they are never created or deleted by the reconciler itself.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// How an environment's sync decisions are made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPolicy {
    /// Apply every delta, including drift caused by out-of-band changes
    AutoSelfHeal,
    /// Apply deltas from new revisions; hold drift for approval
    Auto,
    /// Hold every delta; apply only on explicit trigger
    Manual,
}

impl SyncPolicy {
    /// Whether drift is corrected without operator involvement
    pub fn self_heals(&self) -> bool {
        matches!(self, SyncPolicy::AutoSelfHeal)
    }

    /// Whether new revisions apply without operator involvement
    pub fn is_automatic(&self) -> bool {
        matches!(self, SyncPolicy::AutoSelfHeal | SyncPolicy::Auto)
    }
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPolicy::AutoSelfHeal => write!(f, "auto-self-heal"),
            SyncPolicy::Auto => write!(f, "auto"),
            SyncPolicy::Manual => write!(f, "manual"),
        }
    }
}

/// Whether the environment's service is reachable from outside the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceExposure {
    #[default]
    Internal,
    External,
}

/// Optional per-environment resource quota
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Independently configurable timeouts for one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Live-state snapshot timeout
    #[serde(default = "default_observe_timeout", with = "humantime_serde")]
    pub observe: Duration,

    /// Per-operation apply timeout
    #[serde(default = "default_apply_timeout", with = "humantime_serde")]
    pub apply: Duration,

    /// Overall health evaluation timeout
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub health: Duration,

    /// Interval between health polls
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub health_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            observe: default_observe_timeout(),
            apply: default_apply_timeout(),
            health: default_health_timeout(),
            health_interval: default_health_interval(),
        }
    }
}

fn default_observe_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_apply_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

/// One deployment target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Environment name (unique across the set)
    pub name: String,

    /// Kubernetes namespace (unique across the set; cross-environment
    /// comparison is forbidden, so namespaces must not be shared)
    pub namespace: String,

    /// Desired replica count for the environment's workload
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Service exposure mode
    #[serde(default)]
    pub exposure: ServiceExposure,

    /// Optional resource quota
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<ResourceBudget>,

    /// Sync policy
    pub policy: SyncPolicy,

    /// Prune live resources no longer present in desired state
    #[serde(default)]
    pub prune: bool,

    /// Manifest path within the source, relative to the source root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Timeouts for this environment
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_replicas() -> i32 {
    1
}

impl Environment {
    /// Manifest path for this environment, defaulting to its name
    pub fn manifest_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

/// The full set of configured environments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSet {
    pub environments: Vec<Environment>,
}

impl EnvironmentSet {
    /// Parse and validate an environment set from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: EnvironmentSet = serde_yaml::from_str(yaml)?;
        set.validate()?;
        Ok(set)
    }

    /// Load an environment set from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Look up an environment by name
    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Validate uniqueness invariants
    ///
    /// Environment-level namespace partitioning is a deployment precondition:
    /// two environments sharing a namespace would let one environment's
    /// reconciliation see (and prune) the other's resources.
    fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(CoreError::InvalidConfig(
                "no environments configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut namespaces = HashSet::new();

        for env in &self.environments {
            if env.name.is_empty() {
                return Err(CoreError::InvalidConfig(
                    "environment with empty name".to_string(),
                ));
            }
            if env.namespace.is_empty() {
                return Err(CoreError::InvalidConfig(format!(
                    "environment '{}' has an empty namespace",
                    env.name
                )));
            }
            if !names.insert(env.name.clone()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate environment name '{}'",
                    env.name
                )));
            }
            if !namespaces.insert(env.namespace.clone()) {
                return Err(CoreError::InvalidConfig(format!(
                    "namespace '{}' is shared by more than one environment",
                    env.namespace
                )));
            }
            if env.replicas < 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "environment '{}' has a negative replica count",
                    env.name
                )));
            }
        }

        Ok(())
    }
}
