//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - environment set invalid or unreadable
pub const CONFIG_ERROR: i32 = 2;

/// Source error - revision unreachable or manifests unparsable
pub const SOURCE_ERROR: i32 = 3;

/// Cluster error - API server unreachable or observation failed
pub const CLUSTER_ERROR: i32 = 4;

/// Sync failed - the apply did not reach a successful outcome
pub const SYNC_FAILED: i32 = 5;

/// Degraded - the sync applied but health did not reach Healthy
pub const DEGRADED: i32 = 6;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
