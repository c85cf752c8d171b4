//! CLI error types with exit code handling
//!
//! Unified error type mapping every failure class to a stable exit code so
//! scripts and CI pipelines can branch on what went wrong.

use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Environment configuration invalid or unreadable
    #[error("configuration error: {message}")]
    #[diagnostic(code(converge::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Desired-state source failure
    #[error("source error: {message}")]
    #[diagnostic(code(converge::cli::source))]
    Source { message: String },

    /// Cluster interaction failure
    #[error("cluster error: {message}")]
    #[diagnostic(code(converge::cli::cluster))]
    Cluster { message: String },

    /// The sync ran but did not succeed
    #[error("sync failed: {message}")]
    #[diagnostic(code(converge::cli::sync))]
    SyncFailed { message: String },

    /// The sync applied but the environment is not healthy
    #[error("environment degraded: {message}")]
    #[diagnostic(code(converge::cli::health))]
    Degraded { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(converge::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("internal error: {message}")]
    #[diagnostic(code(converge::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Source { .. } => exit_codes::SOURCE_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::SyncFailed { .. } => exit_codes::SYNC_FAILED,
            CliError::Degraded { .. } => exit_codes::DEGRADED,
            CliError::Io { .. } => exit_codes::ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn sync_failed(message: impl Into<String>) -> Self {
        Self::SyncFailed {
            message: message.into(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::Degraded {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<converge_core::CoreError> for CliError {
    fn from(err: converge_core::CoreError) -> Self {
        CliError::Config {
            message: err.to_string(),
            help: None,
        }
    }
}

impl From<converge_source::SourceError> for CliError {
    fn from(err: converge_source::SourceError) -> Self {
        CliError::Source {
            message: err.to_string(),
        }
    }
}

impl From<converge_kube::KubeError> for CliError {
    fn from(err: converge_kube::KubeError) -> Self {
        CliError::Cluster {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_failure_class() {
        let errors = [
            CliError::config("bad"),
            CliError::Source {
                message: "bad".to_string(),
            },
            CliError::Cluster {
                message: "bad".to_string(),
            },
            CliError::sync_failed("bad"),
            CliError::degraded("bad"),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_kube_error_maps_to_cluster() {
        let err: CliError = converge_kube::KubeError::ClusterUnreachable {
            message: "connection refused".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::CLUSTER_ERROR);
    }
}
