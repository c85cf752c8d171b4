//! Error types for converge-kube

use thiserror::Error;

/// Result type for converge-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during cluster operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The cluster could not be reached while taking a live-state snapshot
    #[error("cluster unreachable: {message}")]
    ClusterUnreachable { message: String },

    /// An update lost the optimistic concurrency race and retries ran out
    #[error("apply conflict on {id}: resource version changed {attempts} times")]
    ApplyConflict { id: String, attempts: u32 },

    /// The API server rejected an operation as invalid (HTTP 400/422)
    #[error("apply rejected for {id}: {message}")]
    ApplyRejected { id: String, message: String },

    /// A desired resource kind is not served by this cluster
    #[error("unknown resource kind '{kind}' (apiVersion '{api_version}')")]
    UnknownKind { api_version: String, kind: String },

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Desired-state source failure
    #[error(transparent)]
    Source(#[from] converge_source::SourceError),

    /// Core model failure (parse, diff)
    #[error(transparent)]
    Core(#[from] converge_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Check if this is an invalid-object rejection (400/422)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            KubeError::Api(kube::Error::Api(resp)) if resp.code == 400 || resp.code == 422
        ) || matches!(self, KubeError::ApplyRejected { .. })
    }

    /// Check if retrying could succeed
    ///
    /// Conflicts, server-side errors, throttling, and transport failures are
    /// transient; validation rejections and unknown kinds are not.
    pub fn is_transient(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.code == 429 || resp.code >= 500
            }
            KubeError::Api(_) => true,
            KubeError::ClusterUnreachable { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> KubeError {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_conflict_classification() {
        assert!(api_error(409).is_conflict());
        assert!(api_error(409).is_transient());
        assert!(!api_error(409).is_rejection());
    }

    #[test]
    fn test_rejection_is_not_transient() {
        assert!(api_error(422).is_rejection());
        assert!(!api_error(422).is_transient());
        assert!(api_error(400).is_rejection());
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(api_error(500).is_transient());
        assert!(api_error(503).is_transient());
        assert!(api_error(429).is_transient());
        assert!(!api_error(404).is_transient());
    }

    #[test]
    fn test_not_found() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
    }
}
