//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("failed to parse resource {identity}: {message}")]
    ParseError { identity: String, message: String },

    #[error("duplicate resource identity: {identity}")]
    DuplicateResource { identity: String },

    #[error("invalid environment configuration: {0}")]
    InvalidConfig(String),

    #[error("environment mismatch: desired state is for '{desired}', live state is for '{live}'")]
    EnvironmentMismatch { desired: String, live: String },

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
