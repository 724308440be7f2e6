//! Shared error taxonomy for cloud providers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    /// Pre-flight validation failure. No cloud call has been made.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Spec(#[from] skiff_core::SpecError),

    #[error("image resolution failed: {0}")]
    ImageResolution(String),

    #[error(
        "architecture mismatch: instance type {instance_type} does not support architecture {architecture}"
    )]
    ArchitectureMismatch {
        instance_type: String,
        architecture: String,
    },

    #[error("API error: {0}")]
    Api(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Aggregated failure of an instance-pool fan-out. Siblings that were
    /// created successfully are left in place for operator inspection.
    #[error("{failed} of {total} instances failed: {details}")]
    InstancePool {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("state file error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
