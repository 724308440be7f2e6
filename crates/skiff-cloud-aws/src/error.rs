//! AWS provider error types and error-class helpers.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use skiff_cloud::{CloudError, RetryError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("{context}: {code}: {message}")]
    Api {
        context: String,
        code: String,
        message: String,
    },

    #[error("{what} timed out after {elapsed:?}")]
    Timeout { what: String, elapsed: Duration },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("unknown OS: {0}")]
    UnknownOs(String),

    #[error("no images found for {0}")]
    NoImagesFound(String),

    #[error("invalid architecture: \"{0}\" (supported: x86_64, arm64)")]
    InvalidArchitecture(String),

    #[error(
        "architecture mismatch: instance type {instance_type} does not support architecture {architecture}"
    )]
    ArchitectureMismatch {
        instance_type: String,
        architecture: String,
    },

    #[error("{failed} of {total} instances failed: {details}")]
    InstancePool {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("could not detect operator public IP: {0}")]
    IpDetection(String),

    #[error("unexpected API response: missing {0}")]
    MissingField(&'static str),
}

impl AwsError {
    /// The resource no longer exists (or was never attached). During
    /// deletion these are success, not failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            AwsError::Api { code, message, .. } => {
                let code = code.to_lowercase();
                let message = message.to_lowercase();
                code.contains("notfound")
                    || code.contains("not_found")
                    || code.contains("notattached")
                    || message.contains("does not exist")
                    || message.contains("not found")
            }
            _ => false,
        }
    }

    /// A delete was rejected because something still depends on the
    /// resource. Retried: dependents (ENIs, instances) release with time.
    pub fn is_dependency_violation(&self) -> bool {
        match self {
            AwsError::Api { code, message, .. } => {
                let code = code.to_lowercase();
                let message = message.to_lowercase();
                code.contains("dependencyviolation")
                    || code.contains("resourceinuse")
                    || message.contains("in use")
                    || message.contains("has dependencies")
            }
            _ => false,
        }
    }
}

/// Convert an SDK error, keeping the service error code so the deletion
/// pipeline can classify "already gone" and "still in use" responses.
pub(crate) fn sdk_err<E, R>(context: &str, err: SdkError<E, R>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}", DisplayErrorContext(&err)));
    AwsError::Api {
        context: context.to_string(),
        code,
        message,
    }
}

impl From<RetryError<AwsError>> for AwsError {
    fn from(err: RetryError<AwsError>) -> Self {
        match err {
            RetryError::Operation(inner) => inner,
            RetryError::DeadlineElapsed { operation } => AwsError::Cancelled(operation),
        }
    }
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::ArchitectureMismatch {
                instance_type,
                architecture,
            } => CloudError::ArchitectureMismatch {
                instance_type,
                architecture,
            },
            AwsError::InstancePool {
                failed,
                total,
                details,
            } => CloudError::InstancePool {
                failed,
                total,
                details,
            },
            AwsError::UnknownOs(_)
            | AwsError::NoImagesFound(_)
            | AwsError::InvalidArchitecture(_) => CloudError::ImageResolution(err.to_string()),
            AwsError::Timeout { .. } => CloudError::Timeout(err.to_string()),
            AwsError::Cancelled(what) => CloudError::Cancelled(what),
            AwsError::Validation(msg) | AwsError::IpDetection(msg) => CloudError::Validation(msg),
            other => CloudError::Api(other.to_string()),
        }
    }
}

pub type AwsResult<T> = std::result::Result<T, AwsError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: &str, message: &str) -> AwsError {
        AwsError::Api {
            context: "test".to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn not_found_classification() {
        assert!(api("InvalidInstanceID.NotFound", "gone").is_not_found());
        assert!(api("InvalidGroup.NotFound", "gone").is_not_found());
        assert!(api("Gateway.NotAttached", "detached already").is_not_found());
        assert!(api("Unknown", "The vpc 'vpc-1' does not exist").is_not_found());
        assert!(!api("DependencyViolation", "still referenced").is_not_found());
        assert!(!AwsError::UnknownOs("plan9".to_string()).is_not_found());
    }

    #[test]
    fn dependency_violation_classification() {
        assert!(api("DependencyViolation", "has dependent objects").is_dependency_violation());
        assert!(api("ResourceInUse", "busy").is_dependency_violation());
        assert!(api("Unknown", "resource sg-1 is in use").is_dependency_violation());
        assert!(!api("InvalidGroup.NotFound", "gone").is_dependency_violation());
    }

    #[test]
    fn architecture_mismatch_maps_through() {
        let err: CloudError = AwsError::ArchitectureMismatch {
            instance_type: "t3.medium".to_string(),
            architecture: "arm64".to_string(),
        }
        .into();
        let text = err.to_string();
        assert!(text.contains("architecture mismatch"));
        assert!(text.contains("arm64"));
        assert!(text.contains("t3.medium"));
    }
}
