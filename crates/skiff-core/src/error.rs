use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("spec file not found: {0}")]
    SpecFileNotFound(PathBuf),

    #[error("environment name must not be empty")]
    EmptyName,

    #[error("region must be set")]
    MissingRegion,

    #[error("auth: key_name and private_key_path must both be set")]
    MissingKeyMaterial,

    #[error("private key not found: {0}")]
    PrivateKeyNotFound(PathBuf),

    #[error("cluster: control plane count must be at least 1")]
    EmptyControlPlane,

    #[error("invalid CIDR range: {0}")]
    InvalidCidr(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, SpecError>;
