//! Spec file loading.

use crate::error::{Result, SpecError};
use crate::model::EnvironmentSpec;
use std::path::Path;

/// Load and validate an environment spec from a YAML file.
pub fn load_spec(path: impl AsRef<Path>) -> Result<EnvironmentSpec> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SpecError::SpecFileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let spec: EnvironmentSpec = serde_yaml::from_str(&content)?;
    spec.validate()?;

    tracing::debug!(
        name = %spec.name,
        region = %spec.region,
        cluster = spec.is_cluster(),
        "loaded environment spec"
    );
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_single_node_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(
            &path,
            r#"
name: pr-1423
region: us-east-1
instance:
  instance_type: t3.medium
auth:
  key_name: ci-key
  private_key_path: /home/runner/.ssh/ci-key.pem
"#,
        )
        .unwrap();

        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.name, "pr-1423");
        assert_eq!(spec.instance.instance_type, "t3.medium");
        assert!(!spec.is_cluster());
    }

    #[test]
    fn load_cluster_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(
            &path,
            r#"
name: e2e-ha
region: eu-west-1
cluster:
  control_plane:
    count: 3
  workers:
    count: 2
    architecture: arm64
  ha: true
auth:
  key_name: ci-key
  private_key_path: /home/runner/.ssh/ci-key.pem
install:
  kubernetes: true
"#,
        )
        .unwrap();

        let spec = load_spec(&path).unwrap();
        let cluster = spec.cluster.as_ref().unwrap();
        assert_eq!(cluster.control_plane.count, 3);
        assert_eq!(cluster.workers.count, 2);
        assert_eq!(cluster.workers.architecture.as_deref(), Some("arm64"));
        assert!(cluster.ha);
        assert!(spec.install.kubernetes);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_spec("/nonexistent/env.yaml").unwrap_err();
        assert!(matches!(err, SpecError::SpecFileNotFound(_)));
    }

    #[test]
    fn invalid_spec_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(
            &path,
            r#"
name: ""
region: us-east-1
auth:
  key_name: ci-key
  private_key_path: /home/runner/.ssh/ci-key.pem
"#,
        )
        .unwrap();
        assert!(matches!(load_spec(&path), Err(SpecError::EmptyName)));
    }
}
