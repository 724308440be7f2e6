//! Environment spec model.
//!
//! The spec is the immutable input of one lifecycle operation. Observed
//! state (conditions, resource ids) lives in the status document managed by
//! `skiff-cloud`, never here.

use crate::error::{Result, SpecError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which cloud backend provisions this environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Aws,
    /// Structurally identical backend, implemented out of tree.
    Vsphere,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Aws => write!(f, "aws"),
            ProviderKind::Vsphere => write!(f, "vsphere"),
        }
    }
}

/// Desired state for one ephemeral environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Environment name, used as the tag prefix on every created resource.
    pub name: String,

    #[serde(default)]
    pub provider: ProviderKind,

    /// Cloud region (e.g. "us-east-1").
    pub region: String,

    /// Shape of the instance(s) to launch.
    #[serde(default)]
    pub instance: InstanceSpec,

    /// Present when the environment is a multi-node cluster. Routes the
    /// lifecycle through the cluster orchestrator instead of the
    /// single-node one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSpec>,

    pub auth: AuthConfig,

    #[serde(default)]
    pub install: InstallOptions,

    /// Extra CIDR ranges allowed through the security group, in addition to
    /// the auto-detected operator address.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_access_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSpec {
    pub instance_type: String,

    /// Explicit image id. When set, OS and architecture hints are ignored
    /// and the image's own architecture wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    /// OS identifier, e.g. "ubuntu-22.04". Resolved to an image per
    /// architecture at create time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Architecture override ("x86_64"/"amd64" or "arm64"/"aarch64").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Root EBS volume size in GiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_volume_gb: Option<i32>,
}

impl Default for InstanceSpec {
    fn default() -> Self {
        Self {
            instance_type: "t3.medium".to_string(),
            image_id: None,
            os: None,
            architecture: None,
            root_volume_gb: None,
        }
    }
}

/// Multi-node cluster shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    #[serde(default = "NodePoolSpec::default_control_plane")]
    pub control_plane: NodePoolSpec,

    #[serde(default)]
    pub workers: NodePoolSpec,

    /// High availability: front the control plane with a network load
    /// balancer and register every control-plane node as a target.
    #[serde(default)]
    pub ha: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
}

/// A set of instances sharing a role and configuration. Every field except
/// `count` falls back to the instance-level value when unset, so a pool can
/// resolve a different image than its siblings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePoolSpec {
    pub count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

impl NodePoolSpec {
    fn default_control_plane() -> Self {
        Self {
            count: 1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the key pair registered with the provider.
    pub key_name: String,

    /// Path to the matching private key on the operator machine.
    pub private_key_path: PathBuf,

    /// SSH username. When unset, the image resolver's per-OS default is
    /// used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Run the Kubernetes install scripts over SSH once the host is up.
    pub kubernetes: bool,

    /// Container runtime the install scripts should set up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<String>,
}

impl EnvironmentSpec {
    /// Pre-flight validation. Fails fast before any cloud call is made.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        if self.region.trim().is_empty() {
            return Err(SpecError::MissingRegion);
        }
        if self.auth.key_name.trim().is_empty()
            || self.auth.private_key_path.as_os_str().is_empty()
        {
            return Err(SpecError::MissingKeyMaterial);
        }
        if let Some(cluster) = &self.cluster {
            if cluster.control_plane.count == 0 {
                return Err(SpecError::EmptyControlPlane);
            }
        }
        for cidr in &self.extra_access_cidrs {
            validate_cidr(cidr)?;
        }
        Ok(())
    }

    /// Whether the cluster orchestrator handles this environment.
    pub fn is_cluster(&self) -> bool {
        self.cluster.is_some()
    }
}

fn validate_cidr(cidr: &str) -> Result<()> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| SpecError::InvalidCidr(cidr.to_string()))?;
    if addr.parse::<std::net::IpAddr>().is_err() {
        return Err(SpecError::InvalidCidr(cidr.to_string()));
    }
    let max = if addr.contains(':') { 128 } else { 32 };
    match prefix.parse::<u8>() {
        Ok(p) if p <= max => Ok(()),
        _ => Err(SpecError::InvalidCidr(cidr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec() -> EnvironmentSpec {
        EnvironmentSpec {
            name: "ci-check".to_string(),
            provider: ProviderKind::Aws,
            region: "us-east-1".to_string(),
            instance: InstanceSpec::default(),
            cluster: None,
            auth: AuthConfig {
                key_name: "ci-key".to_string(),
                private_key_path: PathBuf::from("/tmp/ci-key.pem"),
                username: None,
            },
            install: InstallOptions::default(),
            extra_access_cidrs: Vec::new(),
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(minimal_spec().validate().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut spec = minimal_spec();
        spec.name = "  ".to_string();
        assert!(matches!(spec.validate(), Err(SpecError::EmptyName)));
    }

    #[test]
    fn missing_region_rejected() {
        let mut spec = minimal_spec();
        spec.region = String::new();
        assert!(matches!(spec.validate(), Err(SpecError::MissingRegion)));
    }

    #[test]
    fn missing_key_material_rejected() {
        let mut spec = minimal_spec();
        spec.auth.key_name = String::new();
        assert!(matches!(
            spec.validate(),
            Err(SpecError::MissingKeyMaterial)
        ));
    }

    #[test]
    fn zero_control_plane_rejected() {
        let mut spec = minimal_spec();
        spec.cluster = Some(ClusterSpec {
            control_plane: NodePoolSpec::default(),
            workers: NodePoolSpec::default(),
            ha: false,
            kubernetes_version: None,
        });
        assert!(matches!(
            spec.validate(),
            Err(SpecError::EmptyControlPlane)
        ));
    }

    #[test]
    fn bad_cidr_rejected() {
        let mut spec = minimal_spec();
        spec.extra_access_cidrs = vec!["10.1.2.3".to_string()];
        assert!(matches!(spec.validate(), Err(SpecError::InvalidCidr(_))));

        spec.extra_access_cidrs = vec!["10.1.2.0/33".to_string()];
        assert!(matches!(spec.validate(), Err(SpecError::InvalidCidr(_))));

        spec.extra_access_cidrs = vec!["10.1.2.0/24".to_string()];
        assert!(spec.validate().is_ok());
    }
}
