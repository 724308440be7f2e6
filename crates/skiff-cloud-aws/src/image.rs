//! Boot image resolution.
//!
//! Pure with respect to shared state: a cluster resolves a different image
//! per node pool, so nothing here may mutate the spec or any package-level
//! configuration. Resolution order, first match wins:
//!
//! 1. explicit image id: architecture queried from the image itself
//! 2. OS identifier: pinned SSM parameter, falling back to a describe-images
//!    search taking the newest by creation date
//! 3. neither: the default Ubuntu 22.04 family at the resolved architecture

use crate::ec2::Ec2Api;
use crate::error::{AwsError, AwsResult, sdk_err};
use aws_sdk_ec2::types::{ArchitectureType, ArchitectureValues, Image, InstanceTypeInfo};
use skiff_core::{EnvironmentSpec, NodePoolSpec};
use tracing::{debug, warn};

/// Normalized CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Parse with alias normalization. Anything outside the supported set is
    /// rejected.
    pub fn parse(value: &str) -> AwsResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            other => Err(AwsError::InvalidArchitecture(other.to_string())),
        }
    }

    fn from_image_value(value: &ArchitectureValues) -> AwsResult<Self> {
        match value {
            ArchitectureValues::X8664 => Ok(Architecture::X86_64),
            ArchitectureValues::Arm64 => Ok(Architecture::Arm64),
            other => Err(AwsError::InvalidArchitecture(other.as_str().to_string())),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of image resolution. Consumed immediately by instance launch,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    pub image_id: String,
    /// Empty for an explicit image id: the username must then come from the
    /// auth config.
    pub ssh_username: String,
    pub architecture: Architecture,
}

/// One supported OS identifier and where its images live.
struct OsFamily {
    os: &'static str,
    owner: &'static str,
    username: &'static str,
    ssm_x86: &'static str,
    ssm_arm: &'static str,
    pattern_x86: &'static str,
    pattern_arm: &'static str,
}

impl OsFamily {
    fn ssm_path(&self, arch: Architecture) -> &'static str {
        match arch {
            Architecture::X86_64 => self.ssm_x86,
            Architecture::Arm64 => self.ssm_arm,
        }
    }

    fn name_pattern(&self, arch: Architecture) -> &'static str {
        match arch {
            Architecture::X86_64 => self.pattern_x86,
            Architecture::Arm64 => self.pattern_arm,
        }
    }
}

const UBUNTU_2204: OsFamily = OsFamily {
    os: "ubuntu-22.04",
    owner: "099720109477",
    username: "ubuntu",
    ssm_x86: "/aws/service/canonical/ubuntu/server/22.04/stable/current/amd64/hvm/ebs-gp2/ami-id",
    ssm_arm: "/aws/service/canonical/ubuntu/server/22.04/stable/current/arm64/hvm/ebs-gp2/ami-id",
    pattern_x86: "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-*",
    pattern_arm: "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-arm64-server-*",
};

const OS_FAMILIES: &[OsFamily] = &[
    OsFamily {
        os: "ubuntu-20.04",
        owner: "099720109477",
        username: "ubuntu",
        ssm_x86:
            "/aws/service/canonical/ubuntu/server/20.04/stable/current/amd64/hvm/ebs-gp2/ami-id",
        ssm_arm: "/aws/service/canonical/ubuntu/server/20.04/stable/current/arm64/hvm/ebs-gp2/ami-id",
        pattern_x86: "ubuntu/images/hvm-ssd/ubuntu-focal-20.04-amd64-server-*",
        pattern_arm: "ubuntu/images/hvm-ssd/ubuntu-focal-20.04-arm64-server-*",
    },
    UBUNTU_2204,
    OsFamily {
        os: "ubuntu-24.04",
        owner: "099720109477",
        username: "ubuntu",
        ssm_x86:
            "/aws/service/canonical/ubuntu/server/24.04/stable/current/amd64/hvm/ebs-gp3/ami-id",
        ssm_arm: "/aws/service/canonical/ubuntu/server/24.04/stable/current/arm64/hvm/ebs-gp3/ami-id",
        pattern_x86: "ubuntu/images/hvm-ssd-gp3/ubuntu-noble-24.04-amd64-server-*",
        pattern_arm: "ubuntu/images/hvm-ssd-gp3/ubuntu-noble-24.04-arm64-server-*",
    },
    OsFamily {
        os: "amazon-linux-2023",
        owner: "amazon",
        username: "ec2-user",
        ssm_x86: "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64",
        ssm_arm: "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-arm64",
        pattern_x86: "al2023-ami-2023*-kernel-*-x86_64",
        pattern_arm: "al2023-ami-2023*-kernel-*-arm64",
    },
    OsFamily {
        os: "debian-12",
        owner: "136693071363",
        username: "admin",
        ssm_x86: "/aws/service/debian/release/12/latest/amd64",
        ssm_arm: "/aws/service/debian/release/12/latest/arm64",
        pattern_x86: "debian-12-amd64-*",
        pattern_arm: "debian-12-arm64-*",
    },
];

fn lookup_os(os: &str) -> Option<&'static OsFamily> {
    let wanted = os.trim().to_lowercase();
    OS_FAMILIES.iter().find(|f| f.os == wanted)
}

/// What one node (or the single instance) asks the resolver for. Borrowed
/// from the spec so resolution cannot mutate it.
#[derive(Debug, Clone, Copy)]
pub struct ImageQuery<'a> {
    pub explicit_image_id: Option<&'a str>,
    pub os: Option<&'a str>,
    /// Explicit architecture override, strongest hint.
    pub architecture_override: Option<&'a str>,
    pub instance_type: &'a str,
}

impl<'a> ImageQuery<'a> {
    pub fn single_node(spec: &'a EnvironmentSpec) -> Self {
        Self {
            explicit_image_id: spec.instance.image_id.as_deref().filter(|s| !s.is_empty()),
            os: spec.instance.os.as_deref(),
            architecture_override: spec.instance.architecture.as_deref(),
            instance_type: &spec.instance.instance_type,
        }
    }

    /// Per-pool query: the pool's own values win, the instance-level spec
    /// fills the gaps.
    pub fn for_pool(spec: &'a EnvironmentSpec, pool: &'a NodePoolSpec) -> Self {
        Self {
            explicit_image_id: pool
                .image_id
                .as_deref()
                .or(spec.instance.image_id.as_deref())
                .filter(|s| !s.is_empty()),
            os: pool.os.as_deref().or(spec.instance.os.as_deref()),
            architecture_override: pool
                .architecture
                .as_deref()
                .or(spec.instance.architecture.as_deref()),
            instance_type: pool
                .instance_type
                .as_deref()
                .unwrap_or(&spec.instance.instance_type),
        }
    }
}

/// Among candidates, the image with the greatest creation-timestamp string.
/// Ties are broken by image id so the result is deterministic.
pub fn pick_newest(mut images: Vec<Image>) -> Option<Image> {
    images.sort_by(|a, b| {
        let key_a = (a.creation_date().unwrap_or(""), a.image_id().unwrap_or(""));
        let key_b = (b.creation_date().unwrap_or(""), b.image_id().unwrap_or(""));
        key_a.cmp(&key_b)
    });
    images.pop()
}

/// Architectures an instance type can run, restricted to the supported set.
pub fn supported_architectures(info: &InstanceTypeInfo) -> Vec<Architecture> {
    info.processor_info()
        .map(|p| p.supported_architectures())
        .unwrap_or_default()
        .iter()
        .filter_map(|a| match a {
            ArchitectureType::X8664 => Some(Architecture::X86_64),
            ArchitectureType::Arm64 => Some(Architecture::Arm64),
            _ => None,
        })
        .collect()
}

/// Pre-flight check: the resolved architecture must be in the instance
/// type's declared set.
pub fn check_architecture(
    instance_type: &str,
    info: &InstanceTypeInfo,
    architecture: Architecture,
) -> AwsResult<()> {
    if supported_architectures(info).contains(&architecture) {
        Ok(())
    } else {
        Err(AwsError::ArchitectureMismatch {
            instance_type: instance_type.to_string(),
            architecture: architecture.as_str().to_string(),
        })
    }
}

/// SSH username for a resolved image. The auth config wins; an explicit
/// image id leaves the resolver's username empty, so the auth config must
/// then provide one.
pub fn effective_username(
    auth_username: Option<&str>,
    resolved: &ResolvedImage,
) -> AwsResult<String> {
    match auth_username {
        Some(username) if !username.is_empty() => Ok(username.to_string()),
        _ if !resolved.ssh_username.is_empty() => Ok(resolved.ssh_username.clone()),
        _ => Err(AwsError::Validation(
            "an explicit image id requires auth.username to be set".to_string(),
        )),
    }
}

pub struct ImageResolver {
    ec2: Ec2Api,
    ssm: aws_sdk_ssm::Client,
}

impl ImageResolver {
    pub fn new(ec2: Ec2Api, ssm: aws_sdk_ssm::Client) -> Self {
        Self { ec2, ssm }
    }

    /// Resolve the boot image for one node. Does not touch the spec.
    pub async fn resolve(&self, query: &ImageQuery<'_>) -> AwsResult<ResolvedImage> {
        // 1. Explicit image id: the image's own architecture wins, never a
        //    caller-supplied hint.
        if let Some(image_id) = query.explicit_image_id {
            let image = self.ec2.describe_image(image_id).await?;
            let architecture = image
                .architecture()
                .ok_or(AwsError::MissingField("image.architecture"))
                .and_then(Architecture::from_image_value)?;
            return Ok(ResolvedImage {
                image_id: image_id.to_string(),
                ssh_username: String::new(),
                architecture,
            });
        }

        let architecture = self.determine_architecture(query).await?;

        // 2. OS identifier, or 3. the default family.
        let family = match query.os {
            Some(os) => lookup_os(os).ok_or_else(|| AwsError::UnknownOs(os.to_string()))?,
            None => &UBUNTU_2204,
        };
        self.resolve_family(family, architecture).await
    }

    /// Override > instance-type inference. A type supporting exactly one
    /// architecture pins it; multi-architecture types default to x86_64.
    async fn determine_architecture(&self, query: &ImageQuery<'_>) -> AwsResult<Architecture> {
        if let Some(value) = query.architecture_override {
            return Architecture::parse(value);
        }
        match self.ec2.describe_instance_type(query.instance_type).await {
            Ok(info) => {
                let supported = supported_architectures(&info);
                match supported.as_slice() {
                    [only] => Ok(*only),
                    _ => Ok(Architecture::X86_64),
                }
            }
            Err(e) => {
                debug!(instance_type = query.instance_type, error = %e,
                    "could not infer architecture from instance type, defaulting to x86_64");
                Ok(Architecture::X86_64)
            }
        }
    }

    async fn resolve_family(
        &self,
        family: &OsFamily,
        architecture: Architecture,
    ) -> AwsResult<ResolvedImage> {
        // Fast path: the distribution's pinned SSM parameter.
        match self.pinned_image(family.ssm_path(architecture)).await {
            Ok(Some(image_id)) => {
                debug!(os = family.os, arch = %architecture.as_str(), image = %image_id,
                    "resolved image via pinned parameter");
                return Ok(ResolvedImage {
                    image_id,
                    ssh_username: family.username.to_string(),
                    architecture,
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(os = family.os, error = %e, "pinned parameter lookup failed, searching images");
            }
        }

        let candidates = self
            .ec2
            .search_images(family.owner, family.name_pattern(architecture), architecture.as_str())
            .await?;
        let newest = pick_newest(candidates).ok_or_else(|| {
            AwsError::NoImagesFound(format!("{} {}", family.os, architecture.as_str()))
        })?;
        let image_id = newest
            .image_id()
            .ok_or(AwsError::MissingField("image.image_id"))?
            .to_string();

        debug!(os = family.os, arch = %architecture.as_str(), image = %image_id,
            created = newest.creation_date().unwrap_or("?"),
            "resolved image via search");
        Ok(ResolvedImage {
            image_id,
            ssh_username: family.username.to_string(),
            architecture,
        })
    }

    async fn pinned_image(&self, path: &str) -> AwsResult<Option<String>> {
        let result = tokio::time::timeout(
            crate::ec2::API_TIMEOUT,
            self.ssm.get_parameter().name(path).send(),
        )
        .await;
        match result {
            Ok(Ok(resp)) => Ok(resp
                .parameter()
                .and_then(|p| p.value())
                .filter(|v| !v.is_empty())
                .map(str::to_string)),
            Ok(Err(e)) => Err(sdk_err("ssm-get-parameter", e)),
            Err(_) => Err(AwsError::Timeout {
                what: "ssm-get-parameter".to_string(),
                elapsed: crate::ec2::API_TIMEOUT,
            }),
        }
    }

    /// Pre-flight architecture compatibility check against the instance
    /// type's declared supported set.
    pub async fn ensure_architecture_supported(
        &self,
        instance_type: &str,
        architecture: Architecture,
    ) -> AwsResult<()> {
        let info = self.ec2.describe_instance_type(instance_type).await?;
        check_architecture(instance_type, &info, architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::ProcessorInfo;
    use skiff_core::{AuthConfig, InstallOptions, InstanceSpec, ProviderKind};

    fn image(id: &str, created: &str) -> Image {
        Image::builder().image_id(id).creation_date(created).build()
    }

    #[test]
    fn architecture_normalization() {
        assert_eq!(Architecture::parse("amd64").unwrap(), Architecture::X86_64);
        assert_eq!(Architecture::parse("AMD64").unwrap(), Architecture::X86_64);
        assert_eq!(Architecture::parse("x86_64").unwrap(), Architecture::X86_64);
        assert_eq!(Architecture::parse("aarch64").unwrap(), Architecture::Arm64);
        assert_eq!(Architecture::parse("ARM64").unwrap(), Architecture::Arm64);

        let err = Architecture::parse("ppc64le").unwrap_err();
        assert!(err.to_string().contains("invalid architecture"));
    }

    #[test]
    fn newest_image_wins_by_creation_date() {
        let picked = pick_newest(vec![
            image("ami-old", "2023-01-10T00:00:00.000Z"),
            image("ami-newest", "2024-06-01T12:00:00.000Z"),
            image("ami-mid", "2023-11-05T08:30:00.000Z"),
        ])
        .unwrap();
        assert_eq!(picked.image_id(), Some("ami-newest"));
    }

    #[test]
    fn equal_creation_dates_break_ties_deterministically() {
        let picked = pick_newest(vec![
            image("ami-aaa", "2024-06-01T12:00:00.000Z"),
            image("ami-zzz", "2024-06-01T12:00:00.000Z"),
            image("ami-mmm", "2024-06-01T12:00:00.000Z"),
        ])
        .unwrap();
        // stable rule: greatest (creation_date, image_id) pair
        assert_eq!(picked.image_id(), Some("ami-zzz"));

        assert!(pick_newest(Vec::new()).is_none());
    }

    fn type_info(archs: &[ArchitectureType]) -> InstanceTypeInfo {
        InstanceTypeInfo::builder()
            .processor_info(
                ProcessorInfo::builder()
                    .set_supported_architectures(Some(archs.to_vec()))
                    .build(),
            )
            .build()
    }

    #[test]
    fn architecture_mismatch_is_explicit() {
        let info = type_info(&[ArchitectureType::X8664]);
        let err = check_architecture("t3.medium", &info, Architecture::Arm64).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("architecture mismatch"));
        assert!(text.contains("arm64"));
        assert!(text.contains("t3.medium"));

        assert!(check_architecture("t3.medium", &info, Architecture::X86_64).is_ok());
    }

    #[test]
    fn supported_architectures_ignores_unsupported_values() {
        let info = type_info(&[ArchitectureType::I386, ArchitectureType::Arm64]);
        assert_eq!(supported_architectures(&info), vec![Architecture::Arm64]);
    }

    fn spec() -> EnvironmentSpec {
        EnvironmentSpec {
            name: "q".to_string(),
            provider: ProviderKind::Aws,
            region: "us-east-1".to_string(),
            instance: InstanceSpec {
                instance_type: "t3.medium".to_string(),
                image_id: Some("ami-12345".to_string()),
                os: Some("ubuntu-22.04".to_string()),
                architecture: None,
                root_volume_gb: None,
            },
            cluster: None,
            auth: AuthConfig {
                key_name: "k".to_string(),
                private_key_path: "/tmp/k".into(),
                username: None,
            },
            install: InstallOptions::default(),
            extra_access_cidrs: Vec::new(),
        }
    }

    #[test]
    fn query_construction_does_not_mutate_spec() {
        let spec = spec();
        let image_id_before = spec.instance.image_id.clone();

        let query = ImageQuery::single_node(&spec);
        assert_eq!(query.explicit_image_id, Some("ami-12345"));
        assert_eq!(query.os, Some("ubuntu-22.04"));
        drop(query);

        assert_eq!(spec.instance.image_id, image_id_before);
    }

    #[test]
    fn pool_query_prefers_pool_values() {
        let mut spec = spec();
        spec.instance.image_id = None;
        let pool = NodePoolSpec {
            count: 2,
            instance_type: Some("m6g.large".to_string()),
            image_id: None,
            os: None,
            architecture: Some("arm64".to_string()),
        };

        let query = ImageQuery::for_pool(&spec, &pool);
        assert_eq!(query.instance_type, "m6g.large");
        assert_eq!(query.architecture_override, Some("arm64"));
        // falls back to the instance-level OS
        assert_eq!(query.os, Some("ubuntu-22.04"));
    }

    #[test]
    fn username_falls_back_to_image_default() {
        let resolved = ResolvedImage {
            image_id: "ami-1".to_string(),
            ssh_username: "ubuntu".to_string(),
            architecture: Architecture::X86_64,
        };
        assert_eq!(effective_username(None, &resolved).unwrap(), "ubuntu");
        assert_eq!(
            effective_username(Some("ci"), &resolved).unwrap(),
            "ci"
        );

        let explicit = ResolvedImage {
            image_id: "ami-2".to_string(),
            ssh_username: String::new(),
            architecture: Architecture::X86_64,
        };
        assert!(effective_username(None, &explicit).is_err());
    }

    #[test]
    fn default_family_is_ubuntu_2204() {
        assert_eq!(UBUNTU_2204.os, "ubuntu-22.04");
        assert_eq!(UBUNTU_2204.username, "ubuntu");
        assert!(lookup_os("Ubuntu-22.04").is_some());
        assert!(lookup_os("windows-server").is_none());
    }
}
