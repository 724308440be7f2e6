pub mod create;
pub mod delete;
pub mod dry_run;
pub mod status;

use skiff_cloud::{CloudProvider, StateStore, default_cache_path};
use skiff_cloud_aws::AwsProvider;
use skiff_core::{EnvironmentSpec, ProviderKind, load_spec};
use std::path::{Path, PathBuf};

/// Build the provider for the spec's backend kind.
pub(crate) async fn connect(
    spec: EnvironmentSpec,
    cache_path: &Path,
) -> anyhow::Result<Box<dyn CloudProvider>> {
    match spec.provider {
        ProviderKind::Aws => Ok(Box::new(AwsProvider::connect(spec, cache_path).await?)),
        ProviderKind::Vsphere => {
            anyhow::bail!("the vSphere provider is not built into this binary")
        }
    }
}

/// Resolve the spec and cache path for an existing environment. The cache
/// file's embedded spec is authoritative once it exists; the config file is
/// only consulted before the first create.
pub(crate) async fn resolve_environment(
    config: &Path,
    cache: Option<PathBuf>,
) -> anyhow::Result<(EnvironmentSpec, PathBuf)> {
    if let Some(cache_path) = cache {
        if cache_path.exists() {
            let env = StateStore::new(&cache_path).load().await?;
            return Ok((env.spec, cache_path));
        }
        return Ok((load_spec(config)?, cache_path));
    }

    let spec = load_spec(config)?;
    let cache_path = default_cache_path(&spec.name);
    if cache_path.exists() {
        let env = StateStore::new(&cache_path).load().await?;
        return Ok((env.spec, cache_path));
    }
    Ok((spec, cache_path))
}
