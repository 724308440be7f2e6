//! AWS provider implementation of the lifecycle contract.

use crate::cluster::ClusterCreate;
use crate::delete::Teardown;
use crate::ec2::Ec2Api;
use crate::image::{ImageQuery, ImageResolver, effective_username};
use crate::load_balancer::ElbApi;
use crate::single_node::SingleNodeCreate;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use skiff_cloud::{
    CloudError, CloudProvider, Condition, ConditionType, Result, StateStore, StatusTracker,
};
use skiff_core::EnvironmentSpec;
use std::path::PathBuf;
use tracing::info;

pub struct AwsProvider {
    spec: EnvironmentSpec,
    store: StateStore,
    ec2: Ec2Api,
    elb: ElbApi,
    resolver: ImageResolver,
}

impl AwsProvider {
    /// Validate the spec and build the SDK clients for its region.
    pub async fn connect(spec: EnvironmentSpec, cache_path: impl Into<PathBuf>) -> Result<Self> {
        spec.validate()?;

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(spec.region.clone()))
            .load()
            .await;
        let ec2 = Ec2Api::new(aws_sdk_ec2::Client::new(&config));
        let elb = ElbApi::new(aws_sdk_elasticloadbalancingv2::Client::new(&config));
        let resolver = ImageResolver::new(ec2.clone(), aws_sdk_ssm::Client::new(&config));

        Ok(Self {
            spec,
            store: StateStore::new(cache_path),
            ec2,
            elb,
            resolver,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    async fn dry_run_query(&self, query: ImageQuery<'_>) -> Result<()> {
        let resolved = self.resolver.resolve(&query).await.map_err(CloudError::from)?;
        self.resolver
            .ensure_architecture_supported(query.instance_type, resolved.architecture)
            .await
            .map_err(CloudError::from)?;
        effective_username(self.spec.auth.username.as_deref(), &resolved)
            .map_err(CloudError::from)?;
        info!(
            instance_type = query.instance_type,
            image = %resolved.image_id,
            architecture = %resolved.architecture,
            "dry run: image and instance type are compatible"
        );
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        if self.spec.is_cluster() { "aws-cluster" } else { "aws" }
    }

    async fn create(&mut self) -> Result<()> {
        if self.store.exists() {
            let env = self.store.load().await?;
            if env
                .status
                .active_condition()
                .is_some_and(|c| c.condition_type == ConditionType::Available)
            {
                return Err(CloudError::Validation(format!(
                    "environment {} already exists (cache: {}); delete it first",
                    self.spec.name,
                    self.store.path().display()
                )));
            }
        }

        let mut tracker = StatusTracker::new(self.store.clone(), self.spec.clone());
        if self.spec.is_cluster() {
            ClusterCreate {
                ec2: &self.ec2,
                elb: &self.elb,
                resolver: &self.resolver,
                tracker: &mut tracker,
            }
            .run()
            .await
        } else {
            SingleNodeCreate {
                ec2: &self.ec2,
                resolver: &self.resolver,
                tracker: &mut tracker,
            }
            .run()
            .await
        }
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.store.exists() {
            info!(
                cache = %self.store.path().display(),
                "no cache file, nothing to delete"
            );
            return Ok(());
        }

        let mut tracker = StatusTracker::resume(self.store.clone()).await?;
        Teardown {
            ec2: &self.ec2,
            elb: &self.elb,
            tracker: &mut tracker,
        }
        .run()
        .await
    }

    async fn status(&self) -> Result<Vec<Condition>> {
        let env = self.store.load().await?;
        Ok(env.status.conditions)
    }

    /// Validate key material, instance types, and image/architecture
    /// compatibility without creating anything.
    async fn dry_run(&self) -> Result<()> {
        if !self.spec.auth.private_key_path.exists() {
            return Err(CloudError::Validation(format!(
                "private key not found: {}",
                self.spec.auth.private_key_path.display()
            )));
        }

        match &self.spec.cluster {
            None => self.dry_run_query(ImageQuery::single_node(&self.spec)).await?,
            Some(cluster) => {
                self.dry_run_query(ImageQuery::for_pool(&self.spec, &cluster.control_plane))
                    .await?;
                if cluster.workers.count > 0 {
                    self.dry_run_query(ImageQuery::for_pool(&self.spec, &cluster.workers))
                        .await?;
                }
            }
        }
        Ok(())
    }
}
