//! Phase-ordered, idempotent teardown.
//!
//! Everything is driven from the persisted ledger: instances first (cluster
//! node list when present, else the single cached id), then the network
//! resources in reverse dependency order. Every step retries with bounded
//! exponential backoff and treats "already gone" as success, so running
//! delete twice, or after a half-finished create, is safe.

use crate::cache::ClusterCache;
use crate::ec2::{Ec2Api, TERMINATION_TIMEOUT};
use crate::error::{AwsError, AwsResult};
use crate::load_balancer::ElbApi;
use aws_sdk_ec2::types::InstanceStateName;
use skiff_cloud::{CloudError, Result, StatusTracker, retry};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DELETE_ATTEMPTS: u32 = 5;
const DELETE_INITIAL_DELAY: Duration = Duration::from_secs(2);
const DELETE_MAX_DELAY: Duration = Duration::from_secs(30);
/// Settle time before re-verifying a delete took effect.
const VERIFY_DELAY: Duration = Duration::from_secs(2);

type PhaseResult<T> = std::result::Result<T, (&'static str, CloudError)>;

/// One deletion step: bounded retries, dependency violations retried
/// through, not-found treated as success.
async fn delete_step<F, Fut>(what: &str, mut op: F) -> AwsResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AwsResult<()>>,
{
    retry(
        || {
            let fut = op();
            async move {
                match fut.await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_found() => {
                        info!("{what} already gone");
                        Ok(())
                    }
                    Err(e) if e.is_dependency_violation() => {
                        warn!(error = %e, "{what} still in use, will retry");
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
        },
        DELETE_ATTEMPTS,
        DELETE_INITIAL_DELAY,
        DELETE_MAX_DELAY,
    )
    .await
}

pub(crate) struct Teardown<'a> {
    pub ec2: &'a Ec2Api,
    pub elb: &'a ElbApi,
    pub tracker: &'a mut StatusTracker,
}

impl Teardown<'_> {
    pub async fn run(mut self) -> Result<()> {
        let cache = ClusterCache::from_status(&self.tracker.environment().status);

        self.tracker
            .mark_progressing("Terminating", "deleting environment resources")
            .await?;

        match self.phases(&cache).await {
            Ok(()) => {
                self.tracker.mark_terminated().await?;
                info!("environment terminated");
                Ok(())
            }
            Err((reason, err)) => {
                if let Err(persist) = self.tracker.mark_degraded(reason, &err.to_string()).await {
                    error!(error = %persist, "failed to record degraded condition");
                }
                Err(err)
            }
        }
    }

    async fn phases(&mut self, cache: &ClusterCache) -> PhaseResult<()> {
        // The load balancer holds interfaces in the subnet; it goes first.
        if cache.load_balancer_arn.is_some() || cache.target_group_arn.is_some() {
            self.elb
                .teardown(
                    cache.load_balancer_arn.as_deref(),
                    cache.target_group_arn.as_deref(),
                )
                .await
                .map_err(|e| tagged("LoadBalancerTeardownFailed", e))?;
        }

        let instance_ids = cache.all_instance_ids();
        if !instance_ids.is_empty() {
            self.terminate_instances(&instance_ids)
                .await
                .map_err(|e| tagged("InstanceTerminationFailed", e))?;
        }

        let net = &cache.network;

        if let Some(sg_id) = &net.security_group_id {
            delete_step(&format!("security group {sg_id}"), || {
                self.ec2.delete_security_group(sg_id)
            })
            .await
            .map_err(|e| tagged("SecurityGroupDeleteFailed", e))?;
            self.verify_gone("security group", || self.ec2.security_group_exists(sg_id))
                .await;
        }

        if let Some(subnet_id) = &net.subnet_id {
            delete_step(&format!("subnet {subnet_id}"), || {
                self.ec2.delete_subnet(subnet_id)
            })
            .await
            .map_err(|e| tagged("SubnetDeleteFailed", e))?;
            self.verify_gone("subnet", || self.ec2.subnet_exists(subnet_id))
                .await;
        }

        if let Some(rt_id) = &net.route_table_id {
            // The VPC's main route table cannot be deleted directly; it is
            // removed together with the VPC.
            let main = match self.ec2.is_main_route_table(rt_id).await {
                Ok(main) => main,
                Err(e) if e.is_not_found() => {
                    info!("route table {rt_id} already gone");
                    true
                }
                Err(e) => return Err(tagged("RouteTableDeleteFailed", e)),
            };
            if !main {
                delete_step(&format!("route table {rt_id}"), || {
                    self.ec2.delete_route_table(rt_id)
                })
                .await
                .map_err(|e| tagged("RouteTableDeleteFailed", e))?;
            }
        }

        if let Some(igw_id) = &net.internet_gateway_id {
            if let Some(vpc_id) = &net.vpc_id {
                delete_step(&format!("internet gateway {igw_id} attachment"), || {
                    self.ec2.detach_internet_gateway(igw_id, vpc_id)
                })
                .await
                .map_err(|e| tagged("InternetGatewayDeleteFailed", e))?;
            }
            delete_step(&format!("internet gateway {igw_id}"), || {
                self.ec2.delete_internet_gateway(igw_id)
            })
            .await
            .map_err(|e| tagged("InternetGatewayDeleteFailed", e))?;
        }

        if let Some(vpc_id) = &net.vpc_id {
            if let Err(e) = delete_step(&format!("VPC {vpc_id}"), || self.ec2.delete_vpc(vpc_id)).await
            {
                self.diagnose_vpc_dependents(vpc_id).await;
                return Err(tagged("VpcDeleteFailed", e));
            }
            self.verify_gone("VPC", || self.ec2.vpc_exists(vpc_id)).await;
        }

        Ok(())
    }

    /// Terminate and wait for every instance concurrently. A wait error
    /// falls back to a describe-based confirmation before counting as a
    /// failure.
    async fn terminate_instances(&self, instance_ids: &[String]) -> AwsResult<()> {
        let ids = instance_ids.to_vec();
        delete_step("instance termination", || self.ec2.terminate_instances(&ids)).await?;

        let mut waits = JoinSet::new();
        for id in instance_ids {
            let ec2 = self.ec2.clone();
            let id = id.clone();
            waits.spawn(async move {
                match ec2
                    .wait_for_instance_state(&id, InstanceStateName::Terminated, TERMINATION_TIMEOUT)
                    .await
                {
                    Ok(_) => Ok(id),
                    Err(wait_err) => match ec2.describe_instance(&id).await {
                        Ok(view) if view.state == Some(InstanceStateName::Terminated) => Ok(id),
                        Err(e) if e.is_not_found() => {
                            info!(instance = %id, "already terminated");
                            Ok(id)
                        }
                        _ => Err(format!("instance {id}: {wait_err}")),
                    },
                }
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = waits.join_next().await {
            match joined {
                Ok(Ok(id)) => info!(instance = %id, "instance terminated"),
                Ok(Err(msg)) => failures.push(msg),
                Err(join_err) => failures.push(format!("wait task panicked: {join_err}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AwsError::InstancePool {
                failed: failures.len(),
                total: instance_ids.len(),
                details: failures.join("; "),
            })
        }
    }

    /// Post-delete confirmation. Absence is the expected outcome; anything
    /// else is logged for the operator, not escalated, because the delete
    /// call itself already succeeded.
    async fn verify_gone<F, Fut>(&self, what: &str, describe: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AwsResult<bool>>,
    {
        tokio::time::sleep(VERIFY_DELAY).await;
        match describe().await {
            Ok(false) => {}
            Ok(true) => warn!("{what} still present after delete"),
            Err(e) => warn!(error = %e, "could not verify {what} deletion"),
        }
    }

    async fn diagnose_vpc_dependents(&self, vpc_id: &str) {
        match self.ec2.vpc_dependents(vpc_id).await {
            Ok(deps) => {
                error!(
                    vpc = %vpc_id,
                    network_interfaces = ?deps.network_interfaces,
                    security_groups = ?deps.security_groups,
                    subnets = ?deps.subnets,
                    "VPC still has dependents blocking deletion"
                );
            }
            Err(e) => warn!(vpc = %vpc_id, error = %e, "could not enumerate VPC dependents"),
        }
    }
}

fn tagged(reason: &'static str, err: AwsError) -> (&'static str, CloudError) {
    (reason, err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_cloud::{ConditionType, StateStore};
    use skiff_core::{AuthConfig, EnvironmentSpec, InstallOptions, InstanceSpec, ProviderKind};

    fn offline_ec2() -> Ec2Api {
        let config = aws_sdk_ec2::config::Config::builder()
            .behavior_version(aws_sdk_ec2::config::BehaviorVersion::latest())
            .build();
        Ec2Api::new(aws_sdk_ec2::Client::from_conf(config))
    }

    fn offline_elb() -> ElbApi {
        let config = aws_sdk_elasticloadbalancingv2::config::Config::builder()
            .behavior_version(aws_sdk_elasticloadbalancingv2::config::BehaviorVersion::latest())
            .build();
        ElbApi::new(aws_sdk_elasticloadbalancingv2::Client::from_conf(config))
    }

    fn spec() -> EnvironmentSpec {
        EnvironmentSpec {
            name: "gone".to_string(),
            provider: ProviderKind::Aws,
            region: "us-east-1".to_string(),
            instance: InstanceSpec::default(),
            cluster: None,
            auth: AuthConfig {
                key_name: "k".to_string(),
                private_key_path: "/tmp/k.pem".into(),
                username: None,
            },
            install: InstallOptions::default(),
            extra_access_cidrs: Vec::new(),
        }
    }

    /// An environment with an empty ledger deletes cleanly, twice. No cloud
    /// call is made because there is nothing to act on.
    #[tokio::test]
    async fn delete_with_empty_ledger_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("env.yaml"));
        let ec2 = offline_ec2();
        let elb = offline_elb();

        for _ in 0..2 {
            let mut tracker = if store.exists() {
                StatusTracker::resume(store.clone()).await.unwrap()
            } else {
                StatusTracker::new(store.clone(), spec())
            };
            Teardown {
                ec2: &ec2,
                elb: &elb,
                tracker: &mut tracker,
            }
            .run()
            .await
            .unwrap();
        }

        let env = store.load().await.unwrap();
        assert_eq!(
            env.status.active_condition().unwrap().condition_type,
            ConditionType::Terminated
        );
    }
}
