//! Network load balancer lifecycle for HA control planes.
//!
//! Creation is strictly ordered: load balancer, target group, listener,
//! and later target registration once control-plane instances exist.
//! Teardown is best-effort: only the final load-balancer delete failure is
//! fatal; everything before it is logged and skipped past.

use crate::error::{AwsError, AwsResult, sdk_err};
use crate::network::API_PORT;
use aws_sdk_elasticloadbalancingv2::Client;
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, LoadBalancerSchemeEnum, LoadBalancerTypeEnum, ProtocolEnum,
    TargetDescription, TargetTypeEnum,
};
use tracing::{info, warn};

const HEALTH_CHECK_INTERVAL_SECONDS: i32 = 10;
const HEALTH_CHECK_TIMEOUT_SECONDS: i32 = 10;
const HEALTHY_THRESHOLD: i32 = 3;
const UNHEALTHY_THRESHOLD: i32 = 3;

/// Handles of a provisioned load balancer.
#[derive(Debug, Clone)]
pub struct LoadBalancerHandles {
    pub arn: String,
    pub dns_name: String,
    pub target_group_arn: String,
}

#[derive(Clone)]
pub struct ElbApi {
    client: Client,
}

impl ElbApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> AwsResult<T>
    where
        F: std::future::Future<Output = AwsResult<T>>,
    {
        match tokio::time::timeout(crate::ec2::API_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => Err(AwsError::Timeout {
                what: what.to_string(),
                elapsed: crate::ec2::API_TIMEOUT,
            }),
        }
    }

    /// Internet-facing layer-4 load balancer, TCP target group on the API
    /// port, and a forwarding listener.
    pub async fn provision(
        &self,
        env: &str,
        vpc_id: &str,
        subnet_id: &str,
    ) -> AwsResult<LoadBalancerHandles> {
        // ELBv2 names: at most 32 characters, no leading/trailing hyphen.
        let lb_name = truncate_name(&format!("{env}-api"), 32);
        let tg_name = truncate_name(&format!("{env}-cp"), 32);

        let lb = self
            .bounded("create-load-balancer", async {
                self.client
                    .create_load_balancer()
                    .name(&lb_name)
                    .r#type(LoadBalancerTypeEnum::Network)
                    .scheme(LoadBalancerSchemeEnum::InternetFacing)
                    .subnets(subnet_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("create-load-balancer", e))
            })
            .await?;
        let (arn, dns_name) = lb
            .load_balancers()
            .first()
            .and_then(|lb| Some((lb.load_balancer_arn()?.to_string(), lb.dns_name()?.to_string())))
            .ok_or(AwsError::MissingField("load_balancer.load_balancer_arn"))?;
        info!(load_balancer = %arn, dns = %dns_name, "created network load balancer");

        let tg = self
            .bounded("create-target-group", async {
                self.client
                    .create_target_group()
                    .name(&tg_name)
                    .protocol(ProtocolEnum::Tcp)
                    .port(API_PORT)
                    .vpc_id(vpc_id)
                    .target_type(TargetTypeEnum::Instance)
                    .health_check_interval_seconds(HEALTH_CHECK_INTERVAL_SECONDS)
                    .health_check_timeout_seconds(HEALTH_CHECK_TIMEOUT_SECONDS)
                    .healthy_threshold_count(HEALTHY_THRESHOLD)
                    .unhealthy_threshold_count(UNHEALTHY_THRESHOLD)
                    .send()
                    .await
                    .map_err(|e| sdk_err("create-target-group", e))
            })
            .await?;
        let target_group_arn = tg
            .target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .ok_or(AwsError::MissingField("target_group.target_group_arn"))?
            .to_string();
        info!(target_group = %target_group_arn, "created target group");

        self.bounded("create-listener", async {
            self.client
                .create_listener()
                .load_balancer_arn(&arn)
                .protocol(ProtocolEnum::Tcp)
                .port(API_PORT)
                .default_actions(
                    Action::builder()
                        .r#type(ActionTypeEnum::Forward)
                        .target_group_arn(&target_group_arn)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| sdk_err("create-listener", e))
                .map(|_| ())
        })
        .await?;

        Ok(LoadBalancerHandles {
            arn,
            dns_name,
            target_group_arn,
        })
    }

    /// Register control-plane instances as targets on the API port.
    pub async fn register_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> AwsResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let targets: Vec<TargetDescription> = instance_ids
            .iter()
            .map(|id| TargetDescription::builder().id(id).port(API_PORT).build())
            .collect();

        self.bounded("register-targets", async {
            self.client
                .register_targets()
                .target_group_arn(target_group_arn)
                .set_targets(Some(targets.clone()))
                .send()
                .await
                .map_err(|e| sdk_err("register-targets", e))
                .map(|_| ())
        })
        .await?;
        info!(count = instance_ids.len(), "registered control-plane targets");
        Ok(())
    }

    /// Best-effort teardown. Deregistration, listener, and target-group
    /// failures are logged; only the final load-balancer delete can fail
    /// the operation.
    pub async fn teardown(
        &self,
        load_balancer_arn: Option<&str>,
        target_group_arn: Option<&str>,
    ) -> AwsResult<()> {
        if let Some(tg_arn) = target_group_arn {
            if let Err(e) = self.deregister_all_targets(tg_arn).await {
                warn!(error = %e, "target deregistration failed, continuing teardown");
            }
        }

        if let Some(lb_arn) = load_balancer_arn {
            match self.listener_arns(lb_arn).await {
                Ok(listeners) => {
                    for listener in listeners {
                        if let Err(e) = self.delete_listener(&listener).await {
                            warn!(listener = %listener, error = %e, "listener delete failed, continuing");
                        }
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(error = %e, "could not list listeners, continuing"),
            }
        }

        if let Some(tg_arn) = target_group_arn {
            match self.delete_target_group(tg_arn).await {
                Ok(()) => info!(target_group = %tg_arn, "deleted target group"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(error = %e, "target group delete failed, continuing"),
            }
        }

        if let Some(lb_arn) = load_balancer_arn {
            match self.delete_load_balancer(lb_arn).await {
                Ok(()) => info!(load_balancer = %lb_arn, "deleted load balancer"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn deregister_all_targets(&self, target_group_arn: &str) -> AwsResult<()> {
        let health = self
            .bounded("describe-target-health", async {
                self.client
                    .describe_target_health()
                    .target_group_arn(target_group_arn)
                    .send()
                    .await
                    .map_err(|e| sdk_err("describe-target-health", e))
            })
            .await?;

        let targets: Vec<TargetDescription> = health
            .target_health_descriptions()
            .iter()
            .filter_map(|d| d.target().cloned())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        self.bounded("deregister-targets", async {
            self.client
                .deregister_targets()
                .target_group_arn(target_group_arn)
                .set_targets(Some(targets.clone()))
                .send()
                .await
                .map_err(|e| sdk_err("deregister-targets", e))
                .map(|_| ())
        })
        .await
    }

    async fn listener_arns(&self, load_balancer_arn: &str) -> AwsResult<Vec<String>> {
        let resp = self
            .bounded("describe-listeners", async {
                self.client
                    .describe_listeners()
                    .load_balancer_arn(load_balancer_arn)
                    .send()
                    .await
                    .map_err(|e| sdk_err("describe-listeners", e))
            })
            .await?;
        Ok(resp
            .listeners()
            .iter()
            .filter_map(|l| l.listener_arn())
            .map(str::to_string)
            .collect())
    }

    async fn delete_listener(&self, listener_arn: &str) -> AwsResult<()> {
        self.bounded("delete-listener", async {
            self.client
                .delete_listener()
                .listener_arn(listener_arn)
                .send()
                .await
                .map_err(|e| sdk_err("delete-listener", e))
                .map(|_| ())
        })
        .await
    }

    async fn delete_target_group(&self, target_group_arn: &str) -> AwsResult<()> {
        self.bounded("delete-target-group", async {
            self.client
                .delete_target_group()
                .target_group_arn(target_group_arn)
                .send()
                .await
                .map_err(|e| sdk_err("delete-target-group", e))
                .map(|_| ())
        })
        .await
    }

    async fn delete_load_balancer(&self, load_balancer_arn: &str) -> AwsResult<()> {
        self.bounded("delete-load-balancer", async {
            self.client
                .delete_load_balancer()
                .load_balancer_arn(load_balancer_arn)
                .send()
                .await
                .map_err(|e| sdk_err("delete-load-balancer", e))
                .map(|_| ())
        })
        .await
    }
}

fn truncate_name(name: &str, max: usize) -> String {
    let truncated: String = name.chars().take(max).collect();
    truncated.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fit_elb_limits() {
        assert_eq!(truncate_name("pr-1423-api", 32), "pr-1423-api");
        let long = truncate_name(
            "a-very-long-environment-name-from-ci-api",
            32,
        );
        assert!(long.len() <= 32);
        assert!(!long.ends_with('-'));
    }
}
