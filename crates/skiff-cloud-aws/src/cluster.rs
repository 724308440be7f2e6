//! Cluster create pipeline.
//!
//! Reuses the network phases, adds the cluster security group, the optional
//! HA load balancer, and concurrent control-plane/worker instance pools.
//! A later-phase failure marks Degraded and returns without unwinding the
//! earlier phases, and a pool partial failure never terminates the siblings
//! that did come up: both are deliberate leave-for-operator-inspection
//! policies, with `delete` as the cleanup path.

use crate::cache::{InstanceInfo, keys};
use crate::ec2::{Ec2Api, LaunchParams, RUNNING_TIMEOUT};
use crate::error::AwsError;
use crate::image::{ImageQuery, ImageResolver, effective_username};
use crate::load_balancer::{ElbApi, LoadBalancerHandles};
use crate::network::{self, NetworkResources};
use crate::single_node::DEFAULT_ROOT_VOLUME_GB;
use crate::undo::UndoStack;
use aws_sdk_ec2::types::InstanceStateName;
use skiff_cloud::status::ClusterStatus;
use skiff_cloud::{CloudError, NodeRole, Result, StatusTracker};
use skiff_core::{EnvironmentSpec, NodePoolSpec};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

type PhaseResult<T> = std::result::Result<T, (&'static str, CloudError)>;

/// The API endpoint clients should use: the load balancer when HA,
/// otherwise the first control-plane node's public DNS.
pub(crate) fn control_plane_endpoint(
    load_balancer_dns: Option<&str>,
    control_plane: &[InstanceInfo],
) -> Option<String> {
    match load_balancer_dns {
        Some(dns) => Some(dns.to_string()),
        None => control_plane
            .first()
            .and_then(|node| node.public_dns.clone().or_else(|| node.public_ip.clone())),
    }
}

pub(crate) struct ClusterCreate<'a> {
    pub ec2: &'a Ec2Api,
    pub elb: &'a ElbApi,
    pub resolver: &'a ImageResolver,
    pub tracker: &'a mut StatusTracker,
}

impl ClusterCreate<'_> {
    pub async fn run(mut self) -> Result<()> {
        match self.phases().await {
            Ok(()) => Ok(()),
            Err((reason, err)) => {
                if let Err(persist) = self.tracker.mark_degraded(reason, &err.to_string()).await {
                    error!(error = %persist, "failed to record degraded condition");
                }
                Err(err)
            }
        }
    }

    async fn phases(&mut self) -> PhaseResult<()> {
        let spec = self.tracker.spec().clone();
        let Some(cluster) = spec.cluster.clone() else {
            return Err((
                "ValidationFailed",
                CloudError::Validation("cluster orchestrator invoked without a cluster spec".into()),
            ));
        };
        let env = spec.name.clone();

        self.tracker
            .mark_progressing("CreatingNetwork", "creating VPC, subnet, gateway, route table")
            .await
            .map_err(persist_failed)?;
        // The cluster path never replays this stack; it exists only to
        // satisfy the shared network phases.
        let mut unused_undo = UndoStack::new();
        let net = network::provision_network(self.ec2, self.tracker, &mut unused_undo)
            .await
            .map_err(|(reason, e)| (reason, e.into()))?;

        self.tracker
            .mark_progressing("CreatingSecurityGroup", "creating cluster security group")
            .await
            .map_err(persist_failed)?;
        let cidrs = network::resolve_access_cidrs(&spec)
            .await
            .map_err(|e| tagged("SecurityGroupFailed", e))?;
        let sg_id = self
            .ec2
            .create_security_group(
                &env,
                &format!("{env}-cluster-sg"),
                "skiff cluster access",
                &net.vpc_id,
            )
            .await
            .map_err(|e| tagged("SecurityGroupFailed", e))?;
        self.tracker.set_property(keys::SECURITY_GROUP_ID, &sg_id);
        self.ec2
            .authorize_ingress(&sg_id, &network::cluster_ingress(&cidrs))
            .await
            .map_err(|e| tagged("SecurityGroupFailed", e))?;

        let load_balancer = if cluster.ha {
            self.tracker
                .mark_progressing("CreatingLoadBalancer", "creating control-plane load balancer")
                .await
                .map_err(persist_failed)?;
            let handles = self
                .elb
                .provision(&env, &net.vpc_id, &net.subnet_id)
                .await
                .map_err(|e| tagged("LoadBalancerFailed", e))?;
            self.tracker.set_property(keys::LOAD_BALANCER_ARN, &handles.arn);
            self.tracker.set_property(keys::LOAD_BALANCER_DNS, &handles.dns_name);
            self.tracker
                .set_property(keys::TARGET_GROUP_ARN, &handles.target_group_arn);
            Some(handles)
        } else {
            None
        };

        self.tracker
            .mark_progressing(
                "LaunchingControlPlane",
                &format!("launching {} control-plane node(s)", cluster.control_plane.count),
            )
            .await
            .map_err(persist_failed)?;
        let control_plane = self
            .launch_pool(&spec, &cluster.control_plane, NodeRole::ControlPlane, &net, &sg_id)
            .await
            .map_err(|e| tagged("ControlPlanePoolFailed", e))?;

        if let Some(handles) = &load_balancer {
            self.tracker
                .mark_progressing("RegisteringTargets", "registering control-plane targets")
                .await
                .map_err(persist_failed)?;
            let ids: Vec<String> = control_plane
                .iter()
                .map(|i| i.instance_id.clone())
                .collect();
            self.elb
                .register_targets(&handles.target_group_arn, &ids)
                .await
                .map_err(|e| tagged("TargetRegistrationFailed", e))?;
        }

        let workers = if cluster.workers.count > 0 {
            self.tracker
                .mark_progressing(
                    "LaunchingWorkers",
                    &format!("launching {} worker node(s)", cluster.workers.count),
                )
                .await
                .map_err(persist_failed)?;
            self.launch_pool(&spec, &cluster.workers, NodeRole::Worker, &net, &sg_id)
                .await
                .map_err(|e| tagged("WorkerPoolFailed", e))?
        } else {
            Vec::new()
        };

        self.tracker
            .mark_progressing(
                "ConfiguringNetworkInterfaces",
                "disabling source/destination checks",
            )
            .await
            .map_err(persist_failed)?;
        for node in control_plane.iter().chain(workers.iter()) {
            match &node.network_interface_id {
                Some(eni) => self
                    .ec2
                    .set_source_dest_check(eni, false)
                    .await
                    .map_err(|e| tagged("NetworkInterfaceConfigFailed", e))?,
                None => warn!(instance = %node.instance_id, "no network interface id recorded"),
            }
        }

        let endpoint = control_plane_endpoint(
            load_balancer.as_ref().map(|h| h.dns_name.as_str()),
            &control_plane,
        );
        if let Some(endpoint) = &endpoint {
            self.tracker.set_property(keys::CONTROL_PLANE_ENDPOINT, endpoint);
        }
        let nodes: Vec<_> = control_plane
            .iter()
            .chain(workers.iter())
            .map(|i| i.to_node("ready"))
            .collect();
        let total_nodes = nodes.len() as u32;
        self.tracker.set_cluster(ClusterStatus {
            nodes,
            total_nodes,
            ready_nodes: total_nodes,
            phase: "ready".to_string(),
            control_plane_endpoint: endpoint,
            load_balancer_dns: load_balancer.map(|h: LoadBalancerHandles| h.dns_name),
        });

        self.tracker.mark_available().await.map_err(persist_failed)?;
        info!(nodes = total_nodes, "cluster environment available");
        Ok(())
    }

    /// Launch one node pool. The image is resolved once per pool; each
    /// instance then runs create → wait-until-running → describe → tag as
    /// one independent concurrent unit. All units are joined before
    /// aggregation: any unit failure fails the pool with a combined error,
    /// and siblings that came up stay up.
    async fn launch_pool(
        &self,
        spec: &EnvironmentSpec,
        pool: &NodePoolSpec,
        role: NodeRole,
        net: &NetworkResources,
        security_group_id: &str,
    ) -> std::result::Result<Vec<InstanceInfo>, AwsError> {
        let query = ImageQuery::for_pool(spec, pool);
        let resolved = self.resolver.resolve(&query).await?;
        self.resolver
            .ensure_architecture_supported(query.instance_type, resolved.architecture)
            .await?;
        let username = effective_username(spec.auth.username.as_deref(), &resolved)?;
        let root_device_name = self
            .ec2
            .describe_image(&resolved.image_id)
            .await?
            .root_device_name()
            .map(str::to_string);

        let role_slug = match role {
            NodeRole::ControlPlane => "cp",
            NodeRole::Worker => "worker",
        };

        let mut units = JoinSet::new();
        for index in 0..pool.count {
            let ec2 = self.ec2.clone();
            let username = username.clone();
            let params = LaunchParams {
                env: spec.name.clone(),
                name: format!("{}-{}-{}", spec.name, role_slug, index),
                image_id: resolved.image_id.clone(),
                instance_type: query.instance_type.to_string(),
                key_name: spec.auth.key_name.clone(),
                subnet_id: net.subnet_id.clone(),
                security_group_id: security_group_id.to_string(),
                root_device_name: root_device_name.clone(),
                root_volume_gb: spec
                    .instance
                    .root_volume_gb
                    .unwrap_or(DEFAULT_ROOT_VOLUME_GB),
                role: Some(role),
            };
            units.spawn(async move { launch_unit(ec2, params, role, username).await });
        }

        let total = pool.count as usize;
        let mut instances = Vec::with_capacity(total);
        let mut failures = Vec::new();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(info)) => instances.push(info),
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(join_err) => failures.push(format!("task panicked: {join_err}")),
            }
        }

        if !failures.is_empty() {
            return Err(AwsError::InstancePool {
                failed: failures.len(),
                total,
                details: failures.join("; "),
            });
        }

        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }
}

/// One concurrent pool unit.
async fn launch_unit(
    ec2: Ec2Api,
    params: LaunchParams,
    role: NodeRole,
    ssh_username: String,
) -> std::result::Result<InstanceInfo, AwsError> {
    let name = params.name.clone();
    let instance_id = ec2.run_instance(&params).await?;
    let view = ec2
        .wait_for_instance_state(&instance_id, InstanceStateName::Running, RUNNING_TIMEOUT)
        .await?;

    if let Some(eni) = &view.network_interface_id {
        ec2.create_name_tag(eni, &format!("{name}-eni")).await?;
    }

    Ok(InstanceInfo {
        instance_id,
        name,
        role,
        public_ip: view.public_ip,
        private_ip: view.private_ip,
        public_dns: view.public_dns,
        network_interface_id: view.network_interface_id,
        ssh_username,
    })
}

fn tagged(reason: &'static str, err: AwsError) -> (&'static str, CloudError) {
    (reason, err.into())
}

fn persist_failed(err: CloudError) -> (&'static str, CloudError) {
    ("StatusPersistFailed", err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, dns: Option<&str>) -> InstanceInfo {
        InstanceInfo {
            instance_id: format!("i-{name}"),
            name: name.to_string(),
            role: NodeRole::ControlPlane,
            public_ip: Some("1.2.3.4".to_string()),
            private_ip: Some("10.0.0.5".to_string()),
            public_dns: dns.map(str::to_string),
            network_interface_id: None,
            ssh_username: "ubuntu".to_string(),
        }
    }

    #[test]
    fn ha_endpoint_is_the_load_balancer_dns() {
        let cp = vec![
            node("cp-0", Some("cp0.example.amazonaws.com")),
            node("cp-1", Some("cp1.example.amazonaws.com")),
        ];
        let endpoint = control_plane_endpoint(Some("lb.elb.amazonaws.com"), &cp);
        assert_eq!(endpoint.as_deref(), Some("lb.elb.amazonaws.com"));
    }

    #[test]
    fn non_ha_endpoint_is_the_first_control_plane_dns() {
        let cp = vec![
            node("cp-0", Some("cp0.example.amazonaws.com")),
            node("cp-1", Some("cp1.example.amazonaws.com")),
        ];
        let endpoint = control_plane_endpoint(None, &cp);
        assert_eq!(endpoint.as_deref(), Some("cp0.example.amazonaws.com"));
    }

    #[test]
    fn endpoint_falls_back_to_public_ip_then_none() {
        let cp = vec![node("cp-0", None)];
        assert_eq!(control_plane_endpoint(None, &cp).as_deref(), Some("1.2.3.4"));
        assert_eq!(control_plane_endpoint(None, &[]), None);
    }
}
