//! Reconstruction of teardown state from the persisted properties ledger.
//!
//! After a crash or across CI jobs, the cache file is the only record of
//! what was created. These views are always rebuilt by parsing the persisted
//! properties, never carried over from live memory.

use skiff_cloud::status::{EnvironmentStatus, NodeRole, NodeStatus};

/// Property names used in the resource-id ledger.
pub mod keys {
    pub const VPC_ID: &str = "vpc-id";
    pub const SUBNET_ID: &str = "subnet-id";
    pub const INTERNET_GATEWAY_ID: &str = "internet-gateway-id";
    pub const ROUTE_TABLE_ID: &str = "route-table-id";
    pub const SECURITY_GROUP_ID: &str = "security-group-id";
    pub const INSTANCE_ID: &str = "instance-id";
    pub const PUBLIC_DNS_NAME: &str = "public-dns-name";
    pub const PUBLIC_IP: &str = "public-ip";
    pub const SSH_USERNAME: &str = "ssh-username";
    pub const LOAD_BALANCER_ARN: &str = "load-balancer-arn";
    pub const LOAD_BALANCER_DNS: &str = "load-balancer-dns";
    pub const TARGET_GROUP_ARN: &str = "target-group-arn";
    pub const CONTROL_PLANE_ENDPOINT: &str = "control-plane-endpoint";
}

/// Single-node teardown view of the ledger.
#[derive(Debug, Clone, Default)]
pub struct AwsCache {
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    pub internet_gateway_id: Option<String>,
    pub route_table_id: Option<String>,
    pub security_group_id: Option<String>,
    pub instance_id: Option<String>,
    pub public_dns_name: Option<String>,
}

impl AwsCache {
    pub fn from_status(status: &EnvironmentStatus) -> Self {
        let get = |name: &str| status.property(name).map(str::to_string);
        Self {
            vpc_id: get(keys::VPC_ID),
            subnet_id: get(keys::SUBNET_ID),
            internet_gateway_id: get(keys::INTERNET_GATEWAY_ID),
            route_table_id: get(keys::ROUTE_TABLE_ID),
            security_group_id: get(keys::SECURITY_GROUP_ID),
            instance_id: get(keys::INSTANCE_ID),
            public_dns_name: get(keys::PUBLIC_DNS_NAME),
        }
    }
}

/// One created instance, as the cluster orchestrator sees it.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub name: String,
    pub role: NodeRole,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub public_dns: Option<String>,
    pub network_interface_id: Option<String>,
    pub ssh_username: String,
}

impl InstanceInfo {
    /// Rebuild from a persisted node summary. The network interface id is
    /// not persisted; teardown does not need it.
    pub fn from_node(node: &NodeStatus) -> Self {
        Self {
            instance_id: node.instance_id.clone(),
            name: node.name.clone(),
            role: node.role,
            public_ip: node.public_ip.clone(),
            private_ip: node.private_ip.clone(),
            public_dns: node.public_dns.clone(),
            network_interface_id: None,
            ssh_username: node.ssh_username.clone(),
        }
    }

    pub fn to_node(&self, phase: &str) -> NodeStatus {
        NodeStatus {
            name: self.name.clone(),
            role: self.role,
            instance_id: self.instance_id.clone(),
            public_ip: self.public_ip.clone(),
            private_ip: self.private_ip.clone(),
            public_dns: self.public_dns.clone(),
            ssh_username: self.ssh_username.clone(),
            phase: phase.to_string(),
        }
    }
}

/// Cluster teardown view: the single-node fields plus per-role instance
/// lists and the load-balancer handles.
#[derive(Debug, Clone, Default)]
pub struct ClusterCache {
    pub network: AwsCache,
    pub control_plane: Vec<InstanceInfo>,
    pub workers: Vec<InstanceInfo>,
    pub load_balancer_arn: Option<String>,
    pub load_balancer_dns: Option<String>,
    pub target_group_arn: Option<String>,
}

impl ClusterCache {
    pub fn from_status(status: &EnvironmentStatus) -> Self {
        let get = |name: &str| status.property(name).map(str::to_string);
        let (control_plane, workers) = status
            .cluster
            .as_ref()
            .map(|c| {
                c.nodes
                    .iter()
                    .map(InstanceInfo::from_node)
                    .partition(|i| i.role == NodeRole::ControlPlane)
            })
            .unwrap_or_default();

        Self {
            network: AwsCache::from_status(status),
            control_plane,
            workers,
            load_balancer_arn: get(keys::LOAD_BALANCER_ARN),
            load_balancer_dns: get(keys::LOAD_BALANCER_DNS),
            target_group_arn: get(keys::TARGET_GROUP_ARN),
        }
    }

    /// Every instance id known to the ledger, de-duplicated: cluster nodes
    /// when present, otherwise the single cached instance id.
    pub fn all_instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .control_plane
            .iter()
            .chain(self.workers.iter())
            .map(|i| i.instance_id.clone())
            .collect();
        if ids.is_empty() {
            if let Some(id) = &self.network.instance_id {
                ids.push(id.clone());
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_cloud::status::{ClusterStatus, Property};

    fn prop(name: &str, value: &str) -> Property {
        Property {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn node(name: &str, role: NodeRole, instance_id: &str) -> NodeStatus {
        NodeStatus {
            name: name.to_string(),
            role,
            instance_id: instance_id.to_string(),
            public_ip: Some("1.2.3.4".to_string()),
            private_ip: Some("10.0.0.10".to_string()),
            public_dns: Some(format!("{name}.example.amazonaws.com")),
            ssh_username: "ubuntu".to_string(),
            phase: "ready".to_string(),
        }
    }

    #[test]
    fn single_node_cache_parses_properties() {
        let status = EnvironmentStatus {
            properties: vec![
                prop(keys::VPC_ID, "vpc-1"),
                prop(keys::SUBNET_ID, "subnet-1"),
                prop(keys::INSTANCE_ID, "i-1"),
            ],
            ..Default::default()
        };

        let cache = AwsCache::from_status(&status);
        assert_eq!(cache.vpc_id.as_deref(), Some("vpc-1"));
        assert_eq!(cache.subnet_id.as_deref(), Some("subnet-1"));
        assert_eq!(cache.instance_id.as_deref(), Some("i-1"));
        assert!(cache.security_group_id.is_none());
    }

    #[test]
    fn cluster_cache_splits_roles_and_collects_ids() {
        let status = EnvironmentStatus {
            properties: vec![
                prop(keys::VPC_ID, "vpc-1"),
                prop(keys::LOAD_BALANCER_ARN, "arn:lb"),
                prop(keys::TARGET_GROUP_ARN, "arn:tg"),
            ],
            cluster: Some(ClusterStatus {
                nodes: vec![
                    node("e2e-cp-0", NodeRole::ControlPlane, "i-cp0"),
                    node("e2e-cp-1", NodeRole::ControlPlane, "i-cp1"),
                    node("e2e-worker-0", NodeRole::Worker, "i-w0"),
                ],
                total_nodes: 3,
                ready_nodes: 3,
                phase: "ready".to_string(),
                control_plane_endpoint: None,
                load_balancer_dns: None,
            }),
            ..Default::default()
        };

        let cache = ClusterCache::from_status(&status);
        assert_eq!(cache.control_plane.len(), 2);
        assert_eq!(cache.workers.len(), 1);
        assert_eq!(cache.load_balancer_arn.as_deref(), Some("arn:lb"));
        assert_eq!(
            cache.all_instance_ids(),
            vec!["i-cp0", "i-cp1", "i-w0"]
        );
    }

    #[test]
    fn instance_ids_fall_back_to_single_cached_id_and_dedupe() {
        let status = EnvironmentStatus {
            properties: vec![prop(keys::INSTANCE_ID, "i-solo")],
            ..Default::default()
        };
        let cache = ClusterCache::from_status(&status);
        assert_eq!(cache.all_instance_ids(), vec!["i-solo"]);

        // duplicated node entries collapse
        let status = EnvironmentStatus {
            cluster: Some(ClusterStatus {
                nodes: vec![
                    node("a", NodeRole::Worker, "i-dup"),
                    node("b", NodeRole::Worker, "i-dup"),
                ],
                total_nodes: 2,
                ready_nodes: 2,
                phase: "ready".to_string(),
                control_plane_endpoint: None,
                load_balancer_dns: None,
            }),
            ..Default::default()
        };
        let cache = ClusterCache::from_status(&status);
        assert_eq!(cache.all_instance_ids(), vec!["i-dup"]);
    }

    #[test]
    fn empty_status_yields_empty_cache() {
        let cache = ClusterCache::from_status(&EnvironmentStatus::default());
        assert!(cache.all_instance_ids().is_empty());
        assert!(cache.network.vpc_id.is_none());
    }
}
