//! Shared network provisioning phases and security group rulesets.

use crate::cache::keys;
use crate::ec2::{Ec2Api, IngressRule};
use crate::error::{AwsError, AwsResult};
use crate::undo::{Undo, UndoStack};
use skiff_cloud::StatusTracker;
use skiff_core::EnvironmentSpec;
use tracing::{info, warn};

pub(crate) const VPC_CIDR: &str = "10.0.0.0/16";
pub(crate) const SUBNET_CIDR: &str = "10.0.0.0/24";

const SSH_PORT: i32 = 22;
const HTTPS_PORT: i32 = 443;
pub(crate) const API_PORT: i32 = 6443;

const CHECKIP_URL: &str = "https://checkip.amazonaws.com";

#[derive(Debug, Clone)]
pub(crate) struct NetworkResources {
    pub vpc_id: String,
    pub subnet_id: String,
    pub internet_gateway_id: String,
    pub route_table_id: String,
}

/// The first four phases shared by the single-node and cluster paths:
/// VPC, subnet, internet gateway, route table. Records each id in the
/// ledger and on the undo stack as soon as it exists, so a failure at any
/// point leaves enough state behind to clean up.
///
/// Returns the failing phase's reason tag with the error.
pub(crate) async fn provision_network(
    ec2: &Ec2Api,
    tracker: &mut StatusTracker,
    undo: &mut UndoStack,
) -> Result<NetworkResources, (&'static str, AwsError)> {
    let env = tracker.spec().name.clone();

    let vpc_id = ec2
        .create_vpc(&env, VPC_CIDR)
        .await
        .map_err(|e| ("VpcCreationFailed", e))?;
    tracker.set_property(keys::VPC_ID, &vpc_id);
    undo.push(Undo::Vpc(vpc_id.clone()));

    let subnet_id = ec2
        .create_subnet(&env, &vpc_id, SUBNET_CIDR)
        .await
        .map_err(|e| ("SubnetCreationFailed", e))?;
    tracker.set_property(keys::SUBNET_ID, &subnet_id);
    undo.push(Undo::Subnet(subnet_id.clone()));

    let igw_id = ec2
        .create_internet_gateway(&env)
        .await
        .map_err(|e| ("InternetGatewayFailed", e))?;
    tracker.set_property(keys::INTERNET_GATEWAY_ID, &igw_id);
    undo.push(Undo::InternetGateway {
        igw_id: igw_id.clone(),
        vpc_id: vpc_id.clone(),
    });
    ec2.attach_internet_gateway(&igw_id, &vpc_id)
        .await
        .map_err(|e| ("InternetGatewayFailed", e))?;

    let route_table_id = ec2
        .create_route_table(&env, &vpc_id)
        .await
        .map_err(|e| ("RouteTableFailed", e))?;
    tracker.set_property(keys::ROUTE_TABLE_ID, &route_table_id);
    undo.push(Undo::RouteTable(route_table_id.clone()));
    ec2.associate_route_table(&route_table_id, &subnet_id)
        .await
        .map_err(|e| ("RouteTableFailed", e))?;
    ec2.create_default_route(&route_table_id, &igw_id)
        .await
        .map_err(|e| ("RouteTableFailed", e))?;

    info!(vpc = %vpc_id, subnet = %subnet_id, "network ready");
    Ok(NetworkResources {
        vpc_id,
        subnet_id,
        internet_gateway_id: igw_id,
        route_table_id,
    })
}

/// Detect the operator's public address so the security group can be
/// scoped to it instead of the whole internet.
pub(crate) async fn detect_operator_cidr() -> AwsResult<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| AwsError::IpDetection(e.to_string()))?;

    let body = client
        .get(CHECKIP_URL)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AwsError::IpDetection(e.to_string()))?
        .text()
        .await
        .map_err(|e| AwsError::IpDetection(e.to_string()))?;

    let ip: std::net::IpAddr = body
        .trim()
        .parse()
        .map_err(|e| AwsError::IpDetection(format!("unparseable response {body:?}: {e}")))?;
    Ok(format!("{ip}/32"))
}

/// The operator address plus any configured extra ranges. If detection
/// fails and no extra ranges are configured, fail instead of falling back
/// to 0.0.0.0/0.
pub(crate) async fn resolve_access_cidrs(spec: &EnvironmentSpec) -> AwsResult<Vec<String>> {
    let mut cidrs = Vec::new();
    match detect_operator_cidr().await {
        Ok(cidr) => {
            info!(operator = %cidr, "detected operator address");
            cidrs.push(cidr);
        }
        Err(e) if spec.extra_access_cidrs.is_empty() => {
            return Err(AwsError::IpDetection(format!(
                "{e}; set extra_access_cidrs to provision without detection"
            )));
        }
        Err(e) => {
            warn!(error = %e, "operator address detection failed, using configured ranges only");
        }
    }
    cidrs.extend(spec.extra_access_cidrs.iter().cloned());
    Ok(cidrs)
}

fn rule(
    protocol: &'static str,
    from_port: i32,
    to_port: i32,
    cidr: &str,
    description: &str,
) -> IngressRule {
    IngressRule {
        protocol,
        from_port,
        to_port,
        cidr: cidr.to_string(),
        description: description.to_string(),
    }
}

/// Single-node ingress: SSH, HTTPS, and the API port, scoped to the
/// operator ranges.
pub(crate) fn single_node_ingress(cidrs: &[String]) -> Vec<IngressRule> {
    let mut rules = Vec::new();
    for cidr in cidrs {
        rules.push(rule("tcp", SSH_PORT, SSH_PORT, cidr, "ssh"));
        rules.push(rule("tcp", HTTPS_PORT, HTTPS_PORT, cidr, "https"));
        rules.push(rule("tcp", API_PORT, API_PORT, cidr, "kubernetes api"));
    }
    rules
}

/// Cluster ingress: the external rules plus intra-VPC rules for the
/// Kubernetes control plane and the CNI overlay.
pub(crate) fn cluster_ingress(cidrs: &[String]) -> Vec<IngressRule> {
    let mut rules = single_node_ingress(cidrs);

    let vpc = VPC_CIDR;
    rules.push(rule("tcp", API_PORT, API_PORT, vpc, "kubernetes api (intra-vpc)"));
    rules.push(rule("tcp", 10250, 10250, vpc, "kubelet"));
    rules.push(rule("tcp", 10259, 10259, vpc, "kube-scheduler"));
    rules.push(rule("tcp", 10257, 10257, vpc, "kube-controller-manager"));
    rules.push(rule("tcp", 2379, 2380, vpc, "etcd client/peer"));
    rules.push(rule("udp", 4789, 4789, vpc, "vxlan overlay"));
    rules.push(rule("udp", 8472, 8472, vpc, "vxlan overlay (flannel)"));
    rules.push(rule("tcp", 179, 179, vpc, "bgp"));
    rules.push(rule("tcp", 5473, 5473, vpc, "typha"));
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_rules_cover_every_cidr() {
        let cidrs = vec!["198.51.100.7/32".to_string(), "10.8.0.0/16".to_string()];
        let rules = single_node_ingress(&cidrs);
        assert_eq!(rules.len(), 6);
        assert!(rules.iter().any(|r| r.from_port == 22 && r.cidr == "198.51.100.7/32"));
        assert!(rules.iter().any(|r| r.from_port == 6443 && r.cidr == "10.8.0.0/16"));
    }

    #[test]
    fn cluster_rules_add_intra_vpc_ports() {
        let cidrs = vec!["198.51.100.7/32".to_string()];
        let rules = cluster_ingress(&cidrs);

        let intra: Vec<_> = rules.iter().filter(|r| r.cidr == VPC_CIDR).collect();
        assert!(intra.iter().any(|r| r.from_port == 10250));
        assert!(intra.iter().any(|r| r.from_port == 2379 && r.to_port == 2380));
        assert!(intra.iter().any(|r| r.protocol == "udp" && r.from_port == 4789));
        assert!(intra.iter().any(|r| r.protocol == "udp" && r.from_port == 8472));
        assert!(intra.iter().any(|r| r.from_port == 179));
        assert!(intra.iter().any(|r| r.from_port == 5473));
        // external rules are still present
        assert!(rules.iter().any(|r| r.from_port == 22 && r.cidr == "198.51.100.7/32"));
    }
}
