//! EC2 wire wrapper.
//!
//! Thin typed layer over `aws-sdk-ec2`. Every call carries its own timeout
//! and goes through the classified retry engine, so orchestrators never talk
//! to the SDK directly. Request values are constructed locally per call;
//! nothing here is shared mutable state.

use crate::error::{AwsError, AwsResult, sdk_err};
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, BlockDeviceMapping, EbsBlockDevice, Filter, Image,
    InstanceNetworkInterfaceSpecification, InstanceStateName, InstanceType, InstanceTypeInfo,
    ResourceType, Tag, TagSpecification, VolumeType,
};
use skiff_cloud::{NodeRole, RetryPolicy, retry_classified};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Per-call timeout for ordinary API calls.
pub(crate) const API_TIMEOUT: Duration = Duration::from_secs(120);
/// Instance state polling cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Bounded wait for an instance to reach running.
pub(crate) const RUNNING_TIMEOUT: Duration = Duration::from_secs(600);
/// Bounded wait for an instance to reach terminated.
pub(crate) const TERMINATION_TIMEOUT: Duration = Duration::from_secs(900);

/// Tag carried by every resource Skiff creates.
pub(crate) const ENVIRONMENT_TAG: &str = "skiff:environment";
const ROLE_TAG: &str = "skiff:role";

/// One security group ingress rule.
#[derive(Debug, Clone)]
pub struct IngressRule {
    pub protocol: &'static str,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
    pub description: String,
}

/// Parameters for launching one instance.
#[derive(Debug, Clone)]
pub struct LaunchParams {
    pub env: String,
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub root_device_name: Option<String>,
    pub root_volume_gb: i32,
    pub role: Option<NodeRole>,
}

/// Observed instance fields the orchestrators care about.
#[derive(Debug, Clone)]
pub struct InstanceView {
    pub instance_id: String,
    pub state: Option<InstanceStateName>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub public_dns: Option<String>,
    pub network_interface_id: Option<String>,
}

/// Remaining dependents of a VPC, enumerated for operator diagnosis when a
/// delete is stuck.
#[derive(Debug, Default)]
pub struct VpcDependents {
    pub network_interfaces: Vec<String>,
    pub security_groups: Vec<String>,
    pub subnets: Vec<String>,
}

#[derive(Clone)]
pub struct Ec2Api {
    client: Client,
    retry: RetryPolicy,
}

fn tag_spec(resource_type: ResourceType, env: &str, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key("Name").value(name).build())
        .tags(Tag::builder().key(ENVIRONMENT_TAG).value(env).build())
        .build()
}

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

impl Ec2Api {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    /// Run one API call with the per-call timeout, retrying transient
    /// failures. The closure rebuilds the request on every attempt.
    async fn call<T, F, Fut>(&self, name: &'static str, mut f: F) -> AwsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AwsResult<T>>,
    {
        retry_classified(&self.retry, name, None, || {
            let fut = f();
            async move {
                match tokio::time::timeout(API_TIMEOUT, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(AwsError::Timeout {
                        what: name.to_string(),
                        elapsed: API_TIMEOUT,
                    }),
                }
            }
        })
        .await
        .map_err(AwsError::from)
    }

    // --- networking ---

    pub async fn create_vpc(&self, env: &str, cidr: &str) -> AwsResult<String> {
        let cidr_owned = cidr.to_string();
        let env_owned = env.to_string();
        let resp = self
            .call("create-vpc", || {
                let cidr = cidr_owned.clone();
                let env = env_owned.clone();
                let client = self.client.clone();
                async move {
                    client
                        .create_vpc()
                        .cidr_block(&cidr)
                        .tag_specifications(tag_spec(ResourceType::Vpc, &env, &format!("{env}-vpc")))
                        .send()
                        .await
                        .map_err(|e| sdk_err("create-vpc", e))
                }
            })
            .await?;

        let vpc_id = resp
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or(AwsError::MissingField("vpc.vpc_id"))?
            .to_string();

        // DNS hostnames are required for reachable public DNS names.
        for (attr, hostnames) in [("dns-support", false), ("dns-hostnames", true)] {
            let id = vpc_id.clone();
            self.call("modify-vpc-attribute", || {
                let id = id.clone();
                let client = self.client.clone();
                async move {
                    let enabled = AttributeBooleanValue::builder().value(true).build();
                    let req = client.modify_vpc_attribute().vpc_id(&id);
                    let req = if hostnames {
                        req.enable_dns_hostnames(enabled)
                    } else {
                        req.enable_dns_support(enabled)
                    };
                    req.send()
                        .await
                        .map_err(|e| sdk_err("modify-vpc-attribute", e))
                        .map(|_| ())
                }
            })
            .await?;
            debug!(vpc = %vpc_id, attribute = attr, "enabled VPC attribute");
        }

        info!(vpc = %vpc_id, %cidr, "created VPC");
        Ok(vpc_id)
    }

    pub async fn create_subnet(&self, env: &str, vpc_id: &str, cidr: &str) -> AwsResult<String> {
        let (env, vpc_id, cidr) = (env.to_string(), vpc_id.to_string(), cidr.to_string());
        let resp = self
            .call("create-subnet", || {
                let (env, vpc_id, cidr) = (env.clone(), vpc_id.clone(), cidr.clone());
                let client = self.client.clone();
                async move {
                    client
                        .create_subnet()
                        .vpc_id(&vpc_id)
                        .cidr_block(&cidr)
                        .tag_specifications(tag_spec(
                            ResourceType::Subnet,
                            &env,
                            &format!("{env}-subnet"),
                        ))
                        .send()
                        .await
                        .map_err(|e| sdk_err("create-subnet", e))
                }
            })
            .await?;

        let subnet_id = resp
            .subnet()
            .and_then(|s| s.subnet_id())
            .ok_or(AwsError::MissingField("subnet.subnet_id"))?
            .to_string();

        let id = subnet_id.clone();
        self.call("modify-subnet-attribute", || {
            let id = id.clone();
            let client = self.client.clone();
            async move {
                client
                    .modify_subnet_attribute()
                    .subnet_id(&id)
                    .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
                    .send()
                    .await
                    .map_err(|e| sdk_err("modify-subnet-attribute", e))
                    .map(|_| ())
            }
        })
        .await?;

        info!(subnet = %subnet_id, %cidr, "created subnet");
        Ok(subnet_id)
    }

    pub async fn create_internet_gateway(&self, env: &str) -> AwsResult<String> {
        let env = env.to_string();
        let resp = self
            .call("create-internet-gateway", || {
                let env = env.clone();
                let client = self.client.clone();
                async move {
                    client
                        .create_internet_gateway()
                        .tag_specifications(tag_spec(
                            ResourceType::InternetGateway,
                            &env,
                            &format!("{env}-igw"),
                        ))
                        .send()
                        .await
                        .map_err(|e| sdk_err("create-internet-gateway", e))
                }
            })
            .await?;

        let igw_id = resp
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .ok_or(AwsError::MissingField("internet_gateway.internet_gateway_id"))?
            .to_string();
        info!(igw = %igw_id, "created internet gateway");
        Ok(igw_id)
    }

    pub async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> AwsResult<()> {
        let (igw_id, vpc_id) = (igw_id.to_string(), vpc_id.to_string());
        self.call("attach-internet-gateway", || {
            let (igw_id, vpc_id) = (igw_id.clone(), vpc_id.clone());
            let client = self.client.clone();
            async move {
                client
                    .attach_internet_gateway()
                    .internet_gateway_id(&igw_id)
                    .vpc_id(&vpc_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("attach-internet-gateway", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn create_route_table(&self, env: &str, vpc_id: &str) -> AwsResult<String> {
        let (env, vpc_id) = (env.to_string(), vpc_id.to_string());
        let resp = self
            .call("create-route-table", || {
                let (env, vpc_id) = (env.clone(), vpc_id.clone());
                let client = self.client.clone();
                async move {
                    client
                        .create_route_table()
                        .vpc_id(&vpc_id)
                        .tag_specifications(tag_spec(
                            ResourceType::RouteTable,
                            &env,
                            &format!("{env}-rt"),
                        ))
                        .send()
                        .await
                        .map_err(|e| sdk_err("create-route-table", e))
                }
            })
            .await?;

        let rt_id = resp
            .route_table()
            .and_then(|rt| rt.route_table_id())
            .ok_or(AwsError::MissingField("route_table.route_table_id"))?
            .to_string();
        info!(route_table = %rt_id, "created route table");
        Ok(rt_id)
    }

    pub async fn associate_route_table(&self, rt_id: &str, subnet_id: &str) -> AwsResult<()> {
        let (rt_id, subnet_id) = (rt_id.to_string(), subnet_id.to_string());
        self.call("associate-route-table", || {
            let (rt_id, subnet_id) = (rt_id.clone(), subnet_id.clone());
            let client = self.client.clone();
            async move {
                client
                    .associate_route_table()
                    .route_table_id(&rt_id)
                    .subnet_id(&subnet_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("associate-route-table", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn create_default_route(&self, rt_id: &str, igw_id: &str) -> AwsResult<()> {
        let (rt_id, igw_id) = (rt_id.to_string(), igw_id.to_string());
        self.call("create-route", || {
            let (rt_id, igw_id) = (rt_id.clone(), igw_id.clone());
            let client = self.client.clone();
            async move {
                client
                    .create_route()
                    .route_table_id(&rt_id)
                    .destination_cidr_block("0.0.0.0/0")
                    .gateway_id(&igw_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("create-route", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn create_security_group(
        &self,
        env: &str,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> AwsResult<String> {
        let (env, name, description, vpc_id) = (
            env.to_string(),
            name.to_string(),
            description.to_string(),
            vpc_id.to_string(),
        );
        let resp = self
            .call("create-security-group", || {
                let (env, name, description, vpc_id) = (
                    env.clone(),
                    name.clone(),
                    description.clone(),
                    vpc_id.clone(),
                );
                let client = self.client.clone();
                async move {
                    client
                        .create_security_group()
                        .group_name(&name)
                        .description(&description)
                        .vpc_id(&vpc_id)
                        .tag_specifications(tag_spec(ResourceType::SecurityGroup, &env, &name))
                        .send()
                        .await
                        .map_err(|e| sdk_err("create-security-group", e))
                }
            })
            .await?;

        let group_id = resp
            .group_id()
            .ok_or(AwsError::MissingField("security_group.group_id"))?
            .to_string();
        info!(security_group = %group_id, name = %name, "created security group");
        Ok(group_id)
    }

    pub async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> AwsResult<()> {
        use aws_sdk_ec2::types::{IpPermission, IpRange};

        let group_id = group_id.to_string();
        let permissions: Vec<IpPermission> = rules
            .iter()
            .map(|rule| {
                IpPermission::builder()
                    .ip_protocol(rule.protocol)
                    .from_port(rule.from_port)
                    .to_port(rule.to_port)
                    .ip_ranges(
                        IpRange::builder()
                            .cidr_ip(&rule.cidr)
                            .description(&rule.description)
                            .build(),
                    )
                    .build()
            })
            .collect();

        self.call("authorize-security-group-ingress", || {
            let group_id = group_id.clone();
            let permissions = permissions.clone();
            let client = self.client.clone();
            async move {
                client
                    .authorize_security_group_ingress()
                    .group_id(&group_id)
                    .set_ip_permissions(Some(permissions))
                    .send()
                    .await
                    .map_err(|e| sdk_err("authorize-security-group-ingress", e))
                    .map(|_| ())
            }
        })
        .await
    }

    // --- instances ---

    pub async fn run_instance(&self, params: &LaunchParams) -> AwsResult<String> {
        let params = params.clone();
        let resp = self
            .call("run-instances", || {
                let p = params.clone();
                let client = self.client.clone();
                async move {
                    let mut tags = TagSpecification::builder()
                        .resource_type(ResourceType::Instance)
                        .tags(Tag::builder().key("Name").value(&p.name).build())
                        .tags(Tag::builder().key(ENVIRONMENT_TAG).value(&p.env).build());
                    if let Some(role) = p.role {
                        tags = tags.tags(Tag::builder().key(ROLE_TAG).value(role.to_string()).build());
                    }

                    let mut req = client
                        .run_instances()
                        .image_id(&p.image_id)
                        .instance_type(InstanceType::from(p.instance_type.as_str()))
                        .min_count(1)
                        .max_count(1)
                        .key_name(&p.key_name)
                        .network_interfaces(
                            InstanceNetworkInterfaceSpecification::builder()
                                .device_index(0)
                                .subnet_id(&p.subnet_id)
                                .groups(&p.security_group_id)
                                .associate_public_ip_address(true)
                                .build(),
                        )
                        .tag_specifications(tags.build());

                    if let Some(device) = &p.root_device_name {
                        req = req.block_device_mappings(
                            BlockDeviceMapping::builder()
                                .device_name(device)
                                .ebs(
                                    EbsBlockDevice::builder()
                                        .volume_size(p.root_volume_gb)
                                        .volume_type(VolumeType::Gp3)
                                        .delete_on_termination(true)
                                        .build(),
                                )
                                .build(),
                        );
                    }

                    req.send().await.map_err(|e| sdk_err("run-instances", e))
                }
            })
            .await?;

        let instance_id = resp
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or(AwsError::MissingField("instance.instance_id"))?
            .to_string();
        info!(instance = %instance_id, name = %params.name, "launched instance");
        Ok(instance_id)
    }

    pub async fn describe_instance(&self, instance_id: &str) -> AwsResult<InstanceView> {
        let id = instance_id.to_string();
        let resp = self
            .call("describe-instances", || {
                let id = id.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_instances()
                        .instance_ids(&id)
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-instances", e))
                }
            })
            .await?;

        let instance = resp
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .ok_or_else(|| AwsError::Api {
                context: "describe-instances".to_string(),
                code: "InvalidInstanceID.NotFound".to_string(),
                message: format!("instance {instance_id} not found"),
            })?;

        let non_empty = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);
        Ok(InstanceView {
            instance_id: instance_id.to_string(),
            state: instance.state().and_then(|s| s.name()).cloned(),
            public_ip: non_empty(instance.public_ip_address()),
            private_ip: non_empty(instance.private_ip_address()),
            public_dns: non_empty(instance.public_dns_name()),
            network_interface_id: instance
                .network_interfaces()
                .first()
                .and_then(|ni| ni.network_interface_id())
                .map(str::to_string),
        })
    }

    /// Poll until the instance reaches `target` or the bound elapses.
    ///
    /// A not-found response while waiting for `Terminated` counts as
    /// terminal. An instance that starts shutting down while we wait for
    /// `Running` fails fast instead of burning the whole bound.
    pub async fn wait_for_instance_state(
        &self,
        instance_id: &str,
        target: InstanceStateName,
        timeout: Duration,
    ) -> AwsResult<InstanceView> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.describe_instance(instance_id).await {
                Ok(view) => {
                    if view.state.as_ref() == Some(&target) {
                        return Ok(view);
                    }
                    if target == InstanceStateName::Running
                        && matches!(
                            view.state,
                            Some(InstanceStateName::ShuttingDown)
                                | Some(InstanceStateName::Terminated)
                        )
                    {
                        return Err(AwsError::Api {
                            context: "wait-for-running".to_string(),
                            code: "IncorrectInstanceState".to_string(),
                            message: format!(
                                "instance {instance_id} entered {:?} while waiting for running",
                                view.state
                            ),
                        });
                    }
                    debug!(instance = %instance_id, state = ?view.state, target = target.as_str(), "waiting for instance state");
                }
                Err(e) if e.is_not_found() && target == InstanceStateName::Terminated => {
                    return Ok(InstanceView {
                        instance_id: instance_id.to_string(),
                        state: Some(InstanceStateName::Terminated),
                        public_ip: None,
                        private_ip: None,
                        public_dns: None,
                        network_interface_id: None,
                    });
                }
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AwsError::Timeout {
                    what: format!("instance {} reaching {}", instance_id, target.as_str()),
                    elapsed: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn create_name_tag(&self, resource_id: &str, name: &str) -> AwsResult<()> {
        let (resource_id, name) = (resource_id.to_string(), name.to_string());
        self.call("create-tags", || {
            let (resource_id, name) = (resource_id.clone(), name.clone());
            let client = self.client.clone();
            async move {
                client
                    .create_tags()
                    .resources(&resource_id)
                    .tags(Tag::builder().key("Name").value(&name).build())
                    .send()
                    .await
                    .map_err(|e| sdk_err("create-tags", e))
                    .map(|_| ())
            }
        })
        .await
    }

    /// Disable the source/destination check. Required for CNI overlay
    /// traffic to traverse the instance.
    pub async fn set_source_dest_check(&self, eni_id: &str, enabled: bool) -> AwsResult<()> {
        let eni_id = eni_id.to_string();
        self.call("modify-network-interface-attribute", || {
            let eni_id = eni_id.clone();
            let client = self.client.clone();
            async move {
                client
                    .modify_network_interface_attribute()
                    .network_interface_id(&eni_id)
                    .source_dest_check(AttributeBooleanValue::builder().value(enabled).build())
                    .send()
                    .await
                    .map_err(|e| sdk_err("modify-network-interface-attribute", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn terminate_instances(&self, instance_ids: &[String]) -> AwsResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let ids = instance_ids.to_vec();
        self.call("terminate-instances", || {
            let ids = ids.clone();
            let client = self.client.clone();
            async move {
                client
                    .terminate_instances()
                    .set_instance_ids(Some(ids))
                    .send()
                    .await
                    .map_err(|e| sdk_err("terminate-instances", e))
                    .map(|_| ())
            }
        })
        .await
    }

    // --- images and instance types ---

    pub async fn describe_image(&self, image_id: &str) -> AwsResult<Image> {
        let id = image_id.to_string();
        let resp = self
            .call("describe-images", || {
                let id = id.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_images()
                        .image_ids(&id)
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-images", e))
                }
            })
            .await?;

        resp.images()
            .first()
            .cloned()
            .ok_or_else(|| AwsError::NoImagesFound(image_id.to_string()))
    }

    /// Search available images by owner, name pattern, and architecture.
    /// Paginated: collects every match so the newest-by-creation-date
    /// selection sees the full candidate set.
    pub async fn search_images(
        &self,
        owner: &str,
        name_pattern: &str,
        architecture: &str,
    ) -> AwsResult<Vec<Image>> {
        let mut paginator = self
            .client
            .describe_images()
            .owners(owner)
            .filters(filter("name", name_pattern))
            .filters(filter("architecture", architecture))
            .filters(filter("state", "available"))
            .into_paginator()
            .items()
            .send();

        let collect = async {
            let mut images = Vec::new();
            while let Some(item) = paginator.next().await {
                images.push(item.map_err(|e| sdk_err("describe-images", e))?);
            }
            Ok::<_, AwsError>(images)
        };

        match tokio::time::timeout(API_TIMEOUT, collect).await {
            Ok(result) => result,
            Err(_) => Err(AwsError::Timeout {
                what: "describe-images".to_string(),
                elapsed: API_TIMEOUT,
            }),
        }
    }

    pub async fn describe_instance_type(&self, instance_type: &str) -> AwsResult<InstanceTypeInfo> {
        let ty = instance_type.to_string();
        let resp = self
            .call("describe-instance-types", || {
                let ty = ty.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_instance_types()
                        .instance_types(InstanceType::from(ty.as_str()))
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-instance-types", e))
                }
            })
            .await?;

        resp.instance_types().first().cloned().ok_or_else(|| AwsError::Api {
            context: "describe-instance-types".to_string(),
            code: "InvalidInstanceType".to_string(),
            message: format!("instance type {instance_type} not found in this region"),
        })
    }

    // --- deletion ---

    pub async fn delete_security_group(&self, group_id: &str) -> AwsResult<()> {
        let group_id = group_id.to_string();
        self.call("delete-security-group", || {
            let group_id = group_id.clone();
            let client = self.client.clone();
            async move {
                client
                    .delete_security_group()
                    .group_id(&group_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("delete-security-group", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn delete_subnet(&self, subnet_id: &str) -> AwsResult<()> {
        let subnet_id = subnet_id.to_string();
        self.call("delete-subnet", || {
            let subnet_id = subnet_id.clone();
            let client = self.client.clone();
            async move {
                client
                    .delete_subnet()
                    .subnet_id(&subnet_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("delete-subnet", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn delete_route_table(&self, rt_id: &str) -> AwsResult<()> {
        let rt_id = rt_id.to_string();
        self.call("delete-route-table", || {
            let rt_id = rt_id.clone();
            let client = self.client.clone();
            async move {
                client
                    .delete_route_table()
                    .route_table_id(&rt_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("delete-route-table", e))
                    .map(|_| ())
            }
        })
        .await
    }

    /// The VPC's main route table cannot be deleted; it goes away with the
    /// VPC itself.
    pub async fn is_main_route_table(&self, rt_id: &str) -> AwsResult<bool> {
        let rt_id = rt_id.to_string();
        let resp = self
            .call("describe-route-tables", || {
                let rt_id = rt_id.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_route_tables()
                        .route_table_ids(&rt_id)
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-route-tables", e))
                }
            })
            .await?;

        Ok(resp
            .route_tables()
            .iter()
            .flat_map(|rt| rt.associations())
            .any(|assoc| assoc.main().unwrap_or(false)))
    }

    pub async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> AwsResult<()> {
        let (igw_id, vpc_id) = (igw_id.to_string(), vpc_id.to_string());
        self.call("detach-internet-gateway", || {
            let (igw_id, vpc_id) = (igw_id.clone(), vpc_id.clone());
            let client = self.client.clone();
            async move {
                client
                    .detach_internet_gateway()
                    .internet_gateway_id(&igw_id)
                    .vpc_id(&vpc_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("detach-internet-gateway", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn delete_internet_gateway(&self, igw_id: &str) -> AwsResult<()> {
        let igw_id = igw_id.to_string();
        self.call("delete-internet-gateway", || {
            let igw_id = igw_id.clone();
            let client = self.client.clone();
            async move {
                client
                    .delete_internet_gateway()
                    .internet_gateway_id(&igw_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("delete-internet-gateway", e))
                    .map(|_| ())
            }
        })
        .await
    }

    pub async fn delete_vpc(&self, vpc_id: &str) -> AwsResult<()> {
        let vpc_id = vpc_id.to_string();
        self.call("delete-vpc", || {
            let vpc_id = vpc_id.clone();
            let client = self.client.clone();
            async move {
                client
                    .delete_vpc()
                    .vpc_id(&vpc_id)
                    .send()
                    .await
                    .map_err(|e| sdk_err("delete-vpc", e))
                    .map(|_| ())
            }
        })
        .await
    }

    /// Whether a resource still shows up in a describe call. Not-found is
    /// reported as absent, any other error propagates.
    pub async fn vpc_exists(&self, vpc_id: &str) -> AwsResult<bool> {
        let vpc_id = vpc_id.to_string();
        let result = self
            .call("describe-vpcs", || {
                let vpc_id = vpc_id.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_vpcs()
                        .vpc_ids(&vpc_id)
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-vpcs", e))
                }
            })
            .await;
        match result {
            Ok(resp) => Ok(!resp.vpcs().is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn security_group_exists(&self, group_id: &str) -> AwsResult<bool> {
        let group_id = group_id.to_string();
        let result = self
            .call("describe-security-groups", || {
                let group_id = group_id.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_security_groups()
                        .group_ids(&group_id)
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-security-groups", e))
                }
            })
            .await;
        match result {
            Ok(resp) => Ok(!resp.security_groups().is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn subnet_exists(&self, subnet_id: &str) -> AwsResult<bool> {
        let subnet_id = subnet_id.to_string();
        let result = self
            .call("describe-subnets", || {
                let subnet_id = subnet_id.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_subnets()
                        .subnet_ids(&subnet_id)
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-subnets", e))
                }
            })
            .await;
        match result {
            Ok(resp) => Ok(!resp.subnets().is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Enumerate what is still attached to a VPC, for the diagnostic log
    /// when deletion is stuck on dependents.
    pub async fn vpc_dependents(&self, vpc_id: &str) -> AwsResult<VpcDependents> {
        let vpc = vpc_id.to_string();

        let enis = self
            .call("describe-network-interfaces", || {
                let vpc = vpc.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_network_interfaces()
                        .filters(filter("vpc-id", &vpc))
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-network-interfaces", e))
                }
            })
            .await?;

        let groups = self
            .call("describe-security-groups", || {
                let vpc = vpc.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_security_groups()
                        .filters(filter("vpc-id", &vpc))
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-security-groups", e))
                }
            })
            .await?;

        let subnets = self
            .call("describe-subnets", || {
                let vpc = vpc.clone();
                let client = self.client.clone();
                async move {
                    client
                        .describe_subnets()
                        .filters(filter("vpc-id", &vpc))
                        .send()
                        .await
                        .map_err(|e| sdk_err("describe-subnets", e))
                }
            })
            .await?;

        Ok(VpcDependents {
            network_interfaces: enis
                .network_interfaces()
                .iter()
                .filter_map(|ni| ni.network_interface_id())
                .map(str::to_string)
                .collect(),
            security_groups: groups
                .security_groups()
                .iter()
                .filter(|g| g.group_name() != Some("default"))
                .filter_map(|g| g.group_id())
                .map(str::to_string)
                .collect(),
            subnets: subnets
                .subnets()
                .iter()
                .filter_map(|s| s.subnet_id())
                .map(str::to_string)
                .collect(),
        })
    }
}
