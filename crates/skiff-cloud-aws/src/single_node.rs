//! Single-node create pipeline.
//!
//! Strictly sequential phases, each gated on the previous one. Every phase
//! failure records a Degraded condition with a phase-specific reason and
//! replays the undo stack; the unwind logs its own errors without replacing
//! the original failure cause.

use crate::cache::keys;
use crate::ec2::{Ec2Api, LaunchParams, RUNNING_TIMEOUT};
use crate::error::AwsError;
use crate::image::{ImageQuery, ImageResolver, effective_username};
use crate::network;
use crate::undo::{Undo, UndoStack};
use aws_sdk_ec2::types::InstanceStateName;
use skiff_cloud::{CloudError, Result, StatusTracker};
use tracing::{error, info};

pub(crate) const DEFAULT_ROOT_VOLUME_GB: i32 = 30;

/// Phase result carrying the Degraded reason for the failing phase.
type PhaseResult<T> = std::result::Result<T, (&'static str, CloudError)>;

pub(crate) struct SingleNodeCreate<'a> {
    pub ec2: &'a Ec2Api,
    pub resolver: &'a ImageResolver,
    pub tracker: &'a mut StatusTracker,
}

impl SingleNodeCreate<'_> {
    pub async fn run(mut self) -> Result<()> {
        let mut undo = UndoStack::new();
        match self.phases(&mut undo).await {
            Ok(()) => Ok(()),
            Err((reason, err)) => {
                if let Err(persist) = self.tracker.mark_degraded(reason, &err.to_string()).await {
                    error!(error = %persist, "failed to record degraded condition");
                }
                undo.unwind(self.ec2).await;
                Err(err)
            }
        }
    }

    async fn phases(&mut self, undo: &mut UndoStack) -> PhaseResult<()> {
        let spec = self.tracker.spec().clone();
        let env = spec.name.clone();

        self.tracker
            .mark_progressing("CreatingNetwork", "creating VPC, subnet, gateway, route table")
            .await
            .map_err(persist_failed)?;
        let net = network::provision_network(self.ec2, self.tracker, undo)
            .await
            .map_err(into_cloud)?;

        self.tracker
            .mark_progressing("CreatingSecurityGroup", "creating security group")
            .await
            .map_err(persist_failed)?;
        let cidrs = network::resolve_access_cidrs(&spec)
            .await
            .map_err(|e| tagged("SecurityGroupFailed", e))?;
        let sg_id = self
            .ec2
            .create_security_group(
                &env,
                &format!("{env}-sg"),
                "skiff test environment access",
                &net.vpc_id,
            )
            .await
            .map_err(|e| tagged("SecurityGroupFailed", e))?;
        self.tracker.set_property(keys::SECURITY_GROUP_ID, &sg_id);
        undo.push(Undo::SecurityGroup(sg_id.clone()));
        self.ec2
            .authorize_ingress(&sg_id, &network::single_node_ingress(&cidrs))
            .await
            .map_err(|e| tagged("SecurityGroupFailed", e))?;

        self.tracker
            .mark_progressing("ResolvingImage", "resolving boot image")
            .await
            .map_err(persist_failed)?;
        let query = ImageQuery::single_node(&spec);
        let resolved = self
            .resolver
            .resolve(&query)
            .await
            .map_err(|e| tagged("ImageResolutionFailed", e))?;
        self.resolver
            .ensure_architecture_supported(query.instance_type, resolved.architecture)
            .await
            .map_err(|e| tagged("ArchitectureMismatch", e))?;
        let username = effective_username(spec.auth.username.as_deref(), &resolved)
            .map_err(|e| tagged("ValidationFailed", e))?;

        self.tracker
            .mark_progressing("LaunchingInstance", "launching instance")
            .await
            .map_err(persist_failed)?;
        let root_device_name = self
            .ec2
            .describe_image(&resolved.image_id)
            .await
            .map_err(|e| tagged("LaunchFailed", e))?
            .root_device_name()
            .map(str::to_string);
        let instance_id = self
            .ec2
            .run_instance(&LaunchParams {
                env: env.clone(),
                name: format!("{env}-node"),
                image_id: resolved.image_id.clone(),
                instance_type: spec.instance.instance_type.clone(),
                key_name: spec.auth.key_name.clone(),
                subnet_id: net.subnet_id.clone(),
                security_group_id: sg_id.clone(),
                root_device_name,
                root_volume_gb: spec.instance.root_volume_gb.unwrap_or(DEFAULT_ROOT_VOLUME_GB),
                role: None,
            })
            .await
            .map_err(|e| tagged("LaunchFailed", e))?;
        self.tracker.set_property(keys::INSTANCE_ID, &instance_id);
        self.tracker.set_property(keys::SSH_USERNAME, &username);

        let view = self
            .ec2
            .wait_for_instance_state(&instance_id, InstanceStateName::Running, RUNNING_TIMEOUT)
            .await
            .map_err(|e| tagged("InstanceNotRunning", e))?;
        if let Some(dns) = &view.public_dns {
            self.tracker.set_property(keys::PUBLIC_DNS_NAME, dns);
        }
        if let Some(ip) = &view.public_ip {
            self.tracker.set_property(keys::PUBLIC_IP, ip);
        }

        self.tracker
            .mark_progressing("ConfiguringNetworkInterface", "configuring network interface")
            .await
            .map_err(persist_failed)?;
        let eni_id = view
            .network_interface_id
            .ok_or_else(|| tagged(
                "NetworkInterfaceConfigFailed",
                AwsError::MissingField("instance.network_interfaces"),
            ))?;
        self.ec2
            .create_name_tag(&eni_id, &format!("{env}-node-eni"))
            .await
            .map_err(|e| tagged("NetworkInterfaceConfigFailed", e))?;
        self.ec2
            .set_source_dest_check(&eni_id, false)
            .await
            .map_err(|e| tagged("NetworkInterfaceConfigFailed", e))?;

        self.tracker.mark_available().await.map_err(persist_failed)?;
        info!(instance = %instance_id, "single-node environment available");
        Ok(())
    }
}

fn tagged(reason: &'static str, err: AwsError) -> (&'static str, CloudError) {
    (reason, err.into())
}

fn persist_failed(err: CloudError) -> (&'static str, CloudError) {
    ("StatusPersistFailed", err)
}

fn into_cloud((reason, err): (&'static str, AwsError)) -> (&'static str, CloudError) {
    (reason, err.into())
}
