//! LIFO rollback for the single-node create path.
//!
//! Each completed phase registers a tagged undo record; on a later phase
//! failure the stack is replayed in reverse. Unwind errors are logged but
//! never escalated; the original phase failure stays the reported cause.

use crate::ec2::Ec2Api;
use tracing::{info, warn};

#[derive(Debug)]
pub(crate) enum Undo {
    SecurityGroup(String),
    RouteTable(String),
    InternetGateway { igw_id: String, vpc_id: String },
    Subnet(String),
    Vpc(String),
}

impl Undo {
    fn describe(&self) -> String {
        match self {
            Undo::SecurityGroup(id) => format!("security group {id}"),
            Undo::RouteTable(id) => format!("route table {id}"),
            Undo::InternetGateway { igw_id, .. } => format!("internet gateway {igw_id}"),
            Undo::Subnet(id) => format!("subnet {id}"),
            Undo::Vpc(id) => format!("VPC {id}"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct UndoStack {
    steps: Vec<Undo>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Undo) {
        self.steps.push(step);
    }

    /// Replay the registered undo steps in reverse order.
    pub async fn unwind(&mut self, ec2: &Ec2Api) {
        if self.steps.is_empty() {
            return;
        }
        info!(steps = self.steps.len(), "rolling back partially created resources");

        while let Some(step) = self.steps.pop() {
            let what = step.describe();
            let result = match &step {
                Undo::SecurityGroup(id) => ec2.delete_security_group(id).await,
                Undo::RouteTable(id) => ec2.delete_route_table(id).await,
                Undo::InternetGateway { igw_id, vpc_id } => {
                    match ec2.detach_internet_gateway(igw_id, vpc_id).await {
                        Ok(()) => ec2.delete_internet_gateway(igw_id).await,
                        Err(e) if e.is_not_found() => ec2.delete_internet_gateway(igw_id).await,
                        Err(e) => Err(e),
                    }
                }
                Undo::Subnet(id) => ec2.delete_subnet(id).await,
                Undo::Vpc(id) => ec2.delete_vpc(id).await,
            };

            match result {
                Ok(()) => info!("rolled back {what}"),
                Err(e) if e.is_not_found() => info!("{what} already gone"),
                Err(e) => warn!(error = %e, "rollback of {what} failed, leaving for delete"),
            }
        }
    }
}
