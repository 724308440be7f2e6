//! Condition and status model.
//!
//! An environment's observed state is a four-entry condition list in which
//! exactly one condition is true at any persisted snapshot, plus a ledger of
//! created resource ids ("properties") and an optional cluster summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of an environment. Mutually exclusive in any persisted
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Progressing,
    Degraded,
    Available,
    Terminated,
}

impl ConditionType {
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Progressing,
        ConditionType::Degraded,
        ConditionType::Available,
        ConditionType::Terminated,
    ];
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Progressing => write!(f, "Progressing"),
            ConditionType::Degraded => write!(f, "Degraded"),
            ConditionType::Available => write!(f, "Available"),
            ConditionType::Terminated => write!(f, "Terminated"),
        }
    }
}

/// One typed, timestamped status entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    /// Semantic equality, ignoring the transition timestamp. Used to decide
    /// whether a persist is needed so a reconcile loop doesn't churn the
    /// cache file.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Build the full four-entry list with only `active` true. Entries whose
    /// state is unchanged from `previous` keep their transition timestamp.
    pub fn full_set(
        active: ConditionType,
        reason: &str,
        message: &str,
        previous: &[Condition],
    ) -> Vec<Condition> {
        let now = Utc::now();
        ConditionType::ALL
            .iter()
            .map(|&condition_type| {
                let status = condition_type == active;
                let candidate = Condition {
                    condition_type,
                    status,
                    reason: if status { reason.to_string() } else { String::new() },
                    message: if status { message.to_string() } else { String::new() },
                    last_transition: now,
                };
                match previous.iter().find(|p| p.condition_type == condition_type) {
                    Some(p) if p.same_state(&candidate) => Condition {
                        last_transition: p.last_transition,
                        ..candidate
                    },
                    _ => candidate,
                }
            })
            .collect()
    }
}

/// One entry of the durable resource-id ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

/// Role of a node inside a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "control-plane"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub role: NodeRole,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_dns: Option<String>,
    pub ssh_username: String,
    pub phase: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub nodes: Vec<NodeStatus>,
    pub total_nodes: u32,
    pub ready_nodes: u32,
    pub phase: String,
    /// Load balancer DNS when HA, otherwise the first control-plane node's
    /// public DNS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_dns: Option<String>,
}

/// Observed state persisted alongside the spec in the cache file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentStatus {
    pub conditions: Vec<Condition>,
    pub properties: Vec<Property>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterStatus>,
}

impl EnvironmentStatus {
    /// The single condition with status=true, if any snapshot was recorded.
    pub fn active_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.status)
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Semantic comparison for write suppression: conditions (ignoring
    /// timestamps), properties, and cluster summary.
    pub fn same_state(&self, other: &EnvironmentStatus) -> bool {
        self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(other.conditions.iter())
                .all(|(a, b)| a.same_state(b))
            && self.properties == other.properties
            && self.cluster == other.cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_set_has_exactly_one_true() {
        for &active in &ConditionType::ALL {
            let set = Condition::full_set(active, "Reason", "message", &[]);
            assert_eq!(set.len(), 4);
            assert_eq!(set.iter().filter(|c| c.status).count(), 1);
            let on = set.iter().find(|c| c.status).unwrap();
            assert_eq!(on.condition_type, active);
            assert_eq!(on.reason, "Reason");
        }
    }

    #[test]
    fn unchanged_entries_keep_their_timestamp() {
        let first = Condition::full_set(ConditionType::Progressing, "Creating", "vpc", &[]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = Condition::full_set(ConditionType::Progressing, "Creating", "vpc", &first);

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.last_transition, b.last_transition);
        }

        let third = Condition::full_set(ConditionType::Available, "Ready", "", &second);
        let available = third
            .iter()
            .find(|c| c.condition_type == ConditionType::Available)
            .unwrap();
        let was = second
            .iter()
            .find(|c| c.condition_type == ConditionType::Available)
            .unwrap();
        assert!(available.last_transition > was.last_transition);
    }

    #[test]
    fn same_state_ignores_timestamps() {
        let a = Condition::full_set(ConditionType::Degraded, "VpcFailed", "boom", &[]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = Condition::full_set(ConditionType::Degraded, "VpcFailed", "boom", &[]);

        let status_a = EnvironmentStatus {
            conditions: a,
            ..Default::default()
        };
        let status_b = EnvironmentStatus {
            conditions: b,
            ..Default::default()
        };
        assert!(status_a.same_state(&status_b));
    }
}
