//! Skiff cloud abstraction.
//!
//! This crate defines the lifecycle contract every cloud backend implements
//! ([`CloudProvider`]), the condition/properties status model that is
//! persisted as the durable record of an environment, and the retry engine
//! shared by all mutating cloud calls.
//!
//! The status document written by [`StatusTracker`] is the only thing a
//! restarted process (or an operator) can trust to find and delete
//! resources; nothing in live memory survives a crash.

pub mod error;
pub mod provider;
pub mod retry;
pub mod state;
pub mod status;

pub use error::{CloudError, Result};
pub use provider::CloudProvider;
pub use retry::{RetryError, RetryPolicy, is_retryable_message, retry, retry_classified};
pub use state::{Environment, StateStore, StatusTracker, default_cache_path};
pub use status::{
    ClusterStatus, Condition, ConditionType, NodeRole, NodeStatus, Property,
};
