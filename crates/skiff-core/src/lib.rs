//! Skiff core: the desired-state model for ephemeral test environments.
//!
//! An [`EnvironmentSpec`] describes what the user wants (one instance or a
//! small cluster, which region, which OS, which key pair). It is loaded once
//! per lifecycle operation and never mutated by the providers.

pub mod error;
pub mod loader;
pub mod model;

pub use error::{Result, SpecError};
pub use loader::load_spec;
pub use model::{
    AuthConfig, ClusterSpec, EnvironmentSpec, InstallOptions, InstanceSpec, NodePoolSpec,
    ProviderKind,
};
