//! Cloud provider trait definition.

use crate::error::Result;
use crate::status::Condition;
use async_trait::async_trait;

/// Lifecycle contract implemented by every cloud backend.
///
/// The CLI decides which implementation to construct from the spec's
/// provider kind and whether a cluster spec is present; after that it only
/// talks through this trait.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name (e.g. "aws", "aws-cluster").
    fn name(&self) -> &str;

    /// Provision the environment. Records conditions and resource ids in
    /// the cache file at every phase boundary, so a failed create can still
    /// be deleted.
    async fn create(&mut self) -> Result<()>;

    /// Tear the environment down using only the persisted cache file.
    /// Idempotent: deleting an environment that is already gone succeeds.
    async fn delete(&mut self) -> Result<()>;

    /// Current condition list from the cache file.
    async fn status(&self) -> Result<Vec<Condition>>;

    /// Validate instance type and image availability (including
    /// architecture compatibility) without creating any resource.
    async fn dry_run(&self) -> Result<()>;
}
