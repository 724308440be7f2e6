//! Cache-file persistence and the status tracker.
//!
//! The cache file is a YAML document `{ spec, status }` written with
//! owner-only permissions. It is the sole durable record of created resource
//! ids: `delete` reconstructs everything it needs from this file and never
//! trusts in-memory state across a process restart.

use crate::error::{CloudError, Result};
use crate::status::{ClusterStatus, Condition, ConditionType, EnvironmentStatus, Property};
use serde::{Deserialize, Serialize};
use skiff_core::EnvironmentSpec;
use std::path::{Path, PathBuf};
use tokio::fs;

const CACHE_DIR: &str = ".skiff";

/// The persisted environment document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub spec: EnvironmentSpec,
    #[serde(default)]
    pub status: EnvironmentStatus,
}

/// Default cache file location for an environment name: `.skiff/<name>.yaml`
/// under the working directory.
pub fn default_cache_path(name: &str) -> PathBuf {
    PathBuf::from(CACHE_DIR).join(format!("{name}.yaml"))
}

/// Reads and writes the cache file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub async fn load(&self) -> Result<Environment> {
        if !self.path.exists() {
            return Err(CloudError::State(format!(
                "cache file not found: {} (was the environment ever created?)",
                self.path.display()
            )));
        }
        let content = fs::read_to_string(&self.path).await?;
        let env: Environment = serde_yaml::from_str(&content)?;
        tracing::debug!(
            path = %self.path.display(),
            properties = env.status.properties.len(),
            "loaded environment cache"
        );
        Ok(env)
    }

    pub async fn save(&self, env: &Environment) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_yaml::to_string(env)?;
        fs::write(&self.path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms).await?;
        }

        tracing::debug!(path = %self.path.display(), "saved environment cache");
        Ok(())
    }
}

/// Tracks conditions and the resource-id ledger, persisting through a
/// [`StateStore`] at phase boundaries.
///
/// Every orchestrator step calls exactly one of the `mark_*` methods. Each
/// builds the full four-entry condition list with only the named condition
/// true, merges the current properties, and persists only when the result
/// differs semantically from the last persisted snapshot.
pub struct StatusTracker {
    store: StateStore,
    env: Environment,
    persisted: Option<EnvironmentStatus>,
}

impl StatusTracker {
    /// Fresh tracker for a new lifecycle operation.
    pub fn new(store: StateStore, spec: EnvironmentSpec) -> Self {
        Self {
            store,
            env: Environment {
                spec,
                status: EnvironmentStatus::default(),
            },
            persisted: None,
        }
    }

    /// Resume from the cache file, e.g. for `delete` after a restart.
    pub async fn resume(store: StateStore) -> Result<Self> {
        let env = store.load().await?;
        let persisted = Some(env.status.clone());
        Ok(Self {
            store,
            env,
            persisted,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn spec(&self) -> &EnvironmentSpec {
        &self.env.spec
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.env.status.property(name)
    }

    /// Record a resource id. Replaces an existing entry with the same name
    /// rather than appending a duplicate.
    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .env
            .status
            .properties
            .iter_mut()
            .find(|p| p.name == name)
        {
            Some(existing) => existing.value = value,
            None => self.env.status.properties.push(Property {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn set_cluster(&mut self, cluster: ClusterStatus) {
        self.env.status.cluster = Some(cluster);
    }

    pub fn cluster(&self) -> Option<&ClusterStatus> {
        self.env.status.cluster.as_ref()
    }

    pub async fn mark_progressing(&mut self, reason: &str, message: &str) -> Result<()> {
        self.mark(ConditionType::Progressing, reason, message).await
    }

    pub async fn mark_degraded(&mut self, reason: &str, message: &str) -> Result<()> {
        self.mark(ConditionType::Degraded, reason, message).await
    }

    pub async fn mark_available(&mut self) -> Result<()> {
        self.mark(ConditionType::Available, "Ready", "environment is available")
            .await
    }

    pub async fn mark_terminated(&mut self) -> Result<()> {
        self.mark(
            ConditionType::Terminated,
            "Deleted",
            "all resources have been deleted",
        )
        .await
    }

    async fn mark(&mut self, active: ConditionType, reason: &str, message: &str) -> Result<()> {
        self.env.status.conditions =
            Condition::full_set(active, reason, message, &self.env.status.conditions);

        let unchanged = self
            .persisted
            .as_ref()
            .is_some_and(|p| p.same_state(&self.env.status));
        if unchanged {
            tracing::trace!(condition = %active, "status unchanged, skipping persist");
            return Ok(());
        }

        if let Err(e) = self.store.save(&self.env).await {
            tracing::error!(
                path = %self.store.path().display(),
                error = %e,
                "failed to persist environment status"
            );
            return Err(e);
        }
        self.persisted = Some(self.env.status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::{AuthConfig, InstallOptions, InstanceSpec, ProviderKind};

    fn test_spec() -> EnvironmentSpec {
        EnvironmentSpec {
            name: "unit".to_string(),
            provider: ProviderKind::Aws,
            region: "us-east-1".to_string(),
            instance: InstanceSpec::default(),
            cluster: None,
            auth: AuthConfig {
                key_name: "k".to_string(),
                private_key_path: "/tmp/k.pem".into(),
                username: None,
            },
            install: InstallOptions::default(),
            extra_access_cidrs: Vec::new(),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("nested").join("env.yaml"))
    }

    #[tokio::test]
    async fn persisted_snapshot_has_exactly_one_true_condition() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut tracker = StatusTracker::new(store.clone(), test_spec());

        tracker.mark_progressing("Creating", "vpc").await.unwrap();
        tracker.set_property("vpc-id", "vpc-0abc");
        tracker.mark_available().await.unwrap();

        let env = store.load().await.unwrap();
        assert_eq!(env.status.conditions.len(), 4);
        assert_eq!(env.status.conditions.iter().filter(|c| c.status).count(), 1);
        assert_eq!(
            env.status.active_condition().unwrap().condition_type,
            ConditionType::Available
        );
        assert_eq!(env.status.property("vpc-id"), Some("vpc-0abc"));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut tracker = StatusTracker::new(store.clone(), test_spec());

        tracker.mark_progressing("Creating", "vpc").await.unwrap();
        let first = fs::read_to_string(store.path()).await.unwrap();

        // Same condition again: the file must not change, even though the
        // would-be timestamps differ.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tracker.mark_progressing("Creating", "vpc").await.unwrap();
        let second = fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn properties_replace_not_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StatusTracker::new(store_in(&dir), test_spec());

        tracker.set_property("instance-id", "i-111");
        tracker.set_property("instance-id", "i-222");
        tracker.mark_progressing("Launching", "").await.unwrap();

        let props = &tracker.environment().status.properties;
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].value, "i-222");
    }

    #[tokio::test]
    async fn resume_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut tracker = StatusTracker::new(store.clone(), test_spec());
        tracker.set_property("subnet-id", "subnet-09");
        tracker.mark_progressing("CreatingNetwork", "").await.unwrap();
        drop(tracker);

        let resumed = StatusTracker::resume(store).await.unwrap();
        assert_eq!(resumed.property("subnet-id"), Some("subnet-09"));
        assert_eq!(
            resumed
                .environment()
                .status
                .active_condition()
                .unwrap()
                .condition_type,
            ConditionType::Progressing
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut tracker = StatusTracker::new(store.clone(), test_spec());
        tracker.mark_progressing("Creating", "").await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn load_missing_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().await.is_err());
    }
}
