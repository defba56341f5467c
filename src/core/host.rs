//! The capability seam between the update core and the container runtime.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::container::{Container, ContainerId, ImageId};
use crate::core::filter::ContainerFilter;
use crate::core::params::UpdateParams;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("invalid container configuration: {0}")]
    InvalidConfiguration(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("container runtime error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("{0}")]
    Other(String),
}

impl HostError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, HostError::Conflict(_))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, HostError::AlreadyInProgress(_))
    }
}

/// Mutation applied to an existing container without recreating it.
#[derive(Debug, Clone, Default)]
pub struct ContainerUpdate {
    /// New restart policy name (`no`, `always`, ...), when set.
    pub restart_policy: Option<String>,
}

impl ContainerUpdate {
    pub fn freeze_restart_policy() -> Self {
        Self {
            restart_policy: Some("no".to_string()),
        }
    }
}

/// Everything the update core needs from a container runtime. Implemented
/// by the bollard adapter for real hosts and by `MockHost` in tests.
#[async_trait]
pub trait ContainerHost: Send + Sync {
    /// Live snapshots of all containers matching the filter, including
    /// labels, image identity, created-at and link list.
    async fn list_containers(&self, filter: &ContainerFilter) -> HostResult<Vec<Container>>;

    /// Whether a newer image revision exists for this container, and the
    /// newest image id observed. May pull from the registry unless the
    /// session (or the container's label) says not to.
    async fn is_stale(
        &self,
        container: &Container,
        params: &UpdateParams,
    ) -> HostResult<(bool, ImageId)>;

    /// Combined stop + remove with a stop deadline.
    async fn stop_and_remove_container(
        &self,
        container: &Container,
        timeout: Duration,
    ) -> HostResult<()>;

    /// Creates and starts a new container from the captured configuration
    /// plus the newest pulled image. Returns the new container's id.
    async fn start_container(&self, container: &Container) -> HostResult<ContainerId>;

    async fn rename_container(&self, container: &Container, new_name: &str) -> HostResult<()>;

    async fn update_container(
        &self,
        container: &Container,
        update: ContainerUpdate,
    ) -> HostResult<()>;

    /// Force-removes without a stop grace period.
    async fn remove_container(&self, container: &Container) -> HostResult<()>;

    /// Removes an image by id; `name` is only for logging. Must surface
    /// `NotFound` and `Conflict` as their typed variants.
    async fn remove_image_by_id(&self, id: &ImageId, name: &str) -> HostResult<()>;

    /// Blocks until the container reports healthy (or plain running when it
    /// has no healthcheck), bounded by `timeout`.
    async fn wait_for_healthy(&self, id: &ContainerId, timeout: Duration) -> HostResult<()>;

    /// Runs a lifecycle hook command inside the container and returns its
    /// exit code.
    async fn exec_in_container(
        &self,
        id: &ContainerId,
        command: &str,
        timeout: Duration,
    ) -> HostResult<i64>;
}
