//! In-memory `ContainerHost` for tests: scripted failures plus a recorded
//! operation log so ordering invariants can be asserted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::container::{Container, ContainerId, ImageId};
use crate::core::filter::ContainerFilter;
use crate::core::host::{ContainerHost, ContainerUpdate, HostError, HostResult};
use crate::core::params::UpdateParams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    List,
    IsStale(String),
    StopAndRemove(String),
    Start(String),
    Rename(String, String),
    Update(String),
    Remove(String),
    RemoveImage(String),
    WaitHealthy(String),
    Exec(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    NotFound,
    Conflict,
    InProgress,
    Other,
}

impl Fail {
    fn to_error(self, what: &str) -> HostError {
        match self {
            Fail::NotFound => HostError::NotFound(what.to_string()),
            Fail::Conflict => HostError::Conflict(what.to_string()),
            Fail::InProgress => HostError::AlreadyInProgress(what.to_string()),
            Fail::Other => HostError::Other(format!("scripted failure: {what}")),
        }
    }
}

#[derive(Debug, Clone)]
struct Scripted {
    fail: Fail,
    remaining: usize,
}

#[derive(Default)]
struct Inner {
    containers: Vec<Container>,
    stale: HashMap<ContainerId, ImageId>,
    stale_errors: HashSet<ContainerId>,
    fail_stop: HashMap<ContainerId, Scripted>,
    fail_start: HashMap<ContainerId, Fail>,
    start_ids: HashMap<ContainerId, ContainerId>,
    exec_codes: HashMap<ContainerId, i64>,
    fail_remove_image: HashMap<ImageId, Fail>,
    unhealthy: HashSet<ContainerId>,
    removed_images: HashSet<ImageId>,
    ops: Vec<Op>,
}

#[derive(Clone, Default)]
pub struct MockHost {
    inner: Arc<Mutex<Inner>>,
}

pub fn host_with(containers: Vec<Container>) -> MockHost {
    let host = MockHost::new();
    for c in containers {
        host.add_container(c);
    }
    host
}

/// Container stub with a snapshot complete enough for `verify_config`.
pub fn stub(name: &str, image_name: &str, image_id: &str) -> Container {
    Container::new(name, name, image_name, image_id).with_raw(
        bollard::models::ContainerInspectResponse {
            config: Some(Default::default()),
            host_config: Some(Default::default()),
            ..Default::default()
        },
    )
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, container: Container) {
        self.inner.lock().unwrap().containers.push(container);
    }

    /// Scripts `is_stale` to report a newer image for this container.
    pub fn set_stale(&self, id: &ContainerId, newest: ImageId) {
        self.inner.lock().unwrap().stale.insert(id.clone(), newest);
    }

    pub fn set_stale_error(&self, id: &ContainerId) {
        self.inner.lock().unwrap().stale_errors.insert(id.clone());
    }

    /// Fails the next `times` stop attempts for a container.
    pub fn fail_stop(&self, id: &ContainerId, fail: Fail, times: usize) {
        self.inner
            .lock()
            .unwrap()
            .fail_stop
            .insert(id.clone(), Scripted { fail, remaining: times });
    }

    pub fn fail_start(&self, id: &ContainerId, fail: Fail) {
        self.inner.lock().unwrap().fail_start.insert(id.clone(), fail);
    }

    pub fn set_start_id(&self, old: &ContainerId, new: &ContainerId) {
        self.inner
            .lock()
            .unwrap()
            .start_ids
            .insert(old.clone(), new.clone());
    }

    pub fn set_exec_exit_code(&self, id: &ContainerId, code: i64) {
        self.inner.lock().unwrap().exec_codes.insert(id.clone(), code);
    }

    pub fn fail_remove_image(&self, id: &ImageId, fail: Fail) {
        self.inner
            .lock()
            .unwrap()
            .fail_remove_image
            .insert(id.clone(), fail);
    }

    pub fn set_unhealthy(&self, id: &ContainerId) {
        self.inner.lock().unwrap().unhealthy.insert(id.clone());
    }

    pub fn ops(&self) -> Vec<Op> {
        self.inner.lock().unwrap().ops.clone()
    }

    pub fn op_index(&self, op: &Op) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }

    pub fn count<F: Fn(&Op) -> bool>(&self, pred: F) -> usize {
        self.ops().iter().filter(|o| pred(o)).count()
    }

    pub fn removed_images(&self) -> HashSet<ImageId> {
        self.inner.lock().unwrap().removed_images.clone()
    }

    fn record(&self, op: Op) {
        self.inner.lock().unwrap().ops.push(op);
    }
}

#[async_trait]
impl ContainerHost for MockHost {
    async fn list_containers(&self, filter: &ContainerFilter) -> HostResult<Vec<Container>> {
        self.record(Op::List);
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .containers
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn is_stale(
        &self,
        container: &Container,
        _params: &UpdateParams,
    ) -> HostResult<(bool, ImageId)> {
        self.record(Op::IsStale(container.name().to_string()));
        let inner = self.inner.lock().unwrap();
        if inner.stale_errors.contains(container.id()) {
            return Err(HostError::Other(format!(
                "registry unreachable for {}",
                container.image_name()
            )));
        }
        match inner.stale.get(container.id()) {
            Some(newest) => Ok((true, newest.clone())),
            None => Ok((false, container.image_id().clone())),
        }
    }

    async fn stop_and_remove_container(
        &self,
        container: &Container,
        _timeout: Duration,
    ) -> HostResult<()> {
        self.record(Op::StopAndRemove(container.name().to_string()));
        let mut inner = self.inner.lock().unwrap();
        if let Some(scripted) = inner.fail_stop.get_mut(container.id()) {
            if scripted.remaining > 0 {
                scripted.remaining -= 1;
                let fail = scripted.fail;
                return Err(fail.to_error(container.name()));
            }
        }
        Ok(())
    }

    async fn start_container(&self, container: &Container) -> HostResult<ContainerId> {
        self.record(Op::Start(container.name().to_string()));
        let inner = self.inner.lock().unwrap();
        if let Some(fail) = inner.fail_start.get(container.id()) {
            return Err(fail.to_error(container.name()));
        }
        let new_id = inner
            .start_ids
            .get(container.id())
            .cloned()
            .unwrap_or_else(|| ContainerId::from(format!("new-{}", container.name())));
        Ok(new_id)
    }

    async fn rename_container(&self, container: &Container, new_name: &str) -> HostResult<()> {
        self.record(Op::Rename(
            container.name().to_string(),
            new_name.to_string(),
        ));
        Ok(())
    }

    async fn update_container(
        &self,
        container: &Container,
        _update: ContainerUpdate,
    ) -> HostResult<()> {
        self.record(Op::Update(container.name().to_string()));
        Ok(())
    }

    async fn remove_container(&self, container: &Container) -> HostResult<()> {
        self.record(Op::Remove(container.name().to_string()));
        Ok(())
    }

    async fn remove_image_by_id(&self, id: &ImageId, _name: &str) -> HostResult<()> {
        self.record(Op::RemoveImage(id.0.clone()));
        let mut inner = self.inner.lock().unwrap();
        if let Some(fail) = inner.fail_remove_image.get(id) {
            return Err(fail.to_error(&id.0));
        }
        if !inner.removed_images.insert(id.clone()) {
            return Err(HostError::NotFound(id.0.clone()));
        }
        Ok(())
    }

    async fn wait_for_healthy(&self, id: &ContainerId, timeout: Duration) -> HostResult<()> {
        self.record(Op::WaitHealthy(id.0.clone()));
        let inner = self.inner.lock().unwrap();
        if inner.unhealthy.contains(id) {
            return Err(HostError::Timeout(timeout));
        }
        Ok(())
    }

    async fn exec_in_container(
        &self,
        id: &ContainerId,
        command: &str,
        _timeout: Duration,
    ) -> HostResult<i64> {
        self.record(Op::Exec(id.0.clone(), command.to_string()));
        let inner = self.inner.lock().unwrap();
        Ok(inner.exec_codes.get(id).copied().unwrap_or(0))
    }
}
