use std::time::Duration;

use crate::core::container::{Container, ContainerId};
use crate::core::filter::ContainerFilter;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PULL_FAILURE_DELAY: Duration = Duration::from_secs(300);

/// Everything one update session needs to know. Owned by the session, never
/// shared across sessions.
#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub filter: ContainerFilter,
    pub cleanup: bool,
    pub no_restart: bool,
    pub monitor_only: bool,
    pub no_pull: bool,
    pub lifecycle_hooks: bool,
    pub rolling_restart: bool,
    pub label_precedence: bool,
    pub run_once: bool,
    pub skip_self_update: bool,
    /// Id of the container this process runs in, when known. Guards the
    /// peer-updater exclusion and self-update targeting.
    pub current_container_id: Option<ContainerId>,
    pub stop_timeout: Duration,
    /// Tail-of-session sleep after a failed self-update pull, so a
    /// supervisor restart loop cannot hammer the registry.
    pub pull_failure_delay: Duration,
    pub split_by_container: bool,
    /// In split mode: emit narrowed reports (true) or synthesized log
    /// entries (false).
    pub notify_report: bool,
}

impl Default for UpdateParams {
    fn default() -> Self {
        Self {
            filter: ContainerFilter::default(),
            cleanup: false,
            no_restart: false,
            monitor_only: false,
            no_pull: false,
            lifecycle_hooks: false,
            rolling_restart: false,
            label_precedence: false,
            run_once: false,
            skip_self_update: false,
            current_container_id: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            pull_failure_delay: DEFAULT_PULL_FAILURE_DELAY,
            split_by_container: false,
            notify_report: true,
        }
    }
}

/// The classification predicate: does this container get replaced this
/// session? Staleness alone is not enough; monitor-only, restart policy and
/// self-update guards all veto.
pub fn should_update_container(stale: bool, container: &Container, params: &UpdateParams) -> bool {
    if !stale {
        return false;
    }
    if container.is_monitor_only(params) {
        return false;
    }
    let is_updater = container.is_updater();
    if params.no_restart && !is_updater {
        return false;
    }
    if params.run_once && is_updater {
        return false;
    }
    if params.skip_self_update && is_updater {
        return false;
    }
    if container.is_peer_updater(params) {
        return false;
    }
    true
}
