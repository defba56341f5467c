use std::env;
use std::time::Duration;

use crate::core::container::ContainerId;
use crate::core::filter::ContainerFilter;
use crate::core::params::UpdateParams;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub node_name: String,
    pub docker_socket: String,
    /// Seconds between update sessions.
    pub poll_interval: u64,
    /// Hostname inside the container doubles as a prefix of our own id.
    pub self_hostname: Option<String>,
    pub scope: Option<String>,
    pub watch_containers: Vec<String>,
    pub disable_containers: Vec<String>,
    pub label_enable: bool,
    pub monitor_only: bool,
    pub no_pull: bool,
    pub no_restart: bool,
    pub cleanup: bool,
    pub rolling_restart: bool,
    pub run_once: bool,
    pub label_precedence: bool,
    pub lifecycle_hooks: bool,
    pub skip_self_update: bool,
    pub stop_timeout: u64,
    pub pull_failure_delay: u64,
    pub split_notifications: bool,
    pub notify_report: bool,
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn load() -> Self {
        Self {
            env: env::var("ENV").unwrap_or_else(|_| "production".into()),
            node_name: env::var("NODE_NAME")
                .unwrap_or_else(|_| {
                    hostname::get()
                        .map(|h| h.to_string_lossy().into_owned())
                        .unwrap_or("UPDATER-NODE".into())
                })
                .to_uppercase(),
            docker_socket: env::var("DOCKER_SOCKET").unwrap_or_else(|_| {
                if cfg!(target_os = "windows") {
                    "//./pipe/docker_engine".into()
                } else {
                    "/var/run/docker.sock".into()
                }
            }),
            poll_interval: env::var("POLL_INTERVAL")
                .unwrap_or("86400".to_string())
                .parse()
                .unwrap_or(86400),
            self_hostname: env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
            scope: env::var("SCOPE").ok(),
            watch_containers: env_list("WATCH_CONTAINERS"),
            disable_containers: env_list("DISABLE_CONTAINERS"),
            label_enable: env_bool("LABEL_ENABLE", false),
            monitor_only: env_bool("MONITOR_ONLY", false),
            no_pull: env_bool("NO_PULL", false),
            no_restart: env_bool("NO_RESTART", false),
            cleanup: env_bool("CLEANUP", false),
            rolling_restart: env_bool("ROLLING_RESTART", false),
            run_once: env_bool("RUN_ONCE", false),
            label_precedence: env_bool("LABEL_PRECEDENCE", false),
            lifecycle_hooks: env_bool("LIFECYCLE_HOOKS", false),
            skip_self_update: env_bool("SKIP_SELF_UPDATE", false),
            stop_timeout: env::var("STOP_TIMEOUT")
                .unwrap_or("10".to_string())
                .parse()
                .unwrap_or(10),
            pull_failure_delay: env::var("PULL_FAILURE_DELAY")
                .unwrap_or("300".to_string())
                .parse()
                .unwrap_or(300),
            split_notifications: env_bool("SPLIT_NOTIFICATIONS", false),
            notify_report: env_bool("NOTIFY_REPORT", true),
        }
    }

    /// The literal scope value `none` selects only unscoped containers.
    pub fn effective_scope(&self) -> Option<String> {
        self.scope
            .clone()
            .map(|s| if s == "none" { String::new() } else { s })
    }

    pub fn filter(&self) -> ContainerFilter {
        ContainerFilter::default()
            .with_names(self.watch_containers.clone())
            .with_disabled(self.disable_containers.clone())
            .with_label_enable(self.label_enable)
            .with_scope(self.effective_scope())
    }

    pub fn update_params(&self, current_container_id: Option<ContainerId>) -> UpdateParams {
        UpdateParams {
            filter: self.filter(),
            cleanup: self.cleanup,
            no_restart: self.no_restart,
            monitor_only: self.monitor_only,
            no_pull: self.no_pull,
            lifecycle_hooks: self.lifecycle_hooks,
            rolling_restart: self.rolling_restart,
            label_precedence: self.label_precedence,
            run_once: self.run_once,
            skip_self_update: self.skip_self_update,
            current_container_id,
            stop_timeout: Duration::from_secs(self.stop_timeout),
            pull_failure_delay: Duration::from_secs(self.pull_failure_delay),
            split_by_container: self.split_notifications,
            notify_report: self.notify_report,
        }
    }
}
