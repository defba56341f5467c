//! Lifecycle hook commands, run inside the target container.
//!
//! Exit code 75 (EX_TEMPFAIL) from a pre-update hook defers the update
//! without marking failure; every other non-zero exit is an error.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::container::{Container, ContainerId};
use crate::core::host::ContainerHost;
use crate::core::params::UpdateParams;

pub const EX_TEMPFAIL: i64 = 75;

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

pub const LABEL_PRE_CHECK: &str = "com.centurylinklabs.watchtower.lifecycle.pre-check";
pub const LABEL_POST_CHECK: &str = "com.centurylinklabs.watchtower.lifecycle.post-check";
pub const LABEL_PRE_UPDATE: &str = "com.centurylinklabs.watchtower.lifecycle.pre-update";
pub const LABEL_POST_UPDATE: &str = "com.centurylinklabs.watchtower.lifecycle.post-update";
const LABEL_PRE_UPDATE_TIMEOUT: &str =
    "com.centurylinklabs.watchtower.lifecycle.pre-update-timeout";
const LABEL_POST_UPDATE_TIMEOUT: &str =
    "com.centurylinklabs.watchtower.lifecycle.post-update-timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreCheck,
    PostCheck,
    PreUpdate,
    PostUpdate,
}

impl Hook {
    fn label(self) -> &'static str {
        match self {
            Hook::PreCheck => LABEL_PRE_CHECK,
            Hook::PostCheck => LABEL_POST_CHECK,
            Hook::PreUpdate => LABEL_PRE_UPDATE,
            Hook::PostUpdate => LABEL_POST_UPDATE,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Hook::PreCheck => "pre-check",
            Hook::PostCheck => "post-check",
            Hook::PreUpdate => "pre-update",
            Hook::PostUpdate => "post-update",
        }
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{hook} hook exited with code {code}")]
    NonZeroExit { hook: &'static str, code: i64 },
    #[error("{hook} hook failed: {source}")]
    Exec {
        hook: &'static str,
        #[source]
        source: crate::core::host::HostError,
    },
}

/// Timeout for a hook: the `*-timeout` label holds minutes, `0` means
/// unbounded (clamped to a day), absent means one minute. Only the update
/// hooks carry a timeout label.
fn hook_timeout(container: &Container, hook: Hook) -> Duration {
    let label = match hook {
        Hook::PreUpdate => LABEL_PRE_UPDATE_TIMEOUT,
        Hook::PostUpdate => LABEL_POST_UPDATE_TIMEOUT,
        _ => return DEFAULT_HOOK_TIMEOUT,
    };
    match container.label(label).and_then(|v| v.parse::<u64>().ok()) {
        Some(0) => Duration::from_secs(60 * 60 * 24),
        Some(minutes) => Duration::from_secs(minutes * 60),
        None => Duration::from_secs(60),
    }
}

/// Runs one hook in `target` (defaults to the container itself; self-update
/// runs the post-update hook in the successor). Returns whether the hook
/// requested a skip. Absent commands are a silent no-op.
pub async fn execute_hook(
    host: &dyn ContainerHost,
    container: &Container,
    target: Option<&ContainerId>,
    hook: Hook,
) -> Result<bool, HookError> {
    let Some(command) = container.label(hook.label()) else {
        return Ok(false);
    };
    if command.trim().is_empty() {
        return Ok(false);
    }
    let target = target.unwrap_or_else(|| container.id());
    let timeout = hook_timeout(container, hook);

    debug!(
        container = %container.name(),
        hook = hook.name(),
        command,
        "executing lifecycle hook"
    );
    let code = host
        .exec_in_container(target, command, timeout)
        .await
        .map_err(|source| HookError::Exec {
            hook: hook.name(),
            source,
        })?;

    match code {
        0 => Ok(false),
        EX_TEMPFAIL if hook == Hook::PreUpdate => {
            info!(
                container = %container.name(),
                "pre-update hook requested skip (EX_TEMPFAIL)"
            );
            Ok(true)
        }
        code => Err(HookError::NonZeroExit {
            hook: hook.name(),
            code,
        }),
    }
}

/// Best-effort pre-check pass over the whole population; failures are logged
/// and never block the session.
pub async fn execute_pre_checks(
    host: &dyn ContainerHost,
    params: &UpdateParams,
    containers: &[Container],
) {
    if !params.lifecycle_hooks {
        return;
    }
    for c in containers {
        if let Err(e) = execute_hook(host, c, None, Hook::PreCheck).await {
            warn!(container = %c.name(), error = %e, "pre-check hook failed");
        }
    }
}

/// Best-effort post-check pass, run after the update phases.
pub async fn execute_post_checks(
    host: &dyn ContainerHost,
    params: &UpdateParams,
    containers: &[Container],
) {
    if !params.lifecycle_hooks {
        return;
    }
    for c in containers {
        if let Err(e) = execute_hook(host, c, None, Hook::PostCheck).await {
            warn!(container = %c.name(), error = %e, "post-check hook failed");
        }
    }
}
