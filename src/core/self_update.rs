//! Rename-and-swap for the updater's own container.
//!
//! The running instance cannot stop itself before its successor is up, so
//! the swap renames the old container out of the way, starts the successor
//! under the original name, freezes the old one's restart policy and only
//! then tears it down. Image cleanup for the old instance is deferred to the
//! next session's instance reconciler.

use tracing::{error, info, warn};

use crate::core::container::{Container, ContainerId};
use crate::core::host::{ContainerHost, ContainerUpdate, HostResult};
use crate::core::params::UpdateParams;

pub const RENAME_PREFIX: &str = "watchtower-old";

/// Name the outgoing instance is parked under while the successor boots.
pub fn parked_name(container: &Container) -> String {
    format!("{}-{}", RENAME_PREFIX, container.id().short())
}

/// Replaces the current updater container with one built from the newest
/// image. Returns the successor's id and whether the old container was
/// renamed; `renamed` suppresses normal image cleanup for this container in
/// the running session.
pub async fn swap_updater(
    host: &dyn ContainerHost,
    container: &Container,
    params: &UpdateParams,
) -> HostResult<(ContainerId, bool)> {
    let mut renamed = false;

    // In run-once mode there is no continuously running instance to collide
    // with, so the rename is skipped.
    if !params.run_once {
        let new_name = parked_name(container);
        info!(
            event = "SELF_UPDATE_RENAME",
            container = %container.name(),
            parked = %new_name,
            "parking current updater instance"
        );
        host.rename_container(container, &new_name).await?;
        renamed = true;
    }

    // The successor carries the full ancestry so the next reconciler run can
    // clean up across scopes.
    let snapshot = container.with_appended_chain(container.id());
    let new_id = match host.start_container(&snapshot).await {
        Ok(id) => id,
        Err(e) => {
            if renamed {
                warn!(
                    event = "SELF_UPDATE_COMPENSATE",
                    container = %container.name(),
                    error = %e,
                    "successor failed to start, removing parked instance"
                );
                if let Err(cleanup_err) = host
                    .stop_and_remove_container(container, params.stop_timeout)
                    .await
                {
                    error!(
                        container = %container.name(),
                        error = %cleanup_err,
                        "failed to remove parked updater instance"
                    );
                }
            }
            return Err(e);
        }
    };

    info!(
        event = "SELF_UPDATE_STARTED",
        old = %container.id().short(),
        new = %new_id.short(),
        "successor updater started"
    );

    if renamed {
        // The parked instance must not be resurrected by the restart policy
        // once we stop it. Start already succeeded, so a failure here only
        // degrades cleanup.
        if let Err(e) = host
            .update_container(container, ContainerUpdate::freeze_restart_policy())
            .await
        {
            warn!(
                container = %container.name(),
                error = %e,
                "could not freeze restart policy on parked instance"
            );
        }
        if let Err(e) = host
            .stop_and_remove_container(container, params.stop_timeout)
            .await
        {
            error!(
                event = "SELF_UPDATE_OLD_STOP_FAILED",
                container = %container.name(),
                error = %e,
                "parked updater instance could not be stopped; leaving it for the reconciler"
            );
        }
    }

    Ok((new_id, renamed))
}
