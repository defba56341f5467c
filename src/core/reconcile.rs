//! Startup reconciliation of updater instances.
//!
//! A self-update leaves the previous generation's container (and image)
//! behind for the next process start to clean up. Scope keeps independent
//! updaters out of each other's way, with one exception: containers named by
//! the current instance's chain label are prior generations of *this*
//! updater and are cleaned regardless of their scope.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::container::Container;
use crate::core::filter::{scope_matches, ContainerFilter};
use crate::core::host::ContainerHost;
use crate::core::report::RemovedImageInfo;

const STOP_TIMEOUT: Duration = Duration::from_secs(600);
/// Retries beyond the initial attempt when a stop is already in progress.
const MAX_STOP_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list updater instances: {0}")]
    ListFailed(#[source] crate::core::host::HostError),
    #[error("{failed} of {total} instances failed to stop")]
    PartialFailure {
        failed: usize,
        total: usize,
        stopped: usize,
    },
}

/// Terminates excess updater instances in our scope (plus chained parents
/// from any scope). Returns the number of instances stopped; images of
/// stopped instances are appended to `removed` for the caller's GC when
/// `cleanup` is set.
pub async fn reconcile_instances(
    host: &dyn ContainerHost,
    cleanup: bool,
    scope: &str,
    current: &Container,
    removed: &mut Vec<RemovedImageInfo>,
) -> Result<usize, ReconcileError> {
    let instances = host
        .list_containers(&ContainerFilter::updaters_only())
        .await
        .map_err(ReconcileError::ListFailed)?;

    let chain = current.chain_ids();
    let candidates: Vec<&Container> = instances
        .iter()
        .filter(|c| c.id() != current.id())
        .filter(|c| {
            if chain.contains(c.id()) {
                // Chained parents are mandatory cleanup targets even when
                // their scope does not match ours.
                return true;
            }
            scope_matches(scope, c.scope())
        })
        .collect();

    if candidates.is_empty() {
        debug!("no excess updater instances found");
        return Ok(0);
    }

    let total = candidates.len();
    info!(
        event = "RECONCILE_INSTANCES",
        excess = total,
        "found excess updater instances, cleaning up"
    );

    let mut stopped = 0usize;
    let mut failed = 0usize;
    for c in candidates {
        match stop_with_retry(host, c).await {
            Ok(()) => {
                stopped += 1;
                if cleanup && c.image_id() != current.image_id() {
                    removed.push(RemovedImageInfo {
                        image_id: c.image_id().clone(),
                        image_name: c.image_name().to_string(),
                        container_id: c.id().clone(),
                        container_name: c.name().to_string(),
                    });
                }
            }
            Err(e) => {
                warn!(container = %c.name(), error = %e, "failed to stop excess instance");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(ReconcileError::PartialFailure {
            failed,
            total,
            stopped,
        });
    }
    Ok(stopped)
}

async fn stop_with_retry(
    host: &dyn ContainerHost,
    container: &Container,
) -> crate::core::host::HostResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match host.stop_and_remove_container(container, STOP_TIMEOUT).await {
            Ok(()) => return Ok(()),
            // Already gone counts as stopped.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) if e.is_in_progress() && attempt <= MAX_STOP_RETRIES => {
                debug!(
                    container = %container.name(),
                    attempt,
                    "stop already in progress, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}
