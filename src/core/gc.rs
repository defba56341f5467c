//! Post-session image garbage collection.
//!
//! Removal is idempotent from the session's point of view: images that are
//! already gone or still referenced by another container are not errors.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::host::ContainerHost;
use crate::core::report::RemovedImageInfo;

#[derive(Debug, Error)]
#[error("failed to remove {failed} of {attempted} images")]
pub struct CleanupError {
    pub failed: usize,
    pub attempted: usize,
    pub errors: Vec<String>,
}

/// Removes the session's collected images in input order. Returns the
/// subset actually removed, plus an aggregate error when any removal failed
/// for a reason other than not-found or in-use.
pub async fn remove_stale_images(
    host: &dyn ContainerHost,
    images: &[RemovedImageInfo],
) -> (Vec<RemovedImageInfo>, Option<CleanupError>) {
    let mut removed = Vec::new();
    let mut errors = Vec::new();
    let mut attempted = 0usize;

    for info in images {
        if info.image_id.is_empty() {
            continue;
        }
        attempted += 1;
        match host.remove_image_by_id(&info.image_id, &info.image_name).await {
            Ok(()) => {
                info!(
                    event = "IMAGE_REMOVED",
                    image = %info.image_name,
                    id = %info.image_id.short(),
                    container = %info.container_name,
                    "🧹 removed stale image"
                );
                removed.push(info.clone());
            }
            Err(e) if e.is_not_found() => {
                debug!(image = %info.image_name, "image already gone");
            }
            Err(e) if e.is_conflict() => {
                debug!(image = %info.image_name, "image still in use, leaving it");
            }
            Err(e) => {
                warn!(image = %info.image_name, error = %e, "failed to remove image");
                errors.push(format!("{}: {}", info.image_name, e));
            }
        }
    }

    let error = if errors.is_empty() {
        None
    } else {
        Some(CleanupError {
            failed: errors.len(),
            attempted,
            errors,
        })
    };
    (removed, error)
}
