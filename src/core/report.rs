//! Session report records consumed by notifiers and the image GC.

use serde::Serialize;

use crate::core::container::{ContainerId, ImageId};

/// Where a container ended up this session. Exactly one of the six
/// categories applies; `scanned` is an overlay over all of them except
/// `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Updated,
    Restarted,
    Failed,
    Skipped,
    Stale,
    Fresh,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerReport {
    pub id: ContainerId,
    pub name: String,
    pub image_name: String,
    pub old_image_id: ImageId,
    pub latest_image_id: ImageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_container_id: Option<ContainerId>,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub scanned: Vec<ContainerReport>,
    pub updated: Vec<ContainerReport>,
    pub restarted: Vec<ContainerReport>,
    pub failed: Vec<ContainerReport>,
    pub skipped: Vec<ContainerReport>,
    pub stale: Vec<ContainerReport>,
    pub fresh: Vec<ContainerReport>,
}

impl SessionReport {
    /// The session produced something worth telling somebody about.
    pub fn has_changes(&self) -> bool {
        !self.updated.is_empty()
            || !self.restarted.is_empty()
            || !self.failed.is_empty()
            || !self.stale.is_empty()
    }

    /// Copy of this report with one category narrowed to a single container;
    /// all other lists pass through unchanged. Used by split notifications.
    pub fn narrowed_to(&self, category: Category, one: &ContainerReport) -> SessionReport {
        let mut out = self.clone();
        let single = vec![one.clone()];
        match category {
            Category::Updated => out.updated = single,
            Category::Restarted => out.restarted = single,
            Category::Stale => out.stale = single,
            Category::Failed => out.failed = single,
            Category::Skipped => out.skipped = single,
            Category::Fresh => out.fresh = single,
        }
        out
    }

    pub fn counts(&self) -> ReportCounts {
        ReportCounts {
            scanned: self.scanned.len(),
            updated: self.updated.len(),
            restarted: self.restarted.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            stale: self.stale.len(),
            fresh: self.fresh.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportCounts {
    pub scanned: usize,
    pub updated: usize,
    pub restarted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stale: usize,
    pub fresh: usize,
}

/// An image scheduled for removal after its container was replaced. Moved
/// into the garbage collector and consumed there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedImageInfo {
    pub image_id: ImageId,
    pub image_name: String,
    pub container_id: ContainerId,
    pub container_name: String,
}
