//! Per-container status tracking across one update session.
//!
//! A single `Status` record per container id is authoritative; the report
//! partitions are derived from it at the end of the session. Transitions
//! that would downgrade a record are rejected silently.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::core::container::{Container, ContainerId, ImageId};
use crate::core::report::{Category, ContainerReport, SessionReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanned,
    MarkedForUpdate,
    Restarted,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
struct Status {
    id: ContainerId,
    name: String,
    image_name: String,
    old_image_id: ImageId,
    latest_image_id: ImageId,
    new_container_id: Option<ContainerId>,
    state: State,
    error: Option<String>,
}

#[derive(Debug, Default)]
pub struct Progress {
    statuses: BTreeMap<ContainerId, Status>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    fn status_from(container: &Container, latest: ImageId, state: State) -> Status {
        Status {
            id: container.id().clone(),
            name: container.name().to_string(),
            image_name: container.image_name().to_string(),
            old_image_id: container.image_id().clone(),
            latest_image_id: latest,
            new_container_id: None,
            state,
            error: None,
        }
    }

    /// Records a successfully inspected container. `latest` is the newest
    /// known image id: the remote one when stale, the container's own
    /// otherwise. No-op if the container is already tracked.
    pub fn add_scanned(&mut self, container: &Container, latest: ImageId) {
        self.statuses
            .entry(container.id().clone())
            .or_insert_with(|| Self::status_from(container, latest, State::Scanned));
    }

    /// Marks a container as filtered out mid-flight. Overrides a plain
    /// scanned record but never a terminal one.
    pub fn add_skipped(&mut self, container: &Container, err: impl fmt::Display) {
        let entry = self
            .statuses
            .entry(container.id().clone())
            .or_insert_with(|| {
                Self::status_from(container, container.image_id().clone(), State::Skipped)
            });
        if matches!(entry.state, State::Scanned | State::Skipped) {
            entry.state = State::Skipped;
            entry.error = Some(err.to_string());
        }
    }

    /// Tentatively promotes a container to updated.
    pub fn mark_for_update(&mut self, id: &ContainerId) {
        if let Some(s) = self.statuses.get_mut(id) {
            if matches!(s.state, State::Scanned | State::Restarted) {
                s.state = State::MarkedForUpdate;
            }
        }
    }

    /// Records a link-induced restart. Does not displace an update.
    pub fn mark_restarted(&mut self, id: &ContainerId) {
        if let Some(s) = self.statuses.get_mut(id) {
            if s.state == State::Scanned {
                s.state = State::Restarted;
            }
        }
    }

    /// Batch failure record; overrides everything except a skip.
    pub fn update_failed(&mut self, failures: &HashMap<ContainerId, String>) {
        for (id, err) in failures {
            self.mark_failed(id, err);
        }
    }

    pub fn mark_failed(&mut self, id: &ContainerId, err: impl fmt::Display) {
        if let Some(s) = self.statuses.get_mut(id) {
            if s.state != State::Skipped {
                s.state = State::Failed;
                s.error = Some(err.to_string());
            }
        }
    }

    pub fn set_new_container_id(&mut self, id: &ContainerId, new_id: ContainerId) {
        if let Some(s) = self.statuses.get_mut(id) {
            s.new_container_id = Some(new_id);
        }
    }

    pub fn is_tracked(&self, id: &ContainerId) -> bool {
        self.statuses.contains_key(id)
    }

    pub fn is_skipped(&self, id: &ContainerId) -> bool {
        self.statuses
            .get(id)
            .map(|s| s.state == State::Skipped)
            .unwrap_or(false)
    }

    /// Partitions the tracked statuses into the final report. Every id lands
    /// in exactly one category; `scanned` overlays everything not skipped.
    pub fn report(&self) -> SessionReport {
        let mut report = SessionReport::default();
        for status in self.statuses.values() {
            let category = match status.state {
                State::Skipped => Category::Skipped,
                State::Failed => Category::Failed,
                State::MarkedForUpdate => Category::Updated,
                State::Restarted => Category::Restarted,
                State::Scanned => {
                    if status.latest_image_id != status.old_image_id {
                        Category::Stale
                    } else {
                        Category::Fresh
                    }
                }
            };
            let entry = ContainerReport {
                id: status.id.clone(),
                name: status.name.clone(),
                image_name: status.image_name.clone(),
                old_image_id: status.old_image_id.clone(),
                latest_image_id: status.latest_image_id.clone(),
                new_container_id: status.new_container_id.clone(),
                category,
                error: status.error.clone(),
            };
            if category != Category::Skipped {
                report.scanned.push(entry.clone());
            }
            match category {
                Category::Updated => report.updated.push(entry),
                Category::Restarted => report.restarted.push(entry),
                Category::Failed => report.failed.push(entry),
                Category::Skipped => report.skipped.push(entry),
                Category::Stale => report.stale.push(entry),
                Category::Fresh => report.fresh.push(entry),
            }
        }
        for list in [
            &mut report.scanned,
            &mut report.updated,
            &mut report.restarted,
            &mut report.failed,
            &mut report.skipped,
            &mut report.stale,
            &mut report.fresh,
        ] {
            list.sort_by(|a, b| a.name.cmp(&b.name));
        }
        report
    }
}
