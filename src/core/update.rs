//! The update engine: scan, classify, sort, stop and restart.
//!
//! One call to [`update`] takes the scanned population to a consistent
//! post-update population. Session flags live in an id-keyed decision map;
//! container snapshots are never mutated.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::container::{Container, ContainerId, ImageId};
use crate::core::filter::ContainerFilter;
use crate::core::host::{ContainerHost, HostError};
use crate::core::image_ref::resolve_reference;
use crate::core::lifecycle::{self, Hook};
use crate::core::params::{should_update_container, UpdateParams};
use crate::core::progress::Progress;
use crate::core::report::{RemovedImageInfo, SessionReport};
use crate::core::self_update;
use crate::core::sorter::{detect_cycles, sort_by_dependencies, SortError};

pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(300);

const SKIP_HOOK_MESSAGE: &str = "pre-update hook requested skip";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to list containers: {0}")]
    ListFailed(#[source] HostError),
    #[error("session cancelled")]
    Cancelled(Box<SessionReport>),
}

#[derive(Debug)]
pub struct UpdateOutcome {
    pub report: SessionReport,
    pub cleanup_images: Vec<RemovedImageInfo>,
}

/// Session flags for one container, produced by the scan phase and consumed
/// by sorting and execution.
#[derive(Debug, Clone, Copy, Default)]
struct Decision {
    stale: bool,
    linked: bool,
}

impl Decision {
    fn to_restart(self) -> bool {
        self.stale || self.linked
    }
}

enum StopOutcome {
    /// The updater is never stopped here; the restart step swaps it.
    Deferred,
    SkipRequested,
    Stopped,
    Failed(String),
}

/// Runs one full update session against the host and returns the report
/// plus the images scheduled for cleanup.
pub async fn update(
    host: &dyn ContainerHost,
    params: &UpdateParams,
    cancel: &CancellationToken,
) -> Result<UpdateOutcome, EngineError> {
    Engine {
        host,
        params,
        progress: Progress::new(),
        decisions: HashMap::new(),
        cleanup: Vec::new(),
        pull_failed: false,
    }
    .run(cancel)
    .await
}

struct Engine<'a> {
    host: &'a dyn ContainerHost,
    params: &'a UpdateParams,
    progress: Progress,
    decisions: HashMap<ContainerId, Decision>,
    cleanup: Vec<RemovedImageInfo>,
    pull_failed: bool,
}

impl Engine<'_> {
    async fn run(mut self, cancel: &CancellationToken) -> Result<UpdateOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(Box::default()));
        }

        let filtered = self
            .host
            .list_containers(&self.params.filter)
            .await
            .map_err(EngineError::ListFailed)?;
        let all = self
            .host
            .list_containers(&ContainerFilter::matching_all())
            .await
            .map_err(EngineError::ListFailed)?;
        info!(
            event = "SESSION_SCAN",
            filtered = filtered.len(),
            total = all.len(),
            "scanning containers"
        );

        lifecycle::execute_pre_checks(self.host, self.params, &filtered).await;

        // Containers that can never be ordered are surfaced as skipped
        // instead of aborting the whole session.
        for c in &filtered {
            if c.links().iter().any(|l| l == c.name()) {
                self.progress
                    .add_skipped(c, format!("container '{}' depends on itself", c.name()));
            }
        }
        let cyclic = detect_cycles(&filtered);
        for c in &filtered {
            if cyclic.contains(c.id()) {
                self.progress
                    .add_skipped(c, SortError::CircularReference(c.name().to_string()));
            }
        }

        for c in &filtered {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled(Box::new(self.progress.report())));
            }
            if self.progress.is_tracked(c.id()) {
                continue;
            }
            self.scan_container(c).await;
        }

        let (sorted, propagate) = match sort_by_dependencies(&filtered) {
            Ok(sorted) => (sorted, true),
            Err(SortError::CircularReference(name)) => {
                if let Some(c) = filtered.iter().find(|c| c.name() == name) {
                    self.progress
                        .add_skipped(c, SortError::CircularReference(name.clone()));
                }
                (filtered.clone(), false)
            }
        };
        if propagate {
            self.propagate_implicit_restarts(&sorted, &all);
        }

        let to_restart: Vec<Container> = sorted
            .iter()
            .filter(|c| {
                self.decision(c.id()).to_restart()
                    && !c.is_monitor_only(self.params)
                    && !self.progress.is_skipped(c.id())
            })
            .cloned()
            .collect();

        if self.params.rolling_restart {
            self.rolling_restart(&to_restart).await;
        } else {
            self.batched_restart(&to_restart).await;
        }

        lifecycle::execute_post_checks(self.host, self.params, &filtered).await;

        if self.pull_failed {
            warn!(
                delay = ?self.params.pull_failure_delay,
                "pull for own image failed, delaying before exit to avoid a restart-pull loop"
            );
            tokio::time::sleep(self.params.pull_failure_delay).await;
        }

        Ok(UpdateOutcome {
            report: self.progress.report(),
            cleanup_images: self.cleanup,
        })
    }

    fn decision(&self, id: &ContainerId) -> Decision {
        self.decisions.get(id).copied().unwrap_or_default()
    }

    async fn scan_container(&mut self, c: &Container) {
        match resolve_reference(c) {
            Ok(reference) if reference.is_pinned() => {
                debug!(
                    container = %c.name(),
                    "image reference is digest-pinned, never updated"
                );
                self.progress.add_scanned(c, c.image_id().clone());
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(container = %c.name(), error = %e, "skipping container");
                self.progress.add_skipped(c, e);
                return;
            }
        }

        let (stale, newest) = match self.host.is_stale(c, self.params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(container = %c.name(), error = %e, "staleness check failed");
                if c.is_updater() {
                    self.pull_failed = true;
                }
                self.progress.add_skipped(c, e);
                return;
            }
        };

        let should_update = should_update_container(stale, c, self.params);
        if should_update {
            if let Err(e) = c.verify_config() {
                warn!(container = %c.name(), error = %e, "configuration cannot be recreated");
                self.progress.add_skipped(c, e);
                return;
            }
        }

        let latest = if stale { newest } else { c.image_id().clone() };
        self.progress.add_scanned(c, latest);
        self.decisions.entry(c.id().clone()).or_default().stale = stale && should_update;
    }

    /// Marks containers linked to a restarting target, in dependency order
    /// so the flag travels transitively, mirrored onto the full population.
    fn propagate_implicit_restarts(&mut self, sorted: &[Container], all: &[Container]) {
        let mut restart_by_name: HashMap<String, bool> = all
            .iter()
            .map(|c| (c.name().to_string(), self.decision(c.id()).to_restart()))
            .collect();

        for c in sorted {
            if self.decision(c.id()).to_restart() {
                continue;
            }
            let linked = c
                .links()
                .iter()
                .any(|l| restart_by_name.get(l).copied().unwrap_or(false));
            if linked {
                debug!(container = %c.name(), "restarting due to a restarting link target");
                self.decisions.entry(c.id().clone()).or_default().linked = true;
                restart_by_name.insert(c.name().to_string(), true);
            }
        }
    }

    async fn stop_stale_container(&mut self, c: &Container) -> StopOutcome {
        if c.is_updater() {
            debug!(container = %c.name(), "updater is swapped by the restart step, not stopped");
            return StopOutcome::Deferred;
        }

        let decision = self.decision(c.id());
        if decision.linked && !decision.stale {
            if let Err(e) = c.verify_config() {
                return StopOutcome::Failed(e.to_string());
            }
        }

        if self.params.lifecycle_hooks {
            match lifecycle::execute_hook(self.host, c, None, Hook::PreUpdate).await {
                Ok(true) => return StopOutcome::SkipRequested,
                Ok(false) => {}
                Err(e) => return StopOutcome::Failed(e.to_string()),
            }
        }

        info!(
            event = "CONTAINER_STOPPING",
            container = %c.name(),
            id = %c.id().short(),
            "🛑 stopping container"
        );
        match self
            .host
            .stop_and_remove_container(c, self.params.stop_timeout)
            .await
        {
            Ok(()) => StopOutcome::Stopped,
            Err(e) => StopOutcome::Failed(e.to_string()),
        }
    }

    async fn restart_stale_container(
        &mut self,
        c: &Container,
    ) -> Result<(Option<ContainerId>, bool), String> {
        let stale = self.decision(c.id()).stale;

        let (new_id, renamed) = if c.is_updater() && !c.is_peer_updater(self.params) {
            let (new_id, renamed) = self_update::swap_updater(self.host, c, self.params)
                .await
                .map_err(|e| e.to_string())?;
            (Some(new_id), renamed)
        } else {
            if self.params.no_restart {
                return Ok((None, false));
            }
            info!(
                event = "CONTAINER_STARTING",
                container = %c.name(),
                "🚀 starting replacement container"
            );
            let new_id = self
                .host
                .start_container(c)
                .await
                .map_err(|e| e.to_string())?;
            (Some(new_id), false)
        };

        if self.params.lifecycle_hooks && stale {
            if let Some(target) = &new_id {
                if let Err(e) = lifecycle::execute_hook(self.host, c, Some(target), Hook::PostUpdate).await
                {
                    warn!(container = %c.name(), error = %e, "post-update hook failed");
                }
            }
        }

        Ok((new_id, renamed))
    }

    fn record_restart(&mut self, c: &Container, new_id: Option<ContainerId>, renamed: bool) {
        if self.decision(c.id()).stale {
            self.progress.mark_for_update(c.id());
            if let Some(nid) = &new_id {
                self.progress.set_new_container_id(c.id(), nid.clone());
            }
            if !renamed {
                self.push_cleanup(c);
            }
        } else {
            self.progress.mark_restarted(c.id());
        }
    }

    fn push_cleanup(&mut self, c: &Container) {
        if self.cleanup.iter().any(|i| i.image_id == *c.image_id()) {
            return;
        }
        self.cleanup.push(RemovedImageInfo {
            image_id: c.image_id().clone(),
            image_name: c.image_name().to_string(),
            container_id: c.id().clone(),
            container_name: c.name().to_string(),
        });
    }

    /// Batched strategy: everything stops in reverse dependency order, then
    /// everything restarts in forward order.
    async fn batched_restart(&mut self, to_restart: &[Container]) {
        let mut failed: HashMap<ContainerId, String> = HashMap::new();
        let mut failed_stop: HashSet<ContainerId> = HashSet::new();
        let mut stopped_images: HashSet<ImageId> = HashSet::new();

        for c in to_restart.iter().rev() {
            match self.stop_stale_container(c).await {
                StopOutcome::Deferred => {}
                StopOutcome::SkipRequested => {
                    self.progress.add_skipped(c, SKIP_HOOK_MESSAGE);
                }
                StopOutcome::Failed(e) => {
                    failed_stop.insert(c.id().clone());
                    failed.insert(c.id().clone(), e);
                }
                StopOutcome::Stopped => {
                    stopped_images.insert(c.image_id().clone());
                }
            }
        }
        self.progress.update_failed(&failed);
        failed.clear();

        for c in to_restart {
            if self.progress.is_skipped(c.id()) || failed_stop.contains(c.id()) {
                continue;
            }
            if c.is_peer_updater(self.params) {
                debug!(container = %c.name(), "never swapping a peer updater instance");
                continue;
            }
            // The updater was deliberately left running by the stop phase;
            // everything else restarts only if it was stopped this session.
            if !c.is_updater() && !stopped_images.contains(c.image_id()) {
                continue;
            }
            match self.restart_stale_container(c).await {
                Ok((new_id, renamed)) => self.record_restart(c, new_id, renamed),
                Err(e) => {
                    failed.insert(c.id().clone(), e);
                }
            }
        }
        self.progress.update_failed(&failed);
    }

    /// Rolling strategy: one container at a time, fully replaced and
    /// healthy (best effort) before the next one is touched.
    async fn rolling_restart(&mut self, to_restart: &[Container]) {
        for c in to_restart {
            match self.stop_stale_container(c).await {
                StopOutcome::SkipRequested => {
                    self.progress.add_skipped(c, SKIP_HOOK_MESSAGE);
                    continue;
                }
                StopOutcome::Failed(e) => {
                    self.progress.mark_failed(c.id(), e);
                    continue;
                }
                StopOutcome::Deferred | StopOutcome::Stopped => {}
            }
            match self.restart_stale_container(c).await {
                Ok((new_id, renamed)) => {
                    if let Some(nid) = &new_id {
                        if let Err(e) = self
                            .host
                            .wait_for_healthy(nid, DEFAULT_HEALTH_CHECK_TIMEOUT)
                            .await
                        {
                            warn!(
                                container = %c.name(),
                                error = %e,
                                "container did not report healthy in time"
                            );
                        }
                    }
                    self.record_restart(c, new_id, renamed);
                }
                Err(e) => {
                    self.progress.mark_failed(c.id(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{host_with, stub, Fail, MockHost, Op};
    use crate::core::container::{
        LABEL_DEPENDS_ON, LABEL_MONITOR_ONLY, LABEL_NAMESPACE,
    };
    use crate::core::lifecycle::LABEL_PRE_UPDATE;
    use crate::core::report::Category;

    fn params() -> UpdateParams {
        UpdateParams {
            // Tests never want the tail-of-session safety sleep.
            pull_failure_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn run(host: &MockHost, params: &UpdateParams) -> UpdateOutcome {
        update(host, params, &CancellationToken::new())
            .await
            .expect("session should not abort")
    }

    fn names(list: &[crate::core::report::ContainerReport]) -> Vec<&str> {
        list.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn single_stale_container_is_updated() {
        let app = stub("app", "app:v1", "sha256:app1");
        let host = host_with(vec![app.clone()]);
        host.set_stale(app.id(), ImageId::from("sha256:app2"));

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.updated), vec!["app"]);
        assert!(outcome.report.stale.is_empty());
        assert_eq!(names(&outcome.report.scanned), vec!["app"]);
        assert_eq!(outcome.cleanup_images.len(), 1);
        assert_eq!(outcome.cleanup_images[0].image_id, ImageId::from("sha256:app1"));
        assert_eq!(
            outcome.report.updated[0].new_container_id,
            Some(ContainerId::from("new-app"))
        );

        let stop = host.op_index(&Op::StopAndRemove("app".into())).unwrap();
        let start = host.op_index(&Op::Start("app".into())).unwrap();
        assert!(stop < start, "update implies stop-then-start");
    }

    #[tokio::test]
    async fn fresh_containers_are_left_alone() {
        let app = stub("app", "app:v1", "sha256:app1");
        let host = host_with(vec![app]);

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.fresh), vec!["app"]);
        assert!(outcome.report.updated.is_empty());
        assert_eq!(host.count(|o| matches!(o, Op::StopAndRemove(_))), 0);
    }

    #[tokio::test]
    async fn monitor_only_reports_but_never_updates() {
        let c1 = stub("c1", "one:v1", "sha256:one1");
        let c2 = stub("c2", "two:v1", "sha256:two1");
        let host = host_with(vec![c1.clone(), c2.clone()]);
        host.set_stale(c1.id(), ImageId::from("sha256:one2"));
        host.set_stale(c2.id(), ImageId::from("sha256:two2"));

        let p = UpdateParams {
            monitor_only: true,
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert!(outcome.report.updated.is_empty());
        assert_eq!(names(&outcome.report.stale), vec!["c1", "c2"]);
        assert_eq!(names(&outcome.report.scanned), vec!["c1", "c2"]);
        assert!(outcome.cleanup_images.is_empty());
        assert_eq!(host.count(|o| matches!(o, Op::StopAndRemove(_))), 0);
        assert_eq!(host.count(|o| matches!(o, Op::RemoveImage(_))), 0);
    }

    #[tokio::test]
    async fn monitor_only_label_can_override_the_global_under_precedence() {
        let c = stub("app", "app:v1", "sha256:app1").with_label(LABEL_MONITOR_ONLY, "false");
        let host = host_with(vec![c.clone()]);
        host.set_stale(c.id(), ImageId::from("sha256:app2"));

        let p = UpdateParams {
            monitor_only: true,
            label_precedence: true,
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert_eq!(names(&outcome.report.updated), vec!["app"]);
    }

    #[tokio::test]
    async fn pinned_image_is_scanned_but_never_checked_or_updated() {
        let c = stub(
            "app",
            "app@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            "sha256:app1",
        );
        let host = host_with(vec![c]);

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.scanned), vec!["app"]);
        assert_eq!(names(&outcome.report.fresh), vec!["app"]);
        assert!(outcome.report.updated.is_empty());
        assert!(outcome.report.failed.is_empty());
        assert_eq!(host.count(|o| matches!(o, Op::IsStale(_))), 0);
        assert_eq!(host.count(|o| matches!(o, Op::RemoveImage(_))), 0);
    }

    #[tokio::test]
    async fn unparsable_reference_is_skipped() {
        let c = stub("x~x", "~~not~a~ref~~", "sha256:bad1");
        let host = host_with(vec![c]);

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.skipped), vec!["x~x"]);
        assert!(outcome.report.scanned.is_empty());
        assert_eq!(host.count(|o| matches!(o, Op::IsStale(_))), 0);
    }

    #[tokio::test]
    async fn circular_dependency_skips_both_without_aborting() {
        let a = stub("a", "a:v1", "sha256:a1").with_label(LABEL_DEPENDS_ON, "b");
        let b = stub("b", "b:v1", "sha256:b1").with_label(LABEL_DEPENDS_ON, "a");
        let c = stub("c", "c:v1", "sha256:c1");
        let host = host_with(vec![a.clone(), b.clone(), c.clone()]);
        host.set_stale(a.id(), ImageId::from("sha256:a2"));
        host.set_stale(b.id(), ImageId::from("sha256:b2"));
        host.set_stale(c.id(), ImageId::from("sha256:c2"));

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.skipped), vec!["a", "b"]);
        for skipped in &outcome.report.skipped {
            assert!(skipped.error.as_ref().unwrap().contains("circular"));
        }
        // The rest of the session proceeds normally.
        assert_eq!(names(&outcome.report.updated), vec!["c"]);
        // Cyclic containers are pre-skipped before any staleness traffic.
        assert_eq!(host.count(|o| matches!(o, Op::IsStale(_))), 1);
    }

    #[tokio::test]
    async fn self_dependency_is_skipped() {
        let a = stub("a", "a:v1", "sha256:a1").with_label(LABEL_DEPENDS_ON, "a");
        let host = host_with(vec![a]);

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.skipped), vec!["a"]);
        assert!(outcome.report.skipped[0]
            .error
            .as_ref()
            .unwrap()
            .contains("depends on itself"));
    }

    #[tokio::test]
    async fn batched_stops_reversed_and_starts_forward() {
        // app depends on db; both stale.
        let db = stub("db", "db:v1", "sha256:db1");
        let app = stub("app", "app:v1", "sha256:app1").with_label(LABEL_DEPENDS_ON, "db");
        let host = host_with(vec![db.clone(), app.clone()]);
        host.set_stale(db.id(), ImageId::from("sha256:db2"));
        host.set_stale(app.id(), ImageId::from("sha256:app2"));

        let outcome = run(&host, &params()).await;
        assert_eq!(outcome.report.updated.len(), 2);

        let stop_app = host.op_index(&Op::StopAndRemove("app".into())).unwrap();
        let stop_db = host.op_index(&Op::StopAndRemove("db".into())).unwrap();
        let start_app = host.op_index(&Op::Start("app".into())).unwrap();
        let start_db = host.op_index(&Op::Start("db".into())).unwrap();
        assert!(stop_app < stop_db, "dependents stop first");
        assert!(start_db < start_app, "dependencies start first");
    }

    #[tokio::test]
    async fn rolling_replaces_dependencies_completely_first() {
        let db = stub("db", "db:v1", "sha256:db1");
        let app = stub("app", "app:v1", "sha256:app1").with_label(LABEL_DEPENDS_ON, "db");
        let host = host_with(vec![app.clone(), db.clone()]);
        host.set_stale(db.id(), ImageId::from("sha256:db2"));
        host.set_stale(app.id(), ImageId::from("sha256:app2"));

        let p = UpdateParams {
            rolling_restart: true,
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert_eq!(outcome.report.updated.len(), 2);

        let stop_db = host.op_index(&Op::StopAndRemove("db".into())).unwrap();
        let start_db = host.op_index(&Op::Start("db".into())).unwrap();
        let wait_db = host.op_index(&Op::WaitHealthy("new-db".into())).unwrap();
        let stop_app = host.op_index(&Op::StopAndRemove("app".into())).unwrap();
        assert!(stop_db < start_db && start_db < wait_db && wait_db < stop_app);
    }

    #[tokio::test]
    async fn linked_containers_restart_without_counting_as_updated() {
        let db = stub("db", "db:v1", "sha256:db1");
        let app = stub("app", "app:v1", "sha256:app1").with_label(LABEL_DEPENDS_ON, "db");
        let host = host_with(vec![db.clone(), app.clone()]);
        host.set_stale(db.id(), ImageId::from("sha256:db2"));

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.updated), vec!["db"]);
        assert_eq!(names(&outcome.report.restarted), vec!["app"]);
        // The linked container's image is untouched.
        assert_eq!(outcome.cleanup_images.len(), 1);
        assert_eq!(outcome.cleanup_images[0].image_id, ImageId::from("sha256:db1"));
        assert!(host.op_index(&Op::Start("app".into())).is_some());
    }

    #[tokio::test]
    async fn implicit_restart_propagates_transitively() {
        let base = stub("base", "base:v1", "sha256:base1");
        let mid = stub("mid", "mid:v1", "sha256:mid1").with_label(LABEL_DEPENDS_ON, "base");
        let top = stub("top", "top:v1", "sha256:top1").with_label(LABEL_DEPENDS_ON, "mid");
        let host = host_with(vec![top.clone(), mid.clone(), base.clone()]);
        host.set_stale(base.id(), ImageId::from("sha256:base2"));

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.updated), vec!["base"]);
        assert_eq!(names(&outcome.report.restarted), vec!["mid", "top"]);
    }

    #[tokio::test]
    async fn self_update_renames_swaps_and_defers_image_cleanup() {
        let wt = stub("watchtower", "wt:latest", "sha256:wt1")
            .with_label(LABEL_NAMESPACE, "true")
            .with_id("wt-1");
        let host = host_with(vec![wt.clone()]);
        host.set_stale(wt.id(), ImageId::from("sha256:wt2"));
        host.set_start_id(wt.id(), &ContainerId::from("wt-2-id"));

        let p = UpdateParams {
            current_container_id: Some(ContainerId::from("wt-1")),
            ..params()
        };
        let outcome = run(&host, &p).await;

        assert_eq!(names(&outcome.report.updated), vec!["watchtower"]);
        assert_eq!(
            outcome.report.updated[0].new_container_id,
            Some(ContainerId::from("wt-2-id"))
        );
        // Deferred to the next session's reconciler.
        assert!(outcome.cleanup_images.is_empty());

        let rename = host
            .op_index(&Op::Rename("watchtower".into(), "watchtower-old-wt-1".into()))
            .unwrap();
        let start = host.op_index(&Op::Start("watchtower".into())).unwrap();
        let policy = host.op_index(&Op::Update("watchtower".into())).unwrap();
        let stop = host
            .op_index(&Op::StopAndRemove("watchtower".into()))
            .unwrap();
        assert!(rename < start && start < policy && policy < stop);
    }

    #[tokio::test]
    async fn peer_updater_is_reported_stale_but_never_swapped() {
        let peer = stub("wt-peer", "wt:latest", "sha256:wtp1")
            .with_label(LABEL_NAMESPACE, "true")
            .with_id("peer-id");
        let host = host_with(vec![peer.clone()]);
        host.set_stale(peer.id(), ImageId::from("sha256:wtp2"));

        let p = UpdateParams {
            current_container_id: Some(ContainerId::from("my-id")),
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert!(outcome.report.updated.is_empty());
        assert_eq!(names(&outcome.report.stale), vec!["wt-peer"]);
        assert_eq!(host.count(|o| matches!(o, Op::Rename(_, _))), 0);
        assert_eq!(host.count(|o| matches!(o, Op::Start(_))), 0);
    }

    #[tokio::test]
    async fn run_once_reports_the_updater_stale_instead_of_swapping() {
        let wt = stub("watchtower", "wt:latest", "sha256:wt1")
            .with_label(LABEL_NAMESPACE, "true")
            .with_id("wt-1");
        let host = host_with(vec![wt.clone()]);
        host.set_stale(wt.id(), ImageId::from("sha256:wt2"));

        let p = UpdateParams {
            run_once: true,
            current_container_id: Some(ContainerId::from("wt-1")),
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert_eq!(names(&outcome.report.stale), vec!["watchtower"]);
        assert_eq!(host.count(|o| matches!(o, Op::Rename(_, _))), 0);
    }

    #[tokio::test]
    async fn no_restart_spares_ordinary_containers() {
        let app = stub("app", "app:v1", "sha256:app1");
        let host = host_with(vec![app.clone()]);
        host.set_stale(app.id(), ImageId::from("sha256:app2"));

        let p = UpdateParams {
            no_restart: true,
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert_eq!(names(&outcome.report.stale), vec!["app"]);
        assert_eq!(host.count(|o| matches!(o, Op::StopAndRemove(_))), 0);
    }

    #[tokio::test]
    async fn staleness_error_skips_the_container() {
        let ok = stub("ok", "ok:v1", "sha256:ok1");
        let broken = stub("broken", "broken:v1", "sha256:broken1");
        let host = host_with(vec![ok.clone(), broken.clone()]);
        host.set_stale(ok.id(), ImageId::from("sha256:ok2"));
        host.set_stale_error(broken.id());

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.skipped), vec!["broken"]);
        assert_eq!(names(&outcome.report.updated), vec!["ok"]);
    }

    #[tokio::test]
    async fn pre_update_hook_tempfail_skips_the_container() {
        let app = stub("app", "app:v1", "sha256:app1").with_label(LABEL_PRE_UPDATE, "/drain.sh");
        let host = host_with(vec![app.clone()]);
        host.set_stale(app.id(), ImageId::from("sha256:app2"));
        host.set_exec_exit_code(app.id(), 75);

        let p = UpdateParams {
            lifecycle_hooks: true,
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert_eq!(names(&outcome.report.skipped), vec!["app"]);
        assert!(outcome.report.updated.is_empty());
        assert_eq!(host.count(|o| matches!(o, Op::StopAndRemove(_))), 0);
        assert!(outcome.cleanup_images.is_empty());
    }

    #[tokio::test]
    async fn pre_update_hook_failure_marks_the_container_failed() {
        let app = stub("app", "app:v1", "sha256:app1").with_label(LABEL_PRE_UPDATE, "/drain.sh");
        let host = host_with(vec![app.clone()]);
        host.set_stale(app.id(), ImageId::from("sha256:app2"));
        host.set_exec_exit_code(app.id(), 1);

        let p = UpdateParams {
            lifecycle_hooks: true,
            ..params()
        };
        let outcome = run(&host, &p).await;
        assert_eq!(names(&outcome.report.failed), vec!["app"]);
        assert_eq!(host.count(|o| matches!(o, Op::StopAndRemove(_))), 0);
    }

    #[tokio::test]
    async fn stop_failure_is_reported_and_image_kept() {
        let app = stub("app", "app:v1", "sha256:app1");
        let host = host_with(vec![app.clone()]);
        host.set_stale(app.id(), ImageId::from("sha256:app2"));
        host.fail_stop(app.id(), Fail::Other, usize::MAX);

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.failed), vec!["app"]);
        assert!(outcome.cleanup_images.is_empty());
        assert_eq!(host.count(|o| matches!(o, Op::Start(_))), 0);
    }

    #[tokio::test]
    async fn start_failure_is_reported_and_image_kept() {
        let app = stub("app", "app:v1", "sha256:app1");
        let host = host_with(vec![app.clone()]);
        host.set_stale(app.id(), ImageId::from("sha256:app2"));
        host.fail_start(app.id(), Fail::Other);

        let outcome = run(&host, &params()).await;
        assert_eq!(names(&outcome.report.failed), vec!["app"]);
        assert!(outcome.cleanup_images.is_empty());
    }

    #[tokio::test]
    async fn duplicate_image_ids_are_collected_once() {
        let one = stub("one", "shared:v1", "sha256:shared1");
        let two = stub("two", "shared:v1", "sha256:shared1").with_id("two-id");
        let host = host_with(vec![one.clone(), two.clone()]);
        host.set_stale(one.id(), ImageId::from("sha256:shared2"));
        host.set_stale(two.id(), ImageId::from("sha256:shared2"));

        let outcome = run(&host, &params()).await;
        assert_eq!(outcome.report.updated.len(), 2);
        assert_eq!(outcome.cleanup_images.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_the_scan_returns_the_partial_report() {
        let host = host_with(vec![stub("app", "app:v1", "sha256:app1")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = update(&host, &params(), &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));
        assert_eq!(host.count(|o| matches!(o, Op::StopAndRemove(_))), 0);
    }

    #[tokio::test]
    async fn every_container_lands_in_exactly_one_partition() {
        let updated = stub("updated", "u:v1", "sha256:u1");
        let fresh = stub("fresh", "f:v1", "sha256:f1");
        let stale = stub("stale", "s:v1", "sha256:s1").with_label(LABEL_MONITOR_ONLY, "true");
        let failed = stub("failed", "x:v1", "sha256:x1");
        let skipped = stub("skipped", "k:v1", "sha256:k1");
        let host = host_with(vec![
            updated.clone(),
            fresh.clone(),
            stale.clone(),
            failed.clone(),
            skipped.clone(),
        ]);
        host.set_stale(updated.id(), ImageId::from("sha256:u2"));
        host.set_stale(stale.id(), ImageId::from("sha256:s2"));
        host.set_stale(failed.id(), ImageId::from("sha256:x2"));
        host.fail_stop(failed.id(), Fail::Other, usize::MAX);
        host.set_stale_error(skipped.id());

        let outcome = run(&host, &params()).await;
        let r = &outcome.report;
        let mut seen: Vec<&str> = Vec::new();
        for list in [&r.updated, &r.restarted, &r.failed, &r.skipped, &r.stale, &r.fresh] {
            for entry in list.iter() {
                assert!(!seen.contains(&entry.name.as_str()), "{} seen twice", entry.name);
                seen.push(&entry.name);
            }
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(r.scanned.len(), 4);
        for entry in &r.updated {
            assert_eq!(entry.category, Category::Updated);
            assert_ne!(entry.old_image_id, entry.latest_image_id);
        }
    }
}
