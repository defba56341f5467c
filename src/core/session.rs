//! Top-level session orchestration: engine, GC, metric, notifications.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::gc;
use crate::core::host::ContainerHost;
use crate::core::params::UpdateParams;
use crate::core::report::{Category, ContainerReport, SessionReport};
use crate::core::update::{self, EngineError};
use crate::notify::{Notifier, NotifyEntry};

/// Runs one complete update session and reports it. The session always
/// produces a report; only listing failures abort it, and a cancelled
/// session still notifies with whatever was scanned so far.
pub async fn run_session(
    host: &dyn ContainerHost,
    notifier: &dyn Notifier,
    params: &UpdateParams,
    cancel: &CancellationToken,
) -> anyhow::Result<SessionReport> {
    notifier.start_notification(params.split_by_container);

    let outcome = match update::update(host, params, cancel).await {
        Ok(outcome) => outcome,
        Err(EngineError::Cancelled(partial)) => {
            warn!("session cancelled, reporting partial results");
            dispatch(notifier, &partial, params).await;
            return Err(anyhow::anyhow!("session cancelled"));
        }
        Err(e) => return Err(e).context("update session failed"),
    };

    if params.cleanup && !outcome.cleanup_images.is_empty() {
        let (removed, err) = gc::remove_stale_images(host, &outcome.cleanup_images).await;
        info!(
            event = "IMAGE_CLEANUP",
            removed = removed.len(),
            collected = outcome.cleanup_images.len(),
            "cleaned up stale images"
        );
        if let Some(e) = err {
            warn!(error = %e, "image cleanup finished with errors");
        }
    }

    let counts = outcome.report.counts();
    info!(
        event = "SESSION_DONE",
        scanned = counts.scanned,
        updated = counts.updated,
        restarted = counts.restarted,
        failed = counts.failed,
        skipped = counts.skipped,
        stale = counts.stale,
        fresh = counts.fresh,
        "session finished"
    );

    dispatch(notifier, &outcome.report, params).await;
    Ok(outcome.report)
}

/// Bridges a finished session into the notifier: one grouped report, or one
/// emission per affected container in split mode.
async fn dispatch(notifier: &dyn Notifier, report: &SessionReport, params: &UpdateParams) {
    if !params.split_by_container {
        if notifier.should_send(report) {
            notifier.send_notification(report).await;
        }
        return;
    }

    if params.notify_report {
        for entry in &report.updated {
            send_single(notifier, report, Category::Updated, entry).await;
        }
        for entry in &report.restarted {
            send_single(notifier, report, Category::Restarted, entry).await;
        }
        if params.monitor_only {
            for entry in &report.stale {
                send_single(notifier, report, Category::Stale, entry).await;
            }
        }
        return;
    }

    for entry in &report.updated {
        if entry.name.is_empty() {
            continue;
        }
        let narrowed = report.narrowed_to(Category::Updated, entry);
        let entries = vec![
            NotifyEntry::info("Found new image")
                .with_field("image", &entry.image_name)
                .with_field("image_id", entry.latest_image_id.short()),
            NotifyEntry::info("Stopping container")
                .with_field("container", &entry.name)
                .with_field("container_id", entry.id.short()),
            NotifyEntry::info("Started new container")
                .with_field("container", &entry.name)
                .with_field(
                    "container_id",
                    entry
                        .new_container_id
                        .as_ref()
                        .map(|id| id.short())
                        .unwrap_or_default(),
                ),
        ];
        notifier.send_filtered_entries(entries, &narrowed).await;
    }
    for entry in &report.restarted {
        if entry.name.is_empty() {
            continue;
        }
        let narrowed = report.narrowed_to(Category::Restarted, entry);
        let entries = vec![NotifyEntry::info("Restarting linked container")
            .with_field("container", &entry.name)
            .with_field("container_id", entry.id.short())];
        notifier.send_filtered_entries(entries, &narrowed).await;
    }
    if params.monitor_only {
        for entry in &report.stale {
            if entry.name.is_empty() {
                continue;
            }
            let narrowed = report.narrowed_to(Category::Stale, entry);
            let entries = vec![NotifyEntry::info("Found new image")
                .with_field("image", &entry.image_name)
                .with_field("image_id", entry.latest_image_id.short())];
            notifier.send_filtered_entries(entries, &narrowed).await;
        }
    }
}

async fn send_single(
    notifier: &dyn Notifier,
    report: &SessionReport,
    category: Category,
    entry: &ContainerReport,
) {
    if entry.name.is_empty() {
        return;
    }
    let narrowed = report.narrowed_to(category, entry);
    if notifier.should_send(&narrowed) {
        notifier.send_notification(&narrowed).await;
    }
}
