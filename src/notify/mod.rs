//! Notification seam consumed by the session orchestrator.
//!
//! The core never formats or routes messages itself; it hands reports (or
//! synthesized log entries, in split+log mode) to whatever `Notifier` the
//! binary wires in. The default is a structured-log notifier.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::core::report::SessionReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryLevel {
    Info,
    Warn,
}

/// A synthesized log line for split+log notification mode.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyEntry {
    pub level: EntryLevel,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl NotifyEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: EntryLevel::Info,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Begins a notification batch for one session.
    fn start_notification(&self, split_by_container: bool);

    /// Level/content gate; reports that fail it are not emitted.
    fn should_send(&self, report: &SessionReport) -> bool;

    /// Flushes one grouped (or narrowed) report.
    async fn send_notification(&self, report: &SessionReport);

    /// Emits synthesized entries alongside the narrowed report (split+log
    /// mode).
    async fn send_filtered_entries(&self, entries: Vec<NotifyEntry>, report: &SessionReport);
}

/// Default notifier: serializes reports into the structured log stream.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn start_notification(&self, split_by_container: bool) {
        info!(
            event = "NOTIFY_BATCH_START",
            split_by_container, "starting notification batch"
        );
    }

    fn should_send(&self, report: &SessionReport) -> bool {
        report.has_changes()
    }

    async fn send_notification(&self, report: &SessionReport) {
        let counts = report.counts();
        let body = serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string());
        info!(
            event = "SESSION_REPORT",
            scanned = counts.scanned,
            updated = counts.updated,
            restarted = counts.restarted,
            failed = counts.failed,
            report = %body,
            "session report"
        );
    }

    async fn send_filtered_entries(&self, entries: Vec<NotifyEntry>, _report: &SessionReport) {
        for entry in entries {
            info!(
                event = "SESSION_LOG_ENTRY",
                message = %entry.message,
                fields = %serde_json::to_string(&entry.fields).unwrap_or_default(),
                "session log entry"
            );
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records everything the session hands to the notifier.
    #[derive(Default, Clone)]
    pub struct RecordingNotifier {
        inner: Arc<Mutex<Recorded>>,
    }

    #[derive(Default)]
    pub struct Recorded {
        pub started: Vec<bool>,
        pub reports: Vec<SessionReport>,
        pub entry_batches: Vec<(Vec<NotifyEntry>, SessionReport)>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn started(&self) -> Vec<bool> {
            self.inner.lock().unwrap().started.clone()
        }

        pub fn reports(&self) -> Vec<SessionReport> {
            self.inner.lock().unwrap().reports.clone()
        }

        pub fn entry_batches(&self) -> Vec<(Vec<NotifyEntry>, SessionReport)> {
            self.inner.lock().unwrap().entry_batches.clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn start_notification(&self, split_by_container: bool) {
            self.inner.lock().unwrap().started.push(split_by_container);
        }

        fn should_send(&self, _report: &SessionReport) -> bool {
            true
        }

        async fn send_notification(&self, report: &SessionReport) {
            self.inner.lock().unwrap().reports.push(report.clone());
        }

        async fn send_filtered_entries(&self, entries: Vec<NotifyEntry>, report: &SessionReport) {
            self.inner
                .lock()
                .unwrap()
                .entry_batches
                .push((entries, report.clone()));
        }
    }
}
