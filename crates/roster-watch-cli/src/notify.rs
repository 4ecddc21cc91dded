//! Hand-off of run outcomes to whatever raises alerts.
//!
//! Nothing here sends mail. `LogNotifier` reports through tracing and
//! `JsonFileNotifier` leaves the latest outcome on disk for an external
//! alerting component to pick up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use roster_watch::RunSummary;
use serde::Serialize;

/// Receives the outcome of every run.
pub trait Notifier {
    fn name(&self) -> &'static str;
    fn success(&self, summary: &RunSummary) -> Result<()>;
    fn failure(&self, error: &str) -> Result<()>;
}

/// Deliver to every notifier; failures are logged and swallowed.
pub fn notify_success(notifiers: &[Box<dyn Notifier>], summary: &RunSummary) {
    for notifier in notifiers {
        if let Err(e) = notifier.success(summary) {
            tracing::warn!("notifier {} failed: {e:#}", notifier.name());
        }
    }
}

/// Failure counterpart of `notify_success`.
pub fn notify_failure(notifiers: &[Box<dyn Notifier>], error: &str) {
    for notifier in notifiers {
        if let Err(e) = notifier.failure(error) {
            tracing::warn!("notifier {} failed: {e:#}", notifier.name());
        }
    }
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn success(&self, summary: &RunSummary) -> Result<()> {
        if !summary.has_changes() {
            tracing::info!("no roster changes this run");
            return Ok(());
        }
        let names = summary
            .sample
            .iter()
            .map(|s| format!("{} ({})", s.full_name, s.identifier))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            new = summary.new_count,
            released = summary.released_count,
            "roster changed: {names}"
        );
        if summary.new_count > summary.sample.len() {
            tracing::info!("... and {} more", summary.new_count - summary.sample.len());
        }
        Ok(())
    }

    fn failure(&self, error: &str) -> Result<()> {
        tracing::error!("roster run failed: {error}");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome<'a> {
    Success {
        at: String,
        summary: &'a RunSummary,
    },
    Error {
        at: String,
        error: &'a str,
    },
}

/// Writes the latest outcome as pretty JSON, replacing the previous one.
pub struct JsonFileNotifier {
    path: PathBuf,
}

impl JsonFileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, outcome: &Outcome<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(outcome)?;
        // Readers only ever see a complete file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot replace {}", self.path.display()))?;
        Ok(())
    }
}

impl Notifier for JsonFileNotifier {
    fn name(&self) -> &'static str {
        "json-file"
    }

    fn success(&self, summary: &RunSummary) -> Result<()> {
        self.write(&Outcome::Success {
            at: Utc::now().to_rfc3339(),
            summary,
        })
    }

    fn failure(&self, error: &str) -> Result<()> {
        self.write(&Outcome::Error {
            at: Utc::now().to_rfc3339(),
            error,
        })
    }
}
