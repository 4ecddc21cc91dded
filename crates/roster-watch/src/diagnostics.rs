//! Best-effort snapshots of the session state when something goes wrong.
//!
//! Each capture writes `{label}_{timestamp}.png` and `{label}_{timestamp}.html`
//! into the diagnostics directory. Any failure here is logged and swallowed.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::renderer::Session;

/// Files produced by one capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub screenshot: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

/// Where snapshots go. A disabled instance captures nothing.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    dir: Option<PathBuf>,
}

impl Diagnostics {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Capture the session's screenshot and HTML under `label`.
    pub async fn capture(&self, session: &dyn Session, label: &str) -> Snapshot {
        let Some(dir) = &self.dir else {
            return Snapshot::default();
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!("cannot create diagnostics dir {}: {e}", dir.display());
            return Snapshot::default();
        }

        let stem = format!(
            "{}_{}",
            sanitize_label(label),
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        );
        let mut snapshot = Snapshot::default();

        match session.screenshot().await {
            Ok(png) => {
                let path = dir.join(format!("{stem}.png"));
                match tokio::fs::write(&path, png).await {
                    Ok(()) => snapshot.screenshot = Some(path),
                    Err(e) => tracing::warn!("failed to save screenshot: {e}"),
                }
            }
            Err(e) => tracing::warn!("failed to take screenshot: {e}"),
        }

        match session.html().await {
            Ok(html) => {
                let path = dir.join(format!("{stem}.html"));
                match tokio::fs::write(&path, html).await {
                    Ok(()) => snapshot.html = Some(path),
                    Err(e) => tracing::warn!("failed to save HTML dump: {e}"),
                }
            }
            Err(e) => tracing::warn!("failed to read HTML for dump: {e}"),
        }

        if snapshot.screenshot.is_some() || snapshot.html.is_some() {
            tracing::info!(label, "diagnostic snapshot saved under {}", dir.display());
        }
        snapshot
    }
}

/// Keep labels filesystem-safe; identifiers can contain anything.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(80)
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}
