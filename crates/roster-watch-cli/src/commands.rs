//! Sub-command implementations. `main` only parses arguments and sets up
//! logging; everything observable lives here.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use roster_watch::{
    pipeline, ChromiumRenderer, CrawlError, IdentityStore, Renderer, RosterPage, RunSummary,
    SqliteIdentityStore,
};
use serde_json::json;

use crate::config::Settings;
use crate::notify::{notify_failure, notify_success, JsonFileNotifier, LogNotifier, Notifier};
use crate::run_log::RunLog;

/// Notifiers configured for this invocation.
pub fn notifiers(settings: &Settings) -> Vec<Box<dyn Notifier>> {
    let mut out: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
    if let Some(path) = &settings.summary_json {
        out.push(Box::new(JsonFileNotifier::new(path)));
    }
    out
}

/// Open the identity store, falling back to an empty in-memory one.
pub fn open_store(path: &Path) -> Result<Box<dyn IdentityStore>> {
    match SqliteIdentityStore::open(path) {
        Ok(store) => Ok(Box::new(store)),
        Err(e) => {
            tracing::warn!(
                "identity store {} unavailable, using an empty one for this run: {e}",
                path.display()
            );
            Ok(Box::new(SqliteIdentityStore::open_in_memory()?))
        }
    }
}

/// One crawl with a real browser.
pub async fn run(settings: &Settings, json: bool) -> Result<ExitCode> {
    let notifiers = notifiers(settings);
    let crawl = &settings.crawl;

    if let Err(e) = crawl.validate() {
        return Ok(fail(&notifiers, &e));
    }

    let mut store = open_store(&crawl.state_db)?;
    let renderer = match ChromiumRenderer::launch(crawl.headless, crawl.navigation_timeout()).await
    {
        Ok(r) => r,
        Err(e) => return Ok(fail(&notifiers, &CrawlError::Browser(format!("{e:#}")))),
    };

    let result = pipeline::run(crawl, &renderer, store.as_mut()).await;
    if let Err(e) = renderer.shutdown().await {
        tracing::warn!("browser shutdown failed: {e:#}");
    }

    match result {
        Ok(summary) => {
            finish(settings, &notifiers, &summary);
            print_summary(&summary, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(fail(&notifiers, &e)),
    }
}

/// Record a completed run in the history and notify.
pub fn finish(settings: &Settings, notifiers: &[Box<dyn Notifier>], summary: &RunSummary) {
    if let Some(path) = &settings.run_log {
        if let Err(e) = RunLog::open(path).and_then(|mut log| log.record(summary)) {
            tracing::warn!("run log not updated: {e:#}");
        }
    }
    notify_success(notifiers, summary);
}

fn fail(notifiers: &[Box<dyn Notifier>], error: &CrawlError) -> ExitCode {
    tracing::error!("{error}");
    notify_failure(notifiers, &error.to_string());
    if error.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(summary)?)?;
        return Ok(());
    }
    writeln!(out, "Run {}", summary.run_id)?;
    writeln!(out, "  Roster:      {}", summary.roster_size)?;
    writeln!(out, "  New:         {}", summary.new_count)?;
    writeln!(out, "  Continuing:  {}", summary.continuing_count)?;
    writeln!(out, "  Released:    {}", summary.released_count)?;
    writeln!(out, "  Reappeared:  {}", summary.reappeared_count)?;
    writeln!(
        out,
        "  Details:     {} extracted, {} failed",
        summary.details_extracted, summary.details_failed
    )?;
    let written = if summary.output_written {
        summary.rows_written.to_string()
    } else {
        "failed".to_string()
    };
    writeln!(out, "  Rows:        {written}")?;
    for entry in &summary.sample {
        writeln!(out, "    {}  {}", entry.identifier, entry.full_name)?;
    }
    Ok(())
}

/// Parse a saved roster page and print what the listing yields.
pub async fn replay(settings: &Settings, html_path: &Path, json: bool) -> Result<ExitCode> {
    let html = std::fs::read_to_string(html_path)
        .with_context(|| format!("cannot read {}", html_path.display()))?;
    let page = match pipeline::replay(&settings.crawl, html).await {
        Ok(page) => page,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let mut out = std::io::stdout().lock();
    write_page(&mut out, &page, json)?;
    Ok(ExitCode::SUCCESS)
}

pub fn write_page(out: &mut impl Write, page: &RosterPage, json: bool) -> Result<()> {
    if json {
        let value = json!({
            "table_selector": page.table_selector,
            "skipped": page.skipped,
            "records": page.records,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }
    writeln!(
        out,
        "{} rows via '{}' ({} skipped)",
        page.records.len(),
        page.table_selector,
        page.skipped
    )?;
    for r in &page.records {
        writeln!(
            out,
            "  {:<12} {:<32} {:>3} {} {}  {}",
            r.identifier, r.full_name, r.age, r.race, r.gender, r.booking_date
        )?;
    }
    Ok(())
}

/// Identity store counts and recent sightings, plus the last runs.
pub fn status(settings: &Settings, recent: usize, json: bool, out: &mut impl Write) -> Result<()> {
    let path = &settings.crawl.state_db;
    if !path.exists() {
        anyhow::bail!("no identity store at {}", path.display());
    }
    let store = SqliteIdentityStore::open(path)?;
    let stats = store.stats()?;
    let latest = store.recent(recent)?;
    let runs = match &settings.run_log {
        Some(log) => RunLog::tail(log, 5)?,
        None => Vec::new(),
    };

    if json {
        let value = json!({
            "store": path.display().to_string(),
            "stats": stats,
            "recent": latest,
            "runs": runs,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    writeln!(out, "Identity store: {}", path.display())?;
    writeln!(out, "  Total:     {}", stats.total)?;
    writeln!(out, "  Active:    {}", stats.active)?;
    writeln!(out, "  Released:  {}", stats.released)?;
    if !latest.is_empty() {
        writeln!(out, "Recently seen:")?;
        for r in &latest {
            let state = match &r.released_ts {
                Some(ts) => format!("released {ts}"),
                None => "active".to_string(),
            };
            writeln!(out, "  {:<12} {}  {}", r.identifier, r.last_seen_ts, state)?;
        }
    }
    if !runs.is_empty() {
        writeln!(out, "Last runs:")?;
        for run in &runs {
            writeln!(
                out,
                "  {}  new {}  released {}  rows {}",
                run.started_at.to_rfc3339(),
                run.new_count,
                run.released_count,
                run.rows_written
            )?;
        }
    }
    Ok(())
}

/// Check the resolved configuration without touching the network.
pub fn validate(settings: &Settings, source: Option<&Path>, json: bool) -> Result<ExitCode> {
    let result = settings.crawl.validate();
    let mut out = std::io::stdout().lock();
    if json {
        let value = json!({
            "config_file": source.map(|p| p.display().to_string()),
            "valid": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
            "settings": {
                "roster_url": settings.crawl.roster_url,
                "state_db": settings.crawl.state_db,
                "output_csv": settings.crawl.output_csv,
                "diagnostics_dir": settings.crawl.diagnostics_dir,
                "error_log": settings.error_log,
                "run_log": settings.run_log,
            },
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    } else {
        match source {
            Some(p) => writeln!(out, "Config file: {}", p.display())?,
            None => writeln!(out, "Config file: (defaults)")?,
        }
        writeln!(out, "  Roster URL:  {}", settings.crawl.roster_url)?;
        writeln!(out, "  State DB:    {}", settings.crawl.state_db.display())?;
        writeln!(out, "  Output:      {}", settings.crawl.output_csv.display())?;
        match &result {
            Ok(()) => writeln!(out, "Valid configuration")?,
            Err(e) => writeln!(out, "Invalid configuration: {e}")?,
        }
    }
    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_watch::{RosterLayout, SummaryRecord};

    fn settings(dir: &Path) -> Settings {
        let mut s = Settings::default();
        s.crawl.state_db = dir.join("ids.db");
        s.run_log = Some(dir.join("runs.jsonl"));
        s
    }

    #[test]
    fn status_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        {
            let mut store = SqliteIdentityStore::open(&s.crawl.state_db).unwrap();
            store.insert_new("A1", "2025-01-01T00:00:00+00:00").unwrap();
            store.insert_new("A2", "2025-01-01T00:00:00+00:00").unwrap();
            store.mark_released("A2", "2025-01-02T00:00:00+00:00").unwrap();
        }

        let mut buf = Vec::new();
        status(&s, 5, true, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["stats"]["total"], 2);
        assert_eq!(v["stats"]["active"], 1);
        assert_eq!(v["recent"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn status_without_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = Vec::new();
        assert!(status(&settings(dir.path()), 5, false, &mut buf).is_err());
    }

    #[test]
    fn page_listing_is_readable() {
        let mut record = SummaryRecord {
            identifier: "A1".into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            ..Default::default()
        };
        record.derive_full_name();
        let page = RosterPage {
            table_selector: RosterLayout::default().list_selectors[0].clone(),
            records: vec![record],
            skipped: 1,
        };
        let mut buf = Vec::new();
        write_page(&mut buf, &page, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("1 rows via 'table#inmateTable' (1 skipped)"));
        assert!(text.contains("John Doe"));
    }

    #[test]
    fn fatal_errors_exit_non_zero() {
        let notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        assert_eq!(
            fail(&notifiers, &CrawlError::ListNotFound { tried: vec![] }),
            ExitCode::FAILURE
        );
        assert_eq!(
            fail(&notifiers, &CrawlError::OutputWrite("x".into())),
            ExitCode::SUCCESS
        );
    }

    #[test]
    fn finish_appends_to_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let summary: RunSummary = serde_json::from_value(json!({
            "run_id": "r1",
            "started_at": "2025-01-01T00:00:00Z",
            "finished_at": "2025-01-01T00:01:00Z",
            "roster_size": 1, "new_count": 1, "continuing_count": 0,
            "released_count": 0, "reappeared_count": 0,
            "details_extracted": 1, "details_failed": 0,
            "rows_written": 1, "output_written": true,
            "sample": [{"identifier": "A1", "full_name": "John Doe"}]
        }))
        .unwrap();
        finish(&s, &[], &summary);
        let runs = RunLog::tail(s.run_log.as_deref().unwrap(), 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "r1");
    }
}
