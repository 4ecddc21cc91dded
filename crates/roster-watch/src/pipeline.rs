//! One crawl-and-reconcile run.
//!
//! Order: load the roster, parse the listing, plan the reconciliation, open
//! the detail view of each new identifier in page order, append the output
//! rows, then apply the plan to the identity store. The session is closed on
//! every exit path.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::config::CrawlConfig;
use crate::diagnostics::Diagnostics;
use crate::extract::{extract_details, extract_roster, RosterPage};
use crate::navigator::Navigator;
use crate::normalize::normalize;
use crate::reconcile::{self, Reconciliation};
use crate::renderer::scripted::Script;
use crate::renderer::{Renderer, ScriptedRenderer};
use crate::sink::{build_row, CsvSink, OutputRow};
use crate::store::IdentityStore;
use crate::types::{CrawlError, CrawlResult, RunSummary, SampleEntry, SUMMARY_SAMPLE_LIMIT};

/// Run one crawl against `renderer`, recording history in `store`.
///
/// The renderer itself stays up; shutting it down is the caller's job.
pub async fn run(
    config: &CrawlConfig,
    renderer: &dyn Renderer,
    store: &mut dyn IdentityStore,
) -> CrawlResult<RunSummary> {
    config.validate()?;

    let started_at = Utc::now();
    let run_id = Uuid::new_v4().to_string();
    tracing::info!(run_id = %run_id, url = %config.roster_url, "starting roster run");

    let session = renderer
        .new_session()
        .await
        .map_err(|e| CrawlError::Browser(format!("{e:#}")))?;
    let mut navigator = Navigator::new(
        session,
        config,
        Diagnostics::new(config.diagnostics_dir.clone()),
    );

    let outcome = crawl(&mut navigator, config, store).await;
    navigator.close().await;
    let crawled = outcome?;

    let (rows_written, output_written) = if crawled.rows.is_empty() {
        tracing::info!("no new entities this run");
        (0, true)
    } else {
        match CsvSink::new(&config.output_csv, config.delimiter).append(&crawled.rows) {
            Ok(n) => (n, true),
            Err(e) => {
                tracing::warn!("output not written, continuing with reconciliation: {e}");
                (0, false)
            }
        }
    };

    reconcile::apply(&crawled.plan, store, started_at, config.reappearance);

    let sample = crawled
        .page
        .records
        .iter()
        .filter(|r| crawled.plan.new.contains(&r.identifier))
        .take(SUMMARY_SAMPLE_LIMIT)
        .map(|r| SampleEntry {
            identifier: r.identifier.clone(),
            full_name: r.full_name.clone(),
        })
        .collect();

    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        roster_size: crawled.page.records.len(),
        new_count: crawled.plan.new.len(),
        continuing_count: crawled.plan.continuing.len(),
        released_count: crawled.plan.released.len(),
        reappeared_count: crawled.plan.reappeared.len(),
        details_extracted: crawled.details_extracted,
        details_failed: crawled.details_failed,
        rows_written,
        output_written,
        sample,
    };
    tracing::info!(
        run_id = %summary.run_id,
        roster = summary.roster_size,
        new = summary.new_count,
        released = summary.released_count,
        reappeared = summary.reappeared_count,
        "run complete"
    );
    Ok(summary)
}

/// What the browser-facing part of a run produced.
struct CrawlOutcome {
    page: RosterPage,
    plan: Reconciliation,
    rows: Vec<OutputRow>,
    details_extracted: usize,
    details_failed: usize,
}

async fn crawl(
    navigator: &mut Navigator,
    config: &CrawlConfig,
    store: &mut dyn IdentityStore,
) -> CrawlResult<CrawlOutcome> {
    navigator.load(&config.roster_url).await?;
    let page = extract_roster(navigator, &config.layout, config.selector_timeout()).await?;

    let plan = reconcile::plan(page.identifiers(), &*store);
    tracing::info!(
        new = plan.new.len(),
        continuing = plan.continuing.len(),
        released = plan.released.len(),
        reappeared = plan.reappeared.len(),
        "roster classified"
    );

    let mut outcome = CrawlOutcome {
        page,
        plan,
        rows: Vec::new(),
        details_extracted: 0,
        details_failed: 0,
    };

    // Set once the roster can no longer be reached; later entities are
    // recorded as seen but get no detail pass.
    let mut roster_lost = false;
    let mut seen = HashSet::new();

    for summary in &outcome.page.records {
        let id = summary.identifier.as_str();
        if !outcome.plan.new.contains(id) || !seen.insert(id) {
            continue;
        }

        let detail = if roster_lost {
            None
        } else {
            let detail = extract_details(
                navigator,
                &config.layout,
                &outcome.page.table_selector,
                id,
                config.selector_timeout(),
                config.charge_cap,
            )
            .await
            .map(normalize);

            if let Err(e) = navigator
                .return_to_roster(
                    &config.roster_url,
                    &config.layout.list_selectors,
                    &config.layout.dismiss_selectors,
                )
                .await
            {
                tracing::error!("lost the roster after {id}, skipping remaining detail views: {e}");
                roster_lost = true;
            }
            detail
        };

        // Without details an entity is still recorded by the plan, but
        // contributes no output row.
        match detail {
            Some(detail) => {
                outcome.details_extracted += 1;
                outcome
                    .rows
                    .push(build_row(summary, Some(&detail), config.charge_cap, Utc::now()));
            }
            None => outcome.details_failed += 1,
        }
    }

    Ok(outcome)
}

/// Parse a saved roster page offline.
///
/// The HTML is served through a scripted session at the configured URL, so
/// the same container fallback and row rules apply as in a live run.
pub async fn replay(config: &CrawlConfig, html: String) -> CrawlResult<RosterPage> {
    let renderer = ScriptedRenderer::new(Script::new().page(config.roster_url.clone(), html));
    let session = renderer
        .new_session()
        .await
        .map_err(|e| CrawlError::Browser(format!("{e:#}")))?;
    let mut navigator = Navigator::new(session, config, Diagnostics::disabled());

    let outcome = async {
        navigator.load(&config.roster_url).await?;
        extract_roster(&navigator, &config.layout, config.selector_timeout()).await
    }
    .await;
    navigator.close().await;
    outcome
}
