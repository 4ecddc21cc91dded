//! Roster listing: container resolution and summary row parsing.

use std::time::Duration;

use scraper::{ElementRef, Html};

use super::{element_text, parse_selector};
use crate::config::RosterLayout;
use crate::navigator::Navigator;
use crate::types::{CrawlError, CrawlResult, SummaryRecord};

/// The parsed listing plus the container selector that resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterPage {
    pub table_selector: String,
    pub records: Vec<SummaryRecord>,
    /// Rows dropped for lacking an identifier.
    pub skipped: usize,
}

impl RosterPage {
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.identifier.as_str())
    }
}

/// Wait for the listing on the navigator's current page and parse it.
///
/// Fails with `ListNotFound` (after a diagnostic snapshot) when neither the
/// primary nor the alternate container shows up within `timeout` each.
pub async fn extract_roster(
    navigator: &Navigator,
    layout: &RosterLayout,
    timeout: Duration,
) -> CrawlResult<RosterPage> {
    let Some(resolved) = navigator.wait_for_any(&layout.list_selectors, timeout).await else {
        tracing::error!("roster listing not found with any selector");
        navigator.capture("table_not_found").await;
        return Err(CrawlError::ListNotFound {
            tried: layout.list_selectors.clone(),
        });
    };
    if resolved.index > 0 {
        tracing::warn!("primary listing selector missing, using '{}'", resolved.selector);
    }

    let html = navigator.html().await?;
    let page = parse_rows(&html, &resolved.selector, layout);
    tracing::info!(
        rows = page.records.len(),
        skipped = page.skipped,
        "parsed roster listing"
    );
    Ok(page)
}

/// Parse every row under `table_selector` into a summary, in page order.
pub fn parse_rows(html: &str, table_selector: &str, layout: &RosterLayout) -> RosterPage {
    let doc = Html::parse_document(html);
    let mut page = RosterPage {
        table_selector: table_selector.to_string(),
        records: Vec::new(),
        skipped: 0,
    };
    let Some(row_sel) = parse_selector(&format!("{table_selector} {}", layout.row_selector)) else {
        return page;
    };

    for row in doc.select(&row_sel) {
        let record = summary_from_row(&row, layout);
        if record.identifier.is_empty() {
            tracing::warn!("skipping roster row with no identifier");
            page.skipped += 1;
            continue;
        }
        page.records.push(record);
    }
    page
}

/// Selector that targets the row holding `identifier`, if it is on the page.
pub fn locate_row(
    html: &str,
    table_selector: &str,
    layout: &RosterLayout,
    identifier: &str,
) -> Option<String> {
    let doc = Html::parse_document(html);
    let row_sel = parse_selector(&format!("{table_selector} {}", layout.row_selector))?;

    let row = doc
        .select(&row_sel)
        .find(|row| cell_text(&cells(row), layout.columns.identifier) == identifier)?;
    let position = row
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sib| sib.value().name() == row.value().name())
        .count()
        + 1;
    Some(format!(
        "{table_selector} {}:nth-of-type({position})",
        layout.row_selector
    ))
}

fn summary_from_row(row: &ElementRef<'_>, layout: &RosterLayout) -> SummaryRecord {
    let cells = cells(row);
    let cols = &layout.columns;
    let mut record = SummaryRecord {
        identifier: cell_text(&cells, cols.identifier),
        last_name: cell_text(&cells, cols.last_name),
        first_name: cell_text(&cells, cols.first_name),
        middle_name: cell_text(&cells, cols.middle_name),
        suffix: cell_text(&cells, cols.suffix),
        age: cell_text(&cells, cols.age),
        race: cell_text(&cells, cols.race),
        gender: cell_text(&cells, cols.gender),
        booking_date: cell_text(&cells, cols.booking_date),
        full_name: String::new(),
    };
    record.derive_full_name();
    record
}

fn cells<'a>(row: &ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .collect()
}

/// Text of the 1-based `position` cell, empty when absent.
fn cell_text(cells: &[ElementRef<'_>], position: usize) -> String {
    position
        .checked_sub(1)
        .and_then(|i| cells.get(i))
        .map(element_text)
        .unwrap_or_default()
}
