//! Detail view: open an entity's view and pull its attributes and charges.

use std::time::Duration;

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};

use super::{element_text, list::locate_row, parse_selector, SelectorChain};
use crate::config::{ChargeSource, ChargeStyle, RosterLayout};
use crate::navigator::Navigator;
use crate::types::{Charge, CrawlError, DetailRecord};

/// Open the detail view for `identifier` and extract its record.
///
/// Returns `None` when the row cannot be found or clicked, or when no detail
/// container appears that differs from the one shown before the click. A missing individual field never fails the whole record.
pub async fn extract_details(
    navigator: &mut Navigator,
    layout: &RosterLayout,
    table_selector: &str,
    identifier: &str,
    timeout: Duration,
    charge_cap: usize,
) -> Option<DetailRecord> {
    let html = match navigator.html().await {
        Ok(html) => html,
        Err(e) => {
            tracing::warn!("cannot read roster page for {identifier}: {e}");
            return None;
        }
    };
    let Some(row) = locate_row(&html, table_selector, layout, identifier) else {
        tracing::warn!("row for {identifier} not on the current page");
        return None;
    };

    navigator
        .open_detail(identifier, &row, &layout.row_link_selector)
        .await?;

    let Some(container) = navigator
        .wait_for_fresh(&layout.detail_selectors, timeout, &html)
        .await
    else {
        let err = CrawlError::DetailNotFound(identifier.to_string());
        tracing::error!("{err}");
        navigator
            .capture(&format!("detail_not_found_{identifier}"))
            .await;
        return None;
    };
    tracing::debug!("detail container for {identifier}: '{}'", container.selector);

    let html = match navigator.html().await {
        Ok(html) => html,
        Err(e) => {
            tracing::warn!("cannot read detail view for {identifier}: {e}");
            return None;
        }
    };
    let scraped_at = Utc::now().to_rfc3339();
    let record = parse_detail(
        &html,
        &container.selector,
        layout,
        identifier,
        charge_cap,
        &scraped_at,
    );
    tracing::info!(
        identifier,
        charges = record.number_of_charges,
        missing = record.missing_fields.len(),
        "extracted details"
    );
    Some(record)
}

/// Extract every field from a rendered detail view.
///
/// Fields are looked up inside `container_selector` first and then across
/// the whole document.
pub fn parse_detail(
    html: &str,
    container_selector: &str,
    layout: &RosterLayout,
    identifier: &str,
    charge_cap: usize,
    scraped_at: &str,
) -> DetailRecord {
    let doc = Html::parse_document(html);
    let container_sel = parse_selector(container_selector);
    let mut scopes = Vec::with_capacity(2);
    if let Some(container) = container_sel
        .as_ref()
        .and_then(|sel| doc.select(sel).next())
    {
        scopes.push(container);
    }
    scopes.push(doc.root_element());

    let mut record = DetailRecord::new(identifier);
    record.scrape_timestamp = scraped_at.to_string();
    let fields = &layout.fields;

    match text_field(&mut record, &scopes, SelectorChain::new("dob", &fields.dob)) {
        Some(dob) => record.dob = dob,
        None => record.mark_missing("dob"),
    }
    match text_field(
        &mut record,
        &scopes,
        SelectorChain::new("address", &fields.address),
    ) {
        Some(address) => record.street_address = address,
        None => record.mark_missing("address"),
    }

    extract_location(&mut record, &scopes, layout);
    extract_charges(&mut record, &scopes, layout, charge_cap);
    record
}

/// Non-empty text for a chain, recording which selector produced it.
fn text_field(
    record: &mut DetailRecord,
    scopes: &[ElementRef<'_>],
    chain: SelectorChain<'_>,
) -> Option<String> {
    let (text, selector) = chain.first_text(scopes)?;
    if text.is_empty() {
        return None;
    }
    tracing::debug!(field = chain.field, selector, "matched");
    record
        .matched_by
        .insert(chain.field.to_string(), selector.to_string());
    Some(text)
}

fn extract_location(record: &mut DetailRecord, scopes: &[ElementRef<'_>], layout: &RosterLayout) {
    let fields = &layout.fields;
    if let Some(text) = text_field(
        record,
        scopes,
        SelectorChain::new("location", &fields.location),
    ) {
        let (city, state, zip) = split_location(&text);
        record.city = city;
        record.state = state;
        record.zip = zip;
        return;
    }

    record.city = text_field(record, scopes, SelectorChain::new("city", &fields.city))
        .unwrap_or_default();
    record.state = text_field(record, scopes, SelectorChain::new("state", &fields.state))
        .unwrap_or_default();
    record.zip =
        text_field(record, scopes, SelectorChain::new("zip", &fields.zip)).unwrap_or_default();
    if record.city.is_empty() && record.state.is_empty() && record.zip.is_empty() {
        record.mark_missing("location");
    }
}

/// Split "City, ST Zip" on the first comma, then the remainder on its first
/// space. Text without a comma is taken as the city.
fn split_location(text: &str) -> (String, String, String) {
    let Some((city, rest)) = text.split_once(',') else {
        return (text.trim().to_string(), String::new(), String::new());
    };
    let rest = rest.trim();
    let (state, zip) = rest.split_once(' ').unwrap_or((rest, ""));
    (
        city.trim().to_string(),
        state.trim().to_string(),
        zip.trim().to_string(),
    )
}

fn extract_charges(
    record: &mut DetailRecord,
    scopes: &[ElementRef<'_>],
    layout: &RosterLayout,
    charge_cap: usize,
) {
    for source in &layout.charge_sources {
        let Some(sel) = parse_selector(&source.selector) else {
            continue;
        };
        let Some(elements) = scopes
            .iter()
            .map(|scope| scope.select(&sel).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
        else {
            continue;
        };

        tracing::debug!(
            field = "charges",
            selector = source.selector.as_str(),
            count = elements.len(),
            "matched"
        );
        record
            .matched_by
            .insert("charges".to_string(), source.selector.clone());
        record.number_of_charges = elements.len();
        record.charges = elements
            .iter()
            .take(charge_cap)
            .map(|el| read_charge(el, source, layout))
            .collect();
        return;
    }

    tracing::warn!("no charge elements found for {}", record.identifier);
    record.mark_missing("charges");
}

fn read_charge(el: &ElementRef<'_>, source: &ChargeSource, layout: &RosterLayout) -> Charge {
    match source.style {
        ChargeStyle::TableRow => Charge {
            description: nth_cell(el, 1),
            offense_date: nth_cell(el, 2),
            court_reference: nth_cell(el, 3),
            disposition: nth_cell(el, 4),
        },
        ChargeStyle::Block => {
            let f = &layout.charge_fields;
            let scope = [*el];
            let text = |field: &str, selectors: &[String]| {
                SelectorChain::new(field, selectors)
                    .first_text(&scope)
                    .map(|(text, _)| text)
                    .unwrap_or_default()
            };
            Charge {
                description: text("description", &f.description),
                offense_date: text("offense_date", &f.offense_date),
                court_reference: text("court_reference", &f.court_reference),
                disposition: text("disposition", &f.disposition),
            }
        }
    }
}

fn nth_cell(row: &ElementRef<'_>, n: usize) -> String {
    let Ok(sel) = Selector::parse(&format!("td:nth-child({n})")) else {
        return String::new();
    };
    let text = row
        .select(&sel)
        .next()
        .map(|cell| element_text(&cell))
        .unwrap_or_default();
    text
}
