//! HTML extraction for the roster listing and the per-entity detail view.
//!
//! All entry points here are synchronous because the `scraper` crate's
//! types are `!Send`; the async callers fetch HTML from the navigator first
//! and never hold a parsed document across an await.

pub mod detail;
pub mod list;

pub use detail::{extract_details, parse_detail};
pub use list::{extract_roster, locate_row, parse_rows, RosterPage};

use scraper::{ElementRef, Selector};

/// An ordered list of selector candidates for one field.
///
/// Candidates are tried against each scope in turn (the detail container
/// first, then the whole document); the first non-empty hit wins and its selector is
/// reported back for the extraction trace.
#[derive(Debug, Clone, Copy)]
pub struct SelectorChain<'a> {
    pub field: &'a str,
    pub selectors: &'a [String],
}

impl<'a> SelectorChain<'a> {
    pub fn new(field: &'a str, selectors: &'a [String]) -> Self {
        Self { field, selectors }
    }

    /// First non-empty text any candidate yields, with the candidate used.
    ///
    /// Elements that match but carry no text do not end the search.
    pub fn first_text(&self, scopes: &[ElementRef<'_>]) -> Option<(String, &'a str)> {
        for scope in scopes {
            for candidate in self.selectors {
                let Some(sel) = parse_selector(candidate) else {
                    continue;
                };
                let text = scope
                    .select(&sel)
                    .map(|el| element_text(&el))
                    .find(|text| !text.is_empty());
                if let Some(text) = text {
                    return Some((text, candidate.as_str()));
                }
            }
        }
        None
    }
}

/// Parse a selector, logging instead of failing.
pub(crate) fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::warn!("skipping invalid selector '{selector}': {e}");
            None
        }
    }
}

/// Collect all visible text content from an element, trimmed and
/// whitespace-collapsed.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
