//! Run configuration value object and the roster page layout.
//!
//! A `CrawlConfig` is built once by the caller (the CLI layers defaults, a
//! TOML file, environment and flags) and handed to every component. Nothing
//! in the engine reads ambient configuration.

use std::path::PathBuf;
use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::types::{CrawlError, CrawlResult};

/// What happens when a released identifier shows up on the roster again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReappearancePolicy {
    /// Refresh `last_seen_ts` only; the release stays on record.
    #[default]
    KeepReleased,
    /// Clear `released_ts` so the identifier counts as active again.
    Reactivate,
}

/// Field separator for the output file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }
}

/// 1-based cell positions of the summary fields inside a roster row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterColumns {
    pub last_name: usize,
    pub first_name: usize,
    pub middle_name: usize,
    pub suffix: usize,
    pub age: usize,
    pub race: usize,
    pub gender: usize,
    pub booking_date: usize,
    pub identifier: usize,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            last_name: 1,
            first_name: 2,
            middle_name: 3,
            suffix: 4,
            age: 5,
            race: 6,
            gender: 7,
            booking_date: 8,
            identifier: 9,
        }
    }
}

/// How charge elements are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStyle {
    /// `<tr>` with description, offense date, court reference, disposition cells.
    TableRow,
    /// A block element with class-named children.
    Block,
}

/// One candidate location for the charge list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSource {
    pub selector: String,
    pub style: ChargeStyle,
}

/// Sub-selectors used inside a block-style charge element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargeBlockFields {
    pub description: Vec<String>,
    pub offense_date: Vec<String>,
    pub court_reference: Vec<String>,
    pub disposition: Vec<String>,
}

impl Default for ChargeBlockFields {
    fn default() -> Self {
        Self {
            description: strings(&[".charge-description", ".description"]),
            offense_date: strings(&[".offense-date", ".date"]),
            court_reference: strings(&[".court-reference", ".court"]),
            disposition: strings(&[".disposition", ".status"]),
        }
    }
}

/// Ordered selector candidates for each detail field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailFieldSelectors {
    pub dob: Vec<String>,
    pub address: Vec<String>,
    /// Combined "City, ST Zip" text.
    pub location: Vec<String>,
    pub city: Vec<String>,
    pub state: Vec<String>,
    pub zip: Vec<String>,
}

impl Default for DetailFieldSelectors {
    fn default() -> Self {
        Self {
            dob: strings(&[".dob", "[data-field='dob']"]),
            address: strings(&[".address", "[data-field='address']"]),
            location: strings(&[".location"]),
            city: strings(&[".city"]),
            state: strings(&[".state"]),
            zip: strings(&[".zip"]),
        }
    }
}

/// Everything the extractors need to know about the source markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterLayout {
    /// Listing container, primary first, then the alternate.
    pub list_selectors: Vec<String>,
    /// Rows relative to the listing container.
    pub row_selector: String,
    pub columns: RosterColumns,
    /// Nested element clicked when the row itself does not respond.
    pub row_link_selector: String,
    /// Detail container candidates, in priority order.
    pub detail_selectors: Vec<String>,
    pub fields: DetailFieldSelectors,
    pub charge_sources: Vec<ChargeSource>,
    pub charge_fields: ChargeBlockFields,
    /// Close buttons tried after a detail pass.
    pub dismiss_selectors: Vec<String>,
}

impl Default for RosterLayout {
    fn default() -> Self {
        Self {
            list_selectors: strings(&["table#inmateTable", "table.inmates-list"]),
            row_selector: "tbody tr".to_string(),
            columns: RosterColumns::default(),
            row_link_selector: "a, button".to_string(),
            detail_selectors: strings(&[
                "div.inmateDetails",
                "div.modal-dialog",
                "div.detail-pane",
                "#detailsPanel",
            ]),
            fields: DetailFieldSelectors::default(),
            charge_sources: vec![
                ChargeSource {
                    selector: "table.charges-table tbody tr".to_string(),
                    style: ChargeStyle::TableRow,
                },
                ChargeSource {
                    selector: "div.charges .charge-item".to_string(),
                    style: ChargeStyle::Block,
                },
                ChargeSource {
                    selector: "div.inmate-charges .charge".to_string(),
                    style: ChargeStyle::Block,
                },
            ],
            charge_fields: ChargeBlockFields::default(),
            dismiss_selectors: strings(&[
                "div.modal-dialog button.close",
                "div.modal-dialog [data-dismiss='modal']",
                "#detailsPanel .close",
            ]),
        }
    }
}

impl RosterLayout {
    /// Every selector the layout carries, labelled for error messages.
    fn all_selectors(&self) -> Vec<(&'static str, &str)> {
        let groups: [(&'static str, &[String]); 13] = [
            ("list_selectors", &self.list_selectors),
            ("detail_selectors", &self.detail_selectors),
            ("fields.dob", &self.fields.dob),
            ("fields.address", &self.fields.address),
            ("fields.location", &self.fields.location),
            ("fields.city", &self.fields.city),
            ("fields.state", &self.fields.state),
            ("fields.zip", &self.fields.zip),
            ("charge_fields.description", &self.charge_fields.description),
            ("charge_fields.offense_date", &self.charge_fields.offense_date),
            ("charge_fields.court_reference", &self.charge_fields.court_reference),
            ("charge_fields.disposition", &self.charge_fields.disposition),
            ("dismiss_selectors", &self.dismiss_selectors),
        ];
        let mut out: Vec<(&'static str, &str)> = groups
            .into_iter()
            .flat_map(|(label, list)| list.iter().map(move |s| (label, s.as_str())))
            .collect();
        out.push(("row_selector", self.row_selector.as_str()));
        out.push(("row_link_selector", self.row_link_selector.as_str()));
        out.extend(
            self.charge_sources
                .iter()
                .map(|source| ("charge_sources", source.selector.as_str())),
        );
        out
    }
}

/// Configuration for one crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub roster_url: String,
    pub headless: bool,
    /// Per-attempt page load budget.
    pub navigation_timeout_ms: u64,
    /// Per-selector wait budget for the listing and detail containers.
    pub selector_timeout_ms: u64,
    /// How often a selector wait re-reads the page.
    pub poll_interval_ms: u64,
    pub navigation_retry: RetryPolicy,
    pub click_retry: RetryPolicy,
    pub state_db: PathBuf,
    pub output_csv: PathBuf,
    pub delimiter: Delimiter,
    /// Snapshots are skipped when unset.
    pub diagnostics_dir: Option<PathBuf>,
    /// Charges kept per entity; the true count is recorded separately.
    pub charge_cap: usize,
    pub reappearance: ReappearancePolicy,
    pub layout: RosterLayout,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            roster_url: "https://jailroster.mctx.org".to_string(),
            headless: true,
            navigation_timeout_ms: 30_000,
            selector_timeout_ms: 15_000,
            poll_interval_ms: 250,
            navigation_retry: RetryPolicy::NAVIGATION,
            click_retry: RetryPolicy::CLICK,
            state_db: PathBuf::from("data/processed_identities.db"),
            output_csv: PathBuf::from("data/new_entities.csv"),
            delimiter: Delimiter::Comma,
            diagnostics_dir: Some(PathBuf::from("data/diagnostics")),
            charge_cap: 3,
            reappearance: ReappearancePolicy::KeepReleased,
            layout: RosterLayout::default(),
        }
    }
}

impl CrawlConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check everything a run depends on before any navigation begins.
    ///
    /// All problems are collected into a single `CrawlError::Config`.
    pub fn validate(&self) -> CrawlResult<()> {
        let mut problems = Vec::new();

        match url::Url::parse(&self.roster_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => problems.push(format!(
                "roster_url: scheme must be http or https, got '{}'",
                u.scheme()
            )),
            Err(e) => problems.push(format!("roster_url: {e}")),
        }

        if self.navigation_timeout_ms == 0 {
            problems.push("navigation_timeout_ms: must be positive".to_string());
        }
        if self.selector_timeout_ms == 0 {
            problems.push("selector_timeout_ms: must be positive".to_string());
        }
        if self.navigation_retry.max_attempts == 0 {
            problems.push("navigation_retry.max_attempts: must be at least 1".to_string());
        }
        if self.click_retry.max_attempts == 0 {
            problems.push("click_retry.max_attempts: must be at least 1".to_string());
        }
        if self.charge_cap == 0 {
            problems.push("charge_cap: must be at least 1".to_string());
        }
        if self.state_db.as_os_str().is_empty() {
            problems.push("state_db: path is empty".to_string());
        }
        if self.output_csv.as_os_str().is_empty() {
            problems.push("output_csv: path is empty".to_string());
        }
        if self.layout.list_selectors.is_empty() {
            problems.push("layout.list_selectors: at least one selector required".to_string());
        }
        if self.layout.detail_selectors.is_empty() {
            problems.push("layout.detail_selectors: at least one selector required".to_string());
        }
        if self.layout.columns.identifier == 0 {
            problems.push("layout.columns.identifier: positions are 1-based".to_string());
        }

        for (label, selector) in self.layout.all_selectors() {
            if let Err(e) = Selector::parse(selector) {
                problems.push(format!("layout.{label}: invalid selector '{selector}': {e}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CrawlError::Config(problems.join("; ")))
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        CrawlConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_http_url() {
        let cfg = CrawlConfig {
            roster_url: "ftp://example.com".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("roster_url"));
    }

    #[test]
    fn collects_every_problem() {
        let mut cfg = CrawlConfig {
            roster_url: "not a url".into(),
            navigation_timeout_ms: 0,
            charge_cap: 0,
            ..Default::default()
        };
        cfg.layout.detail_selectors = vec!["div[".into()];
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("roster_url"));
        assert!(msg.contains("navigation_timeout_ms"));
        assert!(msg.contains("charge_cap"));
        assert!(msg.contains("detail_selectors"));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: CrawlConfig = serde_json::from_value(serde_json::json!({
            "roster_url": "https://roster.example.org",
            "reappearance": "reactivate",
            "layout": { "list_selectors": ["table.roster"] }
        }))
        .unwrap();
        assert_eq!(cfg.reappearance, ReappearancePolicy::Reactivate);
        assert_eq!(cfg.layout.list_selectors, vec!["table.roster"]);
        assert_eq!(cfg.layout.columns.identifier, 9);
        assert_eq!(cfg.charge_cap, 3);
    }
}
