//! Core data types for roster observations and identity history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the roster listing, recomputed on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub identifier: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub suffix: String,
    pub full_name: String,
    pub age: String,
    pub race: String,
    pub gender: String,
    /// Booking timestamp exactly as the source renders it.
    pub booking_date: String,
}

impl SummaryRecord {
    /// Build `full_name` from the name parts, skipping blanks.
    pub fn derive_full_name(&mut self) {
        self.full_name = [
            &self.first_name,
            &self.middle_name,
            &self.last_name,
            &self.suffix,
        ]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    }
}

/// Persisted observation history for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identifier: String,
    pub first_seen_ts: String,
    pub last_seen_ts: String,
    pub released_ts: Option<String>,
}

impl IdentityRecord {
    pub fn is_active(&self) -> bool {
        self.released_ts.is_none()
    }
}

/// A single charge listed on an entity's detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub description: String,
    pub offense_date: String,
    pub court_reference: String,
    pub disposition: String,
}

impl Charge {
    /// Column suffixes in output order, paired with the value.
    pub fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("description", &self.description),
            ("offense_date", &self.offense_date),
            ("court_reference", &self.court_reference),
            ("disposition", &self.disposition),
        ]
    }
}

/// Attributes captured once, at first sighting, from the detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub identifier: String,
    pub dob: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    /// At most `charge_cap` charges; see `number_of_charges` for the real count.
    pub charges: Vec<Charge>,
    pub number_of_charges: usize,
    /// Field names that no extraction strategy could produce, in discovery order.
    pub missing_fields: Vec<String>,
    pub scrape_timestamp: String,
    /// Field name → selector that produced it.
    pub matched_by: BTreeMap<String, String>,
}

impl DetailRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Record a field as missing, once.
    pub fn mark_missing(&mut self, field: &str) {
        if !self.missing_fields.iter().any(|f| f == field) {
            self.missing_fields.push(field.to_string());
        }
    }
}

/// A sample entry handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleEntry {
    pub identifier: String,
    pub full_name: String,
}

/// Plain result of one run, consumed by notifiers and the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub roster_size: usize,
    pub new_count: usize,
    pub continuing_count: usize,
    pub released_count: usize,
    pub reappeared_count: usize,
    pub details_extracted: usize,
    pub details_failed: usize,
    pub rows_written: usize,
    /// False when the sink failed; counts above are reported regardless.
    pub output_written: bool,
    pub sample: Vec<SampleEntry>,
}

/// Maximum number of new entities listed in a summary sample.
pub const SUMMARY_SAMPLE_LIMIT: usize = 10;

impl RunSummary {
    /// Whether anything changed that a notifier should report.
    pub fn has_changes(&self) -> bool {
        self.new_count > 0 || self.released_count > 0
    }
}

/// Errors raised by the crawl-and-reconcile engine.
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("Navigation to {url} failed after {attempts} attempts: {reason}")]
    NavigationTimeout {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Roster listing not found (tried: {})", tried.join(", "))]
    ListNotFound { tried: Vec<String> },

    #[error("Detail view not found for {0}")]
    DetailNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Output write error: {0}")]
    OutputWrite(String),

    #[error("Normalization error: {0}")]
    Normalize(String),

    #[error("Nothing to append")]
    EmptyBatch,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Errors that abort a run with a non-zero exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::NavigationTimeout { .. }
                | CrawlError::ListNotFound { .. }
                | CrawlError::Config(_)
                | CrawlError::Browser(_)
        )
    }
}

impl From<rusqlite::Error> for CrawlError {
    fn from(e: rusqlite::Error) -> Self {
        CrawlError::Persistence(e.to_string())
    }
}

/// Convenience result type.
pub type CrawlResult<T> = Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_skips_blank_parts() {
        let mut s = SummaryRecord {
            first_name: "John".into(),
            middle_name: " ".into(),
            last_name: "Doe".into(),
            suffix: "Jr".into(),
            ..Default::default()
        };
        s.derive_full_name();
        assert_eq!(s.full_name, "John Doe Jr");
    }

    #[test]
    fn mark_missing_is_idempotent() {
        let mut d = DetailRecord::new("A1");
        d.mark_missing("dob");
        d.mark_missing("charges");
        d.mark_missing("dob");
        assert_eq!(d.missing_fields, vec!["dob", "charges"]);
    }

    #[test]
    fn fatal_classification() {
        assert!(CrawlError::ListNotFound { tried: vec![] }.is_fatal());
        assert!(CrawlError::Config("x".into()).is_fatal());
        assert!(!CrawlError::DetailNotFound("x".into()).is_fatal());
        assert!(!CrawlError::OutputWrite("x".into()).is_fatal());
        assert!(!CrawlError::EmptyBatch.is_fatal());
    }
}
