//! Post-extraction cleanup of detail records.
//!
//! Splits a combined address into street/city/state/zip when the detail view
//! did not provide them separately, and fills derived fields.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::types::{CrawlError, CrawlResult, DetailRecord};

/// Normalize `raw`, never failing. On an internal error the input comes back
/// unchanged.
pub fn normalize(raw: DetailRecord) -> DetailRecord {
    normalize_at(raw, Utc::now())
}

/// `normalize` with an explicit clock for the timestamp fill.
pub fn normalize_at(raw: DetailRecord, now: DateTime<Utc>) -> DetailRecord {
    match try_normalize(&raw, now) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("normalizing {} failed: {e}", raw.identifier);
            raw
        }
    }
}

/// Fallible normalization used by `normalize`.
pub fn try_normalize(raw: &DetailRecord, now: DateTime<Utc>) -> CrawlResult<DetailRecord> {
    let mut record = raw.clone();

    let have_location =
        !record.city.is_empty() && !record.state.is_empty() && !record.zip.is_empty();
    if !have_location && !record.street_address.is_empty() {
        apply_address(&mut record)?;
    }

    record.number_of_charges = record.number_of_charges.max(record.charges.len());
    if record.scrape_timestamp.is_empty() {
        record.scrape_timestamp = now.to_rfc3339();
    }
    Ok(record)
}

/// Parts of a combined address. Fields the text does not yield are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

/// Split a combined address such as `123 Main St, Houston, TX 77001`.
///
/// Line breaks count as commas. Three or more parts give street, city and a
/// trailing "ST zip" pair; two parts are matched against the city/state/zip
/// pattern; anything else is kept whole as the street.
pub fn parse_address(address: &str) -> CrawlResult<AddressParts> {
    let flattened = address.replace("\r\n", ", ").replace(['\n', '\r'], ", ");
    let parts: Vec<&str> = flattened.split(',').collect();

    let whole = || AddressParts {
        street: flattened.trim().to_string(),
        ..Default::default()
    };

    match parts.as_slice() {
        [street, city, .., last] => {
            let tokens: Vec<&str> = last.split_whitespace().collect();
            let (state, zip) = match tokens.as_slice() {
                [state, .., zip] => (Some(state.to_string()), Some(zip.to_string())),
                _ => (None, None),
            };
            Ok(AddressParts {
                street: street.trim().to_string(),
                city: Some(city.trim().to_string()),
                state,
                zip,
            })
        }
        [street, location] => {
            let Some(caps) = city_state_zip()?.captures(location.trim()) else {
                return Ok(whole());
            };
            Ok(AddressParts {
                street: street.trim().to_string(),
                city: caps.get(1).map(|m| m.as_str().trim().to_string()),
                state: caps.get(2).map(|m| m.as_str().to_string()),
                zip: caps.get(3).map(|m| m.as_str().to_string()),
            })
        }
        _ => Ok(whole()),
    }
}

fn apply_address(record: &mut DetailRecord) -> CrawlResult<()> {
    let parts = parse_address(&record.street_address)?;
    record.street_address = parts.street;
    if let Some(city) = parts.city {
        record.city = city;
    }
    if let Some(state) = parts.state {
        record.state = state;
    }
    if let Some(zip) = parts.zip {
        record.zip = zip;
    }
    Ok(())
}

fn city_state_zip() -> CrawlResult<&'static Regex> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([^,]+),?\s+([A-Z]{2})\s+(\d{5}(?:-\d{4})?)"))
        .as_ref()
        .map_err(|e| CrawlError::Normalize(format!("address pattern: {e}")))
}
