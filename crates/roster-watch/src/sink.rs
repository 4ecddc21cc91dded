//! Append-only delimited output for newly seen entities.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::Delimiter;
use crate::types::{CrawlError, CrawlResult, DetailRecord, SummaryRecord};

/// One flattened output row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRow(BTreeMap<String, String>);

impl OutputRow {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }
}

/// Merge a summary and its detail record into one row.
///
/// Charges are flattened to `charge{i}_{field}` for the first `charge_cap`
/// entries. Detail columns are always present, empty when unknown.
pub fn build_row(
    summary: &SummaryRecord,
    detail: Option<&DetailRecord>,
    charge_cap: usize,
    processed_at: DateTime<Utc>,
) -> OutputRow {
    let mut row = OutputRow::from_pairs([
        ("identifier", summary.identifier.as_str()),
        ("last_name", summary.last_name.as_str()),
        ("first_name", summary.first_name.as_str()),
        ("middle_name", summary.middle_name.as_str()),
        ("suffix", summary.suffix.as_str()),
        ("full_name", summary.full_name.as_str()),
        ("age", summary.age.as_str()),
        ("race", summary.race.as_str()),
        ("gender", summary.gender.as_str()),
        ("booking_date", summary.booking_date.as_str()),
    ]);
    row.set("processed_timestamp", processed_at.to_rfc3339());

    let empty = DetailRecord::default();
    let d = detail.unwrap_or(&empty);
    row.set("dob", d.dob.as_str());
    row.set("street_address", d.street_address.as_str());
    row.set("city", d.city.as_str());
    row.set("state", d.state.as_str());
    row.set("zip", d.zip.as_str());
    row.set("scrape_timestamp", d.scrape_timestamp.as_str());
    row.set("missing_fields", d.missing_fields.join(";"));
    row.set(
        "number_of_charges",
        match detail {
            Some(d) => d.number_of_charges.max(d.charges.len()).to_string(),
            None => String::new(),
        },
    );

    for (i, charge) in d.charges.iter().take(charge_cap).enumerate() {
        for (field, value) in charge.fields() {
            row.set(format!("charge{}_{field}", i + 1), value);
        }
    }
    row
}

/// Appends batches of rows to one delimited file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
    delimiter: Delimiter,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, delimiter: Delimiter) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `rows`, writing a header only when the file is missing or empty.
    ///
    /// Columns are the sorted union over the batch. A later batch with a
    /// different column set is appended as is, without a new header.
    pub fn append(&self, rows: &[OutputRow]) -> CrawlResult<usize> {
        if rows.is_empty() {
            tracing::warn!("no rows to write");
            return Err(CrawlError::EmptyBatch);
        }
        match self.write_batch(rows) {
            Ok(()) => {
                tracing::info!("wrote {} rows to {}", rows.len(), self.path.display());
                Ok(rows.len())
            }
            Err(e) => {
                tracing::error!("writing {} failed: {e}", self.path.display());
                Err(CrawlError::OutputWrite(format!("{}: {e}", self.path.display())))
            }
        }
    }

    fn write_batch(&self, rows: &[OutputRow]) -> std::io::Result<()> {
        let columns: Vec<&str> = rows
            .iter()
            .flat_map(OutputRow::columns)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let sep = self.delimiter.as_char();

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let mut buf = Vec::new();
        if needs_header {
            write_row(&mut buf, columns.iter().copied(), sep)?;
        }
        for row in rows {
            write_row(
                &mut buf,
                columns.iter().map(|c| row.get(c).unwrap_or("")),
                sep,
            )?;
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.flush()
    }
}

fn needs_quotes(cell: &str, sep: char) -> bool {
    cell.contains(sep) || cell.contains('"') || cell.contains('\n') || cell.contains('\r')
}

/// Write one delimited line, quoting cells that need it.
fn write_row<'a, W: Write>(
    w: &mut W,
    cells: impl IntoIterator<Item = &'a str>,
    sep: char,
) -> std::io::Result<()> {
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            write!(w, "{sep}")?;
        }
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    writeln!(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Charge;

    fn summary(id: &str) -> SummaryRecord {
        let mut s = SummaryRecord {
            identifier: id.into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            ..Default::default()
        };
        s.derive_full_name();
        s
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("new.csv");
        let sink = CsvSink::new(&path, Delimiter::Comma);

        sink.append(&[OutputRow::from_pairs([("a", "1"), ("b", "2")])])
            .unwrap();
        sink.append(&[OutputRow::from_pairs([("a", "3"), ("c", "4")])])
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "a,b\n1,2\n3,4\n");
    }

    #[test]
    fn batch_columns_are_sorted_union() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.tsv");
        let sink = CsvSink::new(&path, Delimiter::Tab);
        let written = sink
            .append(&[
                OutputRow::from_pairs([("b", "x")]),
                OutputRow::from_pairs([("a", "y")]),
            ])
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "a\tb\n\tx\ny\t\n"
        );
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.csv");
        let err = CsvSink::new(&path, Delimiter::Comma).append(&[]).unwrap_err();
        assert!(matches!(err, CrawlError::EmptyBatch));
        assert!(!path.exists());
    }

    #[test]
    fn quoting_follows_rfc4180() {
        let mut buf = Vec::new();
        write_row(&mut buf, ["plain", "a,b", "say \"hi\"", "two\nlines"], ',').unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "plain,\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }

    #[test]
    fn unwritable_path_is_output_write() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let sink = CsvSink::new(blocker.join("new.csv"), Delimiter::Comma);
        let err = sink
            .append(&[OutputRow::from_pairs([("a", "1")])])
            .unwrap_err();
        assert!(matches!(err, CrawlError::OutputWrite(_)));
    }

    #[test]
    fn charges_flatten_up_to_cap() {
        let detail = DetailRecord {
            charges: (1..=7)
                .map(|i| Charge {
                    description: format!("C{i}"),
                    ..Default::default()
                })
                .collect(),
            number_of_charges: 7,
            missing_fields: vec!["dob".into(), "location".into()],
            ..DetailRecord::new("A1")
        };
        let row = build_row(&summary("A1"), Some(&detail), 3, Utc::now());

        assert_eq!(row.get("charge3_description"), Some("C3"));
        assert_eq!(row.get("charge3_disposition"), Some(""));
        assert_eq!(row.get("charge4_description"), None);
        assert_eq!(row.get("number_of_charges"), Some("7"));
        assert_eq!(row.get("missing_fields"), Some("dob;location"));
        assert_eq!(row.get("full_name"), Some("John Doe"));
        assert_eq!(row.columns().filter(|c| c.starts_with("charge")).count(), 12);
    }

    #[test]
    fn required_columns_present_without_detail() {
        let row = build_row(&summary("A2"), None, 3, Utc::now());
        for column in [
            "dob",
            "street_address",
            "city",
            "state",
            "zip",
            "number_of_charges",
            "scrape_timestamp",
        ] {
            assert_eq!(row.get(column), Some(""), "{column}");
        }
        assert!(row.get("processed_timestamp").is_some());
    }
}
