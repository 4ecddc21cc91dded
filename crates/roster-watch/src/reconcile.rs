//! Set classification of the current roster against stored history.
//!
//! `plan` only reads the store; `apply` performs the writes. The pipeline
//! plans before the detail pass and applies once the output has been
//! appended, so a run that dies mid-way leaves the store untouched.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReappearancePolicy;
use crate::store::IdentityStore;

/// How the current roster relates to the stored history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Never seen before.
    pub new: BTreeSet<String>,
    /// Stored, active, and still present.
    pub continuing: BTreeSet<String>,
    /// Stored, active, and now absent.
    pub released: BTreeSet<String>,
    /// Stored as released, and present again.
    pub reappeared: BTreeSet<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.continuing.is_empty()
            && self.released.is_empty()
            && self.reappeared.is_empty()
    }
}

/// Writes performed by `apply`, and how many were lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub inserted: usize,
    pub touched: usize,
    pub released: usize,
    pub reactivated: usize,
    pub failed_writes: usize,
}

/// Classify `current` against the store without writing.
///
/// A store read failure is logged and treated as an empty store.
pub fn plan<'a, I>(current: I, store: &dyn IdentityStore) -> Reconciliation
where
    I: IntoIterator<Item = &'a str>,
{
    let current: BTreeSet<String> = current.into_iter().map(str::to_string).collect();

    let stored = match store.all() {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("identity store unreadable, treating it as empty: {e}");
            Vec::new()
        }
    };
    let (mut active, mut released_before) = (BTreeSet::new(), BTreeSet::new());
    for record in stored {
        if record.is_active() {
            active.insert(record.identifier);
        } else {
            released_before.insert(record.identifier);
        }
    }

    Reconciliation {
        new: current
            .iter()
            .filter(|id| !active.contains(*id) && !released_before.contains(*id))
            .cloned()
            .collect(),
        continuing: current.intersection(&active).cloned().collect(),
        released: active.difference(&current).cloned().collect(),
        reappeared: current.intersection(&released_before).cloned().collect(),
    }
}

/// Persist a plan. Each identifier is updated independently; a failed write
/// is logged and skipped.
pub fn apply(
    plan: &Reconciliation,
    store: &mut dyn IdentityStore,
    now: DateTime<Utc>,
    policy: ReappearancePolicy,
) -> ApplyReport {
    let now = now.to_rfc3339();
    let mut report = ApplyReport::default();

    for id in &plan.new {
        match store.insert_new(id, &now) {
            Ok(true) => report.inserted += 1,
            Ok(false) => {
                tracing::debug!("{id} already stored, refreshing last seen");
                match store.touch(id, &now) {
                    Ok(()) => report.touched += 1,
                    Err(e) => {
                        tracing::warn!("failed to refresh {id}: {e}");
                        report.failed_writes += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("failed to record {id}: {e}");
                report.failed_writes += 1;
            }
        }
    }

    for id in plan.continuing.iter().chain(&plan.reappeared) {
        match store.touch(id, &now) {
            Ok(()) => report.touched += 1,
            Err(e) => {
                tracing::warn!("failed to refresh {id}: {e}");
                report.failed_writes += 1;
            }
        }
    }

    for id in &plan.released {
        match store.mark_released(id, &now) {
            Ok(true) => report.released += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("failed to release {id}: {e}");
                report.failed_writes += 1;
            }
        }
    }

    if policy == ReappearancePolicy::Reactivate {
        for id in &plan.reappeared {
            match store.reactivate(id) {
                Ok(true) => report.reactivated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("failed to reactivate {id}: {e}");
                    report.failed_writes += 1;
                }
            }
        }
    } else if !plan.reappeared.is_empty() {
        tracing::info!(
            count = plan.reappeared.len(),
            "released identifiers back on the roster, keeping release timestamps"
        );
    }

    tracing::info!(
        inserted = report.inserted,
        touched = report.touched,
        released = report.released,
        reactivated = report.reactivated,
        failed = report.failed_writes,
        "identity store updated"
    );
    report
}

/// `plan` followed by `apply`.
pub fn reconcile<'a, I>(
    current: I,
    store: &mut dyn IdentityStore,
    now: DateTime<Utc>,
    policy: ReappearancePolicy,
) -> Reconciliation
where
    I: IntoIterator<Item = &'a str>,
{
    let planned = plan(current, &*store);
    apply(&planned, store, now, policy);
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteIdentityStore, StoreStats};
    use crate::types::{CrawlError, CrawlResult, IdentityRecord};
    use chrono::Duration;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> SqliteIdentityStore {
        SqliteIdentityStore::open_in_memory().unwrap()
    }

    #[test]
    fn first_run_everything_is_new() {
        let mut s = store();
        let now = Utc::now();
        let r = reconcile(["A", "B"], &mut s, now, ReappearancePolicy::default());
        assert_eq!(r.new, set(&["A", "B"]));
        assert!(r.continuing.is_empty() && r.released.is_empty());

        for id in ["A", "B"] {
            let rec = s.get(id).unwrap().unwrap();
            assert_eq!(rec.first_seen_ts, rec.last_seen_ts);
            assert_eq!(rec.first_seen_ts, now.to_rfc3339());
        }
        assert_eq!(s.all().unwrap().len(), 2);
    }

    #[test]
    fn same_roster_twice_is_idempotent() {
        let mut s = store();
        let t0 = Utc::now();
        reconcile(["A", "B"], &mut s, t0, ReappearancePolicy::default());
        let r = reconcile(
            ["A", "B"],
            &mut s,
            t0 + Duration::hours(1),
            ReappearancePolicy::default(),
        );
        assert!(r.new.is_empty());
        assert!(r.released.is_empty());
        assert_eq!(r.continuing, set(&["A", "B"]));

        let rec = s.get("A").unwrap().unwrap();
        assert_eq!(rec.first_seen_ts, t0.to_rfc3339());
        assert_eq!(rec.last_seen_ts, (t0 + Duration::hours(1)).to_rfc3339());
    }

    #[test]
    fn released_timestamp_never_moves() {
        let mut s = store();
        let t0 = Utc::now();
        reconcile(["A", "B"], &mut s, t0, ReappearancePolicy::default());
        let r1 = reconcile(
            ["A"],
            &mut s,
            t0 + Duration::hours(1),
            ReappearancePolicy::default(),
        );
        assert_eq!(r1.released, set(&["B"]));
        let released_at = s.get("B").unwrap().unwrap().released_ts;
        assert_eq!(released_at, Some((t0 + Duration::hours(1)).to_rfc3339()));

        let r2 = reconcile(
            ["A"],
            &mut s,
            t0 + Duration::hours(2),
            ReappearancePolicy::default(),
        );
        assert!(r2.released.is_empty());
        assert_eq!(s.get("B").unwrap().unwrap().released_ts, released_at);
    }

    #[test]
    fn reappearance_keeps_release_by_default() {
        let mut s = store();
        let t0 = Utc::now();
        reconcile(["A"], &mut s, t0, ReappearancePolicy::KeepReleased);
        reconcile(std::iter::empty(), &mut s, t0 + Duration::hours(1), ReappearancePolicy::KeepReleased);
        let t2 = t0 + Duration::hours(2);
        let r = reconcile(["A"], &mut s, t2, ReappearancePolicy::KeepReleased);

        assert!(r.new.is_empty());
        assert_eq!(r.reappeared, set(&["A"]));
        let rec = s.get("A").unwrap().unwrap();
        assert_eq!(rec.last_seen_ts, t2.to_rfc3339());
        assert!(!rec.is_active());

        // Still released, so it stays in `reappeared` rather than `continuing`.
        let r = reconcile(["A"], &mut s, t2, ReappearancePolicy::KeepReleased);
        assert_eq!(r.reappeared, set(&["A"]));
    }

    #[test]
    fn reappearance_can_reactivate() {
        let mut s = store();
        let t0 = Utc::now();
        reconcile(["A"], &mut s, t0, ReappearancePolicy::Reactivate);
        reconcile(std::iter::empty(), &mut s, t0 + Duration::hours(1), ReappearancePolicy::Reactivate);
        let r = reconcile(
            ["A"],
            &mut s,
            t0 + Duration::hours(2),
            ReappearancePolicy::Reactivate,
        );
        assert_eq!(r.reappeared, set(&["A"]));
        assert!(s.get("A").unwrap().unwrap().is_active());

        let r = reconcile(
            ["A"],
            &mut s,
            t0 + Duration::hours(3),
            ReappearancePolicy::Reactivate,
        );
        assert_eq!(r.continuing, set(&["A"]));
        assert_eq!(
            s.get("A").unwrap().unwrap().first_seen_ts,
            t0.to_rfc3339()
        );
    }

    #[test]
    fn new_id_already_stored_still_gets_last_seen() {
        let mut s = store();
        let t0 = Utc::now();
        reconcile(["A"], &mut s, t0, ReappearancePolicy::default());

        // Planned against a history that could not be read.
        let planned = plan(["A"], &store());
        assert_eq!(planned.new, set(&["A"]));
        let t1 = t0 + Duration::hours(1);
        let report = apply(&planned, &mut s, t1, ReappearancePolicy::default());
        assert_eq!(report.inserted, 0);
        assert_eq!(report.touched, 1);

        let rec = s.get("A").unwrap().unwrap();
        assert_eq!(rec.first_seen_ts, t0.to_rfc3339());
        assert_eq!(rec.last_seen_ts, t1.to_rfc3339());
    }

    /// Store whose reads and writes always fail.
    struct BrokenStore;

    impl IdentityStore for BrokenStore {
        fn all(&self) -> CrawlResult<Vec<IdentityRecord>> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn get(&self, _: &str) -> CrawlResult<Option<IdentityRecord>> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn insert_new(&mut self, _: &str, _: &str) -> CrawlResult<bool> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn touch(&mut self, _: &str, _: &str) -> CrawlResult<()> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn mark_released(&mut self, _: &str, _: &str) -> CrawlResult<bool> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn reactivate(&mut self, _: &str) -> CrawlResult<bool> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn stats(&self) -> CrawlResult<StoreStats> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
        fn recent(&self, _: usize) -> CrawlResult<Vec<IdentityRecord>> {
            Err(CrawlError::Persistence("disk gone".into()))
        }
    }

    #[test]
    fn broken_store_degrades_to_all_new() {
        let mut s = BrokenStore;
        let planned = plan(["A", "B"], &s);
        assert_eq!(planned.new, set(&["A", "B"]));
        let report = apply(&planned, &mut s, Utc::now(), ReappearancePolicy::default());
        assert_eq!(report.failed_writes, 2);
        assert_eq!(report.inserted, 0);
    }
}
