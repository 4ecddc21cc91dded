//! End-to-end runs over a scripted session: listing, detail clicks, output
//! file and identity history across two runs.

use std::path::Path;
use std::time::Duration;

use roster_watch::renderer::scripted::Script;
use roster_watch::{
    run, CrawlConfig, IdentityStore, ReappearancePolicy, RetryPolicy, ScriptedRenderer,
    SqliteIdentityStore,
};

// ─────────────────────── helpers ───────────────────────

const URL: &str = "https://roster.test/";

fn config(dir: &Path) -> CrawlConfig {
    CrawlConfig {
        roster_url: URL.to_string(),
        navigation_retry: RetryPolicy::new(2, Duration::ZERO),
        click_retry: RetryPolicy::new(2, Duration::ZERO),
        selector_timeout_ms: 30,
        poll_interval_ms: 5,
        output_csv: dir.join("out").join("new_entities.csv"),
        state_db: dir.join("state").join("ids.db"),
        diagnostics_dir: Some(dir.join("diag")),
        ..Default::default()
    }
}

fn roster(rows: &[(&str, &str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(id, first, last)| {
            format!(
                "<tr><td>{last}</td><td>{first}</td><td></td><td></td><td>40</td>\
                 <td>W</td><td>M</td><td>03/01/2025 08:15</td><td><a href='#'>{id}</a></td></tr>"
            )
        })
        .collect();
    format!(
        "<html><body><table id='inmateTable'><thead><tr><th>Last</th></tr></thead>\
         <tbody>{body}</tbody></table></body></html>"
    )
}

fn detail(charges: usize) -> String {
    let rows: String = (1..=charges)
        .map(|i| format!("<tr><td>CHARGE {i}</td><td>02/2{i}/2025</td><td>24-{i}</td><td>Pending</td></tr>"))
        .collect();
    format!(
        "<html><body><div class='modal-dialog'><button class='close'>x</button>\
         <div class='inmateDetails'><span class='dob'>04/05/1985</span>\
         <span class='address'>123 Main St, Houston, TX 77001</span>\
         <table class='charges-table'><tbody>{rows}</tbody></table></div></div></body></html>"
    )
}

fn row_selector(n: usize) -> String {
    format!("table#inmateTable tbody tr:nth-of-type({n})")
}

// ─────────────────────── scenarios ───────────────────────

#[tokio::test]
async fn two_runs_write_new_rows_and_mark_releases() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut store = SqliteIdentityStore::open(&cfg.state_db).unwrap();

    // Run 1: two entities, both new.
    let first = ScriptedRenderer::new(
        Script::new()
            .page(URL, roster(&[("A1", "John", "Doe"), ("A2", "Jane", "Roe")]))
            .on_click(row_selector(1), detail(7))
            .on_click(row_selector(2), detail(1)),
    );
    let summary = run(&cfg, &first, &mut store).await.unwrap();
    assert_eq!(summary.roster_size, 2);
    assert_eq!(summary.new_count, 2);
    assert_eq!(summary.details_extracted, 2);
    assert_eq!(summary.rows_written, 2);
    assert!(summary.output_written);
    assert_eq!(summary.sample[0].full_name, "John Doe");
    assert!(first.log().closed);

    let csv = std::fs::read_to_string(&cfg.output_csv).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    let header: Vec<&str> = lines[0].split(',').collect();
    assert!(header.contains(&"charge3_description"));
    assert!(!header.contains(&"charge4_description"));
    let count_col = header.iter().position(|c| *c == "number_of_charges").unwrap();
    let city_col = header.iter().position(|c| *c == "city").unwrap();
    assert!(lines[1].contains("A1"));
    let first_row: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(first_row[count_col], "7");
    assert_eq!(first_row[city_col], "Houston");

    // Run 2: A2 gone, A3 arrives.
    let second = ScriptedRenderer::new(
        Script::new()
            .page(URL, roster(&[("A1", "John", "Doe"), ("A3", "Sam", "Poe")]))
            .on_click(row_selector(2), detail(2)),
    );
    let summary = run(&cfg, &second, &mut store).await.unwrap();
    assert_eq!(summary.new_count, 1);
    assert_eq!(summary.continuing_count, 1);
    assert_eq!(summary.released_count, 1);
    assert_eq!(summary.sample.len(), 1);
    assert_eq!(summary.sample[0].identifier, "A3");

    // Only A3's detail view was opened.
    assert_eq!(
        second
            .log()
            .clicks
            .iter()
            .filter(|c| c.starts_with("table#inmateTable"))
            .count(),
        1
    );

    let csv = std::fs::read_to_string(&cfg.output_csv).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert_eq!(csv.matches("identifier").count(), 1);

    let a2 = store.get("A2").unwrap().unwrap();
    assert!(a2.released_ts.is_some());
    let a1 = store.get("A1").unwrap().unwrap();
    assert!(a1.is_active());
    assert_ne!(a1.first_seen_ts, a1.last_seen_ts);
}

#[tokio::test]
async fn released_entity_returning_is_not_re_detailed() {
    for policy in [ReappearancePolicy::KeepReleased, ReappearancePolicy::Reactivate] {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlConfig {
            reappearance: policy,
            ..config(dir.path())
        };
        let mut store = SqliteIdentityStore::open(&cfg.state_db).unwrap();

        let with_a1 = || {
            ScriptedRenderer::new(
                Script::new()
                    .page(URL, roster(&[("A1", "John", "Doe")]))
                    .on_click(row_selector(1), detail(1)),
            )
        };
        run(&cfg, &with_a1(), &mut store).await.unwrap();
        let empty = ScriptedRenderer::new(Script::new().page(URL, roster(&[])));
        let summary = run(&cfg, &empty, &mut store).await.unwrap();
        assert_eq!(summary.released_count, 1);

        let back = with_a1();
        let summary = run(&cfg, &back, &mut store).await.unwrap();
        assert_eq!(summary.new_count, 0);
        assert_eq!(summary.reappeared_count, 1);
        assert_eq!(summary.rows_written, 0);
        assert!(back.log().clicks.is_empty());

        let a1 = store.get("A1").unwrap().unwrap();
        assert_eq!(
            a1.is_active(),
            policy == ReappearancePolicy::Reactivate,
            "{policy:?}"
        );
    }
}

#[tokio::test]
async fn unresponsive_source_is_fatal_and_leaves_store_alone() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut store = SqliteIdentityStore::open(&cfg.state_db).unwrap();
    let renderer = ScriptedRenderer::new(Script::new().page(URL, roster(&[])).failing_loads(5));

    let err = run(&cfg, &renderer, &mut store).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(renderer.log().navigations.len(), 2);
    assert!(renderer.log().closed);
    assert!(store.all().unwrap().is_empty());
    assert!(!cfg.output_csv.exists());
}
