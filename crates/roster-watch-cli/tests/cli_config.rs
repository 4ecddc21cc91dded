//! Flag parsing and layering, through the same clap definitions the binary uses.

use clap::Parser;
use roster_watch::{Delimiter, ReappearancePolicy};
use roster_watch_cli::config::{self, Overrides};

#[derive(Parser)]
struct Harness {
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[test]
fn flags_layer_over_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roster-watch.toml");
    std::fs::write(
        &path,
        r#"
roster_url = "https://file.example"
charge_cap = 2
output_csv = "out/file.csv"
summary_json = "alerts/latest.json"
"#,
    )
    .unwrap();

    let cli = Harness::try_parse_from([
        "roster-watch",
        "--config",
        path.to_str().unwrap(),
        "--roster-url",
        "https://flag.example",
        "--headless",
        "false",
        "--reappearance",
        "reactivate",
        "--delimiter",
        "tab",
    ])
    .unwrap();

    let settings = config::resolve(cli.config.as_deref(), &cli.overrides).unwrap();
    assert_eq!(settings.crawl.roster_url, "https://flag.example");
    assert_eq!(settings.crawl.charge_cap, 2);
    assert_eq!(settings.crawl.output_csv, std::path::PathBuf::from("out/file.csv"));
    assert!(!settings.crawl.headless);
    assert_eq!(settings.crawl.reappearance, ReappearancePolicy::Reactivate);
    assert_eq!(settings.crawl.delimiter, Delimiter::Tab);
    assert_eq!(
        settings.summary_json,
        Some(std::path::PathBuf::from("alerts/latest.json"))
    );
    assert!(settings.crawl.validate().is_ok());
}

#[test]
fn unknown_policy_is_rejected_by_the_parser() {
    let result = Harness::try_parse_from(["roster-watch", "--reappearance", "forget"]);
    assert!(result.is_err());
}

#[test]
fn missing_file_and_bad_url_are_reported() {
    let cli = Harness::try_parse_from([
        "roster-watch",
        "--config",
        "/nonexistent/roster-watch.toml",
    ])
    .unwrap();
    assert!(config::resolve(cli.config.as_deref(), &cli.overrides).is_err());

    let overrides = Overrides {
        roster_url: Some("not a url".into()),
        ..Default::default()
    };
    let mut settings = config::Settings::default();
    overrides.apply(&mut settings);
    let err = settings.crawl.validate().unwrap_err();
    assert!(err.to_string().contains("roster_url"));
}
