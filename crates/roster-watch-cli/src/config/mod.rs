//! Configuration loading and resolution.
//!
//! Layers, lowest to highest: built-in defaults, an optional TOML file,
//! environment variables, command-line flags. Environment and flags arrive
//! together through clap (`env = ...`), where a flag beats its variable.

use std::path::{Path, PathBuf};

use clap::builder::BoolishValueParser;
use clap::{Args, ValueEnum};
use roster_watch::{CrawlConfig, Delimiter, ReappearancePolicy};
use serde::Deserialize;

/// File name picked up from the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "roster-watch.toml";

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "ROSTER_WATCH_CONFIG";

/// Everything a CLI invocation needs: the engine config plus the
/// front-end's own files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub crawl: CrawlConfig,
    /// Error-level log lines are appended here as well as to stderr.
    pub error_log: Option<PathBuf>,
    /// JSONL history of run summaries.
    pub run_log: Option<PathBuf>,
    /// Latest run outcome as JSON, for an external alerting component.
    pub summary_json: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crawl: CrawlConfig::default(),
            error_log: Some(PathBuf::from("logs/roster-watch-errors.log")),
            run_log: Some(PathBuf::from("data/runs.jsonl")),
            summary_json: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigFileError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Reappearance policy as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    KeepReleased,
    Reactivate,
}

impl From<PolicyArg> for ReappearancePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::KeepReleased => ReappearancePolicy::KeepReleased,
            PolicyArg::Reactivate => ReappearancePolicy::Reactivate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DelimiterArg {
    Comma,
    Tab,
}

impl From<DelimiterArg> for Delimiter {
    fn from(arg: DelimiterArg) -> Self {
        match arg {
            DelimiterArg::Comma => Delimiter::Comma,
            DelimiterArg::Tab => Delimiter::Tab,
        }
    }
}

/// Values that override the config file, from flags or environment.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Roster page URL.
    #[arg(long, env = "ROSTER_URL", global = true)]
    pub roster_url: Option<String>,

    /// SQLite identity store.
    #[arg(long, env = "STATE_DB", global = true)]
    pub state_db: Option<PathBuf>,

    /// Delimited output file for new entities.
    #[arg(long, env = "OUTPUT_CSV", global = true)]
    pub output_csv: Option<PathBuf>,

    /// Page load timeout in milliseconds.
    #[arg(long, env = "BROWSER_TIMEOUT", global = true)]
    pub browser_timeout: Option<u64>,

    /// Run the browser headless (true/false).
    #[arg(long, env = "BROWSER_HEADLESS", value_parser = BoolishValueParser::new(), global = true)]
    pub headless: Option<bool>,

    /// Where diagnostic snapshots go.
    #[arg(long, env = "DIAGNOSTICS_DIR", global = true)]
    pub diagnostics_dir: Option<PathBuf>,

    /// Error-only log file.
    #[arg(long, env = "ERROR_LOG", global = true)]
    pub error_log: Option<PathBuf>,

    /// Charges kept per entity in the output.
    #[arg(long, global = true)]
    pub charge_cap: Option<usize>,

    /// What to do when a released identifier comes back.
    #[arg(long, value_enum, global = true)]
    pub reappearance: Option<PolicyArg>,

    /// Output field separator.
    #[arg(long, value_enum, global = true)]
    pub delimiter: Option<DelimiterArg>,
}

impl Overrides {
    pub fn apply(&self, settings: &mut Settings) {
        let crawl = &mut settings.crawl;
        if let Some(url) = &self.roster_url {
            crawl.roster_url = url.clone();
        }
        if let Some(path) = &self.state_db {
            crawl.state_db = path.clone();
        }
        if let Some(path) = &self.output_csv {
            crawl.output_csv = path.clone();
        }
        if let Some(ms) = self.browser_timeout {
            crawl.navigation_timeout_ms = ms;
        }
        if let Some(headless) = self.headless {
            crawl.headless = headless;
        }
        if let Some(dir) = &self.diagnostics_dir {
            crawl.diagnostics_dir = Some(dir.clone());
        }
        if let Some(cap) = self.charge_cap {
            crawl.charge_cap = cap;
        }
        if let Some(policy) = self.reappearance {
            crawl.reappearance = policy.into();
        }
        if let Some(delimiter) = self.delimiter {
            crawl.delimiter = delimiter.into();
        }
        if let Some(path) = &self.error_log {
            settings.error_log = Some(path.clone());
        }
    }
}

/// Pick the config file: explicit path, then `ROSTER_WATCH_CONFIG`, then
/// `./roster-watch.toml`, then `<config dir>/roster-watch/config.toml`.
/// The last two only count when they exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    dirs::config_dir()
        .map(|dir| dir.join("roster-watch").join("config.toml"))
        .filter(|p| p.exists())
}

/// Parse a TOML config file over the defaults.
pub fn load_file(path: &Path) -> Result<Settings, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the full layered configuration. Validation is left to the caller.
pub fn resolve(explicit: Option<&Path>, overrides: &Overrides) -> Result<Settings, ConfigFileError> {
    let mut settings = match resolve_config_path(explicit) {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            load_file(&path)?
        }
        None => Settings::default(),
    };
    overrides.apply(&mut settings);
    Ok(settings)
}
