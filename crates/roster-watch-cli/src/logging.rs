//! tracing-subscriber setup: stderr for everything at the chosen level, plus
//! an optional file that only receives errors.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init(level: &str, format: LogFormat, error_log: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let errors = match error_log {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_error_log(path)?))
                .with_filter(LevelFilter::ERROR),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(errors)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(())
}

/// Open the error log for appending, creating parent directories.
pub fn open_error_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create log dir {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open error log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_parents_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("errors.log");
        open_error_log(&path).unwrap();
        assert!(path.exists());
    }
}
