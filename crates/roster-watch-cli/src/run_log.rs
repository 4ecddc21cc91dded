//! JSONL run history — one line per run, append-only.
//!
//! Rotates when the file exceeds `MAX_LOG_SIZE`; rotated files are named
//! `.1`, `.2`, ... up to `MAX_ROTATIONS`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use roster_watch::RunSummary;

/// Run log size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated files kept.
const MAX_ROTATIONS: u32 = 5;

/// Append-only run history.
pub struct RunLog {
    file: File,
    path: PathBuf,
    current_size: u64,
    max_size: u64,
}

impl RunLog {
    /// Open or create the log file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_max_size(path, MAX_LOG_SIZE)
    }

    fn with_max_size(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run log: {}", path.display()))?;

        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size,
        })
    }

    /// Append one summary.
    pub fn record(&mut self, summary: &RunSummary) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let json = serde_json::to_string(summary)?;
        writeln!(self.file, "{json}")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// The last `limit` summaries in the current file, oldest first.
    /// Lines that fail to parse are skipped.
    pub fn tail(path: &Path, limit: usize) -> Result<Vec<RunSummary>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read run log: {}", path.display()))
            }
        };
        let mut runs: Vec<RunSummary> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        let skip = runs.len().saturating_sub(limit);
        Ok(runs.split_off(skip))
    }

    /// runs.jsonl → runs.jsonl.1, .1 → .2, etc.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            let to = rotation_path(&self.path, i + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| "failed to reopen run log after rotation")?;
        self.current_size = 0;
        Ok(())
    }
}

fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("runs.jsonl")
    );
    base.with_file_name(name)
}
