//! roster-watch — entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use roster_watch_cli::commands;
use roster_watch_cli::config::{self, Overrides};
use roster_watch_cli::logging::{self, LogFormat};

#[derive(Parser)]
#[command(
    name = "roster-watch",
    about = "Crawl a web roster, track who comes and goes, and record first sightings",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the roster once (default).
    Run,

    /// Parse a saved roster page without a browser.
    Replay {
        /// Saved HTML of the roster page.
        html: PathBuf,
    },

    /// Show identity store counts and recent runs.
    Status {
        /// Number of recently seen identifiers to list.
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },

    /// Check the resolved configuration.
    Validate,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   roster-watch completions bash > ~/.local/share/bash-completion/completions/roster-watch
    ///   roster-watch completions zsh > ~/.zfunc/_roster-watch
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Completions { shell } = command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "roster-watch",
            &mut std::io::stdout(),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let source = config::resolve_config_path(cli.config.as_deref());
    let settings = config::resolve(source.as_deref(), &cli.overrides)?;
    logging::init(&cli.log_level, cli.log_format, settings.error_log.as_deref())?;

    match command {
        Commands::Run => commands::run(&settings, cli.json).await,
        Commands::Replay { html } => commands::replay(&settings, &html, cli.json).await,
        Commands::Status { recent } => {
            commands::status(&settings, recent, cli.json, &mut std::io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => commands::validate(&settings, source.as_deref(), cli.json),
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}
