//! Lakesweep CLI - lakesweep command

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli_lib::config::{self, Config};
use cli_lib::logging;
use std::path::PathBuf;

mod cmd;

/// Lakesweep - garbage collection for versioned table catalogs
#[derive(Parser)]
#[command(name = "lakesweep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new GC run
    Run {
        /// Catalog export (JSON) describing tables and references
        #[arg(long)]
        catalog: PathBuf,
        /// Retention cutoff as RFC 3339 timestamp
        #[arg(long, conflicts_with = "retain")]
        cutoff: Option<String>,
        /// Retention window relative to now (e.g. 7d)
        #[arg(long)]
        retain: Option<String>,
        /// Files younger than this are never deleted (e.g. 3h)
        #[arg(long)]
        grace: Option<String>,
        /// Heads older than this lose their exemption from the cutoff
        #[arg(long)]
        head_age_ceiling: Option<String>,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Exit with code 2 when any deletion or location failed
        #[arg(long)]
        strict: bool,
        /// Fail the run when any reference cannot be walked
        #[arg(long)]
        strict_references: bool,
        /// Abort the run after this long (progress is kept)
        #[arg(long)]
        timeout: Option<String>,
        /// Additional location to sweep (repeatable)
        #[arg(long = "extra-location")]
        extra_locations: Vec<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resume an unfinished run
    Resume {
        /// Run ID, unique prefix, or "latest"
        run: String,
        /// Catalog export (JSON) describing tables and references
        #[arg(long)]
        catalog: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the report of a run
    Inspect {
        /// Run ID, unique prefix, or "latest"
        run: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// List skipped references, unreadable snapshots and failed deletions
        #[arg(long)]
        failures: bool,
    },
    /// List recorded runs
    List {
        /// Number of runs to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show all configuration values
    List,
    /// Get a configuration value
    Get {
        /// Key in section.name form (e.g. gc.grace)
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Key in section.name form (e.g. gc.grace)
        key: String,
        /// New value
        value: String,
    },
    /// Show the config file path
    Path {
        /// Create the file with defaults if missing
        #[arg(long)]
        create: bool,
    },
    /// Print an example configuration
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config commands must work even when the file is broken
    let code = match cli.command {
        Commands::Config(command) => {
            let logging = config::load().map(|c| c.logging).unwrap_or_default();
            let _guard = logging::init(&logging, cli.verbose)?;
            match command {
                ConfigCommands::List => cmd::config::run_list().await?,
                ConfigCommands::Get { key } => cmd::config::run_get(&key).await?,
                ConfigCommands::Set { key, value } => cmd::config::run_set(&key, &value).await?,
                ConfigCommands::Path { create } => cmd::config::run_path(create).await?,
                ConfigCommands::Example => cmd::config::run_example().await?,
            }
        }
        command => {
            let config = cmd::config::load_for_command()?;
            let _guard = logging::init(&config.logging, cli.verbose)?;
            dispatch(&config, command).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn dispatch(config: &Config, command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            catalog,
            cutoff,
            retain,
            grace,
            head_age_ceiling,
            dry_run,
            strict,
            strict_references,
            timeout,
            extra_locations,
            json,
        } => {
            let options = cmd::run::RunOptions {
                catalog,
                cutoff,
                retain,
                grace,
                head_age_ceiling,
                dry_run,
                strict,
                strict_references,
                timeout,
                extra_locations,
                json,
            };
            cmd::run::run(config, options).await
        }
        Commands::Resume { run, catalog, json } => {
            cmd::resume::run(config, &run, &catalog, json).await
        }
        Commands::Inspect { run, json, failures } => {
            cmd::inspect::run(config, &run, json, failures).await
        }
        Commands::List { limit } => cmd::list::run(config, limit).await,
        Commands::Config(_) => {
            unreachable!("config commands are dispatched before loading the config")
        }
    }
}
