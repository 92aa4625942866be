mod commands;
mod output;
mod scaffold;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use strata_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata", version, about = "Apply and roll back schema migrations")]
struct Cli {
    /// Path to a strata.yml / strata.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database to migrate, overriding the configured path
    #[arg(long, global = true, env = "STRATA_DATABASE")]
    database: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger table
    Install,
    /// Drop the ledger table and its lease table
    Uninstall,
    /// Apply pending migrations in ascending id order
    Up {
        /// Highest id to apply
        #[arg(long)]
        to: Option<u64>,
        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Roll back applied migrations, most recent first
    Down {
        /// Roll back everything above this id
        #[arg(long)]
        to: Option<u64>,
        /// Roll back at most this many migrations
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show pending migrations and ledger drift
    Status,
    /// List applied migrations, most recent first
    History {
        /// Only entries applied on or after this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a new, empty migration file
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Configured scope to place the file under, e.g. `app` or `app:module:billing`
        #[arg(long)]
        scope: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let loader = match cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    match cli.command {
        Command::Install => commands::install(&config),
        Command::Uninstall => commands::uninstall(&config),
        Command::Up { to, dry_run } => commands::up(&config, to, dry_run),
        Command::Down { to, limit, dry_run } => commands::down(&config, to, limit, dry_run),
        Command::Status => commands::status(&config),
        Command::History { from, limit, json } => {
            commands::history(&config, from.as_deref(), limit, json)
        }
        Command::Create {
            name,
            description,
            scope,
        } => scaffold::create(&config, &name, description.as_deref(), scope.as_deref()).map(
            |path| {
                println!("Created {}", path.display());
            },
        ),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(e) = run(cli) {
        eprintln!("Halted! {e:#}");
        std::process::exit(1);
    }
}
