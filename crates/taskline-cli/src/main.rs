//! Taskline CLI
//!
//! Command-line interface for Taskline - an offline-first task list.

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskline_core::{Config, ReconciliationStore};

mod commands;
mod output;

use commands::item::{AddArgs, EditArgs, ListArgs};
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "taskline")]
#[command(about = "Taskline - offline-first task list with server sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Try each remote call once instead of retrying with backoff
    #[arg(long, global = true)]
    once: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List items
    #[command(alias = "ls")]
    List(ListArgs),
    /// Add a new item
    Add(AddArgs),
    /// Show item details
    Show {
        /// Item ID (full ID or prefix)
        id: String,
    },
    /// Toggle an item's completion
    Done {
        /// Item ID (full ID or prefix)
        id: String,
    },
    /// Change an item's fields
    Edit(EditArgs),
    /// Delete an item
    #[command(alias = "rm")]
    Delete {
        /// Item ID (full ID or prefix)
        id: String,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Replace the local list with the server's
    Sync,
    /// Push local changes to the server
    Patch {
        /// Patch even if nothing is known to be out of sync
        #[arg(long)]
        force: bool,
    },
    /// Show sync status and counts
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, token, storage, retry.max_attempts, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    match run(cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = output::recovery_hint(&e) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
        };
    }

    let mut config = Config::load()?;
    if cli.once {
        config.retry.max_attempts = 1;
    }
    let store = ReconciliationStore::open(&config)?;
    let device = config.device_id.as_deref();

    let result = match cli.command {
        Commands::List(args) => commands::item::list(&store, args, output).await,
        Commands::Add(args) => commands::item::add(&store, args, device, output).await,
        Commands::Show { id } => commands::item::show(&store, &id, output).await,
        Commands::Done { id } => commands::item::toggle(&store, &id, device, output).await,
        Commands::Edit(args) => commands::item::edit(&store, args, device, output).await,
        Commands::Delete { id, yes } => commands::item::delete(&store, &id, yes, output).await,
        Commands::Sync => commands::sync::load(&store, output).await,
        Commands::Patch { force } => commands::sync::patch(&store, force, output).await,
        Commands::Status => commands::status::show(&store, &config, output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    store.flush().await?;
    result
}

/// Log to stderr when asked via -v or RUST_LOG
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => match std::env::var("RUST_LOG") {
            Ok(level) => level,
            Err(_) => return,
        },
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    // A full directive list in RUST_LOG is taken as is
    let env_filter = if level.contains('=') {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(format!("taskline_core={},taskline_cli={}", level, level))
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}
