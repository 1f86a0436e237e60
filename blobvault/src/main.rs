//! blobvault - Main entry point
//!
//! Backup, snapshot, and restore for a filestorage object database and
//! its blobstorage tree.

use anyhow::Result;
use blobvault::{config::BackupMode, runner, utils, Settings};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "blobvault.toml")]
    config: PathBuf,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the filestorage and blobstorage
    Backup {
        /// Force a full backup instead of an incremental one
        #[arg(long)]
        full: bool,
    },
    /// Make a full snapshot backup in the snapshot locations
    Snapshot,
    /// Restore the most recent backup, or the state at DATE
    Restore {
        /// Point in time to restore: yyyy-mm-dd[-hh[-mm[-ss]]]
        date: Option<String>,
        /// Do not ask for confirmation
        #[arg(long)]
        no_prompt: bool,
    },
    /// Restore the most recent snapshot
    SnapshotRestore {
        /// Point in time to restore: yyyy-mm-dd[-hh[-mm[-ss]]]
        date: Option<String>,
        /// Do not ask for confirmation
        #[arg(long)]
        no_prompt: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    utils::logger::init(level)?;

    let mut settings = Settings::from_file(&cli.config)?;

    match cli.command {
        Command::Backup { full } => {
            if full {
                settings.full = true;
            }
            runner::backup_all(&settings, BackupMode::Standard, Utc::now())?;
        }
        Command::Snapshot => {
            runner::backup_all(&settings, BackupMode::Snapshot, Utc::now())?;
        }
        Command::Restore { date, no_prompt } => {
            runner::restore_all(&settings, BackupMode::Standard, date.as_deref(), no_prompt)?;
        }
        Command::SnapshotRestore { date, no_prompt } => {
            runner::restore_all(&settings, BackupMode::Snapshot, date.as_deref(), no_prompt)?;
        }
    }
    Ok(())
}
