//! scsi-ram CLI - drive a RAM-backed SCSI target from the command line.

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// scsi-ram: RAM-backed SCSI target emulator
#[derive(Parser)]
#[command(name = "scsi-ram")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify a fresh unit: INQUIRY, READ CAPACITY, MODE SENSE
    Probe(commands::ProbeArgs),

    /// Write a pattern across the unit, read it back and verify
    Exercise(commands::ExerciseArgs),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Probe(args) => commands::probe(&args, cli.format),
        Commands::Exercise(args) => commands::exercise(&args, cli.format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
