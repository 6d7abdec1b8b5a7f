// canonguard/src/cli.rs
//! Command-line interface definition for canonguard.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "canonguard",
    author = "Obscura Team (Relay)",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep fingerprinted declaration documents identical to their trusted templates",
    long_about = "canonguard watches folders for declaration documents. When a new document's identifying fields match a trusted template, its content is replaced with the template's content and the event is recorded in a local audit log.",
    arg_required_else_help = true,
)]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, short = 'c', value_name = "FILE", env = "CANONGUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Suppress everything below errors.
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the configured roots and restore matching documents until interrupted.
    Watch,

    /// Print the fingerprint of a document and the template it matches. Read-only.
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run one enforcement attempt on a document now, skipping the settle delay.
    Check {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List the templates currently in the index.
    Templates,
}
