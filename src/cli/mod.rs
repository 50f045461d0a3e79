pub mod check;
pub mod classify;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser)]
#[command(
    name = "spendcat",
    version,
    about = "Tiered, config-driven categorization of procurement spend."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log verbosity (-v for tier counts, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a transaction file and write results and reports.
    Classify {
        /// Client configuration file (YAML)
        #[arg(long)]
        config: PathBuf,
        /// Input file, overriding paths.input
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output directory, overriding paths.output_dir
        #[arg(long = "output-dir")]
        output_dir: Option<PathBuf>,
        /// Classify and print the summary without writing any files.
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Check rule files for unknown keys, unknown codes and conflicting patterns.
    Check {
        /// Client configuration file (YAML)
        #[arg(long)]
        config: PathBuf,
        /// Known supplier mappings and minimum rule counts, overriding paths.test_assertions
        #[arg(long)]
        assertions: Option<PathBuf>,
    },
}
