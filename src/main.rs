mod categorizer;
mod cli;
mod error;
mod export;
mod fmt;
mod importer;
mod lint;
mod logging;
mod models;
mod reports;
mod reviewer;
mod rules;
mod settings;
mod taxonomy;

use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    logging::init(
        cli.verbosity.tracing_level_filter(),
        cli.verbosity.is_present(),
    );

    let result = match cli.command {
        Commands::Classify {
            config,
            input,
            output_dir,
            dry_run,
        } => cli::classify::run(&config, input.as_deref(), output_dir.as_deref(), dry_run),
        Commands::Check { config, assertions } => cli::check::run(&config, assertions.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
