//! manifold CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: One or more manifest items failed validation
//! - 2: Fatal error

use std::process::ExitCode;

use clap::Parser;
use manifold_core::RunSummary;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod matcher;
mod values;

use commands::Cli;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const VALIDATION_FAILURE: u8 = 1;
    pub const FATAL_ERROR: u8 = 2;
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(
            format!("manifold={level}")
                .parse::<Directive>()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        )
        .add_directive(LevelFilter::WARN.into());

    // A subscriber may already be installed; keep it.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}

fn report(summary: &RunSummary) {
    for planned in &summary.planned {
        println!(">> {}", planned.target);
        match (&planned.content, &planned.source) {
            (Some(content), _) => println!("{}", content),
            (None, Some(source)) => println!("(copy of {})", source.display()),
            (None, None) => {}
        }
    }
    for archive in &summary.archives {
        println!(
            "Wrote {} ({} entries)",
            archive.path.display(),
            archive.entries.len()
        );
    }
    println!("{}", summary);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match commands::run::execute(&cli.run).await {
        Ok(summary) => {
            report(&summary);
            if summary.succeeded() {
                ExitCode::from(ExitCodes::SUCCESS)
            } else {
                ExitCode::from(ExitCodes::VALIDATION_FAILURE)
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(ExitCodes::FATAL_ERROR)
        }
    }
}
