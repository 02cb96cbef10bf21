//! # stagekeep
//!
//! Reports the active provisioning stage and when it started.
//!
//! ## Usage
//!
//! ```bash
//! # Active stage ("0" when none has started)
//! stagekeep
//!
//! # Start time of the active stage, or of a given one
//! stagekeep time
//! stagekeep time --stage 3
//!
//! # Every recorded stage, and a status summary as JSON
//! stagekeep stages
//! stagekeep --json-mode status
//! ```

use clap::Parser;
use stagekeep::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // STAGEKEEP_LOG_FORMAT=json enables machine-parseable output.
    let log_format =
        std::env::var("STAGEKEEP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "stagekeep=debug"
    } else if cli.quiet {
        "stagekeep=error"
    } else {
        "stagekeep=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output only.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
