//! Paytrace operator CLI
//!
//! # Usage
//!
//! ```bash
//! # Show what a crashed process left behind
//! paytrace --config paytrace.toml backlog
//!
//! # Resubmit it
//! paytrace --config paytrace.toml replay
//!
//! # Send a sample action with an extra attribute
//! paytrace emit --name checkout_sample --attr amount=12.5 --format json
//! ```
//!
//! Without `--config` the configuration is read from `PAYTRACE_*`
//! environment variables.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: The endpoint did not accept an event
//! - 2: Crash events are still pending in the backlog
//! - 3: Invalid configuration or arguments
//! - 4: Configuration file not found or unreadable
//! - 10: Internal error

use clap::Parser;
use colored::Colorize;
use paytrace_cli::{run, ExitCode, PaytraceCli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = PaytraceCli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::InternalError
        }
    };
    std::process::exit(exit_code.into());
}
