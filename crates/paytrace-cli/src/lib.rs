//! Operator CLI for paytrace
//!
//! Inspects and replays the crash backlog a host application left behind,
//! sends sample actions through the full telemetry engine and validates the
//! effective configuration.

pub mod commands;
pub mod output;

pub use commands::{EmitStatus, PaytraceCli, PaytraceCommands};
pub use output::OutputFormat;

use colored::Colorize;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command completed
    Success = 0,
    /// The endpoint did not accept an event
    DeliveryFailed = 1,
    /// Crash events are still waiting in the backlog
    PendingBacklog = 2,
    /// Invalid configuration or arguments
    InvalidInput = 3,
    /// Configuration or backlog file could not be read
    FileError = 4,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Run the CLI with the given arguments and return the exit code
pub async fn run(cli: PaytraceCli) -> anyhow::Result<ExitCode> {
    let config = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return Ok(ExitCode::FileError);
        }
    };
    tracing::debug!(?config, "Effective configuration");

    match cli.command {
        PaytraceCommands::Replay => commands::execute_replay(config, cli.format).await,
        PaytraceCommands::Backlog { clear } => commands::execute_backlog(config, clear, cli.format),
        PaytraceCommands::Emit {
            name,
            attributes,
            status,
            error,
        } => {
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "error:".red().bold(), e);
                return Ok(ExitCode::InvalidInput);
            }
            commands::execute_emit(config, name, attributes, status, error, cli.format).await
        }
        PaytraceCommands::Config => commands::execute_config(config, cli.format),
    }
}
