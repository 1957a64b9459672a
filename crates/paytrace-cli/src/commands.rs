//! CLI command definitions and execution

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use paytrace_core::{
    ActionOutcome, Attributes, CrashBacklog, CrashDeliveryPath, DeliveryClient,
    StaticDeviceMetadata, TelemetryConfig, TelemetryEngine,
};

use super::output::{BacklogReport, ConfigReport, EmitReport, OutputFormat, Render, ReplayReport};
use super::ExitCode;

/// Paytrace operator CLI
///
/// Replay or inspect the crash backlog, send sample events and check the
/// effective configuration.
#[derive(Parser, Debug)]
#[command(name = "paytrace")]
#[command(about = "Paytrace telemetry operator tool", long_about = None)]
#[command(version)]
pub struct PaytraceCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// TOML configuration file (defaults to PAYTRACE_* environment variables)
    #[arg(short, long, global = true, env = "PAYTRACE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: PaytraceCommands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum PaytraceCommands {
    /// Resubmit the persisted crash backlog
    ///
    /// The file is deleted only after every event was accepted.
    Replay,

    /// Show the persisted crash backlog without sending it
    ///
    /// A corrupt backlog file is removed when read.
    Backlog {
        /// Delete the backlog after showing it
        #[arg(long)]
        clear: bool,
    },

    /// Send a sample action through the full engine
    Emit {
        /// Action name
        #[arg(short, long, default_value = "paytrace_sample")]
        name: String,

        /// Extra attribute as key=value (value parsed as JSON when possible)
        #[arg(short, long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, serde_json::Value)>,

        /// Terminal status to report
        #[arg(long, value_enum, default_value = "success")]
        status: EmitStatus,

        /// Error text when the action fails
        #[arg(long)]
        error: Option<String>,
    },

    /// Print the effective configuration and validate it
    Config,
}

/// Status the emitted action ends with
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum EmitStatus {
    Success,
    Failure,
}

/// Parse `key=value`; the value is taken as JSON if it parses, else as a string.
pub fn parse_attribute(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err("attribute key must not be empty".to_string());
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Load configuration from `path`, or from the environment.
pub fn load_config(path: Option<&Path>) -> Result<TelemetryConfig> {
    match path {
        Some(path) => TelemetryConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(TelemetryConfig::from_env()),
    }
}

/// Execute `replay`
pub async fn execute_replay(config: TelemetryConfig, format: OutputFormat) -> Result<ExitCode> {
    config.validate().context("invalid configuration")?;
    let client = DeliveryClient::new(&config)?;
    let path = CrashDeliveryPath::new(&config);

    let outcome = path.replay(&client).await.context("replaying crash backlog")?;
    let report = ReplayReport {
        backlog: path.backlog().path().display().to_string(),
        replayed: outcome.replayed,
        remaining: outcome.remaining,
    };
    report.render(format)?;

    Ok(if outcome.remaining > 0 {
        ExitCode::PendingBacklog
    } else {
        ExitCode::Success
    })
}

/// Execute `backlog`
pub fn execute_backlog(config: TelemetryConfig, clear: bool, format: OutputFormat) -> Result<ExitCode> {
    let backlog = CrashBacklog::new(config.backlog_path.clone());
    let payload = backlog.load().context("reading crash backlog")?;
    let report = BacklogReport::new(backlog.path(), payload.as_ref());
    report.render(format)?;

    if clear {
        backlog.clear().context("deleting crash backlog")?;
        tracing::info!(path = %backlog.path().display(), "Crash backlog deleted");
        return Ok(ExitCode::Success);
    }
    Ok(if report.events.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::PendingBacklog
    })
}

/// Execute `emit`
pub async fn execute_emit(
    config: TelemetryConfig,
    name: String,
    attributes: Vec<(String, serde_json::Value)>,
    status: EmitStatus,
    error: Option<String>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let engine = TelemetryEngine::new(StaticDeviceMetadata::host())?;
    engine.configure(config).context("configuring telemetry engine")?;

    let attributes: Attributes = attributes.into_iter().collect();
    let id = engine.begin(name.clone(), attributes, None)?;
    let outcome = match status {
        EmitStatus::Success => ActionOutcome::success(),
        EmitStatus::Failure => {
            ActionOutcome::failure(error.unwrap_or_else(|| "sample failure".to_string()))
        }
    };
    let status = outcome.status;

    let delivered = engine.end(id, outcome).await;
    engine.flush().await;

    let report = EmitReport {
        action_id: id.to_string(),
        session_id: engine.session_id().to_string(),
        name,
        status: status.to_string(),
        delivered: delivered.is_ok(),
        error: delivered.as_ref().err().map(|e| e.to_string()),
    };
    report.render(format)?;

    Ok(if delivered.is_ok() {
        ExitCode::Success
    } else {
        ExitCode::DeliveryFailed
    })
}

/// Execute `config`
pub fn execute_config(config: TelemetryConfig, format: OutputFormat) -> Result<ExitCode> {
    let report = ConfigReport::new(&config);
    report.render(format)?;
    Ok(if report.valid {
        ExitCode::Success
    } else {
        ExitCode::InvalidInput
    })
}
