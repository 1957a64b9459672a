//! Output formatting for the paytrace CLI
//!
//! Every report renders either as a colored table for humans or as pretty
//! JSON for scripts.

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

use paytrace_core::{CrashPayload, TelemetryConfig};

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table format with colors
    #[default]
    Table,
    /// JSON format for machine processing
    Json,
}

/// A report that can be printed in either format
pub trait Render: Serialize {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()>;

    fn write_to(&self, out: &mut dyn Write, format: OutputFormat) -> Result<()> {
        match format {
            OutputFormat::Json => {
                writeln!(out, "{}", serde_json::to_string_pretty(self)?)?;
            }
            OutputFormat::Table => self.write_table(out)?,
        }
        out.flush()?;
        Ok(())
    }

    fn render(&self, format: OutputFormat) -> Result<()> {
        self.write_to(&mut io::stdout(), format)
    }
}

fn header(out: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", title.cyan().bold())?;
    writeln!(out, "{}", "=".repeat(60))?;
    writeln!(out)
}

fn field(out: &mut dyn Write, label: &str, value: impl std::fmt::Display) -> io::Result<()> {
    writeln!(out, "  {:<18} {}", format!("{}:", label).dimmed(), value)
}

/// Result of `paytrace replay`
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub backlog: String,
    pub replayed: usize,
    pub remaining: usize,
}

impl Render for ReplayReport {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Crash Backlog Replay")?;
        if self.replayed == 0 && self.remaining == 0 {
            writeln!(out, "{} No crash backlog to replay", "+".green())?;
        } else if self.remaining == 0 {
            writeln!(out, "{} Replayed {} event(s), backlog deleted", "+".green(), self.replayed)?;
        } else {
            writeln!(
                out,
                "{} {} event(s) still pending ({} replayed)",
                "x".red(),
                self.remaining.to_string().red(),
                self.replayed
            )?;
        }
        writeln!(out)?;
        field(out, "Backlog", &self.backlog)
    }
}

/// One persisted event as shown by `paytrace backlog`
#[derive(Debug, Clone, Serialize)]
pub struct BacklogEntry {
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub bytes: usize,
}

/// Result of `paytrace backlog`
#[derive(Debug, Clone, Serialize)]
pub struct BacklogReport {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_at: Option<String>,
    pub events: Vec<BacklogEntry>,
}

impl BacklogReport {
    pub fn new(path: &Path, payload: Option<&CrashPayload>) -> Self {
        let events = payload
            .map(|payload| {
                payload
                    .events
                    .iter()
                    .map(|event| {
                        let envelope = event.decode().ok();
                        BacklogEntry {
                            event_id: event.event_id.clone(),
                            action_name: envelope
                                .as_ref()
                                .and_then(|e| e.action_name().map(str::to_string)),
                            status: envelope
                                .as_ref()
                                .and_then(|e| e.status())
                                .map(|s| s.to_string()),
                            time: envelope.as_ref().map(|e| e.time.clone()),
                            bytes: event.body.len(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            path: path.display().to_string(),
            written_at: payload.map(|p| p.written_at.clone()),
            events,
        }
    }
}

impl Render for BacklogReport {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Crash Backlog")?;
        field(out, "Path", &self.path)?;
        if let Some(written_at) = &self.written_at {
            field(out, "Written", written_at)?;
        }
        writeln!(out)?;

        if self.events.is_empty() {
            writeln!(out, "{} Backlog is empty", "+".green())?;
            return Ok(());
        }

        writeln!(out, "{} {} pending event(s)", "!".yellow(), self.events.len())?;
        writeln!(out, "{}", "-".repeat(60))?;
        for entry in &self.events {
            let status = match entry.status.as_deref() {
                Some("CRASH") | Some("FAILURE") => entry.status.clone().unwrap_or_default().red(),
                Some("TIMEOUT") => entry.status.clone().unwrap_or_default().yellow(),
                Some(other) => other.green(),
                None => "?".white(),
            };
            writeln!(
                out,
                "  {} [{}] {} ({} bytes)",
                entry.event_id.dimmed(),
                status,
                entry.action_name.as_deref().unwrap_or("<undecodable>"),
                entry.bytes
            )?;
        }
        Ok(())
    }
}

/// Result of `paytrace emit`
#[derive(Debug, Clone, Serialize)]
pub struct EmitReport {
    pub action_id: String,
    pub session_id: String,
    pub name: String,
    pub status: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Render for EmitReport {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Emitted Event")?;
        if self.delivered {
            writeln!(out, "{} Event accepted by the endpoint", "+".green())?;
        } else {
            writeln!(out, "{} Event was not delivered", "x".red())?;
        }
        writeln!(out)?;
        field(out, "Action", &self.name)?;
        field(out, "Action id", &self.action_id)?;
        field(out, "Session id", &self.session_id)?;
        field(out, "Status", &self.status)?;
        if let Some(error) = &self.error {
            field(out, "Error", error.red())?;
        }
        Ok(())
    }
}

/// Result of `paytrace config`
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    pub config: serde_json::Value,
}

impl ConfigReport {
    pub fn new(config: &TelemetryConfig) -> Self {
        let problem = config.validate().err().map(|e| e.to_string());

        let mut redacted = config.clone();
        if !redacted.token.is_empty() {
            redacted.token = "<redacted>".to_string();
        }
        let config = serde_json::to_value(&redacted).unwrap_or(serde_json::Value::Null);

        Self {
            valid: problem.is_none(),
            problem,
            config,
        }
    }
}

impl Render for ConfigReport {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Effective Configuration")?;
        match &self.problem {
            None => writeln!(out, "{} Configuration is valid", "+".green())?,
            Some(problem) => writeln!(out, "{} {}", "x".red(), problem)?,
        }
        writeln!(out)?;
        if let serde_json::Value::Object(map) = &self.config {
            for (key, value) in map {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                field(out, key, rendered)?;
            }
        }
        Ok(())
    }
}
