//! Durable crash backlog
//!
//! A single JSON file holding the most recent crash payload that could not
//! be confirmed before the process went down. Writes go to a sibling temp
//! file which is fsynced and renamed over the target, so a reader sees
//! either the previous payload or the new one, never a torn file.
//!
//! Crash reports and replays can overlap (a crash while the previous
//! process's backlog is being resubmitted). Both only ever add their own
//! events with [`CrashBacklog::append`] and drop the ones they confirmed
//! with [`CrashBacklog::remove_delivered`]; each read-modify-write runs
//! under one lock shared by every clone of the handle.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use paytrace_span::EventPayload;

/// Current on-disk format version.
pub const BACKLOG_VERSION: u32 = 1;

/// Contents of the backlog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashPayload {
    pub version: u32,
    pub written_at: String,
    /// Exact bodies in delivery order
    pub events: Vec<EventPayload>,
}

impl CrashPayload {
    pub fn new(events: Vec<EventPayload>) -> Self {
        Self {
            version: BACKLOG_VERSION,
            written_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Handle to the backlog file
#[derive(Debug, Clone)]
pub struct CrashBacklog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl CrashBacklog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    // Guards no data of its own, so poisoning carries no meaning.
    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replace the backlog with `payload`.
    pub fn persist(&self, payload: &CrashPayload) -> Result<()> {
        let _guard = self.guard();
        self.write(payload)
    }

    /// Add `events` after whatever the backlog already holds.
    ///
    /// Events already stored under the same id are not duplicated.
    pub fn append(&self, events: &[EventPayload]) -> Result<()> {
        let _guard = self.guard();
        let mut stored = self.read()?.map(|p| p.events).unwrap_or_default();
        let known: HashSet<String> = stored.iter().map(|e| e.event_id.clone()).collect();
        stored.extend(
            events
                .iter()
                .filter(|event| !known.contains(&event.event_id))
                .cloned(),
        );
        self.write(&CrashPayload::new(stored))
    }

    /// Drop the events whose ids are in `delivered`, keeping everything
    /// else in order. The file is deleted once nothing is left.
    ///
    /// Returns how many events remain stored.
    pub fn remove_delivered(&self, delivered: &[String]) -> Result<usize> {
        let _guard = self.guard();
        let Some(payload) = self.read()? else {
            return Ok(0);
        };
        let delivered: HashSet<&str> = delivered.iter().map(String::as_str).collect();
        let before = payload.len();
        let kept: Vec<EventPayload> = payload
            .events
            .into_iter()
            .filter(|event| !delivered.contains(event.event_id.as_str()))
            .collect();

        let remaining = kept.len();
        if remaining == 0 {
            self.remove()?;
        } else if remaining != before {
            self.write(&CrashPayload::new(kept))?;
        }
        Ok(remaining)
    }

    fn write(&self, payload: &CrashPayload) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let bytes = serde_json::to_vec_pretty(payload)?;
        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            events = payload.len(),
            "Crash backlog persisted"
        );
        Ok(())
    }

    /// Read the backlog, if any.
    ///
    /// A file that cannot be decoded can never be replayed, so it is
    /// removed and treated as absent.
    pub fn load(&self) -> Result<Option<CrashPayload>> {
        let _guard = self.guard();
        self.read()
    }

    fn read(&self) -> Result<Option<CrashPayload>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<CrashPayload>(&bytes) {
            Ok(payload) if payload.version == BACKLOG_VERSION => Ok(Some(payload)),
            Ok(payload) => {
                tracing::error!(
                    path = %self.path.display(),
                    version = payload.version,
                    "Discarding crash backlog with unsupported version"
                );
                self.remove()?;
                Ok(None)
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Discarding corrupt crash backlog"
                );
                self.remove()?;
                Ok(None)
            }
        }
    }

    /// Delete the backlog. Missing files are fine.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard();
        self.remove()
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
