//! Append-only JSONL record of a notify run.
//!
//! One file per run under the journal directory, one JSON object per line.
//! Events are flushed as they happen, so a run that dies halfway still shows
//! exactly which attendees were mailed.

use crate::config::Attendee;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Journal {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Journal {
    /// Open (or create) `{dir}/{run_id}.jsonl` for appending
    pub fn open(dir: &Path, run_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create journal directory: {}", dir.display()))?;
        let path = dir.join(format!("{}.jsonl", run_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        Ok(Self {
            path,
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn run_start(&mut self, mode: &str, attendees: usize) -> Result<()> {
        self.log(
            "run_start",
            serde_json::json!({ "mode": mode, "attendees": attendees }),
        )
    }

    /// Log a message that was composed and then previewed or sent
    pub fn delivery(
        &mut self,
        outcome: &str,
        attendee: &Attendee,
        attachment: &Path,
        attachment_sha256: &str,
    ) -> Result<()> {
        self.log(
            outcome,
            serde_json::json!({
                "user": attendee.user,
                "email": attendee.email,
                "attachment": attachment.display().to_string(),
                "attachment_sha256": attachment_sha256,
            }),
        )
    }

    pub fn failure(&mut self, attendee: &Attendee, error: &str) -> Result<()> {
        self.log(
            "failed",
            serde_json::json!({
                "user": attendee.user,
                "email": attendee.email,
                "error": error,
            }),
        )
    }

    pub fn run_end(&mut self, ok: bool, previewed: usize, sent: usize) -> Result<()> {
        self.log(
            "run_end",
            serde_json::json!({ "ok": ok, "previewed": previewed, "sent": sent }),
        )
    }
}
