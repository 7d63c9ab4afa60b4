use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::PilotResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub ts: i64,
    pub role: String,
    pub content: Option<String>,
    pub action: Option<serde_json::Value>,
}

impl TranscriptEntry {
    pub fn now(role: &str, content: Option<String>, action: Option<serde_json::Value>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            role: role.to_string(),
            content,
            action,
        }
    }
}

/// Append-only JSONL record of one session, one entry per line.
pub struct SessionTranscript {
    pub session_id: String,
    entries: Vec<TranscriptEntry>,
    file_path: PathBuf,
}

impl SessionTranscript {
    /// Creates `<output_dir>/sessions/` if needed.
    pub fn create(output_dir: &Path) -> PilotResult<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = output_dir.join("sessions");
        std::fs::create_dir_all(&dir)?;
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        tracing::info!(path = %file_path.display(), "session transcript enabled");
        Ok(Self {
            session_id,
            entries: Vec::new(),
            file_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Record an entry and append it to the file.
    pub fn push(&mut self, entry: TranscriptEntry) -> PilotResult<()> {
        let line = serde_json::to_string(&entry)?;
        self.entries.push(entry);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %self.file_path.display(), "transcript entry flushed");
        Ok(())
    }
}
