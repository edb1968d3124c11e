//! Record of bridged commands.
//!
//! Every finished command cycle becomes a [`CommandRecord`]. The bridge keeps
//! the most recent ones in a bounded [`CommandLog`] and can append each one
//! as a JSON line to a transcript file.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// How a command cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The detector saw the shell return to rest.
    Idle,
    /// The per-command timeout expired first.
    TimedOut,
    /// Both output streams closed before the shell came back.
    ShellExited,
}

/// A single bridged command and what was sent back for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(rename = "command")]
    pub command_line: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// RFC 3339 local time at submission.
    pub started_at: String,
    pub duration_ms: u64,
    pub completion: Completion,
}

/// Maintains a bounded log of recent command cycles.
#[derive(Debug)]
pub struct CommandLog {
    entries: VecDeque<CommandRecord>,
    max_len: usize,
}

impl CommandLog {
    /// Create a new command log with a maximum capacity.
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// Add a record, dropping the oldest one when full.
    pub fn push(&mut self, record: CommandRecord) {
        if self.max_len == 0 {
            return;
        }
        if self.entries.len() >= self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &CommandRecord> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records that did not end with the shell back at rest.
    pub fn unfinished(&self) -> impl Iterator<Item = &CommandRecord> {
        self.iter().filter(|r| r.completion != Completion::Idle)
    }
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new(200)
    }
}

/// Appends command records to a file, one JSON object per line.
#[derive(Debug)]
pub struct TranscriptWriter {
    path: PathBuf,
    file: File,
}

impl TranscriptWriter {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create transcript directory: {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transcript {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn append(&mut self, record: &CommandRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize command record")?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("Failed to write transcript {}", self.path.display()))?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(command: &str) -> CommandRecord {
        CommandRecord {
            command_line: command.to_string(),
            output: format!("{command} output\r\n"),
            error: String::new(),
            started_at: "2024-05-01T10:00:00+02:00".to_string(),
            duration_ms: 12,
            completion: Completion::Idle,
        }
    }

    fn commands(log: &CommandLog) -> Vec<&str> {
        log.iter().map(|r| r.command_line.as_str()).collect()
    }

    #[test]
    fn test_bounded_log() {
        let mut log = CommandLog::new(3);

        log.push(record("cmd1"));
        log.push(record("cmd2"));
        log.push(record("cmd3"));
        log.push(record("cmd4"));

        // Should only keep last 3
        assert_eq!(commands(&log), vec!["cmd2", "cmd3", "cmd4"]);
    }

    #[test]
    fn test_unfinished() {
        let mut log = CommandLog::default();
        assert!(log.is_empty());

        log.push(record("cmd1"));
        let mut slow = record("sleep 600");
        slow.completion = Completion::TimedOut;
        log.push(slow);
        log.push(record("cmd3"));

        let unfinished: Vec<_> = log.unfinished().map(|r| r.command_line.as_str()).collect();
        assert_eq!(unfinished, vec!["sleep 600"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut log = CommandLog::new(0);
        log.push(record("cmd1"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_record_json_shape() -> anyhow::Result<()> {
        let mut rec = record("dir");
        rec.completion = Completion::TimedOut;
        let json = serde_json::to_value(&rec)?;

        assert_eq!(json["command"], "dir");
        assert_eq!(json["completion"], "timed_out");
        assert!(json.get("error").is_none());
        Ok(())
    }

    #[test]
    fn test_transcript_appends_json_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("transcript.jsonl");

        let mut writer = TranscriptWriter::open(&path)?;
        writer.append(&record("ver"))?;
        let mut failed = record("bogus");
        failed.error = "'bogus' is not recognized\r\n".to_string();
        writer.append(&failed)?;
        drop(writer);

        let text = fs::read_to_string(&path)?;
        let records: Vec<CommandRecord> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(records, vec![record("ver"), failed]);
        Ok(())
    }
}
