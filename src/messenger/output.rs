use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Message, MessageKind};

/// How much of the message stream is echoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum OutputLevel {
    None,
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl OutputLevel {
    pub fn allows(self, kind: MessageKind) -> bool {
        match self {
            OutputLevel::None => false,
            OutputLevel::Quiet => matches!(kind, MessageKind::Warning | MessageKind::Error),
            OutputLevel::Normal => kind != MessageKind::Internal,
            OutputLevel::Verbose => true,
        }
    }
}

struct LogFile {
    path: PathBuf,
    level: OutputLevel,
    writer: BufWriter<File>,
}

/// Echo side of the bus: terminal output through `tracing` plus optional
/// plain-text log files. Never influences delivery.
#[derive(Default)]
pub struct MessageOutput {
    level: OutputLevel,
    is_headless: bool,
    filter: BTreeSet<String>,
    is_blacklist: bool,
    logs: Vec<LogFile>,
}

impl MessageOutput {
    pub fn level(&self) -> OutputLevel {
        self.level
    }

    pub fn set_level(&mut self, level: OutputLevel) {
        self.level = level;
    }

    pub fn set_headless(&mut self, is_headless: bool) {
        self.is_headless = is_headless;
    }

    pub fn add_filter(&mut self, tag: impl Into<String>) {
        self.filter.insert(tag.into());
    }

    pub fn set_filter_blacklist(&mut self, is_blacklist: bool) {
        self.is_blacklist = is_blacklist;
    }

    pub fn reset_filter(&mut self) {
        self.filter.clear();
        self.is_blacklist = false;
    }

    pub fn passes_filter(&self, msg: &Message) -> bool {
        if self.filter.is_empty() {
            return true;
        }
        let hit = msg.tags().iter().any(|t| self.filter.contains(t));
        if self.is_blacklist {
            !hit
        } else {
            hit
        }
    }

    pub fn add_log(&mut self, path: impl AsRef<Path>, level: OutputLevel) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        self.remove_log(&path);
        self.logs.push(LogFile {
            path,
            level,
            writer: BufWriter::new(file),
        });
        Ok(())
    }

    pub fn remove_log(&mut self, path: impl AsRef<Path>) -> bool {
        let before = self.logs.len();
        self.logs.retain(|log| log.path != path.as_ref());
        before != self.logs.len()
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn format(&self, msg: &Message) -> String {
        let header = if self.is_headless {
            format!("{}ms> ", msg.tick())
        } else {
            format!("MSG ({}ms)[{}]<{}>: ", msg.tick(), msg.kind(), msg.joined_tags())
        };

        if msg.descr().contains('\n') {
            let body: Vec<String> = msg.descr().lines().map(|l| format!("\t{l}")).collect();
            format!("{header}\n{}", body.join("\n"))
        } else {
            format!("{header}{}", msg.descr())
        }
    }

    pub fn output(&mut self, msg: &Message) {
        if !self.passes_filter(msg) {
            return;
        }

        let line = self.format(msg);
        if self.level.allows(msg.kind()) {
            match msg.kind() {
                MessageKind::Warning => tracing::warn!(target: "messenger", "{line}"),
                MessageKind::Error => tracing::error!(target: "messenger", "{line}"),
                MessageKind::Internal => tracing::debug!(target: "messenger", "{line}"),
                _ => tracing::info!(target: "messenger", "{line}"),
            }
        }

        for log in &mut self.logs {
            if !log.level.allows(msg.kind()) {
                continue;
            }
            let written = writeln!(log.writer, "{line}").and_then(|_| log.writer.flush());
            if let Err(err) = written {
                tracing::warn!(target: "messenger", path = %log.path.display(), %err, "log file write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_only_lets_problems_through() {
        assert!(OutputLevel::Quiet.allows(MessageKind::Warning));
        assert!(OutputLevel::Quiet.allows(MessageKind::Error));
        assert!(!OutputLevel::Quiet.allows(MessageKind::Info));
        assert!(!OutputLevel::Normal.allows(MessageKind::Internal));
        assert!(OutputLevel::Verbose.allows(MessageKind::Internal));
        assert!(!OutputLevel::None.allows(MessageKind::Error));
    }

    #[test]
    fn filter_whitelist_and_blacklist() {
        let mut output = MessageOutput::default();
        let room = Message::new(0, ["engine", "room"], MessageKind::Info, "");
        let net = Message::new(0, ["net"], MessageKind::Info, "");

        output.add_filter("room");
        assert!(output.passes_filter(&room));
        assert!(!output.passes_filter(&net));

        output.set_filter_blacklist(true);
        assert!(!output.passes_filter(&room));
        assert!(output.passes_filter(&net));

        output.reset_filter();
        assert!(output.passes_filter(&room) && output.passes_filter(&net));
    }

    #[test]
    fn multi_line_descriptions_are_indented() {
        let mut output = MessageOutput::default();
        output.set_headless(true);
        let msg = Message::new(12, ["log"], MessageKind::Info, "first\nsecond");
        assert_eq!(output.format(&msg), "12ms> \n\tfirst\n\tsecond");
    }
}
