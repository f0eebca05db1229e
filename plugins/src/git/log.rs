//! `git log --name-status` with a delimited pretty format.
//!
//! Each commit starts with a record separator (0x1e); header fields are
//! split by 0x1f and the free-form body ends at 0x1d. The name-status lines
//! that follow belong to that commit until the next separator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use gitkeeper_core::error::ParseError;
use gitkeeper_core::git::{GitFileStatus, GitLogEntry, GitStatusEntry};
use gitkeeper_core::process::EntryParser;

use super::status::unquote;

const RECORD: char = '\u{1e}';
const FIELD: char = '\u{1f}';
const BODY_END: char = '\u{1d}';

pub const LOG_FORMAT: &str = "--pretty=format:%x1e%H%x1f%an%x1f%ae%x1f%aI%x1f%s%x1f%b%x1d";

#[derive(Default)]
struct Pending {
    entry: Option<GitLogEntry>,
    body: Vec<String>,
    in_body: bool,
}

pub struct LogEntryParser {
    root: PathBuf,
    pending: Pending,
}

impl LogEntryParser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: Pending::default(),
        }
    }

    fn take(&mut self) -> Option<GitLogEntry> {
        let Pending { entry, body, .. } = std::mem::take(&mut self.pending);
        entry.map(|mut e| {
            e.description = body.join("\n").trim().to_string();
            e
        })
    }

    fn header(&mut self, line: &str) -> Result<(), ParseError> {
        let fields: Vec<&str> = line.splitn(6, FIELD).collect();
        let &[commit_id, author_name, author_email, time, summary, body] = fields.as_slice() else {
            return Err(ParseError::new(format!(
                "log header has {} fields, expected 6",
                fields.len()
            )));
        };
        let time = DateTime::parse_from_rfc3339(time)
            .map_err(|e| ParseError::new(format!("bad commit time {time:?}: {e}")))?
            .with_timezone(&Utc);

        self.pending.entry = Some(GitLogEntry {
            commit_id: commit_id.to_string(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            time,
            summary: summary.to_string(),
            description: String::new(),
            changes: Vec::new(),
        });
        self.body_line(body);
        Ok(())
    }

    fn body_line(&mut self, line: &str) {
        match line.split_once(BODY_END) {
            Some((last, _)) => {
                self.pending.body.push(last.to_string());
                self.pending.in_body = false;
            }
            None => {
                self.pending.body.push(line.to_string());
                self.pending.in_body = true;
            }
        }
    }

    fn change_line(&mut self, line: &str) -> Result<(), ParseError> {
        let mut parts = line.split('\t');
        let code = parts.next().unwrap_or_default();
        let status = code
            .chars()
            .next()
            .map(GitFileStatus::from_porcelain)
            .ok_or_else(|| ParseError::new(format!("empty change line: {line:?}")))?;
        let (original, path) = match (parts.next(), parts.next()) {
            (Some(from), Some(to)) => (Some(unquote(from)), unquote(to)),
            (Some(path), None) => (None, unquote(path)),
            _ => return Err(ParseError::new(format!("change line without a path: {line:?}"))),
        };

        let Some(entry) = self.pending.entry.as_mut() else {
            return Err(ParseError::new(format!("change line before any commit: {line:?}")));
        };
        let mut change = GitStatusEntry::new(&self.root, path, status, GitFileStatus::None);
        change.original_path = original;
        entry.changes.push(change);
        Ok(())
    }
}

impl EntryParser for LogEntryParser {
    type Entry = GitLogEntry;

    fn parse_line(&mut self, line: &str) -> Result<Option<GitLogEntry>, ParseError> {
        if let Some(header) = line.strip_prefix(RECORD) {
            let done = self.take();
            self.header(header)?;
            return Ok(done);
        }
        if self.pending.in_body {
            self.body_line(line);
        } else if !line.trim().is_empty() {
            self.change_line(line)?;
        }
        Ok(None)
    }

    fn flush(&mut self) -> Result<Option<GitLogEntry>, ParseError> {
        if self.pending.in_body {
            return Err(ParseError::new("log output ended inside a commit body"));
        }
        Ok(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitkeeper_core::process::{ListOutputProcessor, OutputProcessor};
    use pretty_assertions::assert_eq;

    fn header(id: &str, summary: &str, body: &str) -> String {
        format!(
            "{RECORD}{id}{FIELD}Ada{FIELD}ada@example.com{FIELD}2024-03-01T10:00:00+01:00{FIELD}{summary}{FIELD}{body}"
        )
    }

    #[test]
    fn commits_with_multiline_bodies_and_changes() {
        let lines = vec![
            header("aaa", "Add player", "First line"),
            "second line\u{1d}".to_string(),
            "A\tAssets/Player.cs".to_string(),
            "R087\tOld.cs\tNew.cs".to_string(),
            String::new(),
            header("bbb", "Initial", "\u{1d}"),
            "A\tREADME.md".to_string(),
        ];

        let mut p = ListOutputProcessor::new(LogEntryParser::new("/repo"));
        for line in &lines {
            p.line_received(line).unwrap();
        }
        let log = p.finish().unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log[0].commit_id, "aaa");
        assert_eq!(log[0].description, "First line\nsecond line");
        assert_eq!(log[0].time.to_rfc3339(), "2024-03-01T09:00:00+00:00");
        assert_eq!(log[0].changes.len(), 2);
        assert_eq!(log[0].changes[1].original_path.as_deref(), Some("Old.cs"));
        assert_eq!(log[0].changes[1].index_status, GitFileStatus::Renamed);
        assert_eq!(log[1].description, "");
        assert_eq!(log[1].changes[0].path, "README.md");
    }

    #[test]
    fn truncated_output_is_rejected() {
        let mut p = LogEntryParser::new("/repo");
        p.parse_line(&header("aaa", "s", "body without end")).unwrap();
        assert!(p.flush().is_err());

        let mut p = LogEntryParser::new("/repo");
        assert!(p.parse_line("M\tfile.txt").is_err());
    }
}
