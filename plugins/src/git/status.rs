//! `git status --porcelain -b` output.

use std::path::PathBuf;

use gitkeeper_core::error::ParseError;
use gitkeeper_core::git::{GitFileStatus, GitStatus, GitStatusEntry};
use gitkeeper_core::process::OutputProcessor;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `## main...origin/main [ahead 1, behind 2]`
    static ref BRANCH_RE: Regex = Regex::new(
        r"^## (?:No commits yet on |Initial commit on )?(?P<local>[^ .]+(?:\.[^ .]+)*?)(?:\.\.\.(?P<remote>\S+))?(?: \[(?P<track>[^\]]*)\])?$"
    )
    .expect("BRANCH_RE is valid");
    static ref AHEAD_RE: Regex = Regex::new(r"ahead (\d+)").expect("AHEAD_RE is valid");
    static ref BEHIND_RE: Regex = Regex::new(r"behind (\d+)").expect("BEHIND_RE is valid");
}

pub struct StatusOutputProcessor {
    root: PathBuf,
    status: GitStatus,
}

impl StatusOutputProcessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            status: GitStatus::default(),
        }
    }

    fn branch_line(&mut self, line: &str) -> Result<(), ParseError> {
        if line.starts_with("## HEAD (no branch)") {
            return Ok(());
        }
        let caps = BRANCH_RE
            .captures(line)
            .ok_or_else(|| ParseError::new(format!("unexpected branch line: {line}")))?;
        self.status.local_branch = caps.name("local").map(|m| m.as_str().to_string());
        self.status.remote_branch = caps.name("remote").map(|m| m.as_str().to_string());
        if let Some(track) = caps.name("track").map(|m| m.as_str()) {
            let count = |re: &Regex| {
                re.captures(track)
                    .and_then(|c| c[1].parse::<u32>().ok())
                    .unwrap_or(0)
            };
            self.status.ahead = count(&AHEAD_RE);
            self.status.behind = count(&BEHIND_RE);
        }
        Ok(())
    }

    fn entry_line(&mut self, line: &str) -> Result<(), ParseError> {
        let mut chars = line.chars();
        let (Some(x), Some(y), Some(' ')) = (chars.next(), chars.next(), chars.next()) else {
            return Err(ParseError::new(format!("malformed status line: {line}")));
        };
        let rest = chars.as_str();

        let (index_status, work_tree_status) = match (x, y) {
            ('?', '?') => (GitFileStatus::None, GitFileStatus::Untracked),
            ('!', '!') => (GitFileStatus::None, GitFileStatus::Ignored),
            (x, y) => (GitFileStatus::from_porcelain(x), GitFileStatus::from_porcelain(y)),
        };

        let (original, path) = match rest.split_once(" -> ") {
            Some((from, to)) if matches!(x, 'R' | 'C') => (Some(unquote(from)), unquote(to)),
            _ => (None, unquote(rest)),
        };
        if path.is_empty() {
            return Err(ParseError::new(format!("status line without a path: {line}")));
        }

        let mut entry = GitStatusEntry::new(&self.root, path, index_status, work_tree_status);
        entry.original_path = original;
        self.status.entries.push(entry);
        Ok(())
    }
}

impl OutputProcessor for StatusOutputProcessor {
    type Output = GitStatus;

    fn line_received(&mut self, line: &str) -> Result<(), ParseError> {
        if line.is_empty() {
            Ok(())
        } else if line.starts_with("## ") {
            self.branch_line(line)
        } else {
            self.entry_line(line)
        }
    }

    fn finish(&mut self) -> Result<GitStatus, ParseError> {
        Ok(std::mem::take(&mut self.status))
    }
}

/// Strip the quotes git puts around paths with special bytes. Spaces are
/// part of the name; callers have already split off the separators.
pub(crate) fn unquote(path: &str) -> String {
    match path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(lines: &[&str]) -> GitStatus {
        let mut p = StatusOutputProcessor::new("/repo");
        for line in lines {
            p.line_received(line).unwrap();
        }
        p.finish().unwrap()
    }

    #[test]
    fn branch_header_with_tracking_counts() {
        let status = parse(&["## feature/x.y...origin/feature/x.y [ahead 2, behind 5]"]);
        assert_eq!(status.local_branch.as_deref(), Some("feature/x.y"));
        assert_eq!(status.remote_branch.as_deref(), Some("origin/feature/x.y"));
        assert_eq!((status.ahead, status.behind), (2, 5));

        let fresh = parse(&["## No commits yet on main"]);
        assert_eq!(fresh.local_branch.as_deref(), Some("main"));
        assert_eq!(fresh.remote_branch, None);

        let detached = parse(&["## HEAD (no branch)"]);
        assert_eq!(detached.local_branch, None);
    }

    #[test]
    fn entries_keep_both_sides_and_renames() {
        let status = parse(&[
            "## main",
            "M  Assets/Staged.cs",
            " M Assets/Changed.cs",
            "?? \"Assets/With Space.png\"",
            "R  Old.txt -> New.txt",
            "A  Added.meta",
        ]);
        let e = &status.entries;
        assert_eq!(e.len(), 5);
        assert!(e[0].is_staged());
        assert_eq!(e[1].status(), GitFileStatus::Modified);
        assert!(!e[1].is_staged());
        assert_eq!(e[2].path, "Assets/With Space.png");
        assert!(e[2].has_no_committed_version());
        assert_eq!(e[3].original_path.as_deref(), Some("Old.txt"));
        assert_eq!(e[3].path, "New.txt");
        assert!(e[4].has_no_committed_version());
        assert_eq!(e[4].full_path, PathBuf::from("/repo/Added.meta"));
    }

    #[test]
    fn edge_spaces_belong_to_the_path() {
        let status = parse(&["?? \" padded.txt \"", " M trailing.txt ", "R  a.txt ->  b.txt"]);
        let paths: Vec<_> = status.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec![" padded.txt ", "trailing.txt ", " b.txt"]);
        assert_eq!(status.entries[2].original_path.as_deref(), Some("a.txt"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let mut p = StatusOutputProcessor::new("/repo");
        assert!(p.line_received("XY").is_err());
    }
}
