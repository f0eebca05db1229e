//! Line-oriented parsers turning process stdout into typed results.

use crate::error::ParseError;

/// Receives stdout one line at a time, in order, as the process produces it.
pub trait OutputProcessor: Send + 'static {
    type Output: Send + 'static;

    fn line_received(&mut self, line: &str) -> Result<(), ParseError>;

    /// Called once after the process exited successfully.
    fn finish(&mut self) -> Result<Self::Output, ParseError>;
}

/// Whole stdout as one string, lines joined by `\n`.
#[derive(Debug, Default)]
pub struct SimpleOutputProcessor {
    lines: Vec<String>,
}

impl SimpleOutputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProcessor for SimpleOutputProcessor {
    type Output = String;

    fn line_received(&mut self, line: &str) -> Result<(), ParseError> {
        self.lines.push(line.to_string());
        Ok(())
    }

    fn finish(&mut self) -> Result<String, ParseError> {
        Ok(std::mem::take(&mut self.lines).join("\n"))
    }
}

/// First non-empty line, trimmed.
#[derive(Debug, Default)]
pub struct FirstLineOutputProcessor {
    first: Option<String>,
}

impl FirstLineOutputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProcessor for FirstLineOutputProcessor {
    type Output = Option<String>;

    fn line_received(&mut self, line: &str) -> Result<(), ParseError> {
        if self.first.is_none() && !line.trim().is_empty() {
            self.first = Some(line.trim().to_string());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<String>, ParseError> {
        Ok(self.first.take())
    }
}

/// Incremental parser for multi-record output such as `git log`.
pub trait EntryParser: Send + 'static {
    type Entry: Send + 'static;

    /// Feed one line; returns an entry when the line completes a record.
    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Entry>, ParseError>;

    /// End of stream; returns the pending record, if any.
    fn flush(&mut self) -> Result<Option<Self::Entry>, ParseError>;
}

type EntryCallback<E> = Box<dyn FnMut(&E) + Send>;

/// Collects the entries of an [`EntryParser`], announcing each one as soon
/// as it is complete.
pub struct ListOutputProcessor<P: EntryParser> {
    parser: P,
    entries: Vec<P::Entry>,
    on_entry: Option<EntryCallback<P::Entry>>,
}

impl<P: EntryParser> ListOutputProcessor<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            entries: Vec::new(),
            on_entry: None,
        }
    }

    pub fn on_entry<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&P::Entry) + Send + 'static,
    {
        self.on_entry = Some(Box::new(callback));
        self
    }

    fn push(&mut self, entry: P::Entry) {
        if let Some(cb) = self.on_entry.as_mut() {
            cb(&entry);
        }
        self.entries.push(entry);
    }
}

impl<P: EntryParser> OutputProcessor for ListOutputProcessor<P> {
    type Output = Vec<P::Entry>;

    fn line_received(&mut self, line: &str) -> Result<(), ParseError> {
        if let Some(entry) = self.parser.parse_line(line)? {
            self.push(entry);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<P::Entry>, ParseError> {
        if let Some(entry) = self.parser.flush()? {
            self.push(entry);
        }
        Ok(std::mem::take(&mut self.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records separated by blank lines; `!` is malformed.
    struct Paragraphs {
        pending: Vec<String>,
    }

    impl EntryParser for Paragraphs {
        type Entry = String;

        fn parse_line(&mut self, line: &str) -> Result<Option<String>, ParseError> {
            if line == "!" {
                return Err(ParseError::new("bang"));
            }
            if line.is_empty() {
                return self.flush();
            }
            self.pending.push(line.to_string());
            Ok(None)
        }

        fn flush(&mut self) -> Result<Option<String>, ParseError> {
            if self.pending.is_empty() {
                return Ok(None);
            }
            Ok(Some(std::mem::take(&mut self.pending).join(" ")))
        }
    }

    #[test]
    fn list_processor_announces_entries_before_end_of_stream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut p = ListOutputProcessor::new(Paragraphs { pending: Vec::new() })
            .on_entry(move |e: &String| sink.lock().unwrap().push(e.clone()));

        for line in ["a", "b", "", "c"] {
            p.line_received(line).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a b".to_string()]);

        assert_eq!(p.finish().unwrap(), vec!["a b".to_string(), "c".to_string()]);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn parse_errors_surface() {
        let mut p = ListOutputProcessor::new(Paragraphs { pending: Vec::new() });
        assert_eq!(p.line_received("!"), Err(ParseError::new("bang")));
    }

    #[test]
    fn stock_processors() {
        let mut simple = SimpleOutputProcessor::new();
        simple.line_received("one").unwrap();
        simple.line_received("two").unwrap();
        assert_eq!(simple.finish().unwrap(), "one\ntwo");

        let mut first = FirstLineOutputProcessor::new();
        first.line_received("").unwrap();
        first.line_received("  main ").unwrap();
        first.line_received("other").unwrap();
        assert_eq!(first.finish().unwrap().as_deref(), Some("main"));
    }
}
