//! Multi-line record assembly.
//!
//! A line matching the template starts a record; following lines that do not
//! match are continuation lines (multi-line messages, stack traces) and are
//! appended to it. The record is complete once the next matching line arrives or
//! the stream is flushed.

use crate::format::{CompiledFormat, Field, ParsedFields};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "\tat com.acme.Foo.bar(Foo.java:42)"
    static ref STACK_TRACE_RE: Regex = Regex::new(r"^\s+at\b").unwrap();
}

/// one complete log record, possibly spanning several raw lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRecord {
    pub fields: ParsedFields,
    /// MESSAGE capture with continuation lines appended, `\n` separated
    pub message: String,
    /// stack-trace continuation lines
    pub throwable: Vec<String>,
    /// the raw lines of the record, `\n` separated
    pub raw: String,
    /// the record did not match the template and wraps a raw line
    pub unparsed: bool,
}

impl LogicalRecord {
    fn parsed(mut fields: ParsedFields, line: &str) -> Self {
        let message = fields.remove(&Field::Message).unwrap_or_default();
        Self {
            fields,
            message,
            throwable: Vec::new(),
            raw: line.to_string(),
            unparsed: false,
        }
    }

    fn unparsed(line: &str) -> Self {
        Self {
            fields: ParsedFields::new(),
            message: line.to_string(),
            throwable: Vec::new(),
            raw: line.to_string(),
            unparsed: true,
        }
    }

    fn append(&mut self, line: &str) {
        if STACK_TRACE_RE.is_match(line) {
            self.throwable.push(line.trim_end().to_string());
        }
        self.message.push('\n');
        self.message.push_str(line);
        self.raw.push('\n');
        self.raw.push_str(line);
    }

    pub fn field(&self, field: &Field) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// line-at-a-time state machine: empty, or accumulating one pending record
#[derive(Debug)]
pub struct LineAssembler {
    format: CompiledFormat,
    append_non_matches: bool,
    pending: Option<LogicalRecord>,
}

impl LineAssembler {
    pub fn new(format: CompiledFormat, append_non_matches: bool) -> Self {
        Self {
            format,
            append_non_matches,
            pending: None,
        }
    }

    pub fn format(&self) -> &CompiledFormat {
        &self.format
    }

    pub fn is_accumulating(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one raw line; returns the previous record when this line starts a new one.
    pub fn feed(&mut self, line: &str) -> Option<LogicalRecord> {
        if line.trim().is_empty() {
            return None;
        }

        if let Some(fields) = self.format.parse(line) {
            return self.pending.replace(LogicalRecord::parsed(fields, line));
        }

        match self.pending.as_mut() {
            Some(record) => record.append(line),
            None if self.append_non_matches => {
                self.pending = Some(LogicalRecord::unparsed(line));
            }
            None => {
                log::debug!("LineAssembler: discarding unmatched line: {}", line);
            }
        }
        None
    }

    /// end of stream: hand out the pending record, if any
    pub fn flush(&mut self) -> Option<LogicalRecord> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(append_non_matches: bool) -> LineAssembler {
        let format = CompiledFormat::compile("[LEVEL] MESSAGE").unwrap();
        LineAssembler::new(format, append_non_matches)
    }

    #[test]
    fn test_two_records_with_continuations() {
        let mut asm = assembler(false);
        assert!(asm.feed("[INFO] first").is_none());
        assert!(asm.feed("cont one").is_none());
        assert!(asm.feed("cont two").is_none());

        let first = asm.feed("[WARN] second").unwrap();
        assert_eq!(first.message, "first\ncont one\ncont two");
        assert_eq!(first.field(&Field::Level), Some("INFO"));
        assert!(first.throwable.is_empty());

        let second = asm.flush().unwrap();
        assert_eq!(second.message, "second");
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_stack_trace_lines_become_throwable() {
        let mut asm = assembler(false);
        asm.feed("[ERROR] boom");
        asm.feed("java.lang.IllegalStateException: nope");
        asm.feed("\tat com.acme.Foo.bar(Foo.java:42)");
        asm.feed("    at com.acme.Main.main(Main.java:7)");

        let record = asm.flush().unwrap();
        assert_eq!(
            record.throwable,
            vec![
                "\tat com.acme.Foo.bar(Foo.java:42)",
                "    at com.acme.Main.main(Main.java:7)"
            ]
        );
        assert_eq!(record.message.lines().count(), 4);
        assert_eq!(record.raw.lines().next(), Some("[ERROR] boom"));
    }

    #[test]
    fn test_first_unmatched_line_is_discarded() {
        let mut asm = assembler(false);
        assert!(asm.feed("garbage before any record").is_none());
        assert!(!asm.is_accumulating());
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_first_unmatched_line_is_wrapped() {
        let mut asm = assembler(true);
        asm.feed("garbage before any record");
        let record = asm.feed("[INFO] real").unwrap();
        assert!(record.unparsed);
        assert_eq!(record.message, "garbage before any record");
        assert!(record.fields.is_empty());
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut asm = assembler(false);
        asm.feed("[INFO] a");
        asm.feed("");
        asm.feed("   ");
        assert_eq!(asm.flush().unwrap().message, "a");
    }
}
