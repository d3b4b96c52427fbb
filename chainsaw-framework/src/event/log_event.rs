use chrono::{DateTime, Local, TimeZone};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// severity of a log event, in ascending order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// parse the level names used by log4j-style appenders (case-insensitive)
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "FINEST" | "FINER" => Some(Self::Trace),
            "DEBUG" | "FINE" | "CONFIG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" | "SEVERE" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// source location of the statement that produced an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: Option<String>,
    pub class: Option<String>,
    pub method: Option<String>,
    pub line: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.class.is_none() && self.method.is_none() && self.line.is_none()
    }
}

/// a single structured log event, handed to an [`EventSink`](crate::EventSink)
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub id: Uuid,
    /// event time in epoch milliseconds; `None` when the timestamp could not be parsed
    pub timestamp: Option<i64>,
    /// wall-clock time the record was decoded
    pub received_at: DateTime<Local>,
    /// name of the receiver that produced the event
    pub source: String,
    pub logger: String,
    pub level: String,
    pub thread: Option<String>,
    pub location: Location,
    /// message text, continuation lines joined with `\n`
    pub message: String,
    pub ndc: Option<String>,
    pub properties: BTreeMap<String, String>,
    /// stack-trace lines collected from the record's continuation lines
    pub throwable: Vec<String>,
    /// the original text of the logical record
    pub raw: String,
}

impl LogEvent {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: Uuid::new_v4(),
            timestamp: None,
            received_at: Local::now(),
            source: source.into(),
            logger: String::new(),
            level: String::new(),
            thread: None,
            location: Location::default(),
            raw: message.clone(),
            message,
            ndc: None,
            properties: BTreeMap::new(),
            throwable: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    /// the parsed severity, if the level text is one we know
    pub fn severity(&self) -> Option<Level> {
        Level::parse(&self.level)
    }

    /// event time in the local zone, if known
    pub fn local_time(&self) -> Option<DateTime<Local>> {
        self.timestamp
            .and_then(|millis| Local.timestamp_millis_opt(millis).single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warn));
        assert_eq!(Level::parse("SEVERE"), Some(Level::Error));
        assert_eq!(Level::parse("chatty"), None);
        assert!(Level::Error > Level::Warn);
    }

    #[test]
    fn test_local_time_from_millis() {
        let mut event = LogEvent::new("test", "hello");
        assert!(event.local_time().is_none());
        event.timestamp = Some(0);
        assert_eq!(event.local_time().map(|t| t.timestamp()), Some(0));
    }

    #[test]
    fn test_properties() {
        let event = LogEvent::new("test", "hello").with_property("host", "db1");
        assert_eq!(event.get_property("host"), Some("db1"));
        assert_eq!(event.get_property("missing"), None);
        assert_eq!(event.raw, "hello");
    }
}
