use crate::assembler::{LineAssembler, LogicalRecord};
use crate::error::FormatError;
use crate::format::{CompiledFormat, Field};
use crate::timestamp::{RelativeClock, TimestampParser};
use chainsaw_framework::{ConnectionConfig, LineDecoder, Location, LogEvent};

const UNKNOWN_LOGGER: &str = "Unknown";
const DEFAULT_LEVEL: &str = "DEBUG";

/// decodes raw lines into events using a log-format template
#[derive(Debug)]
pub struct PatternDecoder {
    source: String,
    assembler: LineAssembler,
    timestamp: TimestampParser,
    /// used when the template has RELATIVETIME but no TIMESTAMP
    relative: RelativeClock,
}

impl PatternDecoder {
    pub fn new(
        source: impl Into<String>,
        log_format: &str,
        timestamp_format: &str,
        append_non_matches: bool,
    ) -> Result<Self, FormatError> {
        let timestamp = TimestampParser::compile(timestamp_format)?;
        let format = CompiledFormat::compile_with_timestamp(log_format, &timestamp)?;
        Ok(Self {
            source: source.into(),
            assembler: LineAssembler::new(format, append_non_matches),
            timestamp,
            relative: RelativeClock::new(),
        })
    }

    pub fn from_config(source: impl Into<String>, config: &ConnectionConfig) -> Result<Self, FormatError> {
        Self::new(
            source,
            &config.log_format,
            &config.timestamp_format,
            config.append_non_matches,
        )
    }

    pub fn format(&self) -> &CompiledFormat {
        self.assembler.format()
    }

    fn to_event(&mut self, mut record: LogicalRecord) -> LogEvent {
        let mut event = LogEvent::new(self.source.as_str(), std::mem::take(&mut record.message));
        event.raw = std::mem::take(&mut record.raw);
        event.throwable = std::mem::take(&mut record.throwable);
        event.timestamp = self.resolve_timestamp(&record, event.received_at.timestamp_millis());

        let mut take = |field: Field| record.fields.remove(&field);

        let class = take(Field::Class);
        event.logger = take(Field::Logger)
            .or_else(|| class.clone())
            .unwrap_or_else(|| UNKNOWN_LOGGER.to_string());
        event.level = take(Field::Level)
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
        event.thread = take(Field::Thread);
        event.ndc = take(Field::Ndc);
        event.location = Location {
            file: take(Field::File),
            class,
            method: take(Field::Method),
            line: take(Field::Line),
        };

        for (field, value) in record.fields.drain() {
            if let Field::Prop(key) = field {
                event.properties.insert(key, value);
            }
        }
        event
    }

    fn resolve_timestamp(&mut self, record: &LogicalRecord, received_at: i64) -> Option<i64> {
        let result = if let Some(text) = record.field(&Field::Timestamp) {
            self.timestamp.parse_at(text, received_at)
        } else if let Some(text) = record.field(&Field::RelativeTime) {
            self.relative.resolve(text, received_at)
        } else {
            return None;
        };

        match result {
            Ok(millis) => Some(millis),
            Err(e) => {
                log::debug!("PatternDecoder '{}': {}", self.source, e);
                None
            }
        }
    }
}

impl LineDecoder for PatternDecoder {
    fn decode(&mut self, line: &str) -> Vec<LogEvent> {
        match self.assembler.feed(line) {
            Some(record) => vec![self.to_event(record)],
            None => Vec::new(),
        }
    }

    fn flush(&mut self) -> Vec<LogEvent> {
        match self.assembler.flush() {
            Some(record) => vec![self.to_event(record)],
            None => Vec::new(),
        }
    }
}
