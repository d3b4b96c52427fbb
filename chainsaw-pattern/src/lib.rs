//! # chainsaw-pattern
//!
//! Turns raw log lines into structured events using a log-format template:
//!
//! - [`CompiledFormat`]: `TIMESTAMP LEVEL [THREAD] LOGGER - MESSAGE` style templates
//! - [`TimestampParser`]: `yyyy-MM-dd HH:mm:ss,SSS` style patterns or `RELATIVETIME`
//! - [`LineAssembler`]: folds continuation lines and stack traces into one record
//! - [`PatternDecoder`]: all of the above behind the framework's `LineDecoder`

pub mod assembler;
pub mod decoder;
pub mod error;
pub mod format;
pub mod timestamp;

pub use assembler::{LineAssembler, LogicalRecord};
pub use decoder::PatternDecoder;
pub use error::{FormatError, TimestampError};
pub use format::{CompiledFormat, Field, ParsedFields};
pub use timestamp::{RELATIVE_TIME, RelativeClock, TimestampFormat, TimestampParser};
