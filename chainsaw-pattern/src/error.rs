use thiserror::Error;

/// a log-format template that cannot be compiled
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("log format template is empty")]
    Empty,

    #[error("log format template contains no fields")]
    NoFields,

    #[error("MESSAGE must be the last field in the template")]
    MessageNotLast,

    #[error("field {0} appears more than once")]
    DuplicateField(String),

    #[error("unterminated PROP( in template")]
    UnterminatedProperty,

    #[error("PROP() needs a key")]
    EmptyPropertyKey,

    #[error("template does not compile to a valid matcher: {0}")]
    Regex(String),

    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

/// timestamp pattern and value errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("unsupported timestamp pattern letter '{0}'")]
    UnsupportedPattern(char),

    #[error("unterminated quote in timestamp pattern")]
    UnterminatedQuote,

    #[error("timestamp pattern is empty")]
    EmptyPattern,

    #[error("cannot parse '{text}' as a timestamp: {reason}")]
    Parse { text: String, reason: String },

    #[error("'{0}' is not a relative time in milliseconds")]
    InvalidRelativeTime(String),
}
