use thiserror::Error;

/// failures reported by a [`LineSource`](crate::LineSource)
///
/// The receiver driver reacts differently to each variant: connection failures are
/// retried with a fixed backoff, transient failures skip the current cycle, and a
/// closed stream ends the receiver.
#[derive(Error, Debug)]
pub enum SourceError {
    /// the resource could not be opened (host unreachable, auth rejected, not found)
    #[error("connection failed: {0}")]
    Connection(String),

    /// an established connection was lost; the driver re-opens the source
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// a read failed mid-tail; the driver logs it and tries again next cycle
    #[error("transient I/O error: {0}")]
    Transient(#[from] std::io::Error),

    /// the stream was deliberately closed; the driver stops without retrying
    #[error("stream closed")]
    StreamClosed,
}

impl SourceError {
    /// classify an I/O error raised while polling an already-open resource
    pub fn from_poll_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => SourceError::Disconnected(err.to_string()),
            _ => SourceError::Transient(err),
        }
    }
}

/// failures loading the application configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}
