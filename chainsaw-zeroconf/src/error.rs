use chainsaw_pattern::FormatError;
use thiserror::Error;

/// misuse of the registry or a descriptor it cannot serve
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{0} is already connected")]
    AlreadyConnected(String),

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("invalid log format: {0}")]
    Format(#[from] FormatError),

    #[error("unsupported decoder '{0}': only line-oriented text is supported")]
    UnsupportedDecoder(String),

    #[error("invalid service descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("cannot create source: {0}")]
    Source(String),
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    #[error("cannot browse {service_type}: {reason}")]
    Browse { service_type: String, reason: String },
}

/// credential negotiation ended without credentials; the source is never opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no credential provider available for {0}")]
    NoProvider(String),

    #[error("credentials declined for {0}")]
    Declined(String),

    #[error("negotiation for {0} was cancelled")]
    Cancelled(String),

    #[error("cannot negotiate credentials for {0}: {1}")]
    Unavailable(String, String),
}
