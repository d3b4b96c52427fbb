use chainsaw_framework::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("invalid URI '{0}'")]
    InvalidUri(String),

    #[error("no file system registered for scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("{0} requires credentials")]
    MissingCredentials(String),

    #[error("authentication failed for {uri}: {reason}")]
    Auth { uri: String, reason: String },

    #[error("cannot open {uri}: {source}")]
    Open {
        uri: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<VfsError> for SourceError {
    fn from(err: VfsError) -> Self {
        SourceError::Connection(err.to_string())
    }
}
