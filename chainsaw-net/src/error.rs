use chainsaw_framework::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot join multicast group {group}: {source}")]
    Multicast {
        group: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start reader thread: {0}")]
    Spawn(std::io::Error),
}

impl From<NetError> for SourceError {
    fn from(err: NetError) -> Self {
        SourceError::Connection(err.to_string())
    }
}
