use crate::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// An undecodable datagram, an unknown type tag, or a message that arrived on the wrong channel
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("frame of {size} bytes exceeds the {max} bytes limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("no replica available for {0:?}")]
    NoReplicas(String),

    #[error("no peer available to forward the request to")]
    NoForwardTarget,
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        Error::MalformedMessage(value.to_string())
    }
}
