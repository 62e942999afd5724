use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown protocol operation: {0:?}")]
    UnknownOp(String),
    #[error("Invalid arguments for {0}")]
    InvalidArguments(&'static str),
    #[error("Invalid number")]
    InvalidNumber,
    #[error("Max payload exceeded, size: {size}, max: {max}")]
    MaxPayloadExceeded { size: usize, max: usize },
    #[error("Max control line exceeded, limit: {0}")]
    MaxControlLineExceeded(usize),
    #[error("Missing CRLF after message payload")]
    MissingCrlf,
    #[error("utf8 error")]
    Utf8Error,
    #[error("Invalid INFO payload, {0}")]
    InvalidInfo(String),
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),
    #[error("Invalid queue group: {0:?}")]
    InvalidQueue(String),
    #[error("Invalid reply subject: {0:?}")]
    InvalidReply(String),
    #[error("Invalid CONNECT payload, {0}")]
    InvalidConnect(String),
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e)
    }
}
