use rnats_codec::error::{DecodeError, EncodeError};
use rnats_net::NetError;

/// Client errors
///
/// Errors are cloneable: the same value is kept as the connection's last
/// error and handed to the error callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed or unexpected data from the server
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Transport failure: connect, read or write
    #[error("connection error: {0}")]
    Io(String),
    #[error("no servers available for connection")]
    NoServers,
    #[error("maximum reconnect attempts exceeded")]
    MaxReconnects,
    #[error("connection disconnected")]
    Disconnected,
    #[error("stale connection")]
    StaleConnection,
    /// Messages were dropped because the subscription's pending limits were hit
    #[error("slow consumer, messages dropped on subscription {0}")]
    SlowConsumer(u64),
    #[error("reconnect buffer exceeded")]
    ReconnectBufferExceeded,
    /// The writer task has not caught up with queued publishes
    #[error("write buffer exceeded")]
    WriteBufferExceeded,
    #[error("maximum payload exceeded, size: {size}, max: {max}")]
    MaxPayload { size: usize, max: usize },
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid subscription")]
    BadSubscription,
    #[error("timeout")]
    Timeout,
    /// `-ERR` sent by the server
    #[error("server error: {0}")]
    Server(String),
    /// A message handler panicked
    #[error("message handler failed: {0}")]
    Callback(String),
}

impl Error {
    /// Connectivity errors end a transport session and trigger a reconnect
    #[inline]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Disconnected | Error::StaleConnection | Error::NoServers | Error::MaxReconnects
        )
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::InvalidSubject(s) | EncodeError::InvalidReply(s) => Error::InvalidSubject(s),
            EncodeError::InvalidQueue(q) => Error::InvalidArgument(format!("invalid queue group {:?}", q)),
            EncodeError::InvalidConnect(e) => Error::Protocol(e),
            EncodeError::Io(e) => Error::Io(e.to_string()),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Io(e) => Error::Io(e.to_string()),
            e => Error::Protocol(e.to_string()),
        }
    }
}

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Decode(e) => e.into(),
            NetError::Encode(e) => e.into(),
            NetError::Server(e) => Error::Server(e),
            NetError::UnexpectedOp(op) => Error::Protocol(format!("unexpected {} during handshake", op)),
            NetError::InvalidUrl(e) => Error::InvalidArgument(e),
            e => Error::Io(e.to_string()),
        }
    }
}

/// Transport errors arrive as `anyhow::Error`
impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<NetError>() {
            Ok(e) => e.into(),
            Err(e) => match e.downcast::<EncodeError>() {
                Ok(e) => e.into(),
                Err(e) => Error::Io(e.to_string()),
            },
        }
    }
}
