use rnats_codec::error::{DecodeError, EncodeError};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Protocol decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),
    /// Protocol encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),
    #[error("Invalid server url: {0}")]
    InvalidUrl(String),
    /// Connect timeout
    #[error("Connect timeout")]
    ConnectTimeout,
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("Flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
    #[error("Connection closed by server")]
    Disconnected,
    #[error("Unexpected protocol operation {0} during handshake")]
    UnexpectedOp(&'static str),
    /// `-ERR` received while connecting
    #[error("Server error: {0}")]
    Server(String),
    #[error("TLS is required but support is not enabled")]
    TlsNotEnabled,
    #[error("TLS error: {0}")]
    Tls(String),
}
