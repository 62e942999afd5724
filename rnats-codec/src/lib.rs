#![deny(unsafe_code)]

//! NATS text protocol codec
//!
//! ## Core Features:
//! - **Incremental Decoding**: Frames split at arbitrary byte boundaries decode identically
//! - **Strict Framing**: `MSG` payload lengths are validated and the trailing CRLF is enforced
//! - **Tokio Integration**: Works with `tokio_util::codec::{Framed, FramedRead}`
//! - **Subject Validation**: Publish, subscribe and queue names are checked before encoding
//!
//! ## Architecture Components:
//! - `NatsCodec`: Decoder for server operations and encoder for client operations
//! - `Parser`: Push-style wrapper for feeding raw chunks outside of a framed transport
//! - `ServerOp` / `ClientOp`: Protocol operations in each direction
//! - `types::{ServerInfo, ConnectInfo, ServerError}`: JSON payloads and `-ERR` classification
//!

#[macro_use]
mod utils;

/// Error types for encoding/decoding operations
pub mod error;

/// Protocol payload types
pub mod types;

/// Subject and queue name validation
pub mod subject;

mod codec;
mod decode;
mod encode;

use bytes::Bytes;
use bytestring::ByteString;

pub use self::codec::{NatsCodec, Parser};
pub use self::encode::encode;
pub use self::types::{ConnectInfo, ServerError, ServerInfo};

/// Default maximum length of a control line
pub const MAX_CONTROL_LINE_SIZE: usize = 4096;

/// `INFO` lines carry the server's JSON document and may be much longer
pub const MAX_INFO_LINE_SIZE: usize = 64 * 1024;

/// Default maximum payload until the server announces its own limit
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Operations sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Info(Box<ServerInfo>),
    Msg { subject: ByteString, sid: u64, reply: Option<ByteString>, payload: Bytes },
    Ping,
    Pong,
    Ok,
    Err(String),
}

impl ServerOp {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            ServerOp::Info(_) => "INFO",
            ServerOp::Msg { .. } => "MSG",
            ServerOp::Ping => "PING",
            ServerOp::Pong => "PONG",
            ServerOp::Ok => "+OK",
            ServerOp::Err(_) => "-ERR",
        }
    }
}

/// Operations sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOp {
    Connect(Box<ConnectInfo>),
    Pub { subject: ByteString, reply: Option<ByteString>, payload: Bytes },
    Sub { subject: ByteString, queue: Option<ByteString>, sid: u64 },
    Unsub { sid: u64, max: Option<u64> },
    Ping,
    Pong,
}
