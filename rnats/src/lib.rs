#![deny(unsafe_code)]

//! Asynchronous NATS client
//!
//! ## Core Features:
//! - **Failover**: Servers from the configured list and from cluster discovery are tried in turn
//! - **Reconnect**: Lost transports are replaced transparently; subscriptions are replayed and
//!   publishes issued meanwhile are buffered and sent after them
//! - **Flow Control**: Every subscription queues messages up to its pending limits, beyond
//!   which messages are dropped and reported as slow consumer
//! - **Request/Reply**: Unique inboxes with bounded waiting
//!
//! ```no_run
//! # async fn run() -> rnats::Result<()> {
//! let conn = rnats::connect("nats://127.0.0.1:4222", rnats::Options::new()).await?;
//! let sub = conn.subscribe("updates.>")?;
//! conn.publish("updates.a", "hello")?;
//! let msg = sub.next_message().await?;
//! println!("{}", msg);
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod error;
mod event;
mod message;
mod options;
mod registry;
mod request;
mod server_pool;
mod stats;
mod subscription;

pub use client::{Publisher, Subscriber};
pub use connection::{connect, Connection, Status};
pub use error::Error;
pub use event::{ConnectionCallback, ErrorCallback, Event, EventHandler};
pub use message::Message;
pub use options::{
    Options, DEFAULT_MAX_RECONNECT, DEFAULT_PENDING_BYTES_LIMIT, DEFAULT_PENDING_MSGS_LIMIT,
    DEFAULT_RECONNECT_BUF_SIZE, DEFAULT_WRITE_BUF_SIZE,
};
pub use request::{new_inbox, INBOX_PREFIX};
pub use rnats_codec::ServerInfo;
pub use rnats_net::ServerAddr;
pub use stats::Statistics;
pub use subscription::{MessageHandler, Subscription};

pub type Result<T> = std::result::Result<T, Error>;
