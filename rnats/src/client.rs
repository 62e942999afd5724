use std::time::Duration;

use bytes::Bytes;

use crate::{Connection, Message, Result, Status, Subscription};

/// Receiving side of a client
#[async_trait::async_trait]
pub trait Subscriber: Sync + Send {
    fn status(&self) -> Status;

    fn subscribe(&self, subject: &str) -> Result<Subscription>;

    fn queue_subscribe(&self, subject: &str, queue: &str) -> Result<Subscription>;

    async fn flush(&self) -> Result<()>;

    async fn close(&self);
}

/// Sending side of a client
#[async_trait::async_trait]
pub trait Publisher: Subscriber {
    fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    fn publish_with_reply(&self, subject: &str, reply: &str, payload: Bytes) -> Result<()>;

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message>;
}

#[async_trait::async_trait]
impl Subscriber for Connection {
    #[inline]
    fn status(&self) -> Status {
        Connection::status(self)
    }

    #[inline]
    fn subscribe(&self, subject: &str) -> Result<Subscription> {
        Connection::subscribe(self, subject)
    }

    #[inline]
    fn queue_subscribe(&self, subject: &str, queue: &str) -> Result<Subscription> {
        Connection::queue_subscribe(self, subject, queue)
    }

    #[inline]
    async fn flush(&self) -> Result<()> {
        Connection::flush(self).await
    }

    #[inline]
    async fn close(&self) {
        Connection::close(self).await
    }
}

#[async_trait::async_trait]
impl Publisher for Connection {
    #[inline]
    fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        Connection::publish(self, subject, payload)
    }

    #[inline]
    fn publish_with_reply(&self, subject: &str, reply: &str, payload: Bytes) -> Result<()> {
        Connection::publish_with_reply(self, subject, reply, payload)
    }

    #[inline]
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        Connection::request(self, subject, payload, timeout).await
    }
}
