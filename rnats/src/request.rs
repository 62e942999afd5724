use std::time::Duration;

use bytes::Bytes;
use rand::distr::{Alphanumeric, SampleString};

use crate::{Connection, Message, Result};

pub const INBOX_PREFIX: &str = "_INBOX.";
const INBOX_ID_LEN: usize = 22;

/// Unique reply subject: `_INBOX.` followed by 22 base-62 characters
#[inline]
pub fn new_inbox() -> String {
    let mut inbox = String::with_capacity(INBOX_PREFIX.len() + INBOX_ID_LEN);
    inbox.push_str(INBOX_PREFIX);
    Alphanumeric.append_string(&mut rand::rng(), &mut inbox, INBOX_ID_LEN);
    inbox
}

impl Connection {
    #[inline]
    pub fn new_inbox(&self) -> String {
        new_inbox()
    }

    /// Publishes `payload` with a fresh inbox as reply subject and waits up
    /// to `timeout` for the first answer.
    ///
    /// The inbox subscription is removed whatever the outcome.
    pub async fn request(&self, subject: &str, payload: impl Into<Bytes>, timeout: Duration) -> Result<Message> {
        let inbox = new_inbox();
        let sub = self.subscribe(&inbox)?;
        let res = async {
            sub.auto_unsubscribe(1)?;
            self.publish_with_reply(subject, &inbox, payload)?;
            sub.next_message_timeout(timeout).await
        }
        .await;
        if sub.is_valid() {
            if let Err(e) = sub.unsubscribe() {
                log::debug!("unsubscribe of {} failed, {}", inbox, e);
            }
        }
        res
    }

    /// [`request`](Self::request) bounded by `Options::request_timeout`
    #[inline]
    pub async fn request_default(&self, subject: &str, payload: impl Into<Bytes>) -> Result<Message> {
        self.request(subject, payload, self.options().request_timeout).await
    }
}
