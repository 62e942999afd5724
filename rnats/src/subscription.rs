use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytestring::ByteString;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::options::check_pending_limits;
use crate::{Connection, Error, Event, Message, Result};

pub trait MessageHandler: 'static + Sync + Send + Fn(Message) {}
impl<T> MessageHandler for T where T: 'static + Sync + Send + Fn(Message) {}

/// Why a subscription stopped accepting messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Unsubscribed,
    ConnectionClosed,
}

impl From<CloseReason> for Error {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Unsubscribed => Error::BadSubscription,
            CloseReason::ConnectionClosed => Error::ConnectionClosed,
        }
    }
}

/// Outcome of routing one message to a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// Pending limits hit; `first` marks the start of a slow-consumer episode
    Dropped { first: bool },
    /// Closed, or past the auto-unsubscribe maximum
    Discarded,
}

#[derive(Debug, Default)]
struct SubState {
    pending: VecDeque<Message>,
    pending_bytes: usize,
    msgs_limit: Option<usize>,
    bytes_limit: Option<usize>,
    // high-water marks
    msgs_max: usize,
    bytes_max: usize,
    // accepted or dropped, counted against `max`
    received: u64,
    delivered: u64,
    dropped: u64,
    max: Option<u64>,
    slow_consumer: bool,
    closed: Option<CloseReason>,
}

impl SubState {
    #[inline]
    fn check_open(&self) -> Result<()> {
        match self.closed {
            Some(reason) => Err(reason.into()),
            None => Ok(()),
        }
    }

    /// Auto-unsubscribe maximum reached and everything handed over
    #[inline]
    fn is_finished(&self) -> bool {
        self.closed.is_none() && self.pending.is_empty() && self.max.is_some_and(|max| self.received >= max)
    }

    fn pop(&mut self) -> Option<Message> {
        let msg = self.pending.pop_front()?;
        self.pending_bytes -= msg.payload.len();
        self.delivered += 1;
        Some(msg)
    }
}

pub(crate) struct SubscriptionInner {
    pub(crate) sid: u64,
    pub(crate) subject: ByteString,
    pub(crate) queue: Option<ByteString>,
    /// Messages are consumed by a handler task
    pub(crate) is_async: bool,
    state: Mutex<SubState>,
    notify: Notify,
}

impl SubscriptionInner {
    pub(crate) fn new(
        sid: u64,
        subject: ByteString,
        queue: Option<ByteString>,
        is_async: bool,
        msgs_limit: Option<usize>,
        bytes_limit: Option<usize>,
    ) -> Self {
        SubscriptionInner {
            sid,
            subject,
            queue,
            is_async,
            state: Mutex::new(SubState { msgs_limit, bytes_limit, ..Default::default() }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn deliver(&self, msg: Message) -> Delivery {
        let mut st = self.state.lock();
        if st.closed.is_some() || st.max.is_some_and(|max| st.received >= max) {
            return Delivery::Discarded;
        }
        st.received += 1;

        let size = msg.payload.len();
        let over_msgs = st.msgs_limit.is_some_and(|limit| st.pending.len() >= limit);
        let over_bytes = st.bytes_limit.is_some_and(|limit| st.pending_bytes + size > limit);
        if over_msgs || over_bytes {
            st.dropped += 1;
            let first = !st.slow_consumer;
            st.slow_consumer = true;
            return Delivery::Dropped { first };
        }

        st.slow_consumer = false;
        st.pending.push_back(msg);
        st.pending_bytes += size;
        st.msgs_max = st.msgs_max.max(st.pending.len());
        st.bytes_max = st.bytes_max.max(st.pending_bytes);
        drop(st);
        self.notify.notify_one();
        Delivery::Queued
    }

    /// Next queued message and whether the subscription is now finished
    pub(crate) fn try_next(&self) -> Result<Option<(Message, bool)>> {
        let mut st = self.state.lock();
        match st.pop() {
            Some(msg) => Ok(Some((msg, st.is_finished()))),
            None => st.check_open().map(|_| None),
        }
    }

    /// Waits for a message; fails as soon as the subscription is closed.
    pub(crate) async fn wait_next(&self) -> Result<(Message, bool)> {
        loop {
            let notified = self.notify.notified();
            if let Some(next) = self.try_next()? {
                return Ok(next);
            }
            notified.await;
        }
    }

    /// Closes the subscription, discarding queued messages and waking every
    /// waiter. Returns false when it was already closed.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let mut st = self.state.lock();
        if st.closed.is_some() {
            return false;
        }
        st.closed = Some(reason);
        st.pending.clear();
        st.pending_bytes = 0;
        drop(st);
        self.notify.notify_waiters();
        true
    }

    #[inline]
    pub(crate) fn check_open(&self) -> Result<()> {
        self.state.lock().check_open()
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }

    pub(crate) fn set_max(&self, max: u64) -> Result<()> {
        let mut st = self.state.lock();
        st.check_open()?;
        st.max = Some(max);
        Ok(())
    }

    /// Messages still expected from the server under auto-unsubscribe
    #[inline]
    pub(crate) fn remaining(&self) -> Option<u64> {
        let st = self.state.lock();
        st.max.map(|max| max.saturating_sub(st.received))
    }

    pub(crate) fn set_pending_limits(&self, msgs: Option<usize>, bytes: Option<usize>) -> Result<()> {
        check_pending_limits(msgs, bytes)?;
        let mut st = self.state.lock();
        st.check_open()?;
        st.msgs_limit = msgs;
        st.bytes_limit = bytes;
        Ok(())
    }

    #[inline]
    fn with_state<T>(&self, f: impl FnOnce(&mut SubState) -> T) -> T {
        f(&mut self.state.lock())
    }
}

/// Handle to a subscription
///
/// Cloning is cheap; every clone refers to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) inner: Arc<SubscriptionInner>,
    pub(crate) conn: Connection,
}

impl Subscription {
    #[inline]
    pub fn sid(&self) -> u64 {
        self.inner.sid
    }

    #[inline]
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    #[inline]
    pub fn queue(&self) -> Option<&str> {
        self.inner.queue.as_deref()
    }

    /// Waits for the next message.
    ///
    /// Fails with [`Error::BadSubscription`] once unsubscribed and with
    /// [`Error::ConnectionClosed`] once the connection is closed, including
    /// while waiting.
    pub async fn next_message(&self) -> Result<Message> {
        self.check_sync()?;
        let (msg, finished) = self.inner.wait_next().await?;
        if finished {
            self.conn.remove_subscription(self.inner.sid);
        }
        Ok(msg)
    }

    /// Like [`next_message`](Self::next_message), failing with [`Error::Timeout`]
    /// when nothing arrives within `timeout`.
    pub async fn next_message_timeout(&self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, self.next_message()).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Returns a queued message without waiting
    pub fn try_next_message(&self) -> Result<Option<Message>> {
        self.check_sync()?;
        match self.inner.try_next()? {
            Some((msg, finished)) => {
                if finished {
                    self.conn.remove_subscription(self.inner.sid);
                }
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    #[inline]
    fn check_sync(&self) -> Result<()> {
        if self.inner.is_async {
            return Err(Error::InvalidArgument("subscription is consumed by a message handler".into()));
        }
        Ok(())
    }

    /// Removes the interest; queued messages are discarded.
    #[inline]
    pub fn unsubscribe(&self) -> Result<()> {
        self.conn.unsubscribe(&self.inner, None)
    }

    /// Unsubscribes automatically once `max` messages were received.
    #[inline]
    pub fn auto_unsubscribe(&self, max: u64) -> Result<()> {
        self.conn.unsubscribe(&self.inner, Some(max))
    }

    /// Sets the pending limits; `None` means unlimited, zero is rejected.
    pub fn set_pending_limits(&self, msgs: Option<usize>, bytes: Option<usize>) -> Result<()> {
        self.conn.check_open()?;
        self.inner.set_pending_limits(msgs, bytes)
    }

    #[inline]
    pub fn pending_limits(&self) -> (Option<usize>, Option<usize>) {
        self.inner.with_state(|st| (st.msgs_limit, st.bytes_limit))
    }

    #[inline]
    pub fn pending_msgs(&self) -> usize {
        self.inner.with_state(|st| st.pending.len())
    }

    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.inner.with_state(|st| st.pending_bytes)
    }

    /// Highest number of messages queued at once
    #[inline]
    pub fn pending_msgs_max(&self) -> usize {
        self.inner.with_state(|st| st.msgs_max)
    }

    /// Highest number of bytes queued at once
    #[inline]
    pub fn pending_bytes_max(&self) -> usize {
        self.inner.with_state(|st| st.bytes_max)
    }

    /// Resets the high-water marks
    #[inline]
    pub fn clear_max_pending(&self) {
        self.inner.with_state(|st| {
            st.msgs_max = 0;
            st.bytes_max = 0;
        })
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.inner.with_state(|st| st.dropped)
    }

    #[inline]
    pub fn delivered(&self) -> u64 {
        self.inner.with_state(|st| st.delivered)
    }

    #[inline]
    pub fn is_slow_consumer(&self) -> bool {
        self.inner.with_state(|st| st.slow_consumer)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.inner.is_closed()
    }
}

/// Feeds the subscription's messages to `handler` until it is closed or
/// the auto-unsubscribe maximum was handed over.
pub(crate) fn spawn_handler<F: MessageHandler>(sub: Subscription, handler: F) {
    tokio::spawn(async move {
        let sid = sub.sid();
        loop {
            let (msg, finished) = match sub.inner.wait_next().await {
                Ok(next) => next,
                Err(_) => break,
            };
            if catch_unwind(AssertUnwindSafe(|| handler(msg))).is_err() {
                log::warn!("message handler of sid {} panicked", sid);
                sub.conn.emit(Event::Error(Error::Callback(format!("handler of subscription {} panicked", sid))));
            }
            if finished {
                sub.conn.remove_subscription(sid);
                break;
            }
        }
        log::debug!("message handler of sid {} exited", sid);
    });
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.inner.sid)
            .field("subject", &self.inner.subject)
            .field("queue", &self.inner.queue)
            .finish()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.queue() {
            Some(queue) => write!(f, "{} [{}] sid: {}", self.subject(), queue, self.sid()),
            None => write!(f, "{} sid: {}", self.subject(), self.sid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;

    fn msg(n: usize) -> Message {
        Message { subject: "foo".into(), reply: None, payload: Bytes::from(vec![b'x'; n]), sid: 1 }
    }

    fn sub(msgs: Option<usize>, bytes: Option<usize>) -> SubscriptionInner {
        SubscriptionInner::new(1, "foo".into(), None, false, msgs, bytes)
    }

    #[test]
    fn test_overflow_drops_and_flags_once_per_episode() {
        let sub = sub(Some(2), None);
        assert_eq!(sub.deliver(msg(1)), Delivery::Queued);
        assert_eq!(sub.deliver(msg(2)), Delivery::Queued);
        assert_eq!(sub.deliver(msg(3)), Delivery::Dropped { first: true });
        assert_eq!(sub.deliver(msg(4)), Delivery::Dropped { first: false });
        assert_eq!(sub.with_state(|st| st.dropped), 2);

        // consumer catches up, the next accepted message ends the episode
        let (m, _) = sub.try_next().unwrap().unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(sub.deliver(msg(5)), Delivery::Queued);
        assert_eq!(sub.deliver(msg(6)), Delivery::Dropped { first: true });
        assert_eq!(sub.with_state(|st| st.dropped), 3);

        let lens: Vec<usize> = std::iter::from_fn(|| sub.try_next().unwrap()).map(|(m, _)| m.len()).collect();
        assert_eq!(lens, vec![2, 5]);
    }

    #[test]
    fn test_byte_limit() {
        let sub = sub(None, Some(10));
        assert_eq!(sub.deliver(msg(6)), Delivery::Queued);
        assert_eq!(sub.deliver(msg(5)), Delivery::Dropped { first: true });
        assert_eq!(sub.deliver(msg(4)), Delivery::Queued);
        assert_eq!(sub.with_state(|st| (st.pending_bytes, st.bytes_max, st.msgs_max)), (10, 10, 2));
    }

    #[test]
    fn test_auto_unsubscribe_max() {
        let sub = sub(None, None);
        sub.set_max(2).unwrap();
        assert_eq!(sub.deliver(msg(1)), Delivery::Queued);
        assert_eq!(sub.remaining(), Some(1));
        assert_eq!(sub.deliver(msg(1)), Delivery::Queued);
        assert_eq!(sub.deliver(msg(1)), Delivery::Discarded);
        assert_eq!(sub.try_next().unwrap().map(|(_, finished)| finished), Some(false));
        assert_eq!(sub.try_next().unwrap().map(|(_, finished)| finished), Some(true));
        assert_eq!(sub.with_state(|st| st.delivered), 2);
    }

    #[test]
    fn test_closed_discards() {
        let sub = sub(None, None);
        sub.deliver(msg(1));
        assert!(sub.close(CloseReason::Unsubscribed));
        assert!(!sub.close(CloseReason::ConnectionClosed));
        assert_eq!(sub.deliver(msg(1)), Delivery::Discarded);
        assert_eq!(sub.try_next().unwrap_err(), Error::BadSubscription);
        assert_eq!(sub.with_state(|st| st.pending_bytes), 0);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let sub = sub(None, None);
        assert!(matches!(sub.set_pending_limits(Some(0), None), Err(Error::InvalidArgument(_))));
        assert!(sub.set_pending_limits(Some(1), Some(1)).is_ok());
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let sub = Arc::new(sub(None, None));
        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.wait_next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.close(CloseReason::ConnectionClosed);
        let res = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(res.unwrap_err(), Error::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_deliver_wakes_waiter() {
        let sub = Arc::new(sub(None, None));
        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.wait_next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.deliver(msg(3));
        let (m, finished) = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(m.len(), 3);
        assert!(!finished);
    }
}
