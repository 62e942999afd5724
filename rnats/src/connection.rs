use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use bytestring::ByteString;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use rnats_codec::{encode, subject, ClientOp, NatsCodec, ServerError, ServerInfo, ServerOp};
use rnats_net::{Builder, Io, NatsStream, ServerAddr};

use crate::event::{Dispatcher, Event};
use crate::registry::Registry;
use crate::server_pool::ServerPool;
use crate::stats::{Statistics, Stats};
use crate::subscription::{spawn_handler, CloseReason, Delivery, MessageHandler, Subscription, SubscriptionInner};
use crate::{Error, Message, Options, Result};

const PING: &[u8] = b"PING\r\n";
const PONG: &[u8] = b"PONG\r\n";

type Transport = Box<dyn Io>;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl Status {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Disconnected => "disconnected",
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::Reconnecting => "reconnecting",
            Status::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transport session: a reader, a writer and a pinger sharing a token
struct Session {
    id: u64,
    token: CancellationToken,
    notify: Arc<Notify>,
    writer: Option<JoinHandle<()>>,
}

struct State {
    status: Status,
    pool: ServerPool,
    info: Option<Box<ServerInfo>>,
    url: Option<ServerAddr>,
    /// Frames waiting for the writer of the current session
    outbound: BytesMut,
    /// Frames accepted while reconnecting, replayed after resubscribing
    pending: Option<BytesMut>,
    /// One entry per PING in flight; `None` for the pinger's own PINGs
    pongs: VecDeque<Option<oneshot::Sender<Result<()>>>>,
    pings_out: usize,
    session: Option<Session>,
    sessions: u64,
    ever_connected: bool,
    last_error: Option<Error>,
}

impl State {
    fn new(pool: ServerPool) -> Self {
        State {
            status: Status::Connecting,
            pool,
            info: None,
            url: None,
            outbound: BytesMut::new(),
            pending: None,
            pongs: VecDeque::new(),
            pings_out: 0,
            session: None,
            sessions: 0,
            ever_connected: false,
            last_error: None,
        }
    }

    #[inline]
    fn is_current(&self, id: u64) -> bool {
        self.status == Status::Connected && self.session.as_ref().is_some_and(|s| s.id == id)
    }

    #[inline]
    fn wake(&self) {
        if let Some(session) = self.session.as_ref() {
            session.notify.notify_one();
        }
    }

    #[inline]
    fn check_payload(&self, size: usize) -> Result<()> {
        if let Some(max) = self.info.as_ref().map(|info| info.max_payload).filter(|max| *max > 0) {
            if size > max {
                return Err(Error::MaxPayload { size, max });
            }
        }
        Ok(())
    }

    /// Queues a frame for the server: on the writer when connected, in the
    /// pending buffer while (re)connecting. With `limits` both buffers are
    /// bounded by the options' sizes.
    fn write(&mut self, frame: &[u8], limits: Option<&Options>) -> Result<()> {
        match self.status {
            Status::Closed => Err(Error::ConnectionClosed),
            Status::Disconnected => Err(Error::Disconnected),
            Status::Connected => {
                let limit = limits.and_then(|opts| opts.write_buf_size);
                if limit.is_some_and(|limit| self.outbound.len() + frame.len() > limit) {
                    return Err(Error::WriteBufferExceeded);
                }
                self.outbound.extend_from_slice(frame);
                self.wake();
                Ok(())
            }
            Status::Connecting | Status::Reconnecting => {
                let limit = limits.and_then(|opts| opts.reconnect_buf_size);
                let pending = self.pending.get_or_insert_with(BytesMut::new);
                if limit.is_some_and(|limit| pending.len() + frame.len() > limit) {
                    return Err(Error::ReconnectBufferExceeded);
                }
                pending.extend_from_slice(frame);
                Ok(())
            }
        }
    }

    /// Writes an op only when connected; interest is replayed on reconnect.
    #[inline]
    fn write_connected(&mut self, op: &ClientOp) -> Result<()> {
        if self.status == Status::Connected {
            encode(op, &mut self.outbound)?;
            self.wake();
        }
        Ok(())
    }

    #[inline]
    fn fail_pongs(&mut self, err: Error) {
        for tx in self.pongs.drain(..).flatten() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

pub(crate) struct Inner {
    opts: Options,
    transport: Builder,
    state: Mutex<State>,
    subs: Registry,
    stats: Stats,
    events: Dispatcher,
    closed: CancellationToken,
}

/// A client connection
///
/// Cloning is cheap and every clone drives the same connection. The
/// connection stays alive until [`close`](Connection::close) is called or
/// reconnecting gives up.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Connects to the comma separated `urls` plus `opts.servers`
#[inline]
pub async fn connect(urls: &str, opts: Options) -> Result<Connection> {
    Connection::connect(urls, opts).await
}

impl Connection {
    pub async fn connect(urls: &str, opts: Options) -> Result<Connection> {
        opts.validate()?;
        let mut addrs = Vec::new();
        let urls = urls.split(',').chain(opts.servers.iter().map(String::as_str));
        for url in urls.map(str::trim).filter(|url| !url.is_empty()) {
            addrs.push(url.parse::<ServerAddr>().map_err(|e| Error::InvalidArgument(e.to_string()))?);
        }
        if addrs.is_empty() {
            return Err(Error::NoServers);
        }

        let pool = ServerPool::new(addrs, !opts.no_randomize);
        let inner = Arc::new(Inner {
            transport: opts.transport(),
            state: Mutex::new(State::new(pool)),
            subs: Registry::default(),
            stats: Stats::default(),
            events: Dispatcher::new(opts.callbacks.clone()),
            closed: CancellationToken::new(),
            opts,
        });
        inner.connect().await?;
        Ok(Connection { inner })
    }

    /// Publishes `payload` to `subject`.
    ///
    /// While connected the message is queued for the writer task, up to
    /// `Options::write_buf_size` bytes not yet handed to the transport;
    /// beyond that the publish fails with [`Error::WriteBufferExceeded`].
    /// While reconnecting it is buffered, up to `Options::reconnect_buf_size`.
    #[inline]
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.publish_msg(subject, None, payload.into())
    }

    /// Publishes with a reply subject for the receiver to answer on.
    #[inline]
    pub fn publish_with_reply(&self, subject: &str, reply: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.publish_msg(subject, Some(reply), payload.into())
    }

    fn publish_msg(&self, subject: &str, reply: Option<&str>, payload: Bytes) -> Result<()> {
        let size = payload.len();
        let op = ClientOp::Pub { subject: subject.into(), reply: reply.map(ByteString::from), payload };
        let mut frame = BytesMut::with_capacity(size + subject.len() + 32);
        encode(&op, &mut frame)?;
        {
            let mut st = self.inner.state.lock();
            st.check_payload(size)?;
            st.write(&frame, Some(&self.inner.opts))?;
        }
        self.inner.stats.out_msgs.inc();
        self.inner.stats.out_bytes.incs(size as u64);
        Ok(())
    }

    /// Subscription consumed with [`Subscription::next_message`]
    #[inline]
    pub fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.add_subscription(subject, None, false)
    }

    /// Like [`subscribe`](Self::subscribe); each message goes to one member
    /// of the queue group.
    #[inline]
    pub fn queue_subscribe(&self, subject: &str, queue: &str) -> Result<Subscription> {
        self.add_subscription(subject, Some(queue), false)
    }

    /// Subscription whose messages are passed to `handler`, one at a time,
    /// on a task of its own.
    pub fn subscribe_with_handler<F: MessageHandler>(&self, subject: &str, handler: F) -> Result<Subscription> {
        let sub = self.add_subscription(subject, None, true)?;
        spawn_handler(sub.clone(), handler);
        Ok(sub)
    }

    pub fn queue_subscribe_with_handler<F: MessageHandler>(
        &self,
        subject: &str,
        queue: &str,
        handler: F,
    ) -> Result<Subscription> {
        let sub = self.add_subscription(subject, Some(queue), true)?;
        spawn_handler(sub.clone(), handler);
        Ok(sub)
    }

    fn add_subscription(&self, subject: &str, queue: Option<&str>, is_async: bool) -> Result<Subscription> {
        subject::validate_subscribe_subject(subject)?;
        if let Some(queue) = queue {
            subject::validate_queue(queue)?;
        }
        let opts = &self.inner.opts;
        let mut st = self.inner.state.lock();
        self.inner.check_open(&st)?;
        let sid = self.inner.subs.next_sid();
        let sub = Arc::new(SubscriptionInner::new(
            sid,
            subject.into(),
            queue.map(ByteString::from),
            is_async,
            opts.pending_msgs_limit,
            opts.pending_bytes_limit,
        ));
        st.write_connected(&ClientOp::Sub { subject: sub.subject.clone(), queue: sub.queue.clone(), sid })?;
        self.inner.subs.insert(sub.clone());
        drop(st);
        log::debug!("subscribed to {:?}, sid: {}, queue: {:?}", subject, sid, queue);
        Ok(Subscription { inner: sub, conn: self.clone() })
    }

    /// `max` of `None` (or zero) removes the subscription right away,
    /// otherwise once `max` messages were received.
    pub(crate) fn unsubscribe(&self, sub: &Arc<SubscriptionInner>, max: Option<u64>) -> Result<()> {
        let max = max.filter(|max| *max > 0);
        let mut st = self.inner.state.lock();
        self.inner.check_open(&st)?;
        match max {
            Some(max) => {
                sub.set_max(max)?;
                if sub.is_finished() {
                    self.remove_subscription(sub.sid);
                }
            }
            None => {
                sub.check_open()?;
                self.remove_subscription(sub.sid);
            }
        }
        st.write_connected(&ClientOp::Unsub { sid: sub.sid, max })
    }

    #[inline]
    pub(crate) fn remove_subscription(&self, sid: u64) {
        if let Some(sub) = self.inner.subs.remove(sid) {
            sub.close(CloseReason::Unsubscribed);
            log::debug!("removed subscription {}", sid);
        }
    }

    #[inline]
    pub(crate) fn check_open(&self) -> Result<()> {
        self.inner.check_open(&self.inner.state.lock())
    }

    #[inline]
    pub(crate) fn emit(&self, ev: Event) {
        self.inner.events.emit(ev)
    }

    /// Waits until the server processed everything written so far,
    /// bounded by `Options::flush_timeout`.
    #[inline]
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush(self.inner.opts.flush_timeout).await
    }

    #[inline]
    pub async fn flush_timeout(&self, timeout: Duration) -> Result<()> {
        self.inner.flush(timeout).await
    }

    /// Closes the connection and every subscription. Calling it again is a no-op.
    #[inline]
    pub async fn close(&self) {
        self.inner.close(None).await
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.status() == Status::Closed
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status() == Status::Connected
    }

    #[inline]
    pub fn is_reconnecting(&self) -> bool {
        self.status() == Status::Reconnecting
    }

    pub fn connected_url(&self) -> Option<String> {
        let st = self.inner.state.lock();
        if st.status != Status::Connected {
            return None;
        }
        st.url.as_ref().map(ToString::to_string)
    }

    pub fn connected_server_id(&self) -> Option<String> {
        let st = self.inner.state.lock();
        if st.status != Status::Connected {
            return None;
        }
        st.info.as_ref().map(|info| info.server_id.clone())
    }

    /// Latest `INFO` received from the server
    #[inline]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.state.lock().info.as_deref().cloned()
    }

    /// Every server in the pool, configured and discovered
    #[inline]
    pub fn servers(&self) -> Vec<String> {
        self.inner.state.lock().pool.addrs().iter().map(ToString::to_string).collect()
    }

    #[inline]
    pub fn discovered_servers(&self) -> Vec<String> {
        self.inner.state.lock().pool.discovered().iter().map(ToString::to_string).collect()
    }

    /// Payload limit announced by the server, zero until known
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.inner.state.lock().info.as_ref().map(|info| info.max_payload).unwrap_or(0)
    }

    #[inline]
    pub fn is_auth_required(&self) -> bool {
        self.inner.state.lock().info.as_ref().is_some_and(|info| info.auth_required)
    }

    #[inline]
    pub fn is_tls_required(&self) -> bool {
        self.inner.state.lock().info.as_ref().is_some_and(|info| info.tls_required)
    }

    #[inline]
    pub fn last_error(&self) -> Option<Error> {
        self.inner.state.lock().last_error.clone()
    }

    /// Bytes held in the reconnect buffer
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.inner.state.lock().pending.as_ref().map(|pending| pending.len()).unwrap_or(0)
    }

    #[inline]
    pub fn num_subscriptions(&self) -> usize {
        self.inner.subs.len()
    }

    #[inline]
    pub fn stats(&self) -> Statistics {
        self.inner.stats.snapshot()
    }

    #[inline]
    pub fn reset_stats(&self) {
        self.inner.stats.reset()
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.inner.opts.name.as_deref()
    }

    #[inline]
    pub(crate) fn options(&self) -> &Options {
        &self.inner.opts
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Connection")
            .field("status", &st.status)
            .field("url", &st.url.as_ref().map(ToString::to_string))
            .field("subscriptions", &self.inner.subs.len())
            .finish()
    }
}

impl Inner {
    #[inline]
    fn check_open(&self, st: &State) -> Result<()> {
        if st.status == Status::Closed {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Tries every server once, in pool order.
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let servers = self.state.lock().pool.len();
        let mut last_err = Error::NoServers;
        for idx in 0..servers {
            let addr = {
                let mut st = self.state.lock();
                st.pool.set_current(idx);
                st.pool.mark_attempt();
                match st.pool.current() {
                    Some(s) => s.addr.clone(),
                    None => continue,
                }
            };
            match self.try_connect(&addr).await {
                Ok(stream) => {
                    self.start_session(addr, stream)?;
                    self.events.emit(Event::Connected);
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("connect to {} failed, {}", addr, e);
                    last_err = e;
                }
            }
        }

        let mut st = self.state.lock();
        st.last_error = Some(last_err.clone());
        if self.opts.retry_on_failed_connect && self.opts.allow_reconnect {
            log::info!("no server reachable, retrying in the background, last error: {}", last_err);
            st.status = Status::Reconnecting;
            st.pending = Some(BytesMut::new());
            drop(st);
            tokio::spawn(self.clone().reconnect_loop());
            return Ok(());
        }
        st.status = Status::Closed;
        drop(st);
        self.closed.cancel();
        match last_err {
            Error::Server(_) => Err(last_err),
            _ => Err(Error::NoServers),
        }
    }

    async fn try_connect(&self, addr: &ServerAddr) -> Result<NatsStream<Transport>> {
        let mut stream = self.transport.connect(addr).await?;
        let tls_required =
            addr.is_tls() || self.opts.tls_required || stream.info().is_some_and(|info| info.tls_required);
        if let Err(e) = stream.handshake(self.opts.connect_info(addr, tls_required)).await {
            if let Err(close_err) = stream.close().await {
                log::debug!("close after failed handshake with {}, {}", addr, close_err);
            }
            return Err(e.into());
        }
        Ok(stream)
    }

    /// Takes over a handshaken stream: replays subscriptions and buffered
    /// frames and starts the session tasks. Returns whether this is the
    /// first session of the connection.
    fn start_session(self: &Arc<Self>, addr: ServerAddr, mut stream: NatsStream<Transport>) -> Result<bool> {
        let info = stream.info.take();
        let remote_addr = stream.remote_addr;
        let (io, read_buf, mut codec) = stream.into_parts();
        if let Some(max) = info.as_ref().map(|info| info.max_payload).filter(|max| *max > 0) {
            codec.set_max_payload(max);
        }
        let (reader, writer) = tokio::io::split(io);
        let mut reader = FramedRead::new(reader, codec);
        reader.read_buffer_mut().extend_from_slice(&read_buf);

        let token = CancellationToken::new();
        let notify = Arc::new(Notify::new());
        let (id, first) = {
            let mut st = self.state.lock();
            self.check_open(&st)?;
            st.sessions += 1;
            let id = st.sessions;
            let first = !st.ever_connected;
            st.ever_connected = true;
            st.status = Status::Connected;
            st.pool.mark_connected();
            if let Some(info) = info {
                if !self.opts.ignore_discovered_servers && st.pool.add_discovered(&info.connect_urls) {
                    log::info!("discovered servers: {:?}", info.connect_urls);
                }
                st.info = Some(info);
            }
            log::info!("connected to {}, remote: {}", addr, remote_addr);
            st.url = Some(addr);

            let mut outbound = self.resubscribe_frames();
            if let Some(pending) = st.pending.take() {
                outbound.extend_from_slice(&pending);
            }
            outbound.extend_from_slice(&st.outbound);
            st.outbound = outbound;
            st.pings_out = 0;
            st.session = Some(Session { id, token: token.clone(), notify: notify.clone(), writer: None });
            (id, first)
        };

        let writer = tokio::spawn(self.clone().write_loop(id, writer, notify.clone(), token.clone()));
        tokio::spawn(self.clone().read_loop(id, reader, token.clone()));
        if !self.opts.ping_interval.is_zero() {
            tokio::spawn(self.clone().ping_loop(id, token));
        }
        if let Some(session) = self.state.lock().session.as_mut().filter(|s| s.id == id) {
            session.writer = Some(writer);
        }
        notify.notify_one();
        Ok(first)
    }

    /// `SUB` for every open subscription, plus `UNSUB` with the remaining
    /// count for auto-unsubscribing ones
    fn resubscribe_frames(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        for sub in self.subs.snapshot() {
            let remaining = sub.remaining();
            if sub.is_closed() || remaining == Some(0) {
                continue;
            }
            let op = ClientOp::Sub { subject: sub.subject.clone(), queue: sub.queue.clone(), sid: sub.sid };
            if let Err(e) = encode(&op, &mut buf) {
                log::warn!("cannot resubscribe sid {}, {}", sub.sid, e);
                continue;
            }
            if let Some(max) = remaining {
                if let Err(e) = encode(&ClientOp::Unsub { sid: sub.sid, max: Some(max) }, &mut buf) {
                    log::warn!("cannot restore auto-unsubscribe of sid {}, {}", sub.sid, e);
                }
            }
        }
        buf
    }

    async fn read_loop(
        self: Arc<Self>,
        id: u64,
        mut reader: FramedRead<ReadHalf<Transport>, NatsCodec>,
        token: CancellationToken,
    ) {
        loop {
            let op = tokio::select! {
                _ = token.cancelled() => return,
                op = reader.next() => op,
            };
            let res = match op {
                Some(Ok(op)) => {
                    if let ServerOp::Info(info) = &op {
                        if info.max_payload > 0 {
                            reader.decoder_mut().set_max_payload(info.max_payload);
                        }
                    }
                    self.process_op(id, op)
                }
                Some(Err(e)) => Err(Error::from(e)),
                None => Err(Error::Disconnected),
            };
            match res {
                Ok(()) => {}
                // fatal server errors: the server drops us right after
                Err(e @ Error::Server(_)) => {
                    if self.state.lock().is_current(id) {
                        self.close(Some(e)).await;
                    }
                    return;
                }
                Err(e) => {
                    self.handle_disconnect(id, e);
                    return;
                }
            }
        }
    }

    fn process_op(&self, id: u64, op: ServerOp) -> Result<()> {
        match op {
            ServerOp::Msg { subject, sid, reply, payload } => {
                self.process_msg(Message { subject, reply, payload, sid });
            }
            ServerOp::Ping => {
                let mut st = self.state.lock();
                if st.is_current(id) {
                    st.outbound.extend_from_slice(PONG);
                    st.wake();
                }
            }
            ServerOp::Pong => {
                let mut st = self.state.lock();
                st.pings_out = 0;
                if let Some(Some(tx)) = st.pongs.pop_front() {
                    let _ = tx.send(Ok(()));
                }
            }
            ServerOp::Info(info) => {
                let mut st = self.state.lock();
                if !self.opts.ignore_discovered_servers && st.pool.add_discovered(&info.connect_urls) {
                    log::info!("discovered servers: {:?}", info.connect_urls);
                }
                st.info = Some(info);
            }
            ServerOp::Ok => {}
            ServerOp::Err(text) => return self.process_err(text),
        }
        Ok(())
    }

    fn process_msg(&self, msg: Message) {
        self.stats.in_msgs.inc();
        self.stats.in_bytes.incs(msg.len() as u64);
        let sid = msg.sid;
        let sub = match self.subs.get(sid) {
            Some(sub) => sub,
            None => {
                log::trace!("discarding message for unknown sid {}", sid);
                return;
            }
        };
        if let Delivery::Dropped { first: true } = sub.deliver(msg) {
            log::warn!("slow consumer on {:?}, sid: {}", sub.subject, sid);
            let e = Error::SlowConsumer(sid);
            self.state.lock().last_error = Some(e.clone());
            self.events.emit(Event::Error(e));
        }
        if sub.is_finished() {
            if let Some(sub) = self.subs.remove(sid) {
                sub.close(CloseReason::Unsubscribed);
            }
        }
    }

    /// Stale connections end the session, authorization failures close the
    /// connection, anything else is reported and the session goes on.
    fn process_err(&self, text: String) -> Result<()> {
        log::warn!("server error: {}", text);
        match ServerError::parse(&text) {
            ServerError::StaleConnection => Err(Error::StaleConnection),
            e if e.is_fatal() => {
                self.events.emit(Event::Error(Error::Server(text.clone())));
                Err(Error::Server(text))
            }
            _ => {
                let e = Error::Server(text);
                self.state.lock().last_error = Some(e.clone());
                self.events.emit(Event::Error(e));
                Ok(())
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        id: u64,
        mut writer: WriteHalf<Transport>,
        notify: Arc<Notify>,
        token: CancellationToken,
    ) {
        let send_timeout = self.transport.send_timeout;
        loop {
            let buf = {
                let mut st = self.state.lock();
                if token.is_cancelled() {
                    break;
                }
                st.outbound.split()
            };
            if buf.is_empty() {
                tokio::select! {
                    _ = notify.notified() => continue,
                    _ = token.cancelled() => break,
                }
            }
            if let Err(e) = write_all(&mut writer, &buf, send_timeout).await {
                self.handle_disconnect(id, e);
                return;
            }
        }

        let rest = {
            let mut st = self.state.lock();
            if st.status != Status::Closed {
                return;
            }
            st.outbound.split()
        };
        let shutdown = async {
            if !rest.is_empty() {
                writer.write_all(&rest).await?;
            }
            writer.shutdown().await
        };
        match tokio::time::timeout(self.opts.close_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("shutdown of session {} failed, {}", id, e),
            Err(_) => log::debug!("shutdown of session {} timed out", id),
        }
    }

    async fn ping_loop(self: Arc<Self>, id: u64, token: CancellationToken) {
        let period = self.opts.ping_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let stale = {
                let mut st = self.state.lock();
                if !st.is_current(id) {
                    return;
                }
                st.pings_out += 1;
                if st.pings_out > self.opts.max_pings_out {
                    true
                } else {
                    st.pongs.push_back(None);
                    st.outbound.extend_from_slice(PING);
                    st.wake();
                    false
                }
            };
            if stale {
                log::warn!("{} PINGs unanswered", self.opts.max_pings_out);
                self.handle_disconnect(id, Error::StaleConnection);
                return;
            }
        }
    }

    /// Ends session `id` after a transport or protocol failure. Late
    /// reports from an already replaced session are ignored.
    fn handle_disconnect(self: &Arc<Self>, id: u64, err: Error) {
        let reconnect = {
            let mut st = self.state.lock();
            if !st.is_current(id) {
                return;
            }
            match st.url.as_ref() {
                Some(url) => log::warn!("disconnected from {}, {}", url, err),
                None => log::warn!("disconnected, {}", err),
            }
            if let Some(session) = st.session.take() {
                session.token.cancel();
            }
            if !st.outbound.is_empty() {
                log::debug!("dropping {} unwritten bytes", st.outbound.len());
                st.outbound.clear();
            }
            st.fail_pongs(Error::Disconnected);
            st.pings_out = 0;
            st.last_error = Some(err.clone());
            if self.opts.allow_reconnect {
                st.status = Status::Reconnecting;
                st.pending = Some(BytesMut::new());
                true
            } else {
                st.status = Status::Disconnected;
                false
            }
        };

        if matches!(err, Error::Protocol(_) | Error::StaleConnection) {
            self.events.emit(Event::Error(err));
        }
        self.events.emit(Event::Disconnected);
        let inner = self.clone();
        if reconnect {
            tokio::spawn(inner.reconnect_loop());
        } else {
            tokio::spawn(async move { inner.close(None).await });
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            let (addr, wait) = {
                let mut st = self.state.lock();
                if st.status != Status::Reconnecting {
                    return;
                }
                match st.pool.next_server(self.opts.max_reconnect) {
                    Some(s) => {
                        log::debug!(
                            "next server {}, attempts: {}, connected before: {}",
                            s.addr,
                            s.reconnects,
                            s.did_connect
                        );
                        (s.addr.clone(), s.wait_time(self.opts.reconnect_wait))
                    }
                    None => break,
                }
            };
            if !wait.is_zero() {
                tokio::select! {
                    _ = self.closed.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            {
                let mut st = self.state.lock();
                if st.status != Status::Reconnecting {
                    return;
                }
                st.pool.mark_attempt();
            }

            log::debug!("reconnecting to {}", addr);
            let res = tokio::select! {
                _ = self.closed.cancelled() => return,
                res = self.try_connect(&addr) => res,
            };
            let stream = match res {
                Ok(stream) => stream,
                Err(e) => {
                    log::debug!("reconnect to {} failed, {}", addr, e);
                    self.state.lock().last_error = Some(e);
                    continue;
                }
            };
            match self.start_session(addr, stream) {
                Ok(true) => self.events.emit(Event::Connected),
                Ok(false) => {
                    self.stats.reconnects.inc();
                    self.events.emit(Event::Reconnected);
                }
                Err(e) => log::debug!("reconnected session dropped, {}", e),
            }
            return;
        }

        log::warn!("no server left to reconnect to");
        self.close(Some(Error::MaxReconnects)).await;
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidArgument("flush timeout must be greater than zero".into()));
        }
        let rx = {
            let mut st = self.state.lock();
            st.write(PING, None)?;
            let (tx, rx) = oneshot::channel();
            st.pongs.push_back(Some(tx));
            rx
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(self: &Arc<Self>, err: Option<Error>) {
        let was_connected = {
            let st = self.state.lock();
            if st.status == Status::Closed {
                return;
            }
            st.status == Status::Connected
        };
        if was_connected && err.is_none() {
            if let Err(e) = self.flush(self.opts.close_timeout).await {
                log::debug!("flush on close failed, {}", e);
            }
        }

        let (session, was_connected) = {
            let mut st = self.state.lock();
            if st.status == Status::Closed {
                return;
            }
            let was_connected = st.status == Status::Connected;
            st.status = Status::Closed;
            if let Some(e) = err {
                st.last_error = Some(e);
            }
            st.fail_pongs(Error::ConnectionClosed);
            st.pending = None;
            let session = st.session.take();
            if let Some(session) = session.as_ref() {
                session.token.cancel();
            }
            (session, was_connected)
        };
        self.closed.cancel();
        self.subs.close_all(CloseReason::ConnectionClosed);

        if let Some(writer) = session.and_then(|s| s.writer) {
            if tokio::time::timeout(self.opts.close_timeout, writer).await.is_err() {
                log::debug!("writer did not finish within {:?}", self.opts.close_timeout);
            }
        }
        log::info!("connection closed");
        if was_connected {
            self.events.emit(Event::Disconnected);
        }
        self.events.finish(Event::Closed);
    }
}

async fn write_all<W>(writer: &mut W, buf: &[u8], send_timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(buf).await?;
        writer.flush().await
    };
    if send_timeout.is_zero() {
        return write.await.map_err(|e| Error::Io(e.to_string()));
    }
    match tokio::time::timeout(send_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Io(e.to_string())),
        Err(_) => Err(Error::Io("write timeout".into())),
    }
}
