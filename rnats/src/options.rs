use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rnats_codec::{ConnectInfo, DEFAULT_MAX_PAYLOAD, MAX_CONTROL_LINE_SIZE};
use rnats_net::{Builder, ServerAddr};

use crate::event::{Callbacks, ConnectionCallback, ErrorCallback, EventHandler};
use crate::{Error, Result};

/// Default pending message limit of a subscription
pub const DEFAULT_PENDING_MSGS_LIMIT: usize = 65_536;
/// Default pending byte limit of a subscription
pub const DEFAULT_PENDING_BYTES_LIMIT: usize = 64 * 1024 * 1024;
/// Default capacity of the buffer holding publishes while reconnecting
pub const DEFAULT_RECONNECT_BUF_SIZE: usize = 8 * 1024 * 1024;
/// Default bound of publishes queued for the writer while connected
pub const DEFAULT_WRITE_BUF_SIZE: usize = 32 * 1024 * 1024;
pub const DEFAULT_MAX_RECONNECT: usize = 60;

/// Connection options
///
/// ```
/// use std::time::Duration;
///
/// let opts = rnats::Options::new()
///     .name("worker")
///     .max_reconnect(Some(10))
///     .reconnect_wait(Duration::from_millis(500));
/// assert_eq!(opts.max_reconnect, Some(10));
/// ```
#[derive(Clone)]
pub struct Options {
    ///Servers tried in addition to those given to `connect`
    pub servers: Vec<String>,
    ///Keep the server list in the given order instead of shuffling it, default: false
    pub no_randomize: bool,
    ///Connection name reported to the server
    pub name: Option<String>,
    pub verbose: bool,
    pub pedantic: bool,
    ///Receive own publishes on matching subscriptions, default: true
    pub echo: bool,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub token: Option<String>,
    ///Reconnect after losing the transport, default: true
    pub allow_reconnect: bool,
    ///Reconnect attempts per server, None means unlimited, default: 60
    pub max_reconnect: Option<usize>,
    ///Minimum wait between two attempts on the same server, default: 2s
    pub reconnect_wait: Duration,
    ///Publishes buffered while reconnecting, None means unlimited, default: 8M
    pub reconnect_buf_size: Option<usize>,
    ///Bytes queued for the writer while connected, None means unlimited, default: 32M
    pub write_buf_size: Option<usize>,
    ///Default: 2s
    pub connect_timeout: Duration,
    ///Interval of client PINGs, zero disables them, default: 2m
    pub ping_interval: Duration,
    ///Unanswered PINGs before the connection is considered stale, default: 2
    pub max_pings_out: usize,
    ///Default: 10s
    pub flush_timeout: Duration,
    ///Bounds the final flush and the transport shutdown of `close`, default: 2s
    pub close_timeout: Duration,
    ///Default: 10s
    pub request_timeout: Duration,
    ///Pending message limit for new subscriptions, None means unlimited, default: 65536
    pub pending_msgs_limit: Option<usize>,
    ///Pending byte limit for new subscriptions, None means unlimited, default: 64M
    pub pending_bytes_limit: Option<usize>,
    ///Start reconnecting in the background when no server is reachable at connect time
    pub retry_on_failed_connect: bool,
    ///Do not add servers announced by the cluster to the pool
    pub ignore_discovered_servers: bool,
    pub tls_required: bool,
    ///Maximum control line length accepted from the server, default: 4096
    pub max_control_line: usize,
    #[cfg(feature = "tls")]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    pub(crate) callbacks: Callbacks,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("servers", &self.servers)
            .field("no_randomize", &self.no_randomize)
            .field("name", &self.name)
            .field("allow_reconnect", &self.allow_reconnect)
            .field("max_reconnect", &self.max_reconnect)
            .field("reconnect_wait", &self.reconnect_wait)
            .field("reconnect_buf_size", &self.reconnect_buf_size)
            .field("write_buf_size", &self.write_buf_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("max_pings_out", &self.max_pings_out)
            .field("pending_msgs_limit", &self.pending_msgs_limit)
            .field("pending_bytes_limit", &self.pending_bytes_limit)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn new() -> Options {
        Options {
            servers: Vec::new(),
            no_randomize: false,
            name: None,
            verbose: false,
            pedantic: false,
            echo: true,
            user: None,
            pass: None,
            token: None,
            allow_reconnect: true,
            max_reconnect: Some(DEFAULT_MAX_RECONNECT),
            reconnect_wait: Duration::from_secs(2),
            reconnect_buf_size: Some(DEFAULT_RECONNECT_BUF_SIZE),
            write_buf_size: Some(DEFAULT_WRITE_BUF_SIZE),
            connect_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(120),
            max_pings_out: 2,
            flush_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            pending_msgs_limit: Some(DEFAULT_PENDING_MSGS_LIMIT),
            pending_bytes_limit: Some(DEFAULT_PENDING_BYTES_LIMIT),
            retry_on_failed_connect: false,
            ignore_discovered_servers: false,
            tls_required: false,
            max_control_line: MAX_CONTROL_LINE_SIZE,
            #[cfg(feature = "tls")]
            tls_config: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn no_randomize(mut self, no_randomize: bool) -> Self {
        self.no_randomize = no_randomize;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn pedantic(mut self, pedantic: bool) -> Self {
        self.pedantic = pedantic;
        self
    }

    pub fn no_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn user_and_password(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn allow_reconnect(mut self, allow_reconnect: bool) -> Self {
        self.allow_reconnect = allow_reconnect;
        self
    }

    pub fn max_reconnect(mut self, max_reconnect: Option<usize>) -> Self {
        self.max_reconnect = max_reconnect;
        self
    }

    pub fn reconnect_wait(mut self, reconnect_wait: Duration) -> Self {
        self.reconnect_wait = reconnect_wait;
        self
    }

    pub fn reconnect_buf_size(mut self, size: Option<usize>) -> Self {
        self.reconnect_buf_size = size;
        self
    }

    pub fn write_buf_size(mut self, size: Option<usize>) -> Self {
        self.write_buf_size = size;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn max_pings_out(mut self, max_pings_out: usize) -> Self {
        self.max_pings_out = max_pings_out;
        self
    }

    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pending limits for new subscriptions; `None` means unlimited.
    pub fn pending_limits(mut self, msgs: Option<usize>, bytes: Option<usize>) -> Self {
        self.pending_msgs_limit = msgs;
        self.pending_bytes_limit = bytes;
        self
    }

    pub fn retry_on_failed_connect(mut self, retry: bool) -> Self {
        self.retry_on_failed_connect = retry;
        self
    }

    pub fn ignore_discovered_servers(mut self, ignore: bool) -> Self {
        self.ignore_discovered_servers = ignore;
        self
    }

    pub fn tls_required(mut self, tls_required: bool) -> Self {
        self.tls_required = tls_required;
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_required = true;
        self.tls_config = Some(config);
        self
    }

    pub fn max_control_line(mut self, max_control_line: usize) -> Self {
        self.max_control_line = max_control_line;
        self
    }

    /// Receives every [`Event`](crate::Event)
    pub fn event_handler<F: EventHandler>(mut self, f: F) -> Self {
        self.callbacks.event = Some(Arc::new(f));
        self
    }

    pub fn disconnected_callback<F: ConnectionCallback>(mut self, f: F) -> Self {
        self.callbacks.disconnected = Some(Arc::new(f));
        self
    }

    pub fn reconnected_callback<F: ConnectionCallback>(mut self, f: F) -> Self {
        self.callbacks.reconnected = Some(Arc::new(f));
        self
    }

    pub fn closed_callback<F: ConnectionCallback>(mut self, f: F) -> Self {
        self.callbacks.closed = Some(Arc::new(f));
        self
    }

    pub fn error_callback<F: ErrorCallback>(mut self, f: F) -> Self {
        self.callbacks.error = Some(Arc::new(f));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_pending_limits(self.pending_msgs_limit, self.pending_bytes_limit)?;
        if self.max_pings_out == 0 {
            return Err(Error::InvalidArgument("max_pings_out cannot be zero".into()));
        }
        if self.flush_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(Error::InvalidArgument("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    pub(crate) fn transport(&self) -> Builder {
        let builder = Builder::new()
            .connect_timeout(self.connect_timeout)
            .max_payload(DEFAULT_MAX_PAYLOAD)
            .max_control_line(self.max_control_line)
            .tls_required(self.tls_required);
        #[cfg(feature = "tls")]
        let builder = match self.tls_config.as_ref() {
            Some(config) => builder.tls_config(config.clone()),
            None => builder,
        };
        builder
    }

    /// Credentials in the URL take precedence over the configured ones.
    pub(crate) fn connect_info(&self, addr: &ServerAddr, tls_required: bool) -> ConnectInfo {
        let (user, pass, token) = if addr.has_credentials() {
            (
                addr.username().map(ToOwned::to_owned),
                addr.password().map(ToOwned::to_owned),
                addr.token().map(ToOwned::to_owned),
            )
        } else {
            (self.user.clone(), self.pass.clone(), self.token.clone())
        };
        ConnectInfo {
            verbose: self.verbose,
            pedantic: self.pedantic,
            tls_required,
            name: self.name.clone(),
            echo: self.echo,
            user,
            pass,
            auth_token: token,
            ..Default::default()
        }
    }
}

/// A zero limit is rejected, `None` means unlimited
pub(crate) fn check_pending_limits(msgs: Option<usize>, bytes: Option<usize>) -> Result<()> {
    if msgs == Some(0) {
        return Err(Error::InvalidArgument("pending message limit cannot be zero".into()));
    }
    if bytes == Some(0) {
        return Err(Error::InvalidArgument("pending byte limit cannot be zero".into()));
    }
    Ok(())
}
