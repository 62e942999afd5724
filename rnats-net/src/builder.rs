use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedParts};

use rnats_codec::{ClientOp, NatsCodec, DEFAULT_MAX_PAYLOAD, MAX_CONTROL_LINE_SIZE};

use crate::stream::{Io, NatsStream};
use crate::{NetError, Result, ServerAddr};

/// Transport settings used when dialing a server
#[derive(Clone)]
pub struct Builder {
    ///Timeout of the TCP connect, the TLS upgrade and each handshake read. Default: 2s
    pub connect_timeout: Duration,
    ///Timeout of each write, flush and close on the stream. Zero disables it. Default: 10s
    pub send_timeout: Duration,
    ///TCP_NODELAY, default: true
    pub nodelay: bool,
    ///TCP keepalive idle time, default: None
    pub keepalive: Option<Duration>,
    ///Inbound payload limit until the server announces its own, default: 1M
    pub max_payload: usize,
    ///Maximum control line length, default: 4096
    pub max_control_line: usize,
    ///Upgrade to TLS even when neither the URL nor the server asks for it
    pub tls_required: bool,
    #[cfg(feature = "tls")]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("connect_timeout", &self.connect_timeout)
            .field("send_timeout", &self.send_timeout)
            .field("nodelay", &self.nodelay)
            .field("keepalive", &self.keepalive)
            .field("max_payload", &self.max_payload)
            .field("max_control_line", &self.max_control_line)
            .field("tls_required", &self.tls_required)
            .finish()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            connect_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(10),
            nodelay: true,
            keepalive: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_control_line: MAX_CONTROL_LINE_SIZE,
            tls_required: false,
            #[cfg(feature = "tls")]
            tls_config: None,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn max_control_line(mut self, max_control_line: usize) -> Self {
        self.max_control_line = max_control_line;
        self
    }

    pub fn tls_required(mut self, tls_required: bool) -> Self {
        self.tls_required = tls_required;
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Dials `addr` and reads the server's `INFO`, upgrading to TLS when
    /// the URL, the server or these settings require it.
    ///
    /// The returned stream is ready for [`NatsStream::handshake`].
    pub async fn connect(&self, addr: &ServerAddr) -> Result<NatsStream<Box<dyn Io>>> {
        let tcp = match tokio::time::timeout(self.connect_timeout, TcpStream::connect((addr.host(), addr.port())))
            .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(NetError::ConnectTimeout.into()),
        };
        tcp.set_nodelay(self.nodelay)?;
        if let Some(idle) = self.keepalive {
            SockRef::from(&tcp).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        let remote_addr = tcp.peer_addr()?;
        log::debug!("{} tcp connected, remote: {}", addr, remote_addr);

        let cfg = Arc::new(self.clone());
        let mut codec = NatsCodec::new(self.max_payload);
        codec.set_max_control_line(self.max_control_line);
        let mut stream = NatsStream::new(Framed::new(tcp, codec), remote_addr, cfg.clone());
        let info = stream.recv_info(self.connect_timeout).await?;
        log::debug!("{} INFO server_id: {}, version: {}", addr, info.server_id, info.version);

        let tls = addr.is_tls() || info.tls_required || self.tls_required;
        let parts = stream.io.into_parts();
        let io: Box<dyn Io> = if tls {
            // the server says nothing after INFO until the client speaks
            if !parts.read_buf.is_empty() {
                return Err(NetError::Tls("unexpected data before TLS upgrade".into()).into());
            }
            self.tls_upgrade(parts.io, addr).await?
        } else {
            Box::new(parts.io)
        };

        let mut new_parts = FramedParts::new::<ClientOp>(io, parts.codec);
        new_parts.read_buf = parts.read_buf;
        new_parts.write_buf = parts.write_buf;
        let mut stream = NatsStream::new(Framed::from_parts(new_parts), remote_addr, cfg);
        stream.info = Some(info);
        Ok(stream)
    }

    #[cfg(feature = "tls")]
    async fn tls_upgrade(&self, tcp: TcpStream, addr: &ServerAddr) -> Result<Box<dyn Io>> {
        let config = match self.tls_config.as_ref() {
            Some(config) => config.clone(),
            None => crate::tls::default_client_config()?,
        };
        let tls = match tokio::time::timeout(self.connect_timeout, crate::tls::connect(config, tcp, addr.host()))
            .await
        {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(NetError::ConnectTimeout.into()),
        };
        log::debug!("{} tls upgraded", addr);
        Ok(Box::new(tls))
    }

    #[cfg(not(feature = "tls"))]
    async fn tls_upgrade(&self, _tcp: TcpStream, addr: &ServerAddr) -> Result<Box<dyn Io>> {
        log::warn!("{} requires TLS, but the tls feature is not enabled", addr);
        Err(NetError::TlsNotEnabled.into())
    }
}
