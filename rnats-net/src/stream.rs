use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use rnats_codec::{ClientOp, ConnectInfo, NatsCodec, ServerInfo, ServerOp};

use crate::{Builder, Error, NetError, Result};

/// Byte stream a client session runs over: plain TCP or TLS
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub struct NatsStream<Io> {
    pub io: Framed<Io, NatsCodec>,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
    /// Latest `INFO` seen on this stream
    pub info: Option<Box<ServerInfo>>,
}

impl<Io> NatsStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: Framed<Io, NatsCodec>, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        NatsStream { io, remote_addr, cfg, info: None }
    }

    #[inline]
    pub fn info(&self) -> Option<&ServerInfo> {
        self.info.as_deref()
    }

    #[inline]
    pub async fn send_pong(&mut self) -> Result<()> {
        self.send(ClientOp::Pong).await
    }

    #[inline]
    pub async fn send(&mut self, op: ClientOp) -> Result<()> {
        send(&mut self.io, op, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        flush(&mut self.io, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        close(&mut self.io, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<ServerOp>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(op))) => Ok(Some(op)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(NetError::ReadTimeout.into()),
        }
    }

    /// The server speaks first: the stream must open with `INFO`.
    #[inline]
    pub async fn recv_info(&mut self, tm: Duration) -> Result<Box<ServerInfo>> {
        match self.recv(tm).await? {
            Some(ServerOp::Info(info)) => Ok(info),
            Some(ServerOp::Err(e)) => Err(NetError::Server(e).into()),
            Some(op) => Err(NetError::UnexpectedOp(op.name()).into()),
            None => Err(NetError::Disconnected.into()),
        }
    }

    /// Sends `CONNECT` followed by `PING` and waits for the server's `PONG`.
    ///
    /// `+OK` is skipped, `-ERR` fails the handshake. `PING`s from the server
    /// are answered and a newer `INFO` replaces the stored one.
    pub async fn handshake(&mut self, connect: ConnectInfo) -> Result<()> {
        let tm = self.cfg.connect_timeout;
        self.io.feed(ClientOp::Connect(Box::new(connect))).await.map_err(NetError::from)?;
        self.io.feed(ClientOp::Ping).await.map_err(NetError::from)?;
        self.flush().await?;
        loop {
            match self.recv(tm).await? {
                Some(ServerOp::Pong) => return Ok(()),
                Some(ServerOp::Ok) => {}
                Some(ServerOp::Ping) => self.send_pong().await?,
                Some(ServerOp::Info(info)) => self.info = Some(info),
                Some(ServerOp::Err(e)) => return Err(NetError::Server(e).into()),
                Some(op) => return Err(NetError::UnexpectedOp(op.name()).into()),
                None => return Err(NetError::Disconnected.into()),
            }
        }
    }

    /// Splits the stream into its transport, any bytes already read but
    /// not yet decoded, and the decoder state.
    pub fn into_parts(self) -> (Io, BytesMut, NatsCodec) {
        let parts = self.io.into_parts();
        (parts.io, parts.read_buf, parts.codec)
    }
}

impl<Io> futures::Stream for NatsStream<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<ServerOp>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.io).poll_next(cx);
        Poll::Ready(match futures::ready!(next) {
            Some(Ok(op)) => Some(Ok(op)),
            Some(Err(e)) => Some(Err(Error::from(NetError::from(e)))),
            None => None,
        })
    }
}

#[inline]
async fn send<Io>(io: &mut Framed<Io, NatsCodec>, op: ClientOp, send_timeout: Duration) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        io.send(op).await.map_err(NetError::from)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, io.send(op)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetError::from(e).into()),
            Err(_) => Err(NetError::WriteTimeout.into()),
        }
    }
}

#[inline]
async fn flush<Io>(io: &mut Framed<Io, NatsCodec>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        SinkExt::<ClientOp>::flush(io).await.map_err(NetError::from)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<ClientOp>::flush(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetError::from(e).into()),
            Err(_) => Err(NetError::FlushTimeout.into()),
        }
    }
}

#[inline]
async fn close<Io>(io: &mut Framed<Io, NatsCodec>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        SinkExt::<ClientOp>::close(io).await.map_err(NetError::from)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<ClientOp>::close(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetError::from(e).into()),
            Err(_) => Err(NetError::CloseTimeout.into()),
        }
    }
}
