#![deny(unsafe_code)]

//! Transport layer of the rnats client
//!
//! Dials a server, reads its `INFO`, optionally upgrades to TLS and performs
//! the `CONNECT`/`PING`/`PONG` handshake over a framed [`NatsStream`].

mod addr;
mod builder;
mod error;
mod stream;
#[cfg(feature = "tls")]
mod tls;

pub use addr::{ServerAddr, DEFAULT_PORT};
pub use builder::Builder;
pub use error::NetError;
pub use stream::{Io, NatsStream};

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rnats_codec::{ConnectInfo, ServerOp};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    const INFO: &[u8] = b"INFO {\"server_id\":\"test\",\"max_payload\":2048}\r\n";

    #[tokio::test]
    async fn test_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (r, mut w) = sock.into_split();
            let mut lines = BufReader::new(r).lines();
            w.write_all(INFO).await.unwrap();
            let connect = lines.next_line().await.unwrap().unwrap();
            assert!(connect.starts_with("CONNECT {"));
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "PING");
            w.write_all(b"+OK\r\nPING\r\n").await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "PONG");
            w.write_all(b"PONG\r\nMSG foo 1 2\r\nhi\r\n").await.unwrap();
            connect
        });

        let addr: ServerAddr = format!("nats://127.0.0.1:{}", port).parse().unwrap();
        let mut stream = Builder::new().connect(&addr).await.unwrap();
        assert_eq!(stream.info().map(|i| i.max_payload), Some(2048));
        stream.handshake(ConnectInfo { name: Some("t".into()), ..Default::default() }).await.unwrap();
        assert!(matches!(stream.recv(Duration::from_secs(1)).await.unwrap(), Some(ServerOp::Msg { sid: 1, .. })));
        let connect = server.await.unwrap();
        assert!(connect.contains(r#""name":"t""#));
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (r, mut w) = sock.into_split();
            let mut lines = BufReader::new(r).lines();
            w.write_all(INFO).await.unwrap();
            let _ = lines.next_line().await;
            let _ = lines.next_line().await;
            w.write_all(b"-ERR 'Authorization Violation'\r\n").await.unwrap();
        });

        let addr: ServerAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let mut stream = Builder::new().connect(&addr).await.unwrap();
        let err = stream.handshake(ConnectInfo::default()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<NetError>(), Some(NetError::Server(e)) if e == "Authorization Violation"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let addr: ServerAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        assert!(Builder::new().connect_timeout(Duration::from_millis(500)).connect(&addr).await.is_err());
    }
}
