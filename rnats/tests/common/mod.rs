#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use rnats::{Event, Options};

const TIMEOUT: Duration = Duration::from_secs(5);

pub const INFO: &str = r#"INFO {"server_id":"mock","version":"2.10.0","proto":1,"max_payload":1048576}"#;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = simple_logger::SimpleLogger::new().with_level(log::LevelFilter::Warn).init();
});

/// Options with short timeouts, no shuffling and a quiet pinger
pub fn options() -> Options {
    Lazy::force(&LOGGER);
    Options::new()
        .no_randomize(true)
        .connect_timeout(Duration::from_secs(2))
        .reconnect_wait(Duration::from_millis(50))
        .close_timeout(Duration::from_millis(100))
}

/// Collects every event raised by a connection
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<Event>>>);

impl Events {
    pub fn attach(&self, opts: Options) -> Options {
        let events = self.0.clone();
        opts.event_handler(move |ev| events.lock().push(ev))
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|ev| f(ev)).count()
    }

    pub fn all(&self) -> Vec<Event> {
        self.0.lock().clone()
    }
}

pub async fn wait_until(f: impl Fn() -> bool) {
    let waiting = async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(TIMEOUT, waiting).await.expect("condition not reached in time");
}

/// Operations a client sends, as seen by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect(String),
    Pub { subject: String, reply: Option<String>, payload: Vec<u8> },
    Sub { subject: String, queue: Option<String>, sid: u64 },
    Unsub { sid: u64, max: Option<u64> },
    Ping,
    Pong,
}

impl Op {
    pub fn publish(subject: &str, payload: &str) -> Op {
        Op::Pub { subject: subject.into(), reply: None, payload: payload.as_bytes().to_vec() }
    }

    pub fn sub(subject: &str, sid: u64) -> Op {
        Op::Sub { subject: subject.into(), queue: None, sid }
    }
}

pub struct MockServer {
    listener: TcpListener,
    pub port: u16,
}

impl MockServer {
    pub async fn start() -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        MockServer { listener, port }
    }

    pub fn url(&self) -> String {
        format!("nats://127.0.0.1:{}", self.port)
    }

    /// Accepts a client and completes its handshake
    pub async fn accept(&self) -> MockConn {
        self.accept_with_info(INFO).await
    }

    pub async fn accept_with_info(&self, info: &str) -> MockConn {
        let (sock, _) = tokio::time::timeout(TIMEOUT, self.listener.accept()).await.expect("no client").unwrap();
        let (r, w) = sock.into_split();
        let mut conn = MockConn { reader: BufReader::new(r), writer: w };
        conn.send(&format!("{}\r\n", info)).await;
        assert!(matches!(conn.read_op().await, Op::Connect(_)));
        assert_eq!(conn.read_op().await, Op::Ping);
        conn.send("PONG\r\n").await;
        conn
    }
}

pub struct MockConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockConn {
    pub async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    pub async fn send_msg(&mut self, subject: &str, sid: u64, payload: &str) {
        self.send(&format!("MSG {} {} {}\r\n{}\r\n", subject, sid, payload.len(), payload)).await;
    }

    pub async fn read_op(&mut self) -> Op {
        tokio::time::timeout(TIMEOUT, self.next_op()).await.expect("no op from client")
    }

    /// Answers the client's next PING
    pub async fn pong(&mut self) {
        assert_eq!(self.read_op().await, Op::Ping);
        self.send("PONG\r\n").await;
    }

    /// Fails when the client sends anything within `wait`
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(op) = tokio::time::timeout(wait, self.next_op()).await {
            panic!("unexpected {:?}", op);
        }
    }

    async fn next_op(&mut self) -> Op {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "client closed the connection");
        let line = line.trim_end_matches("\r\n");
        let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();
        match op {
            "CONNECT" => Op::Connect(rest.to_owned()),
            "PING" => Op::Ping,
            "PONG" => Op::Pong,
            "SUB" => match args.as_slice() {
                [subject, sid] => Op::Sub { subject: subject.to_string(), queue: None, sid: sid.parse().unwrap() },
                [subject, queue, sid] => Op::Sub {
                    subject: subject.to_string(),
                    queue: Some(queue.to_string()),
                    sid: sid.parse().unwrap(),
                },
                _ => panic!("bad SUB: {}", line),
            },
            "UNSUB" => match args.as_slice() {
                [sid] => Op::Unsub { sid: sid.parse().unwrap(), max: None },
                [sid, max] => Op::Unsub { sid: sid.parse().unwrap(), max: Some(max.parse().unwrap()) },
                _ => panic!("bad UNSUB: {}", line),
            },
            "PUB" => {
                let (subject, reply, size) = match args.as_slice() {
                    [subject, size] => (subject.to_string(), None, size.parse::<usize>().unwrap()),
                    [subject, reply, size] => {
                        (subject.to_string(), Some(reply.to_string()), size.parse::<usize>().unwrap())
                    }
                    _ => panic!("bad PUB: {}", line),
                };
                let mut payload = vec![0; size + 2];
                self.reader.read_exact(&mut payload).await.unwrap();
                assert_eq!(&payload[size..], b"\r\n");
                payload.truncate(size);
                Op::Pub { subject, reply, payload }
            }
            _ => panic!("unknown op: {}", line),
        }
    }
}

/// Connects a client to `server` and completes the handshake on both ends
pub async fn connect(server: &MockServer, opts: Options) -> (rnats::Connection, MockConn) {
    let url = server.url();
    let (conn, mock) = tokio::join!(rnats::connect(&url, opts), server.accept());
    (conn.unwrap(), mock)
}
