mod common;

use std::time::{Duration, Instant};

use common::{connect, options, wait_until, Events, MockServer, Op};
use rnats::{Error, Event, Status};

#[tokio::test]
async fn test_connect_and_publish() {
    let server = MockServer::start().await;
    let (conn, mut c) = connect(&server, options().name("tester")).await;
    assert_eq!(conn.status(), Status::Connected);
    assert_eq!(conn.connected_server_id().as_deref(), Some("mock"));
    assert_eq!(conn.max_payload(), 1024 * 1024);
    assert_eq!(conn.connected_url(), Some(server.url()));

    conn.publish("foo", "hello").unwrap();
    conn.publish_with_reply("foo", "bar", "").unwrap();
    assert_eq!(c.read_op().await, Op::publish("foo", "hello"));
    assert_eq!(c.read_op().await, Op::Pub { subject: "foo".into(), reply: Some("bar".into()), payload: vec![] });

    let stats = conn.stats();
    assert_eq!((stats.out_msgs, stats.out_bytes), (2, 5));
    conn.close().await;
}

#[tokio::test]
async fn test_invalid_publish() {
    let server = MockServer::start().await;
    let info = r#"INFO {"server_id":"small","max_payload":8}"#;
    let url = server.url();
    let (conn, mut c) = tokio::join!(rnats::connect(&url, options()), server.accept_with_info(info));
    let conn = conn.unwrap();

    assert!(matches!(conn.publish("", "x"), Err(Error::InvalidSubject(_))));
    assert!(matches!(conn.publish("a.*", "x"), Err(Error::InvalidSubject(_))));
    assert!(matches!(conn.publish("a b", "x"), Err(Error::InvalidSubject(_))));
    assert_eq!(conn.publish("big", "123456789"), Err(Error::MaxPayload { size: 9, max: 8 }));
    conn.publish("ok", "12345678").unwrap();
    assert_eq!(c.read_op().await, Op::publish("ok", "12345678"));
    assert_eq!(conn.stats().out_msgs, 1);
    conn.close().await;
}

#[tokio::test]
async fn test_no_servers() {
    let server = MockServer::start().await;
    let url = server.url();
    drop(server);
    let res = rnats::connect(&url, options()).await;
    assert_eq!(res.unwrap_err(), Error::NoServers);
    assert_eq!(rnats::connect("", options()).await.unwrap_err(), Error::NoServers);
}

#[tokio::test]
async fn test_failover_to_second_server() {
    let down = MockServer::start().await;
    let down_url = down.url();
    drop(down);
    let server = MockServer::start().await;
    let urls = format!("{}, {}", down_url, server.url());
    let (conn, _c) = tokio::join!(rnats::connect(&urls, options()), server.accept());
    let conn = conn.unwrap();
    assert_eq!(conn.connected_url(), Some(server.url()));
    assert_eq!(conn.servers().len(), 2);
    conn.close().await;
}

#[tokio::test]
async fn test_flush_waits_for_own_pong() {
    let server = MockServer::start().await;
    let (conn, mut c) = connect(&server, options()).await;

    let first = tokio::spawn({
        let conn = conn.clone();
        async move { conn.flush().await }
    });
    assert_eq!(c.read_op().await, Op::Ping);
    let second = tokio::spawn({
        let conn = conn.clone();
        async move { conn.flush().await }
    });
    assert_eq!(c.read_op().await, Op::Ping);

    // a server PING in between is answered and completes nothing
    c.send("PING\r\n").await;
    assert_eq!(c.read_op().await, Op::Pong);
    assert!(!first.is_finished() && !second.is_finished());

    c.send("PONG\r\n").await;
    first.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    c.send("PONG\r\n").await;
    second.await.unwrap().unwrap();
    conn.close().await;
}

#[tokio::test]
async fn test_flush_timeout() {
    let server = MockServer::start().await;
    let (conn, mut c) = connect(&server, options()).await;
    let started = Instant::now();
    assert_eq!(conn.flush_timeout(Duration::from_millis(100)).await, Err(Error::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(c.read_op().await, Op::Ping);
    assert!(matches!(conn.flush_timeout(Duration::ZERO).await, Err(Error::InvalidArgument(_))));
    conn.close().await;
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions_then_buffered_publishes() {
    let server = MockServer::start().await;
    let events = Events::default();
    let (conn, mut c) = connect(&server, events.attach(options())).await;

    let subs: Vec<_> = (1..=3).map(|i| conn.subscribe(&format!("s.{}", i)).unwrap()).collect();
    for i in 1..=3 {
        assert_eq!(c.read_op().await, Op::sub(&format!("s.{}", i), i));
    }
    subs[2].auto_unsubscribe(10).unwrap();
    assert_eq!(c.read_op().await, Op::Unsub { sid: 3, max: Some(10) });

    drop(c);
    wait_until(|| conn.is_reconnecting()).await;
    for i in 0..5 {
        conn.publish("p", i.to_string()).unwrap();
    }
    assert!(conn.pending_bytes() > 0);

    let mut c = server.accept().await;
    for i in 1..=3 {
        assert_eq!(c.read_op().await, Op::sub(&format!("s.{}", i), i));
    }
    assert_eq!(c.read_op().await, Op::Unsub { sid: 3, max: Some(10) });
    for i in 0..5 {
        assert_eq!(c.read_op().await, Op::publish("p", &i.to_string()));
    }

    wait_until(|| conn.is_connected()).await;
    let (res, _) = tokio::join!(conn.flush(), c.pong());
    res.unwrap();
    assert_eq!(conn.pending_bytes(), 0);
    assert_eq!(conn.stats().reconnects, 1);
    wait_until(|| events.count(|ev| *ev == Event::Reconnected) == 1).await;
    assert_eq!(events.count(|ev| *ev == Event::Disconnected), 1);
    assert!(subs.iter().all(|sub| sub.is_valid()));
    conn.close().await;
}

#[tokio::test]
async fn test_reconnect_buffer_exceeded() {
    let server = MockServer::start().await;
    let (conn, c) = connect(&server, options().reconnect_buf_size(Some(32))).await;
    drop(c);
    wait_until(|| conn.is_reconnecting()).await;
    conn.publish("a", "0123456789").unwrap();
    assert_eq!(conn.publish("a", "0123456789"), Err(Error::ReconnectBufferExceeded));
    conn.close().await;
    assert_eq!(conn.publish("a", "x"), Err(Error::ConnectionClosed));
}

#[tokio::test]
async fn test_write_buffer_exceeded() {
    let server = MockServer::start().await;
    let (conn, mut c) = connect(&server, options().write_buf_size(Some(32))).await;
    // the writer task cannot run between two synchronous publishes
    conn.publish("a", "0123456789").unwrap();
    assert_eq!(conn.publish("a", "0123456789"), Err(Error::WriteBufferExceeded));
    assert_eq!(conn.stats().out_msgs, 1);
    assert_eq!(c.read_op().await, Op::publish("a", "0123456789"));

    let (res, _) = tokio::join!(conn.flush(), c.pong());
    res.unwrap();
    conn.publish("a", "0123456789").unwrap();
    assert_eq!(c.read_op().await, Op::publish("a", "0123456789"));
    assert!(conn.is_connected());
    conn.close().await;
}

#[tokio::test]
async fn test_protocol_violation_reconnects() {
    let server = MockServer::start().await;
    let events = Events::default();
    let (conn, mut c) = connect(&server, events.attach(options())).await;
    c.send("MSG foo 1 3\r\nabcdef\r\n").await;
    wait_until(|| !conn.is_connected()).await;
    assert!(matches!(conn.last_error(), Some(Error::Protocol(_))));

    let _c = server.accept().await;
    wait_until(|| conn.is_connected()).await;
    wait_until(|| events.count(|ev| matches!(ev, Event::Error(Error::Protocol(_)))) == 1).await;
    conn.close().await;
}

#[tokio::test]
async fn test_unanswered_pings_reconnect() {
    let server = MockServer::start().await;
    let events = Events::default();
    let opts = events.attach(options().ping_interval(Duration::from_millis(50)).max_pings_out(1));
    let (conn, mut c) = connect(&server, opts).await;
    assert_eq!(c.read_op().await, Op::Ping);
    wait_until(|| !conn.is_connected()).await;
    assert_eq!(conn.last_error(), Some(Error::StaleConnection));
    wait_until(|| events.count(|ev| *ev == Event::Error(Error::StaleConnection)) == 1).await;

    let _c = server.accept().await;
    wait_until(|| conn.is_connected()).await;
    assert_eq!(conn.stats().reconnects, 1);
    conn.close().await;
}

#[tokio::test]
async fn test_max_reconnects_closes() {
    let server = MockServer::start().await;
    let events = Events::default();
    let opts = events.attach(options().max_reconnect(Some(1)).reconnect_wait(Duration::from_millis(10)));
    let (conn, c) = connect(&server, opts).await;
    drop(server);
    drop(c);
    wait_until(|| conn.is_closed()).await;
    assert_eq!(conn.last_error(), Some(Error::MaxReconnects));
    wait_until(|| events.count(|ev| *ev == Event::Closed) == 1).await;
}

#[tokio::test]
async fn test_no_reconnect_closes() {
    let server = MockServer::start().await;
    let events = Events::default();
    let (conn, c) = connect(&server, events.attach(options().allow_reconnect(false))).await;
    drop(c);
    wait_until(|| conn.is_closed()).await;
    wait_until(|| events.count(|ev| *ev == Event::Closed) == 1).await;
    assert_eq!(events.all(), vec![Event::Connected, Event::Disconnected, Event::Closed]);
}

#[tokio::test]
async fn test_server_errors() {
    let server = MockServer::start().await;
    let events = Events::default();
    let (conn, mut c) = connect(&server, events.attach(options())).await;

    c.send("-ERR 'Permissions Violation for Publish to \"x\"'\r\n").await;
    wait_until(|| events.count(|ev| matches!(ev, Event::Error(Error::Server(_)))) == 1).await;
    assert!(conn.is_connected());

    c.send("-ERR 'Authorization Violation'\r\n").await;
    wait_until(|| conn.is_closed()).await;
    assert_eq!(conn.last_error(), Some(Error::Server("Authorization Violation".into())));
}

#[tokio::test]
async fn test_discovered_servers() {
    let server = MockServer::start().await;
    let info = r#"INFO {"server_id":"a","connect_urls":["10.0.0.1:4222","10.0.0.2:4222"]}"#;
    let url = server.url();
    let (conn, mut c) = tokio::join!(rnats::connect(&url, options()), server.accept_with_info(info));
    let conn = conn.unwrap();
    assert_eq!(conn.discovered_servers().len(), 2);

    c.send("INFO {\"server_id\":\"a\",\"connect_urls\":[\"10.0.0.3:4222\"]}\r\n").await;
    let (res, _) = tokio::join!(conn.flush(), c.pong());
    res.unwrap();
    assert_eq!(conn.discovered_servers().len(), 3);
    assert_eq!(conn.servers().len(), 4);
    conn.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = MockServer::start().await;
    let events = Events::default();
    let (conn, mut c) = connect(&server, events.attach(options())).await;
    let sub = conn.subscribe("foo").unwrap();
    assert_eq!(c.read_op().await, Op::sub("foo", 1));

    let (_, _) = tokio::join!(conn.close(), c.pong());
    conn.close().await;
    assert_eq!(conn.status(), Status::Closed);
    assert!(!sub.is_valid());
    assert_eq!(conn.subscribe("bar").unwrap_err(), Error::ConnectionClosed);
    assert_eq!(conn.flush().await, Err(Error::ConnectionClosed));
    wait_until(|| events.count(|ev| *ev == Event::Closed) == 1).await;
    assert_eq!(events.count(|ev| *ev == Event::Disconnected), 1);
}
