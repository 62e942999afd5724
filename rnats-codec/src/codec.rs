use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::decode::{decode_control_line, ControlLine, MsgArgs};
use crate::error::{DecodeError, EncodeError};
use crate::utils::find_crlf;
use crate::{ClientOp, ServerOp, DEFAULT_MAX_PAYLOAD, MAX_CONTROL_LINE_SIZE, MAX_INFO_LINE_SIZE};

// upper bound of a single reservation while waiting for a payload
const MAX_RESERVE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DecodeState {
    Op,
    Payload(MsgArgs),
}

#[derive(Debug, Clone)]
/// NATS text protocol codec
///
/// Decodes [`ServerOp`]s and encodes [`ClientOp`]s. Decoding state survives
/// between calls, so a frame may arrive split across any number of reads.
pub struct NatsCodec {
    state: DecodeState,
    // where the CRLF scan resumes on the next call
    scan_from: usize,
    max_payload: usize,
    max_control_line: usize,
}

impl NatsCodec {
    /// Create `NatsCodec` instance
    pub fn new(max_payload: usize) -> Self {
        NatsCodec { state: DecodeState::Op, scan_from: 0, max_payload, max_control_line: MAX_CONTROL_LINE_SIZE }
    }

    /// Set max inbound payload size.
    ///
    /// If max size is set to `0`, size is unlimited.
    pub fn set_max_payload(&mut self, size: usize) {
        self.max_payload = size;
    }

    #[inline]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn set_max_control_line(&mut self, size: usize) {
        self.max_control_line = size;
    }

    #[inline]
    fn reset(&mut self) {
        self.state = DecodeState::Op;
        self.scan_from = 0;
    }

    #[inline]
    fn line_limit(&self, src: &[u8]) -> usize {
        if src.starts_with(b"INFO") {
            MAX_INFO_LINE_SIZE.max(self.max_control_line)
        } else {
            self.max_control_line
        }
    }

    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<ServerOp>, DecodeError> {
        loop {
            match &self.state {
                DecodeState::Op => {
                    let pos = match find_crlf(src, self.scan_from) {
                        Some(pos) => pos,
                        None => {
                            let limit = self.line_limit(src);
                            ensure!(src.len() <= limit + 2, DecodeError::MaxControlLineExceeded(limit));
                            // a CR at the very end may be completed by the next read
                            self.scan_from = src.len().saturating_sub(1);
                            return Ok(None);
                        }
                    };
                    let limit = self.line_limit(src);
                    ensure!(pos <= limit, DecodeError::MaxControlLineExceeded(limit));
                    self.scan_from = 0;
                    let line = src.split_to(pos + 2);
                    match decode_control_line(&line[..pos], self.max_payload)? {
                        ControlLine::Op(op) => return Ok(Some(op)),
                        ControlLine::Msg(args) => {
                            log::trace!("MSG {} sid: {}, size: {}", args.subject, args.sid, args.size);
                            self.state = DecodeState::Payload(args);
                        }
                    }
                }
                DecodeState::Payload(args) => {
                    let size = args.size;
                    let need = size.checked_add(2).ok_or(DecodeError::InvalidNumber)?;
                    if src.len() < need {
                        src.reserve((need - src.len()).min(MAX_RESERVE));
                        return Ok(None);
                    }
                    ensure!(&src[size..need] == b"\r\n", DecodeError::MissingCrlf);
                    let payload = src.split_to(size).freeze();
                    src.advance(2);
                    if let DecodeState::Payload(MsgArgs { subject, sid, reply, .. }) =
                        std::mem::replace(&mut self.state, DecodeState::Op)
                    {
                        return Ok(Some(ServerOp::Msg { subject, sid, reply, payload }));
                    }
                }
            }
        }
    }
}

impl Default for NatsCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for NatsCodec {
    type Item = ServerOp;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        let res = self.decode_frame(src);
        if res.is_err() {
            self.reset();
        }
        res
    }
}

impl Encoder<ClientOp> for NatsCodec {
    type Error = EncodeError;

    #[inline]
    fn encode(&mut self, item: ClientOp, dst: &mut BytesMut) -> Result<(), EncodeError> {
        crate::encode::encode(&item, dst)
    }
}

/// Push-style parser over [`NatsCodec`]
///
/// Feeds arbitrary chunks and returns every operation completed by them.
/// After a failure the buffered input is discarded.
#[derive(Debug, Default)]
pub struct Parser {
    codec: NatsCodec,
    buf: BytesMut,
}

impl Parser {
    pub fn new(max_payload: usize) -> Self {
        Parser { codec: NatsCodec::new(max_payload), buf: BytesMut::new() }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ServerOp>, DecodeError> {
        self.buf.extend_from_slice(data);
        let mut ops = Vec::new();
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(op)) => ops.push(op),
                Ok(None) => return Ok(ops),
                Err(e) => {
                    self.buf.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Bytes received but not yet part of a complete operation
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const STREAM: &[u8] = b"INFO {\"server_id\":\"s1\",\"max_payload\":1048576}\r\n\
        +OK\r\n\
        PING\r\n\
        MSG foo.bar 1 5\r\nhello\r\n\
        MSG foo.bar 2 _INBOX.abc 0\r\n\r\n\
        MSG crlf 3 4\r\n\r\n\r\n\r\n\
        -ERR 'Stale Connection'\r\n\
        PONG\r\n";

    fn parse_chunks(chunk: usize) -> Vec<ServerOp> {
        let mut parser = Parser::default();
        let mut ops = Vec::new();
        for part in STREAM.chunks(chunk) {
            ops.extend(parser.feed(part).unwrap());
        }
        assert_eq!(parser.buffered(), 0);
        ops
    }

    #[test]
    fn test_whole_stream() {
        let ops = parse_chunks(STREAM.len());
        assert_eq!(ops.len(), 8);
        assert!(matches!(&ops[0], ServerOp::Info(info) if info.server_id == "s1"));
        assert_eq!(ops[1], ServerOp::Ok);
        assert_eq!(ops[2], ServerOp::Ping);
        assert_eq!(
            ops[3],
            ServerOp::Msg {
                subject: "foo.bar".into(),
                sid: 1,
                reply: None,
                payload: Bytes::from_static(b"hello")
            }
        );
        assert_eq!(
            ops[4],
            ServerOp::Msg { subject: "foo.bar".into(), sid: 2, reply: Some("_INBOX.abc".into()), payload: Bytes::new() }
        );
        assert_eq!(
            ops[5],
            ServerOp::Msg { subject: "crlf".into(), sid: 3, reply: None, payload: Bytes::from_static(b"\r\n\r\n") }
        );
        assert_eq!(ops[6], ServerOp::Err("Stale Connection".into()));
        assert_eq!(ops[7], ServerOp::Pong);
    }

    #[test]
    fn test_split_boundaries() {
        let whole = parse_chunks(STREAM.len());
        for chunk in 1..STREAM.len() {
            assert_eq!(parse_chunks(chunk), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_payload_longer_than_declared() {
        let mut parser = Parser::default();
        let res = parser.feed(b"MSG foo 1 5\r\nhello!\r\n");
        assert!(matches!(res, Err(DecodeError::MissingCrlf)));
        assert_eq!(parser.buffered(), 0);
        // recovers on fresh input
        assert_eq!(parser.feed(b"PING\r\n").unwrap(), vec![ServerOp::Ping]);
    }

    #[test]
    fn test_payload_shorter_than_declared() {
        let mut parser = Parser::default();
        // waits for the full payload, the trailing CRLF is then in the wrong place
        assert!(parser.feed(b"MSG foo 1 5\r\nhi\r\n").unwrap().is_empty());
        assert!(matches!(parser.feed(b"PING\r\n"), Err(DecodeError::MissingCrlf)));
    }

    #[test]
    fn test_max_payload() {
        let mut codec = NatsCodec::new(4);
        let mut buf = BytesMut::from(&b"MSG foo 1 5\r\nhello\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxPayloadExceeded { size: 5, max: 4 })));

        codec.set_max_payload(0);
        let mut buf = BytesMut::from(&b"MSG foo 1 5\r\nhello\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Ok(Some(ServerOp::Msg { .. }))));
    }

    #[test]
    fn test_unlimited_payload_rejects_huge_size() {
        let mut parser = Parser::new(0);
        let res = parser.feed(b"MSG foo 1 18446744073709551615\r\nx");
        assert!(matches!(res, Err(DecodeError::InvalidNumber)));
        assert_eq!(parser.buffered(), 0);

        // large but representable: waits without reserving the whole size up front
        let mut codec = NatsCodec::new(0);
        let mut buf = BytesMut::from(&b"MSG foo 1 1099511627776\r\nx"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() <= 2 * MAX_RESERVE);
    }

    #[test]
    fn test_control_line_too_long() {
        let mut codec = NatsCodec::default();
        codec.set_max_control_line(16);
        let mut buf = BytesMut::from(&b"MSG a.very.long.subject.name 1 0"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxControlLineExceeded(16))));

        let mut buf = BytesMut::from(&b"-ERR 'this is too long'\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxControlLineExceeded(16))));
    }

    #[test]
    fn test_unknown_op() {
        let mut parser = Parser::default();
        assert!(matches!(parser.feed(b"HELLO\r\n"), Err(DecodeError::UnknownOp(_))));
    }

    #[test]
    fn test_encode_decode_msg_roundtrip_payload() {
        let mut codec = NatsCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(ClientOp::Ping, &mut buf).unwrap();
        assert_eq!(buf, b"PING\r\n".as_ref());
        let mut buf = BytesMut::from(&b"MSG big 1 262144\r\n"[..]);
        buf.extend_from_slice(&vec![b'a'; 262144]);
        buf.extend_from_slice(b"\r\n");
        match codec.decode(&mut buf).unwrap() {
            Some(ServerOp::Msg { payload, .. }) => assert_eq!(payload.len(), 262144),
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }
}
