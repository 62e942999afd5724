use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::subject::{validate_publish_subject, validate_queue, validate_reply, validate_subscribe_subject};
use crate::ClientOp;

const CRLF: &[u8] = b"\r\n";

#[inline]
fn put_u64(dst: &mut BytesMut, n: u64) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(n).as_bytes());
}

/// Encodes `op` into `dst`, validating subjects, queue and reply first.
///
/// Nothing is written to `dst` when validation fails.
pub fn encode(op: &ClientOp, dst: &mut BytesMut) -> Result<(), EncodeError> {
    match op {
        ClientOp::Connect(info) => {
            let json = serde_json::to_vec(info).map_err(|e| EncodeError::InvalidConnect(e.to_string()))?;
            dst.reserve(json.len() + 10);
            dst.put_slice(b"CONNECT ");
            dst.put_slice(&json);
            dst.put_slice(CRLF);
        }
        ClientOp::Pub { subject, reply, payload } => {
            validate_publish_subject(subject)?;
            if let Some(reply) = reply {
                validate_reply(reply)?;
            }
            dst.reserve(subject.len() + reply.as_ref().map(|r| r.len() + 1).unwrap_or(0) + payload.len() + 32);
            dst.put_slice(b"PUB ");
            dst.put_slice(subject.as_bytes());
            dst.put_u8(b' ');
            if let Some(reply) = reply {
                dst.put_slice(reply.as_bytes());
                dst.put_u8(b' ');
            }
            put_u64(dst, payload.len() as u64);
            dst.put_slice(CRLF);
            dst.put_slice(payload);
            dst.put_slice(CRLF);
        }
        ClientOp::Sub { subject, queue, sid } => {
            validate_subscribe_subject(subject)?;
            if let Some(queue) = queue {
                validate_queue(queue)?;
            }
            dst.put_slice(b"SUB ");
            dst.put_slice(subject.as_bytes());
            dst.put_u8(b' ');
            if let Some(queue) = queue {
                dst.put_slice(queue.as_bytes());
                dst.put_u8(b' ');
            }
            put_u64(dst, *sid);
            dst.put_slice(CRLF);
        }
        ClientOp::Unsub { sid, max } => {
            dst.put_slice(b"UNSUB ");
            put_u64(dst, *sid);
            if let Some(max) = max {
                dst.put_u8(b' ');
                put_u64(dst, *max);
            }
            dst.put_slice(CRLF);
        }
        ClientOp::Ping => dst.put_slice(b"PING\r\n"),
        ClientOp::Pong => dst.put_slice(b"PONG\r\n"),
    }
    Ok(())
}
