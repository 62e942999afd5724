use bytestring::ByteString;

use crate::error::DecodeError;
use crate::types::ServerInfo;
use crate::utils::{parse_size, parse_u64, split_args};
use crate::ServerOp;

/// Arguments of a `MSG` control line, kept while the payload is awaited
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MsgArgs {
    pub(crate) subject: ByteString,
    pub(crate) sid: u64,
    pub(crate) reply: Option<ByteString>,
    pub(crate) size: usize,
}

#[derive(Debug)]
pub(crate) enum ControlLine {
    Op(ServerOp),
    Msg(MsgArgs),
}

/// Parses one control line without its CRLF.
pub(crate) fn decode_control_line(line: &[u8], max_payload: usize) -> Result<ControlLine, DecodeError> {
    let line = std::str::from_utf8(line).map_err(|_| DecodeError::Utf8Error)?;
    let (op, rest) = match line.find([' ', '\t']) {
        Some(pos) => (&line[..pos], &line[pos + 1..]),
        None => (line, ""),
    };
    let op = match op {
        "MSG" => return decode_msg_args(rest, max_payload).map(ControlLine::Msg),
        "INFO" => {
            let info = ServerInfo::parse(rest.trim()).map_err(|e| DecodeError::InvalidInfo(e.to_string()))?;
            ServerOp::Info(Box::new(info))
        }
        "PING" => {
            ensure!(rest.trim().is_empty(), DecodeError::InvalidArguments("PING"));
            ServerOp::Ping
        }
        "PONG" => {
            ensure!(rest.trim().is_empty(), DecodeError::InvalidArguments("PONG"));
            ServerOp::Pong
        }
        "+OK" => ServerOp::Ok,
        "-ERR" => ServerOp::Err(unquote(rest.trim()).to_owned()),
        _ => return Err(DecodeError::UnknownOp(op.to_owned())),
    };
    Ok(ControlLine::Op(op))
}

fn decode_msg_args(args: &str, max_payload: usize) -> Result<MsgArgs, DecodeError> {
    let mut parts = [""; 4];
    let mut n = 0;
    for arg in split_args(args) {
        ensure!(n < parts.len(), DecodeError::InvalidArguments("MSG"));
        parts[n] = arg;
        n += 1;
    }
    let (subject, sid, reply, size) = match n {
        3 => (parts[0], parts[1], None, parts[2]),
        4 => (parts[0], parts[1], Some(parts[2]), parts[3]),
        _ => return Err(DecodeError::InvalidArguments("MSG")),
    };
    Ok(MsgArgs {
        subject: ByteString::from(subject),
        sid: parse_u64(sid)?,
        reply: reply.map(ByteString::from),
        size: parse_size(size, max_payload)?,
    })
}

#[inline]
fn unquote(text: &str) -> &str {
    text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')).unwrap_or(text)
}
