use std::fmt;

use bytes::Bytes;
use bytestring::ByteString;

/// A message delivered to a subscription
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: ByteString,
    pub reply: Option<ByteString>,
    pub payload: Bytes,
    pub sid: u64,
}

impl Message {
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("reply", &self.reply)
            .field("sid", &self.sid)
            .field("payload", &format_args!("{} bytes", self.payload.len()))
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.subject, String::from_utf8_lossy(&self.payload))
    }
}
