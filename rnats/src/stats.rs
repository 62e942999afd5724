use serde::{Deserialize, Serialize};

use rnats_utils::Counter;

/// Traffic counters of a connection
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub in_msgs: Counter,
    pub out_msgs: Counter,
    pub in_bytes: Counter,
    pub out_bytes: Counter,
    pub reconnects: Counter,
}

impl Stats {
    #[inline]
    pub(crate) fn snapshot(&self) -> Statistics {
        Statistics {
            in_msgs: self.in_msgs.count(),
            out_msgs: self.out_msgs.count(),
            in_bytes: self.in_bytes.count(),
            out_bytes: self.out_bytes.count(),
            reconnects: self.reconnects.count(),
        }
    }

    #[inline]
    pub(crate) fn reset(&self) {
        self.in_msgs.reset();
        self.out_msgs.reset();
        self.in_bytes.reset();
        self.out_bytes.reset();
        self.reconnects.reset();
    }
}

/// Read-only snapshot of the connection's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub reconnects: u64,
}

impl Statistics {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "in_msgs": self.in_msgs,
            "out_msgs": self.out_msgs,
            "in_bytes": self.in_bytes,
            "out_bytes": self.out_bytes,
            "reconnects": self.reconnects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let stats = Stats::default();
        stats.in_msgs.inc();
        stats.in_bytes.incs(5);
        stats.reconnects.inc();
        let snap = stats.snapshot();
        assert_eq!((snap.in_msgs, snap.in_bytes, snap.reconnects), (1, 5, 1));
        assert_eq!(snap.to_json()["in_bytes"], 5);
        assert_eq!(snap.to_json()["out_msgs"], 0);

        stats.reset();
        assert_eq!(stats.snapshot(), Statistics::default());
    }
}
