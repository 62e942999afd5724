use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::subscription::{CloseReason, SubscriptionInner};

/// Active subscriptions keyed by sid
///
/// Sids are assigned in increasing order starting at 1 and never reused
/// within a connection.
pub(crate) struct Registry {
    subs: DashMap<u64, Arc<SubscriptionInner>>,
    next_sid: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Registry { subs: DashMap::default(), next_sid: AtomicU64::new(1) }
    }
}

impl Registry {
    #[inline]
    pub(crate) fn next_sid(&self) -> u64 {
        self.next_sid.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn insert(&self, sub: Arc<SubscriptionInner>) {
        self.subs.insert(sub.sid, sub);
    }

    #[inline]
    pub(crate) fn get(&self, sid: u64) -> Option<Arc<SubscriptionInner>> {
        self.subs.get(&sid).map(|entry| entry.value().clone())
    }

    #[inline]
    pub(crate) fn remove(&self, sid: u64) -> Option<Arc<SubscriptionInner>> {
        self.subs.remove(&sid).map(|(_, sub)| sub)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }

    /// Subscriptions in sid order, used to replay interest after a reconnect
    pub(crate) fn snapshot(&self) -> Vec<Arc<SubscriptionInner>> {
        let mut subs: Vec<Arc<SubscriptionInner>> = self.subs.iter().map(|entry| entry.value().clone()).collect();
        subs.sort_by_key(|sub| sub.sid);
        subs
    }

    pub(crate) fn close_all(&self, reason: CloseReason) {
        for sub in self.snapshot() {
            self.subs.remove(&sub.sid);
            sub.close(reason);
        }
    }
}
