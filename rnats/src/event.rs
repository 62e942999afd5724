use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::Error;

/// Connection lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// First successful connection
    Connected,
    /// The transport was lost or closed
    Disconnected,
    /// A new transport replaced a lost one
    Reconnected,
    /// The connection is permanently closed
    Closed,
    /// Asynchronous error: slow consumer, server advisory, handler panic
    Error(Error),
}

pub trait EventHandler: 'static + Sync + Send + Fn(Event) {}
impl<T> EventHandler for T where T: 'static + Sync + Send + Fn(Event) {}

pub trait ConnectionCallback: 'static + Sync + Send + Fn() {}
impl<T> ConnectionCallback for T where T: 'static + Sync + Send + Fn() {}

pub trait ErrorCallback: 'static + Sync + Send + Fn(Error) {}
impl<T> ErrorCallback for T where T: 'static + Sync + Send + Fn(Error) {}

#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub(crate) event: Option<Arc<dyn EventHandler>>,
    pub(crate) disconnected: Option<Arc<dyn ConnectionCallback>>,
    pub(crate) reconnected: Option<Arc<dyn ConnectionCallback>>,
    pub(crate) closed: Option<Arc<dyn ConnectionCallback>>,
    pub(crate) error: Option<Arc<dyn ErrorCallback>>,
}

impl Callbacks {
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.disconnected.is_none()
            && self.reconnected.is_none()
            && self.closed.is_none()
            && self.error.is_none()
    }

    fn dispatch(&self, ev: Event) {
        match &ev {
            Event::Connected => {}
            Event::Disconnected => self.disconnected.iter().for_each(|f| f()),
            Event::Reconnected => self.reconnected.iter().for_each(|f| f()),
            Event::Closed => self.closed.iter().for_each(|f| f()),
            Event::Error(e) => self.error.iter().for_each(|f| f(e.clone())),
        }
        if let Some(f) = self.event.as_ref() {
            f(ev);
        }
    }
}

/// Runs user callbacks on their own task, in the order events were raised
pub(crate) struct Dispatcher {
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Event>>>,
}

impl Dispatcher {
    pub(crate) fn new(callbacks: Callbacks) -> Self {
        if callbacks.is_empty() {
            return Dispatcher { tx: parking_lot::Mutex::new(None) };
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(|| callbacks.dispatch(ev))).is_err() {
                    log::warn!("event callback panicked");
                }
            }
        });
        Dispatcher { tx: parking_lot::Mutex::new(Some(tx)) }
    }

    #[inline]
    pub(crate) fn emit(&self, ev: Event) {
        log::debug!("event: {:?}", ev);
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(ev);
        }
    }

    /// Emits the final event and lets the callback task finish.
    #[inline]
    pub(crate) fn finish(&self, ev: Event) {
        log::debug!("event: {:?}", ev);
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(ev);
        }
    }
}
