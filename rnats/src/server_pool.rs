use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use rnats_net::ServerAddr;

#[derive(Debug, Clone)]
pub(crate) struct Server {
    pub(crate) addr: ServerAddr,
    pub(crate) did_connect: bool,
    pub(crate) reconnects: usize,
    pub(crate) last_attempt: Option<Instant>,
    /// Announced by the cluster rather than configured
    pub(crate) is_implicit: bool,
}

impl Server {
    fn new(addr: ServerAddr, is_implicit: bool) -> Self {
        Server { addr, did_connect: false, reconnects: 0, last_attempt: None, is_implicit }
    }

    /// Time left before this server may be tried again
    #[inline]
    pub(crate) fn wait_time(&self, reconnect_wait: Duration) -> Duration {
        match self.last_attempt {
            Some(t) => reconnect_wait.saturating_sub(t.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Ordered list of candidate servers
///
/// The server in use sits at `current`. Selecting the next one moves it to
/// the back of the list and drops servers that used up their attempts.
#[derive(Debug)]
pub(crate) struct ServerPool {
    servers: Vec<Server>,
    current: Option<usize>,
    randomize: bool,
}

impl ServerPool {
    pub(crate) fn new(addrs: Vec<ServerAddr>, randomize: bool) -> Self {
        let mut servers: Vec<Server> = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if !servers.iter().any(|s| s.addr == addr) {
                servers.push(Server::new(addr, false));
            }
        }
        if randomize {
            servers.shuffle(&mut rand::rng());
        }
        ServerPool { servers, current: None, randomize }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.servers.len()
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> Option<&Server> {
        self.servers.get(idx)
    }

    #[inline]
    pub(crate) fn set_current(&mut self, idx: usize) {
        if idx < self.servers.len() {
            self.current = Some(idx);
        }
    }

    #[inline]
    pub(crate) fn current(&self) -> Option<&Server> {
        self.current.and_then(|idx| self.servers.get(idx))
    }

    #[inline]
    pub(crate) fn current_mut(&mut self) -> Option<&mut Server> {
        match self.current {
            Some(idx) => self.servers.get_mut(idx),
            None => None,
        }
    }

    /// Rotates the current server to the back and returns the next one to
    /// try, or `None` once every server exhausted `max_reconnect` attempts.
    pub(crate) fn next_server(&mut self, max_reconnect: Option<usize>) -> Option<&Server> {
        let exhausted = |s: &Server| max_reconnect.is_some_and(|max| s.reconnects >= max);
        if let Some(idx) = self.current.take() {
            if idx < self.servers.len() {
                let s = self.servers.remove(idx);
                self.servers.push(s);
            }
        }
        self.servers.retain(|s| {
            if exhausted(s) {
                log::info!("{} removed from the server pool after {} attempts", s.addr, s.reconnects);
                false
            } else {
                true
            }
        });
        if self.servers.is_empty() {
            return None;
        }
        self.current = Some(0);
        self.servers.first()
    }

    /// Records an attempt on the current server
    #[inline]
    pub(crate) fn mark_attempt(&mut self) {
        if let Some(s) = self.current_mut() {
            s.reconnects += 1;
            s.last_attempt = Some(Instant::now());
        }
    }

    #[inline]
    pub(crate) fn mark_connected(&mut self) {
        if let Some(s) = self.current_mut() {
            s.did_connect = true;
            s.reconnects = 0;
            s.last_attempt = Some(Instant::now());
        }
    }

    /// Adds servers announced in `INFO.connect_urls`; returns whether any was new.
    pub(crate) fn add_discovered(&mut self, urls: &[String]) -> bool {
        let mut added: Vec<Server> = Vec::new();
        for url in urls {
            let addr = match url.parse::<ServerAddr>() {
                Ok(addr) => addr,
                Err(e) => {
                    log::warn!("ignoring discovered server {:?}, {}", url, e);
                    continue;
                }
            };
            let known = |s: &Server| s.addr.host_port() == addr.host_port();
            if !self.servers.iter().any(known) && !added.iter().any(known) {
                added.push(Server::new(addr, true));
            }
        }
        if added.is_empty() {
            return false;
        }
        if self.randomize {
            added.shuffle(&mut rand::rng());
        }
        log::debug!("discovered servers: {:?}", added.iter().map(|s| &s.addr).collect::<Vec<_>>());
        self.servers.extend(added);
        true
    }

    pub(crate) fn addrs(&self) -> Vec<ServerAddr> {
        self.servers.iter().map(|s| s.addr.clone()).collect()
    }

    pub(crate) fn discovered(&self) -> Vec<ServerAddr> {
        self.servers.iter().filter(|s| s.is_implicit).map(|s| s.addr.clone()).collect()
    }
}
