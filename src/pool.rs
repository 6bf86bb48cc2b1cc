//! Connections grouped per peer, with connect backoff.

use crate::connection::Connection;
use crate::request::PeerKey;
use crate::transport::{ConnectionId, Output};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Exponential backoff after failed connects to a peer.
///
/// The first failure waits `base`, each following failure doubles the wait up
/// to `max`. A successful connect resets it.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
    until: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max: max.max(base),
            current: None,
            until: None,
        }
    }

    /// Register a failure, returning how long to wait.
    pub fn failed(&mut self, now: Instant) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(c) => c.checked_mul(2).unwrap_or(self.max).min(self.max),
        };
        self.current = Some(next);
        self.until = Some(latest(now, next));
        next
    }

    pub fn succeeded(&mut self) {
        self.current = None;
        self.until = None;
    }

    /// Whether new connects must wait.
    pub fn is_active(&self, now: Instant) -> bool {
        self.until.map(|u| now < u).unwrap_or(false)
    }

    pub fn until(&self) -> Option<Instant> {
        self.until
    }

    /// No failure since the last success.
    pub fn is_clear(&self) -> bool {
        self.current.is_none()
    }
}

/// `now + wait`, shortened to the furthest instant the platform can represent.
fn latest(now: Instant, mut wait: Duration) -> Instant {
    loop {
        if let Some(t) = now.checked_add(wait) {
            return t;
        }
        wait /= 2;
    }
}

struct Peer {
    conns: Vec<ConnectionId>,
    backoff: Backoff,
}

pub(crate) struct Pool {
    backoff_base: Duration,
    backoff_max: Duration,
    peers: HashMap<PeerKey, Peer>,
    conns: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl Pool {
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Pool {
            backoff_base,
            backoff_max,
            peers: HashMap::new(),
            conns: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.conns.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Connection ids in creation order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.conns.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The least loaded established connection with a free pipeline slot.
    pub fn free_connection(&self, key: &PeerKey, max_pipelined: usize) -> Option<ConnectionId> {
        let peer = self.peers.get(key)?;
        peer.conns
            .iter()
            .filter_map(|id| self.conns.get(id))
            .filter(|c| c.has_free_slot(max_pipelined))
            .min_by_key(|c| (c.len(), c.id))
            .map(|c| c.id)
    }

    /// Whether another connection to the peer may be opened now.
    pub fn can_open(&self, key: &PeerKey, max_parallel: usize, now: Instant) -> bool {
        match self.peers.get(key) {
            None => true,
            Some(p) => p.conns.len() < max_parallel && !p.backoff.is_active(now),
        }
    }

    pub fn open(
        &mut self,
        key: PeerKey,
        now: Instant,
        connect_timeout: Option<Duration>,
    ) -> (ConnectionId, Output) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let (base, max) = (self.backoff_base, self.backoff_max);
        let peer = self.peers.entry(key.clone()).or_insert_with(|| Peer {
            conns: vec![],
            backoff: Backoff::new(base, max),
        });
        peer.conns.push(id);

        let (conn, output) = Connection::new(id, key, now, connect_timeout);
        self.conns.insert(id, conn);

        (id, output)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.conns.remove(&id)?;

        if let Some(peer) = self.peers.get_mut(&conn.key) {
            peer.conns.retain(|c| *c != id);
            // keep the peer around while it remembers failures
            if peer.conns.is_empty() && peer.backoff.is_clear() {
                self.peers.remove(&conn.key);
            }
        }

        Some(conn)
    }

    pub fn connect_failed(&mut self, key: &PeerKey, now: Instant) -> Duration {
        let (base, max) = (self.backoff_base, self.backoff_max);
        let peer = self.peers.entry(key.clone()).or_insert_with(|| Peer {
            conns: vec![],
            backoff: Backoff::new(base, max),
        });
        let wait = peer.backoff.failed(now);
        debug!("{} connect backoff {:?}", key, wait);
        wait
    }

    pub fn connect_succeeded(&mut self, key: &PeerKey) {
        if let Some(peer) = self.peers.get_mut(key) {
            peer.backoff.succeeded();
        }
    }

    /// Connecting connections past their connect deadline.
    pub fn connect_expired(&self, now: Instant) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .conns
            .values()
            .filter(|c| c.connect_deadline().map(|d| d <= now).unwrap_or(false))
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// Idle connections that have been idle too long.
    pub fn idle_expired(&self, now: Instant, max_idle: Duration) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .conns
            .values()
            .filter(|c| c.idle_deadline(max_idle).map(|d| d <= now).unwrap_or(false))
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// Connections still waiting for the response of an aborted request
    /// past its drain deadline.
    pub fn drain_expired(&self, now: Instant) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .conns
            .values()
            .filter(|c| c.drain_deadline().map(|d| d <= now).unwrap_or(false))
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// Earliest connect deadline, idle expiry, drain deadline or end of a backoff.
    pub fn next_deadline(&self, now: Instant, max_idle: Option<Duration>) -> Option<Instant> {
        let conns = self.conns.values().flat_map(|c| {
            let idle = max_idle.and_then(|m| c.idle_deadline(m));
            c.connect_deadline()
                .into_iter()
                .chain(idle)
                .chain(c.drain_deadline())
        });

        let backoffs = self
            .peers
            .values()
            .filter_map(|p| p.backoff.until())
            .filter(|u| *u > now);

        conns.chain(backoffs).min()
    }
}
