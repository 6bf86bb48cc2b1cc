//! Assignment of queued requests to connections.

use crate::connection::PipelineEntry;
use crate::context::Shared;
use crate::request::{RequestId, RequestState};
use crate::transport::ConnectionId;

#[derive(Debug, Clone, Copy)]
struct Queued {
    id: RequestId,
    urgent: bool,
    seq: u64,
}

impl Queued {
    // urgent first, then submit order
    fn order(&self) -> (bool, u64) {
        (!self.urgent, self.seq)
    }
}

/// Requests waiting for a connection, in the order they should get one.
#[derive(Debug, Default)]
pub(crate) struct Queue {
    entries: Vec<Queued>,
}

impl Queue {
    pub fn push(&mut self, id: RequestId, urgent: bool, seq: u64) {
        let q = Queued { id, urgent, seq };
        let idx = self
            .entries
            .partition_point(|e| e.order() <= q.order());
        self.entries.insert(idx, q);
    }

    pub fn remove(&mut self, id: RequestId) -> bool {
        let len = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != len
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Shared {
    /// Hand queued requests to connections with free capacity, opening new
    /// connections within the limits.
    pub(crate) fn dispatch(&mut self) {
        self.dispatch_needed = false;

        if self.queue.is_empty() || self.closed {
            return;
        }

        let now = self.now();
        let max_parallel = self.settings.max_parallel();
        let max_pipelined = self.settings.max_pipelined();

        for id in self.queue.ids() {
            let key = match self.requests.get(&id) {
                Some(r) if r.state == RequestState::Queued => r.target.key(),
                _ => {
                    self.queue.remove(id);
                    continue;
                }
            };

            if let Some(conn) = self.pool.free_connection(&key, max_pipelined) {
                self.queue.remove(id);
                self.send_on(id, conn);
            } else if self.pool.can_open(&key, max_parallel, now) {
                self.queue.remove(id);
                let (conn, output) = self.pool.open(key, now, self.settings.connect_timeout());
                self.push_output(output, None);
                self.reserve(id, conn);
            } else {
                trace!("{} stays queued", id);
            }
        }
    }

    /// Put the request in a connecting connection's pipeline. It is sent
    /// once the connection is established.
    fn reserve(&mut self, id: RequestId, conn: ConnectionId) {
        let now = self.now();

        let rec = match self.requests.get_mut(&id) {
            Some(v) => v,
            None => return,
        };

        rec.conn = Some(conn);
        rec.deadline = rec.timeout.and_then(|t| now.checked_add(t));
        rec.set_state(RequestState::Connecting, now);

        let entry = PipelineEntry {
            req: id,
            method: rec.method.clone(),
            sent: false,
            aborted: false,
            drain_deadline: None,
        };

        if let Some(c) = self.pool.get_mut(conn) {
            c.push(entry);
        }
    }

    /// Pipeline the request on an established connection.
    fn send_on(&mut self, id: RequestId, conn: ConnectionId) {
        let now = self.now();

        let rec = match self.requests.get_mut(&id) {
            Some(v) => v,
            None => return,
        };

        rec.deadline = rec.timeout.and_then(|t| now.checked_add(t));

        let entry = PipelineEntry {
            req: id,
            method: rec.method.clone(),
            sent: false,
            aborted: false,
            drain_deadline: None,
        };

        if let Some(c) = self.pool.get_mut(conn) {
            c.push(entry);
        }

        self.transmit(id, conn);
    }
}
