//! One connection to a peer and the requests pipelined on it.

use crate::http11::{ResponseHead, WireCodec};
use crate::limit::{allow_reuse, LimitRead};
use crate::request::{PeerKey, RequestId, Response};
use crate::transport::{ConnectionId, Output};
use crate::Error;
use http::Method;
use std::collections::VecDeque;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

const READ_BUF_INIT_SIZE: usize = 16_384;

// A response head bigger than this is not something we want to buffer.
const MAX_HEAD_SIZE: usize = 1024 * 1024;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Resolving, connecting or doing TLS handshake.
    Connecting,
    /// Established without requests.
    Idle,
    /// Established with at least one request in the pipeline.
    Active,
    /// The server announced it closes after the current response.
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectPhase {
    Resolving,
    Tcp,
    Handshake,
    Done,
}

/// A request occupying a pipeline slot.
#[derive(Debug, Clone)]
pub(crate) struct PipelineEntry {
    pub req: RequestId,
    pub method: Method,
    /// The request bytes have been handed to the loop.
    pub sent: bool,
    /// The request was aborted after it was sent. Its response is read and thrown away.
    pub aborted: bool,
    /// Give up on the connection if the discarded response isn't read by then.
    pub drain_deadline: Option<Instant>,
}

/// Things happening while reading from a connection.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// A response head arrived for the request.
    Head { req: RequestId, aborted: bool },
    /// A response was read in full.
    Response {
        entry: PipelineEntry,
        response: Response,
    },
}

enum RecvState {
    Head,
    Body {
        head: ResponseHead,
        limit: LimitRead,
        payload: Vec<u8>,
    },
}

pub(crate) struct Connection {
    pub id: ConnectionId,
    pub key: PeerKey,
    state: ConnectionState,
    phase: ConnectPhase,
    pipeline: VecDeque<PipelineEntry>,
    read_buf: Vec<u8>,
    recv: RecvState,
    addrs: Vec<SocketAddr>,
    next_addr: usize,
    connect_deadline: Option<Instant>,
    idle_since: Option<Instant>,
    served: u64,
}

impl Connection {
    /// Start connecting, returning the first thing the loop should do.
    pub fn new(
        id: ConnectionId,
        key: PeerKey,
        now: Instant,
        connect_timeout: Option<Duration>,
    ) -> (Self, Output) {
        let literal = key
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>();

        let mut conn = Connection {
            id,
            key,
            state: ConnectionState::Connecting,
            phase: ConnectPhase::Resolving,
            pipeline: VecDeque::new(),
            read_buf: Vec::with_capacity(READ_BUF_INIT_SIZE),
            recv: RecvState::Head,
            addrs: vec![],
            next_addr: 0,
            connect_deadline: connect_timeout.and_then(|t| now.checked_add(t)),
            idle_since: None,
            served: 0,
        };

        let output = match literal {
            Ok(ip) => {
                conn.addrs = vec![SocketAddr::new(ip, conn.key.port)];
                conn.phase = ConnectPhase::Tcp;
                conn.connect_next()
            }
            Err(_) => Output::Resolve {
                conn: id,
                host: conn.key.host.clone(),
            },
        };

        debug!("{} open to {}: {:?}", id, conn.key, output);

        (conn, output)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn phase(&self) -> ConnectPhase {
        self.phase
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Established and able to take more requests.
    pub fn is_usable(&self) -> bool {
        matches!(self.state, ConnectionState::Idle | ConnectionState::Active)
    }

    pub fn len(&self) -> usize {
        self.pipeline.len()
    }

    pub fn has_free_slot(&self, max_pipelined: usize) -> bool {
        self.is_usable() && self.pipeline.len() < max_pipelined
    }

    pub fn connect_deadline(&self) -> Option<Instant> {
        if self.is_connecting() {
            self.connect_deadline
        } else {
            None
        }
    }

    pub fn idle_deadline(&self, max_idle: Duration) -> Option<Instant> {
        match (self.state, self.idle_since) {
            (ConnectionState::Idle, Some(since)) => since.checked_add(max_idle),
            _ => None,
        }
    }

    /// Earliest time an aborted request's response must have been read.
    pub fn drain_deadline(&self) -> Option<Instant> {
        self.pipeline
            .iter()
            .filter(|e| e.aborted)
            .filter_map(|e| e.drain_deadline)
            .min()
    }

    /// Number of responses read on this connection.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// The request the next response belongs to.
    pub fn head_request(&self) -> Option<RequestId> {
        self.pipeline.front().filter(|e| e.sent).map(|e| e.req)
    }

    pub fn push(&mut self, entry: PipelineEntry) {
        trace!("{} push {} sent: {}", self.id, entry.req, entry.sent);
        self.pipeline.push_back(entry);
        if self.state == ConnectionState::Idle {
            self.state = ConnectionState::Active;
        }
        self.idle_since = None;
    }

    fn connect_next(&mut self) -> Output {
        let addr = self.addrs[self.next_addr];
        self.next_addr += 1;
        Output::Connect { conn: self.id, addr }
    }

    pub fn resolved(&mut self, addrs: Vec<IpAddr>) -> Result<Output, Error> {
        if addrs.is_empty() {
            return Err(Error::Resolution(format!(
                "No addresses for {}",
                self.key.host
            )));
        }
        let port = self.key.port;
        self.addrs = addrs.into_iter().map(|ip| SocketAddr::new(ip, port)).collect();
        self.next_addr = 0;
        self.phase = ConnectPhase::Tcp;
        Ok(self.connect_next())
    }

    /// TCP connect failed, try the next address if there is one.
    pub fn connect_failed(&mut self) -> Option<Output> {
        if self.next_addr < self.addrs.len() {
            debug!("{} trying next address", self.id);
            Some(self.connect_next())
        } else {
            None
        }
    }

    /// TCP is up. Returns the handshake to do for secure connections.
    pub fn connected(&mut self) -> Option<Output> {
        if self.key.secure {
            self.phase = ConnectPhase::Handshake;
            Some(Output::Handshake {
                conn: self.id,
                server_name: self.key.host.clone(),
            })
        } else {
            None
        }
    }

    /// Ready for requests. Returns the requests reserved while connecting.
    pub fn established(&mut self, now: Instant) -> Vec<RequestId> {
        self.phase = ConnectPhase::Done;

        let reserved: Vec<_> = self
            .pipeline
            .iter()
            .filter(|e| !e.sent)
            .map(|e| e.req)
            .collect();

        if self.pipeline.is_empty() {
            self.state = ConnectionState::Idle;
            self.idle_since = Some(now);
        } else {
            self.state = ConnectionState::Active;
        }

        debug!("{} established, {:?}", self.id, self.state);

        reserved
    }

    /// The request bytes were handed over for writing.
    pub fn mark_sent(&mut self, req: RequestId) {
        if let Some(e) = self.pipeline.iter_mut().find(|e| e.req == req) {
            e.sent = true;
        }
    }

    /// Take the request out of the pipeline if it's not on the wire, otherwise
    /// mark it aborted so its response is discarded. A response not read by
    /// `drain_until` makes the connection useless.
    pub fn abort(&mut self, req: RequestId, now: Instant, drain_until: Option<Instant>) {
        let idx = match self.pipeline.iter().position(|e| e.req == req) {
            Some(v) => v,
            None => return,
        };

        if self.pipeline[idx].sent {
            trace!("{} {} aborted after send", self.id, req);
            let entry = &mut self.pipeline[idx];
            entry.aborted = true;
            entry.drain_deadline = drain_until;
        } else {
            self.pipeline.remove(idx);
            self.became_empty(now);
        }
    }

    /// Remove a request that hasn't been sent.
    pub fn remove_unsent(&mut self, req: RequestId, now: Instant) {
        self.pipeline.retain(|e| e.req != req || e.sent);
        self.became_empty(now);
    }

    fn became_empty(&mut self, now: Instant) {
        if self.pipeline.is_empty() && self.state == ConnectionState::Active {
            self.state = ConnectionState::Idle;
            self.idle_since = Some(now);
        }
    }

    /// Mark the connection closed and hand back whatever was in the pipeline.
    pub fn close(&mut self) -> Vec<PipelineEntry> {
        self.state = ConnectionState::Closed;
        self.idle_since = None;
        self.pipeline.drain(..).collect()
    }

    /// Feed bytes read from the connection.
    ///
    /// Events for complete parts are appended to `events` even if the data
    /// later turns out to be broken.
    pub fn receive(
        &mut self,
        data: &[u8],
        codec: &dyn WireCodec,
        now: Instant,
        events: &mut Vec<ConnEvent>,
    ) -> Result<(), Error> {
        self.read_buf.extend_from_slice(data);

        loop {
            if !matches!(
                self.state,
                ConnectionState::Idle | ConnectionState::Active
            ) {
                if !self.read_buf.is_empty() {
                    trace!("{} ignore {} bytes", self.id, self.read_buf.len());
                    self.read_buf.clear();
                }
                break;
            }

            if matches!(self.recv, RecvState::Head) {
                if self.read_buf.is_empty() {
                    break;
                }

                let (req, aborted, method) = match self.pipeline.front() {
                    Some(e) if e.sent => (e.req, e.aborted, e.method.clone()),
                    _ => {
                        return Err(Error::Protocol(format!(
                            "Unexpected data from server: {} bytes",
                            self.read_buf.len()
                        )))
                    }
                };

                let (head, used) = match codec.decode_response_head(&self.read_buf)? {
                    Some(v) => v,
                    None => {
                        if self.read_buf.len() > MAX_HEAD_SIZE {
                            return Err(Error::Protocol("Response head too big".into()));
                        }
                        break;
                    }
                };

                self.read_buf.drain(..used);

                if head.status.is_informational() {
                    if head.status == http::StatusCode::SWITCHING_PROTOCOLS {
                        return Err(Error::Protocol("Unexpected protocol switch".into()));
                    }
                    trace!("{} skip {}", self.id, head.status);
                    continue;
                }

                let limit = LimitRead::for_response(&method, head.status, &head.headers)?;

                events.push(ConnEvent::Head { req, aborted });

                self.recv = RecvState::Body {
                    head,
                    limit,
                    payload: vec![],
                };
            }

            if let RecvState::Body { limit, payload, .. } = &mut self.recv {
                if !limit.is_complete() {
                    let used = limit.feed(&self.read_buf, payload)?;
                    self.read_buf.drain(..used);
                }

                if !limit.is_complete() {
                    break;
                }
            }

            events.push(self.finish_response(now)?);
        }

        Ok(())
    }

    /// The peer closed the connection.
    pub fn eof(&mut self, now: Instant, events: &mut Vec<ConnEvent>) -> Result<(), Error> {
        match &mut self.recv {
            RecvState::Body { limit, .. } => {
                limit.eof()?;
                if limit.is_complete() {
                    events.push(self.finish_response(now)?);
                }
                Ok(())
            }
            RecvState::Head if !self.read_buf.is_empty() => Err(Error::ConnectionLost(
                "EOF before complete http11 header".into(),
            )),
            RecvState::Head => Ok(()),
        }
    }

    fn finish_response(&mut self, now: Instant) -> Result<ConnEvent, Error> {
        let (head, limit, payload) = match mem::replace(&mut self.recv, RecvState::Head) {
            RecvState::Body {
                head,
                limit,
                payload,
            } => (head, limit, payload),
            RecvState::Head => return Err(Error::Protocol("No response in progress".into())),
        };

        let entry = self
            .pipeline
            .pop_front()
            .ok_or_else(|| Error::Protocol("Response without request".into()))?;

        self.served += 1;

        let reuse = !limit.is_read_to_end() && allow_reuse(&head.headers, head.version);

        if !reuse {
            debug!("{} not reusable after {}", self.id, entry.req);
            self.state = ConnectionState::Closing;
        } else {
            self.became_empty(now);
        }

        trace!(
            "{} response {} for {}, {} bytes",
            self.id,
            head.status,
            entry.req,
            payload.len()
        );

        Ok(ConnEvent::Response {
            entry,
            response: Response::new(head, payload),
        })
    }
}
