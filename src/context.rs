//! The context owns everything shared between clients: settings, the
//! connection pool and the request queue.

use crate::connection::{ConnEvent, ConnectPhase, ConnectionState, PipelineEntry};
use crate::dispatcher::Queue;
use crate::error::io_msg;
use crate::headers::HeaderSet;
use crate::http11::{Http11Codec, WireCodec};
use crate::policy::{self, DowngradeRedirects, RedirectPolicy};
use crate::pool::Pool;
use crate::request::{Callback, ClientId, RequestId, RequestRecord, RequestState, Response, Target};
use crate::settings::{non_zero, Settings};
use crate::stats::{RequestStats, StatsAccumulator};
use crate::transport::{Clock, ConnectionId, Input, Output, SystemClock};
use crate::Error;
use http::Method;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

struct Pending {
    output: Output,
    /// The request carried by a transmit.
    req: Option<RequestId>,
}

type Completed = Vec<(Callback, Result<Response, Error>)>;

pub(crate) struct Shared {
    pub settings: Settings,
    clock: Box<dyn Clock>,
    codec: Box<dyn WireCodec>,
    redirect: Box<dyn RedirectPolicy>,
    pub requests: HashMap<RequestId, RequestRecord>,
    pub queue: Queue,
    pub pool: Pool,
    outputs: VecDeque<Pending>,
    completed: Completed,
    dropped: Vec<Callback>,
    next_request: u64,
    next_seq: u64,
    next_client: u64,
    pub dispatch_needed: bool,
    pub closed: bool,
}

impl Shared {
    fn new(
        settings: Settings,
        clock: Box<dyn Clock>,
        codec: Box<dyn WireCodec>,
        redirect: Box<dyn RedirectPolicy>,
    ) -> Self {
        let pool = Pool::new(settings.backoff_base(), settings.backoff_max());
        Shared {
            settings,
            clock,
            codec,
            redirect,
            requests: HashMap::new(),
            queue: Queue::default(),
            pool,
            outputs: VecDeque::new(),
            completed: vec![],
            dropped: vec![],
            next_request: 1,
            next_seq: 0,
            next_client: 1,
            dispatch_needed: false,
            closed: false,
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn new_client(&mut self) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;
        id
    }

    pub fn create_request(
        &mut self,
        client: ClientId,
        method: Method,
        target: Target,
        callback: Callback,
    ) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;

        let rec = RequestRecord {
            id,
            client,
            seq: 0,
            method,
            target,
            headers: HeaderSet::new(),
            payload: None,
            auth: None,
            urgent: false,
            max_redirects: self.settings.request_max_redirects,
            max_attempts: self.settings.request_max_attempts,
            timeout: non_zero(self.settings.request_timeout_msecs),
            attempts: 0,
            send_attempts: 0,
            redirects: 0,
            state: RequestState::Created,
            stats: StatsAccumulator::new(),
            conn: None,
            deadline: None,
            absolute_deadline: None,
            callback: Some(callback),
            released: false,
        };

        trace!("{:?} created", rec);

        self.requests.insert(id, rec);

        id
    }

    pub fn submit(&mut self, id: RequestId) -> Result<(), Error> {
        if self.closed {
            return Err(Error::User("Context is deinitialized".into()));
        }

        let now = self.now();
        let absolute = self.settings.absolute_timeout();

        let rec = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::User(format!("Unknown request: {}", id)))?;

        if rec.state != RequestState::Created {
            return Err(Error::User(format!("{} already submitted", id)));
        }

        rec.seq = self.next_seq;
        self.next_seq += 1;

        rec.set_state(RequestState::Queued, now);
        rec.absolute_deadline = absolute.and_then(|t| now.checked_add(t));

        debug!("Submit {:?}", rec);

        self.queue.push(id, rec.urgent, rec.seq);
        self.dispatch_needed = true;

        Ok(())
    }

    pub fn abort(&mut self, id: RequestId) {
        let now = self.now();

        let (conn, drain_until) = match self.requests.get(&id) {
            Some(r) if !r.state.is_terminal() => {
                let fresh = r.timeout.and_then(|t| now.checked_add(t));
                (r.conn, r.deadline.or(fresh))
            }
            _ => return,
        };

        debug!("Abort {}", id);

        if let Some(conn) = conn {
            if let Some(c) = self.pool.get_mut(conn) {
                c.abort(id, now, drain_until);
            }
        }

        self.queue.remove(id);
        self.complete(id, Err(Error::Aborted));
    }

    /// The request handle was dropped.
    pub fn release(&mut self, id: RequestId) {
        let remove = match self.requests.get_mut(&id) {
            Some(r) => {
                r.released = true;
                r.state.is_terminal() || r.state == RequestState::Created
            }
            None => false,
        };

        if remove {
            self.forget(id);
        }
    }

    fn forget(&mut self, id: RequestId) {
        if let Some(rec) = self.requests.remove(&id) {
            trace!("Forget {}", id);
            // dropped outside the borrow of the context
            if let Some(cb) = rec.callback {
                self.dropped.push(cb);
            }
        }
    }

    pub fn stats(&self, id: RequestId) -> RequestStats {
        let now = self.now();
        self.requests
            .get(&id)
            .map(|r| r.stats.snapshot(now, r.counters()))
            .unwrap_or_default()
    }

    pub fn abort_client(&mut self, client: ClientId) {
        let mut ids: Vec<_> = self
            .requests
            .values()
            .filter(|r| r.client == client && !r.state.is_terminal())
            .map(|r| r.id)
            .collect();
        ids.sort();

        for id in ids {
            self.abort(id);
        }
    }

    pub fn deinit(&mut self) {
        if self.closed {
            return;
        }

        debug!("Deinit context");

        let mut ids: Vec<_> = self
            .requests
            .values()
            .filter(|r| !r.state.is_terminal() && r.state != RequestState::Created)
            .map(|r| r.id)
            .collect();
        ids.sort();

        for id in ids {
            self.abort(id);
        }

        self.closed = true;
        self.queue.clear();

        for conn in self.pool.ids() {
            self.drop_connection(conn);
        }
    }

    pub fn take_completed(&mut self) -> (Completed, Vec<Callback>) {
        (
            std::mem::take(&mut self.completed),
            std::mem::take(&mut self.dropped),
        )
    }

    pub fn take_dropped(&mut self) -> Vec<Callback> {
        std::mem::take(&mut self.dropped)
    }

    pub fn push_output(&mut self, output: Output, req: Option<RequestId>) {
        self.outputs.push_back(Pending { output, req });
    }

    /// Remove outputs not yet handed to the loop. Returns requests whose
    /// bytes never went out.
    fn discard_outputs(&mut self, conn: ConnectionId) -> Vec<RequestId> {
        let mut unsent = vec![];
        self.outputs.retain(|p| {
            if p.output.conn() != conn {
                return true;
            }
            unsent.extend(p.req);
            false
        });
        unsent
    }

    pub fn poll_output(&mut self) -> Option<Output> {
        if self.dispatch_needed {
            self.dispatch();
        }

        let pending = self.outputs.pop_front()?;

        if let Some(id) = pending.req {
            let now = self.now();
            if let Some(rec) = self.requests.get_mut(&id) {
                if rec.state == RequestState::Sending && rec.conn == Some(pending.output.conn()) {
                    rec.set_state(RequestState::WaitingResponse, now);
                }
            }
        }

        trace!("Output {}: {}", pending.output.conn(), kind(&pending.output));

        Some(pending.output)
    }

    pub fn handle_input(&mut self, input: Input) {
        let conn = input.conn();

        trace!("Input {}: {}", conn, input_kind(&input));

        let phase = match self.pool.get(conn) {
            Some(c) => c.phase(),
            None => {
                debug!("Input for unknown {}", conn);
                return;
            }
        };

        match input {
            Input::Resolved { result, .. } if phase == ConnectPhase::Resolving => {
                let result = result
                    .map_err(|e| Error::Resolution(io_msg(&e)))
                    .and_then(|addrs| match self.pool.get_mut(conn) {
                        Some(c) => c.resolved(addrs),
                        None => Err(Error::Resolution("Connection gone".into())),
                    });
                match result {
                    Ok(output) => self.push_output(output, None),
                    Err(e) => self.connection_failed(conn, e, false),
                }
            }
            Input::Connected { result, .. } if phase == ConnectPhase::Tcp => match result {
                Ok(()) => match self.pool.get_mut(conn).and_then(|c| c.connected()) {
                    Some(output) => self.push_output(output, None),
                    None => self.connection_ready(conn),
                },
                Err(e) => match self.pool.get_mut(conn).and_then(|c| c.connect_failed()) {
                    Some(output) => self.push_output(output, None),
                    None => self.connection_failed(conn, Error::Connect(io_msg(&e)), true),
                },
            },
            Input::Handshaked { result, .. } if phase == ConnectPhase::Handshake => match result {
                Ok(()) => self.connection_ready(conn),
                Err(e) => {
                    let err = Error::Connect(format!("TLS handshake: {}", io_msg(&e)));
                    self.connection_failed(conn, err, true);
                }
            },
            Input::Received { data, .. } if phase == ConnectPhase::Done => {
                self.received(conn, &data);
            }
            Input::WriteFailed { error, .. } => {
                if phase == ConnectPhase::Done {
                    self.connection_lost(conn, None, Error::Send(io_msg(&error)));
                } else {
                    self.connection_failed(conn, Error::Connect(io_msg(&error)), true);
                }
            }
            Input::Closed { .. } => {
                if phase == ConnectPhase::Done {
                    self.peer_closed(conn);
                } else {
                    let err = Error::Connect("Connection closed while connecting".into());
                    self.connection_failed(conn, err, true);
                }
            }
            input => {
                warn!("Unexpected input in {:?}: {:?}", phase, input);
            }
        }

        self.dispatch_needed = true;
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let now = self.now();

        let requests = self
            .requests
            .values()
            .filter(|r| !r.state.is_terminal())
            .flat_map(|r| r.deadline.into_iter().chain(r.absolute_deadline));

        requests
            .chain(self.pool.next_deadline(now, self.settings.max_idle()))
            .min()
    }

    pub fn handle_timeout(&mut self) {
        let now = self.now();

        let mut expired: Vec<(RequestId, bool)> = self
            .requests
            .values()
            .filter(|r| !r.state.is_terminal())
            .filter_map(|r| {
                let absolute = r.absolute_deadline.map(|d| d <= now).unwrap_or(false);
                let attempt = r.deadline.map(|d| d <= now).unwrap_or(false);
                if absolute || attempt {
                    Some((r.id, absolute))
                } else {
                    None
                }
            })
            .collect();
        expired.sort();

        for (id, absolute) in expired {
            self.request_timed_out(id, absolute);
        }

        for conn in self.pool.connect_expired(now) {
            let err = Error::Timeout(format!("{} connect timed out", conn));
            self.connection_failed(conn, err, true);
        }

        for conn in self.pool.drain_expired(now) {
            let err = Error::ConnectionLost(format!("{} aborted request not answered", conn));
            self.connection_lost(conn, None, err);
        }

        if let Some(max_idle) = self.settings.max_idle() {
            for conn in self.pool.idle_expired(now, max_idle) {
                debug!("{} idle for {:?}", conn, max_idle);
                self.drop_connection(conn);
            }
        }

        self.dispatch_needed = true;
    }

    fn request_timed_out(&mut self, id: RequestId, absolute: bool) {
        let now = self.now();

        let (state, conn, err) = match self.requests.get_mut(&id) {
            Some(rec) => {
                let err = if absolute {
                    Error::Timeout(format!(
                        "Absolute request timeout after {} ms",
                        self.settings.request_absolute_timeout_msecs
                    ))
                } else {
                    let msecs = rec.timeout.map(|t| t.as_millis()).unwrap_or(0);
                    Error::Timeout(format!("Request timed out after {} ms", msecs))
                };
                rec.deadline = None;
                (rec.state, rec.conn, err)
            }
            None => return,
        };

        debug!("{} {}", id, err);

        match (state, conn) {
            (RequestState::Connecting, Some(conn)) => {
                if let Some(c) = self.pool.get_mut(conn) {
                    c.remove_unsent(id, now);
                }
                self.retry_or_fail(id, err);
            }
            (s, Some(conn)) if s.is_active() => {
                let lost = Error::ConnectionLost(format!("{} closed after timeout of {}", conn, id));
                self.connection_lost(conn, Some((id, err)), lost);
            }
            _ => {
                self.queue.remove(id);
                self.complete(id, Err(err));
            }
        }
    }

    /// Finish the request, deferring the callback until the context is released.
    fn complete(&mut self, id: RequestId, result: Result<Response, Error>) {
        let now = self.now();

        let next = match &result {
            Ok(_) => RequestState::Finished,
            Err(Error::Aborted) => RequestState::Aborted,
            Err(_) => RequestState::Failed,
        };

        let rec = match self.requests.get_mut(&id) {
            Some(r) if !r.state.is_terminal() => r,
            _ => return,
        };

        rec.conn = None;
        rec.deadline = None;

        if !rec.set_state(next, now) {
            rec.set_state(RequestState::Failed, now);
        }

        match &result {
            Ok(res) => debug!("{} {} done: {}", id, rec.target, res.status()),
            Err(e) => debug!("{} {} failed: {}", id, rec.target, e),
        }

        if let Some(cb) = rec.callback.take() {
            self.completed.push((cb, result));
        }

        if rec.released {
            self.forget(id);
        }

        self.dispatch_needed = true;
    }

    /// Back to the queue, keeping the original submit order.
    fn requeue(&mut self, id: RequestId) {
        if self.closed {
            self.complete(id, Err(Error::Aborted));
            return;
        }

        let now = self.now();

        let rec = match self.requests.get_mut(&id) {
            Some(r) if !r.state.is_terminal() => r,
            _ => return,
        };

        rec.conn = None;
        rec.deadline = None;

        if rec.set_state(RequestState::Queued, now) {
            self.queue.push(id, rec.urgent, rec.seq);
        }

        self.dispatch_needed = true;
    }

    fn retry_or_fail(&mut self, id: RequestId, err: Error) {
        let now = self.now();
        let closed = self.closed;

        let rec = match self.requests.get_mut(&id) {
            Some(r) if !r.state.is_terminal() => r,
            _ => return,
        };

        let expired = rec.absolute_deadline.map(|d| d <= now).unwrap_or(false);

        let retry = if err.is_retryable() && !expired && !closed {
            let tries = if err.is_after_send() {
                rec.send_attempts += 1;
                rec.send_attempts
            } else {
                rec.attempts += 1;
                rec.attempts
            };
            policy::may_retry(tries, rec.max_attempts)
        } else {
            false
        };

        if retry {
            debug!("{} retry after: {}", id, err);
            self.requeue(id);
        } else {
            self.complete(id, Err(err));
        }
    }

    /// Encode the request and queue the bytes for the connection.
    pub(crate) fn transmit(&mut self, id: RequestId, conn: ConnectionId) {
        let now = self.now();

        let user_agent = self.settings.user_agent.as_deref();
        let codec = &*self.codec;

        let mut data = Vec::new();

        let result = match self.requests.get(&id) {
            Some(rec) => rec.encode(codec, user_agent, &mut data),
            None => return,
        };

        if let Err(e) = result {
            warn!("{} encode failed: {}", id, e);
            if let Some(c) = self.pool.get_mut(conn) {
                c.remove_unsent(id, now);
            }
            self.complete(id, Err(e));
            return;
        }

        if let Some(rec) = self.requests.get_mut(&id) {
            rec.conn = Some(conn);
            rec.set_state(RequestState::Sending, now);
        }

        if let Some(c) = self.pool.get_mut(conn) {
            c.mark_sent(id);
        }

        self.push_output(Output::Transmit { conn, data }, Some(id));
    }

    fn connection_ready(&mut self, conn: ConnectionId) {
        let now = self.now();

        let (key, reserved) = match self.pool.get_mut(conn) {
            Some(c) => (c.key.clone(), c.established(now)),
            None => return,
        };

        self.pool.connect_succeeded(&key);

        for id in reserved {
            self.transmit(id, conn);
        }

        self.dispatch_needed = true;
    }

    /// Close the connection, returning what was in its pipeline.
    fn drop_connection(&mut self, conn: ConnectionId) -> (Vec<PipelineEntry>, Vec<RequestId>) {
        let entries = match self.pool.remove(conn) {
            Some(mut c) => c.close(),
            None => return (vec![], vec![]),
        };

        let unsent = self.discard_outputs(conn);
        self.push_output(Output::Close { conn }, None);

        (entries, unsent)
    }

    /// A connection that never got established failed.
    fn connection_failed(&mut self, conn: ConnectionId, err: Error, backoff: bool) {
        let now = self.now();

        let key = match self.pool.get(conn) {
            Some(c) => c.key.clone(),
            None => return,
        };

        debug!("{} to {} failed: {}", conn, key, err);

        let (entries, _) = self.drop_connection(conn);

        if backoff {
            self.pool.connect_failed(&key, now);
        }

        for entry in entries {
            if !entry.aborted {
                self.retry_or_fail(entry.req, err.clone());
            }
        }

        self.dispatch_needed = true;
    }

    /// An established connection broke. The `culprit` request gets its own
    /// error, other requests on the wire get `err`.
    fn connection_lost(
        &mut self,
        conn: ConnectionId,
        culprit: Option<(RequestId, Error)>,
        err: Error,
    ) {
        debug!("{} lost: {}", conn, err);

        let (entries, unsent) = self.drop_connection(conn);

        for entry in entries {
            if entry.aborted {
                continue;
            }

            match &culprit {
                Some((id, e)) if *id == entry.req => self.retry_or_fail(entry.req, e.clone()),
                _ if !entry.sent || unsent.contains(&entry.req) => self.requeue(entry.req),
                _ => self.retry_or_fail(entry.req, err.clone()),
            }
        }

        self.dispatch_needed = true;
    }

    /// The server will not take more requests on this connection.
    fn finish_closing(&mut self, conn: ConnectionId) {
        let (entries, _) = self.drop_connection(conn);

        for entry in entries {
            if !entry.aborted {
                trace!("{} requeue after close of {}", entry.req, conn);
                self.requeue(entry.req);
            }
        }
    }

    fn received(&mut self, conn: ConnectionId, data: &[u8]) {
        let now = self.now();
        let codec = &*self.codec;

        let c = match self.pool.get_mut(conn) {
            Some(c) => c,
            None => return,
        };

        let mut events = vec![];
        let result = c.receive(data, codec, now, &mut events);
        let culprit = c.head_request();
        let closing = c.state() == ConnectionState::Closing;

        for event in events {
            self.conn_event(event);
        }

        match result {
            Err(e) => {
                warn!("{} {}", conn, e);
                let lost = Error::ConnectionLost(format!("{} broken: {}", conn, e));
                self.connection_lost(conn, culprit.map(|id| (id, e)), lost);
            }
            Ok(()) if closing => self.finish_closing(conn),
            Ok(()) => {}
        }
    }

    fn peer_closed(&mut self, conn: ConnectionId) {
        let now = self.now();

        let c = match self.pool.get_mut(conn) {
            Some(c) => c,
            None => return,
        };

        let mut events = vec![];
        let result = c.eof(now, &mut events);
        let culprit = c.head_request();
        let closing = c.state() == ConnectionState::Closing;

        for event in events {
            self.conn_event(event);
        }

        if result.is_ok() && closing {
            self.finish_closing(conn);
            return;
        }

        let culprit = match (result, culprit) {
            (Err(e), Some(id)) => Some((id, e)),
            _ => None,
        };

        let lost = Error::ConnectionLost(format!("{} closed by peer", conn));
        self.connection_lost(conn, culprit, lost);
    }

    fn conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Head { req, aborted } => {
                if aborted {
                    return;
                }
                let now = self.now();
                if let Some(rec) = self.requests.get_mut(&req) {
                    rec.set_state(RequestState::ReceivingPayload, now);
                }
            }
            ConnEvent::Response { entry, response } => {
                if entry.aborted {
                    debug!("Discard response for aborted {}", entry.req);
                } else {
                    self.on_response(entry.req, response);
                }
            }
        }
    }

    fn on_response(&mut self, id: RequestId, response: Response) {
        let status = response.status();

        let rec = match self.requests.get_mut(&id) {
            Some(r) if !r.state.is_terminal() => r,
            _ => return,
        };

        if rec.max_redirects == 0 || !policy::is_redirect(status) {
            self.complete(id, Ok(response));
            return;
        }

        let location = response.header("location").map(|v| v.to_string());

        let location = match location {
            Some(v) => v,
            None => {
                self.complete(id, Ok(response));
                return;
            }
        };

        if rec.redirects >= rec.max_redirects {
            let limit = rec.max_redirects;
            self.complete(id, Err(Error::RedirectLimitExceeded { limit }));
            return;
        }

        let target = match policy::redirect_target(&rec.target, &location) {
            Ok(v) => v,
            Err(e) => {
                self.complete(id, Err(e));
                return;
            }
        };

        let (method, keep_payload) = self.redirect.redirect_method(status, &rec.method);

        debug!(
            "{} {} redirect {} {} -> {} {}",
            id, status, rec.method, rec.target, method, target
        );

        if !rec.target.same_origin(&target) {
            rec.auth = None;
            rec.headers.remove("Authorization");
        }

        if target.host != rec.target.host || target.port != rec.target.port {
            rec.headers.remove("Host");
        }

        if !keep_payload {
            rec.payload = None;
            rec.headers.remove("Content-Type");
            rec.headers.remove("Content-Length");
            rec.headers.remove("Transfer-Encoding");
        }

        rec.target = target;
        rec.method = method;
        rec.redirects += 1;

        self.requeue(id);
    }
}

fn kind(output: &Output) -> String {
    match output {
        Output::Resolve { host, .. } => format!("resolve {}", host),
        Output::Connect { addr, .. } => format!("connect {}", addr),
        Output::Handshake { server_name, .. } => format!("handshake {}", server_name),
        Output::Transmit { data, .. } => format!("transmit {} bytes", data.len()),
        Output::Close { .. } => "close".into(),
    }
}

fn input_kind(input: &Input) -> &'static str {
    match input {
        Input::Resolved { .. } => "resolved",
        Input::Connected { .. } => "connected",
        Input::Handshaked { .. } => "handshaked",
        Input::Received { .. } => "received",
        Input::WriteFailed { .. } => "write failed",
        Input::Closed { .. } => "closed",
    }
}

/// Shared state of all clients using it: settings, connection pool and
/// request queue.
///
/// The context does no I/O. An event loop drives it:
///
/// 1. Drain [`poll_output`] and perform each [`Output`].
/// 2. Feed results and received data back with [`handle_input`].
/// 3. Sleep until [`poll_timeout`] (or new socket activity) and call [`handle_timeout`].
///
/// Request callbacks run from within these calls, never while the context is
/// borrowed, so a callback may submit new requests.
///
/// [`poll_output`]: #method.poll_output
/// [`handle_input`]: #method.handle_input
/// [`poll_timeout`]: #method.poll_timeout
/// [`handle_timeout`]: #method.handle_timeout
#[derive(Clone)]
pub struct Context {
    pub(crate) shared: Rc<RefCell<Shared>>,
}

impl Context {
    /// Context with the wall clock and the default HTTP/1.1 codec.
    pub fn new(settings: Settings) -> Self {
        ContextBuilder::new(settings).build()
    }

    /// Builder to change clock, codec or redirect policy.
    pub fn builder(settings: Settings) -> ContextBuilder {
        ContextBuilder::new(settings)
    }

    /// Run `f` on the shared state, then invoke the callbacks of requests
    /// that finished meanwhile.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let (ret, (completed, dropped)) = {
            let mut shared = self.shared.borrow_mut();
            let ret = f(&mut shared);
            (ret, shared.take_completed())
        };

        drop(dropped);

        for (callback, result) in completed {
            callback(result);
        }

        ret
    }

    /// Next thing for the loop to do.
    pub fn poll_output(&self) -> Option<Output> {
        self.with(|s| s.poll_output())
    }

    /// Tell the context what happened.
    pub fn handle_input(&self, input: Input) {
        self.with(|s| s.handle_input(input))
    }

    /// When [`handle_timeout`](#method.handle_timeout) should be called next.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.shared.borrow().poll_timeout()
    }

    /// Process expired timers against the clock.
    pub fn handle_timeout(&self) {
        self.with(|s| s.handle_timeout())
    }

    /// Abort all requests and close all connections.
    ///
    /// Following submits fail. The loop gets a `Close` for each connection.
    pub fn deinit(&self) {
        self.with(|s| s.deinit())
    }

    /// Number of requests waiting for a connection.
    pub fn queued_requests(&self) -> usize {
        self.shared.borrow().queue.len()
    }

    /// Number of open (or opening) connections.
    pub fn connection_count(&self) -> usize {
        self.shared.borrow().pool.len()
    }

    /// State of a connection, `None` once it has been closed.
    pub fn connection_state(&self, conn: ConnectionId) -> Option<ConnectionState> {
        self.shared.borrow().pool.get(conn).map(|c| c.state())
    }

    /// Number of requests currently pipelined on a connection.
    pub fn pipeline_len(&self, conn: ConnectionId) -> usize {
        self.shared
            .borrow()
            .pool
            .get(conn)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Number of responses read on a connection.
    pub fn responses_served(&self, conn: ConnectionId) -> u64 {
        self.shared
            .borrow()
            .pool
            .get(conn)
            .map(|c| c.served())
            .unwrap_or(0)
    }

    /// The settings the context was created with.
    pub fn settings(&self) -> Settings {
        self.shared.borrow().settings.clone()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.shared.try_borrow() {
            Ok(s) => write!(
                f,
                "Context {{ requests: {}, queued: {}, connections: {} }}",
                s.requests.len(),
                s.queue.len(),
                s.pool.len()
            ),
            Err(_) => write!(f, "Context {{ <busy> }}"),
        }
    }
}

/// Builder of a [`Context`](struct.Context.html).
pub struct ContextBuilder {
    settings: Settings,
    clock: Box<dyn Clock>,
    codec: Box<dyn WireCodec>,
    redirect: Box<dyn RedirectPolicy>,
}

impl ContextBuilder {
    /// Builder with the wall clock, HTTP/1.1 codec and browser style redirects.
    pub fn new(settings: Settings) -> Self {
        ContextBuilder {
            settings,
            clock: Box::new(SystemClock),
            codec: Box::new(Http11Codec),
            redirect: Box::new(DowngradeRedirects),
        }
    }

    /// Time source for timers and stats.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Encoding/decoding of requests and responses.
    pub fn codec<W: WireCodec + 'static>(mut self, codec: W) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// How methods are rewritten for redirects.
    pub fn redirect_policy<P: RedirectPolicy + 'static>(mut self, policy: P) -> Self {
        self.redirect = Box::new(policy);
        self
    }

    /// Create the context.
    pub fn build(self) -> Context {
        debug!("New context {:?}", self.settings);
        let shared = Shared::new(self.settings, self.clock, self.codec, self.redirect);
        Context {
            shared: Rc::new(RefCell::new(shared)),
        }
    }
}

impl fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("settings", &self.settings)
            .finish()
    }
}
