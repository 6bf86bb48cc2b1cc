use crate::headers::HeaderSet;
use crate::http11::{ResponseHead, WireCodec};
use crate::stats::{Counters, Phase, StatsAccumulator};
use crate::transport::ConnectionId;
use crate::Error;
use http::{HeaderMap, Method, StatusCode, Version};
use std::fmt;
use std::time::{Duration, Instant};

/// Identifies one request within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ClientId(pub(crate) u64);

/// Lifecycle of a request.
//
//   Created -> Queued -> Connecting -> Sending -> WaitingResponse -> ReceivingPayload -> Finished
//                 ^          |            |             |                  |
//                 +----------+------------+-------------+------------------+  (retry/redirect)
//
// Any non-terminal state can go to Failed or Aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Not submitted yet, can be changed.
    Created,
    /// Waiting for a connection or a free pipeline slot.
    Queued,
    /// Reserved on a connection that is being established.
    Connecting,
    /// Encoded and waiting for the loop to take the bytes.
    Sending,
    /// Handed to the loop, no response head yet.
    WaitingResponse,
    /// Response head received, reading the body.
    ReceivingPayload,
    /// Response delivered.
    Finished,
    /// Error delivered.
    Failed,
    /// Aborted by the caller or by deinit.
    Aborted,
}

impl RequestState {
    /// Finished, failed or aborted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Finished | RequestState::Failed | RequestState::Aborted
        )
    }

    /// Connecting, sending or receiving.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RequestState::Connecting
                | RequestState::Sending
                | RequestState::WaitingResponse
                | RequestState::ReceivingPayload
        )
    }

    fn can_enter(self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Aborted) => true,
            (Created, Queued) => true,
            (Created, _) => false,
            (_, Failed) => true,
            (Queued, Connecting) | (Queued, Sending) => true,
            (Connecting, Sending) | (Connecting, Queued) => true,
            (Sending, WaitingResponse) | (Sending, Queued) => true,
            (Sending, ReceivingPayload) => true,
            (WaitingResponse, ReceivingPayload) | (WaitingResponse, Queued) => true,
            (ReceivingPayload, Finished) | (ReceivingPayload, Queued) => true,
            _ => false,
        }
    }
}

/// Request body.
///
/// A payload of known size is sent with `content-length`, one of unknown size
/// (built from chunks) with `transfer-encoding: chunked`. The payload is kept
/// until the request is done, since retries and redirects may send it again.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    chunks: Vec<Vec<u8>>,
    sized: bool,
}

impl Payload {
    /// A payload with known size.
    pub fn new<B: Into<Vec<u8>>>(data: B) -> Self {
        Payload {
            chunks: vec![data.into()],
            sized: true,
        }
    }

    /// A payload of unknown size, sent chunked.
    pub fn chunked<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Payload {
            chunks: chunks.into_iter().map(|c| c.into()).collect(),
            sized: false,
        }
    }

    /// Whether the size is known up front.
    pub fn is_sized(&self) -> bool {
        self.sized
    }

    /// Total number of bytes.
    pub fn len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Whether there are no bytes to send.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Payload({} bytes, {})",
            self.len(),
            if self.sized { "sized" } else { "chunked" }
        )
    }
}

/// The destination of a connection, `(host, port, secure)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PeerKey {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub secure: bool,
}

impl Target {
    pub fn new(host: &str, path: &str) -> Self {
        Target {
            host: host.to_string(),
            port: None,
            path: path.to_string(),
            secure: false,
        }
    }

    fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.default_port())
    }

    pub fn key(&self) -> PeerKey {
        PeerKey {
            host: self.host.to_ascii_lowercase(),
            port: self.port(),
            secure: self.secure,
        }
    }

    /// Value for the `host` header.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port() == self.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port())
        }
    }

    /// Same scheme, host and port.
    pub fn same_origin(&self, other: &Target) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}{}", scheme, self.host_header(), self.path)
    }
}

/// A response delivered to the request callback.
///
/// The payload has been received in full when the callback runs.
#[derive(Clone)]
pub struct Response {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    payload: Vec<u8>,
}

impl Response {
    pub(crate) fn new(head: ResponseHead, payload: Vec<u8>) -> Self {
        Response {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            payload,
        }
    }

    /// HTTP version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase as sent by the server.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header, ignoring values that aren't valid strings.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The response body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the response body.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("payload", &self.payload.len())
            .finish()
    }
}

pub(crate) type Callback = Box<dyn FnOnce(Result<Response, Error>)>;

/// The context's record of one request.
pub(crate) struct RequestRecord {
    pub id: RequestId,
    pub client: ClientId,
    pub seq: u64,
    pub method: Method,
    pub target: Target,
    pub headers: HeaderSet,
    pub payload: Option<Payload>,
    pub auth: Option<(String, String)>,
    pub urgent: bool,
    pub max_redirects: u32,
    pub max_attempts: u32,
    pub timeout: Option<Duration>,
    pub attempts: u32,
    pub send_attempts: u32,
    pub redirects: u32,
    pub state: RequestState,
    pub stats: StatsAccumulator,
    pub conn: Option<ConnectionId>,
    pub deadline: Option<Instant>,
    pub absolute_deadline: Option<Instant>,
    pub callback: Option<Callback>,
    pub released: bool,
}

impl RequestRecord {
    pub fn counters(&self) -> Counters {
        Counters {
            attempts: self.attempts,
            send_attempts: self.send_attempts,
            redirects: self.redirects,
        }
    }

    /// Move to the next state, updating stats. Illegal transitions are ignored.
    pub fn set_state(&mut self, next: RequestState, now: Instant) -> bool {
        if !self.state.can_enter(next) {
            warn!(
                "{} ignoring illegal transition {:?} -> {:?}",
                self.id, self.state, next
            );
            return false;
        }

        debug!("{} {:?} -> {:?}", self.id, self.state, next);

        match next {
            RequestState::Created => {}
            RequestState::Queued => {
                if self.state == RequestState::Created {
                    self.stats.submitted(now);
                } else {
                    self.stats.enter(Phase::Lock, now);
                }
            }
            RequestState::Sending => {
                self.stats.enter(Phase::Http, now);
                self.stats.sent(now);
            }
            RequestState::Connecting
            | RequestState::WaitingResponse
            | RequestState::ReceivingPayload => {
                self.stats.enter(Phase::Http, now);
            }
            RequestState::Finished | RequestState::Failed | RequestState::Aborted => {
                self.stats.finished(now);
            }
        }

        self.state = next;

        true
    }

    /// Encode head and payload, adding the headers the wire needs.
    pub fn encode(
        &self,
        codec: &dyn WireCodec,
        user_agent: Option<&str>,
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        let mut headers = self.headers.clone();

        headers.add_if_missing("Host", &self.target.host_header());

        if let Some(ua) = user_agent {
            headers.add_if_missing("User-Agent", ua);
        }

        if let Some((user, pass)) = &self.auth {
            let token = base64::encode(format!("{}:{}", user, pass));
            headers.add_if_missing("Authorization", &format!("Basic {}", token));
        }

        match &self.payload {
            Some(p) if p.sized => {
                headers.remove("Transfer-Encoding");
                headers.add_or_replace("Content-Length", &p.len().to_string());
            }
            Some(_) => {
                headers.remove("Content-Length");
                headers.add_or_replace("Transfer-Encoding", "chunked");
            }
            None => {
                if self.method == Method::POST || self.method == Method::PUT {
                    headers.add_if_missing("Content-Length", "0");
                }
            }
        }

        codec.encode_request_head(&self.method, &self.target.path, &headers, out)?;

        if let Some(p) = &self.payload {
            if p.sized {
                for chunk in &p.chunks {
                    out.extend_from_slice(chunk);
                }
            } else {
                for chunk in &p.chunks {
                    codec.encode_payload_chunk(chunk, out);
                }
                codec.encode_payload_end(out);
            }
        }

        trace!("{} encoded {} bytes", self.id, out.len());

        Ok(())
    }
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({:?})",
            self.id, self.method, self.target, self.state
        )
    }
}
