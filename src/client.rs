use crate::context::Context;
use crate::headers::HeaderSet;
use crate::request::{ClientId, Payload, RequestId, RequestRecord, RequestState, Response, Target};
use crate::stats::RequestStats;
use crate::Error;
use futures_channel::oneshot;
use futures_util::ready;
use http::header::{HeaderName, HeaderValue};
use http::uri::{Scheme, Uri};
use http::Method;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{self, Poll};
use std::time::Duration;

/// Creates requests that share a [`Context`].
///
/// Dropping the client (or calling [`deinit`]) aborts the requests it created
/// that are still in flight.
///
/// [`Context`]: struct.Context.html
/// [`deinit`]: #method.deinit
pub struct Client {
    ctx: Context,
    id: ClientId,
}

impl Client {
    /// Client with its own new context.
    pub fn new(settings: crate::Settings) -> Self {
        Client::with_context(&Context::new(settings))
    }

    /// Client sharing an existing context (and thereby its connections).
    pub fn with_context(ctx: &Context) -> Self {
        let id = ctx.with(|s| s.new_client());
        Client {
            ctx: ctx.clone(),
            id,
        }
    }

    /// The context of this client.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Create a request to `http://host/path`.
    ///
    /// Nothing happens until [`Request::submit`]. The callback is invoked
    /// exactly once after submit, with the response or the reason there is
    /// none.
    ///
    /// [`Request::submit`]: struct.Request.html#method.submit
    pub fn request<F>(&self, method: Method, host: &str, path: &str, callback: F) -> Request
    where
        F: FnOnce(Result<Response, Error>) + 'static,
    {
        self.create(method, Target::new(host, path), callback)
    }

    /// Create a request from an absolute `http` or `https` url.
    pub fn request_url<F>(&self, method: Method, url: &str, callback: F) -> Result<Request, Error>
    where
        F: FnOnce(Result<Response, Error>) + 'static,
    {
        let target = parse_url(url)?;
        Ok(self.create(method, target, callback))
    }

    /// Create a request whose result is delivered through a future.
    ///
    /// The future resolves once the loop driving the context has completed the
    /// request. If the request is dropped unsubmitted, the future resolves to
    /// `Error::Aborted`.
    pub fn request_future(&self, method: Method, host: &str, path: &str) -> (Request, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        let req = self.request(method, host, path, move |result| {
            // the receiver may be gone, nothing to do about that
            tx.send(result).ok();
        });
        (req, ResponseFuture(rx))
    }

    fn create<F>(&self, method: Method, target: Target, callback: F) -> Request
    where
        F: FnOnce(Result<Response, Error>) + 'static,
    {
        let client = self.id;
        let id = self
            .ctx
            .with(|s| s.create_request(client, method, target, Box::new(callback)));
        Request {
            ctx: self.ctx.clone(),
            id,
        }
    }

    /// Abort all requests of this client that haven't finished.
    pub fn deinit(self) {
        // Drop does the work.
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let client = self.id;
        if self.ctx.shared.try_borrow_mut().is_ok() {
            self.ctx.with(|s| s.abort_client(client));
        } else {
            warn!("Client dropped while context is busy");
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Client({})", self.id.0)
    }
}

fn parse_url(url: &str) -> Result<Target, Error> {
    let uri: Uri = url.parse()?;

    let secure = match uri.scheme() {
        Some(s) if *s == Scheme::HTTPS => true,
        Some(s) if *s == Scheme::HTTP => false,
        _ => return Err(Error::User(format!("Not an http(s) url: {}", url))),
    };

    let authority = uri
        .authority()
        .ok_or_else(|| Error::User(format!("No host in url: {}", url)))?;

    let host = authority.host().trim_start_matches('[').trim_end_matches(']');

    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");

    Ok(Target {
        host: host.to_string(),
        port: authority.port_u16(),
        path: path.to_string(),
        secure,
    })
}

/// Handle to one request.
///
/// Settings can be changed until the request is submitted. Dropping the handle
/// does not abort a submitted request, its callback is still invoked.
pub struct Request {
    ctx: Context,
    id: RequestId,
}

impl Request {
    /// Change the request before submit.
    fn modify<R>(&self, f: impl FnOnce(&mut RequestRecord) -> R) -> Result<R, Error> {
        let id = self.id;
        self.ctx.with(|s| {
            let rec = s
                .requests
                .get_mut(&id)
                .ok_or_else(|| Error::User(format!("Unknown request: {}", id)))?;
            if rec.state != RequestState::Created {
                return Err(Error::User(format!(
                    "{} can't be changed after submit",
                    id
                )));
            }
            Ok(f(rec))
        })
    }

    fn read<R: Default>(&self, f: impl FnOnce(&RequestRecord) -> R) -> R {
        self.ctx
            .shared
            .borrow()
            .requests
            .get(&self.id)
            .map(f)
            .unwrap_or_default()
    }

    /// Identifier within the context.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Connect to another port than the scheme default.
    pub fn set_port(&self, port: u16) -> Result<(), Error> {
        self.modify(|r| r.target.port = Some(port))
    }

    /// Use TLS. Changes the default port to 443.
    pub fn set_ssl(&self, secure: bool) -> Result<(), Error> {
        self.modify(|r| r.target.secure = secure)
    }

    /// Dispatch ahead of non-urgent queued requests.
    pub fn set_urgent(&self) -> Result<(), Error> {
        self.modify(|r| r.urgent = true)
    }

    /// Body to send. Kept until the request is done, since it may be resent.
    pub fn set_payload(&self, payload: Payload) -> Result<(), Error> {
        self.modify(|r| r.payload = Some(payload))
    }

    /// Basic authentication. An explicit `Authorization` header takes precedence.
    pub fn set_auth_simple(&self, user: &str, password: &str) -> Result<(), Error> {
        self.modify(|r| r.auth = Some((user.to_string(), password.to_string())))
    }

    /// Override the number of redirects to follow. 0 delivers 3xx responses as is.
    pub fn set_max_redirects(&self, max: u32) -> Result<(), Error> {
        self.modify(|r| r.max_redirects = max)
    }

    /// Override how many tries the request gets.
    pub fn set_max_attempts(&self, max: u32) -> Result<(), Error> {
        self.modify(|r| r.max_attempts = max)
    }

    /// Override the per attempt timeout. A zero duration disables it.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), Error> {
        let timeout = if timeout == Duration::from_secs(0) {
            None
        } else {
            Some(timeout)
        };
        self.modify(|r| r.timeout = timeout)
    }

    /// Set a header, replacing an existing one with the same name in place.
    pub fn add_header(&self, name: &str, value: &str) -> Result<(), Error> {
        validate_header(name, value)?;
        self.modify(|r| r.headers.add_or_replace(name, value))
    }

    /// Add a header unless one with the same name exists.
    ///
    /// Returns whether it was added.
    pub fn add_missing_header(&self, name: &str, value: &str) -> Result<bool, Error> {
        validate_header(name, value)?;
        self.modify(|r| r.headers.add_if_missing(name, value))
    }

    /// Remove a header, returning its value.
    pub fn remove_header(&self, name: &str) -> Result<Option<String>, Error> {
        self.modify(|r| r.headers.remove(name))
    }

    /// Value of a header, ignoring case of the name.
    pub fn lookup_header(&self, name: &str) -> Option<String> {
        self.read(|r| r.headers.lookup(name).map(|v| v.to_string()))
    }

    /// The headers set so far.
    pub fn headers(&self) -> HeaderSet {
        self.read(|r| r.headers.clone())
    }

    /// Queue the request for sending.
    pub fn submit(&self) -> Result<(), Error> {
        let id = self.id;
        self.ctx.with(|s| s.submit(id))
    }

    /// Abort the request. Its callback receives `Error::Aborted`.
    pub fn abort(&self) {
        let id = self.id;
        self.ctx.with(|s| s.abort(id))
    }

    /// Timing statistics so far.
    pub fn stats(&self) -> RequestStats {
        self.ctx.shared.borrow().stats(self.id)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        let state = self
            .ctx
            .shared
            .borrow()
            .requests
            .get(&self.id)
            .map(|r| r.state);
        // the record only disappears once the handle is gone
        state.unwrap_or(RequestState::Aborted)
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), Error> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::User(format!("Bad header name {:?}: {}", name, e)))?;
    HeaderValue::from_str(value)
        .map_err(|e| Error::User(format!("Bad header value {:?}: {}", value, e)))?;
    Ok(())
}

impl Drop for Request {
    fn drop(&mut self) {
        let dropped = match self.ctx.shared.try_borrow_mut() {
            Ok(mut s) => {
                s.release(self.id);
                s.take_dropped()
            }
            Err(_) => {
                warn!("{} dropped while context is busy", self.id);
                return;
            }
        };
        drop(dropped);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ctx.shared.try_borrow() {
            Ok(s) => match s.requests.get(&self.id) {
                Some(r) => write!(f, "{:?}", r),
                None => write!(f, "{}", self.id),
            },
            Err(_) => write!(f, "{}", self.id),
        }
    }
}

/// Future of a response, see [`Client::request_future`].
///
/// [`Client::request_future`]: struct.Client.html#method.request_future
pub struct ResponseFuture(oneshot::Receiver<Result<Response, Error>>);

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context) -> Poll<Self::Output> {
        let this = self.get_mut();

        let res = ready!(Pin::new(&mut this.0).poll(cx));

        match res {
            Ok(v) => v.into(),
            Err(_) => Err(Error::Aborted).into(),
        }
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResponseFuture")
    }
}
