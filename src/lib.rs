#![warn(missing_docs, missing_debug_implementations)]
#![warn(clippy::all)]

//! Connection pooling and request scheduling for HTTP/1.1 clients.
//!
//! This library is the part of an HTTP client that sits between "I want to
//! make this request" and bytes on a socket. It keeps a pool of connections
//! per destination, pipelines requests on them, queues what doesn't fit,
//! retries, follows redirects and enforces timeouts.
//!
//! ## In scope
//!
//! * Up to `max_parallel_connections` per `(host, port, secure)` destination.
//! * Up to `max_pipelined_requests` in flight per connection, responses matched in order.
//! * Exponential connect backoff per destination.
//! * Retries within an attempt budget, redirects within a redirect budget.
//! * Per attempt and absolute request timeouts, idle connection expiry.
//! * `Content-Length` or `Transfer-Encoding: chunked` for request payloads.
//! * `Connection: keep-alive` or `close`, and HTTP/1.0 close delimited responses.
//! * Timing statistics per request.
//!
//! ## Out of scope
//!
//! * Sockets, DNS and TLS. These are done by the event loop driving the context.
//! * Cookies, caches, `Content-Encoding`.
//! * HTTP/2.
//!
//! # Layout and API
//!
//! A [`Context`] holds [`Settings`], the connection pool and the request queue.
//! Any number of [`Client`]s share a context and create [`Request`]s. A request is
//! configured, submitted, and completes by invoking its callback once.
//!
//! The context never does I/O itself. The loop driving it asks for work with
//! [`Context::poll_output`], reports back with [`Context::handle_input`] and keeps
//! time with [`Context::poll_timeout`] / [`Context::handle_timeout`].
//!
//! ```
//! use hreq_pool::{Client, Settings};
//! use http::Method;
//!
//! let client = Client::new(Settings::default());
//!
//! let req = client.request(Method::GET, "example.com", "/", |res| match res {
//!     Ok(res) => println!("{}", res.status()),
//!     Err(e) => println!("failed: {}", e),
//! });
//!
//! req.add_header("accept", "*/*").unwrap();
//! req.submit().unwrap();
//!
//! // The first thing to do is to resolve example.com.
//! let output = client.context().poll_output();
//! assert!(matches!(output, Some(hreq_pool::Output::Resolve { .. })));
//! ```
//!
//! [`Context`]: struct.Context.html
//! [`Settings`]: struct.Settings.html
//! [`Client`]: struct.Client.html
//! [`Request`]: struct.Request.html
//! [`Context::poll_output`]: struct.Context.html#method.poll_output
//! [`Context::handle_input`]: struct.Context.html#method.handle_input
//! [`Context::poll_timeout`]: struct.Context.html#method.poll_timeout
//! [`Context::handle_timeout`]: struct.Context.html#method.handle_timeout

#[macro_use]
extern crate log;

mod client;
mod connection;
mod context;
mod dispatcher;
mod error;
mod headers;
mod policy;
mod pool;
mod request;
mod settings;
mod stats;
mod transport;

#[doc(hidden)]
pub mod chunked;

#[doc(hidden)]
pub mod http11;

#[doc(hidden)]
pub mod limit;

#[doc(hidden)]
pub use pool::Backoff;

pub use client::{Client, Request, ResponseFuture};
pub use connection::ConnectionState;
pub use context::{Context, ContextBuilder};
pub use error::Error;
pub use headers::HeaderSet;
pub use http11::{Http11Codec, ResponseHead, WireCodec};
pub use policy::{DowngradeRedirects, PreserveMethodRedirects, RedirectPolicy};
pub use request::{Payload, RequestId, RequestState, Response};
pub use settings::Settings;
pub use stats::RequestStats;
pub use transport::{Clock, ConnectionId, Input, Output, SystemClock};
