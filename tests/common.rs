#![allow(dead_code)]

use hreq_pool::{Client, Clock, ConnectionId, Context, Error, Input, Output, Response, Settings};
use std::cell::{Cell, RefCell};
use std::io;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Once;
use std::time::{Duration, Instant};

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock(Rc<Cell<Instant>>);

impl ManualClock {
    pub fn new() -> Self {
        ManualClock(Rc::new(Cell::new(Instant::now())))
    }

    pub fn advance(&self, msecs: u64) {
        self.0.set(self.0.get() + Duration::from_millis(msecs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.0.get()
    }
}

pub type Results = Rc<RefCell<Vec<Result<Response, Error>>>>;

pub fn results() -> Results {
    Rc::new(RefCell::new(vec![]))
}

/// Callback pushing into `results`.
pub fn collect(results: &Results) -> impl FnOnce(Result<Response, Error>) + 'static {
    let results = results.clone();
    move |res| results.borrow_mut().push(res)
}

/// Plays the event loop against a context, with scripted I/O.
pub struct Harness {
    pub ctx: Context,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        setup_logger();
        let clock = ManualClock::new();
        let ctx = Context::builder(settings).clock(clock.clone()).build();
        Harness { ctx, clock }
    }

    pub fn client(&self) -> Client {
        Client::with_context(&self.ctx)
    }

    /// Drain all pending outputs.
    pub fn outputs(&self) -> Vec<Output> {
        let mut v = vec![];
        while let Some(o) = self.ctx.poll_output() {
            v.push(o);
        }
        v
    }

    /// Move the clock and fire timers.
    pub fn advance(&self, msecs: u64) {
        self.clock.advance(msecs);
        self.ctx.handle_timeout();
    }

    pub fn resolved(&self, conn: ConnectionId, ips: &[&str]) {
        let ips: Vec<IpAddr> = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.ctx.handle_input(Input::Resolved {
            conn,
            result: Ok(ips),
        });
    }

    pub fn resolve_failed(&self, conn: ConnectionId) {
        self.ctx.handle_input(Input::Resolved {
            conn,
            result: Err(io::Error::new(io::ErrorKind::NotFound, "no such host")),
        });
    }

    pub fn connected(&self, conn: ConnectionId) {
        self.ctx.handle_input(Input::Connected { conn, result: Ok(()) });
    }

    pub fn connect_failed(&self, conn: ConnectionId) {
        self.ctx.handle_input(Input::Connected {
            conn,
            result: Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        });
    }

    pub fn handshaked(&self, conn: ConnectionId) {
        self.ctx.handle_input(Input::Handshaked { conn, result: Ok(()) });
    }

    pub fn receive(&self, conn: ConnectionId, data: &[u8]) {
        self.ctx.handle_input(Input::Received {
            conn,
            data: data.to_vec(),
        });
    }

    pub fn write_failed(&self, conn: ConnectionId) {
        self.ctx.handle_input(Input::WriteFailed {
            conn,
            error: io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
        });
    }

    pub fn closed(&self, conn: ConnectionId) {
        self.ctx.handle_input(Input::Closed { conn });
    }
}

pub fn connects(outputs: &[Output]) -> Vec<ConnectionId> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Connect { conn, .. } => Some(*conn),
            _ => None,
        })
        .collect()
}

pub fn resolves(outputs: &[Output]) -> Vec<(ConnectionId, String)> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Resolve { conn, host } => Some((*conn, host.clone())),
            _ => None,
        })
        .collect()
}

pub fn transmits(outputs: &[Output]) -> Vec<(ConnectionId, String)> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Transmit { conn, data } => {
                Some((*conn, String::from_utf8_lossy(data).to_string()))
            }
            _ => None,
        })
        .collect()
}

pub fn closes(outputs: &[Output]) -> Vec<ConnectionId> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Close { conn } => Some(*conn),
            _ => None,
        })
        .collect()
}

/// A minimal keep-alive response with body.
pub fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

pub fn setup_logger() {
    static START: Once = Once::new();
    START.call_once(|| {
        let test_log = std::env::var("TEST_LOG")
            .map(|x| x != "0" && x.to_lowercase() != "false")
            .unwrap_or(false);
        let level = if test_log {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        };
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Warn)
            .filter_module("hreq_pool", level)
            .target(env_logger::Target::Stdout)
            .init();
    });
}
