use std::fmt;
use std::io;

/// Possible errors from this crate.
///
/// A response with a non-2xx status is not an error, it is delivered to the
/// request callback like any other response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Host name could not be resolved.
    Resolution(String),
    /// TCP connect or secure handshake failed, or connecting took too long.
    Connect(String),
    /// The request did not complete within its timeout.
    Timeout(String),
    /// Writing the request or its payload to the connection failed.
    Send(String),
    /// The connection went away before the response was complete.
    ConnectionLost(String),
    /// The peer sent something we can't parse as an HTTP/1.x response.
    Protocol(String),
    /// The request was redirected more times than allowed.
    RedirectLimitExceeded {
        /// The configured maximum.
        limit: u32,
    },
    /// The request was aborted by the caller or by deinit of its client/context.
    Aborted,
    /// A user/usage problem such as mutating a request after submit.
    User(String),
}

impl Error {
    /// Whether this error may be retried within the request attempt budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Resolution(_)
                | Error::Connect(_)
                | Error::Timeout(_)
                | Error::Send(_)
                | Error::ConnectionLost(_)
        )
    }

    /// Whether the failure happened after (part of) the request was on the wire.
    ///
    /// These count against `send_attempts` rather than `attempts`.
    pub(crate) fn is_after_send(&self) -> bool {
        matches!(self, Error::Send(_) | Error::ConnectionLost(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Resolution(v) => write!(f, "resolve failed: {}", v),
            Error::Connect(v) => write!(f, "connect failed: {}", v),
            Error::Timeout(v) => write!(f, "timed out: {}", v),
            Error::Send(v) => write!(f, "send failed: {}", v),
            Error::ConnectionLost(v) => write!(f, "connection lost: {}", v),
            Error::Protocol(v) => write!(f, "{}", v),
            Error::RedirectLimitExceeded { limit } => {
                write!(f, "Redirected too many times (limit {})", limit)
            }
            Error::Aborted => write!(f, "Aborted"),
            Error::User(v) => write!(f, "{}", v),
        }
    }
}

impl std::error::Error for Error {}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Error::Protocol(format!("http11 parser: {}", e))
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::User(format!("http api: {}", e))
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(e: http::uri::InvalidUri) -> Self {
        Error::User(format!("invalid uri: {}", e))
    }
}

/// Helper to keep io error kind and message in the cloneable error.
pub(crate) fn io_msg(e: &io::Error) -> String {
    format!("{:?}: {}", e.kind(), e)
}
