use std::time::Duration;

/// Configuration for a [`Context`] and the requests made through it.
///
/// All times are milliseconds, matching the option names an embedding
/// server uses in its own configuration.
///
/// [`Context`]: struct.Context.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Max number of open connections per destination `(host, port, secure)`.
    pub max_parallel_connections: usize,
    /// Max number of requests in flight on one connection.
    pub max_pipelined_requests: usize,
    /// Close connections without requests after this long. 0 keeps them until
    /// the peer closes.
    pub max_idle_time_msecs: u64,
    /// Initial backoff after a failed connect to a destination.
    pub connect_backoff_time_msecs: u64,
    /// Upper bound for the doubling backoff.
    pub connect_backoff_max_time_msecs: u64,
    /// Give up connecting after this long. 0 uses `request_timeout_msecs`.
    pub connect_timeout_msecs: u64,
    /// Per attempt timeout, armed when the request leaves the queue. 0 disables.
    pub request_timeout_msecs: u64,
    /// Overall timeout counted from submit, across all attempts. 0 disables.
    pub request_absolute_timeout_msecs: u64,
    /// Max redirects to follow. 0 delivers redirect responses as they are.
    pub request_max_redirects: u32,
    /// Max number of tries for a request. 0 is treated as 1.
    pub request_max_attempts: u32,
    /// `user-agent` header to add to requests lacking one.
    pub user_agent: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_parallel_connections: 1,
            max_pipelined_requests: 1,
            max_idle_time_msecs: 60_000,
            connect_backoff_time_msecs: 100,
            connect_backoff_max_time_msecs: 60_000,
            connect_timeout_msecs: 0,
            request_timeout_msecs: 60_000,
            request_absolute_timeout_msecs: 0,
            request_max_redirects: 0,
            request_max_attempts: 1,
            user_agent: None,
        }
    }
}

impl Settings {
    pub(crate) fn max_parallel(&self) -> usize {
        self.max_parallel_connections.max(1)
    }

    pub(crate) fn max_pipelined(&self) -> usize {
        self.max_pipelined_requests.max(1)
    }

    pub(crate) fn max_idle(&self) -> Option<Duration> {
        non_zero(self.max_idle_time_msecs)
    }

    pub(crate) fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_time_msecs)
    }

    pub(crate) fn backoff_max(&self) -> Duration {
        Duration::from_millis(
            self.connect_backoff_max_time_msecs
                .max(self.connect_backoff_time_msecs),
        )
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        non_zero(self.connect_timeout_msecs).or_else(|| non_zero(self.request_timeout_msecs))
    }

    pub(crate) fn absolute_timeout(&self) -> Option<Duration> {
        non_zero(self.request_absolute_timeout_msecs)
    }
}

pub(crate) fn non_zero(msecs: u64) -> Option<Duration> {
    if msecs == 0 {
        None
    } else {
        Some(Duration::from_millis(msecs))
    }
}
