//! Per-request timing accounting.

use std::time::{Duration, Instant};

/// Snapshot of the timing statistics for one request.
///
/// All times are milliseconds. `first_sent_msecs` and `last_sent_msecs` are
/// relative to submit and stay 0 until the request has been sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    /// Time from submit until the request finished (or until now).
    pub total_msecs: u64,
    /// Time from submit until the request was first sent.
    pub first_sent_msecs: u64,
    /// Time from submit until the request was last (re)sent.
    pub last_sent_msecs: u64,
    /// Time spent queued, waiting for connection or pipeline capacity.
    pub lock_msecs: u64,
    /// Time spent connecting, sending or waiting for/receiving the response.
    pub http_ioloop_msecs: u64,
    /// The rest of the total, i.e. time the loop spent on other things.
    pub other_ioloop_msecs: u64,
    /// Number of failed connection-level attempts.
    pub attempts: u32,
    /// Number of failed attempts after the request was sent.
    pub send_attempts: u32,
    /// Number of redirects followed.
    pub redirects: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Not submitted yet.
    Unsubmitted,
    /// Waiting in the dispatcher queue.
    Lock,
    /// Connecting, sending, receiving.
    Http,
    /// Terminal.
    Done,
}

/// Counters that are kept outside the accumulator, but reported with it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub attempts: u32,
    pub send_attempts: u32,
    pub redirects: u32,
}

#[derive(Debug)]
pub(crate) struct StatsAccumulator {
    created_at: Option<Instant>,
    first_sent_at: Option<Instant>,
    last_sent_at: Option<Instant>,
    finished_at: Option<Instant>,
    lock: Duration,
    http: Duration,
    phase: Phase,
    phase_since: Option<Instant>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        StatsAccumulator {
            created_at: None,
            first_sent_at: None,
            last_sent_at: None,
            finished_at: None,
            lock: Duration::from_secs(0),
            http: Duration::from_secs(0),
            phase: Phase::Unsubmitted,
            phase_since: None,
        }
    }

    /// Start the clock, the request was submitted.
    pub fn submitted(&mut self, now: Instant) {
        self.created_at = Some(now);
        self.enter(Phase::Lock, now);
    }

    /// Close the running phase and start the next.
    pub fn enter(&mut self, phase: Phase, now: Instant) {
        if self.phase == Phase::Done {
            return;
        }
        if let Some(since) = self.phase_since {
            let spent = now.saturating_duration_since(since);
            match self.phase {
                Phase::Lock => self.lock += spent,
                Phase::Http => self.http += spent,
                Phase::Unsubmitted | Phase::Done => {}
            }
        }
        self.phase = phase;
        self.phase_since = Some(now);
    }

    /// The request went (again) into SENDING.
    pub fn sent(&mut self, now: Instant) {
        if self.first_sent_at.is_none() {
            self.first_sent_at = Some(now);
        }
        self.last_sent_at = Some(now);
    }

    pub fn finished(&mut self, now: Instant) {
        self.enter(Phase::Done, now);
        self.finished_at = Some(now);
    }

    fn running(&self, phase: Phase, now: Instant) -> Duration {
        match self.phase_since {
            Some(since) if self.phase == phase => now.saturating_duration_since(since),
            _ => Duration::from_secs(0),
        }
    }

    pub fn snapshot(&self, now: Instant, counters: Counters) -> RequestStats {
        let created_at = match self.created_at {
            Some(v) => v,
            None => {
                return RequestStats {
                    attempts: counters.attempts,
                    send_attempts: counters.send_attempts,
                    redirects: counters.redirects,
                    ..Default::default()
                }
            }
        };

        let end = self.finished_at.unwrap_or(now);
        let since_created = |t: Option<Instant>| {
            t.map(|t| msecs(t.saturating_duration_since(created_at)))
                .unwrap_or(0)
        };

        let total = msecs(end.saturating_duration_since(created_at));
        let lock = msecs(self.lock + self.running(Phase::Lock, now));
        let http = msecs(self.http + self.running(Phase::Http, now));

        RequestStats {
            total_msecs: total,
            first_sent_msecs: since_created(self.first_sent_at),
            last_sent_msecs: since_created(self.last_sent_at),
            lock_msecs: lock,
            http_ioloop_msecs: http,
            other_ioloop_msecs: total.saturating_sub(lock + http),
            attempts: counters.attempts,
            send_attempts: counters.send_attempts,
            redirects: counters.redirects,
        }
    }
}

fn msecs(d: Duration) -> u64 {
    d.as_millis() as u64
}
