//! Connection supervision
//!
//! [`ConnectionSupervisor`] is the only owner of [`ConnectionState`]. The
//! acquisition loop reports every open, read and frame outcome to it and
//! follows the [`ErrorAction`] it returns; the supervisor itself performs no
//! I/O, which keeps every transition testable with synthetic timestamps.
//!
//! ```text
//! Disconnected -(start)-> Connecting -(open ok)-> Connected
//! Connected -(link lost | too many transport errors)-> Disconnected
//! Connected -(N errors within window)-> Degraded -(streaks below N)-> Connected
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SupervisorConfig;
use crate::error::{ConnectionError, TransportError};

/// Link state as reported to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No open link
    Disconnected,
    /// Opening the port
    Connecting,
    /// Reading normally
    Connected,
    /// Link open but recent reads or frames keep failing
    Degraded,
}

impl ConnectionState {
    /// Whether readings produced in this state can be trusted
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Point-in-time health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: ConnectionState,
    /// When `state` was entered
    pub since: DateTime<Utc>,
    /// Length of the current error streak
    pub consecutive_errors: usize,
    /// Reconnect attempts since the last successful read
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            since: Utc::now(),
            consecutive_errors: 0,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

/// What the acquisition loop should do after a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep reading from the same transport
    Continue,
    /// Close the transport and reconnect after back-off
    Reconnect,
}

/// Exponential back-off: `initial * 2^attempt`, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Error timestamps within a sliding window
#[derive(Debug, Clone)]
struct ErrorStreak {
    window: Duration,
    hits: VecDeque<Instant>,
}

impl ErrorStreak {
    fn new(window: Duration) -> Self {
        Self {
            window,
            hits: VecDeque::new(),
        }
    }

    /// Record an error at `now`; returns the streak length within the window
    fn record(&mut self, now: Instant) -> usize {
        while let Some(first) = self.hits.front() {
            if now.saturating_duration_since(*first) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        self.hits.push_back(now);
        self.hits.len()
    }

    fn clear(&mut self) {
        self.hits.clear();
    }

    fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Connection lifecycle state machine
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    degraded_threshold: usize,
    reconnect_after_errors: usize,
    state: ConnectionState,
    since: DateTime<Utc>,
    transport_errors: ErrorStreak,
    frame_errors: ErrorStreak,
    /// Transport errors since the last successful read, regardless of window
    consecutive_transport_errors: usize,
    backoff: Backoff,
    reconnect_attempts: u32,
    last_error: Option<String>,
}

impl ConnectionSupervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            degraded_threshold: config.degraded_threshold.max(1),
            reconnect_after_errors: config.reconnect_after_errors.max(1),
            state: ConnectionState::Disconnected,
            since: Utc::now(),
            transport_errors: ErrorStreak::new(config.error_window()),
            frame_errors: ErrorStreak::new(config.error_window()),
            consecutive_transport_errors: 0,
            backoff: Backoff::new(config.backoff_initial(), config.backoff_max()),
            reconnect_attempts: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state,
            since: self.since,
            consecutive_errors: self
                .consecutive_transport_errors
                .max(self.frame_errors.len()),
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
        }
    }

    /// About to open the port, initially or for a reconnect
    pub fn on_connecting(&mut self) {
        self.set_state(ConnectionState::Connecting);
    }

    pub fn on_open_ok(&mut self) {
        self.transport_errors.clear();
        self.frame_errors.clear();
        self.consecutive_transport_errors = 0;
        self.set_state(ConnectionState::Connected);
    }

    pub fn on_open_failed(&mut self, err: &ConnectionError) {
        self.last_error = Some(err.to_string());
        self.set_state(ConnectionState::Disconnected);
    }

    /// Delay before the next reconnect attempt
    pub fn next_backoff(&mut self) -> Duration {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.backoff.next_delay()
    }

    pub fn on_read_ok(&mut self) {
        self.transport_errors.clear();
        self.consecutive_transport_errors = 0;
        self.reconnect_attempts = 0;
        self.backoff.reset();
        self.refresh_degraded();
    }

    pub fn on_transport_error(&mut self, err: &TransportError, now: Instant) -> ErrorAction {
        self.last_error = Some(err.to_string());
        self.consecutive_transport_errors += 1;

        if err.is_link_lost() {
            tracing::warn!(error = %err, "serial link lost");
            self.set_state(ConnectionState::Disconnected);
            return ErrorAction::Reconnect;
        }
        if self.consecutive_transport_errors >= self.reconnect_after_errors {
            tracing::warn!(
                errors = self.consecutive_transport_errors,
                "too many consecutive transport errors, reopening link"
            );
            self.set_state(ConnectionState::Disconnected);
            return ErrorAction::Reconnect;
        }

        self.transport_errors.record(now);
        self.refresh_degraded();
        ErrorAction::Continue
    }

    pub fn on_frame_ok(&mut self) {
        self.frame_errors.clear();
        self.refresh_degraded();
    }

    /// A framing or parse error; `reason` is kept as the last error
    pub fn on_frame_error(&mut self, reason: impl Into<String>, now: Instant) {
        self.last_error = Some(reason.into());
        self.frame_errors.record(now);
        self.refresh_degraded();
    }

    pub fn on_stopped(&mut self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn refresh_degraded(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Degraded
        ) {
            return;
        }
        let failing = self.transport_errors.len() >= self.degraded_threshold
            || self.frame_errors.len() >= self.degraded_threshold;
        let next = if failing {
            ConnectionState::Degraded
        } else {
            ConnectionState::Connected
        };
        self.set_state(next);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        match next {
            ConnectionState::Degraded => tracing::warn!(
                from = %self.state,
                last_error = ?self.last_error,
                "scale link degraded"
            ),
            _ => tracing::info!(from = %self.state, to = %next, "scale link state changed"),
        }
        self.state = next;
        self.since = Utc::now();
    }
}
