//! Keepalive policy: when to ping and with what payload.
//!
//! The policy is pure state; the connection owns the periodic task that
//! consumes it (one task per connection, sharing the writer lock with
//! application sends).

use std::time::Duration;

/// Default spacing between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Keepalive schedule for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    interval: Option<Duration>,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Some(DEFAULT_PING_INTERVAL),
        }
    }
}

impl KeepAlive {
    /// A schedule that never pings.
    pub fn disabled() -> Self {
        Self { interval: None }
    }

    /// Build a schedule from a requested interval.
    ///
    /// `None` and zero both disable the keepalive (a zero period would spin
    /// the writer lock).
    pub fn from_interval(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|i| !i.is_zero()),
        }
    }

    /// The active ping interval, if pinging is enabled.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Fresh nonce carried in each ping payload.
    pub fn next_nonce(&self) -> [u8; 8] {
        rand::random::<u64>().to_be_bytes()
    }
}
