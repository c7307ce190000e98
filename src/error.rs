//! Error taxonomy and counters.
//!
//! Most errors in this firmware are absorbed where they happen: they are
//! counted in [`ErrorCounters`] and surfaced through the heartbeat. Only a
//! watchdog stall escalates, by resetting the device.

use thiserror::Error;

use crate::config::ConfigError;

/// Broker operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    /// Session setup.
    Connect,
    /// Outbound message.
    Publish,
    /// Topic subscription.
    Subscribe,
}

impl TransportOp {
    /// Returns the operation name.
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportOp::Connect => "connect",
            TransportOp::Publish => "publish",
            TransportOp::Subscribe => "subscribe",
        }
    }
}

impl core::fmt::Display for TransportOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Broker connect, publish, or subscribe failed.
    #[error("transport {0} failed")]
    TransportFailure(TransportOp),
    /// An inbound frame could not be parsed.
    #[error("malformed message")]
    MalformedMessage,
    /// A queued command was dropped to make room.
    #[error("command queue overflow")]
    QueueOverflow,
    /// A command carried the wrong device secret.
    #[error("command rejected: bad device secret")]
    AuthRejected,
    /// A configuration message failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),
    /// The loop went too long without feeding the watchdog.
    #[error("watchdog stall after {elapsed_ms} ms")]
    WatchdogStall {
        /// Time since the previous feed.
        elapsed_ms: u32,
    },
}

impl Error {
    /// Short kind name for telemetry.
    ///
    /// ```
    /// use relay_bank::error::Error;
    ///
    /// assert_eq!(Error::AuthRejected.kind(), "auth-rejected");
    /// ```
    pub const fn kind(&self) -> &'static str {
        match self {
            Error::TransportFailure(_) => "transport-failure",
            Error::MalformedMessage => "malformed-message",
            Error::QueueOverflow => "queue-overflow",
            Error::AuthRejected => "auth-rejected",
            Error::ConfigInvalid(_) => "config-invalid",
            Error::WatchdogStall { .. } => "watchdog-stall",
        }
    }
}

/// Running totals per error kind, reported in the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    /// Failed connects, publishes, and subscribes.
    pub transport_failures: u32,
    /// Discarded unparseable frames.
    pub malformed: u32,
    /// Commands evicted from a full queue.
    pub queue_drops: u32,
    /// Commands with the wrong secret.
    pub auth_rejected: u32,
    /// Rejected configuration messages.
    pub config_rejected: u32,
    /// Successful reconnects after the first session.
    pub reconnects: u32,
    /// Most recent error.
    pub last_error: Option<Error>,
}

impl ErrorCounters {
    /// Creates zeroed counters.
    pub const fn new() -> Self {
        Self {
            transport_failures: 0,
            malformed: 0,
            queue_drops: 0,
            auth_rejected: 0,
            config_rejected: 0,
            reconnects: 0,
            last_error: None,
        }
    }

    /// Count `err` and remember it as the last error.
    pub fn record(&mut self, err: Error) {
        let slot = match err {
            Error::TransportFailure(_) => &mut self.transport_failures,
            Error::MalformedMessage => &mut self.malformed,
            Error::QueueOverflow => &mut self.queue_drops,
            Error::AuthRejected => &mut self.auth_rejected,
            Error::ConfigInvalid(_) => &mut self.config_rejected,
            // Reported once, right before the reset
            Error::WatchdogStall { .. } => {
                self.last_error = Some(err);
                return;
            }
        };
        *slot = slot.saturating_add(1);
        self.last_error = Some(err);
    }

    /// Kind of the last recorded error, or `"none"`.
    pub fn last_error_kind(&self) -> &'static str {
        self.last_error.as_ref().map_or("none", Error::kind)
    }
}

// ============================================================================
// Tests
// ============================================================================
