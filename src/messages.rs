//! Wire formats for MQTT communication.
//!
//! Everything is JSON, parsed and written with `serde-json-core` into
//! fixed-size buffers so the same code runs on desktop and on the device.
//!
//! | Direction | Type | Topic |
//! |-----------|------|-------|
//! | in  | [`SwitchCommand`] | `<prefix>/switches` |
//! | in  | [`ConfigMessage`] | `<prefix>/config` |
//! | out | [`StateSnapshot`] | `<prefix>/state` |
//! | out | [`Heartbeat`], [`TelemetryEvent`] | `<prefix>/telemetry` |
//!
//! # Example
//!
//! ```
//! use relay_bank::commands::{Desired, Target};
//! use relay_bank::config::Configuration;
//! use relay_bank::messages::parse_switch_command;
//!
//! let config = Configuration::default();
//! let cmd = parse_switch_command(br#"{"switch": "all", "state": "off"}"#, &config).unwrap();
//! assert_eq!(cmd.target, Target::All);
//! assert_eq!(cmd.desired, Desired::Off);
//!
//! // The backend addresses relays by GPIO with a boolean state
//! let cmd = parse_switch_command(br#"{"gpio": 18, "state": true}"#, &config).unwrap();
//! assert_eq!(cmd.target, Target::Switch(2));
//! assert_eq!(cmd.desired, Desired::On);
//! ```

use serde::{Deserialize, Serialize};

use crate::commands::{Desired, Target};
use crate::config::{short_string, Configuration, FusionMode, NUM_SWITCHES};
use crate::error::Error;
use crate::traits::Millis;

// ============================================================================
// Switch Commands
// ============================================================================

/// A decoded command from the `switches` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchCommand<'a> {
    /// Addressed switch or broadcast.
    pub target: Target,
    /// Requested state.
    pub desired: Desired,
    /// Device secret supplied with the command.
    pub secret: Option<&'a str>,
}

/// Raw command shape.
///
/// `switch` is either an index or `"all"`, and `state` is either a word or
/// a boolean, so the payload is tried against each combination in turn.
#[derive(Deserialize)]
struct SwitchWire<'a, S, V> {
    #[serde(default)]
    switch: Option<S>,
    #[serde(default)]
    gpio: Option<u8>,
    state: V,
    #[serde(default, borrow)]
    secret: Option<&'a str>,
}

trait SwitchField {
    fn target(self) -> Option<Target>;
}

impl SwitchField for u8 {
    fn target(self) -> Option<Target> {
        Some(Target::Switch(self)).filter(|_| (self as usize) < NUM_SWITCHES)
    }
}

impl SwitchField for &str {
    fn target(self) -> Option<Target> {
        let s = self.trim();
        if s.eq_ignore_ascii_case("all") {
            Some(Target::All)
        } else {
            s.parse::<u8>().ok().and_then(SwitchField::target)
        }
    }
}

trait StateField {
    fn desired(self) -> Option<Desired>;
}

impl StateField for &str {
    fn desired(self) -> Option<Desired> {
        Desired::from_text(self)
    }
}

impl StateField for bool {
    fn desired(self) -> Option<Desired> {
        Some(if self { Desired::On } else { Desired::Off })
    }
}

impl<'a, S: SwitchField, V: StateField> SwitchWire<'a, S, V> {
    fn resolve(self, config: &Configuration) -> Result<SwitchCommand<'a>, Error> {
        let target = match (self.switch, self.gpio) {
            (Some(s), _) => s.target(),
            (None, Some(gpio)) => config.switch_for_relay_pin(gpio).map(Target::Switch),
            (None, None) => None,
        };
        let desired = self.state.desired();
        match (target, desired) {
            (Some(target), Some(desired)) => Ok(SwitchCommand {
                target,
                desired,
                secret: self.secret,
            }),
            _ => Err(Error::MalformedMessage),
        }
    }
}

fn decode<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Option<T> {
    serde_json_core::from_slice(payload).ok().map(|(value, _)| value)
}

/// Parse a switch command.
///
/// Accepted shapes:
///
/// ```json
/// {"switch": 0, "state": "on", "secret": "..."}
/// {"switch": "all", "state": "toggle"}
/// {"gpio": 16, "state": false}
/// ```
///
/// # Errors
///
/// [`Error::MalformedMessage`] for invalid JSON, an unknown state, an
/// out-of-range index, or a GPIO that drives no relay.
pub fn parse_switch_command<'a>(
    payload: &'a [u8],
    config: &Configuration,
) -> Result<SwitchCommand<'a>, Error> {
    if let Some(wire) = decode::<SwitchWire<'a, u8, &'a str>>(payload) {
        return wire.resolve(config);
    }
    if let Some(wire) = decode::<SwitchWire<'a, &'a str, &'a str>>(payload) {
        return wire.resolve(config);
    }
    if let Some(wire) = decode::<SwitchWire<'a, u8, bool>>(payload) {
        return wire.resolve(config);
    }
    if let Some(wire) = decode::<SwitchWire<'a, &'a str, bool>>(payload) {
        return wire.resolve(config);
    }
    Err(Error::MalformedMessage)
}

// ============================================================================
// Configuration Messages
// ============================================================================

/// A partial configuration from the `config` topic.
///
/// Every field is optional; absent fields keep their current value when the
/// message is merged with [`apply_to`](Self::apply_to).
///
/// # JSON Example
///
/// ```json
/// {"motionEnabled": true, "primaryPin": 34, "secondaryPin": -1, "fusion": "or", "autoOffSec": 300}
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigMessage<'a> {
    /// Enable motion auto-off.
    pub motion_enabled: Option<bool>,
    /// Primary motion sensor GPIO.
    pub primary_pin: Option<u8>,
    /// Secondary motion sensor GPIO; negative removes the channel.
    pub secondary_pin: Option<i16>,
    /// Fusion rule name.
    #[serde(borrow)]
    pub fusion: Option<&'a str>,
    /// Auto-off delay in seconds.
    pub auto_off_sec: Option<u32>,
    /// Advisory sensitivity.
    pub sensitivity: Option<u8>,
    /// Advisory detection range.
    pub detection_range: Option<u8>,
    /// Sensor model name.
    #[serde(borrow)]
    pub sensor_type: Option<&'a str>,
    /// Relay GPIOs.
    pub relay_pins: Option<[u8; NUM_SWITCHES]>,
    /// Manual switch GPIOs.
    pub manual_pins: Option<[u8; NUM_SWITCHES]>,
    /// Relay polarity.
    pub relay_active_high: Option<bool>,
    /// Manual switch polarity.
    pub manual_active_low: Option<bool>,
}

impl ConfigMessage<'_> {
    /// Merge onto `base`, producing an unvalidated candidate.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedMessage`] for an unknown fusion name or a
    /// secondary pin beyond 255.
    pub fn apply_to(&self, base: &Configuration) -> Result<Configuration, Error> {
        let mut next = base.clone();
        let motion = &mut next.motion;

        if let Some(enabled) = self.motion_enabled {
            motion.enabled = enabled;
        }
        if let Some(pin) = self.primary_pin {
            motion.primary_pin = pin;
        }
        if let Some(pin) = self.secondary_pin {
            motion.secondary_pin = if pin < 0 {
                None
            } else {
                Some(u8::try_from(pin).map_err(|_| Error::MalformedMessage)?)
            };
        }
        if let Some(name) = self.fusion {
            motion.fusion = FusionMode::from_text(name).ok_or(Error::MalformedMessage)?;
        }
        if let Some(secs) = self.auto_off_sec {
            motion.auto_off_sec = secs;
        }
        if let Some(s) = self.sensitivity {
            motion.sensitivity = s;
        }
        if let Some(r) = self.detection_range {
            motion.detection_range = r;
        }
        if let Some(kind) = self.sensor_type {
            motion.sensor_type = short_string(kind);
        }
        if let Some(pins) = self.relay_pins {
            next.relay_pins = pins;
        }
        if let Some(pins) = self.manual_pins {
            next.manual_pins = pins;
        }
        if let Some(high) = self.relay_active_high {
            next.relay_active_high = high;
        }
        if let Some(low) = self.manual_active_low {
            next.manual_active_low = low;
        }
        Ok(next)
    }
}

/// Parse a configuration message.
///
/// # Example
///
/// ```
/// use relay_bank::config::{Configuration, FusionMode};
/// use relay_bank::messages::parse_config_message;
///
/// let msg = parse_config_message(br#"{"motionEnabled": true, "fusion": "or"}"#).unwrap();
/// let next = msg.apply_to(&Configuration::default()).unwrap();
/// assert!(next.motion.enabled);
/// assert_eq!(next.motion.fusion, FusionMode::Or);
/// ```
///
/// # Errors
///
/// [`Error::MalformedMessage`] if the payload is not a JSON object of the
/// expected shape.
pub fn parse_config_message(payload: &[u8]) -> Result<ConfigMessage<'_>, Error> {
    decode(payload).ok_or(Error::MalformedMessage)
}

// ============================================================================
// Outbound Types
// ============================================================================

/// Periodic state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Logical state per switch.
    pub switches: [bool; NUM_SWITCHES],
    /// Fused motion presence.
    pub presence: bool,
    /// Time since boot.
    pub uptime_ms: Millis,
}

/// Health report published every heartbeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat<'a> {
    /// Always `"heartbeat"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Device identity.
    pub device: &'a str,
    /// Time since boot.
    pub uptime_ms: Millis,
    /// Commands evicted from the queue.
    pub queue_drops: u32,
    /// Reconnects after the first session.
    pub reconnects: u32,
    /// Discarded unparseable frames.
    pub malformed: u32,
    /// Commands with a wrong secret.
    pub auth_rejected: u32,
    /// Rejected configurations.
    pub config_rejected: u32,
    /// Failed broker operations.
    pub transport_failures: u32,
    /// Kind of the most recent error.
    pub last_error: &'static str,
    /// Motion auto-off enabled.
    pub motion_enabled: bool,
    /// Advisory sensitivity.
    pub sensitivity: u8,
    /// Advisory detection range.
    pub detection_range: u8,
    /// Sensor model name.
    pub sensor_type: &'a str,
    /// Fusion rule name.
    pub fusion: &'static str,
}

/// One-off telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    /// A switch was turned off by an expired auto-off deadline.
    #[serde(rename = "motion-auto-off", rename_all = "camelCase")]
    MotionAutoOff {
        /// Switch index.
        switch: u8,
        /// Time of expiry.
        uptime_ms: Millis,
    },
    /// Fused presence changed.
    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence {
        /// New presence.
        presence: bool,
        /// Time of the edge.
        uptime_ms: Millis,
    },
    /// A wall switch toggled a relay.
    #[serde(rename = "manual_switch")]
    ManualSwitch {
        /// Switch index.
        switch: u8,
        /// Relay GPIO.
        gpio: u8,
        /// New logical state.
        state: bool,
    },
    /// A configuration message was rejected.
    #[serde(rename = "config-error")]
    ConfigError {
        /// Reason code.
        reason: &'static str,
    },
}

/// Serialize `value` as JSON into `buf`.
///
/// Returns the written prefix of `buf`, or `None` if it does not fit.
pub fn encode<'b, T: Serialize>(value: &T, buf: &'b mut [u8]) -> Option<&'b [u8]> {
    let len = serde_json_core::to_slice(value, buf).ok()?;
    buf.get(..len)
}

// ============================================================================
// Tests
// ============================================================================
