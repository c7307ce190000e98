//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for all hardware and network traits,
//! enabling development and testing on desktop without physical hardware.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockRelayPins`] | [`OutputPins`] | Records pin modes, levels, and writes |
//! | [`MockInputPins`] | [`InputPins`] | Settable levels with pull-resistor defaults |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockWatchdog`] | [`Watchdog`] | Counts feeds and reset requests |
//! | [`MockMqtt`] | [`MqttClient`] | Captures pub/sub operations |
//!
//! # Example
//!
//! ```rust
//! use relay_bank::commands::SwitchState;
//! use relay_bank::config::Configuration;
//! use relay_bank::hal::MockRelayPins;
//! use relay_bank::relay::RelayDriver;
//!
//! let mut relays = RelayDriver::new(MockRelayPins::new(), &Configuration::default()).unwrap();
//! relays.apply(3, SwitchState::On).unwrap();
//!
//! // Verify via the recorded pin levels
//! assert_eq!(relays.pins().level(19), Some(false));
//! assert_eq!(relays.pins().writes.last(), Some(&(19, false)));
//! ```
//!
//! [`OutputPins`]: crate::traits::OutputPins
//! [`InputPins`]: crate::traits::InputPins
//! [`Clock`]: crate::traits::Clock
//! [`Watchdog`]: crate::traits::Watchdog
//! [`MqttClient`]: crate::traits::MqttClient

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use crate::traits::{
    Clock, InputPins, LastWill, Millis, MqttClient, MqttMessage, OutputPins, Pull, QoS, Watchdog,
};

const PIN_SLOTS: usize = 64;

// ============================================================================
// Hardware Mocks
// ============================================================================

/// Mock relay outputs for testing.
///
/// Records every write for verification. Use the public fields to inspect
/// state after test operations, and `fail_writes` to simulate a driver
/// fault.
///
/// # Example
///
/// ```rust
/// use relay_bank::hal::MockRelayPins;
/// use relay_bank::traits::OutputPins;
///
/// let mut pins = MockRelayPins::new();
/// pins.configure_output(16).unwrap();
/// pins.write(16, true).unwrap();
///
/// assert!(pins.is_output(16));
/// assert_eq!(pins.level(16), Some(true));
/// assert_eq!(pins.write_count, 1);
///
/// pins.fail_writes = true;
/// assert!(pins.write(16, false).is_err());
/// ```
#[derive(Debug)]
pub struct MockRelayPins {
    levels: [Option<bool>; PIN_SLOTS],
    outputs: [bool; PIN_SLOTS],
    /// Every successful write, in order.
    pub writes: Vec<(u8, bool)>,
    /// Number of successful writes.
    pub write_count: usize,
    /// When set, every write fails.
    pub fail_writes: bool,
}

impl MockRelayPins {
    /// Creates mock outputs with every pin unconfigured.
    pub fn new() -> Self {
        Self {
            levels: [None; PIN_SLOTS],
            outputs: [false; PIN_SLOTS],
            writes: Vec::new(),
            write_count: 0,
            fail_writes: false,
        }
    }

    /// Last level written to `pin`, if any.
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.levels.get(pin as usize).copied().flatten()
    }

    /// Returns true if `pin` was configured as an output.
    pub fn is_output(&self, pin: u8) -> bool {
        self.outputs.get(pin as usize).copied().unwrap_or(false)
    }
}

impl Default for MockRelayPins {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputPins for MockRelayPins {
    type Error = ();

    fn configure_output(&mut self, pin: u8) -> Result<(), ()> {
        let slot = self.outputs.get_mut(pin as usize).ok_or(())?;
        *slot = true;
        Ok(())
    }

    fn write(&mut self, pin: u8, high: bool) -> Result<(), ()> {
        if self.fail_writes {
            return Err(());
        }
        let slot = self.levels.get_mut(pin as usize).ok_or(())?;
        *slot = Some(high);
        self.writes.push((pin, high));
        self.write_count += 1;
        Ok(())
    }
}

/// Mock digital inputs for testing.
///
/// A pin reads the level set with [`set_level`](Self::set_level); until
/// one is set it follows its pull resistor (high with [`Pull::Up`], low
/// otherwise), like an open switch on real hardware.
///
/// # Example
///
/// ```rust
/// use relay_bank::hal::MockInputPins;
/// use relay_bank::traits::{InputPins, Pull};
///
/// let mut pins = MockInputPins::new();
/// pins.configure_input(25, Pull::Up);
/// assert!(pins.is_high(25));
///
/// // Close the switch
/// pins.set_level(25, false);
/// assert!(!pins.is_high(25));
/// assert_eq!(pins.pull(25), Some(Pull::Up));
/// ```
#[derive(Debug)]
pub struct MockInputPins {
    levels: [Option<bool>; PIN_SLOTS],
    pulls: [Option<Pull>; PIN_SLOTS],
    /// Number of reads across all pins.
    pub read_count: usize,
}

impl MockInputPins {
    /// Creates mock inputs with every pin floating low.
    pub fn new() -> Self {
        Self {
            levels: [None; PIN_SLOTS],
            pulls: [None; PIN_SLOTS],
            read_count: 0,
        }
    }

    /// Drive `pin` to a fixed level.
    pub fn set_level(&mut self, pin: u8, high: bool) {
        if let Some(slot) = self.levels.get_mut(pin as usize) {
            *slot = Some(high);
        }
    }

    /// Pull configured on `pin`, if it was configured.
    pub fn pull(&self, pin: u8) -> Option<Pull> {
        self.pulls.get(pin as usize).copied().flatten()
    }
}

impl Default for MockInputPins {
    fn default() -> Self {
        Self::new()
    }
}

impl InputPins for MockInputPins {
    fn configure_input(&mut self, pin: u8, pull: Pull) {
        if let Some(slot) = self.pulls.get_mut(pin as usize) {
            *slot = Some(pull);
        }
    }

    fn is_high(&mut self, pin: u8) -> bool {
        self.read_count += 1;
        let idx = pin as usize;
        match self.levels.get(idx).copied().flatten() {
            Some(level) => level,
            None => self.pulls.get(idx).copied().flatten() == Some(Pull::Up),
        }
    }
}

/// Mock clock for testing.
///
/// Provides a controllable time source for testing time-dependent behavior.
/// Advancing wraps at `u32::MAX` like the real counter.
///
/// # Example
///
/// ```rust
/// use relay_bank::hal::MockClock;
/// use relay_bank::traits::Clock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current_ms: Millis,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Sets the current time in milliseconds.
    pub fn set(&mut self, ms: Millis) {
        self.current_ms = ms;
    }

    /// Advances the clock by the given duration.
    pub fn advance(&mut self, ms: Millis) {
        self.current_ms = self.current_ms.wrapping_add(ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> Millis {
        self.current_ms
    }
}

/// Mock watchdog for testing.
#[derive(Debug, Default)]
pub struct MockWatchdog {
    /// Number of feeds.
    pub feeds: usize,
    /// Number of reset requests.
    pub resets: usize,
}

impl MockWatchdog {
    /// Creates a fresh watchdog.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Watchdog for MockWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

// ============================================================================
// Network Mocks
// ============================================================================

/// A published message: topic, payload, QoS, retain.
pub type Published = (String, Vec<u8>, QoS, bool);

/// Mock MQTT client for testing.
///
/// Records all publish/subscribe operations and allows injecting
/// incoming messages for testing message handling. Starts disconnected;
/// `connect` succeeds unless `fail_connect` is set.
///
/// # Example
///
/// ```rust
/// use relay_bank::hal::MockMqtt;
/// use relay_bank::traits::{LastWill, MqttClient, QoS};
///
/// let mut mqtt = MockMqtt::new();
/// let will = LastWill { topic: "esp32/status", payload: b"offline", qos: QoS::AtLeastOnce, retain: true };
/// mqtt.connect(&will).unwrap();
///
/// // Queue incoming message
/// mqtt.queue_message("esp32/switches", br#"{"switch":0,"state":"on"}"#);
/// assert!(mqtt.try_recv().is_some());
///
/// // Check published messages
/// mqtt.publish("esp32/status", b"online", QoS::AtLeastOnce, true).unwrap();
/// assert_eq!(mqtt.published_to("esp32/status").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockMqtt {
    /// Messages that have been published.
    pub published: Vec<Published>,
    /// Topics that have been subscribed to, with their QoS.
    pub subscriptions: Vec<(String, QoS)>,
    /// Queue of incoming messages to be returned by `try_recv()`.
    pub incoming: VecDeque<MqttMessage>,
    /// Whether the client is connected.
    pub connected: bool,
    /// Number of connect attempts.
    pub connect_calls: usize,
    /// Last-will registered by the most recent connect: topic, payload, QoS, retain.
    pub will: Option<Published>,
    /// When set, connect attempts fail.
    pub fail_connect: bool,
    /// When set, publishes fail.
    pub fail_publish: bool,
}

impl MockMqtt {
    /// Creates a new, disconnected mock MQTT client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an incoming message
    pub fn queue_message(&mut self, topic: &str, payload: &[u8]) {
        self.incoming.push_back(MqttMessage::new(topic, payload));
    }

    /// Check if a topic was subscribed to
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|(t, _)| t == topic)
    }

    /// Get published messages for a topic
    pub fn published_to(&self, topic: &str) -> Vec<&Published> {
        self.published
            .iter()
            .filter(|(t, _, _, _)| t == topic)
            .collect()
    }

    /// Payloads published to a topic, as UTF-8 strings.
    pub fn payloads_to(&self, topic: &str) -> Vec<String> {
        self.published_to(topic)
            .into_iter()
            .map(|(_, p, _, _)| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// Simulate the broker dropping the session.
    pub fn drop_session(&mut self) {
        self.connected = false;
    }

    /// Forget everything published so far.
    pub fn clear_published(&mut self) {
        self.published.clear();
    }
}

impl MqttClient for MockMqtt {
    type Error = ();

    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), ()> {
        self.connect_calls += 1;
        if self.fail_connect {
            return Err(());
        }
        self.will = Some((will.topic.into(), will.payload.to_vec(), will.qos, will.retain));
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), ()> {
        if !self.connected || self.fail_publish {
            return Err(());
        }
        self.published
            .push((topic.into(), payload.to_vec(), qos, retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), ()> {
        if !self.connected {
            return Err(());
        }
        self.subscriptions.push((topic.into(), qos));
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        self.incoming.pop_front()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
