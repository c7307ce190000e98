//! # relay-bank
//!
//! Firmware core for a six-relay classroom controller: lights, fans,
//! projector, AC. Every relay has a paired wall switch, can be driven
//! remotely over MQTT, and can switch itself off once a motion sensor
//! reports the room empty.
//!
//! ## Features
//!
//! - **Three command sources**: wall switches, broker commands, and motion auto-off
//! - **Manual wins**: a wall switch always toggles, whatever the backend asked for
//! - **Debounced inputs**: three agreeing samples per edge, bounce filtering on wall switches
//! - **Broker resilience**: last-will, exponential reconnect backoff, stale session detection
//! - **Runtime configuration**: pin maps, polarity, and motion settings over a retained topic
//! - **Bounded memory**: fixed-capacity `heapless` containers throughout the core
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Hardware and network abstractions
//! - `commands` / `queue` - Command types and the bounded remote command queue
//! - `sampler` / `relay` - Debounced inputs and polarity-aware relay outputs
//! - `motion` - Sensor fusion and presence edges
//! - `engine` - The per-switch state machines
//! - `transport` / `telemetry` / `messages` - Broker session and wire formats
//! - `supervisor` - Boot, configuration intake, watchdog, and the main loop
//! - `hal` - Concrete implementations (mock for testing, esp32 for hardware)
//!
//! ## Example
//!
//! ```rust
//! use relay_bank::{
//!     Config, Supervisor, SwitchState,
//!     hal::{MockInputPins, MockMqtt, MockRelayPins, MockWatchdog},
//! };
//!
//! let mut sup = Supervisor::boot(
//!     &Config::default(),
//!     MockRelayPins::new(),
//!     MockInputPins::new(),
//!     MockMqtt::new(),
//!     MockWatchdog::new(),
//!     0,
//! )
//! .unwrap();
//!
//! // Flip wall switch 2 (GPIO 27, active-low) and keep ticking
//! sup.inputs_mut().set_level(27, false);
//! for t in (20..=200).step_by(20) {
//!     sup.tick(t).unwrap();
//! }
//! assert_eq!(sup.engine().state(2), Some(SwitchState::On));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// Command types for switch control.
pub mod commands;
/// Shared configuration system for desktop and ESP32.
pub mod config;
/// Per-switch state machines reconciling manual, remote, and motion sources.
pub mod engine;
/// Error taxonomy and counters.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Wire formats for MQTT communication (serde-based).
pub mod messages;
/// Motion sensor fusion and presence tracking.
pub mod motion;
/// Bounded remote command queue.
pub mod queue;
/// Polarity-aware relay output driver.
pub mod relay;
/// Debounced input sampling.
pub mod sampler;
/// Boot sequence and main loop composition.
pub mod supervisor;
/// State snapshots, heartbeat, and events.
pub mod telemetry;
/// Core traits for hardware and network abstraction.
pub mod traits;
/// Broker session management.
pub mod transport;

/// Network services for desktop MQTT (feature-gated).
#[cfg(feature = "mqtt")]
pub mod services;

// Re-exports for convenience
pub use commands::{Command, CommandSource, Desired, SwitchState, Target};
pub use engine::{SwitchEngine, SwitchMode, TickReport};
pub use error::{Error, ErrorCounters};
pub use motion::{MotionController, PresenceEdge};
pub use queue::CommandQueue;
pub use relay::RelayDriver;
pub use sampler::InputSampler;
pub use supervisor::{Supervisor, TickError};
pub use telemetry::TelemetryPublisher;
pub use traits::{
    // Hardware
    Clock,
    InputPins,
    Millis,
    OutputPins,
    Pull,
    Watchdog,
    // Network
    LastWill,
    MqttClient,
    MqttMessage,
    QoS,
};
pub use transport::{SessionState, Transport};

// Config re-exports
pub use config::{
    Config, Configuration, DeviceConfig, FusionMode, MotionConfig, MqttConfig, WifiConfig,
};

// Message re-exports (for MQTT APIs)
pub use messages::{
    parse_config_message, parse_switch_command, ConfigMessage, StateSnapshot, SwitchCommand,
    TelemetryEvent,
};
