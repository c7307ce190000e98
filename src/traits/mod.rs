//! Trait definitions for hardware and network abstraction.
//!
//! This module defines the core abstractions that allow relay-bank to:
//! - Run on different hardware (ESP32, desktop mock)
//! - Use different MQTT stacks (esp-idf, rumqttc, mock)
//!
//! # Submodules
//!
//! - `hardware`: Relay outputs, switch/motion inputs, clock, watchdog
//! - `network`: MQTT client trait and message type
//!
//! # Hardware Abstraction
//!
//! The key hardware traits are:
//!
//! - [`OutputPins`]: Relay coil outputs addressed by GPIO number
//! - [`InputPins`]: Wall switch and motion sensor inputs
//! - [`Clock`]: Wrapping millisecond time source
//! - [`Watchdog`]: Feed and forced reset

pub mod hardware;
pub mod network;

pub use hardware::*;
pub use network::*;
