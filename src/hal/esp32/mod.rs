//! ESP32 hardware abstraction layer for the classroom relay board.
//!
//! Targets the classic ESP32 (Xtensa, GPIO 0-39) through ESP-IDF.
//!
//! # Hardware Configuration
//!
//! - **Relays**: six-channel optocoupled module, active-low inputs
//! - **Wall switches**: dry contacts to ground, internal pull-ups
//! - **Motion**: two PIR/mmWave sensors with push-pull outputs
//!
//! Pins are runtime configuration, not constants: see
//! [`Configuration`](crate::config::Configuration) for the defaults.
//! GPIO 34-39 are input-only and have no internal pull resistors.

mod clock;
mod gpio;
mod watchdog;

pub use clock::Esp32Clock;
pub use gpio::Esp32Gpio;
pub use watchdog::Esp32Watchdog;

#[cfg(feature = "wifi")]
mod wifi;
#[cfg(feature = "wifi")]
pub use wifi::Esp32Wifi;

#[cfg(feature = "esp32-mqtt")]
mod mqtt;
#[cfg(feature = "esp32-mqtt")]
pub use mqtt::{Esp32Mqtt, Esp32MqttError};
