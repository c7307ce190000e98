//! Hardware abstraction traits for relay outputs, switch/motion inputs, time and watchdog.
//!
//! This module defines the core hardware interfaces that allow relay-bank to
//! work across different platforms (ESP32, desktop mocks, etc.).
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`OutputPins`] | Digital outputs driving relay coils |
//! | [`InputPins`] | Digital inputs for wall switches and motion sensors |
//! | [`Clock`] | Millisecond time source for `no_std` environments |
//! | [`Watchdog`] | Task watchdog feed and forced reset |
//!
//! Pins are addressed by GPIO number so the pin map can change at runtime
//! when a new configuration arrives.
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations
//! from [`crate::hal::mock`]. For ESP32 hardware, use the
//! implementations from `hal::esp32` (requires `esp32` feature).
//!
//! # Example
//!
//! ```rust
//! use relay_bank::traits::{InputPins, OutputPins, Pull};
//! use relay_bank::hal::{MockInputPins, MockRelayPins};
//!
//! let mut outputs = MockRelayPins::new();
//! outputs.configure_output(16).unwrap();
//! outputs.write(16, false).unwrap();
//! assert_eq!(outputs.level(16), Some(false));
//!
//! let mut inputs = MockInputPins::new();
//! inputs.configure_input(25, Pull::Up);
//! assert!(inputs.is_high(25)); // pulled up, switch open
//! ```

/// Millisecond timestamp from a monotonic, wrapping counter.
///
/// Thirty-two bits wrap after roughly 49.7 days. All comparisons go through
/// [`elapsed`] so a wrap never makes a deadline fire early or late.
pub type Millis = u32;

/// Milliseconds elapsed from `since` to `now`, tolerant of counter wrap.
///
/// # Examples
///
/// ```
/// use relay_bank::traits::elapsed;
///
/// assert_eq!(elapsed(1500, 1000), 500);
/// // Counter wrapped between the two readings
/// assert_eq!(elapsed(99, u32::MAX - 100), 200);
/// ```
#[inline]
pub const fn elapsed(now: Millis, since: Millis) -> Millis {
    now.wrapping_sub(since)
}

/// Returns true once at least `delay` milliseconds have passed since `since`.
#[inline]
pub const fn has_elapsed(now: Millis, since: Millis, delay: Millis) -> bool {
    elapsed(now, since) >= delay
}

/// Internal resistor configuration for an input pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Pull {
    /// Floating input (external resistor or push-pull sensor output).
    #[default]
    None,
    /// Internal pull-up; used for active-low wall switches.
    Up,
    /// Internal pull-down; used for active-high motion sensors.
    Down,
}

/// Digital outputs that drive relay coils.
///
/// Implementations only deal in raw electrical levels. Relay polarity is
/// applied one layer up by [`RelayDriver`](crate::relay::RelayDriver).
///
/// # Implementation Notes
///
/// - `configure_output` may be called again for a pin that is already an output
/// - `write` must not block
pub trait OutputPins {
    /// Error type for output operations.
    type Error: core::fmt::Debug;

    /// Put `pin` into push-pull output mode.
    fn configure_output(&mut self, pin: u8) -> Result<(), Self::Error>;

    /// Drive `pin` high (`true`) or low (`false`).
    fn write(&mut self, pin: u8, high: bool) -> Result<(), Self::Error>;
}

/// Digital inputs for manual switches and motion sensors.
///
/// Reads are best-effort: a pin that cannot be read reports low. The
/// debounce logic in [`InputSampler`](crate::sampler::InputSampler) filters
/// any glitches this produces.
pub trait InputPins {
    /// Put `pin` into input mode with the requested pull resistor.
    ///
    /// Input-only pins without internal resistors silently ignore `pull`.
    fn configure_input(&mut self, pin: u8, pull: Pull);

    /// Read the raw electrical level of `pin`.
    fn is_high(&mut self, pin: u8) -> bool;
}

/// Clock trait for getting current time in `no_std` environments.
///
/// The controller needs time for debouncing, grace windows, auto-off
/// deadlines, and telemetry cadence.
pub trait Clock {
    /// Get current time in milliseconds since boot.
    ///
    /// Must be monotonic apart from wrapping at `u32::MAX`.
    fn now_ms(&self) -> Millis;
}

/// Hardware or task watchdog.
///
/// The supervisor feeds the watchdog once per reconciliation tick and
/// around blocking broker connects.
pub trait Watchdog {
    /// Reset the watchdog countdown.
    fn feed(&mut self);

    /// Force a device reset.
    ///
    /// On hardware this does not return. Test doubles record the request.
    fn reset(&mut self);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_simple() {
        assert_eq!(elapsed(1000, 400), 600);
        assert_eq!(elapsed(5, 5), 0);
    }

    #[test]
    fn elapsed_across_wrap() {
        let before = u32::MAX - 9;
        let after = 10;
        assert_eq!(elapsed(after, before), 20);
    }

    #[test]
    fn has_elapsed_boundary() {
        assert!(!has_elapsed(1999, 0, 2000));
        assert!(has_elapsed(2000, 0, 2000));
        assert!(has_elapsed(2001, 0, 2000));
    }

    #[test]
    fn has_elapsed_wrap_is_not_early() {
        // Armed 100ms before wrap with a 2s delay
        let armed = u32::MAX - 99;
        assert!(!has_elapsed(armed.wrapping_add(1999), armed, 2000));
        assert!(has_elapsed(armed.wrapping_add(2000), armed, 2000));
    }

    #[test]
    fn pull_default_is_none() {
        assert_eq!(Pull::default(), Pull::None);
    }
}
