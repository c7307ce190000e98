//! Relay output driver.
//!
//! Turns the logical state of each switch into a physical pin level,
//! honoring the configured relay polarity. Most relay boards are
//! active-low, so `On` usually means driving the pin low.

use heapless::Vec;

use crate::commands::SwitchState;
use crate::config::{Configuration, NUM_SWITCHES};
use crate::traits::OutputPins;

// Pins still waiting from an earlier failed change, plus a full new set
const RETIRE_CAPACITY: usize = 2 * NUM_SWITCHES;

/// Relay bank driver over a set of [`OutputPins`].
///
/// The driver remembers the level it last wrote to each relay, so
/// re-applying the same logical state does not touch the hardware.
///
/// # Example
///
/// ```rust
/// use relay_bank::relay::RelayDriver;
/// use relay_bank::commands::SwitchState;
/// use relay_bank::config::Configuration;
/// use relay_bank::hal::MockRelayPins;
///
/// let mut relays = RelayDriver::new(MockRelayPins::new(), &Configuration::default()).unwrap();
/// relays.apply(0, SwitchState::On).unwrap();
///
/// // Active-low board: ON drives the pin low
/// assert_eq!(relays.pins().level(16), Some(false));
/// ```
pub struct RelayDriver<O: OutputPins> {
    pins: O,
    relay_pins: [u8; NUM_SWITCHES],
    active_high: bool,
    written: [Option<bool>; NUM_SWITCHES],
    setup_pending: bool,
    retiring: Vec<(u8, bool), RETIRE_CAPACITY>,
}

impl<O: OutputPins> RelayDriver<O> {
    /// Configure every relay pin as an output and drive it OFF.
    pub fn new(pins: O, config: &Configuration) -> Result<Self, O::Error> {
        let mut driver = Self {
            pins,
            relay_pins: config.relay_pins,
            active_high: config.relay_active_high,
            written: [None; NUM_SWITCHES],
            setup_pending: true,
            retiring: Vec::new(),
        };
        driver.sync(&[SwitchState::Off; NUM_SWITCHES])?;
        Ok(driver)
    }

    /// Physical level encoding `state` under the current polarity.
    #[inline]
    pub fn level_for(&self, state: SwitchState) -> bool {
        state.is_on() == self.active_high
    }

    /// Drive relay `index` to `state`.
    ///
    /// A no-op if the pin already carries that level. Out-of-range indices
    /// are ignored.
    pub fn apply(&mut self, index: usize, state: SwitchState) -> Result<(), O::Error> {
        let Some(&pin) = self.relay_pins.get(index) else {
            return Ok(());
        };
        let level = self.level_for(state);
        if self.written[index] == Some(level) {
            return Ok(());
        }
        self.pins.write(pin, level)?;
        self.written[index] = Some(level);
        Ok(())
    }

    /// Bring every relay in line with `states`.
    ///
    /// Finishes any pin map change left incomplete by an earlier write
    /// failure before touching the relays.
    pub fn sync(&mut self, states: &[SwitchState; NUM_SWITCHES]) -> Result<(), O::Error> {
        self.finish_reconfigure()?;
        for (i, &state) in states.iter().enumerate() {
            self.apply(i, state)?;
        }
        Ok(())
    }

    /// Adopt a new pin map or polarity and rewrite every output.
    ///
    /// Pins that leave the relay map are driven OFF under the old polarity
    /// first, unless the new configuration reads them as inputs. If a write
    /// fails the new map is still adopted and the remaining work is retried
    /// by every later [`sync`](Self::sync).
    pub fn reconfigure(
        &mut self,
        config: &Configuration,
        states: &[SwitchState; NUM_SWITCHES],
    ) -> Result<(), O::Error> {
        if config.relay_pins == self.relay_pins && config.relay_active_high == self.active_high {
            return Ok(());
        }
        let reused = |pin: u8| config.relay_pins.contains(&pin) || config.reads_pin(pin);
        self.retiring.retain(|&(pin, _)| !reused(pin));

        let old_off = self.level_for(SwitchState::Off);
        for (&pin, &written) in self.relay_pins.iter().zip(self.written.iter()) {
            let queued = self.retiring.iter().any(|&(p, _)| p == pin);
            if !reused(pin) && !queued && written != Some(old_off) {
                let _ = self.retiring.push((pin, old_off));
            }
        }
        self.relay_pins = config.relay_pins;
        self.active_high = config.relay_active_high;
        self.written = [None; NUM_SWITCHES];
        self.setup_pending = true;
        self.sync(states)
    }

    /// True while a pin map change still has writes outstanding.
    pub fn reconfigure_pending(&self) -> bool {
        self.setup_pending || !self.retiring.is_empty()
    }

    fn finish_reconfigure(&mut self) -> Result<(), O::Error> {
        while let Some(&(pin, level)) = self.retiring.first() {
            self.pins.write(pin, level)?;
            self.retiring.remove(0);
        }
        if self.setup_pending {
            for pin in self.relay_pins {
                self.pins.configure_output(pin)?;
            }
            self.setup_pending = false;
        }
        Ok(())
    }

    /// GPIO number of relay `index`.
    pub fn pin(&self, index: usize) -> Option<u8> {
        self.relay_pins.get(index).copied()
    }

    /// Get a reference to the underlying pins.
    pub fn pins(&self) -> &O {
        &self.pins
    }

    /// Get a mutable reference to the underlying pins.
    pub fn pins_mut(&mut self) -> &mut O {
        &mut self.pins
    }
}

// ============================================================================
// Tests
// ============================================================================
