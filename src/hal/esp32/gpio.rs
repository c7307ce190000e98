//! Runtime-numbered GPIO access for relays and inputs.
//!
//! `esp-idf-hal` pin drivers are typed per pin and claimed once from
//! `Peripherals`. Relay and input pins here come from a configuration that
//! can change at runtime, so the driver talks to the ESP-IDF GPIO API by
//! number instead.

use esp_idf_hal::sys::{self, esp, EspError};

use crate::config::FIRST_INPUT_ONLY_GPIO;
use crate::traits::{InputPins, OutputPins, Pull};

/// GPIO bank addressed by pin number.
///
/// Zero-sized; create one for the relay driver and one for the input
/// sampler.
///
/// # Example
///
/// ```ignore
/// use relay_bank::hal::esp32::Esp32Gpio;
/// use relay_bank::relay::RelayDriver;
///
/// let relays = RelayDriver::new(Esp32Gpio::new(), &config.switches)?;
/// ```
#[derive(Debug, Default)]
pub struct Esp32Gpio;

impl Esp32Gpio {
    /// Creates a GPIO handle.
    pub fn new() -> Self {
        Self
    }
}

impl OutputPins for Esp32Gpio {
    type Error = EspError;

    fn configure_output(&mut self, pin: u8) -> Result<(), EspError> {
        let pin = i32::from(pin);
        // Safe: plain register configuration of a pin we own by config
        esp!(unsafe { sys::gpio_reset_pin(pin) })?;
        esp!(unsafe { sys::gpio_set_direction(pin, sys::gpio_mode_t_GPIO_MODE_OUTPUT) })?;
        Ok(())
    }

    fn write(&mut self, pin: u8, high: bool) -> Result<(), EspError> {
        esp!(unsafe { sys::gpio_set_level(i32::from(pin), u32::from(high)) })
    }
}

impl InputPins for Esp32Gpio {
    fn configure_input(&mut self, pin: u8, pull: Pull) {
        let num = i32::from(pin);
        let mode = match pull {
            Pull::None => sys::gpio_pull_mode_t_GPIO_FLOATING,
            Pull::Up => sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY,
            Pull::Down => sys::gpio_pull_mode_t_GPIO_PULLDOWN_ONLY,
        };

        let result = esp!(unsafe { sys::gpio_reset_pin(num) })
            .and_then(|()| esp!(unsafe { sys::gpio_set_direction(num, sys::gpio_mode_t_GPIO_MODE_INPUT) }))
            .and_then(|()| {
                // 34-39 have no internal resistors
                if pin < FIRST_INPUT_ONLY_GPIO {
                    esp!(unsafe { sys::gpio_set_pull_mode(num, mode) })
                } else {
                    Ok(())
                }
            });
        if let Err(err) = result {
            log::warn!("GPIO {} input setup failed: {}", pin, err);
        }
    }

    fn is_high(&mut self, pin: u8) -> bool {
        unsafe { sys::gpio_get_level(i32::from(pin)) != 0 }
    }
}
