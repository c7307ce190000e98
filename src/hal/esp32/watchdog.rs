//! ESP-IDF task watchdog.

use esp_idf_hal::sys;

use crate::traits::{Millis, Watchdog};

/// Task watchdog subscribed for the main loop task.
///
/// If the loop stops feeding it for the configured timeout, ESP-IDF panics
/// and the chip restarts.
pub struct Esp32Watchdog;

impl Esp32Watchdog {
    /// Arm the task watchdog for the calling task.
    ///
    /// An already-initialized watchdog (the IDF default config starts one)
    /// is accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the watchdog cannot be initialized or the task
    /// cannot be subscribed.
    pub fn new(timeout_ms: Millis) -> anyhow::Result<Self> {
        let config = sys::esp_task_wdt_config_t {
            timeout_ms,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        let rc = unsafe { sys::esp_task_wdt_init(&config) };
        if rc != sys::ESP_OK && rc != sys::ESP_ERR_INVALID_STATE {
            anyhow::bail!("esp_task_wdt_init failed with code {}", rc);
        }

        let rc = unsafe { sys::esp_task_wdt_add(core::ptr::null_mut()) };
        if rc != sys::ESP_OK && rc != sys::ESP_ERR_INVALID_STATE {
            anyhow::bail!("esp_task_wdt_add failed with code {}", rc);
        }
        Ok(Self)
    }
}

impl Watchdog for Esp32Watchdog {
    fn feed(&mut self) {
        let _ = unsafe { sys::esp_task_wdt_reset() };
    }

    fn reset(&mut self) {
        log::error!("restarting");
        unsafe { sys::esp_restart() };
    }
}
