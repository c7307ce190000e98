//! Classroom relay controller firmware.
//!
//! This is the main entry point for the physical hardware controller.
//! It runs a 50Hz cooperative loop that:
//! - Samples the wall switches and motion sensors
//! - Reconciles manual, remote, and motion commands per switch
//! - Drives the six relays
//! - Keeps the MQTT session alive and publishes state and telemetry
//! - Feeds the task watchdog
//!
//! # Build
//!
//! Credentials are baked in at compile time:
//!
//! ```bash
//! WIFI_SSID=SchoolNet WIFI_PASSWORD=... MQTT_HOST=10.0.0.5 DEVICE_SECRET=... \
//!     cargo build --release --bin esp32_main --features esp32-mqtt
//! ```

use std::thread;
use std::time::Duration;

use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use relay_bank::config::WDT_TIMEOUT_MS;
use relay_bank::hal::esp32::{Esp32Clock, Esp32Gpio, Esp32Mqtt, Esp32Watchdog, Esp32Wifi};
use relay_bank::traits::{has_elapsed, Clock};
use relay_bank::{
    Config, Configuration, DeviceConfig, MqttConfig, Supervisor, TickError, WifiConfig,
};

/// Main loop interval in milliseconds (50Hz = 20ms)
const LOOP_INTERVAL_MS: u64 = 20;

/// How often a dropped WiFi link is retried.
const WIFI_RETRY_MS: u32 = 10_000;

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_hal::sys::link_patches();
    EspLogger::initialize_default();

    log::info!("relay-bank {} starting", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Configuration
    // =========================================================================
    let mut config = Config::default()
        .with_wifi(
            WifiConfig::default()
                .with_ssid(option_env!("WIFI_SSID").unwrap_or(""))
                .with_password(option_env!("WIFI_PASSWORD").unwrap_or("")),
        )
        .with_mqtt(
            MqttConfig::default()
                .with_host(option_env!("MQTT_HOST").unwrap_or("localhost"))
                .with_topic_prefix(option_env!("MQTT_PREFIX").unwrap_or("esp32"))
                .with_auth(
                    option_env!("MQTT_USER").unwrap_or(""),
                    option_env!("MQTT_PASSWORD").unwrap_or(""),
                ),
        )
        .with_switches(
            Configuration::default().with_device_secret(option_env!("DEVICE_SECRET").unwrap_or("")),
        );

    let peripherals = Peripherals::take()?;
    let clock = Esp32Clock::new();
    let watchdog = Esp32Watchdog::new(WDT_TIMEOUT_MS)?;

    // =========================================================================
    // WiFi (the controller keeps working without it)
    // =========================================================================
    let mut wifi = if config.wifi.is_configured() {
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;
        match Esp32Wifi::new(peripherals.modem, sysloop, Some(nvs), &config.wifi) {
            Ok(wifi) => Some(wifi),
            Err(e) => {
                log::error!("WiFi setup failed: {:#}", e);
                None
            }
        }
    } else {
        log::warn!("WiFi not configured (set WIFI_SSID/WIFI_PASSWORD)");
        None
    };

    if let Some(mac) = wifi.as_ref().and_then(Esp32Wifi::mac) {
        config = config.with_device(DeviceConfig::default().with_id(&mac));
        config.mqtt = config.mqtt.with_client_id(&mac);
    }
    if wifi.is_none() {
        config.mqtt.enabled = false;
    }

    // =========================================================================
    // Supervisor
    // =========================================================================
    let mqtt = Esp32Mqtt::new(&config.mqtt);
    let mut sup = Supervisor::boot(
        &config,
        Esp32Gpio::new(),
        Esp32Gpio::new(),
        mqtt,
        watchdog,
        clock.now_ms(),
    )?;
    log::info!("relays initialized OFF, entering main loop");

    let mut last_wifi_check = clock.now_ms();
    loop {
        let now = clock.now_ms();

        match sup.tick(now) {
            Ok(_) => {}
            Err(TickError::Output(e)) => log::error!("relay write failed: {}", e),
            Err(TickError::Firmware(e)) => {
                // Restart already requested
                log::error!("{}", e);
            }
        }

        if has_elapsed(now, last_wifi_check, WIFI_RETRY_MS) {
            last_wifi_check = now;
            if let Some(link) = wifi.as_mut().filter(|w| !w.is_connected()) {
                log::warn!("WiFi down, reconnecting");
                if let Err(e) = link.reconnect() {
                    log::warn!("WiFi reconnect failed: {:#}", e);
                }
            }
        }

        thread::sleep(Duration::from_millis(LOOP_INTERVAL_MS));
    }
}
