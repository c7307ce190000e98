//! WiFi station connection for the relay board.
//!
//! Provides synchronous WiFi station mode connection using esp-idf-svc.
//! The broker session is managed separately by
//! [`Transport`](crate::transport::Transport); this module only brings the
//! link up and reports whether it is still there.
//!
//! # Example
//!
//! ```ignore
//! use relay_bank::hal::esp32::Esp32Wifi;
//! use relay_bank::config::WifiConfig;
//!
//! let config = WifiConfig::default()
//!     .with_ssid("SchoolNet")
//!     .with_password("secret123");
//!
//! let wifi = Esp32Wifi::new(modem, sysloop, nvs, &config)?;
//! log::info!("IP: {:?}", wifi.ip_addr());
//! ```

use std::net::Ipv4Addr;

use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, ClientConfiguration, Configuration, EspWifi};

use crate::config::WifiConfig;

/// WiFi connection manager for ESP32.
///
/// Manages a station-mode WiFi connection. The connection is established
/// during construction and maintained for the lifetime of this struct.
pub struct Esp32Wifi<'a> {
    wifi: BlockingWifi<EspWifi<'a>>,
}

impl<'a> Esp32Wifi<'a> {
    /// Create a new WiFi connection.
    ///
    /// This will:
    /// 1. Initialize the WiFi driver
    /// 2. Configure station mode with the provided credentials
    /// 3. Connect to the access point
    /// 4. Wait for DHCP to assign an IP address
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - WiFi initialization fails
    /// - Connection to AP fails
    /// - DHCP times out
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        config: &WifiConfig,
    ) -> anyhow::Result<Self> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;

        let mut ssid: heapless::String<32> = heapless::String::new();
        let _ = ssid.push_str(config.ssid.as_str());
        let mut password: heapless::String<64> = heapless::String::new();
        let _ = password.push_str(config.password.as_str());

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid,
            password,
            ..Default::default()
        }))?;

        wifi.start()?;
        log::info!("WiFi connecting to '{}'", config.ssid);
        wifi.connect()?;
        wifi.wait_netif_up()?;

        let me = Self { wifi };
        if let Some(ip) = me.ip_addr() {
            log::info!("WiFi up, IP {}", ip);
        }
        Ok(me)
    }

    /// Get the current IP address, if connected.
    pub fn ip_addr(&self) -> Option<Ipv4Addr> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
    }

    /// Station MAC as `AA:BB:CC:DD:EE:FF`, used as the device ID.
    pub fn mac(&self) -> Option<String> {
        let mac = self.wifi.wifi().sta_netif().get_mac().ok()?;
        Some(
            mac.iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":"),
        )
    }

    /// Check if WiFi is connected.
    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    /// Start rejoining the access point after a drop.
    ///
    /// Returns immediately; poll [`is_connected`](Self::is_connected).
    pub fn reconnect(&mut self) -> anyhow::Result<()> {
        self.wifi.wifi_mut().connect()?;
        Ok(())
    }
}
