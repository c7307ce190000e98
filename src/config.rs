//! Shared configuration system for desktop and ESP32.
//!
//! Uses `heapless::String` for `no_std` compatibility while remaining
//! ergonomic to use on desktop with `std`.
//!
//! Two layers live here:
//!
//! - [`Config`]: boot-time settings (WiFi, broker, device identity) plus the
//!   initial [`Configuration`]
//! - [`Configuration`]: the runtime switch/motion configuration, replaced
//!   atomically when a valid message arrives on the `config` topic
//!
//! # Example
//!
//! ```rust
//! use relay_bank::config::{Config, Configuration, FusionMode, MqttConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.switches.relay_pins, [16, 17, 18, 19, 21, 22]);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_mqtt(MqttConfig::default().with_host("192.168.1.100"))
//!     .with_switches(
//!         Configuration::default()
//!             .with_motion_enabled(true)
//!             .with_fusion(FusionMode::Or)
//!             .with_auto_off_sec(120),
//!     );
//! assert!(config.switches.validate().is_ok());
//! ```

use heapless::String as HString;
use thiserror::Error;

use crate::traits::Millis;

/// Maximum length for short config strings (hostnames, client IDs, secrets)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for longer config strings (full topics)
pub const MAX_LONG_STRING: usize = 128;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

// ============================================================================
// Firmware Constants
// ============================================================================

/// Number of relay/manual switch pairs.
pub const NUM_SWITCHES: usize = 6;

/// Depth of the remote command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Interval between input samples.
pub const SAMPLE_INTERVAL_MS: Millis = 50;

/// Consecutive agreeing samples needed to accept an edge.
pub const REQUIRED_CONSISTENT: u8 = 3;

/// Minimum separation between accepted edges on one manual input.
pub const MANUAL_DEBOUNCE_MS: Millis = 100;

/// Time after boot during which motion cannot drive switches.
pub const MOTION_BOOT_GRACE_MS: Millis = 5_000;

/// Longest gap between watchdog feeds before the device resets.
pub const WDT_TIMEOUT_MS: Millis = 15_000;

/// Publish silence after which the broker session is considered stale.
pub const OFFLINE_TIMEOUT_MS: Millis = 60_000;

/// Heartbeat cadence.
pub const HEARTBEAT_INTERVAL_MS: Millis = OFFLINE_TIMEOUT_MS / 2;

/// Periodic state snapshot cadence.
pub const SNAPSHOT_INTERVAL_MS: Millis = 5_000;

/// First reconnect delay; doubles per failure.
pub const RECONNECT_BACKOFF_INITIAL_MS: Millis = 1_000;

/// Reconnect delay ceiling.
pub const RECONNECT_BACKOFF_MAX_MS: Millis = 30_000;

/// Highest GPIO number on the ESP32.
pub const MAX_GPIO: u8 = 39;

/// First input-only GPIO (34-39 have no output driver).
pub const FIRST_INPUT_ONLY_GPIO: u8 = 34;

/// Default relay pins, index-aligned with [`DEFAULT_MANUAL_PINS`].
pub const DEFAULT_RELAY_PINS: [u8; NUM_SWITCHES] = [16, 17, 18, 19, 21, 22];

/// Default manual switch pins.
pub const DEFAULT_MANUAL_PINS: [u8; NUM_SWITCHES] = [25, 26, 27, 32, 33, 23];

/// Default primary motion sensor pin.
pub const DEFAULT_PRIMARY_MOTION_PIN: u8 = 34;

/// Default secondary motion sensor pin.
pub const DEFAULT_SECONDARY_MOTION_PIN: u8 = 35;

/// Default motion sensor model, reported in telemetry.
pub const DEFAULT_SENSOR_TYPE: &str = "hc-sr501";

/// Default auto-off delay.
pub const DEFAULT_AUTO_OFF_SEC: u32 = 30;

/// Longest accepted auto-off delay (one day).
pub const MAX_AUTO_OFF_SEC: u32 = 86_400;

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    truncated(s)
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    truncated(s)
}

fn truncated<const N: usize>(s: &str) -> HString<N> {
    let mut hs = HString::new();
    for c in s.chars() {
        if hs.push(c).is_err() {
            break;
        }
    }
    hs
}

/// Compare two secrets without stopping at the first mismatch.
fn secrets_match(given: &[u8], expected: &[u8]) -> bool {
    let mut diff = u8::from(given.len() != expected.len());
    for (i, &e) in expected.iter().enumerate() {
        diff |= given.get(i).copied().unwrap_or(!e) ^ e;
    }
    diff == 0
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// WiFi connection configuration
    pub wifi: WifiConfig,
    /// MQTT client configuration
    pub mqtt: MqttConfig,
    /// Device identification
    pub device: DeviceConfig,
    /// Initial switch/motion configuration
    pub switches: Configuration,
}

impl Config {
    /// Set WiFi configuration
    pub fn with_wifi(mut self, wifi: WifiConfig) -> Self {
        self.wifi = wifi;
        self
    }

    /// Set MQTT configuration
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Set device configuration
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Set the initial switch configuration
    pub fn with_switches(mut self, switches: Configuration) -> Self {
        self.switches = switches;
        self
    }
}

// ============================================================================
// Runtime Switch Configuration
// ============================================================================

/// How two motion channels combine into presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FusionMode {
    /// Both sensors must report motion.
    #[default]
    And,
    /// Either sensor suffices.
    Or,
    /// Only the primary sensor counts.
    PrimaryOnly,
}

impl FusionMode {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            FusionMode::And => "and",
            FusionMode::Or => "or",
            FusionMode::PrimaryOnly => "primary",
        }
    }

    /// Parse the wire name, case-insensitive.
    ///
    /// ```
    /// use relay_bank::config::FusionMode;
    ///
    /// assert_eq!(FusionMode::from_text("AND"), Some(FusionMode::And));
    /// assert_eq!(FusionMode::from_text("primary_only"), Some(FusionMode::PrimaryOnly));
    /// assert_eq!(FusionMode::from_text("xor"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("and") {
            Some(FusionMode::And)
        } else if s.eq_ignore_ascii_case("or") {
            Some(FusionMode::Or)
        } else if s.eq_ignore_ascii_case("primary") || s.eq_ignore_ascii_case("primary_only") {
            Some(FusionMode::PrimaryOnly)
        } else {
            None
        }
    }
}

/// Motion sensing settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MotionConfig {
    /// Whether motion drives auto-off at all.
    pub enabled: bool,
    /// Primary sensor GPIO.
    pub primary_pin: u8,
    /// Optional secondary sensor GPIO.
    pub secondary_pin: Option<u8>,
    /// Channel fusion rule.
    pub fusion: FusionMode,
    /// Delay from presence loss to auto-off.
    pub auto_off_sec: u32,
    /// Advisory sensitivity in percent, reported in telemetry only.
    pub sensitivity: u8,
    /// Advisory detection range in meters, reported in telemetry only.
    pub detection_range: u8,
    /// Sensor model name, reported in telemetry only.
    pub sensor_type: ShortString,
    /// Request internal pull-downs on the motion inputs.
    pub use_pulldown: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            primary_pin: DEFAULT_PRIMARY_MOTION_PIN,
            secondary_pin: Some(DEFAULT_SECONDARY_MOTION_PIN),
            fusion: FusionMode::And,
            auto_off_sec: DEFAULT_AUTO_OFF_SEC,
            sensitivity: 50,
            detection_range: 7,
            sensor_type: short_string(DEFAULT_SENSOR_TYPE),
            use_pulldown: true,
        }
    }
}

impl MotionConfig {
    /// Auto-off delay in milliseconds, saturating.
    pub fn auto_off_ms(&self) -> Millis {
        self.auto_off_sec.saturating_mul(1000)
    }
}

/// Why a configuration was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Pin number beyond the chip's GPIO range.
    #[error("GPIO {0} out of range")]
    PinOutOfRange(u8),
    /// Relay assigned to an input-only pin.
    #[error("GPIO {0} cannot drive a relay")]
    NotOutputCapable(u8),
    /// Same pin used for two roles.
    #[error("GPIO {0} assigned twice")]
    DuplicatePin(u8),
    /// Auto-off delay outside 1..=86400 seconds.
    #[error("auto-off delay {0}s out of range")]
    AutoOffOutOfRange(u32),
    /// Sensitivity above 100 percent.
    #[error("sensitivity {0}% out of range")]
    SensitivityOutOfRange(u8),
}

impl ConfigError {
    /// Short reason code for telemetry.
    pub const fn kind(&self) -> &'static str {
        match self {
            ConfigError::PinOutOfRange(_) => "pin-out-of-range",
            ConfigError::NotOutputCapable(_) => "pin-not-output",
            ConfigError::DuplicatePin(_) => "duplicate-pin",
            ConfigError::AutoOffOutOfRange(_) => "auto-off-out-of-range",
            ConfigError::SensitivityOutOfRange(_) => "sensitivity-out-of-range",
        }
    }
}

/// Runtime switch and motion configuration.
///
/// Owned by the [`Supervisor`](crate::supervisor::Supervisor) and passed by
/// reference to the components that need it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    /// Relay output pins, index-aligned with `manual_pins`.
    pub relay_pins: [u8; NUM_SWITCHES],
    /// Manual wall switch input pins.
    pub manual_pins: [u8; NUM_SWITCHES],
    /// Relay energizes on a high output.
    pub relay_active_high: bool,
    /// Manual switches pull the input low when closed.
    pub manual_active_low: bool,
    /// Motion sensing.
    pub motion: MotionConfig,
    /// Shared secret expected on switch commands (empty = no check).
    pub device_secret: ShortString,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            relay_pins: DEFAULT_RELAY_PINS,
            manual_pins: DEFAULT_MANUAL_PINS,
            relay_active_high: false,
            manual_active_low: true,
            motion: MotionConfig::default(),
            device_secret: ShortString::new(),
        }
    }
}

impl Configuration {
    /// Set relay pins
    pub fn with_relay_pins(mut self, pins: [u8; NUM_SWITCHES]) -> Self {
        self.relay_pins = pins;
        self
    }

    /// Set manual switch pins
    pub fn with_manual_pins(mut self, pins: [u8; NUM_SWITCHES]) -> Self {
        self.manual_pins = pins;
        self
    }

    /// Set relay polarity
    pub fn with_relay_active_high(mut self, active_high: bool) -> Self {
        self.relay_active_high = active_high;
        self
    }

    /// Set manual switch polarity
    pub fn with_manual_active_low(mut self, active_low: bool) -> Self {
        self.manual_active_low = active_low;
        self
    }

    /// Enable or disable motion auto-off
    pub fn with_motion_enabled(mut self, enabled: bool) -> Self {
        self.motion.enabled = enabled;
        self
    }

    /// Set the motion sensor pins
    pub fn with_motion_pins(mut self, primary: u8, secondary: Option<u8>) -> Self {
        self.motion.primary_pin = primary;
        self.motion.secondary_pin = secondary;
        self
    }

    /// Set the fusion rule
    pub fn with_fusion(mut self, fusion: FusionMode) -> Self {
        self.motion.fusion = fusion;
        self
    }

    /// Set the auto-off delay
    pub fn with_auto_off_sec(mut self, secs: u32) -> Self {
        self.motion.auto_off_sec = secs;
        self
    }

    /// Set the device secret
    pub fn with_device_secret(mut self, secret: &str) -> Self {
        self.device_secret = short_string(secret);
        self
    }

    /// Check if command authentication is configured
    pub fn has_secret(&self) -> bool {
        !self.device_secret.is_empty()
    }

    /// Returns true if `secret` authorizes a command.
    pub fn authorizes(&self, secret: Option<&str>) -> bool {
        if !self.has_secret() {
            return true;
        }
        secret.is_some_and(|s| secrets_match(s.as_bytes(), self.device_secret.as_bytes()))
    }

    /// Whether `pin` is read as a wall switch or motion input.
    pub fn reads_pin(&self, pin: u8) -> bool {
        self.manual_pins.contains(&pin) || self.motion_pins().any(|p| p == pin)
    }

    /// Index of the switch whose relay is on `gpio`.
    pub fn switch_for_relay_pin(&self, gpio: u8) -> Option<u8> {
        self.relay_pins
            .iter()
            .position(|&p| p == gpio)
            .map(|i| i as u8)
    }

    /// Motion input pins in use, primary first.
    pub fn motion_pins(&self) -> impl Iterator<Item = u8> {
        core::iter::once(self.motion.primary_pin).chain(self.motion.secondary_pin)
    }

    /// Check pin assignments and ranges.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: heapless::Vec<u8, { NUM_SWITCHES * 2 + 2 }> = heapless::Vec::new();

        let all = self
            .relay_pins
            .iter()
            .copied()
            .chain(self.manual_pins.iter().copied())
            .chain(self.motion_pins());

        for pin in all {
            if pin > MAX_GPIO {
                return Err(ConfigError::PinOutOfRange(pin));
            }
            if seen.contains(&pin) {
                return Err(ConfigError::DuplicatePin(pin));
            }
            // Capacity matches the number of pins chained above
            let _ = seen.push(pin);
        }

        if let Some(&pin) = self
            .relay_pins
            .iter()
            .find(|&&p| p >= FIRST_INPUT_ONLY_GPIO)
        {
            return Err(ConfigError::NotOutputCapable(pin));
        }

        let secs = self.motion.auto_off_sec;
        if secs == 0 || secs > MAX_AUTO_OFF_SEC {
            return Err(ConfigError::AutoOffOutOfRange(secs));
        }

        if self.motion.sensitivity > 100 {
            return Err(ConfigError::SensitivityOutOfRange(self.motion.sensitivity));
        }

        Ok(())
    }
}

// ============================================================================
// MQTT Config
// ============================================================================

/// MQTT client configuration
#[derive(Clone, Debug)]
pub struct MqttConfig {
    /// Broker hostname or IP
    pub host: ShortString,
    /// Broker port
    pub port: u16,
    /// Client ID (should be unique per device)
    pub client_id: ShortString,
    /// Topic prefix for all pub/sub (e.g., "esp32" -> "esp32/state")
    pub topic_prefix: ShortString,
    /// Username for authentication (empty = no auth)
    pub username: ShortString,
    /// Password for authentication
    pub password: ShortString,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// Whether MQTT is enabled
    pub enabled: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: short_string("localhost"),
            port: 1883,
            client_id: short_string("relay-bank"),
            topic_prefix: short_string("esp32"),
            username: ShortString::new(),
            password: ShortString::new(),
            keep_alive_secs: 15,
            enabled: true,
        }
    }
}

impl MqttConfig {
    /// Set the broker host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = short_string(host);
        self
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the client ID
    pub fn with_client_id(mut self, id: &str) -> Self {
        self.client_id = short_string(id);
        self
    }

    /// Set the topic prefix
    pub fn with_topic_prefix(mut self, prefix: &str) -> Self {
        self.topic_prefix = short_string(prefix);
        self
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = short_string(username);
        self.password = short_string(password);
        self
    }

    /// Set the keep-alive interval
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    /// Enable or disable MQTT
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a topic string with the configured prefix
    pub fn topic(&self, suffix: &str) -> LongString {
        let mut topic = LongString::new();
        let _ = topic.push_str(self.topic_prefix.as_str());
        let _ = topic.push('/');
        let _ = topic.push_str(suffix);
        topic
    }

    /// Check if authentication is configured
    pub fn has_auth(&self) -> bool {
        !self.username.is_empty()
    }
}

// ============================================================================
// WiFi Config
// ============================================================================

/// WiFi connection configuration
#[derive(Clone, Debug)]
pub struct WifiConfig {
    /// WiFi network SSID
    pub ssid: ShortString,
    /// WiFi password
    pub password: ShortString,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u32,
    /// Whether WiFi is enabled
    pub enabled: bool,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: ShortString::new(),
            password: ShortString::new(),
            connect_timeout_ms: 30_000,
            enabled: true,
        }
    }
}

impl WifiConfig {
    /// Set the SSID
    pub fn with_ssid(mut self, ssid: &str) -> Self {
        self.ssid = short_string(ssid);
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = short_string(password);
        self
    }

    /// Check if WiFi credentials are configured
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Device identification configuration
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Human-readable device name
    pub name: ShortString,
    /// Device ID reported in telemetry (typically the MAC address)
    pub id: ShortString,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: short_string("classroom"),
            id: short_string("relay-bank"),
        }
    }
}

impl DeviceConfig {
    /// Set the device name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the device ID
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = short_string(id);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
