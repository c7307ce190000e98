//! Network abstraction trait for the MQTT broker session.
//!
//! The controller talks to its backend over three inbound/outbound topics
//! under a configurable prefix (default `esp32`):
//!
//! ```text
//! esp32/status    - "online" / "offline" (retained, last-will)
//! esp32/switches  - Switch commands from the backend
//! esp32/config    - Retained runtime configuration
//! esp32/state     - State snapshots
//! esp32/telemetry - Heartbeat and events
//! ```
//!
//! [`MqttClient`] is deliberately small: session setup with a last-will,
//! publish, subscribe, and a non-blocking receive. Backoff, topic routing,
//! and parsing live in [`Transport`](crate::transport::Transport).

use heapless::{String, Vec};

/// Maximum topic length carried by [`MqttMessage`].
pub const MAX_TOPIC_LEN: usize = 128;

/// Maximum payload length carried by [`MqttMessage`].
///
/// Matches the broker buffer size of the device firmware.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// MQTT delivery guarantee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, possibly duplicated.
    AtLeastOnce,
}

/// Last-will registered with the broker at connect time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastWill<'a> {
    /// Topic the broker publishes the will to.
    pub topic: &'a str,
    /// Will payload.
    pub payload: &'a [u8],
    /// Delivery guarantee.
    pub qos: QoS,
    /// Whether the broker retains the will.
    pub retain: bool,
}

/// MQTT client trait for pub/sub messaging.
///
/// This trait uses a **sync-first design** that works on both ESP32 (blocking I/O)
/// and desktop (a background event loop feeding a channel).
///
/// # Implementation Notes
///
/// - `connect` may block for one connection attempt, no longer
/// - `publish` and `subscribe` must not block on the network
/// - `try_recv` is non-blocking for polling patterns
/// - `is_connected` must turn false once the session is lost so the
///   caller can schedule a reconnect
pub trait MqttClient {
    /// Error type for MQTT operations.
    type Error: core::fmt::Debug;

    /// Open a session with the broker, registering `will`.
    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), Self::Error>;

    /// Tear the session down without sending the will.
    fn disconnect(&mut self);

    /// Publish a message to a topic.
    ///
    /// # Arguments
    /// - `topic`: MQTT topic path
    /// - `payload`: Message bytes
    /// - `qos`: Delivery guarantee
    /// - `retain`: If true, broker keeps message for new subscribers
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Subscribe to a topic.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Try to receive the next message (non-blocking).
    ///
    /// Returns `None` if no message is available. This should never block.
    fn try_recv(&mut self) -> Option<MqttMessage>;

    /// Check if connected to broker.
    fn is_connected(&self) -> bool;
}

/// An MQTT message received from a subscription.
///
/// Stored in fixed-capacity buffers. Oversized frames are truncated and
/// flagged so the transport can count them as malformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    /// Topic the message was published to.
    pub topic: String<MAX_TOPIC_LEN>,
    /// Message payload as raw bytes.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    /// True if the topic or payload did not fit and was cut short.
    pub truncated: bool,
}

impl MqttMessage {
    /// Create a new MQTT message, truncating oversized parts.
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        let mut truncated = false;

        let mut t = String::new();
        for c in topic.chars() {
            if t.push(c).is_err() {
                truncated = true;
                break;
            }
        }

        let take = payload.len().min(MAX_PAYLOAD_LEN);
        truncated |= take < payload.len();
        let mut p = Vec::new();
        // Cannot fail: `take` never exceeds the capacity
        let _ = p.extend_from_slice(&payload[..take]);

        Self {
            topic: t,
            payload: p,
            truncated,
        }
    }

    /// Returns the payload as a UTF-8 string, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_new_fits() {
        let msg = MqttMessage::new("esp32/switches", br#"{"switch":0,"state":"on"}"#);
        assert_eq!(msg.topic.as_str(), "esp32/switches");
        assert!(!msg.truncated);
        assert_eq!(msg.payload_str(), Some(r#"{"switch":0,"state":"on"}"#));
    }

    #[test]
    fn message_oversized_payload_truncated() {
        let big = [b'x'; MAX_PAYLOAD_LEN + 10];
        let msg = MqttMessage::new("esp32/config", &big);
        assert!(msg.truncated);
        assert_eq!(msg.payload.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn message_oversized_topic_truncated() {
        let long_topic: std::string::String = "t".repeat(MAX_TOPIC_LEN + 1);
        let msg = MqttMessage::new(&long_topic, b"");
        assert!(msg.truncated);
        assert_eq!(msg.topic.len(), MAX_TOPIC_LEN);
    }

    #[test]
    fn payload_str_invalid_utf8() {
        let msg = MqttMessage::new("a", &[0xff, 0xfe]);
        assert_eq!(msg.payload_str(), None);
    }

    #[test]
    fn qos_default() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }
}
