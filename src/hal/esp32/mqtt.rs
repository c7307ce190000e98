//! MQTT client for the relay board.
//!
//! Wraps `EspMqttClient` behind the [`MqttClient`] trait. Each
//! [`connect`](MqttClient::connect) builds a fresh client with the last-will
//! in its configuration and waits for the broker's CONNACK. A receiver
//! thread forwards inbound frames through a channel so
//! [`try_recv`](MqttClient::try_recv) never blocks.
//!
//! The IDF client reconnects on its own after a drop, but a reconnected
//! session has lost its subscriptions. The first disconnect therefore
//! latches the session as dead until the next `connect`, leaving reconnect
//! pacing to [`Transport`](crate::transport::Transport).
//!
//! # Example
//!
//! ```ignore
//! use relay_bank::hal::esp32::Esp32Mqtt;
//! use relay_bank::config::MqttConfig;
//!
//! let config = MqttConfig::default()
//!     .with_host("192.168.1.100")
//!     .with_topic_prefix("room12");
//!
//! let mqtt = Esp32Mqtt::new(&config);
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EspMqttConnection, EventPayload, LwtConfiguration,
    MqttClientConfiguration, QoS as EspQoS,
};
use esp_idf_svc::sys::EspError;
use thiserror::Error;

use crate::config::MqttConfig;
use crate::traits::{LastWill, MqttClient, MqttMessage, QoS};

/// Longest wait for the broker to accept a session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_PENDING: u8 = 0;
const SESSION_UP: u8 = 1;
const SESSION_DEAD: u8 = 2;

/// Error type for ESP32 MQTT operations.
#[derive(Debug, Error)]
pub enum Esp32MqttError {
    /// No live session.
    #[error("MQTT not connected")]
    NotConnected,
    /// No CONNACK within the timeout.
    #[error("MQTT connect timed out")]
    Timeout,
    /// ESP-IDF call failed.
    #[error("MQTT error: {0}")]
    Esp(#[from] EspError),
}

/// MQTT client for the relay controller.
pub struct Esp32Mqtt {
    url: String,
    client_id: String,
    username: String,
    password: String,
    keep_alive: Duration,
    client: Option<EspMqttClient<'static>>,
    session: Arc<AtomicU8>,
    message_tx: Sender<MqttMessage>,
    message_rx: Receiver<MqttMessage>,
}

impl Esp32Mqtt {
    /// Create a disconnected client for the broker in `config`.
    pub fn new(config: &MqttConfig) -> Self {
        let (message_tx, message_rx) = channel();
        Self {
            url: format!("mqtt://{}:{}", config.host, config.port),
            client_id: config.client_id.as_str().to_string(),
            username: config.username.as_str().to_string(),
            password: config.password.as_str().to_string(),
            keep_alive: Duration::from_secs(u64::from(config.keep_alive_secs)),
            client: None,
            session: Arc::new(AtomicU8::new(SESSION_DEAD)),
            message_tx,
            message_rx,
        }
    }

    fn live_client(&mut self) -> Result<&mut EspMqttClient<'static>, Esp32MqttError> {
        if self.session.load(Ordering::Acquire) != SESSION_UP {
            return Err(Esp32MqttError::NotConnected);
        }
        self.client.as_mut().ok_or(Esp32MqttError::NotConnected)
    }
}

impl MqttClient for Esp32Mqtt {
    type Error = Esp32MqttError;

    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), Self::Error> {
        self.disconnect();

        let conf = MqttClientConfiguration {
            client_id: Some(self.client_id.as_str()),
            username: (!self.username.is_empty()).then_some(self.username.as_str()),
            password: (!self.password.is_empty()).then_some(self.password.as_str()),
            keep_alive_interval: Some(self.keep_alive),
            disable_clean_session: false,
            lwt: Some(LwtConfiguration {
                topic: will.topic,
                payload: will.payload,
                qos: qos(will.qos),
                retain: will.retain,
            }),
            ..Default::default()
        };

        let (client, connection) = EspMqttClient::new(self.url.as_str(), &conf)?;
        let session = Arc::new(AtomicU8::new(SESSION_PENDING));
        let (ack_tx, ack_rx) = channel();
        let tx = self.message_tx.clone();
        let flag = Arc::clone(&session);
        thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(8 * 1024)
            .spawn(move || handle_mqtt_events(connection, flag, ack_tx, tx))
            .map_err(|_| Esp32MqttError::NotConnected)?;

        self.client = Some(client);
        self.session = session;

        match ack_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(()) => {
                log::info!("MQTT connected to {}", self.url);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.disconnect();
                Err(Esp32MqttError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.disconnect();
                Err(Esp32MqttError::NotConnected)
            }
        }
    }

    fn disconnect(&mut self) {
        self.session.store(SESSION_DEAD, Ordering::Release);
        // Dropping the client stops the IDF task and ends the receiver thread
        self.client = None;
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos_level: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.live_client()?
            .enqueue(topic, qos(qos_level), retain, payload)?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos_level: QoS) -> Result<(), Self::Error> {
        self.live_client()?.subscribe(topic, qos(qos_level))?;
        log::debug!("subscribed to {}", topic);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        match self.message_rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn is_connected(&self) -> bool {
        self.session.load(Ordering::Acquire) == SESSION_UP
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn qos(level: QoS) -> EspQoS {
    match level {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
    }
}

fn handle_mqtt_events(
    mut connection: EspMqttConnection,
    session: Arc<AtomicU8>,
    ack_tx: Sender<()>,
    message_tx: Sender<MqttMessage>,
) {
    // `next` fails once the client has been dropped
    while let Ok(event) = connection.next() {
        match event.payload() {
            EventPayload::Connected(_) => {
                if session
                    .compare_exchange(
                        SESSION_PENDING,
                        SESSION_UP,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    let _ = ack_tx.send(());
                }
            }
            EventPayload::Disconnected => {
                if session.swap(SESSION_DEAD, Ordering::AcqRel) == SESSION_UP {
                    log::warn!("MQTT session lost");
                }
            }
            EventPayload::Received {
                topic: Some(topic),
                data,
                details,
                ..
            } => {
                let mut msg = MqttMessage::new(topic, data);
                // Chunked frames are not reassembled
                if !matches!(details, Details::Complete) {
                    msg.truncated = true;
                }
                let _ = message_tx.send(msg);
            }
            _ => {}
        }
    }
}
