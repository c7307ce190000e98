//! `rumqttc`-backed [`MqttClient`] for desktop builds.
//!
//! Each [`MqttClient::connect`] call starts a fresh `rumqttc` session: the
//! last-will is registered through [`MqttOptions`], the event loop is spawned
//! on the tokio runtime, and the call blocks until the broker answers the
//! CONNECT or [`CONNECT_TIMEOUT`] passes. When the event loop later reports
//! an error the task ends and [`MqttClient::is_connected`] turns false, so
//! reconnect pacing stays with [`Transport`](crate::transport::Transport).
//!
//! Publishing and subscribing use the non-blocking `try_*` client calls. The
//! supervisor loop is synchronous and must never wait on the network there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::traits::{LastWill, MqttClient, MqttMessage, QoS};

/// Longest wait for the broker's CONNACK.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound frames buffered between the event loop and the supervisor.
const INBOUND_CAPACITY: usize = 64;

/// Outgoing requests buffered inside `rumqttc`.
const REQUEST_CAPACITY: usize = 32;

// ============================================================================
// Configuration
// ============================================================================

/// Runtime MQTT client configuration for `rumqttc`.
///
/// This struct uses `String` for runtime compatibility with the `rumqttc` library.
/// For embedded/no-alloc contexts, use [`crate::config::MqttConfig`] which uses
/// fixed-size `ShortString` types and convert with [`MqttRuntimeConfig::from_config`].
#[derive(Debug, Clone)]
pub struct MqttRuntimeConfig {
    /// MQTT broker hostname
    pub host: String,
    /// MQTT broker port
    pub port: u16,
    /// Client ID
    pub client_id: String,
    /// Username (empty = anonymous)
    pub username: String,
    /// Password
    pub password: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
}

impl Default for MqttRuntimeConfig {
    fn default() -> Self {
        Self::from_config(&MqttConfig::default())
    }
}

impl MqttRuntimeConfig {
    /// Create a new config with the given broker address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Create from shared MqttConfig
    pub fn from_config(config: &MqttConfig) -> Self {
        Self {
            host: config.host.as_str().to_string(),
            port: config.port,
            client_id: config.client_id.as_str().to_string(),
            username: config.username.as_str().to_string(),
            password: config.password.as_str().to_string(),
            keep_alive_secs: config.keep_alive_secs,
        }
    }

    /// Set the client ID
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    fn options(&self, will: &LastWill<'_>) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(u64::from(self.keep_alive_secs.max(5))));
        options.set_clean_session(true);
        if !self.username.is_empty() {
            options.set_credentials(&self.username, &self.password);
        }
        options.set_last_will(rumqttc::LastWill::new(
            will.topic,
            will.payload.to_vec(),
            qos(will.qos),
            will.retain,
        ));
        options
    }
}

// ============================================================================
// Errors
// ============================================================================

/// MQTT-related errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// No live session
    #[error("MQTT not connected")]
    NotConnected,
    /// Broker refused or the connection failed
    #[error("MQTT connect error: {0}")]
    Connect(String),
    /// No CONNACK within [`CONNECT_TIMEOUT`]
    #[error("MQTT connect timed out")]
    Timeout,
    /// Request queue full or event loop gone
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

// ============================================================================
// Client
// ============================================================================

struct Session {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// [`MqttClient`] implementation over `rumqttc`.
///
/// Must be used from outside the tokio runtime it was given: `connect`
/// blocks the calling thread while waiting for the broker.
pub struct RumqttcClient {
    config: MqttRuntimeConfig,
    runtime: Handle,
    session: Option<Session>,
    connected: Arc<AtomicBool>,
    inbound_tx: mpsc::Sender<MqttMessage>,
    inbound_rx: mpsc::Receiver<MqttMessage>,
}

impl RumqttcClient {
    /// Create a disconnected client for the broker in `config`.
    pub fn new(config: &MqttConfig, runtime: Handle) -> Self {
        Self::with_runtime_config(MqttRuntimeConfig::from_config(config), runtime)
    }

    /// Create a disconnected client from a runtime config.
    pub fn with_runtime_config(config: MqttRuntimeConfig, runtime: Handle) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            config,
            runtime,
            session: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound_tx,
            inbound_rx,
        }
    }

    /// The broker settings in use.
    pub fn config(&self) -> &MqttRuntimeConfig {
        &self.config
    }

    fn session(&self) -> Result<&Session, MqttError> {
        match &self.session {
            Some(session) if self.connected.load(Ordering::Acquire) => Ok(session),
            _ => Err(MqttError::NotConnected),
        }
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.client.try_disconnect();
            session.task.abort();
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl MqttClient for RumqttcClient {
    type Error = MqttError;

    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), Self::Error> {
        self.teardown();

        let (client, eventloop) = AsyncClient::new(self.config.options(will), REQUEST_CAPACITY);
        let (ack_tx, ack_rx) = oneshot::channel();
        let task = self.runtime.spawn(run_event_loop(
            eventloop,
            ack_tx,
            Arc::clone(&self.connected),
            self.inbound_tx.clone(),
        ));
        self.session = Some(Session { client, task });

        let outcome = self
            .runtime
            .block_on(async { tokio::time::timeout(CONNECT_TIMEOUT, ack_rx).await });
        let result = match outcome {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(MqttError::Connect(reason)),
            // Task ended without reporting
            Ok(Err(_)) => Err(MqttError::Connect("event loop stopped".to_string())),
            Err(_) => Err(MqttError::Timeout),
        };
        match result {
            Ok(()) => {
                tracing::info!(
                    "MQTT connected to {}:{}",
                    self.config.host,
                    self.config.port
                );
                Ok(())
            }
            Err(err) => {
                self.teardown();
                Err(err)
            }
        }
    }

    fn disconnect(&mut self) {
        self.teardown();
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos_level: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.session()?
            .client
            .try_publish(topic, qos(qos_level), retain, payload.to_vec())?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos_level: QoS) -> Result<(), Self::Error> {
        self.session()?.client.try_subscribe(topic, qos(qos_level))?;
        tracing::debug!("subscribed to {}", topic);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        self.inbound_rx.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn qos(level: QoS) -> rumqttc::QoS {
    match level {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

async fn run_event_loop(
    mut eventloop: rumqttc::EventLoop,
    ack_tx: oneshot::Sender<Result<(), String>>,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<MqttMessage>,
) {
    let mut ack_tx = Some(ack_tx);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                connected.store(accepted, Ordering::Release);
                if let Some(tx) = ack_tx.take() {
                    let _ = tx.send(if accepted {
                        Ok(())
                    } else {
                        Err(format!("{:?}", ack.code))
                    });
                }
                if !accepted {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = MqttMessage::new(&publish.topic, &publish.payload);
                if inbound.try_send(msg).is_err() {
                    tracing::warn!("inbound queue full, dropping frame on {}", publish.topic);
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("MQTT event loop error: {}", e);
                connected.store(false, Ordering::Release);
                if let Some(tx) = ack_tx.take() {
                    let _ = tx.send(Err(e.to_string()));
                }
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
