//! Broker session management.
//!
//! [`Transport`] wraps an [`MqttClient`] with everything the firmware needs
//! around it: the connect sequence (last-will, subscriptions, `online`
//! announcement), reconnect backoff, and routing of inbound frames.
//!
//! # Session Lifecycle
//!
//! ```text
//!  Disconnected ──(backoff due)──► Connecting ──ok──► Connected
//!       ▲                              │                  │
//!       └──────────(failure)───────────┘                  │
//!       └──────────────(session lost / stale)─────────────┘
//! ```
//!
//! Reconnect delays start at [`RECONNECT_BACKOFF_INITIAL_MS`], double per
//! failure up to [`RECONNECT_BACKOFF_MAX_MS`], and reset once a session
//! opens.
//!
//! # Example
//!
//! ```rust
//! use relay_bank::config::{Configuration, MqttConfig, COMMAND_QUEUE_CAPACITY};
//! use relay_bank::error::ErrorCounters;
//! use relay_bank::hal::{MockMqtt, MockWatchdog};
//! use relay_bank::queue::CommandQueue;
//! use relay_bank::transport::{SessionState, Transport};
//!
//! let mut transport = Transport::new(MockMqtt::new(), &MqttConfig::default(), 0);
//! let mut watchdog = MockWatchdog::new();
//! let mut counters = ErrorCounters::new();
//!
//! assert!(transport.maintain(0, &mut watchdog, &mut counters));
//! assert_eq!(transport.state(), SessionState::Connected);
//!
//! transport.client_mut().queue_message("esp32/switches", br#"{"switch":1,"state":"on"}"#);
//! let mut queue: CommandQueue<COMMAND_QUEUE_CAPACITY> = CommandQueue::new();
//! transport.poll_inbound(10, &Configuration::default(), &mut queue, &mut counters);
//! assert_eq!(queue.len(), 1);
//! ```

use crate::commands::Command;
use crate::config::{
    Configuration, LongString, MqttConfig, RECONNECT_BACKOFF_INITIAL_MS, RECONNECT_BACKOFF_MAX_MS,
};
use crate::error::{Error, ErrorCounters, TransportOp};
use crate::messages::{parse_config_message, parse_switch_command};
use crate::queue::CommandQueue;
use crate::traits::{has_elapsed, LastWill, Millis, MqttClient, MqttMessage, QoS, Watchdog};

/// Status payload while the device is up.
pub const STATUS_ONLINE: &[u8] = b"online";

/// Status payload published by the broker on the device's behalf.
pub const STATUS_OFFLINE: &[u8] = b"offline";

/// Broker session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session; a reconnect is scheduled.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Session open and subscribed.
    Connected,
}

/// Full topic names derived from the configured prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Online/offline status and last-will.
    pub status: LongString,
    /// Inbound switch commands.
    pub switches: LongString,
    /// Inbound configuration.
    pub config: LongString,
    /// Outbound state snapshots.
    pub state: LongString,
    /// Outbound heartbeat and events.
    pub telemetry: LongString,
}

impl Topics {
    /// Build every topic from `mqtt.topic_prefix`.
    pub fn new(mqtt: &MqttConfig) -> Self {
        Self {
            status: mqtt.topic("status"),
            switches: mqtt.topic("switches"),
            config: mqtt.topic("config"),
            state: mqtt.topic("state"),
            telemetry: mqtt.topic("telemetry"),
        }
    }
}

/// Exponential reconnect delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    current: Millis,
}

impl Backoff {
    /// Start at the initial delay.
    pub const fn new() -> Self {
        Self {
            current: RECONNECT_BACKOFF_INITIAL_MS,
        }
    }

    /// Delay to wait before the next attempt.
    pub const fn delay(&self) -> Millis {
        self.current
    }

    /// Double the delay, saturating at the ceiling. Returns the delay that
    /// was in effect before the call.
    pub fn fail(&mut self) -> Millis {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(RECONNECT_BACKOFF_MAX_MS);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = RECONNECT_BACKOFF_INITIAL_MS;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker session over an [`MqttClient`].
pub struct Transport<C: MqttClient> {
    client: C,
    topics: Topics,
    state: SessionState,
    backoff: Backoff,
    /// Next attempt is due `retry_delay` ms after `retry_since`.
    retry_since: Millis,
    retry_delay: Millis,
    sessions: u32,
    candidate: Option<Configuration>,
}

impl<C: MqttClient> Transport<C> {
    /// Create a disconnected transport whose first attempt is due at `now`.
    pub fn new(client: C, mqtt: &MqttConfig, now: Millis) -> Self {
        Self {
            client,
            topics: Topics::new(mqtt),
            state: SessionState::Disconnected,
            backoff: Backoff::new(),
            retry_since: now,
            retry_delay: 0,
            sessions: 0,
            candidate: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true while a session is open.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Topic names in use.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Delay the next reconnect attempt will wait after a failure.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Time at which the next reconnect attempt is due.
    pub fn next_attempt_at(&self) -> Millis {
        self.retry_since.wrapping_add(self.retry_delay)
    }

    /// Number of sessions opened so far.
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    /// Get a reference to the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get a mutable reference to the underlying client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Keep the session alive.
    ///
    /// Detects a lost session and, when the backoff allows, makes one
    /// connect attempt. The watchdog is fed before and after the attempt
    /// since a connect may block.
    ///
    /// Returns true if a new session was opened during this call.
    pub fn maintain<W: Watchdog>(
        &mut self,
        now: Millis,
        watchdog: &mut W,
        counters: &mut ErrorCounters,
    ) -> bool {
        if self.state == SessionState::Connected {
            if self.client.is_connected() {
                return false;
            }
            log::warn!("broker session lost");
            self.state = SessionState::Disconnected;
            self.schedule(now, 0);
        }

        if !has_elapsed(now, self.retry_since, self.retry_delay) {
            return false;
        }

        self.state = SessionState::Connecting;
        watchdog.feed();
        let result = self.open_session();
        watchdog.feed();

        match result {
            Ok(()) => {
                self.state = SessionState::Connected;
                self.backoff.reset();
                if self.sessions > 0 {
                    counters.reconnects = counters.reconnects.saturating_add(1);
                }
                self.sessions = self.sessions.saturating_add(1);
                log::info!("broker session {} open", self.sessions);
                true
            }
            Err(op) => {
                counters.record(Error::TransportFailure(op));
                self.client.disconnect();
                self.state = SessionState::Disconnected;
                let delay = self.backoff.fail();
                self.schedule(now, delay);
                log::warn!("broker {} failed, retry in {} ms", op, delay);
                false
            }
        }
    }

    fn open_session(&mut self) -> Result<(), TransportOp> {
        let will = LastWill {
            topic: self.topics.status.as_str(),
            payload: STATUS_OFFLINE,
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        self.client
            .connect(&will)
            .map_err(|e| log_failure(TransportOp::Connect, e))?;

        for topic in [&self.topics.switches, &self.topics.config] {
            self.client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .map_err(|e| log_failure(TransportOp::Subscribe, e))?;
        }

        self.client
            .publish(self.topics.status.as_str(), STATUS_ONLINE, QoS::AtLeastOnce, true)
            .map_err(|e| log_failure(TransportOp::Publish, e))
    }

    fn schedule(&mut self, now: Millis, delay: Millis) {
        self.retry_since = now;
        self.retry_delay = delay;
    }

    /// Force the session closed and retry immediately.
    ///
    /// Used when telemetry has not got a publish through for too long. The
    /// backoff is left untouched.
    pub fn mark_stale(&mut self, now: Millis) {
        log::warn!("broker session stale, reconnecting");
        self.client.disconnect();
        self.state = SessionState::Disconnected;
        self.schedule(now, 0);
    }

    /// Publish on an open session.
    ///
    /// # Errors
    ///
    /// [`Error::TransportFailure`] if there is no session or the client
    /// rejects the frame. The caller decides whether to count it.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), Error> {
        if self.state != SessionState::Connected {
            return Err(Error::TransportFailure(TransportOp::Publish));
        }
        self.client
            .publish(topic, payload, qos, retain)
            .map_err(|e| Error::TransportFailure(log_failure(TransportOp::Publish, e)))
    }

    /// Drain inbound frames.
    ///
    /// Switch commands are authenticated against `config` and queued,
    /// evicting the oldest command when the queue is full. Configuration
    /// frames are merged into a candidate; several in one call chain onto
    /// each other. Returns the merged candidate, unvalidated.
    pub fn poll_inbound<const N: usize>(
        &mut self,
        now: Millis,
        config: &Configuration,
        queue: &mut CommandQueue<N>,
        counters: &mut ErrorCounters,
    ) -> Option<Configuration> {
        while let Some(msg) = self.client.try_recv() {
            if let Err(err) = self.route(&msg, now, config, queue) {
                log::warn!("inbound on {} dropped: {}", msg.topic.as_str(), err);
                counters.record(err);
            }
        }
        self.candidate.take()
    }

    fn route<const N: usize>(
        &mut self,
        msg: &MqttMessage,
        now: Millis,
        config: &Configuration,
        queue: &mut CommandQueue<N>,
    ) -> Result<(), Error> {
        let topic = msg.topic.as_str();
        if topic != self.topics.switches.as_str() && topic != self.topics.config.as_str() {
            log::debug!("ignoring message on {}", topic);
            return Ok(());
        }
        if msg.truncated {
            return Err(Error::MalformedMessage);
        }

        if topic == self.topics.switches.as_str() {
            let cmd = parse_switch_command(&msg.payload, config)?;
            if !config.authorizes(cmd.secret) {
                return Err(Error::AuthRejected);
            }
            if let Some(evicted) = queue.offer_evicting(Command::remote(cmd.target, cmd.desired, now)) {
                log::warn!("command queue full, dropped {:?}", evicted.target);
                return Err(Error::QueueOverflow);
            }
        } else {
            let base = self.candidate.as_ref().unwrap_or(config);
            let next = parse_config_message(&msg.payload)?.apply_to(base)?;
            self.candidate = Some(next);
        }
        Ok(())
    }
}

fn log_failure<E: core::fmt::Debug>(op: TransportOp, err: E) -> TransportOp {
    log::error!("broker {} error: {:?}", op, err);
    op
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Desired, Target};
    use crate::config::{FusionMode, COMMAND_QUEUE_CAPACITY};
    use crate::hal::{MockMqtt, MockWatchdog};

    struct Rig {
        transport: Transport<MockMqtt>,
        watchdog: MockWatchdog,
        counters: ErrorCounters,
        queue: CommandQueue<COMMAND_QUEUE_CAPACITY>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                transport: Transport::new(MockMqtt::new(), &MqttConfig::default(), 0),
                watchdog: MockWatchdog::new(),
                counters: ErrorCounters::new(),
                queue: CommandQueue::new(),
            }
        }

        fn connected() -> Self {
            let mut rig = Self::new();
            assert!(rig.maintain(0));
            rig
        }

        fn maintain(&mut self, now: Millis) -> bool {
            self.transport
                .maintain(now, &mut self.watchdog, &mut self.counters)
        }

        fn poll(&mut self, config: &Configuration) -> Option<Configuration> {
            self.transport
                .poll_inbound(100, config, &mut self.queue, &mut self.counters)
        }

        fn mqtt(&mut self) -> &mut MockMqtt {
            self.transport.client_mut()
        }
    }

    // =========================================================================
    // Backoff Tests
    // =========================================================================

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new();
        let delays: std::vec::Vec<Millis> = (0..7).map(|_| b.fail()).collect();
        assert_eq!(delays, [1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
        b.reset();
        assert_eq!(b.delay(), 1_000);
    }

    // =========================================================================
    // Session Tests
    // =========================================================================

    #[test]
    fn connect_sequence() {
        let mut rig = Rig::new();
        assert!(rig.maintain(0));
        assert_eq!(rig.transport.state(), SessionState::Connected);

        let mqtt = rig.transport.client();
        let (topic, payload, qos, retain) = mqtt.will.clone().unwrap();
        assert_eq!(topic, "esp32/status");
        assert_eq!(payload, b"offline");
        assert_eq!((qos, retain), (QoS::AtLeastOnce, true));

        assert!(mqtt.subscriptions.contains(&("esp32/switches".into(), QoS::AtLeastOnce)));
        assert!(mqtt.subscriptions.contains(&("esp32/config".into(), QoS::AtLeastOnce)));

        let online = mqtt.published_to("esp32/status");
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].1, b"online");
        assert!(online[0].3);

        // Fed around the blocking connect
        assert_eq!(rig.watchdog.feeds, 2);
        assert_eq!(rig.counters.reconnects, 0);
    }

    #[test]
    fn connected_maintain_is_quiet() {
        let mut rig = Rig::connected();
        assert!(!rig.maintain(50));
        assert_eq!(rig.transport.client().connect_calls, 1);
    }

    #[test]
    fn connect_failure_backs_off() {
        let mut rig = Rig::new();
        rig.mqtt().fail_connect = true;

        assert!(!rig.maintain(0));
        assert_eq!(rig.transport.state(), SessionState::Disconnected);
        assert_eq!(rig.transport.next_attempt_at(), 1_000);
        assert_eq!(rig.counters.transport_failures, 1);

        // Not due yet
        rig.maintain(999);
        assert_eq!(rig.transport.client().connect_calls, 1);

        rig.maintain(1_000);
        assert_eq!(rig.transport.client().connect_calls, 2);
        assert_eq!(rig.transport.next_attempt_at(), 3_000);

        rig.mqtt().fail_connect = false;
        assert!(rig.maintain(3_000));
        assert_eq!(rig.transport.backoff().delay(), 1_000);
    }

    #[test]
    fn lost_session_reconnects_and_counts() {
        let mut rig = Rig::connected();
        rig.mqtt().drop_session();

        assert!(rig.maintain(5_000));
        assert_eq!(rig.transport.sessions(), 2);
        assert_eq!(rig.counters.reconnects, 1);
        assert_eq!(rig.transport.client().published_to("esp32/status").len(), 2);
    }

    #[test]
    fn mark_stale_retries_immediately() {
        let mut rig = Rig::connected();
        rig.mqtt().fail_connect = true;
        rig.maintain(0);
        rig.transport.mark_stale(10);
        assert!(!rig.transport.client().is_connected());
        assert_eq!(rig.transport.next_attempt_at(), 10);
    }

    #[test]
    fn subscribe_failure_drops_session() {
        struct NoSubscribe(MockMqtt);
        impl MqttClient for NoSubscribe {
            type Error = ();
            fn connect(&mut self, will: &LastWill<'_>) -> Result<(), ()> {
                self.0.connect(will)
            }
            fn disconnect(&mut self) {
                self.0.disconnect()
            }
            fn publish(&mut self, t: &str, p: &[u8], q: QoS, r: bool) -> Result<(), ()> {
                self.0.publish(t, p, q, r)
            }
            fn subscribe(&mut self, _: &str, _: QoS) -> Result<(), ()> {
                Err(())
            }
            fn try_recv(&mut self) -> Option<MqttMessage> {
                self.0.try_recv()
            }
            fn is_connected(&self) -> bool {
                self.0.is_connected()
            }
        }

        let mut transport = Transport::new(NoSubscribe(MockMqtt::new()), &MqttConfig::default(), 0);
        let mut counters = ErrorCounters::new();
        assert!(!transport.maintain(0, &mut MockWatchdog::new(), &mut counters));
        assert_eq!(
            counters.last_error,
            Some(Error::TransportFailure(TransportOp::Subscribe))
        );
        assert!(!transport.client().is_connected());
    }

    #[test]
    fn publish_requires_session() {
        let mut rig = Rig::new();
        assert_eq!(
            rig.transport.publish("esp32/state", b"{}", QoS::AtMostOnce, false),
            Err(Error::TransportFailure(TransportOp::Publish))
        );
    }

    #[test]
    fn custom_prefix_topics() {
        let mqtt = MqttConfig::default().with_topic_prefix("room7");
        let topics = Topics::new(&mqtt);
        assert_eq!(topics.switches.as_str(), "room7/switches");
        assert_eq!(topics.telemetry.as_str(), "room7/telemetry");
    }

    // =========================================================================
    // Inbound Tests
    // =========================================================================

    #[test]
    fn switch_command_queued() {
        let mut rig = Rig::connected();
        rig.mqtt()
            .queue_message("esp32/switches", br#"{"switch":2,"state":"off"}"#);
        assert_eq!(rig.poll(&Configuration::default()), None);
        let cmd = rig.queue.poll().unwrap();
        assert_eq!(cmd.target, Target::Switch(2));
        assert_eq!(cmd.desired, Desired::Off);
        assert_eq!(cmd.enqueued_at, 100);
    }

    #[test]
    fn malformed_counted() {
        let mut rig = Rig::connected();
        rig.mqtt().queue_message("esp32/switches", b"{oops");
        rig.mqtt().queue_message("esp32/config", b"42");
        rig.poll(&Configuration::default());
        assert_eq!(rig.counters.malformed, 2);
        assert!(rig.queue.is_empty());
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let mut rig = Rig::connected();
        let mut big = std::vec::Vec::from(&br#"{"switch":0,"state":"on","pad":""#[..]);
        big.resize(2_000, b'x');
        rig.mqtt().queue_message("esp32/switches", &big);
        rig.poll(&Configuration::default());
        assert_eq!(rig.counters.malformed, 1);
    }

    #[test]
    fn wrong_secret_rejected() {
        let config = Configuration::default().with_device_secret("letmein");
        let mut rig = Rig::connected();
        rig.mqtt()
            .queue_message("esp32/switches", br#"{"switch":0,"state":"on","secret":"nope"}"#);
        rig.mqtt()
            .queue_message("esp32/switches", br#"{"switch":0,"state":"on"}"#);
        rig.mqtt()
            .queue_message("esp32/switches", br#"{"switch":1,"state":"on","secret":"letmein"}"#);
        rig.poll(&config);
        assert_eq!(rig.counters.auth_rejected, 2);
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.queue.peek().map(|c| c.target), Some(Target::Switch(1)));
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut rig = Rig::connected();
        for i in 0..20u8 {
            let payload = std::format!(r#"{{"switch":{},"state":"toggle"}}"#, i % 6);
            rig.mqtt().queue_message("esp32/switches", payload.as_bytes());
        }
        rig.poll(&Configuration::default());
        assert_eq!(rig.queue.len(), 16);
        assert_eq!(rig.counters.queue_drops, 4);
        // Commands 4..20 survive in order
        assert_eq!(rig.queue.peek().map(|c| c.target), Some(Target::Switch(4)));
    }

    #[test]
    fn config_frames_chain() {
        let mut rig = Rig::connected();
        rig.mqtt()
            .queue_message("esp32/config", br#"{"motionEnabled":true}"#);
        rig.mqtt()
            .queue_message("esp32/config", br#"{"fusion":"or"}"#);
        let next = rig.poll(&Configuration::default()).unwrap();
        assert!(next.motion.enabled);
        assert_eq!(next.motion.fusion, FusionMode::Or);
        // Consumed
        assert_eq!(rig.poll(&Configuration::default()), None);
    }

    #[test]
    fn foreign_topics_ignored() {
        let mut rig = Rig::connected();
        rig.mqtt().queue_message("other/switches", b"garbage");
        rig.poll(&Configuration::default());
        assert_eq!(rig.counters, ErrorCounters::new());
    }
}
