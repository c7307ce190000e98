//! State snapshots, heartbeat, and events.
//!
//! The publisher runs once per loop iteration and decides what is due:
//!
//! - a [`StateSnapshot`] every [`SNAPSHOT_INTERVAL_MS`], or right away when
//!   a switch changed
//! - a [`Heartbeat`] every [`HEARTBEAT_INTERVAL_MS`]
//! - any buffered [`TelemetryEvent`]s
//!
//! Nothing is retried. A frame that cannot be sent is dropped and counted,
//! and the next snapshot carries the current state anyway.
//!
//! It also watches for a session that claims to be connected but has not
//! got a publish through in [`OFFLINE_TIMEOUT_MS`]; the caller then forces
//! a reconnect.

use heapless::Deque;
use serde::Serialize;

use crate::commands::SwitchState;
use crate::config::{
    MotionConfig, HEARTBEAT_INTERVAL_MS, NUM_SWITCHES, OFFLINE_TIMEOUT_MS, SNAPSHOT_INTERVAL_MS,
};
use crate::error::{Error, ErrorCounters, TransportOp};
use crate::messages::{encode, Heartbeat, StateSnapshot, TelemetryEvent};
use crate::traits::{has_elapsed, Millis, MqttClient, QoS};
use crate::transport::Transport;

/// Pending events kept while disconnected.
pub const EVENT_BUFFER: usize = 8;

const FRAME_LEN: usize = 512;

/// Everything a telemetry frame reports, gathered by the caller.
#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    /// Logical switch states.
    pub states: [SwitchState; NUM_SWITCHES],
    /// Fused presence.
    pub presence: bool,
    /// Time since boot.
    pub uptime_ms: Millis,
    /// Error totals.
    pub counters: ErrorCounters,
    /// Active motion settings.
    pub motion: &'a MotionConfig,
    /// Device identity.
    pub device_id: &'a str,
}

impl StatusView<'_> {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            switches: self.states.map(SwitchState::is_on),
            presence: self.presence,
            uptime_ms: self.uptime_ms,
        }
    }

    fn heartbeat(&self) -> Heartbeat<'_> {
        let c = &self.counters;
        Heartbeat {
            kind: "heartbeat",
            device: self.device_id,
            uptime_ms: self.uptime_ms,
            queue_drops: c.queue_drops,
            reconnects: c.reconnects,
            malformed: c.malformed,
            auth_rejected: c.auth_rejected,
            config_rejected: c.config_rejected,
            transport_failures: c.transport_failures,
            last_error: c.last_error_kind(),
            motion_enabled: self.motion.enabled,
            sensitivity: self.motion.sensitivity,
            detection_range: self.motion.detection_range,
            sensor_type: self.motion.sensor_type.as_str(),
            fusion: self.motion.fusion.as_str(),
        }
    }
}

/// What a [`TelemetryPublisher::publish`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Frames sent successfully.
    pub sent: u8,
    /// Frames dropped after a failed publish.
    pub failed: u8,
    /// The session should be torn down and reopened.
    pub stale: bool,
}

/// Telemetry scheduler.
#[derive(Debug)]
pub struct TelemetryPublisher {
    last_snapshot_at: Option<Millis>,
    last_heartbeat_at: Millis,
    last_success_at: Millis,
    events: Deque<TelemetryEvent, EVENT_BUFFER>,
    dirty: bool,
}

impl TelemetryPublisher {
    /// Create a publisher; the first heartbeat is due one interval after `now`.
    pub fn new(now: Millis) -> Self {
        Self {
            last_snapshot_at: None,
            last_heartbeat_at: now,
            last_success_at: now,
            events: Deque::new(),
            dirty: false,
        }
    }

    /// Buffer an event, dropping the oldest when full.
    pub fn push_event(&mut self, event: TelemetryEvent) {
        if self.events.is_full() {
            log::debug!("telemetry buffer full, dropping oldest event");
            self.events.pop_front();
        }
        // Room was made above
        let _ = self.events.push_back(event);
    }

    /// Number of events waiting to be sent.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Request a snapshot on the next pass.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns true if a snapshot is requested.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// A new session opened: report state right away and restart the
    /// staleness clock.
    pub fn session_started(&mut self, now: Millis) {
        self.dirty = true;
        self.last_success_at = now;
    }

    /// Send whatever is due.
    pub fn publish<C: MqttClient>(
        &mut self,
        now: Millis,
        view: &StatusView<'_>,
        transport: &mut Transport<C>,
        counters: &mut ErrorCounters,
    ) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        if !transport.is_connected() {
            return outcome;
        }

        let snapshot_due = self.dirty
            || self
                .last_snapshot_at
                .map_or(true, |t| has_elapsed(now, t, SNAPSHOT_INTERVAL_MS));
        if snapshot_due {
            let topic = transport.topics().state.clone();
            self.send(transport, topic.as_str(), &view.snapshot(), now, counters, &mut outcome);
            self.last_snapshot_at = Some(now);
            self.dirty = false;
        }

        let telemetry = transport.topics().telemetry.clone();
        if has_elapsed(now, self.last_heartbeat_at, HEARTBEAT_INTERVAL_MS) {
            self.send(transport, telemetry.as_str(), &view.heartbeat(), now, counters, &mut outcome);
            self.last_heartbeat_at = now;
        }

        while let Some(event) = self.events.pop_front() {
            self.send(transport, telemetry.as_str(), &event, now, counters, &mut outcome);
        }

        outcome.stale = transport.is_connected()
            && has_elapsed(now, self.last_success_at, OFFLINE_TIMEOUT_MS);
        outcome
    }

    fn send<C: MqttClient, T: Serialize>(
        &mut self,
        transport: &mut Transport<C>,
        topic: &str,
        value: &T,
        now: Millis,
        counters: &mut ErrorCounters,
        outcome: &mut PublishOutcome,
    ) {
        let mut buf = [0u8; FRAME_LEN];
        let Some(frame) = encode(value, &mut buf) else {
            log::error!("telemetry frame for {} does not fit", topic);
            counters.record(Error::TransportFailure(TransportOp::Publish));
            outcome.failed = outcome.failed.saturating_add(1);
            return;
        };
        match transport.publish(topic, frame, QoS::AtMostOnce, false) {
            Ok(()) => {
                self.last_success_at = now;
                outcome.sent = outcome.sent.saturating_add(1);
            }
            Err(err) => {
                counters.record(err);
                outcome.failed = outcome.failed.saturating_add(1);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttConfig;
    use crate::hal::{MockMqtt, MockWatchdog};
    use pretty_assertions::assert_eq;

    struct Rig {
        telemetry: TelemetryPublisher,
        transport: Transport<MockMqtt>,
        counters: ErrorCounters,
        motion: MotionConfig,
        states: [SwitchState; NUM_SWITCHES],
    }

    impl Rig {
        fn new() -> Self {
            let mut transport = Transport::new(MockMqtt::new(), &MqttConfig::default(), 0);
            let mut counters = ErrorCounters::new();
            assert!(transport.maintain(0, &mut MockWatchdog::new(), &mut counters));
            transport.client_mut().clear_published();
            let mut telemetry = TelemetryPublisher::new(0);
            telemetry.session_started(0);
            Self {
                telemetry,
                transport,
                counters,
                motion: MotionConfig::default(),
                states: [SwitchState::Off; NUM_SWITCHES],
            }
        }

        fn publish(&mut self, now: Millis) -> PublishOutcome {
            let view = StatusView {
                states: self.states,
                presence: false,
                uptime_ms: now,
                counters: self.counters,
                motion: &self.motion,
                device_id: "dev-1",
            };
            self.telemetry
                .publish(now, &view, &mut self.transport, &mut self.counters)
        }

        fn state_frames(&self) -> std::vec::Vec<std::string::String> {
            self.transport.client().payloads_to("esp32/state")
        }

        fn telemetry_frames(&self) -> std::vec::Vec<std::string::String> {
            self.transport.client().payloads_to("esp32/telemetry")
        }
    }

    // =========================================================================
    // Snapshot Tests
    // =========================================================================

    #[test]
    fn snapshot_on_session_start() {
        let mut rig = Rig::new();
        let outcome = rig.publish(10);
        assert_eq!(outcome.sent, 1);
        assert_eq!(
            rig.state_frames(),
            [r#"{"switches":[false,false,false,false,false,false],"presence":false,"uptimeMs":10}"#]
        );
        let (_, _, qos, retain) = &rig.transport.client().published[0];
        assert_eq!((*qos, *retain), (QoS::AtMostOnce, false));
    }

    #[test]
    fn snapshot_periodic() {
        let mut rig = Rig::new();
        rig.publish(0);
        rig.publish(4_999);
        assert_eq!(rig.state_frames().len(), 1);
        rig.publish(5_000);
        assert_eq!(rig.state_frames().len(), 2);
    }

    #[test]
    fn snapshot_when_dirty() {
        let mut rig = Rig::new();
        rig.publish(0);
        rig.states[1] = SwitchState::On;
        rig.telemetry.mark_dirty();
        rig.publish(100);
        let frames = rig.state_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].starts_with(r#"{"switches":[false,true,"#));
        assert!(!rig.telemetry.is_dirty());
    }

    // =========================================================================
    // Heartbeat Tests
    // =========================================================================

    #[test]
    fn heartbeat_every_thirty_seconds() {
        let mut rig = Rig::new();
        rig.publish(29_999);
        assert!(rig.telemetry_frames().is_empty());
        rig.publish(30_000);
        let frames = rig.telemetry_frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with(r#"{"type":"heartbeat","device":"dev-1""#));
        assert!(frames[0].contains(r#""lastError":"none""#));
        assert!(frames[0].contains(r#""fusion":"and""#));
        assert!(frames[0].contains(r#""sensorType":"hc-sr501""#));
    }

    #[test]
    fn heartbeat_reports_counters() {
        let mut rig = Rig::new();
        rig.counters.record(Error::QueueOverflow);
        rig.counters.record(Error::AuthRejected);
        rig.publish(30_000);
        let frames = rig.telemetry_frames();
        assert!(frames[0].contains(r#""queueDrops":1"#));
        assert!(frames[0].contains(r#""authRejected":1"#));
        assert!(frames[0].contains(r#""lastError":"auth-rejected""#));
    }

    // =========================================================================
    // Event Tests
    // =========================================================================

    #[test]
    fn events_drain_in_order() {
        let mut rig = Rig::new();
        rig.telemetry.push_event(TelemetryEvent::Presence {
            presence: false,
            uptime_ms: 5,
        });
        rig.telemetry.push_event(TelemetryEvent::MotionAutoOff {
            switch: 0,
            uptime_ms: 6,
        });
        rig.publish(10);
        assert_eq!(
            rig.telemetry_frames(),
            [
                r#"{"type":"presence","presence":false,"uptimeMs":5}"#,
                r#"{"type":"motion-auto-off","switch":0,"uptimeMs":6}"#,
            ]
        );
        assert_eq!(rig.telemetry.pending_events(), 0);
    }

    #[test]
    fn event_buffer_drops_oldest() {
        let mut telemetry = TelemetryPublisher::new(0);
        for i in 0..10u8 {
            telemetry.push_event(TelemetryEvent::ManualSwitch {
                switch: i % 6,
                gpio: 16,
                state: true,
            });
        }
        assert_eq!(telemetry.pending_events(), EVENT_BUFFER);
    }

    #[test]
    fn events_held_while_disconnected() {
        let mut rig = Rig::new();
        rig.transport.mark_stale(0);
        rig.telemetry.push_event(TelemetryEvent::ConfigError { reason: "x" });
        let outcome = rig.publish(10);
        assert_eq!(outcome, PublishOutcome::default());
        assert_eq!(rig.telemetry.pending_events(), 1);
    }

    // =========================================================================
    // Failure Tests
    // =========================================================================

    #[test]
    fn failed_publish_dropped_and_counted() {
        let mut rig = Rig::new();
        rig.transport.client_mut().fail_publish = true;
        let outcome = rig.publish(10);
        assert_eq!(outcome.failed, 1);
        assert_eq!(rig.counters.transport_failures, 1);
        assert!(!rig.telemetry.is_dirty());
    }

    #[test]
    fn stale_after_sixty_seconds_of_failures() {
        let mut rig = Rig::new();
        rig.publish(0);
        rig.transport.client_mut().fail_publish = true;
        assert!(!rig.publish(59_999).stale);
        assert!(rig.publish(60_000).stale);
    }

    #[test]
    fn success_keeps_session_fresh() {
        let mut rig = Rig::new();
        let mut t = 0;
        while t <= 120_000 {
            assert!(!rig.publish(t).stale);
            t += 5_000;
        }
    }
}
