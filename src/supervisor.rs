//! Boot sequence and the cooperative main loop.
//!
//! The [`Supervisor`] owns every component and the active
//! [`Configuration`]. Platform code calls [`Supervisor::tick`] as often as
//! it likes (every 10-50 ms is typical); each tick does a bounded amount of
//! work and never blocks, except for one connect attempt when a reconnect is
//! due.
//!
//! # Tick Order
//!
//! 1. Watchdog check and feed
//! 2. Broker session upkeep and inbound frames
//! 3. Configuration intake
//! 4. Input sampling and switch reconciliation
//! 5. Telemetry
//!
//! # Example
//!
//! ```rust
//! use relay_bank::config::Config;
//! use relay_bank::commands::SwitchState;
//! use relay_bank::hal::{MockInputPins, MockMqtt, MockRelayPins, MockWatchdog};
//! use relay_bank::supervisor::Supervisor;
//!
//! let mut sup = Supervisor::boot(
//!     &Config::default(),
//!     MockRelayPins::new(),
//!     MockInputPins::new(),
//!     MockMqtt::new(),
//!     MockWatchdog::new(),
//!     0,
//! )
//! .unwrap();
//!
//! sup.transport_mut()
//!     .client_mut()
//!     .queue_message("esp32/switches", br#"{"switch":0,"state":"on"}"#);
//! sup.tick(20).unwrap();
//!
//! assert_eq!(sup.engine().state(0), Some(SwitchState::On));
//! ```

use core::fmt::Debug;

use thiserror::Error;

use crate::config::{Config, Configuration, ShortString, COMMAND_QUEUE_CAPACITY, WDT_TIMEOUT_MS};
use crate::engine::{SwitchEngine, TickReport};
use crate::error::{Error as FirmwareError, ErrorCounters};
use crate::messages::TelemetryEvent;
use crate::motion::MotionController;
use crate::queue::CommandQueue;
use crate::relay::RelayDriver;
use crate::sampler::InputSampler;
use crate::telemetry::{StatusView, TelemetryPublisher};
use crate::traits::{elapsed, InputPins, Millis, MqttClient, OutputPins, Watchdog};
use crate::transport::Transport;

/// Why a tick failed.
#[derive(Debug, Error)]
pub enum TickError<E: Debug> {
    /// A relay write failed.
    #[error("relay output error: {0:?}")]
    Output(E),
    /// The firmware must reset.
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
}

/// Owner of every component and the active configuration.
pub struct Supervisor<O: OutputPins, I: InputPins, C: MqttClient, W: Watchdog> {
    config: Configuration,
    device_id: ShortString,
    mqtt_enabled: bool,
    boot_at: Millis,
    last_feed_at: Millis,
    relays: RelayDriver<O>,
    inputs: I,
    sampler: InputSampler,
    motion: MotionController,
    engine: SwitchEngine,
    queue: CommandQueue<COMMAND_QUEUE_CAPACITY>,
    transport: Transport<C>,
    telemetry: TelemetryPublisher,
    counters: ErrorCounters,
    watchdog: W,
}

impl<O, I, C, W> Supervisor<O, I, C, W>
where
    O: OutputPins,
    I: InputPins,
    C: MqttClient,
    W: Watchdog,
{
    /// Bring the controller up.
    ///
    /// Every relay is driven OFF before anything else. An invalid initial
    /// switch configuration falls back to the defaults and is counted.
    ///
    /// # Errors
    ///
    /// Returns the output error if the relay pins cannot be set up.
    pub fn boot(
        config: &Config,
        outputs: O,
        mut inputs: I,
        client: C,
        mut watchdog: W,
        now: Millis,
    ) -> Result<Self, O::Error> {
        let mut counters = ErrorCounters::new();
        let switches = match config.switches.validate() {
            Ok(()) => config.switches.clone(),
            Err(err) => {
                log::error!("initial configuration rejected ({}), using defaults", err);
                counters.record(err.into());
                Configuration::default()
            }
        };

        let relays = RelayDriver::new(outputs, &switches)?;
        let mut sampler = InputSampler::new(&switches);
        sampler.configure(&switches, &mut inputs);
        sampler.prime(&mut inputs);
        watchdog.feed();

        let mut sup = Self {
            motion: MotionController::new(&switches.motion, now),
            engine: SwitchEngine::new(&switches),
            queue: CommandQueue::new(),
            transport: Transport::new(client, &config.mqtt, now),
            telemetry: TelemetryPublisher::new(now),
            config: switches,
            device_id: config.device.id.clone(),
            mqtt_enabled: config.mqtt.enabled,
            boot_at: now,
            last_feed_at: now,
            relays,
            inputs,
            sampler,
            counters,
            watchdog,
        };
        log::info!(
            "relay bank up: relays {:?}, motion {}",
            sup.config.relay_pins,
            if sup.config.motion.enabled { "on" } else { "off" }
        );

        if sup.mqtt_enabled && sup.transport.maintain(now, &mut sup.watchdog, &mut sup.counters) {
            sup.telemetry.session_started(now);
        }
        Ok(sup)
    }

    /// Run one loop iteration.
    ///
    /// # Errors
    ///
    /// - [`TickError::Firmware`] with [`FirmwareError::WatchdogStall`] when
    ///   the previous tick was too long ago. A reset has been requested.
    /// - [`TickError::Output`] when a relay write fails. The next tick
    ///   retries it.
    pub fn tick(&mut self, now: Millis) -> Result<TickReport, TickError<O::Error>> {
        let gap = elapsed(now, self.last_feed_at);
        if gap > WDT_TIMEOUT_MS {
            let err = FirmwareError::WatchdogStall { elapsed_ms: gap };
            log::error!("{}, resetting", err);
            self.counters.record(err);
            self.watchdog.reset();
            return Err(err.into());
        }
        self.feed(now);

        if self.mqtt_enabled {
            if self.transport.maintain(now, &mut self.watchdog, &mut self.counters) {
                self.telemetry.session_started(now);
            }
            let candidate = self.transport.poll_inbound(
                now,
                &self.config,
                &mut self.queue,
                &mut self.counters,
            );
            if let Some(candidate) = candidate {
                self.apply_config(candidate).map_err(TickError::Output)?;
            }
        }

        self.sampler.sample(now, &mut self.inputs);
        let report = self
            .engine
            .tick(now, &mut self.sampler, &mut self.queue, &mut self.motion, &mut self.relays)
            .map_err(TickError::Output)?;
        self.report_telemetry(&report, now);

        if self.mqtt_enabled {
            let view = StatusView {
                states: self.engine.states(),
                presence: self.motion.presence(),
                uptime_ms: self.uptime_ms(now),
                counters: self.counters,
                motion: &self.config.motion,
                device_id: self.device_id.as_str(),
            };
            let outcome = self
                .telemetry
                .publish(now, &view, &mut self.transport, &mut self.counters);
            if outcome.stale {
                self.transport.mark_stale(now);
            }
        }
        Ok(report)
    }

    fn feed(&mut self, now: Millis) {
        self.watchdog.feed();
        self.last_feed_at = now;
    }

    fn report_telemetry(&mut self, report: &TickReport, now: Millis) {
        let uptime_ms = self.uptime_ms(now);
        for &(switch, state) in &report.manual_toggles {
            let gpio = self.relays.pin(switch as usize).unwrap_or_default();
            self.telemetry.push_event(TelemetryEvent::ManualSwitch {
                switch,
                gpio,
                state: state.is_on(),
            });
        }
        for &switch in &report.auto_offs {
            self.telemetry
                .push_event(TelemetryEvent::MotionAutoOff { switch, uptime_ms });
        }
        if let Some(edge) = report.presence {
            self.telemetry.push_event(TelemetryEvent::Presence {
                presence: edge.present(),
                uptime_ms,
            });
        }
        if report.any_dirty() {
            self.telemetry.mark_dirty();
        }
    }

    /// Validate and adopt a merged configuration.
    ///
    /// An identical configuration is ignored. An invalid one is counted,
    /// reported as a `config-error` event, and the active configuration
    /// stays in place.
    ///
    /// # Errors
    ///
    /// Returns the output error if rewriting the relays fails. The
    /// configuration is adopted regardless and the relay driver finishes
    /// the change on a later tick.
    pub fn apply_config(&mut self, candidate: Configuration) -> Result<(), O::Error> {
        if candidate == self.config {
            log::debug!("configuration unchanged");
            return Ok(());
        }
        if let Err(err) = candidate.validate() {
            log::warn!("configuration rejected: {}", err);
            self.counters.record(err.into());
            self.telemetry
                .push_event(TelemetryEvent::ConfigError { reason: err.kind() });
            return Ok(());
        }

        let previous = core::mem::replace(&mut self.config, candidate);
        self.sampler
            .reconfigure(&previous, &self.config, &mut self.inputs);
        self.engine.update_pins(&self.config);
        self.engine.cancel_motion_deadlines();
        self.motion.reinit(&self.config.motion);
        self.telemetry.mark_dirty();
        log::info!("configuration applied");

        // Outputs last; a failed write stays pending in the driver and is
        // retried by the next sync
        let states = self.engine.states();
        self.relays.reconfigure(&self.config, &states)
    }

    /// Milliseconds since boot.
    pub fn uptime_ms(&self, now: Millis) -> Millis {
        elapsed(now, self.boot_at)
    }

    /// Active configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The switch state machines.
    pub fn engine(&self) -> &SwitchEngine {
        &self.engine
    }

    /// Relay driver.
    pub fn relays(&self) -> &RelayDriver<O> {
        &self.relays
    }

    /// Mutable relay driver, for simulators and tests.
    pub fn relays_mut(&mut self) -> &mut RelayDriver<O> {
        &mut self.relays
    }

    /// Input pins, for simulators and tests.
    pub fn inputs_mut(&mut self) -> &mut I {
        &mut self.inputs
    }

    /// Motion presence tracking.
    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    /// Broker session.
    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    /// Broker session, mutable.
    pub fn transport_mut(&mut self) -> &mut Transport<C> {
        &mut self.transport
    }

    /// Telemetry scheduler.
    pub fn telemetry(&self) -> &TelemetryPublisher {
        &self.telemetry
    }

    /// Error totals.
    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    /// Pending remote commands.
    pub fn queue(&self) -> &CommandQueue<COMMAND_QUEUE_CAPACITY> {
        &self.queue
    }

    /// The watchdog.
    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SwitchState;
    use crate::config::{ConfigError, FusionMode, MqttConfig};
    use crate::hal::{MockInputPins, MockMqtt, MockRelayPins, MockWatchdog};

    type Sup = Supervisor<MockRelayPins, MockInputPins, MockMqtt, MockWatchdog>;

    fn boot(config: Config) -> Sup {
        Supervisor::boot(
            &config,
            MockRelayPins::new(),
            MockInputPins::new(),
            MockMqtt::new(),
            MockWatchdog::new(),
            0,
        )
        .unwrap()
    }

    fn send_config(sup: &mut Sup, json: &str) {
        sup.transport_mut()
            .client_mut()
            .queue_message("esp32/config", json.as_bytes());
    }

    // =========================================================================
    // Boot Tests
    // =========================================================================

    #[test]
    fn boot_drives_relays_off_and_connects() {
        let sup = boot(Config::default());
        for pin in sup.config().relay_pins {
            assert_eq!(sup.relays().pins().level(pin), Some(true));
        }
        assert!(sup.transport().is_connected());
        assert!(sup.telemetry().is_dirty());
        assert!(sup.watchdog().feeds >= 1);
    }

    #[test]
    fn boot_with_invalid_config_uses_defaults() {
        let bad = Configuration::default().with_relay_pins([16, 16, 18, 19, 21, 22]);
        let sup = boot(Config::default().with_switches(bad));
        assert_eq!(sup.config(), &Configuration::default());
        assert_eq!(sup.counters().config_rejected, 1);
    }

    #[test]
    fn boot_without_mqtt_stays_offline() {
        let sup = boot(Config::default().with_mqtt(MqttConfig::default().with_enabled(false)));
        assert_eq!(sup.transport().client().connect_calls, 0);
    }

    // =========================================================================
    // Watchdog Tests
    // =========================================================================

    #[test]
    fn tick_feeds_watchdog() {
        let mut sup = boot(Config::default());
        let before = sup.watchdog().feeds;
        sup.tick(50).unwrap();
        assert!(sup.watchdog().feeds > before);
        assert_eq!(sup.watchdog().resets, 0);
    }

    #[test]
    fn stall_requests_reset() {
        let mut sup = boot(Config::default());
        sup.tick(50).unwrap();
        let err = sup.tick(50 + WDT_TIMEOUT_MS + 1).unwrap_err();
        assert!(matches!(
            err,
            TickError::Firmware(FirmwareError::WatchdogStall { elapsed_ms: 15_001 })
        ));
        assert_eq!(sup.watchdog().resets, 1);
        assert_eq!(sup.counters().last_error_kind(), "watchdog-stall");
    }

    #[test]
    fn gap_at_timeout_is_tolerated() {
        let mut sup = boot(Config::default());
        sup.tick(WDT_TIMEOUT_MS).unwrap();
        assert_eq!(sup.watchdog().resets, 0);
    }

    // =========================================================================
    // Config Intake Tests
    // =========================================================================

    #[test]
    fn config_applied_and_motion_reinitialized() {
        let mut sup = boot(Config::default());
        send_config(&mut sup, r#"{"motionEnabled":true,"fusion":"or","autoOffSec":60}"#);
        sup.tick(50).unwrap();

        assert!(sup.config().motion.enabled);
        assert_eq!(sup.config().motion.fusion, FusionMode::Or);
        assert!(sup.motion().enabled());
        assert_eq!(sup.motion().auto_off_ms(), 60_000);
    }

    #[test]
    fn invalid_config_kept_out() {
        let mut sup = boot(Config::default());
        send_config(&mut sup, r#"{"primaryPin":16}"#);
        sup.tick(50).unwrap();

        assert_eq!(sup.config(), &Configuration::default());
        assert_eq!(sup.counters().config_rejected, 1);
        assert_eq!(
            sup.counters().last_error,
            Some(FirmwareError::ConfigInvalid(ConfigError::DuplicatePin(16)))
        );
        let events = sup.transport().client().payloads_to("esp32/telemetry");
        assert!(events
            .iter()
            .any(|e| e == r#"{"type":"config-error","reason":"duplicate-pin"}"#));
    }

    #[test]
    fn identical_config_is_noop() {
        let mut sup = boot(Config::default());
        sup.tick(50).unwrap();
        let writes = sup.relays().pins().write_count;
        send_config(&mut sup, r#"{"motionEnabled":false}"#);
        sup.tick(100).unwrap();
        assert_eq!(sup.relays().pins().write_count, writes);
        assert_eq!(sup.counters().config_rejected, 0);
    }

    #[test]
    fn relay_remap_moves_outputs() {
        let mut sup = boot(Config::default());
        sup.transport_mut()
            .client_mut()
            .queue_message("esp32/switches", br#"{"switch":0,"state":"on"}"#);
        sup.tick(50).unwrap();

        send_config(&mut sup, r#"{"relayPins":[4,17,18,19,21,22]}"#);
        sup.tick(100).unwrap();
        assert!(sup.relays().pins().is_output(4));
        assert_eq!(sup.relays().pins().level(4), Some(false));
        assert_eq!(sup.engine().switches()[0].relay_pin(), 4);
        assert_eq!(sup.engine().state(0), Some(SwitchState::On));
    }

    #[test]
    fn failed_relay_remap_still_applies_everywhere() {
        let mut sup = boot(Config::default());
        sup.transport_mut()
            .client_mut()
            .queue_message("esp32/switches", br#"{"switch":0,"state":"on"}"#);
        sup.tick(50).unwrap();

        sup.relays_mut().pins_mut().fail_writes = true;
        send_config(
            &mut sup,
            r#"{"relayPins":[4,17,18,19,21,22],"motionEnabled":true}"#,
        );
        assert!(matches!(sup.tick(100), Err(TickError::Output(()))));

        assert_eq!(sup.config().relay_pins[0], 4);
        assert!(sup.config().motion.enabled);
        assert_eq!(sup.engine().switches()[0].relay_pin(), 4);
        assert!(sup.motion().enabled());
        assert!(sup.relays().reconfigure_pending());

        // Redelivered retained config changes nothing; the driver catches up
        sup.relays_mut().pins_mut().fail_writes = false;
        send_config(
            &mut sup,
            r#"{"relayPins":[4,17,18,19,21,22],"motionEnabled":true}"#,
        );
        sup.tick(150).unwrap();
        assert!(!sup.relays().reconfigure_pending());
        assert!(sup.relays().pins().is_output(4));
        assert_eq!(sup.relays().pins().level(4), Some(false));
        // Old relay pin released in the OFF position
        assert_eq!(sup.relays().pins().level(16), Some(true));
    }

    // =========================================================================
    // Telemetry Tests
    // =========================================================================

    #[test]
    fn manual_toggle_reported() {
        let mut sup = boot(Config::default());
        sup.inputs_mut().set_level(25, false);
        for t in [50, 100, 150] {
            sup.tick(t).unwrap();
        }
        let events = sup.transport().client().payloads_to("esp32/telemetry");
        assert!(events
            .iter()
            .any(|e| e == r#"{"type":"manual_switch","switch":0,"gpio":16,"state":true}"#));
        let states = sup.transport().client().payloads_to("esp32/state");
        assert!(states.last().unwrap().starts_with(r#"{"switches":[true,"#));
    }
}
