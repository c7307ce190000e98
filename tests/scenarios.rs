//! End-to-end scenarios driving the full supervisor loop over mock hardware

use pretty_assertions::assert_eq;
use relay_bank::{
    hal::{MockInputPins, MockMqtt, MockRelayPins, MockWatchdog},
    Config, Configuration, FusionMode, InputPins, Millis, Supervisor, SwitchMode, SwitchState,
    TickReport,
};

type Sup = Supervisor<MockRelayPins, MockInputPins, MockMqtt, MockWatchdog>;

const TICK: Millis = 20;
const PRIMARY: u8 = 34;
const SECONDARY: u8 = 35;

/// A booted controller plus a wrapping clock.
struct Sim {
    sup: Sup,
    boot_at: Millis,
    now: Millis,
}

impl Sim {
    fn boot(config: Config) -> Self {
        Self::boot_at(config, 0)
    }

    fn boot_at(config: Config, start: Millis) -> Self {
        let sup = Supervisor::boot(
            &config,
            MockRelayPins::new(),
            MockInputPins::new(),
            MockMqtt::new(),
            MockWatchdog::new(),
            start,
        )
        .unwrap();
        Self {
            sup,
            boot_at: start,
            now: start,
        }
    }

    fn since_boot(&self) -> Millis {
        self.now.wrapping_sub(self.boot_at)
    }

    /// Tick every 20 ms for `ms` milliseconds.
    fn advance(&mut self, ms: Millis) -> Vec<TickReport> {
        (0..ms / TICK)
            .map(|_| {
                self.now = self.now.wrapping_add(TICK);
                self.sup.tick(self.now).unwrap()
            })
            .collect()
    }

    /// Tick until `ms` after boot.
    fn advance_to(&mut self, ms: Millis) -> Vec<TickReport> {
        let remaining = ms.saturating_sub(self.since_boot());
        self.advance(remaining)
    }

    fn mqtt(&mut self) -> &mut MockMqtt {
        self.sup.transport_mut().client_mut()
    }

    fn remote(&mut self, json: &str) {
        self.mqtt().queue_message("esp32/switches", json.as_bytes());
    }

    fn send_config(&mut self, json: &str) {
        self.mqtt().queue_message("esp32/config", json.as_bytes());
    }

    fn flip_manual(&mut self, index: usize) {
        let pin = self.sup.config().manual_pins[index];
        let inputs = self.sup.inputs_mut();
        let level = inputs.is_high(pin);
        inputs.set_level(pin, !level);
    }

    fn set_motion(&mut self, primary: bool, secondary: bool) {
        self.sup.inputs_mut().set_level(PRIMARY, primary);
        self.sup.inputs_mut().set_level(SECONDARY, secondary);
    }

    fn state(&self, index: usize) -> SwitchState {
        self.sup.engine().state(index).unwrap()
    }

    fn mode(&self, index: usize) -> SwitchMode {
        self.sup.engine().switches()[index].mode()
    }

    fn relay_level(&self, index: usize) -> Option<bool> {
        let pin = self.sup.config().relay_pins[index];
        self.sup.relays().pins().level(pin)
    }

    fn telemetry(&self) -> Vec<String> {
        self.sup
            .transport()
            .client()
            .payloads_to("esp32/telemetry")
    }

    fn states_published(&self) -> Vec<String> {
        self.sup.transport().client().payloads_to("esp32/state")
    }
}

fn motion_config(fusion: FusionMode, auto_off_sec: u32) -> Config {
    Config::default().with_switches(
        Configuration::default()
            .with_motion_enabled(true)
            .with_fusion(fusion)
            .with_auto_off_sec(auto_off_sec),
    )
}

// ============================================================================
// Remote and Manual
// ============================================================================

#[test]
fn remote_on_then_manual_off() {
    let mut sim = Sim::boot(Config::default());

    sim.remote(r#"{"switch":0,"state":"on"}"#);
    let reports = sim.advance(TICK);
    assert!(reports[0].is_dirty(0));
    assert_eq!(sim.state(0), SwitchState::On);
    assert_eq!(sim.mode(0), SwitchMode::OnRemote);
    // Active-low relay board
    assert_eq!(sim.relay_level(0), Some(false));

    sim.flip_manual(0);
    sim.advance(300);
    assert_eq!(sim.state(0), SwitchState::Off);
    assert_eq!(sim.mode(0), SwitchMode::OffIdle);
    assert!(!sim.sup.engine().switches()[0].remote_override());
    assert_eq!(sim.relay_level(0), Some(true));

    assert!(sim
        .telemetry()
        .contains(&r#"{"type":"manual_switch","switch":0,"gpio":16,"state":false}"#.to_string()));
}

#[test]
fn gpio_addressed_command_with_bool_state() {
    let mut sim = Sim::boot(Config::default());
    sim.remote(r#"{"gpio":19,"state":true}"#);
    sim.advance(TICK);
    assert_eq!(sim.state(3), SwitchState::On);

    sim.remote(r#"{"gpio":19,"state":false}"#);
    sim.advance(TICK);
    assert_eq!(sim.state(3), SwitchState::Off);
}

#[test]
fn broadcast_then_snapshot() {
    let mut sim = Sim::boot(Config::default());
    sim.advance(TICK);
    sim.mqtt().clear_published();

    sim.remote(r#"{"switch":"all","state":"on"}"#);
    sim.advance(TICK);

    let uptime = sim.since_boot();
    assert_eq!(
        sim.states_published().last().cloned(),
        Some(format!(
            r#"{{"switches":[true,true,true,true,true,true],"presence":false,"uptimeMs":{}}}"#,
            uptime
        ))
    );
}

#[test]
fn remote_on_is_idempotent() {
    let mut sim = Sim::boot(Config::default());
    sim.remote(r#"{"switch":2,"state":"on"}"#);
    sim.advance(TICK);
    let writes = sim.sup.relays().pins().write_count;

    sim.remote(r#"{"switch":2,"state":"on"}"#);
    let reports = sim.advance(TICK);
    assert_eq!(reports[0].commands_applied, 1);
    assert!(!reports[0].any_dirty());
    assert_eq!(sim.sup.relays().pins().write_count, writes);
    assert_eq!(sim.mode(2), SwitchMode::OnRemote);
}

#[test]
fn even_number_of_manual_toggles_restores_state() {
    let mut sim = Sim::boot(Config::default());
    sim.advance(100);

    for index in 0..6 {
        for _ in 0..4 {
            sim.flip_manual(index);
            sim.advance(300);
        }
        assert_eq!(sim.state(index), SwitchState::Off, "switch {}", index);
    }
    assert_eq!(sim.sup.engine().states(), [SwitchState::Off; 6]);
}

#[test]
fn manual_edge_latency_under_150ms_at_loop_rate() {
    let mut sim = Sim::boot(Config::default());
    sim.advance(200);

    // Edges land at every offset against the 50 ms sample grid
    let mut worst = 0;
    for round in 0..10 {
        let before = sim.state(0);
        sim.flip_manual(0);
        let edge_at = sim.now;
        while sim.state(0) == before {
            sim.advance(TICK);
            let latency = sim.now.wrapping_sub(edge_at);
            assert!(latency < 150, "round {round}: no toggle after {latency} ms");
        }
        worst = worst.max(sim.now.wrapping_sub(edge_at));
        sim.advance(TICK * (5 + round % 3));
    }
    assert!(worst <= 120, "worst latency {worst} ms");
}

// ============================================================================
// Authentication and Queueing
// ============================================================================

#[test]
fn unauthenticated_command_rejected() {
    let config =
        Config::default().with_switches(Configuration::default().with_device_secret("s3cret"));
    let mut sim = Sim::boot(config);

    sim.remote(r#"{"switch":1,"state":"on"}"#);
    sim.remote(r#"{"switch":1,"state":"on","secret":"wrong"}"#);
    sim.advance(TICK);
    assert_eq!(sim.state(1), SwitchState::Off);
    assert_eq!(sim.sup.counters().auth_rejected, 2);

    sim.remote(r#"{"switch":1,"state":"on","secret":"s3cret"}"#);
    sim.advance(TICK);
    assert_eq!(sim.state(1), SwitchState::On);
    assert_eq!(sim.sup.counters().auth_rejected, 2);
}

#[test]
fn queue_overflow_keeps_newest_sixteen_in_order() {
    let mut sim = Sim::boot(Config::default());

    // Oldest four get evicted
    for _ in 0..4 {
        sim.remote(r#"{"switch":5,"state":"on"}"#);
    }
    for _ in 0..13 {
        sim.remote(r#"{"switch":2,"state":"toggle"}"#);
    }
    sim.remote(r#"{"switch":4,"state":"on"}"#);
    sim.remote(r#"{"switch":4,"state":"off"}"#);
    sim.remote(r#"{"switch":3,"state":"on"}"#);

    let reports = sim.advance(TICK);
    assert_eq!(reports[0].commands_applied, 16);
    assert_eq!(sim.sup.counters().queue_drops, 4);
    assert_eq!(
        sim.sup.engine().states(),
        [
            SwitchState::Off,
            SwitchState::Off,
            SwitchState::On,
            SwitchState::On,
            SwitchState::Off,
            SwitchState::Off,
        ]
    );
}

#[test]
fn malformed_frames_counted_and_ignored() {
    let mut sim = Sim::boot(Config::default());
    sim.remote("not json");
    sim.remote(r#"{"switch":9,"state":"on"}"#);
    sim.remote(r#"{"switch":0,"state":"dim"}"#);
    sim.advance(TICK);

    assert_eq!(sim.sup.counters().malformed, 3);
    assert_eq!(sim.sup.engine().states(), [SwitchState::Off; 6]);
}

// ============================================================================
// Motion
// ============================================================================

#[test]
fn boot_grace_blocks_motion() {
    let mut sim = Sim::boot(motion_config(FusionMode::Or, 2));
    sim.advance_to(4900);
    assert_eq!(sim.sup.motion().presence_known(), None);
    assert!(sim.sup.engine().switches().iter().all(|s| s.mode() == SwitchMode::OffCooldown));

    sim.advance_to(5100);
    assert_eq!(sim.sup.motion().presence_known(), Some(false));
    assert!(sim.sup.engine().switches().iter().all(|s| s.mode() == SwitchMode::OffIdle));
}

#[test]
fn motion_auto_off_after_presence_lost() {
    let mut sim = Sim::boot(motion_config(FusionMode::Or, 2));
    sim.advance_to(5980);

    sim.remote(r#"{"switch":0,"state":"on"}"#);
    sim.advance(TICK);
    assert_eq!(sim.mode(0), SwitchMode::OnAutoArmed);

    sim.advance_to(7900);
    assert_eq!(sim.state(0), SwitchState::On);

    let reports = sim.advance_to(8100);
    assert!(reports.iter().any(|r| r.auto_offs.as_slice() == [0]));
    assert_eq!(sim.state(0), SwitchState::Off);
    assert_eq!(sim.mode(0), SwitchMode::OffIdle);
    assert!(sim
        .telemetry()
        .iter()
        .any(|t| t.starts_with(r#"{"type":"motion-auto-off","switch":0,"#)));
}

#[test]
fn presence_regained_disarms_and_loss_rearms() {
    let mut sim = Sim::boot(motion_config(FusionMode::Or, 2));
    sim.advance_to(5980);
    sim.remote(r#"{"switch":1,"state":"on"}"#);
    sim.advance(TICK);
    assert_eq!(sim.mode(1), SwitchMode::OnAutoArmed);

    sim.advance_to(6500);
    sim.set_motion(true, false);
    let reports = sim.advance_to(6800);
    assert!(reports.iter().any(|r| r.presence.is_some_and(|e| e.present())));
    assert_eq!(sim.mode(1), SwitchMode::OnRemote);
    assert!(sim.sup.engine().switches()[1].auto_off().is_none());

    // Well past the original deadline
    sim.advance_to(9000);
    assert_eq!(sim.state(1), SwitchState::On);

    sim.set_motion(false, false);
    sim.advance_to(9300);
    assert_eq!(sim.mode(1), SwitchMode::OnAutoArmed);
    sim.advance_to(11_500);
    assert_eq!(sim.state(1), SwitchState::Off);
}

#[test]
fn manual_on_is_never_auto_armed() {
    let mut sim = Sim::boot(motion_config(FusionMode::Or, 1));
    sim.advance_to(5200);

    sim.flip_manual(4);
    sim.advance(300);
    assert_eq!(sim.mode(4), SwitchMode::OnManual);

    sim.advance_to(20_000);
    assert_eq!(sim.state(4), SwitchState::On);
    assert_eq!(sim.mode(4), SwitchMode::OnManual);
}

#[test]
fn and_fusion_needs_both_sensors() {
    let mut sim = Sim::boot(motion_config(FusionMode::And, 2));
    sim.advance_to(5980);
    sim.remote(r#"{"switch":0,"state":"on"}"#);
    sim.advance(TICK);

    // One sensor alone does not count as presence
    sim.set_motion(true, false);
    sim.advance_to(8100);
    assert_eq!(sim.sup.motion().presence_known(), Some(false));
    assert_eq!(sim.state(0), SwitchState::Off);

    sim.set_motion(true, true);
    sim.advance_to(8400);
    assert!(sim.sup.motion().presence());

    sim.remote(r#"{"switch":0,"state":"on"}"#);
    sim.advance(TICK);
    assert_eq!(sim.mode(0), SwitchMode::OnRemote);
    sim.advance_to(12_000);
    assert_eq!(sim.state(0), SwitchState::On);

    // Primary drops out: presence is lost after one debounce window
    sim.set_motion(false, true);
    let reports = sim.advance_to(12_200);
    assert!(reports.iter().any(|r| r.presence.is_some_and(|e| !e.present())));
    assert_eq!(sim.sup.motion().presence_known(), Some(false));
    assert_eq!(sim.mode(0), SwitchMode::OnAutoArmed);

    sim.advance_to(13_900);
    assert_eq!(sim.state(0), SwitchState::On);
    let reports = sim.advance_to(14_300);
    assert!(reports.iter().any(|r| r.auto_offs.as_slice() == [0]));
    assert_eq!(sim.state(0), SwitchState::Off);
}

#[test]
fn remote_on_during_grace_arms_when_grace_closes() {
    let mut sim = Sim::boot(motion_config(FusionMode::Or, 2));
    sim.advance_to(1000);
    sim.remote(r#"{"switch":5,"state":"on"}"#);
    sim.advance(TICK);
    assert_eq!(sim.mode(5), SwitchMode::OnRemote);

    sim.advance_to(5100);
    assert_eq!(sim.mode(5), SwitchMode::OnAutoArmed);
    sim.advance_to(6900);
    assert_eq!(sim.state(5), SwitchState::On);
    sim.advance_to(7100);
    assert_eq!(sim.state(5), SwitchState::Off);
}

#[test]
fn deadlines_survive_clock_wrap() {
    // Counter wraps three seconds after boot
    let start = u32::MAX - 2_999;
    let mut sim = Sim::boot_at(motion_config(FusionMode::Or, 2), start);

    sim.advance_to(4900);
    assert!(!sim.sup.motion().grace_over());
    sim.advance_to(5980);
    assert!(sim.sup.motion().grace_over());

    sim.remote(r#"{"switch":0,"state":"on"}"#);
    sim.advance(TICK);
    sim.advance_to(7900);
    assert_eq!(sim.state(0), SwitchState::On);
    sim.advance_to(8100);
    assert_eq!(sim.state(0), SwitchState::Off);
    assert_eq!(sim.sup.watchdog().resets, 0);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn config_enables_motion_at_runtime() {
    let mut sim = Sim::boot(Config::default());
    sim.advance_to(6000);
    sim.remote(r#"{"switch":0,"state":"on"}"#);
    sim.advance(TICK);
    assert_eq!(sim.mode(0), SwitchMode::OnRemote);

    sim.send_config(r#"{"motionEnabled":true,"fusion":"or","autoOffSec":1}"#);
    sim.advance(TICK);
    assert!(sim.sup.config().motion.enabled);
    assert_eq!(sim.sup.config().motion.fusion, FusionMode::Or);

    // Settling edge after the reinit arms the remote switch
    sim.advance(TICK);
    assert_eq!(sim.mode(0), SwitchMode::OnAutoArmed);
    sim.advance(1_100);
    assert_eq!(sim.state(0), SwitchState::Off);
}

#[test]
fn invalid_config_rejected_and_reported() {
    let mut sim = Sim::boot(Config::default());
    sim.advance(TICK);

    sim.send_config(r#"{"relayPins":[36,17,18,19,21,22]}"#);
    sim.advance(TICK);
    sim.advance(TICK);

    assert_eq!(sim.sup.config(), &Configuration::default());
    assert_eq!(sim.sup.counters().config_rejected, 1);
    assert!(sim
        .telemetry()
        .contains(&r#"{"type":"config-error","reason":"pin-not-output"}"#.to_string()));
}

#[test]
fn polarity_change_rewrites_relays() {
    let mut sim = Sim::boot(Config::default());
    sim.remote(r#"{"switch":0,"state":"on"}"#);
    sim.advance(TICK);
    assert_eq!(sim.relay_level(0), Some(false));
    assert_eq!(sim.relay_level(1), Some(true));

    sim.send_config(r#"{"relayActiveHigh":true}"#);
    sim.advance(TICK);
    assert_eq!(sim.relay_level(0), Some(true));
    assert_eq!(sim.relay_level(1), Some(false));
    assert_eq!(sim.state(0), SwitchState::On);
}

// ============================================================================
// Broker Loss
// ============================================================================

#[test]
fn manual_works_offline_and_reconnect_republishes() {
    let mut sim = Sim::boot(Config::default());
    assert_eq!(
        sim.mqtt().will,
        Some((
            "esp32/status".to_string(),
            b"offline".to_vec(),
            relay_bank::QoS::AtLeastOnce,
            true
        ))
    );
    sim.advance_to(100);

    sim.mqtt().drop_session();
    sim.mqtt().fail_connect = true;
    sim.advance(TICK);
    assert!(!sim.sup.transport().is_connected());

    sim.flip_manual(0);
    sim.advance(400);
    assert_eq!(sim.state(0), SwitchState::On);

    sim.mqtt().clear_published();
    sim.mqtt().fail_connect = false;
    sim.advance(1_500);

    assert!(sim.sup.transport().is_connected());
    assert_eq!(sim.sup.counters().reconnects, 1);
    assert!(sim.sup.counters().transport_failures >= 1);
    assert_eq!(sim.mqtt().payloads_to("esp32/status"), vec!["online".to_string()]);
    assert!(sim.states_published()[0]
        .starts_with(r#"{"switches":[true,false,false,false,false,false],"presence":false"#));
    // Event raised while offline is delivered after the reconnect
    assert!(sim
        .telemetry()
        .contains(&r#"{"type":"manual_switch","switch":0,"gpio":16,"state":true}"#.to_string()));
}
