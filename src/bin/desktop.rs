//! Desktop simulator for the relay controller.
//!
//! Runs the full firmware loop against mock pins and a real MQTT broker, so
//! a backend can be developed without hardware. Wall switches and motion
//! sensors are driven from stdin:
//!
//! ```text
//! manual 3     flip wall switch 3
//! motion 1     both motion sensors see movement (0 = room empty)
//! status       print switch modes
//! ```
//!
//! # Usage
//!
//! ```sh
//! MQTT_HOST=192.168.1.10 DEVICE_SECRET=changeme RUST_LOG=info \
//!     cargo run --bin desktop --features mqtt
//! ```
//!
//! Environment: `MQTT_HOST`, `MQTT_PORT`, `MQTT_PREFIX`, `MQTT_USER`,
//! `MQTT_PASSWORD`, `DEVICE_SECRET`, `MOTION_ENABLED`, `TICK_MS`.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use relay_bank::hal::{MockInputPins, MockRelayPins, MockWatchdog};
use relay_bank::services::RumqttcClient;
use relay_bank::traits::{Clock, InputPins};
use relay_bank::{
    Config, Configuration, DeviceConfig, Millis, MqttConfig, Supervisor, TickError,
};

type DesktopSupervisor = Supervisor<MockRelayPins, MockInputPins, RumqttcClient, MockWatchdog>;

/// Wall-clock milliseconds since the simulator started, wrapping like the
/// hardware counter.
struct StdClock(Instant);

impl Clock for StdClock {
    fn now_ms(&self) -> Millis {
        self.0.elapsed().as_millis() as Millis
    }
}

enum Console {
    Manual(usize),
    Motion(bool),
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config_from_env()?;
    let tick = Duration::from_millis(env_or("TICK_MS", 20));

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let client = RumqttcClient::new(&config.mqtt, runtime.handle().clone());

    tracing::info!(
        "relay bank simulator: broker {}:{}, prefix {}",
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.topic_prefix
    );
    tracing::info!("stdin: `manual N`, `motion 0|1`, `status`");

    let clock = StdClock(Instant::now());
    let mut sup = Supervisor::boot(
        &config,
        MockRelayPins::new(),
        MockInputPins::new(),
        client,
        MockWatchdog::new(),
        clock.now_ms(),
    )
    .map_err(|e| anyhow::anyhow!("relay setup failed: {e:?}"))?;

    let console = spawn_console();
    loop {
        loop {
            match console.try_recv() {
                Ok(cmd) => handle_console(&mut sup, cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }

        match sup.tick(clock.now_ms()) {
            Ok(report) => {
                for (switch, state) in &report.manual_toggles {
                    tracing::info!("switch {} -> {} (manual)", switch, state.as_str());
                }
                for switch in &report.auto_offs {
                    tracing::info!("switch {} -> off (motion)", switch);
                }
            }
            Err(TickError::Output(e)) => tracing::error!("relay write failed: {:?}", e),
            Err(TickError::Firmware(e)) => bail!("firmware reset: {e}"),
        }
        std::thread::sleep(tick);
    }
}

fn config_from_env() -> anyhow::Result<Config> {
    let mut mqtt = MqttConfig::default()
        .with_host(&env_string("MQTT_HOST", "localhost"))
        .with_port(env_or("MQTT_PORT", 1883))
        .with_topic_prefix(&env_string("MQTT_PREFIX", "esp32"))
        .with_client_id("relay-bank-desktop");
    if let Ok(user) = std::env::var("MQTT_USER") {
        mqtt = mqtt.with_auth(&user, &env_string("MQTT_PASSWORD", ""));
    }

    let switches = Configuration::default()
        .with_device_secret(&env_string("DEVICE_SECRET", ""))
        .with_motion_enabled(env_or("MOTION_ENABLED", 0u8) != 0);
    switches
        .validate()
        .context("invalid switch configuration")?;

    Ok(Config::default()
        .with_mqtt(mqtt)
        .with_device(DeviceConfig::default().with_name("desktop").with_id("desktop-sim"))
        .with_switches(switches))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn spawn_console() -> Receiver<Console> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_console(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command: {}", line.trim()),
            }
        }
    });
    rx
}

fn parse_console(line: &str) -> Option<Console> {
    let mut words = line.split_whitespace();
    match (words.next()?, words.next()) {
        ("manual", Some(n)) => n.parse().ok().map(Console::Manual),
        ("motion", Some("1" | "on")) => Some(Console::Motion(true)),
        ("motion", Some("0" | "off")) => Some(Console::Motion(false)),
        ("status", None) => Some(Console::Status),
        _ => None,
    }
}

fn handle_console(sup: &mut DesktopSupervisor, cmd: Console) {
    match cmd {
        Console::Manual(index) => {
            let Some(&pin) = sup.config().manual_pins.get(index) else {
                eprintln!("no switch {}", index);
                return;
            };
            let inputs = sup.inputs_mut();
            let level = inputs.is_high(pin);
            inputs.set_level(pin, !level);
        }
        Console::Motion(present) => {
            let pins: Vec<u8> = sup.config().motion_pins().collect();
            for pin in pins {
                sup.inputs_mut().set_level(pin, present);
            }
        }
        Console::Status => {
            for sw in sup.engine().switches() {
                println!(
                    "switch {} gpio {:>2}: {:<14} {}",
                    sw.index(),
                    sw.relay_pin(),
                    sw.mode().as_str(),
                    sw.state().as_str()
                );
            }
            println!(
                "presence: {:?}, broker: {:?}",
                sup.motion().presence(),
                sup.transport().state()
            );
        }
    }
}
