//! Switch reconciliation engine.
//!
//! Each of the six switches runs a small state machine fed by three
//! independent sources:
//!
//! 1. **Manual** - debounced wall switch edges from the [`InputSampler`]
//! 2. **Remote** - commands from the broker, via the [`CommandQueue`]
//! 3. **Motion** - presence edges and auto-off deadlines from the
//!    [`MotionController`]
//!
//! [`SwitchEngine::tick`] folds everything that arrived since the previous
//! tick into one deterministic logical state per switch and brings the
//! relays in line with it.
//!
//! # State Machine
//!
//! ```text
//!                  remote ON                presence lost
//!   OFF_IDLE ───────────────────► ON_REMOTE ─────────────► ON_AUTOARMED
//!      ▲  ▲                          │  ▲                     │    │
//!      │  │        remote OFF        │  │  presence gained    │    │
//!      │  └──────────────────────────┘  └─────────────────────┘    │
//!      │                      deadline reached                     │
//!      └───────────────────────────────────────────────────────────┘
//! ```
//!
//! A manual edge from any state toggles: OFF states go to `ON_MANUAL`, ON
//! states go to `OFF_IDLE`. Every switch boots in `OFF_COOLDOWN`, which
//! behaves as OFF and is promoted to `OFF_IDLE` once the motion grace window
//! has closed.
//!
//! # Tick Order
//!
//! Manual edges are resolved first, against the state before the tick.
//! Remote commands are applied next, then the manual results are committed
//! on top so that a wall switch always wins over a concurrent remote
//! command. Motion and deadlines follow.
//!
//! # Example
//!
//! ```rust
//! use relay_bank::engine::{SwitchEngine, SwitchMode};
//! use relay_bank::commands::{Command, Desired, SwitchState, Target};
//! use relay_bank::config::Configuration;
//! use relay_bank::hal::{MockInputPins, MockRelayPins};
//! use relay_bank::motion::MotionController;
//! use relay_bank::queue::CommandQueue;
//! use relay_bank::relay::RelayDriver;
//! use relay_bank::sampler::InputSampler;
//!
//! let config = Configuration::default();
//! let mut inputs = MockInputPins::new();
//! let mut sampler = InputSampler::new(&config);
//! sampler.configure(&config, &mut inputs);
//! sampler.prime(&mut inputs);
//! let mut relays = RelayDriver::new(MockRelayPins::new(), &config).unwrap();
//! let mut motion = MotionController::new(&config.motion, 0);
//! let mut queue: CommandQueue<16> = CommandQueue::new();
//! let mut engine = SwitchEngine::new(&config);
//!
//! assert!(queue.offer(Command::remote(Target::Switch(0), Desired::On, 10)));
//! let report = engine
//!     .tick(10, &mut sampler, &mut queue, &mut motion, &mut relays)
//!     .unwrap();
//!
//! assert!(report.is_dirty(0));
//! assert_eq!(engine.state(0), Some(SwitchState::On));
//! assert_eq!(engine.switches()[0].mode(), SwitchMode::OnRemote);
//! ```

use heapless::Vec;

use crate::commands::{Command, CommandSource, Desired, SwitchState};
use crate::config::{Configuration, NUM_SWITCHES};
use crate::motion::{MotionController, PresenceEdge};
use crate::queue::CommandQueue;
use crate::relay::RelayDriver;
use crate::sampler::{Channel, InputSampler};
use crate::traits::{has_elapsed, Millis, OutputPins};

// ============================================================================
// Switch State
// ============================================================================

/// State of one switch's state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SwitchMode {
    /// Off, nothing pending.
    OffIdle,
    /// On because of a remote command; no auto-off armed.
    OnRemote,
    /// On because of the wall switch; motion never turns it off.
    OnManual,
    /// On with an auto-off deadline running.
    OnAutoArmed,
    /// Off, waiting for the boot grace window to close.
    #[default]
    OffCooldown,
}

impl SwitchMode {
    /// Logical relay state in this mode.
    pub const fn state(self) -> SwitchState {
        match self {
            SwitchMode::OnRemote | SwitchMode::OnManual | SwitchMode::OnAutoArmed => {
                SwitchState::On
            }
            SwitchMode::OffIdle | SwitchMode::OffCooldown => SwitchState::Off,
        }
    }

    /// Returns the mode name for logging.
    pub const fn as_str(self) -> &'static str {
        match self {
            SwitchMode::OffIdle => "off-idle",
            SwitchMode::OnRemote => "on-remote",
            SwitchMode::OnManual => "on-manual",
            SwitchMode::OnAutoArmed => "on-autoarmed",
            SwitchMode::OffCooldown => "off-cooldown",
        }
    }
}

/// A running auto-off timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    /// When the timer was armed.
    pub armed_at: Millis,
    /// Delay until the switch turns off.
    pub delay_ms: Millis,
}

impl Deadline {
    /// Returns true once the delay has passed, tolerant of counter wrap.
    #[inline]
    pub const fn reached(&self, now: Millis) -> bool {
        has_elapsed(now, self.armed_at, self.delay_ms)
    }
}

/// One relay and its paired wall switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Switch {
    index: u8,
    relay_pin: u8,
    manual_pin: u8,
    mode: SwitchMode,
    last_manual_level: bool,
    last_manual_change_at: Option<Millis>,
    auto_off: Option<Deadline>,
    remote_override: bool,
}

impl Switch {
    fn new(index: u8, relay_pin: u8, manual_pin: u8) -> Self {
        Self {
            index,
            relay_pin,
            manual_pin,
            mode: SwitchMode::OffCooldown,
            last_manual_level: false,
            last_manual_change_at: None,
            auto_off: None,
            remote_override: false,
        }
    }

    /// Switch number, 0..5.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Relay output GPIO.
    pub fn relay_pin(&self) -> u8 {
        self.relay_pin
    }

    /// Wall switch input GPIO.
    pub fn manual_pin(&self) -> u8 {
        self.manual_pin
    }

    /// Current state machine state.
    pub fn mode(&self) -> SwitchMode {
        self.mode
    }

    /// Current logical state.
    pub fn state(&self) -> SwitchState {
        self.mode.state()
    }

    /// Running auto-off timer, if any.
    pub fn auto_off(&self) -> Option<Deadline> {
        self.auto_off
    }

    /// True when a remote command was the most recent source.
    pub fn remote_override(&self) -> bool {
        self.remote_override
    }

    /// Debounced wall switch level at the last accepted edge.
    pub fn last_manual_level(&self) -> bool {
        self.last_manual_level
    }

    /// Time of the last accepted wall switch edge.
    pub fn last_manual_change_at(&self) -> Option<Millis> {
        self.last_manual_change_at
    }

    fn arm_if_absent(&mut self, now: Millis, motion: &MotionController) {
        if self.auto_off.is_none() && motion.can_arm() {
            self.auto_off = Some(Deadline {
                armed_at: now,
                delay_ms: motion.auto_off_ms(),
            });
            self.mode = SwitchMode::OnAutoArmed;
            log::debug!("switch {} auto-off armed ({} ms)", self.index, motion.auto_off_ms());
        }
    }

    fn set_off(&mut self) {
        self.mode = SwitchMode::OffIdle;
        self.auto_off = None;
    }
}

// ============================================================================
// Tick Report
// ============================================================================

/// What changed during one [`SwitchEngine::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Bit `i` set if switch `i` changed logical state.
    pub dirty: u8,
    /// Wall switch toggles committed this tick, with the resulting state.
    pub manual_toggles: Vec<(u8, SwitchState), NUM_SWITCHES>,
    /// Switches turned off by an expired auto-off deadline.
    pub auto_offs: Vec<u8, NUM_SWITCHES>,
    /// Presence edge observed this tick.
    pub presence: Option<PresenceEdge>,
    /// Remote commands drained from the queue.
    pub commands_applied: usize,
}

impl TickReport {
    /// Returns true if switch `index` changed logical state.
    pub fn is_dirty(&self, index: usize) -> bool {
        index < NUM_SWITCHES && self.dirty & (1 << index) != 0
    }

    /// Returns true if any switch changed logical state.
    pub fn any_dirty(&self) -> bool {
        self.dirty != 0
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The per-switch state machines.
#[derive(Clone, Debug)]
pub struct SwitchEngine {
    switches: [Switch; NUM_SWITCHES],
}

impl SwitchEngine {
    /// Create the bank with every switch in `OFF_COOLDOWN`.
    pub fn new(config: &Configuration) -> Self {
        let switches = core::array::from_fn(|i| {
            Switch::new(i as u8, config.relay_pins[i], config.manual_pins[i])
        });
        Self { switches }
    }

    /// All switches, by index.
    pub fn switches(&self) -> &[Switch; NUM_SWITCHES] {
        &self.switches
    }

    /// Logical state of switch `index`.
    pub fn state(&self, index: usize) -> Option<SwitchState> {
        self.switches.get(index).map(Switch::state)
    }

    /// Logical state of every switch.
    pub fn states(&self) -> [SwitchState; NUM_SWITCHES] {
        core::array::from_fn(|i| self.switches[i].state())
    }

    /// Follow a pin map change. Logical states are untouched.
    pub fn update_pins(&mut self, config: &Configuration) {
        for (i, sw) in self.switches.iter_mut().enumerate() {
            sw.relay_pin = config.relay_pins[i];
            sw.manual_pin = config.manual_pins[i];
        }
    }

    /// Apply one command to every switch it targets.
    ///
    /// Returns a bitmask of switches whose logical state changed.
    pub fn apply_command(&mut self, cmd: &Command, now: Millis, motion: &MotionController) -> u8 {
        let mut changed = 0u8;
        for i in cmd.target.indices() {
            let sw = &mut self.switches[i];
            let before = sw.state();
            match cmd.source {
                CommandSource::Remote => apply_remote(sw, cmd.desired, now, motion),
                CommandSource::MotionAutoOff => {
                    // Stale expiries are ignored
                    if sw.mode == SwitchMode::OnAutoArmed {
                        sw.set_off();
                        log::info!("switch {} auto-off", i);
                    }
                }
            }
            if sw.state() != before {
                changed |= 1 << i;
            }
        }
        changed
    }

    /// React to a presence edge.
    ///
    /// Losing presence arms every remotely switched relay; regaining it
    /// disarms them again. Manually switched relays are left alone.
    pub fn on_presence(&mut self, edge: PresenceEdge, now: Millis, motion: &MotionController) {
        for sw in &mut self.switches {
            match (edge, sw.mode) {
                (PresenceEdge::Lost, SwitchMode::OnRemote) => sw.arm_if_absent(now, motion),
                (PresenceEdge::Gained, SwitchMode::OnAutoArmed) => {
                    sw.mode = SwitchMode::OnRemote;
                    sw.auto_off = None;
                }
                _ => {}
            }
        }
    }

    /// Drop every motion-armed deadline, keeping the switches on.
    pub fn cancel_motion_deadlines(&mut self) {
        for sw in &mut self.switches {
            if sw.mode == SwitchMode::OnAutoArmed {
                sw.mode = SwitchMode::OnRemote;
            }
            sw.auto_off = None;
        }
    }

    /// Run one reconciliation tick.
    ///
    /// The caller samples inputs beforehand; this drains the sampler's
    /// edges and the command queue, updates motion, fires deadlines, and
    /// syncs every relay.
    ///
    /// # Errors
    ///
    /// Returns the output error if a relay write fails. Logical state has
    /// already advanced; the next tick retries the write.
    pub fn tick<O: OutputPins, const N: usize>(
        &mut self,
        now: Millis,
        sampler: &mut InputSampler,
        queue: &mut CommandQueue<N>,
        motion: &mut MotionController,
        relays: &mut RelayDriver<O>,
    ) -> Result<TickReport, O::Error> {
        let before = self.states();
        let mut report = TickReport::default();

        // 1. Manual edges, resolved against the pre-tick state
        let mut intents: [Option<SwitchState>; NUM_SWITCHES] = [None; NUM_SWITCHES];
        while let Some(event) = sampler.next_event() {
            let Channel::Manual(i) = event.channel else {
                continue;
            };
            let Some(sw) = self.switches.get_mut(i as usize) else {
                continue;
            };
            let current = intents[i as usize].unwrap_or(before[i as usize]);
            intents[i as usize] = Some(current.toggled());
            sw.last_manual_level = event.level;
            sw.last_manual_change_at = Some(event.at);
        }

        // 2. Remote commands in queue order
        while let Some(cmd) = queue.poll() {
            self.apply_command(&cmd, now, motion);
            report.commands_applied += 1;
        }

        // 3. Manual wins
        for (i, intent) in intents.iter().enumerate() {
            let Some(state) = *intent else {
                continue;
            };
            let sw = &mut self.switches[i];
            sw.mode = if state.is_on() {
                SwitchMode::OnManual
            } else {
                SwitchMode::OffIdle
            };
            sw.auto_off = None;
            sw.remote_override = false;
            log::info!("switch {} manual {}", i, state.as_str());
            // At most one entry per switch
            let _ = report.manual_toggles.push((i as u8, state));
        }

        // 4. Motion
        let (primary, secondary) = sampler.motion_levels();
        report.presence = motion.update(now, primary, secondary);
        if motion.grace_over() {
            for sw in &mut self.switches {
                if sw.mode == SwitchMode::OffCooldown {
                    sw.mode = SwitchMode::OffIdle;
                }
            }
        }
        if !motion.enabled() {
            self.cancel_motion_deadlines();
        } else if let Some(edge) = report.presence {
            self.on_presence(edge, now, motion);
        }

        // 5. Deadlines
        for i in 0..NUM_SWITCHES {
            let expired = self.switches[i].auto_off.is_some_and(|d| d.reached(now));
            if expired && self.apply_command(&Command::auto_off(i as u8, now), now, motion) != 0 {
                let _ = report.auto_offs.push(i as u8);
            }
        }

        // 6. Outputs and dirty mask
        let after = self.states();
        relays.sync(&after)?;
        for i in 0..NUM_SWITCHES {
            if before[i] != after[i] {
                report.dirty |= 1 << i;
            }
        }
        Ok(report)
    }
}

fn apply_remote(sw: &mut Switch, desired: Desired, now: Millis, motion: &MotionController) {
    let current = sw.state();
    let target = desired.resolve(current);
    sw.remote_override = true;

    match (current, target) {
        (SwitchState::Off, SwitchState::On) => {
            sw.mode = SwitchMode::OnRemote;
            sw.auto_off = None;
            sw.arm_if_absent(now, motion);
        }
        (SwitchState::On, SwitchState::On) => {
            if sw.mode == SwitchMode::OnManual {
                sw.mode = SwitchMode::OnRemote;
            }
            sw.arm_if_absent(now, motion);
        }
        (SwitchState::On, SwitchState::Off) => sw.set_off(),
        (SwitchState::Off, SwitchState::Off) => {}
    }
    log::debug!("switch {} remote -> {}", sw.index, sw.mode.as_str());
}

// ============================================================================
// Tests
// ============================================================================
