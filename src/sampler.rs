//! Debounced sampling of manual switch and motion sensor inputs.
//!
//! The sampler reads all eight channels (six wall switches, up to two motion
//! sensors) on a [`SAMPLE_INTERVAL_MS`] grid, and early whenever a reading
//! departs from the level a channel is tracking. A channel only reports a new
//! level after [`REQUIRED_CONSISTENT`] consecutive samples agree on it.
//! Wall switches must additionally be at least [`MANUAL_DEBOUNCE_MS`] apart
//! between accepted edges, which swallows contact bounce on cheap rockers.
//!
//! Accepted edges are buffered as [`InputEvent`]s until the switch engine
//! drains them. Motion levels are read through [`InputSampler::motion_levels`].

use heapless::Deque;

use crate::config::{
    Configuration, MANUAL_DEBOUNCE_MS, NUM_SWITCHES, REQUIRED_CONSISTENT, SAMPLE_INTERVAL_MS,
};
use crate::traits::{elapsed, has_elapsed, InputPins, Millis, Pull};

const EVENT_CAPACITY: usize = 16;

/// Input channel identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Wall switch paired with relay `n`.
    Manual(u8),
    /// Primary motion sensor.
    MotionPrimary,
    /// Secondary motion sensor.
    MotionSecondary,
}

/// An accepted input edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEvent {
    /// Channel that changed.
    pub channel: Channel,
    /// New logical level (`true` = switch closed / motion detected).
    pub level: bool,
    /// Sample time at which the edge was accepted.
    pub at: Millis,
}

#[derive(Clone, Copy, Debug, Default)]
struct Debounce {
    pin: Option<u8>,
    stable: bool,
    candidate: bool,
    count: u8,
    last_edge_at: Option<Millis>,
}

impl Debounce {
    fn prime(&mut self, level: bool) {
        self.stable = level;
        self.candidate = level;
        self.count = REQUIRED_CONSISTENT;
        self.last_edge_at = None;
    }

    /// Feed one sample. Returns true when an edge is accepted.
    fn observe(&mut self, level: bool, now: Millis, min_separation: Millis) -> bool {
        if level == self.candidate {
            self.count = self.count.saturating_add(1);
        } else {
            self.candidate = level;
            self.count = 1;
        }

        if self.count < REQUIRED_CONSISTENT || self.candidate == self.stable {
            return false;
        }
        if let Some(last) = self.last_edge_at {
            if !has_elapsed(now, last, min_separation) {
                // Stays pending until the separation window has passed
                return false;
            }
        }
        self.stable = self.candidate;
        self.last_edge_at = Some(now);
        true
    }
}

/// Debounced sampler for every input channel.
///
/// # Example
///
/// ```rust
/// use relay_bank::sampler::{Channel, InputSampler};
/// use relay_bank::config::Configuration;
/// use relay_bank::hal::MockInputPins;
///
/// let config = Configuration::default();
/// let mut pins = MockInputPins::new();
/// let mut sampler = InputSampler::new(&config);
/// sampler.configure(&config, &mut pins);
/// sampler.prime(&mut pins);
///
/// // Close wall switch 0 (active-low) and hold it for three samples
/// pins.set_level(25, false);
/// for t in [50, 100, 150] {
///     sampler.sample(t, &mut pins);
/// }
/// let event = sampler.next_event().unwrap();
/// assert_eq!(event.channel, Channel::Manual(0));
/// assert!(event.level);
/// ```
pub struct InputSampler {
    manual: [Debounce; NUM_SWITCHES],
    primary: Debounce,
    secondary: Debounce,
    manual_active_low: bool,
    last_sample_at: Option<Millis>,
    events: Deque<InputEvent, EVENT_CAPACITY>,
}

impl InputSampler {
    /// Create a sampler for the pins in `config`.
    ///
    /// Call [`configure`](Self::configure) and [`prime`](Self::prime) before
    /// the first [`sample`](Self::sample).
    pub fn new(config: &Configuration) -> Self {
        let mut manual = [Debounce::default(); NUM_SWITCHES];
        for (ch, &pin) in manual.iter_mut().zip(config.manual_pins.iter()) {
            ch.pin = Some(pin);
        }
        Self {
            manual,
            primary: Debounce {
                pin: Some(config.motion.primary_pin),
                ..Debounce::default()
            },
            secondary: Debounce {
                pin: config.motion.secondary_pin,
                ..Debounce::default()
            },
            manual_active_low: config.manual_active_low,
            last_sample_at: None,
            events: Deque::new(),
        }
    }

    /// Set pin modes for every channel.
    pub fn configure<I: InputPins>(&self, config: &Configuration, inputs: &mut I) {
        let manual_pull = manual_pull(config);
        for ch in &self.manual {
            if let Some(pin) = ch.pin {
                inputs.configure_input(pin, manual_pull);
            }
        }
        let motion_pull = motion_pull(config);
        for pin in [self.primary.pin, self.secondary.pin].into_iter().flatten() {
            inputs.configure_input(pin, motion_pull);
        }
    }

    /// Adopt the current level of every channel without emitting edges.
    pub fn prime<I: InputPins>(&mut self, inputs: &mut I) {
        for i in 0..NUM_SWITCHES {
            self.prime_manual(i, inputs);
        }
        prime_motion(&mut self.primary, inputs);
        prime_motion(&mut self.secondary, inputs);
    }

    /// Follow a configuration change.
    ///
    /// Channels whose pin or polarity changed get their pin mode set again
    /// and are re-primed; untouched channels keep their debounce state.
    pub fn reconfigure<I: InputPins>(
        &mut self,
        previous: &Configuration,
        config: &Configuration,
        inputs: &mut I,
    ) {
        let polarity_changed = previous.manual_active_low != config.manual_active_low;
        self.manual_active_low = config.manual_active_low;

        let manual_pull = manual_pull(config);
        for i in 0..NUM_SWITCHES {
            let pin = config.manual_pins[i];
            if polarity_changed || self.manual[i].pin != Some(pin) {
                self.manual[i].pin = Some(pin);
                inputs.configure_input(pin, manual_pull);
                self.prime_manual(i, inputs);
            }
        }

        let motion_pull = motion_pull(config);
        let pull_changed = previous.motion.use_pulldown != config.motion.use_pulldown;
        for (ch, pin) in [
            (&mut self.primary, Some(config.motion.primary_pin)),
            (&mut self.secondary, config.motion.secondary_pin),
        ] {
            if pull_changed || ch.pin != pin {
                ch.pin = pin;
                if let Some(p) = pin {
                    inputs.configure_input(p, motion_pull);
                }
                prime_motion(ch, inputs);
            }
        }
    }

    /// Take a sample of every channel if one is due.
    ///
    /// Samples run on a fixed [`SAMPLE_INTERVAL_MS`] grid, so a loop period
    /// that does not divide the interval does not stretch it. A channel
    /// reading something other than its pending level is sampled at once
    /// and the grid restarts from there, which bounds edge latency by the
    /// debounce window plus one loop period.
    ///
    /// Returns true if a sample was taken.
    pub fn sample<I: InputPins>(&mut self, now: Millis, inputs: &mut I) -> bool {
        let mut manual = [None; NUM_SWITCHES];
        for (level, ch) in manual.iter_mut().zip(self.manual.iter()) {
            *level = ch.pin.map(|pin| inputs.is_high(pin) != self.manual_active_low);
        }
        let primary = self.primary.pin.map(|pin| inputs.is_high(pin));
        let secondary = self.secondary.pin.map(|pin| inputs.is_high(pin));

        let changed = self
            .manual
            .iter()
            .zip(manual.iter())
            .chain([(&self.primary, &primary), (&self.secondary, &secondary)])
            .any(|(ch, level)| level.is_some_and(|l| l != ch.candidate));

        self.last_sample_at = match self.last_sample_at {
            None => Some(now),
            Some(_) if changed => Some(now),
            Some(last) if !has_elapsed(now, last, SAMPLE_INTERVAL_MS) => return false,
            // Fell more than a period behind: restart the grid
            Some(last) if has_elapsed(now, last, 2 * SAMPLE_INTERVAL_MS) => Some(now),
            Some(last) => Some(last.wrapping_add(SAMPLE_INTERVAL_MS)),
        };

        for (i, level) in manual.into_iter().enumerate() {
            let Some(level) = level else {
                continue;
            };
            if self.manual[i].observe(level, now, MANUAL_DEBOUNCE_MS) {
                self.push(InputEvent {
                    channel: Channel::Manual(i as u8),
                    level,
                    at: now,
                });
            }
        }

        for (channel, ch, level) in [
            (Channel::MotionPrimary, &mut self.primary, primary),
            (Channel::MotionSecondary, &mut self.secondary, secondary),
        ] {
            let Some(level) = level else {
                continue;
            };
            if ch.observe(level, now, 0) {
                log::debug!("{:?} -> {}", channel, level);
                push_event(&mut self.events, InputEvent { channel, level, at: now });
            }
        }
        true
    }

    /// Remove and return the oldest pending edge.
    pub fn next_event(&mut self) -> Option<InputEvent> {
        self.events.pop_front()
    }

    /// Number of edges waiting to be drained.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Debounced motion levels: primary, and secondary if configured.
    pub fn motion_levels(&self) -> (bool, Option<bool>) {
        (
            self.primary.stable,
            self.secondary.pin.map(|_| self.secondary.stable),
        )
    }

    /// Debounced logical level of wall switch `index`.
    pub fn manual_level(&self, index: usize) -> Option<bool> {
        self.manual.get(index).map(|ch| ch.stable)
    }

    /// Time since the last grid point, if any.
    pub fn since_last_sample(&self, now: Millis) -> Option<Millis> {
        self.last_sample_at.map(|t| elapsed(now, t))
    }

    fn prime_manual<I: InputPins>(&mut self, index: usize, inputs: &mut I) {
        if let Some(pin) = self.manual[index].pin {
            let level = inputs.is_high(pin) != self.manual_active_low;
            self.manual[index].prime(level);
        }
    }

    fn push(&mut self, event: InputEvent) {
        push_event(&mut self.events, event);
    }
}

fn push_event(events: &mut Deque<InputEvent, EVENT_CAPACITY>, event: InputEvent) {
    if events.is_full() {
        log::warn!("input event buffer full, dropping oldest");
        events.pop_front();
    }
    let _ = events.push_back(event);
}

fn prime_motion<I: InputPins>(ch: &mut Debounce, inputs: &mut I) {
    match ch.pin {
        Some(pin) => ch.prime(inputs.is_high(pin)),
        None => ch.prime(false),
    }
}

fn manual_pull(config: &Configuration) -> Pull {
    if config.manual_active_low {
        Pull::Up
    } else {
        Pull::Down
    }
}

fn motion_pull(config: &Configuration) -> Pull {
    if config.motion.use_pulldown {
        Pull::Down
    } else {
        Pull::None
    }
}

// ============================================================================
// Tests
// ============================================================================
