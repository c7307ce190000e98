//! Command types for switch control.
//!
//! Remote commands arrive from the broker, are queued in a
//! [`CommandQueue`](crate::queue::CommandQueue), and are consumed exactly once
//! by the [`SwitchEngine`](crate::engine::SwitchEngine). Motion auto-off
//! expiries travel through the same [`Command`] type with
//! [`CommandSource::MotionAutoOff`].
//!
//! # Example
//!
//! ```rust
//! use relay_bank::commands::{Command, CommandSource, Desired, Target};
//!
//! let cmd = Command::remote(Target::Switch(2), Desired::On, 1_000);
//! assert_eq!(cmd.source, CommandSource::Remote);
//! assert_eq!(cmd.target.indices().count(), 1);
//!
//! let all_off = Command::remote(Target::All, Desired::Off, 1_000);
//! assert_eq!(all_off.target.indices().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
//! ```

use crate::config::NUM_SWITCHES;
use crate::traits::Millis;

/// Logical state of one switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SwitchState {
    /// Relay de-energized from the user's point of view.
    #[default]
    Off,
    /// Relay energized from the user's point of view.
    On,
}

impl SwitchState {
    /// Returns the opposite state.
    #[inline]
    pub const fn toggled(self) -> Self {
        match self {
            SwitchState::On => SwitchState::Off,
            SwitchState::Off => SwitchState::On,
        }
    }

    /// Returns true for [`SwitchState::On`].
    #[inline]
    pub const fn is_on(self) -> bool {
        matches!(self, SwitchState::On)
    }

    /// Lowercase name used on the wire.
    ///
    /// ```
    /// use relay_bank::commands::SwitchState;
    ///
    /// assert_eq!(SwitchState::On.as_str(), "on");
    /// assert_eq!(SwitchState::Off.as_str(), "off");
    /// ```
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

/// The state a command asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Desired {
    /// Switch on.
    On,
    /// Switch off.
    Off,
    /// Invert the current state.
    Toggle,
}

impl Desired {
    /// Resolve against the current state to an absolute target.
    ///
    /// ```
    /// use relay_bank::commands::{Desired, SwitchState};
    ///
    /// assert_eq!(Desired::Toggle.resolve(SwitchState::On), SwitchState::Off);
    /// assert_eq!(Desired::On.resolve(SwitchState::On), SwitchState::On);
    /// ```
    #[inline]
    pub const fn resolve(self, current: SwitchState) -> SwitchState {
        match self {
            Desired::On => SwitchState::On,
            Desired::Off => SwitchState::Off,
            Desired::Toggle => current.toggled(),
        }
    }

    /// Parse the wire value, trimmed and case-insensitive.
    ///
    /// Accepts `on`/`off`/`toggle` and the numeric forms `1`/`0` that older
    /// backends send.
    pub fn from_text(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("on") || s == "1" {
            Some(Desired::On)
        } else if s.eq_ignore_ascii_case("off") || s == "0" {
            Some(Desired::Off)
        } else if s.eq_ignore_ascii_case("toggle") {
            Some(Desired::Toggle)
        } else {
            None
        }
    }
}

/// Which switches a command addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// A single switch by index (0..5).
    Switch(u8),
    /// Every switch, applied in index order.
    All,
}

impl Target {
    /// Indices addressed by this target, in application order.
    ///
    /// Out-of-range single indices yield nothing.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        let (start, end) = match self {
            Target::All => (0, NUM_SWITCHES),
            Target::Switch(i) if (i as usize) < NUM_SWITCHES => (i as usize, i as usize + 1),
            Target::Switch(_) => (0, 0),
        };
        start..end
    }
}

/// Where a command came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSource {
    /// Backend over the broker.
    Remote,
    /// Motion auto-off deadline expiry.
    MotionAutoOff,
}

impl CommandSource {
    /// Returns the source as a string for logging/telemetry.
    pub const fn as_str(self) -> &'static str {
        match self {
            CommandSource::Remote => "remote",
            CommandSource::MotionAutoOff => "motion-auto-off",
        }
    }
}

/// A pending switch command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    /// Switch or broadcast target.
    pub target: Target,
    /// Requested state.
    pub desired: Desired,
    /// Origin of the command.
    pub source: CommandSource,
    /// Timestamp when the command entered the system.
    pub enqueued_at: Millis,
}

impl Command {
    /// Create a remote command.
    pub const fn remote(target: Target, desired: Desired, enqueued_at: Millis) -> Self {
        Self {
            target,
            desired,
            source: CommandSource::Remote,
            enqueued_at,
        }
    }

    /// Create the OFF command issued when a switch's auto-off deadline expires.
    pub const fn auto_off(index: u8, at: Millis) -> Self {
        Self {
            target: Target::Switch(index),
            desired: Desired::Off,
            source: CommandSource::MotionAutoOff,
            enqueued_at: at,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_state_toggle_roundtrip() {
        assert_eq!(SwitchState::On.toggled().toggled(), SwitchState::On);
        assert_eq!(SwitchState::Off.toggled(), SwitchState::On);
    }

    #[test]
    fn switch_state_from_bool() {
        assert_eq!(SwitchState::from(true), SwitchState::On);
        assert_eq!(SwitchState::from(false), SwitchState::Off);
        assert!(SwitchState::On.is_on());
        assert!(!SwitchState::default().is_on());
    }

    #[test]
    fn desired_from_text_variants() {
        assert_eq!(Desired::from_text("on"), Some(Desired::On));
        assert_eq!(Desired::from_text(" OFF "), Some(Desired::Off));
        assert_eq!(Desired::from_text("Toggle"), Some(Desired::Toggle));
        assert_eq!(Desired::from_text("1"), Some(Desired::On));
        assert_eq!(Desired::from_text("0"), Some(Desired::Off));
        assert_eq!(Desired::from_text("maybe"), None);
        assert_eq!(Desired::from_text(""), None);
    }

    #[test]
    fn desired_resolve() {
        assert_eq!(Desired::Off.resolve(SwitchState::On), SwitchState::Off);
        assert_eq!(Desired::Toggle.resolve(SwitchState::Off), SwitchState::On);
    }

    #[test]
    fn target_single_index() {
        let v: std::vec::Vec<usize> = Target::Switch(3).indices().collect();
        assert_eq!(v, [3]);
    }

    #[test]
    fn target_out_of_range_is_empty() {
        assert_eq!(Target::Switch(6).indices().count(), 0);
        assert_eq!(Target::Switch(255).indices().count(), 0);
    }

    #[test]
    fn target_all_in_index_order() {
        let v: std::vec::Vec<usize> = Target::All.indices().collect();
        assert_eq!(v, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn command_constructors() {
        let cmd = Command::remote(Target::Switch(1), Desired::Toggle, 42);
        assert_eq!(cmd.source, CommandSource::Remote);
        assert_eq!(cmd.enqueued_at, 42);

        let off = Command::auto_off(4, 99);
        assert_eq!(off.target, Target::Switch(4));
        assert_eq!(off.desired, Desired::Off);
        assert_eq!(off.source.as_str(), "motion-auto-off");
    }
}
