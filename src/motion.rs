//! Motion sensor fusion and presence tracking.
//!
//! One or two PIR/microwave sensors are fused into a single boolean
//! "presence". The switch engine reacts to presence *edges*: losing presence
//! arms auto-off timers on remotely switched relays, regaining it cancels
//! them.
//!
//! # Boot grace
//!
//! PIR sensors report garbage while they warm up. For
//! [`MOTION_BOOT_GRACE_MS`] after boot, levels are tracked but presence stays
//! *unknown* and no edges are emitted. The first fused value after the
//! window closes produces a settling edge in whichever direction it points.
//!
//! ```rust
//! use relay_bank::motion::{MotionController, PresenceEdge};
//! use relay_bank::config::{FusionMode, MotionConfig};
//!
//! let config = MotionConfig { enabled: true, fusion: FusionMode::Or, ..MotionConfig::default() };
//! let mut motion = MotionController::new(&config, 0);
//!
//! // Inside the grace window: nothing happens
//! assert_eq!(motion.update(1_000, true, Some(false)), None);
//!
//! // Window closed: presence settles
//! assert_eq!(motion.update(5_000, true, Some(false)), Some(PresenceEdge::Gained));
//! assert_eq!(motion.update(5_050, false, Some(false)), Some(PresenceEdge::Lost));
//! ```

use crate::config::{FusionMode, MotionConfig, MOTION_BOOT_GRACE_MS};
use crate::traits::{has_elapsed, Millis};

/// A change in fused presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEdge {
    /// Someone is now detected.
    Gained,
    /// Nobody is detected any more.
    Lost,
}

impl PresenceEdge {
    /// Presence after this edge.
    pub const fn present(self) -> bool {
        matches!(self, PresenceEdge::Gained)
    }
}

/// Fuse two sensor levels under `mode`.
///
/// Without a secondary sensor every mode degrades to the primary level.
pub fn fuse(mode: FusionMode, primary: bool, secondary: Option<bool>) -> bool {
    match (mode, secondary) {
        (_, None) | (FusionMode::PrimaryOnly, _) => primary,
        (FusionMode::And, Some(s)) => primary && s,
        (FusionMode::Or, Some(s)) => primary || s,
    }
}

/// Presence tracker over debounced motion levels.
#[derive(Debug, Clone)]
pub struct MotionController {
    enabled: bool,
    fusion: FusionMode,
    auto_off_ms: Millis,
    boot_at: Millis,
    grace_ms: Millis,
    grace_over: bool,
    primary: bool,
    secondary: Option<bool>,
    presence: Option<bool>,
    last_presence_at: Option<Millis>,
}

impl MotionController {
    /// Create a controller whose grace window starts at `boot_at`.
    pub fn new(config: &MotionConfig, boot_at: Millis) -> Self {
        Self {
            enabled: config.enabled,
            fusion: config.fusion,
            auto_off_ms: config.auto_off_ms(),
            boot_at,
            grace_ms: MOTION_BOOT_GRACE_MS,
            grace_over: false,
            primary: false,
            secondary: None,
            presence: None,
            last_presence_at: None,
        }
    }

    /// Adopt new settings.
    ///
    /// Presence returns to unknown so the next update emits a settling edge.
    /// The boot grace window is not restarted.
    pub fn reinit(&mut self, config: &MotionConfig) {
        self.enabled = config.enabled;
        self.fusion = config.fusion;
        self.auto_off_ms = config.auto_off_ms();
        self.presence = None;
        log::info!(
            "motion {} (fusion {}, auto-off {} ms)",
            if self.enabled { "enabled" } else { "disabled" },
            self.fusion.as_str(),
            self.auto_off_ms
        );
    }

    /// Feed debounced sensor levels; returns a presence edge if one occurred.
    pub fn update(
        &mut self,
        now: Millis,
        primary: bool,
        secondary: Option<bool>,
    ) -> Option<PresenceEdge> {
        self.primary = primary;
        self.secondary = secondary;

        if !self.grace_over {
            if !has_elapsed(now, self.boot_at, self.grace_ms) {
                return None;
            }
            // Latched so a counter wrap never reopens the window
            self.grace_over = true;
            log::info!("motion grace window closed");
        }

        if !self.enabled {
            self.presence = None;
            return None;
        }

        let fused = fuse(self.fusion, primary, secondary);
        if fused {
            self.last_presence_at = Some(now);
        }
        if self.presence == Some(fused) {
            return None;
        }
        self.presence = Some(fused);

        let edge = if fused {
            PresenceEdge::Gained
        } else {
            PresenceEdge::Lost
        };
        log::info!("presence {:?}", edge);
        Some(edge)
    }

    /// Whether motion drives auto-off.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True while presence is known and detected.
    pub fn presence(&self) -> bool {
        self.presence == Some(true)
    }

    /// Presence, or `None` while unknown (grace window, just reinitialized, disabled).
    pub fn presence_known(&self) -> Option<bool> {
        self.presence
    }

    /// Auto-off timers may be armed: motion is enabled and nobody is detected.
    pub fn can_arm(&self) -> bool {
        self.enabled && self.presence == Some(false)
    }

    /// Auto-off delay in milliseconds.
    pub fn auto_off_ms(&self) -> Millis {
        self.auto_off_ms
    }

    /// Returns true once the boot grace window has closed.
    pub fn grace_over(&self) -> bool {
        self.grace_over
    }

    /// Last debounced sensor levels seen.
    pub fn levels(&self) -> (bool, Option<bool>) {
        (self.primary, self.secondary)
    }

    /// Timestamp of the most recent update with presence detected.
    pub fn last_presence_at(&self) -> Option<Millis> {
        self.last_presence_at
    }
}

// ============================================================================
// Tests
// ============================================================================
