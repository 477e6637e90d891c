//! Events emitted by the simulation for the embedding UI.
//!
//! The core never renders or plays audio; it records what happened as
//! typed events that the frontend drains once per frame. Notices are the
//! scrolling message lines, cues are one-shot audio hints, and the
//! venting pair fires on transitions only, never every tick.

use crate::id::NodeId;
use crate::sim::Ticks;

// ---------------------------------------------------------------------------
// Sound cues
// ---------------------------------------------------------------------------

/// One-shot audio hints. The frontend maps each to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundCue {
    /// Negative feedback for a rejected action.
    Error,
    /// A building was destroyed.
    Destroyed,
    /// Construction finished for the first time.
    ConstructionComplete,
    /// A repair or upgrade finished.
    RepairComplete,
    /// A new pipe was laid.
    PipeLaid,
    /// A node upgrade began.
    NodeUpgradeStarted,
    /// A pipe upgrade began.
    PipeUpgradeStarted,
    /// A city upgrade began.
    CityUpgradeStarted,
    /// A city upgrade finished.
    CityUpgradeComplete,
    /// A valve was opened or closed.
    ValveMoved,
    /// A node started venting excess steam.
    VentingHiss,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the tick at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message line for the player.
    Notice { text: String, tick: Ticks },
    /// An audio hint.
    Cue { cue: SoundCue, tick: Ticks },
    /// A node's pressure hit the safety ceiling. Transition only.
    VentingStarted { node: NodeId, tick: Ticks },
    /// A venting node dropped back below the ceiling. Transition only.
    VentingStopped { node: NodeId, tick: Ticks },
}
