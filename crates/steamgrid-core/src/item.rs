//! Items found on the map: nodes, pipes, wells, and rocks.
//!
//! Buildings (nodes and pipes) share a [`BuildingState`] block for health,
//! construction progress, tech level, and the connectivity epoch stamp.
//! Node variants are a tagged enum ([`NodeKind`]) rather than an override
//! chain: the city and well behaviours are dispatched by variant where
//! they differ, and everything else goes through the shared state.

use crate::config::{
    self, Difficulty, HEALTH_UNIT, NODE_HEALTH_UNITS, NODE_MAX_TECH_LEVEL, NODE_UPGRADE_WORK,
    PIPE_MAX_TECH_LEVEL, PIPE_UPGRADE_RESISTANCE_FACTOR, PIPE_UPGRADE_WORK_FACTOR,
    RESISTANCE_FACTOR, WORK_UNIT_SIZE,
};
use crate::grid::GridPosition;
use crate::id::{NodeId, PipeId, RockId, WellId};
use crate::steam::SteamModel;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejections from `begin_upgrade`. Recoverable, user-facing; the target
/// is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpgradeError {
    #[error("cannot be upgraded further")]
    AtMaxTechLevel,
    #[error("must be operational before an upgrade can begin")]
    NotOperational,
    #[error("is already being upgraded")]
    AlreadyUpgrading,
}

// ---------------------------------------------------------------------------
// BuildingState
// ---------------------------------------------------------------------------

/// What a completed work point finished, if anything. First completion and
/// repair completion cue different feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedWork {
    /// Construction finished for the first time.
    Built,
    /// A repair or upgrade finished.
    Repaired,
}

/// Health, construction progress, and bookkeeping shared by every
/// damageable building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingState {
    /// Current health, `0..=max_health`, in unit-scaled integers.
    pub health: i32,
    /// Health at which the building counts as finished.
    pub max_health: i32,
    /// Reached max health at least once since the last upgrade began.
    pub complete: bool,
    /// Ever reached max health. One-way; distinguishes first build from
    /// repair for feedback cues.
    pub was_once_complete: bool,
    /// Terminal. A destroyed building never comes back.
    pub destroyed: bool,
    /// Upgrade tier, starting at 1.
    pub tech_level: u32,
    /// Epoch stamp of the last work-pulse sweep that reached this building.
    pub connection_value: u64,
    /// Ownership tag for multiplayer; single-player buildings are all ours.
    pub owned_by_me: bool,
}

impl BuildingState {
    pub fn new(max_health: i32) -> Self {
        Self {
            health: 0,
            max_health,
            complete: false,
            was_once_complete: false,
            destroyed: false,
            tech_level: 1,
            connection_value: 0,
            owned_by_me: true,
        }
    }

    pub fn needs_work(&self) -> bool {
        self.health != self.max_health
    }

    pub fn is_broken(&self) -> bool {
        self.needs_work()
    }

    /// Apply one work point. Returns what was completed, if this point
    /// finished the job.
    pub fn do_work(&mut self) -> Option<CompletedWork> {
        if self.destroyed {
            return None;
        }
        if self.health < self.max_health {
            self.health += WORK_UNIT_SIZE;
        }
        if self.health >= self.max_health {
            self.health = self.max_health;
            let first = !self.was_once_complete;
            self.complete = true;
            self.was_once_complete = true;
            return Some(if first {
                CompletedWork::Built
            } else {
                CompletedWork::Repaired
            });
        }
        None
    }

    /// Apply damage already scaled for difficulty. Returns true when this
    /// hit was fatal.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        self.health -= amount;
        if self.health <= 0 {
            self.prepare_to_die();
            return true;
        }
        false
    }

    pub fn prepare_to_die(&mut self) {
        self.health = 0;
        self.destroyed = true;
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// City-specific state: the metal stockpile, construction capacity, and
/// the work-countdown upgrade mechanism.
///
/// City upgrades cannot use the health system — a city out of action loses
/// the game — so they consume work ticks from a countdown instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityState {
    /// Metal stockpile, the construction currency.
    pub metal_quantity: f64,
    /// Parallel construction capacity: work points fed to each pulse.
    pub avail_work_units: u32,
    /// Remaining work ticks of the upgrade in progress; 0 = idle.
    pub city_upgrade: i32,
    /// Initial countdown of the upgrade in progress, for progress meters.
    pub city_upgrade_start: i32,
    /// Lifetime steam consumed, for scoring readouts.
    pub total_steam: f64,
}

/// Well-node state: steam production, scaled by tech level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellNodeState {
    /// Steam sourced last tick (0 while under construction or broken).
    pub production: f64,
}

/// Node variants. The tag decides work, damage, and steam-source dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Plain storage/junction node.
    Standard,
    /// The hub. One per player; indestructible.
    City(CityState),
    /// Steam source built on top of a well.
    Well(WellNodeState),
}

/// What a work point did to a node, for feedback at the network level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeWorkOutcome {
    Nothing,
    Completed(CompletedWork),
    /// A city upgrade finished, reaching the given tech level.
    CityUpgraded { level: u32 },
}

/// A steam-storage graph vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub position: GridPosition,
    pub building: BuildingState,
    pub kind: NodeKind,
    pub steam: SteamModel,
    /// Incident pipes, in construction order.
    pub pipes: Vec<PipeId>,
    /// Excavation radius for nearby rocks.
    pub max_rock_distance: f64,
    /// Cached `(rock, distance)` pairs within the excavation radius.
    /// Recomputed whenever the rock set changes.
    pub rocks_nearby: Vec<(RockId, f64)>,
    /// Item this node was built on top of (a well); restored on destroy.
    pub covered: Option<WellId>,
    /// Lifetime metal mined by this node, for readouts.
    pub metal_mined: f64,
}

impl Node {
    fn with_kind(position: GridPosition, kind: NodeKind) -> Self {
        Self {
            position,
            building: BuildingState::new(NODE_HEALTH_UNITS * HEALTH_UNIT),
            kind,
            steam: SteamModel::new(),
            pipes: Vec::new(),
            max_rock_distance: config::INITIAL_NODE_EXCAVATION_DISTANCE,
            rocks_nearby: Vec::new(),
            covered: None,
            metal_mined: 0.0,
        }
    }

    /// A plain storage node.
    pub fn new(position: GridPosition) -> Self {
        Self::with_kind(position, NodeKind::Standard)
    }

    /// A steam maker, to be placed on a well.
    pub fn new_well_node(position: GridPosition) -> Self {
        Self::with_kind(position, NodeKind::Well(WellNodeState { production: 0.0 }))
    }

    /// The city hub.
    pub fn new_city(position: GridPosition) -> Self {
        Self::with_kind(
            position,
            NodeKind::City(CityState {
                metal_quantity: config::CITY_INITIAL_METAL,
                avail_work_units: 1,
                city_upgrade: 0,
                city_upgrade_start: 1,
                total_steam: 0.0,
            }),
        )
    }

    pub fn is_city(&self) -> bool {
        matches!(self.kind, NodeKind::City(_))
    }

    /// Display name for notifications and readouts.
    pub fn name(&self) -> &'static str {
        match self.kind {
            NodeKind::Standard => "Node",
            NodeKind::City(_) => "City",
            NodeKind::Well(_) => "Steam Maker",
        }
    }

    /// Whether this node emits steam (visual/audio hint for the renderer).
    pub fn emits_steam(&self) -> bool {
        matches!(self.kind, NodeKind::Well(_))
    }

    /// Whether an opponent may connect a pipe to this node: ours, or not
    /// yet part of anyone's network.
    pub fn is_connectable(&self) -> bool {
        self.building.owned_by_me || self.pipes.is_empty()
    }

    /// A city never reads as broken (losing the hub ends the game through
    /// other means); everything else is broken while unfinished.
    pub fn is_broken(&self) -> bool {
        match self.kind {
            NodeKind::City(_) => false,
            _ => self.building.is_broken(),
        }
    }

    /// A city needs work while an upgrade countdown is running; everything
    /// else while below max health.
    pub fn needs_work(&self) -> bool {
        match &self.kind {
            NodeKind::City(city) => city.city_upgrade != 0,
            _ => self.building.needs_work(),
        }
    }

    /// Apply one work point.
    pub fn do_work(&mut self) -> NodeWorkOutcome {
        match &mut self.kind {
            NodeKind::City(city) => {
                if city.city_upgrade > 0 {
                    city.city_upgrade -= 1;
                    if city.city_upgrade == 0 {
                        self.building.tech_level += 1;
                        self.steam.capacity_upgrade();
                        return NodeWorkOutcome::CityUpgraded {
                            level: self.building.tech_level,
                        };
                    }
                }
                NodeWorkOutcome::Nothing
            }
            _ => match self.building.do_work() {
                Some(done) => NodeWorkOutcome::Completed(done),
                None => NodeWorkOutcome::Nothing,
            },
        }
    }

    /// Start a tech upgrade on a standard or well node. Upgraded nodes get
    /// more capacity and more health, and drop out of action until rebuilt.
    pub fn begin_upgrade(&mut self) -> Result<(), UpgradeError> {
        debug_assert!(!self.is_city(), "city upgrades use begin_city_upgrade");
        if self.building.tech_level >= NODE_MAX_TECH_LEVEL {
            return Err(UpgradeError::AtMaxTechLevel);
        }
        if self.needs_work() {
            return Err(UpgradeError::NotOperational);
        }
        self.building.tech_level += 1;
        self.building.max_health += NODE_UPGRADE_WORK * HEALTH_UNIT;
        self.building.complete = false;
        self.steam.capacity_upgrade();
        Ok(())
    }

    /// Start a city upgrade: a work countdown rather than a health reset,
    /// plus one extra work unit (and its steam demand).
    pub fn begin_city_upgrade(&mut self, difficulty: &Difficulty) -> Result<(), UpgradeError> {
        let tech_level = self.building.tech_level;
        let NodeKind::City(city) = &mut self.kind else {
            debug_assert!(false, "begin_city_upgrade on a non-city node");
            return Err(UpgradeError::NotOperational);
        };
        if city.city_upgrade != 0 {
            return Err(UpgradeError::AlreadyUpgrading);
        }
        if tech_level >= difficulty.city_max_tech_level {
            return Err(UpgradeError::AtMaxTechLevel);
        }
        let work = (config::CITY_UPGRADE_WORK
            + tech_level as i32 * difficulty.city_upgrade_work_per_level)
            * HEALTH_UNIT;
        city.city_upgrade = work;
        city.city_upgrade_start = work;
        city.avail_work_units += 1;
        Ok(())
    }

    /// Damage entry point. The city is immune. Returns true on kill.
    pub fn take_damage(&mut self, level: f64, difficulty: &Difficulty) -> bool {
        if self.is_city() {
            return false;
        }
        self.building
            .take_damage((level * difficulty.damage_factor) as i32)
    }

    /// Recompute the nearby-rock cache against the current rock set.
    pub fn locate_nearby_rocks(
        &mut self,
        rocks: impl IntoIterator<Item = (RockId, GridPosition)>,
    ) {
        let maxd = self.max_rock_distance;
        self.rocks_nearby = rocks
            .into_iter()
            .map(|(id, pos)| (id, self.position.distance(pos)))
            .filter(|&(_, d)| d < maxd)
            .collect();
    }

    /// Steam the city draws per tick at its current work capacity.
    pub fn city_steam_demand(&self) -> f64 {
        match &self.kind {
            NodeKind::City(city) => {
                city.avail_work_units as f64 * config::WORK_STEAM_DEMAND
                    + config::STATIC_STEAM_DEMAND
            }
            _ => 0.0,
        }
    }

    /// Human-readable status lines for the info panel.
    pub fn information(&self) -> Vec<String> {
        let mut lines = vec![self.name().to_string()];
        let b = &self.building;
        let percent = (b.health * 100) / b.max_health;
        if b.complete {
            if b.health == b.max_health {
                lines.push("Operational".to_string());
            } else {
                lines.push(format!("Damaged, {percent}% health"));
            }
            lines.push(format!("Tech Level {}", b.tech_level));
        } else if b.health > 0 {
            lines.push(format!("Building, {percent}% done"));
        } else {
            lines.push("Not Built".to_string());
        }
        lines.push(format!("Steam pressure: {:.1} P", self.steam.pressure()));
        match &self.kind {
            NodeKind::City(city) => {
                lines.push(format!("Metal: {}", city.metal_quantity as i64));
                if city.city_upgrade != 0 {
                    lines.push("Upgrading...".to_string());
                }
            }
            NodeKind::Well(well) => {
                lines.push(format!("Steam production: {:.1} U", well.production));
            }
            NodeKind::Standard => {}
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Pipe
// ---------------------------------------------------------------------------

/// A resistive edge between two distinct nodes, carrying signed steam flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipe {
    pub n1: NodeId,
    pub n2: NodeId,
    /// Midpoint cell, for selection and popup anchoring.
    pub position: GridPosition,
    pub building: BuildingState,
    /// Euclidean endpoint distance, fixed at construction.
    pub length: f64,
    /// Flow resistance; function of length and tech level only.
    pub resistance: f64,
    /// Player-toggleable valve. Closed removes this edge from flow but not
    /// from the destruction topology.
    pub valve_open: bool,
    /// Last computed flow; positive means n1 -> n2.
    pub current_n1_to_n2: f64,
}

impl Pipe {
    pub fn new(n1: NodeId, p1: GridPosition, n2: NodeId, p2: GridPosition) -> Self {
        assert_ne!(n1, n2, "a pipe must connect two distinct nodes");
        let length = p1.distance(p2);
        Self {
            n1,
            n2,
            position: GridPosition::new((p1.x + p2.x) / 2, (p1.y + p2.y) / 2),
            building: BuildingState::new((length as i32 + 1) * HEALTH_UNIT),
            length,
            resistance: (length + 2.0) * RESISTANCE_FACTOR,
            valve_open: true,
            current_n1_to_n2: 0.0,
        }
    }

    /// The endpoint opposite `node`.
    pub fn other_end(&self, node: NodeId) -> NodeId {
        debug_assert!(node == self.n1 || node == self.n2);
        if node == self.n1 { self.n2 } else { self.n1 }
    }

    /// Record an outgoing current computed by `node`, reoriented to the
    /// n1 -> n2 sign convention.
    pub fn set_flow_from(&mut self, node: NodeId, current: f64) {
        if node == self.n1 {
            self.current_n1_to_n2 = current;
        } else if node == self.n2 {
            self.current_n1_to_n2 = -current;
        } else {
            debug_assert!(false, "flow reported by a non-endpoint node");
        }
    }

    /// Signed flow into `node` through this pipe.
    pub fn flow_toward(&self, node: NodeId) -> f64 {
        debug_assert!(node == self.n1 || node == self.n2);
        if node == self.n2 {
            self.current_n1_to_n2
        } else {
            -self.current_n1_to_n2
        }
    }

    /// Start a tech upgrade: lower resistance, more health, out of action
    /// until rebuilt.
    pub fn begin_upgrade(&mut self) -> Result<(), UpgradeError> {
        if self.building.tech_level >= PIPE_MAX_TECH_LEVEL {
            return Err(UpgradeError::AtMaxTechLevel);
        }
        if self.building.needs_work() {
            return Err(UpgradeError::NotOperational);
        }
        self.building.tech_level += 1;
        self.building.max_health +=
            (PIPE_UPGRADE_WORK_FACTOR * self.length * HEALTH_UNIT as f64) as i32;
        self.building.complete = false;
        self.resistance *= PIPE_UPGRADE_RESISTANCE_FACTOR;
        Ok(())
    }

    /// Damage entry point. Pipes have health proportional to their length;
    /// to close the rules loophole that would make long pipes tough
    /// targets per-cell, damage is multiplied by the length.
    pub fn take_damage(&mut self, level: f64, difficulty: &Difficulty) -> bool {
        let scaled = level * (self.length + 1.0);
        self.building
            .take_damage((scaled * difficulty.damage_factor) as i32)
    }

    pub fn toggle_valve(&mut self) {
        self.valve_open = !self.valve_open;
    }

    /// Human-readable status lines for the info panel.
    pub fn information(&self) -> Vec<String> {
        vec![
            "Pipe".to_string(),
            format!("{:.1} km", self.length),
            format!("Flow rate: {:.1} U", self.current_n1_to_n2.abs()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Well and Rock
// ---------------------------------------------------------------------------

/// A steam well: the substrate well nodes are built on. Survives being
/// covered and reappears when the covering node is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Well {
    pub position: GridPosition,
}

impl Well {
    pub fn new(position: GridPosition) -> Self {
        Self { position }
    }
}

/// A metal ore deposit, mined by nearby connected nodes until depleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rock {
    pub position: GridPosition,
    /// Remaining ore.
    pub quantity: f64,
    /// Visual size class (1..=3); also scales the initial quantity.
    pub size: u32,
}

impl Rock {
    pub fn new(position: GridPosition, size: u32, quantity: f64) -> Self {
        Self {
            position,
            quantity,
            size,
        }
    }

    /// Extract one tick's worth of ore for a digger at the given distance.
    /// Yield falls off with distance and is capped by what remains.
    pub fn dig(&mut self, distance: f64) -> f64 {
        if self.quantity <= 0.0 {
            return 0.0;
        }
        let chunk = (1.5 / (distance + 1.0)).min(self.quantity);
        self.quantity -= chunk;
        chunk
    }
}

// ===========================================================================
// Tests
// ===========================================================================
