//! Gameplay tuning constants, difficulty presets, and game parameters.
//!
//! Everything numeric that designers tune lives here. Constants are fixed
//! across a game; [`Difficulty`] values vary per preset and are chosen at
//! game creation; [`GameParams`] bundles the map-generation inputs.

use crate::grid::GridPosition;
use crate::sim::Ticks;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Steam
// ---------------------------------------------------------------------------

/// Starting reservoir capacity of every node.
pub const INITIAL_NODE_CAPACITY: f64 = 50.0;

/// Capacity added by each tech upgrade.
pub const CAPACITY_UPGRADE: f64 = 15.0;

/// Resistance per unit of pipe length: resistance = (length + 2) * factor.
pub const RESISTANCE_FACTOR: f64 = 0.55;

/// Steam the city consumes per available work unit, per tick.
pub const WORK_STEAM_DEMAND: f64 = 4.52;

/// Baseline steam the city consumes regardless of work units.
pub const STATIC_STEAM_DEMAND: f64 = 2.85;

// ---------------------------------------------------------------------------
// Work and health
// ---------------------------------------------------------------------------

/// Health granularity. All max-health figures are multiples of this.
pub const HEALTH_UNIT: i32 = 10;

/// Health restored by one work point.
pub const WORK_UNIT_SIZE: i32 = 1;

/// Node max health, in health units.
pub const NODE_HEALTH_UNITS: i32 = 20;

/// Damage inflicted by one storm hit (before difficulty scaling).
pub const STORM_DAMAGE: f64 = 1.0;

// ---------------------------------------------------------------------------
// Upgrades
// ---------------------------------------------------------------------------

/// Highest tech level a node can reach.
pub const NODE_MAX_TECH_LEVEL: u32 = 5;

/// Extra health units added by a node upgrade.
pub const NODE_UPGRADE_WORK: i32 = 10;

/// Base work units for a city upgrade (scaled further per level).
pub const CITY_UPGRADE_WORK: i32 = 15;

/// Highest tech level a pipe can reach.
pub const PIPE_MAX_TECH_LEVEL: u32 = 3;

/// Extra health per unit length added by a pipe upgrade.
pub const PIPE_UPGRADE_WORK_FACTOR: f64 = 1.0;

/// Multiplier applied to pipe resistance on each upgrade (lower is better).
pub const PIPE_UPGRADE_RESISTANCE_FACTOR: f64 = 0.8;

// ---------------------------------------------------------------------------
// Excavation and economy
// ---------------------------------------------------------------------------

/// Radius within which a node mines nearby rocks.
pub const INITIAL_NODE_EXCAVATION_DISTANCE: f64 = 8.0;

/// Metal the city starts with.
pub const CITY_INITIAL_METAL: f64 = 500.0;

/// Metal cost of a standard node.
pub const METAL_COST_NODE: u32 = 75;

/// Metal cost of a well node.
pub const METAL_COST_WELL_NODE: u32 = 25;

/// Metal cost of a node upgrade.
pub const METAL_COST_NODE_UPGRADE: u32 = 50;

/// Metal cost of anything without a listed price.
pub const METAL_COST_DEFAULT: u32 = 40;

// ---------------------------------------------------------------------------
// Pressure readout thresholds (for gauges; no simulation effect)
// ---------------------------------------------------------------------------

pub const PRESSURE_DANGER: f64 = 4.0;
pub const PRESSURE_WARNING: f64 = 6.0;
pub const PRESSURE_OK: f64 = 8.0;
pub const PRESSURE_GOOD: f64 = 10.0;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Simulation ticks per second of game time.
pub const TICK_RATE: Ticks = 35;

/// How long a popup health meter stays up after a work event.
pub const POPUP_TTL_TICKS: Ticks = 4 * TICK_RATE;

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

/// Values that vary with the selected difficulty preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difficulty {
    /// Multiplier applied to all incoming damage.
    pub damage_factor: f64,
    /// Extra work units a city upgrade costs per current tech level.
    pub city_upgrade_work_per_level: i32,
    /// Highest tech level the city can reach.
    pub city_max_tech_level: u32,
    /// Steam produced by a well node at tech level 0 (base term).
    pub basic_steam_production: f64,
    /// Additional production per tech level.
    pub steam_production_per_level: f64,
    /// Ore units per unit of rock size.
    pub rock_quantity: i32,
}

impl Difficulty {
    pub fn beginner() -> Self {
        Self {
            damage_factor: 1.0,
            city_upgrade_work_per_level: 2,
            city_max_tech_level: 9,
            basic_steam_production: 10.0,
            steam_production_per_level: 6.0,
            rock_quantity: 3000,
        }
    }

    pub fn intermediate() -> Self {
        Self {
            damage_factor: 1.4,
            city_upgrade_work_per_level: 3,
            city_max_tech_level: 12,
            basic_steam_production: 6.0,
            steam_production_per_level: 4.0,
            rock_quantity: 2000,
        }
    }

    pub fn expert() -> Self {
        Self {
            damage_factor: 1.7,
            city_upgrade_work_per_level: 4,
            city_max_tech_level: 15,
            basic_steam_production: 4.0,
            steam_production_per_level: 3.0,
            rock_quantity: 1000,
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::intermediate()
    }
}

// ---------------------------------------------------------------------------
// Game parameters
// ---------------------------------------------------------------------------

/// Map-generation inputs: grid dimensions and feature counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameParams {
    /// Grid dimensions (cells).
    pub grid_size: (i32, i32),
    /// Where the city is founded.
    pub centre: GridPosition,
    /// Scattered wells to place (excluding the bootstrap well).
    pub well_count: u32,
    /// Rocks to place.
    pub rock_count: u32,
    /// Difficulty preset.
    pub difficulty: Difficulty,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            grid_size: (50, 50),
            centre: GridPosition::new(25, 25),
            well_count: 10,
            rock_count: 5,
            difficulty: Difficulty::default(),
        }
    }
}
