//! Per-node steam pressure model.
//!
//! Each node owns one [`SteamModel`]: a reservoir with a pressure, a
//! capacity, and an accumulator of sourced steam for the coming tick.
//! Once per tick the network calls [`SteamModel::think`] with the pressures
//! of the node's conducting neighbours; flow to each neighbour follows the
//! resistive-network analogy, flow = delta-pressure / resistance.
//!
//! Sign convention: a returned current is positive when this node is
//! sending steam to that neighbour. Callers push the signed value back
//! into the connecting pipe, oriented n1 -> n2.

use crate::config::{CAPACITY_UPGRADE, INITIAL_NODE_CAPACITY};
use serde::{Deserialize, Serialize};

/// A node's steam reservoir and its per-tick relaxation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamModel {
    pressure: f64,
    capacity: f64,
    /// Steam added (or, negative, demanded) since the last `think`.
    sourced: f64,
    /// True when the last `think` clamped pressure at capacity. Cosmetic:
    /// drives the hissing-leak alarm, nothing mechanical.
    pub venting: bool,
}

impl SteamModel {
    pub fn new() -> Self {
        Self {
            pressure: 0.0,
            capacity: INITIAL_NODE_CAPACITY,
            sourced: 0.0,
            venting: false,
        }
    }

    /// Add steam to the reservoir for the coming tick, independent of
    /// neighbours. Negative amounts model consumers (city demand).
    pub fn source(&mut self, amount: f64) {
        self.sourced += amount;
    }

    /// One relaxation step against the given `(peer_pressure, resistance)`
    /// neighbours. Returns the signed current toward each neighbour, in
    /// input order (positive = outgoing).
    ///
    /// Pressure never goes negative, and excess above capacity vents to
    /// the atmosphere (setting the `venting` flag).
    pub fn think(&mut self, neighbours: &[(f64, f64)]) -> Vec<f64> {
        let mut currents = Vec::with_capacity(neighbours.len());
        let mut delta = self.sourced;
        self.sourced = 0.0;

        for &(peer_pressure, resistance) in neighbours {
            debug_assert!(resistance > 0.0, "pipe resistance must be positive");
            let current = (self.pressure - peer_pressure) / resistance;
            currents.push(current);
            delta -= current;
        }

        self.pressure += delta;
        self.venting = false;
        if self.pressure > self.capacity {
            self.pressure = self.capacity;
            self.venting = true;
        }
        if self.pressure < 0.0 {
            self.pressure = 0.0;
        }
        currents
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Raise the reservoir ceiling by one upgrade step.
    pub fn capacity_upgrade(&mut self) {
        self.capacity += CAPACITY_UPGRADE;
    }
}

impl Default for SteamModel {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
