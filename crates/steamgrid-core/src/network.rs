//! The steam transport network: the aggregate root of the simulation.
//!
//! Owns every node, pipe, well, and rock, the two spatial indices
//! (`ground_grid` for topmost items, `pipe_grid` for pipe paths), the
//! connectivity epoch counter, and the event buffer. All player and
//! remote commands mutate the network through the validating entry
//! points here; each tick the driving loop calls [`Network::step`].
//!
//! # Tick pipeline
//!
//! 1. `steam_think` — relax every node's pressure against its neighbours.
//! 2. `work_pulse` — wavefront reachability sweep + work distribution.
//! 3. `dig_metal` — connected nodes mine nearby rocks into the stockpile.
//! 4. `expire_popups` — retire stale popup meters.
//!
//! # Connectivity epochs
//!
//! Reachability is stamped with a monotonic `connection_value` instead of
//! a visited flag: one sweep increments the counter once and stamps every
//! building it reaches, so resetting the sweep is O(1) on any network
//! size. `is_connected` is epoch equality against the latest sweep.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::config::{self, GameParams, POPUP_TTL_TICKS};
use crate::event::{Event, SoundCue};
use crate::grid::{GridPosition, line_cells, segment_crosses_cell, segments_cross};
use crate::id::{BuildingRef, NodeId, PipeId, RockId, WellId};
use crate::item::{CompletedWork, Node, NodeKind, NodeWorkOutcome, Pipe, Rock, UpgradeError, Well};
use crate::rng::SimRng;
use crate::sim::{StateHash, Ticks};

/// Give up map-feature placement after this many rejected candidates.
const MAX_PLACEMENT_ATTEMPTS: u32 = 1000;

// ---------------------------------------------------------------------------
// Errors and purchases
// ---------------------------------------------------------------------------

/// Rejections from placement and economy entry points. Recoverable,
/// user-facing; the attempted mutation is not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("item is destroyed")]
    ItemDestroyed,
    #[error("pipe in the way")]
    PipeInTheWay,
    #[error("building in the way")]
    CellOccupied,
    #[error("endpoint is destroyed")]
    EndpointDestroyed,
    #[error("pipe collides with other items")]
    PathBlocked,
    #[error("there is already a pipe there")]
    DuplicatePipe,
    #[error("crosses an existing pipe")]
    PipeCrossing,
    #[error("pipe collides with a rock")]
    RockInTheWay,
    #[error("insufficient metal: {cost} units required")]
    InsufficientMetal { cost: u32 },
}

/// Things metal can be spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purchase {
    Node,
    WellNode,
    NodeUpgrade,
    /// Anything without a listed price.
    Other,
}

impl Purchase {
    pub fn cost(self) -> u32 {
        match self {
            Purchase::Node => config::METAL_COST_NODE,
            Purchase::WellNode => config::METAL_COST_WELL_NODE,
            Purchase::NodeUpgrade => config::METAL_COST_NODE_UPGRADE,
            Purchase::Other => config::METAL_COST_DEFAULT,
        }
    }
}

// ---------------------------------------------------------------------------
// Ground occupancy
// ---------------------------------------------------------------------------

/// The topmost item on a ground cell. A covered well is not here — it
/// lives in the covering node's `covered` slot until the node dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroundItem {
    Node(NodeId),
    Well(WellId),
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The steam-distribution network. See the module docs for the tick
/// pipeline and connectivity-epoch design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    nodes: SlotMap<NodeId, Node>,
    pipes: SlotMap<PipeId, Pipe>,
    wells: SlotMap<WellId, Well>,
    rocks: SlotMap<RockId, Rock>,

    /// Topmost item per occupied cell.
    ground_grid: BTreeMap<GridPosition, GroundItem>,
    /// Pipes whose path crosses each cell. Destroyed pipes are pruned
    /// lazily on the next lookup rather than eagerly on destruction.
    pipe_grid: BTreeMap<GridPosition, Vec<PipeId>>,

    hub: NodeId,
    /// Epoch counter for the reachability sweep, incremented once per
    /// `work_pulse` call.
    connection_value: u64,
    /// Popup meters by building, mapped to their expiry tick.
    popups: BTreeMap<BuildingRef, Ticks>,

    /// Pending events, drained by the frontend each frame. Transient.
    #[serde(skip)]
    events: Vec<Event>,

    params: GameParams,
    rng: SimRng,
    tick: Ticks,
}

impl Network {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    fn empty(params: GameParams, seed: u64) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            pipes: SlotMap::with_key(),
            wells: SlotMap::with_key(),
            rocks: SlotMap::with_key(),
            ground_grid: BTreeMap::new(),
            pipe_grid: BTreeMap::new(),
            hub: NodeId::default(),
            connection_value: 0,
            popups: BTreeMap::new(),
            events: Vec::new(),
            params,
            rng: SimRng::new(seed),
            tick: 0,
        }
    }

    /// A network with just the city hub at the configured centre. Used
    /// when the map layout comes from elsewhere (a multiplayer server, a
    /// test fixture) instead of local generation.
    pub fn new_bare(params: GameParams, seed: u64) -> Self {
        let mut net = Self::empty(params, seed);
        let centre = net.params.centre;
        let hub = net.add_finished_node(Node::new_city(centre));
        net.hub = hub;
        net.work_pulse(0);
        net.events.clear();
        net
    }

    /// A freshly generated single-player map: scattered wells, a bootstrap
    /// well + finished well node near the city, a pre-built pipe linking
    /// them, and a handful of rocks. Deterministic for a given seed.
    pub fn new_game(params: GameParams, seed: u64) -> Self {
        let mut net = Self::empty(params, seed);
        let centre = net.params.centre;

        // Scattered wells, all at a respectful distance from the city.
        for _ in 0..net.params.well_count {
            net.make_well();
        }

        // An additional bootstrap well, plus node, close to the city.
        let wpos = centre.offset(5, net.rng.range_i32(-3, 3));
        let _ = net.add_well(Well::new(wpos));
        let well_node = net.add_finished_node(Node::new_well_node(wpos));

        let hub = net.add_finished_node(Node::new_city(centre));
        net.hub = hub;

        // Pipe links the two, pre-built.
        let pid = net
            .add_pipe(hub, well_node)
            .expect("bootstrap pipe path is clear by construction");
        let pipe = &mut net.pipes[pid];
        pipe.building.health = pipe.building.max_health;
        pipe.building.do_work();

        // Initial connection map.
        net.work_pulse(0);

        net.place_rocks();
        net.refresh_rock_caches();

        // Setup feedback is not part of the game.
        net.events.clear();
        net
    }

    /// Add a node that starts life fully built (map generation, remote
    /// `set_finished_node`).
    pub fn add_finished_node(&mut self, mut node: Node) -> NodeId {
        node.building.health = node.building.max_health;
        node.building.do_work();
        self.add_node(node)
            .expect("finished node placed on an invalid cell")
    }

    /// Place a new well at a random free cell away from the city.
    pub fn make_well(&mut self) -> Option<WellId> {
        let (mx, my) = self.params.grid_size;
        let centre = self.params.centre;
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let pos = GridPosition::new(
                self.rng.range_i32(0, mx - 1),
                self.rng.range_i32(0, my - 1),
            );
            if self.ground_grid.contains_key(&pos) || pos.distance(centre) < 10.0 {
                continue;
            }
            return self.add_well(Well::new(pos)).ok();
        }
        None
    }

    fn place_rocks(&mut self) {
        let centre = self.params.centre;
        let rq = self.params.difficulty.rock_quantity;
        let mut attempts = 0;
        while (self.rocks.len() as u32) < self.params.rock_count
            && attempts < MAX_PLACEMENT_ATTEMPTS
        {
            attempts += 1;
            let pos = centre.offset(self.rng.range_i32(-20, 20), self.rng.range_i32(-20, 20));
            let rejected = pos.distance(centre) < 7.0
                || self.ground_grid.contains_key(&pos)
                || self.wells.values().any(|w| pos.distance(w.position) < 5.0)
                || self.rocks.values().any(|r| pos.distance(r.position) < 5.0);
            if rejected {
                continue;
            }
            let size = self.rng.range_i32(1, 3) as u32;
            let quantity = (size as i32 * rq + self.rng.range_i32(1, rq)) as f64;
            self.rocks.insert(Rock::new(pos, size, quantity));
        }
    }

    fn refresh_rock_caches(&mut self) {
        let rocks: Vec<(RockId, GridPosition)> =
            self.rocks.iter().map(|(id, r)| (id, r.position)).collect();
        for node in self.nodes.values_mut() {
            node.locate_nearby_rocks(rocks.iter().copied());
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn hub(&self) -> NodeId {
        self.hub
    }

    pub fn tick(&self) -> Ticks {
        self.tick
    }

    pub fn connection_value(&self) -> u64 {
        self.connection_value
    }

    pub fn params(&self) -> &GameParams {
        &self.params
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn pipe(&self, id: PipeId) -> Option<&Pipe> {
        self.pipes.get(id)
    }

    pub fn pipe_mut(&mut self, id: PipeId) -> Option<&mut Pipe> {
        self.pipes.get_mut(id)
    }

    pub fn well(&self, id: WellId) -> Option<&Well> {
        self.wells.get(id)
    }

    pub fn rock(&self, id: RockId) -> Option<&Rock> {
        self.rocks.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn pipes(&self) -> impl Iterator<Item = (PipeId, &Pipe)> {
        self.pipes.iter()
    }

    pub fn wells(&self) -> impl Iterator<Item = (WellId, &Well)> {
        self.wells.iter()
    }

    pub fn rocks(&self) -> impl Iterator<Item = (RockId, &Rock)> {
        self.rocks.iter()
    }

    /// The topmost item on a cell.
    pub fn ground_item(&self, pos: GridPosition) -> Option<GroundItem> {
        self.ground_grid.get(&pos).copied()
    }

    /// Buildings with a live popup meter.
    pub fn popups(&self) -> impl Iterator<Item = BuildingRef> + '_ {
        self.popups.keys().copied()
    }

    /// Take all pending events. The frontend calls this once per frame.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Post a message line for the player.
    pub fn notify(&mut self, text: impl Into<String>) {
        let tick = self.tick;
        self.events.push(Event::Notice {
            text: text.into(),
            tick,
        });
    }

    fn cue(&mut self, cue: SoundCue) {
        let tick = self.tick;
        self.events.push(Event::Cue { cue, tick });
    }

    // -----------------------------------------------------------------------
    // Tick pipeline
    // -----------------------------------------------------------------------

    /// Advance the simulation by one tick through the fixed pipeline.
    pub fn step(&mut self) {
        self.steam_think();
        let work_points = self.avail_work_units();
        self.work_pulse(work_points);
        self.dig_metal();
        self.expire_popups();
        self.tick += 1;
    }

    /// The hub's parallel construction capacity.
    pub fn avail_work_units(&self) -> u32 {
        match self.nodes.get(self.hub).map(|n| &n.kind) {
            Some(NodeKind::City(city)) => city.avail_work_units,
            _ => 0,
        }
    }

    /// Relax every node's pressure against its conducting neighbours and
    /// push the resulting currents back into the pipes.
    ///
    /// A pipe conducts iff its valve is open, the pipe itself is not
    /// broken, and neither endpoint is broken. Non-conducting pipes read
    /// as zero flow.
    pub fn steam_think(&mut self) {
        let difficulty = self.params.difficulty.clone();
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in ids {
            // Source phase, by node kind.
            {
                let node = &mut self.nodes[id];
                match &mut node.kind {
                    NodeKind::City(city) => {
                        let demand = city.avail_work_units as f64 * config::WORK_STEAM_DEMAND
                            + config::STATIC_STEAM_DEMAND;
                        city.total_steam += demand;
                        node.steam.source(-demand);
                    }
                    NodeKind::Well(well) => {
                        if node.building.needs_work() {
                            well.production = 0.0;
                        } else {
                            well.production = difficulty.basic_steam_production
                                + node.building.tech_level as f64
                                    * difficulty.steam_production_per_level;
                            node.steam.source(well.production);
                        }
                    }
                    NodeKind::Standard => {}
                }
            }

            // Gather conducting neighbours.
            let self_broken = self.nodes[id].is_broken();
            let pipe_ids = self.nodes[id].pipes.clone();
            let mut conducting: Vec<(PipeId, f64, f64)> = Vec::with_capacity(pipe_ids.len());
            for pid in pipe_ids {
                let Some(pipe) = self.pipes.get(pid) else {
                    debug_assert!(false, "exit list holds a destroyed pipe");
                    continue;
                };
                let peer = pipe.other_end(id);
                let open_ok = pipe.valve_open && !pipe.building.is_broken();
                let resistance = pipe.resistance;
                let peer_broken = self.nodes.get(peer).is_none_or(|n| n.is_broken());
                if open_ok && !self_broken && !peer_broken {
                    conducting.push((pid, self.nodes[peer].steam.pressure(), resistance));
                } else if let Some(pipe) = self.pipes.get_mut(pid) {
                    pipe.current_n1_to_n2 = 0.0;
                }
            }

            // Relax, then write outgoing currents into the pipes.
            let was_venting = self.nodes[id].steam.venting;
            let neighbours: Vec<(f64, f64)> =
                conducting.iter().map(|&(_, p, r)| (p, r)).collect();
            let currents = self.nodes[id].steam.think(&neighbours);
            for (&(pid, _, _), current) in conducting.iter().zip(currents) {
                if current > 0.0 {
                    self.pipes[pid].set_flow_from(id, current);
                }
            }

            let now_venting = self.nodes[id].steam.venting;
            if now_venting && !was_venting {
                self.cue(SoundCue::VentingHiss);
                let tick = self.tick;
                self.events.push(Event::VentingStarted { node: id, tick });
            } else if !now_venting && was_venting {
                let tick = self.tick;
                self.events.push(Event::VentingStopped { node: id, tick });
            }
        }
    }

    /// One wavefront sweep from the hub: stamp everything reachable with a
    /// fresh connection epoch and spend up to `work_points` on the first
    /// unfinished buildings in visitation (FIFO) order.
    ///
    /// Broken buildings are reachable themselves but block propagation
    /// beyond them: a broken node does not enqueue its pipes, and a closed
    /// or broken pipe does not enqueue its far endpoint.
    ///
    /// Returns the number of work points spent.
    pub fn work_pulse(&mut self, mut work_points: u32) -> u32 {
        self.connection_value += 1;
        let cv = self.connection_value;
        let mut used = 0;

        let mut frontier: VecDeque<BuildingRef> = VecDeque::new();
        frontier.push_back(BuildingRef::Node(self.hub));

        while let Some(item) = frontier.pop_front() {
            match item {
                BuildingRef::Node(id) => {
                    let Some(node) = self.nodes.get_mut(id) else {
                        continue;
                    };
                    if node.building.connection_value == cv {
                        continue;
                    }
                    node.building.connection_value = cv;

                    let mut outcome = NodeWorkOutcome::Nothing;
                    let mut worked = false;
                    if work_points > 0 && node.needs_work() {
                        outcome = node.do_work();
                        work_points -= 1;
                        used += 1;
                        worked = true;
                    }

                    let exits: Vec<PipeId> = if node.is_broken() {
                        Vec::new()
                    } else {
                        node.pipes.clone()
                    };

                    if worked {
                        self.popup(BuildingRef::Node(id));
                    }
                    self.emit_node_work(outcome);
                    for pid in exits {
                        frontier.push_back(BuildingRef::Pipe(pid));
                    }
                }
                BuildingRef::Pipe(pid) => {
                    let Some(pipe) = self.pipes.get_mut(pid) else {
                        continue;
                    };
                    if pipe.building.connection_value == cv {
                        continue;
                    }
                    pipe.building.connection_value = cv;

                    let mut completed = None;
                    let mut worked = false;
                    if work_points > 0 && pipe.building.needs_work() {
                        completed = pipe.building.do_work();
                        work_points -= 1;
                        used += 1;
                        worked = true;
                    }

                    let conducts = pipe.valve_open && !pipe.building.is_broken();
                    let (a, b) = (pipe.n1, pipe.n2);

                    if worked {
                        self.popup(BuildingRef::Pipe(pid));
                    }
                    self.emit_completion(completed);
                    if conducts {
                        frontier.push_back(BuildingRef::Node(a));
                        frontier.push_back(BuildingRef::Node(b));
                    }
                }
            }
        }
        used
    }

    fn emit_node_work(&mut self, outcome: NodeWorkOutcome) {
        match outcome {
            NodeWorkOutcome::Nothing => {}
            NodeWorkOutcome::Completed(done) => self.emit_completion(Some(done)),
            NodeWorkOutcome::CityUpgraded { level } => {
                self.cue(SoundCue::CityUpgradeComplete);
                let max = self.params.difficulty.city_max_tech_level;
                self.notify(format!("City upgraded to level {level} of {max}!"));
            }
        }
    }

    fn emit_completion(&mut self, completed: Option<CompletedWork>) {
        match completed {
            Some(CompletedWork::Built) => self.cue(SoundCue::ConstructionComplete),
            Some(CompletedWork::Repaired) => self.cue(SoundCue::RepairComplete),
            None => {}
        }
    }

    /// Whether a building was reached by the most recent `work_pulse`.
    pub fn is_connected(&self, target: BuildingRef) -> bool {
        let cv = self.connection_value;
        match target {
            BuildingRef::Node(id) => self
                .nodes
                .get(id)
                .is_some_and(|n| n.building.connection_value == cv),
            BuildingRef::Pipe(id) => self
                .pipes
                .get(id)
                .is_some_and(|p| p.building.connection_value == cv),
        }
    }

    /// Every connected node extracts ore from its cached nearby rocks;
    /// the yield lands in the hub's stockpile.
    pub fn dig_metal(&mut self) {
        let cv = self.connection_value;
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        let mut to_hub = 0.0;
        for id in ids {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.building.connection_value != cv {
                continue;
            }
            let nearby = node.rocks_nearby.clone();
            let mut mined = 0.0;
            for (rid, dist) in nearby {
                if let Some(rock) = self.rocks.get_mut(rid) {
                    mined += rock.dig(dist);
                }
            }
            if mined > 0.0 {
                self.nodes[id].metal_mined += mined;
                to_hub += mined;
            }
        }
        if to_hub > 0.0 {
            match self.nodes.get_mut(self.hub).map(|n| &mut n.kind) {
                Some(NodeKind::City(city)) => city.metal_quantity += to_hub,
                _ => debug_assert!(false, "hub is not a city node"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Metal economy
    // -----------------------------------------------------------------------

    /// The hub's current stockpile.
    pub fn metal_quantity(&self) -> f64 {
        match self.nodes.get(self.hub).map(|n| &n.kind) {
            Some(NodeKind::City(city)) => city.metal_quantity,
            _ => 0.0,
        }
    }

    /// Whether the stockpile strictly exceeds the purchase cost.
    pub fn metal_available(&self, purchase: Purchase) -> bool {
        self.metal_quantity() > purchase.cost() as f64
    }

    /// Deduct the purchase cost, or reject without spending anything.
    pub fn use_metal(&mut self, purchase: Purchase) -> Result<u32, BuildError> {
        let cost = purchase.cost();
        if self.metal_available(purchase) {
            match self.nodes.get_mut(self.hub).map(|n| &mut n.kind) {
                Some(NodeKind::City(city)) => {
                    city.metal_quantity -= cost as f64;
                    return Ok(cost);
                }
                _ => debug_assert!(false, "hub is not a city node"),
            }
        }
        self.notify(format!("Insufficient metal: {cost} metal units required."));
        Err(BuildError::InsufficientMetal { cost })
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place a node on the grid. A node may cover a well (making it a
    /// well-node site and keeping the well recoverable); it may not share
    /// a cell with another building or a live pipe's path.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, BuildError> {
        let pos = node.position;

        if node.building.destroyed {
            self.notify("Item is destroyed.");
            return Err(BuildError::ItemDestroyed);
        }
        if self.live_pipe_crossing(pos) {
            self.notify("Can't build there - pipe in the way!");
            self.cue(SoundCue::Error);
            return Err(BuildError::PipeInTheWay);
        }
        if matches!(self.ground_grid.get(&pos), Some(GroundItem::Node(_))) {
            self.notify("Can't build there - building in the way!");
            self.cue(SoundCue::Error);
            return Err(BuildError::CellOccupied);
        }

        let covered = match self.ground_grid.get(&pos) {
            Some(GroundItem::Well(wid)) => Some(*wid),
            _ => None,
        };
        let id = self.nodes.insert(node);
        self.nodes[id].covered = covered;
        self.ground_grid.insert(pos, GroundItem::Node(id));

        let rocks: Vec<(RockId, GridPosition)> =
            self.rocks.iter().map(|(rid, r)| (rid, r.position)).collect();
        self.nodes[id].locate_nearby_rocks(rocks);
        Ok(id)
    }

    /// Register a well. Wells never stack on anything.
    pub fn add_well(&mut self, well: Well) -> Result<WellId, BuildError> {
        let pos = well.position;
        if self.live_pipe_crossing(pos) {
            self.notify("Can't build there - pipe in the way!");
            self.cue(SoundCue::Error);
            return Err(BuildError::PipeInTheWay);
        }
        if self.ground_grid.contains_key(&pos) {
            self.notify("Can't build there - building in the way!");
            self.cue(SoundCue::Error);
            return Err(BuildError::CellOccupied);
        }
        let id = self.wells.insert(well);
        self.ground_grid.insert(pos, GroundItem::Well(id));
        Ok(id)
    }

    /// Whether a live pipe's path geometrically crosses this cell.
    fn live_pipe_crossing(&mut self, pos: GridPosition) -> bool {
        self.prune_pipe_cell(pos);
        let Some(ids) = self.pipe_grid.get(&pos) else {
            return false;
        };
        ids.iter().any(|&pid| {
            let p = &self.pipes[pid];
            let seg = (self.nodes[p.n1].position, self.nodes[p.n2].position);
            segment_crosses_cell(pos, seg)
        })
    }

    /// Drop destroyed pipes from a cell's list, removing the cell entry
    /// entirely once empty.
    fn prune_pipe_cell(&mut self, pos: GridPosition) {
        if let Some(ids) = self.pipe_grid.get_mut(&pos) {
            ids.retain(|pid| self.pipes.contains_key(*pid));
            if ids.is_empty() {
                self.pipe_grid.remove(&pos);
            }
        }
    }

    /// Lay a pipe between two distinct live nodes.
    ///
    /// The straight rasterized path must not touch any occupied cell
    /// other than the endpoints; the segment must not duplicate an
    /// existing edge, cross another pipe, or clip the collision diamond
    /// around any rock.
    pub fn add_pipe(&mut self, n1: NodeId, n2: NodeId) -> Result<PipeId, BuildError> {
        assert_ne!(n1, n2, "a pipe must connect two distinct nodes");

        let (p1, p2) = match (self.nodes.get(n1), self.nodes.get(n2)) {
            (Some(a), Some(b)) if !a.building.destroyed && !b.building.destroyed => {
                (a.position, b.position)
            }
            _ => {
                self.cue(SoundCue::Error);
                self.notify("Nodes are destroyed.");
                return Err(BuildError::EndpointDestroyed);
            }
        };

        // What's in the pipe's path?
        let path = line_cells(p1, p2);
        let mut other_pipes: Vec<PipeId> = Vec::new();
        let mut blocked = false;
        for &cell in &path {
            self.prune_pipe_cell(cell);
            if let Some(ids) = self.pipe_grid.get(&cell) {
                for &pid in ids {
                    if !other_pipes.contains(&pid) {
                        other_pipes.push(pid);
                    }
                }
            } else if let Some(item) = self.ground_grid.get(&cell) {
                let obstructs = match *item {
                    GroundItem::Node(id) => id != n1 && id != n2,
                    GroundItem::Well(_) => true,
                };
                blocked |= obstructs;
            }
        }
        if blocked {
            self.cue(SoundCue::Error);
            self.notify("Pipe collides with other items.");
            return Err(BuildError::PathBlocked);
        }

        for &pid in &other_pipes {
            let (q1, q2, same_edge) = {
                let p = &self.pipes[pid];
                let same = (p.n1 == n1 && p.n2 == n2) || (p.n1 == n2 && p.n2 == n1);
                (
                    self.nodes[p.n1].position,
                    self.nodes[p.n2].position,
                    same,
                )
            };
            if same_edge {
                self.cue(SoundCue::Error);
                self.notify("There is already a pipe there.");
                return Err(BuildError::DuplicatePipe);
            }
            if segments_cross((q1, q2), (p1, p2)) {
                self.cue(SoundCue::Error);
                self.notify("That crosses an existing pipe.");
                return Err(BuildError::PipeCrossing);
            }
        }

        // Rocks collide as a small X of diagonals around their centre, a
        // cheap proxy for their sprite footprint.
        let mut rock_hit = false;
        for rock in self.rocks.values() {
            let r = rock.position;
            let rising = (r.offset(-1, -1), r.offset(1, 1));
            let falling = (r.offset(-1, 1), r.offset(1, -1));
            if segments_cross(rising, (p1, p2)) || segments_cross(falling, (p1, p2)) {
                rock_hit = true;
                break;
            }
        }
        if rock_hit {
            self.cue(SoundCue::Error);
            self.notify("Pipe collides with a rock.");
            return Err(BuildError::RockInTheWay);
        }

        self.cue(SoundCue::PipeLaid);
        let pid = self.pipes.insert(Pipe::new(n1, p1, n2, p2));
        self.nodes[n1].pipes.push(pid);
        self.nodes[n2].pipes.push(pid);
        for &cell in &path {
            self.pipe_grid.entry(cell).or_default().push(pid);
        }
        Ok(pid)
    }

    /// The pipe under a cell, if any. When several pipes share the cell,
    /// rotates through them so repeated clicks cycle the selection.
    pub fn get_pipe(&mut self, pos: GridPosition) -> Option<PipeId> {
        self.prune_pipe_cell(pos);
        let ids = self.pipe_grid.get_mut(&pos)?;
        if ids.len() == 1 {
            Some(ids[0])
        } else {
            let out = ids.remove(0);
            ids.push(out);
            Some(out)
        }
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    /// Destroy a building. Node destruction cascades to every incident
    /// pipe first; a covered well reappears on the vacated cell. The hub
    /// is indestructible. Names the attacker in the notification when
    /// one is given.
    pub fn destroy(&mut self, target: BuildingRef, by: Option<&str>) {
        match target {
            BuildingRef::Pipe(pid) => self.destroy_pipe(pid),
            BuildingRef::Node(id) => {
                if id == self.hub {
                    self.notify("The City is indestructible.");
                    return;
                }
                if !self.nodes.contains_key(id) {
                    return;
                }
                self.cue(SoundCue::Destroyed);

                // Snapshot: destroy_pipe edits the exit list under us.
                let incident: Vec<PipeId> = self.nodes[id].pipes.clone();
                for pid in incident {
                    self.destroy_pipe(pid);
                }

                let node = &mut self.nodes[id];
                node.building.prepare_to_die();
                let pos = node.position;
                let name = node.name();
                let covered = node.covered;

                if let Some(by) = by {
                    self.notify(format!("{name} destroyed by {by}."));
                }

                let on_map =
                    matches!(self.ground_grid.get(&pos), Some(GroundItem::Node(gid)) if *gid == id);
                if on_map {
                    match covered {
                        Some(wid) if self.wells.contains_key(wid) => {
                            self.ground_grid.insert(pos, GroundItem::Well(wid));
                        }
                        _ => {
                            self.ground_grid.remove(&pos);
                        }
                    }
                }
                self.popups.remove(&BuildingRef::Node(id));
                self.nodes.remove(id);
            }
        }
    }

    fn destroy_pipe(&mut self, pid: PipeId) {
        let Some(mut pipe) = self.pipes.remove(pid) else {
            return;
        };
        pipe.building.prepare_to_die();
        for end in [pipe.n1, pipe.n2] {
            if let Some(node) = self.nodes.get_mut(end) {
                let before = node.pipes.len();
                node.pipes.retain(|&p| p != pid);
                debug_assert_eq!(
                    before,
                    node.pipes.len() + 1,
                    "pipe missing from an endpoint's exit list"
                );
            }
        }
        self.popups.remove(&BuildingRef::Pipe(pid));
        // Grid cells are pruned lazily on the next lookup.
    }

    /// Apply difficulty-scaled damage; a fatal hit triggers the full
    /// destruction cascade. Returns true on kill.
    pub fn damage(&mut self, target: BuildingRef, level: f64, by: Option<&str>) -> bool {
        let difficulty = self.params.difficulty.clone();
        let killed = match target {
            BuildingRef::Node(id) => self
                .nodes
                .get_mut(id)
                .is_some_and(|n| n.take_damage(level, &difficulty)),
            BuildingRef::Pipe(id) => self
                .pipes
                .get_mut(id)
                .is_some_and(|p| p.take_damage(level, &difficulty)),
        };
        if killed {
            self.destroy(target, by);
        }
        killed
    }

    // -----------------------------------------------------------------------
    // Upgrades and valves
    // -----------------------------------------------------------------------

    /// Start a tech upgrade on a building. Rejections leave the target
    /// unchanged and surface as a notice plus error cue.
    pub fn begin_upgrade(&mut self, target: BuildingRef) -> Result<(), UpgradeError> {
        let difficulty = self.params.difficulty.clone();
        let (result, name, started) = match target {
            BuildingRef::Node(id) => match self.nodes.get_mut(id) {
                None => (Err(UpgradeError::NotOperational), "Node", None),
                Some(node) if node.is_city() => (
                    node.begin_city_upgrade(&difficulty),
                    "City",
                    Some(SoundCue::CityUpgradeStarted),
                ),
                Some(node) => (
                    node.begin_upgrade(),
                    node.name(),
                    Some(SoundCue::NodeUpgradeStarted),
                ),
            },
            BuildingRef::Pipe(id) => match self.pipes.get_mut(id) {
                None => (Err(UpgradeError::NotOperational), "Pipe", None),
                Some(pipe) => (
                    pipe.begin_upgrade(),
                    "Pipe",
                    Some(SoundCue::PipeUpgradeStarted),
                ),
            },
        };
        match &result {
            Ok(()) => {
                if let Some(cue) = started {
                    self.cue(cue);
                }
            }
            Err(err) => {
                self.cue(SoundCue::Error);
                self.notify(format!("{name} {err}."));
            }
        }
        result
    }

    /// Open or close a pipe's valve.
    pub fn toggle_valve(&mut self, pid: PipeId) {
        if let Some(pipe) = self.pipes.get_mut(pid) {
            pipe.toggle_valve();
            self.cue(SoundCue::ValveMoved);
        }
    }

    // -----------------------------------------------------------------------
    // Popups
    // -----------------------------------------------------------------------

    fn popup(&mut self, target: BuildingRef) {
        self.popups.insert(target, self.tick + POPUP_TTL_TICKS);
    }

    /// Retire popup meters past their time-to-live.
    pub fn expire_popups(&mut self) {
        let now = self.tick;
        self.popups.retain(|_, expiry| *expiry > now);
    }

    // -----------------------------------------------------------------------
    // Hub readouts and multiplayer helpers
    // -----------------------------------------------------------------------

    /// Steam the city draws per tick.
    pub fn hub_steam_demand(&self) -> f64 {
        self.nodes
            .get(self.hub)
            .map_or(0.0, |n| n.city_steam_demand())
    }

    /// Net steam flowing into the city through its pipes.
    pub fn hub_steam_supply(&self) -> f64 {
        let Some(hub) = self.nodes.get(self.hub) else {
            return 0.0;
        };
        hub.pipes
            .iter()
            .filter_map(|&pid| self.pipes.get(pid))
            .map(|p| p.flow_toward(self.hub))
            .sum()
    }

    /// Whether any node we own lies within `max_distance` of a cell.
    /// Multiplayer placement is restricted to the player's own vicinity.
    pub fn is_close_to_owned_node(&self, pos: GridPosition, max_distance: f64) -> bool {
        self.nodes
            .values()
            .any(|n| n.building.owned_by_me && n.position.distance(pos) <= max_distance)
    }

    // -----------------------------------------------------------------------
    // Persistence support
    // -----------------------------------------------------------------------

    /// Clear transient state (popups, pending events, instantaneous flow
    /// readings) and compact the lazily-pruned pipe grid, so a snapshot
    /// holds only durable simulation state.
    pub fn make_ready_for_save(&mut self) {
        self.popups.clear();
        self.events.clear();
        for pipe in self.pipes.values_mut() {
            pipe.current_n1_to_n2 = 0.0;
        }
        let cells: Vec<GridPosition> = self.pipe_grid.keys().copied().collect();
        for cell in cells {
            self.prune_pipe_cell(cell);
        }
    }

    /// Deterministic digest of the simulation state, for desync checks.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.tick);
        h.write_u64(self.connection_value);
        h.write_u64(self.rng.state());
        for (_, node) in &self.nodes {
            h.write_i32(node.building.health);
            h.write_u64(node.building.tech_level as u64);
            h.write_f64(node.steam.pressure());
            if let NodeKind::City(city) = &node.kind {
                h.write_f64(city.metal_quantity);
                h.write_u64(city.avail_work_units as u64);
            }
        }
        for (_, pipe) in &self.pipes {
            h.write_i32(pipe.building.health);
            h.write_f64(pipe.resistance);
            h.write_f64(pipe.current_n1_to_n2);
        }
        for (_, rock) in &self.rocks {
            h.write_f64(rock.quantity);
        }
        h.finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Difficulty;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn bare() -> Network {
        Network::new_bare(GameParams::default(), 1)
    }

    fn built_node(net: &mut Network, x: i32, y: i32) -> NodeId {
        net.add_finished_node(Node::new(GridPosition::new(x, y)))
    }

    fn raw_node(net: &mut Network, x: i32, y: i32) -> NodeId {
        net.add_node(Node::new(GridPosition::new(x, y))).unwrap()
    }

    /// Lay a pipe and finish its construction.
    fn connect(net: &mut Network, a: NodeId, b: NodeId) -> PipeId {
        let pid = net.add_pipe(a, b).unwrap();
        let pipe = net.pipe_mut(pid).unwrap();
        pipe.building.health = pipe.building.max_health;
        pipe.building.do_work();
        pid
    }

    fn gp(x: i32, y: i32) -> GridPosition {
        GridPosition::new(x, y)
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    #[test]
    fn hub_is_always_connected() {
        let mut net = bare();
        net.work_pulse(0);
        assert!(net.is_connected(BuildingRef::Node(net.hub())));
    }

    #[test]
    fn chain_of_finished_nodes_is_connected() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 29, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        connect(&mut net, a, b);

        net.work_pulse(0);
        assert!(net.is_connected(BuildingRef::Node(a)));
        assert!(net.is_connected(BuildingRef::Node(b)));
    }

    #[test]
    fn unreached_node_is_not_connected() {
        let mut net = bare();
        let lone = built_node(&mut net, 40, 40);
        net.work_pulse(0);
        assert!(!net.is_connected(BuildingRef::Node(lone)));
    }

    #[test]
    fn broken_pipe_blocks_reachability_but_is_itself_reached() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let pid = net.add_pipe(net.hub(), a).unwrap(); // unbuilt pipe

        net.work_pulse(0);
        assert!(net.is_connected(BuildingRef::Pipe(pid)));
        assert!(!net.is_connected(BuildingRef::Node(a)));
    }

    #[test]
    fn closed_valve_blocks_reachability() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let pid = { let hub = net.hub(); connect(&mut net, hub, a) };

        net.work_pulse(0);
        assert!(net.is_connected(BuildingRef::Node(a)));

        net.toggle_valve(pid);
        net.work_pulse(0);
        assert!(!net.is_connected(BuildingRef::Node(a)));
    }

    #[test]
    fn cannot_reach_past_a_broken_node() {
        let mut net = bare();
        let a = raw_node(&mut net, 27, 25); // broken: never built
        let b = built_node(&mut net, 29, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        connect(&mut net, a, b);

        net.work_pulse(0);
        // The broken node itself is reached...
        assert!(net.is_connected(BuildingRef::Node(a)));
        // ...but nothing beyond it is.
        assert!(!net.is_connected(BuildingRef::Node(b)));
    }

    #[test]
    fn epoch_stamps_go_stale_after_next_pulse() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let pid = { let hub = net.hub(); connect(&mut net, hub, a) };

        net.work_pulse(0);
        assert!(net.is_connected(BuildingRef::Node(a)));

        // Cut the link; the next sweep must not re-stamp the node even
        // though its old stamp is still stored.
        net.destroy(BuildingRef::Pipe(pid), None);
        net.work_pulse(0);
        assert!(!net.is_connected(BuildingRef::Node(a)));
    }

    // -----------------------------------------------------------------------
    // Work distribution
    // -----------------------------------------------------------------------

    #[test]
    fn work_goes_to_first_unfinished_building_in_sweep_order() {
        let mut net = bare();
        let a = raw_node(&mut net, 27, 25);
        let pid = net.add_pipe(net.hub(), a).unwrap();

        // One work point: the unbuilt pipe is encountered before the node
        // behind it.
        let used = net.work_pulse(1);
        assert_eq!(used, 1);
        assert_eq!(net.pipe(pid).unwrap().building.health, 1);
        assert_eq!(net.node(a).unwrap().building.health, 0);
    }

    #[test]
    fn work_points_limit_actions_per_pulse() {
        let mut net = bare();
        let a = raw_node(&mut net, 27, 25);
        let b = raw_node(&mut net, 25, 27);
        let pa = net.add_pipe(net.hub(), a).unwrap();
        let pb = net.add_pipe(net.hub(), b).unwrap();

        let used = net.work_pulse(2);
        assert_eq!(used, 2);
        // Both pipes got one point; neither node was reachable yet.
        assert_eq!(net.pipe(pa).unwrap().building.health, 1);
        assert_eq!(net.pipe(pb).unwrap().building.health, 1);
    }

    #[test]
    fn work_pulse_returns_zero_on_finished_network() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        assert_eq!(net.work_pulse(5), 0);
    }

    #[test]
    fn work_spawns_popup_that_expires() {
        let mut net = bare();
        let a = raw_node(&mut net, 27, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        // One work point from done: further pulses won't refresh the popup.
        let node = net.node_mut(a).unwrap();
        node.building.health = node.building.max_health - 1;

        net.work_pulse(1);
        assert!(net.popups().any(|p| p == BuildingRef::Node(a)));

        // Popups survive until their TTL elapses.
        for _ in 0..POPUP_TTL_TICKS + 1 {
            net.step();
        }
        assert!(!net.popups().any(|p| p == BuildingRef::Node(a)));
    }

    // -----------------------------------------------------------------------
    // Pipe placement
    // -----------------------------------------------------------------------

    #[test]
    fn adjacent_unobstructed_pipe_succeeds() {
        let mut net = bare();
        let a = built_node(&mut net, 26, 25);
        assert!(net.add_pipe(net.hub(), a).is_ok());
    }

    #[test]
    fn duplicate_pipe_rejected_in_both_orders() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };

        assert_eq!(
            net.add_pipe(net.hub(), a),
            Err(BuildError::DuplicatePipe)
        );
        assert_eq!(
            net.add_pipe(a, net.hub()),
            Err(BuildError::DuplicatePipe)
        );
        assert_eq!(net.pipes().count(), 1);
    }

    #[test]
    fn pipe_through_occupied_cell_rejected() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 31, 25);
        // A third node sits exactly on the straight path.
        let _blocker = built_node(&mut net, 29, 25);

        assert_eq!(net.add_pipe(a, b), Err(BuildError::PathBlocked));
    }

    #[test]
    fn crossing_pipes_rejected() {
        let mut net = bare();
        let a = built_node(&mut net, 30, 20);
        let b = built_node(&mut net, 30, 30);
        let c = built_node(&mut net, 27, 25);
        let d = built_node(&mut net, 33, 25);
        connect(&mut net, a, b);

        assert_eq!(net.add_pipe(c, d), Err(BuildError::PipeCrossing));
    }

    #[test]
    fn pipes_sharing_an_endpoint_are_not_crossing() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 27, 28);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        assert!(net.add_pipe(a, b).is_ok());
    }

    #[test]
    fn pipe_to_destroyed_node_rejected() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 29, 25);
        net.destroy(BuildingRef::Node(b), None);

        assert_eq!(net.add_pipe(a, b), Err(BuildError::EndpointDestroyed));
    }

    #[test]
    fn pipe_through_rock_diamond_rejected() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 33, 25);
        net.rocks.insert(Rock::new(gp(30, 25), 2, 1000.0));

        assert_eq!(net.add_pipe(a, b), Err(BuildError::RockInTheWay));
    }

    #[test]
    fn rejected_pipe_leaves_no_trace() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 31, 25);
        let _blocker = built_node(&mut net, 29, 25);

        let before_exits = net.node(a).unwrap().pipes.len();
        assert!(net.add_pipe(a, b).is_err());
        assert_eq!(net.node(a).unwrap().pipes.len(), before_exits);
        assert_eq!(net.pipes().count(), 0);
    }

    // -----------------------------------------------------------------------
    // Node placement
    // -----------------------------------------------------------------------

    #[test]
    fn node_on_building_rejected() {
        let mut net = bare();
        let centre = net.params().centre;
        assert_eq!(
            net.add_node(Node::new(centre)),
            Err(BuildError::CellOccupied)
        );
    }

    #[test]
    fn node_on_live_pipe_path_rejected() {
        let mut net = bare();
        let a = built_node(&mut net, 29, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };

        assert_eq!(
            net.add_node(Node::new(gp(27, 25))),
            Err(BuildError::PipeInTheWay)
        );
    }

    #[test]
    fn node_can_build_where_pipe_was_destroyed() {
        let mut net = bare();
        let a = built_node(&mut net, 29, 25);
        let pid = { let hub = net.hub(); connect(&mut net, hub, a) };
        net.destroy(BuildingRef::Pipe(pid), None);

        // The stale grid entry is pruned lazily; placement must succeed.
        assert!(net.add_node(Node::new(gp(27, 25))).is_ok());
    }

    #[test]
    fn node_covers_well_and_destroy_restores_it() {
        let mut net = bare();
        let wpos = gp(30, 30);
        let wid = net.add_well(Well::new(wpos)).unwrap();

        let nid = net
            .add_node(Node::new_well_node(wpos))
            .expect("node stacks on a well");
        assert_eq!(net.ground_item(wpos), Some(GroundItem::Node(nid)));
        assert_eq!(net.node(nid).unwrap().covered, Some(wid));

        net.destroy(BuildingRef::Node(nid), None);
        assert_eq!(net.ground_item(wpos), Some(GroundItem::Well(wid)));
        assert!(net.node(nid).is_none());
    }

    #[test]
    fn destroyed_item_rejected_on_placement() {
        let mut net = bare();
        let mut node = Node::new(gp(40, 40));
        node.building.prepare_to_die();
        assert_eq!(net.add_node(node), Err(BuildError::ItemDestroyed));
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    #[test]
    fn destroying_node_cascades_to_incident_pipes() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let b = built_node(&mut net, 27, 28);
        let p1 = { let hub = net.hub(); connect(&mut net, hub, a) };
        let p2 = connect(&mut net, a, b);

        net.destroy(BuildingRef::Node(a), Some("storm"));

        assert!(net.node(a).is_none());
        assert!(net.pipe(p1).is_none());
        assert!(net.pipe(p2).is_none());
        // Surviving endpoints no longer list the dead pipes.
        assert!(net.node(net.hub()).unwrap().pipes.is_empty());
        assert!(net.node(b).unwrap().pipes.is_empty());
        // Cell is vacated.
        assert_eq!(net.ground_item(gp(27, 25)), None);
        // Attacker is named.
        let events = net.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Notice { text, .. } if text == "Node destroyed by storm."
        )));
    }

    #[test]
    fn hub_is_indestructible() {
        let mut net = bare();
        net.destroy(BuildingRef::Node(net.hub()), Some("aliens"));
        assert!(net.node(net.hub()).is_some());
    }

    #[test]
    fn destroying_pipe_removes_it_from_both_exit_lists() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let pid = { let hub = net.hub(); connect(&mut net, hub, a) };

        net.destroy(BuildingRef::Pipe(pid), None);
        assert!(net.pipe(pid).is_none());
        assert!(net.node(net.hub()).unwrap().pipes.is_empty());
        assert!(net.node(a).unwrap().pipes.is_empty());
    }

    #[test]
    fn fatal_damage_triggers_cascade() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        let pid = { let hub = net.hub(); connect(&mut net, hub, a) };

        let killed = net.damage(BuildingRef::Node(a), 1e6, Some("quake"));
        assert!(killed);
        assert!(net.node(a).is_none());
        assert!(net.pipe(pid).is_none());
    }

    #[test]
    fn city_shrugs_off_damage() {
        let mut net = bare();
        assert!(!net.damage(BuildingRef::Node(net.hub()), 1e9, Some("storm")));
        assert!(net.node(net.hub()).is_some());
    }

    // -----------------------------------------------------------------------
    // Steam
    // -----------------------------------------------------------------------

    /// Build a hub + finished well node + finished pipe, the minimal
    /// producing network.
    fn producing_net() -> (Network, NodeId) {
        let mut net = bare();
        let w = net.add_finished_node(Node::new_well_node(gp(28, 25)));
        { let hub = net.hub(); connect(&mut net, hub, w) };
        (net, w)
    }

    #[test]
    fn well_node_sources_steam_and_it_flows_to_the_city() {
        let (mut net, w) = producing_net();
        for _ in 0..50 {
            net.step();
        }
        assert!(net.node(w).unwrap().steam.pressure() > 0.0);
        assert!(
            net.hub_steam_supply() > 0.0,
            "steam should flow toward the demanding hub"
        );
    }

    #[test]
    fn closed_valve_stops_flow_and_zeroes_current() {
        let (mut net, w) = producing_net();
        let pid = net.node(w).unwrap().pipes[0];
        for _ in 0..50 {
            net.step();
        }
        assert!(net.pipe(pid).unwrap().current_n1_to_n2.abs() > 0.0);

        net.toggle_valve(pid);
        net.step();
        assert_eq!(net.pipe(pid).unwrap().current_n1_to_n2, 0.0);
    }

    #[test]
    fn broken_endpoint_stops_conduction_from_both_sides() {
        // The chosen rule: a pipe conducts only when open and neither
        // endpoint is broken, checked identically from each side.
        let (mut net, w) = producing_net();
        let pid = net.node(w).unwrap().pipes[0];
        for _ in 0..20 {
            net.step();
        }

        // Break the well node: pressure everywhere must freeze, with no
        // one-sided drain into or out of the broken node.
        net.node_mut(w).unwrap().building.health = 1;
        let hub_pressure = net.node(net.hub()).unwrap().steam.pressure();
        let well_pressure = net.node(w).unwrap().steam.pressure();
        net.steam_think();

        assert_eq!(net.pipe(pid).unwrap().current_n1_to_n2, 0.0);
        assert_eq!(net.node(w).unwrap().steam.pressure(), well_pressure);
        // The hub still consumes its demand, but receives nothing.
        assert!(net.node(net.hub()).unwrap().steam.pressure() <= hub_pressure);
    }

    #[test]
    fn well_production_scales_with_tech_level() {
        let (mut net, w) = producing_net();
        net.step();
        let d = Difficulty::default();
        let base = d.basic_steam_production + d.steam_production_per_level;
        match &net.node(w).unwrap().kind {
            NodeKind::Well(state) => assert_eq!(state.production, base),
            _ => unreachable!(),
        }
    }

    // -----------------------------------------------------------------------
    // Metal economy
    // -----------------------------------------------------------------------

    #[test]
    fn use_metal_deducts_exactly_when_strictly_affordable() {
        let mut net = bare();
        let start = net.metal_quantity();
        let cost = net.use_metal(Purchase::Node).unwrap();
        assert_eq!(cost, Purchase::Node.cost());
        assert_eq!(net.metal_quantity(), start - cost as f64);
    }

    #[test]
    fn use_metal_rejects_without_spending() {
        let mut net = bare();
        // Drain the stockpile to exactly the cost: strictly-greater fails.
        let cost = Purchase::Node.cost() as f64;
        if let Some(node) = net.node_mut(net.hub()) {
            if let NodeKind::City(city) = &mut node.kind {
                city.metal_quantity = cost;
            }
        }
        assert!(!net.metal_available(Purchase::Node));
        assert_eq!(
            net.use_metal(Purchase::Node),
            Err(BuildError::InsufficientMetal {
                cost: Purchase::Node.cost()
            })
        );
        assert_eq!(net.metal_quantity(), cost);
    }

    #[test]
    fn connected_nodes_dig_metal_into_the_stockpile() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        net.rocks.insert(Rock::new(gp(29, 25), 1, 100.0));
        net.refresh_rock_caches();

        let before = net.metal_quantity();
        net.step();
        assert!(net.metal_quantity() > before);
        assert!(net.node(a).unwrap().metal_mined > 0.0);
    }

    #[test]
    fn disconnected_nodes_do_not_dig() {
        let mut net = bare();
        let lone = built_node(&mut net, 40, 40);
        net.rocks.insert(Rock::new(gp(42, 40), 1, 100.0));
        net.refresh_rock_caches();

        net.step();
        assert_eq!(net.node(lone).unwrap().metal_mined, 0.0);
    }

    #[test]
    fn dig_respects_rock_depletion() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        { let hub = net.hub(); connect(&mut net, hub, a) };
        let rid = net.rocks.insert(Rock::new(gp(29, 25), 1, 0.25));
        net.refresh_rock_caches();

        let before = net.metal_quantity();
        for _ in 0..10 {
            net.step();
        }
        assert_eq!(net.rock(rid).unwrap().quantity, 0.0);
        let mined = net.metal_quantity() - before;
        assert!((mined - 0.25).abs() < 1e-9);
    }

    // -----------------------------------------------------------------------
    // Upgrades
    // -----------------------------------------------------------------------

    #[test]
    fn upgrade_at_max_tech_is_a_noop_with_notice() {
        let mut net = bare();
        let a = built_node(&mut net, 27, 25);
        net.node_mut(a).unwrap().building.tech_level = config::NODE_MAX_TECH_LEVEL;
        let old_max = net.node(a).unwrap().building.max_health;

        net.drain_events();
        assert_eq!(
            net.begin_upgrade(BuildingRef::Node(a)),
            Err(UpgradeError::AtMaxTechLevel)
        );
        assert_eq!(net.node(a).unwrap().building.tech_level, config::NODE_MAX_TECH_LEVEL);
        assert_eq!(net.node(a).unwrap().building.max_health, old_max);

        let events = net.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Notice { text, .. } if text == "Node cannot be upgraded further."
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Cue { cue: SoundCue::Error, .. })));
    }

    #[test]
    fn city_upgrade_completes_through_work_pulses() {
        let mut net = bare();
        net.begin_upgrade(BuildingRef::Node(net.hub())).unwrap();
        assert_eq!(net.avail_work_units(), 2);

        // Run pulses until the countdown drains.
        let mut guard = 0;
        while net.node(net.hub()).unwrap().needs_work() {
            net.work_pulse(net.avail_work_units());
            guard += 1;
            assert!(guard < 10_000, "city upgrade never completed");
        }
        assert_eq!(net.node(net.hub()).unwrap().building.tech_level, 2);
        let events = net.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Notice { text, .. } if text.starts_with("City upgraded to level 2")
        )));
    }

    // -----------------------------------------------------------------------
    // Map generation
    // -----------------------------------------------------------------------

    #[test]
    fn new_game_builds_the_bootstrap_layout() {
        let net = Network::new_game(GameParams::default(), 42);
        let centre = net.params().centre;

        // City at the centre.
        assert_eq!(net.ground_item(centre), Some(GroundItem::Node(net.hub())));
        assert!(net.node(net.hub()).unwrap().is_city());

        // One finished well node wired to the hub.
        let hub_pipes = &net.node(net.hub()).unwrap().pipes;
        assert_eq!(hub_pipes.len(), 1);
        let pipe = net.pipe(hub_pipes[0]).unwrap();
        assert!(!pipe.building.needs_work());

        // Requested feature counts (the bootstrap well is one extra).
        assert_eq!(net.wells().count() as u32, net.params().well_count + 1);
        assert_eq!(net.rocks().count() as u32, net.params().rock_count);
    }

    #[test]
    fn map_features_respect_spacing() {
        let net = Network::new_game(GameParams::default(), 7);
        let centre = net.params().centre;
        for (_, rock) in net.rocks() {
            assert!(rock.position.distance(centre) >= 7.0);
            assert!(rock.quantity > 0.0);
        }
        // Scattered wells keep their distance; only the bootstrap well is
        // close to the city.
        let close_wells = net
            .wells()
            .filter(|(_, w)| w.position.distance(centre) < 10.0)
            .count();
        assert_eq!(close_wells, 1);
    }

    #[test]
    fn same_seed_same_map_same_hash() {
        let a = Network::new_game(GameParams::default(), 99);
        let b = Network::new_game(GameParams::default(), 99);
        assert_eq!(a.state_hash(), b.state_hash());

        let c = Network::new_game(GameParams::default(), 100);
        assert_ne!(a.state_hash(), c.state_hash());
    }

    #[test]
    fn simulation_is_deterministic_over_ticks() {
        let mut a = Network::new_game(GameParams::default(), 5);
        let mut b = Network::new_game(GameParams::default(), 5);
        for _ in 0..100 {
            a.step();
            b.step();
        }
        assert_eq!(a.state_hash(), b.state_hash());
    }
}
