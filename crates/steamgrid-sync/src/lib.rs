//! Multiplayer synchronization adapter.
//!
//! The authoritative server decides what gets built; this crate gates
//! every owned mutation on a synchronous confirmation round-trip and
//! applies broadcast events from other players through the same
//! validation entry points the local UI uses.
//!
//! # Design
//!
//! - [`SyncBackend`] is the transport seam: a synchronous request call
//!   plus a non-blocking poll for broadcasts. The wire protocol behind it
//!   (sockets, JSON framing) is out of scope here; requests and events
//!   are plain serde types that map to the JSON bodies the server speaks.
//! - [`SyncAdapter`] enforces the commit rule: confirm remotely first,
//!   then apply locally. A rejection means the local mutation simply does
//!   not happen — no rollback is ever needed.
//! - Remote construction reuses [`Network::add_node`] validation, so an
//!   occupied cell silently ignores the update and a well cell yields a
//!   well node, exactly as for local placement.

use serde::{Deserialize, Serialize};
use steamgrid_core::grid::GridPosition;
use steamgrid_core::id::{BuildingRef, NodeId, PipeId};
use steamgrid_core::item::Node;
use steamgrid_core::network::{GroundItem, Network, Purchase};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Default placement radius around owned nodes (server `create_game`
/// default).
pub const DEFAULT_MAX_BUILDING_DISTANCE: f64 = 10.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures from the synchronization backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The authority denied the request. Carries the server's short
    /// machine-readable reason. The local mutation must not proceed.
    #[error("rejected by server: {reason}")]
    Rejected { reason: String },
    /// The transport itself failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Requests and events
// ---------------------------------------------------------------------------

/// A named operation sent to the authority. Serializes to the server's
/// `{"name": ..., "params": {...}}` JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "params", rename_all = "snake_case")]
pub enum SyncRequest {
    AddNode { position: GridPosition },
    AddWellNode { position: GridPosition },
    SetFinishedNode { position: GridPosition },
    DeleteNode { position: GridPosition },
    AddPipe { endpoints: (GridPosition, GridPosition) },
    SetFinishedPipe { endpoints: (GridPosition, GridPosition) },
    DeletePipe { endpoints: (GridPosition, GridPosition) },
}

/// Why a player left the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Victory,
    SteamLoss,
    Quit,
}

/// A broadcast event from the server, keyed by absolute grid position —
/// entity ids never cross the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RemoteEvent {
    NewPlayer {
        player_name: String,
    },
    NewOwner {
        position: GridPosition,
    },
    NewNode {
        position: GridPosition,
    },
    NewPipe {
        start_node: GridPosition,
        end_node: GridPosition,
    },
    PlayerLeft {
        player_name: String,
        reason: LeaveReason,
    },
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// The transport behind the adapter.
///
/// `request` is synchronous: it returns once the authority has accepted
/// or rejected. `poll` must never block; returning nothing is the normal
/// case, not an error.
pub trait SyncBackend {
    fn request(&mut self, request: &SyncRequest) -> Result<(), SyncError>;
    fn poll(&mut self) -> Vec<RemoteEvent>;
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Gates owned mutations on remote confirmation and folds broadcast
/// events into the network.
#[derive(Debug)]
pub struct SyncAdapter<B> {
    backend: B,
    player_name: String,
    max_building_distance: f64,
}

impl<B: SyncBackend> SyncAdapter<B> {
    pub fn new(backend: B, player_name: impl Into<String>) -> Self {
        Self {
            backend,
            player_name: player_name.into(),
            max_building_distance: DEFAULT_MAX_BUILDING_DISTANCE,
        }
    }

    /// Override the placement radius (game parameter from `join_game`).
    pub fn with_max_building_distance(mut self, distance: f64) -> Self {
        self.max_building_distance = distance;
        self
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // -----------------------------------------------------------------------
    // Owned mutations: confirm remotely, then apply locally
    // -----------------------------------------------------------------------

    /// Build a standard node at a cell.
    ///
    /// `Ok(None)` means a local rule rejected the action (notice already
    /// posted); `Err` means the authority rejected it and nothing was
    /// applied or spent.
    pub fn build_node(
        &mut self,
        net: &mut Network,
        position: GridPosition,
    ) -> Result<Option<NodeId>, SyncError> {
        self.build(net, position, Purchase::Node, Node::new(position))
    }

    /// Build a steam maker on a well cell.
    pub fn build_well_node(
        &mut self,
        net: &mut Network,
        position: GridPosition,
    ) -> Result<Option<NodeId>, SyncError> {
        self.build(
            net,
            position,
            Purchase::WellNode,
            Node::new_well_node(position),
        )
    }

    fn build(
        &mut self,
        net: &mut Network,
        position: GridPosition,
        purchase: Purchase,
        node: Node,
    ) -> Result<Option<NodeId>, SyncError> {
        if !net.metal_available(purchase) {
            // Post the insufficient-metal notice without spending.
            let _ = net.use_metal(purchase);
            return Ok(None);
        }
        // Nodes can only be placed in proximity of owned nodes.
        if !net.is_close_to_owned_node(position, self.max_building_distance) {
            net.notify("This location is too far from your network.");
            return Ok(None);
        }

        let request = match purchase {
            Purchase::WellNode => SyncRequest::AddWellNode { position },
            _ => SyncRequest::AddNode { position },
        };
        self.backend.request(&request)?;

        match net.add_node(node) {
            Ok(id) => {
                // The stockpile was checked above; the deduction cannot
                // fail between then and now on this thread.
                let _ = net.use_metal(purchase);
                Ok(Some(id))
            }
            Err(_) => Ok(None),
        }
    }

    /// Lay a pipe between two nodes, enforcing the ownership rule: both
    /// endpoints ours, or one ours and the other not yet wired into
    /// anyone's network.
    pub fn build_pipe(
        &mut self,
        net: &mut Network,
        start: NodeId,
        end: NodeId,
    ) -> Result<Option<PipeId>, SyncError> {
        let (Some(s), Some(e)) = (net.node(start), net.node(end)) else {
            return Ok(None);
        };
        let s_owned = s.building.owned_by_me;
        let e_owned = e.building.owned_by_me;
        let allowed = (s_owned && e_owned)
            || (s_owned && e.is_connectable())
            || (s.is_connectable() && e_owned);
        let endpoints = (s.position, e.position);
        if !allowed {
            net.notify("Endpoint not in your network.");
            return Ok(None);
        }

        self.backend.request(&SyncRequest::AddPipe { endpoints })?;
        Ok(net.add_pipe(start, end).ok())
    }

    /// Tell the authority one of our buildings finished construction, so
    /// other clients can mirror the completed state.
    pub fn report_finished(
        &mut self,
        net: &Network,
        target: BuildingRef,
    ) -> Result<(), SyncError> {
        let request = match target {
            BuildingRef::Node(id) => {
                let Some(node) = net.node(id) else { return Ok(()) };
                SyncRequest::SetFinishedNode {
                    position: node.position,
                }
            }
            BuildingRef::Pipe(id) => {
                let Some(pipe) = net.pipe(id) else { return Ok(()) };
                let (Some(p1), Some(p2)) = (
                    net.node(pipe.n1).map(|n| n.position),
                    net.node(pipe.n2).map(|n| n.position),
                ) else {
                    return Ok(());
                };
                SyncRequest::SetFinishedPipe {
                    endpoints: (p1, p2),
                }
            }
        };
        self.backend.request(&request)
    }

    /// Destroy one of our buildings, with remote confirmation first.
    pub fn destroy(
        &mut self,
        net: &mut Network,
        target: BuildingRef,
    ) -> Result<(), SyncError> {
        let request = match target {
            BuildingRef::Node(id) => {
                let Some(node) = net.node(id) else { return Ok(()) };
                SyncRequest::DeleteNode {
                    position: node.position,
                }
            }
            BuildingRef::Pipe(id) => {
                let Some(pipe) = net.pipe(id) else { return Ok(()) };
                let n1 = net.node(pipe.n1).map(|n| n.position);
                let n2 = net.node(pipe.n2).map(|n| n.position);
                let (Some(p1), Some(p2)) = (n1, n2) else {
                    return Ok(());
                };
                SyncRequest::DeletePipe {
                    endpoints: (p1, p2),
                }
            }
        };
        self.backend.request(&request)?;
        net.destroy(target, None);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Broadcast intake
    // -----------------------------------------------------------------------

    /// Drain pending broadcasts and fold them into the network. Called
    /// once per tick; an empty poll is the normal case.
    pub fn pump(&mut self, net: &mut Network) -> usize {
        let events = self.backend.poll();
        let count = events.len();
        for event in events {
            self.apply_remote(net, event);
        }
        count
    }

    fn apply_remote(&mut self, net: &mut Network, event: RemoteEvent) {
        match event {
            RemoteEvent::NewPlayer { player_name } => {
                net.notify(format!("{player_name} joined the game"));
            }
            RemoteEvent::NewOwner { position } => {
                if let Some(GroundItem::Node(id)) = net.ground_item(position) {
                    if let Some(node) = net.node_mut(id) {
                        node.building.owned_by_me = false;
                    }
                }
            }
            RemoteEvent::NewNode { position } => match net.ground_item(position) {
                Some(GroundItem::Well(_)) => {
                    // An opponent built a steam maker on a well.
                    let mut node = Node::new_well_node(position);
                    node.building.owned_by_me = false;
                    let _ = net.add_node(node);
                }
                None => {
                    let mut node = Node::new(position);
                    node.building.owned_by_me = false;
                    let _ = net.add_node(node);
                }
                // Occupied: ignore the update.
                Some(GroundItem::Node(_)) => {}
            },
            RemoteEvent::NewPipe {
                start_node,
                end_node,
            } => {
                let start = match net.ground_item(start_node) {
                    Some(GroundItem::Node(id)) => Some(id),
                    _ => None,
                };
                let end = match net.ground_item(end_node) {
                    Some(GroundItem::Node(id)) => Some(id),
                    _ => None,
                };
                if let (Some(start), Some(end)) = (start, end) {
                    let _ = net.add_pipe(start, end);
                }
            }
            RemoteEvent::PlayerLeft {
                player_name,
                reason,
            } => {
                let text = match reason {
                    LeaveReason::Victory => format!("{player_name} won the game"),
                    LeaveReason::SteamLoss => {
                        format!("{player_name} lost the game due to low steam pressure")
                    }
                    LeaveReason::Quit => format!("{player_name} left the game"),
                };
                net.notify(text);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
