use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a node (steam-storage vertex) in the network.
    pub struct NodeId;

    /// Identifies a pipe (resistive edge) in the network.
    pub struct PipeId;

    /// Identifies a well (steam substrate) on the map.
    pub struct WellId;

    /// Identifies a rock (metal ore deposit) on the map.
    pub struct RockId;
}

/// A reference to any damageable building — a node or a pipe.
///
/// Used wherever an operation applies uniformly to both (work pulse
/// traversal, destruction, upgrades, popup meters).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum BuildingRef {
    Node(NodeId),
    Pipe(PipeId),
}
