//! Shared test helpers for integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these
//! helpers are available to unit tests and, via the `test-utils` feature,
//! to dependent crates' integration tests.

use crate::config::GameParams;
use crate::grid::GridPosition;
use crate::id::{NodeId, PipeId};
use crate::item::Node;
use crate::network::Network;

/// A network with just the hub: no wells, no rocks, no randomness worth
/// caring about.
pub fn bare_network() -> Network {
    Network::new_bare(GameParams::default(), 1)
}

pub fn gp(x: i32, y: i32) -> GridPosition {
    GridPosition::new(x, y)
}

/// Place a fully-built standard node.
pub fn built_node(net: &mut Network, x: i32, y: i32) -> NodeId {
    net.add_finished_node(Node::new(gp(x, y)))
}

/// Place a fully-built well node (steam source).
pub fn built_well_node(net: &mut Network, x: i32, y: i32) -> NodeId {
    net.add_finished_node(Node::new_well_node(gp(x, y)))
}

/// Lay a pipe and finish its construction.
pub fn connect(net: &mut Network, a: NodeId, b: NodeId) -> PipeId {
    let pid = net
        .add_pipe(a, b)
        .expect("test fixture pipe placement failed");
    finish_pipe(net, pid);
    pid
}

/// Drive a pipe straight to completion.
pub fn finish_pipe(net: &mut Network, pid: PipeId) {
    let pipe = net.pipe_mut(pid).expect("no such pipe");
    pipe.building.health = pipe.building.max_health;
    pipe.building.do_work();
}
