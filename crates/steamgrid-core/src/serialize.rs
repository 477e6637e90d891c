//! Snapshot serialization for the network.
//!
//! Binary encoding via `bitcode` behind a versioned header, so a saved
//! game can be format-checked before any payload decoding is attempted.
//! Callers run [`crate::network::Network::make_ready_for_save`] first to
//! strip transient state; everything that remains reconstructs the
//! simulation without reference to any rendering state.

use crate::network::Network;
use crate::sim::Ticks;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a network snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x57E4_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while encoding or decoding a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header carried by every snapshot. Enables format detection and version
/// checking before trusting the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic number for format detection.
    pub magic: u32,
    /// Format version for forward compatibility.
    pub version: u32,
    /// Tick count at the time the snapshot was taken.
    pub tick: Ticks,
}

impl SnapshotHeader {
    /// Create a header for the current format version.
    pub fn new(tick: Ticks) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    /// Validate the header. Returns `Ok(())` if valid.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(SnapshotError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Snapshot payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    header: SnapshotHeader,
    network: Network,
}

/// Serialize a network to snapshot bytes.
///
/// The network should have had `make_ready_for_save` applied; the encoder
/// does not enforce it, but transient state written here would be thrown
/// away on load anyway.
pub fn save_network(network: &Network) -> Result<Vec<u8>, SnapshotError> {
    let snapshot = Snapshot {
        header: SnapshotHeader::new(network.tick()),
        network: network.clone(),
    };
    bitcode::serialize(&snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Reconstruct a network from snapshot bytes, validating the header.
pub fn load_network(data: &[u8]) -> Result<Network, SnapshotError> {
    let snapshot: Snapshot =
        bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    snapshot.header.validate()?;
    Ok(snapshot.network)
}

/// Decode just the header of snapshot bytes, without validating it.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, SnapshotError> {
    let snapshot: Snapshot =
        bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ===========================================================================
// Tests
// ===========================================================================
