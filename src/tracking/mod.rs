//! Tracker state subsystem
//!
//! Holds the data model shared by every stage of the relay:
//!
//! 1. [`translator`] - Inbound OSC message to [`TrackerUpdate`]
//! 2. [`store`] - Last known pose per tracker with flip correction
//!
//! # Data Flow
//!
//! ```text
//! OscMessage ──► translate() ──► TrackerUpdate ──► TrackerStore::upsert() ──► TrackerRecord
//!                (reject = None)                   (merge + correct)
//! ```

pub mod store;
pub mod translator;

pub use store::{InversionSettings, TrackerStore};
pub use translator::translate;

/// Three float components as carried on the wire
pub type Vec3 = [f32; 3];

pub const ZERO_VEC3: Vec3 = [0.0; 3];

/// Payload of a single inbound message
///
/// The wire format never carries position and rotation in one message,
/// so an update holds exactly one of them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PosePayload {
    Position(Vec3),
    /// Rotation in degrees
    Rotation(Vec3),
}

/// One accepted inbound message, ready to be applied to the store
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerUpdate {
    pub id: u64,
    pub payload: PosePayload,
}

impl TrackerUpdate {
    pub fn position(id: u64, position: Vec3) -> Self {
        Self {
            id,
            payload: PosePayload::Position(position),
        }
    }

    pub fn rotation(id: u64, rotation: Vec3) -> Self {
        Self {
            id,
            payload: PosePayload::Rotation(rotation),
        }
    }
}

/// Last known pose of a tracker
///
/// Fields that were never set by an update stay at zero. The presence
/// flags tell "never set" apart from "set to the origin".
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackerRecord {
    pub id: u64,
    pub position: Vec3,
    pub rotation: Vec3,
    pub has_position: bool,
    pub has_rotation: bool,
}

impl TrackerRecord {
    pub fn empty(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}
