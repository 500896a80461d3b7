//! # Voxel World
//!
//! This module contains the static voxel world that vessels are cut out of and
//! written back into.
//!
//! ## Architecture
//!
//! * **Block**: block kinds, per-kind properties and the empty/unbreakable classifier
//! * **Chunk**: fixed-size 16³ arrays of blocks with a solid bit index
//! * **World**: sparse chunk storage, per-voxel attachments, cell load state
//! * **Attachment**: per-voxel payloads and the capabilities they opt into
//! * **Detector**: flood fill over the voxel adjacency graph
//! * **Tasks**: detection packaged as off-thread work
//!
//! ## Thread Safety
//!
//! The world is shared as `MtResource<World>`. Detection workers copy the
//! chunks they need under short read locks, one chunk at a time; the tick
//! thread is the only writer.

use cgmath::{Point2, Point3};

pub mod attachment;
pub mod block;
pub mod chunk;
pub mod detector;
pub mod tasks;
pub mod world;

/// Integer position of a voxel in world-grid units.
pub type VoxelPos = Point3<i32>;

/// A cell: one 16x16 column of chunks, addressed by chunk x and chunk z.
pub type CellPos = Point2<i32>;

/// The cell that contains `pos`.
pub fn cell_of(pos: VoxelPos) -> CellPos {
    Point2::new(pos.x >> 4, pos.z >> 4)
}
