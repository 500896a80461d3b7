//! # Block Type Module
//!
//! This module defines the different kinds of blocks in the voxel world, along
//! with the per-kind properties the vessel code cares about: mass and whether a
//! block may ever be moved.

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::BlockTypeSize;

/// Enumerates all possible block types in the voxel world.
///
/// The `FromPrimitive` derive allows conversion from the compact storage
/// integer, which is how blocks live inside chunks.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, Serialize, Deserialize,
)]
pub enum BlockType {
    /// An air block, which is non-solid and transparent.
    AIR,

    /// A basic dirt block, used as a common building material.
    DIRT,

    /// A grass block with different textures on top and sides.
    GRASS,

    /// A wooden block.
    WOOD,

    /// A plain white block, often used for testing.
    WHITE,

    /// World floor. Can never be moved, so a cluster touching it cannot become a vessel.
    BEDROCK,

    /// Foliage. Solid in the world, but commonly configured as "treat as empty"
    /// so trees do not get swept up into vessels.
    LEAVES,
}

impl BlockType {
    /// Converts a `BlockTypeSize` to a `BlockType`.
    ///
    /// Unknown values decode as `AIR` so corrupt storage degrades to empty space.
    pub fn get_block_type_from_int(btype: BlockTypeSize) -> Self {
        num_traits::FromPrimitive::from_u8(btype).unwrap_or(BlockType::AIR)
    }

    /// Generates a random building block type (never `AIR` or `BEDROCK`).
    pub fn get_random_type() -> Self {
        const CHOICES: [BlockType; 4] = [
            BlockType::DIRT,
            BlockType::GRASS,
            BlockType::WOOD,
            BlockType::WHITE,
        ];
        CHOICES[fastrand::usize(..CHOICES.len())]
    }

    /// Mass contributed by one block of this type, in arbitrary units.
    pub fn mass(&self) -> f64 {
        match self {
            BlockType::AIR => 0.0,
            BlockType::DIRT | BlockType::GRASS => 1.5,
            BlockType::WOOD => 0.8,
            BlockType::WHITE => 1.0,
            BlockType::BEDROCK => 100.0,
            BlockType::LEAVES => 0.2,
        }
    }

    /// Returns true for blocks that can never be relocated.
    pub fn is_unbreakable(&self) -> bool {
        matches!(self, BlockType::BEDROCK)
    }
}
