//! # Chunk Module
//!
//! This module provides the `Chunk` struct and related functionality for managing
//! 16x16x16 blocks of voxel data.
//!
//! ## Storage
//!
//! - `blocks`: dense block array in x, then y, then z order
//! - `solid_array`: a bit vector (1 bit per block) mirroring which blocks are non-air
//!
//! The bit vector makes solidity checks and "iterate every non-air block" cheap,
//! which is what rebuilding a vessel's voxel set from its claim needs.

use bitvec::prelude::BitVec;
use cgmath::Point3;
use noise::{NoiseFn, Perlin};

use super::block::{block_type::BlockType, Block};

pub mod chunk_iteration;

/// The dimension (width, height, depth) of a chunk in blocks.
pub const CHUNK_DIMENSION: i32 = 16;
/// The number of blocks in a single 2D plane of a chunk (CHUNK_DIMENSION²).
pub const CHUNK_PLANE_SIZE: i32 = CHUNK_DIMENSION * CHUNK_DIMENSION;
/// The total number of blocks in a chunk (CHUNK_DIMENSION³).
pub const CHUNK_SIZE: i32 = CHUNK_PLANE_SIZE * CHUNK_DIMENSION;

/// Threshold above which Perlin noise is considered solid for terrain generation.
pub const PERLIN_POSITIVE_THRESHOLD: f64 = 0.2;
/// Threshold below which Perlin noise is considered empty for terrain generation.
pub const PERLIN_NEGATIVE_THRESHOLD: f64 = -0.2;
/// Scaling factor applied to world coordinates when sampling Perlin noise.
pub const PERLIN_SCALE_FACTOR: f64 = 0.02;

/// Represents a 16x16x16 collection of voxel blocks in the world.
#[derive(Clone)]
pub struct Chunk {
    /// The position of this chunk in chunk coordinates (not block coordinates).
    pub position: Point3<i32>,

    /// One bit per block, set when the block is not air.
    pub solid_array: BitVec,

    /// Every block in the chunk, air included.
    pub blocks: Vec<Block>,

    solid_count: usize,
}

impl Chunk {
    /// Creates a new, completely empty chunk (all blocks are air).
    pub fn empty(position: &Point3<i32>) -> Self {
        Chunk {
            position: *position,
            solid_array: BitVec::repeat(false, CHUNK_SIZE as usize),
            blocks: vec![Block::AIR; CHUNK_SIZE as usize],
            solid_count: 0,
        }
    }

    /// Creates a new chunk filled with a single block type.
    pub fn solid(position: &Point3<i32>, block_type: BlockType) -> Self {
        let mut chunk = Self::empty(position);
        if block_type != BlockType::AIR {
            chunk.blocks.fill(Block::new(block_type));
            chunk.solid_array.fill(true);
            chunk.solid_count = CHUNK_SIZE as usize;
        }
        chunk
    }

    /// Generates a chunk of flat ground: everything below `surface_y` (world
    /// block coordinate) is dirt, the surface layer is grass, the world floor is
    /// bedrock.
    pub fn flat(position: &Point3<i32>, surface_y: i32) -> Self {
        let mut chunk = Self::empty(position);
        for cy in 0..CHUNK_DIMENSION {
            let world_y = cy + CHUNK_DIMENSION * position.y;
            let block_type = if world_y == 0 {
                BlockType::BEDROCK
            } else if world_y < surface_y {
                BlockType::DIRT
            } else if world_y == surface_y {
                BlockType::GRASS
            } else {
                continue;
            };
            for cz in 0..CHUNK_DIMENSION {
                for cx in 0..CHUNK_DIMENSION {
                    chunk.set_block_at(cx as usize, cy as usize, cz as usize, Block::new(block_type));
                }
            }
        }
        chunk
    }

    /// Generates a chunk using Perlin noise for natural-looking terrain.
    pub fn perlin(position: &Point3<i32>, seed: u32) -> Self {
        let perlin = Perlin::new(seed);
        let mut chunk = Self::empty(position);

        for k in 0..CHUNK_DIMENSION {
            for j in 0..CHUNK_DIMENSION {
                for i in 0..CHUNK_DIMENSION {
                    let bposition = Point3::<i32>::new(
                        i + CHUNK_DIMENSION * position.x,
                        j + CHUNK_DIMENSION * position.y,
                        k + CHUNK_DIMENSION * position.z,
                    );
                    let perlin_sample =
                        perlin.get(Self::to_perlin_pos(bposition, PERLIN_SCALE_FACTOR));
                    if !(PERLIN_NEGATIVE_THRESHOLD..=PERLIN_POSITIVE_THRESHOLD)
                        .contains(&perlin_sample)
                    {
                        chunk.set_block_at(
                            i as usize,
                            j as usize,
                            k as usize,
                            Block::new(BlockType::get_random_type()),
                        );
                    }
                }
            }
        }

        chunk
    }

    fn to_perlin_pos(pos: Point3<i32>, scale_factor: f64) -> [f64; 3] {
        [
            (pos.x as f64 * scale_factor),
            (pos.y as f64 * scale_factor),
            (pos.z as f64 * scale_factor),
        ]
    }

    fn index(cx: usize, cy: usize, cz: usize) -> usize {
        cx + CHUNK_DIMENSION as usize * cy + CHUNK_PLANE_SIZE as usize * cz
    }

    /// Gets the block at the specified chunk-relative coordinates.
    ///
    /// # Panics
    /// Panics if the coordinates are out of bounds.
    pub fn get_block_at(&self, cx: usize, cy: usize, cz: usize) -> Block {
        self.blocks[Self::index(cx, cy, cz)]
    }

    /// Replaces the block at the specified chunk-relative coordinates and
    /// returns the previous one.
    pub fn set_block_at(&mut self, cx: usize, cy: usize, cz: usize, block: Block) -> Block {
        let index = Self::index(cx, cy, cz);
        let old = std::mem::replace(&mut self.blocks[index], block);
        let was_solid = !old.is_air();
        let is_solid = !block.is_air();
        if was_solid != is_solid {
            self.solid_array.set(index, is_solid);
            if is_solid {
                self.solid_count += 1;
            } else {
                self.solid_count -= 1;
            }
        }
        old
    }

    /// Checks if the block at the specified chunk-relative coordinates is solid.
    pub fn is_block_solid(&self, cx: usize, cy: usize, cz: usize) -> bool {
        self.solid_array[Self::index(cx, cy, cz)]
    }

    /// Number of non-air blocks.
    pub fn solid_count(&self) -> usize {
        self.solid_count
    }

    /// Returns true if the chunk holds only air.
    pub fn is_empty(&self) -> bool {
        self.solid_count == 0
    }

    /// Rebuilds the solid bit index and count from the block array.
    ///
    /// Bulk edits call this once afterwards rather than keeping the index in
    /// step per block.
    pub fn normalize(&mut self) {
        let mut count = 0;
        for (index, block) in self.blocks.iter().enumerate() {
            let solid = !block.is_air();
            self.solid_array.set(index, solid);
            count += solid as usize;
        }
        self.solid_count = count;
    }

    /// Raw block bytes, suitable for shipping the chunk to an observer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_block_keeps_solid_index_in_step() {
        let mut chunk = Chunk::empty(&Point3::new(0, 0, 0));
        assert!(chunk.is_empty());

        let old = chunk.set_block_at(1, 2, 3, Block::new(BlockType::WOOD));
        assert_eq!(old, Block::AIR);
        assert!(chunk.is_block_solid(1, 2, 3));
        assert_eq!(chunk.solid_count(), 1);

        chunk.set_block_at(1, 2, 3, Block::new(BlockType::DIRT));
        assert_eq!(chunk.solid_count(), 1);

        chunk.set_block_at(1, 2, 3, Block::AIR);
        assert!(!chunk.is_block_solid(1, 2, 3));
        assert!(chunk.is_empty());
    }

    #[test]
    fn flat_chunk_has_bedrock_floor_and_grass_surface() {
        let chunk = Chunk::flat(&Point3::new(0, 0, 0), 4);
        assert_eq!(chunk.get_block_at(0, 0, 0).kind(), BlockType::BEDROCK);
        assert_eq!(chunk.get_block_at(5, 3, 5).kind(), BlockType::DIRT);
        assert_eq!(chunk.get_block_at(5, 4, 5).kind(), BlockType::GRASS);
        assert!(chunk.get_block_at(5, 5, 5).is_air());
        assert_eq!(chunk.solid_count(), 5 * CHUNK_PLANE_SIZE as usize);
    }

    #[test]
    fn normalize_recounts_after_raw_edits() {
        let mut chunk = Chunk::empty(&Point3::new(0, 0, 0));
        chunk.blocks[0] = Block::new(BlockType::WHITE);
        chunk.blocks[17] = Block::new(BlockType::WHITE);
        chunk.normalize();
        assert_eq!(chunk.solid_count(), 2);
        assert!(chunk.is_block_solid(1, 1, 0));
    }

    #[test]
    fn bytes_cover_every_block() {
        let chunk = Chunk::solid(&Point3::new(0, 0, 0), BlockType::WOOD);
        let bytes = chunk.as_bytes();
        assert_eq!(bytes.len(), CHUNK_SIZE as usize);
        assert!(bytes.iter().all(|b| *b == BlockType::WOOD as u8));
    }
}
