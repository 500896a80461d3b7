//! # Chunk Iteration Module
//!
//! This module provides an iterator over all non-air blocks in a chunk.
//!
//! The iterator walks the chunk's `solid_array` bit vector with `iter_ones`, so
//! air blocks are skipped a machine word at a time instead of block by block.

use bitvec::slice::IterOnes;
use bitvec::{order::Lsb0, prelude::BitVec};
use cgmath::Point3;

use crate::engine_state::voxels::block::Block;

use super::{Chunk, CHUNK_DIMENSION, CHUNK_PLANE_SIZE};

/// An iterator over all non-air blocks in a chunk, yielding chunk-relative
/// positions alongside the blocks.
pub struct ChunkBlockIterator<'a> {
    chunk_ref: &'a Chunk,
    solid_offsets: IterOnes<'a, usize, Lsb0>,
}

impl<'a> ChunkBlockIterator<'a> {
    /// Creates a new `ChunkBlockIterator` for the given chunk.
    pub fn new(chunk_ref: &'a Chunk) -> Self {
        let solid_array: &'a BitVec = &chunk_ref.solid_array;
        ChunkBlockIterator {
            chunk_ref,
            solid_offsets: solid_array.iter_ones(),
        }
    }
}

impl<'a> Iterator for ChunkBlockIterator<'a> {
    type Item = (Point3<usize>, Block);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.solid_offsets.next()?;
        let dimension = CHUNK_DIMENSION as usize;
        let plane = CHUNK_PLANE_SIZE as usize;
        let position = Point3::new(offset % dimension, (offset % plane) / dimension, offset / plane);
        Some((position, self.chunk_ref.blocks[offset]))
    }
}
