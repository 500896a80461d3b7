//! # World Module
//!
//! This module provides the `World` struct which holds the voxel data of one
//! world instance: chunks, per-voxel attachments, the world border, and which
//! cells (16x16 chunk columns) are currently loaded.
//!
//! ## Architecture
//!
//! The world uses sparse storage: only chunks that have been written exist.
//! Reading a missing chunk yields air. The whole world sits behind an
//! `MtResource` in `EngineState`, so detection can read it from a worker
//! thread while the tick thread is the only writer.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use cgmath::Point3;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::error::WorldError;
use crate::core::MtResource;
use crate::engine_state::voxels::attachment::Attachment;
use crate::engine_state::voxels::block::Block;
use crate::engine_state::voxels::chunk::{chunk_iteration::ChunkBlockIterator, Chunk, CHUNK_DIMENSION};

use super::{cell_of, CellPos, VoxelPos};

/// Height of the world in blocks. Valid block y coordinates are `0..WORLD_HEIGHT`.
pub const WORLD_HEIGHT: i32 = 256;

/// Horizontal limits a vessel may not leave.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldBorder {
    /// Smallest allowed x
    pub min_x: f64,
    /// Largest allowed x
    pub max_x: f64,
    /// Smallest allowed z
    pub min_z: f64,
    /// Largest allowed z
    pub max_z: f64,
}

impl Default for WorldBorder {
    fn default() -> Self {
        WorldBorder {
            min_x: -29_999_984.0,
            max_x: 29_999_984.0,
            min_z: -29_999_984.0,
            max_z: 29_999_984.0,
        }
    }
}

/// Which copy of the world this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorldSide {
    /// The simulation's own world; the only side allowed to mutate state.
    Authoritative,
    /// A replica kept by an observer.
    Observer,
}

/// How `World::generate_cell` fills a cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TerrainMethod {
    /// Nothing at all.
    Empty,
    /// Bedrock floor, dirt, and a grass surface at `surface_y`.
    Flat {
        /// World y of the grass layer
        surface_y: i32,
    },
    /// Perlin noise terrain.
    Perlin {
        /// Noise seed
        seed: u32,
    },
}

/// Represents a voxel world composed of multiple chunks.
///
/// # Examples
///
/// ```
/// use cgmath::Point3;
/// use vessel_engine::engine_state::voxels::{
///     block::{block_type::BlockType, Block},
///     world::{World, WorldSide},
/// };
///
/// let mut world = World::new(WorldSide::Authoritative);
/// let pos = Point3::new(3, 10, -7);
/// world.set_block(pos, Block::new(BlockType::WOOD)).unwrap();
/// assert_eq!(world.get_block(pos).kind(), BlockType::WOOD);
/// ```
pub struct World {
    /// A mapping from chunk coordinates to chunk data.
    pub chunks: HashMap<Point3<i32>, Chunk>,
    /// Attachments grouped by the cell they sit in
    attachments: HashMap<CellPos, HashMap<VoxelPos, Box<dyn Attachment>>>,
    loaded_cells: HashSet<CellPos>,
    border: WorldBorder,
    side: WorldSide,
}

impl World {
    /// Creates a new, empty world.
    pub fn new(side: WorldSide) -> Self {
        World {
            chunks: HashMap::new(),
            attachments: HashMap::new(),
            loaded_cells: HashSet::new(),
            border: WorldBorder::default(),
            side,
        }
    }

    /// Returns true if this world may be mutated by simulation code.
    pub fn is_authoritative(&self) -> bool {
        self.side == WorldSide::Authoritative
    }

    /// The world's side.
    pub fn side(&self) -> WorldSide {
        self.side
    }

    /// The world border.
    pub fn border(&self) -> &WorldBorder {
        &self.border
    }

    /// Replaces the world border.
    pub fn set_border(&mut self, border: WorldBorder) {
        self.border = border;
    }

    fn split(pos: VoxelPos) -> (Point3<i32>, usize, usize, usize) {
        let chunk_pos = Point3::new(
            pos.x.div_euclid(CHUNK_DIMENSION),
            pos.y.div_euclid(CHUNK_DIMENSION),
            pos.z.div_euclid(CHUNK_DIMENSION),
        );
        (
            chunk_pos,
            pos.x.rem_euclid(CHUNK_DIMENSION) as usize,
            pos.y.rem_euclid(CHUNK_DIMENSION) as usize,
            pos.z.rem_euclid(CHUNK_DIMENSION) as usize,
        )
    }

    /// Returns true if `pos` is within the world's vertical range.
    pub fn contains(&self, pos: VoxelPos) -> bool {
        (0..WORLD_HEIGHT).contains(&pos.y)
    }

    /// Gets the block at `pos`. Missing chunks and out-of-range positions read as air.
    pub fn get_block(&self, pos: VoxelPos) -> Block {
        if !self.contains(pos) {
            return Block::AIR;
        }
        let (chunk_pos, cx, cy, cz) = Self::split(pos);
        self.chunks
            .get(&chunk_pos)
            .map(|chunk| chunk.get_block_at(cx, cy, cz))
            .unwrap_or(Block::AIR)
    }

    /// Writes a block and returns the block that was there before.
    pub fn set_block(&mut self, pos: VoxelPos, block: Block) -> Result<Block, WorldError> {
        if !self.contains(pos) {
            return Err(WorldError::OutOfBounds { pos });
        }
        let (chunk_pos, cx, cy, cz) = Self::split(pos);
        if block.is_air() && !self.chunks.contains_key(&chunk_pos) {
            return Ok(Block::AIR);
        }
        let chunk = self
            .chunks
            .entry(chunk_pos)
            .or_insert_with(|| Chunk::empty(&chunk_pos));
        Ok(chunk.set_block_at(cx, cy, cz, block))
    }

    /// The attachment at `pos`, if any.
    pub fn attachment(&self, pos: VoxelPos) -> Option<&dyn Attachment> {
        self.attachments
            .get(&cell_of(pos))
            .and_then(|cell| cell.get(&pos))
            .map(|attachment| attachment.as_ref())
    }

    /// Places an attachment, returning whatever it replaced.
    pub fn insert_attachment(
        &mut self,
        pos: VoxelPos,
        attachment: Box<dyn Attachment>,
    ) -> Option<Box<dyn Attachment>> {
        self.attachments
            .entry(cell_of(pos))
            .or_default()
            .insert(pos, attachment)
    }

    /// Removes and returns the attachment at `pos`.
    pub fn take_attachment(&mut self, pos: VoxelPos) -> Option<Box<dyn Attachment>> {
        let cell = cell_of(pos);
        let in_cell = self.attachments.get_mut(&cell)?;
        let taken = in_cell.remove(&pos);
        if in_cell.is_empty() {
            self.attachments.remove(&cell);
        }
        taken
    }

    /// Positions that carry an attachment inside `cell`.
    pub fn attachment_positions_in_cell(&self, cell: CellPos) -> Vec<VoxelPos> {
        self.attachments
            .get(&cell)
            .map(|in_cell| in_cell.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Marks a cell as loaded.
    pub fn load_cell(&mut self, cell: CellPos) -> bool {
        self.loaded_cells.insert(cell)
    }

    /// Marks a cell as unloaded. Data stays in memory; only the load flag changes.
    pub fn unload_cell(&mut self, cell: CellPos) -> bool {
        self.loaded_cells.remove(&cell)
    }

    /// Returns true if the cell is loaded.
    pub fn is_cell_loaded(&self, cell: CellPos) -> bool {
        self.loaded_cells.contains(&cell)
    }

    fn column(cell: CellPos) -> impl Iterator<Item = Point3<i32>> {
        (0..WORLD_HEIGHT / CHUNK_DIMENSION).map(move |y| Point3::new(cell.x, y, cell.y))
    }

    /// Every non-air block inside `cell`, with world positions.
    pub fn solid_blocks_in_cell(&self, cell: CellPos) -> Vec<(VoxelPos, Block)> {
        let mut found = Vec::new();
        for chunk_pos in Self::column(cell) {
            if let Some(chunk) = self.chunks.get(&chunk_pos) {
                for (local, block) in ChunkBlockIterator::new(chunk) {
                    found.push((
                        Point3::new(
                            chunk_pos.x * CHUNK_DIMENSION + local.x as i32,
                            chunk_pos.y * CHUNK_DIMENSION + local.y as i32,
                            chunk_pos.z * CHUNK_DIMENSION + local.z as i32,
                        ),
                        block,
                    ));
                }
            }
        }
        found
    }

    /// Raw bytes of every chunk in `cell`, bottom to top, missing chunks omitted.
    pub fn cell_bytes(&self, cell: CellPos) -> Vec<u8> {
        let mut bytes = Vec::new();
        for chunk_pos in Self::column(cell) {
            if let Some(chunk) = self.chunks.get(&chunk_pos) {
                bytes.extend_from_slice(chunk.as_bytes());
            }
        }
        bytes
    }

    /// Rebuilds solid indices in `cell` and drops chunks that ended up empty.
    pub fn normalize_cell(&mut self, cell: CellPos) {
        for chunk_pos in Self::column(cell) {
            let now_empty = match self.chunks.get_mut(&chunk_pos) {
                Some(chunk) => {
                    chunk.normalize();
                    chunk.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.chunks.remove(&chunk_pos);
            }
        }
    }

    /// Deletes every chunk and attachment in `cell`.
    pub fn clear_cell(&mut self, cell: CellPos) {
        for chunk_pos in Self::column(cell) {
            self.chunks.remove(&chunk_pos);
        }
        self.attachments.remove(&cell);
        debug!("Cleared cell ({}, {})", cell.x, cell.y);
    }

    /// Fills `cell` with generated terrain, replacing anything there.
    pub fn generate_cell(&mut self, cell: CellPos, method: TerrainMethod) {
        for chunk_pos in Self::column(cell) {
            let chunk = match method {
                TerrainMethod::Empty => None,
                TerrainMethod::Flat { surface_y } => Some(Chunk::flat(&chunk_pos, surface_y)),
                TerrainMethod::Perlin { seed } => Some(Chunk::perlin(&chunk_pos, seed)),
            };
            match chunk {
                Some(chunk) if !chunk.is_empty() => {
                    self.chunks.insert(chunk_pos, chunk);
                }
                _ => {
                    self.chunks.remove(&chunk_pos);
                }
            }
        }
        self.loaded_cells.insert(cell);
    }
}

/// Read access to blocks by world position.
pub trait BlockSource {
    /// The block at `pos`. Air outside the world or in missing chunks.
    fn block_at(&self, pos: VoxelPos) -> Block;
}

impl BlockSource for World {
    fn block_at(&self, pos: VoxelPos) -> Block {
        self.get_block(pos)
    }
}

/// Reads a shared world one chunk at a time.
///
/// Each chunk is copied under its own short read lock the first time it is
/// touched, so a writer never waits for more than one chunk copy. Later reads
/// of the same chunk see that copy, not newer writes.
pub struct ChunkSnapshotReader {
    world: MtResource<World>,
    chunks: RefCell<HashMap<Point3<i32>, Option<Chunk>>>,
}

impl ChunkSnapshotReader {
    /// Creates a reader with no chunks copied yet.
    pub fn new(world: MtResource<World>) -> Self {
        ChunkSnapshotReader {
            world,
            chunks: RefCell::new(HashMap::new()),
        }
    }

    /// Number of chunk positions looked up so far.
    pub fn chunks_copied(&self) -> usize {
        self.chunks.borrow().len()
    }
}

impl BlockSource for ChunkSnapshotReader {
    fn block_at(&self, pos: VoxelPos) -> Block {
        if !(0..WORLD_HEIGHT).contains(&pos.y) {
            return Block::AIR;
        }
        let (chunk_pos, cx, cy, cz) = World::split(pos);
        let mut chunks = self.chunks.borrow_mut();
        let chunk = chunks
            .entry(chunk_pos)
            .or_insert_with(|| self.world.get().chunks.get(&chunk_pos).cloned());
        chunk
            .as_ref()
            .map(|chunk| chunk.get_block_at(cx, cy, cz))
            .unwrap_or(Block::AIR)
    }
}
