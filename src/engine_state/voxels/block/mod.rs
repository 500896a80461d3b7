//! # Block Module
//!
//! Block storage type, block kinds, and the classifier that decides which
//! blocks count as "part of a vessel".

use std::collections::HashSet;

use block_type::BlockType;

pub mod block_type;

/// The underlying integer type used to represent block types in memory.
pub type BlockTypeSize = u8;

/// Represents a single voxel block in the world.
///
/// # Memory Layout
/// `#[repr(C)]` plus `Pod` lets a chunk's block array be shipped to observers
/// as raw bytes with `bytemuck::cast_slice`.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// The type of this block, encoded as a `BlockTypeSize` for compact storage.
    pub block_type: BlockTypeSize,
}

impl Block {
    /// The empty block.
    pub const AIR: Block = Block {
        block_type: BlockType::AIR as BlockTypeSize,
    };

    /// Creates a new block of the specified type.
    pub fn new(block_type: BlockType) -> Self {
        Block {
            block_type: block_type as BlockTypeSize,
        }
    }

    /// Decodes the block's type.
    pub fn kind(&self) -> BlockType {
        BlockType::get_block_type_from_int(self.block_type)
    }

    /// Returns true for air.
    pub fn is_air(&self) -> bool {
        self.kind() == BlockType::AIR
    }
}

impl Default for Block {
    fn default() -> Self {
        Block::AIR
    }
}

/// Decides how blocks are treated by detection and by the vessel's voxel set.
///
/// Some block kinds are physically present in the world but should be treated
/// as empty space when deciding what belongs to a vessel (the configurable
/// exclusion set).
#[derive(Clone, Debug, Default)]
pub struct BlockClassifier {
    excluded: HashSet<BlockType>,
}

impl BlockClassifier {
    /// Creates a classifier that treats `excluded` kinds as empty.
    pub fn new(excluded: impl IntoIterator<Item = BlockType>) -> Self {
        BlockClassifier {
            excluded: excluded.into_iter().collect(),
        }
    }

    /// Returns true if the block counts as empty space.
    pub fn is_empty(&self, block: Block) -> bool {
        let kind = block.kind();
        kind == BlockType::AIR || self.excluded.contains(&kind)
    }

    /// Returns true if the block can never be part of a vessel.
    pub fn is_unbreakable(&self, block: Block) -> bool {
        block.kind().is_unbreakable()
    }

    /// Maps excluded kinds to air, leaving everything else untouched.
    pub fn normalize(&self, block: Block) -> Block {
        if self.is_empty(block) {
            Block::AIR
        } else {
            block
        }
    }
}
