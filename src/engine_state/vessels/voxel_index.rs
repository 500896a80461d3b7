//! Dense, packed index of a vessel's voxels.
//!
//! Each voxel is stored as a 32-bit key relative to the vessel's reference
//! voxel (12 bits x, 8 bits y, 12 bits z), in a flat `Vec` for fast bulk
//! iteration. A side map from key to slot makes removal O(1) via
//! `swap_remove`. The index is derived data: it must always hold exactly the
//! positions of the vessel's canonical voxel set.

use std::collections::{HashMap, HashSet};

use cgmath::Point3;

use crate::engine_state::voxels::VoxelPos;

const X_BITS: u32 = 12;
const Y_BITS: u32 = 8;
const Z_BITS: u32 = 12;
const X_BIAS: i32 = 1 << (X_BITS - 1);
const Y_BIAS: i32 = 1 << (Y_BITS - 1);
const Z_BIAS: i32 = 1 << (Z_BITS - 1);

/// Packed relative-position index.
#[derive(Clone, Debug)]
pub struct RelativeVoxelIndex {
    reference: VoxelPos,
    keys: Vec<u32>,
    slots: HashMap<u32, usize>,
}

impl RelativeVoxelIndex {
    /// Creates an empty index around `reference`.
    pub fn new(reference: VoxelPos) -> Self {
        RelativeVoxelIndex {
            reference,
            keys: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// The reference voxel keys are relative to.
    pub fn reference(&self) -> VoxelPos {
        self.reference
    }

    /// Packs `pos`, or `None` if it is too far from the reference.
    pub fn encode(&self, pos: VoxelPos) -> Option<u32> {
        let dx = pos.x - self.reference.x + X_BIAS;
        let dy = pos.y - self.reference.y + Y_BIAS;
        let dz = pos.z - self.reference.z + Z_BIAS;
        if !(0..1 << X_BITS).contains(&dx) || !(0..1 << Y_BITS).contains(&dy) || !(0..1 << Z_BITS).contains(&dz) {
            return None;
        }
        Some(((dx as u32) << (Y_BITS + Z_BITS)) | ((dy as u32) << Z_BITS) | dz as u32)
    }

    /// Unpacks a key produced by `encode`.
    pub fn decode(&self, key: u32) -> VoxelPos {
        let dx = (key >> (Y_BITS + Z_BITS)) as i32 & ((1 << X_BITS) - 1);
        let dy = (key >> Z_BITS) as i32 & ((1 << Y_BITS) - 1);
        let dz = key as i32 & ((1 << Z_BITS) - 1);
        Point3::new(
            self.reference.x + dx - X_BIAS,
            self.reference.y + dy - Y_BIAS,
            self.reference.z + dz - Z_BIAS,
        )
    }

    /// Adds `pos`. Returns false if it was already present or cannot be encoded.
    pub fn insert(&mut self, pos: VoxelPos) -> bool {
        let Some(key) = self.encode(pos) else {
            return false;
        };
        if self.slots.contains_key(&key) {
            return false;
        }
        self.slots.insert(key, self.keys.len());
        self.keys.push(key);
        true
    }

    /// Removes `pos`. Returns false if it was absent.
    pub fn remove(&mut self, pos: VoxelPos) -> bool {
        let Some(key) = self.encode(pos) else {
            return false;
        };
        let Some(slot) = self.slots.remove(&key) else {
            return false;
        };
        self.keys.swap_remove(slot);
        if let Some(moved) = self.keys.get(slot) {
            self.slots.insert(*moved, slot);
        }
        true
    }

    /// Returns true if `pos` is indexed.
    pub fn contains(&self, pos: VoxelPos) -> bool {
        self.encode(pos).is_some_and(|key| self.slots.contains_key(&key))
    }

    /// Number of indexed voxels.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The packed keys, in storage order.
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    /// Every indexed voxel, in storage order.
    pub fn iter(&self) -> impl Iterator<Item = VoxelPos> + '_ {
        self.keys.iter().map(|key| self.decode(*key))
    }

    /// Replaces the contents with `positions`.
    pub fn rebuild(&mut self, positions: impl IntoIterator<Item = VoxelPos>) {
        self.keys.clear();
        self.slots.clear();
        for pos in positions {
            self.insert(pos);
        }
    }

    /// Returns true if the index holds exactly `voxels`.
    pub fn is_consistent_with(&self, voxels: &HashSet<VoxelPos>) -> bool {
        self.keys.len() == voxels.len()
            && self.slots.len() == self.keys.len()
            && voxels.iter().all(|pos| self.contains(*pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_decode_to_their_positions() {
        let index = RelativeVoxelIndex::new(Point3::new(320_007, 128, 320_007));
        for pos in [
            Point3::new(320_007, 128, 320_007),
            Point3::new(320_007 - 2048, 0, 320_007 + 2047),
            Point3::new(320_007 + 2047, 255, 320_007 - 2048),
        ] {
            let key = index.encode(pos).unwrap();
            assert_eq!(index.decode(key), pos);
        }
        assert_eq!(index.encode(Point3::new(320_007 + 2048, 128, 320_007)), None);
        assert_eq!(index.encode(Point3::new(320_007, 256, 320_007)), None);
    }

    #[test]
    fn removal_keeps_slots_consistent() {
        let mut index = RelativeVoxelIndex::new(Point3::new(0, 128, 0));
        let mut canonical = HashSet::new();
        for x in 0..6 {
            let pos = Point3::new(x, 128, -x);
            assert!(index.insert(pos));
            canonical.insert(pos);
        }
        assert!(!index.insert(Point3::new(0, 128, 0)));

        for x in [0, 3, 5] {
            let pos = Point3::new(x, 128, -x);
            assert!(index.remove(pos));
            canonical.remove(&pos);
            assert!(index.is_consistent_with(&canonical));
        }
        assert!(!index.remove(Point3::new(0, 128, 0)));
        assert_eq!(index.iter().collect::<HashSet<_>>(), canonical);
    }

    #[test]
    fn rebuild_replaces_everything() {
        let mut index = RelativeVoxelIndex::new(Point3::new(0, 128, 0));
        index.insert(Point3::new(1, 1, 1));
        index.rebuild([Point3::new(2, 2, 2), Point3::new(3, 3, 3)]);
        assert_eq!(index.len(), 2);
        assert!(!index.contains(Point3::new(1, 1, 1)));
    }
}
