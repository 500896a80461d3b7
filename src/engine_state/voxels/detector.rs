//! # Spatial Detector
//!
//! Breadth-first flood fill over the voxel adjacency graph, used to find the
//! cluster of voxels an assembly request would turn into a vessel.
//!
//! The detector only reads blocks through `BlockSource`, so it can run on a
//! worker thread against chunk copies of the shared world. Given the same
//! world snapshot it always yields the same set.

use std::collections::{HashSet, VecDeque};

use cgmath::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use super::{block::BlockClassifier, world::BlockSource, VoxelPos};

/// Which neighbours count as connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Connectivity {
    /// Face neighbours only.
    #[default]
    Six,
    /// Face, edge and corner neighbours.
    TwentySix,
}

impl Connectivity {
    /// Neighbour offsets, in a fixed order.
    pub fn offsets(&self) -> Vec<Vector3<i32>> {
        match self {
            Connectivity::Six => vec![
                Vector3::new(1, 0, 0),
                Vector3::new(-1, 0, 0),
                Vector3::new(0, 1, 0),
                Vector3::new(0, -1, 0),
                Vector3::new(0, 0, 1),
                Vector3::new(0, 0, -1),
            ],
            Connectivity::TwentySix => {
                let mut offsets = Vec::with_capacity(26);
                for x in -1..=1 {
                    for y in -1..=1 {
                        for z in -1..=1 {
                            if (x, y, z) != (0, 0, 0) {
                                offsets.push(Vector3::new(x, y, z));
                            }
                        }
                    }
                }
                offsets
            }
        }
    }
}

/// What a flood fill found.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    /// Connected non-empty voxels reached from the seed.
    pub found: HashSet<VoxelPos>,
    /// Growth stopped because `found` exceeded the size limit.
    pub oversize: bool,
    /// An unbreakable voxel was reached.
    pub aborted: bool,
}

impl DetectionResult {
    /// Number of voxels found.
    pub fn len(&self) -> usize {
        self.found.len()
    }

    /// Returns true if nothing was found (the seed was empty).
    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }
}

/// Flood-fill detector over a `World`.
#[derive(Clone, Debug, Default)]
pub struct SpatialDetector {
    classifier: BlockClassifier,
    connectivity: Connectivity,
}

impl SpatialDetector {
    /// Creates a detector using `classifier` to decide emptiness.
    pub fn new(classifier: BlockClassifier, connectivity: Connectivity) -> Self {
        SpatialDetector {
            classifier,
            connectivity,
        }
    }

    /// Floods outward from `seed`.
    ///
    /// Stops as soon as more than `max_size` voxels have been found
    /// (`oversize`), or, when `abort_on_unbreakable` is set, as soon as an
    /// unbreakable voxel is reached (`aborted`). Without the abort flag,
    /// unbreakable voxels are treated as a boundary and left out.
    pub fn detect(
        &self,
        seed: VoxelPos,
        world: &impl BlockSource,
        max_size: usize,
        abort_on_unbreakable: bool,
    ) -> DetectionResult {
        let mut result = DetectionResult::default();
        let offsets = self.connectivity.offsets();

        let mut visited: HashSet<VoxelPos> = HashSet::new();
        let mut frontier: VecDeque<VoxelPos> = VecDeque::new();
        visited.insert(seed);
        frontier.push_back(seed);

        while let Some(pos) = frontier.pop_front() {
            let block = world.block_at(pos);
            if self.classifier.is_empty(block) {
                continue;
            }
            if self.classifier.is_unbreakable(block) {
                if abort_on_unbreakable {
                    result.aborted = true;
                    return result;
                }
                continue;
            }

            result.found.insert(pos);
            if result.found.len() > max_size {
                result.oversize = true;
                return result;
            }

            for offset in &offsets {
                let next: Point3<i32> = pos + offset;
                if visited.insert(next) {
                    frontier.push_back(next);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::block::{block_type::BlockType, Block};
    use crate::engine_state::voxels::world::{World, WorldSide};

    fn world_with(blocks: &[(i32, i32, i32, BlockType)]) -> World {
        let mut world = World::new(WorldSide::Authoritative);
        for (x, y, z, kind) in blocks {
            world.set_block(Point3::new(*x, *y, *z), Block::new(*kind)).unwrap();
        }
        world
    }

    #[test]
    fn finds_only_the_connected_component() {
        let world = world_with(&[
            (10, 10, 10, BlockType::WOOD),
            (11, 10, 10, BlockType::WOOD),
            (11, 11, 10, BlockType::DIRT),
            (13, 10, 10, BlockType::WOOD),
        ]);
        let result = SpatialDetector::default().detect(Point3::new(10, 10, 10), &world, 100, true);
        assert_eq!(result.len(), 3);
        assert!(!result.found.contains(&Point3::new(13, 10, 10)));
        assert!(!result.oversize && !result.aborted);
    }

    #[test]
    fn diagonal_neighbours_need_twenty_six_connectivity() {
        let world = world_with(&[(5, 5, 5, BlockType::WOOD), (6, 6, 6, BlockType::WOOD)]);
        let six = SpatialDetector::default().detect(Point3::new(5, 5, 5), &world, 100, true);
        assert_eq!(six.len(), 1);

        let detector = SpatialDetector::new(BlockClassifier::default(), Connectivity::TwentySix);
        assert_eq!(detector.detect(Point3::new(5, 5, 5), &world, 100, true).len(), 2);
    }

    #[test]
    fn stops_growing_one_past_the_limit() {
        let blocks: Vec<_> = (0..10).map(|x| (x, 20, 0, BlockType::WHITE)).collect();
        let world = world_with(&blocks);
        let result = SpatialDetector::default().detect(Point3::new(0, 20, 0), &world, 4, true);
        assert!(result.oversize);
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn unbreakable_neighbour_aborts_or_bounds() {
        let world = world_with(&[(0, 1, 0, BlockType::WOOD), (0, 0, 0, BlockType::BEDROCK)]);
        let aborted = SpatialDetector::default().detect(Point3::new(0, 1, 0), &world, 100, true);
        assert!(aborted.aborted);

        let bounded = SpatialDetector::default().detect(Point3::new(0, 1, 0), &world, 100, false);
        assert!(!bounded.aborted);
        assert_eq!(bounded.found, HashSet::from([Point3::new(0, 1, 0)]));
    }

    #[test]
    fn excluded_kinds_are_not_traversed() {
        let world = world_with(&[
            (0, 5, 0, BlockType::WOOD),
            (1, 5, 0, BlockType::LEAVES),
            (2, 5, 0, BlockType::WOOD),
        ]);
        let detector = SpatialDetector::new(BlockClassifier::new([BlockType::LEAVES]), Connectivity::Six);
        assert_eq!(detector.detect(Point3::new(0, 5, 0), &world, 100, true).len(), 1);
        assert_eq!(SpatialDetector::default().detect(Point3::new(0, 5, 0), &world, 100, true).len(), 3);
    }

    #[test]
    fn empty_seed_finds_nothing() {
        let world = world_with(&[(1, 1, 1, BlockType::WOOD)]);
        assert!(SpatialDetector::default().detect(Point3::new(0, 1, 1), &world, 100, true).is_empty());
    }

    #[test]
    fn every_seed_in_a_component_yields_the_same_set() {
        fastrand::seed(0x5eed);
        let mut world = World::new(WorldSide::Authoritative);
        let mut placed = vec![Point3::new(0, 64, 0)];
        world.set_block(placed[0], Block::new(BlockType::WOOD)).unwrap();
        let offsets = Connectivity::Six.offsets();
        for _ in 0..200 {
            let from = placed[fastrand::usize(..placed.len())];
            let next = from + offsets[fastrand::usize(..offsets.len())];
            if world.get_block(next).is_air() {
                world.set_block(next, Block::new(BlockType::WOOD)).unwrap();
                placed.push(next);
            }
        }

        let detector = SpatialDetector::default();
        let reference = detector.detect(placed[0], &world, 10_000, true).found;
        assert_eq!(reference.len(), placed.len());
        for _ in 0..10 {
            let seed = placed[fastrand::usize(..placed.len())];
            assert_eq!(detector.detect(seed, &world, 10_000, true).found, reference);
        }
    }
}
