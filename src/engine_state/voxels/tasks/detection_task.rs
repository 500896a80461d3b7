//! # Detection Task
//!
//! Packages a `SpatialDetector` flood fill as off-thread work. Scheduled by an
//! assembly request; the result is handled by the assembly continuation on the
//! tick thread.
//!
//! The world lock is taken once per chunk the flood touches, never for the
//! whole search.

use log::debug;

use crate::{
    core::{error::TaskError, MtResource},
    engine_state::{
        task_management::task::Task,
        voxels::{
            detector::{DetectionResult, SpatialDetector},
            world::{ChunkSnapshotReader, World},
            VoxelPos,
        },
    },
};

/// A flood fill from `seed` over a shared world.
pub struct DetectionTask {
    /// A thread-safe reference to the world being searched
    world: MtResource<World>,
    detector: SpatialDetector,
    seed: VoxelPos,
    max_size: usize,
    abort_on_unbreakable: bool,
}

impl DetectionTask {
    /// Creates a new detection task.
    ///
    /// # Arguments
    /// * `world` - A thread-safe reference to the world
    /// * `detector` - The configured detector
    /// * `seed` - Where the flood fill starts
    /// * `max_size` - Growth stops once more than this many voxels are found
    /// * `abort_on_unbreakable` - Stop at the first unbreakable voxel
    pub fn new(
        world: MtResource<World>,
        detector: SpatialDetector,
        seed: VoxelPos,
        max_size: usize,
        abort_on_unbreakable: bool,
    ) -> Self {
        DetectionTask {
            world,
            detector,
            seed,
            max_size,
            abort_on_unbreakable,
        }
    }
}

impl Task for DetectionTask {
    type Output = DetectionResult;

    fn process(self) -> Result<DetectionResult, TaskError> {
        let reader = ChunkSnapshotReader::new(self.world);
        let result = self
            .detector
            .detect(self.seed, &reader, self.max_size, self.abort_on_unbreakable);
        debug!(
            "Detection from {:?} found {} voxels in {} chunks (oversize: {}, aborted: {})",
            self.seed,
            result.len(),
            reader.chunks_copied(),
            result.oversize,
            result.aborted
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::block::{block_type::BlockType, Block};
    use crate::engine_state::voxels::world::WorldSide;
    use cgmath::Point3;

    #[test]
    fn runs_against_the_shared_world() {
        let world = MtResource::new(World::new(WorldSide::Authoritative));
        for x in 0..3 {
            world
                .get_mut()
                .set_block(Point3::new(x, 10, 0), Block::new(BlockType::WOOD))
                .unwrap();
        }
        let task = DetectionTask::new(world.clone(), SpatialDetector::default(), Point3::new(1, 10, 0), 10, true);
        let result = std::thread::spawn(move || task.process()).join().unwrap().unwrap();
        assert_eq!(result.len(), 3);
    }
}
