//! # Voxel Transfer
//!
//! Moves a voxel cluster into a vessel's claim (assembly) and back out onto
//! the world grid (deconstruction).
//!
//! Ordering for assembly:
//! 1. copy every block, and a relocated copy of its attachment, into the claim
//! 2. detach the attachments at the old positions
//! 3. clear the old positions to air
//! 4. normalize every touched cell
//!
//! The copy only writes inside the fresh claim: a destination outside it fails
//! the copy. If any write fails, everything written so far is undone and the
//! source cluster is left untouched.

use std::collections::{BTreeSet, HashSet};

use cgmath::Vector3;
use log::{debug, error, warn};

use crate::core::error::WorldError;
use crate::engine_state::voxels::{
    attachment::Attachment,
    block::Block,
    cell_of,
    world::World,
    CellPos, VoxelPos,
};

use super::claim::RegionClaim;

/// What a transfer did.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Blocks written at their destination
    pub copied: usize,
    /// Attachments that failed to detach (logged, otherwise ignored)
    pub detach_failures: usize,
    /// Source positions cleared to air, with the block they held
    pub cleared: Vec<(VoxelPos, Block)>,
}

/// Where an assembled cluster goes inside its claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssemblyPlan {
    /// The requested seed voxel, world space
    pub seed: VoxelPos,
    /// The claim the cluster moves into
    pub claim: RegionClaim,
    /// The claim voxel the seed lands on
    pub reference_voxel: VoxelPos,
    /// Added to every world position to get its claim position
    pub offset: Vector3<i32>,
}

impl AssemblyPlan {
    /// Smallest claim radius, in cells, that keeps every voxel of `cluster`
    /// inside the claim once `seed` sits on its centre voxel.
    ///
    /// The centre voxel is at offset 7 of its 16-wide cell, so a claim of
    /// radius `r` reaches `16r + 7` voxels towards negative x/z and `16r + 8`
    /// towards positive.
    pub fn enclosing_radius(seed: VoxelPos, cluster: &HashSet<VoxelPos>) -> i32 {
        fn cells_needed(delta: i32) -> i32 {
            let beyond_centre_cell = if delta < 0 { -delta - 7 } else { delta - 8 };
            (beyond_centre_cell.max(0) + 15) / 16
        }
        cluster
            .iter()
            .map(|pos| cells_needed(pos.x - seed.x).max(cells_needed(pos.z - seed.z)))
            .max()
            .unwrap_or(0)
    }

    /// Plans to move the seed onto the centre voxel of `claim`.
    pub fn new(seed: VoxelPos, claim: RegionClaim) -> Self {
        let reference_voxel = claim.region_center();
        AssemblyPlan {
            seed,
            claim,
            reference_voxel,
            offset: reference_voxel - seed,
        }
    }
}

fn detach(attachment: &mut dyn Attachment, pos: VoxelPos) -> bool {
    match attachment.detach() {
        Ok(()) => true,
        Err(error) => {
            warn!("Ignoring attachment teardown failure at {:?}: {}", pos, error);
            false
        }
    }
}

/// Detaches and removes the attachment at `pos`. Returns false if teardown failed.
fn detach_at(world: &mut World, pos: VoxelPos) -> bool {
    match world.take_attachment(pos) {
        Some(mut attachment) => detach(attachment.as_mut(), pos),
        None => true,
    }
}

struct Written {
    pos: VoxelPos,
    previous: Block,
    displaced: Option<Box<dyn Attachment>>,
}

/// Copies the blocks and attachments of `sources` to `source + offset`.
/// With `within` set, every destination must lie inside that claim.
/// All-or-nothing: on failure every destination written is restored.
fn copy_all(
    world: &mut World,
    sources: &[VoxelPos],
    offset: Vector3<i32>,
    within: Option<&RegionClaim>,
) -> Result<usize, WorldError> {
    let mut written: Vec<Written> = Vec::with_capacity(sources.len());

    for source in sources {
        let destination = *source + offset;
        let block = world.get_block(*source);
        let attempt = match within {
            Some(claim) if !claim.contains_voxel(destination) => Err(WorldError::OutsideClaim { pos: destination }),
            _ => world.set_block(destination, block),
        };
        match attempt {
            Ok(previous) => {
                let moved = world
                    .attachment(*source)
                    .map(|attachment| attachment.relocated(destination));
                let displaced = match moved {
                    Some(moved) => world.insert_attachment(destination, moved),
                    None => world.take_attachment(destination),
                };
                written.push(Written {
                    pos: destination,
                    previous,
                    displaced,
                });
            }
            Err(failure) => {
                warn!(
                    "Copy to {:?} failed after {} voxels, rolling back: {}",
                    destination,
                    written.len(),
                    failure
                );
                for entry in written.into_iter().rev() {
                    if let Err(restore) = world.set_block(entry.pos, entry.previous) {
                        error!("Rollback could not restore {:?}: {}", entry.pos, restore);
                    }
                    match entry.displaced {
                        Some(displaced) => {
                            world.insert_attachment(entry.pos, displaced);
                        }
                        None => {
                            world.take_attachment(entry.pos);
                        }
                    }
                }
                return Err(failure);
            }
        }
    }

    let copied = written.len();
    for entry in written {
        if let Some(mut displaced) = entry.displaced {
            detach(displaced.as_mut(), entry.pos);
        }
    }
    Ok(copied)
}

fn normalize_cells(world: &mut World, cells: impl IntoIterator<Item = CellPos>) {
    let cells: BTreeSet<(i32, i32)> = cells.into_iter().map(|cell| (cell.x, cell.y)).collect();
    for (x, z) in cells {
        world.normalize_cell(CellPos::new(x, z));
    }
}

/// Moves `cluster` into the plan's claim.
pub fn transfer_into_claim(
    world: &mut World,
    cluster: &HashSet<VoxelPos>,
    plan: &AssemblyPlan,
) -> Result<TransferReport, WorldError> {
    let mut sources: Vec<VoxelPos> = cluster.iter().copied().collect();
    sources.sort_by_key(|pos| (pos.x, pos.y, pos.z));

    let mut report = TransferReport {
        copied: copy_all(world, &sources, plan.offset, Some(&plan.claim))?,
        ..TransferReport::default()
    };

    for source in &sources {
        if !detach_at(world, *source) {
            report.detach_failures += 1;
        }
    }

    for source in &sources {
        let old = world.set_block(*source, Block::AIR)?;
        report.cleared.push((*source, old));
    }

    normalize_cells(
        world,
        sources
            .iter()
            .map(|pos| cell_of(*pos))
            .chain(plan.claim.cells().collect::<Vec<_>>()),
    );
    debug!(
        "Moved {} voxels into claim at ({}, {})",
        report.copied,
        plan.claim.center_x(),
        plan.claim.center_z()
    );
    Ok(report)
}

/// Moves a vessel's voxels out of `claim` to `local - offset` and empties the claim.
///
/// Every destination is checked first; if any lies outside the world nothing
/// is written and the error is returned.
pub fn transfer_out_of_claim(
    world: &mut World,
    claim: &RegionClaim,
    voxels: &[VoxelPos],
    offset: Vector3<i32>,
) -> Result<TransferReport, WorldError> {
    if let Some(outside) = voxels.iter().map(|pos| *pos - offset).find(|pos| !world.contains(*pos)) {
        return Err(WorldError::OutOfBounds { pos: outside });
    }

    let mut report = TransferReport {
        copied: copy_all(world, voxels, -offset, None)?,
        ..TransferReport::default()
    };

    for cell in claim.cells() {
        for pos in world.attachment_positions_in_cell(cell) {
            if !detach_at(world, pos) {
                report.detach_failures += 1;
            }
        }
        world.clear_cell(cell);
    }

    normalize_cells(world, voxels.iter().map(|pos| cell_of(*pos - offset)));
    debug!(
        "Moved {} voxels out of claim at ({}, {})",
        report.copied,
        claim.center_x(),
        claim.center_z()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AttachmentError;
    use crate::engine_state::voxels::attachment::DataAttachment;
    use crate::engine_state::voxels::block::block_type::BlockType;
    use crate::engine_state::voxels::world::WorldSide;
    use cgmath::Point3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fragile {
        detached: Arc<AtomicUsize>,
    }

    impl Attachment for Fragile {
        fn kind(&self) -> &str {
            "fragile"
        }

        fn relocated(&self, _to: VoxelPos) -> Box<dyn Attachment> {
            Box::new(Fragile {
                detached: self.detached.clone(),
            })
        }

        fn detach(&mut self) -> Result<(), AttachmentError> {
            self.detached.fetch_add(1, Ordering::SeqCst);
            Err(AttachmentError::Teardown {
                kind: "fragile".into(),
                reason: "always fails".into(),
            })
        }
    }

    fn cluster(world: &mut World, positions: &[(i32, i32, i32)]) -> HashSet<VoxelPos> {
        positions
            .iter()
            .map(|(x, y, z)| {
                let pos = Point3::new(*x, *y, *z);
                world.set_block(pos, Block::new(BlockType::WOOD)).unwrap();
                pos
            })
            .collect()
    }

    #[test]
    fn assembly_moves_blocks_and_attachments() {
        let mut world = World::new(WorldSide::Authoritative);
        let voxels = cluster(&mut world, &[(0, 64, 0), (1, 64, 0)]);
        world.insert_attachment(Point3::new(1, 64, 0), Box::new(DataAttachment::new("crate", serde_json::json!({"n": 1}))));

        let plan = AssemblyPlan::new(Point3::new(0, 64, 0), RegionClaim::new(50, 50, 1));
        let report = transfer_into_claim(&mut world, &voxels, &plan).unwrap();
        assert_eq!(report.copied, 2);
        assert_eq!(report.cleared.len(), 2);

        let reference = plan.reference_voxel;
        assert_eq!(reference, Point3::new(807, 128, 807));
        assert_eq!(world.get_block(reference).kind(), BlockType::WOOD);
        assert_eq!(world.get_block(reference + Vector3::unit_x()).kind(), BlockType::WOOD);
        assert!(world.attachment(reference + Vector3::unit_x()).is_some());
        assert!(world.get_block(Point3::new(0, 64, 0)).is_air());
        assert!(world.attachment(Point3::new(1, 64, 0)).is_none());
    }

    #[test]
    fn failed_copy_rolls_back_and_leaves_sources() {
        let mut world = World::new(WorldSide::Authoritative);
        // The seed is at y 100, so y 240 maps to 268: above the world.
        let voxels = cluster(&mut world, &[(0, 100, 0), (0, 101, 0), (0, 240, 0)]);
        let plan = AssemblyPlan::new(Point3::new(0, 100, 0), RegionClaim::new(50, 50, 1));

        let result = transfer_into_claim(&mut world, &voxels, &plan);
        assert!(matches!(result, Err(WorldError::OutOfBounds { .. })));
        for pos in &voxels {
            assert_eq!(world.get_block(*pos).kind(), BlockType::WOOD);
        }
        assert!(world.get_block(plan.reference_voxel).is_air());
        assert!(world.solid_blocks_in_cell(CellPos::new(50, 50)).is_empty());
    }

    #[test]
    fn writes_outside_the_claim_roll_back() {
        let mut world = World::new(WorldSide::Authoritative);
        let line: Vec<(i32, i32, i32)> = (0..30).map(|x| (x, 64, 0)).collect();
        let voxels = cluster(&mut world, &line);
        world.insert_attachment(Point3::new(0, 64, 0), Box::new(DataAttachment::new("crate", serde_json::json!({}))));
        let plan = AssemblyPlan::new(Point3::new(0, 64, 0), RegionClaim::new(50, 50, 0));

        let result = transfer_into_claim(&mut world, &voxels, &plan);
        // x 0..=8 fit in cell 50; x 9 lands on 816, the first voxel of cell 51.
        assert_eq!(result.err(), Some(WorldError::OutsideClaim { pos: Point3::new(816, 128, 807) }));
        for pos in &voxels {
            assert_eq!(world.get_block(*pos).kind(), BlockType::WOOD);
        }
        assert!(world.attachment(Point3::new(0, 64, 0)).is_some());
        assert!(world.attachment(plan.reference_voxel).is_none());
        for cell in [CellPos::new(50, 50), CellPos::new(51, 50)] {
            assert!(world.solid_blocks_in_cell(cell).is_empty());
        }
    }

    #[test]
    fn enclosing_radius_fits_the_cluster() {
        let seed = Point3::new(0, 64, 0);
        let single: HashSet<VoxelPos> = [seed].into_iter().collect();
        assert_eq!(AssemblyPlan::enclosing_radius(seed, &single), 0);

        let reach = |dx: i32, dz: i32| -> i32 {
            let cluster: HashSet<VoxelPos> = [seed, Point3::new(dx, 64, dz)].into_iter().collect();
            AssemblyPlan::enclosing_radius(seed, &cluster)
        };
        assert_eq!(reach(-7, 0), 0);
        assert_eq!(reach(-8, 0), 1);
        assert_eq!(reach(8, 0), 0);
        assert_eq!(reach(9, 0), 1);
        assert_eq!(reach(0, 24), 1);
        assert_eq!(reach(0, 25), 2);
        assert_eq!(reach(-399, 3), 25);

        let line: HashSet<VoxelPos> = (0..400).map(|x| Point3::new(-x, 64, 0)).collect();
        let radius = AssemblyPlan::enclosing_radius(seed, &line);
        let plan = AssemblyPlan::new(seed, RegionClaim::new(50, 50, radius));
        assert!(line.iter().all(|pos| plan.claim.contains_voxel(*pos + plan.offset)));
        let tighter = AssemblyPlan::new(seed, RegionClaim::new(50, 50, radius - 1));
        assert!(!line.iter().all(|pos| tighter.claim.contains_voxel(*pos + tighter.offset)));
    }

    #[test]
    fn teardown_failures_do_not_block_the_transfer() {
        let mut world = World::new(WorldSide::Authoritative);
        let voxels = cluster(&mut world, &[(4, 70, 4)]);
        let detached = Arc::new(AtomicUsize::new(0));
        world.insert_attachment(Point3::new(4, 70, 4), Box::new(Fragile { detached: detached.clone() }));

        let plan = AssemblyPlan::new(Point3::new(4, 70, 4), RegionClaim::new(50, 50, 1));
        let report = transfer_into_claim(&mut world, &voxels, &plan).unwrap();
        assert_eq!(report.detach_failures, 1);
        assert_eq!(detached.load(Ordering::SeqCst), 1);
        assert!(world.get_block(Point3::new(4, 70, 4)).is_air());
        assert!(world.attachment(plan.reference_voxel).is_some());
    }

    #[test]
    fn deconstruction_restores_the_grid_and_empties_the_claim() {
        let mut world = World::new(WorldSide::Authoritative);
        let voxels = cluster(&mut world, &[(0, 64, 0), (0, 65, 0)]);
        let claim = RegionClaim::new(50, 50, 1);
        let plan = AssemblyPlan::new(Point3::new(0, 64, 0), claim);
        transfer_into_claim(&mut world, &voxels, &plan).unwrap();

        let local: Vec<VoxelPos> = voxels.iter().map(|pos| *pos + plan.offset).collect();
        let report = transfer_out_of_claim(&mut world, &claim, &local, plan.offset + Vector3::new(-2, 0, 0)).unwrap();
        assert_eq!(report.copied, 2);
        assert_eq!(world.get_block(Point3::new(2, 64, 0)).kind(), BlockType::WOOD);
        assert_eq!(world.get_block(Point3::new(2, 65, 0)).kind(), BlockType::WOOD);
        for cell in claim.cells() {
            assert!(world.solid_blocks_in_cell(cell).is_empty());
        }
    }

    #[test]
    fn deconstruction_outside_the_world_writes_nothing() {
        let mut world = World::new(WorldSide::Authoritative);
        let claim = RegionClaim::new(50, 50, 1);
        let local = vec![claim.region_center()];
        world.set_block(local[0], Block::new(BlockType::WOOD)).unwrap();
        let offset = Vector3::new(0, -200, 0);
        assert!(transfer_out_of_claim(&mut world, &claim, &local, offset).is_err());
        assert_eq!(world.get_block(local[0]).kind(), BlockType::WOOD);
    }
}
