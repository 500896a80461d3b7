//! # Vessel
//!
//! The aggregate for one assembled vessel: its voxel set (canonical and dense
//! index), claim, mass properties, pose and transforms, capabilities, watchers
//! and lifecycle.
//!
//! All mutation happens on the tick thread. The canonical voxel set is an
//! `Arc<HashSet<VoxelPos>>`: readers on other threads hold a snapshot and never
//! block the tick thread, which copies the set on write only while a snapshot
//! is still out. The bounding volume is only recomputed on the tick thread
//! after the change that dirtied it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use cgmath::*;
use log::{debug, info};

use crate::core::error::TransformError;
use crate::engine_state::voxels::{
    attachment::{Attachment, ControlDecision, ForceProvider, NodeController},
    block::{Block, BlockClassifier},
    world::{World, WorldBorder},
    VoxelPos,
};

use super::claim::RegionClaim;
use super::network::{SpawnPayload, TransformMessage, VesselId, Watcher, WatcherId};
use super::physics::{PhysicsContext, PhysicsProcessor};
use super::transform::{CoordinateSpace, CoordinateTransform, VesselPose};
use super::transform_manager::{BoundingVolume, TransformManager};
use super::voxel_index::RelativeVoxelIndex;

/// Fraction of the remaining rotation removed per tick while aligning.
const ALIGN_RATE: f64 = 0.25;

/// Angles below this many degrees snap to zero while aligning.
const ALIGN_SNAP_DEGREES: f64 = 1e-3;

/// Where a vessel is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VesselLifecycle {
    /// Voxels are being moved into the claim.
    Assembling,
    /// Simulated with physics on.
    Enabled,
    /// Simulated with physics off.
    Disabled,
    /// Steering back onto the grid, waiting to be deconstructed.
    AligningToGrid,
    /// Terminal. The voxels are back in the world or gone.
    Deconstructed,
}

/// Result of applying a voxel change to a vessel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoxelChange {
    /// The change does not concern this vessel.
    Ignored,
    /// Emptiness did not change (or the kind changed in place).
    Unchanged,
    /// A voxel joined the vessel.
    Added,
    /// A voxel left the vessel.
    Removed,
    /// The last voxel left; the vessel is destroyed.
    Destroyed,
}

/// What the tick loop should do with a vessel after stepping it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep simulating.
    Continue,
    /// Deconstruct now.
    Deconstruct,
}

/// Per-vessel tuning copied from the engine configuration.
#[derive(Clone, Debug)]
pub struct VesselSettings {
    /// Bounding-volume margin
    pub bounding_margin: f64,
    /// Voxel count above which bounds are reduced in parallel
    pub parallel_threshold: usize,
    /// Deconstruction gate, degrees
    pub alignment_tolerance_degrees: f64,
    /// Which kinds count as empty
    pub classifier: BlockClassifier,
}

/// An assembled vessel.
pub struct Vessel {
    id: VesselId,
    name: String,
    voxels: Arc<HashSet<VoxelPos>>,
    index: RelativeVoxelIndex,
    claim: RegionClaim,
    mass: f64,
    mass_moment: Vector3<f64>,
    center_of_mass: Point3<f64>,
    pose: VesselPose,
    transforms: TransformManager,
    bounding_dirty: bool,
    enabled: bool,
    fully_loaded: bool,
    aligning: bool,
    deconstruct_requested: bool,
    lifecycle: VesselLifecycle,
    anchor: Option<VoxelPos>,
    watchers: BTreeMap<WatcherId, Rc<dyn Watcher>>,
    force_providers: HashMap<VoxelPos, Arc<dyn ForceProvider>>,
    node_controllers: HashMap<VoxelPos, Arc<dyn NodeController>>,
    processor: Box<dyn PhysicsProcessor>,
    settings: VesselSettings,
}

impl Vessel {
    /// Creates an empty vessel in the `Assembling` state.
    ///
    /// `pose` and `pivot` place the claim in the world: `pivot` (local space)
    /// is drawn at `pose.position`.
    pub fn new(
        id: VesselId,
        name: String,
        claim: RegionClaim,
        pose: VesselPose,
        pivot: Point3<f64>,
        processor: Box<dyn PhysicsProcessor>,
        settings: VesselSettings,
    ) -> Result<Self, TransformError> {
        let transform = CoordinateTransform::from_pose(pose, pivot)?;
        Ok(Vessel {
            id,
            name,
            voxels: Arc::new(HashSet::new()),
            index: RelativeVoxelIndex::new(claim.region_center()),
            claim,
            mass: 0.0,
            mass_moment: Vector3::zero(),
            center_of_mass: pivot,
            pose,
            transforms: TransformManager::new(
                transform,
                settings.bounding_margin,
                settings.parallel_threshold,
            ),
            bounding_dirty: true,
            enabled: true,
            fully_loaded: false,
            aligning: false,
            deconstruct_requested: false,
            lifecycle: VesselLifecycle::Assembling,
            anchor: None,
            watchers: BTreeMap::new(),
            force_providers: HashMap::new(),
            node_controllers: HashMap::new(),
            processor,
            settings,
        })
    }

    /// Identity within the world.
    pub fn id(&self) -> VesselId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The claim this vessel occupies.
    pub fn claim(&self) -> &RegionClaim {
        &self.claim
    }

    /// The voxel keys of the dense index are relative to. Fixed for life.
    pub fn reference_voxel(&self) -> VoxelPos {
        self.index.reference()
    }

    /// Snapshot of the canonical voxel set. Later edits do not show up in it.
    pub fn voxels(&self) -> Arc<HashSet<VoxelPos>> {
        self.voxels.clone()
    }

    /// Number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.index.len()
    }

    /// Centre of mass, local space.
    pub fn center_of_mass(&self) -> Point3<f64> {
        self.center_of_mass
    }

    /// Total mass.
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Current pose.
    pub fn pose(&self) -> &VesselPose {
        &self.pose
    }

    /// Replaces the pose. Takes effect on the next transform update.
    pub fn set_pose(&mut self, pose: VesselPose) {
        self.pose = pose;
    }

    /// The transform manager.
    pub fn transforms(&self) -> &TransformManager {
        &self.transforms
    }

    /// Global bounding volume as of the last update.
    pub fn bounding_volume(&self) -> &BoundingVolume {
        self.transforms.bounding_volume()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> VesselLifecycle {
        self.lifecycle
    }

    /// Physics integration runs each tick.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Voxels are populated and the first transform is computed.
    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    /// The vessel is steering back onto the grid.
    pub fn is_aligning(&self) -> bool {
        self.aligning
    }

    /// The anchor voxel, local space.
    pub fn anchor(&self) -> Option<VoxelPos> {
        self.anchor
    }

    /// Sets the anchor voxel.
    pub fn set_anchor(&mut self, anchor: Option<VoxelPos>) {
        self.anchor = anchor;
    }

    /// Force capabilities by position.
    pub fn force_providers(&self) -> &HashMap<VoxelPos, Arc<dyn ForceProvider>> {
        &self.force_providers
    }

    /// Node capabilities by position.
    pub fn node_controllers(&self) -> &HashMap<VoxelPos, Arc<dyn NodeController>> {
        &self.node_controllers
    }

    /// The force collaborator.
    pub fn processor(&self) -> &dyn PhysicsProcessor {
        self.processor.as_ref()
    }

    /// Mutable access to the force collaborator.
    pub fn processor_mut(&mut self) -> &mut dyn PhysicsProcessor {
        self.processor.as_mut()
    }

    /// Restores the flags and bounds of a saved vessel.
    pub fn restore_state(&mut self, physics_enabled: bool, bounding_volume: BoundingVolume) {
        self.enabled = physics_enabled;
        self.transforms.set_bounding_volume(bounding_volume);
    }

    fn add_voxel(&mut self, pos: VoxelPos, block: Block) {
        if !self.index.insert(pos) {
            return;
        }
        Arc::make_mut(&mut self.voxels).insert(pos);
        self.add_mass(pos, block.kind().mass());
        self.bounding_dirty = true;
    }

    fn remove_voxel(&mut self, pos: VoxelPos, block: Block) {
        if !self.index.remove(pos) {
            return;
        }
        Arc::make_mut(&mut self.voxels).remove(&pos);
        self.add_mass(pos, -block.kind().mass());
        self.bounding_dirty = true;
    }

    fn add_mass(&mut self, pos: VoxelPos, mass: f64) {
        let centre = Vector3::new(pos.x as f64 + 0.5, pos.y as f64 + 0.5, pos.z as f64 + 0.5);
        self.mass += mass;
        self.mass_moment += centre * mass;
    }

    /// Moves the pivot to the mass-weighted centre and shifts the pose so the
    /// vessel stays where it is in the world.
    fn recenter(&mut self) {
        if self.mass <= 1e-9 {
            return;
        }
        let center = Point3::from_vec(self.mass_moment / self.mass);
        if center == self.center_of_mass {
            return;
        }
        let current = self.transforms.current();
        self.pose.position = current.transform_point(center, CoordinateSpace::LocalToGlobal);
        self.center_of_mass = center;
    }

    /// Rebuilds the voxel set and capability maps by scanning the claim.
    pub fn rebuild_from_world(&mut self, world: &World) {
        self.index.rebuild(std::iter::empty());
        self.voxels = Arc::new(HashSet::new());
        self.mass = 0.0;
        self.mass_moment = Vector3::zero();
        self.force_providers.clear();
        self.node_controllers.clear();

        let cells: Vec<_> = self.claim.cells().collect();
        for cell in &cells {
            for (pos, block) in world.solid_blocks_in_cell(*cell) {
                if !self.settings.classifier.is_empty(block) {
                    self.add_voxel(pos, block);
                }
            }
            for pos in world.attachment_positions_in_cell(*cell) {
                if let Some(attachment) = world.attachment(pos) {
                    self.register_attachment(pos, attachment);
                }
            }
        }
        self.recenter();
        debug!("Vessel {} rebuilt with {} voxels", self.id, self.voxel_count());
    }

    /// First transform computation after the voxels are in place. Marks the
    /// vessel fully loaded and enabled.
    pub fn finish_loading(&mut self, border: &WorldBorder) -> Result<(), TransformError> {
        self.update_transforms(border, true)?;
        self.transforms.set_render(self.transforms.current());
        self.fully_loaded = true;
        self.lifecycle = if self.enabled {
            VesselLifecycle::Enabled
        } else {
            VesselLifecycle::Disabled
        };
        Ok(())
    }

    fn update_transforms(&mut self, border: &WorldBorder, force_bounds: bool) -> Result<(), TransformError> {
        let update_bounds = force_bounds || self.bounding_dirty;
        let voxels: Vec<VoxelPos> = if update_bounds {
            self.index.iter().collect()
        } else {
            Vec::new()
        };
        self.transforms
            .update_all(&mut self.pose, self.center_of_mass, &voxels, border, update_bounds)?;
        if update_bounds {
            self.bounding_dirty = false;
        }
        Ok(())
    }

    /// Applies a voxel change at `pos` (local space).
    ///
    /// Only changes inside the claim on an authoritative world count. Kinds the
    /// classifier treats as empty are compared as air.
    pub fn on_voxel_changed(&mut self, pos: VoxelPos, old: Block, new: Block, authoritative: bool) -> VoxelChange {
        if !authoritative || !self.claim.contains_voxel(pos) || self.lifecycle == VesselLifecycle::Deconstructed {
            return VoxelChange::Ignored;
        }
        let old = self.settings.classifier.normalize(old);
        let new = self.settings.classifier.normalize(new);
        if old == new {
            return VoxelChange::Unchanged;
        }
        self.processor.on_voxel_changed(pos, old, new);

        let change = match (old.is_air(), new.is_air()) {
            (true, false) => {
                self.add_voxel(pos, new);
                VoxelChange::Added
            }
            (false, true) => {
                self.remove_voxel(pos, old);
                if self.index.is_empty() {
                    self.lifecycle = VesselLifecycle::Deconstructed;
                    info!("Vessel {} lost its last voxel and is destroyed", self.name);
                    return VoxelChange::Destroyed;
                }
                VoxelChange::Removed
            }
            _ => {
                if self.index.contains(pos) {
                    self.add_mass(pos, new.kind().mass() - old.kind().mass());
                }
                VoxelChange::Unchanged
            }
        };
        self.recenter();
        change
    }

    /// Records the capabilities `attachment` offers at `pos`.
    pub fn register_attachment(&mut self, pos: VoxelPos, attachment: &dyn Attachment) {
        match attachment.force_provider() {
            Some(provider) => {
                self.force_providers.insert(pos, provider);
            }
            None => {
                self.force_providers.remove(&pos);
            }
        }
        match attachment.node_controller() {
            Some(controller) => {
                self.node_controllers.insert(pos, controller);
            }
            None => {
                self.node_controllers.remove(&pos);
            }
        }
    }

    /// Forgets the capabilities at `pos`.
    pub fn unregister_attachment(&mut self, pos: VoxelPos) {
        self.force_providers.remove(&pos);
        self.node_controllers.remove(&pos);
    }

    /// Reads the anchor's control requests and updates flags and lifecycle.
    pub fn poll_control(&mut self, world: &World) -> ControlDecision {
        let state = self
            .anchor
            .and_then(|anchor| world.attachment(anchor))
            .and_then(|attachment| attachment.control_state());
        let decision = ControlDecision::resolve(state);

        if decision.aligning && !self.aligning {
            info!("Vessel {} is aligning to the grid", self.name);
        }
        self.enabled = decision.physics_enabled;
        self.aligning = decision.aligning;
        self.deconstruct_requested = decision.deconstruct;
        self.lifecycle = if self.aligning {
            VesselLifecycle::AligningToGrid
        } else if self.enabled {
            VesselLifecycle::Enabled
        } else {
            VesselLifecycle::Disabled
        };
        decision
    }

    fn align_step(&mut self) {
        let ease = |angle: &mut f64| {
            let wrapped = (*angle + 180.0).rem_euclid(360.0) - 180.0;
            let eased = wrapped * (1.0 - ALIGN_RATE);
            *angle = if eased.abs() < ALIGN_SNAP_DEGREES { 0.0 } else { eased };
        };
        ease(&mut self.pose.pitch);
        ease(&mut self.pose.yaw);
        ease(&mut self.pose.roll);
    }

    /// One simulation step.
    ///
    /// On error the vessel's transform is left as it was and the caller skips
    /// the vessel for this tick.
    pub fn tick(&mut self, world: &World, seconds: f64) -> Result<TickOutcome, TransformError> {
        if self.lifecycle == VesselLifecycle::Deconstructed {
            return Ok(TickOutcome::Continue);
        }
        self.transforms.update_prev();
        self.poll_control(world);

        if self.enabled {
            let previous = self.transforms.previous();
            let context = PhysicsContext {
                seconds,
                mass: self.mass,
                center_of_mass: self.center_of_mass,
                transform: &previous,
                force_providers: &self.force_providers,
            };
            self.processor.integrate(&mut self.pose, &context);
        }
        if self.aligning {
            self.align_step();
        }

        let moved = self.transforms.previous().pose() != &self.pose;
        self.update_transforms(world.border(), moved)?;
        let previous = self.transforms.previous();
        let current = self.transforms.current();
        self.processor.move_passengers(&previous, &current);
        self.transforms.set_render(current);

        if self.deconstruct_requested && self.can_be_deconstructed() {
            Ok(TickOutcome::Deconstruct)
        } else {
            Ok(TickOutcome::Continue)
        }
    }

    /// Returns true once the orientation is within the alignment tolerance of the grid.
    pub fn can_be_deconstructed(&self) -> bool {
        self.transforms.current().angle_from_grid_degrees() < self.settings.alignment_tolerance_degrees
    }

    /// Offset to subtract from local positions to put voxels back into the
    /// world on the grid.
    pub fn deconstruct_offset(&self) -> Vector3<i32> {
        let offset = self.center_of_mass - self.pose.position;
        Vector3::new(offset.x.round() as i32, offset.y.round() as i32, offset.z.round() as i32)
    }

    /// Marks the vessel terminal.
    pub fn mark_deconstructed(&mut self) {
        self.lifecycle = VesselLifecycle::Deconstructed;
        self.enabled = false;
    }

    /// The spawn payload for a new watcher.
    pub fn spawn_payload(&self) -> SpawnPayload {
        SpawnPayload {
            claim_center_x: self.claim.center_x(),
            claim_center_z: self.claim.center_z(),
            claim_radius: self.claim.radius(),
            pose: self.pose,
            center_of_mass: self.center_of_mass,
            anchor: self.anchor,
        }
    }

    /// The transform broadcast for `tick`.
    pub fn transform_message(&self, tick: u64) -> TransformMessage {
        TransformMessage {
            vessel: self.id,
            tick,
            pose: self.pose,
            center_of_mass: self.center_of_mass,
        }
    }

    /// Adds a watcher. Returns false if it was already watching.
    pub fn add_watcher(&mut self, watcher: Rc<dyn Watcher>) -> bool {
        self.watchers.insert(watcher.id(), watcher).is_none()
    }

    /// Removes a watcher.
    pub fn remove_watcher(&mut self, id: WatcherId) -> Option<Rc<dyn Watcher>> {
        self.watchers.remove(&id)
    }

    /// Removes every watcher.
    pub fn take_watchers(&mut self) -> Vec<Rc<dyn Watcher>> {
        std::mem::take(&mut self.watchers).into_values().collect()
    }

    /// Current watchers.
    pub fn watchers(&self) -> impl Iterator<Item = &Rc<dyn Watcher>> {
        self.watchers.values()
    }

    /// Returns true if the dense index matches the canonical set.
    pub fn is_index_consistent(&self) -> bool {
        self.index.is_consistent_with(&self.voxels)
    }
}
