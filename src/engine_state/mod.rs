//! # Engine State Module
//!
//! The tick-thread owner of everything: the voxel world, the claim allocator,
//! the detection scheduler, and every live vessel.
//!
//! ## Key Components
//!
//! * `EngineState` - The main state container; one per world
//! * `config` - JSON configuration with defaults
//! * `commands` - Read-only query commands (list, tick rate, position)
//! * `task_management` - Tick-synchronized worker pool
//! * `vessels` - Transforms, claims, the vessel aggregate, persistence, observers
//! * `voxels` - Blocks, chunks, attachments, the world, and the spatial detector
//!
//! ## Architecture
//!
//! All mutation happens on the thread that calls `tick()`. Detection is the
//! only work that leaves it: it runs on a worker that copies world chunks
//! under short read locks, and its result comes back as a continuation that
//! `tick()` runs at the next tick boundary. `cancel_assembly()` drops that
//! continuation before it runs. Vessels are stepped in id order.
//!
//! ## Assembly Pipeline
//!
//! 1. `assemble()` checks the world is authoritative and schedules detection
//! 2. At a tick boundary the result is checked against the size limit, the
//!    unbreakable flag, and emptiness
//! 3. A claim wide enough for the cluster is allocated and the cluster is moved
//!    into it (rolled back on failure)
//! 4. The vessel scans its claim, recenters, computes its first transform, and
//!    starts simulating
//!
//! Every failure after step 1 leaves the world as it was and is reported to the
//! requester and through `assembly_status()`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use cgmath::Vector3;
use log::{debug, error, info, warn};
use web_time::{Duration, Instant};

use crate::core::error::{AssemblyError, PersistenceError, RejectionReason, TaskError, WorldError};
use crate::core::MtResource;

use config::EngineConfig;
use task_management::{TaskHandle, TickSyncScheduler};
use tick_timer::TickTimer;
use vessels::{
    assembly::{transfer_into_claim, transfer_out_of_claim, AssemblyPlan},
    claim::{RegionClaim, RegionClaimAllocator},
    network::{Requester, VesselId, Watcher, WatcherId},
    persistence::VesselRecord,
    physics::{NullProcessor, PhysicsProcessor},
    transform::VesselPose,
    vessel::{TickOutcome, Vessel, VesselSettings, VoxelChange},
};
use voxels::{
    attachment::Attachment,
    block::Block,
    cell_of,
    detector::{DetectionResult, SpatialDetector},
    tasks::detection_task::DetectionTask,
    world::{World, WorldSide},
    VoxelPos,
};

pub mod commands;
pub mod config;
pub mod task_management;
pub mod tick_timer;
pub mod vessels;
pub mod voxels;

/// Builds the physics processor of each new vessel.
pub type ProcessorFactory = Box<dyn Fn() -> Box<dyn PhysicsProcessor>>;

/// Identifies one call to `assemble()`.
pub type AssemblyTicket = u64;

/// A request to turn the cluster at `seed` into a vessel.
#[derive(Clone)]
pub struct AssemblyRequest {
    /// Any voxel of the cluster, world space
    pub seed: VoxelPos,
    /// World voxel whose attachment will control the vessel
    pub anchor: Option<VoxelPos>,
    /// Display name; generated if absent
    pub name: Option<String>,
    /// Told how the request ended
    pub requester: Option<Rc<dyn Requester>>,
}

impl AssemblyRequest {
    /// A request with no anchor, name, or requester.
    pub fn at(seed: VoxelPos) -> Self {
        AssemblyRequest {
            seed,
            anchor: None,
            name: None,
            requester: None,
        }
    }

    /// Sets the anchor voxel.
    pub fn with_anchor(mut self, anchor: VoxelPos) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Sets the display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets who gets notified.
    pub fn requested_by(mut self, requester: Rc<dyn Requester>) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// A request whose detection has not come back yet.
struct PendingAssembly {
    handle: TaskHandle<EngineState>,
    requester: Option<Rc<dyn Requester>>,
}

/// How an assembly request is doing.
#[derive(Debug)]
pub enum AssemblyStatus {
    /// Detection has not come back yet.
    Pending,
    /// The vessel exists.
    Assembled(VesselId),
    /// The request failed; the world is unchanged.
    Failed(AssemblyError),
}

/// The main state container for one world.
///
/// # Examples
///
/// ```
/// use cgmath::Point3;
/// use vessel_engine::engine_state::{
///     config::EngineConfig, AssemblyRequest, AssemblyStatus, EngineState,
///     voxels::{block::{block_type::BlockType, Block}, world::WorldSide},
/// };
/// use web_time::Duration;
///
/// let mut engine = EngineState::new(EngineConfig::default(), WorldSide::Authoritative);
/// engine.set_block(Point3::new(0, 64, 0), Block::new(BlockType::WOOD)).unwrap();
///
/// let ticket = engine.assemble(AssemblyRequest::at(Point3::new(0, 64, 0))).unwrap();
/// assert!(engine.run_until_idle(Duration::from_secs(10)));
/// assert!(matches!(engine.assembly_status(ticket), Some(AssemblyStatus::Assembled(_))));
/// assert_eq!(engine.vessel_count(), 1);
/// ```
pub struct EngineState {
    /// Loaded configuration
    pub config: EngineConfig,
    /// The voxel world, shared with detection workers
    world: MtResource<World>,
    claim_allocator: RegionClaimAllocator,
    scheduler: TickSyncScheduler<EngineState>,
    vessels: BTreeMap<VesselId, Vessel>,
    claim_owners: HashMap<RegionClaim, VesselId>,
    /// Claims of unloaded vessels, kept reserved until they come back
    parked_claims: HashSet<RegionClaim>,
    assemblies: HashMap<AssemblyTicket, AssemblyStatus>,
    pending_assemblies: HashMap<AssemblyTicket, PendingAssembly>,
    next_vessel_id: VesselId,
    next_ticket: AssemblyTicket,
    tick: u64,
    tick_timer: TickTimer,
    processor_factory: ProcessorFactory,
}

impl EngineState {
    /// Creates an engine with an empty world.
    pub fn new(config: EngineConfig, side: WorldSide) -> Self {
        let mut world = World::new(side);
        world.set_border(config.border);
        Self {
            claim_allocator: RegionClaimAllocator::new(config.claims.clone()),
            scheduler: TickSyncScheduler::new(config.worker_threads),
            world: MtResource::new(world),
            vessels: BTreeMap::new(),
            claim_owners: HashMap::new(),
            parked_claims: HashSet::new(),
            assemblies: HashMap::new(),
            pending_assemblies: HashMap::new(),
            next_vessel_id: 1,
            next_ticket: 1,
            tick: 0,
            tick_timer: TickTimer::default(),
            processor_factory: Box::new(|| Box::new(NullProcessor)),
            config,
        }
    }

    /// Replaces the processor factory used for vessels created from now on.
    pub fn set_processor_factory(&mut self, factory: impl Fn() -> Box<dyn PhysicsProcessor> + 'static) {
        self.processor_factory = Box::new(factory);
    }

    /// Shared handle to the world. Hold the lock briefly: `tick()` writes through it.
    pub fn world(&self) -> MtResource<World> {
        self.world.clone()
    }

    /// The claim allocator.
    pub fn claim_allocator(&self) -> &RegionClaimAllocator {
        &self.claim_allocator
    }

    /// A live vessel.
    pub fn vessel(&self, id: VesselId) -> Option<&Vessel> {
        self.vessels.get(&id)
    }

    /// A live vessel, mutably.
    pub fn vessel_mut(&mut self, id: VesselId) -> Option<&mut Vessel> {
        self.vessels.get_mut(&id)
    }

    /// Every live vessel in id order.
    pub fn vessels(&self) -> impl Iterator<Item = &Vessel> {
        self.vessels.values()
    }

    /// The first vessel with `name`.
    pub fn vessel_by_name(&self, name: &str) -> Option<&Vessel> {
        self.vessels.values().find(|vessel| vessel.name() == name)
    }

    /// Number of live vessels.
    pub fn vessel_count(&self) -> usize {
        self.vessels.len()
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Measured ticks per second over the last few ticks.
    pub fn tick_rate(&self) -> f64 {
        self.tick_timer.ticks_per_second()
    }

    /// The vessel whose claim holds `pos`.
    pub fn owner_of(&self, pos: VoxelPos) -> Option<VesselId> {
        let claim = self.claim_allocator.claim_containing(cell_of(pos))?;
        self.claim_owners.get(&claim).copied()
    }

    fn vessel_settings(&self) -> VesselSettings {
        VesselSettings {
            bounding_margin: self.config.bounding_margin,
            parallel_threshold: self.config.parallel_threshold,
            alignment_tolerance_degrees: self.config.alignment_tolerance_degrees,
            classifier: self.config.classifier(),
        }
    }

    /// Starts assembling the cluster at `request.seed`.
    ///
    /// Detection runs on a worker; the rest happens at a later tick boundary.
    /// Only the authoritative side may assemble.
    pub fn assemble(&mut self, request: AssemblyRequest) -> Result<AssemblyTicket, AssemblyError> {
        if !self.world.get().is_authoritative() {
            return Err(AssemblyError::IllegalInvocation);
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.assemblies.insert(ticket, AssemblyStatus::Pending);

        let detector = SpatialDetector::new(self.config.classifier(), self.config.connectivity);
        let task = DetectionTask::new(
            self.world.clone(),
            detector,
            request.seed,
            self.config.max_vessel_size.saturating_add(1),
            true,
        );
        debug!("Assembly {} scheduled detection from {:?}", ticket, request.seed);

        let failure_requester = request.requester.clone();
        let requester = request.requester.clone();
        let handle = self
            .scheduler
            .schedule_off_thread(task)
            .on_failure(move |engine: &mut EngineState, error: TaskError| {
                let outcome: Result<VesselId, AssemblyError> =
                    Err(RejectionReason::DetectionFailed(error).into());
                engine.finish_assembly(ticket, failure_requester.as_deref(), outcome);
            })
            .then_on_tick_thread(move |engine: &mut EngineState, result: DetectionResult| {
                let outcome = engine.build_vessel(&request, result);
                engine.finish_assembly(ticket, request.requester.as_deref(), outcome);
            });
        self.pending_assemblies
            .insert(ticket, PendingAssembly { handle, requester });
        Ok(ticket)
    }

    /// Drops a pending assembly before its detection result is used. The world
    /// is not touched; the request ends as `Failed(Cancelled)` and the requester
    /// is told. Returns false if the request is unknown or already finished.
    pub fn cancel_assembly(&mut self, ticket: AssemblyTicket) -> bool {
        let Some(pending) = self.pending_assemblies.remove(&ticket) else {
            return false;
        };
        if !pending.handle.cancel() {
            return false;
        }
        let outcome: Result<VesselId, AssemblyError> = Err(RejectionReason::Cancelled.into());
        self.finish_assembly(ticket, pending.requester.as_deref(), outcome);
        true
    }

    /// Where an assembly request stands.
    pub fn assembly_status(&self, ticket: AssemblyTicket) -> Option<&AssemblyStatus> {
        self.assemblies.get(&ticket)
    }

    /// Removes and returns a finished request's status.
    pub fn take_assembly_status(&mut self, ticket: AssemblyTicket) -> Option<AssemblyStatus> {
        if matches!(self.assemblies.get(&ticket), Some(AssemblyStatus::Pending) | None) {
            return None;
        }
        self.assemblies.remove(&ticket)
    }

    fn finish_assembly(
        &mut self,
        ticket: AssemblyTicket,
        requester: Option<&dyn Requester>,
        outcome: Result<VesselId, AssemblyError>,
    ) {
        self.pending_assemblies.remove(&ticket);
        let status = match outcome {
            Ok(id) => {
                if let (Some(requester), Some(vessel)) = (requester, self.vessels.get(&id)) {
                    requester.notify(&format!(
                        "Assembled '{}' with {} voxels",
                        vessel.name(),
                        vessel.voxel_count()
                    ));
                }
                AssemblyStatus::Assembled(id)
            }
            Err(error) => {
                info!("Assembly {} failed: {}", ticket, error);
                if let Some(requester) = requester {
                    requester.notify(&error.to_string());
                }
                AssemblyStatus::Failed(error)
            }
        };
        self.assemblies.insert(ticket, status);
    }

    fn build_vessel(&mut self, request: &AssemblyRequest, result: DetectionResult) -> Result<VesselId, AssemblyError> {
        let max = self.config.max_vessel_size;
        if result.aborted {
            return Err(RejectionReason::Unbreakable.into());
        }
        if result.oversize || result.len() > max {
            return Err(RejectionReason::Oversize {
                found: result.len(),
                max,
            }
            .into());
        }
        if result.is_empty() {
            return Err(RejectionReason::EmptySeed { seed: request.seed }.into());
        }

        let radius = AssemblyPlan::enclosing_radius(request.seed, &result.found);
        let claim = self
            .claim_allocator
            .allocate_enclosing(radius)
            .map_err(RejectionReason::ClaimExhaustion)?;
        let plan = AssemblyPlan::new(request.seed, claim);

        let transferred = transfer_into_claim(&mut self.world.get_mut(), &result.found, &plan);
        let report = match transferred {
            Ok(report) => report,
            Err(error) => {
                self.claim_allocator.release(&claim);
                return Err(RejectionReason::CopyFailed(error).into());
            }
        };
        for (pos, old) in report.cleared {
            self.route_change(pos, old, Block::AIR);
        }

        let id = self.next_vessel_id;
        self.next_vessel_id += 1;
        let name = request.name.clone().unwrap_or_else(|| format!("vessel-{}", id));
        let pivot = claim.region_center().map(|v| v as f64) + Vector3::new(0.5, 0.5, 0.5);
        let pose = VesselPose::at(request.seed.map(|v| v as f64) + Vector3::new(0.5, 0.5, 0.5));

        let vessel = Vessel::new(id, name, claim, pose, pivot, (self.processor_factory)(), self.vessel_settings())
            .and_then(|mut vessel| {
                let world = self.world.get();
                vessel.rebuild_from_world(&world);
                vessel.set_anchor(request.anchor.map(|anchor| anchor + plan.offset));
                vessel.finish_loading(world.border())?;
                Ok(vessel)
            });
        let vessel = match vessel {
            Ok(vessel) => vessel,
            Err(error) => {
                self.abandon_claim(&plan, &result.found);
                return Err(RejectionReason::Transform(error).into());
            }
        };

        {
            let mut world = self.world.get_mut();
            for cell in claim.cells() {
                world.load_cell(cell);
            }
        }
        info!(
            "Assembled vessel {} '{}' with {} voxels into claim ({}, {})",
            id,
            vessel.name(),
            vessel.voxel_count(),
            claim.center_x(),
            claim.center_z()
        );
        self.claim_owners.insert(claim, id);
        self.vessels.insert(id, vessel);
        Ok(id)
    }

    /// Puts a half-built vessel's voxels back where they came from.
    fn abandon_claim(&mut self, plan: &AssemblyPlan, found: &HashSet<VoxelPos>) {
        let local: Vec<VoxelPos> = found.iter().map(|pos| *pos + plan.offset).collect();
        if let Err(error) = transfer_out_of_claim(&mut self.world.get_mut(), &plan.claim, &local, plan.offset) {
            error!("Could not return voxels of an abandoned claim: {}", error);
        }
        self.claim_allocator.release(&plan.claim);
    }

    /// Writes a block and tells the owning vessel, if any.
    pub fn set_block(&mut self, pos: VoxelPos, block: Block) -> Result<Block, WorldError> {
        let old = self.world.get_mut().set_block(pos, block)?;
        self.route_change(pos, old, block);
        Ok(old)
    }

    fn route_change(&mut self, pos: VoxelPos, old: Block, new: Block) {
        let Some(id) = self.owner_of(pos) else {
            return;
        };
        let authoritative = self.world.get().is_authoritative();
        let change = match self.vessels.get_mut(&id) {
            Some(vessel) => vessel.on_voxel_changed(pos, old, new, authoritative),
            None => return,
        };
        if change == VoxelChange::Destroyed {
            self.destroy_vessel(id);
        }
    }

    /// Places an attachment, detaching whatever it replaces, and registers its
    /// capabilities with the owning vessel.
    pub fn place_attachment(&mut self, pos: VoxelPos, attachment: Box<dyn Attachment>) {
        let displaced = self.world.get_mut().insert_attachment(pos, attachment);
        if let Some(mut displaced) = displaced {
            if let Err(error) = displaced.detach() {
                warn!("Ignoring attachment teardown failure at {:?}: {}", pos, error);
            }
        }
        let Some(id) = self.owner_of(pos) else {
            return;
        };
        let world = self.world.get();
        if let (Some(vessel), Some(attachment)) = (self.vessels.get_mut(&id), world.attachment(pos)) {
            vessel.register_attachment(pos, attachment);
        }
    }

    /// Detaches and removes the attachment at `pos`. Returns false if there was none.
    pub fn remove_attachment(&mut self, pos: VoxelPos) -> bool {
        let taken = self.world.get_mut().take_attachment(pos);
        let Some(mut attachment) = taken else {
            return false;
        };
        if let Err(error) = attachment.detach() {
            warn!("Ignoring attachment teardown failure at {:?}: {}", pos, error);
        }
        if let Some(vessel) = self.owner_of(pos).and_then(|id| self.vessels.get_mut(&id)) {
            vessel.unregister_attachment(pos);
        }
        true
    }

    /// Runs one tick: pending continuations, every vessel, deconstruction,
    /// and the transform broadcast.
    pub fn tick(&mut self) {
        self.tick_timer.record(Instant::now());

        for work in self.scheduler.collect_ready() {
            work(self);
        }

        let seconds = self.config.tick_seconds;
        let mut to_deconstruct = Vec::new();
        {
            let world = self.world.get();
            for (id, vessel) in self.vessels.iter_mut() {
                match vessel.tick(&world, seconds) {
                    Ok(TickOutcome::Continue) => {}
                    Ok(TickOutcome::Deconstruct) => to_deconstruct.push(*id),
                    Err(error) => error!("Vessel {} skipped tick {}: {}", id, self.tick, error),
                }
            }
        }

        for id in to_deconstruct {
            if let Err(error) = self.deconstruct_vessel(id) {
                warn!("Vessel {} cannot deconstruct yet: {}", id, error);
            }
        }

        for vessel in self.vessels.values() {
            let message = vessel.transform_message(self.tick);
            for watcher in vessel.watchers() {
                watcher.transform(&message);
            }
        }

        self.tick += 1;
        self.scheduler.process_queued_tasks();
    }

    /// Runs pending continuations until the scheduler is idle or `timeout`
    /// passes. Vessels are not stepped. Returns true if it went idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            for work in self.scheduler.collect_ready() {
                work(self);
            }
            if self.scheduler.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.scheduler.wait_for_completion(deadline - now);
        }
    }

    /// Moves a vessel's voxels back onto the grid and retires it.
    ///
    /// Fails without changing anything if a voxel would land outside the world.
    pub fn deconstruct_vessel(&mut self, id: VesselId) -> Result<(), WorldError> {
        let Some(vessel) = self.vessels.get(&id) else {
            return Ok(());
        };
        let offset = vessel.deconstruct_offset();
        let claim = *vessel.claim();
        let mut voxels: Vec<VoxelPos> = vessel.voxels().iter().copied().collect();
        voxels.sort_by_key(|pos| (pos.x, pos.y, pos.z));

        let report = transfer_out_of_claim(&mut self.world.get_mut(), &claim, &voxels, offset)?;
        info!(
            "Deconstructed vessel {} ({} voxels, {} teardown failures)",
            id, report.copied, report.detach_failures
        );
        if let Some(mut vessel) = self.retire_vessel(id) {
            vessel.mark_deconstructed();
        }
        Ok(())
    }

    /// Drops a vessel whose voxels are gone.
    fn destroy_vessel(&mut self, id: VesselId) {
        let Some(vessel) = self.retire_vessel(id) else {
            return;
        };
        let mut world = self.world.get_mut();
        for cell in vessel.claim().cells() {
            for pos in world.attachment_positions_in_cell(cell) {
                if let Some(mut attachment) = world.take_attachment(pos) {
                    if let Err(error) = attachment.detach() {
                        warn!("Ignoring attachment teardown failure at {:?}: {}", pos, error);
                    }
                }
            }
            world.clear_cell(cell);
        }
        info!("Vessel {} destroyed, claim released", id);
    }

    /// Removes a vessel from the live set: watchers get an unload for every
    /// claimed cell and the claim is released.
    fn retire_vessel(&mut self, id: VesselId) -> Option<Vessel> {
        let mut vessel = self.vessels.remove(&id)?;
        let claim = *vessel.claim();
        for watcher in vessel.take_watchers() {
            for cell in claim.cells() {
                watcher.unload_cell(cell);
            }
        }
        self.claim_owners.remove(&claim);
        self.claim_allocator.release(&claim);
        let mut world = self.world.get_mut();
        for cell in claim.cells() {
            world.unload_cell(cell);
        }
        Some(vessel)
    }

    /// Starts replicating a vessel to `watcher`: the spawn payload, then every
    /// claimed cell. Returns false if the vessel is unknown or already watched.
    pub fn track_vessel(&mut self, id: VesselId, watcher: Rc<dyn Watcher>) -> bool {
        let Some(vessel) = self.vessels.get_mut(&id) else {
            return false;
        };
        if !vessel.add_watcher(watcher.clone()) {
            return false;
        }
        watcher.spawn(id, &vessel.spawn_payload().encode());
        let world = self.world.get();
        for cell in vessel.claim().cells() {
            watcher.load_cell(cell, &world.cell_bytes(cell));
        }
        debug!("Watcher {} now tracks vessel {}", watcher.id(), id);
        true
    }

    /// Stops replicating a vessel to a watcher.
    pub fn untrack_vessel(&mut self, id: VesselId, watcher: WatcherId) -> bool {
        let Some(vessel) = self.vessels.get_mut(&id) else {
            return false;
        };
        let Some(watcher) = vessel.remove_watcher(watcher) else {
            return false;
        };
        for cell in vessel.claim().cells() {
            watcher.unload_cell(cell);
        }
        true
    }

    /// Snapshot of a live vessel.
    pub fn save_vessel(&self, id: VesselId) -> Option<VesselRecord> {
        self.vessels.get(&id).map(VesselRecord::capture)
    }

    /// Saves a vessel and takes it out of the simulation. Its voxels stay in
    /// the world and its claim stays reserved until `load_vessel`.
    pub fn unload_vessel(&mut self, id: VesselId) -> Option<VesselRecord> {
        let record = self.save_vessel(id)?;
        let mut vessel = self.vessels.remove(&id)?;
        let claim = *vessel.claim();
        for watcher in vessel.take_watchers() {
            for cell in claim.cells() {
                watcher.unload_cell(cell);
            }
        }
        self.claim_owners.remove(&claim);
        self.parked_claims.insert(claim);
        let mut world = self.world.get_mut();
        for cell in claim.cells() {
            world.unload_cell(cell);
        }
        info!("Unloaded vessel {} '{}'", id, record.name);
        Some(record)
    }

    /// Brings a saved vessel back. The voxels are read from its claim.
    pub fn load_vessel(&mut self, record: &VesselRecord) -> Result<VesselId, PersistenceError> {
        record.validate()?;
        let claim = record.region_claim()?;
        let was_parked = self.parked_claims.remove(&claim);
        if !was_parked {
            self.claim_allocator.reserve(claim)?;
        }

        let id = self.next_vessel_id;
        let built = Vessel::new(
            id,
            record.name.clone(),
            claim,
            record.pose(),
            record.center_of_mass(),
            (self.processor_factory)(),
            self.vessel_settings(),
        )
        .and_then(|mut vessel| {
            vessel.processor_mut().load_state(&record.physics);
            let mut world = self.world.get_mut();
            for cell in claim.cells() {
                world.load_cell(cell);
            }
            vessel.rebuild_from_world(&world);
            vessel.set_anchor(record.anchor_voxel());
            vessel.restore_state(record.physics_enabled, record.bounds());
            vessel.finish_loading(world.border())?;
            Ok(vessel)
        });
        let vessel = match built {
            Ok(vessel) => vessel,
            Err(error) => {
                {
                    let mut world = self.world.get_mut();
                    for cell in claim.cells() {
                        world.unload_cell(cell);
                    }
                }
                if was_parked {
                    self.parked_claims.insert(claim);
                } else {
                    self.claim_allocator.release(&claim);
                }
                return Err(PersistenceError::InvalidRecord(error.to_string()));
            }
        };

        self.next_vessel_id += 1;
        self.claim_owners.insert(claim, id);
        self.vessels.insert(id, vessel);
        info!("Loaded vessel {} '{}'", id, record.name);
        Ok(id)
    }

    /// Stops the workers. Pending assemblies fail as cancelled.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
        self.pending_assemblies.clear();
        for status in self.assemblies.values_mut() {
            if matches!(status, AssemblyStatus::Pending) {
                *status = AssemblyStatus::Failed(RejectionReason::Cancelled.into());
            }
        }
    }
}
