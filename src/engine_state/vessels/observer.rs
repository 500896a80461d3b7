//! # Observer Replica
//!
//! The observer side of a vessel. It never simulates: it decodes the spawn
//! payload, collects the claimed cells, and eases its render transform toward
//! the latest pose broadcast by the authoritative side.
//!
//! ## Key Components
//!
//! - `ObserverVessel`: one replicated vessel
//! - `ObserverReplica`: a `Watcher` that keeps an `ObserverVessel` per tracked vessel

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cgmath::Point3;
use log::{debug, warn};

use crate::core::error::{PayloadError, TransformError};
use crate::engine_state::voxels::CellPos;

use super::claim::RegionClaim;
use super::network::{SpawnPayload, TransformMessage, VesselId, Watcher, WatcherId};
use super::transform::{CoordinateTransform, VesselPose};

/// Default share of the remaining distance covered per observer step.
pub const DEFAULT_OBSERVER_LERP: f64 = 0.6;

/// A read-only copy of a vessel.
pub struct ObserverVessel {
    id: VesselId,
    claim: RegionClaim,
    center_of_mass: Point3<f64>,
    render_pose: VesselPose,
    target_pose: VesselPose,
    latest_tick: Option<u64>,
    render: Arc<CoordinateTransform>,
    cells: HashMap<CellPos, Vec<u8>>,
    lerp: f64,
}

impl ObserverVessel {
    /// Builds the replica from an encoded `SpawnPayload`.
    pub fn from_spawn(id: VesselId, payload: &[u8], lerp: f64) -> Result<Self, PayloadError> {
        let spawn = SpawnPayload::decode(payload)?;
        let render = CoordinateTransform::from_pose(spawn.pose, spawn.center_of_mass)
            .unwrap_or_else(|_| CoordinateTransform::identity());
        Ok(ObserverVessel {
            id,
            claim: RegionClaim::new(spawn.claim_center_x, spawn.claim_center_z, spawn.claim_radius),
            center_of_mass: spawn.center_of_mass,
            render_pose: spawn.pose,
            target_pose: spawn.pose,
            latest_tick: None,
            render: Arc::new(render),
            cells: HashMap::new(),
            lerp: lerp.clamp(0.0, 1.0),
        })
    }

    /// Vessel identity.
    pub fn id(&self) -> VesselId {
        self.id
    }

    /// The claim the vessel's voxels live in.
    pub fn claim(&self) -> &RegionClaim {
        &self.claim
    }

    /// Raw data of a received cell.
    pub fn cell(&self, cell: CellPos) -> Option<&[u8]> {
        self.cells.get(&cell).map(Vec::as_slice)
    }

    /// Number of claimed cells received so far.
    pub fn loaded_cells(&self) -> usize {
        self.cells.len()
    }

    /// True once every claimed cell has arrived.
    pub fn is_fully_loaded(&self) -> bool {
        self.cells.len() == self.claim.cell_count()
    }

    /// Stores a claimed cell. Cells outside the claim are dropped.
    pub fn load_cell(&mut self, cell: CellPos, data: &[u8]) {
        if self.claim.contains_cell(cell) {
            self.cells.insert(cell, data.to_vec());
        } else {
            debug!("Vessel {} ignoring cell {:?} outside its claim", self.id, cell);
        }
    }

    /// Forgets a cell.
    pub fn unload_cell(&mut self, cell: CellPos) {
        self.cells.remove(&cell);
    }

    /// Accepts a pose broadcast. Messages older than the newest one seen are
    /// dropped.
    pub fn receive(&mut self, message: &TransformMessage) {
        if self.latest_tick.is_some_and(|tick| message.tick < tick) {
            return;
        }
        self.latest_tick = Some(message.tick);
        self.target_pose = message.pose;
        self.center_of_mass = message.center_of_mass;
    }

    /// Moves the render pose `lerp` of the way toward the latest broadcast and
    /// publishes a new render transform.
    pub fn step(&mut self) -> Result<(), TransformError> {
        let pose = self.render_pose.lerp(&self.target_pose, self.lerp);
        let transform = CoordinateTransform::from_pose(pose, self.center_of_mass)?;
        self.render_pose = pose;
        self.render = Arc::new(transform);
        Ok(())
    }

    /// Pose currently drawn.
    pub fn render_pose(&self) -> &VesselPose {
        &self.render_pose
    }

    /// Pose the replica is easing toward.
    pub fn target_pose(&self) -> &VesselPose {
        &self.target_pose
    }

    /// Transform currently drawn.
    pub fn render(&self) -> Arc<CoordinateTransform> {
        self.render.clone()
    }
}

/// Keeps replicas of every vessel it is told about.
pub struct ObserverReplica {
    id: WatcherId,
    lerp: f64,
    vessels: RefCell<BTreeMap<VesselId, ObserverVessel>>,
    pending_cells: RefCell<HashMap<CellPos, Vec<u8>>>,
}

impl ObserverReplica {
    /// An empty replica.
    pub fn new(id: WatcherId, lerp: f64) -> Self {
        ObserverReplica {
            id,
            lerp,
            vessels: RefCell::new(BTreeMap::new()),
            pending_cells: RefCell::new(HashMap::new()),
        }
    }

    /// Number of vessels being replicated.
    pub fn vessel_count(&self) -> usize {
        self.vessels.borrow().len()
    }

    /// Runs `f` against a replicated vessel.
    pub fn with_vessel<R>(&self, id: VesselId, f: impl FnOnce(&ObserverVessel) -> R) -> Option<R> {
        self.vessels.borrow().get(&id).map(f)
    }

    /// Advances every replica one render step.
    pub fn step(&self) {
        for vessel in self.vessels.borrow_mut().values_mut() {
            if let Err(error) = vessel.step() {
                warn!("Vessel {} replica kept its last transform: {}", vessel.id(), error);
            }
        }
    }
}

impl Watcher for ObserverReplica {
    fn id(&self) -> WatcherId {
        self.id
    }

    fn spawn(&self, vessel: VesselId, payload: &[u8]) {
        match ObserverVessel::from_spawn(vessel, payload, self.lerp) {
            Ok(mut replica) => {
                let mut pending = self.pending_cells.borrow_mut();
                let cells: Vec<CellPos> = pending
                    .keys()
                    .filter(|cell| replica.claim().contains_cell(**cell))
                    .copied()
                    .collect();
                for cell in cells {
                    if let Some(data) = pending.remove(&cell) {
                        replica.load_cell(cell, &data);
                    }
                }
                self.vessels.borrow_mut().insert(vessel, replica);
            }
            Err(error) => warn!("Dropping spawn of vessel {}: {}", vessel, error),
        }
    }

    fn load_cell(&self, cell: CellPos, data: &[u8]) {
        let mut vessels = self.vessels.borrow_mut();
        match vessels.values_mut().find(|vessel| vessel.claim().contains_cell(cell)) {
            Some(vessel) => vessel.load_cell(cell, data),
            None => {
                self.pending_cells.borrow_mut().insert(cell, data.to_vec());
            }
        }
    }

    fn unload_cell(&self, cell: CellPos) {
        self.pending_cells.borrow_mut().remove(&cell);
        let mut vessels = self.vessels.borrow_mut();
        for vessel in vessels.values_mut() {
            vessel.unload_cell(cell);
        }
        vessels.retain(|_, vessel| vessel.loaded_cells() > 0 || !vessel.claim().contains_cell(cell));
    }

    fn transform(&self, message: &TransformMessage) {
        if let Some(vessel) = self.vessels.borrow_mut().get_mut(&message.vessel) {
            vessel.receive(message);
        }
    }
}
