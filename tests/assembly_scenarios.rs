use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, PoisonError};

use cgmath::{Point3, Vector3};
use web_time::Duration;

use vessel_engine::core::error::{AssemblyError, PersistenceError, RejectionReason};
use vessel_engine::engine_state::{
    config::EngineConfig,
    vessels::{
        claim::RegionClaim,
        network::Requester,
        observer::ObserverReplica,
        persistence::VesselRecord,
        physics::LinearIntegrator,
        transform::CoordinateSpace,
    },
    voxels::{
        attachment::{Attachment, ControlCore, ForceProvider},
        block::{block_type::BlockType, Block},
        world::WorldSide,
        VoxelPos,
    },
    AssemblyRequest, AssemblyStatus, EngineState,
};

const WAIT: Duration = Duration::from_secs(10);

fn engine() -> EngineState {
    EngineState::new(EngineConfig::default(), WorldSide::Authoritative)
}

fn build(engine: &mut EngineState, positions: &[VoxelPos], kind: BlockType) {
    for pos in positions {
        engine.set_block(*pos, Block::new(kind)).unwrap();
    }
}

fn cube(origin: VoxelPos, side: i32) -> Vec<VoxelPos> {
    let mut positions = Vec::new();
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                positions.push(origin + Vector3::new(x, y, z));
            }
        }
    }
    positions
}

fn assemble(engine: &mut EngineState, request: AssemblyRequest) -> AssemblyStatus {
    let ticket = engine.assemble(request).unwrap();
    assert!(engine.run_until_idle(WAIT));
    engine.take_assembly_status(ticket).unwrap()
}

fn assembled_id(status: AssemblyStatus) -> u64 {
    match status {
        AssemblyStatus::Assembled(id) => id,
        other => panic!("expected a vessel, got {:?}", other),
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[derive(Default)]
struct RecordingRequester {
    messages: RefCell<Vec<String>>,
}

impl Requester for RecordingRequester {
    fn notify(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

#[test]
fn cube_becomes_a_vessel_in_place() {
    let mut engine = engine();
    let positions = cube(Point3::new(0, 64, 0), 3);
    build(&mut engine, &positions, BlockType::WOOD);

    let id = assembled_id(assemble(&mut engine, AssemblyRequest::at(Point3::new(1, 65, 1))));
    let vessel = engine.vessel(id).unwrap();
    assert_eq!(vessel.voxel_count(), 27);
    assert!(vessel.is_fully_loaded());
    assert!(vessel.is_index_consistent());

    let com = vessel
        .transforms()
        .current()
        .transform_point(vessel.center_of_mass(), CoordinateSpace::LocalToGlobal);
    assert!(close(com.x, 1.5) && close(com.y, 65.5) && close(com.z, 1.5), "{:?}", com);

    let bounds = vessel.bounding_volume();
    assert!(close(bounds.min.x, -1.1) && close(bounds.max.x, 4.1));
    assert!(close(bounds.min.y, 62.9) && close(bounds.max.y, 68.1));

    let world = engine.world();
    let world = world.get();
    for pos in &positions {
        assert!(world.get_block(*pos).is_air());
    }
    assert_eq!(world.get_block(vessel.reference_voxel()).kind(), BlockType::WOOD);
}

#[test]
fn size_limit_is_inclusive() {
    let mut config = EngineConfig::default();
    config.max_vessel_size = 8;
    let mut engine = EngineState::new(config, WorldSide::Authoritative);

    build(&mut engine, &cube(Point3::new(0, 64, 0), 2), BlockType::WOOD);
    assembled_id(assemble(&mut engine, AssemblyRequest::at(Point3::new(0, 64, 0))));

    let line: Vec<VoxelPos> = (0..9).map(|x| Point3::new(x, 64, 40)).collect();
    build(&mut engine, &line, BlockType::WOOD);
    match assemble(&mut engine, AssemblyRequest::at(line[4])) {
        AssemblyStatus::Failed(AssemblyError::Rejected(RejectionReason::Oversize { found, max })) => {
            assert_eq!(found, 9);
            assert_eq!(max, 8);
        }
        other => panic!("expected oversize, got {:?}", other),
    }
    let world = engine.world();
    assert!(line.iter().all(|pos| world.get().get_block(*pos).kind() == BlockType::WOOD));
    assert_eq!(engine.claim_allocator().live_count(), 1);
}

#[test]
fn cluster_touching_bedrock_is_rejected() {
    let mut engine = engine();
    let column: Vec<VoxelPos> = (1..5).map(|y| Point3::new(3, y, 3)).collect();
    build(&mut engine, &column, BlockType::DIRT);
    build(&mut engine, &[Point3::new(3, 0, 3)], BlockType::BEDROCK);

    let requester = Rc::new(RecordingRequester::default());
    let status = assemble(
        &mut engine,
        AssemblyRequest::at(Point3::new(3, 4, 3)).requested_by(requester.clone()),
    );
    assert!(matches!(
        status,
        AssemblyStatus::Failed(AssemblyError::Rejected(RejectionReason::Unbreakable))
    ));
    assert_eq!(requester.messages.borrow().len(), 1);
    assert_eq!(engine.vessel_count(), 0);
    assert_eq!(engine.claim_allocator().live_count(), 0);
}

#[test]
fn empty_seed_is_rejected() {
    let mut engine = engine();
    let status = assemble(&mut engine, AssemblyRequest::at(Point3::new(5, 70, 5)));
    assert!(matches!(
        status,
        AssemblyStatus::Failed(AssemblyError::Rejected(RejectionReason::EmptySeed { .. }))
    ));
}

#[test]
fn observers_cannot_assemble() {
    let mut engine = EngineState::new(EngineConfig::default(), WorldSide::Observer);
    assert!(matches!(
        engine.assemble(AssemblyRequest::at(Point3::new(0, 64, 0))),
        Err(AssemblyError::IllegalInvocation)
    ));
}

#[test]
fn requester_hears_about_success() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0)], BlockType::WOOD);
    let requester = Rc::new(RecordingRequester::default());
    assembled_id(assemble(
        &mut engine,
        AssemblyRequest::at(Point3::new(0, 64, 0))
            .named("dinghy")
            .requested_by(requester.clone()),
    ));
    assert_eq!(*requester.messages.borrow(), vec!["Assembled 'dinghy' with 1 voxels".to_string()]);
}

#[test]
fn separate_clusters_get_disjoint_claims() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0)], BlockType::WOOD);
    build(&mut engine, &[Point3::new(50, 64, 50)], BlockType::WOOD);

    let first = engine.assemble(AssemblyRequest::at(Point3::new(0, 64, 0))).unwrap();
    let second = engine.assemble(AssemblyRequest::at(Point3::new(50, 64, 50))).unwrap();
    assert!(engine.run_until_idle(WAIT));

    let a = assembled_id(engine.take_assembly_status(first).unwrap());
    let b = assembled_id(engine.take_assembly_status(second).unwrap());
    let claim_a = *engine.vessel(a).unwrap().claim();
    let claim_b = *engine.vessel(b).unwrap().claim();
    assert!(!claim_a.overlaps(&claim_b));
}

#[test]
fn removing_the_last_voxel_destroys_the_vessel() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0), Point3::new(1, 64, 0)], BlockType::WOOD);
    let id = assembled_id(assemble(&mut engine, AssemblyRequest::at(Point3::new(0, 64, 0))));

    let local: Vec<VoxelPos> = engine.vessel(id).unwrap().voxels().iter().copied().collect();
    engine.set_block(local[0], Block::AIR).unwrap();
    assert_eq!(engine.vessel(id).unwrap().voxel_count(), 1);

    engine.set_block(local[1], Block::AIR).unwrap();
    assert!(engine.vessel(id).is_none());
    assert_eq!(engine.claim_allocator().live_count(), 0);
}

#[test]
fn saved_vessel_comes_back_the_same() {
    let mut engine = engine();
    build(&mut engine, &cube(Point3::new(10, 70, 10), 2), BlockType::WOOD);
    build(&mut engine, &[Point3::new(12, 70, 10)], BlockType::DIRT);
    let id = assembled_id(assemble(
        &mut engine,
        AssemblyRequest::at(Point3::new(10, 70, 10)).named("barge"),
    ));

    let before = engine.vessel(id).unwrap().voxels();
    let saved = engine.unload_vessel(id).unwrap();
    assert_eq!(engine.vessel_count(), 0);
    let json = saved.to_json().unwrap();

    let record = VesselRecord::from_json(&json).unwrap();
    let restored = engine.load_vessel(&record).unwrap();
    assert_eq!(engine.vessel(restored).unwrap().voxel_count(), 9);
    assert_eq!(*engine.vessel(restored).unwrap().voxels(), *before);

    let again = engine.save_vessel(restored).unwrap();
    assert_eq!(again.name, saved.name);
    assert_eq!(again.claim, saved.claim);
    assert_eq!(again.anchor, saved.anchor);
    assert_eq!(again.physics_enabled, saved.physics_enabled);
    for (a, b) in again.center.iter().zip(saved.center.iter()) {
        assert!(close(*a, *b));
    }
    for (a, b) in again.transform.position.iter().zip(saved.transform.position.iter()) {
        assert!(close(*a, *b));
    }
    for (a, b) in again.bounding_volume.iter().zip(saved.bounding_volume.iter()) {
        assert!(close(*a, *b));
    }
}

/// A copy of `record` that validates but cannot be placed: the pose and centre
/// are finite on their own and overflow once combined.
fn unplaceable(record: &VesselRecord) -> VesselRecord {
    let mut broken = record.clone();
    broken.transform.position[0] = 1.5e308;
    broken.center[0] = -1.5e308;
    broken
}

#[test]
fn failed_load_releases_a_fresh_claim() {
    let mut source = engine();
    build(&mut source, &[Point3::new(0, 64, 0)], BlockType::WOOD);
    let id = assembled_id(assemble(&mut source, AssemblyRequest::at(Point3::new(0, 64, 0))));
    let record = source.save_vessel(id).unwrap();
    let claim = record.region_claim().unwrap();

    let mut engine = engine();
    engine.set_block(claim.region_center(), Block::new(BlockType::WOOD)).unwrap();
    let broken = unplaceable(&record);
    assert!(broken.validate().is_ok());
    assert!(matches!(engine.load_vessel(&broken), Err(PersistenceError::InvalidRecord(_))));
    assert_eq!(engine.vessel_count(), 0);
    assert_eq!(engine.claim_allocator().live_count(), 0);
    assert!(!engine.claim_allocator().is_claimed(&claim));

    let loaded = engine.load_vessel(&record).unwrap();
    assert_eq!(engine.vessel(loaded).unwrap().voxel_count(), 1);
}

#[test]
fn failed_load_keeps_a_parked_claim_parked() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0)], BlockType::WOOD);
    let id = assembled_id(assemble(&mut engine, AssemblyRequest::at(Point3::new(0, 64, 0))));
    let record = engine.unload_vessel(id).unwrap();
    let claim = record.region_claim().unwrap();

    assert!(engine.load_vessel(&unplaceable(&record)).is_err());
    assert_eq!(engine.vessel_count(), 0);
    assert!(engine.claim_allocator().is_claimed(&claim));
    assert_eq!(engine.claim_allocator().live_count(), 1);

    let restored = engine.load_vessel(&record).unwrap();
    assert_eq!(engine.vessel(restored).unwrap().voxel_count(), 1);
    assert_eq!(engine.claim_allocator().live_count(), 1);
}

#[test]
fn long_cluster_gets_a_claim_that_holds_it() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0)], BlockType::WOOD);
    let first = assembled_id(assemble(&mut engine, AssemblyRequest::at(Point3::new(0, 64, 0))));

    let line: Vec<VoxelPos> = (0..400).map(|i| Point3::new(-i, 64, 40)).collect();
    build(&mut engine, &line, BlockType::WOOD);
    let second = assembled_id(assemble(&mut engine, AssemblyRequest::at(line[0])));

    let long = engine.vessel(second).unwrap();
    assert_eq!(long.voxel_count(), 400);
    assert!(long.voxels().iter().all(|pos| long.claim().contains_voxel(*pos)));
    let long_claim = *long.claim();
    let first_claim = *engine.vessel(first).unwrap().claim();
    assert!(!long_claim.overlaps(&first_claim));
    assert_eq!(engine.vessel(first).unwrap().voxel_count(), 1);

    let world = engine.world();
    let world = world.get();
    let solid_in = |claim: &RegionClaim| -> usize {
        claim.cells().map(|cell| world.solid_blocks_in_cell(cell).len()).sum()
    };
    assert_eq!(solid_in(&first_claim), 1);
    assert_eq!(solid_in(&long_claim), 400);
    assert!(line.iter().all(|pos| world.get_block(*pos).is_air()));
}

#[test]
fn cancelled_assembly_leaves_the_world_alone() {
    let mut engine = engine();
    let positions = cube(Point3::new(0, 64, 0), 2);
    build(&mut engine, &positions, BlockType::WOOD);

    let requester = Rc::new(RecordingRequester::default());
    let ticket = engine
        .assemble(AssemblyRequest::at(Point3::new(0, 64, 0)).requested_by(requester.clone()))
        .unwrap();
    assert!(engine.cancel_assembly(ticket));
    assert!(!engine.cancel_assembly(ticket));
    assert!(engine.run_until_idle(WAIT));

    assert!(matches!(
        engine.assembly_status(ticket),
        Some(AssemblyStatus::Failed(AssemblyError::Rejected(RejectionReason::Cancelled)))
    ));
    assert_eq!(requester.messages.borrow().len(), 1);
    assert_eq!(engine.vessel_count(), 0);
    assert_eq!(engine.claim_allocator().live_count(), 0);
    let world = engine.world();
    assert!(positions.iter().all(|pos| world.get().get_block(*pos).kind() == BlockType::WOOD));
}

#[test]
fn control_core_deconstructs_back_onto_the_grid() {
    let mut engine = engine();
    let positions = cube(Point3::new(-4, 80, 7), 3);
    build(&mut engine, &positions, BlockType::WOOD);
    let core_pos = Point3::new(-3, 81, 8);
    let core = ControlCore::new(core_pos);
    let controls = core.handle();
    engine.place_attachment(core_pos, Box::new(core));

    let id = assembled_id(assemble(
        &mut engine,
        AssemblyRequest::at(Point3::new(-4, 80, 7)).with_anchor(core_pos),
    ));
    for _ in 0..5 {
        engine.tick();
    }
    assert!(engine.vessel(id).is_some());

    controls
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .disassemble_requested = true;
    engine.tick();
    assert!(engine.vessel(id).is_none());
    assert_eq!(engine.claim_allocator().live_count(), 0);

    let world = engine.world();
    let world = world.get();
    for pos in &positions {
        assert_eq!(world.get_block(*pos).kind(), BlockType::WOOD, "{:?}", pos);
    }
    assert_eq!(world.attachment(core_pos).map(|core| core.kind().to_string()), Some("control_core".into()));
}

#[test]
fn vessel_without_an_anchor_deconstructs_on_its_first_tick() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0)], BlockType::WOOD);
    let id = assembled_id(assemble(&mut engine, AssemblyRequest::at(Point3::new(0, 64, 0))));
    engine.tick();
    assert!(engine.vessel(id).is_none());
    assert_eq!(engine.world().get().get_block(Point3::new(0, 64, 0)).kind(), BlockType::WOOD);
}

struct Thruster;

impl ForceProvider for Thruster {
    fn force_at(&self, _pos: VoxelPos, _seconds: f64) -> Vector3<f64> {
        Vector3::new(8.0, 0.0, 0.0)
    }
}

struct ThrusterBlock;

impl Attachment for ThrusterBlock {
    fn kind(&self) -> &str {
        "thruster"
    }

    fn relocated(&self, _to: VoxelPos) -> Box<dyn Attachment> {
        Box::new(ThrusterBlock)
    }

    fn force_provider(&self) -> Option<Arc<dyn ForceProvider>> {
        Some(Arc::new(Thruster))
    }
}

#[test]
fn force_providers_push_the_vessel() {
    let mut engine = engine();
    engine.set_processor_factory(|| Box::new(LinearIntegrator::default()));
    let hull: Vec<VoxelPos> = (0..4).map(|x| Point3::new(x, 90, 0)).collect();
    build(&mut engine, &hull, BlockType::WOOD);
    let core_pos = Point3::new(1, 90, 0);
    engine.place_attachment(core_pos, Box::new(ControlCore::new(core_pos)));
    engine.place_attachment(Point3::new(3, 90, 0), Box::new(ThrusterBlock));

    let id = assembled_id(assemble(&mut engine, AssemblyRequest::at(hull[0]).with_anchor(core_pos)));
    assert_eq!(engine.vessel(id).unwrap().force_providers().len(), 1);

    let start = engine.vessel(id).unwrap().pose().position;
    for _ in 0..10 {
        engine.tick();
    }
    let end = engine.vessel(id).unwrap().pose().position;
    assert!(end.x > start.x);
    assert!(close(end.y, start.y) && close(end.z, start.z));
}

#[test]
fn observers_replicate_and_drop_vessels() {
    let mut engine = engine();
    build(&mut engine, &[Point3::new(0, 64, 0), Point3::new(0, 65, 0)], BlockType::WOOD);
    let core_pos = Point3::new(0, 65, 0);
    let core = ControlCore::new(core_pos);
    let controls = core.handle();
    engine.place_attachment(core_pos, Box::new(core));
    let id = assembled_id(assemble(&mut engine, AssemblyRequest::at(core_pos).with_anchor(core_pos)));

    let replica = Rc::new(ObserverReplica::new(7, engine.config.observer_lerp));
    assert!(engine.track_vessel(id, replica.clone()));
    assert!(!engine.track_vessel(id, replica.clone()));
    assert_eq!(replica.with_vessel(id, |vessel| vessel.is_fully_loaded()), Some(true));

    engine.tick();
    replica.step();
    let expected = engine.vessel(id).unwrap().pose().position;
    let drawn = replica.with_vessel(id, |vessel| vessel.render_pose().position).unwrap();
    assert!(close(drawn.x, expected.x) && close(drawn.y, expected.y));

    controls
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .disassemble_requested = true;
    engine.tick();
    assert!(engine.vessel(id).is_none());
    assert_eq!(replica.vessel_count(), 0);
}
