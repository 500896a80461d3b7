#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Vessel Engine
//!
//! Movable voxel structures ("vessels") for a block world.
//!
//! A connected cluster of blocks is detected with a flood fill, moved into a
//! reserved region of the world (its claim), and from then on drawn and
//! simulated through a rigid transform. When its control core asks for it, the
//! vessel eases back onto the grid and its blocks are written back into the
//! world.
//!
//! ## Key Modules
//!
//! * `core` - Error types and shared resource wrappers
//! * `engine_state` - The world, the vessels, the scheduler, and the tick loop
//!
//! ## Architecture
//!
//! * One tick thread owns every mutation
//! * Detection runs on worker threads and resumes on the tick thread
//! * Observers replicate vessels from a spawn payload plus per-tick transforms
//!
//! ## Usage
//!
//! ```no_run
//! fn main() {
//!     vessel_engine::run();
//! }
//! ```

use std::sync::PoisonError;

use cgmath::Point3;
use log::{error, info};
use web_time::Duration;

use engine_state::{
    commands::VesselCommand,
    config::EngineConfig,
    vessels::physics::LinearIntegrator,
    voxels::{
        attachment::ControlCore,
        block::{block_type::BlockType, Block},
        world::{TerrainMethod, WorldSide},
        CellPos,
    },
    AssemblyRequest, AssemblyStatus, EngineState,
};

pub mod core;
pub mod engine_state;

/// World y of the demo's grass layer.
const DEMO_SURFACE_Y: i32 = 60;

/// Runs a short headless demo: builds a hull above flat ground, assembles it,
/// simulates it for a while, then asks it to deconstruct.
///
/// The first command-line argument, if present, is a JSON config file.
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();
    info!("Logger initialized");

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                error!("{}; using defaults", err);
                EngineConfig::default()
            }
        },
        None => EngineConfig::default(),
    };

    let mut engine = EngineState::new(config, WorldSide::Authoritative);
    engine.set_processor_factory(|| Box::new(LinearIntegrator::default()));
    {
        let world = engine.world();
        let mut world = world.get_mut();
        for x in -1..=1 {
            for z in -1..=1 {
                world.generate_cell(CellPos::new(x, z), TerrainMethod::Flat { surface_y: DEMO_SURFACE_Y });
            }
        }
    }

    let hull_y = DEMO_SURFACE_Y + 4;
    for x in 0..5 {
        for z in 0..3 {
            if let Err(err) = engine.set_block(Point3::new(x, hull_y, z), Block::new(BlockType::WOOD)) {
                error!("Could not build the hull: {}", err);
                return;
            }
        }
    }
    let core_pos = Point3::new(2, hull_y + 1, 1);
    if let Err(err) = engine.set_block(core_pos, Block::new(BlockType::WHITE)) {
        error!("Could not place the control core: {}", err);
        return;
    }
    let core = ControlCore::new(core_pos);
    let controls = core.handle();
    engine.place_attachment(core_pos, Box::new(core));

    let ticket = match engine.assemble(AssemblyRequest::at(core_pos).with_anchor(core_pos).named("skiff")) {
        Ok(ticket) => ticket,
        Err(err) => {
            error!("Assembly refused: {}", err);
            return;
        }
    };
    engine.run_until_idle(Duration::from_secs(10));
    match engine.take_assembly_status(ticket) {
        Some(AssemblyStatus::Assembled(id)) => info!("Vessel {} is live", id),
        other => {
            error!("Assembly did not complete: {:?}", other);
            return;
        }
    }

    let tick_length = Duration::from_secs_f64(engine.config.tick_seconds);
    for _ in 0..40 {
        engine.tick();
        std::thread::sleep(tick_length);
    }
    for line in ["list", "tps", "pos skiff"] {
        match VesselCommand::parse(line) {
            Ok(command) => println!("{}", command.execute(&engine)),
            Err(err) => println!("{}", err),
        }
    }

    controls
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .disassemble_requested = true;
    for _ in 0..100 {
        if engine.vessel_count() == 0 {
            break;
        }
        engine.tick();
    }
    info!(
        "Demo finished after {} ticks with {} vessel(s) left",
        engine.tick_count(),
        engine.vessel_count()
    );
    engine.shutdown();
}
