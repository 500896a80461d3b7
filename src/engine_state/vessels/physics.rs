//! # Force Collaborator
//!
//! The vessel core does not solve rigid-body dynamics. Each vessel owns a
//! `PhysicsProcessor` that turns the forces of its voxels' `ForceProvider`s
//! into a new pose every tick, and that carries its own opaque state through
//! persistence.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::*;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::engine_state::voxels::{attachment::ForceProvider, block::Block, VoxelPos};

use super::transform::{CoordinateSpace, CoordinateTransform, VesselPose};

/// Read-only view of the vessel handed to the processor each tick.
pub struct PhysicsContext<'a> {
    /// Step length in seconds
    pub seconds: f64,
    /// Total mass of the vessel's voxels
    pub mass: f64,
    /// Centre of mass, local space
    pub center_of_mass: Point3<f64>,
    /// Transform at the start of the tick
    pub transform: &'a CoordinateTransform,
    /// Force providers by local position
    pub force_providers: &'a HashMap<VoxelPos, Arc<dyn ForceProvider>>,
}

/// The pluggable force/interaction collaborator of one vessel.
pub trait PhysicsProcessor: Send {
    /// Advances `pose` by one step.
    fn integrate(&mut self, pose: &mut VesselPose, context: &PhysicsContext<'_>);

    /// Told about every voxel change inside the vessel's claim.
    fn on_voxel_changed(&mut self, _pos: VoxelPos, _old: Block, _new: Block) {}

    /// Told after each transform update, to carry riders along.
    fn move_passengers(&mut self, _previous: &CoordinateTransform, _current: &CoordinateTransform) {}

    /// Opaque state written into the vessel record.
    fn save_state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Restores state written by `save_state`.
    fn load_state(&mut self, _state: &serde_json::Value) {}
}

/// A processor that never moves the vessel.
#[derive(Debug, Default)]
pub struct NullProcessor;

impl PhysicsProcessor for NullProcessor {
    fn integrate(&mut self, _pose: &mut VesselPose, _context: &PhysicsContext<'_>) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct LinearState {
    velocity: [f64; 3],
}

/// Sums provider forces and integrates them into a linear velocity.
/// Rotation is left alone.
#[derive(Debug)]
pub struct LinearIntegrator {
    velocity: Vector3<f64>,
}

impl Default for LinearIntegrator {
    fn default() -> Self {
        LinearIntegrator {
            velocity: Vector3::zero(),
        }
    }
}

impl LinearIntegrator {
    /// Current velocity, global space.
    pub fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }
}

impl PhysicsProcessor for LinearIntegrator {
    fn integrate(&mut self, pose: &mut VesselPose, context: &PhysicsContext<'_>) {
        if context.mass <= 0.0 {
            return;
        }
        let mut force = Vector3::zero();
        for (pos, provider) in context.force_providers {
            let applied = provider.force_at(*pos, context.seconds);
            force += if provider.is_force_local() {
                context
                    .transform
                    .rotate_vector(applied, CoordinateSpace::LocalToGlobal)
            } else {
                applied
            };
        }
        self.velocity += force / context.mass * context.seconds;
        pose.position += self.velocity * context.seconds;
    }

    fn save_state(&self) -> serde_json::Value {
        let state = LinearState {
            velocity: self.velocity.into(),
        };
        serde_json::to_value(state).unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: &serde_json::Value) {
        if state.is_null() {
            return;
        }
        match serde_json::from_value::<LinearState>(state.clone()) {
            Ok(state) => self.velocity = state.velocity.into(),
            Err(error) => warn!("Ignoring unreadable physics state: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thruster(Vector3<f64>);

    impl ForceProvider for Thruster {
        fn force_at(&self, _pos: VoxelPos, _seconds: f64) -> Vector3<f64> {
            self.0
        }
    }

    #[test]
    fn local_force_is_rotated_into_world_space() {
        let mut pose = VesselPose::at(Point3::origin());
        pose.yaw = 90.0;
        let transform = CoordinateTransform::from_pose(pose, Point3::origin()).unwrap();
        let mut providers: HashMap<VoxelPos, Arc<dyn ForceProvider>> = HashMap::new();
        providers.insert(Point3::new(0, 0, 0), Arc::new(Thruster(Vector3::new(2.0, 0.0, 0.0))));

        let mut integrator = LinearIntegrator::default();
        let context = PhysicsContext {
            seconds: 1.0,
            mass: 2.0,
            center_of_mass: Point3::origin(),
            transform: &transform,
            force_providers: &providers,
        };
        integrator.integrate(&mut pose, &context);
        assert!((integrator.velocity() - Vector3::new(0.0, 0.0, -1.0)).magnitude() < 1e-12);
        assert!((pose.position.z + 1.0).abs() < 1e-12);
    }

    #[test]
    fn new_integrator_starts_at_rest() {
        let integrator = LinearIntegrator::default();
        assert_eq!(integrator.velocity(), Vector3::zero());
        assert_eq!(integrator.save_state(), serde_json::json!({"velocity": [0.0, 0.0, 0.0]}));
    }

    #[test]
    fn state_survives_save_and_load() {
        let mut integrator = LinearIntegrator {
            velocity: Vector3::new(1.0, -2.0, 0.5),
        };
        let saved = integrator.save_state();
        let mut restored = LinearIntegrator::default();
        restored.load_state(&saved);
        assert_eq!(restored.velocity(), integrator.velocity());

        integrator.load_state(&serde_json::json!({"nonsense": true}));
        assert_eq!(integrator.velocity(), Vector3::new(1.0, -2.0, 0.5));
    }
}
