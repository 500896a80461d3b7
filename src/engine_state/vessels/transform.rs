//! # Coordinate Transform
//!
//! This module contains the rigid transform between a vessel's local voxel
//! grid (its claim) and global world space.
//!
//! ## Key Components
//! - `VesselPose`: position and Euler orientation, the input to every update
//! - `CoordinateTransform`: immutable forward and inverse matrices built from a
//!   pose and a pivot
//! - `CoordinateSpace`: which direction a conversion goes
//!
//! ## Conventions
//! Angles are degrees. The rotation is applied as pitch (about x), then yaw
//! (about y), then roll (about z) in matrix order, about the pivot:
//!
//! `local_to_global = T(position) * Rx(pitch) * Ry(yaw) * Rz(roll) * T(-pivot)`
//!
//! A `CoordinateTransform` is never mutated. Updating a vessel publishes a new
//! one behind an `Arc`, so readers on other threads need no lock.

use cgmath::*;

use crate::core::error::TransformError;

/// Position plus Euler orientation of a vessel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VesselPose {
    /// Where the pivot ends up in global space
    pub position: Point3<f64>,
    /// Rotation about x, degrees
    pub pitch: f64,
    /// Rotation about y, degrees
    pub yaw: f64,
    /// Rotation about z, degrees
    pub roll: f64,
}

impl VesselPose {
    /// An unrotated pose at `position`.
    pub fn at(position: Point3<f64>) -> Self {
        VesselPose {
            position,
            pitch: 0.0,
            yaw: 0.0,
            roll: 0.0,
        }
    }

    /// Returns true if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.position.x.is_finite()
            && self.position.y.is_finite()
            && self.position.z.is_finite()
            && self.pitch.is_finite()
            && self.yaw.is_finite()
            && self.roll.is_finite()
    }

    /// Orientation as a unit quaternion.
    pub fn rotation(&self) -> Quaternion<f64> {
        Quaternion::from_angle_x(Deg(self.pitch))
            * Quaternion::from_angle_y(Deg(self.yaw))
            * Quaternion::from_angle_z(Deg(self.roll))
    }

    /// Blends `t` of the way towards `target`. Angles take the shorter way
    /// round, so 350° to 10° passes through 0°.
    pub fn lerp(&self, target: &VesselPose, t: f64) -> VesselPose {
        let angle = |from: f64, to: f64| from + ((to - from + 180.0).rem_euclid(360.0) - 180.0) * t;
        VesselPose {
            position: self.position + (target.position - self.position) * t,
            pitch: angle(self.pitch, target.pitch),
            yaw: angle(self.yaw, target.yaw),
            roll: angle(self.roll, target.roll),
        }
    }
}

/// Direction of a conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinateSpace {
    /// Vessel grid to world.
    LocalToGlobal,
    /// World to vessel grid.
    GlobalToLocal,
}

/// An immutable rigid transform and its inverse.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinateTransform {
    local_to_global: Matrix4<f64>,
    global_to_local: Matrix4<f64>,
    rotation: Quaternion<f64>,
    pose: VesselPose,
    pivot: Point3<f64>,
}

impl CoordinateTransform {
    /// Builds the transform for `pose`, rotating about `pivot` (in local space).
    pub fn from_pose(pose: VesselPose, pivot: Point3<f64>) -> Result<Self, TransformError> {
        if !pose.is_finite() {
            return Err(TransformError::NonFinite { what: "pose" });
        }
        if !(pivot.x.is_finite() && pivot.y.is_finite() && pivot.z.is_finite()) {
            return Err(TransformError::NonFinite { what: "pivot" });
        }

        let rotation = pose.rotation();
        let local_to_global = Matrix4::from_translation(pose.position.to_vec())
            * Matrix4::from(rotation)
            * Matrix4::from_translation(-pivot.to_vec());
        let global_to_local = Matrix4::from_translation(pivot.to_vec())
            * Matrix4::from(rotation.conjugate())
            * Matrix4::from_translation(-pose.position.to_vec());

        Ok(CoordinateTransform {
            local_to_global,
            global_to_local,
            rotation,
            pose,
            pivot,
        })
    }

    /// The identity transform: local and global coincide.
    pub fn identity() -> Self {
        CoordinateTransform {
            local_to_global: Matrix4::identity(),
            global_to_local: Matrix4::identity(),
            rotation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
            pose: VesselPose::at(Point3::origin()),
            pivot: Point3::origin(),
        }
    }

    fn matrix(&self, space: CoordinateSpace) -> &Matrix4<f64> {
        match space {
            CoordinateSpace::LocalToGlobal => &self.local_to_global,
            CoordinateSpace::GlobalToLocal => &self.global_to_local,
        }
    }

    /// Converts a point.
    pub fn transform_point(&self, point: Point3<f64>, space: CoordinateSpace) -> Point3<f64> {
        self.matrix(space).transform_point(point)
    }

    /// Converts a direction. Translation is ignored.
    pub fn rotate_vector(&self, vector: Vector3<f64>, space: CoordinateSpace) -> Vector3<f64> {
        self.matrix(space).transform_vector(vector)
    }

    /// The local-to-global matrix.
    pub fn local_to_global(&self) -> &Matrix4<f64> {
        &self.local_to_global
    }

    /// The global-to-local matrix.
    pub fn global_to_local(&self) -> &Matrix4<f64> {
        &self.global_to_local
    }

    /// Orientation quaternion.
    pub fn rotation(&self) -> Quaternion<f64> {
        self.rotation
    }

    /// The pose this transform was built from.
    pub fn pose(&self) -> &VesselPose {
        &self.pose
    }

    /// The rotation pivot, in local space.
    pub fn pivot(&self) -> Point3<f64> {
        self.pivot
    }

    /// Angular distance of the orientation from the grid-aligned identity, in
    /// degrees. Uses `2 * atan2(|v|, |w|)`, so `q` and `-q` agree.
    pub fn angle_from_grid_degrees(&self) -> f64 {
        let angle: Rad<f64> = Rad(2.0 * self.rotation.v.magnitude().atan2(self.rotation.s.abs()));
        Deg::from(angle).0
    }
}
