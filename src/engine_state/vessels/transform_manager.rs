//! # Transform Manager
//!
//! Owns the current, previous and render transforms of one vessel, and the
//! collision data derived from them every tick:
//!
//! - the global-space bounding volume of the vessel's voxels
//! - 15 candidate separating-axis normals (3 world axes, 3 rotated local axes,
//!   and the 9 cross products between them)
//!
//! Transforms are published as `Arc<CoordinateTransform>`; a reader clones the
//! `Arc` and keeps a consistent transform no matter what the tick does next.

use std::sync::Arc;

use cgmath::*;
use log::debug;
use rayon::prelude::*;

use crate::core::error::TransformError;
use crate::engine_state::voxels::{world::WorldBorder, VoxelPos};

use super::transform::{CoordinateSpace, CoordinateTransform, VesselPose};

/// Replacement for a cross product of (near-)parallel axes.
pub const DEFAULT_NORMAL: Vector3<f64> = Vector3::new(0.0, 1.0, 0.0);

/// Cross products shorter than this count as zero.
const DEGENERATE_NORMAL_LENGTH: f64 = 1e-3;

/// Number of separating-axis normals.
pub const NORMAL_COUNT: usize = 15;

/// An axis-aligned box in global space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingVolume {
    /// Smallest corner
    pub min: Point3<f64>,
    /// Largest corner
    pub max: Point3<f64>,
}

impl BoundingVolume {
    /// A box with no extent at `point`.
    pub fn at(point: Point3<f64>) -> Self {
        BoundingVolume {
            min: point,
            max: point,
        }
    }

    /// The reduction identity: grows to any point merged into it.
    fn inverted() -> Self {
        BoundingVolume {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    fn include(mut self, point: Point3<f64>) -> Self {
        self.min = Point3::new(self.min.x.min(point.x), self.min.y.min(point.y), self.min.z.min(point.z));
        self.max = Point3::new(self.max.x.max(point.x), self.max.y.max(point.y), self.max.z.max(point.z));
        self
    }

    fn merge(self, other: BoundingVolume) -> Self {
        self.include(other.min).include(other.max)
    }

    /// The box grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        let grow = Vector3::new(margin, margin, margin);
        BoundingVolume {
            min: self.min - grow,
            max: self.max + grow,
        }
    }

    /// The box moved by `offset`.
    pub fn translated(&self, offset: Vector3<f64>) -> Self {
        BoundingVolume {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Returns true if `point` lies inside or on the box.
    pub fn contains(&self, point: Point3<f64>) -> bool {
        (self.min.x..=self.max.x).contains(&point.x)
            && (self.min.y..=self.max.y).contains(&point.y)
            && (self.min.z..=self.max.z).contains(&point.z)
    }

    /// The six bounds as `[min_x, min_y, min_z, max_x, max_y, max_z]`.
    pub fn to_array(&self) -> [f64; 6] {
        [self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z]
    }

    /// Inverse of `to_array`.
    pub fn from_array(bounds: [f64; 6]) -> Self {
        BoundingVolume {
            min: Point3::new(bounds[0], bounds[1], bounds[2]),
            max: Point3::new(bounds[3], bounds[4], bounds[5]),
        }
    }
}

/// The global bounding volume of `voxels` under `transform`, grown by `margin`.
///
/// Voxel centres are transformed, so a single voxel at the origin spans
/// `[0.5 - margin, 0.5 + margin]` under the identity. Above `parallel_threshold`
/// voxels the reduction runs on the rayon pool; min/max is exact, so the
/// result does not depend on iteration order or on which path ran.
pub fn bounding_volume_of(
    voxels: &[VoxelPos],
    transform: &CoordinateTransform,
    margin: f64,
    parallel_threshold: usize,
) -> Option<BoundingVolume> {
    if voxels.is_empty() {
        return None;
    }

    let to_global = |pos: &VoxelPos| {
        transform.transform_point(
            Point3::new(pos.x as f64 + 0.5, pos.y as f64 + 0.5, pos.z as f64 + 0.5),
            CoordinateSpace::LocalToGlobal,
        )
    };

    let bounds = if voxels.len() > parallel_threshold {
        voxels
            .par_iter()
            .map(to_global)
            .fold(BoundingVolume::inverted, BoundingVolume::include)
            .reduce(BoundingVolume::inverted, BoundingVolume::merge)
    } else {
        voxels
            .iter()
            .map(to_global)
            .fold(BoundingVolume::inverted(), BoundingVolume::include)
    };

    Some(bounds.expanded(margin))
}

/// Owns a vessel's transforms and derived collision data.
pub struct TransformManager {
    current: Arc<CoordinateTransform>,
    previous: Arc<CoordinateTransform>,
    render: Arc<CoordinateTransform>,
    normals: [Vector3<f64>; NORMAL_COUNT],
    bounding_volume: BoundingVolume,
    margin: f64,
    parallel_threshold: usize,
}

impl TransformManager {
    /// Starts with `initial` as current, previous and render transform.
    pub fn new(initial: CoordinateTransform, margin: f64, parallel_threshold: usize) -> Self {
        let initial = Arc::new(initial);
        let mut manager = TransformManager {
            current: initial.clone(),
            previous: initial.clone(),
            render: initial,
            normals: [DEFAULT_NORMAL; NORMAL_COUNT],
            bounding_volume: BoundingVolume::at(Point3::origin()),
            margin,
            parallel_threshold,
        };
        manager.update_normals();
        manager
    }

    /// Current transform.
    pub fn current(&self) -> Arc<CoordinateTransform> {
        self.current.clone()
    }

    /// Transform as of the start of this tick.
    pub fn previous(&self) -> Arc<CoordinateTransform> {
        self.previous.clone()
    }

    /// Transform to draw with.
    pub fn render(&self) -> Arc<CoordinateTransform> {
        self.render.clone()
    }

    /// The separating-axis normals.
    pub fn normals(&self) -> &[Vector3<f64>; NORMAL_COUNT] {
        &self.normals
    }

    /// Current global bounding volume.
    pub fn bounding_volume(&self) -> &BoundingVolume {
        &self.bounding_volume
    }

    /// Overrides the bounding volume, as when restoring a saved vessel.
    pub fn set_bounding_volume(&mut self, bounding_volume: BoundingVolume) {
        self.bounding_volume = bounding_volume;
    }

    /// Remembers the current transform as previous. Call once at the start of a tick.
    pub fn update_prev(&mut self) {
        self.previous = self.current.clone();
    }

    /// Per-tick recompute.
    ///
    /// Clamps `pose` (translation only) so the bounding volume stays inside
    /// `border`, rebuilds the current transform from `pose` about `pivot`,
    /// optionally recomputes the bounding volume from `voxels`, and rebuilds
    /// the normals. On error no transform is published.
    pub fn update_all(
        &mut self,
        pose: &mut VesselPose,
        pivot: Point3<f64>,
        voxels: &[VoxelPos],
        border: &WorldBorder,
        update_bounding_volume: bool,
    ) -> Result<(), TransformError> {
        let shift = self.border_shift(border);
        pose.position += shift;

        let current = CoordinateTransform::from_pose(*pose, pivot)?;

        let bounding_volume = if update_bounding_volume {
            bounding_volume_of(voxels, &current, self.margin, self.parallel_threshold)
                .unwrap_or_else(|| BoundingVolume::at(pose.position))
        } else {
            self.bounding_volume.translated(shift)
        };
        if !bounding_volume.to_array().iter().all(|value| value.is_finite()) {
            return Err(TransformError::NonFinite {
                what: "bounding volume",
            });
        }

        if shift != Vector3::zero() {
            debug!("Clamped vessel inside the world border by {:?}", shift);
        }
        self.current = Arc::new(current);
        self.bounding_volume = bounding_volume;
        self.update_normals();
        Ok(())
    }

    fn border_shift(&self, border: &WorldBorder) -> Vector3<f64> {
        let clamp_axis = |min: f64, max: f64, low: f64, high: f64| {
            if max > high {
                high - max
            } else if min < low {
                low - min
            } else {
                0.0
            }
        };
        let bounds = &self.bounding_volume;
        Vector3::new(
            clamp_axis(bounds.min.x, bounds.max.x, border.min_x, border.max_x),
            0.0,
            clamp_axis(bounds.min.z, bounds.max.z, border.min_z, border.max_z),
        )
    }

    fn update_normals(&mut self) {
        let world_axes = [Vector3::unit_x(), Vector3::unit_y(), Vector3::unit_z()];
        let rotated = world_axes.map(|axis| {
            self.current
                .rotate_vector(axis, CoordinateSpace::LocalToGlobal)
                .normalize()
        });

        self.normals[..3].copy_from_slice(&world_axes);
        self.normals[3..6].copy_from_slice(&rotated);
        let mut next = 6;
        for world_axis in &world_axes {
            for local_axis in &rotated {
                let cross = world_axis.cross(*local_axis);
                self.normals[next] = if cross.magnitude() < DEGENERATE_NORMAL_LENGTH {
                    DEFAULT_NORMAL
                } else {
                    cross.normalize()
                };
                next += 1;
            }
        }
        self.normals[..3].copy_from_slice(&world_axes);
    }

    /// Publishes a render transform blended `alpha` of the way from previous
    /// to current.
    pub fn update_render(&mut self, alpha: f64) -> Result<(), TransformError> {
        let pose = self.previous.pose().lerp(self.current.pose(), alpha);
        self.render = Arc::new(CoordinateTransform::from_pose(pose, self.current.pivot())?);
        Ok(())
    }

    /// Publishes `transform` as the render transform unchanged.
    pub fn set_render(&mut self, transform: Arc<CoordinateTransform>) {
        self.render = transform;
    }
}
