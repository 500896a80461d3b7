//! Saved form of a vessel.
//!
//! The voxels themselves live in the world (inside the claim), so a record
//! only carries what cannot be recomputed from them: where the claim is, how
//! the vessel is posed, and the processor's own state.

use cgmath::Point3;
use serde::{Deserialize, Serialize};

use crate::core::error::PersistenceError;
use crate::engine_state::voxels::VoxelPos;

use super::claim::RegionClaim;
use super::transform::VesselPose;
use super::transform_manager::BoundingVolume;
use super::vessel::Vessel;

/// Pose as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    /// World position of the pivot
    pub position: [f64; 3],
    /// Degrees about x
    pub pitch: f64,
    /// Degrees about y
    pub yaw: f64,
    /// Degrees about z
    pub roll: f64,
}

impl From<&VesselPose> for PoseRecord {
    fn from(pose: &VesselPose) -> Self {
        PoseRecord {
            position: [pose.position.x, pose.position.y, pose.position.z],
            pitch: pose.pitch,
            yaw: pose.yaw,
            roll: pose.roll,
        }
    }
}

impl From<&PoseRecord> for VesselPose {
    fn from(record: &PoseRecord) -> Self {
        VesselPose {
            position: Point3::from(record.position),
            pitch: record.pitch,
            yaw: record.yaw,
            roll: record.roll,
        }
    }
}

/// Everything needed to bring an unloaded vessel back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VesselRecord {
    /// Display name
    pub name: String,
    /// Claim bounds in cells: min x, max x, min z, max z
    pub claim: [i32; 4],
    /// Centre of mass in local space
    pub center: [f64; 3],
    /// Pose at save time
    pub transform: PoseRecord,
    /// Whether physics was running
    pub physics_enabled: bool,
    /// Bounding volume: min xyz then max xyz
    pub bounding_volume: [f64; 6],
    /// Anchor voxel, local space
    #[serde(default)]
    pub anchor: Option<[i32; 3]>,
    /// Opaque processor state
    #[serde(default)]
    pub physics: serde_json::Value,
}

impl VesselRecord {
    /// Captures the persistent state of `vessel`.
    pub fn capture(vessel: &Vessel) -> Self {
        let claim = vessel.claim();
        let center = vessel.center_of_mass();
        VesselRecord {
            name: vessel.name().to_string(),
            claim: [claim.min_x(), claim.max_x(), claim.min_z(), claim.max_z()],
            center: [center.x, center.y, center.z],
            transform: PoseRecord::from(vessel.pose()),
            physics_enabled: vessel.is_enabled(),
            bounding_volume: vessel.bounding_volume().to_array(),
            anchor: vessel.anchor().map(|pos| [pos.x, pos.y, pos.z]),
            physics: vessel.processor().save_state(),
        }
    }

    /// The recorded claim, validated.
    pub fn region_claim(&self) -> Result<RegionClaim, PersistenceError> {
        let [min_x, max_x, min_z, max_z] = self.claim;
        Ok(RegionClaim::from_bounds(min_x, max_x, min_z, max_z)?)
    }

    /// The recorded pose.
    pub fn pose(&self) -> VesselPose {
        VesselPose::from(&self.transform)
    }

    /// The recorded centre of mass.
    pub fn center_of_mass(&self) -> Point3<f64> {
        Point3::from(self.center)
    }

    /// The recorded anchor.
    pub fn anchor_voxel(&self) -> Option<VoxelPos> {
        self.anchor.map(Point3::from)
    }

    /// The recorded bounds.
    pub fn bounds(&self) -> BoundingVolume {
        BoundingVolume::from_array(self.bounding_volume)
    }

    /// Checks that the numbers in the record can describe a vessel.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if !self.pose().is_finite() {
            return Err(PersistenceError::InvalidRecord("non-finite pose".into()));
        }
        if self.center.iter().chain(self.bounding_volume.iter()).any(|v| !v.is_finite()) {
            return Err(PersistenceError::InvalidRecord("non-finite centre or bounds".into()));
        }
        let claim = self.region_claim()?;
        if let Some(anchor) = self.anchor_voxel() {
            if !claim.contains_voxel(anchor) {
                return Err(PersistenceError::InvalidRecord(format!(
                    "anchor {:?} lies outside the claim",
                    anchor
                )));
            }
        }
        Ok(())
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a record.
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let record: VesselRecord = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VesselRecord {
        VesselRecord {
            name: "skiff".into(),
            claim: [19_999, 20_001, 19_999, 20_001],
            center: [320_008.25, 128.5, 320_007.5],
            transform: PoseRecord {
                position: [10.5, 70.0, -4.25],
                pitch: 0.0,
                yaw: 12.5,
                roll: 0.0,
            },
            physics_enabled: true,
            bounding_volume: [8.0, 68.0, -6.0, 13.0, 72.0, -2.0],
            anchor: Some([320_007, 128, 320_007]),
            physics: serde_json::json!({"velocity": [0.0, 1.0, 0.0]}),
        }
    }

    #[test]
    fn json_keeps_every_field() {
        let original = record();
        let parsed = VesselRecord::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.region_claim().unwrap(), RegionClaim::new(20_000, 20_000, 1));
    }

    #[test]
    fn anchor_outside_the_claim_is_rejected() {
        let mut bad = record();
        bad.anchor = Some([0, 0, 0]);
        let json = serde_json::to_string(&bad).unwrap();
        assert!(matches!(
            VesselRecord::from_json(&json),
            Err(PersistenceError::InvalidRecord(_))
        ));
    }

    #[test]
    fn lopsided_claim_is_rejected() {
        let mut bad = record();
        bad.claim = [0, 3, 0, 2];
        assert!(matches!(bad.validate(), Err(PersistenceError::Claim(_))));
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "name": "bare",
            "claim": [0, 0, 0, 0],
            "center": [7.5, 128.5, 7.5],
            "transform": {"position": [0.0, 64.0, 0.0], "pitch": 0.0, "yaw": 0.0, "roll": 0.0},
            "physics_enabled": false,
            "bounding_volume": [0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        }"#;
        let parsed = VesselRecord::from_json(json).unwrap();
        assert_eq!(parsed.anchor, None);
        assert!(parsed.physics.is_null());
    }
}
