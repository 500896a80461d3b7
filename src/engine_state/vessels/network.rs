//! # Observer Messages
//!
//! What the authoritative side sends to the observers (watchers) of a vessel:
//!
//! - a `SpawnPayload` once, when a watcher starts tracking the vessel
//! - the data of every cell in the vessel's claim, then an unload for every
//!   cell when tracking stops or the vessel is destroyed
//! - a `TransformMessage` every tick
//!
//! Transport is someone else's job; the `Watcher` trait is the seam.
//! Binary payloads are big-endian.

use cgmath::Point3;

use crate::core::error::PayloadError;
use crate::engine_state::voxels::{CellPos, VoxelPos};

use super::transform::VesselPose;

/// Identifies a vessel within one world.
pub type VesselId = u64;

/// Identifies an observer.
pub type WatcherId = u64;

/// An observer of vessels, notified on the tick thread.
pub trait Watcher {
    /// Stable identity of this observer.
    fn id(&self) -> WatcherId;

    /// The vessel became visible; `payload` is an encoded `SpawnPayload`.
    fn spawn(&self, vessel: VesselId, payload: &[u8]);

    /// Raw block data of one claimed cell.
    fn load_cell(&self, cell: CellPos, data: &[u8]);

    /// A claimed cell is gone.
    fn unload_cell(&self, cell: CellPos);

    /// Per-tick transform broadcast.
    fn transform(&self, message: &TransformMessage);
}

/// Whoever asked for an assembly. Receives human-readable notices.
pub trait Requester {
    /// Shows `message` to the requester.
    fn notify(&self, message: &str);
}

/// Everything an observer needs to start replicating a vessel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnPayload {
    /// Claim centre cell x
    pub claim_center_x: i32,
    /// Claim centre cell z
    pub claim_center_z: i32,
    /// Claim radius in cells
    pub claim_radius: i32,
    /// Pose at spawn time
    pub pose: VesselPose,
    /// Centre of mass, local space
    pub center_of_mass: Point3<f64>,
    /// Anchor voxel, local space
    pub anchor: Option<VoxelPos>,
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], PayloadError> {
        if self.data.len() < N {
            return Err(PayloadError::Truncated {
                needed: N,
                remaining: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(N);
        self.data = tail;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(head);
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, PayloadError> {
        Ok(self.take::<1>()?[0])
    }

    fn i32(&mut self) -> Result<i32, PayloadError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64, PayloadError> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    fn f64(&mut self) -> Result<f64, PayloadError> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    fn point(&mut self) -> Result<Point3<f64>, PayloadError> {
        Ok(Point3::new(self.f64()?, self.f64()?, self.f64()?))
    }

    fn pose(&mut self) -> Result<VesselPose, PayloadError> {
        Ok(VesselPose {
            position: self.point()?,
            pitch: self.f64()?,
            yaw: self.f64()?,
            roll: self.f64()?,
        })
    }
}

fn put_point(out: &mut Vec<u8>, point: Point3<f64>) {
    out.extend_from_slice(&point.x.to_be_bytes());
    out.extend_from_slice(&point.y.to_be_bytes());
    out.extend_from_slice(&point.z.to_be_bytes());
}

fn put_pose(out: &mut Vec<u8>, pose: &VesselPose) {
    put_point(out, pose.position);
    out.extend_from_slice(&pose.pitch.to_be_bytes());
    out.extend_from_slice(&pose.yaw.to_be_bytes());
    out.extend_from_slice(&pose.roll.to_be_bytes());
}

impl SpawnPayload {
    /// Serialises the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + 48 + 24 + 13);
        out.extend_from_slice(&self.claim_center_x.to_be_bytes());
        out.extend_from_slice(&self.claim_center_z.to_be_bytes());
        out.extend_from_slice(&self.claim_radius.to_be_bytes());
        put_pose(&mut out, &self.pose);
        put_point(&mut out, self.center_of_mass);
        match self.anchor {
            Some(anchor) => {
                out.push(1);
                out.extend_from_slice(&anchor.x.to_be_bytes());
                out.extend_from_slice(&anchor.y.to_be_bytes());
                out.extend_from_slice(&anchor.z.to_be_bytes());
            }
            None => out.push(0),
        }
        out
    }

    /// Parses a payload produced by `encode`.
    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = Reader { data };
        let claim_center_x = reader.i32()?;
        let claim_center_z = reader.i32()?;
        let claim_radius = reader.i32()?;
        let pose = reader.pose()?;
        let center_of_mass = reader.point()?;
        let anchor = match reader.u8()? {
            0 => None,
            _ => Some(Point3::new(reader.i32()?, reader.i32()?, reader.i32()?)),
        };
        Ok(SpawnPayload {
            claim_center_x,
            claim_center_z,
            claim_radius,
            pose,
            center_of_mass,
            anchor,
        })
    }
}

/// Per-tick transform broadcast.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformMessage {
    /// Which vessel moved
    pub vessel: VesselId,
    /// Authoritative tick the pose belongs to
    pub tick: u64,
    /// New pose
    pub pose: VesselPose,
    /// Pivot the pose rotates about
    pub center_of_mass: Point3<f64>,
}

impl TransformMessage {
    /// Serialises the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 48 + 24);
        out.extend_from_slice(&self.vessel.to_be_bytes());
        out.extend_from_slice(&self.tick.to_be_bytes());
        put_pose(&mut out, &self.pose);
        put_point(&mut out, self.center_of_mass);
        out
    }

    /// Parses a message produced by `encode`.
    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = Reader { data };
        Ok(TransformMessage {
            vessel: reader.u64()?,
            tick: reader.u64()?,
            pose: reader.pose()?,
            center_of_mass: reader.point()?,
        })
    }
}
