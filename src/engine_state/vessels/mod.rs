//! # Vessels Module
//!
//! Movable voxel clusters. A vessel's voxels are stored on the regular grid
//! inside a reserved region of cells (its claim) and drawn somewhere else in
//! the world through a rigid transform.
//!
//! ## Key Components
//!
//! - **Transform**: `CoordinateTransform`, the local/global mapping of a pose
//! - **Claim**: `RegionClaim` and the allocator that hands claims out
//! - **Transform Manager**: previous/current/render transforms, bounds, normals
//! - **Vessel**: the aggregate that owns all of the above for one vessel
//! - **Assembly**: moving voxels into and out of a claim
//! - **Network / Observer**: what observers receive and how they replay it

pub mod assembly;
pub mod claim;
pub mod network;
pub mod observer;
pub mod persistence;
pub mod physics;
pub mod transform;
pub mod transform_manager;
pub mod vessel;
pub mod voxel_index;
