//! # Voxel Task System
//!
//! Work over the voxel world that is safe to run on a worker thread. Tasks in
//! this module only take the world's read lock.

pub mod detection_task;
