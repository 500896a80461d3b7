//! # Error Types
//!
//! Every fallible operation in the crate reports through one of these enums.
//! They are grouped by the subsystem that raises them; `AssemblyError` is the
//! one surfaced to whoever asked for a vessel to be built.

use thiserror::Error;

use crate::engine_state::voxels::VoxelPos;

/// Why an assembly request did not produce a vessel.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Assembly was requested somewhere that may not mutate the world.
    #[error("assembly can only be invoked on the authoritative side")]
    IllegalInvocation,

    /// The request was valid but could not be honoured. The world is untouched.
    #[error("assembly rejected: {0}")]
    Rejected(#[from] RejectionReason),
}

/// The recoverable failure paths of assembly.
#[derive(Error, Debug)]
pub enum RejectionReason {
    /// The connected cluster is larger than the configured limit.
    #[error("cluster has at least {found} voxels, the limit is {max}")]
    Oversize {
        /// Voxels found before detection stopped growing
        found: usize,
        /// Configured maximum vessel size
        max: usize,
    },

    /// The cluster touches a voxel that may never be moved.
    #[error("cluster is attached to an unbreakable voxel")]
    Unbreakable,

    /// The seed position holds nothing to assemble.
    #[error("seed {seed:?} is empty")]
    EmptySeed {
        /// Requested seed
        seed: VoxelPos,
    },

    /// No disjoint claim region is left.
    #[error("no free claim region: {0}")]
    ClaimExhaustion(#[source] ClaimError),

    /// Copying the cluster into its claim failed; the copy was rolled back.
    #[error("voxel transfer failed and was rolled back: {0}")]
    CopyFailed(#[source] WorldError),

    /// The vessel's first transform could not be built. The cluster was put back.
    #[error("vessel transform could not be built: {0}")]
    Transform(#[source] TransformError),

    /// The off-thread detection stage failed.
    #[error("detection failed: {0}")]
    DetectionFailed(#[source] TaskError),

    /// The request was dropped before it completed.
    #[error("assembly was cancelled")]
    Cancelled,
}

/// Claim allocation and validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// Every allocator slot is taken.
    #[error("all {max_claims} claim slots are in use")]
    Exhausted {
        /// Allocator capacity
        max_claims: usize,
    },

    /// The claim intersects a claim that is already live.
    #[error("claim [{min_x}..={max_x}] x [{min_z}..={max_z}] overlaps a live claim")]
    Overlap {
        /// Minimum cell x
        min_x: i32,
        /// Maximum cell x
        max_x: i32,
        /// Minimum cell z
        min_z: i32,
        /// Maximum cell z
        max_z: i32,
    },

    /// Bounds that cannot describe a square claim.
    #[error("invalid claim bounds: {0}")]
    InvalidBounds(String),
}

/// Voxel world access failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The position lies outside the world's vertical range.
    #[error("position {pos:?} is outside the world")]
    OutOfBounds {
        /// Offending position
        pos: VoxelPos,
    },

    /// A write meant for a claim would land outside it.
    #[error("position {pos:?} is outside the target claim")]
    OutsideClaim {
        /// Offending position
        pos: VoxelPos,
    },
}

/// A per-voxel attachment failed to detach cleanly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    /// Teardown failed; the owner logs this and carries on.
    #[error("attachment '{kind}' failed to detach: {reason}")]
    Teardown {
        /// Attachment kind
        kind: String,
        /// What went wrong
        reason: String,
    },
}

/// Failures of off-thread work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task reported an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task panicked on its worker.
    #[error("task panicked on its worker thread")]
    Panicked,

    /// The worker pool went away before the task finished.
    #[error("worker pool disconnected")]
    Disconnected,
}

/// A transform could not be recomputed. Indicates a broken invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// An input or output of the transform pipeline is NaN or infinite.
    #[error("non-finite {what} in transform update")]
    NonFinite {
        /// Which quantity was not finite
        what: &'static str,
    },
}

/// Saving or restoring a vessel record failed.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The record is not valid JSON for the expected layout.
    #[error("malformed vessel record: {0}")]
    Json(#[from] serde_json::Error),

    /// The recorded claim cannot be reserved.
    #[error("recorded claim unavailable: {0}")]
    Claim(#[from] ClaimError),

    /// The record decoded but is inconsistent.
    #[error("invalid vessel record: {0}")]
    InvalidRecord(String),
}

/// A binary payload ended early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Not enough bytes remained to decode the next field.
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the next field
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid configuration JSON.
    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is outside its accepted range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Query command parsing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command name is not known.
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    /// A required argument is missing.
    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),
}
