//! # Attachments and Capabilities
//!
//! An attachment is the per-voxel payload that can sit on top of a block
//! (machinery state, inventories, the vessel's control core). Attachments opt
//! into capabilities by returning handles from the `Attachment` accessors; the
//! vessel records those handles by position when the attachment is placed, so
//! nothing ever has to ask "what type is this payload" at lookup time.

use std::sync::{Arc, PoisonError, RwLock};

use cgmath::Vector3;

use crate::core::error::AttachmentError;

use super::VoxelPos;

/// A payload bound to a single voxel position.
pub trait Attachment: Send + Sync {
    /// Short name of the payload kind, used in logs.
    fn kind(&self) -> &str;

    /// Produces a copy of this payload for `to`. Used when voxels are moved
    /// into or out of a vessel's claim; the original is detached afterwards.
    fn relocated(&self, to: VoxelPos) -> Box<dyn Attachment>;

    /// Tears the payload down before its voxel is cleared.
    fn detach(&mut self) -> Result<(), AttachmentError> {
        Ok(())
    }

    /// Force capability, if this payload pushes on the vessel.
    fn force_provider(&self) -> Option<Arc<dyn ForceProvider>> {
        None
    }

    /// Node capability, if this payload takes part in a control network.
    fn node_controller(&self) -> Option<Arc<dyn NodeController>> {
        None
    }

    /// Control requests, if this payload can act as a vessel's anchor.
    fn control_state(&self) -> Option<ControlState> {
        None
    }
}

/// Something that applies a force to the vessel it is part of.
pub trait ForceProvider: Send + Sync {
    /// Force to apply this step, for a provider located at `pos`.
    fn force_at(&self, pos: VoxelPos, seconds: f64) -> Vector3<f64>;

    /// True if the force is expressed in the vessel's local space.
    fn is_force_local(&self) -> bool {
        true
    }
}

/// A node in a vessel's control network.
pub trait NodeController: Send + Sync {
    /// Where the node lives.
    fn node_pos(&self) -> VoxelPos;
}

/// What the anchor of a vessel is currently asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlState {
    /// False once the anchor can no longer keep the vessel together.
    pub can_maintain: bool,
    /// Deconstruction has been requested.
    pub disassemble_requested: bool,
    /// Alignment to the grid has been requested.
    pub align_requested: bool,
    /// Whether physics should run.
    pub physics_enabled: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState {
            can_maintain: true,
            disassemble_requested: false,
            align_requested: false,
            physics_enabled: true,
        }
    }
}

/// The per-tick decision derived from an anchor's `ControlState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlDecision {
    /// Try to deconstruct this tick.
    pub deconstruct: bool,
    /// The vessel should be steering back onto the grid.
    pub aligning: bool,
    /// Physics integration runs.
    pub physics_enabled: bool,
}

impl ControlDecision {
    /// Resolves the decision for a vessel. A vessel whose anchor is missing (or
    /// offers no control state) has lost authority: it aligns and deconstructs.
    pub fn resolve(state: Option<ControlState>) -> Self {
        match state {
            Some(state) => ControlDecision {
                deconstruct: !state.can_maintain || state.disassemble_requested,
                aligning: !state.can_maintain || state.align_requested,
                physics_enabled: !state.can_maintain || state.physics_enabled,
            },
            None => ControlDecision {
                deconstruct: true,
                aligning: true,
                physics_enabled: true,
            },
        }
    }
}

/// An opaque payload with no capabilities, carried along when its voxel moves.
#[derive(Clone, Debug)]
pub struct DataAttachment {
    kind: String,
    /// Free-form payload state.
    pub data: serde_json::Value,
}

impl DataAttachment {
    /// Creates a payload of the given kind.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        DataAttachment {
            kind: kind.into(),
            data,
        }
    }
}

impl Attachment for DataAttachment {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn relocated(&self, _to: VoxelPos) -> Box<dyn Attachment> {
        Box::new(self.clone())
    }
}

/// Shared handle to a control core's requests. Survives relocation, so whoever
/// drives the core keeps control after the core is moved into a claim.
pub type ControlHandle = Arc<RwLock<ControlState>>;

/// The anchor block of a vessel: exposes a control state that can ask the
/// vessel to toggle physics, align, or deconstruct.
pub struct ControlCore {
    pos: VoxelPos,
    state: ControlHandle,
}

impl ControlCore {
    /// Creates a core at `pos` with default requests (maintain, physics on).
    pub fn new(pos: VoxelPos) -> Self {
        ControlCore {
            pos,
            state: Arc::new(RwLock::new(ControlState::default())),
        }
    }

    /// Handle for changing this core's requests.
    pub fn handle(&self) -> ControlHandle {
        self.state.clone()
    }

    /// Where the core currently lives.
    pub fn position(&self) -> VoxelPos {
        self.pos
    }
}

impl Attachment for ControlCore {
    fn kind(&self) -> &str {
        "control_core"
    }

    fn relocated(&self, to: VoxelPos) -> Box<dyn Attachment> {
        Box::new(ControlCore {
            pos: to,
            state: self.state.clone(),
        })
    }

    fn control_state(&self) -> Option<ControlState> {
        Some(*self.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}
