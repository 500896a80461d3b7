//! # Region Claims
//!
//! A claim is the square block of cells a vessel's voxels live in while it is
//! assembled. Claims are handed out by `RegionClaimAllocator`, which keeps every
//! live claim disjoint from every other.
//!
//! Claims are laid out as slots along the x axis, starting far away from the
//! playable area (`ClaimConfig::origin_x`), with `gap` empty cells between
//! neighbouring slots. A cluster too wide for the configured radius gets a
//! wider claim centred on a slot; it still keeps `gap` cells clear of every
//! other live claim.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use cgmath::{Point2, Point3};
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::error::ClaimError;
use crate::engine_state::voxels::{cell_of, CellPos, VoxelPos};

/// Allocator layout parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Cell x of the first slot's centre
    pub origin_x: i32,
    /// Cell z of every slot's centre
    pub origin_z: i32,
    /// Half-width of a claim in cells
    pub radius: i32,
    /// Empty cells between neighbouring slots
    pub gap: i32,
    /// Number of slots
    pub max_claims: usize,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        ClaimConfig {
            origin_x: 20_000,
            origin_z: 20_000,
            radius: 7,
            gap: 1,
            max_claims: 4096,
        }
    }
}

/// An inclusive, square rectangle of cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionClaim {
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
}

impl RegionClaim {
    /// The claim of `radius` cells around `(center_x, center_z)`.
    pub fn new(center_x: i32, center_z: i32, radius: i32) -> Self {
        let radius = radius.max(0);
        RegionClaim {
            min_x: center_x - radius,
            max_x: center_x + radius,
            min_z: center_z - radius,
            max_z: center_z + radius,
        }
    }

    /// Rebuilds a claim from stored bounds.
    pub fn from_bounds(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Result<Self, ClaimError> {
        let width = max_x - min_x;
        let depth = max_z - min_z;
        if width < 0 || depth < 0 {
            return Err(ClaimError::InvalidBounds(format!(
                "min exceeds max in [{min_x}..={max_x}] x [{min_z}..={max_z}]"
            )));
        }
        if width != depth || width % 2 != 0 {
            return Err(ClaimError::InvalidBounds(format!(
                "[{min_x}..={max_x}] x [{min_z}..={max_z}] is not a square with a centre cell"
            )));
        }
        Ok(RegionClaim {
            min_x,
            max_x,
            min_z,
            max_z,
        })
    }

    /// Smallest cell x.
    pub fn min_x(&self) -> i32 {
        self.min_x
    }

    /// Largest cell x.
    pub fn max_x(&self) -> i32 {
        self.max_x
    }

    /// Smallest cell z.
    pub fn min_z(&self) -> i32 {
        self.min_z
    }

    /// Largest cell z.
    pub fn max_z(&self) -> i32 {
        self.max_z
    }

    /// Centre cell x.
    pub fn center_x(&self) -> i32 {
        (self.min_x + self.max_x) / 2
    }

    /// Centre cell z.
    pub fn center_z(&self) -> i32 {
        (self.min_z + self.max_z) / 2
    }

    /// Half-width in cells.
    pub fn radius(&self) -> i32 {
        (self.max_x - self.min_x) / 2
    }

    /// Returns true if `cell` lies inside the claim.
    pub fn contains_cell(&self, cell: CellPos) -> bool {
        (self.min_x..=self.max_x).contains(&cell.x) && (self.min_z..=self.max_z).contains(&cell.y)
    }

    /// Returns true if the voxel at `pos` lies inside the claim.
    pub fn contains_voxel(&self, pos: VoxelPos) -> bool {
        self.contains_cell(cell_of(pos))
    }

    /// Every cell of the claim, row by row.
    pub fn cells(&self) -> impl Iterator<Item = CellPos> + '_ {
        (self.min_x..=self.max_x)
            .flat_map(move |x| (self.min_z..=self.max_z).map(move |z| Point2::new(x, z)))
    }

    /// Number of cells.
    pub fn cell_count(&self) -> usize {
        let side = (self.max_x - self.min_x + 1) as usize;
        side * side
    }

    /// The voxel at the geometric centre of the claim, halfway up the world.
    pub fn region_center(&self) -> VoxelPos {
        Point3::new(self.center_x() * 16 + 7, 128, self.center_z() * 16 + 7)
    }

    /// Returns true if the two claims share at least one cell.
    pub fn overlaps(&self, other: &RegionClaim) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_z <= other.max_z
            && other.min_z <= self.max_z
    }
}

struct AllocatorState {
    config: ClaimConfig,
    live: HashSet<RegionClaim>,
}

impl AllocatorState {
    fn slot(&self, index: usize) -> RegionClaim {
        let stride = 2 * self.config.radius + 1 + self.config.gap;
        RegionClaim::new(
            self.config.origin_x + index as i32 * stride,
            self.config.origin_z,
            self.config.radius,
        )
    }

    fn is_free(&self, claim: &RegionClaim) -> bool {
        !self.live.iter().any(|live| live.overlaps(claim))
    }

    fn is_free_with_gap(&self, claim: &RegionClaim) -> bool {
        let gap = self.config.gap.max(0);
        let padded = RegionClaim {
            min_x: claim.min_x - gap,
            max_x: claim.max_x + gap,
            min_z: claim.min_z - gap,
            max_z: claim.max_z + gap,
        };
        self.is_free(&padded)
    }
}

/// Hands out disjoint claims. Cloning yields another handle to the same
/// allocator; every method is safe to call from any thread.
#[derive(Clone)]
pub struct RegionClaimAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

impl RegionClaimAllocator {
    /// Creates an allocator with no live claims.
    pub fn new(config: ClaimConfig) -> Self {
        RegionClaimAllocator {
            state: Arc::new(Mutex::new(AllocatorState {
                config,
                live: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the lowest free slot that does not overlap any live claim.
    pub fn allocate_next(&self) -> Result<RegionClaim, ClaimError> {
        self.allocate_enclosing(0)
    }

    /// Like `allocate_next`, but the claim is at least `min_radius` cells wide
    /// on each side of its centre cell.
    pub fn allocate_enclosing(&self, min_radius: i32) -> Result<RegionClaim, ClaimError> {
        let mut state = self.lock();
        let radius = state.config.radius.max(min_radius);
        for index in 0..state.config.max_claims {
            let slot = state.slot(index);
            let candidate = RegionClaim::new(slot.center_x(), slot.center_z(), radius);
            if state.is_free_with_gap(&candidate) {
                state.live.insert(candidate);
                info!(
                    "Allocated claim centred on cell ({}, {}), radius {}",
                    candidate.center_x(),
                    candidate.center_z(),
                    radius
                );
                return Ok(candidate);
            }
        }
        Err(ClaimError::Exhausted {
            max_claims: state.config.max_claims,
        })
    }

    /// Marks a specific claim as live, as when a saved vessel is loaded.
    pub fn reserve(&self, claim: RegionClaim) -> Result<(), ClaimError> {
        let mut state = self.lock();
        if !state.is_free(&claim) {
            return Err(ClaimError::Overlap {
                min_x: claim.min_x,
                max_x: claim.max_x,
                min_z: claim.min_z,
                max_z: claim.max_z,
            });
        }
        state.live.insert(claim);
        Ok(())
    }

    /// Frees a claim. Returns false if it was not live.
    pub fn release(&self, claim: &RegionClaim) -> bool {
        let released = self.lock().live.remove(claim);
        if released {
            info!(
                "Released claim centred on cell ({}, {})",
                claim.center_x(),
                claim.center_z()
            );
        }
        released
    }

    /// Returns true if `claim` is live.
    pub fn is_claimed(&self, claim: &RegionClaim) -> bool {
        self.lock().live.contains(claim)
    }

    /// The live claim containing `cell`, if any.
    pub fn claim_containing(&self, cell: CellPos) -> Option<RegionClaim> {
        self.lock().live.iter().find(|claim| claim.contains_cell(cell)).copied()
    }

    /// Number of live claims.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }
}
