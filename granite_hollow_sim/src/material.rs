// Material pickups — crystals, ore, bricks, dynamite charges.
//
// Materials are world entities that carry-type jobs move around: freed by
// collapses and rubble clearing, picked up by fulfillers, deposited at
// buildings. A dynamite charge is a material too, with a blast surface and
// a fuse that `sim.rs` counts down once the charge is placed.
//
// See also: `job.rs` for `JobKind::Carry`/`JobKind::Dynamite`, `sim.rs`
// for spawn/deposit/fuse handling, `building.rs` for deposit targets.

use crate::building::BuildingKind;
use crate::types::{FulfillerId, GridCoord, MaterialId, WorldPos};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialKind {
    Crystal,
    Ore,
    Brick,
    Dynamite,
}

impl MaterialKind {
    /// Building kinds that accept this material as a deposit, in preference
    /// order. Empty for materials that are never deposited.
    pub fn deposit_building_kinds(self) -> &'static [BuildingKind] {
        match self {
            MaterialKind::Crystal => &[BuildingKind::PowerStation, BuildingKind::ToolStation],
            MaterialKind::Ore | MaterialKind::Brick => {
                &[BuildingKind::OreRefinery, BuildingKind::ToolStation]
            }
            MaterialKind::Dynamite => &[],
        }
    }
}

/// A material pickup lying in the world (or riding on a fulfiller).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub kind: MaterialKind,
    pub pos: WorldPos,
    pub discovered: bool,
    pub carried_by: Option<FulfillerId>,
    /// For dynamite: the wall this charge is meant to bring down.
    pub blast_surface: Option<GridCoord>,
    /// For dynamite: remaining fuse once placed and ignited.
    pub fuse_ms: Option<u32>,
}

impl Material {
    pub fn new(id: MaterialId, kind: MaterialKind, pos: WorldPos, discovered: bool) -> Self {
        Self {
            id,
            kind,
            pos,
            discovered,
            carried_by: None,
            blast_surface: None,
            fuse_ms: None,
        }
    }

    /// Free to be targeted by a carry job: on the ground and visible.
    pub fn is_loose(&self) -> bool {
        self.discovered && self.carried_by.is_none() && self.fuse_ms.is_none()
    }
}
