// Surface cells — the atomic unit of walkability and collapse.
//
// `SurfaceType` is the terrain material of one grid cell. Rubble and lava
// are staged: clearing rubble steps RUBBLE4 → … → RUBBLE1 → GROUND, and
// erosion steps GROUND → LAVA1 → … → LAVA5. Every derived property
// (walkability, diggability, erodibility) is a pure function of the type
// plus per-cell flags, so terrain queries never allocate or fail.
//
// `Surface` is the per-cell state: material, discovery, reinforcement, seam
// depth, and the ore/crystals hidden inside the rock.
//
// See also: `terrain.rs` for the grid that owns these cells and the
// collapse/reduce-rubble transitions, `erosion.rs` for lava staging,
// `config.rs` for drill durations keyed by `SurfaceType`.

use serde::{Deserialize, Serialize};

/// The material of a single grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceType {
    /// Bare cavern floor.
    Ground,
    /// A completed power path; faster to cross, slower to erode.
    PowerPath,
    /// Soft diggable wall.
    Dirt,
    /// Medium diggable wall.
    LooseRock,
    /// Hard diggable wall; slow to drill, candidate for dynamite.
    HardRock,
    /// Impenetrable wall. Also the out-of-bounds sentinel material.
    SolidRock,
    /// Wall seamed with energy crystals; drilling yields them stepwise.
    CrystalSeam,
    /// Wall seamed with ore.
    OreSeam,
    Rubble1,
    Rubble2,
    Rubble3,
    Rubble4,
    Lava1,
    Lava2,
    Lava3,
    Lava4,
    Lava5,
}

impl SurfaceType {
    /// Floor cells are at ground level; everything else is a wall. Support
    /// counting and cascade guards key off this flag.
    pub fn is_floor(self) -> bool {
        !matches!(
            self,
            SurfaceType::Dirt
                | SurfaceType::LooseRock
                | SurfaceType::HardRock
                | SurfaceType::SolidRock
                | SurfaceType::CrystalSeam
                | SurfaceType::OreSeam
        )
    }

    pub fn is_diggable(self) -> bool {
        matches!(
            self,
            SurfaceType::Dirt
                | SurfaceType::LooseRock
                | SurfaceType::HardRock
                | SurfaceType::CrystalSeam
                | SurfaceType::OreSeam
        )
    }

    pub fn is_reinforcable(self) -> bool {
        matches!(
            self,
            SurfaceType::Dirt | SurfaceType::LooseRock | SurfaceType::HardRock
        )
    }

    /// Walls that a dynamite charge can bring down.
    pub fn is_explodable(self) -> bool {
        matches!(
            self,
            SurfaceType::Dirt | SurfaceType::LooseRock | SurfaceType::HardRock
        )
    }

    pub fn is_seam(self) -> bool {
        matches!(self, SurfaceType::CrystalSeam | SurfaceType::OreSeam)
    }

    /// Rubble depth 1–4, or 0 for anything that is not rubble.
    pub fn rubble_level(self) -> u8 {
        match self {
            SurfaceType::Rubble1 => 1,
            SurfaceType::Rubble2 => 2,
            SurfaceType::Rubble3 => 3,
            SurfaceType::Rubble4 => 4,
            _ => 0,
        }
    }

    /// Lava stage 1–5, or 0 for anything that is not lava.
    pub fn lava_stage(self) -> u8 {
        match self {
            SurfaceType::Lava1 => 1,
            SurfaceType::Lava2 => 2,
            SurfaceType::Lava3 => 3,
            SurfaceType::Lava4 => 4,
            SurfaceType::Lava5 => 5,
            _ => 0,
        }
    }

    /// Types the erosion timer may act on. LAVA5 is terminal and no longer
    /// erodes itself; walls never erode.
    pub fn is_erodible(self) -> bool {
        matches!(
            self,
            SurfaceType::Ground
                | SurfaceType::PowerPath
                | SurfaceType::Rubble1
                | SurfaceType::Rubble2
                | SurfaceType::Rubble3
                | SurfaceType::Rubble4
                | SurfaceType::Lava1
                | SurfaceType::Lava2
                | SurfaceType::Lava3
                | SurfaceType::Lava4
        )
    }

    /// One rubble-clearing step. Identity for non-rubble types.
    pub fn reduced_rubble(self) -> SurfaceType {
        match self {
            SurfaceType::Rubble4 => SurfaceType::Rubble3,
            SurfaceType::Rubble3 => SurfaceType::Rubble2,
            SurfaceType::Rubble2 => SurfaceType::Rubble1,
            SurfaceType::Rubble1 => SurfaceType::Ground,
            other => other,
        }
    }

    /// The type after one erosion advance: lava deepens one stage, anything
    /// else ignites to LAVA1. Saturates at LAVA5.
    pub fn next_lava_stage(self) -> SurfaceType {
        match self {
            SurfaceType::Lava1 => SurfaceType::Lava2,
            SurfaceType::Lava2 => SurfaceType::Lava3,
            SurfaceType::Lava3 => SurfaceType::Lava4,
            SurfaceType::Lava4 | SurfaceType::Lava5 => SurfaceType::Lava5,
            _ => SurfaceType::Lava1,
        }
    }
}

/// Per-cell terrain state. Created once at level load, mutated by drilling,
/// reinforcing, rubble clearing, and erosion, never destroyed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Surface {
    pub surface_type: SurfaceType,
    pub discovered: bool,
    pub reinforced: bool,
    /// Remaining seam depth for crystal/ore seams; each drill cycle that
    /// finds the seam still charged scatters one unit and decrements this.
    pub seam_level: u8,
    pub contained_ore: u8,
    pub contained_crystals: u8,
}

/// Sentinel returned for out-of-bounds lookups: impassable, undiscovered
/// solid rock, created without touching the grid.
pub const SOLID_ROCK_SENTINEL: Surface = Surface {
    surface_type: SurfaceType::SolidRock,
    discovered: false,
    reinforced: false,
    seam_level: 0,
    contained_ore: 0,
    contained_crystals: 0,
};

impl Surface {
    pub fn new(surface_type: SurfaceType) -> Self {
        Self {
            surface_type,
            discovered: false,
            reinforced: false,
            seam_level: 0,
            contained_ore: 0,
            contained_crystals: 0,
        }
    }

    /// Units can stand on and cross this cell. Lava and undiscovered cells
    /// are never walkable even though they are floor.
    pub fn is_walkable(&self) -> bool {
        self.discovered
            && self.surface_type.is_floor()
            && self.surface_type.lava_stage() == 0
    }

    pub fn is_diggable(&self) -> bool {
        self.discovered && self.surface_type.is_diggable()
    }

    pub fn is_reinforcable(&self) -> bool {
        self.discovered && !self.reinforced && self.surface_type.is_reinforcable()
    }

    pub fn has_rubble(&self) -> bool {
        self.surface_type.rubble_level() > 0
    }
}
