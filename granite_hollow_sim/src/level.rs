// Level input — the in-memory structures the loader hands the sim.
//
// No file format lives here: parsing level assets is an external concern,
// and by the time the core sees a level it is already a `LevelData` value.
// Validation happens once, at construction (`SimState::from_level`), and
// violations are `LevelError`s — the only errors the core ever surfaces.
// Once a level validates, the simulation proper is total and never fails
// mid-tick.
//
// See also: `sim.rs` (`SimState::from_level`) for how this becomes live
// state, `config.rs` for the tunables that are not per-level.

use crate::building::BuildingKind;
use crate::job::PriorityIdentifier;
use crate::surface::SurfaceType;
use crate::types::{GridCoord, WorldPos};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A building standing in the level at load time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildingSpec {
    pub kind: BuildingKind,
    pub surface: GridCoord,
}

/// Ore/crystal hidden inside one wall cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentSpec {
    pub surface: GridCoord,
    pub ore: u8,
    pub crystals: u8,
}

/// Erosion eligibility for one cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErosionSpec {
    pub surface: GridCoord,
    /// Chance-in-ten per expired timer; even values self-erode.
    pub chance: u8,
}

/// Everything a level supplies, already parsed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelData {
    pub width: u32,
    pub height: u32,
    /// Row-major initial surface types; `width * height` entries.
    pub surface_types: Vec<SurfaceType>,
    /// Seed of the initially discovered region (the starting cavern).
    pub start: GridCoord,
    pub contents: Vec<ContentSpec>,
    pub erosion: Vec<ErosionSpec>,
    pub buildings: Vec<BuildingSpec>,
    /// Starting raider positions.
    pub raiders: Vec<WorldPos>,
    /// Level-specific scheduling order; `None` keeps the config default.
    pub priorities: Option<Vec<PriorityIdentifier>>,
}

impl LevelData {
    /// A bare all-ground level with the start at the center. Test and
    /// sandbox convenience.
    pub fn open(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            surface_types: vec![SurfaceType::Ground; (width * height) as usize],
            start: GridCoord::new(width as i32 / 2, height as i32 / 2),
            contents: Vec::new(),
            erosion: Vec::new(),
            buildings: Vec::new(),
            raiders: Vec::new(),
            priorities: None,
        }
    }

    fn in_bounds(&self, coord: GridCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && (coord.x as u32) < self.width
            && (coord.y as u32) < self.height
    }

    fn type_at(&self, coord: GridCoord) -> SurfaceType {
        self.surface_types[(coord.x as u32 + coord.y as u32 * self.width) as usize]
    }

    /// Construction-time contract checks. A level that passes is one the
    /// simulation can run without ever failing.
    pub fn validate(&self) -> Result<(), LevelError> {
        let expected = (self.width as usize) * (self.height as usize);
        if expected == 0 {
            return Err(LevelError::EmptyGrid);
        }
        if self.surface_types.len() != expected {
            return Err(LevelError::DimensionMismatch {
                expected,
                actual: self.surface_types.len(),
            });
        }
        if !self.in_bounds(self.start) {
            return Err(LevelError::OutOfBounds {
                what: "start",
                coord: self.start,
            });
        }
        if !self.type_at(self.start).is_floor() {
            return Err(LevelError::StartNotFloor { coord: self.start });
        }
        for b in &self.buildings {
            if !self.in_bounds(b.surface) {
                return Err(LevelError::OutOfBounds {
                    what: "building",
                    coord: b.surface,
                });
            }
            if !self.type_at(b.surface).is_floor() {
                return Err(LevelError::BuildingNotOnFloor { coord: b.surface });
            }
        }
        for c in &self.contents {
            if !self.in_bounds(c.surface) {
                return Err(LevelError::OutOfBounds {
                    what: "content",
                    coord: c.surface,
                });
            }
        }
        for e in &self.erosion {
            if !self.in_bounds(e.surface) {
                return Err(LevelError::OutOfBounds {
                    what: "erosion",
                    coord: e.surface,
                });
            }
            if e.chance > 10 {
                return Err(LevelError::ErosionChanceOutOfRange { chance: e.chance });
            }
        }
        if let Some(priorities) = &self.priorities {
            if priorities.is_empty() {
                return Err(LevelError::EmptyPriorities);
            }
            for (i, p) in priorities.iter().enumerate() {
                if priorities[..i].contains(p) {
                    return Err(LevelError::DuplicatePriority { priority: *p });
                }
            }
        }
        Ok(())
    }
}

/// Load-time contract violations. The only error type the core surfaces.
#[derive(Clone, Debug, PartialEq)]
pub enum LevelError {
    EmptyGrid,
    DimensionMismatch { expected: usize, actual: usize },
    OutOfBounds { what: &'static str, coord: GridCoord },
    StartNotFloor { coord: GridCoord },
    BuildingNotOnFloor { coord: GridCoord },
    ErosionChanceOutOfRange { chance: u8 },
    EmptyPriorities,
    DuplicatePriority { priority: PriorityIdentifier },
}

impl fmt::Display for LevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelError::EmptyGrid => write!(f, "level grid has zero cells"),
            LevelError::DimensionMismatch { expected, actual } => write!(
                f,
                "surface grid length {actual} does not match dimensions (expected {expected})"
            ),
            LevelError::OutOfBounds { what, coord } => {
                write!(f, "{what} coordinate {coord} is out of bounds")
            }
            LevelError::StartNotFloor { coord } => {
                write!(f, "start cell {coord} is not a floor surface")
            }
            LevelError::BuildingNotOnFloor { coord } => {
                write!(f, "building cell {coord} is not a floor surface")
            }
            LevelError::ErosionChanceOutOfRange { chance } => {
                write!(f, "erosion chance {chance} exceeds 10")
            }
            LevelError::EmptyPriorities => write!(f, "priority order override is empty"),
            LevelError::DuplicatePriority { priority } => {
                write!(f, "priority {priority:?} listed twice")
            }
        }
    }
}

impl std::error::Error for LevelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_level_validates() {
        assert_eq!(LevelData::open(5, 5).validate(), Ok(()));
    }

    #[test]
    fn dimension_mismatch_is_caught() {
        let mut level = LevelData::open(5, 5);
        level.surface_types.pop();
        assert!(matches!(
            level.validate(),
            Err(LevelError::DimensionMismatch { expected: 25, actual: 24 })
        ));
    }

    #[test]
    fn start_must_be_floor_and_in_bounds() {
        let mut level = LevelData::open(5, 5);
        level.start = GridCoord::new(9, 9);
        assert!(matches!(
            level.validate(),
            Err(LevelError::OutOfBounds { what: "start", .. })
        ));
        let mut level = LevelData::open(5, 5);
        level.surface_types[12] = SurfaceType::SolidRock; // (2,2)
        assert!(matches!(
            level.validate(),
            Err(LevelError::StartNotFloor { .. })
        ));
    }

    #[test]
    fn building_on_wall_is_rejected() {
        let mut level = LevelData::open(5, 5);
        level.surface_types[0] = SurfaceType::HardRock;
        level.buildings.push(BuildingSpec {
            kind: BuildingKind::ToolStation,
            surface: GridCoord::new(0, 0),
        });
        assert!(matches!(
            level.validate(),
            Err(LevelError::BuildingNotOnFloor { .. })
        ));
    }

    #[test]
    fn duplicate_priorities_are_rejected() {
        let mut level = LevelData::open(5, 5);
        level.priorities = Some(vec![
            PriorityIdentifier::Clearing,
            PriorityIdentifier::Destruction,
            PriorityIdentifier::Clearing,
        ]);
        assert!(matches!(
            level.validate(),
            Err(LevelError::DuplicatePriority {
                priority: PriorityIdentifier::Clearing
            })
        ));
    }

    #[test]
    fn erosion_chance_is_bounded() {
        let mut level = LevelData::open(5, 5);
        level.erosion.push(ErosionSpec {
            surface: GridCoord::new(1, 1),
            chance: 11,
        });
        assert!(matches!(
            level.validate(),
            Err(LevelError::ErosionChanceOutOfRange { chance: 11 })
        ));
    }

    #[test]
    fn level_error_displays() {
        let err = LevelError::StartNotFloor {
            coord: GridCoord::new(1, 2),
        };
        assert!(err.to_string().contains("(1, 2)"));
    }
}
