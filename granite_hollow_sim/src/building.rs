// Buildings — fixed workplace providers.
//
// The core does not simulate construction or power networks; buildings
// arrive from the level loader (or a spawn command) already standing. What
// they contribute to the simulation is *places*: a deposit target for
// carried materials, a training spot, a tool counter. A building that is
// not `usable` (damaged, unpowered — the loader's call) offers no
// workplaces until repaired.
//
// See also: `job.rs` for the jobs anchored at buildings, `material.rs`
// for deposit-target selection, `level.rs` for validation at load.

use crate::pathfinding::PathTarget;
use crate::terrain::Terrain;
use crate::types::{BuildingId, GridCoord};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingKind {
    /// Deposit of last resort, tool counter, upgrade rig.
    ToolStation,
    /// Preferred crystal deposit.
    PowerStation,
    /// Preferred ore deposit.
    OreRefinery,
    /// Where raiders pick up trainings.
    TrainingCamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Building {
    pub id: BuildingId,
    pub kind: BuildingKind,
    /// The cell the building stands on; its center is every workplace.
    pub primary: GridCoord,
    pub usable: bool,
    pub discovered: bool,
}

impl Building {
    pub fn new(id: BuildingId, kind: BuildingKind, primary: GridCoord) -> Self {
        Self {
            id,
            kind,
            primary,
            usable: true,
            discovered: true,
        }
    }

    /// The workplace at this building: its primary cell center.
    pub fn workplace(&self, terrain: &Terrain, tile_size: f32) -> PathTarget {
        PathTarget::at_building(terrain.center_world(self.primary, tile_size), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Surface, SurfaceType};
    use granite_hollow_prng::GameRng;

    #[test]
    fn workplace_is_primary_center() {
        let mut surfaces = Vec::new();
        for _ in 0..9 {
            let mut s = Surface::new(SurfaceType::Ground);
            s.discovered = true;
            surfaces.push(s);
        }
        let terrain = Terrain::new(3, 3, surfaces);
        let mut rng = GameRng::new(1);
        let building = Building::new(
            BuildingId::new(&mut rng),
            BuildingKind::ToolStation,
            GridCoord::new(1, 1),
        );
        let target = building.workplace(&terrain, 40.0);
        assert_eq!(target.location.x, 60.0);
        assert_eq!(target.location.z, 60.0);
        assert_eq!(target.building, Some(building.id));
    }
}
