// Lava erosion — per-surface timers that creep lava across the cavern.
//
// Each eligible cell carries a `LavaErosion` entry created at level load.
// While the cell is erodible (discovered, unreinforced, and of an erodible
// type) and either self-eroding or touching fully-developed LAVA5, its
// timer accumulates elapsed time. Each time the accumulator exceeds the
// configured delay — extended while the cell is an active power path,
// modeling a grace lock — a chance-in-ten roll may advance the cell one
// lava stage. Non-lava cells that fail the roll still consume the
// accumulated delay, so a lucky cell erodes late, not never.
//
// `update` only *decides*; the terrain mutation (and the job cancellation
// that must precede it) is applied by `sim.rs`, keeping this module free of
// job-pool knowledge.
//
// See also: `surface.rs` for `is_erodible`/`next_lava_stage`, `terrain.rs`
// for `apply_erosion`, `config.rs` for the delays.
//
// **Critical constraint: determinism.** The only randomness is the stage
// roll, drawn from the sim PRNG in a fixed per-tick iteration order.

use crate::config::GameConfig;
use crate::surface::SurfaceType;
use crate::terrain::Terrain;
use crate::types::GridCoord;
use granite_hollow_prng::GameRng;
use serde::{Deserialize, Serialize};

/// Erosion state for one cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LavaErosion {
    pub coord: GridCoord,
    /// Chance-in-ten that an expired timer actually advances the stage.
    pub chance: u8,
    /// Even chances mark self-eroding cells, which erode without a LAVA5
    /// neighbor. Quirk inherited from the level format.
    pub self_eroding: bool,
    timer_ms: u32,
}

impl LavaErosion {
    pub fn new(coord: GridCoord, chance: u8) -> Self {
        Self {
            coord,
            chance,
            self_eroding: chance % 2 == 0,
            timer_ms: 0,
        }
    }

    /// Advance the timer by one tick and decide whether the cell erodes.
    ///
    /// Returns the new surface type to apply, or `None` if nothing happens
    /// this tick. Never mutates the terrain itself.
    pub fn update(
        &mut self,
        terrain: &Terrain,
        config: &GameConfig,
        elapsed_ms: u32,
        rng: &mut GameRng,
    ) -> Option<SurfaceType> {
        let surface = terrain.get(self.coord);
        if !surface.discovered || surface.reinforced || !surface.surface_type.is_erodible() {
            return None;
        }
        if !self.self_eroding && !self.touches_lava5(terrain) {
            return None;
        }

        self.timer_ms += elapsed_ms;
        let lock = if surface.surface_type == SurfaceType::PowerPath {
            config.power_path_lock_ms
        } else {
            0
        };
        while self.timer_ms > config.erode_delay_ms + lock {
            self.timer_ms -= config.erode_delay_ms;
            if rng.next_f32() * 10.0 < self.chance as f32 {
                return Some(surface.surface_type.next_lava_stage());
            }
        }
        None
    }

    fn touches_lava5(&self, terrain: &Terrain) -> bool {
        self.coord
            .orthogonal_neighbors()
            .iter()
            .any(|n| terrain.get(*n).surface_type == SurfaceType::Lava5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;

    fn terrain_with(center: SurfaceType) -> Terrain {
        let mut surfaces = Vec::new();
        for _ in 0..9 {
            let mut s = Surface::new(SurfaceType::Ground);
            s.discovered = true;
            surfaces.push(s);
        }
        let mut t = Terrain::new(3, 3, surfaces);
        t.get_mut(GridCoord::new(1, 1)).unwrap().surface_type = center;
        t
    }

    fn config() -> GameConfig {
        GameConfig {
            erode_delay_ms: 1_000,
            power_path_lock_ms: 5_000,
            ..GameConfig::default()
        }
    }

    #[test]
    fn self_eroding_flag_from_chance_parity() {
        assert!(LavaErosion::new(GridCoord::new(0, 0), 10).self_eroding);
        assert!(!LavaErosion::new(GridCoord::new(0, 0), 9).self_eroding);
    }

    #[test]
    fn certain_chance_erodes_after_delay() {
        let terrain = terrain_with(SurfaceType::Ground);
        let config = config();
        let mut rng = GameRng::new(1);
        // Chance 10 → always advances, and even → self-eroding.
        let mut erosion = LavaErosion::new(GridCoord::new(1, 1), 10);
        assert_eq!(erosion.update(&terrain, &config, 999, &mut rng), None);
        assert_eq!(
            erosion.update(&terrain, &config, 2, &mut rng),
            Some(SurfaceType::Lava1)
        );
    }

    #[test]
    fn zero_chance_never_erodes() {
        let terrain = terrain_with(SurfaceType::Ground);
        let config = config();
        let mut rng = GameRng::new(1);
        let mut erosion = LavaErosion::new(GridCoord::new(1, 1), 0);
        for _ in 0..100 {
            assert_eq!(erosion.update(&terrain, &config, 1_000, &mut rng), None);
        }
    }

    #[test]
    fn non_self_eroding_needs_lava5_neighbor() {
        let mut terrain = terrain_with(SurfaceType::Ground);
        let config = config();
        let mut rng = GameRng::new(1);
        // Odd chance → not self-eroding.
        let mut erosion = LavaErosion::new(GridCoord::new(1, 1), 9);
        assert_eq!(erosion.update(&terrain, &config, 10_000, &mut rng), None);

        terrain.get_mut(GridCoord::new(0, 1)).unwrap().surface_type = SurfaceType::Lava5;
        // With the neighbor boiling, the timer starts counting.
        let advanced = (0..50)
            .any(|_| erosion.update(&terrain, &config, 1_100, &mut rng).is_some());
        assert!(advanced);
    }

    #[test]
    fn power_path_gets_grace_lock() {
        let terrain = terrain_with(SurfaceType::PowerPath);
        let config = config();
        let mut rng = GameRng::new(1);
        let mut erosion = LavaErosion::new(GridCoord::new(1, 1), 10);
        // delay + lock = 6000ms; plain delay alone is not enough.
        assert_eq!(erosion.update(&terrain, &config, 1_500, &mut rng), None);
        assert_eq!(erosion.update(&terrain, &config, 1_500, &mut rng), None);
        assert_eq!(erosion.update(&terrain, &config, 1_500, &mut rng), None);
        let result = erosion.update(&terrain, &config, 1_600, &mut rng);
        assert_eq!(result, Some(SurfaceType::Lava1));
    }

    #[test]
    fn reinforced_and_wall_cells_do_not_erode() {
        let mut terrain = terrain_with(SurfaceType::Ground);
        let config = config();
        let mut rng = GameRng::new(1);
        let mut erosion = LavaErosion::new(GridCoord::new(1, 1), 10);

        terrain.get_mut(GridCoord::new(1, 1)).unwrap().reinforced = true;
        assert_eq!(erosion.update(&terrain, &config, 10_000, &mut rng), None);

        terrain.get_mut(GridCoord::new(1, 1)).unwrap().reinforced = false;
        terrain.get_mut(GridCoord::new(1, 1)).unwrap().surface_type = SurfaceType::HardRock;
        assert_eq!(erosion.update(&terrain, &config, 10_000, &mut rng), None);
    }

    #[test]
    fn lava_deepens_stage_by_stage() {
        let mut terrain = terrain_with(SurfaceType::Lava1);
        let config = config();
        let mut rng = GameRng::new(1);
        let mut erosion = LavaErosion::new(GridCoord::new(1, 1), 10);
        assert_eq!(
            erosion.update(&terrain, &config, 1_100, &mut rng),
            Some(SurfaceType::Lava2)
        );
        terrain.apply_erosion(GridCoord::new(1, 1), SurfaceType::Lava2);
        assert_eq!(
            erosion.update(&terrain, &config, 1_100, &mut rng),
            Some(SurfaceType::Lava3)
        );
    }
}
