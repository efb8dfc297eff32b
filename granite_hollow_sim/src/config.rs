// Data-driven game configuration.
//
// All tunable simulation parameters live here in `GameConfig`, loaded from
// JSON at startup or defaulted for tests. The sim never uses magic numbers —
// it reads from the config. This enables balance iteration without
// recompilation.
//
// Work durations are grouped per concern: `DrillDurations` carries one
// per-raider-level array per diggable material, the way the original stats
// tables index drill times by unit level. Speed coefficients multiply the
// base unit speed depending on the surface being crossed and whether the
// unit carries a load.
//
// See also: `sim.rs` which owns the `GameConfig` as part of `SimState`,
// `job.rs` for the `PriorityIdentifier` values ranked by `priorities`,
// `erosion.rs` for the erosion delays consumed there.
//
// **Critical constraint: determinism.** Config values feed directly into
// simulation logic. Identical configs and seeds must produce identical runs.

use crate::job::PriorityIdentifier;
use crate::surface::SurfaceType;
use serde::{Deserialize, Serialize};

/// Milliseconds of drilling required per material, indexed by raider level
/// (clamped to the array length). A `0` entry means that level cannot drill
/// the material at all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrillDurations {
    pub dirt: [u32; 3],
    pub loose_rock: [u32; 3],
    pub hard_rock: [u32; 3],
    pub seam: [u32; 3],
}

/// Top-level game configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameConfig {
    /// World-space edge length of one grid cell.
    pub tile_size: f32,
    /// Fixed simulation timestep in milliseconds.
    pub tick_duration_ms: u32,
    /// Maximum per-tick movement step and default workplace acceptance
    /// radius. Clamping steps to this keeps units from overshooting short
    /// final segments.
    pub job_action_range: f32,

    /// Base raider speed in world units per second.
    pub raider_speed: f32,
    /// Base vehicle speed in world units per second.
    pub vehicle_speed: f32,
    /// Speed multiplier while crossing a power path.
    pub power_path_speed_coef: f32,
    /// Speed multiplier while crossing rubble.
    pub rubble_speed_coef: f32,
    /// Speed multiplier while carrying a material.
    pub carry_speed_coef: f32,

    pub drill_durations: DrillDurations,
    pub reinforce_duration_ms: u32,
    pub clear_rubble_cycle_ms: u32,
    pub train_duration_ms: u32,
    pub repair_duration_ms: u32,
    pub upgrade_duration_ms: u32,
    /// Duration of a pickup or deposit action for carry-type jobs.
    pub pickup_duration_ms: u32,
    /// Delay between placing a dynamite charge and the blast.
    pub dynamite_fuse_ms: u32,

    /// Starting seam level for crystal/ore seam surfaces.
    pub seam_level_initial: u8,
    /// Highest raider level reachable through upgrades.
    pub max_raider_level: u8,
    /// How many fulfillers may share one clear-rubble job.
    pub clear_rubble_worker_limit: usize,

    /// Base delay between erosion stage advances.
    pub erode_delay_ms: u32,
    /// Extra delay granted while the eroding cell is an active power path.
    pub power_path_lock_ms: u32,
    /// Interval between spontaneous fall-ins. Zero disables fall-ins.
    pub fall_in_interval_ms: u32,

    /// Scheduling order: earlier entries win. Jobs whose priority is absent
    /// from this list rank after everything listed (never an error at
    /// runtime — see `JobSupervisor`).
    pub priorities: Vec<PriorityIdentifier>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tile_size: 40.0,
            tick_duration_ms: 33,
            job_action_range: 5.0,
            raider_speed: 25.0,
            vehicle_speed: 45.0,
            power_path_speed_coef: 1.5,
            rubble_speed_coef: 0.5,
            carry_speed_coef: 0.7,
            drill_durations: DrillDurations {
                dirt: [2_000, 1_600, 1_200],
                loose_rock: [4_000, 3_200, 2_400],
                hard_rock: [8_000, 6_400, 4_800],
                seam: [3_000, 2_400, 1_800],
            },
            reinforce_duration_ms: 2_700,
            clear_rubble_cycle_ms: 2_000,
            train_duration_ms: 10_000,
            repair_duration_ms: 5_000,
            upgrade_duration_ms: 8_000,
            pickup_duration_ms: 800,
            dynamite_fuse_ms: 3_000,
            seam_level_initial: 4,
            max_raider_level: 2,
            clear_rubble_worker_limit: 3,
            erode_delay_ms: 30_000,
            power_path_lock_ms: 60_000,
            fall_in_interval_ms: 0,
            priorities: vec![
                PriorityIdentifier::Destruction,
                PriorityIdentifier::Repair,
                PriorityIdentifier::Clearing,
                PriorityIdentifier::Crystal,
                PriorityIdentifier::Ore,
                PriorityIdentifier::Construction,
                PriorityIdentifier::Reinforce,
                PriorityIdentifier::Train,
                PriorityIdentifier::GetTool,
            ],
        }
    }
}

impl GameConfig {
    /// Drilling duration for a material at a given raider level, or `None`
    /// if the material cannot be drilled (or the level's entry is zero).
    pub fn drill_duration_ms(&self, surface_type: SurfaceType, level: u8) -> Option<u32> {
        let idx = (level as usize).min(2);
        let table = match surface_type {
            SurfaceType::Dirt => &self.drill_durations.dirt,
            SurfaceType::LooseRock => &self.drill_durations.loose_rock,
            SurfaceType::HardRock => &self.drill_durations.hard_rock,
            SurfaceType::CrystalSeam | SurfaceType::OreSeam => &self.drill_durations.seam,
            _ => return None,
        };
        let ms = table[idx];
        if ms == 0 { None } else { Some(ms) }
    }

    /// Priority rank for scheduling: the index into `priorities`, or one
    /// past the end for unlisted identifiers so they sort last.
    pub fn priority_rank(&self, priority: PriorityIdentifier) -> usize {
        self.priorities
            .iter()
            .position(|p| *p == priority)
            .unwrap_or(self.priorities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = GameConfig::default();
        assert!(config.tile_size > 0.0);
        assert!(config.tick_duration_ms > 0);
        assert!(!config.priorities.is_empty());
        // Every listed priority appears exactly once.
        for p in &config.priorities {
            assert_eq!(config.priorities.iter().filter(|q| *q == p).count(), 1);
        }
    }

    #[test]
    fn drill_duration_by_material_and_level() {
        let config = GameConfig::default();
        let hard0 = config
            .drill_duration_ms(SurfaceType::HardRock, 0)
            .unwrap();
        let hard2 = config
            .drill_duration_ms(SurfaceType::HardRock, 2)
            .unwrap();
        assert!(hard2 < hard0, "higher level drills faster");
        // Levels beyond the table clamp to the last entry.
        assert_eq!(
            config.drill_duration_ms(SurfaceType::HardRock, 200),
            Some(hard2)
        );
        // Non-diggable materials cannot be drilled.
        assert_eq!(config.drill_duration_ms(SurfaceType::SolidRock, 2), None);
        assert_eq!(config.drill_duration_ms(SurfaceType::Ground, 0), None);
    }

    #[test]
    fn priority_rank_orders_and_defaults() {
        let config = GameConfig::default();
        let destruction = config.priority_rank(PriorityIdentifier::Destruction);
        let clearing = config.priority_rank(PriorityIdentifier::Clearing);
        assert!(destruction < clearing);

        let mut short = config.clone();
        short.priorities = vec![PriorityIdentifier::Clearing];
        // Unlisted priorities rank after every listed one.
        assert_eq!(short.priority_rank(PriorityIdentifier::Destruction), 1);
    }

    #[test]
    fn config_serialization_roundtrip() {
        let config = GameConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: GameConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.tile_size, restored.tile_size);
        assert_eq!(config.priorities, restored.priorities);
    }
}
