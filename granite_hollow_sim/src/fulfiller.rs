// Fulfillers — the mobile agents (raiders and vehicles) that execute jobs.
//
// A `Fulfiller` is one unit: a raider with tools, trainings, and an upgrade
// level, or a vehicle with a driver slot and capability flags. Per-unit job
// execution runs the IDLE → TRAVELING → WORKING loop driven by `sim.rs`;
// this module owns the unit data plus the movement stepping that TRAVELING
// uses.
//
// Movement advances along the active `TerrainPath` by
// `min(speed × Δt, action range)` per tick. When a step would reach an
// interior waypoint, the waypoint is popped and the leftover step budget is
// spent in the same tick, so per-tick distance traveled stays consistent
// regardless of waypoint spacing. Speed is modulated by the surface under
// the unit (power paths are fast, rubble is slow) and by carried load.
//
// A unit that is player-selected, mid-beam, or driving never progresses its
// state machine — selection pre-empts autonomous behavior without
// cancelling the job.
//
// See also: `job.rs` for qualification rules consuming the tool/training
// sets, `sim.rs` for the per-tick state machine driver, `pathfinding.rs`
// for `TerrainPath`.

use crate::config::GameConfig;
use crate::pathfinding::TerrainPath;
use crate::surface::SurfaceType;
use crate::terrain::Terrain;
use crate::types::{FulfillerId, JobId, MaterialId, WorldPos};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    Drill,
    Shovel,
    Hammer,
    Spanner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Training {
    Demolition,
    Driver,
}

/// Execution state of the per-unit loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillerState {
    Idle,
    Traveling,
    Working,
}

/// What kind of unit this is, with kind-specific payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FulfillerKind {
    Raider {
        tools: Vec<Tool>,
        trainings: Vec<Training>,
        /// Upgrade level; indexes the drill-duration tables.
        level: u8,
    },
    Vehicle {
        /// Vehicles accept no jobs until a driver sits in them.
        driver: Option<FulfillerId>,
        can_drill: bool,
        can_carry: bool,
    },
}

/// One mobile unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fulfiller {
    pub id: FulfillerId,
    pub kind: FulfillerKind,
    pub pos: WorldPos,
    pub state: FulfillerState,
    pub job: Option<JobId>,
    pub follow_up_job: Option<JobId>,
    pub path: Option<TerrainPath>,
    /// Remaining work on the current WORKING cycle.
    pub work_timer_ms: u32,
    pub carrying: Option<MaterialId>,
    pub selected: bool,
    /// Mid-teleport; suppresses the state machine like selection does.
    pub in_beam: bool,
    /// For raiders: the vehicle currently driven, if any.
    pub driving: Option<FulfillerId>,
    pub discovered: bool,
}

impl Fulfiller {
    /// A fresh raider. Every recruit arrives holding a drill.
    pub fn raider(id: FulfillerId, pos: WorldPos) -> Self {
        Self {
            id,
            kind: FulfillerKind::Raider {
                tools: vec![Tool::Drill],
                trainings: Vec::new(),
                level: 0,
            },
            pos,
            state: FulfillerState::Idle,
            job: None,
            follow_up_job: None,
            path: None,
            work_timer_ms: 0,
            carrying: None,
            selected: false,
            in_beam: false,
            driving: None,
            discovered: true,
        }
    }

    pub fn vehicle(id: FulfillerId, pos: WorldPos, can_drill: bool, can_carry: bool) -> Self {
        Self {
            id,
            kind: FulfillerKind::Vehicle {
                driver: None,
                can_drill,
                can_carry,
            },
            pos,
            state: FulfillerState::Idle,
            job: None,
            follow_up_job: None,
            path: None,
            work_timer_ms: 0,
            carrying: None,
            selected: false,
            in_beam: false,
            driving: None,
            discovered: true,
        }
    }

    pub fn is_vehicle(&self) -> bool {
        matches!(self.kind, FulfillerKind::Vehicle { .. })
    }

    pub fn has_tool(&self, tool: Tool) -> bool {
        match &self.kind {
            FulfillerKind::Raider { tools, .. } => tools.contains(&tool),
            FulfillerKind::Vehicle { .. } => false,
        }
    }

    pub fn has_training(&self, training: Training) -> bool {
        match &self.kind {
            FulfillerKind::Raider { trainings, .. } => trainings.contains(&training),
            FulfillerKind::Vehicle { .. } => false,
        }
    }

    /// Raider upgrade level; vehicles report 0.
    pub fn level(&self) -> u8 {
        match &self.kind {
            FulfillerKind::Raider { level, .. } => *level,
            FulfillerKind::Vehicle { .. } => 0,
        }
    }

    /// Whether the scheduler should consider this unit at all: idle, not
    /// pre-empted, and (for vehicles) crewed.
    pub fn wants_work(&self) -> bool {
        if self.job.is_some() || self.selected || self.in_beam || self.driving.is_some() {
            return false;
        }
        match &self.kind {
            FulfillerKind::Raider { .. } => true,
            FulfillerKind::Vehicle { driver, .. } => driver.is_some(),
        }
    }

    /// The state machine only runs while the unit is autonomous.
    pub fn is_autonomous(&self) -> bool {
        !self.selected && !self.in_beam && self.driving.is_none()
    }

    /// Current speed in world units per second, after terrain and load
    /// modifiers.
    pub fn speed(&self, config: &GameConfig, terrain: &Terrain) -> f32 {
        let base = match &self.kind {
            FulfillerKind::Raider { .. } => config.raider_speed,
            FulfillerKind::Vehicle { .. } => config.vehicle_speed,
        };
        let surface = terrain.get(self.pos.to_grid(config.tile_size));
        let mut speed = base;
        if surface.surface_type == SurfaceType::PowerPath {
            speed *= config.power_path_speed_coef;
        }
        if surface.surface_type.rubble_level() > 0 {
            speed *= config.rubble_speed_coef;
        }
        if self.carrying.is_some() {
            speed *= config.carry_speed_coef;
        }
        speed
    }

    /// Advance one tick along the active path. Returns true once the unit
    /// is inside the target's acceptance area; the path is dropped then.
    pub fn advance_along_path(&mut self, config: &GameConfig, terrain: &Terrain) -> bool {
        let per_tick =
            self.speed(config, terrain) * config.tick_duration_ms as f32 / 1000.0;
        let Some(path) = self.path.as_mut() else {
            return false;
        };
        if path.target.is_in_area(self.pos, config.job_action_range) {
            self.path = None;
            return true;
        }

        // Clamp to the action range so short final segments are never
        // overshot.
        let mut budget = per_tick.min(config.job_action_range);

        while budget > 0.0 {
            let Some(next) = path.waypoints.first().copied() else {
                break;
            };
            let dist = self.pos.distance(next);
            if path.waypoints.len() > 1 && dist <= budget {
                // Pop the waypoint and keep walking within this tick.
                self.pos = next;
                budget -= dist;
                path.waypoints.remove(0);
                continue;
            }
            let step = budget.min(dist);
            if dist > 0.0 {
                let f = step / dist;
                self.pos = WorldPos::new(
                    self.pos.x + (next.x - self.pos.x) * f,
                    self.pos.z + (next.z - self.pos.z) * f,
                );
            }
            break;
        }

        if path.target.is_in_area(self.pos, config.job_action_range) {
            self.path = None;
            return true;
        }
        false
    }

    /// Drop all job progress and stand down. Carried-material bookkeeping
    /// (the material's own position) is the sim's responsibility.
    pub fn reset_to_idle(&mut self) {
        self.state = FulfillerState::Idle;
        self.job = None;
        self.path = None;
        self.work_timer_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathfinding::PathTarget;
    use crate::surface::Surface;
    use granite_hollow_prng::GameRng;

    fn open_terrain(width: u32, height: u32) -> Terrain {
        let mut surfaces = Vec::new();
        for _ in 0..width * height {
            let mut s = Surface::new(SurfaceType::Ground);
            s.discovered = true;
            surfaces.push(s);
        }
        Terrain::new(width, height, surfaces)
    }

    fn raider_at(pos: WorldPos) -> Fulfiller {
        let mut rng = GameRng::new(1);
        Fulfiller::raider(FulfillerId::new(&mut rng), pos)
    }

    fn path_to(target: WorldPos, waypoints: Vec<WorldPos>) -> TerrainPath {
        TerrainPath {
            target: PathTarget::location(target),
            waypoints,
            length_sq: 0.0,
            computed_rev: 0,
        }
    }

    #[test]
    fn step_length_is_clamped_to_action_range() {
        let terrain = open_terrain(4, 1);
        let mut config = GameConfig::default();
        config.raider_speed = 10_000.0; // absurd speed
        let mut raider = raider_at(WorldPos::new(20.0, 20.0));
        let goal = WorldPos::new(140.0, 20.0);
        raider.path = Some(path_to(goal, vec![goal]));
        raider.advance_along_path(&config, &terrain);
        // Even at absurd speed, one tick moves at most the action range.
        assert!(raider.pos.x <= 20.0 + config.job_action_range + 1e-3);
    }

    #[test]
    fn waypoints_pop_within_one_tick() {
        let terrain = open_terrain(4, 1);
        let mut config = GameConfig::default();
        // 3 units per tick at 33ms ≈ 90.9/s.
        config.raider_speed = 3.0 * 1000.0 / config.tick_duration_ms as f32;
        config.job_action_range = 10.0; // above the per-tick budget: no clamp
        let mut raider = raider_at(WorldPos::new(0.0, 0.0));
        let goal = WorldPos::new(100.0, 0.0);
        // Dense waypoints 1 unit apart: a single tick must cross several.
        let waypoints = vec![
            WorldPos::new(1.0, 0.0),
            WorldPos::new(2.0, 0.0),
            WorldPos::new(3.0, 0.0),
            goal,
        ];
        raider.path = Some(path_to(goal, waypoints));
        raider.advance_along_path(&config, &terrain);
        // Full 3-unit budget spent despite the waypoint pops.
        assert!((raider.pos.x - 3.0).abs() < 1e-3);
        assert_eq!(raider.path.as_ref().unwrap().waypoints.len(), 1);
    }

    #[test]
    fn arrival_within_acceptance_radius() {
        let terrain = open_terrain(4, 1);
        let config = GameConfig::default();
        let mut raider = raider_at(WorldPos::new(20.0, 20.0));
        let goal = WorldPos::new(23.0, 20.0); // inside action range already
        raider.path = Some(path_to(goal, vec![goal]));
        assert!(raider.advance_along_path(&config, &terrain));
        assert!(raider.path.is_none());
    }

    #[test]
    fn rubble_slows_and_power_path_speeds() {
        let mut terrain = open_terrain(3, 1);
        let config = GameConfig::default();
        let raider = raider_at(WorldPos::new(20.0, 20.0));
        let base = raider.speed(&config, &terrain);

        terrain.get_mut(crate::types::GridCoord::new(0, 0)).unwrap().surface_type =
            SurfaceType::Rubble3;
        assert!(raider.speed(&config, &terrain) < base);

        terrain.get_mut(crate::types::GridCoord::new(0, 0)).unwrap().surface_type =
            SurfaceType::PowerPath;
        assert!(raider.speed(&config, &terrain) > base);
    }

    #[test]
    fn carrying_slows_movement() {
        let terrain = open_terrain(3, 1);
        let config = GameConfig::default();
        let mut rng = GameRng::new(2);
        let mut raider = raider_at(WorldPos::new(20.0, 20.0));
        let base = raider.speed(&config, &terrain);
        raider.carrying = Some(crate::types::MaterialId::new(&mut rng));
        assert!(raider.speed(&config, &terrain) < base);
    }

    #[test]
    fn vehicles_idle_without_driver() {
        let mut rng = GameRng::new(3);
        let mut vehicle =
            Fulfiller::vehicle(FulfillerId::new(&mut rng), WorldPos::new(0.0, 0.0), true, true);
        assert!(!vehicle.wants_work());
        let driver = FulfillerId::new(&mut rng);
        if let FulfillerKind::Vehicle { driver: slot, .. } = &mut vehicle.kind {
            *slot = Some(driver);
        }
        assert!(vehicle.wants_work());
    }

    #[test]
    fn selection_preempts_work_queries() {
        let mut raider = raider_at(WorldPos::new(0.0, 0.0));
        assert!(raider.wants_work());
        raider.selected = true;
        assert!(!raider.wants_work());
        assert!(!raider.is_autonomous());
        raider.selected = false;
        raider.in_beam = true;
        assert!(!raider.wants_work());
    }

    #[test]
    fn raider_tools_and_trainings() {
        let mut raider = raider_at(WorldPos::new(0.0, 0.0));
        assert!(raider.has_tool(Tool::Drill));
        assert!(!raider.has_tool(Tool::Shovel));
        assert!(!raider.has_training(Training::Demolition));
        if let FulfillerKind::Raider { trainings, .. } = &mut raider.kind {
            trainings.push(Training::Demolition);
        }
        assert!(raider.has_training(Training::Demolition));
    }
}
