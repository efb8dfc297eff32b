// Jobs — units of work with qualification rules, candidate workplaces, and
// a completion effect.
//
// Every job is one `Job` value with a tagged `JobKind` payload; kind
// dispatch is a plain `match` instead of an inheritance chain. The methods
// here are all *queries*: what the job needs, where it can be worked, how
// long a work cycle takes. Completion *effects* (terrain mutation, material
// spawn, training grants) live in `sim.rs`, which owns all the mutable
// state those effects touch.
//
// Queries that need world context take a `WorldView`: an explicit bundle of
// shared references into the sim state, passed by reference instead of
// reaching for ambient globals.
//
// Job lifecycle: INCOMPLETE → ASSIGNED → COMPLETE, or CANCELLED from either
// live state. Most kinds take exactly one fulfiller; clear-rubble accepts a
// bounded crew.
//
// See also: `supervisor.rs` for the pool and the assignment query,
// `fulfiller.rs` for the tool/training sets checked here, `sim.rs` for
// completion effects.

use crate::building::{Building, BuildingKind};
use crate::config::GameConfig;
use crate::fulfiller::{Fulfiller, FulfillerKind, Tool, Training};
use crate::material::{Material, MaterialKind};
use crate::pathfinding::PathTarget;
use crate::terrain::Terrain;
use crate::types::{BuildingId, FulfillerId, GridCoord, JobId, MaterialId, WorldPos};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Scheduling category. The level config ranks these; earlier wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityIdentifier {
    Train,
    GetTool,
    Crystal,
    Ore,
    Repair,
    Clearing,
    Destruction,
    Construction,
    Reinforce,
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// In the pool, waiting for a fulfiller.
    Incomplete,
    /// At least one fulfiller accepted it.
    Assigned,
    Complete,
    Cancelled,
}

/// What kind of work a job is, with kind-specific payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JobKind {
    /// Drill a wall until it collapses. Seam walls yield crystals/ore at
    /// intermediate steps.
    Drill { surface: GridCoord },
    /// Hammer braces into a wall so it never collapses or erodes.
    Reinforce { surface: GridCoord },
    /// Fetch a dynamite charge, place it at the wall, and run.
    Dynamite {
        surface: GridCoord,
        charge: MaterialId,
    },
    /// Shovel rubble down one level per work cycle until clear.
    ClearRubble { surface: GridCoord },
    /// Pick up a loose material and deposit it at an accepting building.
    Carry { item: MaterialId },
    /// Player-ordered walk; completes on arrival.
    MoveTo { location: WorldPos },
    /// Earn a training at a training camp.
    Train {
        building: BuildingId,
        training: Training,
    },
    /// Collect a tool from a tool station.
    GetTool { building: BuildingId, tool: Tool },
    /// Bring a damaged building back into service.
    Repair { building: BuildingId },
    /// Raise the raider's level at a tool station.
    Upgrade { building: BuildingId },
}

/// Shared references into sim state for job queries. Built fresh at each
/// call site from the fields of `SimState` — never stored.
pub struct WorldView<'a> {
    pub terrain: &'a Terrain,
    pub buildings: &'a BTreeMap<BuildingId, Building>,
    pub materials: &'a BTreeMap<MaterialId, Material>,
    pub config: &'a GameConfig,
}

/// A unit of work owned by the `JobSupervisor`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    /// Fulfillers currently on this job. The fulfiller is the authority on
    /// whether it is actively working; this is the back-reference.
    pub fulfillers: SmallVec<[FulfillerId; 2]>,
}

impl Job {
    pub fn new(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            state: JobState::Incomplete,
            fulfillers: SmallVec::new(),
        }
    }

    /// The surface this job is bound to, if any. Terrain mutations cancel
    /// all jobs bound to the mutated cell through this.
    pub fn surface(&self) -> Option<GridCoord> {
        match &self.kind {
            JobKind::Drill { surface }
            | JobKind::Reinforce { surface }
            | JobKind::Dynamite { surface, .. }
            | JobKind::ClearRubble { surface } => Some(*surface),
            _ => None,
        }
    }

    /// Scheduling category, or `None` for jobs that are only ever assigned
    /// directly to a specific unit (move orders, upgrades).
    pub fn priority(&self, view: &WorldView) -> Option<PriorityIdentifier> {
        match &self.kind {
            JobKind::Drill { .. } | JobKind::Dynamite { .. } => {
                Some(PriorityIdentifier::Destruction)
            }
            JobKind::Reinforce { .. } => Some(PriorityIdentifier::Reinforce),
            JobKind::ClearRubble { .. } => Some(PriorityIdentifier::Clearing),
            JobKind::Carry { item } => match view.materials.get(item).map(|m| m.kind) {
                Some(MaterialKind::Crystal) => Some(PriorityIdentifier::Crystal),
                Some(MaterialKind::Ore) | Some(MaterialKind::Brick) => {
                    Some(PriorityIdentifier::Ore)
                }
                _ => None,
            },
            JobKind::Repair { .. } => Some(PriorityIdentifier::Repair),
            JobKind::Train { .. } => Some(PriorityIdentifier::Train),
            JobKind::GetTool { .. } => Some(PriorityIdentifier::GetTool),
            JobKind::MoveTo { .. } | JobKind::Upgrade { .. } => None,
        }
    }

    /// How many fulfillers this job accepts at once.
    pub fn fulfiller_capacity(&self, config: &GameConfig) -> usize {
        match &self.kind {
            JobKind::ClearRubble { .. } => config.clear_rubble_worker_limit,
            _ => 1,
        }
    }

    /// Whether the job still makes sense against current world state. Jobs
    /// that fail this are pruned from the pool.
    pub fn is_valid(&self, view: &WorldView) -> bool {
        match &self.kind {
            JobKind::Drill { surface } => view.terrain.get(*surface).is_diggable(),
            JobKind::Reinforce { surface } => view.terrain.get(*surface).is_reinforcable(),
            JobKind::Dynamite { surface, charge } => {
                view.terrain.get(*surface).surface_type.is_explodable()
                    && view.materials.contains_key(charge)
            }
            JobKind::ClearRubble { surface } => view.terrain.get(*surface).has_rubble(),
            JobKind::Carry { item } => view
                .materials
                .get(item)
                .is_some_and(|m| m.discovered),
            JobKind::MoveTo { .. } => true,
            JobKind::Train { building, .. } => view
                .buildings
                .get(building)
                .is_some_and(|b| b.usable && b.kind == BuildingKind::TrainingCamp),
            JobKind::GetTool { building, .. } | JobKind::Upgrade { building } => view
                .buildings
                .get(building)
                .is_some_and(|b| b.usable && b.kind == BuildingKind::ToolStation),
            JobKind::Repair { building } => view
                .buildings
                .get(building)
                .is_some_and(|b| !b.usable),
        }
    }

    /// Tool, training, capability, and capacity checks for one candidate
    /// unit. Pure; reachability is the scheduler's concern.
    pub fn is_qualified(&self, fulfiller: &Fulfiller, view: &WorldView) -> bool {
        // A vehicle with no driver (or a raider who *is* driving) never
        // takes jobs directly.
        if fulfiller.driving.is_some() {
            return false;
        }
        if let FulfillerKind::Vehicle { driver, .. } = &fulfiller.kind {
            if driver.is_none() {
                return false;
            }
        }

        match &self.kind {
            JobKind::Drill { surface } => match &fulfiller.kind {
                FulfillerKind::Raider { .. } => {
                    fulfiller.has_tool(Tool::Drill)
                        && view
                            .config
                            .drill_duration_ms(
                                view.terrain.get(*surface).surface_type,
                                fulfiller.level(),
                            )
                            .is_some()
                }
                FulfillerKind::Vehicle { can_drill, .. } => *can_drill,
            },
            JobKind::Reinforce { .. } => fulfiller.has_tool(Tool::Hammer),
            JobKind::ClearRubble { .. } => fulfiller.has_tool(Tool::Shovel),
            JobKind::Dynamite { charge, .. } => {
                fulfiller.has_training(Training::Demolition)
                    && (fulfiller.carrying.is_none() || fulfiller.carrying == Some(*charge))
            }
            JobKind::Carry { item } => {
                let capable = match &fulfiller.kind {
                    FulfillerKind::Raider { .. } => true,
                    FulfillerKind::Vehicle { can_carry, .. } => *can_carry,
                };
                if !capable {
                    return false;
                }
                match fulfiller.carrying {
                    Some(carried) => carried == *item,
                    // Picking up only makes sense while somewhere accepts
                    // the delivery.
                    None => {
                        view.materials.get(item).is_some_and(|m| {
                            m.is_loose() && has_deposit_target(view, m.kind)
                        })
                    }
                }
            }
            JobKind::MoveTo { .. } => true,
            JobKind::Train { .. } | JobKind::GetTool { .. } => !fulfiller.is_vehicle(),
            JobKind::Upgrade { .. } => {
                !fulfiller.is_vehicle() && fulfiller.level() < view.config.max_raider_level
            }
            JobKind::Repair { .. } => fulfiller.has_tool(Tool::Spanner),
        }
    }

    /// Candidate workplaces for this job as seen by one fulfiller. May
    /// change as state evolves (carry jobs switch from the item to the
    /// deposit buildings once the item is picked up).
    pub fn workplaces(
        &self,
        view: &WorldView,
        fulfiller: &Fulfiller,
    ) -> SmallVec<[PathTarget; 4]> {
        let tile = view.config.tile_size;
        match &self.kind {
            JobKind::Drill { surface } | JobKind::Reinforce { surface } => {
                dig_positions(view.terrain, *surface, tile)
            }
            JobKind::Dynamite { surface, charge } => {
                if fulfiller.carrying == Some(*charge) {
                    dig_positions(view.terrain, *surface, tile)
                } else {
                    match view.materials.get(charge) {
                        Some(m) => {
                            let mut targets = SmallVec::new();
                            targets.push(PathTarget::location(m.pos));
                            targets
                        }
                        None => SmallVec::new(),
                    }
                }
            }
            JobKind::ClearRubble { surface } => {
                let mut targets = SmallVec::new();
                if view.terrain.get(*surface).has_rubble() {
                    let center = view.terrain.center_world(*surface, tile);
                    targets.push(
                        PathTarget::at_surface(center, *surface)
                            .with_radius_sq((tile / 2.0) * (tile / 2.0)),
                    );
                }
                targets
            }
            JobKind::Carry { item } => {
                let mut targets = SmallVec::new();
                let Some(material) = view.materials.get(item) else {
                    return targets;
                };
                if fulfiller.carrying == Some(*item) {
                    // Deposit phase: every usable accepting building is a
                    // candidate; the pathfinder picks the closest.
                    for kind in material.kind.deposit_building_kinds() {
                        for building in view.buildings.values() {
                            if building.kind == *kind && building.usable && building.discovered {
                                targets.push(building.workplace(view.terrain, tile));
                            }
                        }
                    }
                } else {
                    targets.push(PathTarget::location(material.pos));
                }
                targets
            }
            JobKind::MoveTo { location } => {
                let mut targets = SmallVec::new();
                targets.push(PathTarget::location(*location));
                targets
            }
            JobKind::Train { building, .. }
            | JobKind::GetTool { building, .. }
            | JobKind::Repair { building }
            | JobKind::Upgrade { building } => {
                let mut targets = SmallVec::new();
                if let Some(b) = view.buildings.get(building) {
                    targets.push(b.workplace(view.terrain, tile));
                }
                targets
            }
        }
    }

    /// Duration of one WORKING cycle for this job, for the given unit.
    pub fn work_duration_ms(&self, view: &WorldView, fulfiller: &Fulfiller) -> u32 {
        let config = view.config;
        match &self.kind {
            JobKind::Drill { surface } => config
                .drill_duration_ms(view.terrain.get(*surface).surface_type, fulfiller.level())
                .unwrap_or(0),
            JobKind::Reinforce { .. } => config.reinforce_duration_ms,
            JobKind::ClearRubble { .. } => config.clear_rubble_cycle_ms,
            JobKind::Dynamite { .. } | JobKind::Carry { .. } => config.pickup_duration_ms,
            JobKind::MoveTo { .. } | JobKind::GetTool { .. } => 0,
            JobKind::Train { .. } => config.train_duration_ms,
            JobKind::Repair { .. } => config.repair_duration_ms,
            JobKind::Upgrade { .. } => config.upgrade_duration_ms,
        }
    }
}

/// True if any usable, discovered building accepts this material.
fn has_deposit_target(view: &WorldView, kind: MaterialKind) -> bool {
    kind.deposit_building_kinds().iter().any(|accepting| {
        view.buildings
            .values()
            .any(|b| b.kind == *accepting && b.usable && b.discovered)
    })
}

/// Workplaces for wall jobs: the walkable orthogonal neighbors a unit can
/// stand on while working the wall.
fn dig_positions(
    terrain: &Terrain,
    surface: GridCoord,
    tile_size: f32,
) -> SmallVec<[PathTarget; 4]> {
    surface
        .orthogonal_neighbors()
        .into_iter()
        .filter(|n| terrain.is_walkable(*n))
        .map(|n| PathTarget::at_surface(terrain.center_world(n, tile_size), surface))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Surface, SurfaceType};
    use granite_hollow_prng::GameRng;

    struct Fixture {
        terrain: Terrain,
        buildings: BTreeMap<BuildingId, Building>,
        materials: BTreeMap<MaterialId, Material>,
        config: GameConfig,
        rng: GameRng,
    }

    impl Fixture {
        fn new() -> Self {
            let mut surfaces = Vec::new();
            for _ in 0..25 {
                let mut s = Surface::new(SurfaceType::Ground);
                s.discovered = true;
                surfaces.push(s);
            }
            Self {
                terrain: Terrain::new(5, 5, surfaces),
                buildings: BTreeMap::new(),
                materials: BTreeMap::new(),
                config: GameConfig::default(),
                rng: GameRng::new(77),
            }
        }

        fn view(&self) -> WorldView<'_> {
            WorldView {
                terrain: &self.terrain,
                buildings: &self.buildings,
                materials: &self.materials,
                config: &self.config,
            }
        }

        fn raider(&mut self) -> Fulfiller {
            Fulfiller::raider(FulfillerId::new(&mut self.rng), WorldPos::new(20.0, 20.0))
        }
    }

    #[test]
    fn drill_requires_tool_and_drillable_material() {
        let mut fx = Fixture::new();
        fx.terrain.get_mut(GridCoord::new(2, 2)).unwrap().surface_type = SurfaceType::HardRock;
        let job = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Drill {
                surface: GridCoord::new(2, 2),
            },
        );
        let raider = fx.raider();
        assert!(job.is_qualified(&raider, &fx.view()));

        let mut bare = fx.raider();
        if let FulfillerKind::Raider { tools, .. } = &mut bare.kind {
            tools.clear();
        }
        assert!(!job.is_qualified(&bare, &fx.view()));

        // A material with a zeroed drill table is not drillable at that level.
        let mut fx2 = Fixture::new();
        fx2.config.drill_durations.hard_rock = [0, 0, 4_800];
        fx2.terrain.get_mut(GridCoord::new(2, 2)).unwrap().surface_type = SurfaceType::HardRock;
        let raider = fx2.raider(); // level 0
        assert!(!job.is_qualified(&raider, &fx2.view()));
    }

    #[test]
    fn drill_workplaces_are_walkable_neighbors() {
        let mut fx = Fixture::new();
        fx.terrain.get_mut(GridCoord::new(2, 2)).unwrap().surface_type = SurfaceType::Dirt;
        // Block the west approach.
        fx.terrain.get_mut(GridCoord::new(1, 2)).unwrap().surface_type = SurfaceType::SolidRock;
        let job = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Drill {
                surface: GridCoord::new(2, 2),
            },
        );
        let raider = fx.raider();
        let places = job.workplaces(&fx.view(), &raider);
        assert_eq!(places.len(), 3);
        for p in &places {
            assert_eq!(p.surface, Some(GridCoord::new(2, 2)));
        }
    }

    #[test]
    fn carry_workplaces_switch_after_pickup() {
        let mut fx = Fixture::new();
        let material_id = MaterialId::new(&mut fx.rng);
        fx.materials.insert(
            material_id,
            Material::new(
                material_id,
                MaterialKind::Crystal,
                WorldPos::new(100.0, 100.0),
                true,
            ),
        );
        let station = BuildingId::new(&mut fx.rng);
        fx.buildings.insert(
            station,
            Building::new(station, BuildingKind::PowerStation, GridCoord::new(0, 0)),
        );
        let job = Job::new(JobId::new(&mut fx.rng), JobKind::Carry { item: material_id });

        let mut raider = fx.raider();
        let places = job.workplaces(&fx.view(), &raider);
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].location, WorldPos::new(100.0, 100.0));

        raider.carrying = Some(material_id);
        let places = job.workplaces(&fx.view(), &raider);
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].building, Some(station));
    }

    #[test]
    fn carry_qualification_needs_empty_hands() {
        let mut fx = Fixture::new();
        let material_id = MaterialId::new(&mut fx.rng);
        fx.materials.insert(
            material_id,
            Material::new(
                material_id,
                MaterialKind::Ore,
                WorldPos::new(60.0, 60.0),
                true,
            ),
        );
        let station = BuildingId::new(&mut fx.rng);
        fx.buildings.insert(
            station,
            Building::new(station, BuildingKind::ToolStation, GridCoord::new(0, 0)),
        );
        let job = Job::new(JobId::new(&mut fx.rng), JobKind::Carry { item: material_id });
        let mut raider = fx.raider();
        assert!(job.is_qualified(&raider, &fx.view()));
        raider.carrying = Some(MaterialId::new(&mut fx.rng));
        assert!(!job.is_qualified(&raider, &fx.view()));
        // Carrying the job's own item still qualifies (deposit phase).
        raider.carrying = Some(material_id);
        assert!(job.is_qualified(&raider, &fx.view()));
    }

    #[test]
    fn vehicles_need_driver_and_capability() {
        let mut fx = Fixture::new();
        let material_id = MaterialId::new(&mut fx.rng);
        fx.materials.insert(
            material_id,
            Material::new(
                material_id,
                MaterialKind::Ore,
                WorldPos::new(60.0, 60.0),
                true,
            ),
        );
        let refinery = BuildingId::new(&mut fx.rng);
        fx.buildings.insert(
            refinery,
            Building::new(refinery, BuildingKind::OreRefinery, GridCoord::new(0, 0)),
        );
        let job = Job::new(JobId::new(&mut fx.rng), JobKind::Carry { item: material_id });
        let mut vehicle = Fulfiller::vehicle(
            FulfillerId::new(&mut fx.rng),
            WorldPos::new(20.0, 20.0),
            false,
            true,
        );
        // No driver: disqualified regardless of capability.
        assert!(!job.is_qualified(&vehicle, &fx.view()));
        let driver = FulfillerId::new(&mut fx.rng);
        if let FulfillerKind::Vehicle { driver: slot, .. } = &mut vehicle.kind {
            *slot = Some(driver);
        }
        assert!(job.is_qualified(&vehicle, &fx.view()));
        // A hauler cannot drill.
        let drill = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Drill {
                surface: GridCoord::new(2, 2),
            },
        );
        assert!(!drill.is_qualified(&vehicle, &fx.view()));
    }

    #[test]
    fn validity_tracks_world_state() {
        let mut fx = Fixture::new();
        fx.terrain.get_mut(GridCoord::new(2, 2)).unwrap().surface_type = SurfaceType::Dirt;
        let drill = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Drill {
                surface: GridCoord::new(2, 2),
            },
        );
        assert!(drill.is_valid(&fx.view()));
        fx.terrain.get_mut(GridCoord::new(2, 2)).unwrap().surface_type = SurfaceType::Ground;
        assert!(!drill.is_valid(&fx.view()));

        let rubble = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::ClearRubble {
                surface: GridCoord::new(1, 1),
            },
        );
        assert!(!rubble.is_valid(&fx.view()));
        fx.terrain.get_mut(GridCoord::new(1, 1)).unwrap().surface_type = SurfaceType::Rubble2;
        assert!(rubble.is_valid(&fx.view()));
    }

    #[test]
    fn reinforce_invalid_once_reinforced() {
        let mut fx = Fixture::new();
        fx.terrain.get_mut(GridCoord::new(2, 2)).unwrap().surface_type = SurfaceType::LooseRock;
        let job = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Reinforce {
                surface: GridCoord::new(2, 2),
            },
        );
        assert!(job.is_valid(&fx.view()));
        fx.terrain.reinforce(GridCoord::new(2, 2));
        assert!(!job.is_valid(&fx.view()));
    }

    #[test]
    fn priorities_map_per_kind() {
        let mut fx = Fixture::new();
        let crystal_id = MaterialId::new(&mut fx.rng);
        fx.materials.insert(
            crystal_id,
            Material::new(
                crystal_id,
                MaterialKind::Crystal,
                WorldPos::new(0.0, 0.0),
                true,
            ),
        );
        let view = WorldView {
            terrain: &fx.terrain,
            buildings: &fx.buildings,
            materials: &fx.materials,
            config: &fx.config,
        };
        let drill = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Drill {
                surface: GridCoord::new(2, 2),
            },
        );
        assert_eq!(drill.priority(&view), Some(PriorityIdentifier::Destruction));
        let carry = Job::new(JobId::new(&mut fx.rng), JobKind::Carry { item: crystal_id });
        assert_eq!(carry.priority(&view), Some(PriorityIdentifier::Crystal));
        let mv = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::MoveTo {
                location: WorldPos::new(0.0, 0.0),
            },
        );
        assert_eq!(mv.priority(&view), None);
    }

    #[test]
    fn clear_rubble_takes_a_crew() {
        let mut fx = Fixture::new();
        let job = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::ClearRubble {
                surface: GridCoord::new(1, 1),
            },
        );
        assert_eq!(
            job.fulfiller_capacity(&fx.config),
            fx.config.clear_rubble_worker_limit
        );
        let drill = Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Drill {
                surface: GridCoord::new(2, 2),
            },
        );
        assert_eq!(drill.fulfiller_capacity(&fx.config), 1);
    }
}
