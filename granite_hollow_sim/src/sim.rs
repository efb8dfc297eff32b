// Core simulation state and tick loop.
//
// `SimState` is the single source of truth: it owns the terrain, the
// pathfinder, the job pool, every unit, material, and building, the erosion
// timers, the PRNG, and the config. One call to `step()` advances exactly
// one fixed timestep and returns the notifications the outside world should
// react to. There are no other entry points that mutate state.
//
// ## Phase order inside a tick
//
// The order is a correctness contract, not a convenience:
//
//   1. Inbound commands are applied.
//   2. Pending work-cycle effects from the previous entity phase are
//      applied. Drill completions collapse walls here, and collapse
//      cascades resolve to quiescence — including the clear-rubble and
//      carry jobs they spawn.
//   3. Terrain timers run: erosion, fall-ins, dynamite fuses. Like phase
//      2, these cancel jobs on a cell before mutating it.
//   4. The job pool is pruned of stale jobs, busy units are re-checked for
//      qualification, and idle units query for work. Because this runs
//      after phases 2–3, jobs spawned by this tick's cascades are matched
//      this tick.
//   5. Per-unit state machines advance: travel steps, work counters.
//      Work that finishes here is *queued* and its effect lands in the
//      next tick's phase 2 — the only ordering that keeps "cascades
//      resolve before assignment" true with a single pass per tick.
//
// Timers everywhere are counters carried across ticks; nothing blocks.
//
// ## Unit state machine (phase 5)
//
// IDLE → TRAVELING → WORKING → (complete | abort) → IDLE. Traveling units
// hold a `TerrainPath` and re-route when their workplace set or the
// terrain revision changes; a failed re-route is the mid-travel abort —
// the job returns to the pool and the unit idles, silently. Selected,
// mid-beam, and driving units are skipped entirely (pre-emption without
// cancellation).
//
// ## Save/load
//
// `SimState` serializes fully except the pathfinder cache, which rebuilds
// lazily (its cached revision never matches a live terrain's). `to_json`/
// `from_json` mirror the usual snapshot cycle; a snapshot resumed mid-run
// continues the identical random stream.
//
// See also: `job.rs`/`supervisor.rs` for the scheduling queries driven
// here, `terrain.rs` for single-cell mutation, `command.rs`/`event.rs`
// for the boundary types.
//
// **Critical constraint: determinism.** All state mutations flow through
// `step()`. Same seed, same level, same command script — same run.

use crate::building::{Building, BuildingKind};
use crate::command::SimCommand;
use crate::config::GameConfig;
use crate::erosion::LavaErosion;
use crate::event::{Notification, NotificationKind};
use crate::fulfiller::{Fulfiller, FulfillerKind, FulfillerState, Training};
use crate::job::{Job, JobKind, WorldView};
use crate::level::{LevelData, LevelError};
use crate::material::{Material, MaterialKind};
use crate::pathfinding::PathFinder;
use crate::supervisor::JobSupervisor;
use crate::surface::{Surface, SurfaceType};
use crate::terrain::Terrain;
use crate::types::{BuildingId, FulfillerId, GridCoord, JobId, MaterialId, WorldPos};
use granite_hollow_prng::GameRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The result of advancing the simulation one tick.
pub struct StepResult {
    /// Notifications emitted during this tick, for the outside world.
    pub notifications: Vec<Notification>,
}

/// Scalar summary for the persistence collaborator — it never needs full
/// simulation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub crystals: u32,
    pub ore: u32,
    pub bricks: u32,
    pub caverns_discovered: u32,
    pub remaining_diggables: u32,
}

/// Top-level simulation state. This is the entire game world.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimState {
    /// Current simulation tick.
    pub tick: u64,

    /// The simulation's deterministic PRNG.
    pub rng: GameRng,

    /// Game configuration. Mutable only through `SetPriorities`.
    pub config: GameConfig,

    pub terrain: Terrain,

    /// Route cache; transient, rebuilt lazily after deserialization.
    #[serde(skip)]
    pub pathfinder: PathFinder,

    pub supervisor: JobSupervisor,

    /// All units, keyed by ID. BTreeMap for deterministic iteration.
    pub fulfillers: BTreeMap<FulfillerId, Fulfiller>,
    pub materials: BTreeMap<MaterialId, Material>,
    pub buildings: BTreeMap<BuildingId, Building>,

    pub erosion: Vec<LavaErosion>,
    fall_in_timer_ms: u32,

    /// Work cycles finished in the previous entity phase, awaiting their
    /// effects in the next tick's phase 2.
    pending_cycles: Vec<(JobId, FulfillerId)>,

    pub crystals: u32,
    pub ore: u32,
    pub bricks: u32,
    pub caverns_discovered: u32,
}

impl SimState {
    /// Build a simulation from a level with the default config.
    pub fn new(seed: u64, level: &LevelData) -> Result<Self, LevelError> {
        Self::from_level(seed, GameConfig::default(), level)
    }

    /// Build a simulation from a validated level.
    pub fn from_level(
        seed: u64,
        mut config: GameConfig,
        level: &LevelData,
    ) -> Result<Self, LevelError> {
        level.validate()?;
        if let Some(priorities) = &level.priorities {
            config.priorities = priorities.clone();
        }

        let mut rng = GameRng::new(seed);

        let mut surfaces = Vec::with_capacity(level.surface_types.len());
        for t in &level.surface_types {
            let mut s = Surface::new(*t);
            if t.is_seam() {
                s.seam_level = config.seam_level_initial;
            }
            surfaces.push(s);
        }
        let mut terrain = Terrain::new(level.width, level.height, surfaces);
        for c in &level.contents {
            let s = terrain.get_mut(c.surface).expect("validated in bounds");
            s.contained_ore = c.ore;
            s.contained_crystals = c.crystals;
        }
        terrain.discover_from(level.start);

        let mut buildings = BTreeMap::new();
        for spec in &level.buildings {
            let id = BuildingId::new(&mut rng);
            let mut building = Building::new(id, spec.kind, spec.surface);
            building.discovered = terrain.get(spec.surface).discovered;
            buildings.insert(id, building);
        }

        let mut fulfillers = BTreeMap::new();
        for pos in &level.raiders {
            let id = FulfillerId::new(&mut rng);
            let mut raider = Fulfiller::raider(id, *pos);
            raider.discovered = terrain.get(pos.to_grid(config.tile_size)).discovered;
            fulfillers.insert(id, raider);
        }

        let erosion = level
            .erosion
            .iter()
            .map(|e| LavaErosion::new(e.surface, e.chance))
            .collect();

        Ok(Self {
            tick: 0,
            rng,
            config,
            terrain,
            pathfinder: PathFinder::new(),
            supervisor: JobSupervisor::new(),
            fulfillers,
            materials: BTreeMap::new(),
            buildings,
            erosion,
            fall_in_timer_ms: 0,
            pending_cycles: Vec::new(),
            crystals: 0,
            ore: 0,
            bricks: 0,
            caverns_discovered: 0,
        })
    }

    /// Advance the simulation by one fixed timestep.
    pub fn step(&mut self, commands: &[SimCommand]) -> StepResult {
        self.tick += 1;
        let mut out = Vec::new();

        for cmd in commands {
            self.apply_command(cmd, &mut out);
        }
        self.apply_pending_cycles(&mut out);
        self.update_erosion(&mut out);
        self.update_fall_ins(&mut out);
        self.update_dynamite_fuses(&mut out);
        self.maintain_job_pool(&mut out);
        self.assign_idle_fulfillers(&mut out);
        self.update_fulfillers(&mut out);

        StepResult { notifications: out }
    }

    pub fn score_summary(&self) -> ScoreSummary {
        ScoreSummary {
            crystals: self.crystals,
            ore: self.ore,
            bricks: self.bricks,
            caverns_discovered: self.caverns_discovered,
            remaining_diggables: self.terrain.remaining_diggables(),
        }
    }

    /// Serialize the simulation state to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a simulation state from a JSON string. The pathfinder
    /// cache rebuilds lazily on the first query.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    // -----------------------------------------------------------------------
    // Phase 1 — commands
    // -----------------------------------------------------------------------

    fn apply_command(&mut self, cmd: &SimCommand, out: &mut Vec<Notification>) {
        match cmd {
            SimCommand::CreateDrillJob { surface } => {
                self.create_surface_job(JobKind::Drill { surface: *surface }, out);
            }
            SimCommand::CreateReinforceJob { surface } => {
                self.create_surface_job(JobKind::Reinforce { surface: *surface }, out);
            }
            SimCommand::CreateClearRubbleJob { surface } => {
                self.create_surface_job(JobKind::ClearRubble { surface: *surface }, out);
            }
            SimCommand::CreateDynamiteJob { surface } => {
                self.create_dynamite_job(*surface, out);
            }
            SimCommand::CancelSurfaceJobs { surface } => {
                self.cancel_jobs_on_surface(*surface, out);
            }
            SimCommand::CreateCarryJob { item } => {
                let loose = self.materials.get(item).is_some_and(Material::is_loose);
                let duplicate = self.supervisor.jobs().any(
                    |j| matches!(&j.kind, JobKind::Carry { item: i } if i == item),
                );
                if loose && !duplicate {
                    let job = Job::new(JobId::new(&mut self.rng), JobKind::Carry { item: *item });
                    let id = self.supervisor.register(job);
                    out.push(Notification {
                        tick: self.tick,
                        kind: NotificationKind::JobCreated { job: id },
                    });
                }
            }
            SimCommand::SetBuildingUsable { building, usable } => {
                if let Some(b) = self.buildings.get_mut(building) {
                    b.usable = *usable;
                }
            }
            SimCommand::CreateRepairJob { building } => {
                let broken = self.buildings.get(building).is_some_and(|b| !b.usable);
                let duplicate = self.supervisor.jobs().any(
                    |j| matches!(&j.kind, JobKind::Repair { building: b } if b == building),
                );
                if broken && !duplicate {
                    let job = Job::new(
                        JobId::new(&mut self.rng),
                        JobKind::Repair {
                            building: *building,
                        },
                    );
                    let id = self.supervisor.register(job);
                    out.push(Notification {
                        tick: self.tick,
                        kind: NotificationKind::JobCreated { job: id },
                    });
                }
            }
            SimCommand::OrderMove {
                fulfiller,
                location,
            } => {
                let job = Job::new(
                    JobId::new(&mut self.rng),
                    JobKind::MoveTo {
                        location: *location,
                    },
                );
                self.assign_direct(*fulfiller, job, out);
            }
            SimCommand::TrainRaider { raider, training } => {
                let already = self
                    .fulfillers
                    .get(raider)
                    .is_none_or(|f| f.has_training(*training));
                if already {
                    return;
                }
                let near = self.fulfillers[raider].pos;
                let Some(camp) = self.nearest_usable_building(BuildingKind::TrainingCamp, near)
                else {
                    return;
                };
                let job = Job::new(
                    JobId::new(&mut self.rng),
                    JobKind::Train {
                        building: camp,
                        training: *training,
                    },
                );
                self.assign_direct(*raider, job, out);
            }
            SimCommand::CollectTool { raider, tool } => {
                let already = self
                    .fulfillers
                    .get(raider)
                    .is_none_or(|f| f.has_tool(*tool));
                if already {
                    return;
                }
                let near = self.fulfillers[raider].pos;
                let Some(station) = self.nearest_usable_building(BuildingKind::ToolStation, near)
                else {
                    return;
                };
                let job = Job::new(
                    JobId::new(&mut self.rng),
                    JobKind::GetTool {
                        building: station,
                        tool: *tool,
                    },
                );
                self.assign_direct(*raider, job, out);
            }
            SimCommand::UpgradeRaider { raider } => {
                let Some(near) = self.fulfillers.get(raider).map(|f| f.pos) else {
                    return;
                };
                let Some(station) = self.nearest_usable_building(BuildingKind::ToolStation, near)
                else {
                    return;
                };
                let job = Job::new(
                    JobId::new(&mut self.rng),
                    JobKind::Upgrade { building: station },
                );
                self.assign_direct(*raider, job, out);
            }
            SimCommand::SpawnRaider { position } => {
                let id = FulfillerId::new(&mut self.rng);
                let mut raider = Fulfiller::raider(id, *position);
                raider.discovered = self
                    .terrain
                    .get(position.to_grid(self.config.tile_size))
                    .discovered;
                self.fulfillers.insert(id, raider);
                out.push(Notification {
                    tick: self.tick,
                    kind: NotificationKind::FulfillerSpawned { fulfiller: id },
                });
            }
            SimCommand::SpawnVehicle {
                position,
                can_drill,
                can_carry,
            } => {
                let id = FulfillerId::new(&mut self.rng);
                let mut vehicle = Fulfiller::vehicle(id, *position, *can_drill, *can_carry);
                vehicle.discovered = self
                    .terrain
                    .get(position.to_grid(self.config.tile_size))
                    .discovered;
                self.fulfillers.insert(id, vehicle);
                out.push(Notification {
                    tick: self.tick,
                    kind: NotificationKind::FulfillerSpawned { fulfiller: id },
                });
            }
            SimCommand::AssignDriver { vehicle, raider } => {
                let raider_ok = self.fulfillers.get(raider).is_some_and(|r| {
                    !r.is_vehicle()
                        && r.has_training(Training::Driver)
                        && r.job.is_none()
                        && r.driving.is_none()
                        && !r.in_beam
                });
                let vehicle_ok = self.fulfillers.get(vehicle).is_some_and(
                    |v| matches!(&v.kind, FulfillerKind::Vehicle { driver: None, .. }),
                );
                if raider_ok && vehicle_ok {
                    if let Some(v) = self.fulfillers.get_mut(vehicle) {
                        if let FulfillerKind::Vehicle { driver, .. } = &mut v.kind {
                            *driver = Some(*raider);
                        }
                    }
                    if let Some(r) = self.fulfillers.get_mut(raider) {
                        r.driving = Some(*vehicle);
                    }
                }
            }
            SimCommand::SetSelected {
                fulfiller,
                selected,
            } => {
                if let Some(f) = self.fulfillers.get_mut(fulfiller) {
                    f.selected = *selected;
                }
            }
            SimCommand::SetInBeam { fulfiller, in_beam } => {
                if let Some(f) = self.fulfillers.get_mut(fulfiller) {
                    f.in_beam = *in_beam;
                }
            }
            SimCommand::SetPriorities { priorities } => {
                self.config.priorities = priorities.clone();
            }
        }
    }

    /// Register a surface job if it is valid and not a duplicate.
    fn create_surface_job(
        &mut self,
        kind: JobKind,
        out: &mut Vec<Notification>,
    ) -> Option<JobId> {
        if self.supervisor.has_duplicate(&kind) {
            return None;
        }
        let job = Job::new(JobId::new(&mut self.rng), kind);
        let valid = {
            let view = WorldView {
                terrain: &self.terrain,
                buildings: &self.buildings,
                materials: &self.materials,
                config: &self.config,
            };
            job.is_valid(&view)
        };
        if !valid {
            return None;
        }
        let id = self.supervisor.register(job);
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobCreated { job: id },
        });
        Some(id)
    }

    fn create_dynamite_job(&mut self, surface: GridCoord, out: &mut Vec<Notification>) {
        let cell = self.terrain.get(surface);
        if !cell.discovered || !cell.surface_type.is_explodable() {
            return;
        }
        let duplicate = self.supervisor.jobs().any(
            |j| matches!(&j.kind, JobKind::Dynamite { surface: s, .. } if *s == surface),
        );
        if duplicate {
            return;
        }
        // Charges come from the tool station closest to the blast site.
        let near = self.terrain.center_world(surface, self.config.tile_size);
        let Some(station) = self.nearest_usable_building(BuildingKind::ToolStation, near) else {
            return;
        };
        let station_pos = self
            .terrain
            .center_world(self.buildings[&station].primary, self.config.tile_size);
        let charge = self.spawn_material(MaterialKind::Dynamite, station_pos, out);
        if let Some(m) = self.materials.get_mut(&charge) {
            m.blast_surface = Some(surface);
        }
        let job = Job::new(
            JobId::new(&mut self.rng),
            JobKind::Dynamite { surface, charge },
        );
        let id = self.supervisor.register(job);
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobCreated { job: id },
        });
    }

    /// Register a job and hand it straight to one unit, bypassing the pool
    /// matching. The unit's current job (if any) aborts back to the pool.
    fn assign_direct(&mut self, fid: FulfillerId, job: Job, out: &mut Vec<Notification>) {
        let acceptable = {
            let Some(f) = self.fulfillers.get(&fid) else {
                return;
            };
            let view = WorldView {
                terrain: &self.terrain,
                buildings: &self.buildings,
                materials: &self.materials,
                config: &self.config,
            };
            job.is_valid(&view) && job.is_qualified(f, &view)
        };
        if !acceptable {
            return;
        }
        self.abort_fulfiller_job(fid, out);
        let job_id = job.id;
        self.supervisor.register(job);
        self.supervisor.assign(job_id, fid);
        if let Some(f) = self.fulfillers.get_mut(&fid) {
            f.job = Some(job_id);
            f.state = FulfillerState::Traveling;
            f.path = None;
        }
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobCreated { job: job_id },
        });
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobAssigned {
                job: job_id,
                fulfiller: fid,
            },
        });
    }

    // -----------------------------------------------------------------------
    // Phase 2 — pending work-cycle effects
    // -----------------------------------------------------------------------

    fn apply_pending_cycles(&mut self, out: &mut Vec<Notification>) {
        let pending = std::mem::take(&mut self.pending_cycles);
        for (job_id, fid) in pending {
            self.apply_cycle(job_id, fid, out);
        }
    }

    /// Apply the effect of one finished work cycle. Either the job loops
    /// (seam step, rubble step, pickup) or it completes.
    fn apply_cycle(&mut self, job_id: JobId, fid: FulfillerId, out: &mut Vec<Notification>) {
        // The job may have been cancelled since the cycle was queued; the
        // unit may have been pulled off it. Either way the cycle is void.
        let Some(job) = self.supervisor.get(job_id) else {
            return;
        };
        let kind = job.kind.clone();
        let still_on = self
            .fulfillers
            .get(&fid)
            .is_some_and(|f| f.job == Some(job_id));
        if !still_on {
            return;
        }

        match kind {
            JobKind::Drill { surface } => {
                let cell = *self.terrain.get(surface);
                if cell.surface_type.is_seam() && cell.seam_level > 0 {
                    // Seam step: one unit surfaces near the driller, the
                    // wall holds for another cycle.
                    let material_kind = if cell.surface_type == SurfaceType::CrystalSeam {
                        MaterialKind::Crystal
                    } else {
                        MaterialKind::Ore
                    };
                    if let Some(s) = self.terrain.get_mut(surface) {
                        s.seam_level -= 1;
                    }
                    let spread = self.config.tile_size / 4.0;
                    let fpos = self.fulfillers[&fid].pos;
                    let drop_pos = WorldPos::new(
                        fpos.x + self.rng.sign() * self.rng.range_f32(0.0, spread),
                        fpos.z + self.rng.sign() * self.rng.range_f32(0.0, spread),
                    );
                    self.spawn_material(material_kind, drop_pos, out);
                    self.restart_work_cycle(job_id, fid);
                } else {
                    self.complete_job(job_id, out);
                }
            }
            JobKind::ClearRubble { surface } => {
                let tile = self.config.tile_size;
                match self.terrain.reduce_rubble(surface, tile, &mut self.rng) {
                    None => {
                        // Rubble already gone (eroded, or another crew
                        // member's cycle landed first this phase).
                        self.complete_job(job_id, out);
                    }
                    Some(outcome) => {
                        out.push(Notification {
                            tick: self.tick,
                            kind: NotificationKind::SurfaceChanged {
                                surface,
                                surface_type: self.terrain.get(surface).surface_type,
                            },
                        });
                        for pos in outcome.ore_drops {
                            self.spawn_material(MaterialKind::Ore, pos, out);
                        }
                        if outcome.cleared {
                            self.complete_job(job_id, out);
                        } else {
                            self.restart_work_cycle(job_id, fid);
                        }
                    }
                }
            }
            JobKind::Carry { item } => {
                let carrying = self.fulfillers[&fid].carrying;
                if carrying == Some(item) {
                    // Deposit.
                    if let Some(f) = self.fulfillers.get_mut(&fid) {
                        f.carrying = None;
                    }
                    self.deposit_material(item, out);
                    self.complete_job(job_id, out);
                } else {
                    // Pickup.
                    self.pick_up(fid, item, out);
                }
            }
            JobKind::Dynamite { surface, charge } => {
                let carrying = self.fulfillers[&fid].carrying;
                if carrying == Some(charge) {
                    // Place the charge at the wall and light it.
                    let fpos = self.fulfillers[&fid].pos;
                    if let Some(m) = self.materials.get_mut(&charge) {
                        m.carried_by = None;
                        m.pos = fpos;
                        m.fuse_ms = Some(self.config.dynamite_fuse_ms);
                    }
                    if let Some(f) = self.fulfillers.get_mut(&fid) {
                        f.carrying = None;
                    }
                    out.push(Notification {
                        tick: self.tick,
                        kind: NotificationKind::DynamiteIgnited {
                            material: charge,
                            surface,
                        },
                    });
                    self.queue_flee_move(fid);
                    self.complete_job(job_id, out);
                } else {
                    self.pick_up(fid, charge, out);
                }
            }
            // Single-cycle kinds: the whole effect is in completion.
            JobKind::Reinforce { .. }
            | JobKind::MoveTo { .. }
            | JobKind::Train { .. }
            | JobKind::GetTool { .. }
            | JobKind::Repair { .. }
            | JobKind::Upgrade { .. } => {
                self.complete_job(job_id, out);
            }
        }
    }

    /// Shoulder a material. If it stopped being loose since the cycle was
    /// queued (someone else grabbed it), the job aborts.
    fn pick_up(&mut self, fid: FulfillerId, item: MaterialId, out: &mut Vec<Notification>) {
        let free = self
            .materials
            .get(&item)
            .is_some_and(|m| m.carried_by.is_none());
        if !free {
            self.abort_fulfiller_job(fid, out);
            return;
        }
        if let Some(m) = self.materials.get_mut(&item) {
            m.carried_by = Some(fid);
        }
        if let Some(f) = self.fulfillers.get_mut(&fid) {
            f.carrying = Some(item);
            // Back on the road: workplaces switch to the drop targets.
            f.state = FulfillerState::Traveling;
            f.path = None;
        }
    }

    fn deposit_material(&mut self, item: MaterialId, out: &mut Vec<Notification>) {
        let Some(material) = self.materials.remove(&item) else {
            return;
        };
        match material.kind {
            MaterialKind::Crystal => self.crystals += 1,
            MaterialKind::Ore => self.ore += 1,
            MaterialKind::Brick => self.bricks += 1,
            MaterialKind::Dynamite => {}
        }
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::MaterialAmountChanged {
                crystals: self.crystals,
                ore: self.ore,
            },
        });
    }

    /// Begin another WORKING cycle on the same job (seam steps, rubble
    /// steps).
    fn restart_work_cycle(&mut self, job_id: JobId, fid: FulfillerId) {
        let duration = {
            let Some(job) = self.supervisor.get(job_id) else {
                return;
            };
            let Some(f) = self.fulfillers.get(&fid) else {
                return;
            };
            let view = WorldView {
                terrain: &self.terrain,
                buildings: &self.buildings,
                materials: &self.materials,
                config: &self.config,
            };
            job.work_duration_ms(&view, f)
        };
        if let Some(f) = self.fulfillers.get_mut(&fid) {
            f.state = FulfillerState::Working;
            f.work_timer_ms = duration;
        }
    }

    /// After placing a charge, the placer gets a follow-up move order away
    /// from the blast — toward the nearest standing building, if there is
    /// one.
    fn queue_flee_move(&mut self, fid: FulfillerId) {
        let Some(fpos) = self.fulfillers.get(&fid).map(|f| f.pos) else {
            return;
        };
        let mut best: Option<(f32, WorldPos)> = None;
        for b in self.buildings.values() {
            if !b.usable || !b.discovered {
                continue;
            }
            let pos = self
                .terrain
                .center_world(b.primary, self.config.tile_size);
            let d = fpos.distance_sq(pos);
            if best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, pos));
            }
        }
        let Some((_, location)) = best else {
            return;
        };
        let job = Job::new(JobId::new(&mut self.rng), JobKind::MoveTo { location });
        let job_id = job.id;
        self.supervisor.register(job);
        self.supervisor.assign(job_id, fid);
        if let Some(f) = self.fulfillers.get_mut(&fid) {
            f.follow_up_job = Some(job_id);
        }
    }

    /// Apply a job's completion effects, remove it from the pool, and
    /// release its fulfillers (to their follow-up job, or to idle).
    fn complete_job(&mut self, job_id: JobId, out: &mut Vec<Notification>) {
        let Some(job) = self.supervisor.complete(job_id) else {
            return;
        };
        match &job.kind {
            JobKind::Drill { surface } => {
                self.collapse_surface(*surface, out);
            }
            JobKind::Reinforce { surface } => {
                if self.terrain.reinforce(*surface) {
                    out.push(Notification {
                        tick: self.tick,
                        kind: NotificationKind::SurfaceChanged {
                            surface: *surface,
                            surface_type: self.terrain.get(*surface).surface_type,
                        },
                    });
                }
            }
            JobKind::Train { training, .. } => {
                for fid in &job.fulfillers {
                    if let Some(f) = self.fulfillers.get_mut(fid) {
                        if let FulfillerKind::Raider { trainings, .. } = &mut f.kind {
                            if !trainings.contains(training) {
                                trainings.push(*training);
                            }
                        }
                    }
                    out.push(Notification {
                        tick: self.tick,
                        kind: NotificationKind::RaiderTrained {
                            fulfiller: *fid,
                            training: *training,
                        },
                    });
                }
            }
            JobKind::GetTool { tool, .. } => {
                for fid in &job.fulfillers {
                    if let Some(f) = self.fulfillers.get_mut(fid) {
                        if let FulfillerKind::Raider { tools, .. } = &mut f.kind {
                            if !tools.contains(tool) {
                                tools.push(*tool);
                            }
                        }
                    }
                    out.push(Notification {
                        tick: self.tick,
                        kind: NotificationKind::ToolCollected {
                            fulfiller: *fid,
                            tool: *tool,
                        },
                    });
                }
            }
            JobKind::Repair { building } => {
                if let Some(b) = self.buildings.get_mut(building) {
                    b.usable = true;
                }
            }
            JobKind::Upgrade { .. } => {
                let max = self.config.max_raider_level;
                for fid in &job.fulfillers {
                    if let Some(f) = self.fulfillers.get_mut(fid) {
                        if let FulfillerKind::Raider { level, .. } = &mut f.kind {
                            if *level < max {
                                *level += 1;
                            }
                            let new_level = *level;
                            out.push(Notification {
                                tick: self.tick,
                                kind: NotificationKind::RaiderUpgraded {
                                    fulfiller: *fid,
                                    level: new_level,
                                },
                            });
                        }
                    }
                }
            }
            // Effects already applied in the cycle (deposit, placement) or
            // none (move orders, final rubble step).
            JobKind::ClearRubble { .. }
            | JobKind::Carry { .. }
            | JobKind::Dynamite { .. }
            | JobKind::MoveTo { .. } => {}
        }
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobCompleted { job: job.id },
        });
        for fid in &job.fulfillers {
            self.release_fulfiller(*fid);
        }
    }

    /// Free a unit after its job completed: promote the follow-up job if
    /// one is queued and still live, otherwise stand down.
    fn release_fulfiller(&mut self, fid: FulfillerId) {
        let follow_up = {
            let Some(f) = self.fulfillers.get_mut(&fid) else {
                return;
            };
            f.job = None;
            f.path = None;
            f.work_timer_ms = 0;
            f.state = FulfillerState::Idle;
            f.follow_up_job.take()
        };
        if let Some(next) = follow_up {
            if self.supervisor.get(next).is_some() {
                if let Some(f) = self.fulfillers.get_mut(&fid) {
                    f.job = Some(next);
                    f.state = FulfillerState::Traveling;
                }
            }
        }
    }

    /// Abort a unit's current job: the unit idles (dropping any carried
    /// material where it stands) and the job returns to the pool.
    fn abort_fulfiller_job(&mut self, fid: FulfillerId, out: &mut Vec<Notification>) {
        let Some(f) = self.fulfillers.get_mut(&fid) else {
            return;
        };
        let Some(job_id) = f.job else {
            return;
        };
        let pos = f.pos;
        let carried = f.carrying.take();
        f.reset_to_idle();
        if let Some(mid) = carried {
            if let Some(m) = self.materials.get_mut(&mid) {
                m.carried_by = None;
                m.pos = pos;
            }
        }
        self.supervisor.unassign(job_id, fid);
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobAborted {
                job: job_id,
                fulfiller: fid,
            },
        });
    }

    /// Cancel a job outright and detach everyone working it.
    fn cancel_job(&mut self, job_id: JobId, out: &mut Vec<Notification>) {
        let Some(job) = self.supervisor.cancel(job_id) else {
            return;
        };
        self.detach_fulfillers(&job);
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobCancelled { job: job.id },
        });
    }

    fn detach_fulfillers(&mut self, job: &Job) {
        for fid in &job.fulfillers {
            let dropped = {
                let Some(f) = self.fulfillers.get_mut(fid) else {
                    continue;
                };
                if f.job != Some(job.id) {
                    continue;
                }
                let pos = f.pos;
                let carried = f.carrying.take();
                f.reset_to_idle();
                carried.map(|mid| (mid, pos))
            };
            if let Some((mid, pos)) = dropped {
                if let Some(m) = self.materials.get_mut(&mid) {
                    m.carried_by = None;
                    m.pos = pos;
                }
            }
        }
    }

    /// Cancel every job bound to a surface. Must run before the surface's
    /// semantics change.
    fn cancel_jobs_on_surface(&mut self, surface: GridCoord, out: &mut Vec<Notification>) {
        for job_id in self.supervisor.job_ids_on_surface(surface) {
            self.cancel_job(job_id, out);
        }
    }

    /// Collapse a wall and cascade into neighbors that lose support.
    ///
    /// Terminates structurally: each recursive call turns one wall into
    /// rubble (a floor), and floor cells are no-ops, so no cell can
    /// collapse twice.
    fn collapse_surface(&mut self, surface: GridCoord, out: &mut Vec<Notification>) {
        if !self.terrain.in_bounds(surface)
            || self.terrain.get(surface).surface_type.is_floor()
        {
            return;
        }
        // Jobs bound to the cell detach before its semantics change.
        self.cancel_jobs_on_surface(surface, out);

        let tile = self.config.tile_size;
        let Some(outcome) = self.terrain.collapse_cell(surface, tile, &mut self.rng) else {
            return;
        };
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::SurfaceChanged {
                surface,
                surface_type: SurfaceType::Rubble4,
            },
        });
        for c in &outcome.newly_discovered {
            out.push(Notification {
                tick: self.tick,
                kind: NotificationKind::SurfaceDiscovered { surface: *c },
            });
        }
        if outcome.new_cave {
            self.caverns_discovered += 1;
            out.push(Notification {
                tick: self.tick,
                kind: NotificationKind::CaveDiscovered { at: surface },
            });
        }
        self.reveal_entities(&outcome.newly_discovered, out);
        for pos in outcome.crystal_drops {
            self.spawn_material(MaterialKind::Crystal, pos, out);
        }
        for pos in outcome.ore_drops {
            self.spawn_material(MaterialKind::Ore, pos, out);
        }
        // The fresh rubble is itself work.
        self.create_surface_job(JobKind::ClearRubble { surface }, out);

        for neighbor in self.terrain.unsupported_wall_neighbors(surface) {
            self.collapse_surface(neighbor, out);
        }
    }

    /// Make units and materials standing on newly discovered cells visible,
    /// and queue carry jobs for materials that just came into view.
    fn reveal_entities(&mut self, cells: &[GridCoord], out: &mut Vec<Notification>) {
        if cells.is_empty() {
            return;
        }
        let tile = self.config.tile_size;
        let fulfiller_ids: Vec<FulfillerId> = self
            .fulfillers
            .iter()
            .filter(|(_, f)| !f.discovered && cells.contains(&f.pos.to_grid(tile)))
            .map(|(id, _)| *id)
            .collect();
        for id in fulfiller_ids {
            if let Some(f) = self.fulfillers.get_mut(&id) {
                f.discovered = true;
            }
            out.push(Notification {
                tick: self.tick,
                kind: NotificationKind::EntityDiscovered { fulfiller: id },
            });
        }
        let material_ids: Vec<MaterialId> = self
            .materials
            .iter()
            .filter(|(_, m)| !m.discovered && cells.contains(&m.pos.to_grid(tile)))
            .map(|(id, _)| *id)
            .collect();
        for id in material_ids {
            let kind = {
                let m = self.materials.get_mut(&id).expect("collected above");
                m.discovered = true;
                m.kind
            };
            out.push(Notification {
                tick: self.tick,
                kind: NotificationKind::MaterialSpawned { material: id, kind },
            });
            self.queue_carry_job(id, kind, out);
        }
        for b in self.buildings.values_mut() {
            if !b.discovered && cells.contains(&b.primary) {
                b.discovered = true;
            }
        }
    }

    /// Create a material in the world. Visible depositables get a carry job
    /// right away; hidden ones wait for discovery.
    fn spawn_material(
        &mut self,
        kind: MaterialKind,
        pos: WorldPos,
        out: &mut Vec<Notification>,
    ) -> MaterialId {
        let id = MaterialId::new(&mut self.rng);
        let discovered = self
            .terrain
            .get(pos.to_grid(self.config.tile_size))
            .discovered;
        self.materials
            .insert(id, Material::new(id, kind, pos, discovered));
        if discovered {
            out.push(Notification {
                tick: self.tick,
                kind: NotificationKind::MaterialSpawned { material: id, kind },
            });
            self.queue_carry_job(id, kind, out);
        }
        id
    }

    fn queue_carry_job(&mut self, item: MaterialId, kind: MaterialKind, out: &mut Vec<Notification>) {
        if kind.deposit_building_kinds().is_empty() {
            return;
        }
        let job = Job::new(JobId::new(&mut self.rng), JobKind::Carry { item });
        let id = self.supervisor.register(job);
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobCreated { job: id },
        });
    }

    // -----------------------------------------------------------------------
    // Phase 3 — terrain timers
    // -----------------------------------------------------------------------

    fn update_erosion(&mut self, out: &mut Vec<Notification>) {
        let elapsed = self.config.tick_duration_ms;
        for i in 0..self.erosion.len() {
            let advance = {
                let entry = &mut self.erosion[i];
                entry.update(&self.terrain, &self.config, elapsed, &mut self.rng)
            };
            if let Some(new_type) = advance {
                let coord = self.erosion[i].coord;
                self.cancel_jobs_on_surface(coord, out);
                self.terrain.apply_erosion(coord, new_type);
                out.push(Notification {
                    tick: self.tick,
                    kind: NotificationKind::SurfaceChanged {
                        surface: coord,
                        surface_type: new_type,
                    },
                });
            }
        }
    }

    fn update_fall_ins(&mut self, out: &mut Vec<Notification>) {
        let interval = self.config.fall_in_interval_ms;
        if interval == 0 {
            return;
        }
        self.fall_in_timer_ms += self.config.tick_duration_ms;
        while self.fall_in_timer_ms >= interval {
            self.fall_in_timer_ms -= interval;
            self.trigger_fall_in(out);
        }
    }

    /// Pick a random wall adjacent to the discovered walkable area and drop
    /// it. Reinforced walls are never candidates.
    fn trigger_fall_in(&mut self, out: &mut Vec<Notification>) {
        let coords: Vec<GridCoord> = self.terrain.coords().collect();
        let mut origins: Vec<GridCoord> = Vec::new();
        for coord in coords {
            if !self.terrain.is_walkable(coord) {
                continue;
            }
            if let Some(origin) = self.terrain.fall_in_origin(coord) {
                if !origins.contains(&origin) {
                    origins.push(origin);
                }
            }
        }
        if origins.is_empty() {
            return;
        }
        let origin = origins[self.rng.range_usize(0, origins.len())];
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::FallIn { surface: origin },
        });
        self.collapse_surface(origin, out);
    }

    fn update_dynamite_fuses(&mut self, out: &mut Vec<Notification>) {
        let elapsed = self.config.tick_duration_ms;
        let ids: Vec<MaterialId> = self
            .materials
            .iter()
            .filter(|(_, m)| m.fuse_ms.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let blast = {
                let m = self.materials.get_mut(&id).expect("collected above");
                let fuse = m.fuse_ms.expect("filtered on fuse");
                if fuse > elapsed {
                    m.fuse_ms = Some(fuse - elapsed);
                    None
                } else {
                    Some(m.blast_surface)
                }
            };
            if let Some(blast_surface) = blast {
                self.materials.remove(&id);
                if let Some(surface) = blast_surface {
                    self.collapse_surface(surface, out);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase 4 — job pool maintenance + assignment
    // -----------------------------------------------------------------------

    fn maintain_job_pool(&mut self, out: &mut Vec<Notification>) {
        let removed = {
            let view = WorldView {
                terrain: &self.terrain,
                buildings: &self.buildings,
                materials: &self.materials,
                config: &self.config,
            };
            self.supervisor.prune_invalid(&view)
        };
        for job in removed {
            self.detach_fulfillers(&job);
            out.push(Notification {
                tick: self.tick,
                kind: NotificationKind::JobCancelled { job: job.id },
            });
        }
    }

    fn assign_idle_fulfillers(&mut self, out: &mut Vec<Notification>) {
        let ids: Vec<FulfillerId> = self.fulfillers.keys().copied().collect();
        for id in ids {
            let current = self.fulfillers.get(&id).and_then(|f| f.job);
            if let Some(job_id) = current {
                // Qualification re-check: a unit that lost its tool (or a
                // vehicle that lost its driver) aborts here.
                let still_qualified = {
                    let f = self.fulfillers.get(&id).expect("iterating known ids");
                    let view = WorldView {
                        terrain: &self.terrain,
                        buildings: &self.buildings,
                        materials: &self.materials,
                        config: &self.config,
                    };
                    self.supervisor
                        .get(job_id)
                        .is_some_and(|j| j.is_qualified(f, &view))
                };
                if !still_qualified {
                    self.abort_fulfiller_job(id, out);
                }
                continue;
            }
            let wants = self
                .fulfillers
                .get(&id)
                .is_some_and(Fulfiller::wants_work);
            if !wants {
                continue;
            }
            let found = {
                let f = self.fulfillers.get(&id).expect("iterating known ids");
                let view = WorldView {
                    terrain: &self.terrain,
                    buildings: &self.buildings,
                    materials: &self.materials,
                    config: &self.config,
                };
                self.supervisor
                    .find_job_for(f, &view, &mut self.pathfinder)
            };
            if let Some(job_id) = found {
                self.supervisor.assign(job_id, id);
                if let Some(f) = self.fulfillers.get_mut(&id) {
                    f.job = Some(job_id);
                    f.state = FulfillerState::Traveling;
                    f.path = None;
                }
                out.push(Notification {
                    tick: self.tick,
                    kind: NotificationKind::JobAssigned {
                        job: job_id,
                        fulfiller: id,
                    },
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase 5 — per-unit state machines
    // -----------------------------------------------------------------------

    fn update_fulfillers(&mut self, out: &mut Vec<Notification>) {
        let ids: Vec<FulfillerId> = self.fulfillers.keys().copied().collect();
        for id in ids {
            // Take the unit out of the map so its update can borrow the
            // rest of the state freely.
            let Some(mut f) = self.fulfillers.remove(&id) else {
                continue;
            };
            self.update_one_fulfiller(&mut f, out);
            self.fulfillers.insert(id, f);
        }
    }

    fn update_one_fulfiller(&mut self, f: &mut Fulfiller, out: &mut Vec<Notification>) {
        if !f.is_autonomous() {
            return;
        }
        let Some(job_id) = f.job else {
            f.state = FulfillerState::Idle;
            return;
        };
        if self.supervisor.get(job_id).is_none() {
            f.reset_to_idle();
            return;
        }

        match f.state {
            FulfillerState::Idle | FulfillerState::Traveling => {
                f.state = FulfillerState::Traveling;
                let (places, duration) = {
                    let job = self.supervisor.get(job_id).expect("checked above");
                    let view = WorldView {
                        terrain: &self.terrain,
                        buildings: &self.buildings,
                        materials: &self.materials,
                        config: &self.config,
                    };
                    (job.workplaces(&view, f), job.work_duration_ms(&view, f))
                };
                if places.is_empty() {
                    self.abort_job_of(f, out);
                    return;
                }
                let path_current = f.path.as_ref().is_some_and(|p| {
                    p.computed_rev == self.terrain.walkability_rev
                        && places.iter().any(|t| t.location == p.target.location)
                });
                if !path_current {
                    f.path = self.pathfinder.find_path_to_closest(
                        &self.terrain,
                        self.config.tile_size,
                        f.pos,
                        &places,
                    );
                    if f.path.is_none() {
                        // Mid-travel unreachability: give up, go idle; the
                        // job is back in the pool for a later tick.
                        self.abort_job_of(f, out);
                        return;
                    }
                }
                if f.advance_along_path(&self.config, &self.terrain) {
                    f.state = FulfillerState::Working;
                    f.work_timer_ms = duration;
                    if duration == 0 {
                        // Instant work (move orders, tool pickup).
                        self.pending_cycles.push((job_id, f.id));
                    }
                }
            }
            FulfillerState::Working => {
                if f.work_timer_ms == 0 {
                    // Cycle already queued; effects land next tick.
                    return;
                }
                let elapsed = self.config.tick_duration_ms;
                if f.work_timer_ms > elapsed {
                    f.work_timer_ms -= elapsed;
                } else {
                    f.work_timer_ms = 0;
                    self.pending_cycles.push((job_id, f.id));
                }
            }
        }
    }

    /// Abort for a unit currently outside the registry (entity phase).
    fn abort_job_of(&mut self, f: &mut Fulfiller, out: &mut Vec<Notification>) {
        let Some(job_id) = f.job else {
            return;
        };
        let pos = f.pos;
        let carried = f.carrying.take();
        f.reset_to_idle();
        if let Some(mid) = carried {
            if let Some(m) = self.materials.get_mut(&mid) {
                m.carried_by = None;
                m.pos = pos;
            }
        }
        self.supervisor.unassign(job_id, f.id);
        out.push(Notification {
            tick: self.tick,
            kind: NotificationKind::JobAborted {
                job: job_id,
                fulfiller: f.id,
            },
        });
    }

    fn nearest_usable_building(
        &self,
        kind: BuildingKind,
        near: WorldPos,
    ) -> Option<BuildingId> {
        let mut best: Option<(f32, BuildingId)> = None;
        for b in self.buildings.values() {
            if b.kind != kind || !b.usable || !b.discovered {
                continue;
            }
            let pos = self
                .terrain
                .center_world(b.primary, self.config.tile_size);
            let d = near.distance_sq(pos);
            if best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, b.id));
            }
        }
        best.map(|(_, id)| id)
    }
}
