// JobSupervisor — the outstanding-job pool and the assignment query.
//
// The supervisor owns every live job in a `BTreeMap<JobId, Job>` so pool
// scans run in deterministic ID order. Matching an idle fulfiller works in
// two passes:
//
//   1. Filter to open jobs the unit is qualified for that have at least one
//      workplace, and score each with `(priority rank, straight-line
//      distance to the nearest workplace)`.
//   2. Walk the scored candidates best-first and take the first with a
//      *reachable* workplace. Reachability short-circuits on the first
//      route found rather than comparing full paths — pathfinding is the
//      expensive part, so it runs only on the jobs that could actually win.
//
// Priority class always beats distance: a destruction job across the cavern
// outranks rubble at the unit's feet if the config says so. Equal scores
// fall back to pool order (stable sort), keeping assignment reproducible.
//
// State bookkeeping invariant: an ASSIGNED job is referenced by at most
// `fulfiller_capacity` units; losing the last unit puts it back to
// INCOMPLETE. Completion and cancellation *remove* the job from the pool
// and hand it back to the caller, which applies effects and releases units
// — the supervisor never touches fulfiller or terrain state itself.
//
// See also: `job.rs` for the queries used here, `sim.rs` for the
// assignment phase that drives `find_job_for` once per idle unit per tick.

use crate::fulfiller::Fulfiller;
use crate::job::{Job, JobKind, JobState, WorldView};
use crate::pathfinding::{PathFinder, PathTarget};
use crate::types::{FulfillerId, GridCoord, JobId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobSupervisor {
    jobs: BTreeMap<JobId, Job>,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.insert(id, job);
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// True if the pool already holds a live job of the same kind on the
    /// same surface — creation requests for duplicates are rejected.
    pub fn has_duplicate(&self, kind: &JobKind) -> bool {
        let surface = surface_of_kind(kind);
        if surface.is_none() {
            return false;
        }
        self.jobs.values().any(|j| {
            j.surface() == surface
                && std::mem::discriminant(&j.kind) == std::mem::discriminant(kind)
        })
    }

    pub fn job_ids_on_surface(&self, surface: GridCoord) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.surface() == Some(surface))
            .map(|j| j.id)
            .collect()
    }

    /// Remove a job from the pool as cancelled. Returns the job with its
    /// state already flipped so the caller can release its fulfillers.
    pub fn cancel(&mut self, id: JobId) -> Option<Job> {
        let mut job = self.jobs.remove(&id)?;
        job.state = JobState::Cancelled;
        Some(job)
    }

    /// Remove a job from the pool as completed.
    pub fn complete(&mut self, id: JobId) -> Option<Job> {
        let mut job = self.jobs.remove(&id)?;
        job.state = JobState::Complete;
        Some(job)
    }

    /// Drop every job that no longer makes sense against world state.
    /// Returns the removed jobs (as cancelled) for fulfiller release.
    pub fn prune_invalid(&mut self, view: &WorldView) -> Vec<Job> {
        let dead: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| !j.is_valid(view))
            .map(|j| j.id)
            .collect();
        dead.into_iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Record that a fulfiller accepted a job.
    pub fn assign(&mut self, id: JobId, fulfiller: FulfillerId) {
        if let Some(job) = self.jobs.get_mut(&id) {
            if !job.fulfillers.contains(&fulfiller) {
                job.fulfillers.push(fulfiller);
            }
            job.state = JobState::Assigned;
        }
    }

    /// Detach a fulfiller from a job, returning it to the pool if nobody is
    /// left on it.
    pub fn unassign(&mut self, id: JobId, fulfiller: FulfillerId) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.fulfillers.retain(|f| *f != fulfiller);
            if job.fulfillers.is_empty() && job.state == JobState::Assigned {
                job.state = JobState::Incomplete;
            }
        }
    }

    /// The assignment query: best job for one idle unit, or `None`.
    ///
    /// Selection order is priority class first (configured rank), then
    /// nearest-workplace straight-line distance, then pool order.
    /// Reachability is verified best-first with short-circuiting.
    pub fn find_job_for(
        &self,
        fulfiller: &Fulfiller,
        view: &WorldView,
        pathfinder: &mut PathFinder,
    ) -> Option<JobId> {
        struct Candidate {
            rank: usize,
            dist_sq: f32,
            id: JobId,
            places: SmallVec<[PathTarget; 4]>,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for job in self.jobs.values() {
            let open = match job.state {
                JobState::Incomplete => true,
                // Multi-worker jobs stay matchable until their crew is full.
                JobState::Assigned => {
                    job.fulfillers.len() < job.fulfiller_capacity(view.config)
                }
                _ => false,
            };
            if !open {
                continue;
            }
            let Some(priority) = job.priority(view) else {
                continue; // direct-assignment-only job
            };
            if !job.is_valid(view) || !job.is_qualified(fulfiller, view) {
                continue;
            }
            let places = job.workplaces(view, fulfiller);
            if places.is_empty() {
                continue;
            }
            let dist_sq = places
                .iter()
                .map(|t| fulfiller.pos.distance_sq(t.location))
                .fold(f32::INFINITY, f32::min);
            candidates.push(Candidate {
                rank: view.config.priority_rank(priority),
                dist_sq,
                id: job.id,
                places,
            });
        }

        // Stable sort: equal scores keep deterministic pool order.
        candidates.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then_with(|| a.dist_sq.total_cmp(&b.dist_sq))
        });

        candidates
            .into_iter()
            .find(|c| {
                pathfinder.any_reachable(
                    view.terrain,
                    view.config.tile_size,
                    fulfiller.pos,
                    &c.places,
                )
            })
            .map(|c| c.id)
    }
}

/// Surface a `JobKind` is bound to, without constructing a job.
fn surface_of_kind(kind: &JobKind) -> Option<GridCoord> {
    match kind {
        JobKind::Drill { surface }
        | JobKind::Reinforce { surface }
        | JobKind::Dynamite { surface, .. }
        | JobKind::ClearRubble { surface } => Some(*surface),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::building::Building;
    use crate::config::GameConfig;
    use crate::fulfiller::{FulfillerKind, Tool};
    use crate::job::PriorityIdentifier;
    use crate::material::Material;
    use crate::surface::{Surface, SurfaceType};
    use crate::types::{BuildingId, MaterialId, WorldPos};
    use granite_hollow_prng::GameRng;

    struct Fixture {
        terrain: crate::terrain::Terrain,
        buildings: BTreeMap<BuildingId, Building>,
        materials: BTreeMap<MaterialId, Material>,
        config: GameConfig,
        supervisor: JobSupervisor,
        pathfinder: PathFinder,
        rng: GameRng,
    }

    impl Fixture {
        fn new(width: u32, height: u32) -> Self {
            let mut surfaces = Vec::new();
            for _ in 0..width * height {
                let mut s = Surface::new(SurfaceType::Ground);
                s.discovered = true;
                surfaces.push(s);
            }
            Self {
                terrain: crate::terrain::Terrain::new(width, height, surfaces),
                buildings: BTreeMap::new(),
                materials: BTreeMap::new(),
                config: GameConfig::default(),
                supervisor: JobSupervisor::new(),
                pathfinder: PathFinder::new(),
                rng: GameRng::new(123),
            }
        }

        fn wall(&mut self, x: i32, y: i32, t: SurfaceType) {
            self.terrain.get_mut(GridCoord::new(x, y)).unwrap().surface_type = t;
        }

        fn add_drill_job(&mut self, x: i32, y: i32) -> JobId {
            let job = Job::new(
                JobId::new(&mut self.rng),
                JobKind::Drill {
                    surface: GridCoord::new(x, y),
                },
            );
            self.supervisor.register(job)
        }

        fn add_clear_job(&mut self, x: i32, y: i32) -> JobId {
            let job = Job::new(
                JobId::new(&mut self.rng),
                JobKind::ClearRubble {
                    surface: GridCoord::new(x, y),
                },
            );
            self.supervisor.register(job)
        }

        fn raider_with_tools(&mut self, pos: WorldPos, tools: &[Tool]) -> Fulfiller {
            let mut raider = Fulfiller::raider(crate::types::FulfillerId::new(&mut self.rng), pos);
            if let FulfillerKind::Raider { tools: t, .. } = &mut raider.kind {
                *t = tools.to_vec();
            }
            raider
        }

        fn find(&mut self, raider: &Fulfiller) -> Option<JobId> {
            let view = WorldView {
                terrain: &self.terrain,
                buildings: &self.buildings,
                materials: &self.materials,
                config: &self.config,
            };
            self.supervisor.find_job_for(raider, &view, &mut self.pathfinder)
        }
    }

    #[test]
    fn higher_priority_beats_nearer_job() {
        let mut fx = Fixture::new(9, 9);
        // Rubble right next to the raider, drill wall far away.
        fx.wall(1, 0, SurfaceType::Rubble2);
        fx.wall(8, 8, SurfaceType::HardRock);
        let clear = fx.add_clear_job(1, 0);
        let drill = fx.add_drill_job(8, 8);
        assert!(
            fx.config.priority_rank(PriorityIdentifier::Destruction)
                < fx.config.priority_rank(PriorityIdentifier::Clearing)
        );
        let raider = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Drill, Tool::Shovel]);
        // Destruction outranks clearing regardless of distance.
        assert_eq!(fx.find(&raider), Some(drill));

        // Without a drill the clearing job wins.
        let shoveler = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Shovel]);
        assert_eq!(fx.find(&shoveler), Some(clear));
    }

    #[test]
    fn same_priority_falls_back_to_distance() {
        let mut fx = Fixture::new(9, 1);
        fx.wall(2, 0, SurfaceType::Dirt);
        fx.wall(8, 0, SurfaceType::Dirt);
        let near = fx.add_drill_job(2, 0);
        let _far = fx.add_drill_job(8, 0);
        let raider = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Drill]);
        assert_eq!(fx.find(&raider), Some(near));
    }

    #[test]
    fn unreachable_jobs_are_skipped() {
        let mut fx = Fixture::new(9, 1);
        // A solid wall at x=4 seals the east end; the drill wall at x=8 has
        // its only approach on the sealed side.
        fx.wall(4, 0, SurfaceType::SolidRock);
        fx.wall(8, 0, SurfaceType::Dirt);
        fx.wall(2, 0, SurfaceType::Dirt);
        let east = fx.add_drill_job(8, 0);
        let west = fx.add_drill_job(2, 0);
        let raider = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Drill]);
        let found = fx.find(&raider);
        assert_eq!(found, Some(west));
        assert_ne!(found, Some(east));
    }

    #[test]
    fn disqualified_jobs_are_invisible() {
        let mut fx = Fixture::new(5, 5);
        fx.wall(2, 2, SurfaceType::Dirt);
        fx.add_drill_job(2, 2);
        let bare = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[]);
        assert_eq!(fx.find(&bare), None);
    }

    #[test]
    fn assigned_single_worker_job_leaves_the_pool() {
        let mut fx = Fixture::new(5, 5);
        fx.wall(2, 2, SurfaceType::Dirt);
        let drill = fx.add_drill_job(2, 2);
        let raider = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Drill]);
        assert_eq!(fx.find(&raider), Some(drill));
        fx.supervisor.assign(drill, raider.id);
        // Another identical raider no longer sees the job.
        let second = fx.raider_with_tools(WorldPos::new(60.0, 20.0), &[Tool::Drill]);
        assert_eq!(fx.find(&second), None);
        // Unassigning returns it to the pool.
        fx.supervisor.unassign(drill, raider.id);
        assert_eq!(fx.supervisor.get(drill).unwrap().state, JobState::Incomplete);
        assert_eq!(fx.find(&second), Some(drill));
    }

    #[test]
    fn clear_rubble_accepts_a_crew_up_to_capacity() {
        let mut fx = Fixture::new(5, 5);
        fx.config.clear_rubble_worker_limit = 2;
        fx.wall(2, 2, SurfaceType::Rubble4);
        let clear = fx.add_clear_job(2, 2);
        let a = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Shovel]);
        let b = fx.raider_with_tools(WorldPos::new(60.0, 20.0), &[Tool::Shovel]);
        let c = fx.raider_with_tools(WorldPos::new(100.0, 20.0), &[Tool::Shovel]);
        assert_eq!(fx.find(&a), Some(clear));
        fx.supervisor.assign(clear, a.id);
        // Still matchable below capacity.
        assert_eq!(fx.find(&b), Some(clear));
        fx.supervisor.assign(clear, b.id);
        // Crew full.
        assert_eq!(fx.find(&c), None);
    }

    #[test]
    fn duplicate_surface_jobs_are_detected() {
        let mut fx = Fixture::new(5, 5);
        fx.wall(2, 2, SurfaceType::Dirt);
        fx.add_drill_job(2, 2);
        assert!(fx.supervisor.has_duplicate(&JobKind::Drill {
            surface: GridCoord::new(2, 2)
        }));
        // A different kind on the same surface is not a duplicate.
        assert!(!fx.supervisor.has_duplicate(&JobKind::Reinforce {
            surface: GridCoord::new(2, 2)
        }));
        assert!(!fx.supervisor.has_duplicate(&JobKind::Drill {
            surface: GridCoord::new(3, 3)
        }));
    }

    #[test]
    fn cancel_returns_job_with_fulfillers() {
        let mut fx = Fixture::new(5, 5);
        fx.wall(2, 2, SurfaceType::Dirt);
        let drill = fx.add_drill_job(2, 2);
        let raider = fx.raider_with_tools(WorldPos::new(20.0, 20.0), &[Tool::Drill]);
        fx.supervisor.assign(drill, raider.id);
        let cancelled = fx.supervisor.cancel(drill).unwrap();
        assert_eq!(cancelled.state, JobState::Cancelled);
        assert_eq!(cancelled.fulfillers.as_slice(), &[raider.id]);
        assert!(fx.supervisor.get(drill).is_none());
    }

    #[test]
    fn prune_drops_stale_jobs() {
        let mut fx = Fixture::new(5, 5);
        fx.wall(2, 2, SurfaceType::Dirt);
        let drill = fx.add_drill_job(2, 2);
        // The wall is gone (collapsed elsewhere): job is stale.
        fx.wall(2, 2, SurfaceType::Rubble4);
        let view = WorldView {
            terrain: &fx.terrain,
            buildings: &fx.buildings,
            materials: &fx.materials,
            config: &fx.config,
        };
        let removed = fx.supervisor.prune_invalid(&view);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, drill);
        assert!(fx.supervisor.is_empty());
    }

    #[test]
    fn jobs_on_surface_lookup() {
        let mut fx = Fixture::new(5, 5);
        fx.wall(2, 2, SurfaceType::Dirt);
        let drill = fx.add_drill_job(2, 2);
        let reinforce = fx.supervisor.register(Job::new(
            JobId::new(&mut fx.rng),
            JobKind::Reinforce {
                surface: GridCoord::new(2, 2),
            },
        ));
        fx.wall(3, 3, SurfaceType::Dirt);
        let other = fx.add_drill_job(3, 3);
        let ids = fx.supervisor.job_ids_on_surface(GridCoord::new(2, 2));
        assert!(ids.contains(&drill) && ids.contains(&reinforce));
        assert!(!ids.contains(&other));
    }
}
