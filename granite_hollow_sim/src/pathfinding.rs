// A* pathfinding over the terrain grid, with a route cache.
//
// Implements standard A* using a `BinaryHeap` (min-heap via reversed
// ordering). Node scores and came-from data are stored in `Vec`s indexed by
// flat cell index for O(1) access and deterministic behavior. Ties in
// f-score break on cell index, so repeated searches over identical terrain
// return identical routes.
//
// Routes are cached keyed by `(start cell, end cell)` flat indices in an
// `FxHashMap`. The cached value is the waypoint list *minus* the precise
// tail: a cache hit replays the interior waypoints and appends the exact
// location requested this time. This amortizes repeated trips between the
// same two regions while still landing units on the requested point.
//
// Invalidation is total: whenever the terrain's `walkability_rev` differs
// from the revision the cache was built against, the whole cache is
// dropped. Terrain edits are rare relative to path queries, so full
// invalidation beats fine-grained dependency tracking here.
//
// See also: `terrain.rs` for the walkability predicate and revision
// counter, `fulfiller.rs` for the movement code consuming `TerrainPath`.
//
// **Critical constraint: determinism.** A* is a pure function of terrain
// state and endpoints. No randomness; f32 ordering via `total_cmp`.

use crate::terrain::Terrain;
use crate::types::{BuildingId, GridCoord, WorldPos};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A place a unit may travel to: an exact world location, optionally tied
/// to a building or a surface, with an acceptance radius.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PathTarget {
    pub location: WorldPos,
    pub building: Option<BuildingId>,
    pub surface: Option<GridCoord>,
    /// Squared acceptance radius; 0 falls back to the action range.
    pub radius_sq: f32,
}

impl PathTarget {
    pub fn location(location: WorldPos) -> Self {
        Self {
            location,
            building: None,
            surface: None,
            radius_sq: 0.0,
        }
    }

    pub fn at_surface(location: WorldPos, surface: GridCoord) -> Self {
        Self {
            surface: Some(surface),
            ..Self::location(location)
        }
    }

    pub fn at_building(location: WorldPos, building: BuildingId) -> Self {
        Self {
            building: Some(building),
            ..Self::location(location)
        }
    }

    pub fn with_radius_sq(mut self, radius_sq: f32) -> Self {
        self.radius_sq = radius_sq;
        self
    }

    /// Whether `pos` counts as having arrived at this target.
    pub fn is_in_area(&self, pos: WorldPos, action_range: f32) -> bool {
        let accept = self.radius_sq.max(action_range * action_range);
        pos.distance_sq(self.location) <= accept
    }
}

/// A computed route: the remaining waypoints (next first) toward a chosen
/// target, plus the squared total length used to rank alternatives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerrainPath {
    pub target: PathTarget,
    pub waypoints: Vec<WorldPos>,
    pub length_sq: f32,
    /// Terrain revision this route was computed against. A unit holding a
    /// path from an older revision must re-route (and may find none —
    /// that's the mid-travel abort).
    pub computed_rev: u64,
}

impl TerrainPath {
    pub fn first_location(&self) -> Option<WorldPos> {
        self.waypoints.first().copied()
    }
}

/// Pathfinder with a full-invalidation route cache.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathFinder {
    /// (start cell, end cell) → interior waypoints without the precise
    /// tail. Rebuilt from scratch after any terrain walkability change, so
    /// it skips serialization.
    #[serde(skip)]
    cache: FxHashMap<(u32, u32), Vec<WorldPos>>,
    /// The terrain revision the cache was built against. Defaults to 0,
    /// which never matches a live terrain (revisions start at 1).
    #[serde(skip)]
    cached_rev: u64,
}

impl PathFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached routes (test/diagnostic hook).
    pub fn cached_route_count(&self) -> usize {
        self.cache.len()
    }

    /// Compute a route from `start` to `target`, or `None` if unreachable.
    pub fn find_path(
        &mut self,
        terrain: &Terrain,
        tile_size: f32,
        start: WorldPos,
        target: &PathTarget,
    ) -> Option<TerrainPath> {
        self.invalidate_if_stale(terrain);

        let start_cell = start.to_grid(tile_size);
        let end_cell = target.location.to_grid(tile_size);
        if start_cell == end_cell {
            // Same cell: walk straight to the point.
            return Some(TerrainPath {
                target: *target,
                waypoints: vec![target.location],
                length_sq: start.distance_sq(target.location),
                computed_rev: terrain.walkability_rev,
            });
        }

        let start_idx = terrain.index(start_cell)?;
        let end_idx = terrain.index(end_cell)?;
        if !terrain.is_walkable(end_cell) {
            return None;
        }

        let key = (start_idx.0, end_idx.0);
        let interior = match self.cache.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let cells = astar(terrain, start_cell, end_cell, tile_size)?;
                // Waypoints are the cell centers after the start cell; the
                // final center is replaced by the precise target, so only
                // the interior is worth caching.
                let interior: Vec<WorldPos> = cells[1..cells.len() - 1]
                    .iter()
                    .map(|c| terrain.center_world(*c, tile_size))
                    .collect();
                self.cache.insert(key, interior.clone());
                interior
            }
        };

        let mut waypoints = interior;
        waypoints.push(target.location);
        let length_sq = path_length_sq(start, &waypoints);
        Some(TerrainPath {
            target: *target,
            waypoints,
            length_sq,
            computed_rev: terrain.walkability_rev,
        })
    }

    /// Resolve alternative workplaces: compute a route per candidate and
    /// keep the shortest by squared length. Ties break on candidate order
    /// (first wins), so unit behavior is reproducible.
    pub fn find_path_to_closest(
        &mut self,
        terrain: &Terrain,
        tile_size: f32,
        start: WorldPos,
        targets: &[PathTarget],
    ) -> Option<TerrainPath> {
        let mut best: Option<TerrainPath> = None;
        for target in targets {
            if let Some(path) = self.find_path(terrain, tile_size, start, target) {
                let better = match &best {
                    Some(b) => path.length_sq < b.length_sq,
                    None => true,
                };
                if better {
                    best = Some(path);
                }
            }
        }
        best
    }

    /// Reachability probe used by the scheduler: true if any candidate has
    /// a route. Short-circuits on the first hit instead of ranking them.
    pub fn any_reachable(
        &mut self,
        terrain: &Terrain,
        tile_size: f32,
        start: WorldPos,
        targets: &[PathTarget],
    ) -> bool {
        targets
            .iter()
            .any(|t| self.find_path(terrain, tile_size, start, t).is_some())
    }

    fn invalidate_if_stale(&mut self, terrain: &Terrain) {
        if self.cached_rev != terrain.walkability_rev {
            self.cache.clear();
            self.cached_rev = terrain.walkability_rev;
        }
    }
}

fn path_length_sq(start: WorldPos, waypoints: &[WorldPos]) -> f32 {
    let mut length = 0.0;
    let mut prev = start;
    for w in waypoints {
        length += prev.distance(*w);
        prev = *w;
    }
    length * length
}

/// Entry in the A* open set (min-heap via reversed ordering).
struct OpenEntry {
    idx: u32,
    f_score: f32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_score.total_cmp(&other.f_score) == Ordering::Equal && self.idx == other.idx
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap: smallest f_score is "greatest".
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// A* over the walkable-cell graph. 8-connected; diagonal steps require
/// both flanking orthogonal cells to be walkable (no squeezing between wall
/// corners). Edge cost is the Euclidean distance between cell centers.
///
/// The start cell itself is exempt from the walkability check so a unit
/// standing somewhere odd can still route out of it.
fn astar(
    terrain: &Terrain,
    start: GridCoord,
    goal: GridCoord,
    tile_size: f32,
) -> Option<Vec<GridCoord>> {
    let n = (terrain.width() as usize) * (terrain.height() as usize);
    if n == 0 {
        return None;
    }
    let start_idx = terrain.index(start)?.0;
    let goal_idx = terrain.index(goal)?.0;

    let mut g_score = vec![f32::INFINITY; n];
    let mut came_from: Vec<Option<u32>> = vec![None; n];
    let mut closed = vec![false; n];

    g_score[start_idx as usize] = 0.0;

    let goal_center = terrain.center_world(goal, tile_size);
    let mut open = BinaryHeap::new();
    open.push(OpenEntry {
        idx: start_idx,
        f_score: terrain.center_world(start, tile_size).distance(goal_center),
    });

    const STEPS: [(i32, i32); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];

    while let Some(current) = open.pop() {
        let ci = current.idx as usize;
        if current.idx == goal_idx {
            return Some(reconstruct_path(terrain, &came_from, start_idx, goal_idx));
        }
        if closed[ci] {
            continue;
        }
        closed[ci] = true;

        let current_coord = terrain.coord_of(crate::types::SurfaceIdx(current.idx));
        let current_center = terrain.center_world(current_coord, tile_size);
        let current_g = g_score[ci];

        for (dx, dy) in STEPS {
            let neighbor = GridCoord::new(current_coord.x + dx, current_coord.y + dy);
            if !terrain.is_walkable(neighbor) {
                continue;
            }
            if dx != 0 && dy != 0 {
                // Diagonal: both flanking cells must be open.
                let a = GridCoord::new(current_coord.x + dx, current_coord.y);
                let b = GridCoord::new(current_coord.x, current_coord.y + dy);
                if !terrain.is_walkable(a) || !terrain.is_walkable(b) {
                    continue;
                }
            }
            let ni = terrain.index(neighbor).expect("walkable implies in bounds");
            if closed[ni.0 as usize] {
                continue;
            }
            let neighbor_center = terrain.center_world(neighbor, tile_size);
            let tentative_g = current_g + current_center.distance(neighbor_center);
            if tentative_g < g_score[ni.0 as usize] {
                g_score[ni.0 as usize] = tentative_g;
                came_from[ni.0 as usize] = Some(current.idx);
                open.push(OpenEntry {
                    idx: ni.0,
                    f_score: tentative_g + neighbor_center.distance(goal_center),
                });
            }
        }
    }

    None // Wall-enclosed target.
}

fn reconstruct_path(
    terrain: &Terrain,
    came_from: &[Option<u32>],
    start_idx: u32,
    goal_idx: u32,
) -> Vec<GridCoord> {
    let mut cells = Vec::new();
    let mut current = goal_idx;
    loop {
        cells.push(terrain.coord_of(crate::types::SurfaceIdx(current)));
        if current == start_idx {
            break;
        }
        match came_from[current as usize] {
            Some(prev) => current = prev,
            None => break,
        }
    }
    cells.reverse();
    cells
}
