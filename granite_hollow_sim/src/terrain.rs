// The terrain grid — spatial truth for the whole simulation.
//
// A dense 2D array of `Surface` cells stored as a flat `Vec` indexed by
// `x + y * width`. Out-of-bounds reads return a static solid-rock sentinel,
// so callers never handle a missing cell; out-of-bounds writes are rejected
// with `None`.
//
// Mutation operations are single-cell and saturating: `collapse_cell` turns
// one wall into deep rubble and reports what fell out of it, `reinforce`
// flips a flag, `reduce_rubble` steps the rubble stage down. The collapse
// *cascade* (recursing into neighbors that lost support) is driven by
// `sim.rs`, which must cancel jobs on each cell before its type changes —
// the grid itself knows nothing about jobs.
//
// Every mutation that can affect where units walk bumps `walkability_rev`.
// The pathfinder compares that counter against the revision its cache was
// built for and drops the whole cache on mismatch (see `pathfinding.rs`).
//
// See also: `surface.rs` for the cell types, `erosion.rs` for the lava
// timers that call `apply_erosion`, `sim.rs` for cascade orchestration.
//
// **Critical constraint: determinism.** Neighbor walks use the fixed order
// from `GridCoord`; discovery flood-fill uses an explicit stack seeded in
// that order. No hash-map iteration anywhere.

use crate::surface::{SOLID_ROCK_SENTINEL, Surface, SurfaceType};
use crate::types::{GridCoord, SurfaceIdx, WorldPos};
use granite_hollow_prng::GameRng;
use serde::{Deserialize, Serialize};

/// What a single-cell collapse produced: discovery results plus the
/// materials shaken loose from the rock.
#[derive(Debug)]
pub struct CollapseOutcome {
    /// True if the discovery flood revealed a previously-undiscovered floor
    /// cell — a new cave.
    pub new_cave: bool,
    /// Every cell newly marked discovered by the flood.
    pub newly_discovered: Vec<GridCoord>,
    /// World positions where freed crystals land.
    pub crystal_drops: Vec<WorldPos>,
    /// World positions where freed ore lands.
    pub ore_drops: Vec<WorldPos>,
}

/// One rubble-clearing step's results.
#[derive(Debug)]
pub struct RubbleOutcome {
    /// True once the cell is clean ground again.
    pub cleared: bool,
    /// Ore shaken out of the rubble by this step.
    pub ore_drops: Vec<WorldPos>,
}

/// Dense 2D grid of surfaces.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Terrain {
    width: u32,
    height: u32,
    surfaces: Vec<Surface>,
    /// Bumped whenever a walkability-affecting field changes. Starts at 1 so
    /// a freshly deserialized pathfinder (whose cached revision defaults to
    /// 0) always re-validates.
    pub walkability_rev: u64,
}

impl Terrain {
    /// Build a terrain from per-cell surfaces in row-major order.
    /// `surfaces.len()` must equal `width * height` (checked by the level
    /// loader before construction).
    pub fn new(width: u32, height: u32, surfaces: Vec<Surface>) -> Self {
        debug_assert_eq!(surfaces.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            surfaces,
            walkability_rev: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn in_bounds(&self, coord: GridCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && (coord.x as u32) < self.width
            && (coord.y as u32) < self.height
    }

    /// Flat index of an in-bounds cell.
    pub fn index(&self, coord: GridCoord) -> Option<SurfaceIdx> {
        if self.in_bounds(coord) {
            Some(SurfaceIdx(
                coord.x as u32 + coord.y as u32 * self.width,
            ))
        } else {
            None
        }
    }

    pub fn coord_of(&self, idx: SurfaceIdx) -> GridCoord {
        GridCoord::new((idx.0 % self.width) as i32, (idx.0 / self.width) as i32)
    }

    /// Read a cell. Out-of-bounds lookups return the solid-rock sentinel.
    pub fn get(&self, coord: GridCoord) -> &Surface {
        match self.index(coord) {
            Some(idx) => &self.surfaces[idx.0 as usize],
            None => &SOLID_ROCK_SENTINEL,
        }
    }

    /// Mutable access to an in-bounds cell.
    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut Surface> {
        let idx = self.index(coord)?;
        Some(&mut self.surfaces[idx.0 as usize])
    }

    /// World-space center of a cell.
    pub fn center_world(&self, coord: GridCoord, tile_size: f32) -> WorldPos {
        WorldPos::new(
            coord.x as f32 * tile_size + tile_size / 2.0,
            coord.y as f32 * tile_size + tile_size / 2.0,
        )
    }

    pub fn is_walkable(&self, coord: GridCoord) -> bool {
        self.get(coord).is_walkable()
    }

    /// Orthogonal neighbors that are floor, by material flag alone.
    /// Discovery does not matter here: hidden caverns still hold walls up
    /// (or fail to).
    pub fn floor_neighbor_count(&self, coord: GridCoord) -> u8 {
        coord
            .orthogonal_neighbors()
            .iter()
            .filter(|n| self.get(**n).surface_type.is_floor())
            .count() as u8
    }

    /// A wall is supported while at most 2 of its orthogonal neighbors are
    /// floor. More open sides than that and it falls.
    pub fn is_supported(&self, coord: GridCoord) -> bool {
        self.floor_neighbor_count(coord) <= 2
    }

    /// Orthogonal wall neighbors that have lost support and must cascade.
    /// Reinforced walls hold regardless of support.
    pub fn unsupported_wall_neighbors(&self, coord: GridCoord) -> Vec<GridCoord> {
        coord
            .orthogonal_neighbors()
            .into_iter()
            .filter(|n| {
                let s = self.get(*n);
                self.in_bounds(*n)
                    && !s.surface_type.is_floor()
                    && !s.reinforced
                    && !self.is_supported(*n)
            })
            .collect()
    }

    /// Mark a cell discovered and flood outward through floor cells,
    /// revealing everything that borders the connected open region.
    ///
    /// Returns the newly revealed cells and whether any of them was an
    /// undiscovered floor cell (a new cave).
    pub fn discover_from(&mut self, start: GridCoord) -> (Vec<GridCoord>, bool) {
        let mut newly_discovered = Vec::new();
        let mut new_cave = false;
        let mut stack = Vec::new();

        if let Some(s) = self.get_mut(start) {
            if !s.discovered {
                s.discovered = true;
                newly_discovered.push(start);
            }
        }
        if self.get(start).surface_type.is_floor() {
            stack.push(start);
        }

        while let Some(coord) = stack.pop() {
            for n in coord.all_neighbors() {
                if !self.in_bounds(n) {
                    continue;
                }
                let surface = self.get_mut(n).expect("checked in_bounds");
                if surface.discovered {
                    continue;
                }
                surface.discovered = true;
                let floor = surface.surface_type.is_floor();
                newly_discovered.push(n);
                if floor {
                    // Revealed open floor: this is a cave, keep flooding.
                    new_cave = true;
                    stack.push(n);
                }
            }
        }

        if !newly_discovered.is_empty() {
            // Newly discovered floor becomes routable.
            self.walkability_rev += 1;
        }
        (newly_discovered, new_cave)
    }

    /// Collapse a single wall cell into deep rubble.
    ///
    /// Returns `None` for out-of-bounds or floor cells — collapsing rubble
    /// (or any other floor) is a no-op, which is what terminates cascades.
    /// Job cancellation on the cell must happen before this is called; the
    /// cascade into unsupported neighbors is the caller's loop.
    pub fn collapse_cell(
        &mut self,
        coord: GridCoord,
        tile_size: f32,
        rng: &mut GameRng,
    ) -> Option<CollapseOutcome> {
        if !self.in_bounds(coord) || self.get(coord).surface_type.is_floor() {
            return None;
        }

        let center = self.center_world(coord, tile_size);
        let (contained_crystals, contained_ore) = {
            let s = self.get_mut(coord).expect("checked in_bounds");
            let counts = (s.contained_crystals, s.contained_ore);
            s.surface_type = SurfaceType::Rubble4;
            s.reinforced = false;
            s.seam_level = 0;
            s.contained_crystals = 0;
            // One residual ore stays hidden in the rubble.
            s.contained_ore = 1;
            counts
        };
        self.walkability_rev += 1;

        let (newly_discovered, new_cave) = self.discover_from(coord);

        let mut crystal_drops = Vec::new();
        for _ in 0..contained_crystals {
            crystal_drops.push(scatter_around(center, tile_size, rng));
        }
        let mut ore_drops = Vec::new();
        for _ in 0..contained_ore {
            ore_drops.push(scatter_around(center, tile_size, rng));
        }

        Some(CollapseOutcome {
            new_cave,
            newly_discovered,
            crystal_drops,
            ore_drops,
        })
    }

    /// Reinforce a wall, shielding it from cascades, fall-ins, and erosion
    /// triggers. Returns false (no-op) if the cell cannot be reinforced.
    pub fn reinforce(&mut self, coord: GridCoord) -> bool {
        match self.get_mut(coord) {
            Some(s) if s.is_reinforcable() => {
                s.reinforced = true;
                true
            }
            _ => false,
        }
    }

    /// One rubble-clearing step: RUBBLE4 → … → RUBBLE1 → GROUND. Each step
    /// shakes the hidden ore out; all but the last re-hide one more.
    pub fn reduce_rubble(
        &mut self,
        coord: GridCoord,
        tile_size: f32,
        rng: &mut GameRng,
    ) -> Option<RubbleOutcome> {
        if !self.get(coord).has_rubble() {
            return None;
        }
        let center = self.center_world(coord, tile_size);
        let (ore_count, cleared) = {
            let s = self.get_mut(coord).expect("rubble implies in bounds");
            s.surface_type = s.surface_type.reduced_rubble();
            let ore_count = s.contained_ore;
            let cleared = !s.has_rubble();
            s.contained_ore = if cleared { 0 } else { 1 };
            (ore_count, cleared)
        };
        // Rubble depth modulates movement speed, so routing state changed.
        self.walkability_rev += 1;

        let mut ore_drops = Vec::new();
        for _ in 0..ore_count {
            ore_drops.push(scatter_around(center, tile_size, rng));
        }
        Some(RubbleOutcome { cleared, ore_drops })
    }

    /// Apply an erosion advance computed by `erosion.rs`: set the new lava
    /// stage, wiping cell contents when a non-lava cell ignites.
    pub fn apply_erosion(&mut self, coord: GridCoord, new_type: SurfaceType) {
        let Some(s) = self.get_mut(coord) else {
            return;
        };
        if s.surface_type.lava_stage() == 0 {
            s.contained_ore = 0;
            s.contained_crystals = 0;
            s.seam_level = 0;
        }
        s.surface_type = new_type;
        self.walkability_rev += 1;
    }

    /// Find the wall next to `coord` that a spontaneous fall-in would bring
    /// down: prefer reinforcable walls, then any diggable wall. Skips
    /// reinforced cells. Mirrors the fixed left/up/right/down probe order.
    pub fn fall_in_origin(&self, coord: GridCoord) -> Option<GridCoord> {
        let neighbors = coord.orthogonal_neighbors();
        neighbors
            .iter()
            .find(|n| self.get(**n).is_reinforcable())
            .or_else(|| neighbors.iter().find(|n| self.get(**n).is_diggable() && !self.get(**n).reinforced))
            .copied()
    }

    /// Count of diggable wall cells left in the level, for score summaries.
    pub fn remaining_diggables(&self) -> u32 {
        self.surfaces
            .iter()
            .filter(|s| s.surface_type.is_diggable())
            .count() as u32
    }

    /// Iterate all in-bounds coordinates in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = GridCoord> + '_ {
        let width = self.width;
        (0..self.surfaces.len() as u32)
            .map(move |i| GridCoord::new((i % width) as i32, (i / width) as i32))
    }
}

/// A landing spot near a cell center: up to a quarter tile off on each axis.
fn scatter_around(center: WorldPos, tile_size: f32, rng: &mut GameRng) -> WorldPos {
    WorldPos::new(
        center.x + rng.sign() * rng.range_f32(0.0, tile_size / 4.0),
        center.z + rng.sign() * rng.range_f32(0.0, tile_size / 4.0),
    )
}
