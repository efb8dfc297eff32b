// Pathfinder benchmarks: cold A* over a cavern with scattered pillars vs.
// warm cache hits, and the full-invalidation penalty after a terrain edit.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use granite_hollow_prng::GameRng;
use granite_hollow_sim::pathfinding::{PathFinder, PathTarget};
use granite_hollow_sim::surface::{Surface, SurfaceType};
use granite_hollow_sim::terrain::Terrain;
use granite_hollow_sim::types::{GridCoord, WorldPos};

const TILE: f32 = 40.0;
const SIZE: u32 = 48;

/// A SIZE×SIZE discovered cavern with deterministic solid-rock pillars.
fn cavern() -> Terrain {
    let mut rng = GameRng::new(2024);
    let mut surfaces = Vec::new();
    for _ in 0..SIZE * SIZE {
        let mut s = Surface::new(SurfaceType::Ground);
        s.discovered = true;
        surfaces.push(s);
    }
    let mut terrain = Terrain::new(SIZE, SIZE, surfaces);
    for _ in 0..(SIZE * SIZE / 8) {
        let x = rng.range_usize(1, SIZE as usize - 1) as i32;
        let y = rng.range_usize(1, SIZE as usize - 1) as i32;
        // Keep the corners open so the benchmark route always exists.
        if (x, y) != (1, 1) && (x, y) != (SIZE as i32 - 2, SIZE as i32 - 2) {
            terrain.get_mut(GridCoord::new(x, y)).unwrap().surface_type = SurfaceType::SolidRock;
        }
    }
    terrain
}

fn corner_route(terrain: &Terrain) -> (WorldPos, PathTarget) {
    let start = terrain.center_world(GridCoord::new(1, 1), TILE);
    let end = terrain.center_world(GridCoord::new(SIZE as i32 - 2, SIZE as i32 - 2), TILE);
    (start, PathTarget::location(end))
}

fn bench_cold_search(c: &mut Criterion) {
    let terrain = cavern();
    let (start, target) = corner_route(&terrain);
    c.bench_function("astar_cold_corner_to_corner", |b| {
        b.iter(|| {
            // Fresh finder per iteration: every query is a cache miss.
            let mut finder = PathFinder::new();
            black_box(finder.find_path(&terrain, TILE, start, &target))
        })
    });
}

fn bench_warm_cache(c: &mut Criterion) {
    let terrain = cavern();
    let (start, target) = corner_route(&terrain);
    let mut finder = PathFinder::new();
    finder.find_path(&terrain, TILE, start, &target).unwrap();
    c.bench_function("astar_warm_cache_hit", |b| {
        b.iter(|| black_box(finder.find_path(&terrain, TILE, start, &target)))
    });
}

fn bench_invalidation(c: &mut Criterion) {
    let mut terrain = cavern();
    let (start, target) = corner_route(&terrain);
    let mut finder = PathFinder::new();
    c.bench_function("astar_after_terrain_edit", |b| {
        b.iter(|| {
            // A walkability bump drops the whole cache; the query pays the
            // full search again.
            terrain.walkability_rev += 1;
            black_box(finder.find_path(&terrain, TILE, start, &target))
        })
    });
}

criterion_group!(
    benches,
    bench_cold_search,
    bench_warm_cache,
    bench_invalidation
);
criterion_main!(benches);
