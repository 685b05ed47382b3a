use bevy::math::Vec2;
use criterion::{criterion_group, criterion_main, Criterion};

use bevy_jumpnav::prelude::*;

fn store(chunks_per_side: i32, clutter: bool) -> ChunkStore {
    let settings = NavSettingsBuilder::new(64, 1.0).build();
    let mut store = ChunkStore::new(settings.chunk);

    for chunk_z in 0..chunks_per_side {
        for chunk_x in 0..chunks_per_side {
            store.insert(ChunkNavigationMap::new(chunk_x, chunk_z, &settings.chunk));
        }
    }

    if clutter {
        // Short walls on a staggered lattice, every gap at least two cells wide.
        let size = chunks_per_side * 64;
        for iz in (4..size - 4).step_by(7) {
            for ix in (4..size - 4).step_by(11) {
                let offset = (iz / 7) % 3;
                for k in 0..5 {
                    if let Some((chunk, cx, cz)) = store.locate_mut(ix + offset, iz + k - 2) {
                        chunk.add_cell_flags(cx, cz, NavCell::OBSTACLE);
                    }
                }
            }
        }
    }

    store
}

fn benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("pathfinding");
    group.sample_size(10);

    let settings = NavSettingsBuilder::new(64, 1.0)
        .max_iterations(100_000)
        .build();
    let options = PathOptions::default();
    let mut solver = JumpPointSearch::new(settings.search);

    let open = store(4, false);
    group.bench_function("jps_open_256x256", |b| {
        b.iter(|| solver.find_path(&open, Vec2::ZERO, Vec2::new(255.0, 200.0), &options))
    });

    let cluttered = store(4, true);
    group.bench_function("jps_cluttered_256x256", |b| {
        b.iter(|| solver.find_path(&cluttered, Vec2::ZERO, Vec2::new(255.0, 255.0), &options))
    });

    group.bench_function("line_of_sight_256", |b| {
        b.iter(|| {
            bevy_jumpnav::los::line_of_sight(&open, (0, 0), (255, 131), Walkability::Normal)
        })
    });

    group.finish();
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
