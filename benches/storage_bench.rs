use bucket_ecs::scene::SceneId;
use bucket_ecs::storage::Storage;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

#[derive(Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_create");
    for bucket in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(bucket), &bucket, |b, &bucket| {
            b.iter(|| {
                let mut storage = Storage::<Position>::new(SceneId::default(), bucket, bucket);
                for i in 0..10_000 {
                    black_box(storage.create(Position {
                        x: i as f32,
                        y: 0.0,
                        z: 0.0,
                    }));
                }
                storage
            })
        });
    }
    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    c.bench_function("storage_churn_10k", |b| {
        let mut storage = Storage::<Position>::new(SceneId::default(), 1024, 1024);
        let mut handles: Vec<_> = (0..10_000)
            .map(|_| storage.create(Position { x: 0.0, y: 0.0, z: 0.0 }))
            .collect();
        b.iter(|| {
            for handle in handles.iter_mut().step_by(3) {
                storage.destroy(*handle).unwrap();
                *handle = storage.create(Position { x: 1.0, y: 1.0, z: 1.0 });
            }
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    let mut storage = Storage::<Position>::new(SceneId::default(), 1024, 1024);
    for i in 0..100_000 {
        storage.create(Position {
            x: i as f32,
            y: 1.0,
            z: 2.0,
        });
    }
    c.bench_function("storage_iterate_100k", |b| {
        b.iter(|| {
            let mut sum = 0.0f32;
            for (_, pos) in storage.iter() {
                sum += pos.x + pos.y + pos.z;
            }
            black_box(sum)
        })
    });
}

criterion_group!(benches, bench_create, bench_churn, bench_iterate);
criterion_main!(benches);
