use bucket_ecs::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

struct A(u64);
struct B(u64);
struct C(u64);

fn engine(workers: usize) -> Engine {
    let engine = Engine::new(EngineConfig::new().with_worker_threads(workers)).unwrap();
    let world = engine.world();
    world.register_state("a", A(0)).unwrap();
    world.register_state("b", B(0)).unwrap();
    world.register_state("c", C(0)).unwrap();
    engine
}

fn bench_flagless_jobs(c: &mut Criterion) {
    let mut engine = engine(4);
    c.bench_function("tick_1000_flagless_jobs", |b| {
        b.iter(|| {
            for i in 0..1000u64 {
                engine
                    .world()
                    .schedule::<(), _>(move |_| { black_box(i); }, ScheduleData::new());
            }
            engine.tick().unwrap()
        })
    });
}

fn bench_mixed_flags(c: &mut Criterion) {
    let mut engine = engine(4);
    c.bench_function("tick_300_mixed_flag_jobs", |b| {
        b.iter(|| {
            let world = engine.world().clone();
            for _ in 0..100 {
                world.schedule::<(Write<A>, Read<B>), _>(
                    |p| p.state_mut::<A>().unwrap().0 += p.state::<B>().unwrap().0,
                    ScheduleData::new(),
                );
                world.schedule::<Read<A>, _>(
                    |p| {
                        black_box(p.state::<A>().unwrap().0);
                    },
                    ScheduleData::new(),
                );
                world.schedule::<Write<C>, _>(|p| p.state_mut::<C>().unwrap().0 += 1, ScheduleData::new());
            }
            engine.tick().unwrap()
        })
    });
}

fn bench_systems(c: &mut Criterion) {
    let mut engine = engine(4);
    engine.add_system(system::<Write<A>, _>("a", |p| {
        p.state_mut::<A>()?.0 += 1;
        Ok(())
    }));
    engine.add_system(system::<Write<B>, _>("b", |p| {
        p.state_mut::<B>()?.0 += 1;
        Ok(())
    }));
    engine.add_system(system::<(Read<A>, Write<C>), _>("c", |p| {
        let a = p.state::<A>()?.0;
        p.state_mut::<C>()?.0 = a;
        Ok(())
    }));

    c.bench_function("tick_3_systems", |b| b.iter(|| engine.tick().unwrap()));
}

criterion_group!(benches, bench_flagless_jobs, bench_mixed_flags, bench_systems);
criterion_main!(benches);
