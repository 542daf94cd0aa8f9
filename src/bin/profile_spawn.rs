#![allow(dead_code, unused_imports)]

use bucket_ecs::prelude::*;
use std::time::Instant;

#[derive(Debug, Clone)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone)]
struct Health(u32);

struct Unit;

impl Object for Unit {
    type Components = (Position, Velocity, Health);
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(engine))]
fn profile_spawns(engine: &mut Engine, jobs: usize, per_job: usize) -> Result<()> {
    let world = engine.world().clone();
    for job in 0..jobs {
        world.schedule::<(Write<Unit>, Write<Position>, Write<Velocity>, Write<Health>), _>(
            move |p| {
                let _span = tracing::info_span!("spawn_job", job, per_job).entered();
                let scene = p.root_scene();
                for _ in 0..per_job {
                    if let Err(err) = p.create_object(
                        scene,
                        Unit,
                        (Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0), Health(100)),
                    ) {
                        tracing::error!(%err, "spawn failed");
                    }
                }
            },
            ScheduleData::new().labeled("spawn"),
        );
    }
    let report = engine.tick()?;
    tracing::info!(?report, "spawn tick complete");
    Ok(())
}

#[cfg(feature = "profiling")]
fn main() -> Result<()> {
    let _guard = bucket_ecs::profiling::init_file_tracing("trace", "profile_spawn.json")?;

    let mut engine = Engine::new(EngineConfig::new())?;
    engine.register_component::<Position>("position")?;
    engine.register_component::<Velocity>("velocity")?;
    engine.register_component::<Health>("health")?;
    engine.register_object::<Unit>("unit")?;

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        let root = engine.world().root_scene();
        for _ in 0..1000 {
            engine.world().create_object(
                root,
                Unit,
                (Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0), Health(100)),
            )?;
        }
    }

    println!("Profiling spawn with 3 components...");
    let start = Instant::now();
    profile_spawns(&mut engine, 10, 1_000)?;
    println!(
        "Spawn 10k objects complete in: {:?} ({} live)",
        start.elapsed(),
        engine.world().object_count::<Unit>()
    );
    engine.shutdown()
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_spawn binary requires --features profiling");
}
