use bucket_ecs::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Counter(u32);

fn engine() -> Engine {
    let engine = Engine::new(EngineConfig::new().with_worker_threads(2)).unwrap();
    engine.world().register_state("counter", Counter(0)).unwrap();
    engine
}

#[test]
fn test_timed_job_runs_each_due_tick() {
    let mut engine = engine();
    let world = engine.world().clone();
    world.schedule_timed::<Write<Counter>, _>(
        |p| p.state_mut::<Counter>().unwrap().0 += 1,
        ScheduleTimedInfo::every(Duration::ZERO).labeled("count"),
    );

    let reports = engine.run_ticks(4).unwrap();
    assert!(reports.iter().all(|report| report.timed_spawned == 1));
    assert_eq!(world.state::<Counter>().unwrap().0, 4);
    assert_eq!(engine.executor().profiler().get_stats("count").unwrap().call_count, 4);
}

#[test]
fn test_timed_job_respects_interval() {
    let mut engine = engine();
    let world = engine.world().clone();
    world.schedule_timed::<Write<Counter>, _>(
        |p| p.state_mut::<Counter>().unwrap().0 += 1,
        ScheduleTimedInfo::every(Duration::from_secs(3600)),
    );

    engine.run_ticks(5).unwrap();
    assert_eq!(world.state::<Counter>().unwrap().0, 1);
}

#[test]
fn test_timed_job_delay() {
    let mut engine = engine();
    let world = engine.world().clone();
    world.schedule_timed::<Write<Counter>, _>(
        |p| p.state_mut::<Counter>().unwrap().0 += 1,
        ScheduleTimedInfo::every(Duration::ZERO).with_delay(Duration::from_millis(30)),
    );

    engine.tick().unwrap();
    assert_eq!(world.state::<Counter>().unwrap().0, 0);
    thread::sleep(Duration::from_millis(40));
    engine.tick().unwrap();
    assert_eq!(world.state::<Counter>().unwrap().0, 1);
}

#[test]
fn test_unschedule_from_inside_job() {
    let mut engine = engine();
    let world = engine.world().clone();
    let handle_slot: Arc<Mutex<Option<TimedHandle>>> = Arc::new(Mutex::new(None));

    let slot = handle_slot.clone();
    let handle = world.schedule_timed::<Write<Counter>, _>(
        move |p| {
            let mut counter = p.state_mut::<Counter>().unwrap();
            counter.0 += 1;
            if counter.0 == 2 {
                if let Some(handle) = *slot.lock() {
                    p.unschedule(handle);
                }
            }
        },
        ScheduleTimedInfo::every(Duration::ZERO),
    );
    *handle_slot.lock() = Some(handle);

    let reports = engine.run_ticks(5).unwrap();
    assert_eq!(world.state::<Counter>().unwrap().0, 2);
    assert_eq!(reports[1].timed_collected, 1);
    assert_eq!(world.scheduler().timed_count(), 0);
}

#[test]
fn test_unschedule_is_collected_at_tick_end() {
    let mut engine = engine();
    let world = engine.world().clone();
    let handle = world.schedule_timed::<(), _>(|_| {}, ScheduleTimedInfo::every(Duration::ZERO));

    assert!(world.unschedule(handle));
    assert!(!world.unschedule(handle));
    assert_eq!(world.scheduler().timed_count(), 1);

    let report = engine.tick().unwrap();
    assert_eq!(report.timed_spawned, 0);
    assert_eq!(report.timed_collected, 1);
    assert_eq!(world.scheduler().timed_count(), 0);
}

#[test]
fn test_timed_instances_never_overlap() {
    let mut engine = engine();
    let world = engine.world().clone();
    let running = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let (active, seen) = (running.clone(), overlaps.clone());
    world.schedule_timed::<(), _>(
        move |_| {
            if active.fetch_add(1, Ordering::SeqCst) > 0 {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        },
        ScheduleTimedInfo::every(Duration::ZERO),
    );

    let reports = engine.run_ticks(5).unwrap();
    assert!(reports.iter().all(|report| report.timed_spawned == 1));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}
