use bucket_ecs::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Hit {
    damage: u32,
}

struct Position(f32);
struct Velocity(f32);

struct Ball;

impl Object for Ball {
    type Components = (Position, Velocity);
}

#[test]
fn test_invoke_without_listeners_is_noop() {
    let world = World::new();
    world.invoke_immediate(&Hit { damage: 1 });
    world.invoke(Hit { damage: 2 });
    let report = world.flush_commands();
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(world.events().listener_count::<Hit>(), 0);
}

#[test]
fn test_listener_handles_stay_valid_after_removals() {
    let world = World::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<ListenerHandle<Hit>> = (0..3)
        .map(|i| {
            let log = log.clone();
            world.listen::<Hit, _>(move |_, hit| log.lock().push((i, hit.damage)))
        })
        .collect();

    assert!(world.unlisten(handles[1]));
    assert!(!world.unlisten(handles[1]));
    world.invoke_immediate(&Hit { damage: 5 });
    assert_eq!(*log.lock(), vec![(0, 5), (2, 5)]);

    // The freed slot is reused; the surviving handles still address their listeners
    let reused = {
        let log = log.clone();
        world.listen::<Hit, _>(move |_, hit| log.lock().push((3, hit.damage)))
    };
    assert_eq!(reused.index(), handles[1].index());
    assert!(world.unlisten(handles[2]));

    log.lock().clear();
    world.invoke_immediate(&Hit { damage: 9 });
    assert_eq!(*log.lock(), vec![(0, 9), (3, 9)]);
    assert_eq!(world.events().listener_count::<Hit>(), 2);
}

#[test]
fn test_listener_may_unlisten_during_dispatch() {
    let world = Arc::new(World::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let own_handle: Arc<Mutex<Option<ListenerHandle<Hit>>>> = Arc::new(Mutex::new(None));

    let slot = own_handle.clone();
    let counter = calls.clone();
    let handle = world.listen::<Hit, _>(move |world, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = slot.lock().take() {
            world.unlisten(handle);
        }
    });
    *own_handle.lock() = Some(handle);

    world.invoke_immediate(&Hit { damage: 1 });
    world.invoke_immediate(&Hit { damage: 1 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_lifecycle_events_in_order() {
    let world = World::new();
    world.register_component::<Position>("position", 16).unwrap();
    world.register_component::<Velocity>("velocity", 16).unwrap();
    world.register_object::<Ball>("ball", 16, 16).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    macro_rules! record {
        ($event:ty, $label:expr) => {{
            let log = log.clone();
            world.listen::<$event, _>(move |_, _| log.lock().push($label));
        }};
    }
    record!(ComponentCreated<Position>, "created position");
    record!(ComponentCreated<Velocity>, "created velocity");
    record!(ObjectCreated<Ball>, "created ball");
    record!(ComponentPostCreated<Position>, "post position");
    record!(ComponentPostCreated<Velocity>, "post velocity");
    record!(ObjectDestroyed<Ball>, "destroyed ball");
    record!(ComponentDestroyed<Position>, "destroyed position");
    record!(ComponentDestroyed<Velocity>, "destroyed velocity");

    let ball = world
        .create_object(world.root_scene(), Ball, (Position(0.0), Velocity(0.0)))
        .unwrap();
    world.destroy_object(ball).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "created position",
            "created velocity",
            "created ball",
            "post position",
            "post velocity",
            "destroyed ball",
            "destroyed position",
            "destroyed velocity",
        ]
    );
}

#[test]
fn test_post_created_sees_siblings() {
    let world = Arc::new(World::new());
    world.register_component::<Position>("position", 16).unwrap();
    world.register_component::<Velocity>("velocity", 16).unwrap();
    world.register_object::<Ball>("ball", 16, 16).unwrap();
    let found = Arc::new(AtomicUsize::new(0));

    let counter = found.clone();
    world.listen::<ComponentPostCreated<Position>, _>(move |world, event| {
        if world.find_component::<Velocity>(event.owner).is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    world
        .create_object(world.root_scene(), Ball, (Position(0.0), Velocity(0.0)))
        .unwrap();
    assert_eq!(found.load(Ordering::SeqCst), 1);
}

#[test]
fn test_events_from_jobs_flush_at_tick_end() {
    let mut engine = Engine::new(EngineConfig::new().with_worker_threads(2)).unwrap();
    let world = engine.world().clone();
    let total = Arc::new(AtomicUsize::new(0));
    let sum = total.clone();
    world.listen::<Hit, _>(move |_, hit| {
        sum.fetch_add(hit.damage as usize, Ordering::SeqCst);
    });

    for damage in 1..=4 {
        world.schedule::<(), _>(move |p| p.invoke(Hit { damage }), ScheduleData::new());
    }

    let report = engine.tick().unwrap();
    assert_eq!(report.commands_flushed, 4);
    assert_eq!(total.load(Ordering::SeqCst), 10);
}
