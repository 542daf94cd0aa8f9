use bucket_ecs::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Value(u32);
struct Other(u32);

type Log = Arc<Mutex<Vec<String>>>;

fn engine(workers: usize) -> Engine {
    let engine = Engine::new(EngineConfig::new().with_worker_threads(workers)).unwrap();
    engine.world().register_state("value", Value(0)).unwrap();
    engine.world().register_state("other", Other(0)).unwrap();
    engine
}

#[test]
fn test_read_after_write_sees_write() {
    let mut engine = engine(4);
    let world = engine.world().clone();
    let seen = Arc::new(Mutex::new(Vec::new()));

    world.schedule::<Write<Value>, _>(
        |p| {
            thread::sleep(Duration::from_millis(20));
            p.state_mut::<Value>().unwrap().0 = 42;
        },
        ScheduleData::new(),
    );
    for _ in 0..3 {
        let seen = seen.clone();
        world.schedule::<Read<Value>, _>(
            move |p| seen.lock().push(p.state::<Value>().unwrap().0),
            ScheduleData::new(),
        );
    }

    engine.tick().unwrap();
    assert_eq!(*seen.lock(), vec![42, 42, 42]);
}

#[test]
fn test_write_after_read_waits_for_readers() {
    let mut engine = engine(4);
    let world = engine.world().clone();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let log = log.clone();
        world.schedule::<Read<Value>, _>(
            move |p| {
                thread::sleep(Duration::from_millis(10));
                let value = p.state::<Value>().unwrap().0;
                log.lock().push(format!("read{i}={value}"));
            },
            ScheduleData::new(),
        );
    }
    let writer_log = log.clone();
    world.schedule::<Write<Value>, _>(
        move |p| {
            p.state_mut::<Value>().unwrap().0 = 7;
            writer_log.lock().push("write".to_string());
        },
        ScheduleData::new(),
    );

    engine.tick().unwrap();
    let log = log.lock();
    assert_eq!(log.len(), 4);
    assert_eq!(log[3], "write");
    assert!(log[..3].iter().all(|entry| entry.ends_with("=0")));
}

#[test]
fn test_writes_apply_in_schedule_order() {
    let mut engine = engine(4);
    let world = engine.world().clone();

    for i in 1..=20 {
        world.schedule::<Write<Value>, _>(
            move |p| {
                let mut value = p.state_mut::<Value>().unwrap();
                value.0 = value.0 * 10 % 1_000_003 + i;
            },
            ScheduleData::new(),
        );
    }

    engine.tick().unwrap();
    let mut expected = 0u32;
    for i in 1..=20 {
        expected = expected * 10 % 1_000_003 + i;
    }
    assert_eq!(world.state::<Value>().unwrap().0, expected);
}

#[test]
fn test_unrelated_jobs_overlap() {
    let mut engine = engine(2);
    let world = engine.world().clone();
    let (tx, rx) = crossbeam::channel::bounded::<()>(1);

    // Each job blocks until the other has started, so they must run at once
    let (tx2, rx2) = crossbeam::channel::bounded::<()>(1);
    world.schedule::<Write<Value>, _>(
        move |_| {
            tx.send(()).unwrap();
            rx2.recv_timeout(Duration::from_secs(5)).unwrap();
        },
        ScheduleData::new(),
    );
    world.schedule::<Write<Other>, _>(
        move |_| {
            tx2.send(()).unwrap();
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        },
        ScheduleData::new(),
    );

    let report = engine.tick().unwrap();
    assert_eq!(report.jobs_run, 2);
}

#[test]
fn test_flagless_job_runs_ahead_of_flagged_work() {
    // No workers: ready jobs run inline in dispatch order
    let mut engine = engine(0);
    let world = engine.world().clone();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let writer_log = log.clone();
    world.schedule::<Write<Value>, _>(
        move |_| writer_log.lock().push("flagged".to_string()),
        ScheduleData::new(),
    );
    let free_log = log.clone();
    world.schedule::<(), _>(
        move |_| free_log.lock().push("flagless".to_string()),
        ScheduleData::new(),
    );

    engine.tick().unwrap();
    assert_eq!(*log.lock(), vec!["flagless", "flagged"]);
}

#[test]
fn test_explicit_dependency_orders_unrelated_jobs() {
    let mut engine = engine(4);
    let world = engine.world().clone();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let first_log = log.clone();
    let first = world.schedule::<Write<Value>, _>(
        move |_| {
            thread::sleep(Duration::from_millis(20));
            first_log.lock().push("first".to_string());
        },
        ScheduleData::new(),
    );
    let second_log = log.clone();
    world.schedule::<Write<Other>, _>(
        move |_| second_log.lock().push("second".to_string()),
        ScheduleData::new().after(first),
    );

    engine.tick().unwrap();
    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert!(world.scheduler().is_finished(first));
}

#[test]
fn test_dependency_on_finished_job_is_satisfied() {
    let mut engine = engine(2);
    let world = engine.world().clone();
    let first = world.schedule::<(), _>(|_| {}, ScheduleData::new());
    engine.tick().unwrap();

    let ran = Arc::new(Mutex::new(false));
    let flag = ran.clone();
    world.schedule::<(), _>(move |_| *flag.lock() = true, ScheduleData::new().after(first));
    engine.tick().unwrap();
    assert!(*ran.lock());
}

#[test]
fn test_main_thread_jobs_run_on_ticking_thread() {
    let mut engine = engine(4);
    let world = engine.world().clone();
    let ticking = thread::current().id();
    let threads = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..5 {
        let threads = threads.clone();
        world.schedule::<Read<Value>, _>(
            move |_| threads.lock().push(thread::current().id()),
            ScheduleData::new().on_main_thread(),
        );
    }

    let report = engine.tick().unwrap();
    assert_eq!(report.main_thread_jobs, 5);
    assert!(threads.lock().iter().all(|id| *id == ticking));
}

#[test]
fn test_job_ids_carry_origin() {
    let mut engine = engine(2);
    let world = engine.world().clone();
    let inner = Arc::new(Mutex::new(None));
    let slot = inner.clone();

    let outer = world.schedule::<(), _>(
        move |p| {
            let id = p.schedule::<(), _>(|_| {}, ScheduleData::new());
            *slot.lock() = Some(id);
        },
        ScheduleData::new(),
    );
    engine.tick().unwrap();

    assert_eq!(outer.origin(), 0);
    let inner = inner.lock().unwrap();
    assert!(inner.origin() >= 1);
    assert!(inner.serial() > outer.serial());
}

#[test]
fn test_delayed_job_waits_for_later_tick() {
    let mut engine = engine(2);
    let world = engine.world().clone();
    let job = world.schedule::<Write<Value>, _>(
        |p| p.state_mut::<Value>().unwrap().0 = 99,
        ScheduleData::new().delayed(Duration::from_millis(30)),
    );

    engine.tick().unwrap();
    assert!(!world.scheduler().is_finished(job));
    assert_eq!(world.scheduler().delayed_count(), 1);

    thread::sleep(Duration::from_millis(40));
    engine.tick().unwrap();
    assert!(world.scheduler().is_finished(job));
    assert_eq!(world.state::<Value>().unwrap().0, 99);
}

struct Left(u32);
struct Right(u32);

#[test]
fn test_crossed_single_access_does_not_hang_tick() {
    let (tx, rx) = crossbeam::channel::bounded(1);

    thread::spawn(move || {
        let mut engine = engine(2);
        engine.register_component::<Left>("left").unwrap();
        engine.register_component::<Right>("right").unwrap();
        let world = engine.world().clone();
        let root = world.root_scene();
        let left = world.components::<Left>(root).unwrap().write().create(Left(1));
        let right = world.components::<Right>(root).unwrap().write().create(Right(2));
        let outcomes: Arc<Mutex<Vec<Result<Option<u32>>>>> = Arc::new(Mutex::new(Vec::new()));

        // Each job holds one storage whole and then reaches into the other's
        let seen = outcomes.clone();
        world.schedule::<(Write<Left>, ReadSingle<Right>), _>(
            move |p| {
                let _held = p.write::<Left>(root).unwrap();
                thread::sleep(Duration::from_millis(100));
                seen.lock().push(p.try_get(right, |r| r.0));
            },
            ScheduleData::new(),
        );
        let seen = outcomes.clone();
        world.schedule::<(Write<Right>, ReadSingle<Left>), _>(
            move |p| {
                let _held = p.write::<Right>(root).unwrap();
                thread::sleep(Duration::from_millis(100));
                seen.lock().push(p.try_get(left, |l| l.0));
            },
            ScheduleData::new(),
        );

        let report = engine.tick();
        let outcomes = std::mem::take(&mut *outcomes.lock());
        let _ = tx.send((report.map(|r| r.jobs_run), outcomes));
    });

    let (jobs_run, outcomes) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("tick did not finish");
    assert_eq!(jobs_run.unwrap(), 2);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome, Ok(Some(_)) | Err(EcsError::StorageBusy { .. }))));
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(EcsError::StorageBusy { .. }))));
}
