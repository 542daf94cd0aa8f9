// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cross-module tests: jobs mutating the world through a processor

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    #![allow(clippy::module_inception)]
    use crate::{
        EcsError, Engine, EngineConfig, Object, ObjectCreated, ObjectDestroyed, Read,
        ReadSingle, Result, ScheduleData, World, Write, WriteSingle,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(f32);
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(f32);

    #[derive(Default)]
    struct Ball;
    impl Object for Ball {
        type Components = (Position, Velocity);
    }

    fn engine() -> Result<Engine> {
        let engine = Engine::new(EngineConfig::new().with_worker_threads(2))?;
        engine.register_component::<Position>("position")?;
        engine.register_component::<Velocity>("velocity")?;
        engine.register_object::<Ball>("ball")?;
        Ok(engine)
    }

    #[test]
    fn test_job_created_object_events_wait_for_sync_point() -> Result<()> {
        let mut engine = engine()?;
        let world = engine.world().clone();
        let created = Arc::new(AtomicUsize::new(0));
        let seen = created.clone();
        world.listen::<ObjectCreated<Ball>, _>(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let observed_inside_job = Arc::new(AtomicUsize::new(usize::MAX));
        let observed = observed_inside_job.clone();
        let counter = created.clone();
        let root = world.root_scene();
        world.schedule::<(Write<Ball>, Write<Position>, Write<Velocity>), _>(
            move |p| {
                p.create_object(root, Ball, (Position(0.0), Velocity(1.0)))
                    .unwrap();
                observed.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
            },
            ScheduleData::new(),
        );

        let report = engine.tick()?;
        assert_eq!(observed_inside_job.load(Ordering::SeqCst), 0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(report.commands_flushed >= 1);
        assert_eq!(world.object_count::<Ball>(), 1);
        Ok(())
    }

    #[test]
    fn test_create_object_requires_component_writes() -> Result<()> {
        let mut engine = engine()?;
        let world = engine.world().clone();
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        let root = world.root_scene();
        world.schedule::<(Write<Ball>, Write<Position>), _>(
            move |p| {
                let outcome = p.create_object(root, Ball, (Position(0.0), Velocity(0.0)));
                *slot.lock() = Some(outcome.map(|_| ()));
            },
            ScheduleData::new(),
        );

        engine.tick()?;
        let outcome = result.lock().take();
        assert!(matches!(
            outcome,
            Some(Err(EcsError::AccessNotDeclared { requested: "Write", .. }))
        ));
        assert_eq!(world.object_count::<Ball>(), 0);
        Ok(())
    }

    #[test]
    fn test_destroy_from_job_is_deferred() -> Result<()> {
        let mut engine = engine()?;
        let world = engine.world().clone();
        let ball = world.create_object(world.root_scene(), Ball, (Position(1.0), Velocity(1.0)))?;
        let destroyed = Arc::new(AtomicUsize::new(0));
        let seen = destroyed.clone();
        world.listen::<ObjectDestroyed<Ball>, _>(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let alive_in_job = Arc::new(AtomicUsize::new(0));
        let alive = alive_in_job.clone();
        world.schedule::<(), _>(
            move |p| {
                p.destroy_object(ball);
                if p.object_exists(ball) {
                    alive.fetch_add(1, Ordering::SeqCst);
                }
            },
            ScheduleData::new(),
        );

        engine.tick()?;
        assert_eq!(alive_in_job.load(Ordering::SeqCst), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!world.object_exists(ball));
        assert_eq!(world.read_components::<Position>(world.root_scene())?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_try_get_follows_weak_reference() -> Result<()> {
        let mut engine = engine()?;
        let world = engine.world().clone();
        let ball = world.create_object(world.root_scene(), Ball, (Position(2.0), Velocity(0.5)))?;
        let position = world.find_component::<Position>(ball).ok_or(EcsError::SceneNotFound)?;
        let velocity = world.find_component::<Velocity>(ball).ok_or(EcsError::SceneNotFound)?;

        world.schedule::<(WriteSingle<Position>, ReadSingle<Velocity>), _>(
            move |p| {
                let dv = p.try_get(velocity, |v| v.0).unwrap().unwrap_or(0.0);
                p.try_get_mut(position, |pos| pos.0 += dv).unwrap();
            },
            ScheduleData::new(),
        );
        engine.tick()?;
        assert_eq!(
            world.read_components::<Position>(world.root_scene())?.get(position),
            Some(&Position(2.5))
        );

        world.destroy_object(ball)?;
        let after = Arc::new(Mutex::new(Some(0.0)));
        let slot = after.clone();
        world.schedule::<ReadSingle<Position>, _>(
            move |p| *slot.lock() = p.try_get(position, |pos| pos.0).unwrap(),
            ScheduleData::new(),
        );
        engine.tick()?;
        assert_eq!(*after.lock(), None);
        Ok(())
    }

    #[test]
    fn test_reparent_from_job() -> Result<()> {
        let mut engine = engine()?;
        let world = engine.world().clone();
        let root = world.root_scene();
        let parent = world.create_object(root, Ball, (Position(0.0), Velocity(0.0)))?;
        let child = world.create_object(root, Ball, (Position(0.0), Velocity(0.0)))?;

        world.schedule::<(), _>(
            move |p| p.set_parent(child, Some(parent.erase())),
            ScheduleData::new(),
        );
        assert_eq!(world.parent_of(child), None);
        engine.tick()?;
        assert_eq!(world.parent_of(child), Some(parent.erase()));
        assert_eq!(world.children_of(parent), vec![child.erase()]);

        world.destroy_object(parent)?;
        assert_eq!(world.parent_of(child), None);
        Ok(())
    }

    #[test]
    fn test_parallel_readers_see_writer_result() -> Result<()> {
        let mut engine = engine()?;
        let world: Arc<World> = engine.world().clone();
        let root = world.root_scene();
        for i in 0..100 {
            world.create_object(root, Ball, (Position(i as f32), Velocity(1.0)))?;
        }

        world.schedule::<(Write<Position>, Read<Velocity>), _>(
            |p| {
                let root = p.root_scene();
                let velocities: Vec<f32> = p.read::<Velocity>(root).unwrap().iter().map(|(_, v)| v.0).collect();
                let mut positions = p.write::<Position>(root).unwrap();
                for ((_, pos), dv) in positions.iter_mut().zip(velocities) {
                    pos.0 += dv;
                }
            },
            ScheduleData::new(),
        );
        let sums = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..4 {
            let sums = sums.clone();
            world.schedule::<Read<Position>, _>(
                move |p| {
                    let mut total = 0.0;
                    p.for_each::<Position, _>(|_, pos| total += pos.0).unwrap();
                    sums.lock().push(total);
                },
                ScheduleData::new(),
            );
        }

        engine.tick()?;
        // sum(0..100) + 100
        assert_eq!(*sums.lock(), vec![5050.0; 4]);
        Ok(())
    }
}
