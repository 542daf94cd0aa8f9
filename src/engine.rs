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

//! Main engine entry point: owns the world, the executor and the systems,
//! and drives them one tick at a time.

use crate::access::AccessSet;
use crate::component::Component;
use crate::config::{ConflictPolicy, EngineConfig};
use crate::dependency::DependencyGraph;
use crate::error::{EcsError, Result};
use crate::executor::{Executor, UNLABELED};
use crate::object::Object;
use crate::plugin::Plugin;
use crate::schedule::ScheduleData;
use crate::system::{BoxedSystem, System, SystemId};
use crate::time::Time;
use crate::type_index::{ComponentDomain, ObjectDomain, TypeIndex};
use crate::world::World;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "profiling")]
use tracing::info_span;

struct SystemSlot {
    id: SystemId,
    name: &'static str,
    access: AccessSet,
    main_thread: bool,
    system: Arc<Mutex<BoxedSystem>>,
}

type Failures = Arc<Mutex<Vec<(&'static str, EcsError)>>>;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 1-based tick number
    pub tick: u64,
    pub jobs_run: usize,
    pub main_thread_jobs: usize,
    pub commands_flushed: usize,
    pub commands_failed: usize,
    pub timed_spawned: usize,
    pub timed_collected: usize,
    pub duration: Duration,
}

pub struct Engine {
    world: Arc<World>,
    executor: Executor,
    systems: Vec<SystemSlot>,
    config: EngineConfig,
    started: bool,
    tick: u64,
    failures: Failures,
}

impl Engine {
    /// Build the world, register [`Time`] and start the worker pool
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let world = Arc::new(World::new());
        world.register_state("time", Time::new())?;
        let executor = Executor::new(&config)?;
        Ok(Self {
            world,
            executor,
            systems: Vec::new(),
            config,
            started: false,
            tick: 0,
            failures: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Ticks completed so far
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Add a plugin
    pub fn add_plugin<P: Plugin>(&mut self, plugin: P) -> Result<&mut Self> {
        tracing::debug!(plugin = plugin.name(), "registering plugin");
        plugin.build(self)?;
        Ok(self)
    }

    /// Register `C` using the configured bucket capacity
    pub fn register_component<C: Component>(&self, key: &str) -> Result<TypeIndex<ComponentDomain>> {
        self.world
            .register_component::<C>(key, self.config.default_bucket_capacity)
    }

    /// Register `O` using the configured bucket capacity
    pub fn register_object<O: Object>(&self, key: &str) -> Result<TypeIndex<ObjectDomain>> {
        let capacity = self.config.default_bucket_capacity;
        self.world.register_object::<O>(key, capacity, capacity)
    }

    /// Add a system; it runs once per tick, in registration order where flags conflict
    pub fn add_system<S: System + 'static>(&mut self, system: S) -> SystemId {
        let id = SystemId(self.systems.len() as u32);
        let name = system.name();
        tracing::debug!(system = name, id = id.0, "adding system");
        self.systems.push(SystemSlot {
            id,
            name,
            access: system.access(),
            main_thread: system.main_thread(),
            system: Arc::new(Mutex::new(Box::new(system))),
        });
        self.started = false;
        id
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Stage plan of the registered systems
    pub fn plan(&self) -> DependencyGraph {
        DependencyGraph::new(
            self.systems
                .iter()
                .map(|slot| (slot.name, slot.access.clone()))
                .collect(),
        )
    }

    /// Check the system set against the conflict policy.
    ///
    /// Called by the first `tick` after systems change.
    pub fn start(&mut self) -> Result<()> {
        let plan = self.plan();
        plan.describe();

        if self.config.conflict_policy == ConflictPolicy::Reject {
            if let Some(conflict) = plan.conflicts().first() {
                let first = plan.name(conflict.first);
                let second = plan.name(conflict.second);
                tracing::error!(
                    first,
                    second,
                    component = conflict.flag.name(),
                    "conflicting systems rejected"
                );
                return Err(EcsError::AccessConflict {
                    first: first.to_string(),
                    second: second.to_string(),
                    type_name: conflict.flag.name(),
                });
            }
        }

        self.started = true;
        Ok(())
    }

    /// Run one tick.
    ///
    /// Every scheduled job runs before the tick returns. A job panic or a
    /// failing system does not stop the tick; the first one is returned as
    /// an error after the command queue is flushed.
    pub fn tick(&mut self) -> Result<TickReport> {
        if !self.started {
            self.start()?;
        }

        self.tick += 1;
        #[cfg(feature = "profiling")]
        let _span = info_span!("tick", tick = self.tick).entered();

        let start = Instant::now();
        let world: &World = &self.world;
        let scheduler = world.scheduler();
        world.state_mut::<Time>()?.update_at(start);

        let promoted = scheduler.promote_delayed(start);
        let mut timed_spawned = 0;
        for (handle, predicate) in scheduler.due_timed(start) {
            if predicate.is_some_and(|done| done(world)) {
                scheduler.unschedule(handle);
                tracing::debug!(?handle, "timed job unscheduled by its predicate");
                continue;
            }
            if scheduler.spawn_timed(handle, start).is_some() {
                timed_spawned += 1;
            }
        }

        for slot in &self.systems {
            let system = slot.system.clone();
            let failures = self.failures.clone();
            let name = slot.name;
            let mut data = ScheduleData::new().labeled(name);
            if slot.main_thread {
                data = data.on_main_thread();
            }
            world.schedule_with(
                slot.access.clone(),
                move |processor| {
                    if let Err(err) = system.lock().run(processor) {
                        tracing::warn!(system = name, error = %err, "system failed");
                        failures.lock().push((name, err));
                    }
                },
                data,
            );
        }

        let run = self.executor.run_until_idle(&self.world)?;
        let flush = world.flush_commands();
        let timed_collected = scheduler.collect_garbage();

        let report = TickReport {
            tick: self.tick,
            jobs_run: run.jobs_run,
            main_thread_jobs: run.main_thread_jobs,
            commands_flushed: flush.applied,
            commands_failed: flush.failed,
            timed_spawned,
            timed_collected,
            duration: start.elapsed(),
        };
        tracing::trace!(
            tick = report.tick,
            jobs = report.jobs_run,
            promoted,
            commands = report.commands_flushed,
            "tick finished"
        );

        if let Some(panic) = run.panics.into_iter().next() {
            self.failures.lock().clear();
            return Err(EcsError::JobPanicked {
                job: panic.label.unwrap_or(UNLABELED).to_string(),
                message: panic.message,
            });
        }
        let failure = self.failures.lock().drain(..).next();
        if let Some((system, err)) = failure {
            return Err(EcsError::SystemFailed {
                system: system.to_string(),
                message: err.to_string(),
            });
        }

        Ok(report)
    }

    /// Run `count` ticks, stopping at the first error
    pub fn run_ticks(&mut self, count: usize) -> Result<Vec<TickReport>> {
        (0..count).map(|_| self.tick()).collect()
    }

    /// Stop the worker pool. Further ticks run with no workers spawned.
    pub fn shutdown(&mut self) -> Result<()> {
        self.executor.describe_profile();
        self.executor.shutdown()
    }

    pub fn system_id(&self, name: &str) -> Option<SystemId> {
        self.systems
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.id)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.executor.shutdown() {
            tracing::error!(error = %err, "engine dropped from a pool worker");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("systems", &self.systems.len())
            .field("tick", &self.tick)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Read, Write};
    use crate::schedule::ScheduleTimedInfo;
    use crate::system::system;

    struct Score(u32);
    struct Log(Vec<&'static str>);

    fn engine(config: EngineConfig) -> Engine {
        let engine = Engine::new(config.with_worker_threads(2)).unwrap();
        engine.world().register_state("score", Score(0)).unwrap();
        engine.world().register_state("log", Log(Vec::new())).unwrap();
        engine
    }

    #[test]
    fn test_systems_run_every_tick_in_order() {
        let mut engine = engine(EngineConfig::new());
        engine.add_system(system::<(Write<Score>, Write<Log>), _>("add", |p| {
            p.state_mut::<Score>()?.0 += 2;
            p.state_mut::<Log>()?.0.push("add");
            Ok(())
        }));
        engine.add_system(system::<(Write<Score>, Write<Log>), _>("double", |p| {
            p.state_mut::<Score>()?.0 *= 2;
            p.state_mut::<Log>()?.0.push("double");
            Ok(())
        }));

        let reports = engine.run_ticks(2).unwrap();
        assert_eq!(reports[1].tick, 2);
        assert_eq!(reports[1].jobs_run, 2);
        // (0 + 2) * 2 = 4, then (4 + 2) * 2 = 12
        assert_eq!(engine.world().state::<Score>().unwrap().0, 12);
        assert_eq!(
            engine.world().state::<Log>().unwrap().0,
            vec!["add", "double", "add", "double"]
        );
    }

    #[test]
    fn test_time_advances_per_tick() {
        let mut engine = engine(EngineConfig::new());
        engine.run_ticks(3).unwrap();
        assert_eq!(engine.world().state::<Time>().unwrap().tick_count(), 3);
        assert_eq!(engine.tick_count(), 3);
    }

    #[test]
    fn test_reject_policy_reports_conflict() {
        let mut engine = engine(EngineConfig::new().with_conflict_policy(ConflictPolicy::Reject));
        engine.add_system(system::<Write<Score>, _>("writer", |_| Ok(())));
        engine.add_system(system::<Read<Score>, _>("reader", |_| Ok(())));

        match engine.tick() {
            Err(EcsError::AccessConflict { first, second, .. }) => {
                assert_eq!(first, "writer");
                assert_eq!(second, "reader");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_policy_allows_conflict() {
        let mut engine = engine(EngineConfig::new());
        engine.add_system(system::<Write<Score>, _>("writer", |_| Ok(())));
        engine.add_system(system::<Read<Score>, _>("reader", |_| Ok(())));
        assert_eq!(engine.plan().stage_count(), 2);
        assert!(engine.tick().is_ok());
    }

    #[test]
    fn test_failing_system_reported_after_tick() {
        let mut engine = engine(EngineConfig::new());
        engine.add_system(system::<(), _>("broken", |_| Err(EcsError::SceneNotFound)));
        engine.add_system(system::<Write<Score>, _>("fine", |p| {
            p.state_mut::<Score>()?.0 += 1;
            Ok(())
        }));

        let err = engine.tick().unwrap_err();
        assert!(matches!(err, EcsError::SystemFailed { ref system, .. } if system == "broken"));
        assert_eq!(engine.world().state::<Score>().unwrap().0, 1);
        assert!(engine.tick().is_err());
    }

    #[test]
    fn test_panicking_system_reported() {
        let mut engine = engine(EngineConfig::new());
        engine.add_system(system::<(), _>("panics", |_| panic!("exploded")));

        match engine.tick() {
            Err(EcsError::JobPanicked { job, message }) => {
                assert_eq!(job, "panics");
                assert_eq!(message, "exploded");
            }
            other => panic!("expected panic report, got {other:?}"),
        }
    }

    #[test]
    fn test_timed_job_predicate_unschedules() {
        let mut engine = engine(EngineConfig::new());
        let handle = engine.world().schedule_timed::<Write<Score>, _>(
            |p| {
                if let Ok(mut score) = p.state_mut::<Score>() {
                    score.0 += 1;
                }
            },
            ScheduleTimedInfo::every(Duration::ZERO)
                .unschedule_when(|world| world.state::<Score>().map_or(true, |s| s.0 >= 3)),
        );

        for _ in 0..6 {
            engine.tick().unwrap();
        }
        assert_eq!(engine.world().state::<Score>().unwrap().0, 3);
        assert_eq!(engine.world().scheduler().timed_count(), 0);
        assert!(!engine.world().unschedule(handle));
    }

    #[test]
    fn test_main_thread_system_runs_on_ticking_thread() {
        let mut engine = engine(EngineConfig::new());
        let ticking = std::thread::current().id();
        engine.add_system(
            system::<Write<Score>, _>("pinned", move |p| {
                if std::thread::current().id() == ticking {
                    p.state_mut::<Score>()?.0 += 1;
                }
                Ok(())
            })
            .on_main_thread(),
        );

        let report = engine.tick().unwrap();
        assert_eq!(report.main_thread_jobs, 1);
        assert_eq!(engine.world().state::<Score>().unwrap().0, 1);
    }

    struct ScorePlugin;

    impl Plugin for ScorePlugin {
        fn name(&self) -> &'static str {
            "score"
        }

        fn build(&self, engine: &mut Engine) -> Result<()> {
            engine.add_system(system::<Write<Score>, _>("bump", |p| {
                p.state_mut::<Score>()?.0 += 5;
                Ok(())
            }));
            Ok(())
        }
    }

    #[test]
    fn test_plugin_adds_systems() {
        let mut engine = engine(EngineConfig::new());
        engine.add_plugin(ScorePlugin).unwrap();
        assert_eq!(engine.system_id("bump"), Some(SystemId(0)));
        engine.tick().unwrap();
        assert_eq!(engine.world().state::<Score>().unwrap().0, 5);
    }
}
