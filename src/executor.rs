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

//! Runs scheduled jobs until the scheduler drains.
//!
//! Worker-eligible jobs go to the thread pool; main-thread jobs run inline on
//! the thread that drives the executor. Finished jobs report back over a
//! completion channel, and each completion releases its dependents.

use crate::config::EngineConfig;
use crate::error::{EcsError, Result};
use crate::schedule::{JobId, ReadyJob};
use crate::threadpool::{panic_message, Task, ThreadPool};
use crate::world::World;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Label used for timings of jobs scheduled without one
pub const UNLABELED: &str = "<unlabeled>";

/// Timing summary for one job label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStats {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub call_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    min: Duration,
    max: Duration,
    total: Duration,
    count: u64,
}

impl Timing {
    fn new(duration: Duration) -> Self {
        Self {
            min: duration,
            max: duration,
            total: duration,
            count: 1,
        }
    }

    fn add(&mut self, duration: Duration) {
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
        self.total = self.total.saturating_add(duration);
        self.count += 1;
    }
}

/// Job profiler keeping running run-time totals per label.
///
/// Only the thread driving the executor records into it.
#[derive(Debug, Default)]
pub struct JobProfiler {
    timings: FxHashMap<&'static str, Timing>,
}

impl JobProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&mut self, label: &'static str, duration: Duration) {
        self.timings
            .entry(label)
            .and_modify(|timing| timing.add(duration))
            .or_insert_with(|| Timing::new(duration));
    }

    pub fn get_stats(&self, label: &str) -> Option<JobStats> {
        let timing = self.timings.get(label)?;
        let avg = Duration::from_nanos((timing.total.as_nanos() / timing.count as u128) as u64);
        Some(JobStats {
            min: timing.min,
            max: timing.max,
            avg,
            call_count: timing.count,
        })
    }

    /// Labels seen so far, sorted
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels: Vec<_> = self.timings.keys().copied().collect();
        labels.sort_unstable();
        labels
    }

    pub fn clear(&mut self) {
        self.timings.clear();
    }
}

/// Outcome of one job, sent back to the driving thread
#[derive(Debug)]
struct Completion {
    id: JobId,
    label: Option<&'static str>,
    duration: Duration,
    panic: Option<String>,
}

/// Job that panicked during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanic {
    pub job: JobId,
    pub label: Option<&'static str>,
    pub message: String,
}

/// What `run_until_idle` did
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Jobs run, main-thread ones included
    pub jobs_run: usize,
    pub main_thread_jobs: usize,
    pub panics: Vec<JobPanic>,
}

pub struct Executor {
    pool: ThreadPool,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    profiler: Mutex<JobProfiler>,
}

impl Executor {
    /// Build the pool described by `config` and start its workers
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut pool = ThreadPool::with_name(config.thread_name.clone(), config.queue_order);
        pool.spawn(config.worker_threads)?;
        let (sender, receiver) = unbounded();
        tracing::debug!(
            workers = config.worker_threads,
            order = ?config.queue_order,
            "executor started"
        );
        Ok(Self {
            pool,
            sender,
            receiver,
            profiler: Mutex::new(JobProfiler::new()),
        })
    }

    /// Run jobs until nothing is ready or running.
    ///
    /// Jobs scheduled by running jobs are picked up in the same call. Delayed
    /// jobs that are not yet due stay pending.
    pub fn run_until_idle(&self, world: &Arc<World>) -> Result<RunReport> {
        let scheduler = world.scheduler();
        let mut report = RunReport::default();
        let mut outstanding = 0usize;

        loop {
            let ready = scheduler.take_ready();
            if !ready.is_empty() {
                outstanding += ready.len();
                report.jobs_run += ready.len();
                let tasks: Vec<Task> = ready
                    .into_iter()
                    .map(|job| {
                        let world = world.clone();
                        let sender = self.sender.clone();
                        Box::new(move || {
                            let completion = run_job(&world, job);
                            // The receiver lives as long as the executor
                            let _ = sender.send(completion);
                        }) as Task
                    })
                    .collect();
                self.pool.batch(tasks)?;
            }

            while let Some(job) = scheduler.take_ready_main() {
                report.jobs_run += 1;
                report.main_thread_jobs += 1;
                let completion = run_job(world, job);
                self.finish(world, completion, &mut report);
            }

            if outstanding == 0 {
                if scheduler.is_idle() {
                    break;
                }
                continue;
            }

            let completion = self
                .receiver
                .recv()
                .map_err(|_| EcsError::ThreadPool("completion channel closed".to_string()))?;
            outstanding -= 1;
            self.finish(world, completion, &mut report);

            while let Ok(completion) = self.receiver.try_recv() {
                outstanding -= 1;
                self.finish(world, completion, &mut report);
            }
        }

        Ok(report)
    }

    fn finish(&self, world: &World, completion: Completion, report: &mut RunReport) {
        world.scheduler().complete(completion.id);
        self.profiler
            .lock()
            .record_execution(completion.label.unwrap_or(UNLABELED), completion.duration);
        if let Some(message) = completion.panic {
            tracing::error!(
                job = %completion.id,
                label = completion.label.unwrap_or(UNLABELED),
                panic = %message,
                "job panicked"
            );
            report.panics.push(JobPanic {
                job: completion.id,
                label: completion.label,
                message,
            });
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn profiler(&self) -> parking_lot::MutexGuard<'_, JobProfiler> {
        self.profiler.lock()
    }

    /// Log per-label timings at debug level
    pub fn describe_profile(&self) {
        let profiler = self.profiler.lock();
        for label in profiler.labels() {
            if let Some(stats) = profiler.get_stats(label) {
                tracing::debug!(
                    label,
                    calls = stats.call_count,
                    min = ?stats.min,
                    avg = ?stats.avg,
                    max = ?stats.max,
                    "job timings"
                );
            }
        }
    }

    /// Join the pool's workers. Queued tasks run first.
    pub fn shutdown(&mut self) -> Result<()> {
        self.pool.shutdown()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("pool", &self.pool).finish()
    }
}

fn run_job(world: &World, job: ReadyJob) -> Completion {
    let ReadyJob { id, label, run, .. } = job;

    #[cfg(feature = "profiling")]
    let _span = info_span!("job", %id, label = label.unwrap_or(UNLABELED)).entered();

    tracing::trace!(%id, label = label.unwrap_or(UNLABELED), "job dispatched");
    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| run(world, id)));

    Completion {
        id,
        label,
        duration: start.elapsed(),
        panic: result.err().map(|payload| panic_message(payload.as_ref())),
    }
}
