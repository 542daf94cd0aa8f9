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

//! Job scheduler with dependency inference from access flags.
//!
//! Every flag index has a [`TypeSchedule`] listing the outstanding jobs that
//! read it, write it, or touch single instances of it. A new job depends on:
//!
//! * `Read<T>`: every outstanding writer of `T`
//! * `Write<T>`: every outstanding reader and writer of `T`
//! * `ReadSingle<T>` / `WriteSingle<T>`: the previous single-access job on `T`
//!
//! A job with dependencies waits with a wakeup count; finishing a job
//! decrements the count of each dependent and queues the ones reaching zero.
//! Jobs are queued in submission order, so conflicting jobs always run in
//! the order they were scheduled.

use crate::access::{AccessKind, AccessSet};
use crate::threadpool::current_worker;
use crate::type_index::FlagIndex;
use crate::world::World;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of one scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId {
    origin: u32,
    serial: u64,
}

impl JobId {
    /// Pool worker that scheduled the job, plus one (0 is the main thread)
    pub fn origin(self) -> u32 {
        self.origin
    }

    /// Monotonic submission number
    pub fn serial(self) -> u64 {
        self.serial
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            origin: 0,
            serial: u64::MAX,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}:{}", self.origin, self.serial)
    }
}

/// Options for a one-shot job
#[derive(Debug, Clone, Default)]
pub struct ScheduleData {
    /// Run only after this job finished
    pub dependency: Option<JobId>,
    /// Run on the thread driving the tick instead of a pool worker
    pub main_thread: bool,
    /// Hold the job back until this much time passed
    pub delay: Option<Duration>,
    /// Name used in logs
    pub label: Option<&'static str>,
}

impl ScheduleData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(mut self, job: JobId) -> Self {
        self.dependency = Some(job);
        self
    }

    pub fn on_main_thread(mut self) -> Self {
        self.main_thread = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

/// Predicate deciding that a timed job should stop
pub type UnschedulePredicate = Arc<dyn Fn(&World) -> bool + Send + Sync>;

/// Options for a repeating job
#[derive(Clone)]
pub struct ScheduleTimedInfo {
    pub interval: Duration,
    /// Wait before the first run
    pub delay: Duration,
    pub main_thread: bool,
    /// Checked before each run; `true` unschedules the job instead
    pub unschedule_when: Option<UnschedulePredicate>,
    pub label: Option<&'static str>,
}

impl ScheduleTimedInfo {
    /// Run every `interval`, starting on the next tick
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            delay: Duration::ZERO,
            main_thread: false,
            unschedule_when: None,
            label: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn on_main_thread(mut self) -> Self {
        self.main_thread = true;
        self
    }

    pub fn unschedule_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&World) -> bool + Send + Sync + 'static,
    {
        self.unschedule_when = Some(Arc::new(predicate));
        self
    }

    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

impl fmt::Debug for ScheduleTimedInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleTimedInfo")
            .field("interval", &self.interval)
            .field("delay", &self.delay)
            .field("main_thread", &self.main_thread)
            .field("unschedule_when", &self.unschedule_when.is_some())
            .field("label", &self.label)
            .finish()
    }
}

new_key_type! {
    /// Handle of a repeating job
    pub struct TimedHandle;
}

/// Type-erased job body
pub(crate) type JobFn = Box<dyn FnOnce(&World, JobId) + Send>;

/// Builds one instance of a timed job
pub(crate) type JobFactory = Arc<dyn Fn() -> JobFn + Send + Sync>;

/// A job whose dependencies are all finished
pub(crate) struct ReadyJob {
    pub(crate) id: JobId,
    pub(crate) label: Option<&'static str>,
    pub(crate) main_thread: bool,
    pub(crate) run: JobFn,
}

impl fmt::Debug for ReadyJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyJob")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("main_thread", &self.main_thread)
            .finish()
    }
}

/// Outstanding jobs per flag index
#[derive(Debug, Default)]
pub struct TypeSchedule {
    pub read_jobs: Vec<JobId>,
    pub write_jobs: Vec<JobId>,
    pub single_access_jobs: Vec<JobId>,
}

struct PendingJob {
    /// Unfinished dependencies, plus one while the job is not yet registered
    wakeup: usize,
    dependents: SmallVec<[JobId; 4]>,
    /// Taken when the job becomes ready
    job: Option<ReadyJob>,
    access: Arc<AccessSet>,
    explicit: Option<JobId>,
}

struct TimedEntry {
    info: ScheduleTimedInfo,
    access: Arc<AccessSet>,
    factory: JobFactory,
    next_due: Instant,
    in_flight: Option<JobId>,
    doomed: bool,
}

#[derive(Default)]
struct SchedulerState {
    types: FxHashMap<FlagIndex, TypeSchedule>,
    pending: FxHashMap<JobId, PendingJob>,
    unconstrained: VecDeque<ReadyJob>,
    ready: VecDeque<ReadyJob>,
    ready_main: VecDeque<ReadyJob>,
    delayed: Vec<(Instant, JobId)>,
    timed: SlotMap<TimedHandle, TimedEntry>,
    doomed: Vec<TimedHandle>,
    running: usize,
}

impl SchedulerState {
    fn insert(&mut self, id: JobId, job: ReadyJob, access: Arc<AccessSet>, explicit: Option<JobId>) {
        self.pending.insert(
            id,
            PendingJob {
                wakeup: 1,
                dependents: SmallVec::new(),
                job: Some(job),
                access,
                explicit,
            },
        );
    }

    /// Link `id` behind the jobs it conflicts with and drop its registration hold
    fn register(&mut self, id: JobId) {
        let Some(entry) = self.pending.get(&id) else {
            return;
        };
        let access = entry.access.clone();
        let explicit = entry.explicit;

        let mut deps: SmallVec<[JobId; 8]> = SmallVec::new();
        let pending = &self.pending;
        let alive = |job: &JobId| *job != id && pending.contains_key(job);

        for flag in access.flags() {
            let queues = self.types.entry(flag.index).or_default();
            match flag.kind {
                AccessKind::Read => {
                    queues.write_jobs.retain(alive);
                    deps.extend(queues.write_jobs.iter().copied());
                    queues.read_jobs.retain(alive);
                    queues.read_jobs.push(id);
                }
                AccessKind::Write => {
                    queues.read_jobs.retain(alive);
                    queues.write_jobs.retain(alive);
                    deps.extend(queues.read_jobs.drain(..));
                    deps.extend(queues.write_jobs.drain(..));
                    queues.write_jobs.push(id);
                }
                AccessKind::ReadSingle | AccessKind::WriteSingle => {
                    queues.single_access_jobs.retain(alive);
                    deps.extend(queues.single_access_jobs.drain(..));
                    queues.single_access_jobs.push(id);
                }
            }
        }
        deps.extend(explicit.filter(|dep| *dep != id));
        deps.sort_unstable_by_key(|dep| (dep.serial, dep.origin));
        deps.dedup();

        // A delayed job registers late; never wait on a job that waits on us
        let blocked = self.dependents_closure(id);

        let mut added = 0;
        for dep in deps {
            if blocked.contains(&dep) {
                continue;
            }
            if let Some(parent) = self.pending.get_mut(&dep) {
                parent.dependents.push(id);
                added += 1;
            }
        }

        if let Some(entry) = self.pending.get_mut(&id) {
            entry.wakeup = entry.wakeup + added - 1;
            if entry.wakeup == 0 {
                self.enqueue(id);
            }
        }
    }

    fn dependents_closure(&self, id: JobId) -> FxHashSet<JobId> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<JobId> = match self.pending.get(&id) {
            Some(entry) => entry.dependents.to_vec(),
            None => return seen,
        };
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                if let Some(entry) = self.pending.get(&next) {
                    stack.extend(entry.dependents.iter().copied());
                }
            }
        }
        seen
    }

    fn enqueue(&mut self, id: JobId) {
        let Some(entry) = self.pending.get_mut(&id) else {
            return;
        };
        let Some(job) = entry.job.take() else {
            return;
        };
        if job.main_thread {
            self.ready_main.push_back(job);
        } else if entry.access.is_empty() && entry.explicit.is_none() {
            self.unconstrained.push_back(job);
        } else {
            self.ready.push_back(job);
        }
    }

    fn timed_in_flight(&self, entry: &TimedEntry) -> bool {
        entry
            .in_flight
            .is_some_and(|job| self.pending.contains_key(&job))
    }
}

/// Dependency-tracking job scheduler shared by the world and its jobs
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    serial: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            serial: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> JobId {
        JobId {
            origin: current_worker().map_or(0, |worker| worker as u32 + 1),
            serial: self.serial.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn submit(&self, access: Arc<AccessSet>, data: ScheduleData, run: JobFn) -> JobId {
        let id = self.next_id();
        let job = ReadyJob {
            id,
            label: data.label,
            main_thread: data.main_thread,
            run,
        };

        let mut state = self.state.lock();
        state.insert(id, job, access, data.dependency);
        match data.delay.filter(|delay| !delay.is_zero()) {
            Some(delay) => {
                state.delayed.push((Instant::now() + delay, id));
                tracing::trace!(%id, ?delay, "job delayed");
            }
            None => state.register(id),
        }
        id
    }

    pub(crate) fn submit_timed(
        &self,
        access: Arc<AccessSet>,
        info: ScheduleTimedInfo,
        factory: JobFactory,
    ) -> TimedHandle {
        let next_due = Instant::now() + info.delay;
        self.state.lock().timed.insert(TimedEntry {
            info,
            access,
            factory,
            next_due,
            in_flight: None,
            doomed: false,
        })
    }

    /// Stop a timed job. The entry is dropped at the end of the current tick;
    /// an instance already scheduled still runs.
    pub fn unschedule(&self, handle: TimedHandle) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.timed.get_mut(handle) {
            Some(entry) if !entry.doomed => {
                entry.doomed = true;
                state.doomed.push(handle);
                true
            }
            _ => false,
        }
    }

    /// Register delayed jobs whose delay has passed
    pub(crate) fn promote_delayed(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let mut due = Vec::new();
        state.delayed.retain(|&(at, id)| {
            if at <= now {
                due.push((at, id));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|&(_, id)| id.serial);
        for &(_, id) in &due {
            state.register(id);
        }
        due.len()
    }

    /// Timed jobs due at `now` whose previous instance finished
    pub(crate) fn due_timed(&self, now: Instant) -> Vec<(TimedHandle, Option<UnschedulePredicate>)> {
        let state = self.state.lock();
        state
            .timed
            .iter()
            .filter(|(_, entry)| {
                !entry.doomed && entry.next_due <= now && !state.timed_in_flight(entry)
            })
            .map(|(handle, entry)| (handle, entry.info.unschedule_when.clone()))
            .collect()
    }

    /// Schedule one instance of a timed job
    pub(crate) fn spawn_timed(&self, handle: TimedHandle, now: Instant) -> Option<JobId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state.timed.get_mut(handle)?;
        if entry.doomed {
            return None;
        }

        let id = self.next_id();
        let job = ReadyJob {
            id,
            label: entry.info.label,
            main_thread: entry.info.main_thread,
            run: (entry.factory)(),
        };
        let access = entry.access.clone();
        entry.in_flight = Some(id);
        entry.next_due += entry.info.interval;
        if entry.next_due <= now {
            entry.next_due = now + entry.info.interval;
        }

        state.insert(id, job, access, None);
        state.register(id);
        Some(id)
    }

    /// Drain worker-eligible ready jobs, unconstrained ones first
    pub(crate) fn take_ready(&self) -> Vec<ReadyJob> {
        let mut state = self.state.lock();
        let mut jobs: Vec<ReadyJob> = state.unconstrained.drain(..).collect();
        jobs.extend(state.ready.drain(..));
        state.running += jobs.len();
        jobs
    }

    pub(crate) fn take_ready_main(&self) -> Option<ReadyJob> {
        let mut state = self.state.lock();
        let job = state.ready_main.pop_front()?;
        state.running += 1;
        Some(job)
    }

    /// Mark `id` finished and release its dependents
    pub(crate) fn complete(&self, id: JobId) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        let Some(finished) = state.pending.remove(&id) else {
            return;
        };
        for dependent in finished.dependents {
            let released = match state.pending.get_mut(&dependent) {
                Some(entry) => {
                    entry.wakeup -= 1;
                    entry.wakeup == 0
                }
                None => false,
            };
            if released {
                state.enqueue(dependent);
            }
        }
    }

    /// Drop unscheduled timed jobs with no instance still running
    pub(crate) fn collect_garbage(&self) -> usize {
        let mut state = self.state.lock();
        let doomed = std::mem::take(&mut state.doomed);
        let mut removed = 0;
        for handle in doomed {
            let busy = state
                .timed
                .get(handle)
                .is_some_and(|entry| state.timed_in_flight(entry));
            if busy {
                state.doomed.push(handle);
            } else if state.timed.remove(handle).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Nothing ready and nothing running. Jobs may still wait on a delay.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.running == 0
            && state.unconstrained.is_empty()
            && state.ready.is_empty()
            && state.ready_main.is_empty()
    }

    /// Scheduled jobs that have not finished, delayed ones included
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Jobs still held back by a delay
    pub fn delayed_count(&self) -> usize {
        self.state.lock().delayed.len()
    }

    /// Live timed jobs
    pub fn timed_count(&self) -> usize {
        self.state.lock().timed.len()
    }

    pub fn is_finished(&self, id: JobId) -> bool {
        id.serial < self.serial.load(Ordering::Relaxed) && !self.state.lock().pending.contains_key(&id)
    }

    /// Outstanding jobs recorded for `index`
    pub fn outstanding_for(&self, index: FlagIndex) -> (usize, usize, usize) {
        let state = self.state.lock();
        state.types.get(&index).map_or((0, 0, 0), |queues| {
            let alive = |jobs: &Vec<JobId>| jobs.iter().filter(|j| state.pending.contains_key(j)).count();
            (
                alive(&queues.read_jobs),
                alive(&queues.write_jobs),
                alive(&queues.single_access_jobs),
            )
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Scheduler")
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .field("timed", &state.timed.len())
            .finish()
    }
}
