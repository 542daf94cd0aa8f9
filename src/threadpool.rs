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

//! Fixed-size worker pool over one shared task queue.
//!
//! Workers lock the queue, pop a task, unlock, run it and relock. A pool with
//! zero workers runs submitted tasks inline on the submitting thread, which
//! keeps single-threaded targets working without a separate code path.

use crate::error::{EcsError, Result};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unit of work accepted by the pool
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Which end of the queue workers take from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    /// Oldest task first
    #[default]
    Fifo,
    /// Newest task first
    Lifo,
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// (pool id, worker index) of the current thread
    static WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Index of the calling thread within whichever pool owns it
pub fn current_worker() -> Option<usize> {
    WORKER.with(|cell| cell.get()).map(|(_, index)| index)
}

struct PoolState {
    tasks: VecDeque<Task>,
    stop: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    condvar: Condvar,
    order: QueueOrder,
}

impl Shared {
    fn pop(&self, state: &mut PoolState) -> Option<Task> {
        match self.order {
            QueueOrder::Fifo => state.tasks.pop_front(),
            QueueOrder::Lifo => state.tasks.pop_back(),
        }
    }
}

pub struct ThreadPool {
    id: usize,
    name: String,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(order: QueueOrder) -> Self {
        Self::with_name("bucket_ecs worker", order)
    }

    /// Pool whose threads are named `"{name} #{index}"`
    pub fn with_name(name: impl Into<String>, order: QueueOrder) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    tasks: VecDeque::new(),
                    stop: false,
                }),
                condvar: Condvar::new(),
                order,
            }),
            workers: Vec::new(),
        }
    }

    /// Start `count` more workers
    pub fn spawn(&mut self, count: usize) -> Result<()> {
        self.reject_from_worker("spawn")?;
        for _ in 0..count {
            let index = self.workers.len();
            let shared = self.shared.clone();
            let pool_id = self.id;
            let handle = thread::Builder::new()
                .name(format!("{} #{}", self.name, index))
                .spawn(move || worker_loop(pool_id, index, shared))
                .map_err(|err| EcsError::ThreadPool(format!("failed to spawn worker: {err}")))?;
            self.workers.push(handle);
        }
        tracing::debug!(pool = %self.name, workers = self.workers.len(), "thread pool spawned");
        Ok(())
    }

    /// Queue one task and wake one worker
    pub fn emplace<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.reject_from_worker("emplace")?;
        if self.workers.is_empty() {
            task();
            return Ok(());
        }
        self.shared.state.lock().tasks.push_back(Box::new(task));
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Queue several tasks at once and wake every worker
    pub fn batch<I>(&self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = Task>,
    {
        self.reject_from_worker("batch")?;
        if self.workers.is_empty() {
            tasks.into_iter().for_each(|task| task());
            return Ok(());
        }
        self.shared.state.lock().tasks.extend(tasks);
        self.shared.condvar.notify_all();
        Ok(())
    }

    /// Stop and join every worker. Queued tasks still run first.
    ///
    /// The pool can be spawned again afterwards.
    pub fn shutdown(&mut self) -> Result<()> {
        self.reject_from_worker("shutdown")?;
        if self.workers.is_empty() {
            return Ok(());
        }

        self.shared.state.lock().stop = true;
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!(pool = %self.name, "worker thread panicked outside a task");
            }
        }
        self.shared.state.lock().stop = false;
        tracing::debug!(pool = %self.name, "thread pool shut down");
        Ok(())
    }

    /// Whether the calling thread is one of this pool's workers
    pub fn is_caller_owner(&self) -> bool {
        WORKER.with(|cell| cell.get()).is_some_and(|(pool, _)| pool == self.id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    pub fn order(&self) -> QueueOrder {
        self.shared.order
    }

    fn reject_from_worker(&self, op: &str) -> Result<()> {
        if self.is_caller_owner() {
            return Err(EcsError::ThreadPool(format!(
                "`{op}` called from one of the pool's own workers"
            )));
        }
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(error = %err, "thread pool dropped from its own worker");
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("order", &self.shared.order)
            .finish()
    }
}

fn worker_loop(pool_id: usize, index: usize, shared: Arc<Shared>) {
    WORKER.with(|cell| cell.set(Some((pool_id, index))));

    let mut state = shared.state.lock();
    loop {
        if let Some(task) = shared.pop(&mut state) {
            drop(state);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(
                    worker = index,
                    panic = %panic_message(payload.as_ref()),
                    "task panicked"
                );
            }
            state = shared.state.lock();
            continue;
        }
        if state.stop {
            break;
        }
        shared.condvar.wait(&mut state);
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
