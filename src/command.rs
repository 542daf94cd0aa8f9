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

//! Deferred action queue.
//!
//! Jobs cannot destroy objects or fire events in the middle of a tick without
//! racing other jobs, so they push commands here instead. The engine flushes
//! the queue on the main thread once all jobs of the tick have finished.

use crate::error::Result;
use crate::event::Event;
use crate::object::AnyObjectRef;
use crate::world::World;
use crossbeam::queue::SegQueue;

/// Type alias for deferred world actions
pub type CommandClosure = Box<dyn FnOnce(&World) -> Result<()> + Send>;

/// Deferred world mutation
pub enum Command {
    /// Fire an event through `invoke_immediate`
    Invoke(CommandClosure),

    /// Destroy an object and its components
    DestroyObject(AnyObjectRef),

    /// Re-parent an object
    SetParent {
        child: AnyObjectRef,
        parent: Option<AnyObjectRef>,
    },

    /// Custom world action
    Custom(CommandClosure),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Invoke(_) => write!(f, "Invoke(...)"),
            Command::DestroyObject(obj) => f.debug_tuple("DestroyObject").field(obj).finish(),
            Command::SetParent { child, parent } => f
                .debug_struct("SetParent")
                .field("child", child)
                .field("parent", parent)
                .finish(),
            Command::Custom(_) => write!(f, "Custom(...)"),
        }
    }
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Invoke(_) => "invoke",
            Command::DestroyObject(_) => "destroy_object",
            Command::SetParent { .. } => "set_parent",
            Command::Custom(_) => "custom",
        }
    }
}

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
}

/// Lock-free multi-producer command queue
#[derive(Default)]
pub struct CommandQueue {
    commands: SegQueue<Command>,
}

impl CommandQueue {
    /// Create new command queue
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        self.commands.push(command);
    }

    /// Queue an event for the next flush
    pub fn invoke<E: Event>(&self, event: E) {
        self.push(Command::Invoke(Box::new(move |world| {
            world.invoke_immediate(&event);
            Ok(())
        })));
    }

    /// Queue object destruction
    pub fn destroy_object(&self, object: AnyObjectRef) {
        self.push(Command::DestroyObject(object));
    }

    /// Queue a parent change
    pub fn set_parent(&self, child: AnyObjectRef, parent: Option<AnyObjectRef>) {
        self.push(Command::SetParent { child, parent });
    }

    /// Queue a custom world action
    pub fn add<F>(&self, f: F)
    where
        F: FnOnce(&World) -> Result<()> + Send + 'static,
    {
        self.push(Command::Custom(Box::new(f)));
    }

    /// Apply every queued command, including ones queued while flushing.
    ///
    /// A failing command is logged and counted; it does not stop the flush.
    pub fn flush(&self, world: &World) -> FlushReport {
        let mut report = FlushReport::default();
        while let Some(command) = self.commands.pop() {
            let label = command.label();
            let result = match command {
                Command::Invoke(f) | Command::Custom(f) => f(world),
                Command::DestroyObject(object) => world.destroy_object(object),
                Command::SetParent { child, parent } => world.set_parent(child, parent),
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    tracing::warn!(command = label, error = %err, "deferred command failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_flush_applies_in_order() {
        let world = World::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            world.commands().add(move |_| {
                log.lock().push(i);
                Ok(())
            });
        }
        assert_eq!(world.commands().len(), 3);

        let report = world.commands().flush(&world);
        assert_eq!(report, FlushReport { applied: 3, failed: 0 });
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(world.commands().is_empty());
    }

    #[test]
    fn test_failures_are_counted_not_fatal() {
        let world = World::new();
        let ran = Arc::new(AtomicUsize::new(0));

        world
            .commands()
            .add(|_| Err(crate::error::EcsError::SceneNotFound));
        let counter = ran.clone();
        world.commands().add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = world.commands().flush(&world);
        assert_eq!(report.failed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_commands_queued_during_flush_run_same_flush() {
        let world = World::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        world.commands().add(move |world| {
            let counter = counter.clone();
            world.commands().add(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        let report = world.commands().flush(&world);
        assert_eq!(report.applied, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
