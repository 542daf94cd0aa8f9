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

//! System trait and access metadata

use crate::access::{AccessFlags, AccessSet};
use crate::error::Result;
use crate::processor::Processor;
use std::marker::PhantomData;

/// System ID (registration order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub u32);

/// A job the engine schedules once per tick
pub trait System: Send {
    /// Get system name
    fn name(&self) -> &'static str;

    /// Flags every run is scheduled with
    fn access(&self) -> AccessSet;

    /// Run system logic against the world
    fn run(&mut self, processor: &Processor<'_>) -> Result<()>;

    /// Pin every run to the thread that ticks the engine
    fn main_thread(&self) -> bool {
        false
    }
}

/// Boxed system
pub type BoxedSystem = Box<dyn System>;

/// System built from a closure and a flag tuple
pub struct FnSystem<Flags, F> {
    name: &'static str,
    main_thread: bool,
    f: F,
    _flags: PhantomData<fn() -> Flags>,
}

impl<Flags, F> System for FnSystem<Flags, F>
where
    Flags: AccessFlags,
    F: FnMut(&Processor<'_>) -> Result<()> + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn access(&self) -> AccessSet {
        Flags::access()
    }

    fn run(&mut self, processor: &Processor<'_>) -> Result<()> {
        (self.f)(processor)
    }

    fn main_thread(&self) -> bool {
        self.main_thread
    }
}

impl<Flags, F> FnSystem<Flags, F> {
    pub fn on_main_thread(mut self) -> Self {
        self.main_thread = true;
        self
    }
}

/// Wrap a closure as a system.
///
/// ```
/// use bucket_ecs::prelude::*;
///
/// struct Position(f32);
/// struct Velocity(f32);
///
/// let movement = system::<(Write<Position>, Read<Velocity>), _>("movement", |p| {
///     let _ = p.access();
///     Ok(())
/// });
/// assert_eq!(movement.name(), "movement");
/// assert_eq!(movement.access().len(), 2);
/// ```
pub fn system<Flags, F>(name: &'static str, f: F) -> FnSystem<Flags, F>
where
    Flags: AccessFlags,
    F: FnMut(&Processor<'_>) -> Result<()> + Send,
{
    FnSystem {
        name,
        main_thread: false,
        f,
        _flags: PhantomData,
    }
}
