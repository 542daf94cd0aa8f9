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

//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use bucket_ecs::prelude::*;
//! ```

pub use crate::access::{AccessFlags, AccessSet, Read, ReadSingle, Write, WriteSingle};
pub use crate::component::{Component, ComponentRef};
pub use crate::config::{ConflictPolicy, EngineConfig};
pub use crate::engine::{Engine, TickReport};
pub use crate::error::{EcsError, Result};
pub use crate::event::{Event, ListenerHandle};
pub use crate::event_types::{
    ComponentCreated, ComponentDestroyed, ComponentPostCreated, ObjectCreated, ObjectDestroyed,
};
pub use crate::object::{AnyObjectRef, Object, ObjectEntry, ObjectRef};
pub use crate::plugin::Plugin;
pub use crate::processor::Processor;
pub use crate::scene::SceneId;
pub use crate::schedule::{JobId, ScheduleData, ScheduleTimedInfo, TimedHandle};
pub use crate::system::{system, System};
pub use crate::threadpool::QueueOrder;
pub use crate::time::Time;
pub use crate::world::World;
