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

//! Bucket ECS - stable-address component storage with a flag-driven job scheduler
//!
//! Components and objects live in per-scene bucket storages whose slots never
//! move. Jobs declare `Read`/`Write`/`ReadSingle`/`WriteSingle` flags and the
//! scheduler orders them by those flags, running independent jobs in parallel
//! on a worker pool.

pub mod access;
pub mod bitset;
pub mod bucket;
pub mod command;
pub mod component;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_types;
pub mod executor;
pub mod hierarchy;
pub mod object;
pub mod plugin;
pub mod prelude;
pub mod processor;
#[cfg(feature = "profiling")]
pub mod profiling;
pub mod scene;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod system;
pub mod threadpool;
pub mod time;
pub mod type_index;
pub mod world;

#[cfg(test)]
mod tests;

pub use access::*;
pub use command::*;
pub use component::*;
pub use config::*;
pub use dependency::*;
pub use engine::*;
pub use error::*;
pub use event::*;
pub use event_types::*;
pub use executor::*;
pub use hierarchy::*;
pub use object::*;
pub use plugin::*;
pub use processor::*;
pub use scene::*;
pub use schedule::*;
pub use state::*;
pub use storage::*;
pub use system::*;
pub use threadpool::*;
pub use time::*;
pub use type_index::*;
pub use world::*;
