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

//! # Profiling Guide
//!
//! The crate logs through `tracing` at all times. With the `profiling`
//! feature it also opens spans around every tick (`tick`), every job
//! (`job`) and every object creation (`world.create_object`), and this
//! module provides subscribers to collect them.
//!
//! ```toml
//! [dependencies]
//! bucket_ecs = { version = "0.3", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! bucket_ecs::profiling::init_tracing()?;
//!
//! let mut engine = Engine::new(EngineConfig::default())?;
//! engine.run_ticks(100)?;
//! ```
//!
//! ## Performance Tips
//!
//! 1. Profile in release mode for accurate metrics
//! 2. Use `RUST_LOG=bucket_ecs=trace` to see job dispatch

use crate::error::{EcsError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bucket_ecs=info"))
}

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|err| EcsError::Config(err.to_string()))
}

/// Install a JSON subscriber writing to a daily rolling file in `dir`.
///
/// Keep the returned guard alive; dropping it flushes and stops the writer.
pub fn init_file_tracing(dir: impl AsRef<Path>, file_prefix: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir.as_ref())?;
    let appender = tracing_appender::rolling::daily(dir.as_ref(), file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|err| EcsError::Config(err.to_string()))?;
    Ok(guard)
}
