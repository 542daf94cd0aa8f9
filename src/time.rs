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

//! Tick timing.
//!
//! The engine registers a [`Time`] state and advances it at the start of
//! every tick. Jobs read it through `Read<Time>`.
//!
//! ```
//! use bucket_ecs::time::Time;
//! use std::time::{Duration, Instant};
//!
//! let start = Instant::now();
//! let mut time = Time::starting_at(start);
//! time.update_at(start + Duration::from_millis(16));
//! assert_eq!(time.delta(), Duration::from_millis(16));
//! assert_eq!(time.tick_count(), 1);
//! ```

use std::time::{Duration, Instant};

/// Time state for tracking tick timing
#[derive(Clone, Debug)]
pub struct Time {
    /// Time since last tick
    delta: Duration,
    /// Total elapsed time since start
    elapsed: Duration,
    /// Ticks processed so far
    tick_count: u64,
    /// Time scale multiplier (1.0 = normal speed)
    time_scale: f32,
    startup_time: Instant,
    last_update: Instant,
}

impl Time {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Time whose clock starts at `now`
    pub fn starting_at(now: Instant) -> Self {
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            tick_count: 0,
            time_scale: 1.0,
            startup_time: now,
            last_update: now,
        }
    }

    /// Update time (call once per tick)
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Advance the clock to `now`. An instant earlier than the last update
    /// yields a zero delta.
    pub fn update_at(&mut self, now: Instant) {
        self.delta = now.saturating_duration_since(self.last_update);
        self.elapsed = now.saturating_duration_since(self.startup_time);
        self.last_update = now;
        self.tick_count += 1;
    }

    /// Get delta time (time since last tick)
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Get scaled delta time
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32() * self.time_scale
    }

    /// Get total elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Set time scale (1.0 = normal, 0.5 = half speed, 2.0 = double speed)
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Pause time (set scale to 0)
    pub fn pause(&mut self) {
        self.time_scale = 0.0;
    }

    /// Resume time (set scale to 1)
    pub fn resume(&mut self) {
        self.time_scale = 1.0;
    }

    pub fn is_paused(&self) -> bool {
        self.time_scale == 0.0
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}
