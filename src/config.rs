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

//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes:
//!
//! ```
//! use bucket_ecs::config::{ConflictPolicy, EngineConfig};
//!
//! let config = EngineConfig::from_json_str(r#"{ "worker_threads": 2, "conflict_policy": "reject" }"#).unwrap();
//! assert_eq!(config.worker_threads, 2);
//! assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
//! assert_eq!(config.default_bucket_capacity, 64);
//! ```

use crate::error::{EcsError, Result};
use crate::threadpool::QueueOrder;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What `Engine::start` does with systems whose flags conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Conflicting systems run one after another
    #[default]
    Serialize,
    /// Conflicting systems are a startup error
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pool workers. Zero runs every job on the ticking thread.
    pub worker_threads: usize,
    pub queue_order: QueueOrder,
    pub conflict_policy: ConflictPolicy,
    /// Slots per bucket for storages registered through the engine
    pub default_bucket_capacity: usize,
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            worker_threads: cores.saturating_sub(1).max(1),
            queue_order: QueueOrder::default(),
            conflict_policy: ConflictPolicy::default(),
            default_bucket_capacity: 64,
            thread_name: "bucket_ecs worker".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    pub fn with_queue_order(mut self, order: QueueOrder) -> Self {
        self.queue_order = order;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_default_bucket_capacity(mut self, capacity: usize) -> Self {
        self.default_bucket_capacity = capacity;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_bucket_capacity == 0 {
            return Err(EcsError::Config(
                "default_bucket_capacity must be at least 1".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(EcsError::Config("thread_name must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn test_queue_order_lowercase() {
        let config = EngineConfig::from_json_str(r#"{ "queue_order": "lifo" }"#).unwrap();
        assert_eq!(config.queue_order, QueueOrder::Lifo);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = EngineConfig::from_json_str("{ worker_threads: }").unwrap_err();
        assert!(matches!(err, EcsError::Config(_)));
    }

    #[test]
    fn test_zero_bucket_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "default_bucket_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, EcsError::Config(_)));
    }

    #[test]
    fn test_builder_roundtrips_through_json() {
        let config = EngineConfig::new()
            .with_worker_threads(0)
            .with_thread_name("sim")
            .with_conflict_policy(ConflictPolicy::Reject);
        let parsed = EngineConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_json_file("/nonexistent/bucket_ecs.json").unwrap_err();
        assert!(matches!(err, EcsError::IoError(_)));
    }
}
