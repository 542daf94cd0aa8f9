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

//! Global singleton states (time, input snapshots, settings, ...)

use crate::error::{EcsError, Result};
use crate::type_index::{ensure_slot, StateDomain, TypeIndex};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::any::Any;
use std::sync::Arc;

/// Read guard over a state
pub type StateReadGuard<S> = ArcRwLockReadGuard<RawRwLock, S>;
/// Write guard over a state
pub type StateWriteGuard<S> = ArcRwLockWriteGuard<RawRwLock, S>;

struct StateEntry {
    key: String,
    value: Arc<dyn Any + Send + Sync>,
}

/// State table indexed by state type index
#[derive(Default)]
pub struct States {
    entries: RwLock<Vec<Option<StateEntry>>>,
}

impl States {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Send + Sync + 'static>(&self, key: &str, value: S) -> Result<()> {
        let index = TypeIndex::<StateDomain>::of::<S>().get();
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter().flatten().find(|e| e.key == key) {
            return Err(EcsError::AlreadyRegistered {
                kind: "state",
                type_name: std::any::type_name::<S>(),
                key: existing.key.clone(),
            });
        }
        ensure_slot(&mut entries, index);
        if let Some(existing) = &entries[index] {
            return Err(EcsError::AlreadyRegistered {
                kind: "state",
                type_name: std::any::type_name::<S>(),
                key: existing.key.clone(),
            });
        }

        entries[index] = Some(StateEntry {
            key: key.to_string(),
            value: Arc::new(RwLock::new(value)),
        });
        tracing::debug!(state = std::any::type_name::<S>(), key, "registered state");
        Ok(())
    }

    /// Shared cell for `S`
    pub fn get<S: Send + Sync + 'static>(&self) -> Result<Arc<RwLock<S>>> {
        TypeIndex::<StateDomain>::try_of::<S>()
            .and_then(|index| {
                let entries = self.entries.read();
                entries.get(index.get())?.as_ref().map(|e| e.value.clone())
            })
            .and_then(|value| value.downcast::<RwLock<S>>().ok())
            .ok_or(EcsError::NotRegistered {
                kind: "state",
                type_name: std::any::type_name::<S>(),
            })
    }

    pub fn contains<S: Send + Sync + 'static>(&self) -> bool {
        self.get::<S>().is_ok()
    }

    /// Registration key of `S`
    pub fn key_of<S: Send + Sync + 'static>(&self) -> Option<String> {
        let index = TypeIndex::<StateDomain>::try_of::<S>()?;
        let entries = self.entries.read();
        entries.get(index.get())?.as_ref().map(|e| e.key.clone())
    }
}
