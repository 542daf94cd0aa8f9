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

//! Static view of how registered systems will interleave.
//!
//! The scheduler orders conflicting jobs by itself; this plan only reports
//! which systems end up serialised and why. The engine uses it to reject
//! conflicting system sets when `ConflictPolicy::Reject` is configured.

use crate::access::AccessSet;
use crate::type_index::FlagIndex;

/// Systems that can all run at the same time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionStage {
    pub system_indices: Vec<usize>,
}

/// Two systems touching the same type incompatibly
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemConflict {
    pub first: usize,
    pub second: usize,
    pub flag: FlagIndex,
}

/// Builds execution stages from system accesses
pub struct DependencyGraph {
    names: Vec<&'static str>,
    stages: Vec<ExecutionStage>,
    conflicts: Vec<SystemConflict>,
}

impl DependencyGraph {
    /// Create graph from `(name, access)` pairs in registration order
    pub fn new(systems: Vec<(&'static str, AccessSet)>) -> Self {
        let accesses: Vec<&AccessSet> = systems.iter().map(|(_, access)| access).collect();
        let stages = Self::build_stages(&accesses);
        let conflicts = Self::find_conflicts(&accesses);
        Self {
            names: systems.iter().map(|(name, _)| *name).collect(),
            stages,
            conflicts,
        }
    }

    /// Greedy grouping: each stage takes every remaining system that does not
    /// conflict with one already in it.
    fn build_stages(accesses: &[&AccessSet]) -> Vec<ExecutionStage> {
        let mut stages = vec![];
        let mut remaining: Vec<usize> = (0..accesses.len()).collect();

        while !remaining.is_empty() {
            let mut stage_systems: Vec<usize> = vec![];
            let mut next_remaining = vec![];

            for &idx in &remaining {
                // A system may not jump ahead of an earlier one it conflicts with
                let blocked = next_remaining
                    .iter()
                    .chain(stage_systems.iter())
                    .any(|&other: &usize| !accesses[idx].can_run_parallel(accesses[other]));
                if blocked {
                    next_remaining.push(idx);
                } else {
                    stage_systems.push(idx);
                }
            }

            stages.push(ExecutionStage {
                system_indices: stage_systems,
            });
            remaining = next_remaining;
        }

        stages
    }

    fn find_conflicts(accesses: &[&AccessSet]) -> Vec<SystemConflict> {
        let mut conflicts = Vec::new();
        for first in 0..accesses.len() {
            for second in (first + 1)..accesses.len() {
                if let Some(flag) = accesses[first].conflicts_with(accesses[second]) {
                    conflicts.push(SystemConflict {
                        first,
                        second,
                        flag,
                    });
                }
            }
        }
        conflicts
    }

    /// Get execution stages
    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    /// Get number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn conflicts(&self) -> &[SystemConflict] {
        &self.conflicts
    }

    pub fn name(&self, index: usize) -> &'static str {
        self.names.get(index).copied().unwrap_or("<unknown>")
    }

    /// Log the plan at debug level
    pub fn describe(&self) {
        tracing::debug!(stages = self.stages.len(), "system plan");
        for (stage_idx, stage) in self.stages.iter().enumerate() {
            let names: Vec<&str> = stage.system_indices.iter().map(|&i| self.name(i)).collect();
            tracing::debug!(stage = stage_idx + 1, systems = ?names, "stage");
        }
        for conflict in &self.conflicts {
            tracing::debug!(
                first = self.name(conflict.first),
                second = self.name(conflict.second),
                component = conflict.flag.name(),
                "systems serialised"
            );
        }
    }
}
