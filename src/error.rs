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

//! Error types

use std::fmt;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Type was used before being registered with the world
    NotRegistered {
        kind: &'static str,
        type_name: &'static str,
    },

    /// Type or key registered twice
    AlreadyRegistered {
        kind: &'static str,
        type_name: &'static str,
        key: String,
    },

    /// Handle refers to a destroyed (or reused) slot
    StaleHandle { type_name: &'static str },

    /// Scene id does not refer to a live scene
    SceneNotFound,

    /// The root scene cannot be destroyed
    RootSceneRemoval,

    /// A job touched a type it did not declare a flag for
    AccessNotDeclared {
        type_name: &'static str,
        requested: &'static str,
    },

    /// A job tried to acquire a storage it already holds
    AlreadyBorrowed { type_name: &'static str },

    /// Another job kept a storage locked past the single-access wait
    StorageBusy { type_name: &'static str },

    /// Two systems hold conflicting flags under the reject policy
    AccessConflict {
        first: String,
        second: String,
        type_name: &'static str,
    },

    /// A job or system panicked while running
    JobPanicked { job: String, message: String },

    /// A system returned an error
    SystemFailed { system: String, message: String },

    /// Thread pool misuse or spawn failure
    ThreadPool(String),

    /// Hierarchy operation error (cycle, self-attach, etc.)
    HierarchyError(String),

    /// Configuration parse error
    Config(String),

    /// IO error (file operations, etc.)
    IoError(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::NotRegistered { kind, type_name } => {
                write!(f, "{kind} type {type_name} is not registered")
            }
            EcsError::AlreadyRegistered {
                kind,
                type_name,
                key,
            } => write!(f, "{kind} type {type_name} already registered (key {key:?})"),
            EcsError::StaleHandle { type_name } => {
                write!(f, "Stale handle to destroyed {type_name}")
            }
            EcsError::SceneNotFound => write!(f, "Scene not found"),
            EcsError::RootSceneRemoval => write!(f, "The root scene cannot be destroyed"),
            EcsError::AccessNotDeclared {
                type_name,
                requested,
            } => write!(f, "Job did not declare {requested} access to {type_name}"),
            EcsError::AlreadyBorrowed { type_name } => {
                write!(f, "Storage for {type_name} is already borrowed by this job")
            }
            EcsError::StorageBusy { type_name } => {
                write!(f, "Storage for {type_name} stayed locked by another job")
            }
            EcsError::AccessConflict {
                first,
                second,
                type_name,
            } => write!(
                f,
                "Systems {first} and {second} have conflicting access to {type_name}"
            ),
            EcsError::JobPanicked { job, message } => write!(f, "Job {job} panicked: {message}"),
            EcsError::SystemFailed { system, message } => {
                write!(f, "System {system} failed: {message}")
            }
            EcsError::ThreadPool(msg) => write!(f, "Thread pool error: {msg}"),
            EcsError::HierarchyError(msg) => write!(f, "Hierarchy error: {msg}"),
            EcsError::Config(msg) => write!(f, "Config error: {msg}"),
            EcsError::IoError(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<std::io::Error> for EcsError {
    fn from(err: std::io::Error) -> Self {
        EcsError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
