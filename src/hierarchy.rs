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

//! Parent/child links between objects.
//!
//! Links are weak bookkeeping: destroying a parent orphans its children and
//! destroying a child removes it from its parent, but nothing cascades.

use crate::error::{EcsError, Result};
use crate::object::{AnyObjectRef, ObjectHeader};
use crate::world::World;

/// Ordered child list without duplicates
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Children {
    children: Vec<AnyObjectRef>,
}

impl Children {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_child(&mut self, child: AnyObjectRef) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: AnyObjectRef) -> bool {
        if let Some(pos) = self.children.iter().position(|&c| c == child) {
            self.children.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, child: AnyObjectRef) -> bool {
        self.children.contains(&child)
    }

    pub fn iter(&self) -> impl Iterator<Item = AnyObjectRef> + '_ {
        self.children.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn to_vec(&self) -> Vec<AnyObjectRef> {
        self.children.clone()
    }
}

impl World {
    /// Attach `child` under `parent`, or detach it with `None`.
    ///
    /// Objects may be parented across scenes and object types. Fails on stale
    /// references, self-parenting, and cycles.
    pub fn set_parent(
        &self,
        child: impl Into<AnyObjectRef>,
        parent: Option<AnyObjectRef>,
    ) -> Result<()> {
        let child = child.into();
        if !self.object_exists(child) {
            return Err(EcsError::StaleHandle { type_name: "object" });
        }

        if let Some(parent) = parent {
            if parent == child {
                return Err(EcsError::HierarchyError(
                    "cannot parent an object to itself".into(),
                ));
            }
            if !self.object_exists(parent) {
                return Err(EcsError::StaleHandle { type_name: "object" });
            }
            let mut cursor = Some(parent);
            while let Some(ancestor) = cursor {
                if ancestor == child {
                    return Err(EcsError::HierarchyError(format!(
                        "parenting {:?} under {:?} would create a cycle",
                        child.id(),
                        parent.id()
                    )));
                }
                cursor = self.parent_of(ancestor);
            }
        }

        let old = self.parent_of(child);
        if old == parent {
            return Ok(());
        }

        if let Some(old) = old {
            self.with_header_mut(old, |h| h.children.remove_child(child));
        }
        self.with_header_mut(child, |h| h.parent = parent);
        if let Some(parent) = parent {
            self.with_header_mut(parent, |h| h.children.add_child(child));
        }
        Ok(())
    }

    pub fn parent_of(&self, obj: impl Into<AnyObjectRef>) -> Option<AnyObjectRef> {
        self.with_header(obj.into(), |h| h.parent).flatten()
    }

    pub fn children_of(&self, obj: impl Into<AnyObjectRef>) -> Vec<AnyObjectRef> {
        self.with_header(obj.into(), |h| h.children.to_vec())
            .unwrap_or_default()
    }

    /// Every descendant, depth first, parents before children
    pub fn descendants_of(&self, obj: impl Into<AnyObjectRef>) -> Vec<AnyObjectRef> {
        let mut out = Vec::new();
        let mut stack: Vec<AnyObjectRef> = self.children_of(obj).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children_of(next).into_iter().rev());
        }
        out
    }

    /// Remove `obj` from its parent and orphan its children
    pub(crate) fn unlink(&self, obj: AnyObjectRef, header: &ObjectHeader) {
        if let Some(parent) = header.parent {
            self.with_header_mut(parent, |h| h.children.remove_child(obj));
        }
        for child in header.children.iter() {
            self.with_header_mut(child, |h| h.parent = None);
        }
    }
}
