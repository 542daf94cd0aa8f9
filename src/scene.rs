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

//! Scenes own one storage per registered component and object type.
//!
//! Scenes form a tree rooted at the world's root scene; `for_each` style
//! queries walk a scene and all of its subscenes.

use crate::bitset::BitSet;
use crate::component::Component;
use crate::error::{EcsError, Result};
use crate::object::{AnyObjectStorage, Object, ObjectEntry, ObjectId};
use crate::storage::{AnyComponentStorage, ErasedStorage, Storage};
use crate::type_index::{ensure_slot, ComponentDomain, ObjectDomain, TypeIndex};
use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

new_key_type! {
    /// Generational scene key
    pub struct SceneId;
}

/// Shared handle to a typed storage
pub type SharedStorage<T> = Arc<RwLock<Storage<T>>>;

/// Storages for one scene
pub struct Scene {
    id: SceneId,
    components: RwLock<Vec<Option<ErasedStorage<dyn AnyComponentStorage>>>>,
    objects: RwLock<Vec<Option<ErasedStorage<dyn AnyObjectStorage>>>>,
    object_ticker: AtomicU64,
    object_exists: RwLock<BitSet>,
}

impl Scene {
    pub(crate) fn new(id: SceneId) -> Self {
        Self {
            id,
            components: RwLock::new(Vec::new()),
            objects: RwLock::new(Vec::new()),
            object_ticker: AtomicU64::new(0),
            object_exists: RwLock::new(BitSet::new()),
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub(crate) fn install_component<C: Component>(&self, initial: usize, bucket: usize) {
        let index = TypeIndex::<ComponentDomain>::of::<C>().get();
        let mut table = self.components.write();
        ensure_slot(&mut table, index);
        if table[index].is_none() {
            table[index] = Some(ErasedStorage::component(Storage::<C>::new(
                self.id, initial, bucket,
            )));
        }
    }

    pub(crate) fn install_object<O: Object>(&self, initial: usize, bucket: usize) {
        let index = TypeIndex::<ObjectDomain>::of::<O>().get();
        let mut table = self.objects.write();
        ensure_slot(&mut table, index);
        if table[index].is_none() {
            table[index] = Some(ErasedStorage::object(Storage::<ObjectEntry<O>>::new(
                self.id, initial, bucket,
            )));
        }
    }

    /// Component storage for `C`
    pub fn components<C: Component>(&self) -> Result<SharedStorage<C>> {
        TypeIndex::<ComponentDomain>::try_of::<C>()
            .and_then(|index| self.components.read().get(index.get())?.clone())
            .and_then(|cell| cell.downcast::<C>())
            .ok_or(EcsError::NotRegistered {
                kind: "component",
                type_name: std::any::type_name::<C>(),
            })
    }

    /// Object storage for `O`
    pub fn objects<O: Object>(&self) -> Result<SharedStorage<ObjectEntry<O>>> {
        TypeIndex::<ObjectDomain>::try_of::<O>()
            .and_then(|index| self.objects.read().get(index.get())?.clone())
            .and_then(|cell| cell.downcast::<ObjectEntry<O>>())
            .ok_or(EcsError::NotRegistered {
                kind: "object",
                type_name: std::any::type_name::<O>(),
            })
    }

    pub(crate) fn component_storage(
        &self,
        kind: TypeIndex<ComponentDomain>,
    ) -> Option<Arc<dyn AnyComponentStorage>> {
        let table = self.components.read();
        table.get(kind.get())?.as_ref().map(|cell| cell.erased.clone())
    }

    pub(crate) fn object_storage(
        &self,
        kind: TypeIndex<ObjectDomain>,
    ) -> Option<Arc<dyn AnyObjectStorage>> {
        let table = self.objects.read();
        table.get(kind.get())?.as_ref().map(|cell| cell.erased.clone())
    }

    pub(crate) fn object_storages(&self) -> Vec<Arc<dyn AnyObjectStorage>> {
        self.objects
            .read()
            .iter()
            .flatten()
            .map(|cell| cell.erased.clone())
            .collect()
    }

    /// Live objects of every type in this scene (not subscenes)
    pub fn object_count(&self) -> usize {
        self.object_exists.read().len()
    }

    /// Live components of every type in this scene (not subscenes)
    pub fn component_count(&self) -> usize {
        self.components
            .read()
            .iter()
            .flatten()
            .map(|cell| cell.erased.len())
            .sum()
    }

    pub(crate) fn next_object_id(&self) -> ObjectId {
        ObjectId(self.object_ticker.fetch_add(1, Ordering::Relaxed))
    }

    pub fn object_exists(&self, id: ObjectId) -> bool {
        self.object_exists.read().contains(id.0)
    }

    pub(crate) fn mark_exists(&self, id: ObjectId) {
        self.object_exists.write().insert(id.0);
    }

    pub(crate) fn clear_exists(&self, id: ObjectId) {
        self.object_exists.write().remove(id.0);
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("id", &self.id)
            .field("objects", &self.object_count())
            .finish()
    }
}

struct SceneNode {
    scene: Arc<Scene>,
    parent: Option<SceneId>,
    children: SmallVec<[SceneId; 4]>,
}

/// Scene ownership tree
pub struct SceneTree {
    nodes: SlotMap<SceneId, SceneNode>,
    root: SceneId,
}

impl SceneTree {
    pub(crate) fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert_with_key(|id| SceneNode {
            scene: Arc::new(Scene::new(id)),
            parent: None,
            children: SmallVec::new(),
        });
        Self { nodes, root }
    }

    pub fn root(&self) -> SceneId {
        self.root
    }

    pub fn get(&self, id: SceneId) -> Option<&Arc<Scene>> {
        self.nodes.get(id).map(|node| &node.scene)
    }

    pub fn contains(&self, id: SceneId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn insert_child(&mut self, parent: SceneId) -> Result<Arc<Scene>> {
        if !self.nodes.contains_key(parent) {
            return Err(EcsError::SceneNotFound);
        }
        let id = self.nodes.insert_with_key(|id| SceneNode {
            scene: Arc::new(Scene::new(id)),
            parent: Some(parent),
            children: SmallVec::new(),
        });
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(id);
        }
        Ok(self.nodes[id].scene.clone())
    }

    pub fn parent(&self, id: SceneId) -> Option<SceneId> {
        self.nodes.get(id)?.parent
    }

    /// Direct subscenes of `id`
    pub fn subscenes(&self, id: SceneId) -> Vec<SceneId> {
        self.nodes
            .get(id)
            .map(|node| node.children.to_vec())
            .unwrap_or_default()
    }

    /// `id` and every scene below it, parents first
    pub fn preorder(&self, id: SceneId) -> Vec<SceneId> {
        let mut out = Vec::new();
        if !self.nodes.contains_key(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.nodes.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Remove `id` and its subtree, returning the removed scenes
    pub(crate) fn remove_subtree(&mut self, id: SceneId) -> Result<Vec<Arc<Scene>>> {
        if id == self.root {
            return Err(EcsError::RootSceneRemoval);
        }
        let parent = self.nodes.get(id).ok_or(EcsError::SceneNotFound)?.parent;
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(p)) {
            node.children.retain(|child| *child != id);
        }

        Ok(self
            .preorder(id)
            .into_iter()
            .filter_map(|scene| self.nodes.remove(scene))
            .map(|node| node.scene)
            .collect())
    }

    /// Every live scene
    pub fn scenes(&self) -> impl Iterator<Item = &Arc<Scene>> + '_ {
        self.nodes.values().map(|node| &node.scene)
    }
}
