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

//! Objects: archetype-typed entities that own a fixed set of components.
//!
//! An object lives in its type's [`Storage`] as an [`ObjectEntry`], which pairs
//! the user data with an [`ObjectHeader`] (id, hierarchy links and the list of
//! component slots). Components are referenced by `(type index, slot,
//! generation)` and resolved with [`ObjectEntry::find`].

use crate::component::{Component, ComponentRef, ComponentSet, ComponentSlot, ComponentSlots};
use crate::error::{EcsError, Result};
use crate::event_types::ObjectDestroyed;
use crate::hierarchy::Children;
use crate::scene::SceneId;
use crate::storage::{ErasedStorage, Handle, Storage};
use crate::type_index::{ComponentDomain, ObjectDomain, TypeIndex};
use crate::world::World;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// An object archetype.
///
/// ```
/// use bucket_ecs::Object;
///
/// struct Position { x: f32, y: f32 }
/// struct Velocity { dx: f32, dy: f32 }
///
/// struct Ball;
/// impl Object for Ball {
///     type Components = (Position, Velocity);
/// }
/// ```
pub trait Object: Send + Sync + 'static {
    /// Components created and destroyed together with the object
    type Components: ComponentSet;
}

/// Per-scene monotonic object id; never reused within a scene
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ObjectId(pub u64);

/// Type-erased weak reference to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyObjectRef {
    scene: SceneId,
    kind: TypeIndex<ObjectDomain>,
    slot: u32,
    generation: u32,
    id: ObjectId,
}

impl AnyObjectRef {
    pub(crate) fn new<O>(handle: Handle<ObjectEntry<O>>, kind: TypeIndex<ObjectDomain>, id: ObjectId) -> Self {
        Self {
            scene: handle.scene(),
            kind,
            slot: handle.slot(),
            generation: handle.generation(),
            id,
        }
    }

    pub fn scene(self) -> SceneId {
        self.scene
    }

    /// Object type index
    pub fn kind(self) -> TypeIndex<ObjectDomain> {
        self.kind
    }

    pub fn id(self) -> ObjectId {
        self.id
    }

    pub fn slot(self) -> u32 {
        self.slot
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Typed view, if this refers to an `O`
    pub fn downcast<O: Object>(self) -> Option<ObjectRef<O>> {
        (TypeIndex::<ObjectDomain>::try_of::<O>() == Some(self.kind)).then_some(ObjectRef {
            raw: self,
            _marker: PhantomData,
        })
    }

    pub(crate) fn entry_handle<O>(self) -> Handle<ObjectEntry<O>> {
        Handle::from_parts(self.scene, self.slot, self.generation)
    }
}

/// Typed weak reference to an object
pub struct ObjectRef<O> {
    raw: AnyObjectRef,
    _marker: PhantomData<fn() -> O>,
}

impl<O> ObjectRef<O> {
    pub(crate) fn from_any(raw: AnyObjectRef) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Drop the static type
    pub fn erase(self) -> AnyObjectRef {
        self.raw
    }

    pub fn scene(self) -> SceneId {
        self.raw.scene
    }

    pub fn id(self) -> ObjectId {
        self.raw.id
    }

    /// Handle into the object storage
    pub fn handle(self) -> Handle<ObjectEntry<O>> {
        self.raw.entry_handle()
    }
}

impl<O> Clone for ObjectRef<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for ObjectRef<O> {}

impl<O> PartialEq for ObjectRef<O> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<O> Eq for ObjectRef<O> {}

impl<O> Hash for ObjectRef<O> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<O> fmt::Debug for ObjectRef<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:?}, slot {}v{})", self.raw.id, self.raw.slot, self.raw.generation)
    }
}

impl<O> From<ObjectRef<O>> for AnyObjectRef {
    fn from(obj: ObjectRef<O>) -> Self {
        obj.raw
    }
}

/// Bookkeeping shared by every object type
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub(crate) kind: TypeIndex<ObjectDomain>,
    pub(crate) id: ObjectId,
    pub(crate) parent: Option<AnyObjectRef>,
    pub(crate) children: Children,
    pub(crate) components: ComponentSlots,
}

impl ObjectHeader {
    pub(crate) fn new(kind: TypeIndex<ObjectDomain>, id: ObjectId) -> Self {
        Self {
            kind,
            id,
            parent: None,
            children: Children::new(),
            components: ComponentSlots::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parent(&self) -> Option<AnyObjectRef> {
        self.parent
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    /// Archetype components first, then loose ones in attach order
    pub fn components(&self) -> &[ComponentSlot] {
        &self.components
    }

    pub(crate) fn find_slot(&self, kind: TypeIndex<ComponentDomain>) -> Option<&ComponentSlot> {
        self.components.iter().find(|slot| slot.kind == kind)
    }
}

/// An object as stored: header plus user data
pub struct ObjectEntry<O> {
    header: ObjectHeader,
    scene: SceneId,
    data: O,
}

impl<O> ObjectEntry<O> {
    pub(crate) fn new(header: ObjectHeader, scene: SceneId, data: O) -> Self {
        Self {
            header,
            scene,
            data,
        }
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    pub fn id(&self) -> ObjectId {
        self.header.id
    }

    pub fn parent(&self) -> Option<AnyObjectRef> {
        self.header.parent
    }

    pub fn children(&self) -> &Children {
        &self.header.children
    }

    pub fn data(&self) -> &O {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut O {
        &mut self.data
    }

    /// Handle to this object's `C`, if it has one
    pub fn find<C: Component>(&self) -> Option<ComponentRef<C>> {
        let kind = TypeIndex::<ComponentDomain>::try_of::<C>()?;
        self.header
            .find_slot(kind)
            .map(|slot| Handle::from_parts(self.scene, slot.slot, slot.generation))
    }

    /// Handle to this object's `C`.
    ///
    /// # Panics
    /// If the object has no `C`. Use [`find`](Self::find) when unsure.
    pub fn get<C: Component>(&self) -> ComponentRef<C> {
        match self.find::<C>() {
            Some(handle) => handle,
            None => panic!(
                "object {:?} has no {} component",
                self.header.id,
                std::any::type_name::<C>()
            ),
        }
    }

    pub fn has<C: Component>(&self) -> bool {
        self.find::<C>().is_some()
    }
}

impl<O> Deref for ObjectEntry<O> {
    type Target = O;

    fn deref(&self) -> &O {
        &self.data
    }
}

impl<O> DerefMut for ObjectEntry<O> {
    fn deref_mut(&mut self) -> &mut O {
        &mut self.data
    }
}

/// Operations the world needs on an object storage without knowing `O`
pub(crate) trait AnyObjectStorage: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn contains_ref(&self, obj: AnyObjectRef) -> bool;

    fn with_header(&self, obj: AnyObjectRef, f: &mut dyn FnMut(&ObjectHeader)) -> bool;

    fn with_header_mut(&self, obj: AnyObjectRef, f: &mut dyn FnMut(&mut ObjectHeader)) -> bool;

    /// `ObjectDestroyed<O>`, fired while the object is still live
    fn fire_destroyed(&self, world: &World, obj: AnyObjectRef);

    /// Free the entry slot; components must already be gone
    fn free(&self, obj: AnyObjectRef) -> Result<()>;

    /// Every live object in this storage
    fn refs(&self) -> Vec<AnyObjectRef>;
}

impl<O: Object> AnyObjectStorage for RwLock<Storage<ObjectEntry<O>>> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<O>()
    }

    fn contains_ref(&self, obj: AnyObjectRef) -> bool {
        self.read().contains(obj.entry_handle())
    }

    fn with_header(&self, obj: AnyObjectRef, f: &mut dyn FnMut(&ObjectHeader)) -> bool {
        match self.read().get(obj.entry_handle()) {
            Some(entry) => {
                f(&entry.header);
                true
            }
            None => false,
        }
    }

    fn with_header_mut(&self, obj: AnyObjectRef, f: &mut dyn FnMut(&mut ObjectHeader)) -> bool {
        match self.write().get_mut(obj.entry_handle()) {
            Some(entry) => {
                f(&mut entry.header);
                true
            }
            None => false,
        }
    }

    fn fire_destroyed(&self, world: &World, obj: AnyObjectRef) {
        world.invoke_immediate(&ObjectDestroyed::<O>::new(ObjectRef::from_any(obj)));
    }

    fn free(&self, obj: AnyObjectRef) -> Result<()> {
        self.write()
            .destroy(obj.entry_handle::<O>())
            .map_err(|_| EcsError::StaleHandle {
                type_name: std::any::type_name::<O>(),
            })
    }

    fn refs(&self) -> Vec<AnyObjectRef> {
        let storage = self.read();
        storage
            .iter()
            .map(|(handle, entry)| AnyObjectRef::new(handle, entry.header.kind, entry.header.id))
            .collect()
    }
}

impl ErasedStorage<dyn AnyObjectStorage> {
    pub(crate) fn object<O: Object>(storage: Storage<ObjectEntry<O>>) -> Self {
        let shared = Arc::new(RwLock::new(storage));
        Self::from_parts(shared.clone(), shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;
    struct Tag;

    struct Ball;
    impl Object for Ball {
        type Components = (Position, Velocity);
    }

    fn entry_with(slots: &[ComponentSlot]) -> ObjectEntry<Ball> {
        let mut header = ObjectHeader::new(TypeIndex::of::<Ball>(), ObjectId(7));
        header.components.extend_from_slice(slots);
        ObjectEntry::new(header, SceneId::default(), Ball)
    }

    #[test]
    fn test_find_scans_component_list() {
        let entry = entry_with(&[
            ComponentSlot {
                kind: TypeIndex::of::<Position>(),
                slot: 3,
                generation: 1,
            },
            ComponentSlot {
                kind: TypeIndex::of::<Velocity>(),
                slot: 9,
                generation: 0,
            },
        ]);

        let vel = entry.find::<Velocity>().unwrap();
        assert_eq!((vel.slot(), vel.generation()), (9, 0));
        assert_eq!(entry.get::<Position>().slot(), 3);
        assert!(!entry.has::<Tag>());
    }

    #[test]
    #[should_panic(expected = "has no")]
    fn test_get_missing_panics() {
        struct NeverAttached;
        let entry = entry_with(&[]);
        let _ = TypeIndex::<ComponentDomain>::of::<NeverAttached>();
        entry.get::<NeverAttached>();
    }

    #[test]
    fn test_downcast_checks_kind() {
        struct Crate;
        impl Object for Crate {
            type Components = ();
        }

        let handle = Handle::<ObjectEntry<Ball>>::from_parts(SceneId::default(), 0, 0);
        let any = AnyObjectRef::new(handle, TypeIndex::of::<Ball>(), ObjectId(1));
        assert!(any.downcast::<Ball>().is_some());
        let _ = TypeIndex::<ObjectDomain>::of::<Crate>();
        assert!(any.downcast::<Crate>().is_none());
    }
}
