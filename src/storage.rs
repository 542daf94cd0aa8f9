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

//! Typed slot storage over a [`BucketAllocator`].
//!
//! A storage hands out generation-checked [`Handle`]s. Destroyed slots go onto
//! a LIFO free-list and are reused by the next `create`; the memory itself is
//! never moved or returned to the system while the storage lives.
//!
//! Storages are plain data structures with no internal synchronisation. Each
//! one sits behind a `RwLock` that the scheduler keeps uncontended, so the lock
//! is taken once per job rather than once per element.

use crate::bucket::{stride_of, BucketAllocator};
use crate::component::Component;
use crate::error::{EcsError, Result};
use crate::event_types::ComponentDestroyed;
use crate::object::AnyObjectRef;
use crate::scene::SceneId;
use crate::world::World;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::alloc::Layout;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// Generation-checked reference to a slot in a [`Storage<T>`]
pub struct Handle<T> {
    scene: SceneId,
    slot: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn from_parts(scene: SceneId, slot: u32, generation: u32) -> Self {
        Self {
            scene,
            slot,
            generation,
            _marker: PhantomData,
        }
    }

    /// Scene whose storage owns the slot
    pub fn scene(self) -> SceneId {
        self.scene
    }

    pub fn slot(self) -> u32 {
        self.slot
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.scene == other.scene && self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scene.hash(state);
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{short}>({}v{})", self.slot, self.generation)
    }
}

#[derive(Debug, Clone, Default)]
struct SlotMeta {
    generation: u32,
    occupied: bool,
    owner: Option<AnyObjectRef>,
}

/// Slot storage for one type in one scene
pub struct Storage<T> {
    scene: SceneId,
    allocator: BucketAllocator,
    stride: usize,
    slots: Vec<SlotMeta>,
    free: Vec<u32>,
    live: usize,
    _marker: PhantomData<T>,
}

// SAFETY: the storage owns its `T`s; sharing it is sharing `&T`/`&mut T`.
unsafe impl<T: Send> Send for Storage<T> {}
unsafe impl<T: Sync> Sync for Storage<T> {}

impl<T> Storage<T> {
    /// Create a storage whose first block holds `initial_capacity` elements
    /// and whose later buckets hold `bucket_capacity` elements each.
    pub fn new(scene: SceneId, initial_capacity: usize, bucket_capacity: usize) -> Self {
        let layout = Layout::new::<T>();
        let stride = stride_of(layout);
        let mut allocator = BucketAllocator::new();
        allocator.allocate(
            initial_capacity.max(1) * stride,
            bucket_capacity.max(1) * stride,
            layout,
        );

        Self {
            scene,
            allocator,
            stride,
            slots: Vec::with_capacity(initial_capacity),
            free: Vec::new(),
            live: 0,
            _marker: PhantomData,
        }
    }

    /// Store `value`, reusing the most recently freed slot if there is one
    pub fn create(&mut self, value: T) -> Handle<T> {
        self.insert(value, None)
    }

    /// Store `value` with a back-reference to the object that owns it
    pub fn create_owned(&mut self, value: T, owner: AnyObjectRef) -> Handle<T> {
        self.insert(value, Some(owner))
    }

    /// Store `T::default()`
    pub fn create_default(&mut self) -> Handle<T>
    where
        T: Default,
    {
        self.create(T::default())
    }

    fn insert(&mut self, value: T, owner: Option<AnyObjectRef>) -> Handle<T> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.allocator.emplace_back(self.stride);
                self.slots.push(SlotMeta::default());
                (self.slots.len() - 1) as u32
            }
        };

        // SAFETY: the slot is backed by the allocator and currently vacant.
        unsafe { self.ptr(slot).as_ptr().write(value) };

        let meta = &mut self.slots[slot as usize];
        meta.occupied = true;
        meta.owner = owner;
        self.live += 1;
        Handle::from_parts(self.scene, slot, meta.generation)
    }

    /// Drop the value in place and push its slot on the free-list.
    ///
    /// Destroying twice (or through a handle whose slot was reused) returns
    /// [`EcsError::StaleHandle`].
    pub fn destroy(&mut self, handle: Handle<T>) -> Result<()> {
        let ptr = self.release(handle)?;
        // SAFETY: `release` verified the slot held a live value and marked it
        // vacant, so this is the only drop.
        unsafe { std::ptr::drop_in_place(ptr.as_ptr()) };
        Ok(())
    }

    /// Like [`destroy`](Self::destroy) but moves the value out.
    pub fn take(&mut self, handle: Handle<T>) -> Result<T> {
        let ptr = self.release(handle)?;
        // SAFETY: see `destroy`; the value is read out exactly once.
        Ok(unsafe { ptr.as_ptr().read() })
    }

    fn release(&mut self, handle: Handle<T>) -> Result<NonNull<T>> {
        if !self.contains(handle) {
            return Err(EcsError::StaleHandle {
                type_name: std::any::type_name::<T>(),
            });
        }

        self.free.push(handle.slot);
        let meta = &mut self.slots[handle.slot as usize];
        meta.occupied = false;
        meta.owner = None;
        meta.generation = meta.generation.wrapping_add(1);
        self.live -= 1;
        Ok(self.ptr(handle.slot))
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if !self.contains(handle) {
            return None;
        }
        // SAFETY: slot is occupied, and `&self` bounds the borrow.
        Some(unsafe { &*self.ptr(handle.slot).as_ptr() })
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if !self.contains(handle) {
            return None;
        }
        // SAFETY: slot is occupied, and `&mut self` makes the borrow unique.
        Some(unsafe { &mut *self.ptr(handle.slot).as_ptr() })
    }

    /// Whether `handle` refers to a live value in this storage
    pub fn contains(&self, handle: Handle<T>) -> bool {
        handle.scene == self.scene
            && self
                .slots
                .get(handle.slot as usize)
                .is_some_and(|meta| meta.occupied && meta.generation == handle.generation)
    }

    /// Owning object recorded at creation
    pub fn owner(&self, handle: Handle<T>) -> Option<AnyObjectRef> {
        if !self.contains(handle) {
            return None;
        }
        self.slots[handle.slot as usize].owner
    }

    /// Live handle currently occupying `slot`
    pub fn handle_at(&self, slot: u32) -> Option<Handle<T>> {
        let meta = self.slots.get(slot as usize)?;
        meta.occupied
            .then(|| Handle::from_parts(self.scene, slot, meta.generation))
    }

    pub fn scene(&self) -> SceneId {
        self.scene
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Element slots currently backed by memory
    pub fn capacity(&self) -> usize {
        self.allocator.capacity() / self.stride
    }

    /// Slots waiting on the free-list
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Live values in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.occupied)
            .map(move |(slot, meta)| {
                let slot = slot as u32;
                // SAFETY: occupied slot, borrow bounded by `&self`.
                let value = unsafe { &*self.ptr(slot).as_ptr() };
                (Handle::from_parts(self.scene, slot, meta.generation), value)
            })
    }

    /// Live values in slot order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> + '_ {
        let this = &*self;
        this.slots
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.occupied)
            .map(move |(slot, meta)| {
                let slot = slot as u32;
                // SAFETY: every slot is yielded once and the caller holds
                // `&mut self` for the iterator's lifetime.
                let value = unsafe { &mut *this.ptr(slot).as_ptr() };
                (Handle::from_parts(this.scene, slot, meta.generation), value)
            })
    }

    /// Snapshot of live handles, for destroying while walking
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Run `f` over every live value on the rayon pool
    #[cfg(feature = "parallel")]
    pub fn par_for_each_mut<F>(&mut self, f: F)
    where
        T: Send,
        F: Fn(Handle<T>, &mut T) + Send + Sync,
    {
        use rayon::prelude::*;

        struct SendPtr<T>(NonNull<T>);
        // SAFETY: each pointer is handed to exactly one closure call.
        unsafe impl<T: Send> Send for SendPtr<T> {}
        unsafe impl<T: Send> Sync for SendPtr<T> {}

        let targets: Vec<(Handle<T>, SendPtr<T>)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.occupied)
            .map(|(slot, meta)| {
                let slot = slot as u32;
                (
                    Handle::from_parts(self.scene, slot, meta.generation),
                    SendPtr(self.ptr(slot)),
                )
            })
            .collect();

        targets.into_par_iter().for_each(|(handle, ptr)| {
            // SAFETY: distinct slots, exclusive access through `&mut self`.
            f(handle, unsafe { &mut *ptr.0.as_ptr() })
        });
    }

    fn ptr(&self, slot: u32) -> NonNull<T> {
        let byte = slot as usize * self.stride;
        // SAFETY: every slot index below `slots.len()` was appended through
        // `emplace_back(stride)`, and block sizes are stride multiples so no
        // padding is ever inserted.
        unsafe { self.allocator.get_unchecked(byte) }.cast()
    }
}

impl<T> Drop for Storage<T> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        for slot in 0..self.slots.len() {
            if self.slots[slot].occupied {
                // SAFETY: occupied slots hold initialised values.
                unsafe { std::ptr::drop_in_place(self.ptr(slot as u32).as_ptr()) };
            }
        }
    }
}

impl<T> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("type", &std::any::type_name::<T>())
            .field("live", &self.live)
            .field("free", &self.free.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Read guard over a shared storage
pub type StorageReadGuard<T> = ArcRwLockReadGuard<RawRwLock, Storage<T>>;
/// Write guard over a shared storage
pub type StorageWriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, Storage<T>>;

/// Operations the world needs on a component storage without knowing `C`
pub(crate) trait AnyComponentStorage: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn len(&self) -> usize;

    /// Fire `ComponentDestroyed<C>` while the value is still live, then destroy it.
    fn destroy_slot(&self, world: &World, slot: u32, generation: u32) -> Result<()>;
}

impl<C: Component> AnyComponentStorage for RwLock<Storage<C>> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn len(&self) -> usize {
        self.read().len()
    }

    fn destroy_slot(&self, world: &World, slot: u32, generation: u32) -> Result<()> {
        let (handle, owner) = {
            let storage = self.read();
            let handle = Handle::<C>::from_parts(storage.scene(), slot, generation);
            if !storage.contains(handle) {
                return Err(EcsError::StaleHandle {
                    type_name: std::any::type_name::<C>(),
                });
            }
            (handle, storage.owner(handle))
        };

        world.invoke_immediate(&ComponentDestroyed::<C>::new(handle, owner));
        self.write().destroy(handle)
    }
}

/// A storage kept both as `dyn Any` (for typed access) and as a trait object
pub(crate) struct ErasedStorage<E: ?Sized> {
    typed: Arc<dyn Any + Send + Sync>,
    pub(crate) erased: Arc<E>,
}

impl<E: ?Sized> Clone for ErasedStorage<E> {
    fn clone(&self) -> Self {
        Self {
            typed: Arc::clone(&self.typed),
            erased: Arc::clone(&self.erased),
        }
    }
}

impl<E: ?Sized> ErasedStorage<E> {
    pub(crate) fn from_parts(typed: Arc<dyn Any + Send + Sync>, erased: Arc<E>) -> Self {
        Self { typed, erased }
    }

    pub(crate) fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<RwLock<Storage<T>>>> {
        Arc::clone(&self.typed).downcast::<RwLock<Storage<T>>>().ok()
    }
}

impl ErasedStorage<dyn AnyComponentStorage> {
    pub(crate) fn component<C: Component>(storage: Storage<C>) -> Self {
        let shared = Arc::new(RwLock::new(storage));
        Self::from_parts(shared.clone(), shared)
    }
}
