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

//! The view a job gets of the world.
//!
//! Every accessor checks the job's declared flags first. Whole-type guards
//! are tracked per job, so asking twice for the same storage while the first
//! guard is alive fails with `AlreadyBorrowed` instead of deadlocking.
//!
//! Structural changes (destroying objects, re-parenting, events) are queued
//! and applied once every job of the tick has finished.

use crate::access::{AccessFlags, AccessSet};
use crate::component::{Component, ComponentRef, ComponentSet};
use crate::error::{EcsError, Result};
use crate::event::{Dispatch, Event};
use crate::object::{AnyObjectRef, Object, ObjectEntry, ObjectRef};
use crate::scene::SceneId;
use crate::schedule::{JobId, ScheduleData, ScheduleTimedInfo, TimedHandle};
use crate::storage::Storage;
use crate::type_index::FlagIndex;
use crate::world::World;
use ahash::AHashSet;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

/// How long single-instance accessors wait for a storage another job has
/// locked through a whole-type guard
pub const SINGLE_ACCESS_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HeldKey {
    scene: Option<SceneId>,
    flag: FlagIndex,
}

struct HeldToken<'p> {
    held: &'p RefCell<AHashSet<HeldKey>>,
    key: HeldKey,
}

impl Drop for HeldToken<'_> {
    fn drop(&mut self) {
        self.held.borrow_mut().remove(&self.key);
    }
}

/// Shared guard handed out by a [`Processor`]
pub struct ReadGuard<'p, T> {
    guard: ArcRwLockReadGuard<RawRwLock, T>,
    _held: HeldToken<'p>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

/// Exclusive guard handed out by a [`Processor`]
pub struct WriteGuard<'p, T> {
    guard: ArcRwLockWriteGuard<RawRwLock, T>,
    _held: HeldToken<'p>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Flag-checked world access for one running job
pub struct Processor<'w> {
    world: &'w World,
    job: JobId,
    access: Arc<AccessSet>,
    held: RefCell<AHashSet<HeldKey>>,
}

impl<'w> Processor<'w> {
    pub(crate) fn new(world: &'w World, job: JobId, access: Arc<AccessSet>) -> Self {
        Self {
            world,
            job,
            access,
            held: RefCell::new(AHashSet::new()),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job
    }

    /// Flags this job was scheduled with
    pub fn access(&self) -> &AccessSet {
        &self.access
    }

    pub fn root_scene(&self) -> SceneId {
        self.world.root_scene()
    }

    /// Every scene, parents before subscenes
    pub fn scene_ids(&self) -> Vec<SceneId> {
        self.world.scene_ids()
    }

    fn require(&self, allowed: bool, type_name: &'static str, requested: &'static str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(EcsError::AccessNotDeclared {
                type_name,
                requested,
            })
        }
    }

    fn hold(&self, scene: Option<SceneId>, flag: FlagIndex, type_name: &'static str) -> Result<HeldToken<'_>> {
        let key = HeldKey { scene, flag };
        if !self.held.borrow_mut().insert(key) {
            return Err(EcsError::AlreadyBorrowed { type_name });
        }
        Ok(HeldToken {
            held: &self.held,
            key,
        })
    }

    fn is_held(&self, scene: Option<SceneId>, flag: FlagIndex) -> bool {
        self.held.borrow().contains(&HeldKey { scene, flag })
    }

    /// Shared guard over every `C` in `scene` (needs `Read<C>` or `Write<C>`)
    pub fn read<C: Component>(&self, scene: SceneId) -> Result<ReadGuard<'_, Storage<C>>> {
        let type_name = std::any::type_name::<C>();
        let flag = FlagIndex::of::<C>();
        self.require(self.access.allows_read(flag), type_name, "Read")?;
        let token = self.hold(Some(scene), flag, type_name)?;
        let storage = self.world.scene(scene)?.components::<C>()?;
        Ok(ReadGuard {
            guard: storage.read_arc(),
            _held: token,
        })
    }

    /// Exclusive guard over every `C` in `scene` (needs `Write<C>`)
    pub fn write<C: Component>(&self, scene: SceneId) -> Result<WriteGuard<'_, Storage<C>>> {
        let type_name = std::any::type_name::<C>();
        let flag = FlagIndex::of::<C>();
        self.require(self.access.allows_write(flag), type_name, "Write")?;
        let token = self.hold(Some(scene), flag, type_name)?;
        let storage = self.world.scene(scene)?.components::<C>()?;
        Ok(WriteGuard {
            guard: storage.write_arc(),
            _held: token,
        })
    }

    pub fn read_objects<O: Object>(
        &self,
        scene: SceneId,
    ) -> Result<ReadGuard<'_, Storage<ObjectEntry<O>>>> {
        let type_name = std::any::type_name::<O>();
        let flag = FlagIndex::of::<O>();
        self.require(self.access.allows_read(flag), type_name, "Read")?;
        let token = self.hold(Some(scene), flag, type_name)?;
        let storage = self.world.scene(scene)?.objects::<O>()?;
        Ok(ReadGuard {
            guard: storage.read_arc(),
            _held: token,
        })
    }

    pub fn write_objects<O: Object>(
        &self,
        scene: SceneId,
    ) -> Result<WriteGuard<'_, Storage<ObjectEntry<O>>>> {
        let type_name = std::any::type_name::<O>();
        let flag = FlagIndex::of::<O>();
        self.require(self.access.allows_write(flag), type_name, "Write")?;
        let token = self.hold(Some(scene), flag, type_name)?;
        let storage = self.world.scene(scene)?.objects::<O>()?;
        Ok(WriteGuard {
            guard: storage.write_arc(),
            _held: token,
        })
    }

    pub fn state<S: Send + Sync + 'static>(&self) -> Result<ReadGuard<'_, S>> {
        let type_name = std::any::type_name::<S>();
        let flag = FlagIndex::of::<S>();
        self.require(self.access.allows_read(flag), type_name, "Read")?;
        let token = self.hold(None, flag, type_name)?;
        let cell = self.world.states().get::<S>()?;
        Ok(ReadGuard {
            guard: cell.read_arc(),
            _held: token,
        })
    }

    pub fn state_mut<S: Send + Sync + 'static>(&self) -> Result<WriteGuard<'_, S>> {
        let type_name = std::any::type_name::<S>();
        let flag = FlagIndex::of::<S>();
        self.require(self.access.allows_write(flag), type_name, "Write")?;
        let token = self.hold(None, flag, type_name)?;
        let cell = self.world.states().get::<S>()?;
        Ok(WriteGuard {
            guard: cell.write_arc(),
            _held: token,
        })
    }

    /// Visit every `C` in every scene
    pub fn for_each<C, F>(&self, mut f: F) -> Result<()>
    where
        C: Component,
        F: FnMut(ComponentRef<C>, &C),
    {
        for scene in self.scene_ids() {
            let storage = self.read::<C>(scene)?;
            for (handle, value) in storage.iter() {
                f(handle, value);
            }
        }
        Ok(())
    }

    pub fn for_each_mut<C, F>(&self, mut f: F) -> Result<()>
    where
        C: Component,
        F: FnMut(ComponentRef<C>, &mut C),
    {
        for scene in self.scene_ids() {
            let mut storage = self.write::<C>(scene)?;
            for (handle, value) in storage.iter_mut() {
                f(handle, value);
            }
        }
        Ok(())
    }

    /// Visit every `O` in every scene
    pub fn for_each_object<O, F>(&self, mut f: F) -> Result<()>
    where
        O: Object,
        F: FnMut(ObjectRef<O>, &ObjectEntry<O>),
    {
        for scene in self.scene_ids() {
            let storage = self.read_objects::<O>(scene)?;
            for (handle, entry) in storage.iter() {
                f(object_ref(handle, entry), entry);
            }
        }
        Ok(())
    }

    pub fn for_each_object_mut<O, F>(&self, mut f: F) -> Result<()>
    where
        O: Object,
        F: FnMut(ObjectRef<O>, &mut ObjectEntry<O>),
    {
        for scene in self.scene_ids() {
            let mut storage = self.write_objects::<O>(scene)?;
            for (handle, entry) in storage.iter_mut() {
                let obj = object_ref(handle, entry);
                f(obj, entry);
            }
        }
        Ok(())
    }

    /// Read one component through a weak reference.
    ///
    /// Returns `Ok(None)` when the component (or its scene) is gone. Fails
    /// with `AlreadyBorrowed` while this job holds a guard on the same
    /// storage; read through that guard instead.
    ///
    /// The single track does not wait for whole-type jobs, so another job may
    /// be writing the storage. After [`SINGLE_ACCESS_WAIT`] this fails with
    /// `StorageBusy` instead of blocking.
    pub fn try_get<C, R>(&self, component: ComponentRef<C>, f: impl FnOnce(&C) -> R) -> Result<Option<R>>
    where
        C: Component,
    {
        let type_name = std::any::type_name::<C>();
        let flag = FlagIndex::of::<C>();
        self.require(self.access.allows_single_read(flag), type_name, "ReadSingle")?;
        if self.is_held(Some(component.scene()), flag) {
            return Err(EcsError::AlreadyBorrowed { type_name });
        }
        let Ok(scene) = self.world.scene(component.scene()) else {
            return Ok(None);
        };
        let storage = scene.components::<C>()?;
        let guard = storage
            .try_read_for(SINGLE_ACCESS_WAIT)
            .ok_or(EcsError::StorageBusy { type_name })?;
        Ok(guard.get(component).map(f))
    }

    pub fn try_get_mut<C, R>(
        &self,
        component: ComponentRef<C>,
        f: impl FnOnce(&mut C) -> R,
    ) -> Result<Option<R>>
    where
        C: Component,
    {
        let type_name = std::any::type_name::<C>();
        let flag = FlagIndex::of::<C>();
        self.require(self.access.allows_single_write(flag), type_name, "WriteSingle")?;
        if self.is_held(Some(component.scene()), flag) {
            return Err(EcsError::AlreadyBorrowed { type_name });
        }
        let Ok(scene) = self.world.scene(component.scene()) else {
            return Ok(None);
        };
        let storage = scene.components::<C>()?;
        let mut guard = storage
            .try_write_for(SINGLE_ACCESS_WAIT)
            .ok_or(EcsError::StorageBusy { type_name })?;
        Ok(guard.get_mut(component).map(f))
    }

    /// Read one object through a weak reference
    pub fn try_get_object<O, R>(
        &self,
        object: ObjectRef<O>,
        f: impl FnOnce(&ObjectEntry<O>) -> R,
    ) -> Result<Option<R>>
    where
        O: Object,
    {
        let type_name = std::any::type_name::<O>();
        let flag = FlagIndex::of::<O>();
        self.require(self.access.allows_single_read(flag), type_name, "ReadSingle")?;
        if self.is_held(Some(object.scene()), flag) {
            return Err(EcsError::AlreadyBorrowed { type_name });
        }
        if !self.object_exists(object) {
            return Ok(None);
        }
        let Ok(scene) = self.world.scene(object.scene()) else {
            return Ok(None);
        };
        let storage = scene.objects::<O>()?;
        let guard = storage
            .try_read_for(SINGLE_ACCESS_WAIT)
            .ok_or(EcsError::StorageBusy { type_name })?;
        Ok(guard.get(object.handle()).map(f))
    }

    pub fn object_exists(&self, object: impl Into<AnyObjectRef>) -> bool {
        self.world.object_exists(object.into())
    }

    /// Create an object with its components.
    ///
    /// Needs `Write<O>` and `Write<C>` for every component of the archetype.
    /// Lifecycle events are delivered at the next sync point.
    pub fn create_object<O: Object>(
        &self,
        scene: SceneId,
        data: O,
        components: O::Components,
    ) -> Result<ObjectRef<O>> {
        let type_name = std::any::type_name::<O>();
        let flag = FlagIndex::of::<O>();
        self.require(self.access.allows_write(flag), type_name, "Write")?;
        O::Components::check_writes(&self.access)?;

        if self.is_held(Some(scene), flag) {
            return Err(EcsError::AlreadyBorrowed { type_name });
        }
        for component in O::Components::flag_indices() {
            if self.is_held(Some(scene), component) {
                return Err(EcsError::AlreadyBorrowed {
                    type_name: component.name(),
                });
            }
        }

        self.world.build_object(scene, data, components, Dispatch::Deferred)
    }

    /// Destroy an object at the next sync point
    pub fn destroy_object(&self, object: impl Into<AnyObjectRef>) {
        self.world.commands().destroy_object(object.into());
    }

    /// Re-parent an object at the next sync point
    pub fn set_parent(&self, child: impl Into<AnyObjectRef>, parent: Option<AnyObjectRef>) {
        self.world.commands().set_parent(child.into(), parent);
    }

    /// Fire an event at the next sync point
    pub fn invoke<E: Event>(&self, event: E) {
        self.world.commands().invoke(event);
    }

    /// Queue an arbitrary world action for the next sync point
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce(&World) -> Result<()> + Send + 'static,
    {
        self.world.commands().add(f);
    }

    /// Schedule a continuation job
    pub fn schedule<F, J>(&self, job: J, data: ScheduleData) -> JobId
    where
        F: AccessFlags,
        J: FnOnce(&Processor<'_>) + Send + 'static,
    {
        self.world.schedule::<F, J>(job, data)
    }

    pub fn schedule_timed<F, J>(&self, job: J, info: ScheduleTimedInfo) -> TimedHandle
    where
        F: AccessFlags,
        J: Fn(&Processor<'_>) + Send + Sync + 'static,
    {
        self.world.schedule_timed::<F, J>(job, info)
    }

    pub fn unschedule(&self, handle: TimedHandle) -> bool {
        self.world.unschedule(handle)
    }
}

impl std::fmt::Debug for Processor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("job", &self.job)
            .field("access", &self.access)
            .finish()
    }
}

fn object_ref<O: Object>(
    handle: crate::storage::Handle<ObjectEntry<O>>,
    entry: &ObjectEntry<O>,
) -> ObjectRef<O> {
    ObjectRef::from_any(AnyObjectRef::new(handle, entry.header().kind, entry.id()))
}
