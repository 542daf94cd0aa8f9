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

//! World: type registrations, the scene tree, states, events and the job
//! scheduler.
//!
//! Every method takes `&self`, so the world can be shared with pool workers
//! behind an `Arc`. Methods on `World` itself are meant for the thread
//! driving the engine (setup, main-thread jobs, command flushes) and fire
//! lifecycle events immediately; jobs go through a
//! [`Processor`](crate::processor::Processor), which defers them.

use parking_lot::RwLock;
use std::sync::Arc;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::access::{AccessFlags, AccessSet};
use crate::command::{CommandQueue, FlushReport};
use crate::component::{Component, ComponentRef, ComponentSet, ComponentSlot};
use crate::error::{EcsError, Result};
use crate::event::{Dispatch, Event, Events, ListenerHandle};
use crate::event_types::{ComponentCreated, ComponentDestroyed, ComponentPostCreated, ObjectCreated};
use crate::object::{AnyObjectRef, Object, ObjectEntry, ObjectHeader, ObjectRef};
use crate::processor::Processor;
use crate::scene::{Scene, SceneId, SceneTree, SharedStorage};
use crate::schedule::{JobFn, JobId, ScheduleData, ScheduleTimedInfo, Scheduler, TimedHandle};
use crate::state::{StateReadGuard, StateWriteGuard, States};
use crate::storage::{StorageReadGuard, StorageWriteGuard};
use crate::type_index::{ensure_slot, ComponentDomain, ObjectDomain, TypeIndex};

type Installer = Arc<dyn Fn(&Scene) + Send + Sync>;

struct Registration {
    key: String,
    type_name: &'static str,
    install: Installer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryKind {
    Component,
    Object,
}

impl RegistryKind {
    fn name(self) -> &'static str {
        match self {
            RegistryKind::Component => "component",
            RegistryKind::Object => "object",
        }
    }
}

#[derive(Default)]
struct Registry {
    components: Vec<Option<Registration>>,
    objects: Vec<Option<Registration>>,
}

impl Registry {
    fn insert(&mut self, kind: RegistryKind, index: usize, registration: Registration) -> Result<()> {
        let table = match kind {
            RegistryKind::Component => &mut self.components,
            RegistryKind::Object => &mut self.objects,
        };
        let kind = kind.name();
        if let Some(existing) = table.iter().flatten().find(|r| r.key == registration.key) {
            return Err(EcsError::AlreadyRegistered {
                kind,
                type_name: registration.type_name,
                key: existing.key.clone(),
            });
        }
        ensure_slot(table, index);
        if let Some(existing) = &table[index] {
            return Err(EcsError::AlreadyRegistered {
                kind,
                type_name: registration.type_name,
                key: existing.key.clone(),
            });
        }
        table[index] = Some(registration);
        Ok(())
    }

    fn installers(&self) -> impl Iterator<Item = &Installer> + '_ {
        self.components
            .iter()
            .chain(self.objects.iter())
            .flatten()
            .map(|r| &r.install)
    }
}

/// Central ECS world
pub struct World {
    /// Lock order: `registry` before `scenes`
    registry: RwLock<Registry>,
    scenes: RwLock<SceneTree>,
    states: States,
    events: Events,
    commands: CommandQueue,
    scheduler: Scheduler,
}

impl World {
    /// World with an empty root scene
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            scenes: RwLock::new(SceneTree::new()),
            states: States::new(),
            events: Events::new(),
            commands: CommandQueue::new(),
            scheduler: Scheduler::new(),
        }
    }

    // ========== Registration ==========

    /// Register component type `C` under `key`; buckets hold `initial_capacity` values
    pub fn register_component<C: Component>(
        &self,
        key: &str,
        initial_capacity: usize,
    ) -> Result<TypeIndex<ComponentDomain>> {
        self.register_component_with::<C>(key, initial_capacity, initial_capacity)
    }

    /// Register `C` with a separate capacity for the first block and for later buckets
    pub fn register_component_with<C: Component>(
        &self,
        key: &str,
        initial_capacity: usize,
        bucket_capacity: usize,
    ) -> Result<TypeIndex<ComponentDomain>> {
        let index = TypeIndex::<ComponentDomain>::of::<C>();
        let install: Installer = Arc::new(move |scene: &Scene| {
            scene.install_component::<C>(initial_capacity, bucket_capacity)
        });
        self.register(
            RegistryKind::Component,
            index.get(),
            Registration {
                key: key.to_string(),
                type_name: std::any::type_name::<C>(),
                install,
            },
        )?;
        tracing::debug!(component = std::any::type_name::<C>(), key, index = index.get(), "registered component");
        Ok(index)
    }

    /// Register object archetype `O`
    pub fn register_object<O: Object>(
        &self,
        key: &str,
        initial_capacity: usize,
        bucket_capacity: usize,
    ) -> Result<TypeIndex<ObjectDomain>> {
        let index = TypeIndex::<ObjectDomain>::of::<O>();
        let install: Installer = Arc::new(move |scene: &Scene| {
            scene.install_object::<O>(initial_capacity, bucket_capacity)
        });
        self.register(
            RegistryKind::Object,
            index.get(),
            Registration {
                key: key.to_string(),
                type_name: std::any::type_name::<O>(),
                install,
            },
        )?;
        tracing::debug!(object = std::any::type_name::<O>(), key, index = index.get(), "registered object");
        Ok(index)
    }

    fn register(&self, kind: RegistryKind, index: usize, registration: Registration) -> Result<()> {
        let mut registry = self.registry.write();
        let install = registration.install.clone();
        registry.insert(kind, index, registration)?;

        let scenes = self.scenes.read();
        for scene in scenes.scenes() {
            install(scene);
        }
        Ok(())
    }

    /// Register a global state under `key`
    pub fn register_state<S: Send + Sync + 'static>(&self, key: &str, value: S) -> Result<()> {
        self.states.register(key, value)
    }

    pub fn is_component_registered<C: Component>(&self) -> bool {
        TypeIndex::<ComponentDomain>::try_of::<C>().is_some_and(|index| {
            matches!(self.registry.read().components.get(index.get()), Some(Some(_)))
        })
    }

    pub fn is_object_registered<O: Object>(&self) -> bool {
        TypeIndex::<ObjectDomain>::try_of::<O>().is_some_and(|index| {
            matches!(self.registry.read().objects.get(index.get()), Some(Some(_)))
        })
    }

    // ========== Scenes ==========

    pub fn root_scene(&self) -> SceneId {
        self.scenes.read().root()
    }

    pub fn scene(&self, id: SceneId) -> Result<Arc<Scene>> {
        self.scenes.read().get(id).cloned().ok_or(EcsError::SceneNotFound)
    }

    /// Create a subscene of `parent` with a storage for every registered type
    pub fn create_scene(&self, parent: SceneId) -> Result<SceneId> {
        let registry = self.registry.read();
        let scene = self.scenes.write().insert_child(parent)?;
        for install in registry.installers() {
            install(&scene);
        }
        tracing::debug!(scene = ?scene.id(), parent = ?parent, "created scene");
        Ok(scene.id())
    }

    /// Destroy `id`, its subscenes and every object in them.
    ///
    /// Objects are destroyed one by one with their usual events before the
    /// scenes are dropped. The root scene cannot be destroyed.
    pub fn destroy_scene(&self, id: SceneId) -> Result<()> {
        let subtree = {
            let scenes = self.scenes.read();
            if id == scenes.root() {
                return Err(EcsError::RootSceneRemoval);
            }
            if !scenes.contains(id) {
                return Err(EcsError::SceneNotFound);
            }
            scenes.preorder(id)
        };

        for scene_id in subtree.iter().rev() {
            let scene = self.scene(*scene_id)?;
            for storage in scene.object_storages() {
                for obj in storage.refs() {
                    if let Err(err) = self.destroy_object(obj) {
                        tracing::trace!(object = ?obj.id(), error = %err, "object already gone");
                    }
                }
            }
        }

        let removed = self.scenes.write().remove_subtree(id)?;
        tracing::debug!(scene = ?id, removed = removed.len(), "destroyed scene");
        Ok(())
    }

    /// Every scene, parents before subscenes
    pub fn scene_ids(&self) -> Vec<SceneId> {
        let scenes = self.scenes.read();
        scenes.preorder(scenes.root())
    }

    /// `id` and every scene below it
    pub fn scenes_under(&self, id: SceneId) -> Vec<SceneId> {
        self.scenes.read().preorder(id)
    }

    pub fn subscenes_of(&self, id: SceneId) -> Vec<SceneId> {
        self.scenes.read().subscenes(id)
    }

    pub fn parent_scene(&self, id: SceneId) -> Option<SceneId> {
        self.scenes.read().parent(id)
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.read().len()
    }

    // ========== Objects ==========

    /// Create an object with its archetype components in `scene`.
    ///
    /// Fires `ComponentCreated` for every component, then `ObjectCreated`,
    /// then `ComponentPostCreated` for every component.
    pub fn create_object<O: Object>(
        &self,
        scene: SceneId,
        data: O,
        components: O::Components,
    ) -> Result<ObjectRef<O>> {
        self.build_object(scene, data, components, Dispatch::Immediate)
    }

    pub fn create_object_default<O>(&self, scene: SceneId) -> Result<ObjectRef<O>>
    where
        O: Object + Default,
        O::Components: Default,
    {
        self.create_object(scene, O::default(), O::Components::default())
    }

    pub(crate) fn build_object<O: Object>(
        &self,
        scene_id: SceneId,
        data: O,
        components: O::Components,
        dispatch: Dispatch,
    ) -> Result<ObjectRef<O>> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.create_object", object = std::any::type_name::<O>()).entered();

        let scene = self.scene(scene_id)?;
        let objects = scene.objects::<O>()?;
        O::Components::ensure_registered(&scene)?;

        let kind = TypeIndex::<ObjectDomain>::of::<O>();
        let id = scene.next_object_id();
        let handle = objects
            .write()
            .create(ObjectEntry::new(ObjectHeader::new(kind, id), scene_id, data));
        let obj = AnyObjectRef::new(handle, kind, id);

        let (slots, refs) = match components.create_in(&scene, obj) {
            Ok(created) => created,
            Err(err) => {
                let _ = objects.write().destroy(handle);
                return Err(err);
            }
        };
        if let Some(entry) = objects.write().get_mut(handle) {
            entry.header_mut().components = slots;
        }
        scene.mark_exists(id);

        O::Components::fire_created(self, refs, obj, dispatch);
        self.dispatch(ObjectCreated::new(ObjectRef::<O>::from_any(obj)), dispatch);
        O::Components::fire_post_created(self, refs, obj, dispatch);

        tracing::trace!(object = std::any::type_name::<O>(), id = id.0, "created object");
        Ok(ObjectRef::from_any(obj))
    }

    /// Destroy an object, its components and its hierarchy links.
    ///
    /// `ObjectDestroyed` fires first, then `ComponentDestroyed` per component;
    /// listeners still see everything they reference. Children are orphaned,
    /// not destroyed.
    pub fn destroy_object(&self, obj: impl Into<AnyObjectRef>) -> Result<()> {
        let obj = obj.into();
        let scene = self.scene(obj.scene())?;
        let storage = scene
            .object_storage(obj.kind())
            .ok_or(EcsError::NotRegistered {
                kind: "object",
                type_name: obj.kind().name(),
            })?;
        if !storage.contains_ref(obj) {
            return Err(EcsError::StaleHandle {
                type_name: storage.type_name(),
            });
        }

        storage.fire_destroyed(self, obj);

        // A listener may have destroyed the object already
        let Some(components) = self.with_header(obj, |h| h.components.clone()) else {
            return Ok(());
        };
        for slot in &components {
            if let Some(component_storage) = scene.component_storage(slot.kind) {
                if let Err(err) = component_storage.destroy_slot(self, slot.slot, slot.generation) {
                    tracing::trace!(component = component_storage.type_name(), error = %err, "component already gone");
                }
            }
        }

        if let Some(header) = self.with_header(obj, |h| h.clone()) {
            self.unlink(obj, &header);
        }
        scene.clear_exists(obj.id());
        match storage.free(obj) {
            // Freed by a `ComponentDestroyed` listener
            Err(EcsError::StaleHandle { .. }) => Ok(()),
            other => other,
        }
    }

    /// Whether `obj` is live; never dereferences the object
    pub fn object_exists(&self, obj: impl Into<AnyObjectRef>) -> bool {
        let obj = obj.into();
        self.scene(obj.scene())
            .is_ok_and(|scene| scene.object_exists(obj.id()))
    }

    /// Live objects of type `O` across every scene
    pub fn object_count<O: Object>(&self) -> usize {
        self.scene_ids()
            .into_iter()
            .filter_map(|id| self.scene(id).ok()?.objects::<O>().ok())
            .map(|storage| storage.read().len())
            .sum()
    }

    // ========== Components ==========

    /// Attach an extra component to a live object
    pub fn create_component<C: Component>(
        &self,
        owner: impl Into<AnyObjectRef>,
        value: C,
    ) -> Result<ComponentRef<C>> {
        let owner = owner.into();
        if !self.object_exists(owner) {
            return Err(EcsError::StaleHandle { type_name: "object" });
        }
        let scene = self.scene(owner.scene())?;
        let handle = scene.components::<C>()?.write().create_owned(value, owner);
        self.with_header_mut(owner, |h| h.components.push(ComponentSlot::of(handle)));

        self.invoke_immediate(&ComponentCreated::new(handle, owner));
        self.invoke_immediate(&ComponentPostCreated::new(handle, owner));
        Ok(handle)
    }

    /// Destroy one component, detaching it from its owner
    pub fn destroy_component<C: Component>(&self, component: ComponentRef<C>) -> Result<()> {
        let scene = self.scene(component.scene())?;
        let storage = scene.components::<C>()?;
        let owner = {
            let storage = storage.read();
            if !storage.contains(component) {
                return Err(EcsError::StaleHandle {
                    type_name: std::any::type_name::<C>(),
                });
            }
            storage.owner(component)
        };

        self.invoke_immediate(&ComponentDestroyed::new(component, owner));
        if let Some(owner) = owner {
            let slot = ComponentSlot::of(component);
            self.with_header_mut(owner, |h| h.components.retain(|s| *s != slot));
        }
        storage.write().destroy(component)?;
        Ok(())
    }

    /// `obj`'s component of type `C`
    pub fn find_component<C: Component>(&self, obj: impl Into<AnyObjectRef>) -> Option<ComponentRef<C>> {
        let obj = obj.into();
        let kind = TypeIndex::<ComponentDomain>::try_of::<C>()?;
        self.with_header(obj, |h| h.find_slot(kind).copied())
            .flatten()
            .map(|slot| crate::storage::Handle::from_parts(obj.scene(), slot.slot, slot.generation))
    }

    /// Shared storage of `C` in `scene`
    pub fn components<C: Component>(&self, scene: SceneId) -> Result<SharedStorage<C>> {
        self.scene(scene)?.components::<C>()
    }

    pub fn read_components<C: Component>(&self, scene: SceneId) -> Result<StorageReadGuard<C>> {
        Ok(self.components::<C>(scene)?.read_arc())
    }

    pub fn write_components<C: Component>(&self, scene: SceneId) -> Result<StorageWriteGuard<C>> {
        Ok(self.components::<C>(scene)?.write_arc())
    }

    pub fn objects<O: Object>(&self, scene: SceneId) -> Result<SharedStorage<ObjectEntry<O>>> {
        self.scene(scene)?.objects::<O>()
    }

    pub fn read_objects<O: Object>(&self, scene: SceneId) -> Result<StorageReadGuard<ObjectEntry<O>>> {
        Ok(self.objects::<O>(scene)?.read_arc())
    }

    pub fn write_objects<O: Object>(&self, scene: SceneId) -> Result<StorageWriteGuard<ObjectEntry<O>>> {
        Ok(self.objects::<O>(scene)?.write_arc())
    }

    // ========== Queries ==========

    /// Visit every `C` in every scene.
    ///
    /// The storage stays read-locked during `f`; queue structural changes
    /// through [`commands`](Self::commands) instead of applying them inline.
    pub fn for_each<C, F>(&self, f: F) -> Result<()>
    where
        C: Component,
        F: FnMut(ComponentRef<C>, &C),
    {
        self.for_each_in(self.root_scene(), f)
    }

    /// Visit every `C` in `scene` and its subscenes
    pub fn for_each_in<C, F>(&self, scene: SceneId, mut f: F) -> Result<()>
    where
        C: Component,
        F: FnMut(ComponentRef<C>, &C),
    {
        for id in self.scenes_under(scene) {
            let storage = self.read_components::<C>(id)?;
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
        for id in self.scene_ids() {
            let mut storage = self.write_components::<C>(id)?;
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
        for id in self.scene_ids() {
            let storage = self.read_objects::<O>(id)?;
            for (handle, entry) in storage.iter() {
                let obj = AnyObjectRef::new(handle, entry.header().kind, entry.id());
                f(ObjectRef::from_any(obj), entry);
            }
        }
        Ok(())
    }

    // ========== States ==========

    pub fn state<S: Send + Sync + 'static>(&self) -> Result<StateReadGuard<S>> {
        Ok(self.states.get::<S>()?.read_arc())
    }

    pub fn state_mut<S: Send + Sync + 'static>(&self) -> Result<StateWriteGuard<S>> {
        Ok(self.states.get::<S>()?.write_arc())
    }

    pub fn states(&self) -> &States {
        &self.states
    }

    // ========== Events ==========

    /// Bind a listener for `E`
    pub fn listen<E, F>(&self, listener: F) -> ListenerHandle<E>
    where
        E: Event,
        F: Fn(&World, &E) + Send + Sync + 'static,
    {
        self.events.listen(listener)
    }

    pub fn unlisten<E: Event>(&self, handle: ListenerHandle<E>) -> bool {
        self.events.unlisten(handle)
    }

    /// Queue `event` for the next command flush
    pub fn invoke<E: Event>(&self, event: E) {
        self.commands.invoke(event);
    }

    /// Call every listener of `E` now, on this thread
    pub fn invoke_immediate<E: Event>(&self, event: &E) {
        self.events.invoke_immediate(self, event);
    }

    pub(crate) fn dispatch<E: Event>(&self, event: E, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Immediate => self.invoke_immediate(&event),
            Dispatch::Deferred => self.commands.invoke(event),
        }
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    // ========== Commands ==========

    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Apply every queued command now
    pub fn flush_commands(&self) -> FlushReport {
        self.commands.flush(self)
    }

    // ========== Scheduling ==========

    /// Schedule a one-shot job with the access flags `F`.
    ///
    /// ```
    /// use bucket_ecs::prelude::*;
    ///
    /// struct Position(f32);
    ///
    /// let world = World::new();
    /// world.register_component::<Position>("position", 64).unwrap();
    /// world.schedule::<Write<Position>, _>(
    ///     |p| {
    ///         p.for_each_mut::<Position, _>(|_, pos| pos.0 += 1.0).unwrap();
    ///     },
    ///     ScheduleData::new(),
    /// );
    /// assert_eq!(world.scheduler().pending_count(), 1);
    /// ```
    pub fn schedule<F, J>(&self, job: J, data: ScheduleData) -> JobId
    where
        F: AccessFlags,
        J: FnOnce(&Processor<'_>) + Send + 'static,
    {
        self.schedule_with(F::access(), job, data)
    }

    /// Schedule with flags built at runtime
    pub fn schedule_with<J>(&self, access: AccessSet, job: J, data: ScheduleData) -> JobId
    where
        J: FnOnce(&Processor<'_>) + Send + 'static,
    {
        let access = Arc::new(access);
        let job_access = access.clone();
        let run: JobFn = Box::new(move |world: &World, id: JobId| {
            let processor = Processor::new(world, id, job_access);
            job(&processor);
        });
        self.scheduler.submit(access, data, run)
    }

    /// Schedule a job that repeats every `info.interval` until unscheduled
    pub fn schedule_timed<F, J>(&self, job: J, info: ScheduleTimedInfo) -> TimedHandle
    where
        F: AccessFlags,
        J: Fn(&Processor<'_>) + Send + Sync + 'static,
    {
        let access = Arc::new(F::access());
        let job = Arc::new(job);
        let job_access = access.clone();
        let factory = Arc::new(move || -> JobFn {
            let job = job.clone();
            let access = job_access.clone();
            Box::new(move |world: &World, id: JobId| {
                let processor = Processor::new(world, id, access);
                job(&processor);
            })
        });
        self.scheduler.submit_timed(access, info, factory)
    }

    pub fn unschedule(&self, handle: TimedHandle) -> bool {
        self.scheduler.unschedule(handle)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ========== Headers ==========

    pub(crate) fn with_header<R>(&self, obj: AnyObjectRef, f: impl FnOnce(&ObjectHeader) -> R) -> Option<R> {
        let scene = self.scene(obj.scene()).ok()?;
        let storage = scene.object_storage(obj.kind())?;
        let mut f = Some(f);
        let mut out = None;
        storage.with_header(obj, &mut |header| {
            if let Some(f) = f.take() {
                out = Some(f(header));
            }
        });
        out
    }

    pub(crate) fn with_header_mut<R>(
        &self,
        obj: AnyObjectRef,
        f: impl FnOnce(&mut ObjectHeader) -> R,
    ) -> Option<R> {
        let scene = self.scene(obj.scene()).ok()?;
        let storage = scene.object_storage(obj.kind())?;
        let mut f = Some(f);
        let mut out = None;
        storage.with_header_mut(obj, &mut |header| {
            if let Some(f) = f.take() {
                out = Some(f(header));
            }
        });
        out
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("scenes", &self.scenes.read().len())
            .field("scheduler", &self.scheduler)
            .field("commands", &self.commands)
            .finish()
    }
}
