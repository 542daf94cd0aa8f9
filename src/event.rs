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

//! Typed multi-listener events.
//!
//! Each event type has a [`ListenerList`] of closures. Removing a listener
//! leaves a tombstone so the remaining handles keep their slot; the next
//! `add_listener` reuses the first tombstone. Invoking an event type nobody
//! listens to is a no-op.

use crate::type_index::{ensure_slot, EventDomain, TypeIndex};
use crate::world::World;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker trait for event payloads
pub trait Event: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Event for T {}

/// A bound event callback
pub type Listener<E> = Arc<dyn Fn(&World, &E) + Send + Sync>;

/// How a world-originated event is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Call listeners now, on this thread
    Immediate,
    /// Queue for the next command flush
    Deferred,
}

/// Removal key returned by [`World::listen`]
pub struct ListenerHandle<E> {
    index: usize,
    _marker: PhantomData<fn(&E)>,
}

impl<E> ListenerHandle<E> {
    /// Slot index inside the listener list
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<E> Clone for ListenerHandle<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for ListenerHandle<E> {}

impl<E> PartialEq for ListenerHandle<E> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<E> Eq for ListenerHandle<E> {}

impl<E> fmt::Debug for ListenerHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerHandle({})", self.index)
    }
}

/// Listener slots for one event type
pub struct ListenerList<E> {
    slots: Vec<Option<Listener<E>>>,
    live: usize,
}

impl<E> ListenerList<E> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Bind `listener`, reusing the first tombstoned slot
    pub fn add_listener(&mut self, listener: Listener<E>) -> usize {
        self.live += 1;
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(listener);
                index
            }
            None => {
                self.slots.push(Some(listener));
                self.slots.len() - 1
            }
        }
    }

    /// Tombstone slot `index`. Returns false if it was already empty.
    pub fn remove_listener(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Listener<E>> {
        self.slots.get(index)?.as_ref()
    }

    /// Live listeners
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn snapshot(&self) -> SmallVec<[(usize, Listener<E>); 4]> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|l| (i, Arc::clone(l))))
            .collect()
    }
}

impl<E> Default for ListenerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

type SharedList<E> = Arc<RwLock<ListenerList<E>>>;

/// All listener lists of a world, indexed by event type index
#[derive(Default)]
pub struct Events {
    lists: RwLock<Vec<Option<Arc<dyn Any + Send + Sync>>>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    fn list<E: Event>(&self) -> Option<SharedList<E>> {
        let index = TypeIndex::<EventDomain>::try_of::<E>()?;
        let erased = self.lists.read().get(index.get())?.clone()?;
        erased.downcast::<RwLock<ListenerList<E>>>().ok()
    }

    fn list_or_insert<E: Event>(&self) -> SharedList<E> {
        if let Some(list) = self.list::<E>() {
            return list;
        }
        let index = TypeIndex::<EventDomain>::of::<E>().get();
        let mut lists = self.lists.write();
        ensure_slot(&mut lists, index);
        let erased = lists[index]
            .get_or_insert_with(|| {
                Arc::new(RwLock::new(ListenerList::<E>::new())) as Arc<dyn Any + Send + Sync>
            })
            .clone();
        match erased.downcast::<RwLock<ListenerList<E>>>() {
            Ok(list) => list,
            Err(_) => unreachable!("event slot {index} holds a foreign listener list"),
        }
    }

    pub fn listen<E, F>(&self, listener: F) -> ListenerHandle<E>
    where
        E: Event,
        F: Fn(&World, &E) + Send + Sync + 'static,
    {
        let index = self.list_or_insert::<E>().write().add_listener(Arc::new(listener));
        ListenerHandle {
            index,
            _marker: PhantomData,
        }
    }

    pub fn unlisten<E: Event>(&self, handle: ListenerHandle<E>) -> bool {
        self.list::<E>()
            .is_some_and(|list| list.write().remove_listener(handle.index))
    }

    pub fn listener_count<E: Event>(&self) -> usize {
        self.list::<E>().map_or(0, |list| list.read().len())
    }

    /// Call every listener of `E` in slot order on this thread.
    ///
    /// Listeners run without the list lock held, so they may add or remove
    /// listeners. A listener removed mid-dispatch is not called afterwards.
    pub fn invoke_immediate<E: Event>(&self, world: &World, event: &E) {
        let Some(list) = self.list::<E>() else {
            return;
        };
        let snapshot = list.read().snapshot();
        for (index, listener) in snapshot {
            let still_bound = list
                .read()
                .get(index)
                .is_some_and(|current| Arc::ptr_eq(current, &listener));
            if still_bound {
                listener(world, event);
            }
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.lists.read().iter().flatten().count();
        f.debug_struct("Events").field("event_types", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop<E>() -> Listener<E> {
        Arc::new(|_: &World, _: &E| {})
    }

    #[test]
    fn test_tombstone_reuse_keeps_other_handles() {
        let mut list = ListenerList::<u32>::new();
        let a = list.add_listener(noop());
        let b = list.add_listener(noop());
        let c = list.add_listener(noop());
        assert_eq!((a, b, c), (0, 1, 2));

        assert!(list.remove_listener(b));
        assert!(!list.remove_listener(b));
        assert_eq!(list.len(), 2);

        let d = list.add_listener(noop());
        assert_eq!(d, b);
        assert!(list.get(c).is_some());
    }

    #[test]
    fn test_remove_unknown_slot() {
        let mut list = ListenerList::<u32>::new();
        assert!(!list.remove_listener(42));
        assert!(list.is_empty());
    }
}
