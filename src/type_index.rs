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

//! Dense per-domain type indices.
//!
//! Every domain (components, objects, states, events, processor flags) owns a
//! process-wide registry that hands out contiguous indices starting at 0 the
//! first time a type is requested. Indices are never reused, so each domain
//! can back its lookups with a plain `Vec`.
//!
//! ```
//! use bucket_ecs::type_index::{ComponentDomain, TypeIndex};
//!
//! struct Position;
//! let a = TypeIndex::<ComponentDomain>::of::<Position>();
//! let b = TypeIndex::<ComponentDomain>::of::<Position>();
//! assert_eq!(a, b);
//! ```

use ahash::AHashMap;
use parking_lot::RwLock;
use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::OnceLock;

/// A namespace of type indices.
pub trait Domain: 'static {
    /// Human readable domain name, used in diagnostics
    const NAME: &'static str;

    /// The process-wide registry backing this domain
    fn registry() -> &'static DomainRegistry;
}

/// Type → index table for one domain
#[derive(Default)]
pub struct DomainRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    indices: AHashMap<TypeId, u32>,
    names: Vec<&'static str>,
}

impl DomainRegistry {
    fn lookup(&self, id: TypeId) -> Option<u32> {
        self.inner.read().indices.get(&id).copied()
    }

    fn assign(&self, id: TypeId, name: &'static str) -> u32 {
        // Fast path first; the write lock is only taken for first use.
        if let Some(index) = self.lookup(id) {
            return index;
        }

        let mut inner = self.inner.write();
        if let Some(&index) = inner.indices.get(&id) {
            return index;
        }
        let index = inner.names.len() as u32;
        inner.indices.insert(id, index);
        inner.names.push(name);
        index
    }

    fn name(&self, index: u32) -> &'static str {
        self.inner
            .read()
            .names
            .get(index as usize)
            .copied()
            .unwrap_or("<unknown>")
    }

    fn len(&self) -> usize {
        self.inner.read().names.len()
    }
}

macro_rules! type_domain {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {}

        impl Domain for $name {
            const NAME: &'static str = $label;

            fn registry() -> &'static DomainRegistry {
                static REGISTRY: OnceLock<DomainRegistry> = OnceLock::new();
                REGISTRY.get_or_init(DomainRegistry::default)
            }
        }
    };
}

type_domain!(
    /// Component types
    ComponentDomain,
    "component"
);
type_domain!(
    /// Object (archetype) types
    ObjectDomain,
    "object"
);
type_domain!(
    /// Global state types
    StateDomain,
    "state"
);
type_domain!(
    /// Event payload types
    EventDomain,
    "event"
);
type_domain!(
    /// Types a processor can declare access flags on
    FlagDomain,
    "flag"
);

/// Dense index of a type within domain `D`
pub struct TypeIndex<D> {
    raw: u32,
    _domain: PhantomData<fn() -> D>,
}

impl<D: Domain> TypeIndex<D> {
    /// Index of `T`, assigning the next free one on first use
    pub fn of<T: ?Sized + 'static>() -> Self {
        let raw = D::registry().assign(TypeId::of::<T>(), std::any::type_name::<T>());
        Self::from_raw(raw)
    }

    /// Index of `T` if one was already assigned
    pub fn try_of<T: ?Sized + 'static>() -> Option<Self> {
        D::registry().lookup(TypeId::of::<T>()).map(Self::from_raw)
    }

    /// Number of indices handed out in this domain so far
    pub fn count() -> usize {
        D::registry().len()
    }

    /// Type name recorded when the index was assigned
    pub fn name(self) -> &'static str {
        D::registry().name(self.raw)
    }
}

impl<D> TypeIndex<D> {
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            _domain: PhantomData,
        }
    }

    /// Index as a `usize`, suitable for `Vec` lookups
    pub fn get(self) -> usize {
        self.raw as usize
    }
}

impl<D> Clone for TypeIndex<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for TypeIndex<D> {}

impl<D> PartialEq for TypeIndex<D> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<D> Eq for TypeIndex<D> {}

impl<D> PartialOrd for TypeIndex<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D> Ord for TypeIndex<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<D> Hash for TypeIndex<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<D: Domain> fmt::Debug for TypeIndex<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", D::NAME, self.raw, self.name())
    }
}

/// Index of a type inside the processor flag domain
pub type FlagIndex = TypeIndex<FlagDomain>;

/// Grow `table` so that `index` is addressable
pub(crate) fn ensure_slot<T>(table: &mut Vec<Option<T>>, index: usize) {
    if table.len() <= index {
        table.resize_with(index + 1, || None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    type_domain!(
        /// Private domain so other tests can't perturb the numbering
        ScratchDomain,
        "scratch"
    );

    struct A;
    struct B;
    struct C;

    #[test]
    fn test_indices_are_contiguous_from_zero() {
        let a = TypeIndex::<ScratchDomain>::of::<A>();
        let b = TypeIndex::<ScratchDomain>::of::<B>();
        let c = TypeIndex::<ScratchDomain>::of::<C>();

        let mut raw = vec![a.get(), b.get(), c.get()];
        raw.sort_unstable();
        assert_eq!(raw, vec![0, 1, 2]);
        assert_eq!(TypeIndex::<ScratchDomain>::count(), 3);
    }

    #[test]
    fn test_repeated_lookup_is_stable() {
        struct Stable;
        let first = TypeIndex::<ComponentDomain>::of::<Stable>();
        for _ in 0..10 {
            assert_eq!(TypeIndex::<ComponentDomain>::of::<Stable>(), first);
        }
        assert!(first.name().ends_with("Stable"));
    }

    #[test]
    fn test_domains_are_independent() {
        struct Shared;
        let _ = TypeIndex::<EventDomain>::of::<Shared>();
        assert!(TypeIndex::<StateDomain>::try_of::<Shared>().is_none());
    }

    #[test]
    fn test_concurrent_first_use_agrees() {
        struct Racy;
        let seen: HashSet<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| TypeIndex::<ObjectDomain>::of::<Racy>().get()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(seen.len(), 1);
    }
}
