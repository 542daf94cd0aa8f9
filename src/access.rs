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

//! Processor access flags.
//!
//! A job states what it touches with a tuple of flags:
//!
//! ```
//! use bucket_ecs::access::{AccessFlags, Read, Write};
//!
//! struct Position;
//! struct Velocity;
//!
//! let access = <(Write<Position>, Read<Velocity>)>::access();
//! assert_eq!(access.len(), 2);
//! ```
//!
//! `Read`/`Write` cover every instance of a type. `ReadSingle`/`WriteSingle`
//! only allow touching individual instances through weak references, and are
//! tracked separately from whole-type access.

use crate::type_index::FlagIndex;
use smallvec::SmallVec;
use std::marker::PhantomData;

/// Shared access to every instance of `T`
pub struct Read<T>(PhantomData<fn() -> T>);
/// Exclusive access to every instance of `T`
pub struct Write<T>(PhantomData<fn() -> T>);
/// Shared access to single instances of `T` through weak references
pub struct ReadSingle<T>(PhantomData<fn() -> T>);
/// Exclusive access to single instances of `T` through weak references
pub struct WriteSingle<T>(PhantomData<fn() -> T>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    ReadSingle,
    WriteSingle,
}

impl AccessKind {
    pub fn is_single(self) -> bool {
        matches!(self, AccessKind::ReadSingle | AccessKind::WriteSingle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Read => "Read",
            AccessKind::Write => "Write",
            AccessKind::ReadSingle => "ReadSingle",
            AccessKind::WriteSingle => "WriteSingle",
        }
    }
}

/// One declared flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flag {
    pub index: FlagIndex,
    pub kind: AccessKind,
}

impl Flag {
    pub fn of<T: ?Sized + 'static>(kind: AccessKind) -> Self {
        Self {
            index: FlagIndex::of::<T>(),
            kind,
        }
    }

    /// Type name the flag was declared on
    pub fn type_name(&self) -> &'static str {
        self.index.name()
    }
}

/// Runtime set of flags a job holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSet {
    flags: SmallVec<[Flag; 8]>,
}

impl AccessSet {
    /// Create empty access
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T: ?Sized + 'static>(mut self) -> Self {
        self.push(Flag::of::<T>(AccessKind::Read));
        self
    }

    pub fn write<T: ?Sized + 'static>(mut self) -> Self {
        self.push(Flag::of::<T>(AccessKind::Write));
        self
    }

    pub fn read_single<T: ?Sized + 'static>(mut self) -> Self {
        self.push(Flag::of::<T>(AccessKind::ReadSingle));
        self
    }

    pub fn write_single<T: ?Sized + 'static>(mut self) -> Self {
        self.push(Flag::of::<T>(AccessKind::WriteSingle));
        self
    }

    /// Add a flag unless it is already present
    pub fn push(&mut self, flag: Flag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    fn has(&self, index: FlagIndex, kinds: &[AccessKind]) -> bool {
        self.flags
            .iter()
            .any(|flag| flag.index == index && kinds.contains(&flag.kind))
    }

    /// Whole-type read (granted by `Read` or `Write`)
    pub fn allows_read(&self, index: FlagIndex) -> bool {
        self.has(index, &[AccessKind::Read, AccessKind::Write])
    }

    /// Whole-type write
    pub fn allows_write(&self, index: FlagIndex) -> bool {
        self.has(index, &[AccessKind::Write])
    }

    /// Reading one instance (any flag on the type grants it)
    pub fn allows_single_read(&self, index: FlagIndex) -> bool {
        self.has(
            index,
            &[
                AccessKind::Read,
                AccessKind::Write,
                AccessKind::ReadSingle,
                AccessKind::WriteSingle,
            ],
        )
    }

    /// Writing one instance
    pub fn allows_single_write(&self, index: FlagIndex) -> bool {
        self.has(index, &[AccessKind::Write, AccessKind::WriteSingle])
    }

    /// Union of two sets
    pub fn merge(&self, other: &AccessSet) -> AccessSet {
        let mut merged = self.clone();
        for flag in &other.flags {
            merged.push(*flag);
        }
        merged
    }

    /// First type both sets touch in a way that cannot run concurrently.
    ///
    /// Whole-type access conflicts when either side writes. Single-instance
    /// access conflicts with any other single-instance access on the same
    /// type, since the single track is serialised as a whole.
    pub fn conflicts_with(&self, other: &AccessSet) -> Option<FlagIndex> {
        for mine in &self.flags {
            for theirs in &other.flags {
                if mine.index != theirs.index {
                    continue;
                }
                let conflict = match (mine.kind.is_single(), theirs.kind.is_single()) {
                    (false, false) => {
                        mine.kind == AccessKind::Write || theirs.kind == AccessKind::Write
                    }
                    (true, true) => true,
                    _ => false,
                };
                if conflict {
                    return Some(mine.index);
                }
            }
        }
        None
    }

    /// Check if two sets can run in parallel
    pub fn can_run_parallel(&self, other: &AccessSet) -> bool {
        self.conflicts_with(other).is_none()
    }
}

/// Compile-time flag list, implemented for single flags and tuples of flags
pub trait AccessFlags: 'static {
    fn collect(set: &mut AccessSet);

    fn access() -> AccessSet {
        let mut set = AccessSet::new();
        Self::collect(&mut set);
        set
    }
}

macro_rules! flag_marker {
    ($($marker:ident => $kind:ident),* $(,)?) => {
        $(
            impl<T: 'static> AccessFlags for $marker<T> {
                fn collect(set: &mut AccessSet) {
                    set.push(Flag::of::<T>(AccessKind::$kind));
                }
            }
        )*
    };
}

flag_marker! {
    Read => Read,
    Write => Write,
    ReadSingle => ReadSingle,
    WriteSingle => WriteSingle,
}

macro_rules! impl_flag_tuple {
    ($($F:ident),*) => {
        impl<$($F: AccessFlags),*> AccessFlags for ($($F,)*) {
            #[allow(unused_variables)]
            fn collect(set: &mut AccessSet) {
                $($F::collect(set);)*
            }
        }
    };
}

impl_flag_tuple!();
impl_flag_tuple!(A);
impl_flag_tuple!(A, B);
impl_flag_tuple!(A, B, C);
impl_flag_tuple!(A, B, C, D);
impl_flag_tuple!(A, B, C, D, E);
impl_flag_tuple!(A, B, C, D, E, F);
impl_flag_tuple!(A, B, C, D, E, F, G);
impl_flag_tuple!(A, B, C, D, E, F, G, H);
impl_flag_tuple!(A, B, C, D, E, F, G, H, I);
impl_flag_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_flag_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_flag_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);
