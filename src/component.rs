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

//! Component and ComponentSet traits
//!
//! Components are values living in per-type storages.
//! A ComponentSet is the fixed list of components an object archetype owns.

use smallvec::{smallvec, SmallVec};

use crate::access::AccessSet;
use crate::error::{EcsError, Result};
use crate::event::Dispatch;
use crate::event_types::{ComponentCreated, ComponentPostCreated};
use crate::object::AnyObjectRef;
use crate::scene::Scene;
use crate::storage::Handle;
use crate::type_index::{ComponentDomain, FlagIndex, TypeIndex};
use crate::world::World;

/// Maximum number of components in one archetype tuple
pub const MAX_ARCHETYPE_COMPONENTS: usize = 8;

/// Marker trait for components
///
/// Components must be 'static (no borrowed data)
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Weak reference to a component instance
pub type ComponentRef<C> = Handle<C>;

/// One entry of an object's component list: which type, which slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSlot {
    pub kind: TypeIndex<ComponentDomain>,
    pub slot: u32,
    pub generation: u32,
}

impl ComponentSlot {
    pub fn of<C: Component>(handle: ComponentRef<C>) -> Self {
        Self {
            kind: TypeIndex::of::<C>(),
            slot: handle.slot(),
            generation: handle.generation(),
        }
    }
}

/// Component list stored in an object header
pub type ComponentSlots = SmallVec<[ComponentSlot; MAX_ARCHETYPE_COMPONENTS]>;

/// Fixed set of components created together with an object.
///
/// Implemented for tuples of up to [`MAX_ARCHETYPE_COMPONENTS`] components.
pub trait ComponentSet: Send + Sync + 'static {
    /// Tuple of handles to the created components
    type Refs: Copy + Send + Sync + 'static;

    /// Component type indices, in tuple order
    fn type_indices() -> SmallVec<[TypeIndex<ComponentDomain>; MAX_ARCHETYPE_COMPONENTS]>
    where
        Self: Sized;

    /// Processor flag indices, in tuple order
    fn flag_indices() -> SmallVec<[FlagIndex; MAX_ARCHETYPE_COMPONENTS]>
    where
        Self: Sized;

    /// Fail unless `access` grants `Write` on every member
    fn check_writes(access: &AccessSet) -> Result<()>
    where
        Self: Sized;

    /// Fail unless every member has a storage in `scene`
    fn ensure_registered(scene: &Scene) -> Result<()>
    where
        Self: Sized;

    /// Create every member in `scene`, owned by `owner`
    fn create_in(self, scene: &Scene, owner: AnyObjectRef) -> Result<(ComponentSlots, Self::Refs)>;

    /// `ComponentCreated<C>` for each member
    fn fire_created(world: &World, refs: Self::Refs, owner: AnyObjectRef, dispatch: Dispatch)
    where
        Self: Sized;

    /// `ComponentPostCreated<C>` for each member
    fn fire_post_created(world: &World, refs: Self::Refs, owner: AnyObjectRef, dispatch: Dispatch)
    where
        Self: Sized;
}

macro_rules! impl_component_set {
    ($($T:ident),*) => {
        impl<$($T: Component),*> ComponentSet for ($($T,)*) {
            type Refs = ($(ComponentRef<$T>,)*);

            fn type_indices() -> SmallVec<[TypeIndex<ComponentDomain>; MAX_ARCHETYPE_COMPONENTS]> {
                smallvec![$(TypeIndex::of::<$T>()),*]
            }

            fn flag_indices() -> SmallVec<[FlagIndex; MAX_ARCHETYPE_COMPONENTS]> {
                smallvec![$(FlagIndex::of::<$T>()),*]
            }

            fn check_writes(access: &AccessSet) -> Result<()> {
                $(
                    if !access.allows_write(FlagIndex::of::<$T>()) {
                        return Err(EcsError::AccessNotDeclared {
                            type_name: std::any::type_name::<$T>(),
                            requested: "Write",
                        });
                    }
                )*
                let _ = access;
                Ok(())
            }

            fn ensure_registered(scene: &Scene) -> Result<()> {
                $(scene.components::<$T>()?;)*
                let _ = scene;
                Ok(())
            }

            #[allow(non_snake_case, unused_variables)]
            fn create_in(self, scene: &Scene, owner: AnyObjectRef) -> Result<(ComponentSlots, Self::Refs)> {
                let ($($T,)*) = self;
                let refs: Self::Refs = ($(scene.components::<$T>()?.write().create_owned($T, owner),)*);
                let ($($T,)*) = refs;
                let slots: ComponentSlots = smallvec![$(ComponentSlot::of($T)),*];
                Ok((slots, refs))
            }

            #[allow(non_snake_case, unused_variables)]
            fn fire_created(world: &World, refs: Self::Refs, owner: AnyObjectRef, dispatch: Dispatch) {
                let ($($T,)*) = refs;
                $(world.dispatch(ComponentCreated::new($T, owner), dispatch);)*
            }

            #[allow(non_snake_case, unused_variables)]
            fn fire_post_created(world: &World, refs: Self::Refs, owner: AnyObjectRef, dispatch: Dispatch) {
                let ($($T,)*) = refs;
                $(world.dispatch(ComponentPostCreated::new($T, owner), dispatch);)*
            }
        }
    };
}

impl_component_set!();
impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);
