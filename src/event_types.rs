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

//! Built-in lifecycle events.
//!
//! Creation fires `ComponentCreated<C>` for every member, then
//! `ObjectCreated<O>`, then `ComponentPostCreated<C>` for every member; by the
//! post-created event all siblings are guaranteed live. Destruction fires
//! `ObjectDestroyed<O>` and then `ComponentDestroyed<C>` per component, each
//! while the target is still readable.

use crate::component::ComponentRef;
use crate::object::{AnyObjectRef, ObjectRef};
use std::fmt;

/// Implements Clone, Copy and Debug without bounding the type parameter
macro_rules! lifecycle_event {
    (
        $(#[$meta:meta])*
        $name:ident<$T:ident> {
            $($field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name<$T> {
            $(pub $field: $ty),*
        }

        impl<$T> $name<$T> {
            pub fn new($($field: $ty),*) -> Self {
                Self { $($field),* }
            }
        }

        impl<$T> Clone for $name<$T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<$T> Copy for $name<$T> {}

        impl<$T> fmt::Debug for $name<$T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field(stringify!($field), &self.$field))*
                    .finish()
            }
        }
    };
}

lifecycle_event!(
    /// An object and all of its components exist
    ObjectCreated<O> {
        object: ObjectRef<O>,
    }
);

lifecycle_event!(
    /// An object is about to be destroyed
    ObjectDestroyed<O> {
        object: ObjectRef<O>,
    }
);

lifecycle_event!(
    /// A component was constructed; siblings may not exist yet
    ComponentCreated<C> {
        component: ComponentRef<C>,
        owner: AnyObjectRef,
    }
);

lifecycle_event!(
    /// Every component of the owner is live
    ComponentPostCreated<C> {
        component: ComponentRef<C>,
        owner: AnyObjectRef,
    }
);

lifecycle_event!(
    /// A component is about to be destroyed
    ComponentDestroyed<C> {
        component: ComponentRef<C>,
        owner: Option<AnyObjectRef>,
    }
);
