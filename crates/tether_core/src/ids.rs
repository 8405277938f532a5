//! Descriptor identities
//!
//! Every descriptor handed across the boundary is addressed by a small
//! non-zero integer. IDs are keyed by the descriptor's allocation, never by
//! its value, so two structurally equal descriptors living in different
//! domains receive different IDs.

use crate::error::{BridgeError, BridgeResult};
use dashmap::DashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Integer identity handed to native callers.
pub trait DescriptorId: Copy + Eq + fmt::Debug {
    fn from_raw(raw: i32) -> Self;
    fn raw(self) -> i32;
}

macro_rules! define_descriptor_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub i32);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl DescriptorId for $name {
            #[inline]
            fn from_raw(raw: i32) -> Self {
                Self(raw)
            }

            #[inline]
            fn raw(self) -> i32 {
                self.0
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> i32 {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_descriptor_id!(
    /// Identity of a type descriptor.
    TypeId
);
define_descriptor_id!(
    /// Identity of a method or constructor descriptor.
    MethodId
);
define_descriptor_id!(FieldId);
define_descriptor_id!(PropertyId);
define_descriptor_id!(
    /// Identity of one attribute instance attached to a type or member.
    AttributeId
);

/// Identity of a module domain. Zero is never handed out.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub u32);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Content-derived module identity (CRC32 of the module bytes).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl ModuleId {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        ModuleId(crc32fast::hash(bytes))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Identity-keyed allocator: the same `Arc` always maps to the same ID.
pub struct IdAllocator<I, T> {
    by_identity: DashMap<usize, i32>,
    objects: DashMap<i32, Arc<T>>,
    next: AtomicI32,
    _id: PhantomData<fn() -> I>,
}

#[inline]
fn identity_of<T>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl<I: DescriptorId, T> IdAllocator<I, T> {
    pub fn new() -> Self {
        Self {
            by_identity: DashMap::new(),
            objects: DashMap::new(),
            next: AtomicI32::new(1),
            _id: PhantomData,
        }
    }

    /// Returns the ID of `object`, minting one on first sight.
    pub fn add(&self, object: &Arc<T>) -> I {
        let raw = *self
            .by_identity
            .entry(identity_of(object))
            .or_insert_with(|| {
                let id = self.next.fetch_add(1, Ordering::Relaxed);
                self.objects.insert(id, Arc::clone(object));
                id
            });
        I::from_raw(raw)
    }

    pub fn try_add(&self, object: Option<&Arc<T>>) -> BridgeResult<I> {
        object.map(|o| self.add(o)).ok_or_else(|| {
            BridgeError::InvalidArgument("cannot allocate an id for an absent descriptor".into())
        })
    }

    pub fn try_get(&self, id: I) -> Option<Arc<T>> {
        self.objects.get(&id.raw()).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get(&self, id: I, what: &'static str) -> BridgeResult<Arc<T>> {
        self.try_get(id)
            .ok_or_else(|| BridgeError::not_found(what, id.raw().to_string()))
    }

    pub fn contains(&self, id: I) -> bool {
        self.objects.contains_key(&id.raw())
    }

    /// Drops every entry for which `keep` returns false. Returns how many went.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut dropped = Vec::new();
        self.objects.retain(|_, object| {
            let kept = keep(object);
            if !kept {
                dropped.push(identity_of(object));
            }
            kept
        });
        for key in &dropped {
            self.by_identity.remove(key);
        }
        dropped.len()
    }

    pub fn clear(&self) {
        self.objects.clear();
        self.by_identity.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<I: DescriptorId, T> Default for IdAllocator<I, T> {
    fn default() -> Self {
        Self::new()
    }
}
