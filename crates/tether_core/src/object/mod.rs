//! Managed objects, their handle arena and the collector emulation.

pub mod gc;
pub mod handle;
pub mod registry;

pub use gc::{CollectionMode, CollectionReport, Collector};
pub use handle::ObjectHandle;
pub use registry::{HandleKind, ObjectRegistry, ReleaseReport};

use crate::catalog::{FieldDescriptor, TypeDescriptor};
use crate::ids::DomainId;
use crate::value::ManagedValue;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// One instance field's storage.
#[derive(Debug, Clone)]
pub(crate) struct FieldSlot {
    pub declaring_type: String,
    pub name: String,
    pub value: ManagedValue,
}

/// An instance living on the managed side.
pub struct ManagedObject {
    ty: Arc<TypeDescriptor>,
    fields: RwLock<Vec<FieldSlot>>,
}

impl ManagedObject {
    pub(crate) fn new(ty: Arc<TypeDescriptor>, fields: Vec<FieldSlot>) -> Self {
        Self {
            ty,
            fields: RwLock::new(fields),
        }
    }

    pub fn type_descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    pub fn domain(&self) -> Option<DomainId> {
        self.ty.origin.domain
    }

    pub(crate) fn read_field(&self, field: &FieldDescriptor) -> Option<ManagedValue> {
        self.fields
            .read()
            .iter()
            .find(|slot| slot.name == field.name && slot.declaring_type == field.declaring_type)
            .map(|slot| slot.value.clone())
    }

    pub(crate) fn write_field(&self, field: &FieldDescriptor, value: ManagedValue) -> bool {
        let mut fields = self.fields.write();
        match fields
            .iter_mut()
            .find(|slot| slot.name == field.name && slot.declaring_type == field.declaring_type)
        {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("type", &self.ty.full_name)
            .finish_non_exhaustive()
    }
}

/// Shared reference to a managed object. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(pub(crate) Arc<ManagedObject>);

impl ObjectRef {
    pub(crate) fn new(object: ManagedObject) -> Self {
        Self(Arc::new(object))
    }

    pub fn object(&self) -> &ManagedObject {
        &self.0
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ManagedObject> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn owners(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl std::ops::Deref for ObjectRef {
    type Target = ManagedObject;

    fn deref(&self) -> &ManagedObject {
        &self.0
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({} @ {:p})", self.0.ty.full_name, Arc::as_ptr(&self.0))
    }
}
