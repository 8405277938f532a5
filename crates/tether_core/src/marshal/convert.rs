//! Typed conversion between native and managed values.
//!
//! A value's kind must match the declared type's category. Handles are
//! resolved to live objects on the way in; objects leaving the managed
//! side are given fresh strong handles that the caller destroys.

use super::{Marshaller, MAX_DEPTH};
use crate::catalog::{TypeCategory, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult};
use crate::object::HandleKind;
use crate::value::{ManagedValue, NativeValue, ValueKind};
use std::sync::Arc;

fn mismatch(kind: ValueKind, ty: &TypeDescriptor) -> BridgeError {
    BridgeError::MarshalFailure(format!(
        "{kind:?} value cannot be passed as '{}'",
        ty.full_name()
    ))
}

fn scalar_to_managed(value: NativeValue) -> Option<ManagedValue> {
    Some(match value {
        NativeValue::SByte(v) => ManagedValue::SByte(v),
        NativeValue::Byte(v) => ManagedValue::Byte(v),
        NativeValue::Short(v) => ManagedValue::Short(v),
        NativeValue::UShort(v) => ManagedValue::UShort(v),
        NativeValue::Int(v) => ManagedValue::Int(v),
        NativeValue::UInt(v) => ManagedValue::UInt(v),
        NativeValue::Long(v) => ManagedValue::Long(v),
        NativeValue::ULong(v) => ManagedValue::ULong(v),
        NativeValue::Float(v) => ManagedValue::Float(v),
        NativeValue::Double(v) => ManagedValue::Double(v),
        NativeValue::Bool(v) => ManagedValue::Bool(v),
        NativeValue::Pointer(v) => ManagedValue::Pointer(v),
        NativeValue::Null => ManagedValue::Pointer(0),
        _ => return None,
    })
}

fn scalar_to_native(value: &ManagedValue) -> Option<NativeValue> {
    Some(match value {
        ManagedValue::SByte(v) => NativeValue::SByte(*v),
        ManagedValue::Byte(v) => NativeValue::Byte(*v),
        ManagedValue::Short(v) => NativeValue::Short(*v),
        ManagedValue::UShort(v) => NativeValue::UShort(*v),
        ManagedValue::Int(v) => NativeValue::Int(*v),
        ManagedValue::UInt(v) => NativeValue::UInt(*v),
        ManagedValue::Long(v) => NativeValue::Long(*v),
        ManagedValue::ULong(v) => NativeValue::ULong(*v),
        ManagedValue::Float(v) => NativeValue::Float(*v),
        ManagedValue::Double(v) => NativeValue::Double(*v),
        ManagedValue::Bool(v) => NativeValue::Bool(*v),
        ManagedValue::Pointer(v) => NativeValue::Pointer(*v),
        _ => return None,
    })
}

/// Kind a managed value would travel as.
fn managed_kind(value: &ManagedValue) -> ValueKind {
    scalar_to_native(value).map_or_else(
        || match value {
            ManagedValue::String(_) => ValueKind::String,
            ManagedValue::Array(_) => ValueKind::Array,
            ManagedValue::Struct(_) => ValueKind::Struct,
            _ => ValueKind::Pointer,
        },
        |native| native.kind(),
    )
}

impl Marshaller<'_> {
    pub fn to_managed(&self, value: NativeValue, ty: &Arc<TypeDescriptor>) -> BridgeResult<ManagedValue> {
        self.to_managed_at(value, ty, 0)
    }

    pub(crate) fn to_managed_at(
        &self,
        value: NativeValue,
        ty: &Arc<TypeDescriptor>,
        depth: usize,
    ) -> BridgeResult<ManagedValue> {
        if depth >= MAX_DEPTH {
            return Err(BridgeError::InvalidArgument("value nests too deeply".into()));
        }
        let kind = value.kind();
        match (&ty.category, value) {
            (TypeCategory::Void, _) => Ok(ManagedValue::Null),
            (TypeCategory::Primitive(expected) | TypeCategory::Enum(expected), value) => {
                if kind != *expected {
                    return Err(mismatch(kind, ty));
                }
                match value {
                    NativeValue::Handle(_) => Err(mismatch(kind, ty)),
                    value => scalar_to_managed(value).ok_or_else(|| mismatch(kind, ty)),
                }
            }
            (TypeCategory::Pointer { .. }, NativeValue::Pointer(p)) => Ok(ManagedValue::Pointer(p)),
            (TypeCategory::Pointer { .. }, NativeValue::Null) => Ok(ManagedValue::Pointer(0)),
            (
                TypeCategory::String
                | TypeCategory::Array { .. }
                | TypeCategory::Object
                | TypeCategory::Class
                | TypeCategory::Interface,
                NativeValue::Null,
            ) => Ok(ManagedValue::Null),
            (TypeCategory::String, NativeValue::String(text)) => Ok(ManagedValue::String(text)),
            (TypeCategory::Array { element }, NativeValue::Array(items)) => {
                let element = self.catalog.resolve(self.scope, element)?;
                items
                    .into_iter()
                    .map(|item| self.to_managed_at(item, &element, depth + 1))
                    .collect::<BridgeResult<Vec<_>>>()
                    .map(ManagedValue::Array)
            }
            (TypeCategory::Struct, NativeValue::Struct(bytes)) => {
                if !self.is_plain(ty, depth)? {
                    return Err(BridgeError::MarshalFailure(format!(
                        "struct '{}' holds strings or arrays and cannot cross by value",
                        ty.full_name()
                    )));
                }
                self.decode_struct(&bytes, ty, depth).map(ManagedValue::Struct)
            }
            (
                TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface,
                NativeValue::Handle(handle),
            ) => {
                if handle.is_null() {
                    return Ok(ManagedValue::Null);
                }
                let object = self.objects.resolve(handle)?;
                if !self.accepts(object.type_descriptor(), ty) {
                    return Err(BridgeError::MarshalFailure(format!(
                        "object of type '{}' cannot be passed as '{}'",
                        object.type_descriptor().full_name(),
                        ty.full_name()
                    )));
                }
                Ok(ManagedValue::Object(object))
            }
            (_, _) => Err(mismatch(kind, ty)),
        }
    }

    /// Assignability as seen from the scope; foreign types only pass as
    /// themselves or as `System.Object`.
    fn accepts(&self, from: &Arc<TypeDescriptor>, to: &Arc<TypeDescriptor>) -> bool {
        if Arc::ptr_eq(from, to) || to.category == TypeCategory::Object {
            return true;
        }
        let foreign = match (from.origin.domain, self.scope) {
            (Some(owner), Some(scope)) => owner != scope.id(),
            (Some(_), None) => true,
            (None, _) => false,
        };
        !foreign && self.catalog.is_assignable(self.scope, from, to).unwrap_or(false)
    }

    pub fn to_native(&self, value: &ManagedValue, ty: &Arc<TypeDescriptor>) -> BridgeResult<NativeValue> {
        self.to_native_at(value, ty, 0)
    }

    pub(crate) fn to_native_at(
        &self,
        value: &ManagedValue,
        ty: &Arc<TypeDescriptor>,
        depth: usize,
    ) -> BridgeResult<NativeValue> {
        if depth >= MAX_DEPTH {
            return Err(BridgeError::InvalidArgument("value nests too deeply".into()));
        }
        let out_of_place = || mismatch(managed_kind(value), ty);
        match (&ty.category, value) {
            (TypeCategory::Void, _) => Ok(NativeValue::Null),
            (_, ManagedValue::Null) => Ok(NativeValue::Null),
            (TypeCategory::Primitive(expected) | TypeCategory::Enum(expected), value) => {
                let native = scalar_to_native(value).ok_or_else(out_of_place)?;
                if native.kind() != *expected {
                    return Err(out_of_place());
                }
                Ok(native)
            }
            (TypeCategory::Pointer { .. }, ManagedValue::Pointer(p)) => Ok(NativeValue::Pointer(*p)),
            (TypeCategory::String, ManagedValue::String(text)) => Ok(NativeValue::String(text.clone())),
            (TypeCategory::Array { element }, ManagedValue::Array(items)) => {
                let element = self.catalog.resolve(self.scope, element)?;
                items
                    .iter()
                    .map(|item| self.to_native_at(item, &element, depth + 1))
                    .collect::<BridgeResult<Vec<_>>>()
                    .map(NativeValue::Array)
            }
            (TypeCategory::Struct, ManagedValue::Struct(fields)) => {
                self.encode_struct(fields, ty, depth).map(NativeValue::Struct)
            }
            (
                TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface,
                ManagedValue::Object(object),
            ) => Ok(NativeValue::Handle(self.objects.alloc(object, HandleKind::Strong))),
            _ => Err(out_of_place()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::object::{ManagedObject, ObjectHandle, ObjectRef, ObjectRegistry};
    use crate::settings::OverloadPolicy;

    #[test]
    fn kinds_must_match_declared_category() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let objects = ObjectRegistry::new();
        let m = Marshaller::new(&catalog, None, &objects);
        let int = catalog.resolve(None, "int").unwrap();

        assert_eq!(m.to_managed(NativeValue::Int(10), &int).unwrap(), ManagedValue::Int(10));
        assert!(matches!(
            m.to_managed(NativeValue::Double(1.0), &int),
            Err(BridgeError::MarshalFailure(_))
        ));
        assert!(m.to_native(&ManagedValue::Bool(true), &int).is_err());
    }

    #[test]
    fn objects_leave_with_fresh_strong_handles() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let objects = ObjectRegistry::new();
        let m = Marshaller::new(&catalog, None, &objects);
        let ty = catalog.resolve(None, "object").unwrap();
        let object = ObjectRef::new(ManagedObject::new(Arc::clone(&ty), Vec::new()));

        let first = m.to_native(&ManagedValue::Object(object.clone()), &ty).unwrap();
        let second = m.to_native(&ManagedValue::Object(object.clone()), &ty).unwrap();
        assert_ne!(first, second);
        assert_eq!(objects.live(), 2);

        let handle = first.as_handle().unwrap();
        let back = m.to_managed(NativeValue::Handle(handle), &ty).unwrap();
        assert_eq!(back.as_object(), Some(&object));

        let stale = ObjectHandle::from_bits(0xFFFF_0000_0001);
        assert!(m.to_managed(NativeValue::Handle(stale), &ty).unwrap_err().is_not_found());
    }

    #[test]
    fn null_passes_for_references_only() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let objects = ObjectRegistry::new();
        let m = Marshaller::new(&catalog, None, &objects);
        let string = catalog.resolve(None, "string").unwrap();
        let double = catalog.resolve(None, "double").unwrap();

        assert_eq!(m.to_managed(NativeValue::Null, &string).unwrap(), ManagedValue::Null);
        assert!(m.to_managed(NativeValue::Null, &double).is_err());
    }
}
