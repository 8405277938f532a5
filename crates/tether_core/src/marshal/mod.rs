//! Marshalling
//!
//! `convert` maps typed native values to managed values and back; `wire`
//! reads and writes the fixed native layout at raw locations; `layout`
//! computes that layout. All of them resolve type references through one
//! `Marshaller`, which carries the catalog, the scoping domain and the
//! handle arena.

pub mod convert;
pub mod layout;
pub mod wire;

pub use layout::{WireLayout, MAX_DEPTH};
pub use wire::{NativeArray, NativeString};

use crate::catalog::{Catalog, FieldDescriptor, TypeCategory, TypeDescriptor};
use crate::domain::Domain;
use crate::error::{BridgeError, BridgeResult};
use crate::object::ObjectRegistry;
use crate::value::{ManagedValue, NativeValue, StructValue, ValueKind};
use serde_json::Value as Json;
use std::sync::Arc;

pub struct Marshaller<'a> {
    pub(crate) catalog: &'a Catalog,
    pub(crate) scope: Option<&'a Domain>,
    pub(crate) objects: &'a ObjectRegistry,
}

impl<'a> Marshaller<'a> {
    pub(crate) fn new(catalog: &'a Catalog, scope: Option<&'a Domain>, objects: &'a ObjectRegistry) -> Self {
        Self {
            catalog,
            scope,
            objects,
        }
    }

    fn resolve(&self, name: &str) -> BridgeResult<Arc<TypeDescriptor>> {
        self.catalog.resolve(self.scope, name)
    }

    /// Zero value of a declared type; structs are zeroed field by field.
    pub fn zero_value(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<ManagedValue> {
        self.zero_at(ty, 0)
    }

    fn zero_at(&self, ty: &Arc<TypeDescriptor>, depth: usize) -> BridgeResult<ManagedValue> {
        if ty.category != TypeCategory::Struct {
            return Ok(ManagedValue::zero_of(self.catalog.kind_of(ty)));
        }
        if depth >= MAX_DEPTH {
            return Err(recursive(ty));
        }
        let mut fields = Vec::new();
        for field in self.catalog.instance_fields(self.scope, ty)? {
            let field_ty = self.resolve(&field.type_name)?;
            fields.push((field.name.clone(), self.zero_at(&field_ty, depth + 1)?));
        }
        Ok(ManagedValue::Struct(StructValue {
            type_name: ty.qualified_name(),
            fields,
        }))
    }

    /// Initial value of a field: its declared default, else the zero value.
    pub fn initial_value(&self, field: &FieldDescriptor) -> BridgeResult<ManagedValue> {
        let ty = self.resolve(&field.type_name)?;
        match &field.default {
            Some(json) => self.value_from_json(json, &ty).map_err(|err| {
                BridgeError::MarshalFailure(format!(
                    "default of {}.{}: {err}",
                    field.declaring_type, field.name
                ))
            }),
            None => self.zero_value(&ty),
        }
    }

    /// Converts a manifest literal into a value of `ty`. Enums accept
    /// either the numeric value or a member name.
    pub fn value_from_json(&self, json: &Json, ty: &Arc<TypeDescriptor>) -> BridgeResult<ManagedValue> {
        self.json_at(json, ty, 0)
    }

    fn json_at(&self, json: &Json, ty: &Arc<TypeDescriptor>, depth: usize) -> BridgeResult<ManagedValue> {
        let mismatch = || {
            BridgeError::MarshalFailure(format!("literal {json} is not a valid '{}'", ty.full_name()))
        };
        if json.is_null() {
            return self.zero_at(ty, depth);
        }
        match &ty.category {
            TypeCategory::Void => Ok(ManagedValue::Null),
            TypeCategory::Primitive(ValueKind::Bool) => json.as_bool().map(ManagedValue::Bool).ok_or_else(mismatch),
            TypeCategory::Primitive(ValueKind::Float) => json
                .as_f64()
                .map(|v| ManagedValue::Float(v as f32))
                .ok_or_else(mismatch),
            TypeCategory::Primitive(ValueKind::Double) => {
                json.as_f64().map(ManagedValue::Double).ok_or_else(mismatch)
            }
            TypeCategory::Primitive(ValueKind::Pointer) | TypeCategory::Pointer { .. } => json
                .as_u64()
                .map(|v| ManagedValue::Pointer(v as usize))
                .ok_or_else(mismatch),
            TypeCategory::Primitive(ValueKind::ULong) => {
                json.as_u64().map(ManagedValue::ULong).ok_or_else(mismatch)
            }
            TypeCategory::Primitive(kind) => json
                .as_i64()
                .and_then(|v| ManagedValue::integer(*kind, v))
                .ok_or_else(mismatch),
            TypeCategory::Enum(kind) => {
                let raw = match json {
                    Json::String(name) => ty.enum_value(name),
                    other => other.as_i64(),
                };
                raw.and_then(|v| ManagedValue::integer(*kind, v))
                    .ok_or_else(mismatch)
            }
            TypeCategory::String => json
                .as_str()
                .map(|s| ManagedValue::String(s.to_string()))
                .ok_or_else(mismatch),
            TypeCategory::Array { element } => {
                let element = self.resolve(element)?;
                let items = json.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|item| self.json_at(item, &element, depth + 1))
                    .collect::<BridgeResult<Vec<_>>>()
                    .map(ManagedValue::Array)
            }
            TypeCategory::Struct => {
                if depth >= MAX_DEPTH {
                    return Err(recursive(ty));
                }
                let object = json.as_object().ok_or_else(mismatch)?;
                let mut fields = Vec::new();
                for field in self.catalog.instance_fields(self.scope, ty)? {
                    let field_ty = self.resolve(&field.type_name)?;
                    let value = match (object.get(&field.name), &field.default) {
                        (Some(v), _) | (None, Some(v)) => self.json_at(v, &field_ty, depth + 1)?,
                        (None, None) => self.zero_at(&field_ty, depth + 1)?,
                    };
                    fields.push((field.name.clone(), value));
                }
                Ok(ManagedValue::Struct(StructValue {
                    type_name: ty.qualified_name(),
                    fields,
                }))
            }
            TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface => Err(mismatch()),
        }
    }
}

/// Native value for a literal whose declared type is unknown.
pub fn infer_json(json: &Json) -> NativeValue {
    match json {
        Json::Null => NativeValue::Null,
        Json::Bool(b) => NativeValue::Bool(*b),
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                i32::try_from(v).map_or(NativeValue::Long(v), NativeValue::Int)
            } else if let Some(v) = n.as_u64() {
                NativeValue::ULong(v)
            } else {
                NativeValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => NativeValue::String(s.clone()),
        Json::Array(items) => NativeValue::Array(items.iter().map(infer_json).collect()),
        Json::Object(_) => NativeValue::String(json.to_string()),
    }
}

fn recursive(ty: &TypeDescriptor) -> BridgeError {
    BridgeError::InvalidArgument(format!(
        "struct '{}' nests too deeply (recursive layout?)",
        ty.full_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::OverloadPolicy;
    use serde_json::json;

    #[test]
    fn literals_follow_declared_types() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let objects = ObjectRegistry::new();
        let m = Marshaller::new(&catalog, None, &objects);
        let ty = |name: &str| catalog.resolve(None, name).unwrap();

        assert_eq!(m.value_from_json(&json!(7), &ty("byte")).unwrap(), ManagedValue::Byte(7));
        assert_eq!(m.value_from_json(&json!(1.5), &ty("float")).unwrap(), ManagedValue::Float(1.5));
        assert_eq!(
            m.value_from_json(&json!([1, 2]), &ty("long[]")).unwrap(),
            ManagedValue::Array(vec![ManagedValue::Long(1), ManagedValue::Long(2)])
        );
        assert_eq!(m.value_from_json(&Json::Null, &ty("int")).unwrap(), ManagedValue::Int(0));
        assert!(m.value_from_json(&json!("x"), &ty("int")).is_err());
        assert!(m.value_from_json(&json!({}), &ty("object")).is_err());
    }

    #[test]
    fn untyped_literals_are_inferred() {
        assert_eq!(infer_json(&json!(3)), NativeValue::Int(3));
        assert_eq!(infer_json(&json!(5_000_000_000i64)), NativeValue::Long(5_000_000_000));
        assert_eq!(infer_json(&json!(0.5)), NativeValue::Double(0.5));
        assert_eq!(infer_json(&json!("a")), NativeValue::String("a".into()));
    }
}
