//! Type, member and attribute introspection by descriptor ID.

use super::{enter, Bridge};
use crate::catalog::{
    core_types, Accessibility, Accessor, AttributeInstance, Origin, TypeCategory, TypeDescriptor,
};
use crate::domain::Domain;
use crate::error::{BridgeError, BridgeResult};
use crate::ids::{AttributeId, FieldId, MethodId, PropertyId, TypeId};
use crate::marshal::infer_json;
use crate::value::{NativeValue, ValueKind};
use std::sync::Arc;

impl Bridge {
    /// Runs `f` with the domain owning `origin` entered.
    fn scoped<T>(
        &self,
        origin: &Origin,
        f: impl FnOnce(Option<&Domain>) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        let domain = self.inner.owner(origin)?;
        let _call = enter(&domain)?;
        f(domain.as_deref())
    }

    fn type_ref(&self, scope: Option<&Domain>, name: &str) -> BridgeResult<TypeId> {
        let ty = self.inner.catalog.resolve(scope, name)?;
        Ok(self.inner.catalog.types.add(&ty))
    }

    fn with_type<T>(
        &self,
        id: TypeId,
        f: impl FnOnce(&Arc<TypeDescriptor>, Option<&Domain>) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        self.reported(|| {
            let ty = self.type_of(id)?;
            self.scoped(&ty.origin, |scope| f(&ty, scope))
        })
    }

    pub fn full_name(&self, id: TypeId) -> BridgeResult<String> {
        self.with_type(id, |ty, _| Ok(ty.full_name().to_string()))
    }

    /// `Full.Name, Module`
    pub fn assembly_qualified_name(&self, id: TypeId) -> BridgeResult<String> {
        self.with_type(id, |ty, _| Ok(ty.qualified_name()))
    }

    pub fn base_type(&self, id: TypeId) -> BridgeResult<Option<TypeId>> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog.base_of(scope, ty)?.map(|base| catalog.types.add(&base)))
        })
    }

    pub fn interfaces(&self, id: TypeId) -> BridgeResult<Vec<TypeId>> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog
                .interfaces_of(scope, ty)?
                .iter()
                .map(|i| catalog.types.add(i))
                .collect())
        })
    }

    pub fn size(&self, id: TypeId) -> BridgeResult<usize> {
        self.with_type(id, |ty, scope| self.inner.marshaller(scope).declared_size(ty))
    }

    /// Bytes a value of the type occupies in wire layout.
    pub fn wire_size(&self, id: TypeId) -> BridgeResult<usize> {
        self.with_type(id, |ty, scope| Ok(self.inner.marshaller(scope).layout(ty)?.size))
    }

    /// Reads a value of type `id` from its wire layout.
    ///
    /// # Safety
    /// `src` must point at `wire_size(id)` readable bytes holding such a value.
    pub unsafe fn read_wire(&self, id: TypeId, src: *const u8) -> BridgeResult<NativeValue> {
        self.with_type(id, |ty, scope| unsafe { self.inner.marshaller(scope).read_native(ty, src) })
    }

    /// Writes `value` in the wire layout of `id`. Nothing is written when
    /// `len` is below the wire size. Strings and arrays written out belong
    /// to the caller.
    ///
    /// # Safety
    /// `dst` must be valid for `len` bytes of writes.
    pub unsafe fn write_wire(
        &self,
        id: TypeId,
        value: &NativeValue,
        dst: *mut u8,
        len: usize,
    ) -> BridgeResult<()> {
        self.with_type(id, |ty, scope| unsafe {
            self.inner.marshaller(scope).write_native(ty, value, dst, len)
        })
    }

    /// Whether the type is a single-dimension, zero-based array.
    pub fn is_sz_array(&self, id: TypeId) -> BridgeResult<bool> {
        self.with_type(id, |ty, _| Ok(matches!(ty.category, TypeCategory::Array { .. })))
    }

    pub fn element_type(&self, id: TypeId) -> BridgeResult<TypeId> {
        self.with_type(id, |ty, scope| match &ty.category {
            TypeCategory::Array { element } => self.type_ref(scope, element),
            TypeCategory::Pointer { pointee } => self.type_ref(scope, pointee),
            _ => Err(BridgeError::InvalidArgument(format!(
                "'{}' has no element type",
                ty.full_name()
            ))),
        })
    }

    /// Value kind the type marshals as.
    pub fn managed_type(&self, id: TypeId) -> BridgeResult<ValueKind> {
        self.with_type(id, |ty, _| Ok(self.inner.catalog.kind_of(ty)))
    }

    /// Whether a value of `id` can be stored in a slot of `target`.
    pub fn is_assignable_to(&self, id: TypeId, target: TypeId) -> BridgeResult<bool> {
        self.with_type(id, |ty, scope| {
            let target = self.type_of(target)?;
            self.inner.catalog.is_assignable(scope, ty, &target)
        })
    }

    /// Whether a value of `source` can be stored in a slot of `id`.
    pub fn is_assignable_from(&self, id: TypeId, source: TypeId) -> BridgeResult<bool> {
        self.is_assignable_to(source, id)
    }

    pub fn is_subclass_of(&self, id: TypeId, base: TypeId) -> BridgeResult<bool> {
        self.with_type(id, |ty, scope| {
            let base = self.type_of(base)?;
            self.inner.catalog.is_subclass_of(scope, ty, &base)
        })
    }

    pub fn has_attribute(&self, id: TypeId, attribute_type: TypeId) -> BridgeResult<bool> {
        self.with_type(id, |ty, scope| {
            let attribute_type = self.type_of(attribute_type)?;
            self.inner.catalog.has_attribute(scope, ty, &attribute_type)
        })
    }

    /// Declared methods plus inherited non-private instance methods.
    pub fn methods(&self, id: TypeId) -> BridgeResult<Vec<MethodId>> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog
                .visible_methods(scope, ty)?
                .iter()
                .map(|m| catalog.methods.add(m))
                .collect())
        })
    }

    pub fn constructors(&self, id: TypeId) -> BridgeResult<Vec<MethodId>> {
        self.with_type(id, |ty, _| {
            let catalog = &self.inner.catalog;
            Ok(ty.constructors.iter().map(|m| catalog.methods.add(m)).collect())
        })
    }

    pub fn fields(&self, id: TypeId) -> BridgeResult<Vec<FieldId>> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog
                .visible_fields(scope, ty)?
                .iter()
                .map(|f| catalog.fields.add(f))
                .collect())
        })
    }

    pub fn properties(&self, id: TypeId) -> BridgeResult<Vec<PropertyId>> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog
                .visible_properties(scope, ty)?
                .iter()
                .map(|p| catalog.properties.add(p))
                .collect())
        })
    }

    pub fn attributes(&self, id: TypeId) -> BridgeResult<Vec<AttributeId>> {
        self.with_type(id, |ty, _| Ok(self.attribute_ids(&ty.attributes)))
    }

    /// Field by name, searching base types for instance fields.
    pub fn find_field(&self, id: TypeId, name: &str, is_static: bool) -> BridgeResult<FieldId> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog.fields.add(&catalog.find_field(scope, ty, name, is_static)?))
        })
    }

    pub fn find_property(&self, id: TypeId, name: &str, is_static: bool) -> BridgeResult<PropertyId> {
        self.with_type(id, |ty, scope| {
            let catalog = &self.inner.catalog;
            Ok(catalog.properties.add(&catalog.find_property(scope, ty, name, is_static)?))
        })
    }

    fn attribute_ids(&self, attributes: &[Arc<AttributeInstance>]) -> Vec<AttributeId> {
        attributes
            .iter()
            .map(|a| self.inner.catalog.attributes.add(a))
            .collect()
    }

    pub fn method_name(&self, id: MethodId) -> BridgeResult<String> {
        self.reported(|| Ok(self.inner.catalog.methods.get(id, "method")?.name.clone()))
    }

    pub fn method_signature(&self, id: MethodId) -> BridgeResult<String> {
        self.reported(|| Ok(self.inner.catalog.methods.get(id, "method")?.signature.clone()))
    }

    pub fn method_declaring_type(&self, id: MethodId) -> BridgeResult<TypeId> {
        self.reported(|| {
            let method = self.inner.catalog.methods.get(id, "method")?;
            self.scoped(&method.origin, |scope| self.type_ref(scope, &method.declaring_type))
        })
    }

    pub fn method_parameter_types(&self, id: MethodId) -> BridgeResult<Vec<TypeId>> {
        self.reported(|| {
            let method = self.inner.catalog.methods.get(id, "method")?;
            self.scoped(&method.origin, |scope| {
                method
                    .parameters
                    .iter()
                    .map(|p| self.type_ref(scope, &p.type_name))
                    .collect()
            })
        })
    }

    pub fn method_parameter_names(&self, id: MethodId) -> BridgeResult<Vec<String>> {
        self.reported(|| {
            let method = self.inner.catalog.methods.get(id, "method")?;
            Ok(method.parameters.iter().map(|p| p.name.clone()).collect())
        })
    }

    pub fn method_return_type(&self, id: MethodId) -> BridgeResult<TypeId> {
        self.reported(|| {
            let method = self.inner.catalog.methods.get(id, "method")?;
            self.scoped(&method.origin, |scope| self.type_ref(scope, &method.return_type))
        })
    }

    pub fn method_accessibility(&self, id: MethodId) -> BridgeResult<Accessibility> {
        self.reported(|| Ok(self.inner.catalog.methods.get(id, "method")?.access))
    }

    pub fn method_is_static(&self, id: MethodId) -> BridgeResult<bool> {
        self.reported(|| Ok(self.inner.catalog.methods.get(id, "method")?.is_static))
    }

    pub fn method_attributes(&self, id: MethodId) -> BridgeResult<Vec<AttributeId>> {
        self.reported(|| {
            let method = self.inner.catalog.methods.get(id, "method")?;
            Ok(self.attribute_ids(&method.attributes))
        })
    }

    pub fn field_name(&self, id: FieldId) -> BridgeResult<String> {
        self.reported(|| Ok(self.inner.catalog.fields.get(id, "field")?.name.clone()))
    }

    pub fn field_type(&self, id: FieldId) -> BridgeResult<TypeId> {
        self.reported(|| {
            let field = self.inner.catalog.fields.get(id, "field")?;
            self.scoped(&field.origin, |scope| self.type_ref(scope, &field.type_name))
        })
    }

    pub fn field_accessibility(&self, id: FieldId) -> BridgeResult<Accessibility> {
        self.reported(|| Ok(self.inner.catalog.fields.get(id, "field")?.access))
    }

    pub fn field_is_static(&self, id: FieldId) -> BridgeResult<bool> {
        self.reported(|| Ok(self.inner.catalog.fields.get(id, "field")?.is_static))
    }

    pub fn field_attributes(&self, id: FieldId) -> BridgeResult<Vec<AttributeId>> {
        self.reported(|| {
            let field = self.inner.catalog.fields.get(id, "field")?;
            Ok(self.attribute_ids(&field.attributes))
        })
    }

    pub fn property_name(&self, id: PropertyId) -> BridgeResult<String> {
        self.reported(|| Ok(self.inner.catalog.properties.get(id, "property")?.name.clone()))
    }

    pub fn property_type(&self, id: PropertyId) -> BridgeResult<TypeId> {
        self.reported(|| {
            let property = self.inner.catalog.properties.get(id, "property")?;
            self.scoped(&property.origin, |scope| self.type_ref(scope, &property.type_name))
        })
    }

    /// Accessibility of the accessors; a property with none reports private.
    pub fn property_accessibility(&self, id: PropertyId) -> BridgeResult<Accessibility> {
        self.reported(|| Ok(self.inner.catalog.properties.get(id, "property")?.accessor_access()))
    }

    pub fn property_can_read(&self, id: PropertyId) -> BridgeResult<bool> {
        self.reported(|| Ok(self.inner.catalog.properties.get(id, "property")?.getter.is_some()))
    }

    pub fn property_can_write(&self, id: PropertyId) -> BridgeResult<bool> {
        self.reported(|| Ok(self.inner.catalog.properties.get(id, "property")?.setter.is_some()))
    }

    /// Whether the property's getter runs a script rather than reading a field.
    pub fn property_is_computed(&self, id: PropertyId) -> BridgeResult<bool> {
        self.reported(|| {
            let property = self.inner.catalog.properties.get(id, "property")?;
            Ok(matches!(property.getter, Some(Accessor::Script(_))))
        })
    }

    pub fn property_attributes(&self, id: PropertyId) -> BridgeResult<Vec<AttributeId>> {
        self.reported(|| {
            let property = self.inner.catalog.properties.get(id, "property")?;
            Ok(self.attribute_ids(&property.attributes))
        })
    }

    pub fn attribute_type(&self, id: AttributeId) -> BridgeResult<TypeId> {
        self.reported(|| {
            let attribute = self.inner.catalog.attributes.get(id, "attribute")?;
            self.scoped(&attribute.origin, |scope| self.type_ref(scope, &attribute.type_name))
        })
    }

    pub fn attribute_field_value(&self, id: AttributeId, field: &str) -> BridgeResult<NativeValue> {
        self.attribute_field(id, field).map(|(value, _)| value)
    }

    /// Value of a named attribute field and the type it marshals as. The
    /// literal is typed by the attribute type's field when that type is
    /// declared, inferred from the literal otherwise.
    pub fn attribute_field(&self, id: AttributeId, field: &str) -> BridgeResult<(NativeValue, TypeId)> {
        self.reported(|| {
            let attribute = self.inner.catalog.attributes.get(id, "attribute")?;
            let literal = attribute.fields.get(field).ok_or_else(|| {
                BridgeError::not_found("attribute field", format!("{}.{field}", attribute.type_name))
            })?;
            self.scoped(&attribute.origin, |scope| {
                let catalog = &self.inner.catalog;
                let declared = catalog.resolve(scope, &attribute.type_name).and_then(|ty| {
                    let field = catalog.find_field(scope, &ty, field, false)?;
                    catalog.resolve(scope, &field.type_name)
                });
                let (value, ty) = match declared {
                    Ok(field_ty) => {
                        let marshaller = self.inner.marshaller(scope);
                        let value = marshaller.value_from_json(literal, &field_ty)?;
                        (marshaller.to_native(&value, &field_ty)?, field_ty)
                    }
                    Err(err) if err.is_not_found() => {
                        let value = infer_json(literal);
                        let ty = catalog.resolve(scope, core_types::kind_name(value.kind()))?;
                        (value, ty)
                    }
                    Err(err) => return Err(err),
                };
                Ok((value, catalog.types.add(&ty)))
            })
        })
    }
}
