//! Type & member catalog
//!
//! Owns the descriptor-ID allocators, the resident core types and the
//! memoised overload resolutions. Name lookup goes resident set first, then
//! the scoping domain's modules in load order.

pub mod core_types;
pub mod descriptor;
mod resolve;

pub use descriptor::{
    Accessibility, Accessor, AttributeInstance, FieldDescriptor, InternalCallSlot, MethodBody,
    MethodDescriptor, Origin, ParameterDescriptor, PropertyDescriptor, TypeCategory,
    TypeDescriptor,
};
pub use resolve::MemberClass;

use crate::domain::Domain;
use crate::error::{BridgeError, BridgeResult};
use crate::ids::{AttributeId, DomainId, FieldId, IdAllocator, MethodId, PropertyId, TypeId};
use crate::settings::OverloadPolicy;
use crate::value::ValueKind;
use core_types::{canonical_name, split_qualified, CoreTypes, CORE_MODULE};
use dashmap::DashMap;
use resolve::MethodKey;
use std::sync::Arc;

/// Inheritance chains longer than this are treated as cycles.
const MAX_CHAIN: usize = 64;

pub struct Catalog {
    pub(crate) types: IdAllocator<TypeId, TypeDescriptor>,
    pub(crate) methods: IdAllocator<MethodId, MethodDescriptor>,
    pub(crate) fields: IdAllocator<FieldId, FieldDescriptor>,
    pub(crate) properties: IdAllocator<PropertyId, PropertyDescriptor>,
    pub(crate) attributes: IdAllocator<AttributeId, AttributeInstance>,
    core: CoreTypes,
    resolved: DashMap<MethodKey, Arc<MethodDescriptor>>,
    policy: OverloadPolicy,
}

impl Catalog {
    pub fn new(policy: OverloadPolicy) -> Self {
        Self {
            types: IdAllocator::new(),
            methods: IdAllocator::new(),
            fields: IdAllocator::new(),
            properties: IdAllocator::new(),
            attributes: IdAllocator::new(),
            core: CoreTypes::new(),
            resolved: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> OverloadPolicy {
        self.policy
    }

    pub fn resident(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.core.get(&canonical_name(name))
    }

    /// Resolves a type reference as written in a manifest or by a caller.
    pub fn resolve(&self, scope: Option<&Domain>, name: &str) -> BridgeResult<Arc<TypeDescriptor>> {
        let (bare, module) = split_qualified(name);
        if bare.is_empty() {
            return Err(BridgeError::InvalidArgument("empty type name".into()));
        }
        self.resolve_in(scope, bare, module)?
            .ok_or_else(|| BridgeError::not_found("type", name.trim()))
    }

    fn resolve_in(
        &self,
        scope: Option<&Domain>,
        bare: &str,
        module: Option<&str>,
    ) -> BridgeResult<Option<Arc<TypeDescriptor>>> {
        if let Some(element) = bare.strip_suffix("[]") {
            return Ok(self
                .resolve_in(scope, element, module)?
                .map(|e| self.synthesize(scope, TypeDescriptor::array_of(&e), &e)));
        }
        if let Some(pointee) = bare.strip_suffix('*') {
            return Ok(self
                .resolve_in(scope, pointee, module)?
                .map(|p| self.synthesize(scope, TypeDescriptor::pointer_to(&p), &p)));
        }

        let canonical = canonical_name(bare);
        let core_only = module == Some(CORE_MODULE);
        if module.is_none() || core_only {
            if let Some(resident) = self.core.get(&canonical) {
                return Ok(Some(resident));
            }
        }
        if core_only {
            return Ok(None);
        }
        match scope {
            Some(domain) => domain.lookup_type(&canonical, module),
            None => Ok(None),
        }
    }

    fn synthesize(
        &self,
        scope: Option<&Domain>,
        descriptor: TypeDescriptor,
        over: &TypeDescriptor,
    ) -> Arc<TypeDescriptor> {
        match (over.origin.domain, scope) {
            (None, _) => self.core.intern(descriptor),
            (Some(owner), Some(domain)) if owner == domain.id() => domain.intern_type(descriptor),
            _ => Arc::new(descriptor),
        }
    }

    pub fn base_of(
        &self,
        scope: Option<&Domain>,
        ty: &TypeDescriptor,
    ) -> BridgeResult<Option<Arc<TypeDescriptor>>> {
        ty.base
            .as_deref()
            .map(|base| self.resolve(scope, base))
            .transpose()
    }

    /// `ty` followed by its base types, most-derived first.
    pub fn chain(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
    ) -> BridgeResult<Vec<Arc<TypeDescriptor>>> {
        let mut chain = vec![Arc::clone(ty)];
        while let Some(base) = self.base_of(scope, chain[chain.len() - 1].as_ref())? {
            if chain.len() >= MAX_CHAIN || chain.iter().any(|t| Arc::ptr_eq(t, &base)) {
                return Err(BridgeError::InvalidArgument(format!(
                    "inheritance cycle through '{}'",
                    ty.full_name
                )));
            }
            chain.push(base);
        }
        Ok(chain)
    }

    /// Every interface implemented by `ty`, including inherited ones.
    pub fn interfaces_of(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
    ) -> BridgeResult<Vec<Arc<TypeDescriptor>>> {
        let mut found: Vec<Arc<TypeDescriptor>> = Vec::new();
        let mut pending: Vec<Arc<TypeDescriptor>> = self.chain(scope, ty)?;
        while let Some(next) = pending.pop() {
            for name in &next.interfaces {
                let interface = self.resolve(scope, name)?;
                if !found.iter().any(|f| Arc::ptr_eq(f, &interface)) {
                    found.push(Arc::clone(&interface));
                    pending.push(interface);
                }
            }
        }
        Ok(found)
    }

    /// Value kind used for overload matching and marshalling.
    pub fn kind_of(&self, ty: &TypeDescriptor) -> ValueKind {
        match &ty.category {
            TypeCategory::Void => ValueKind::Unknown,
            TypeCategory::Primitive(kind) | TypeCategory::Enum(kind) => *kind,
            TypeCategory::String => ValueKind::String,
            TypeCategory::Array { .. } => ValueKind::Array,
            TypeCategory::Struct => ValueKind::Struct,
            TypeCategory::Object
            | TypeCategory::Class
            | TypeCategory::Interface
            | TypeCategory::Pointer { .. } => ValueKind::Pointer,
        }
    }

    pub fn is_subclass_of(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
        other: &Arc<TypeDescriptor>,
    ) -> BridgeResult<bool> {
        Ok(self
            .chain(scope, ty)?
            .iter()
            .skip(1)
            .any(|t| Arc::ptr_eq(t, other)))
    }

    /// Whether a value of type `from` can be stored in a slot of type `to`.
    pub fn is_assignable(
        &self,
        scope: Option<&Domain>,
        from: &Arc<TypeDescriptor>,
        to: &Arc<TypeDescriptor>,
    ) -> BridgeResult<bool> {
        if Arc::ptr_eq(from, to) {
            return Ok(true);
        }
        if let (TypeCategory::Array { element: a }, TypeCategory::Array { element: b }) =
            (&from.category, &to.category)
        {
            let a = self.resolve(scope, a)?;
            let b = self.resolve(scope, b)?;
            return Ok(a.category.is_reference()
                && b.category.is_reference()
                && self.is_assignable(scope, &a, &b)?);
        }
        if matches!(from.category, TypeCategory::Pointer { .. } | TypeCategory::Void) {
            return Ok(false);
        }
        if self.chain(scope, from)?.iter().any(|t| Arc::ptr_eq(t, to)) {
            return Ok(true);
        }
        if to.category == TypeCategory::Interface {
            return Ok(self
                .interfaces_of(scope, from)?
                .iter()
                .any(|i| Arc::ptr_eq(i, to)));
        }
        Ok(false)
    }

    /// Instance fields in layout order: base type fields first.
    pub fn instance_fields(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
    ) -> BridgeResult<Vec<Arc<FieldDescriptor>>> {
        let mut fields = Vec::new();
        for t in self.chain(scope, ty)?.iter().rev() {
            fields.extend(t.fields.iter().filter(|f| !f.is_static).cloned());
        }
        Ok(fields)
    }

    /// Field by name, most-derived declaration first.
    pub fn find_field(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
        name: &str,
        is_static: bool,
    ) -> BridgeResult<Arc<FieldDescriptor>> {
        let chain = if is_static {
            vec![Arc::clone(ty)]
        } else {
            self.chain(scope, ty)?
        };
        chain
            .iter()
            .flat_map(|t| t.fields.iter())
            .find(|f| f.name == name && f.is_static == is_static)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("field", format!("{}.{name}", ty.full_name)))
    }

    pub fn find_property(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
        name: &str,
        is_static: bool,
    ) -> BridgeResult<Arc<PropertyDescriptor>> {
        let chain = if is_static {
            vec![Arc::clone(ty)]
        } else {
            self.chain(scope, ty)?
        };
        chain
            .iter()
            .flat_map(|t| t.properties.iter())
            .find(|p| p.name == name && p.is_static == is_static)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("property", format!("{}.{name}", ty.full_name)))
    }

    /// Declared members plus inherited non-private instance members.
    pub fn visible_methods(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
    ) -> BridgeResult<Vec<Arc<MethodDescriptor>>> {
        let chain = self.chain(scope, ty)?;
        let mut methods: Vec<_> = ty.methods.clone();
        for base in chain.iter().skip(1) {
            methods.extend(
                base.methods
                    .iter()
                    .filter(|m| !m.is_static && m.access != Accessibility::Private)
                    .cloned(),
            );
        }
        Ok(methods)
    }

    pub fn visible_fields(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
    ) -> BridgeResult<Vec<Arc<FieldDescriptor>>> {
        let chain = self.chain(scope, ty)?;
        let mut fields: Vec<_> = ty.fields.clone();
        for base in chain.iter().skip(1) {
            fields.extend(
                base.fields
                    .iter()
                    .filter(|f| !f.is_static && f.access != Accessibility::Private)
                    .cloned(),
            );
        }
        Ok(fields)
    }

    pub fn visible_properties(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
    ) -> BridgeResult<Vec<Arc<PropertyDescriptor>>> {
        let chain = self.chain(scope, ty)?;
        let mut properties: Vec<_> = ty.properties.clone();
        for base in chain.iter().skip(1) {
            properties.extend(
                base.properties
                    .iter()
                    .filter(|p| !p.is_static && p.access != Accessibility::Private)
                    .cloned(),
            );
        }
        Ok(properties)
    }

    /// Whether `ty` carries an attribute of `attribute_type` or a subclass of it.
    pub fn has_attribute(
        &self,
        scope: Option<&Domain>,
        ty: &TypeDescriptor,
        attribute_type: &Arc<TypeDescriptor>,
    ) -> BridgeResult<bool> {
        for attribute in &ty.attributes {
            let declared = self.resolve(scope, &attribute.type_name)?;
            if self.is_assignable(scope, &declared, attribute_type)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drops every ID and memoised resolution belonging to `domain`.
    pub fn purge_domain(&self, domain: DomainId) -> usize {
        let owned = |origin: &Origin| origin.domain != Some(domain);
        let mut purged = self.types.retain(|t| owned(&t.origin));
        purged += self.methods.retain(|m| owned(&m.origin));
        purged += self.fields.retain(|f| owned(&f.origin));
        purged += self.properties.retain(|p| owned(&p.origin));
        purged += self.attributes.retain(|a| owned(&a.origin));
        self.resolved.retain(|key, _| key.domain != Some(domain));
        tracing::debug!(domain = domain.0, purged, "catalog purged");
        purged
    }

    pub fn cached_resolutions(&self) -> usize {
        self.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resident_lookup_without_domain() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let int = catalog.resolve(None, "int").unwrap();
        assert_eq!(int.full_name(), "System.Int32");
        assert_eq!(catalog.kind_of(&int), ValueKind::Int);

        let again = catalog.resolve(None, "System.Int32, System").unwrap();
        assert!(Arc::ptr_eq(&int, &again));
    }

    #[test]
    fn synthesised_core_arrays_are_interned() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let a = catalog.resolve(None, "float[]").unwrap();
        let b = catalog.resolve(None, "System.Single[]").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(catalog.kind_of(&a), ValueKind::Array);
        assert_eq!(
            a.category(),
            &TypeCategory::Array {
                element: "System.Single, System".into()
            }
        );
    }

    #[test]
    fn unknown_names_are_not_found() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        assert!(catalog.resolve(None, "Game.Player").unwrap_err().is_not_found());
        assert!(matches!(
            catalog.resolve(None, "  "),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn primitive_chain_reaches_object() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let int = catalog.resolve(None, "int").unwrap();
        let object = catalog.resolve(None, "object").unwrap();
        let names: Vec<String> = catalog
            .chain(None, &int)
            .unwrap()
            .iter()
            .map(|t| t.full_name().to_string())
            .collect();
        assert_eq!(names, ["System.Int32", "System.ValueType", "System.Object"]);
        assert!(catalog.is_assignable(None, &int, &object).unwrap());
        assert!(!catalog.is_assignable(None, &object, &int).unwrap());
        assert!(catalog.is_subclass_of(None, &int, &object).unwrap());
        assert!(!catalog.is_subclass_of(None, &int, &int).unwrap());
    }
}
