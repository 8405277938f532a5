//! Immutable descriptors built from module manifests.
//!
//! Type references inside descriptors are kept as names and resolved
//! against the owning domain on demand. References to types of the same
//! module are stored module-qualified (`Full.Name, Module`) so they never
//! bind to a same-named type of another module.

use super::core_types::{self, canonical_name, split_qualified, CORE_MODULE};
use crate::ids::{DomainId, ModuleId};
use crate::module::{
    AccessorDefinition, AttributeDefinition, LoadedModule, TypeDefinition, TypeKind,
};
use crate::value::ValueKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declared accessibility of a type or member. Discriminants are part of the C ABI.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    #[default]
    Public = 0,
    Private = 1,
    Protected = 2,
    Internal = 3,
    ProtectedPublic = 4,
    PrivateProtected = 5,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeCategory {
    Void,
    /// `System.Object` itself.
    Object,
    Class,
    Struct,
    Interface,
    Enum(ValueKind),
    Primitive(ValueKind),
    String,
    Array { element: String },
    Pointer { pointee: String },
}

impl TypeCategory {
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TypeCategory::Object
                | TypeCategory::Class
                | TypeCategory::Interface
                | TypeCategory::String
                | TypeCategory::Array { .. }
        )
    }
}

/// Where a descriptor came from. Resident types have no domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub domain: Option<DomainId>,
    pub module: Option<ModuleId>,
    pub module_name: String,
}

impl Origin {
    pub fn resident() -> Self {
        Self {
            domain: None,
            module: None,
            module_name: CORE_MODULE.to_string(),
        }
    }

    fn of(module: &LoadedModule, domain: DomainId) -> Self {
        Self {
            domain: Some(domain),
            module: Some(module.id()),
            module_name: module.name().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct TypeDescriptor {
    pub(crate) full_name: String,
    pub(crate) origin: Origin,
    pub(crate) category: TypeCategory,
    pub(crate) access: Accessibility,
    pub(crate) is_abstract: bool,
    pub(crate) base: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<Arc<FieldDescriptor>>,
    pub(crate) properties: Vec<Arc<PropertyDescriptor>>,
    pub(crate) constructors: Vec<Arc<MethodDescriptor>>,
    pub(crate) methods: Vec<Arc<MethodDescriptor>>,
    pub(crate) attributes: Vec<Arc<AttributeInstance>>,
    pub(crate) internal_calls: Vec<InternalCallSlot>,
    pub(crate) enum_values: Vec<(String, i64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodBody {
    /// Key of the compiled function in the domain engine.
    Script(String),
    /// Slot name in the declaring type's internal-call table.
    InternalCall(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug)]
pub struct MethodDescriptor {
    pub(crate) name: String,
    pub(crate) declaring_type: String,
    pub(crate) origin: Origin,
    pub(crate) parameters: Vec<ParameterDescriptor>,
    pub(crate) return_type: String,
    pub(crate) access: Accessibility,
    pub(crate) is_static: bool,
    pub(crate) is_constructor: bool,
    pub(crate) body: MethodBody,
    pub(crate) signature: String,
    pub(crate) attributes: Vec<Arc<AttributeInstance>>,
}

#[derive(Debug)]
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) declaring_type: String,
    pub(crate) origin: Origin,
    pub(crate) type_name: String,
    pub(crate) access: Accessibility,
    pub(crate) is_static: bool,
    pub(crate) default: Option<serde_json::Value>,
    pub(crate) attributes: Vec<Arc<AttributeInstance>>,
}

#[derive(Debug)]
pub enum Accessor {
    Field(String),
    Script(Arc<MethodDescriptor>),
}

#[derive(Debug)]
pub struct PropertyDescriptor {
    pub(crate) name: String,
    pub(crate) declaring_type: String,
    pub(crate) origin: Origin,
    pub(crate) type_name: String,
    pub(crate) access: Accessibility,
    pub(crate) is_static: bool,
    pub(crate) getter: Option<Accessor>,
    pub(crate) setter: Option<Accessor>,
    pub(crate) attributes: Vec<Arc<AttributeInstance>>,
}

/// One attribute applied to a type or member, with its named field values.
#[derive(Debug)]
pub struct AttributeInstance {
    pub(crate) type_name: String,
    pub(crate) origin: Origin,
    pub(crate) fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalCallSlot {
    pub name: String,
    pub params: Vec<String>,
    pub returns: String,
}

impl TypeDescriptor {
    pub(crate) fn resident(
        full_name: &str,
        category: TypeCategory,
        base: Option<&str>,
        is_abstract: bool,
    ) -> Self {
        Self::bare(
            full_name.to_string(),
            Origin::resident(),
            category,
            base.map(str::to_string),
            is_abstract,
        )
    }

    fn bare(
        full_name: String,
        origin: Origin,
        category: TypeCategory,
        base: Option<String>,
        is_abstract: bool,
    ) -> Self {
        Self {
            full_name,
            origin,
            category,
            access: Accessibility::Public,
            is_abstract,
            base,
            interfaces: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            internal_calls: Vec::new(),
            enum_values: Vec::new(),
        }
    }

    /// `T[]` over an already-resolved element type.
    pub(crate) fn array_of(element: &TypeDescriptor) -> Self {
        Self::bare(
            format!("{}[]", element.full_name),
            element.origin.clone(),
            TypeCategory::Array {
                element: element.qualified_name(),
            },
            Some("System.Array".to_string()),
            true,
        )
    }

    pub(crate) fn pointer_to(pointee: &TypeDescriptor) -> Self {
        Self::bare(
            format!("{}*", pointee.full_name),
            pointee.origin.clone(),
            TypeCategory::Pointer {
                pointee: pointee.qualified_name(),
            },
            None,
            true,
        )
    }

    pub(crate) fn from_definition(def: &TypeDefinition, module: &LoadedModule, domain: DomainId) -> Self {
        let origin = Origin::of(module, domain);
        let qualify = |name: &str| qualify(module, name);
        let self_name = qualify(&def.name);

        let category = match def.kind {
            TypeKind::Class => TypeCategory::Class,
            TypeKind::Struct => TypeCategory::Struct,
            TypeKind::Interface => TypeCategory::Interface,
            TypeKind::Enum => {
                let underlying = def.underlying.as_deref().unwrap_or("int");
                TypeCategory::Enum(
                    core_types::primitive_kind(&canonical_name(underlying)).unwrap_or(ValueKind::Int),
                )
            }
        };
        let base = match def.kind {
            TypeKind::Class => Some(def.base.as_deref().map_or_else(|| "System.Object".to_string(), qualify)),
            TypeKind::Struct => Some("System.ValueType".to_string()),
            TypeKind::Enum => Some("System.Enum".to_string()),
            TypeKind::Interface => None,
        };

        let attributes = |defs: &[AttributeDefinition]| -> Vec<Arc<AttributeInstance>> {
            defs.iter()
                .map(|a| {
                    Arc::new(AttributeInstance {
                        type_name: qualify(&a.type_name),
                        origin: origin.clone(),
                        fields: a.fields.clone(),
                    })
                })
                .collect()
        };

        let method = |name: &str,
                      params: &[crate::module::ParameterDefinition],
                      returns: &str,
                      access: Accessibility,
                      is_static: bool,
                      is_constructor: bool,
                      body: MethodBody,
                      attrs: &[AttributeDefinition]| {
            let parameters: Vec<ParameterDescriptor> = params
                .iter()
                .map(|p| ParameterDescriptor {
                    name: p.name.clone(),
                    type_name: qualify(&p.type_name),
                })
                .collect();
            let return_type = qualify(returns);
            let signature = format!(
                "{} {}({})",
                core_types::signature_name(&return_type),
                name,
                parameters
                    .iter()
                    .map(|p| core_types::signature_name(&p.type_name))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Arc::new(MethodDescriptor {
                name: name.to_string(),
                declaring_type: self_name.clone(),
                origin: origin.clone(),
                parameters,
                return_type,
                access,
                is_static,
                is_constructor,
                body,
                signature,
                attributes: attributes(attrs),
            })
        };

        let methods = def
            .methods
            .iter()
            .enumerate()
            .map(|(index, m)| {
                let body = match (&m.body, &m.internal_call) {
                    (Some(_), _) => MethodBody::Script(def.method_key(module.name(), index)),
                    (None, Some(slot)) => MethodBody::InternalCall(slot.clone()),
                    (None, None) => MethodBody::Empty,
                };
                method(&m.name, &m.params, &m.returns, m.access, m.is_static, false, body, &m.attributes)
            })
            .collect();

        let constructors = def
            .constructors
            .iter()
            .enumerate()
            .map(|(index, c)| {
                let body = match &c.body {
                    Some(_) => MethodBody::Script(def.constructor_key(module.name(), index)),
                    None => MethodBody::Empty,
                };
                method(".ctor", &c.params, "void", c.access, false, true, body, &c.attributes)
            })
            .collect();

        let fields = def
            .fields
            .iter()
            .map(|f| {
                Arc::new(FieldDescriptor {
                    name: f.name.clone(),
                    declaring_type: self_name.clone(),
                    origin: origin.clone(),
                    type_name: qualify(&f.type_name),
                    access: f.access,
                    is_static: f.is_static,
                    default: f.default.clone(),
                    attributes: attributes(&f.attributes),
                })
            })
            .collect();

        let properties = def
            .properties
            .iter()
            .map(|p| {
                let accessor = |definition: &Option<AccessorDefinition>, setter: bool| {
                    definition.as_ref().map(|d| match d {
                        AccessorDefinition::Field { field } => Accessor::Field(field.clone()),
                        AccessorDefinition::Script(_) => {
                            let (name, params, returns) = if setter {
                                let value = crate::module::ParameterDefinition {
                                    name: "value".to_string(),
                                    type_name: p.type_name.clone(),
                                };
                                (format!("set_{}", p.name), vec![value], "void".to_string())
                            } else {
                                (format!("get_{}", p.name), Vec::new(), p.type_name.clone())
                            };
                            let key = def.accessor_key(module.name(), &p.name, setter);
                            Accessor::Script(method(
                                &name,
                                &params,
                                &returns,
                                p.access,
                                p.is_static,
                                false,
                                MethodBody::Script(key),
                                &[],
                            ))
                        }
                    })
                };
                Arc::new(PropertyDescriptor {
                    name: p.name.clone(),
                    declaring_type: self_name.clone(),
                    origin: origin.clone(),
                    type_name: qualify(&p.type_name),
                    access: p.access,
                    is_static: p.is_static,
                    getter: accessor(&p.get, false),
                    setter: accessor(&p.set, true),
                    attributes: attributes(&p.attributes),
                })
            })
            .collect();

        let internal_calls = def
            .internal_calls
            .iter()
            .map(|slot| InternalCallSlot {
                name: slot.name.clone(),
                params: slot.params.iter().map(|p| qualify(p)).collect(),
                returns: qualify(&slot.returns),
            })
            .collect();

        Self {
            full_name: def.name.clone(),
            origin: origin.clone(),
            category,
            access: def.access,
            is_abstract: matches!(def.kind, TypeKind::Interface | TypeKind::Enum),
            base,
            interfaces: def.interfaces.iter().map(|i| qualify(i)).collect(),
            fields,
            properties,
            constructors,
            methods,
            attributes: attributes(&def.attributes),
            internal_calls,
            enum_values: def.values.iter().map(|v| (v.name.clone(), v.value)).collect(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn module_name(&self) -> &str {
        &self.origin.module_name
    }

    /// `Full.Name, Module`
    pub fn qualified_name(&self) -> String {
        format!("{}, {}", self.full_name, self.origin.module_name)
    }

    pub fn category(&self) -> &TypeCategory {
        &self.category
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_resident(&self) -> bool {
        self.origin.domain.is_none()
    }

    pub fn is_instantiable(&self) -> bool {
        !self.is_abstract
            && matches!(
                self.category,
                TypeCategory::Object | TypeCategory::Class | TypeCategory::Struct
            )
    }

    pub fn has_finalizer(&self) -> bool {
        self.methods
            .iter()
            .any(|m| m.name == "Finalize" && m.parameters.is_empty() && !m.is_static)
    }

    pub fn internal_call(&self, slot: &str) -> Option<&InternalCallSlot> {
        self.internal_calls.iter().find(|s| s.name == slot)
    }

    pub fn enum_value(&self, name: &str) -> Option<i64> {
        self.enum_values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reflection-style signature, e.g. `Int32 OverloadTest(Int32)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accessibility of the accessors; properties without any report private.
    pub fn accessor_access(&self) -> Accessibility {
        if self.getter.is_none() && self.setter.is_none() {
            Accessibility::Private
        } else {
            self.access
        }
    }
}

/// Qualifies references to types of the same module.
fn qualify(module: &LoadedModule, name: &str) -> String {
    let (bare, qualifier) = split_qualified(name);
    let canonical = canonical_name(bare);
    if let Some(qualifier) = qualifier {
        return format!("{canonical}, {qualifier}");
    }
    let mut element: &str = &canonical;
    while let Some(rest) = element.strip_suffix("[]").or_else(|| element.strip_suffix('*')) {
        element = rest;
    }
    let is_core = core_types::is_core_name(element);
    if !is_core && module.find_type(element).is_some() {
        format!("{canonical}, {}", module.name())
    } else {
        canonical.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::loader::parse_module;

    fn module(json: &str) -> LoadedModule {
        LoadedModule {
            id: ModuleId::of_bytes(json.as_bytes()),
            manifest: parse_module(json.as_bytes()).unwrap(),
            path: None,
        }
    }

    #[test]
    fn builds_members_with_qualified_references() {
        let m = module(
            r#"{ "name": "Game", "types": [
                { "name": "Game.Item", "kind": "struct", "fields": [{ "name": "id", "type": "int" }] },
                { "name": "Game.Bag",
                  "fields": [{ "name": "items", "type": "Game.Item[]" }],
                  "methods": [{ "name": "Put", "params": [{ "name": "item", "type": "Game.Item" }, { "name": "n", "type": "int" }], "returns": "bool", "body": "return true;" }] }
            ] }"#,
        );
        let def = m.find_type("Game.Bag").unwrap();
        let bag = TypeDescriptor::from_definition(def, &m, DomainId(1));

        assert_eq!(bag.base.as_deref(), Some("System.Object"));
        assert_eq!(bag.fields[0].type_name, "Game.Item[], Game");
        let put = &bag.methods[0];
        assert_eq!(put.parameters[0].type_name, "Game.Item, Game");
        assert_eq!(put.parameters[1].type_name, "System.Int32");
        assert_eq!(put.signature(), "Boolean Put(Game.Item, Int32)");
        assert_eq!(put.body, MethodBody::Script("Game/Game.Bag/Put#0".into()));
        assert_eq!(bag.qualified_name(), "Game.Bag, Game");
    }

    #[test]
    fn enums_and_interfaces_are_not_instantiable() {
        let m = module(
            r#"{ "name": "M", "types": [
                { "name": "Color", "kind": "enum", "underlying": "byte", "values": [{ "name": "Red", "value": 1 }] },
                { "name": "IThing", "kind": "interface" },
                { "name": "Thing", "interfaces": ["IThing"] }
            ] }"#,
        );
        let color = TypeDescriptor::from_definition(m.find_type("Color").unwrap(), &m, DomainId(1));
        assert_eq!(color.category, TypeCategory::Enum(ValueKind::Byte));
        assert_eq!(color.enum_value("Red"), Some(1));
        assert!(!color.is_instantiable());

        let thing = TypeDescriptor::from_definition(m.find_type("Thing").unwrap(), &m, DomainId(1));
        assert_eq!(thing.interfaces, ["IThing, M"]);
        assert!(thing.is_instantiable());
    }

    #[test]
    fn property_accessors_become_methods() {
        let m = module(
            r#"{ "name": "M", "types": [{ "name": "P",
                "fields": [{ "name": "x", "type": "float" }],
                "properties": [
                    { "name": "X", "type": "float", "get": { "field": "x" } },
                    { "name": "Y", "type": "float", "get": "return 1;", "set": "this.x = value;" }
                ] }] }"#,
        );
        let p = TypeDescriptor::from_definition(m.find_type("P").unwrap(), &m, DomainId(1));
        assert!(matches!(p.properties[0].getter, Some(Accessor::Field(ref f)) if f == "x"));
        assert!(p.properties[0].setter.is_none());
        match &p.properties[1].setter {
            Some(Accessor::Script(m)) => assert_eq!(m.signature(), "Void set_Y(Single)"),
            other => panic!("unexpected setter {other:?}"),
        }
    }
}
