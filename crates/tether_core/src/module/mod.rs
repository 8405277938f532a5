//! Module manifests
//!
//! A module is a JSON manifest that declares types and their members. The
//! manifest is the reflection metadata; bodies are script source compiled
//! into the owning domain's engine when the module is activated.

pub mod loader;

pub use loader::LoadedModule;

use crate::catalog::Accessibility;
use serde::{Deserialize, Serialize};

/// Top-level manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Modules this one refers to; resolved through the domain's search paths.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDefinition>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Class,
    Struct,
    Interface,
    Enum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDefinition {
    /// Full name including namespace, e.g. `Game.Player`.
    pub name: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub access: Accessibility,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Underlying integer type of an enum.
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub values: Vec<EnumValueDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub constructors: Vec<ConstructorDefinition>,
    #[serde(default)]
    pub methods: Vec<MethodDefinition>,
    #[serde(default)]
    pub internal_calls: Vec<InternalCallDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumValueDefinition {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub access: Accessibility,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

/// Property accessor: script source, or direct access to a backing field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessorDefinition {
    Field { field: String },
    Script(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub access: Accessibility,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub get: Option<AccessorDefinition>,
    #[serde(default)]
    pub set: Option<AccessorDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstructorDefinition {
    #[serde(default)]
    pub params: Vec<ParameterDefinition>,
    #[serde(default)]
    pub access: Accessibility,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

fn void_type() -> String {
    "void".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDefinition {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParameterDefinition>,
    #[serde(default = "void_type")]
    pub returns: String,
    #[serde(default)]
    pub access: Accessibility,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub body: Option<String>,
    /// Name of an `internal_calls` slot on the same type.
    #[serde(default)]
    pub internal_call: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

/// A slot that native code fills through the internal-call table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternalCallDefinition {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "void_type")]
    pub returns: String,
}

impl TypeDefinition {
    pub fn method_key(&self, module: &str, index: usize) -> String {
        format!("{module}/{}/{}#{index}", self.name, self.methods[index].name)
    }

    pub fn constructor_key(&self, module: &str, index: usize) -> String {
        format!("{module}/{}/.ctor#{index}", self.name)
    }

    pub fn accessor_key(&self, module: &str, property: &str, setter: bool) -> String {
        let which = if setter { "set" } else { "get" };
        format!("{module}/{}/{property}.{which}", self.name)
    }

    pub fn has_finalizer(&self) -> bool {
        self.methods
            .iter()
            .any(|m| m.name == "Finalize" && m.params.is_empty() && !m.is_static)
    }
}
