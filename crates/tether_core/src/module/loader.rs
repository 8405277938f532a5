//! Reading, parsing and validating module manifests.

use super::{AccessorDefinition, ModuleManifest, TypeDefinition, TypeKind};
use crate::catalog::core_types;
use crate::error::ModuleError;
use crate::ids::ModuleId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A module activated inside a domain.
#[derive(Debug)]
pub struct LoadedModule {
    pub(crate) id: ModuleId,
    pub(crate) manifest: ModuleManifest,
    pub(crate) path: Option<PathBuf>,
}

impl LoadedModule {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn find_type(&self, full_name: &str) -> Option<&TypeDefinition> {
        self.manifest.types.iter().find(|t| t.name == full_name)
    }
}

/// One script body to compile into the domain engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptBody {
    pub key: String,
    pub member: String,
    pub params: Vec<String>,
    pub source: String,
}

/// Reads the whole file up front so the module never depends on it again.
pub(crate) fn read_module_file(path: &Path) -> Result<Vec<u8>, ModuleError> {
    if path.as_os_str().is_empty() {
        return Err(ModuleError::InvalidFilePath(String::new()));
    }
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ModuleError::FileNotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(ModuleError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.is_file() {
        return Err(ModuleError::InvalidFilePath(path.display().to_string()));
    }
    std::fs::read(path).map_err(|source| ModuleError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn parse_module(bytes: &[u8]) -> Result<ModuleManifest, ModuleError> {
    let manifest: ModuleManifest = serde_json::from_slice(bytes)?;
    validate(&manifest)?;
    Ok(manifest)
}

fn invalid(module: &str, reason: impl Into<String>) -> ModuleError {
    ModuleError::Invalid {
        module: module.to_string(),
        reason: reason.into(),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn validate(manifest: &ModuleManifest) -> Result<(), ModuleError> {
    let module = manifest.name.as_str();
    if module.trim().is_empty() || module.contains(',') {
        return Err(invalid(module, "module name must be non-empty and contain no ','"));
    }

    let mut type_names = HashSet::new();
    for ty in &manifest.types {
        if ty.name.trim().is_empty() || ty.name.contains(&[',', '[', ']', '*', '+'][..]) {
            return Err(invalid(module, format!("bad type name '{}'", ty.name)));
        }
        if !type_names.insert(ty.name.as_str()) {
            return Err(invalid(module, format!("type '{}' declared twice", ty.name)));
        }
        validate_type(module, ty)?;
    }
    Ok(())
}

fn validate_type(module: &str, ty: &TypeDefinition) -> Result<(), ModuleError> {
    let at = |what: String| invalid(module, format!("{}: {what}", ty.name));

    match ty.kind {
        TypeKind::Enum => {
            let underlying = ty.underlying.as_deref().unwrap_or("int");
            let is_integer = core_types::primitive_kind(&core_types::canonical_name(underlying))
                .map_or(false, |kind| kind.is_integer());
            if !is_integer {
                return Err(at(format!("enum underlying type '{underlying}' is not an integer")));
            }
            if ty.base.is_some() || !ty.fields.is_empty() || !ty.constructors.is_empty() {
                return Err(at("enums declare only values".into()));
            }
        }
        TypeKind::Struct => {
            if let Some(base) = &ty.base {
                if core_types::canonical_name(base) != "System.ValueType" {
                    return Err(at("structs cannot inherit".into()));
                }
            }
        }
        TypeKind::Interface => {
            if !ty.constructors.is_empty() || ty.fields.iter().any(|f| !f.is_static) {
                return Err(at("interfaces cannot declare constructors or instance fields".into()));
            }
        }
        TypeKind::Class => {}
    }

    let mut fields = HashSet::new();
    for field in &ty.fields {
        if !is_identifier(&field.name) || !fields.insert(field.name.as_str()) {
            return Err(at(format!("bad or duplicate field '{}'", field.name)));
        }
    }

    let slots: HashSet<&str> = ty.internal_calls.iter().map(|s| s.name.as_str()).collect();
    if slots.len() != ty.internal_calls.len() {
        return Err(at("duplicate internal call slot".into()));
    }

    for method in &ty.methods {
        if method.name.is_empty() || method.name == ".ctor" {
            return Err(at(format!("bad method name '{}'", method.name)));
        }
        check_params(method.params.iter().map(|p| p.name.as_str()))
            .map_err(|p| at(format!("{}: bad parameter '{p}'", method.name)))?;
        match (&method.body, &method.internal_call) {
            (Some(_), Some(_)) => {
                return Err(at(format!("{}: both body and internal_call", method.name)))
            }
            (None, Some(slot)) if !slots.contains(slot.as_str()) => {
                return Err(at(format!("{}: unknown internal call slot '{slot}'", method.name)))
            }
            _ => {}
        }
    }

    for ctor in &ty.constructors {
        check_params(ctor.params.iter().map(|p| p.name.as_str()))
            .map_err(|p| at(format!(".ctor: bad parameter '{p}'")))?;
    }

    let mut properties = HashSet::new();
    for property in &ty.properties {
        if !is_identifier(&property.name) || !properties.insert(property.name.as_str()) {
            return Err(at(format!("bad or duplicate property '{}'", property.name)));
        }
        for accessor in [&property.get, &property.set].into_iter().flatten() {
            if let AccessorDefinition::Field { field } = accessor {
                let backing = ty.fields.iter().find(|f| &f.name == field);
                match backing {
                    Some(f) if f.is_static == property.is_static => {}
                    _ => {
                        return Err(at(format!(
                            "property '{}' is backed by unknown field '{field}'",
                            property.name
                        )))
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_params<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for name in names {
        if !is_identifier(name) || !seen.insert(name) {
            return Err(name.to_string());
        }
    }
    Ok(())
}

/// Every script body in the manifest, keyed the way descriptors look them up.
pub(crate) fn script_bodies(manifest: &ModuleManifest) -> Vec<ScriptBody> {
    let module = manifest.name.as_str();
    let mut bodies = Vec::new();
    for ty in &manifest.types {
        for (index, method) in ty.methods.iter().enumerate() {
            if let Some(source) = &method.body {
                bodies.push(ScriptBody {
                    key: ty.method_key(module, index),
                    member: format!("{}.{}", ty.name, method.name),
                    params: method.params.iter().map(|p| p.name.clone()).collect(),
                    source: source.clone(),
                });
            }
        }
        for (index, ctor) in ty.constructors.iter().enumerate() {
            if let Some(source) = &ctor.body {
                bodies.push(ScriptBody {
                    key: ty.constructor_key(module, index),
                    member: format!("{}..ctor", ty.name),
                    params: ctor.params.iter().map(|p| p.name.clone()).collect(),
                    source: source.clone(),
                });
            }
        }
        for property in &ty.properties {
            if let Some(AccessorDefinition::Script(source)) = &property.get {
                bodies.push(ScriptBody {
                    key: ty.accessor_key(module, &property.name, false),
                    member: format!("{}.{}.get", ty.name, property.name),
                    params: Vec::new(),
                    source: source.clone(),
                });
            }
            if let Some(AccessorDefinition::Script(source)) = &property.set {
                bodies.push(ScriptBody {
                    key: ty.accessor_key(module, &property.name, true),
                    member: format!("{}.{}.set", ty.name, property.name),
                    params: vec!["value".to_string()],
                    source: source.clone(),
                });
            }
        }
    }
    bodies
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAME: &str = r#"{
        "name": "Game",
        "types": [{
            "name": "Game.Counter",
            "fields": [{ "name": "count", "type": "int", "default": 3 }],
            "properties": [
                { "name": "Count", "type": "int", "get": { "field": "count" } },
                { "name": "Twice", "type": "int", "get": "return this.count * 2;", "set": "this.count = value / 2;" }
            ],
            "constructors": [{ "params": [{ "name": "start", "type": "int" }], "body": "this.count = start;" }],
            "methods": [
                { "name": "Bump", "params": [{ "name": "by", "type": "int" }], "returns": "int", "body": "this.count += by; return this.count;" },
                { "name": "Log", "params": [{ "name": "text", "type": "string" }], "static": true, "internal_call": "Log" }
            ],
            "internal_calls": [{ "name": "Log", "params": ["string"] }]
        }]
    }"#;

    #[test]
    fn parses_and_lists_bodies() {
        let manifest = parse_module(GAME.as_bytes()).unwrap();
        assert_eq!(manifest.name, "Game");

        let bodies = script_bodies(&manifest);
        let keys: Vec<&str> = bodies.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "Game/Game.Counter/Bump#0",
                "Game/Game.Counter/.ctor#0",
                "Game/Game.Counter/Twice.get",
                "Game/Game.Counter/Twice.set",
            ]
        );
        assert_eq!(bodies[3].params, ["value"]);
    }

    #[test]
    fn rejects_unknown_internal_call_slot() {
        let json = r#"{ "name": "M", "types": [{ "name": "T",
            "methods": [{ "name": "F", "internal_call": "Missing" }] }] }"#;
        let err = parse_module(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ModuleError::Invalid { .. }));
    }

    #[test]
    fn rejects_non_integer_enum() {
        let json = r#"{ "name": "M", "types": [{ "name": "E", "kind": "enum", "underlying": "double" }] }"#;
        assert!(parse_module(json.as_bytes()).is_err());
    }

    #[test]
    fn rejects_duplicate_types_and_garbage() {
        let dup = r#"{ "name": "M", "types": [{ "name": "T" }, { "name": "T" }] }"#;
        assert!(matches!(
            parse_module(dup.as_bytes()),
            Err(ModuleError::Invalid { .. })
        ));
        assert!(matches!(
            parse_module(b"not json"),
            Err(ModuleError::Manifest(_))
        ));
    }

    #[test]
    fn file_errors_classify() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_module_file(Path::new("")),
            Err(ModuleError::InvalidFilePath(_))
        ));
        assert!(matches!(
            read_module_file(&dir.path().join("missing.json")),
            Err(ModuleError::FileNotFound(_))
        ));
        assert!(matches!(
            read_module_file(dir.path()),
            Err(ModuleError::InvalidFilePath(_))
        ));

        let file = dir.path().join("Game.json");
        std::fs::write(&file, GAME).unwrap();
        assert_eq!(read_module_file(&file).unwrap(), GAME.as_bytes());
    }
}
