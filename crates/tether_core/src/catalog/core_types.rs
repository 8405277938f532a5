//! The resident `System` module: always present in every domain.

use super::descriptor::{TypeCategory, TypeDescriptor};
use crate::value::ValueKind;
use dashmap::DashMap;
use std::borrow::Cow;
use std::sync::Arc;

pub const CORE_MODULE: &str = "System";

const PRIMITIVES: &[(&str, ValueKind, &str)] = &[
    ("System.SByte", ValueKind::SByte, "sbyte"),
    ("System.Byte", ValueKind::Byte, "byte"),
    ("System.Int16", ValueKind::Short, "short"),
    ("System.UInt16", ValueKind::UShort, "ushort"),
    ("System.Int32", ValueKind::Int, "int"),
    ("System.UInt32", ValueKind::UInt, "uint"),
    ("System.Int64", ValueKind::Long, "long"),
    ("System.UInt64", ValueKind::ULong, "ulong"),
    ("System.Single", ValueKind::Float, "float"),
    ("System.Double", ValueKind::Double, "double"),
    ("System.Boolean", ValueKind::Bool, "bool"),
    ("System.IntPtr", ValueKind::Pointer, "nint"),
    ("System.UIntPtr", ValueKind::Pointer, "nuint"),
];

const OTHERS: &[(&str, &str)] = &[
    ("System.Void", "void"),
    ("System.Object", "object"),
    ("System.String", "string"),
];

const ABSTRACT: &[(&str, &str)] = &[
    ("System.ValueType", "System.Object"),
    ("System.Enum", "System.ValueType"),
    ("System.Attribute", "System.Object"),
    ("System.Array", "System.Object"),
];

/// Maps C# aliases and bare core names to full names; `int[]` becomes
/// `System.Int32[]`. Anything else is returned trimmed.
pub fn canonical_name(name: &str) -> Cow<'_, str> {
    let name = name.trim();
    if let Some(element) = name.strip_suffix("[]") {
        return Cow::Owned(format!("{}[]", canonical_name(element)));
    }
    if let Some(pointee) = name.strip_suffix('*') {
        return Cow::Owned(format!("{}*", canonical_name(pointee)));
    }

    let aliases = PRIMITIVES
        .iter()
        .map(|(full, _, alias)| (*full, *alias))
        .chain(OTHERS.iter().copied());
    for (full, alias) in aliases {
        if name == alias || name == &full["System.".len()..] {
            return Cow::Borrowed(full);
        }
    }
    for (full, _) in ABSTRACT {
        if name == &full["System.".len()..] {
            return Cow::Borrowed(full);
        }
    }
    Cow::Borrowed(name)
}

pub fn primitive_kind(full_name: &str) -> Option<ValueKind> {
    PRIMITIVES
        .iter()
        .find(|(full, _, _)| *full == full_name)
        .map(|(_, kind, _)| *kind)
}

/// Resident type a value of `kind` marshals as when nothing declares one.
pub fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::String => "System.String",
        ValueKind::Array => "System.Object[]",
        other => PRIMITIVES
            .iter()
            .find(|(_, k, _)| *k == other)
            .map_or("System.Object", |(full, _, _)| *full),
    }
}

pub fn is_core_name(full_name: &str) -> bool {
    primitive_kind(full_name).is_some()
        || OTHERS.iter().any(|(full, _)| *full == full_name)
        || ABSTRACT.iter().any(|(full, _)| *full == full_name)
}

/// Name as it appears in a method signature: primitives and `Void` drop
/// their namespace, everything else keeps the full name.
pub fn signature_name(type_ref: &str) -> String {
    let (bare, _) = split_qualified(type_ref);
    let canonical = canonical_name(bare);
    let mut core: &str = &canonical;
    let mut suffix = String::new();
    while let Some(rest) = core.strip_suffix("[]").or_else(|| core.strip_suffix('*')) {
        suffix.insert_str(0, &core[rest.len()..]);
        core = rest;
    }
    let short = if core == "System.Void" || primitive_kind(core).is_some() {
        &core["System.".len()..]
    } else {
        core
    };
    format!("{short}{suffix}")
}

/// Splits `Full.Name, Module` into its parts.
pub fn split_qualified(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once(',') {
        Some((bare, module)) => (bare.trim(), Some(module.trim())),
        None => (name.trim(), None),
    }
}

/// Resident descriptors plus the array/pointer types synthesised over them.
pub(crate) struct CoreTypes {
    types: DashMap<String, Arc<TypeDescriptor>>,
}

impl CoreTypes {
    pub fn new() -> Self {
        let types = DashMap::new();
        let add = |descriptor: TypeDescriptor| {
            types.insert(descriptor.full_name.clone(), Arc::new(descriptor));
        };

        add(TypeDescriptor::resident("System.Void", TypeCategory::Void, None, true));
        add(TypeDescriptor::resident("System.Object", TypeCategory::Object, None, false));
        add(TypeDescriptor::resident(
            "System.String",
            TypeCategory::String,
            Some("System.Object"),
            true,
        ));
        for (full, base) in ABSTRACT {
            add(TypeDescriptor::resident(full, TypeCategory::Class, Some(base), true));
        }
        for (full, kind, _) in PRIMITIVES {
            add(TypeDescriptor::resident(
                full,
                TypeCategory::Primitive(*kind),
                Some("System.ValueType"),
                true,
            ));
        }
        Self { types }
    }

    pub fn get(&self, full_name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(full_name).map(|entry| Arc::clone(entry.value()))
    }

    /// Caches a synthesised type, returning whichever copy won the race.
    pub fn intern(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let key = descriptor.full_name.clone();
        Arc::clone(
            self.types
                .entry(key)
                .or_insert_with(|| Arc::new(descriptor))
                .value(),
        )
    }

    pub fn names(&self) -> Vec<String> {
        self.types.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_canonicalise() {
        assert_eq!(canonical_name("int"), "System.Int32");
        assert_eq!(canonical_name(" Int32 "), "System.Int32");
        assert_eq!(canonical_name("string[]"), "System.String[]");
        assert_eq!(canonical_name("byte*"), "System.Byte*");
        assert_eq!(canonical_name("Game.Player"), "Game.Player");
    }

    #[test]
    fn signature_names_follow_reflection_style() {
        assert_eq!(signature_name("int"), "Int32");
        assert_eq!(signature_name("void"), "Void");
        assert_eq!(signature_name("string"), "System.String");
        assert_eq!(signature_name("float[]"), "Single[]");
        assert_eq!(signature_name("Game.Player, Game"), "Game.Player");
    }

    #[test]
    fn inferred_kinds_map_to_resident_types() {
        assert_eq!(kind_name(ValueKind::Int), "System.Int32");
        assert_eq!(kind_name(ValueKind::Pointer), "System.IntPtr");
        assert_eq!(kind_name(ValueKind::Array), "System.Object[]");
        assert_eq!(kind_name(ValueKind::Struct), "System.Object");
    }

    #[test]
    fn resident_set_is_complete() {
        let core = CoreTypes::new();
        for name in [
            "System.Void",
            "System.Object",
            "System.ValueType",
            "System.Enum",
            "System.Attribute",
            "System.Boolean",
            "System.String",
            "System.IntPtr",
            "System.UIntPtr",
            "System.Double",
        ] {
            assert!(core.get(name).is_some(), "{name} missing");
        }
        assert_eq!(primitive_kind("System.UInt16"), Some(ValueKind::UShort));
        assert_eq!(split_qualified("A.B, Mod"), ("A.B", Some("Mod")));
    }
}
