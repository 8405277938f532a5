//! Internal calls: native functions bound into slots that types declare.
//!
//! Entries are named `Namespace.Type+Slot, Module` (module optional).

use crate::catalog::core_types::split_qualified;
use crate::error::{BridgeError, BridgeResult};
use crate::value::NativeValue;
use dashmap::DashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// A Rust closure serving a slot.
pub type InternalCallFn = Arc<dyn Fn(&[NativeValue]) -> BridgeResult<NativeValue> + Send + Sync>;

/// A native function serving a slot. `args[i]` points at the i-th argument
/// in its wire layout; the return value, if any, is written to `result`.
pub type NativeThunk = unsafe extern "C" fn(args: *const *const c_void, count: i32, result: *mut c_void);

#[derive(Clone)]
pub enum InternalCallTarget {
    Rust(InternalCallFn),
    Native(NativeThunk),
}

impl fmt::Debug for InternalCallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalCallTarget::Rust(_) => f.write_str("Rust(..)"),
            InternalCallTarget::Native(thunk) => write!(f, "Native({:p})", *thunk as *const c_void),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InternalCallEntry {
    pub name: String,
    pub target: InternalCallTarget,
}

impl InternalCallEntry {
    pub fn rust(
        name: impl Into<String>,
        function: impl Fn(&[NativeValue]) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            target: InternalCallTarget::Rust(Arc::new(function)),
        }
    }

    pub fn native(name: impl Into<String>, thunk: NativeThunk) -> Self {
        Self {
            name: name.into(),
            target: InternalCallTarget::Native(thunk),
        }
    }
}

/// Parsed `Namespace.Type+Slot, Module`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlotName {
    /// Type reference, module-qualified when the name carried a module.
    pub type_ref: String,
    pub type_name: String,
    pub slot: String,
}

impl SlotName {
    pub fn parse(name: &str) -> BridgeResult<Self> {
        let (bare, module) = split_qualified(name);
        let (type_name, slot) = bare
            .rsplit_once('+')
            .filter(|(t, s)| !t.is_empty() && !s.is_empty())
            .ok_or_else(|| {
                BridgeError::InvalidArgument(format!(
                    "internal call name '{name}' is not of the form 'Type+Slot, Module'"
                ))
            })?;
        let type_ref = match module {
            Some(module) => format!("{type_name}, {module}"),
            None => type_name.to_string(),
        };
        Ok(Self {
            type_ref,
            type_name: type_name.to_string(),
            slot: slot.to_string(),
        })
    }

    /// Dispatch key: `Namespace.Type+Slot`.
    pub fn key(&self) -> String {
        dispatch_key(&self.type_name, &self.slot)
    }
}

pub(crate) fn dispatch_key(type_name: &str, slot: &str) -> String {
    format!("{type_name}+{slot}")
}

/// Per-domain binding table.
#[derive(Default)]
pub(crate) struct InternalCallTable {
    entries: DashMap<String, InternalCallTarget>,
}

impl InternalCallTable {
    pub fn bind(&self, key: String, target: InternalCallTarget) {
        self.entries.insert(key, target);
    }

    pub fn get(&self, key: &str) -> Option<InternalCallTarget> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_slot_names() {
        let name = SlotName::parse("Game.Native+Log, Game").unwrap();
        assert_eq!(name.type_ref, "Game.Native, Game");
        assert_eq!(name.slot, "Log");
        assert_eq!(name.key(), "Game.Native+Log");

        let bare = SlotName::parse("Native+Add").unwrap();
        assert_eq!(bare.type_ref, "Native");
    }

    #[test]
    fn rejects_names_without_slot() {
        assert!(SlotName::parse("Game.Native, Game").is_err());
        assert!(SlotName::parse("Game.Native+").is_err());
    }

    #[test]
    fn table_binds_and_clears() {
        let table = InternalCallTable::default();
        let entry = InternalCallEntry::rust("T+F", |_| Ok(NativeValue::Int(1)));
        table.bind("T+F".into(), entry.target);
        match table.get("T+F") {
            Some(InternalCallTarget::Rust(f)) => assert_eq!(f(&[]).unwrap(), NativeValue::Int(1)),
            other => panic!("unexpected {other:?}"),
        }
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
