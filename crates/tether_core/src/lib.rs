//! Tether Core
//!
//! Runtime bridge between a native host and managed modules:
//! - Module domains that load and unload independently
//! - Type & member catalog with stable descriptor IDs
//! - Handle-based object registry and invocation
//! - Value marshalling, typed and wire level
//! - Diagnostics forwarded to host callbacks

pub mod bridge;
pub mod catalog;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod icall;
pub mod ids;
pub mod marshal;
pub mod module;
pub mod object;
pub mod script;
pub mod settings;
pub mod value;

pub use bridge::Bridge;
pub use catalog::{Accessibility, MemberClass};
pub use diagnostics::{ExceptionCallback, MessageCallback, MessageFilter, MessageLevel};
pub use domain::DomainState;
pub use error::{BridgeError, BridgeResult, ModuleError, ModuleLoadStatus};
pub use icall::{InternalCallEntry, InternalCallFn, NativeThunk};
pub use ids::{AttributeId, DomainId, FieldId, MethodId, ModuleId, PropertyId, TypeId};
pub use marshal::{NativeArray, NativeString};
pub use object::{CollectionMode, CollectionReport, HandleKind, ObjectHandle};
pub use settings::{BridgeSettings, OverloadPolicy};
pub use value::{NativeValue, ValueKind};

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
