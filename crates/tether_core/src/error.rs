use crate::ids::DomainId;
use std::path::PathBuf;
use thiserror::Error;

/// Result of a module load, as reported across the native boundary.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModuleLoadStatus {
    Success = 0,
    FileNotFound = 1,
    FileLoadFailure = 2,
    InvalidFilePath = 3,
    InvalidModule = 4,
    UnknownError = 5,
}

/// Errors that can occur while activating a module inside a domain.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module path '{0}' is empty or does not name a file")]
    InvalidFilePath(String),

    #[error("module file '{}' not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read module '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a different module named '{name}' is already loaded in this domain")]
    NameConflict { name: String },

    #[error("module manifest is malformed: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("module '{module}' is invalid: {reason}")]
    Invalid { module: String, reason: String },

    #[error("failed to compile '{member}' in module '{module}': {message}")]
    Script {
        module: String,
        member: String,
        message: String,
    },

    #[error("script engine failure: {0}")]
    Engine(String),
}

impl ModuleError {
    pub fn status(&self) -> ModuleLoadStatus {
        match self {
            ModuleError::InvalidFilePath(_) => ModuleLoadStatus::InvalidFilePath,
            ModuleError::FileNotFound(_) => ModuleLoadStatus::FileNotFound,
            ModuleError::Read { .. } | ModuleError::NameConflict { .. } => {
                ModuleLoadStatus::FileLoadFailure
            }
            ModuleError::Manifest(_) | ModuleError::Invalid { .. } | ModuleError::Script { .. } => {
                ModuleLoadStatus::InvalidModule
            }
            ModuleError::Engine(_) => ModuleLoadStatus::UnknownError,
        }
    }
}

/// Every failure a bridge operation can report.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{what} '{name}' not found")]
    NotFound { what: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("marshal failure: {0}")]
    MarshalFailure(String),

    #[error("call to '{name}' is ambiguous between {}", .candidates.join(", "))]
    OverloadAmbiguous {
        name: String,
        candidates: Vec<String>,
    },

    #[error("domain {0} is not loaded")]
    DomainInvalid(DomainId),

    #[error("domain {0} still has calls in flight")]
    DomainBusy(DomainId),

    #[error("managed exception: {0}")]
    RuntimeException(String),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl BridgeError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        BridgeError::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Ambiguous overloads are a resolution miss from the caller's point of view.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BridgeError::NotFound { .. } | BridgeError::OverloadAmbiguous { .. }
        )
    }

    pub fn load_status(&self) -> ModuleLoadStatus {
        match self {
            BridgeError::Module(err) => err.status(),
            BridgeError::InvalidArgument(_) => ModuleLoadStatus::InvalidFilePath,
            _ => ModuleLoadStatus::UnknownError,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_errors_map_to_load_status() {
        let missing = ModuleError::FileNotFound(PathBuf::from("nope.json"));
        assert_eq!(missing.status(), ModuleLoadStatus::FileNotFound);

        let conflict = ModuleError::NameConflict {
            name: "Game".into(),
        };
        assert_eq!(conflict.status(), ModuleLoadStatus::FileLoadFailure);

        let bridge: BridgeError = ModuleError::InvalidFilePath(String::new()).into();
        assert_eq!(bridge.load_status(), ModuleLoadStatus::InvalidFilePath);
    }

    #[test]
    fn ambiguity_counts_as_not_found() {
        let err = BridgeError::OverloadAmbiguous {
            name: "Add".into(),
            candidates: vec!["Void Add(A)".into(), "Void Add(B)".into()],
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Void Add(A), Void Add(B)"));
    }
}
