//! Bridge settings

use crate::diagnostics::MessageFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// How overload resolution treats several same-arity matches.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadPolicy {
    /// Another match with a different parameter-type list is an error.
    #[default]
    Strict,
    /// First declared match wins.
    FirstMatch,
}

/// Bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Directories searched for `<Module>.json` after a domain's own paths.
    pub search_paths: Vec<PathBuf>,
    pub overload_policy: OverloadPolicy,
    pub allow_global_type_lookup: bool,
    pub unload_timeout_ms: u64,
    pub message_filter: MessageFilter,
    /// Upper bound in bytes for each domain's script heap.
    pub script_memory_limit: Option<usize>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            overload_policy: OverloadPolicy::Strict,
            allow_global_type_lookup: true,
            unload_timeout_ms: 5_000,
            message_filter: MessageFilter::ALL,
            script_memory_limit: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BridgeSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn unload_timeout(&self) -> Duration {
        Duration::from_millis(self.unload_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MessageLevel;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings =
            BridgeSettings::from_json_str(r#"{ "overload_policy": "first_match" }"#).unwrap();
        assert_eq!(settings.overload_policy, OverloadPolicy::FirstMatch);
        assert_eq!(settings.unload_timeout_ms, 5_000);
        assert!(settings.allow_global_type_lookup);
        assert!(settings.message_filter.allows(MessageLevel::Info));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "search_paths": ["mods"], "message_filter": 4, "script_memory_limit": 1048576 }}"#
        )
        .unwrap();

        let settings = BridgeSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.search_paths, vec![PathBuf::from("mods")]);
        assert!(settings.message_filter.allows(MessageLevel::Error));
        assert!(!settings.message_filter.allows(MessageLevel::Warning));
        assert_eq!(settings.script_memory_limit, Some(1 << 20));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeSettings::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
