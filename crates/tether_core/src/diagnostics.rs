//! Diagnostics bridge
//!
//! Forwards reported failures to callbacks registered by the native host,
//! in addition to the `tracing` output every failure already gets.

use crate::error::BridgeError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Severity of a diagnostic message. Values are bit flags.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageLevel {
    Info = 1,
    Warning = 2,
    Error = 4,
}

impl MessageLevel {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(MessageLevel::Info),
            2 => Some(MessageLevel::Warning),
            4 => Some(MessageLevel::Error),
            _ => None,
        }
    }
}

/// Bit mask of the levels delivered to the message callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFilter(pub u32);

impl MessageFilter {
    pub const ALL: Self = Self(1 | 2 | 4);
    pub const NONE: Self = Self(0);

    pub fn allows(self, level: MessageLevel) -> bool {
        self.0 & level as u32 != 0
    }
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self::ALL
    }
}

pub type MessageCallback = Arc<dyn Fn(&str, MessageLevel) + Send + Sync>;
pub type ExceptionCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct Diagnostics {
    message: RwLock<Option<MessageCallback>>,
    exception: RwLock<Option<ExceptionCallback>>,
    filter: AtomicU32,
}

impl Diagnostics {
    pub fn new(filter: MessageFilter) -> Self {
        Self {
            message: RwLock::new(None),
            exception: RwLock::new(None),
            filter: AtomicU32::new(filter.0),
        }
    }

    pub fn set_message_callback(&self, callback: Option<MessageCallback>) {
        *self.message.write() = callback;
    }

    pub fn set_exception_callback(&self, callback: Option<ExceptionCallback>) {
        *self.exception.write() = callback;
    }

    pub fn set_filter(&self, filter: MessageFilter) {
        self.filter.store(filter.0, Ordering::Relaxed);
    }

    pub fn filter(&self) -> MessageFilter {
        MessageFilter(self.filter.load(Ordering::Relaxed))
    }

    pub fn message(&self, text: &str, level: MessageLevel) {
        match level {
            MessageLevel::Info => tracing::info!(target: "tether", "{text}"),
            MessageLevel::Warning => tracing::warn!(target: "tether", "{text}"),
            MessageLevel::Error => tracing::error!(target: "tether", "{text}"),
        }

        if !self.filter().allows(level) {
            return;
        }
        // Clone out so a callback may re-register without deadlocking.
        let callback = self.message.read().clone();
        if let Some(callback) = callback {
            callback(text, level);
        }
    }

    /// Routes a failure to the exception callback (script exceptions) or
    /// the message callback at error level.
    pub fn report(&self, error: &BridgeError) {
        if let BridgeError::RuntimeException(text) = error {
            tracing::error!(target: "tether", "managed exception: {text}");
            let callback = self.exception.read().clone();
            match callback {
                Some(callback) => callback(text),
                None => self.message(&error.to_string(), MessageLevel::Error),
            }
            return;
        }
        self.message(&error.to_string(), MessageLevel::Error);
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(MessageFilter::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collector() -> (Arc<Mutex<Vec<(String, MessageLevel)>>>, MessageCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: MessageCallback = Arc::new(move |text: &str, level| {
            sink.lock().push((text.to_string(), level));
        });
        (seen, callback)
    }

    #[test]
    fn filter_masks_levels() {
        let diagnostics = Diagnostics::new(MessageFilter(MessageLevel::Error as u32));
        let (seen, callback) = collector();
        diagnostics.set_message_callback(Some(callback));

        diagnostics.message("quiet", MessageLevel::Info);
        diagnostics.message("loud", MessageLevel::Error);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("loud".to_string(), MessageLevel::Error));
    }

    #[test]
    fn exceptions_prefer_the_exception_callback() {
        let diagnostics = Diagnostics::default();
        let (messages, callback) = collector();
        diagnostics.set_message_callback(Some(callback));

        let thrown = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&thrown);
        diagnostics.set_exception_callback(Some(Arc::new(move |text: &str| {
            sink.lock().push(text.to_string());
        })));

        diagnostics.report(&BridgeError::RuntimeException("boom".into()));
        diagnostics.report(&BridgeError::not_found("type", "Nope"));

        assert_eq!(thrown.lock().as_slice(), ["boom".to_string()]);
        let messages = messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("Nope"));
    }

    #[test]
    fn exception_without_callback_falls_back_to_message() {
        let diagnostics = Diagnostics::default();
        let (messages, callback) = collector();
        diagnostics.set_message_callback(Some(callback));
        diagnostics.report(&BridgeError::RuntimeException("lost".into()));
        assert_eq!(messages.lock()[0].1, MessageLevel::Error);
    }
}
