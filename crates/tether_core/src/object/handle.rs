//! Object handle with generational index
//!
//! Handles are opaque 8-byte tokens naming a slot in the object arena.
//! The generation counter rejects handles whose slot has been released
//! and reused.

/// Object handle (generation-indexed)
///
/// Format: [32-bit generation | 32-bit index]
/// - Index: position in the arena
/// - Generation: bumped on release, never zero for a live slot
///
/// The all-zero value is the null handle.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const NULL: Self = Self(0);

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub fn index(&self) -> u32 {
        self.0 as u32
    }

    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Serialize to 64-bit integer (for the C boundary)
    pub fn to_bits(&self) -> u64 {
        self.0
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let handle = ObjectHandle::new(7, 3);
        assert_eq!(handle.index(), 7);
        assert_eq!(handle.generation(), 3);
        assert_eq!(ObjectHandle::from_bits(handle.to_bits()), handle);
        assert!(!handle.is_null());
        assert!(ObjectHandle::NULL.is_null());
    }
}
