//! Collector emulation for weakly created objects.
//!
//! A weak creation parks the object in the nursery, which owns it until a
//! collection finds nobody else does. Survivors age by one generation per
//! collection they live through, up to `MAX_GENERATION`.

use super::ObjectRef;
use crate::ids::DomainId;
use parking_lot::Mutex;

pub const MAX_GENERATION: u8 = 2;

/// `Optimized` collections skip nurseries smaller than this.
const OPTIMIZED_THRESHOLD: usize = 64;

#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum CollectionMode {
    #[default]
    Default = 0,
    Forced = 1,
    Optimized = 2,
    Aggressive = 3,
}

impl CollectionMode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(CollectionMode::Default),
            1 => Some(CollectionMode::Forced),
            2 => Some(CollectionMode::Optimized),
            3 => Some(CollectionMode::Aggressive),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionReport {
    pub collected: usize,
    pub promoted: usize,
    pub queued_finalizers: usize,
}

struct NurseryEntry {
    object: ObjectRef,
    generation: u8,
}

#[derive(Default)]
pub struct Collector {
    nursery: Mutex<Vec<NurseryEntry>>,
    pending: Mutex<Vec<ObjectRef>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, object: ObjectRef) {
        self.nursery.lock().push(NurseryEntry {
            object,
            generation: 0,
        });
    }

    /// Collects nursery objects up to `generation` (negative: all) that
    /// nothing else owns. Those whose type needs finalization are queued.
    pub fn collect(
        &self,
        generation: i32,
        mode: CollectionMode,
        needs_finalizer: impl Fn(&ObjectRef) -> bool,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();
        let limit = match (generation, mode) {
            (_, CollectionMode::Aggressive) => MAX_GENERATION,
            (g, _) if g < 0 => MAX_GENERATION,
            (g, _) => g.min(i32::from(MAX_GENERATION)) as u8,
        };

        let mut garbage = Vec::new();
        {
            let mut nursery = self.nursery.lock();
            if mode == CollectionMode::Optimized && nursery.len() < OPTIMIZED_THRESHOLD {
                return report;
            }
            nursery.retain_mut(|entry| {
                if entry.generation > limit {
                    return true;
                }
                // The nursery's own reference is the only one left.
                if entry.object.owners() == 1 {
                    garbage.push(entry.object.clone());
                    return false;
                }
                if entry.generation < MAX_GENERATION {
                    entry.generation += 1;
                    report.promoted += 1;
                }
                true
            });
        }

        let mut pending = self.pending.lock();
        for object in garbage {
            report.collected += 1;
            if needs_finalizer(&object) {
                report.queued_finalizers += 1;
                pending.push(object);
            }
        }
        tracing::debug!(
            collected = report.collected,
            promoted = report.promoted,
            queued = report.queued_finalizers,
            "collection finished"
        );
        report
    }

    /// Hands out the finalization queue; the caller runs the finalizers.
    pub fn take_pending(&self) -> Vec<ObjectRef> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Forgets a domain's objects without finalizing them.
    pub fn release_domain(&self, domain: DomainId) -> usize {
        let before = self.tracked();
        self.nursery
            .lock()
            .retain(|e| e.object.domain() != Some(domain));
        self.pending.lock().retain(|o| o.domain() != Some(domain));
        before - self.tracked()
    }

    /// Objects held by the nursery or the finalization queue.
    pub fn tracked(&self) -> usize {
        self.nursery.lock().len() + self.pending.lock().len()
    }
}
