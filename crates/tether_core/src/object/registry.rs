//! Handle arena.
//!
//! Each slot is empty, owns its object (strong) or merely observes it
//! (weak). Releasing a slot bumps its generation so stale handles resolve
//! to not-found.

use super::{ManagedObject, ObjectHandle, ObjectRef};
use crate::error::{BridgeError, BridgeResult};
use crate::ids::DomainId;
use parking_lot::{Mutex, RwLock};
#[cfg(feature = "leak-detection")]
use std::collections::BTreeMap;
use std::sync::Weak;

#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Strong = 0,
    Weak = 1,
}

enum SlotState {
    Empty,
    Strong(ObjectRef),
    Weak(Weak<ManagedObject>),
}

struct Slot {
    generation: u32,
    domain: Option<DomainId>,
    state: SlotState,
}

/// Handles force-released by a domain unload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub strong: usize,
    pub weak: usize,
    /// Strong handles still outstanding at unload, by owning module.
    #[cfg(feature = "leak-detection")]
    pub leaked: BTreeMap<String, Vec<ObjectHandle>>,
}

#[derive(Default)]
pub struct ObjectRegistry {
    slots: RwLock<Vec<Slot>>,
    free: Mutex<Vec<u32>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self, object: &ObjectRef, kind: HandleKind) -> ObjectHandle {
        let state = match kind {
            HandleKind::Strong => SlotState::Strong(object.clone()),
            HandleKind::Weak => SlotState::Weak(object.downgrade()),
        };
        let domain = object.domain();

        let mut slots = self.slots.write();
        if let Some(index) = self.free.lock().pop() {
            let slot = &mut slots[index as usize];
            slot.domain = domain;
            slot.state = state;
            return ObjectHandle::new(index, slot.generation);
        }
        let index = slots.len() as u32;
        slots.push(Slot {
            generation: 1,
            domain,
            state,
        });
        ObjectHandle::new(index, 1)
    }

    pub fn resolve(&self, handle: ObjectHandle) -> BridgeResult<ObjectRef> {
        let stale = || BridgeError::not_found("object handle", handle.to_string());
        let slots = self.slots.read();
        let slot = slots
            .get(handle.index() as usize)
            .filter(|s| s.generation == handle.generation())
            .ok_or_else(stale)?;
        match &slot.state {
            SlotState::Strong(object) => Ok(object.clone()),
            SlotState::Weak(weak) => weak.upgrade().map(ObjectRef).ok_or_else(stale),
            SlotState::Empty => Err(stale()),
        }
    }

    pub fn kind(&self, handle: ObjectHandle) -> Option<HandleKind> {
        let slots = self.slots.read();
        let slot = slots
            .get(handle.index() as usize)
            .filter(|s| s.generation == handle.generation())?;
        match slot.state {
            SlotState::Strong(_) => Some(HandleKind::Strong),
            SlotState::Weak(_) => Some(HandleKind::Weak),
            SlotState::Empty => None,
        }
    }

    pub fn release(&self, handle: ObjectHandle) -> BridgeResult<()> {
        let released = {
            let mut slots = self.slots.write();
            match slots.get_mut(handle.index() as usize) {
                Some(slot)
                    if slot.generation == handle.generation()
                        && !matches!(slot.state, SlotState::Empty) =>
                {
                    Some(Self::vacate(slot))
                }
                _ => None,
            }
        };
        match released {
            // Dropped outside the arena lock.
            Some(_state) => {
                self.free.lock().push(handle.index());
                Ok(())
            }
            None => {
                #[cfg(feature = "leak-detection")]
                tracing::warn!(%handle, "release of a handle that is not live");
                Err(BridgeError::not_found("object handle", handle.to_string()))
            }
        }
    }

    fn vacate(slot: &mut Slot) -> SlotState {
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.domain = None;
        std::mem::replace(&mut slot.state, SlotState::Empty)
    }

    /// Releases every handle whose object belongs to `domain`.
    pub fn release_domain(&self, domain: DomainId) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        let mut dropped = Vec::new();
        {
            let mut slots = self.slots.write();
            let mut free = self.free.lock();
            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.domain != Some(domain) {
                    continue;
                }
                #[cfg(feature = "leak-detection")]
                let handle = ObjectHandle::new(index as u32, slot.generation);
                match Self::vacate(slot) {
                    SlotState::Strong(object) => {
                        report.strong += 1;
                        #[cfg(feature = "leak-detection")]
                        report
                            .leaked
                            .entry(object.type_descriptor().module_name().to_string())
                            .or_default()
                            .push(handle);
                        dropped.push(object);
                    }
                    SlotState::Weak(_) => report.weak += 1,
                    SlotState::Empty => {}
                }
                free.push(index as u32);
            }
        }

        #[cfg(feature = "leak-detection")]
        for (module, handles) in &report.leaked {
            tracing::warn!(
                domain = domain.0,
                module = module.as_str(),
                count = handles.len(),
                ?handles,
                "leaked strong handles released by unload"
            );
        }
        drop(dropped);
        report
    }

    /// Number of non-empty slots.
    pub fn live(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| !matches!(s.state, SlotState::Empty))
            .count()
    }

    pub fn live_in(&self, domain: DomainId) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| s.domain == Some(domain) && !matches!(s.state, SlotState::Empty))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::object::ManagedObject;
    use crate::settings::OverloadPolicy;

    fn object() -> ObjectRef {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let ty = catalog.resolve(None, "object").unwrap();
        ObjectRef::new(ManagedObject::new(ty, Vec::new()))
    }

    #[test]
    fn strong_handle_resolves_until_released() {
        let registry = ObjectRegistry::new();
        let obj = object();
        let handle = registry.alloc(&obj, HandleKind::Strong);

        assert_eq!(registry.resolve(handle).unwrap(), obj);
        assert_eq!(registry.kind(handle), Some(HandleKind::Strong));

        registry.release(handle).unwrap();
        assert!(registry.resolve(handle).unwrap_err().is_not_found());
        assert!(registry.release(handle).is_err());
    }

    #[test]
    fn reused_slot_rejects_stale_generation() {
        let registry = ObjectRegistry::new();
        let first = registry.alloc(&object(), HandleKind::Strong);
        registry.release(first).unwrap();
        let second = registry.alloc(&object(), HandleKind::Strong);

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(registry.resolve(first).is_err());
        assert!(registry.resolve(second).is_ok());
    }

    #[test]
    fn weak_handle_observes_only() {
        let registry = ObjectRegistry::new();
        let obj = object();
        let weak = registry.alloc(&obj, HandleKind::Weak);
        assert!(registry.resolve(weak).is_ok());

        drop(obj);
        assert!(registry.resolve(weak).unwrap_err().is_not_found());
        assert_eq!(registry.kind(weak), Some(HandleKind::Weak));
    }

    #[cfg(feature = "leak-detection")]
    #[test]
    fn unload_reports_leaks_per_module() {
        use crate::catalog::TypeDescriptor;
        use crate::ids::ModuleId;
        use crate::module::loader::parse_module;
        use crate::module::LoadedModule;
        use std::sync::Arc;

        let owned = |json: &str| {
            let module = LoadedModule {
                id: ModuleId::of_bytes(json.as_bytes()),
                manifest: parse_module(json.as_bytes()).unwrap(),
                path: None,
            };
            let ty = TypeDescriptor::from_definition(&module.manifest.types[0], &module, DomainId(3));
            ObjectRef::new(ManagedObject::new(Arc::new(ty), Vec::new()))
        };
        let game = owned(r#"{ "name": "Game", "types": [{ "name": "Game.Unit" }] }"#);
        let tools = owned(r#"{ "name": "Tools", "types": [{ "name": "Tools.Pen" }] }"#);

        let registry = ObjectRegistry::new();
        let first = registry.alloc(&game, HandleKind::Strong);
        let second = registry.alloc(&game, HandleKind::Strong);
        let pen = registry.alloc(&tools, HandleKind::Strong);
        registry.alloc(&tools, HandleKind::Weak);

        let report = registry.release_domain(DomainId(3));
        assert_eq!((report.strong, report.weak), (3, 1));
        assert_eq!(report.leaked.len(), 2);
        assert_eq!(report.leaked["Game"], [first, second]);
        assert_eq!(report.leaked["Tools"], [pen]);
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn resident_objects_survive_domain_release() {
        let registry = ObjectRegistry::new();
        let handle = registry.alloc(&object(), HandleKind::Strong);
        let report = registry.release_domain(DomainId(9));
        assert_eq!(report, ReleaseReport::default());
        assert!(registry.resolve(handle).is_ok());
        assert_eq!(registry.live(), 1);
    }
}
