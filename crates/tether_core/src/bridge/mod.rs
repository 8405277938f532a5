//! Bridge facade
//!
//! `Bridge` owns every subsystem and is the single entry point used by the
//! C boundary. Each public operation forwards its failure to the
//! diagnostics callbacks before returning it.

mod domains;
mod objects;
mod runtime;
mod types;

#[cfg(test)]
mod tests;

use crate::catalog::{Catalog, FieldDescriptor, InternalCallSlot, Origin, TypeDescriptor};
use crate::diagnostics::Diagnostics;
use crate::domain::{Domain, DomainGuard, DomainManager};
use crate::error::{BridgeError, BridgeResult};
use crate::ids::{DomainId, TypeId};
use crate::marshal::Marshaller;
use crate::object::{Collector, ObjectRegistry};
use crate::script::ScriptHost;
use crate::settings::BridgeSettings;
use crate::value::ManagedValue;
use std::sync::{Arc, Weak};

pub(crate) struct BridgeInner {
    pub settings: BridgeSettings,
    pub diagnostics: Diagnostics,
    pub domains: DomainManager,
    pub catalog: Catalog,
    pub objects: ObjectRegistry,
    pub collector: Collector,
}

/// Shared handle to one bridge instance. Clones refer to the same bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeSettings::default())
    }
}

impl Bridge {
    pub fn new(settings: BridgeSettings) -> Self {
        tracing::info!(
            policy = ?settings.overload_policy,
            search_paths = settings.search_paths.len(),
            "bridge initialised"
        );
        Self {
            inner: Arc::new(BridgeInner {
                diagnostics: Diagnostics::new(settings.message_filter),
                domains: DomainManager::new(),
                catalog: Catalog::new(settings.overload_policy),
                objects: ObjectRegistry::new(),
                collector: Collector::new(),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.inner.objects
    }

    /// Runs an operation and reports its failure, if any.
    fn reported<T>(&self, operation: impl FnOnce() -> BridgeResult<T>) -> BridgeResult<T> {
        let result = operation();
        if let Err(err) = &result {
            self.inner.diagnostics.report(err);
        }
        result
    }

    fn type_of(&self, id: TypeId) -> BridgeResult<Arc<TypeDescriptor>> {
        self.inner.catalog.types.get(id, "type")
    }
}

impl BridgeInner {
    /// Domain that owns a descriptor; resident descriptors have none.
    pub(crate) fn owner(&self, origin: &Origin) -> BridgeResult<Option<Arc<Domain>>> {
        origin.domain.map(|id| self.domains.get(id)).transpose()
    }

    pub(crate) fn marshaller<'a>(&'a self, scope: Option<&'a Domain>) -> Marshaller<'a> {
        Marshaller::new(&self.catalog, scope, &self.objects)
    }
}

/// Marks a call in flight in the owning domain, if there is one.
fn enter(domain: &Option<Arc<Domain>>) -> BridgeResult<Option<DomainGuard<'_>>> {
    domain.as_deref().map(Domain::enter).transpose()
}

/// The script engine's view of the bridge, scoped to one domain.
pub(crate) struct DomainHost {
    bridge: Weak<BridgeInner>,
    domain: DomainId,
}

impl DomainHost {
    fn scope(&self) -> BridgeResult<(Arc<BridgeInner>, Arc<Domain>)> {
        let inner = self
            .bridge
            .upgrade()
            .ok_or(BridgeError::DomainInvalid(self.domain))?;
        let domain = inner
            .domains
            .get_any(self.domain)
            .ok_or(BridgeError::DomainInvalid(self.domain))?;
        Ok((inner, domain))
    }
}

impl ScriptHost for DomainHost {
    fn resolve_type(&self, name: &str) -> BridgeResult<Arc<TypeDescriptor>> {
        let (inner, domain) = self.scope()?;
        inner.catalog.resolve(Some(&domain), name)
    }

    fn zero_value(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<ManagedValue> {
        let (inner, domain) = self.scope()?;
        inner.marshaller(Some(&domain)).zero_value(ty)
    }

    fn instance_fields(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<Vec<Arc<FieldDescriptor>>> {
        let (inner, domain) = self.scope()?;
        inner.catalog.instance_fields(Some(&domain), ty)
    }

    fn internal_call_slot(&self, name: &str) -> BridgeResult<InternalCallSlot> {
        let (inner, domain) = self.scope()?;
        inner.internal_call_slot(&domain, name).map(|(_, slot)| slot)
    }

    fn call_internal(&self, name: &str, args: Vec<ManagedValue>) -> BridgeResult<ManagedValue> {
        let (inner, domain) = self.scope()?;
        inner.call_internal(&domain, name, args)
    }
}
