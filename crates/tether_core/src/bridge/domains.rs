//! Domain and module operations.

use super::{Bridge, DomainHost};
use crate::domain::{Domain, DomainState};
use crate::error::{BridgeError, BridgeResult, ModuleError};
use crate::ids::{DomainId, ModuleId, TypeId};
use crate::module::LoadedModule;
use crate::script::ScriptRuntime;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

impl Bridge {
    /// Creates an empty domain. Its search paths are consulted before the
    /// bridge-wide ones.
    pub fn create_domain(&self, name: &str, search_paths: &[PathBuf]) -> BridgeResult<DomainId> {
        self.reported(|| {
            let inner = &self.inner;
            let id = inner.domains.next_id();
            let host = Arc::new(DomainHost {
                bridge: Arc::downgrade(inner),
                domain: id,
            });
            let script = ScriptRuntime::new(host, inner.settings.script_memory_limit)
                .map_err(|err| ModuleError::Engine(err.to_string()))?;
            let paths = search_paths
                .iter()
                .chain(inner.settings.search_paths.iter())
                .cloned()
                .collect();
            inner
                .domains
                .insert(Arc::new(Domain::new(id, name, paths, script)));
            tracing::info!(domain = id.0, name, "domain created");
            Ok(id)
        })
    }

    /// Tears a domain down once its in-flight calls have drained. Every
    /// handle to one of its objects becomes invalid and every ID of one of
    /// its descriptors is forgotten.
    pub fn unload_domain(&self, id: DomainId) -> BridgeResult<()> {
        self.reported(|| {
            let inner = &self.inner;
            let domain = inner.domains.get(id)?;
            let gate = domain.quiesce(inner.settings.unload_timeout())?;

            let released = inner.objects.release_domain(id);
            let collected = inner.collector.release_domain(id);
            let purged = inner.catalog.purge_domain(id);
            domain.teardown();
            drop(gate);
            inner.domains.remove(id);

            tracing::info!(
                domain = id.0,
                strong = released.strong,
                weak = released.weak,
                collected,
                purged,
                "domain unloaded"
            );
            Ok(())
        })
    }

    pub fn domain_state(&self, id: DomainId) -> DomainState {
        self.inner
            .domains
            .get_any(id)
            .map_or(DomainState::Gone, |domain| domain.state())
    }

    pub fn domains(&self) -> Vec<DomainId> {
        self.inner.domains.live().iter().map(|d| d.id()).collect()
    }

    /// Reads a module file in full and activates it in the domain.
    pub fn load_module(&self, domain: DomainId, path: impl AsRef<Path>) -> BridgeResult<ModuleId> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            let _call = domain.enter()?;
            Ok(domain.load_path(path.as_ref())?.id())
        })
    }

    pub fn load_module_from_memory(&self, domain: DomainId, bytes: &[u8]) -> BridgeResult<ModuleId> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            let _call = domain.enter()?;
            Ok(domain.load_bytes(bytes, None)?.id())
        })
    }

    fn module(&self, domain: &Domain, module: ModuleId) -> BridgeResult<Arc<LoadedModule>> {
        domain
            .module(module)
            .ok_or_else(|| BridgeError::not_found("module", module.to_string()))
    }

    pub fn module_name(&self, domain: DomainId, module: ModuleId) -> BridgeResult<String> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            Ok(self.module(&domain, module)?.name().to_string())
        })
    }

    pub fn module_by_name(&self, domain: DomainId, name: &str) -> BridgeResult<ModuleId> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            domain
                .module_by_name(name)
                .map(|m| m.id())
                .ok_or_else(|| BridgeError::not_found("module", name))
        })
    }

    /// IDs of every type declared by a module, in declaration order.
    /// Descriptors are built on rayon workers.
    pub fn module_types(&self, domain: DomainId, module: ModuleId) -> BridgeResult<Vec<TypeId>> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            let _call = domain.enter()?;
            let module = self.module(&domain, module)?;
            let catalog = &self.inner.catalog;
            module
                .manifest()
                .types
                .par_iter()
                .map(|def| {
                    let name = format!("{}, {}", def.name, module.name());
                    let ty = catalog.resolve(Some(&domain), &name)?;
                    Ok(catalog.types.add(&ty))
                })
                .collect()
        })
    }

    /// Resolves a type name inside a domain: resident types first, then the
    /// domain's modules in load order.
    pub fn type_id(&self, domain: DomainId, name: &str) -> BridgeResult<TypeId> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            let _call = domain.enter()?;
            let ty = self.inner.catalog.resolve(Some(&domain), name)?;
            Ok(self.inner.catalog.types.add(&ty))
        })
    }

    /// Domain-indifferent lookup across every live domain.
    #[deprecated(note = "type names are only unique within a domain; use `type_id`")]
    pub fn type_id_global(&self, name: &str) -> BridgeResult<TypeId> {
        self.reported(|| {
            if !self.inner.settings.allow_global_type_lookup {
                return Err(BridgeError::InvalidArgument(format!(
                    "global type lookup of '{name}' is disabled"
                )));
            }
            tracing::warn!(name, "deprecated domain-indifferent type lookup");
            let catalog = &self.inner.catalog;
            if let Some(resident) = catalog.resident(name) {
                return Ok(catalog.types.add(&resident));
            }
            for domain in self.inner.domains.live() {
                let Ok(_call) = domain.enter() else {
                    continue;
                };
                match catalog.resolve(Some(&domain), name) {
                    Ok(ty) => return Ok(catalog.types.add(&ty)),
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                }
            }
            Err(BridgeError::not_found("type", name))
        })
    }
}
