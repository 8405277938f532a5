//! Module domains
//!
//! A domain is an isolated, independently unloadable set of modules along
//! with everything derived from them: descriptors, static field storage,
//! bound internal calls and the script engine that runs their bodies.
//!
//! Calls hold a recursive read guard on the domain gate for their whole
//! duration; unload takes the write side with a timeout, so it only
//! proceeds once the domain is quiescent.

use crate::catalog::core_types::CORE_MODULE;
use crate::catalog::{FieldDescriptor, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult, ModuleError};
use crate::icall::InternalCallTable;
use crate::ids::{DomainId, ModuleId};
use crate::module::loader::{parse_module, read_module_file, script_bodies};
use crate::module::LoadedModule;
use crate::script::ScriptRuntime;
use crate::value::ManagedValue;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DomainState {
    Created = 0,
    Populated = 1,
    Unloading = 2,
    Gone = 3,
}

pub struct Domain {
    id: DomainId,
    name: String,
    search_paths: Vec<PathBuf>,
    state: Mutex<DomainState>,
    gate: RwLock<()>,
    in_flight: AtomicUsize,
    modules: RwLock<Vec<Arc<LoadedModule>>>,
    /// Serialises the name check, compilation and registration of a module.
    loading: Mutex<()>,
    types: DashMap<String, Arc<TypeDescriptor>>,
    statics: DashMap<(String, String), ManagedValue>,
    pub(crate) internal_calls: InternalCallTable,
    script: Mutex<Option<ScriptRuntime>>,
    script_owner: Mutex<Option<ThreadId>>,
}

/// Proof that a call is in flight in a live domain.
pub struct DomainGuard<'a> {
    domain: &'a Domain,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Drop for DomainGuard<'_> {
    fn drop(&mut self) {
        self.domain.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Clears the script owner even if the call unwinds.
struct ScriptOwner<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for ScriptOwner<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl Domain {
    pub(crate) fn new(
        id: DomainId,
        name: &str,
        search_paths: Vec<PathBuf>,
        script: ScriptRuntime,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            search_paths,
            state: Mutex::new(DomainState::Created),
            gate: RwLock::new(()),
            in_flight: AtomicUsize::new(0),
            modules: RwLock::new(Vec::new()),
            loading: Mutex::new(()),
            types: DashMap::new(),
            statics: DashMap::new(),
            internal_calls: InternalCallTable::default(),
            script: Mutex::new(Some(script)),
            script_owner: Mutex::new(None),
        }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DomainState {
        *self.state.lock()
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state(), DomainState::Created | DomainState::Populated)
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn enter(&self) -> BridgeResult<DomainGuard<'_>> {
        let gate = self.gate.read_recursive();
        if !self.is_live() {
            return Err(BridgeError::DomainInvalid(self.id));
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(DomainGuard {
            domain: self,
            _gate: gate,
        })
    }

    /// Waits for in-flight calls to drain, then marks the domain unloading.
    pub(crate) fn quiesce(&self, timeout: Duration) -> BridgeResult<RwLockWriteGuard<'_, ()>> {
        let gate = self
            .gate
            .try_write_for(timeout)
            .ok_or(BridgeError::DomainBusy(self.id))?;
        let mut state = self.state.lock();
        if matches!(*state, DomainState::Unloading | DomainState::Gone) {
            return Err(BridgeError::DomainInvalid(self.id));
        }
        *state = DomainState::Unloading;
        Ok(gate)
    }

    /// Drops everything the domain owns. Called with the gate held.
    pub(crate) fn teardown(&self) {
        self.internal_calls.clear();
        self.statics.clear();
        self.types.clear();
        self.modules.write().clear();
        *self.script.lock() = None;
        *self.state.lock() = DomainState::Gone;
    }

    pub fn modules(&self) -> Vec<Arc<LoadedModule>> {
        self.modules.read().clone()
    }

    pub fn module(&self, id: ModuleId) -> Option<Arc<LoadedModule>> {
        self.modules.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn module_by_name(&self, name: &str) -> Option<Arc<LoadedModule>> {
        self.modules
            .read()
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    pub(crate) fn load_path(&self, path: &Path) -> Result<Arc<LoadedModule>, ModuleError> {
        let bytes = read_module_file(path)?;
        self.load_bytes(&bytes, Some(path.to_path_buf()))
    }

    /// Activates a module. Identical bytes return the already-loaded module.
    pub(crate) fn load_bytes(
        &self,
        bytes: &[u8],
        path: Option<PathBuf>,
    ) -> Result<Arc<LoadedModule>, ModuleError> {
        let id = ModuleId::of_bytes(bytes);
        if let Some(existing) = self.module(id) {
            tracing::debug!(domain = self.id.0, module = existing.name(), "module already loaded");
            return Ok(existing);
        }

        let manifest = parse_module(bytes)?;
        let module = {
            let _loading = self.loading.lock();
            if let Some(existing) = self.module(id) {
                return Ok(existing);
            }
            if manifest.name == CORE_MODULE || self.module_by_name(&manifest.name).is_some() {
                return Err(ModuleError::NameConflict {
                    name: manifest.name,
                });
            }
            self.compile(&manifest)?;
            let module = Arc::new(LoadedModule { id, manifest, path });
            self.modules.write().push(Arc::clone(&module));
            module
        };
        {
            let mut state = self.state.lock();
            if *state == DomainState::Created {
                *state = DomainState::Populated;
            }
        }
        tracing::info!(
            domain = self.id.0,
            module = module.name(),
            id = %id,
            types = module.manifest.types.len(),
            "module loaded"
        );

        for reference in &module.manifest.references {
            match self.resolve_module(reference) {
                Ok(Some(_)) => {}
                Ok(None) if reference == CORE_MODULE => {}
                Ok(None) => tracing::warn!(
                    module = module.name(),
                    reference = reference.as_str(),
                    "unresolved module reference"
                ),
                Err(err) => tracing::warn!(
                    module = module.name(),
                    reference = reference.as_str(),
                    "failed to load referenced module: {err}"
                ),
            }
        }
        Ok(module)
    }

    fn compile(&self, manifest: &crate::module::ModuleManifest) -> Result<(), ModuleError> {
        let guard = self.script.lock();
        let script = guard
            .as_ref()
            .ok_or_else(|| ModuleError::Engine(format!("domain {} has no script engine", self.id)))?;
        for body in script_bodies(manifest) {
            script.compile(&body).map_err(|message| ModuleError::Script {
                module: manifest.name.clone(),
                member: body.member.clone(),
                message,
            })?;
        }
        Ok(())
    }

    /// Loaded modules first, then `<dir>/<name>.json` along the search paths.
    /// The resident core module is not a loaded module and yields `None`.
    pub(crate) fn resolve_module(&self, name: &str) -> Result<Option<Arc<LoadedModule>>, ModuleError> {
        if let Some(module) = self.module_by_name(name) {
            return Ok(Some(module));
        }
        if name == CORE_MODULE {
            return Ok(None);
        }
        for dir in &self.search_paths {
            let candidate = dir.join(format!("{name}.json"));
            if !candidate.is_file() {
                continue;
            }
            let module = self.load_path(&candidate)?;
            if module.name() != name {
                tracing::warn!(
                    path = %candidate.display(),
                    declared = module.name(),
                    "module file name does not match its declared name"
                );
            }
            return Ok(Some(module));
        }
        Ok(None)
    }

    /// Finds (building on first use) the descriptor of a declared type.
    pub(crate) fn lookup_type(
        &self,
        full_name: &str,
        module: Option<&str>,
    ) -> BridgeResult<Option<Arc<TypeDescriptor>>> {
        let candidates = match module {
            Some(name) => match self.resolve_module(name)? {
                Some(module) => vec![module],
                None => return Ok(None),
            },
            None => self.modules(),
        };
        for module in candidates {
            let Some(definition) = module.find_type(full_name) else {
                continue;
            };
            let key = format!("{full_name}, {}", module.name());
            if let Some(hit) = self.types.get(&key) {
                return Ok(Some(Arc::clone(hit.value())));
            }
            tracing::debug!(domain = self.id.0, key = key.as_str(), "building type descriptor");
            let built = TypeDescriptor::from_definition(definition, &module, self.id);
            let entry = self.types.entry(key).or_insert_with(|| Arc::new(built));
            return Ok(Some(Arc::clone(entry.value())));
        }
        Ok(None)
    }

    pub(crate) fn intern_type(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let key = descriptor.qualified_name();
        Arc::clone(
            self.types
                .entry(key)
                .or_insert_with(|| Arc::new(descriptor))
                .value(),
        )
    }

    pub(crate) fn static_value(&self, field: &FieldDescriptor) -> Option<ManagedValue> {
        self.statics
            .get(&(field.declaring_type.clone(), field.name.clone()))
            .map(|entry| entry.value().clone())
    }

    pub(crate) fn set_static_value(&self, field: &FieldDescriptor, value: ManagedValue) {
        self.statics
            .insert((field.declaring_type.clone(), field.name.clone()), value);
    }

    /// Runs `f` against the script engine. Re-entering the engine from the
    /// thread already running one of its scripts is refused.
    pub(crate) fn with_script<R>(
        &self,
        f: impl FnOnce(&ScriptRuntime) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let current = std::thread::current().id();
        if *self.script_owner.lock() == Some(current) {
            return Err(BridgeError::InvalidArgument(format!(
                "re-entrant call into the scripts of domain {}",
                self.id
            )));
        }
        let guard = self.script.lock();
        let script = guard.as_ref().ok_or(BridgeError::DomainInvalid(self.id))?;
        *self.script_owner.lock() = Some(current);
        let _owner = ScriptOwner(&self.script_owner);
        f(script)
    }
}

/// Live domains by id.
pub struct DomainManager {
    domains: DashMap<DomainId, Arc<Domain>>,
    next: AtomicU32,
}

impl DomainManager {
    pub fn new() -> Self {
        Self {
            domains: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> DomainId {
        DomainId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, domain: Arc<Domain>) {
        self.domains.insert(domain.id(), domain);
    }

    pub fn get(&self, id: DomainId) -> BridgeResult<Arc<Domain>> {
        self.domains
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|d| d.is_live())
            .ok_or(BridgeError::DomainInvalid(id))
    }

    /// Like `get`, but also returns domains that are mid-unload.
    pub(crate) fn get_any(&self, id: DomainId) -> Option<Arc<Domain>> {
        self.domains.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove(&self, id: DomainId) -> Option<Arc<Domain>> {
        self.domains.remove(&id).map(|(_, domain)| domain)
    }

    pub fn live(&self) -> Vec<Arc<Domain>> {
        let mut domains: Vec<_> = self
            .domains
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|d| d.is_live())
            .collect();
        domains.sort_by_key(|d| d.id());
        domains
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl Default for DomainManager {
    fn default() -> Self {
        Self::new()
    }
}
