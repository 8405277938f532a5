//! Collector, finalizers and internal calls.

use super::objects::Target;
use super::{Bridge, BridgeInner};
use crate::catalog::{InternalCallSlot, MemberClass, TypeDescriptor};
use crate::diagnostics::MessageLevel;
use crate::domain::Domain;
use crate::error::{BridgeError, BridgeResult};
use crate::icall::{dispatch_key, InternalCallEntry, InternalCallTarget, NativeThunk, SlotName};
use crate::ids::DomainId;
use crate::marshal::Marshaller;
use crate::object::{CollectionMode, CollectionReport, ObjectRef};
use crate::value::{ManagedValue, NativeValue};
use std::ffi::c_void;
use std::sync::Arc;

impl BridgeInner {
    /// Resolves `Namespace.Type+Slot[, Module]` to its declaring type and slot.
    pub(crate) fn internal_call_slot(
        &self,
        domain: &Domain,
        name: &str,
    ) -> BridgeResult<(Arc<TypeDescriptor>, InternalCallSlot)> {
        let parsed = SlotName::parse(name)?;
        let ty = self.catalog.resolve(Some(domain), &parsed.type_ref)?;
        let slot = ty
            .internal_call(&parsed.slot)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("internal call", name))?;
        Ok((ty, slot))
    }

    /// Calls the function bound to a slot with managed arguments.
    pub(crate) fn call_internal(
        &self,
        domain: &Domain,
        name: &str,
        args: Vec<ManagedValue>,
    ) -> BridgeResult<ManagedValue> {
        let (ty, slot) = self.internal_call_slot(domain, name)?;
        let key = dispatch_key(ty.full_name(), &slot.name);
        let target = domain
            .internal_calls
            .get(&key)
            .ok_or_else(|| BridgeError::not_found("bound internal call", key.as_str()))?;
        if args.len() != slot.params.len() {
            return Err(BridgeError::InvalidArgument(format!(
                "internal call '{key}' takes {} arguments, got {}",
                slot.params.len(),
                args.len()
            )));
        }

        let scope = Some(domain);
        let marshaller = self.marshaller(scope);
        let mut params = Vec::with_capacity(slot.params.len());
        let mut native = Vec::with_capacity(args.len());
        for (param, arg) in slot.params.iter().zip(&args) {
            let param = self.catalog.resolve(scope, param)?;
            native.push(marshaller.to_native(arg, &param)?);
            params.push(param);
        }
        let returns = self.catalog.resolve(scope, &slot.returns)?;

        let result = match target {
            InternalCallTarget::Rust(function) => function(&native),
            InternalCallTarget::Native(thunk) => {
                // SAFETY: the thunk was registered for this slot's signature.
                unsafe { call_thunk(&marshaller, thunk, &params, &native, &returns) }
            }
        }
        .and_then(|value| marshaller.to_managed(value, &returns));

        // Argument handles are only valid for the duration of the call.
        for (param, value) in params.iter().zip(&native) {
            marshaller.release_minted(param, value, 0);
        }
        result
    }

    fn finalize(&self, object: &ObjectRef) -> BridgeResult<()> {
        let ty = object.type_descriptor();
        let Some(domain) = self.owner(&ty.origin).ok().flatten() else {
            return Ok(());
        };
        let _call = domain.enter()?;
        let scope = Some(domain.as_ref());
        let finalizer = self
            .catalog
            .find_suitable_method(scope, ty, "Finalize", &[], MemberClass::Instance)?
            .ok_or_else(|| BridgeError::not_found("finalizer", ty.full_name()))?;
        self.execute(scope, &finalizer, Target::Instance(object), Vec::new())
            .map(drop)
    }
}

/// Packs arguments into wire buffers, calls the thunk and reads its result.
///
/// # Safety
/// `thunk` must accept `params` in wire layout and write a `returns` value.
unsafe fn call_thunk(
    marshaller: &Marshaller<'_>,
    thunk: NativeThunk,
    params: &[Arc<TypeDescriptor>],
    args: &[NativeValue],
    returns: &Arc<TypeDescriptor>,
) -> BridgeResult<NativeValue> {
    let release = |buffers: &[Vec<u64>]| {
        for (param, buffer) in params.iter().zip(buffers) {
            let bytes = std::slice::from_raw_parts(buffer.as_ptr() as *const u8, buffer.len() * 8);
            marshaller.release_wire(param, bytes, 0);
        }
    };
    let mut buffers: Vec<Vec<u64>> = Vec::with_capacity(args.len());
    for (param, arg) in params.iter().zip(args) {
        let written = marshaller.layout(param).and_then(|layout| {
            let mut buffer = vec![0u64; layout.size.div_ceil(8).max(1)];
            marshaller
                .write_native(param, arg, buffer.as_mut_ptr() as *mut u8, buffer.len() * 8)
                .map(|()| buffer)
        });
        match written {
            Ok(buffer) => buffers.push(buffer),
            Err(err) => {
                release(&buffers);
                return Err(err);
            }
        }
    }
    let pointers: Vec<*const c_void> = buffers
        .iter()
        .map(|buffer| buffer.as_ptr() as *const c_void)
        .collect();

    let size = marshaller.layout(returns)?.size;
    let mut result = vec![0u64; size.div_ceil(8).max(1)];
    thunk(
        pointers.as_ptr(),
        pointers.len() as i32,
        result.as_mut_ptr() as *mut c_void,
    );

    release(&buffers);
    marshaller.read_native(returns, result.as_ptr() as *const u8)
}

impl Bridge {
    /// Collects unreferenced weak objects up to `generation` (negative: all).
    /// Blocking and compaction are accepted for compatibility and do not
    /// change the outcome.
    pub fn collect_garbage(
        &self,
        generation: i32,
        mode: CollectionMode,
        blocking: bool,
        compacting: bool,
    ) -> CollectionReport {
        tracing::debug!(generation, ?mode, blocking, compacting, "collecting");
        self.inner
            .collector
            .collect(generation, mode, |object| object.type_descriptor().has_finalizer())
    }

    /// Runs every queued finalizer. Exceptions are reported, not returned.
    pub fn wait_for_pending_finalizers(&self) -> usize {
        let pending = self.inner.collector.take_pending();
        let mut finalized = 0;
        for object in pending {
            match self.inner.finalize(&object) {
                Ok(()) => finalized += 1,
                Err(err) => self.inner.diagnostics.report(&err),
            }
        }
        finalized
    }

    /// Binds functions to slots declared by the domain's types. Entries
    /// naming unknown slots are skipped with a warning. Returns how many
    /// were bound.
    pub fn register_internal_calls(
        &self,
        domain: DomainId,
        entries: impl IntoIterator<Item = InternalCallEntry>,
    ) -> BridgeResult<usize> {
        self.reported(|| {
            let domain = self.inner.domains.get(domain)?;
            let _call = domain.enter()?;
            let mut bound = 0;
            for entry in entries {
                match self.inner.internal_call_slot(&domain, &entry.name) {
                    Ok((ty, slot)) => {
                        domain
                            .internal_calls
                            .bind(dispatch_key(ty.full_name(), &slot.name), entry.target);
                        bound += 1;
                    }
                    Err(err) => self.inner.diagnostics.message(
                        &format!("internal call '{}' skipped: {err}", entry.name),
                        MessageLevel::Warning,
                    ),
                }
            }
            tracing::info!(domain = domain.id().0, bound, "internal calls registered");
            Ok(bound)
        })
    }
}
