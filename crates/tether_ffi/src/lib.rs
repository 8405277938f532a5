//! Tether C ABI
//!
//! `extern "C"` surface over one process-wide [`Bridge`]. Nothing unwinds
//! across the boundary: failures are reported through the diagnostics
//! callbacks and returned as sentinels (0 IDs, null handles, `false`,
//! `-1` counts, nothing written).
//!
//! Values cross in wire layout (see `tether_core::marshal::wire`). Calls
//! taking arguments receive an array of pointers, one per argument, plus
//! the argument kinds used for overload resolution. Strings and arrays
//! written to the caller are owned by the caller and released with
//! [`tether_free_string`] and [`tether_free_array`].

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::{
    AttributeId, Bridge, BridgeError, BridgeSettings, CollectionMode, DomainId,
    DomainState, FieldId, InternalCallEntry, MessageFilter, MessageLevel, MethodId, ModuleId,
    ModuleLoadStatus, NativeArray, NativeString, NativeThunk, NativeValue, ObjectHandle,
    PropertyId, TypeId, ValueKind,
};

static BRIDGE: Lazy<RwLock<Option<Bridge>>> = Lazy::new(|| RwLock::new(None));

/// Message sink: text (valid for the call only), level bit, user data.
pub type TetherMessageCallback =
    unsafe extern "C" fn(message: *const c_char, level: u32, user_data: *mut c_void);

/// Exception sink: text (valid for the call only), user data.
pub type TetherExceptionCallback = unsafe extern "C" fn(message: *const c_char, user_data: *mut c_void);

/// One internal-call binding: `Namespace.Type+Slot[, Module]` and its thunk.
#[repr(C)]
pub struct TetherInternalCall {
    pub name: *const c_char,
    pub thunk: Option<NativeThunk>,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TetherCollection {
    pub collected: u64,
    pub promoted: u64,
    pub queued_finalizers: u64,
}

/// Host pointer handed back to callbacks untouched.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// SAFETY: the bridge never dereferences the pointer; the host decides
// which threads may see it.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

fn current() -> Option<Bridge> {
    BRIDGE.read().clone()
}

/// A failed boundary call. Errors raised by the bridge were reported where
/// they happened; errors raised in this crate are reported by [`guard`].
struct Failure {
    error: BridgeError,
    reported: bool,
}

impl From<BridgeError> for Failure {
    fn from(error: BridgeError) -> Self {
        Self { error, reported: true }
    }
}

type Boundary<T> = Result<T, Failure>;

fn invalid(message: impl Into<String>) -> Failure {
    Failure {
        error: BridgeError::InvalidArgument(message.into()),
        reported: false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs a boundary call against the live bridge. Failures raised here and
/// panics are sent to the diagnostics callbacks; the bridge reports its own.
fn guard<T>(fallback: T, call: impl FnOnce(&Bridge) -> Boundary<T>) -> T {
    let Some(bridge) = current() else {
        tracing::warn!("boundary call before the bridge was initialised");
        return fallback;
    };
    match catch_unwind(AssertUnwindSafe(|| call(&bridge))) {
        Ok(Ok(value)) => value,
        Ok(Err(failure)) => {
            if failure.reported {
                tracing::debug!(err = %failure.error, "boundary call failed");
            } else {
                bridge.diagnostics().report(&failure.error);
            }
            fallback
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            tracing::error!(%reason, "panic contained at the C boundary");
            bridge
                .diagnostics()
                .message(&format!("internal panic: {reason}"), MessageLevel::Error);
            fallback
        }
    }
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string.
unsafe fn text<'a>(ptr: *const c_char, what: &str) -> Boundary<&'a str> {
    if ptr.is_null() {
        return Err(invalid(format!("{what} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|err| invalid(format!("{what} is not UTF-8: {err}")))
}

fn c_text(text: &str) -> CString {
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

/// # Safety
/// `out` must be null or writable.
unsafe fn put_string(out: *mut NativeString, value: String) -> Boundary<bool> {
    if out.is_null() {
        return Err(invalid("string output is null"));
    }
    out.write(NativeString::from_string(value));
    Ok(true)
}

/// Copies up to `capacity` IDs and returns how many exist.
///
/// # Safety
/// `out` must be null or writable for `capacity` entries.
unsafe fn put_ids<I: Into<i32>>(ids: Vec<I>, out: *mut i32, capacity: usize) -> Boundary<i32> {
    let total = ids.len();
    if !out.is_null() {
        for (index, id) in ids.into_iter().take(capacity).enumerate() {
            out.add(index).write(id.into());
        }
    }
    i32::try_from(total).map_err(|_| invalid("too many ids"))
}

/// # Safety
/// `kinds` must be null or readable for `count` entries.
unsafe fn read_kinds(kinds: *const u32, count: usize) -> Boundary<Vec<ValueKind>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if kinds.is_null() {
        return Err(invalid("argument kinds are null"));
    }
    std::slice::from_raw_parts(kinds, count)
        .iter()
        .map(|raw| {
            ValueKind::from_raw(*raw)
                .ok_or_else(|| invalid(format!("unknown value kind {raw}")))
        })
        .collect()
}

/// Reads the arguments of a resolved member from their wire locations.
///
/// # Safety
/// `args` must hold `count` pointers to values of the member's parameter types.
unsafe fn read_args(
    bridge: &Bridge,
    method: MethodId,
    args: *const *const c_void,
    count: usize,
) -> Boundary<Vec<NativeValue>> {
    let params = bridge.method_parameter_types(method)?;
    if params.len() != count {
        return Err(invalid(format!(
            "expected {} arguments, got {count}",
            params.len()
        )));
    }
    if count > 0 && args.is_null() {
        return Err(invalid("argument pointers are null"));
    }
    params
        .iter()
        .enumerate()
        .map(|(index, ty)| bridge.read_wire(*ty, *args.add(index) as *const u8).map_err(Failure::from))
        .collect()
}

/// Writes a result to caller storage. A discarded object result releases
/// the handle minted for it.
///
/// # Safety
/// `out` must be null or writable for `len` bytes.
unsafe fn write_out(
    bridge: &Bridge,
    ty: TypeId,
    value: &NativeValue,
    out: *mut c_void,
    len: usize,
) -> Boundary<bool> {
    if out.is_null() {
        if let NativeValue::Handle(handle) = value {
            bridge.destroy_object(*handle)?;
        }
        return Ok(true);
    }
    if let Err(err) = bridge.write_wire(ty, value, out as *mut u8, len) {
        if let NativeValue::Handle(handle) = value {
            let _ = bridge.destroy_object(*handle);
        }
        return Err(err.into());
    }
    Ok(true)
}

fn arg_count(count: i32) -> Boundary<usize> {
    usize::try_from(count).map_err(|_| invalid("negative argument count"))
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Starts the bridge. `settings_json` may be null for defaults. Fails if a
/// bridge is already running.
#[no_mangle]
pub unsafe extern "C" fn tether_initialize(settings_json: *const c_char) -> bool {
    let started = catch_unwind(AssertUnwindSafe(|| {
        let settings = if settings_json.is_null() {
            BridgeSettings::default()
        } else {
            let json = text(settings_json, "settings").map_err(|failure| failure.error.to_string())?;
            BridgeSettings::from_json_str(json).map_err(|err| err.to_string())?
        };
        let mut slot = BRIDGE.write();
        if slot.is_some() {
            return Err("bridge is already initialised".to_string());
        }
        *slot = Some(Bridge::new(settings));
        Ok(())
    }));
    match started {
        Ok(Ok(())) => true,
        Ok(Err(reason)) => {
            tracing::error!(%reason, "bridge initialisation failed");
            false
        }
        Err(payload) => {
            tracing::error!(reason = %panic_message(payload.as_ref()), "panic during initialisation");
            false
        }
    }
}

/// Unloads every domain and drops the bridge.
#[no_mangle]
pub extern "C" fn tether_shutdown() {
    let _ = catch_unwind(|| {
        let Some(bridge) = BRIDGE.write().take() else {
            return;
        };
        for domain in bridge.domains() {
            let _ = bridge.unload_domain(domain);
        }
        tracing::info!("bridge shut down");
    });
}

#[no_mangle]
pub extern "C" fn tether_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

#[no_mangle]
pub unsafe extern "C" fn tether_free_string(value: NativeString) {
    let _ = catch_unwind(|| value.free());
}

/// Frees an array buffer. Strings or arrays held by its elements are freed
/// first by the caller.
#[no_mangle]
pub unsafe extern "C" fn tether_free_array(value: NativeArray) {
    let _ = catch_unwind(|| value.free());
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Installs (or with a null callback removes) the message sink and sets the
/// level mask (Info=1, Warning=2, Error=4).
#[no_mangle]
pub extern "C" fn tether_set_message_callback(
    callback: Option<TetherMessageCallback>,
    filter: u32,
    user_data: *mut c_void,
) -> bool {
    let user = UserData(user_data);
    guard(false, |bridge| {
        let diagnostics = bridge.diagnostics();
        diagnostics.set_filter(MessageFilter(filter));
        diagnostics.set_message_callback(callback.map(|callback| {
            Arc::new(move |message: &str, level: MessageLevel| {
                let message = c_text(message);
                // SAFETY: the host registered this callback for these arguments.
                unsafe { callback(message.as_ptr(), level as u32, user.get()) }
            }) as tether_core::MessageCallback
        }));
        Ok(true)
    })
}

#[no_mangle]
pub extern "C" fn tether_set_exception_callback(
    callback: Option<TetherExceptionCallback>,
    user_data: *mut c_void,
) -> bool {
    let user = UserData(user_data);
    guard(false, |bridge| {
        bridge
            .diagnostics()
            .set_exception_callback(callback.map(|callback| {
                Arc::new(move |message: &str| {
                    let message = c_text(message);
                    // SAFETY: the host registered this callback for these arguments.
                    unsafe { callback(message.as_ptr(), user.get()) }
                }) as tether_core::ExceptionCallback
            }));
        Ok(true)
    })
}

// ============================================================================
// Domains and modules
// ============================================================================

/// Creates a domain. `search_paths` holds `count` directory strings.
#[no_mangle]
pub unsafe extern "C" fn tether_domain_create(
    name: *const c_char,
    search_paths: *const *const c_char,
    count: i32,
) -> u32 {
    guard(0, |bridge| {
        let name = text(name, "domain name")?;
        let count = arg_count(count)?;
        let mut paths = Vec::with_capacity(count);
        for index in 0..count {
            if search_paths.is_null() {
                return Err(invalid("search paths are null"));
            }
            paths.push(PathBuf::from(text(*search_paths.add(index), "search path")?));
        }
        Ok(bridge.create_domain(name, &paths)?.0)
    })
}

#[no_mangle]
pub extern "C" fn tether_domain_unload(domain: u32) -> bool {
    guard(false, |bridge| {
        bridge.unload_domain(DomainId(domain))?;
        Ok(true)
    })
}

/// `DomainState` as an integer; unknown domains report gone.
#[no_mangle]
pub extern "C" fn tether_domain_state(domain: u32) -> i32 {
    guard(DomainState::Gone as i32, |bridge| {
        Ok(bridge.domain_state(DomainId(domain)) as i32)
    })
}

/// # Safety
/// `status` must be null or writable.
unsafe fn load_with_status(
    status: *mut i32,
    load: impl FnOnce(&Bridge) -> Boundary<ModuleId>,
) -> u32 {
    let mut outcome = ModuleLoadStatus::UnknownError;
    let id = guard(0, |bridge| {
        let loaded = load(bridge);
        outcome = match &loaded {
            Ok(_) => ModuleLoadStatus::Success,
            Err(failure) => failure.error.load_status(),
        };
        loaded.map(|id| id.0)
    });
    if !status.is_null() {
        status.write(outcome as i32);
    }
    id
}

/// Loads a module file. `status` receives a `ModuleLoadStatus`.
#[no_mangle]
pub unsafe extern "C" fn tether_module_load(domain: u32, path: *const c_char, status: *mut i32) -> u32 {
    load_with_status(status, |bridge| {
        let path = text(path, "module path")?;
        Ok(bridge.load_module(DomainId(domain), path)?)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_module_load_from_memory(
    domain: u32,
    data: *const u8,
    len: usize,
    status: *mut i32,
) -> u32 {
    load_with_status(status, |bridge| {
        if data.is_null() {
            return Err(invalid("module bytes are null"));
        }
        let bytes = std::slice::from_raw_parts(data, len);
        Ok(bridge.load_module_from_memory(DomainId(domain), bytes)?)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_module_get_name(domain: u32, module: u32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.module_name(DomainId(domain), ModuleId(module))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_module_get_types(
    domain: u32,
    module: u32,
    out: *mut i32,
    capacity: usize,
) -> i32 {
    guard(-1, |bridge| {
        put_ids(bridge.module_types(DomainId(domain), ModuleId(module))?, out, capacity)
    })
}

// ============================================================================
// Types
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_id(domain: u32, name: *const c_char) -> i32 {
    guard(0, |bridge| Ok(bridge.type_id(DomainId(domain), text(name, "type name")?)?.0))
}

/// Domain-indifferent lookup; disabled unless the settings allow it.
#[no_mangle]
#[allow(deprecated)]
pub unsafe extern "C" fn tether_type_get_id_global(name: *const c_char) -> i32 {
    guard(0, |bridge| Ok(bridge.type_id_global(text(name, "type name")?)?.0))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_full_name(ty: i32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.full_name(TypeId(ty))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_assembly_qualified_name(ty: i32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.assembly_qualified_name(TypeId(ty))?))
}

/// Base type ID, 0 for none.
#[no_mangle]
pub extern "C" fn tether_type_get_base_type(ty: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.base_type(TypeId(ty))?.map_or(0, |base| base.0)))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_interfaces(ty: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.interfaces(TypeId(ty))?, out, capacity))
}

/// Declared size in bytes, -1 on failure.
#[no_mangle]
pub extern "C" fn tether_type_get_size(ty: i32) -> i64 {
    guard(-1, |bridge| Ok(bridge.size(TypeId(ty))? as i64))
}

/// Bytes the caller provides for a value of the type.
#[no_mangle]
pub extern "C" fn tether_type_get_wire_size(ty: i32) -> i64 {
    guard(-1, |bridge| Ok(bridge.wire_size(TypeId(ty))? as i64))
}

#[no_mangle]
pub extern "C" fn tether_type_get_element_type(ty: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.element_type(TypeId(ty))?.0))
}

#[no_mangle]
pub extern "C" fn tether_type_is_sz_array(ty: i32) -> bool {
    guard(false, |bridge| Ok(bridge.is_sz_array(TypeId(ty))?))
}

/// `ValueKind` of the type, 0 on failure.
#[no_mangle]
pub extern "C" fn tether_type_get_managed_type(ty: i32) -> u32 {
    guard(0, |bridge| Ok(bridge.managed_type(TypeId(ty))? as u32))
}

#[no_mangle]
pub extern "C" fn tether_type_is_assignable_to(ty: i32, target: i32) -> bool {
    guard(false, |bridge| Ok(bridge.is_assignable_to(TypeId(ty), TypeId(target))?))
}

#[no_mangle]
pub extern "C" fn tether_type_is_assignable_from(ty: i32, source: i32) -> bool {
    guard(false, |bridge| Ok(bridge.is_assignable_from(TypeId(ty), TypeId(source))?))
}

#[no_mangle]
pub extern "C" fn tether_type_is_subclass_of(ty: i32, base: i32) -> bool {
    guard(false, |bridge| Ok(bridge.is_subclass_of(TypeId(ty), TypeId(base))?))
}

#[no_mangle]
pub extern "C" fn tether_type_has_attribute(ty: i32, attribute_type: i32) -> bool {
    guard(false, |bridge| Ok(bridge.has_attribute(TypeId(ty), TypeId(attribute_type))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_methods(ty: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.methods(TypeId(ty))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_constructors(ty: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.constructors(TypeId(ty))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_fields(ty: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.fields(TypeId(ty))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_properties(ty: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.properties(TypeId(ty))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_attributes(ty: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.attributes(TypeId(ty))?, out, capacity))
}

/// Resolves a method by name or full signature and argument kinds.
#[no_mangle]
pub unsafe extern "C" fn tether_type_get_method(
    ty: i32,
    name: *const c_char,
    kinds: *const u32,
    count: i32,
    is_static: bool,
) -> i32 {
    guard(0, |bridge| {
        let kinds = read_kinds(kinds, arg_count(count)?)?;
        Ok(bridge.resolve_method(TypeId(ty), text(name, "method name")?, &kinds, is_static)?.0)
    })
}

/// Searches base types too. Also 0 when only the implicit parameterless
/// constructor applies.
#[no_mangle]
pub unsafe extern "C" fn tether_type_get_constructor(ty: i32, kinds: *const u32, count: i32) -> i32 {
    guard(0, |bridge| {
        let kinds = read_kinds(kinds, arg_count(count)?)?;
        Ok(bridge.resolve_constructor(TypeId(ty), &kinds)?.map_or(0, |ctor| ctor.0))
    })
}

// ============================================================================
// Members
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn tether_method_get_name(method: i32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.method_name(MethodId(method))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_method_get_signature(method: i32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.method_signature(MethodId(method))?))
}

#[no_mangle]
pub extern "C" fn tether_method_get_declaring_type(method: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.method_declaring_type(MethodId(method))?.0))
}

#[no_mangle]
pub unsafe extern "C" fn tether_method_get_parameter_types(method: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.method_parameter_types(MethodId(method))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_method_get_parameter_name(
    method: i32,
    index: u32,
    out: *mut NativeString,
) -> bool {
    guard(false, |bridge| {
        let names = bridge.method_parameter_names(MethodId(method))?;
        let name = names
            .into_iter()
            .nth(index as usize)
            .ok_or_else(|| invalid(format!("no parameter {index}")))?;
        put_string(out, name)
    })
}

#[no_mangle]
pub extern "C" fn tether_method_get_return_type(method: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.method_return_type(MethodId(method))?.0))
}

/// `Accessibility` as an integer, -1 on failure.
#[no_mangle]
pub extern "C" fn tether_method_get_accessibility(method: i32) -> i32 {
    guard(-1, |bridge| Ok(bridge.method_accessibility(MethodId(method))? as i32))
}

#[no_mangle]
pub extern "C" fn tether_method_is_static(method: i32) -> bool {
    guard(false, |bridge| Ok(bridge.method_is_static(MethodId(method))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_method_get_attributes(method: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.method_attributes(MethodId(method))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_field_get_name(field: i32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.field_name(FieldId(field))?))
}

#[no_mangle]
pub extern "C" fn tether_field_get_type(field: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.field_type(FieldId(field))?.0))
}

#[no_mangle]
pub extern "C" fn tether_field_get_accessibility(field: i32) -> i32 {
    guard(-1, |bridge| Ok(bridge.field_accessibility(FieldId(field))? as i32))
}

#[no_mangle]
pub extern "C" fn tether_field_is_static(field: i32) -> bool {
    guard(false, |bridge| Ok(bridge.field_is_static(FieldId(field))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_field_get_attributes(field: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.field_attributes(FieldId(field))?, out, capacity))
}

#[no_mangle]
pub unsafe extern "C" fn tether_property_get_name(property: i32, out: *mut NativeString) -> bool {
    guard(false, |bridge| put_string(out, bridge.property_name(PropertyId(property))?))
}

#[no_mangle]
pub extern "C" fn tether_property_get_type(property: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.property_type(PropertyId(property))?.0))
}

#[no_mangle]
pub extern "C" fn tether_property_get_accessibility(property: i32) -> i32 {
    guard(-1, |bridge| Ok(bridge.property_accessibility(PropertyId(property))? as i32))
}

#[no_mangle]
pub extern "C" fn tether_property_can_read(property: i32) -> bool {
    guard(false, |bridge| Ok(bridge.property_can_read(PropertyId(property))?))
}

#[no_mangle]
pub extern "C" fn tether_property_can_write(property: i32) -> bool {
    guard(false, |bridge| Ok(bridge.property_can_write(PropertyId(property))?))
}

#[no_mangle]
pub unsafe extern "C" fn tether_property_get_attributes(property: i32, out: *mut i32, capacity: usize) -> i32 {
    guard(-1, |bridge| put_ids(bridge.property_attributes(PropertyId(property))?, out, capacity))
}

#[no_mangle]
pub extern "C" fn tether_attribute_get_type(attribute: i32) -> i32 {
    guard(0, |bridge| Ok(bridge.attribute_type(AttributeId(attribute))?.0))
}

/// Writes a named attribute field. `ty` receives the type the value was
/// written as.
#[no_mangle]
pub unsafe extern "C" fn tether_attribute_get_field_value(
    attribute: i32,
    field: *const c_char,
    ty: *mut i32,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let (value, value_ty) = bridge.attribute_field(AttributeId(attribute), text(field, "field name")?)?;
        if !ty.is_null() {
            ty.write(value_ty.0);
        }
        write_out(bridge, value_ty, &value, out, len)
    })
}

// ============================================================================
// Objects
// ============================================================================

/// Creates an instance, running the constructor matching `kinds`.
#[no_mangle]
pub unsafe extern "C" fn tether_object_create(
    ty: i32,
    weak: bool,
    kinds: *const u32,
    args: *const *const c_void,
    count: i32,
) -> u64 {
    guard(0, |bridge| {
        let ty = TypeId(ty);
        let count = arg_count(count)?;
        let values = if count == 0 {
            Vec::new()
        } else {
            match bridge.resolve_constructor(ty, &read_kinds(kinds, count)?)? {
                Some(ctor) => read_args(bridge, ctor, args, count)?,
                None => Vec::new(),
            }
        };
        Ok(bridge.create_object(ty, weak, &values)?.to_bits())
    })
}

#[no_mangle]
pub extern "C" fn tether_object_destroy(handle: u64) -> bool {
    guard(false, |bridge| {
        bridge.destroy_object(ObjectHandle::from_bits(handle))?;
        Ok(true)
    })
}

#[no_mangle]
pub extern "C" fn tether_object_copy(handle: u64) -> u64 {
    guard(0, |bridge| Ok(bridge.copy_object(ObjectHandle::from_bits(handle))?.to_bits()))
}

#[no_mangle]
pub extern "C" fn tether_object_get_type_id(handle: u64) -> i32 {
    guard(0, |bridge| Ok(bridge.object_type_id(ObjectHandle::from_bits(handle))?.0))
}

/// # Safety
/// Same contract as the exported invoke functions.
#[allow(clippy::too_many_arguments)]
unsafe fn invoke_by_name(
    bridge: &Bridge,
    ty: TypeId,
    target: Option<ObjectHandle>,
    name: *const c_char,
    kinds: *const u32,
    args: *const *const c_void,
    count: i32,
    out: *mut c_void,
    len: usize,
) -> Boundary<bool> {
    let count = arg_count(count)?;
    let kinds = read_kinds(kinds, count)?;
    let method = bridge.resolve_method(ty, text(name, "method name")?, &kinds, target.is_none())?;
    invoke_resolved(bridge, method, target, args, count, out, len)
}

/// # Safety
/// `args` holds `count` argument pointers; `out` is null or writable for `len` bytes.
unsafe fn invoke_resolved(
    bridge: &Bridge,
    method: MethodId,
    target: Option<ObjectHandle>,
    args: *const *const c_void,
    count: usize,
    out: *mut c_void,
    len: usize,
) -> Boundary<bool> {
    let values = read_args(bridge, method, args, count)?;
    let result = bridge.invoke_method(method, target, &values)?;
    write_out(bridge, bridge.method_return_type(method)?, &result, out, len)
}

/// Invokes an instance method, discarding its result.
#[no_mangle]
pub unsafe extern "C" fn tether_object_invoke(
    handle: u64,
    name: *const c_char,
    kinds: *const u32,
    args: *const *const c_void,
    count: i32,
) -> bool {
    tether_object_invoke_with_result(handle, name, kinds, args, count, std::ptr::null_mut(), 0)
}

/// Invokes an instance method and writes its result to `out`.
#[no_mangle]
pub unsafe extern "C" fn tether_object_invoke_with_result(
    handle: u64,
    name: *const c_char,
    kinds: *const u32,
    args: *const *const c_void,
    count: i32,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let handle = ObjectHandle::from_bits(handle);
        let ty = bridge.object_type_id(handle)?;
        invoke_by_name(bridge, ty, Some(handle), name, kinds, args, count, out, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_object_invoke_static(
    ty: i32,
    name: *const c_char,
    kinds: *const u32,
    args: *const *const c_void,
    count: i32,
) -> bool {
    tether_object_invoke_static_with_result(ty, name, kinds, args, count, std::ptr::null_mut(), 0)
}

#[no_mangle]
pub unsafe extern "C" fn tether_object_invoke_static_with_result(
    ty: i32,
    name: *const c_char,
    kinds: *const u32,
    args: *const *const c_void,
    count: i32,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        invoke_by_name(bridge, TypeId(ty), None, name, kinds, args, count, out, len)
    })
}

/// Invokes a method resolved earlier. `target` is 0 for static methods.
#[no_mangle]
pub unsafe extern "C" fn tether_method_invoke(
    method: i32,
    target: u64,
    args: *const *const c_void,
    count: i32,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let target = ObjectHandle::from_bits(target);
        let target = (!target.is_null()).then_some(target);
        invoke_resolved(bridge, MethodId(method), target, args, arg_count(count)?, out, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_object_get_field(
    handle: u64,
    name: *const c_char,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let handle = ObjectHandle::from_bits(handle);
        let name = text(name, "field name")?;
        let field = bridge.find_field(bridge.object_type_id(handle)?, name, false)?;
        let value = bridge.get_field(handle, name)?;
        write_out(bridge, bridge.field_type(field)?, &value, out, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_object_set_field(handle: u64, name: *const c_char, value: *const c_void) -> bool {
    guard(false, |bridge| {
        let handle = ObjectHandle::from_bits(handle);
        let name = text(name, "field name")?;
        let field = bridge.find_field(bridge.object_type_id(handle)?, name, false)?;
        let value = bridge.read_wire(bridge.field_type(field)?, value as *const u8)?;
        bridge.set_field(handle, name, value)?;
        Ok(true)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_static_field(
    ty: i32,
    name: *const c_char,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let (ty, name) = (TypeId(ty), text(name, "field name")?);
        let field = bridge.find_field(ty, name, true)?;
        let value = bridge.get_static_field(ty, name)?;
        write_out(bridge, bridge.field_type(field)?, &value, out, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_set_static_field(ty: i32, name: *const c_char, value: *const c_void) -> bool {
    guard(false, |bridge| {
        let (ty, name) = (TypeId(ty), text(name, "field name")?);
        let field = bridge.find_field(ty, name, true)?;
        let value = bridge.read_wire(bridge.field_type(field)?, value as *const u8)?;
        bridge.set_static_field(ty, name, value)?;
        Ok(true)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_object_get_property(
    handle: u64,
    name: *const c_char,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let handle = ObjectHandle::from_bits(handle);
        let name = text(name, "property name")?;
        let property = bridge.find_property(bridge.object_type_id(handle)?, name, false)?;
        let value = bridge.get_property(handle, name)?;
        write_out(bridge, bridge.property_type(property)?, &value, out, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_object_set_property(handle: u64, name: *const c_char, value: *const c_void) -> bool {
    guard(false, |bridge| {
        let handle = ObjectHandle::from_bits(handle);
        let name = text(name, "property name")?;
        let property = bridge.find_property(bridge.object_type_id(handle)?, name, false)?;
        let value = bridge.read_wire(bridge.property_type(property)?, value as *const u8)?;
        bridge.set_property(handle, name, value)?;
        Ok(true)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_get_static_property(
    ty: i32,
    name: *const c_char,
    out: *mut c_void,
    len: usize,
) -> bool {
    guard(false, |bridge| {
        let (ty, name) = (TypeId(ty), text(name, "property name")?);
        let property = bridge.find_property(ty, name, true)?;
        let value = bridge.get_static_property(ty, name)?;
        write_out(bridge, bridge.property_type(property)?, &value, out, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn tether_type_set_static_property(ty: i32, name: *const c_char, value: *const c_void) -> bool {
    guard(false, |bridge| {
        let (ty, name) = (TypeId(ty), text(name, "property name")?);
        let property = bridge.find_property(ty, name, true)?;
        let value = bridge.read_wire(bridge.property_type(property)?, value as *const u8)?;
        bridge.set_static_property(ty, name, value)?;
        Ok(true)
    })
}

// ============================================================================
// Runtime
// ============================================================================

/// `mode` is a `CollectionMode`; `report` may be null.
#[no_mangle]
pub unsafe extern "C" fn tether_collect_garbage(
    generation: i32,
    mode: i32,
    blocking: bool,
    compacting: bool,
    report: *mut TetherCollection,
) -> bool {
    guard(false, |bridge| {
        let mode = CollectionMode::from_raw(mode)
            .ok_or_else(|| invalid(format!("unknown collection mode {mode}")))?;
        let outcome = bridge.collect_garbage(generation, mode, blocking, compacting);
        if !report.is_null() {
            report.write(TetherCollection {
                collected: outcome.collected as u64,
                promoted: outcome.promoted as u64,
                queued_finalizers: outcome.queued_finalizers as u64,
            });
        }
        Ok(true)
    })
}

/// Runs queued finalizers; returns how many completed.
#[no_mangle]
pub extern "C" fn tether_wait_for_pending_finalizers() -> i32 {
    guard(-1, |bridge| Ok(bridge.wait_for_pending_finalizers() as i32))
}

/// Binds native thunks into a domain's internal-call slots. Returns how
/// many were bound; unknown slots are skipped with a warning.
#[no_mangle]
pub unsafe extern "C" fn tether_register_internal_calls(
    domain: u32,
    entries: *const TetherInternalCall,
    count: usize,
) -> i32 {
    guard(-1, |bridge| {
        if count > 0 && entries.is_null() {
            return Err(invalid("internal call entries are null"));
        }
        let mut table = Vec::with_capacity(count);
        for entry in (0..count).map(|index| &*entries.add(index)) {
            let name = text(entry.name, "internal call name")?;
            let thunk = entry.thunk.ok_or_else(|| {
                invalid(format!("internal call '{name}' has no function"))
            })?;
            table.push(InternalCallEntry::native(name, thunk));
        }
        Ok(bridge.register_internal_calls(DomainId(domain), table)? as i32)
    })
}
