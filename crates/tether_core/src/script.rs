//! Script runtime management
//!
//! Each domain owns one QuickJS runtime. Member bodies are compiled into
//! `__tether_fns` when their module is activated and invoked through a
//! small JS trampoline that turns exceptions into a `{ ok, value, error }`
//! reply, so the Rust side never has to unwind a script exception.
//!
//! Object references cross into script as `{ __ref: n }` where `n` indexes a
//! table that lives for the duration of one top-level call.

use crate::catalog::{FieldDescriptor, InternalCallSlot, TypeCategory, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult};
use crate::module::loader::ScriptBody;
use crate::object::ObjectRef;
use crate::value::{ManagedValue, StructValue, ValueKind};
use parking_lot::Mutex;
use rquickjs::{Array, BigInt, Coerced, Context, Ctx, Function, IntoJs, Object, Runtime, Value};
use std::sync::Arc;

const PRELUDE: &str = r#"
globalThis.__tether_fns = Object.create(null);
globalThis.__tether_define = function (key, params, body) {
    try {
        globalThis.__tether_fns[key] = new Function(...params, body);
        return null;
    } catch (e) {
        return String(e);
    }
};
globalThis.__tether_call = function (key, self, args) {
    try {
        return { ok: true, value: globalThis.__tether_fns[key].apply(self, args) };
    } catch (e) {
        const stack = (e && e.stack) ? "\n" + e.stack : "";
        return { ok: false, error: String(e) + stack };
    }
};
globalThis.__icall = function (name, ...args) {
    const reply = globalThis.__tether_icall_raw(name, args);
    if (!reply.ok) {
        throw new Error(reply.error);
    }
    return reply.value;
};
"#;

/// What the engine needs from the bridge while converting values.
pub(crate) trait ScriptHost: Send + Sync {
    fn resolve_type(&self, name: &str) -> BridgeResult<Arc<TypeDescriptor>>;
    fn zero_value(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<ManagedValue>;
    fn instance_fields(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<Vec<Arc<FieldDescriptor>>>;
    fn internal_call_slot(&self, name: &str) -> BridgeResult<InternalCallSlot>;
    fn call_internal(&self, name: &str, args: Vec<ManagedValue>) -> BridgeResult<ManagedValue>;
}

type RefTable = Arc<Mutex<Vec<ObjectRef>>>;

/// A named value exposed as `this.<name>` during a call and read back after.
#[derive(Debug, Clone)]
pub(crate) struct ReceiverSlot {
    pub name: String,
    pub ty: Arc<TypeDescriptor>,
    pub value: ManagedValue,
}

/// Script execution context
pub struct ScriptRuntime {
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
    context: Context,
    host: Arc<dyn ScriptHost>,
    refs: RefTable,
}

fn engine(err: rquickjs::Error) -> BridgeError {
    BridgeError::RuntimeException(format!("script engine: {err}"))
}

impl ScriptRuntime {
    pub(crate) fn new(host: Arc<dyn ScriptHost>, memory_limit: Option<usize>) -> rquickjs::Result<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = memory_limit {
            runtime.set_memory_limit(limit);
        }
        let context = Context::full(&runtime)?;
        let refs: RefTable = Arc::new(Mutex::new(Vec::new()));

        context.with(|ctx| {
            ctx.eval::<(), _>(PRELUDE)?;
            install_internal_calls(&ctx, Arc::clone(&host), Arc::clone(&refs))
        })?;

        Ok(Self {
            runtime,
            context,
            host,
            refs,
        })
    }

    /// Compiles one body. The error is the script's own syntax message.
    pub(crate) fn compile(&self, body: &ScriptBody) -> Result<(), String> {
        self.context.with(|ctx| {
            let define: Function = ctx
                .globals()
                .get("__tether_define")
                .map_err(|e| e.to_string())?;
            let failure: Option<String> = define
                .call((body.key.as_str(), body.params.clone(), body.source.as_str()))
                .map_err(|e| e.to_string())?;
            match failure {
                Some(message) => Err(message),
                None => Ok(()),
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn is_compiled(&self, key: &str) -> bool {
        self.context.with(|ctx| {
            ctx.globals()
                .get::<_, Object>("__tether_fns")
                .and_then(|fns| fns.contains_key(key))
                .unwrap_or(false)
        })
    }

    /// Runs a compiled body with `receiver` as `this`. Receiver slots are
    /// updated with whatever the script left in them.
    pub(crate) fn call(
        &self,
        key: &str,
        receiver: &mut [ReceiverSlot],
        args: &[ManagedValue],
        returns: &Arc<TypeDescriptor>,
    ) -> BridgeResult<ManagedValue> {
        let outcome = self
            .context
            .with(|ctx| self.call_in(&ctx, key, receiver, args, returns));
        self.refs.lock().clear();
        outcome
    }

    fn call_in<'js>(
        &self,
        ctx: &Ctx<'js>,
        key: &str,
        receiver: &mut [ReceiverSlot],
        args: &[ManagedValue],
        returns: &Arc<TypeDescriptor>,
    ) -> BridgeResult<ManagedValue> {
        let this = Object::new(ctx.clone()).map_err(engine)?;
        for slot in receiver.iter() {
            let value = to_js(ctx, &slot.value, &self.refs).map_err(engine)?;
            this.set(slot.name.as_str(), value).map_err(engine)?;
        }
        let list = Array::new(ctx.clone()).map_err(engine)?;
        for (index, arg) in args.iter().enumerate() {
            list.set(index, to_js(ctx, arg, &self.refs).map_err(engine)?)
                .map_err(engine)?;
        }

        let trampoline: Function = ctx.globals().get("__tether_call").map_err(engine)?;
        let reply: Object = trampoline
            .call((key, this.clone(), list))
            .map_err(engine)?;
        if !reply.get::<_, bool>("ok").map_err(engine)? {
            let error: String = reply.get("error").map_err(engine)?;
            return Err(BridgeError::RuntimeException(error));
        }

        let host = self.host.as_ref();
        for slot in receiver.iter_mut() {
            let value: Value = this.get(slot.name.as_str()).map_err(engine)?;
            slot.value = from_js(&value, &slot.ty, host, &self.refs)?;
        }
        let value: Value = reply.get("value").map_err(engine)?;
        from_js(&value, returns, host, &self.refs)
    }
}

fn install_internal_calls<'js>(
    ctx: &Ctx<'js>,
    host: Arc<dyn ScriptHost>,
    refs: RefTable,
) -> rquickjs::Result<()> {
    let raw = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, name: String, args: Array<'js>| -> rquickjs::Result<Object<'js>> {
            let reply = Object::new(ctx.clone())?;
            match dispatch_internal_call(&ctx, host.as_ref(), &refs, &name, &args) {
                Ok(value) => {
                    reply.set("ok", true)?;
                    reply.set("value", value)?;
                }
                Err(err) => {
                    reply.set("ok", false)?;
                    reply.set("error", err.to_string())?;
                }
            }
            Ok(reply)
        },
    )?;
    ctx.globals().set("__tether_icall_raw", raw)
}

fn dispatch_internal_call<'js>(
    ctx: &Ctx<'js>,
    host: &dyn ScriptHost,
    refs: &RefTable,
    name: &str,
    args: &Array<'js>,
) -> BridgeResult<Value<'js>> {
    let slot = host.internal_call_slot(name)?;
    if args.len() != slot.params.len() {
        return Err(BridgeError::InvalidArgument(format!(
            "internal call '{name}' takes {} arguments, got {}",
            slot.params.len(),
            args.len()
        )));
    }
    let mut managed = Vec::with_capacity(args.len());
    for (index, param) in slot.params.iter().enumerate() {
        let ty = host.resolve_type(param)?;
        let value: Value = args.get(index).map_err(engine)?;
        managed.push(from_js(&value, &ty, host, refs)?);
    }
    let result = host.call_internal(name, managed)?;
    to_js(ctx, &result, refs).map_err(engine)
}

fn to_js<'js>(ctx: &Ctx<'js>, value: &ManagedValue, refs: &RefTable) -> rquickjs::Result<Value<'js>> {
    let ctx = ctx.clone();
    Ok(match value {
        ManagedValue::Null => Value::new_null(ctx),
        ManagedValue::SByte(v) => Value::new_int(ctx, i32::from(*v)),
        ManagedValue::Byte(v) => Value::new_int(ctx, i32::from(*v)),
        ManagedValue::Short(v) => Value::new_int(ctx, i32::from(*v)),
        ManagedValue::UShort(v) => Value::new_int(ctx, i32::from(*v)),
        ManagedValue::Int(v) => Value::new_int(ctx, *v),
        ManagedValue::UInt(v) => Value::new_float(ctx, f64::from(*v)),
        // 64-bit integers and pointers travel as BigInt to keep every bit.
        ManagedValue::Long(v) => BigInt::from_i64(ctx, *v)?.into_value(),
        ManagedValue::ULong(v) => BigInt::from_u64(ctx, *v)?.into_value(),
        ManagedValue::Float(v) => Value::new_float(ctx, f64::from(*v)),
        ManagedValue::Double(v) => Value::new_float(ctx, *v),
        ManagedValue::Bool(v) => Value::new_bool(ctx, *v),
        ManagedValue::Pointer(v) => BigInt::from_u64(ctx, *v as u64)?.into_value(),
        ManagedValue::String(s) => s.as_str().into_js(&ctx)?,
        ManagedValue::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, to_js(&ctx, item, refs)?)?;
            }
            array.into_js(&ctx)?
        }
        ManagedValue::Struct(value) => {
            let object = Object::new(ctx.clone())?;
            for (name, field) in &value.fields {
                object.set(name.as_str(), to_js(&ctx, field, refs)?)?;
            }
            object.into_js(&ctx)?
        }
        ManagedValue::Object(target) => {
            let index = {
                let mut table = refs.lock();
                table.push(target.clone());
                table.len() - 1
            };
            let object = Object::new(ctx.clone())?;
            object.set("__ref", index as i32)?;
            object.into_js(&ctx)?
        }
    })
}

/// Largest integer a double holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Exact integer read of a BigInt, or of a number that is integral and
/// within the exactly representable range. Out-of-range values are `None`.
fn wide_integer<T>(value: &Value<'_>) -> Option<T>
where
    T: std::str::FromStr + TryFrom<i64>,
{
    if value.as_big_int().is_some() {
        let text = value.get::<Coerced<String>>().ok()?;
        return text.0.parse().ok();
    }
    let n = value.as_number()?;
    if n.fract() != 0.0 || n.abs() > MAX_SAFE_INTEGER {
        return None;
    }
    T::try_from(n as i64).ok()
}

fn from_js<'js>(
    value: &Value<'js>,
    ty: &Arc<TypeDescriptor>,
    host: &dyn ScriptHost,
    refs: &RefTable,
) -> BridgeResult<ManagedValue> {
    let mismatch = || {
        BridgeError::MarshalFailure(format!(
            "script produced {:?} where '{}' was expected",
            value.type_of(),
            ty.full_name()
        ))
    };
    if ty.category == TypeCategory::Void {
        return Ok(ManagedValue::Null);
    }
    if value.is_null() || value.is_undefined() {
        return if ty.category.is_reference() {
            Ok(ManagedValue::Null)
        } else {
            host.zero_value(ty)
        };
    }

    match &ty.category {
        TypeCategory::Void => Ok(ManagedValue::Null),
        TypeCategory::Primitive(ValueKind::Bool) => match value.as_bool() {
            Some(b) => Ok(ManagedValue::Bool(b)),
            None => value
                .as_number()
                .map(|n| ManagedValue::Bool(n != 0.0))
                .ok_or_else(mismatch),
        },
        TypeCategory::Primitive(ValueKind::Float) => value
            .as_number()
            .map(|n| ManagedValue::Float(n as f32))
            .ok_or_else(mismatch),
        TypeCategory::Primitive(ValueKind::Double) => value
            .as_number()
            .map(ManagedValue::Double)
            .ok_or_else(mismatch),
        TypeCategory::Primitive(ValueKind::Pointer) | TypeCategory::Pointer { .. } => wide_integer(value)
            .map(ManagedValue::Pointer)
            .ok_or_else(mismatch),
        TypeCategory::Primitive(ValueKind::Long) => wide_integer(value)
            .map(ManagedValue::Long)
            .ok_or_else(mismatch),
        TypeCategory::Primitive(ValueKind::ULong) => wide_integer(value)
            .map(ManagedValue::ULong)
            .ok_or_else(mismatch),
        TypeCategory::Primitive(kind) | TypeCategory::Enum(kind) => {
            let n = match value.as_number() {
                Some(n) => n as i64,
                None => wide_integer(value).ok_or_else(mismatch)?,
            };
            ManagedValue::integer(*kind, n).ok_or_else(mismatch)
        }
        TypeCategory::String => {
            let text = value.as_string().ok_or_else(mismatch)?;
            Ok(ManagedValue::String(text.to_string().map_err(engine)?))
        }
        TypeCategory::Array { element } => {
            let array = value.as_array().ok_or_else(mismatch)?;
            let element = host.resolve_type(element)?;
            let mut items = Vec::with_capacity(array.len());
            for index in 0..array.len() {
                let item: Value = array.get(index).map_err(engine)?;
                items.push(from_js(&item, &element, host, refs)?);
            }
            Ok(ManagedValue::Array(items))
        }
        TypeCategory::Struct => {
            let object = value.as_object().ok_or_else(mismatch)?;
            let mut fields = Vec::new();
            for field in host.instance_fields(ty)? {
                let field_ty = host.resolve_type(&field.type_name)?;
                let raw: Value = object.get(field.name.as_str()).map_err(engine)?;
                fields.push((field.name.clone(), from_js(&raw, &field_ty, host, refs)?));
            }
            Ok(ManagedValue::Struct(StructValue {
                type_name: ty.qualified_name(),
                fields,
            }))
        }
        TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface => {
            let object = value.as_object().ok_or_else(mismatch)?;
            let index: Option<i32> = object.get("__ref").map_err(engine)?;
            let target = index
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| refs.lock().get(i).cloned())
                .ok_or_else(mismatch)?;
            Ok(ManagedValue::Object(target))
        }
    }
}
