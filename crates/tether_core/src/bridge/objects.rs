//! Object lifecycle, invocation and field/property access.

use super::{enter, Bridge, BridgeInner};
use crate::catalog::{
    Accessor, FieldDescriptor, MemberClass, MethodBody, MethodDescriptor, PropertyDescriptor,
    TypeDescriptor,
};
use crate::catalog::core_types::split_qualified;
use crate::domain::Domain;
use crate::error::{BridgeError, BridgeResult};
use crate::ids::{MethodId, TypeId};
use crate::object::{FieldSlot, HandleKind, ManagedObject, ObjectHandle, ObjectRef};
use crate::script::ReceiverSlot;
use crate::value::{ManagedValue, NativeValue, ValueKind};
use std::sync::Arc;

/// What a member body runs against.
#[derive(Clone, Copy)]
pub(crate) enum Target<'a> {
    Instance(&'a ObjectRef),
    Static(&'a Arc<TypeDescriptor>),
}

fn kinds_of(args: &[NativeValue]) -> Vec<ValueKind> {
    args.iter().map(NativeValue::kind).collect()
}

fn describe(name: &str, kinds: &[ValueKind]) -> String {
    let kinds: Vec<String> = kinds.iter().map(|k| format!("{k:?}")).collect();
    format!("{name}({})", kinds.join(", "))
}

impl BridgeInner {
    /// Runs a resolved member. `args` are already managed values matching
    /// the member's parameters.
    pub(crate) fn execute(
        &self,
        scope: Option<&Domain>,
        method: &Arc<MethodDescriptor>,
        target: Target<'_>,
        args: Vec<ManagedValue>,
    ) -> BridgeResult<ManagedValue> {
        let returns = self.catalog.resolve(scope, &method.return_type)?;
        match &method.body {
            MethodBody::Empty => {
                tracing::debug!(signature = %method.signature, "member has no body");
                self.marshaller(scope).zero_value(&returns)
            }
            MethodBody::InternalCall(slot) => {
                let domain = scope.ok_or_else(|| BridgeError::not_found("internal call", slot.as_str()))?;
                let (bare, _) = split_qualified(&method.declaring_type);
                let mut args = args;
                if let Target::Instance(object) = target {
                    args.insert(0, ManagedValue::Object(object.clone()));
                }
                self.call_internal(domain, &format!("{bare}+{slot}"), args)
            }
            MethodBody::Script(key) => {
                let domain = scope.ok_or_else(|| BridgeError::not_found("script", key.as_str()))?;
                self.run_script(domain, key, target, &args, &returns)
            }
        }
    }

    /// Exposes the target's fields as `this`, runs the body and stores
    /// whatever the script left in them.
    fn run_script(
        &self,
        domain: &Domain,
        key: &str,
        target: Target<'_>,
        args: &[ManagedValue],
        returns: &Arc<TypeDescriptor>,
    ) -> BridgeResult<ManagedValue> {
        let scope = Some(domain);
        let fields: Vec<Arc<FieldDescriptor>> = match target {
            Target::Instance(object) => self.catalog.instance_fields(scope, object.type_descriptor())?,
            Target::Static(ty) => ty.fields.iter().filter(|f| f.is_static).cloned().collect(),
        };
        // The receiver is read and written back under the script lock.
        domain.with_script(|script| {
            let mut slots = Vec::with_capacity(fields.len());
            for field in &fields {
                let value = match target {
                    Target::Instance(object) => object.read_field(field).unwrap_or(ManagedValue::Null),
                    Target::Static(_) => self.static_value(domain, field)?,
                };
                slots.push(ReceiverSlot {
                    name: field.name.clone(),
                    ty: self.catalog.resolve(scope, &field.type_name)?,
                    value,
                });
            }

            let result = script.call(key, &mut slots, args, returns)?;

            for (field, slot) in fields.iter().zip(slots) {
                match target {
                    Target::Instance(object) => {
                        object.write_field(field, slot.value);
                    }
                    Target::Static(_) => domain.set_static_value(field, slot.value),
                }
            }
            Ok(result)
        })
    }

    /// Current value of a static field, initialised on first use.
    pub(crate) fn static_value(&self, domain: &Domain, field: &FieldDescriptor) -> BridgeResult<ManagedValue> {
        if let Some(value) = domain.static_value(field) {
            return Ok(value);
        }
        let value = self.marshaller(Some(domain)).initial_value(field)?;
        domain.set_static_value(field, value.clone());
        Ok(value)
    }

    /// Marshals native arguments against a member's declared parameters.
    fn managed_args(
        &self,
        scope: Option<&Domain>,
        method: &MethodDescriptor,
        args: &[NativeValue],
    ) -> BridgeResult<Vec<ManagedValue>> {
        if args.len() != method.parameters.len() {
            return Err(BridgeError::InvalidArgument(format!(
                "'{}' takes {} arguments, got {}",
                method.signature,
                method.parameters.len(),
                args.len()
            )));
        }
        let marshaller = self.marshaller(scope);
        method
            .parameters
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let ty = self.catalog.resolve(scope, &param.type_name)?;
                marshaller.to_managed(arg.clone(), &ty)
            })
            .collect()
    }

    fn native_result(
        &self,
        scope: Option<&Domain>,
        method: &MethodDescriptor,
        value: &ManagedValue,
    ) -> BridgeResult<NativeValue> {
        let returns = self.catalog.resolve(scope, &method.return_type)?;
        self.marshaller(scope).to_native(value, &returns)
    }

    pub(crate) fn invoke_on(
        &self,
        scope: Option<&Domain>,
        method: &Arc<MethodDescriptor>,
        target: Target<'_>,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        let managed = self.managed_args(scope, method, args)?;
        let result = self.execute(scope, method, target, managed)?;
        self.native_result(scope, method, &result)
    }

    fn find_method(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
        name: &str,
        kinds: &[ValueKind],
        class: MemberClass,
    ) -> BridgeResult<Arc<MethodDescriptor>> {
        self.catalog
            .find_suitable_method(scope, ty, name, kinds, class)?
            .ok_or_else(|| {
                BridgeError::not_found("method", format!("{}.{}", ty.full_name(), describe(name, kinds)))
            })
    }

    fn field_slots(&self, scope: Option<&Domain>, ty: &Arc<TypeDescriptor>) -> BridgeResult<Vec<FieldSlot>> {
        let marshaller = self.marshaller(scope);
        self.catalog
            .instance_fields(scope, ty)?
            .iter()
            .map(|field| {
                Ok(FieldSlot {
                    declaring_type: field.declaring_type.clone(),
                    name: field.name.clone(),
                    value: marshaller.initial_value(field)?,
                })
            })
            .collect()
    }

    /// First constructor up the chain accepting `kinds`. `None` stands for
    /// the implicit parameterless constructor of a type declaring none.
    fn find_constructor(
        &self,
        scope: Option<&Domain>,
        ty: &Arc<TypeDescriptor>,
        kinds: &[ValueKind],
    ) -> BridgeResult<Option<Arc<MethodDescriptor>>> {
        for t in self.catalog.chain(scope, ty)? {
            if t.constructors.is_empty() {
                if kinds.is_empty() {
                    return Ok(None);
                }
                continue;
            }
            if let Some(ctor) =
                self.catalog
                    .find_suitable_method(scope, &t, ".ctor", kinds, MemberClass::Constructor)?
            {
                return Ok(Some(ctor));
            }
        }
        Err(BridgeError::not_found(
            "constructor",
            format!("{}.{}", ty.full_name(), describe(".ctor", kinds)),
        ))
    }

    fn field_of(
        &self,
        scope: Option<&Domain>,
        declaring: &str,
        name: &str,
        is_static: bool,
    ) -> BridgeResult<Arc<FieldDescriptor>> {
        let ty = self.catalog.resolve(scope, declaring)?;
        self.catalog.find_field(scope, &ty, name, is_static)
    }

    pub(crate) fn read_property(
        &self,
        scope: Option<&Domain>,
        property: &PropertyDescriptor,
        target: Target<'_>,
    ) -> BridgeResult<NativeValue> {
        let ty = self.catalog.resolve(scope, &property.type_name)?;
        let value = match &property.getter {
            None => {
                return Err(BridgeError::InvalidArgument(format!(
                    "property {}.{} has no getter",
                    property.declaring_type, property.name
                )))
            }
            Some(Accessor::Field(backing)) => {
                let field = self.field_of(scope, &property.declaring_type, backing, property.is_static)?;
                self.read_field(scope, &field, target)?
            }
            Some(Accessor::Script(getter)) => self.execute(scope, getter, target, Vec::new())?,
        };
        self.marshaller(scope).to_native(&value, &ty)
    }

    pub(crate) fn write_property(
        &self,
        scope: Option<&Domain>,
        property: &PropertyDescriptor,
        target: Target<'_>,
        value: NativeValue,
    ) -> BridgeResult<()> {
        let ty = self.catalog.resolve(scope, &property.type_name)?;
        let setter = property.setter.as_ref().ok_or_else(|| {
            BridgeError::InvalidArgument(format!(
                "property {}.{} has no setter",
                property.declaring_type, property.name
            ))
        })?;
        let value = self.marshaller(scope).to_managed(value, &ty)?;
        match setter {
            Accessor::Field(backing) => {
                let field = self.field_of(scope, &property.declaring_type, backing, property.is_static)?;
                self.write_field(scope, &field, target, value)
            }
            Accessor::Script(method) => self.execute(scope, method, target, vec![value]).map(drop),
        }
    }

    fn read_field(
        &self,
        scope: Option<&Domain>,
        field: &FieldDescriptor,
        target: Target<'_>,
    ) -> BridgeResult<ManagedValue> {
        match target {
            Target::Instance(object) => object.read_field(field).ok_or_else(|| {
                BridgeError::not_found("field", format!("{}.{}", field.declaring_type, field.name))
            }),
            Target::Static(_) => {
                let domain = scope.ok_or_else(|| BridgeError::not_found("field", field.name.as_str()))?;
                self.static_value(domain, field)
            }
        }
    }

    fn write_field(
        &self,
        scope: Option<&Domain>,
        field: &FieldDescriptor,
        target: Target<'_>,
        value: ManagedValue,
    ) -> BridgeResult<()> {
        match target {
            Target::Instance(object) => {
                if object.write_field(field, value) {
                    Ok(())
                } else {
                    Err(BridgeError::not_found(
                        "field",
                        format!("{}.{}", field.declaring_type, field.name),
                    ))
                }
            }
            Target::Static(_) => {
                let domain = scope.ok_or_else(|| BridgeError::not_found("field", field.name.as_str()))?;
                domain.set_static_value(field, value);
                Ok(())
            }
        }
    }
}

impl Bridge {
    fn object(&self, handle: ObjectHandle) -> BridgeResult<ObjectRef> {
        if handle.is_null() {
            return Err(BridgeError::InvalidArgument("null object handle".into()));
        }
        self.inner.objects.resolve(handle)
    }

    /// Resolves the constructor `create_object` would run for the given
    /// argument kinds, walking up the base chain. `None` is the implicit
    /// parameterless constructor.
    pub fn resolve_constructor(&self, ty: TypeId, kinds: &[ValueKind]) -> BridgeResult<Option<MethodId>> {
        self.reported(|| {
            let ty = self.type_of(ty)?;
            let domain = self.inner.owner(&ty.origin)?;
            let _call = enter(&domain)?;
            let ctor = self.inner.find_constructor(domain.as_deref(), &ty, kinds)?;
            Ok(ctor.map(|ctor| self.inner.catalog.methods.add(&ctor)))
        })
    }

    /// Overload resolution by name (or full signature) and argument kinds.
    pub fn resolve_method(
        &self,
        ty: TypeId,
        name: &str,
        kinds: &[ValueKind],
        is_static: bool,
    ) -> BridgeResult<MethodId> {
        self.reported(|| {
            let ty = self.type_of(ty)?;
            let domain = self.inner.owner(&ty.origin)?;
            let _call = enter(&domain)?;
            let class = if is_static {
                MemberClass::Static
            } else {
                MemberClass::Instance
            };
            let method = self.inner.find_method(domain.as_deref(), &ty, name, kinds, class)?;
            Ok(self.inner.catalog.methods.add(&method))
        })
    }

    /// Creates an instance and returns a handle to it. A weak instance is
    /// owned by the collector nursery until a collection finds it unused.
    pub fn create_object(&self, ty: TypeId, weak: bool, args: &[NativeValue]) -> BridgeResult<ObjectHandle> {
        self.reported(|| {
            let ty = self.type_of(ty)?;
            if !ty.is_instantiable() {
                return Err(BridgeError::InvalidArgument(format!(
                    "'{}' cannot be instantiated",
                    ty.full_name()
                )));
            }
            let domain = self.inner.owner(&ty.origin)?;
            let _call = enter(&domain)?;
            let scope = domain.as_deref();
            let inner = &self.inner;

            let ctor = inner.find_constructor(scope, &ty, &kinds_of(args))?;
            let object = ObjectRef::new(ManagedObject::new(Arc::clone(&ty), inner.field_slots(scope, &ty)?));
            if let Some(ctor) = &ctor {
                let managed = inner.managed_args(scope, ctor, args)?;
                inner.execute(scope, ctor, Target::Instance(&object), managed)?;
            }

            let kind = if weak { HandleKind::Weak } else { HandleKind::Strong };
            let handle = inner.objects.alloc(&object, kind);
            if weak {
                inner.collector.track(object);
            }
            tracing::debug!(%handle, ty = %ty.full_name(), weak, "object created");
            Ok(handle)
        })
    }

    pub fn destroy_object(&self, handle: ObjectHandle) -> BridgeResult<()> {
        self.reported(|| self.inner.objects.release(handle))
    }

    /// A new strong handle to the same object.
    pub fn copy_object(&self, handle: ObjectHandle) -> BridgeResult<ObjectHandle> {
        self.reported(|| {
            let object = self.object(handle)?;
            Ok(self.inner.objects.alloc(&object, HandleKind::Strong))
        })
    }

    pub fn handle_kind(&self, handle: ObjectHandle) -> Option<HandleKind> {
        self.inner.objects.kind(handle)
    }

    pub fn object_type_id(&self, handle: ObjectHandle) -> BridgeResult<TypeId> {
        self.reported(|| {
            let object = self.object(handle)?;
            Ok(self.inner.catalog.types.add(object.type_descriptor()))
        })
    }

    /// Whether two handles refer to the same object.
    pub fn same_object(&self, a: ObjectHandle, b: ObjectHandle) -> BridgeResult<bool> {
        self.reported(|| Ok(self.object(a)? == self.object(b)?))
    }

    fn invoke_instance(&self, handle: ObjectHandle, name: &str, args: &[NativeValue]) -> BridgeResult<NativeValue> {
        let object = self.object(handle)?;
        let ty = Arc::clone(object.type_descriptor());
        let domain = self.inner.owner(&ty.origin)?;
        let _call = enter(&domain)?;
        let scope = domain.as_deref();
        let method = self
            .inner
            .find_method(scope, &ty, name, &kinds_of(args), MemberClass::Instance)?;
        self.inner.invoke_on(scope, &method, Target::Instance(&object), args)
    }

    fn invoke_type(&self, ty: TypeId, name: &str, args: &[NativeValue]) -> BridgeResult<NativeValue> {
        let ty = self.type_of(ty)?;
        let domain = self.inner.owner(&ty.origin)?;
        let _call = enter(&domain)?;
        let scope = domain.as_deref();
        let method = self
            .inner
            .find_method(scope, &ty, name, &kinds_of(args), MemberClass::Static)?;
        self.inner.invoke_on(scope, &method, Target::Static(&ty), args)
    }

    pub fn invoke(&self, handle: ObjectHandle, name: &str, args: &[NativeValue]) -> BridgeResult<()> {
        self.reported(|| self.invoke_instance(handle, name, args).map(drop))
    }

    pub fn invoke_with_result(
        &self,
        handle: ObjectHandle,
        name: &str,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        self.reported(|| self.invoke_instance(handle, name, args))
    }

    pub fn invoke_static(&self, ty: TypeId, name: &str, args: &[NativeValue]) -> BridgeResult<()> {
        self.reported(|| self.invoke_type(ty, name, args).map(drop))
    }

    pub fn invoke_static_with_result(
        &self,
        ty: TypeId,
        name: &str,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        self.reported(|| self.invoke_type(ty, name, args))
    }

    /// Invokes an already resolved method. Instance methods need a target.
    pub fn invoke_method(
        &self,
        method: MethodId,
        target: Option<ObjectHandle>,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        self.reported(|| {
            let method = self.inner.catalog.methods.get(method, "method")?;
            if method.is_constructor {
                return Err(BridgeError::InvalidArgument(
                    "constructors run through create_object".into(),
                ));
            }
            let domain = self.inner.owner(&method.origin)?;
            let _call = enter(&domain)?;
            let scope = domain.as_deref();
            let declaring = self.inner.catalog.resolve(scope, &method.declaring_type)?;
            match (method.is_static, target) {
                (true, _) => self.inner.invoke_on(scope, &method, Target::Static(&declaring), args),
                (false, Some(handle)) => {
                    let object = self.object(handle)?;
                    if !self
                        .inner
                        .catalog
                        .is_assignable(scope, object.type_descriptor(), &declaring)?
                    {
                        return Err(BridgeError::InvalidArgument(format!(
                            "'{}' is not a '{}'",
                            object.type_descriptor().full_name(),
                            declaring.full_name()
                        )));
                    }
                    self.inner.invoke_on(scope, &method, Target::Instance(&object), args)
                }
                (false, None) => Err(BridgeError::InvalidArgument(format!(
                    "'{}' needs a target object",
                    method.signature
                ))),
            }
        })
    }

    fn instance_scope<T>(
        &self,
        handle: ObjectHandle,
        f: impl FnOnce(Option<&Domain>, &ObjectRef) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        self.reported(|| {
            let object = self.object(handle)?;
            let domain = self.inner.owner(&object.type_descriptor().origin)?;
            let _call = enter(&domain)?;
            f(domain.as_deref(), &object)
        })
    }

    fn type_scope<T>(
        &self,
        ty: TypeId,
        f: impl FnOnce(Option<&Domain>, &Arc<TypeDescriptor>) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        self.reported(|| {
            let ty = self.type_of(ty)?;
            let domain = self.inner.owner(&ty.origin)?;
            let _call = enter(&domain)?;
            f(domain.as_deref(), &ty)
        })
    }

    pub fn get_field(&self, handle: ObjectHandle, name: &str) -> BridgeResult<NativeValue> {
        self.instance_scope(handle, |scope, object| {
            let inner = &self.inner;
            let field = inner.catalog.find_field(scope, object.type_descriptor(), name, false)?;
            let value = inner.read_field(scope, &field, Target::Instance(object))?;
            let ty = inner.catalog.resolve(scope, &field.type_name)?;
            inner.marshaller(scope).to_native(&value, &ty)
        })
    }

    pub fn set_field(&self, handle: ObjectHandle, name: &str, value: NativeValue) -> BridgeResult<()> {
        self.instance_scope(handle, |scope, object| {
            let inner = &self.inner;
            let field = inner.catalog.find_field(scope, object.type_descriptor(), name, false)?;
            let ty = inner.catalog.resolve(scope, &field.type_name)?;
            let value = inner.marshaller(scope).to_managed(value, &ty)?;
            inner.write_field(scope, &field, Target::Instance(object), value)
        })
    }

    pub fn get_static_field(&self, ty: TypeId, name: &str) -> BridgeResult<NativeValue> {
        self.type_scope(ty, |scope, ty| {
            let inner = &self.inner;
            let field = inner.catalog.find_field(scope, ty, name, true)?;
            let value = inner.read_field(scope, &field, Target::Static(ty))?;
            let field_ty = inner.catalog.resolve(scope, &field.type_name)?;
            inner.marshaller(scope).to_native(&value, &field_ty)
        })
    }

    pub fn set_static_field(&self, ty: TypeId, name: &str, value: NativeValue) -> BridgeResult<()> {
        self.type_scope(ty, |scope, ty| {
            let inner = &self.inner;
            let field = inner.catalog.find_field(scope, ty, name, true)?;
            let field_ty = inner.catalog.resolve(scope, &field.type_name)?;
            let value = inner.marshaller(scope).to_managed(value, &field_ty)?;
            inner.write_field(scope, &field, Target::Static(ty), value)
        })
    }

    pub fn get_property(&self, handle: ObjectHandle, name: &str) -> BridgeResult<NativeValue> {
        self.instance_scope(handle, |scope, object| {
            let property = self
                .inner
                .catalog
                .find_property(scope, object.type_descriptor(), name, false)?;
            self.inner.read_property(scope, &property, Target::Instance(object))
        })
    }

    pub fn set_property(&self, handle: ObjectHandle, name: &str, value: NativeValue) -> BridgeResult<()> {
        self.instance_scope(handle, |scope, object| {
            let property = self
                .inner
                .catalog
                .find_property(scope, object.type_descriptor(), name, false)?;
            self.inner.write_property(scope, &property, Target::Instance(object), value)
        })
    }

    pub fn get_static_property(&self, ty: TypeId, name: &str) -> BridgeResult<NativeValue> {
        self.type_scope(ty, |scope, ty| {
            let property = self.inner.catalog.find_property(scope, ty, name, true)?;
            self.inner.read_property(scope, &property, Target::Static(ty))
        })
    }

    pub fn set_static_property(&self, ty: TypeId, name: &str, value: NativeValue) -> BridgeResult<()> {
        self.type_scope(ty, |scope, ty| {
            let property = self.inner.catalog.find_property(scope, ty, name, true)?;
            self.inner.write_property(scope, &property, Target::Static(ty), value)
        })
    }
}
