//! Raw wire layer.
//!
//! Buffers handed to the native side (`NativeString`, `NativeArray`) are
//! allocated here and must come back through `free` to be released.
//! Struct values that are plain (no strings or arrays inside) can also be
//! encoded to and decoded from owned byte buffers without touching raw
//! memory.

use super::layout::FieldLayout;
use super::{Marshaller, MAX_DEPTH};
use crate::catalog::{TypeCategory, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult};
use crate::object::ObjectHandle;
use crate::value::{ManagedValue, NativeValue, StructValue, ValueKind};
use bytemuck::Pod;
use std::mem::size_of;
use std::sync::Arc;

/// UTF-8 text crossing the boundary. Bridge-allocated strings are
/// NUL-terminated; `len` excludes the terminator.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct NativeString {
    pub data: *mut u8,
    pub len: usize,
}

/// Contiguous elements in their wire layout; `len` counts elements.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct NativeArray {
    pub data: *mut u8,
    pub len: usize,
}

impl NativeString {
    pub const fn null() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    pub fn from_string(text: String) -> Self {
        let len = text.len();
        let mut bytes = text.into_bytes();
        bytes.push(0);
        let data = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        Self { data, len }
    }

    /// # Safety
    /// `data` must point at `len` readable bytes (or be null).
    pub unsafe fn to_owned_string(&self) -> BridgeResult<Option<String>> {
        if self.data.is_null() {
            return Ok(None);
        }
        let bytes = std::slice::from_raw_parts(self.data, self.len);
        std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|err| BridgeError::MarshalFailure(format!("string is not UTF-8: {err}")))
    }

    /// # Safety
    /// Must have been produced by `from_string` and not freed before.
    pub unsafe fn free(self) {
        if !self.data.is_null() {
            let slice = std::ptr::slice_from_raw_parts_mut(self.data, self.len + 1);
            drop(Box::from_raw(slice));
        }
    }
}

impl NativeArray {
    pub const fn null() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Zeroed, 8-byte aligned storage for `bytes`. The word before `data`
    /// records the allocation size so `free` needs no element type.
    fn allocate(bytes: usize, len: usize) -> Self {
        let words = bytes.div_ceil(8) + 1;
        let mut storage = vec![0u64; words].into_boxed_slice();
        storage[0] = words as u64;
        let base = Box::into_raw(storage) as *mut u64;
        // SAFETY: the allocation holds at least one word.
        let data = unsafe { base.add(1) } as *mut u8;
        Self { data, len }
    }

    /// # Safety
    /// Must have been produced by this module and not freed before.
    pub unsafe fn free(self) {
        if self.data.is_null() {
            return;
        }
        let base = (self.data as *mut u64).sub(1);
        let words = *base as usize;
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(base, words)));
    }
}

fn too_small(ty: &TypeDescriptor, needed: usize, len: usize) -> BridgeError {
    BridgeError::MarshalFailure(format!(
        "destination holds {len} bytes but '{}' needs {needed}",
        ty.full_name()
    ))
}

fn kind_mismatch(value: &NativeValue, ty: &TypeDescriptor) -> BridgeError {
    BridgeError::MarshalFailure(format!(
        "{:?} value cannot be written as '{}'",
        value.kind(),
        ty.full_name()
    ))
}

fn read_pod<T: Pod>(bytes: &[u8], offset: usize) -> T {
    bytemuck::pod_read_unaligned(&bytes[offset..offset + size_of::<T>()])
}

fn write_pod<T: Pod>(bytes: &mut [u8], offset: usize, value: T) {
    bytes[offset..offset + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
}

/// Decodes a fixed-width value from `bytes[offset..]`.
fn decode_scalar(bytes: &[u8], offset: usize, kind: ValueKind) -> Option<NativeValue> {
    Some(match kind {
        ValueKind::SByte => NativeValue::SByte(read_pod(bytes, offset)),
        ValueKind::Byte => NativeValue::Byte(read_pod(bytes, offset)),
        ValueKind::Short => NativeValue::Short(read_pod(bytes, offset)),
        ValueKind::UShort => NativeValue::UShort(read_pod(bytes, offset)),
        ValueKind::Int => NativeValue::Int(read_pod(bytes, offset)),
        ValueKind::UInt => NativeValue::UInt(read_pod(bytes, offset)),
        ValueKind::Long => NativeValue::Long(read_pod(bytes, offset)),
        ValueKind::ULong => NativeValue::ULong(read_pod(bytes, offset)),
        ValueKind::Float => NativeValue::Float(read_pod(bytes, offset)),
        ValueKind::Double => NativeValue::Double(read_pod(bytes, offset)),
        ValueKind::Bool => NativeValue::Bool(bytes[offset] != 0),
        ValueKind::Pointer => NativeValue::Pointer(read_pod(bytes, offset)),
        ValueKind::Unknown | ValueKind::String | ValueKind::Array | ValueKind::Struct => return None,
    })
}

/// Encodes a fixed-width value whose kind equals `kind`.
fn encode_scalar(bytes: &mut [u8], offset: usize, kind: ValueKind, value: &NativeValue) -> bool {
    match (kind, value) {
        (ValueKind::SByte, NativeValue::SByte(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Byte, NativeValue::Byte(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Short, NativeValue::Short(v)) => write_pod(bytes, offset, *v),
        (ValueKind::UShort, NativeValue::UShort(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Int, NativeValue::Int(v)) => write_pod(bytes, offset, *v),
        (ValueKind::UInt, NativeValue::UInt(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Long, NativeValue::Long(v)) => write_pod(bytes, offset, *v),
        (ValueKind::ULong, NativeValue::ULong(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Float, NativeValue::Float(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Double, NativeValue::Double(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Bool, NativeValue::Bool(v)) => bytes[offset] = u8::from(*v),
        (ValueKind::Pointer, NativeValue::Pointer(v)) => write_pod(bytes, offset, *v),
        (ValueKind::Pointer, NativeValue::Null) => write_pod(bytes, offset, 0usize),
        _ => return false,
    }
    true
}

impl Marshaller<'_> {
    /// Decodes plain struct bytes into a managed struct value.
    pub(crate) fn decode_struct(
        &self,
        bytes: &[u8],
        ty: &Arc<TypeDescriptor>,
        depth: usize,
    ) -> BridgeResult<StructValue> {
        let (fields, layout) = self.struct_fields_at(ty, depth)?;
        if bytes.len() < layout.size {
            return Err(BridgeError::MarshalFailure(format!(
                "struct '{}' needs {} bytes, got {}",
                ty.full_name(),
                layout.size,
                bytes.len()
            )));
        }
        let mut values = Vec::with_capacity(fields.len());
        for FieldLayout { field, ty: field_ty, offset } in fields {
            let value = match &field_ty.category {
                TypeCategory::Struct => {
                    let end = offset + self.layout_at(&field_ty, depth + 1)?.size;
                    ManagedValue::Struct(self.decode_struct(&bytes[offset..end], &field_ty, depth + 1)?)
                }
                TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface => {
                    let handle = ObjectHandle::from_bits(read_pod(bytes, offset));
                    self.to_managed_at(NativeValue::Handle(handle), &field_ty, depth + 1)?
                }
                TypeCategory::String | TypeCategory::Array { .. } => {
                    return Err(not_plain(ty));
                }
                _ => {
                    let kind = self.catalog.kind_of(&field_ty);
                    let scalar = decode_scalar(bytes, offset, kind).ok_or_else(|| not_plain(ty))?;
                    self.to_managed_at(scalar, &field_ty, depth + 1)?
                }
            };
            values.push((field.name.clone(), value));
        }
        Ok(StructValue {
            type_name: ty.qualified_name(),
            fields: values,
        })
    }

    /// Encodes a managed struct value into plain bytes. Object fields get
    /// fresh strong handles.
    pub(crate) fn encode_struct(
        &self,
        value: &StructValue,
        ty: &Arc<TypeDescriptor>,
        depth: usize,
    ) -> BridgeResult<Vec<u8>> {
        let (fields, layout) = self.struct_fields_at(ty, depth)?;
        let mut bytes = vec![0u8; layout.size];
        for FieldLayout { field, ty: field_ty, offset } in fields {
            let Some(managed) = value.field(&field.name) else {
                continue;
            };
            match self.to_native_at(managed, &field_ty, depth + 1)? {
                NativeValue::Struct(inner) => {
                    bytes[offset..offset + inner.len()].copy_from_slice(&inner);
                }
                NativeValue::Handle(handle) => write_pod(&mut bytes, offset, handle.to_bits()),
                NativeValue::Null if field_ty.category.is_reference() => {
                    if !matches!(
                        field_ty.category,
                        TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface
                    ) {
                        return Err(not_plain(ty));
                    }
                    write_pod(&mut bytes, offset, 0u64);
                }
                NativeValue::String(_) | NativeValue::Array(_) => return Err(not_plain(ty)),
                scalar => {
                    let kind = self.catalog.kind_of(&field_ty);
                    if !encode_scalar(&mut bytes, offset, kind, &scalar) {
                        return Err(kind_mismatch(&scalar, &field_ty));
                    }
                }
            }
        }
        Ok(bytes)
    }

    /// Reads a value of `ty` from its wire location.
    ///
    /// # Safety
    /// `src` must point at a readable value of `ty` in wire layout; any
    /// string or array buffers it references must be valid.
    pub unsafe fn read_native(&self, ty: &Arc<TypeDescriptor>, src: *const u8) -> BridgeResult<NativeValue> {
        self.read_at(ty, src, 0)
    }

    unsafe fn read_at(&self, ty: &Arc<TypeDescriptor>, src: *const u8, depth: usize) -> BridgeResult<NativeValue> {
        if src.is_null() {
            return Err(BridgeError::InvalidArgument(format!(
                "null location for '{}'",
                ty.full_name()
            )));
        }
        if depth >= MAX_DEPTH {
            return Err(BridgeError::InvalidArgument("array nesting too deep".into()));
        }
        let layout = self.layout_at(ty, depth)?;
        match &ty.category {
            TypeCategory::Void => Ok(NativeValue::Null),
            TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface => {
                let bits = std::ptr::read_unaligned(src as *const u64);
                Ok(if bits == 0 {
                    NativeValue::Null
                } else {
                    NativeValue::Handle(ObjectHandle::from_bits(bits))
                })
            }
            TypeCategory::String => {
                let text = std::ptr::read_unaligned(src as *const NativeString);
                Ok(match text.to_owned_string()? {
                    Some(s) => NativeValue::String(s),
                    None => NativeValue::Null,
                })
            }
            TypeCategory::Array { element } => {
                let array = std::ptr::read_unaligned(src as *const NativeArray);
                if array.is_null() {
                    return Ok(NativeValue::Null);
                }
                let element = self.catalog.resolve(self.scope, element)?;
                let stride = self.layout_at(&element, depth + 1)?.stride();
                let mut items = Vec::with_capacity(array.len);
                for index in 0..array.len {
                    items.push(self.read_at(&element, array.data.add(index * stride), depth + 1)?);
                }
                Ok(NativeValue::Array(items))
            }
            TypeCategory::Struct => {
                let bytes = std::slice::from_raw_parts(src, layout.size).to_vec();
                Ok(NativeValue::Struct(bytes))
            }
            TypeCategory::Pointer { .. } => Ok(NativeValue::Pointer(std::ptr::read_unaligned(
                src as *const usize,
            ))),
            TypeCategory::Primitive(kind) | TypeCategory::Enum(kind) => {
                let bytes = std::slice::from_raw_parts(src, layout.size);
                decode_scalar(bytes, 0, *kind).ok_or_else(|| not_plain(ty))
            }
        }
    }

    /// Writes `value` as `ty` to a destination of `len` bytes. Nothing is
    /// written when the destination is too small or the value does not fit.
    ///
    /// # Safety
    /// `dst` must point at `len` writable bytes.
    pub unsafe fn write_native(
        &self,
        ty: &Arc<TypeDescriptor>,
        value: &NativeValue,
        dst: *mut u8,
        len: usize,
    ) -> BridgeResult<()> {
        let bytes = self.encode_wire(ty, value, 0)?;
        if bytes.len() > len {
            self.release_wire(ty, &bytes, 0);
            return Err(too_small(ty, bytes.len(), len));
        }
        if dst.is_null() {
            self.release_wire(ty, &bytes, 0);
            return Err(BridgeError::InvalidArgument("null destination".into()));
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        Ok(())
    }

    /// Wire bytes of one value. Strings and arrays allocate native buffers.
    fn encode_wire(&self, ty: &Arc<TypeDescriptor>, value: &NativeValue, depth: usize) -> BridgeResult<Vec<u8>> {
        if depth >= MAX_DEPTH {
            return Err(BridgeError::InvalidArgument("array nesting too deep".into()));
        }
        let layout = self.layout_at(ty, depth)?;
        let mut bytes = vec![0u8; layout.size];
        match (&ty.category, value) {
            (TypeCategory::Void, _) => {}
            (TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface, NativeValue::Null) => {}
            (TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface, NativeValue::Handle(h)) => {
                write_pod(&mut bytes, 0, h.to_bits());
            }
            (TypeCategory::String | TypeCategory::Array { .. }, NativeValue::Null) => {}
            (TypeCategory::String, NativeValue::String(text)) => {
                let native = NativeString::from_string(text.clone());
                write_pod(&mut bytes, 0, native.data as usize);
                write_pod(&mut bytes, size_of::<usize>(), native.len);
            }
            (TypeCategory::Array { element }, NativeValue::Array(items)) => {
                let element = self.catalog.resolve(self.scope, element)?;
                let stride = self.layout_at(&element, depth + 1)?.stride();
                let array = NativeArray::allocate(stride * items.len(), items.len());
                for (index, item) in items.iter().enumerate() {
                    match self.encode_wire(&element, item, depth + 1) {
                        Ok(encoded) => {
                            // SAFETY: the buffer holds `items.len()` strides.
                            unsafe {
                                std::ptr::copy_nonoverlapping(
                                    encoded.as_ptr(),
                                    array.data.add(index * stride),
                                    encoded.len(),
                                );
                            }
                        }
                        Err(err) => {
                            // SAFETY: elements before `index` were fully written.
                            unsafe {
                                for done in 0..index {
                                    let at = std::slice::from_raw_parts(array.data.add(done * stride), stride);
                                    self.release_wire(&element, at, depth + 1);
                                }
                                array.free();
                            }
                            return Err(err);
                        }
                    }
                }
                write_pod(&mut bytes, 0, array.data as usize);
                write_pod(&mut bytes, size_of::<usize>(), array.len);
            }
            (TypeCategory::Struct, NativeValue::Struct(raw)) => {
                if raw.len() < layout.size {
                    return Err(too_small(ty, layout.size, raw.len()));
                }
                bytes.copy_from_slice(&raw[..layout.size]);
            }
            (TypeCategory::Pointer { .. }, NativeValue::Pointer(p)) => write_pod(&mut bytes, 0, *p),
            (TypeCategory::Pointer { .. }, NativeValue::Null) => {}
            (TypeCategory::Primitive(kind) | TypeCategory::Enum(kind), scalar) => {
                if !encode_scalar(&mut bytes, 0, *kind, scalar) {
                    return Err(kind_mismatch(scalar, ty));
                }
            }
            (_, other) => return Err(kind_mismatch(other, ty)),
        }
        Ok(bytes)
    }

    /// Frees native buffers referenced by encoded wire bytes.
    pub(crate) fn release_wire(&self, ty: &Arc<TypeDescriptor>, bytes: &[u8], depth: usize) {
        match &ty.category {
            TypeCategory::String => {
                let text = NativeString {
                    data: read_pod::<usize>(bytes, 0) as *mut u8,
                    len: read_pod(bytes, size_of::<usize>()),
                };
                // SAFETY: produced by `encode_wire`.
                unsafe { text.free() };
            }
            TypeCategory::Array { element } => {
                let array = NativeArray {
                    data: read_pod::<usize>(bytes, 0) as *mut u8,
                    len: read_pod(bytes, size_of::<usize>()),
                };
                if array.is_null() {
                    return;
                }
                if let Ok(element) = self.catalog.resolve(self.scope, element) {
                    if let Ok(layout) = self.layout_at(&element, depth + 1) {
                        let stride = layout.stride();
                        for index in 0..array.len {
                            // SAFETY: produced by `encode_wire` with this stride.
                            let at = unsafe { std::slice::from_raw_parts(array.data.add(index * stride), stride) };
                            self.release_wire(&element, at, depth + 1);
                        }
                    }
                }
                // SAFETY: produced by `NativeArray::allocate`.
                unsafe { array.free() };
            }
            _ => {}
        }
    }

    /// Releases the handles minted when a managed value was converted to
    /// `ty`, including those written into struct bytes.
    pub(crate) fn release_minted(&self, ty: &Arc<TypeDescriptor>, value: &NativeValue, depth: usize) {
        if depth >= MAX_DEPTH {
            return;
        }
        match (&ty.category, value) {
            (_, NativeValue::Handle(handle)) => {
                let _ = self.objects.release(*handle);
            }
            (TypeCategory::Array { element }, NativeValue::Array(items)) => {
                if let Ok(element) = self.catalog.resolve(self.scope, element) {
                    for item in items {
                        self.release_minted(&element, item, depth + 1);
                    }
                }
            }
            (TypeCategory::Struct, NativeValue::Struct(bytes)) => self.release_struct_handles(ty, bytes, depth),
            _ => {}
        }
    }

    fn release_struct_handles(&self, ty: &Arc<TypeDescriptor>, bytes: &[u8], depth: usize) {
        let Ok((fields, _)) = self.struct_fields_at(ty, depth) else {
            return;
        };
        for FieldLayout { ty: field_ty, offset, .. } in fields {
            match field_ty.category {
                TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface => {
                    if let Some(raw) = bytes.get(offset..offset + size_of::<u64>()) {
                        let bits: u64 = read_pod(raw, 0);
                        if bits != 0 {
                            let _ = self.objects.release(ObjectHandle::from_bits(bits));
                        }
                    }
                }
                TypeCategory::Struct => {
                    let Ok(layout) = self.layout_at(&field_ty, depth + 1) else {
                        continue;
                    };
                    if let Some(inner) = bytes.get(offset..offset + layout.size) {
                        self.release_struct_handles(&field_ty, inner, depth + 1);
                    }
                }
                _ => {}
            }
        }
    }
}

fn not_plain(ty: &TypeDescriptor) -> BridgeError {
    BridgeError::MarshalFailure(format!(
        "struct '{}' holds strings or arrays and cannot cross by value",
        ty.full_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::object::ObjectRegistry;
    use crate::settings::OverloadPolicy;

    fn with_marshaller(test: impl FnOnce(&Marshaller<'_>, &Catalog)) {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let objects = ObjectRegistry::new();
        let m = Marshaller::new(&catalog, None, &objects);
        test(&m, &catalog);
    }

    #[test]
    fn bool_is_one_byte_and_nonzero_is_true() {
        with_marshaller(|m, catalog| {
            let ty = catalog.resolve(None, "bool").unwrap();
            let raw = [7u8];
            let value = unsafe { m.read_native(&ty, raw.as_ptr()) }.unwrap();
            assert_eq!(value, NativeValue::Bool(true));
        });
    }

    #[test]
    fn short_destination_is_left_untouched() {
        with_marshaller(|m, catalog| {
            let ty = catalog.resolve(None, "double").unwrap();
            let mut dst = [0xAAu8; 4];
            let err = unsafe { m.write_native(&ty, &NativeValue::Double(1.0), dst.as_mut_ptr(), dst.len()) }
                .unwrap_err();
            assert!(matches!(err, BridgeError::MarshalFailure(_)));
            assert_eq!(dst, [0xAA; 4]);
        });
    }

    #[test]
    fn kind_mismatch_is_refused() {
        with_marshaller(|m, catalog| {
            let ty = catalog.resolve(None, "int").unwrap();
            let mut dst = [0u8; 4];
            let result = unsafe { m.write_native(&ty, &NativeValue::Float(1.0), dst.as_mut_ptr(), 4) };
            assert!(result.is_err());
        });
    }

    #[test]
    fn strings_and_arrays_are_bridge_allocated() {
        with_marshaller(|m, catalog| {
            let string = catalog.resolve(None, "string").unwrap();
            let mut slot = NativeString::null();
            unsafe {
                m.write_native(
                    &string,
                    &NativeValue::String("héllo".into()),
                    &mut slot as *mut NativeString as *mut u8,
                    size_of::<NativeString>(),
                )
                .unwrap();
                assert_eq!(slot.len, "héllo".len());
                assert_eq!(*slot.data.add(slot.len), 0);
                let back = m.read_native(&string, &slot as *const NativeString as *const u8).unwrap();
                assert_eq!(back, NativeValue::String("héllo".into()));
                slot.free();
            }

            let shorts = catalog.resolve(None, "short[]").unwrap();
            let mut array = NativeArray::null();
            let items = NativeValue::Array(vec![NativeValue::Short(-1), NativeValue::Short(9)]);
            unsafe {
                m.write_native(&shorts, &items, &mut array as *mut NativeArray as *mut u8, size_of::<NativeArray>())
                    .unwrap();
                assert_eq!(array.len, 2);
                let back = m.read_native(&shorts, &array as *const NativeArray as *const u8).unwrap();
                assert_eq!(back, items);
                array.free();
            }
        });
    }

    #[test]
    fn null_string_reads_as_null() {
        with_marshaller(|m, catalog| {
            let string = catalog.resolve(None, "string").unwrap();
            let slot = NativeString::null();
            let value = unsafe { m.read_native(&string, &slot as *const NativeString as *const u8) }.unwrap();
            assert_eq!(value, NativeValue::Null);
        });
    }
}
