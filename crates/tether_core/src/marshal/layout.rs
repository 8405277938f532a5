//! Wire layout of declared types.
//!
//! Structs use the sequential C layout of their instance fields with
//! natural alignment. References travel as 64-bit handles, strings and
//! arrays as `{ ptr, len }` pairs.

use super::wire::{NativeArray, NativeString};
use super::Marshaller;
use crate::catalog::{FieldDescriptor, TypeCategory, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult};
use crate::value::ValueKind;
use std::mem::{align_of, size_of};
use std::sync::Arc;

/// Struct nesting deeper than this is rejected as recursive.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WireLayout {
    pub size: usize,
    pub align: usize,
}

impl WireLayout {
    const fn of<T>() -> Self {
        Self {
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    fn primitive(kind: ValueKind) -> Self {
        let size = kind.primitive_size().unwrap_or(0);
        Self {
            size,
            align: size.max(1),
        }
    }

    /// Distance between consecutive array elements.
    pub fn stride(&self) -> usize {
        align_up(self.size, self.align)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FieldLayout {
    pub field: Arc<FieldDescriptor>,
    pub ty: Arc<TypeDescriptor>,
    pub offset: usize,
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align.max(1)) * align.max(1)
}

impl Marshaller<'_> {
    pub fn layout(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<WireLayout> {
        self.layout_at(ty, 0)
    }

    pub(crate) fn layout_at(&self, ty: &Arc<TypeDescriptor>, depth: usize) -> BridgeResult<WireLayout> {
        Ok(match &ty.category {
            TypeCategory::Void => WireLayout { size: 0, align: 1 },
            TypeCategory::Primitive(kind) | TypeCategory::Enum(kind) => WireLayout::primitive(*kind),
            TypeCategory::Pointer { .. } => WireLayout::of::<usize>(),
            TypeCategory::Object | TypeCategory::Class | TypeCategory::Interface => {
                WireLayout::of::<u64>()
            }
            TypeCategory::String => WireLayout::of::<NativeString>(),
            TypeCategory::Array { .. } => WireLayout::of::<NativeArray>(),
            TypeCategory::Struct => self.struct_fields_at(ty, depth)?.1,
        })
    }

    /// Instance fields with their offsets, plus the struct's own layout.
    pub(crate) fn struct_fields_at(
        &self,
        ty: &Arc<TypeDescriptor>,
        depth: usize,
    ) -> BridgeResult<(Vec<FieldLayout>, WireLayout)> {
        if depth >= MAX_DEPTH {
            return Err(BridgeError::InvalidArgument(format!(
                "struct '{}' nests too deeply (recursive layout?)",
                ty.full_name()
            )));
        }
        let mut offset = 0;
        let mut align = 1;
        let mut fields = Vec::new();
        for field in self.catalog.instance_fields(self.scope, ty)? {
            let field_ty = self.catalog.resolve(self.scope, &field.type_name)?;
            let layout = self.layout_at(&field_ty, depth + 1)?;
            offset = align_up(offset, layout.align);
            fields.push(FieldLayout {
                field,
                ty: field_ty,
                offset,
            });
            offset += layout.size;
            align = align.max(layout.align);
        }
        // An empty struct still occupies one byte.
        let size = align_up(offset, align).max(1);
        Ok((fields, WireLayout { size, align }))
    }

    /// Size reported by type introspection. References count as pointers.
    pub fn declared_size(&self, ty: &Arc<TypeDescriptor>) -> BridgeResult<usize> {
        if ty.category.is_reference() || matches!(ty.category, TypeCategory::Pointer { .. }) {
            return Ok(size_of::<usize>());
        }
        Ok(self.layout(ty)?.size)
    }

    /// Whether values of `ty` can be copied as plain bytes.
    pub(crate) fn is_plain(&self, ty: &Arc<TypeDescriptor>, depth: usize) -> BridgeResult<bool> {
        Ok(match &ty.category {
            TypeCategory::String | TypeCategory::Array { .. } => false,
            TypeCategory::Struct => {
                for field in self.struct_fields_at(ty, depth)?.0 {
                    if !self.is_plain(&field.ty, depth + 1)? {
                        return Ok(false);
                    }
                }
                true
            }
            _ => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::object::ObjectRegistry;
    use crate::settings::OverloadPolicy;

    #[test]
    fn primitive_and_reference_layouts() {
        let catalog = Catalog::new(OverloadPolicy::Strict);
        let objects = ObjectRegistry::new();
        let m = Marshaller::new(&catalog, None, &objects);
        let layout = |name: &str| m.layout(&catalog.resolve(None, name).unwrap()).unwrap();

        assert_eq!(layout("bool"), WireLayout { size: 1, align: 1 });
        assert_eq!(layout("short").size, 2);
        assert_eq!(layout("double"), WireLayout { size: 8, align: 8 });
        assert_eq!(layout("object").size, 8);
        assert_eq!(layout("string").size, 2 * size_of::<usize>());
        assert_eq!(layout("int[]").size, 2 * size_of::<usize>());

        let string = catalog.resolve(None, "string").unwrap();
        assert_eq!(m.declared_size(&string).unwrap(), size_of::<usize>());
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(0, 1), 0);
        let layout = WireLayout { size: 12, align: 8 };
        assert_eq!(layout.stride(), 16);
    }
}
