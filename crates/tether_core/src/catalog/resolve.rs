//! Overload resolution.
//!
//! A full signature string (`"Int32 OverloadTest(Int32)"`) selects a member
//! outright. Otherwise candidates must share the name and arity, and every
//! declared parameter kind must equal the supplied argument kind.

use super::{Accessibility, Catalog, MethodDescriptor, TypeDescriptor};
use crate::domain::Domain;
use crate::error::{BridgeError, BridgeResult};
use crate::ids::{DomainId, TypeId};
use crate::settings::OverloadPolicy;
use crate::value::ValueKind;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemberClass {
    Constructor,
    Instance,
    Static,
}

/// Memoisation key for a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct MethodKey {
    pub domain: Option<DomainId>,
    pub owner: TypeId,
    pub name: String,
    pub kinds: Vec<ValueKind>,
    pub count: usize,
    pub class: MemberClass,
}

impl Catalog {
    /// Resolves `name` against the members of `owner` for the given argument
    /// kinds. `Ok(None)` means nothing matched.
    pub fn find_suitable_method(
        &self,
        scope: Option<&Domain>,
        owner: &Arc<TypeDescriptor>,
        name: &str,
        kinds: &[ValueKind],
        class: MemberClass,
    ) -> BridgeResult<Option<Arc<MethodDescriptor>>> {
        let key = MethodKey {
            domain: owner.origin.domain,
            owner: self.types.add(owner),
            name: name.to_string(),
            kinds: kinds.to_vec(),
            count: kinds.len(),
            class,
        };
        if let Some(hit) = self.resolved.get(&key) {
            return Ok(Some(Arc::clone(hit.value())));
        }

        let candidates = self.candidates(scope, owner, class)?;
        let found = self.select(scope, name, kinds, &candidates)?;
        if let Some(method) = &found {
            tracing::debug!(
                owner = %owner.full_name,
                signature = %method.signature,
                "memoised overload resolution"
            );
            self.resolved.insert(key, Arc::clone(method));
        }
        Ok(found)
    }

    /// Members in scan order: declared first, then base types for instance lookups.
    fn candidates(
        &self,
        scope: Option<&Domain>,
        owner: &Arc<TypeDescriptor>,
        class: MemberClass,
    ) -> BridgeResult<Vec<Arc<MethodDescriptor>>> {
        Ok(match class {
            MemberClass::Constructor => owner.constructors.clone(),
            MemberClass::Static => owner
                .methods
                .iter()
                .filter(|m| m.is_static)
                .cloned()
                .collect(),
            MemberClass::Instance => {
                let chain = self.chain(scope, owner)?;
                let mut methods = Vec::new();
                for (depth, ty) in chain.iter().enumerate() {
                    methods.extend(
                        ty.methods
                            .iter()
                            .filter(|m| !m.is_static)
                            .filter(|m| depth == 0 || m.access != Accessibility::Private)
                            .cloned(),
                    );
                }
                methods
            }
        })
    }

    fn select(
        &self,
        scope: Option<&Domain>,
        name: &str,
        kinds: &[ValueKind],
        candidates: &[Arc<MethodDescriptor>],
    ) -> BridgeResult<Option<Arc<MethodDescriptor>>> {
        if let Some(exact) = candidates.iter().find(|m| m.signature == name) {
            return Ok(Some(Arc::clone(exact)));
        }

        let mut matches = Vec::new();
        for method in candidates
            .iter()
            .filter(|m| m.name == name && m.parameters.len() == kinds.len())
        {
            if self.parameter_kinds(scope, method) == kinds {
                matches.push(Arc::clone(method));
            }
        }

        let Some(first) = matches.first().cloned() else {
            return Ok(None);
        };
        if self.policy == OverloadPolicy::Strict && matches.len() > 1 {
            let first_types = self.parameter_types(scope, &first);
            let mut conflicting = Vec::new();
            for other in &matches[1..] {
                let other_types = self.parameter_types(scope, other);
                let same = first_types.len() == other_types.len()
                    && first_types
                        .iter()
                        .zip(&other_types)
                        .all(|(a, b)| match (a, b) {
                            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                            _ => false,
                        });
                if !same {
                    conflicting.push(other.signature.clone());
                }
            }
            if !conflicting.is_empty() {
                conflicting.insert(0, first.signature.clone());
                return Err(BridgeError::OverloadAmbiguous {
                    name: name.to_string(),
                    candidates: conflicting,
                });
            }
        }
        Ok(Some(first))
    }

    /// Unresolvable parameter types map to `Unknown` and never match.
    pub fn parameter_kinds(&self, scope: Option<&Domain>, method: &MethodDescriptor) -> Vec<ValueKind> {
        method
            .parameters
            .iter()
            .map(|p| {
                self.resolve(scope, &p.type_name)
                    .map(|t| self.kind_of(&t))
                    .unwrap_or(ValueKind::Unknown)
            })
            .collect()
    }

    fn parameter_types(
        &self,
        scope: Option<&Domain>,
        method: &MethodDescriptor,
    ) -> Vec<Option<Arc<TypeDescriptor>>> {
        method
            .parameters
            .iter()
            .map(|p| self.resolve(scope, &p.type_name).ok())
            .collect()
    }
}
