//! Bijection between LRA columns and the engine's local columns.
//!
//! Locals with no external backing are the fresh variables introduced
//! by the fresh-variable step of the rewrite loop.

use crate::lra::ColIndex;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default)]
pub struct VarRegister {
    locals: Vec<Option<ColIndex>>,
    external_map: FxHashMap<ColIndex, usize>,
}

impl VarRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `external` if unseen and return its local index.
    /// `None` allocates a fresh local with no external backing.
    /// Idempotent for already-registered externals.
    pub fn add_var(&mut self, external: Option<ColIndex>) -> usize {
        if let Some(e) = external {
            if let Some(&l) = self.external_map.get(&e) {
                return l;
            }
        }
        let l = self.locals.len();
        self.locals.push(external);
        if let Some(e) = external {
            self.external_map.insert(e, l);
        }
        l
    }

    pub fn local_to_external(&self, l: usize) -> Option<ColIndex> {
        self.locals.get(l).copied().flatten()
    }

    pub fn external_to_local(&self, e: ColIndex) -> Option<usize> {
        self.external_map.get(&e).copied()
    }

    pub fn external_is_used(&self, e: ColIndex) -> bool {
        self.external_map.contains_key(&e)
    }

    /// A fresh local is one without an external column behind it.
    pub fn is_fresh(&self, l: usize) -> bool {
        self.local_to_external(l).is_none()
    }

    /// Truncate to the first `n` locals, unregistering dropped externals.
    pub fn shrink(&mut self, n: usize) {
        while self.locals.len() > n {
            if let Some(Some(e)) = self.locals.pop() {
                self.external_map.remove(&e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}
