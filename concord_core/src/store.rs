// Variable store: typed slots addressed by `VarId`.
//
// Slots live in a `Vec` in declaration order (the resolver's tie order for
// independent variables) with an `FxHashMap` index for lookup by id. Removing
// a slot shifts later slots down, so slot indices are only valid until the
// next removal; the graph recomputes its cached order on every edit.
//
// A graph owns one store holding declarations plus any pinned (authored)
// values. Sessions never share a store: each resolution pass builds its own
// assignment from a read-only view of this one.

use crate::error::{EngineError, EngineResult};
use crate::value::{TieBreak, Value, VarDecl, VarId, VarType};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One declared variable and its current value (`None` = Unresolved).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(flatten)]
    pub decl: VarDecl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Slot {
    pub fn id(&self) -> &VarId {
        &self.decl.id
    }

    pub fn ty(&self) -> &VarType {
        &self.decl.ty
    }

    pub fn tie_break(&self) -> TieBreak {
        self.decl.tie_break
    }
}

#[derive(Clone, Debug, Default)]
pub struct VariableStore {
    slots: Vec<Slot>,
    index: FxHashMap<VarId, usize>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new, Unresolved variable.
    pub fn declare(&mut self, decl: VarDecl) -> EngineResult<()> {
        if self.index.contains_key(&decl.id) {
            return Err(EngineError::DuplicateId(decl.id));
        }
        decl.ty.validate(&decl.id)?;
        self.index.insert(decl.id.clone(), self.slots.len());
        self.slots.push(Slot { decl, value: None });
        Ok(())
    }

    /// Current value, or `None` when Unresolved.
    pub fn get(&self, id: &VarId) -> EngineResult<Option<&Value>> {
        Ok(self.slot(id)?.value.as_ref())
    }

    /// Assign a value after checking it against the declared type.
    pub fn set(&mut self, id: &VarId, value: Value) -> EngineResult<()> {
        let idx = self.index_of(id)?;
        let slot = &mut self.slots[idx];
        slot.decl
            .ty
            .check(&value)
            .map_err(|reason| EngineError::type_mismatch(id, reason))?;
        slot.value = Some(value);
        Ok(())
    }

    /// Clear back to Unresolved.
    pub fn reset(&mut self, id: &VarId) -> EngineResult<()> {
        let idx = self.index_of(id)?;
        self.slots[idx].value = None;
        Ok(())
    }

    /// Remove a declaration entirely. Callers check for bound constraints.
    pub fn remove(&mut self, id: &VarId) -> EngineResult<Slot> {
        let idx = self.index_of(id)?;
        let slot = self.slots.remove(idx);
        self.index.remove(id);
        for later in &self.slots[idx..] {
            if let Some(i) = self.index.get_mut(&later.decl.id) {
                *i -= 1;
            }
        }
        Ok(slot)
    }

    pub fn slot(&self, id: &VarId) -> EngineResult<&Slot> {
        Ok(&self.slots[self.index_of(id)?])
    }

    pub fn index_of(&self, id: &VarId) -> EngineResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::UnknownVariable(id.clone()))
    }

    pub fn contains(&self, id: &VarId) -> bool {
        self.index.contains_key(id)
    }

    /// Slots in declaration order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
