//! Per-routine storage of memory reference formulas.
//!
//! Each memory operand of an instruction gets one [`RefFormulas`]: the address
//! at loop entry and one stride per enclosing loop. A routine owns all of them
//! through a [`RefFormulasMap`], indexed by the operand's key.
use std::collections::{BTreeMap, btree_map};

use afinstr::Address;

use crate::formula::Formula;

/// Operand index bits folded into a reference key.
pub const OPERAND_INDEX_BITS: u32 = 2;

const OPERAND_INDEX_MASK: u64 = (1 << OPERAND_INDEX_BITS) - 1;

/// Address formulas of one memory operand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefFormulas {
    /// Address at the first iteration.
    pub base: Formula,
    /// Per-iteration deltas, innermost loop first.
    pub strides: Vec<Formula>,
}

impl RefFormulas {
    pub fn new(base: Formula) -> Self {
        Self {
            base,
            strides: Vec::new(),
        }
    }

    pub fn number_of_strides(&self) -> usize {
        self.strides.len()
    }

    /// Stride of the loop `level` levels out from the innermost one.
    pub fn stride(&self, level: usize) -> Option<&Formula> {
        self.strides.get(level)
    }
}

/// Reference formulas of one routine, keyed by `(pc, operand index)`.
///
/// Keys are relative to the routine's entry address so that they stay small
/// and survive relocation of the whole image. Iteration runs in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefFormulasMap {
    routine_base: Address,
    storage: BTreeMap<u64, RefFormulas>,
}

impl RefFormulasMap {
    pub fn new(routine_base: Address) -> Self {
        Self {
            routine_base,
            storage: BTreeMap::new(),
        }
    }

    pub fn routine_base(&self) -> Address {
        self.routine_base
    }

    /// Key of the `operand_index`-th memory operand of the instruction at
    /// `pc`. Only the low two bits of the operand index are kept.
    pub fn key_for(&self, pc: Address, operand_index: u32) -> u64 {
        (pc.wrapping_sub(self.routine_base) << OPERAND_INDEX_BITS)
            | (operand_index as u64 & OPERAND_INDEX_MASK)
    }

    /// Instruction address and operand index encoded in `key`.
    pub fn decode_key(&self, key: u64) -> (Address, u32) {
        (
            (key >> OPERAND_INDEX_BITS).wrapping_add(self.routine_base),
            (key & OPERAND_INDEX_MASK) as u32,
        )
    }

    /// Formulas of an operand, created empty on first access.
    pub fn entry(&mut self, pc: Address, operand_index: u32) -> &mut RefFormulas {
        let key = self.key_for(pc, operand_index);
        self.entry_at_key(key)
    }

    pub fn get(&self, pc: Address, operand_index: u32) -> Option<&RefFormulas> {
        self.storage.get(&self.key_for(pc, operand_index))
    }

    pub fn get_mut(&mut self, pc: Address, operand_index: u32) -> Option<&mut RefFormulas> {
        let key = self.key_for(pc, operand_index);
        self.storage.get_mut(&key)
    }

    pub fn entry_at_key(&mut self, key: u64) -> &mut RefFormulas {
        self.storage.entry(key).or_default()
    }

    pub fn get_at_key(&self, key: u64) -> Option<&RefFormulas> {
        self.storage.get(&key)
    }

    /// Insert formulas under `key`, failing if the key is already present.
    pub(crate) fn insert_new(&mut self, key: u64, formulas: RefFormulas) -> bool {
        match self.storage.entry(key) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(formulas);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.storage.contains_key(&key)
    }

    /// Drop every entry. The routine base is kept.
    pub fn clear(&mut self) {
        self.storage.clear();
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, u64, RefFormulas> {
        self.storage.iter()
    }
}

impl<'a> IntoIterator for &'a RefFormulasMap {
    type Item = (&'a u64, &'a RefFormulas);
    type IntoIter = btree_map::Iter<'a, u64, RefFormulas>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.iter()
    }
}
