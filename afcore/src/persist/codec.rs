//! Fixed-width little-endian encoding of terms, formulas and routine blocks.
//!
//! The layouts are written field by field through `borsh`'s primitive
//! encoders; no layout is derived, so reordering struct fields never changes
//! the file format.
//!
//! ```text
//! Term       := num:i64 den:u64 kind:u32 pc:u64 uop:i32 aux:u64 [register]
//! register   := name:i32 class:u32 lsb:i32 msb:i32 stack:i16   (Register/Load only)
//! Formula    := count:u32 Term{count} access:u32
//! RefFormulas:= Formula strides:i32 Formula{strides}
//! Routine    := entries:i32 (key:u64 RefFormulas){entries}
//! ```
use std::cmp::Ordering;

use afinstr::RegisterRef;
use borsh::{
    BorshDeserialize, BorshSerialize,
    io::{Error, ErrorKind, Read, Result, Write},
};

use crate::{
    formula::{AccessFlags, Formula},
    refs::{RefFormulas, RefFormulasMap},
    term::{Term, TermKind},
};

/// Bit of the access word recording a formula that was never computed.
const UNINITIALIZED_BIT: u32 = 1 << 31;

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, msg.into())
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let count = i32::deserialize_reader(reader)?;
    usize::try_from(count).map_err(|_| invalid(format!("negative {what} count {count}")))
}

fn write_count<W: Write>(writer: &mut W, count: usize, what: &str) -> Result<()> {
    let count = i32::try_from(count).map_err(|_| invalid(format!("too many {what}: {count}")))?;
    count.serialize(writer)
}

impl BorshSerialize for Term {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.value_num.serialize(writer)?;
        self.value_den.serialize(writer)?;
        self.kind.to_u32().serialize(writer)?;
        self.pc.serialize(writer)?;
        self.uop_index.serialize(writer)?;
        self.aux_info.serialize(writer)?;
        if self.kind.has_register() {
            self.register.serialize(writer)?;
        }
        Ok(())
    }
}

impl BorshDeserialize for Term {
    fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let value_num = i64::deserialize_reader(reader)?;
        let value_den = u64::deserialize_reader(reader)?;
        if value_den == 0 {
            return Err(invalid("term with a zero denominator"));
        }
        let raw_kind = u32::deserialize_reader(reader)?;
        let kind = TermKind::from_repr(raw_kind)
            .ok_or_else(|| invalid(format!("unknown term kind {raw_kind}")))?;
        let pc = u64::deserialize_reader(reader)?;
        let uop_index = i32::deserialize_reader(reader)?;
        let aux_info = u64::deserialize_reader(reader)?;
        let register = if kind.has_register() {
            RegisterRef::deserialize_reader(reader)?
        } else {
            RegisterRef::default()
        };
        Ok(Term {
            value_num,
            value_den,
            kind,
            pc,
            uop_index,
            aux_info,
            register,
            must_expand: false,
        })
    }
}

impl BorshSerialize for Formula {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        let count = u32::try_from(self.len())
            .map_err(|_| invalid(format!("formula with {} terms", self.len())))?;
        count.serialize(writer)?;
        for term in self {
            term.serialize(writer)?;
        }
        let mut access = self.access_flags().bits();
        if self.is_uninitialized() {
            access |= UNINITIALIZED_BIT;
        }
        access.serialize(writer)
    }
}

impl BorshDeserialize for Formula {
    fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let count = u32::deserialize_reader(reader)?;
        let mut terms: Vec<Term> = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let term = Term::deserialize_reader(reader)?;
            if let Some(prev) = terms.last()
                && prev.canonical_cmp(&term) != Ordering::Less
            {
                return Err(invalid(format!(
                    "term {term} does not follow {prev} in canonical order"
                )));
            }
            terms.push(term);
        }

        let access = u32::deserialize_reader(reader)?;
        let flags = AccessFlags::from_bits(access & !UNINITIALIZED_BIT)
            .ok_or_else(|| invalid(format!("unknown access flags {access:#x}")))?;
        // Terms accumulated into an unset formula keep it unset.
        let initialized = access & UNINITIALIZED_BIT == 0;
        Ok(Formula::from_parts(terms, flags, initialized))
    }
}

impl BorshSerialize for RefFormulas {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.base.serialize(writer)?;
        write_count(writer, self.strides.len(), "strides")?;
        for stride in &self.strides {
            stride.serialize(writer)?;
        }
        Ok(())
    }
}

impl BorshDeserialize for RefFormulas {
    fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let base = Formula::deserialize_reader(reader)?;
        let count = read_count(reader, "stride")?;
        let strides = (0..count)
            .map(|_| Formula::deserialize_reader(reader))
            .collect::<Result<Vec<_>>>()?;
        Ok(RefFormulas { base, strides })
    }
}

/// Write the entries of `map` as one routine block.
pub fn write_routine_block<W: Write>(writer: &mut W, map: &RefFormulasMap) -> Result<()> {
    write_count(writer, map.len(), "reference entries")?;
    for (key, formulas) in map {
        key.serialize(writer)?;
        formulas.serialize(writer)?;
    }
    Ok(())
}

/// Decode one routine block into `map`, which must be empty.
///
/// On error `map` may hold the entries decoded so far.
pub fn read_routine_block<R: Read>(reader: &mut R, map: &mut RefFormulasMap) -> Result<()> {
    let count = read_count(reader, "reference entry")?;
    for idx in 0..count {
        let key = u64::deserialize_reader(reader)?;
        let formulas = RefFormulas::deserialize_reader(reader).map_err(|e| {
            Error::new(
                e.kind(),
                format!("entry {idx} of {count} (key {key:#x}): {e}"),
            )
        })?;
        if !map.insert_new(key, formulas) {
            return Err(invalid(format!("duplicate reference key {key:#x}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use afinstr::{RegisterClass, X86_64, arch::X86Reg};

    use super::*;

    fn rax(pc: u64) -> Term {
        Term::register(3, pc, 1, X86_64::register(X86Reg::Rax, RegisterClass::MemOp))
    }

    #[test]
    fn term_layout_is_fixed_width() {
        let constant = borsh::to_vec(&Term::constant(-2)).unwrap();
        assert_eq!(constant.len(), 8 + 8 + 4 + 8 + 4 + 8);
        assert_eq!(&constant[..8], &(-2i64).to_le_bytes());
        assert_eq!(&constant[16..20], &6u32.to_le_bytes());

        let register = borsh::to_vec(&rax(0x400)).unwrap();
        assert_eq!(register.len(), constant.len() + 4 + 4 + 4 + 4 + 2);
    }

    #[test]
    fn must_expand_is_not_persisted() {
        let term = rax(0x400).with_must_expand(true);
        let back = Term::try_from_slice(&borsh::to_vec(&term).unwrap()).unwrap();
        assert!(!back.must_expand());
        assert_eq!(back, term);
    }

    #[test]
    fn formulas_keep_flags_and_zero_terms() {
        let mut f: Formula = [rax(0x400)].into_iter().collect();
        f.add(Term::constant(0));
        f.mark_irregular();
        let back = Formula::try_from_slice(&borsh::to_vec(&f).unwrap()).unwrap();
        assert_eq!(back, f);

        let unset =
            Formula::try_from_slice(&borsh::to_vec(&Formula::uninitialized()).unwrap()).unwrap();
        assert!(unset.is_uninitialized());

        let mut accumulated = Formula::uninitialized();
        accumulated.add(Term::constant(8));
        let back = Formula::try_from_slice(&borsh::to_vec(&accumulated).unwrap()).unwrap();
        assert!(back.is_uninitialized());
        assert_eq!(back, accumulated);
    }

    #[test]
    fn decoder_rejects_bad_terms() {
        let mut bytes = borsh::to_vec(&Term::constant(1)).unwrap();
        bytes[8..16].copy_from_slice(&0u64.to_le_bytes());
        assert!(Term::try_from_slice(&bytes).is_err());

        let mut bytes = borsh::to_vec(&Term::constant(1)).unwrap();
        bytes[16..20].copy_from_slice(&42u32.to_le_bytes());
        assert!(Term::try_from_slice(&bytes).is_err());
    }

    #[test]
    fn decoder_rejects_unsorted_formulas() {
        let mut bytes = 2u32.to_le_bytes().to_vec();
        bytes.extend(borsh::to_vec(&Term::constant(1)).unwrap());
        bytes.extend(borsh::to_vec(&rax(0x400)).unwrap());
        bytes.extend(0u32.to_le_bytes());
        assert!(Formula::try_from_slice(&bytes).is_err());
    }

    #[test]
    fn routine_blocks_reject_duplicate_keys() {
        let mut bytes = 2i32.to_le_bytes().to_vec();
        let entry = borsh::to_vec(&RefFormulas::new(Formula::zero())).unwrap();
        for _ in 0..2 {
            bytes.extend(8u64.to_le_bytes());
            bytes.extend(&entry);
        }
        let mut map = RefFormulasMap::new(0);
        let err = read_routine_block(&mut bytes.as_slice(), &mut map).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn negative_stride_counts_are_rejected() {
        let mut bytes = borsh::to_vec(&Formula::zero()).unwrap();
        bytes.extend((-1i32).to_le_bytes());
        assert!(RefFormulas::try_from_slice(&bytes).is_err());
    }
}
