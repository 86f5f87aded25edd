//! Register references as produced by the micro-operation decoder.
//!
//! A [`RegisterRef`] names an architectural (or temporary) register together
//! with the bit range a micro-operation touches and the role the register
//! played in the instruction. The role only matters for a few classes: a
//! register used as a plain operand, as part of a memory operand or as part of
//! an address computation is the same register value.
use std::{cmp::Ordering, hash::Hash};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

use crate::utils::Error;

/// Largest bit index a register can expose.
pub const MAX_REG_MSB: i32 = 65535;

/// Register identifier inside the register table of an ISA.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegName(pub i32);

/// How a register is used by the micro-operation that references it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Display, EnumIter, FromRepr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u32)]
pub enum RegisterClass {
    #[default]
    Invalid = 0,
    RegOp = 1,
    MemOp = 2,
    LeaOp = 3,
    StackReg = 4,
    StackOperation = 5,
    TempReg = 6,
    Pseudo = 7,
}

impl RegisterClass {
    /// Convert to the persisted integer representation.
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Create from the persisted integer representation.
    pub fn try_from_u32(value: u32) -> Result<Self, Error> {
        Self::from_repr(value).ok_or(Error::InvalidRegisterClass(value))
    }

    /// Operand, memory-operand and address-operand registers hold the same
    /// value; they only differ by how the instruction uses them.
    pub fn equivalent(self, other: RegisterClass) -> bool {
        self.group() == other.group()
    }

    fn group(self) -> u32 {
        match self {
            RegisterClass::RegOp | RegisterClass::MemOp | RegisterClass::LeaOp => {
                RegisterClass::RegOp as u32
            }
            other => other as u32,
        }
    }
}

/// A register, or a bit range of a register, referenced by a micro-operation.
///
/// Equality treats [`RegisterClass::RegOp`], [`RegisterClass::MemOp`] and
/// [`RegisterClass::LeaOp`] as the same class. The ordering is total and
/// consistent with that equality: stack, name, bit range, then class.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegisterRef {
    pub name: RegName,
    pub class: RegisterClass,
    pub lsb: i32,
    pub msb: i32,
    /// Index of the register stack (x87 style). Stack 0 is the flat register file.
    pub stack: i16,
}

impl Default for RegisterRef {
    fn default() -> Self {
        Self {
            name: RegName(0),
            class: RegisterClass::Invalid,
            lsb: 0,
            msb: MAX_REG_MSB,
            stack: 0,
        }
    }
}

impl RegisterRef {
    /// A full-width register of the flat register file.
    pub fn new(name: RegName, class: RegisterClass) -> Self {
        Self {
            name,
            class,
            ..Default::default()
        }
    }

    /// A bit range `[lsb, msb]` of a register.
    pub fn with_range(name: RegName, class: RegisterClass, lsb: i32, msb: i32) -> Self {
        Self {
            name,
            class,
            lsb,
            msb,
            stack: 0,
        }
    }

    fn same_register(&self, other: &RegisterRef) -> bool {
        self.name == other.name && self.stack == other.stack && self.class.equivalent(other.class)
    }

    /// True if the two bit ranges overlap, even partially.
    pub fn overlaps_range(&self, other: &RegisterRef) -> bool {
        self.lsb <= other.msb && other.lsb <= self.msb
    }

    /// Same register and overlapping bit ranges.
    pub fn overlaps(&self, other: &RegisterRef) -> bool {
        self.same_register(other) && self.overlaps_range(other)
    }

    /// Same register and `other`'s bit range lies inside this one.
    pub fn includes(&self, other: &RegisterRef) -> bool {
        self.same_register(other) && self.lsb <= other.lsb && other.msb <= self.msb
    }

    /// Same register and this bit range lies inside `other`'s.
    pub fn is_included_in(&self, other: &RegisterRef) -> bool {
        other.includes(self)
    }

    /// Remove `[xlsb, xmsb]` from either end of the bit range. A hole in the
    /// middle of the range cannot be represented and leaves it untouched.
    pub fn subtract_range(&mut self, xlsb: i32, xmsb: i32) {
        if xlsb <= self.lsb && xmsb <= self.msb {
            self.lsb = xmsb + 1;
        } else if self.lsb <= xlsb && self.msb <= xmsb {
            self.msb = xlsb - 1;
        }
    }
}

impl PartialEq for RegisterRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_register(other) && self.lsb == other.lsb && self.msb == other.msb
    }
}

impl Eq for RegisterRef {}

impl Hash for RegisterRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.stack.hash(state);
        self.lsb.hash(state);
        self.msb.hash(state);
        self.class.group().hash(state);
    }
}

impl Ord for RegisterRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stack
            .cmp(&other.stack)
            .then(self.name.cmp(&other.name))
            .then(self.lsb.cmp(&other.lsb))
            .then(self.msb.cmp(&other.msb))
            .then(self.class.group().cmp(&other.class.group()))
    }
}

impl PartialOrd for RegisterRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for RegisterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reg_{}/{}{{{}}}[{},{}]",
            self.name.0, self.stack, self.class, self.lsb, self.msb
        )
    }
}

#[cfg(feature = "borsh")]
impl borsh::BorshSerialize for RegisterRef {
    fn serialize<W: borsh::io::Write>(&self, writer: &mut W) -> borsh::io::Result<()> {
        self.name.0.serialize(writer)?;
        self.class.to_u32().serialize(writer)?;
        self.lsb.serialize(writer)?;
        self.msb.serialize(writer)?;
        self.stack.serialize(writer)
    }
}

#[cfg(feature = "borsh")]
impl borsh::BorshDeserialize for RegisterRef {
    fn deserialize_reader<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<Self> {
        let name = RegName(i32::deserialize_reader(reader)?);
        let raw_class = u32::deserialize_reader(reader)?;
        let class = RegisterClass::try_from_u32(raw_class).map_err(|e| {
            borsh::io::Error::new(borsh::io::ErrorKind::InvalidData, e.to_string())
        })?;
        let lsb = i32::deserialize_reader(reader)?;
        let msb = i32::deserialize_reader(reader)?;
        let stack = i16::deserialize_reader(reader)?;
        Ok(Self {
            name,
            class,
            lsb,
            msb,
            stack,
        })
    }
}
