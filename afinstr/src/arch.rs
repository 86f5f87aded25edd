//! Architectural register predicates.
//!
//! The formula algebra needs to recognize a handful of special registers
//! (stack pointer, instruction pointer) without knowing how a decoder numbers
//! its registers. An [`Isa`] answers those questions for one register table.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

use crate::{
    register::{RegName, RegisterClass, RegisterRef},
    utils::Error,
};

/// Architectural knowledge required by the formula algebra.
pub trait Isa {
    /// Short name of the architecture, used in log messages.
    fn name(&self) -> &'static str;

    /// True if `reg` is (a view of) the architectural stack pointer.
    fn is_stack_pointer(&self, reg: &RegisterRef) -> bool;

    /// True if `reg` is (a view of) the architectural instruction pointer.
    fn is_instruction_pointer(&self, reg: &RegisterRef) -> bool;

    /// Human readable register name, if the register belongs to this ISA.
    fn register_name(&self, _reg: &RegisterRef) -> Option<String> {
        None
    }
}

/// x86-64 general purpose registers.
///
/// Each register family occupies four consecutive values (64, 32, 16 and
/// 8-bit views) so that the enclosing 64-bit register is recovered by masking
/// the low two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Display, EnumIter, FromRepr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[strum(serialize_all = "lowercase")]
#[repr(i32)]
#[rustfmt::skip]
pub enum X86Reg {
    Rax = 0, Eax, Ax, Al,
    Rcx = 4, Ecx, Cx, Cl,
    Rdx = 8, Edx, Dx, Dl,
    Rbx = 12, Ebx, Bx, Bl,
    Rsp = 16, Esp, Sp, Spl,
    Rbp = 20, Ebp, Bp, Bpl,
    Rsi = 24, Esi, Si, Sil,
    Rdi = 28, Edi, Di, Dil,
    R8 = 32, R8d, R8w, R8b,
    R9 = 36, R9d, R9w, R9b,
    R10 = 40, R10d, R10w, R10b,
    R11 = 44, R11d, R11w, R11b,
    R12 = 48, R12d, R12w, R12b,
    R13 = 52, R13d, R13w, R13b,
    R14 = 56, R14d, R14w, R14b,
    R15 = 60, R15d, R15w, R15b,
    Rip = 64, Eip, Ip,
}

impl X86Reg {
    /// Numeric register name used inside [`RegisterRef`].
    pub fn reg_name(self) -> RegName {
        RegName(self as i32)
    }

    /// Look up a register from its numeric name.
    pub fn from_reg_name(name: RegName) -> Result<Self, Error> {
        Self::from_repr(name.0).ok_or(Error::UnknownRegister {
            isa: X86_64.name(),
            name: name.0,
        })
    }

    /// The 64-bit register that contains this view.
    pub fn largest_enclosing(self) -> X86Reg {
        // Every family starts with its 64-bit member.
        Self::from_repr(self as i32 & !3).unwrap_or(self)
    }

    /// Width of the view in bits.
    pub fn bits(self) -> i32 {
        match self as i32 & 3 {
            0 => 64,
            1 => 32,
            2 => 16,
            _ => 8,
        }
    }
}

/// The x86-64 register table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct X86_64;

impl X86_64 {
    /// Build a reference to the full width of `reg`, used as `class`.
    pub fn register(reg: X86Reg, class: RegisterClass) -> RegisterRef {
        RegisterRef::with_range(reg.reg_name(), class, 0, reg.bits() - 1)
    }

    fn flat_register(reg: &RegisterRef) -> Option<X86Reg> {
        if reg.class == RegisterClass::TempReg || reg.stack != 0 {
            return None;
        }
        X86Reg::from_repr(reg.name.0)
    }
}

impl Isa for X86_64 {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn is_stack_pointer(&self, reg: &RegisterRef) -> bool {
        Self::flat_register(reg).is_some_and(|r| r.largest_enclosing() == X86Reg::Rsp)
    }

    fn is_instruction_pointer(&self, reg: &RegisterRef) -> bool {
        Self::flat_register(reg).is_some_and(|r| r.largest_enclosing() == X86Reg::Rip)
    }

    fn register_name(&self, reg: &RegisterRef) -> Option<String> {
        X86Reg::from_repr(reg.name.0).map(|r| r.to_string())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_view_of_rsp_is_the_stack_pointer() {
        for reg in [X86Reg::Rsp, X86Reg::Esp, X86Reg::Sp, X86Reg::Spl] {
            assert!(X86_64.is_stack_pointer(&X86_64::register(reg, RegisterClass::MemOp)));
        }
        assert!(!X86_64.is_stack_pointer(&X86_64::register(X86Reg::Rbp, RegisterClass::MemOp)));
    }

    #[test]
    fn temporaries_and_stacked_registers_are_never_special() {
        let tmp = X86_64::register(X86Reg::Rsp, RegisterClass::TempReg);
        assert!(!X86_64.is_stack_pointer(&tmp));

        let mut stacked = X86_64::register(X86Reg::Rsp, RegisterClass::StackReg);
        stacked.stack = 2;
        assert!(!X86_64.is_stack_pointer(&stacked));
    }

    #[test]
    fn families_resolve_to_their_64_bit_register() {
        for reg in X86Reg::iter() {
            let wide = reg.largest_enclosing();
            assert_eq!(wide.bits(), 64, "{reg} encloses into {wide}");
            assert_eq!(wide.largest_enclosing(), wide);
        }
        assert_eq!(X86Reg::R12b.largest_enclosing(), X86Reg::R12);
        let eip = X86_64::register(X86Reg::Eip, RegisterClass::RegOp);
        assert!(X86_64.is_instruction_pointer(&eip));
    }

    #[test]
    fn register_names_round_trip() {
        let reg = X86_64::register(X86Reg::R9d, RegisterClass::RegOp);
        assert_eq!(X86_64.register_name(&reg).as_deref(), Some("r9d"));
        assert_eq!(X86Reg::from_reg_name(reg.name), Ok(X86Reg::R9d));
        assert!(X86Reg::from_reg_name(RegName(1000)).is_err());
    }
}
