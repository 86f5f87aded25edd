//! Terms: the atomic summands of a symbolic address formula.
//!
//! A [`Term`] is an exact rational coefficient attached to a symbolic value
//! whose origin is known: a register definition, the result of a load, a
//! call, a fixed memory slot, a stack slot, or the constant `1`. The
//! provenance `(pc, uop_index)` names the micro-operation that defined the
//! value.
//!
//! Two notions of "sameness" coexist and must not be confused:
//!
//! - [`Term::same_term`] (term identity) ignores the coefficient. It decides
//!   whether two terms are the same symbol and can be merged or aligned.
//! - `==` ([`PartialEq`]) is full structural equality, coefficient included,
//!   and ignores the transient `must_expand` marker.
use std::{
    cmp::Ordering,
    ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use afinstr::{Address, RegisterRef};
use strum::{Display, EnumIs, EnumIter, FromRepr};

/// Signed coefficient numerator.
pub type Coeff = i64;

/// Unsigned coefficient denominator.
pub type UCoeff = u64;

/// Greatest common divisor, defined as `0` when either argument is `0`.
pub fn gcd(a: UCoeff, b: UCoeff) -> UCoeff {
    if a == 0 || b == 0 {
        return 0;
    }
    let (mut a, mut b) = if a > b { (b, a % b) } else { (a, b % a) };
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// What a term stands for.
///
/// The discriminant is the persisted representation and also the primary key
/// of the canonical order: constants always sort last.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Display, EnumIs, EnumIter, FromRepr)]
#[repr(u32)]
pub enum TermKind {
    /// Value whose origin could not be determined.
    #[default]
    Unknown = 0,
    /// Result of a function call; `aux_info` holds the call target.
    Call = 1,
    /// Load from a fixed memory location; `aux_info` identifies the slot.
    Reference = 2,
    /// Load from a stack slot; `aux_info` identifies the slot.
    Stack = 3,
    /// Register written by a load.
    Load = 4,
    /// Register definition.
    Register = 5,
    /// The constant `1`, scaled by the coefficient.
    Constant = 6,
}

impl TermKind {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Register and load terms carry a register reference.
    pub fn has_register(self) -> bool {
        matches!(self, TermKind::Register | TermKind::Load)
    }

    /// Reference and stack terms are identified by their slot, not by the
    /// instruction that loaded them.
    pub fn is_slot(self) -> bool {
        matches!(self, TermKind::Reference | TermKind::Stack)
    }
}

/// One summand `value_num / value_den * symbol` of an address formula.
#[derive(Debug, Clone, Copy)]
pub struct Term {
    pub(crate) value_num: Coeff,
    pub(crate) value_den: UCoeff,
    pub(crate) kind: TermKind,
    pub(crate) pc: Address,
    pub(crate) uop_index: i32,
    pub(crate) aux_info: u64,
    pub(crate) register: RegisterRef,
    pub(crate) must_expand: bool,
}

impl Default for Term {
    fn default() -> Self {
        Self {
            value_num: 0,
            value_den: 1,
            kind: TermKind::Unknown,
            pc: 0,
            uop_index: 0,
            aux_info: 0,
            register: RegisterRef::default(),
            must_expand: false,
        }
    }
}

impl Term {
    fn with_provenance(value: Coeff, kind: TermKind, pc: Address, uop_index: i32) -> Self {
        Self {
            value_num: value,
            kind,
            pc,
            uop_index,
            ..Default::default()
        }
    }

    /// The integer constant `value`.
    pub fn constant(value: Coeff) -> Self {
        Self::with_provenance(value, TermKind::Constant, 0, 0)
    }

    /// `coeff` times the value of `register` as defined at `(pc, uop_index)`.
    pub fn register(coeff: Coeff, pc: Address, uop_index: i32, register: RegisterRef) -> Self {
        Self {
            register,
            ..Self::with_provenance(coeff, TermKind::Register, pc, uop_index)
        }
    }

    /// `coeff` times the value loaded into `register` at `(pc, uop_index)`.
    pub fn load(coeff: Coeff, pc: Address, uop_index: i32, register: RegisterRef) -> Self {
        Self {
            register,
            ..Self::with_provenance(coeff, TermKind::Load, pc, uop_index)
        }
    }

    /// `coeff` times the content of the fixed memory slot `slot`.
    pub fn reference(coeff: Coeff, pc: Address, uop_index: i32, slot: u64) -> Self {
        Self {
            aux_info: slot,
            ..Self::with_provenance(coeff, TermKind::Reference, pc, uop_index)
        }
    }

    /// `coeff` times the content of the stack slot `slot`.
    pub fn stack(coeff: Coeff, pc: Address, uop_index: i32, slot: u64) -> Self {
        Self {
            aux_info: slot,
            ..Self::with_provenance(coeff, TermKind::Stack, pc, uop_index)
        }
    }

    /// `coeff` times the value returned by a call to `target`.
    pub fn call(coeff: Coeff, pc: Address, uop_index: i32, target: u64) -> Self {
        Self {
            aux_info: target,
            ..Self::with_provenance(coeff, TermKind::Call, pc, uop_index)
        }
    }

    /// `coeff` times a value of unknown origin defined at `(pc, uop_index)`.
    pub fn unknown(coeff: Coeff, pc: Address, uop_index: i32) -> Self {
        Self::with_provenance(coeff, TermKind::Unknown, pc, uop_index)
    }

    /// Mark the term for further expansion by the slicing driver.
    pub fn with_must_expand(mut self, must_expand: bool) -> Self {
        self.must_expand = must_expand;
        self
    }

    #[inline]
    pub fn value_num(&self) -> Coeff {
        self.value_num
    }

    #[inline]
    pub fn value_den(&self) -> UCoeff {
        self.value_den
    }

    #[inline]
    pub fn kind(&self) -> TermKind {
        self.kind
    }

    /// Address of the instruction that defined the value.
    #[inline]
    pub fn pc(&self) -> Address {
        self.pc
    }

    #[inline]
    pub fn uop_index(&self) -> i32 {
        self.uop_index
    }

    #[inline]
    pub fn aux_info(&self) -> u64 {
        self.aux_info
    }

    /// Register reference; meaningful only for register and load terms.
    #[inline]
    pub fn register_ref(&self) -> &RegisterRef {
        &self.register
    }

    #[inline]
    pub fn must_expand(&self) -> bool {
        self.must_expand
    }

    pub fn is_nil(&self) -> bool {
        self.value_num == 0
    }

    pub fn is_defined(&self) -> bool {
        self.kind != TermKind::Unknown
    }

    /// Approximate coefficient, for display and heuristics only.
    pub fn value(&self) -> f64 {
        self.value_num as f64 / self.value_den as f64
    }

    /// True if the coefficient is exactly the integer `value`.
    pub fn has_value(&self, value: Coeff) -> bool {
        self.value_num == value * self.value_den as Coeff
    }

    /// Exact coefficient comparison through cross multiplication.
    pub fn same_value(&self, other: &Term) -> bool {
        self.value_num * other.value_den as Coeff == other.value_num * self.value_den as Coeff
    }

    /// Term identity: the two terms denote the same symbol, whatever their
    /// coefficients.
    pub fn same_term(&self, other: &Term) -> bool {
        self.canonical_cmp(other) == Ordering::Equal
    }

    /// Canonical order used to keep formulas sorted and mergeable.
    ///
    /// Terms compare by kind first. Constants are all equivalent. Reference
    /// and stack terms compare by slot. Every other kind compares by
    /// provenance, then register and load terms by register.
    pub fn canonical_cmp(&self, other: &Term) -> Ordering {
        match self.kind.cmp(&other.kind) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.kind {
            TermKind::Constant => Ordering::Equal,
            TermKind::Reference | TermKind::Stack => self.aux_info.cmp(&other.aux_info),
            kind => {
                let ord = self
                    .pc
                    .cmp(&other.pc)
                    .then(self.uop_index.cmp(&other.uop_index));
                if kind.has_register() {
                    ord.then_with(|| self.register.cmp(&other.register))
                } else {
                    ord
                }
            }
        }
    }

    fn reduce(&mut self) {
        if self.value_num != 0 {
            let g = gcd(self.value_num.unsigned_abs(), self.value_den);
            if g > 1 {
                self.value_num /= g as Coeff;
                self.value_den /= g;
            }
        }
    }

    /// Add `num / den` to the coefficient over the least common denominator.
    fn accumulate(&mut self, num: Coeff, den: UCoeff) {
        let g = gcd(self.value_den, den);
        let (lhs_scale, rhs_scale) = (den / g, self.value_den / g);
        let value_num = Coeff::try_from(lhs_scale)
            .ok()
            .and_then(|scale| self.value_num.checked_mul(scale))
            .zip(
                Coeff::try_from(rhs_scale)
                    .ok()
                    .and_then(|scale| num.checked_mul(scale)),
            )
            .and_then(|(lhs, rhs)| lhs.checked_add(rhs));
        let value_den = self.value_den.checked_mul(lhs_scale);
        match (value_num, value_den) {
            (Some(value_num), Some(value_den)) => {
                self.value_num = value_num;
                self.value_den = value_den;
            }
            _ => overflow(),
        }
        self.reduce();
    }

    fn reduce_scaled(&mut self) {
        self.reduce();
        if self.kind == TermKind::Constant {
            self.value_num /= self.value_den as Coeff;
            self.value_den = 1;
        }
    }
}

/// Coefficients are exact 64-bit rationals; leaving that range is a defect.
#[cold]
fn overflow() -> ! {
    panic!("term coefficient overflows 64 bits")
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.value_num == other.value_num
            && self.value_den == other.value_den
            && self.kind == other.kind
            && self.pc == other.pc
            && self.uop_index == other.uop_index
            && self.aux_info == other.aux_info
            && (!self.kind.has_register() || self.register == other.register)
    }
}

impl Add for Term {
    type Output = Term;

    fn add(mut self, rhs: Term) -> Term {
        self += rhs;
        self
    }
}

impl AddAssign for Term {
    fn add_assign(&mut self, rhs: Term) {
        assert_eq!(self.kind, rhs.kind, "adding terms of different kinds");
        self.accumulate(rhs.value_num, rhs.value_den);
        self.must_expand |= rhs.must_expand;
    }
}

impl Sub for Term {
    type Output = Term;

    fn sub(mut self, rhs: Term) -> Term {
        self -= rhs;
        self
    }
}

impl SubAssign for Term {
    fn sub_assign(&mut self, rhs: Term) {
        assert_eq!(self.kind, rhs.kind, "subtracting terms of different kinds");
        let num = rhs.value_num.checked_neg().unwrap_or_else(|| overflow());
        self.accumulate(num, rhs.value_den);
        self.must_expand |= rhs.must_expand;
    }
}

impl Mul<Coeff> for Term {
    type Output = Term;

    fn mul(mut self, factor: Coeff) -> Term {
        self *= factor;
        self
    }
}

impl MulAssign<Coeff> for Term {
    fn mul_assign(&mut self, factor: Coeff) {
        self.value_num = self.value_num.checked_mul(factor).unwrap_or_else(|| overflow());
        self.reduce_scaled();
    }
}

impl Div<UCoeff> for Term {
    type Output = Term;

    fn div(mut self, factor: UCoeff) -> Term {
        self /= factor;
        self
    }
}

impl DivAssign<UCoeff> for Term {
    fn div_assign(&mut self, factor: UCoeff) {
        assert!(factor != 0, "dividing a term by zero");
        self.value_den = self.value_den.checked_mul(factor).unwrap_or_else(|| overflow());
        self.reduce_scaled();
    }
}

impl Neg for Term {
    type Output = Term;

    fn neg(mut self) -> Term {
        self.value_num = -self.value_num;
        self
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value_num < 0 {
            write!(f, "-")?;
        }
        let magnitude = self.value_num.unsigned_abs();
        if magnitude != 1 || self.kind == TermKind::Constant {
            write!(f, "{magnitude:#x}")?;
        }
        match self.kind {
            TermKind::Register => write!(
                f,
                " {}({:#x},{})",
                self.register, self.pc, self.uop_index
            )?,
            TermKind::Load => write!(
                f,
                " LoadTo{}({:#x},{})",
                self.register, self.pc, self.uop_index
            )?,
            TermKind::Call => write!(
                f,
                " CallTo[{:#x}]({:#x},{})",
                self.aux_info, self.pc, self.uop_index
            )?,
            TermKind::Reference => write!(
                f,
                " Load[{:#x}]({:#x},{})",
                self.aux_info, self.pc, self.uop_index
            )?,
            TermKind::Stack => write!(
                f,
                " Stack[{:#x}]({:#x},{})",
                self.aux_info, self.pc, self.uop_index
            )?,
            TermKind::Unknown => write!(f, " UNKN")?,
            TermKind::Constant => {}
        }
        if self.value_den != 1 {
            write!(f, "/{:#x}", self.value_den)?;
        }
        if self.must_expand {
            write!(f, "(*X*)")?;
        }
        Ok(())
    }
}
