//! Formulas: canonical sums of terms.
//!
//! A [`Formula`] keeps its terms sorted by [`Term::canonical_cmp`] with at most
//! one term per symbol. Adding a term whose symbol is already present merges
//! the coefficients; a merge that cancels the coefficient removes the term.
//! Freshly inserted terms are kept even when their coefficient is zero, so
//! consumers must tolerate zero-valued terms (typically a trailing constant).
//!
//! A formula also records whether it lost track of the exact address
//! ([`AccessFlags::IRREGULAR`]) or depends on a value loaded from memory
//! ([`AccessFlags::INDIRECT`]). Both flags are OR-combined by arithmetic.
//!
//! A formula that was never computed is *uninitialized*; this is distinct
//! from the initialized zero formula, which simply has no terms.
use std::{
    cmp::Ordering,
    ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign},
};

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::term::{Coeff, Term, TermKind, UCoeff};

/// Number of terms stored inline before a formula spills to the heap.
pub const FORMULA_INLINE_TERMS: usize = 4;

type TermVec = SmallVec<Term, FORMULA_INLINE_TERMS>;

bitflags! {
    /// Taint flags carried by a formula. The bit values are persisted.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// The address depends on a value loaded from memory.
        const INDIRECT = 1;
        /// The address could not be tracked precisely.
        const IRREGULAR = 2;
    }
}

/// An exact linear combination of [`Term`]s in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    terms: TermVec,
    access: AccessFlags,
    initialized: bool,
}

impl Default for Formula {
    /// The default formula is uninitialized.
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl Formula {
    /// A formula that has not been computed yet.
    pub fn uninitialized() -> Self {
        Self {
            terms: TermVec::new(),
            access: AccessFlags::empty(),
            initialized: false,
        }
    }

    /// The computed formula `0`.
    pub fn zero() -> Self {
        Self {
            initialized: true,
            ..Self::uninitialized()
        }
    }

    /// A formula holding a single term. A nil term yields the zero formula.
    pub fn from_term(term: Term) -> Self {
        let mut formula = Self::zero();
        if !term.is_nil() {
            formula.terms.push(term);
        }
        formula
    }

    /// Rebuild a formula from terms already in canonical order.
    pub(crate) fn from_parts(
        terms: impl IntoIterator<Item = Term>,
        access: AccessFlags,
        initialized: bool,
    ) -> Self {
        Self {
            terms: terms.into_iter().collect(),
            access,
            initialized,
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        !self.initialized
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms in canonical order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Term> {
        self.terms.iter()
    }

    /// The constant term, if any. It is always the last term.
    pub fn constant_term(&self) -> Option<&Term> {
        self.terms.last().filter(|t| t.kind() == TermKind::Constant)
    }

    /// Reset to the initialized zero formula, dropping the taint flags.
    pub fn clear(&mut self) {
        self.terms.clear();
        self.access = AccessFlags::empty();
        self.initialized = true;
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access
    }

    pub fn has_indirect_access(&self) -> bool {
        self.access.contains(AccessFlags::INDIRECT)
    }

    pub fn has_irregular_access(&self) -> bool {
        self.access.contains(AccessFlags::IRREGULAR)
    }

    pub fn mark_indirect(&mut self) {
        self.access |= AccessFlags::INDIRECT;
    }

    pub fn mark_irregular(&mut self) {
        self.access |= AccessFlags::IRREGULAR;
    }

    /// Add `term`, merging it with the term of the same symbol if present.
    ///
    /// Adding to an uninitialized formula does not initialize it; start from
    /// [`Formula::zero`] to accumulate terms.
    pub fn add(&mut self, term: Term) {
        self.merge(term, false);
    }

    /// Subtract `term`, merging it with the term of the same symbol if present.
    pub fn subtract(&mut self, term: Term) {
        self.merge(term, true);
    }

    fn merge(&mut self, term: Term, negate: bool) {
        match self.terms.binary_search_by(|t| t.canonical_cmp(&term)) {
            Ok(idx) => {
                let current = self.terms[idx];
                let merged = if negate { current - term } else { current + term };
                if merged.is_nil() {
                    self.terms.remove(idx);
                } else {
                    self.terms[idx] = merged;
                }
            }
            Err(idx) => self.terms.insert(idx, if negate { -term } else { term }),
        }
    }

    /// Pairwise merge of two canonical term sequences.
    fn combine(&self, other: &Formula, negate: bool) -> Formula {
        let (lhs, rhs) = (&self.terms, &other.terms);
        let mut terms = TermVec::with_capacity(lhs.len() + rhs.len());
        let (mut i, mut j) = (0, 0);
        let signed = |t: Term| if negate { -t } else { t };

        while i < lhs.len() && j < rhs.len() {
            match lhs[i].canonical_cmp(&rhs[j]) {
                Ordering::Less => {
                    terms.push(lhs[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    terms.push(signed(rhs[j]));
                    j += 1;
                }
                Ordering::Equal => {
                    let merged = if negate {
                        lhs[i] - rhs[j]
                    } else {
                        lhs[i] + rhs[j]
                    };
                    if !merged.is_nil() {
                        terms.push(merged);
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        terms.extend(lhs[i..].iter().copied());
        terms.extend(rhs[j..].iter().copied().map(signed));

        Formula {
            terms,
            access: self.access | other.access,
            initialized: self.initialized && other.initialized,
        }
    }
}

impl<'a> IntoIterator for &'a Formula {
    type Item = &'a Term;
    type IntoIter = std::slice::Iter<'a, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.iter()
    }
}

impl FromIterator<Term> for Formula {
    /// Accumulate terms into an initialized formula.
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Self {
        let mut formula = Formula::zero();
        formula.extend(iter);
        formula
    }
}

impl Extend<Term> for Formula {
    fn extend<I: IntoIterator<Item = Term>>(&mut self, iter: I) {
        for term in iter {
            self.add(term);
        }
    }
}

impl Add<&Formula> for &Formula {
    type Output = Formula;

    fn add(self, rhs: &Formula) -> Formula {
        self.combine(rhs, false)
    }
}

impl Add for Formula {
    type Output = Formula;

    fn add(self, rhs: Formula) -> Formula {
        self.combine(&rhs, false)
    }
}

impl AddAssign<&Formula> for Formula {
    fn add_assign(&mut self, rhs: &Formula) {
        *self = self.combine(rhs, false);
    }
}

impl Sub<&Formula> for &Formula {
    type Output = Formula;

    fn sub(self, rhs: &Formula) -> Formula {
        self.combine(rhs, true)
    }
}

impl Sub for Formula {
    type Output = Formula;

    fn sub(self, rhs: Formula) -> Formula {
        self.combine(&rhs, true)
    }
}

impl SubAssign<&Formula> for Formula {
    fn sub_assign(&mut self, rhs: &Formula) {
        *self = self.combine(rhs, true);
    }
}

impl MulAssign<Coeff> for Formula {
    /// Scaling by zero yields the zero formula and drops the taint flags.
    fn mul_assign(&mut self, factor: Coeff) {
        if factor == 0 {
            self.terms.clear();
            self.access = AccessFlags::empty();
            return;
        }
        for term in self.terms.iter_mut() {
            *term *= factor;
        }
    }
}

impl Mul<Coeff> for &Formula {
    type Output = Formula;

    fn mul(self, factor: Coeff) -> Formula {
        let mut scaled = self.clone();
        scaled *= factor;
        scaled
    }
}

impl Mul<Coeff> for Formula {
    type Output = Formula;

    fn mul(mut self, factor: Coeff) -> Formula {
        self *= factor;
        self
    }
}

impl DivAssign<UCoeff> for Formula {
    fn div_assign(&mut self, factor: UCoeff) {
        assert!(factor != 0, "dividing a formula by zero");
        if factor == 1 {
            return;
        }
        for term in self.terms.iter_mut() {
            *term /= factor;
        }
    }
}

impl Div<UCoeff> for &Formula {
    type Output = Formula;

    fn div(self, factor: UCoeff) -> Formula {
        let mut scaled = self.clone();
        scaled /= factor;
        scaled
    }
}

impl Div<UCoeff> for Formula {
    type Output = Formula;

    fn div(mut self, factor: UCoeff) -> Formula {
        self /= factor;
        self
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_uninitialized() {
            write!(f, "UNINITIALIZED_FORMULA")?;
        } else if self.terms.is_empty() {
            write!(f, "0")?;
        } else {
            for (idx, term) in self.terms.iter().enumerate() {
                if idx > 0 {
                    write!(f, " + ")?;
                }
                write!(f, "{term}")?;
            }
        }
        if self.has_indirect_access() {
            write!(f, " [HAS_INDIRECT]")?;
        }
        if self.has_irregular_access() {
            write!(f, " [HAS_IRREGULAR]")?;
        }
        Ok(())
    }
}
