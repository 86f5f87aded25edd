//! Predicates and relations over [`Formula`]s.
//!
//! Every routine is a pure function of its inputs. An uninitialized input is
//! reported with a `warn!` and the routine answers negatively (`false`,
//! `None` or `0`); it never panics on it.
//!
//! Two-formula routines walk both term sequences in lock step, relying on the
//! canonical order to align identical terms.
use afinstr::{Address, Isa};
use log::warn;

use crate::{
    formula::Formula,
    term::{Coeff, Term, TermKind, UCoeff, gcd},
};

fn rejects_uninitialized(routine: &str, formulas: &[&Formula]) -> bool {
    if formulas.iter().any(|f| f.is_uninitialized()) {
        warn!("{routine}: formula is uninitialized");
        true
    } else {
        false
    }
}

/// Cross-multiplied coefficients of two aligned terms.
#[inline]
fn cross(t1: &Term, t2: &Term) -> (Coeff, Coeff) {
    (
        t1.value_num() * t2.value_den() as Coeff,
        t2.value_num() * t1.value_den() as Coeff,
    )
}

/// Tracks the single reduced ratio `factor1 : factor2` shared by every
/// aligned pair of terms.
struct RatioTracker {
    factors: Option<(Coeff, Coeff)>,
}

enum RatioStep {
    /// Both coefficients are zero; the pair does not constrain the ratio.
    Skip,
    /// The pair agrees with the ratio (or established it).
    Consistent,
    Inconsistent,
}

impl RatioTracker {
    fn new() -> Self {
        Self { factors: None }
    }

    fn feed(&mut self, t1: &Term, t2: &Term) -> RatioStep {
        let (mut c1, mut c2) = cross(t1, t2);
        if c1 < 0 && c2 < 0 {
            c1 = -c1;
            c2 = -c2;
        }
        if c1 == 0 && c2 == 0 {
            return RatioStep::Skip;
        }
        if c1 == 0 || c2 == 0 {
            return RatioStep::Inconsistent;
        }
        let g = gcd(c1.unsigned_abs(), c2.unsigned_abs()) as Coeff;
        let reduced = (c1 / g, c2 / g);
        match self.factors {
            None => {
                self.factors = Some(reduced);
                RatioStep::Consistent
            }
            Some(factors) if factors == reduced => RatioStep::Consistent,
            Some(_) => RatioStep::Inconsistent,
        }
    }
}

/// True iff both formulas carry the same taint flags and their difference
/// reduces to the constant `0`.
///
/// Unlike [`formulas_equal`], a zero constant present on one side only does
/// not make the formulas differ.
pub fn formulas_identical(f1: &Formula, f2: &Formula) -> bool {
    if rejects_uninitialized("formulas_identical", &[f1, f2]) {
        return false;
    }
    if f1.access_flags() != f2.access_flags() {
        return false;
    }
    matches!(is_constant_formula(&(f1 - f2)), Some((0, _)))
}

/// Term-by-term equality: same symbols in the same order with equal
/// coefficients.
pub fn formulas_equal(f1: &Formula, f2: &Formula) -> bool {
    if rejects_uninitialized("formulas_equal", &[f1, f2]) {
        return false;
    }
    f1.len() == f2.len()
        && f1.iter().zip(f2.iter()).all(|(t1, t2)| {
            let (c1, c2) = cross(t1, t2);
            t1.same_term(t2) && c1 == c2
        })
}

/// Find `(factor1, factor2)` such that `f1 / factor1 == f2 / factor2`.
///
/// Returns `Some((0, 0))` when no aligned pair carries a nonzero coefficient.
/// A single trailing zero constant on either formula is tolerated.
pub fn has_integer_ratio(f1: &Formula, f2: &Formula) -> Option<(Coeff, Coeff)> {
    if rejects_uninitialized("has_integer_ratio", &[f1, f2]) {
        return None;
    }
    let (terms1, terms2) = (f1.terms(), f2.terms());
    let mut tracker = RatioTracker::new();

    for (t1, t2) in terms1.iter().zip(terms2.iter()) {
        if !t1.same_term(t2) {
            return None;
        }
        if let RatioStep::Inconsistent = tracker.feed(t1, t2) {
            return None;
        }
    }

    let common = terms1.len().min(terms2.len());
    let rest = if terms1.len() > common {
        &terms1[common..]
    } else {
        &terms2[common..]
    };
    match rest {
        [] => {}
        [last] if last.kind() == TermKind::Constant && last.is_nil() => {}
        _ => return None,
    }

    Some(tracker.factors.unwrap_or((0, 0)))
}

/// Find `(ratio, remainder)` such that `f1 == ratio * f2 + remainder`, where
/// `remainder` is an integer constant.
///
/// Constant terms are set aside and only contribute to the remainder. The
/// symbolic parts must be proportional with `f2`'s factor equal to `±1`.
/// When both formulas are empty there is nothing to relate and `None` is
/// returned.
///
/// # Panics
///
/// Panics if a formula holds more than one constant term.
pub fn has_integer_ratio_and_remainder(f1: &Formula, f2: &Formula) -> Option<(Coeff, Coeff)> {
    if rejects_uninitialized("has_integer_ratio_and_remainder", &[f1, f2]) {
        return None;
    }
    let (terms1, terms2) = (f1.terms(), f2.terms());
    let (mut i, mut j) = (0, 0);
    let mut const1: Option<&Term> = None;
    let mut const2: Option<&Term> = None;
    let mut tracker = RatioTracker::new();

    while i < terms1.len() && j < terms2.len() {
        let (t1, t2) = (&terms1[i], &terms2[j]);
        if t1.kind() == TermKind::Constant || t2.kind() == TermKind::Constant {
            assert!(
                const1.is_none() && const2.is_none(),
                "formula holds more than one constant term"
            );
            if t1.kind() == TermKind::Constant {
                const1 = Some(t1);
                i += 1;
            }
            if t2.kind() == TermKind::Constant {
                const2 = Some(t2);
                j += 1;
            }
            continue;
        }

        if !t1.same_term(t2) {
            return None;
        }
        match tracker.feed(t1, t2) {
            RatioStep::Inconsistent => return None,
            RatioStep::Consistent if tracker.factors.is_some_and(|(_, f2)| f2.abs() != 1) => {
                return None;
            }
            _ => {}
        }
        i += 1;
        j += 1;
    }

    // Only a single trailing constant may remain on the longer formula.
    for (rest, slot) in [(&terms1[i..], &mut const1), (&terms2[j..], &mut const2)] {
        match rest {
            [] => {}
            [last] if last.kind() == TermKind::Constant => {
                assert!(slot.is_none(), "formula holds more than one constant term");
                *slot = Some(last);
            }
            _ => return None,
        }
    }

    let ratio = tracker.factors.map_or(0, |(factor1, factor2)| factor1 / factor2);
    let integral = |t: &Term| t.value_num() / t.value_den() as Coeff;
    let remainder = match (const1, const2) {
        (None, None) if tracker.factors.is_none() => {
            warn!("has_integer_ratio_and_remainder: both formulas are empty");
            return None;
        }
        (None, None) => 0,
        (Some(c1), None) => integral(c1),
        (None, Some(c2)) => -ratio * c2.value_num() / c2.value_den() as Coeff,
        (Some(c1), Some(_)) if tracker.factors.is_none() => integral(c1),
        (Some(c1), Some(c2)) => integral(c1) - ratio * c2.value_num() / c2.value_den() as Coeff,
    };
    Some((ratio, remainder))
}

/// Sign of the first term's coefficient; `0` for the zero formula.
pub fn sign_of_formula(f: &Formula) -> i32 {
    if rejects_uninitialized("sign_of_formula", &[f]) {
        return 0;
    }
    f.terms().first().map_or(0, |t| t.value_num().signum() as i32)
}

/// `Some((num, den))` iff every term of `f` is constant. The zero formula
/// yields `Some((0, 1))`.
pub fn is_constant_formula(f: &Formula) -> Option<(Coeff, UCoeff)> {
    if rejects_uninitialized("is_constant_formula", &[f]) {
        return None;
    }
    if f.iter().any(|t| t.kind() != TermKind::Constant) {
        return None;
    }
    Some(
        f.constant_term()
            .map_or((0, 1), |t| (t.value_num(), t.value_den())),
    )
}

/// The constant term of `f` as `(num, den)`, whatever its other terms.
pub fn has_constant_term(f: &Formula) -> Option<(Coeff, UCoeff)> {
    if rejects_uninitialized("has_constant_term", &[f]) {
        return None;
    }
    f.constant_term().map(|t| (t.value_num(), t.value_den()))
}

/// Integer value of the constant term, `0` if there is none.
pub fn constant_term_of(f: &Formula) -> Coeff {
    if rejects_uninitialized("constant_term_of", &[f]) {
        return 0;
    }
    f.constant_term()
        .map_or(0, |t| t.value_num() / t.value_den() as Coeff)
}

/// True if `f` references a register definition. Load terms do not count.
pub fn contains_register_term(f: &Formula) -> bool {
    if rejects_uninitialized("contains_register_term", &[f]) {
        return false;
    }
    f.iter().any(|t| t.kind() == TermKind::Register)
}

/// True if `f` references a fixed memory slot.
pub fn contains_reference_term(f: &Formula) -> bool {
    if rejects_uninitialized("contains_reference_term", &[f]) {
        return false;
    }
    f.iter().any(|t| t.kind() == TermKind::Reference)
}

/// If `f` is the stack pointer plus an optional constant, return the offset.
///
/// Every register term must be a view of the stack pointer of `isa` and at
/// least one must be present. Any other kind of term disqualifies `f`.
///
/// # Panics
///
/// Panics if `f` holds more than one constant term.
pub fn is_stack_reference<I: Isa + ?Sized>(f: &Formula, isa: &I) -> Option<Coeff> {
    if rejects_uninitialized("is_stack_reference", &[f]) {
        return None;
    }
    let mut has_sp = false;
    let mut offset = None;
    for term in f {
        match term.kind() {
            TermKind::Register if isa.is_stack_pointer(term.register_ref()) => has_sp = true,
            TermKind::Constant => {
                assert!(offset.is_none(), "formula holds more than one constant term");
                offset = Some(term.value_num());
            }
            _ => return None,
        }
    }
    has_sp.then(|| offset.unwrap_or(0))
}

/// True if some symbolic term has a coefficient that is not an integer.
pub fn has_complex_denominator(f: &Formula) -> bool {
    if rejects_uninitialized("has_complex_denominator", &[f]) {
        return false;
    }
    f.iter().any(|t| {
        t.kind() != TermKind::Constant
            && !t.is_nil()
            && t.value_den() != 1
            && gcd(t.value_num().unsigned_abs(), t.value_den()) != t.value_den()
    })
}

/// True if some symbolic term was defined at an address below `pc`.
pub fn defined_before_pc(f: &Formula, pc: Address) -> bool {
    if rejects_uninitialized("defined_before_pc", &[f]) {
        return false;
    }
    f.iter()
        .any(|t| t.kind() != TermKind::Constant && t.pc() < pc)
}

/// True if some symbolic term was defined at or after `end_pc`.
pub fn defined_after_pc(f: &Formula, end_pc: Address) -> bool {
    if rejects_uninitialized("defined_after_pc", &[f]) {
        return false;
    }
    f.iter()
        .any(|t| t.kind() != TermKind::Constant && t.pc() >= end_pc)
}
