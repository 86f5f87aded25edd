//! Symbolic address formulas for memory reference analysis.
//!
//! A memory operand's address is described as an exact linear combination of
//! provenance-tagged [`term::Term`]s. [`formula::Formula`] keeps those sums in
//! canonical order, [`algebra`] compares and classifies them, [`refs`] stores
//! the base and stride formulas of every memory operand of a routine, and
//! [`persist`] caches them on disk between runs.
//!
//! The crate does not build formulas itself; a slicing pass feeds terms into
//! formulas through [`formula::Formula::add`] and stores the results with
//! [`refs::RefFormulasMap::entry`].

pub mod algebra;
pub mod base;
pub mod formula;
pub mod magic;
pub mod persist;
pub mod refs;
pub mod term;
pub mod utils;

pub use base::AnalysisContext;
pub use formula::{AccessFlags, Formula};
pub use refs::{RefFormulas, RefFormulasMap};
pub use term::{Coeff, Term, TermKind, UCoeff};
pub use utils::error::{AfError, AfResult};
