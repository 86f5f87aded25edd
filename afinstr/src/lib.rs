//! Machine-level vocabulary shared by the producers and the consumers of
//! symbolic address formulas.
//!
//! Decoding machine code is not the business of this crate. It only defines
//! the small set of types a decoded micro-operation hands over to the formula
//! engine:
//!
//! - [`Address`]: an instruction address inside the analyzed image.
//! - [`register::RegisterRef`]: a register (or a bit range of one) as seen by a
//!   micro-operation, together with its usage class.
//! - [`arch::Isa`]: architectural predicates ("is this the stack pointer?")
//!   that the formula algebra needs but cannot know by itself.

pub mod arch;
pub mod register;
pub mod utils;

/// Instruction address inside the analyzed image.
pub type Address = u64;

pub use arch::{Isa, X86_64};
pub use register::{RegName, RegisterClass, RegisterRef};
