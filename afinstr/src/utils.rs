use strum::{EnumIs, EnumTryAs};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Hash, EnumIs, EnumTryAs, Error)]
pub enum Error {
    /// A persisted register class does not map to any known class.
    #[error("Register class `{0}` is not a valid register class. Valid classes range from 0 to 7.")]
    InvalidRegisterClass(u32),

    /// A register name does not belong to the register table of an ISA.
    #[error("Register name `{name}` is not part of the `{isa}` register table.")]
    UnknownRegister { isa: &'static str, name: i32 },
}
