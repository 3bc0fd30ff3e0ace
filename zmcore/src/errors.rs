use thiserror::Error;

use crate::header::ZMachineVersion;

pub type ZmResult<T> = Result<T, ZmError>;

/// Every way the interpreter can halt a game in progress.
///
/// Per the spec these are the fault kinds; defaults (missing property ->
/// default value, `call 0` -> store 0, dictionary miss -> address 0,
/// out-of-range `random` -> reseed) are recovered locally and never
/// surface as a `ZmError`.
#[derive(Debug, Error)]
pub enum ZmError {
    #[error("story file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown Z-machine version V{0}")]
    UnknownVersion(u8),

    #[error("unsupported Z-machine version {0}, only V3 is supported")]
    UnsupportedVersion(ZMachineVersion),

    #[error("out of bounds memory access at byte {0:#08X}")]
    OutOfBounds(u32),

    #[error("write to read-only memory at byte {0:#08X}")]
    ReadOnly(u32),

    #[error("operation not allowed on the null object")]
    NullObject,

    #[error("object {0} has no property {1}")]
    NoProp(u8, u8),

    #[error("put_prop on object {object} property {property}: size {size} not in {{1, 2}}")]
    PropSize { object: u8, property: u8, size: u8 },

    #[error("division by zero")]
    DivZero,

    #[error("evaluation stack underflow")]
    StackUnderflow,

    #[error("call stack overflow")]
    StackOverflow,

    #[error("unsupported opcode: {form} form, opcode number {number:#04x}")]
    UnsupportedOpcode { form: &'static str, number: u8 },

    #[error("local variable {0} is not declared in the current frame")]
    InvalidLocal(u8),

    #[error("invalid ZSCII character code {0}")]
    InvalidZsciiCode(u16),

    #[error("malformed dictionary: {0}")]
    MalformedDictionary(&'static str),

    #[error("save data size mismatch: expected {expected} bytes, got {actual}")]
    SaveMismatch { expected: usize, actual: usize },
}
