pub mod cpu;
pub mod dictionary;
pub mod errors;
pub mod frame;
pub mod header;
pub mod host;
pub mod instruction;
pub mod machine;
pub mod memory;
pub mod object;
pub mod rand;
pub mod zscii;

pub use errors::ZmError;
pub use header::{Header, ZMachineVersion};
pub use host::{Host, HostInput, StatusRight};
pub use machine::{MachineState, ZMachine};
