use std::convert::TryFrom;
use std::fmt;

use bitflags::bitflags;

use crate::errors::{ZmError, ZmResult};
use crate::memory::{ZAddress, ZAddress::*, ZMemory};

/// The required Z-machine version, from 1 for V1 to 8 for V8.
///
/// Only `V3` is accepted by this interpreter (§1 Non-goals); the other
/// variants exist purely so an unsupported story file's actual version can
/// be named in the `UnsupportedVersion` fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZMachineVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
    V6 = 6,
    V7 = 7,
    V8 = 8,
}

use ZMachineVersion::*;

impl fmt::Display for ZMachineVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "V{}", *self as u8)
    }
}

impl TryFrom<u8> for ZMachineVersion {
    type Error = ZmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(V1),
            2 => Ok(V2),
            3 => Ok(V3),
            4 => Ok(V4),
            5 => Ok(V5),
            6 => Ok(V6),
            7 => Ok(V7),
            8 => Ok(V8),
            _ => Err(ZmError::UnknownVersion(value)),
        }
    }
}

bitflags! {
    /// Byte holding the Flags 1 game & interpreter information (V1 to V3).
    pub struct HeaderFlags1: u8 {
        /// Status line type is hours:min if set and score/turns if clear.
        const STATUS_LINE_TYPE = 0b_0000_0010;
        /// Is the story file split across two discs?
        const STORY_SPLIT_DISCS = 0b_0000_0100;
        /// Is the status line unavailable?
        const STATUS_LINE_UNAVAILABLE = 0b_0001_0000;
        /// Is screen-splitting available?
        const SCREEN_SPLITTING_AVAILABLE = 0b_0010_0000;
        /// Is a variable-pitch font the default?
        const VARIABLE_PITCH_FONT_IS_DEFAULT = 0b_0100_0000;
    }
}

bitflags! {
    /// Byte holding the Flags 2 information about game-requested features
    /// and global state. All request bits must stay clear for a V3 game
    /// except `ENABLE_TRANSCRIPTING` and `FORCE_PRINTING_FIXED_PITCH`,
    /// which a V3 game may legally set itself at runtime.
    pub struct HeaderFlags2: u16 {
        /// Set when transcripting is on. Can be set by the game at runtime.
        const ENABLE_TRANSCRIPTING = 0b_0000_0001;
        /// Force printing in fixed-pitch font. Can be set by the game at runtime.
        const FORCE_PRINTING_FIXED_PITCH = 0b_0000_0010;
    }
}

impl HeaderFlags2 {
    /// Bits a V3 interpreter is allowed to leave set after reconciling the
    /// header's requested flags with what this interpreter actually supports.
    fn allowed() -> Self {
        Self::ENABLE_TRANSCRIPTING | Self::FORCE_PRINTING_FIXED_PITCH
    }
}

/// Holds the decoded information from the loaded story's 64-byte header.
///
/// Reference: section 11 of the Standards Document
/// http://inform-fiction.org/zmachine/standards/z1point1/sect11.html
#[derive(Debug)]
pub struct Header {
    pub version: ZMachineVersion,
    pub flags1: HeaderFlags1,
    pub flags2: HeaderFlags2,
    /// Base of high memory.
    pub high_base: ZAddress,
    /// Initial value of the Program Counter.
    pub initial_pc: ZAddress,
    /// Location of the dictionary.
    pub dictionary_base: ZAddress,
    /// Location of the object table.
    pub object_table_base: ZAddress,
    /// Location of the global variables table.
    pub globals_base: ZAddress,
    /// Base of static memory.
    pub static_base: ZAddress,
    /// Location of the abbreviations table.
    pub abbreviations_base: ZAddress,
    /// Length of the file in bytes, as declared by the header (may be 0 in
    /// story files from before the length field was standardized; this
    /// interpreter treats that as "use the reader's actual byte count").
    pub file_length: usize,
    /// Checksum of all bytes from 0x40 to `file_length - 1`, modulo 0x10000.
    pub checksum: u16,
    /// Release number (offset 0x02).
    pub release: u16,
    /// Six-character ASCII serial number (offset 0x12).
    pub serial: String,
    /// Standard revision number this file claims to follow (offset 0x32).
    pub standard_revision: u16,
    /// Interpreter number and version this file was last run under (offset 0x1E).
    pub interpreter_number_and_version: u16,
}

impl Header {
    /// Parse the fixed 64-byte prefix of `memory`. Does not mutate memory;
    /// call `reset` afterwards to perform the interpreter's own startup
    /// rewrite of flags1/flags2.
    pub fn from_memory(memory: &ZMemory) -> ZmResult<Self> {
        let version_raw = memory.read_u8(Byte(0x00))?;
        let version = ZMachineVersion::try_from(version_raw)?;
        if version != V3 {
            return Err(ZmError::UnsupportedVersion(version));
        }

        let file_length_field = memory.read_u16(Byte(0x1A))? as usize * 2;
        let file_length = if file_length_field == 0 {
            memory.len()
        } else {
            file_length_field
        };

        let mut serial = String::with_capacity(6);
        for offset in 0x12..0x18 {
            serial.push(memory.read_u8(Byte(offset))? as char);
        }

        Ok(Header {
            version,
            flags1: HeaderFlags1::from_bits_truncate(memory.read_u8(Byte(0x01))?),
            flags2: HeaderFlags2::from_bits_truncate(memory.read_u16(Byte(0x10))?),
            high_base: Byte(memory.read_u16(Byte(0x04))?),
            initial_pc: Byte(memory.read_u16(Byte(0x06))?),
            dictionary_base: Byte(memory.read_u16(Byte(0x08))?),
            object_table_base: Byte(memory.read_u16(Byte(0x0A))?),
            globals_base: Byte(memory.read_u16(Byte(0x0C))?),
            static_base: Byte(memory.read_u16(Byte(0x0E))?),
            abbreviations_base: Byte(memory.read_u16(Byte(0x18))?),
            file_length,
            checksum: memory.read_u16(Byte(0x1C))?,
            release: memory.read_u16(Byte(0x02))?,
            serial,
            standard_revision: memory.read_u16(Byte(0x32))?,
            interpreter_number_and_version: memory.read_u16(Byte(0x1E))?,
        })
    }

    /// Recompute the story file's checksum the way the `verify` opcode does:
    /// the sum, modulo 0x10000, of every byte from 0x40 to `file_length - 1`.
    pub fn verify_checksum(&self, memory: &ZMemory) -> ZmResult<bool> {
        let mut sum: u32 = 0;
        for offset in 0x40..self.file_length.min(memory.len()) {
            sum = sum.wrapping_add(memory.read_byte_at(offset)? as u32);
        }
        Ok((sum & 0xFFFF) as u16 == self.checksum)
    }

    /// Rewrite flags1/flags2 to announce this interpreter's own capabilities
    /// and requested feature set, per R11.1. The only post-load write inside
    /// the header region. `has_status_line` and `has_screen_splitting`
    /// describe what the host can actually render.
    pub fn announce_capabilities(
        &mut self,
        memory: &mut ZMemory,
        has_status_line: bool,
        has_screen_splitting: bool,
    ) -> ZmResult<()> {
        let mut flags1 = HeaderFlags1::from_bits_truncate(memory.read_u8(Byte(0x01))?)
            & (HeaderFlags1::STATUS_LINE_TYPE | HeaderFlags1::STORY_SPLIT_DISCS);
        flags1.set(HeaderFlags1::STATUS_LINE_UNAVAILABLE, !has_status_line);
        flags1.set(
            HeaderFlags1::SCREEN_SPLITTING_AVAILABLE,
            has_screen_splitting,
        );
        self.flags1 = flags1;
        memory.write_u8_internal(Byte(0x01), flags1.bits())?;

        self.flags2 = HeaderFlags2::from_bits_truncate(memory.read_u16(Byte(0x10))?)
            & HeaderFlags2::allowed();
        memory.write_u16_internal(Byte(0x10), self.flags2.bits())?;

        // Mark this interpreter as following the 1.1 Z-machine Standards (R11.1.5).
        memory.write_u8_internal(Byte(0x32), 0x01)?; // n = 1
        memory.write_u8_internal(Byte(0x33), 0x01)?; // m = 1

        Ok(())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Z-code version: {}\nRelease: {} Serial: {}\nDictionary: {}\nObject table: {}\nGlobals: {}\nStatic memory: {}\nHigh memory: {}\nFile length: {:#06X} Checksum: {:#06X}",
            self.version,
            self.release,
            self.serial,
            self.dictionary_base,
            self.object_table_base,
            self.globals_base,
            self.static_base,
            self.high_base,
            self.file_length,
            self.checksum,
        )
    }
}
