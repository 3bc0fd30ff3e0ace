use std::io::Read;

use log::info;

use crate::cpu::{Cpu, Flow};
use crate::dictionary::Dictionary;
use crate::errors::ZmResult;
use crate::header::Header;
use crate::host::Host;
use crate::memory::ZMemory;
use crate::object::ObjectTable;
use crate::rand::ZRng;

/// The top-level lifecycle states from the data model's state machine.
/// `AwaitingInput` is folded into `Running` here since `Cpu::step` performs
/// the blocking `sread` call synchronously rather than suspending.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MachineState {
    Loaded,
    Running,
    Halted,
}

/// The assembled Z-machine interpreter: memory, the parsed header, the
/// object and dictionary tables, and the CPU driving execution.
///
/// Reference: the teacher's `ZMachine` (memory + header), generalized with
/// the object table, dictionary, CPU and PRNG this spec's engine needs.
pub struct ZMachine {
    memory: ZMemory,
    header: Header,
    objects: ObjectTable,
    /// Parsed lazily on first use (the first `sread`), not at load time:
    /// a story whose dictionary table is malformed but which never reads
    /// a line should still run.
    dictionary: Option<Dictionary>,
    cpu: Cpu,
    rng: ZRng,
    state: MachineState,
}

impl ZMachine {
    /// Load a story file and initialize every subsystem from its header.
    pub fn from_story_reader<R: Read>(reader: &mut R, seed: u64) -> ZmResult<Self> {
        let mut memory = ZMemory::from_story_reader(reader)?;
        let mut header = Header::from_memory(&memory)?;
        info!(
            "loaded {} story, release {} serial {}",
            header.version, header.release, header.serial
        );
        memory.set_boundaries(
            header.static_base.as_byte() as u16,
            header.high_base.as_byte() as u16,
        );

        let objects = ObjectTable::new(header.object_table_base);
        let cpu = Cpu::new(header.initial_pc.as_byte());

        Ok(ZMachine {
            memory,
            header,
            objects,
            dictionary: None,
            cpu,
            rng: ZRng::new(seed),
            state: MachineState::Loaded,
        })
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Announce this interpreter's capabilities to the story (R11.1) and
    /// transition to `Running`. Must be called once before `run`.
    pub fn start(&mut self, has_status_line: bool, has_screen_splitting: bool) -> ZmResult<()> {
        self.header
            .announce_capabilities(&mut self.memory, has_status_line, has_screen_splitting)?;
        self.memory.capture_initial_snapshot();
        self.state = MachineState::Running;
        Ok(())
    }

    /// Run until the game quits, faults, or the host cancels input.
    pub fn run<H: Host>(&mut self, host: &mut H) -> ZmResult<()> {
        loop {
            match self.step(host)? {
                Flow::Normal => continue,
                Flow::Halted => {
                    self.state = MachineState::Halted;
                    return Ok(());
                }
            }
        }
    }

    /// Execute exactly one instruction.
    pub fn step<H: Host>(&mut self, host: &mut H) -> ZmResult<Flow> {
        self.cpu.step(
            &mut self.memory,
            &self.objects,
            &mut self.dictionary,
            &mut self.header,
            &mut self.rng,
            host,
        )
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostInput, StatusRight};

    struct ScriptedHost {
        lines: Vec<String>,
        transcript: String,
    }

    impl Host for ScriptedHost {
        fn write_text(&mut self, text: &str) -> ZmResult<()> {
            self.transcript.push_str(text);
            Ok(())
        }

        fn show_status(&mut self, _location: &str, _right: StatusRight) -> ZmResult<()> {
            Ok(())
        }

        fn read_line(&mut self) -> ZmResult<HostInput> {
            if self.lines.is_empty() {
                Ok(HostInput::Quit)
            } else {
                Ok(HostInput::Line(self.lines.remove(0)))
            }
        }

        fn quit(&mut self) -> ZmResult<()> {
            Ok(())
        }
    }

    /// Build the smallest possible valid v3 story: a 64-byte header, an
    /// empty (zero-entry) property-defaults + object table, a trivial
    /// dictionary, and a main routine that just prints "hi" and quits.
    fn minimal_story() -> Vec<u8> {
        let mut buf = vec![0u8; 0x40];
        buf[0x00] = 3; // version

        // dictionary at 0x40: 0 separators, entry size 4, 0 entries
        let dictionary_addr = 0x40u16;
        buf.resize(0x40 + 4, 0);
        buf[0x41] = 4; // entry size
                       // entry count already 0

        // object table at 0x44: 31 defaults (62 bytes), no object entries
        let object_table_addr = buf.len() as u16;
        buf.resize(buf.len() + 62, 0);

        // globals table: 240 words of 0
        let globals_addr = buf.len() as u16;
        buf.resize(buf.len() + 480, 0);

        let static_base = buf.len() as u16;

        // The initial PC points directly at the first instruction to run
        // (unlike a `call` target, it is never preceded by a locals-count
        // byte: the root frame is synthesized, not pushed by a call).
        let routine_addr = buf.len() as u16;
        let print_opcode = 0b1011_0010; // short form, 0OP, number 2 (print)
        buf.push(print_opcode);
        let h = 6 + (b'h' - b'a');
        let i = 6 + (b'i' - b'a');
        let word = pack_word_for_test(true, [h, i, 5]);
        buf.push((word >> 8) as u8);
        buf.push((word & 0xFF) as u8);
        let quit_opcode = 0b1011_1010; // short form, 0OP, number 10 (quit)
        buf.push(quit_opcode);

        let high_base = buf.len() as u16;

        buf[0x04] = (high_base >> 8) as u8;
        buf[0x05] = (high_base & 0xFF) as u8;
        buf[0x06] = (routine_addr >> 8) as u8;
        buf[0x07] = (routine_addr & 0xFF) as u8;
        buf[0x08] = (dictionary_addr >> 8) as u8;
        buf[0x09] = (dictionary_addr & 0xFF) as u8;
        buf[0x0A] = (object_table_addr >> 8) as u8;
        buf[0x0B] = (object_table_addr & 0xFF) as u8;
        buf[0x0C] = (globals_addr >> 8) as u8;
        buf[0x0D] = (globals_addr & 0xFF) as u8;
        buf[0x0E] = (static_base >> 8) as u8;
        buf[0x0F] = (static_base & 0xFF) as u8;

        buf
    }

    fn pack_word_for_test(end: bool, chars: [u8; 3]) -> u16 {
        let end_bit = if end { 0x8000 } else { 0 };
        end_bit | ((chars[0] as u16 & 0x1F) << 10) | ((chars[1] as u16 & 0x1F) << 5) | (chars[2] as u16 & 0x1F)
    }

    #[test]
    fn runs_print_then_quit() {
        let story = minimal_story();
        let mut reader = std::io::Cursor::new(story);
        let mut machine = ZMachine::from_story_reader(&mut reader, 1).unwrap();
        machine.start(true, false).unwrap();

        let mut host = ScriptedHost {
            lines: vec![],
            transcript: String::new(),
        };
        machine.run(&mut host).unwrap();

        assert_eq!(host.transcript, "hi");
        assert_eq!(machine.state(), MachineState::Halted);
    }
}
