use log::{debug, error};

use crate::dictionary::Dictionary;
use crate::errors::{ZmError, ZmResult};
use crate::frame::Frame;
use crate::header::{Header, HeaderFlags1};
use crate::host::{Host, HostInput, StatusRight};
use crate::instruction::{branch_destination, BranchTarget, Instruction, OpCategory, Operand};
use crate::memory::ZAddress::*;
use crate::memory::ZMemory;
use crate::object::ObjectTable;
use crate::rand::ZRng;
use crate::zscii;

/// Outcome of executing a single instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Halted,
}

/// The global variable holding the player's current location object, and
/// the two holding the status line's right-hand fields (R8.2, v3 layout).
const GLOBAL_LOCATION: u8 = 16;
const GLOBAL_SCORE_OR_HOURS: u8 = 17;
const GLOBAL_TURNS_OR_MINUTES: u8 = 18;

/// Generous bound on simultaneous call frames. Not drawn from the Standard
/// (which leaves the limit to the implementation); guards against runaway
/// recursion in a buggy or adversarial story file turning into unbounded
/// memory growth instead of a clean fault.
const MAX_CALL_DEPTH: usize = 1024;

/// The fetch-decode-execute loop: program counter, call frame stack, and
/// the opcode dispatcher.
///
/// Reference: the teacher's `ZCpu` (program counter + `step`) and
/// `zcpu/opcodes.rs` (`ZOpcode`, here expanded from a two-variant stub into
/// the full v3 dispatch table via exhaustive pattern matching).
pub struct Cpu {
    pc: u32,
    frames: Vec<Frame>,
}

impl Cpu {
    pub fn new(initial_pc: u32) -> Self {
        Cpu {
            pc: initial_pc,
            frames: vec![Frame::root(0)],
        }
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    fn read_variable(&mut self, memory: &ZMemory, header: &Header, number: u8) -> ZmResult<u16> {
        match number {
            0 => self.current_frame_mut().pop(),
            1..=15 => self.current_frame().get_local(number),
            _ => memory.read_u16(Byte(
                header.globals_base.as_byte() as u16 + 2 * (number as u16 - 16),
            )),
        }
    }

    fn write_variable(
        &mut self,
        memory: &mut ZMemory,
        header: &Header,
        number: u8,
        value: u16,
    ) -> ZmResult<()> {
        match number {
            0 => {
                self.current_frame_mut().push(value);
                Ok(())
            }
            1..=15 => self.current_frame_mut().set_local(number, value),
            _ => memory.write_u16(
                Byte(header.globals_base.as_byte() as u16 + 2 * (number as u16 - 16)),
                value,
            ),
        }
    }

    fn resolve(&mut self, memory: &ZMemory, header: &Header, operand: Operand) -> ZmResult<u16> {
        match operand {
            Operand::Constant(v) => Ok(v),
            Operand::Variable(n) => self.read_variable(memory, header, n),
        }
    }

    /// Resolve every operand in order. Order matters: a `Variable(0)`
    /// operand pops the evaluation stack, so operands must be read
    /// left-to-right exactly once each.
    fn resolve_all(
        &mut self,
        memory: &ZMemory,
        header: &Header,
        operands: &[Operand],
    ) -> ZmResult<Vec<u16>> {
        operands
            .iter()
            .map(|&o| self.resolve(memory, header, o))
            .collect()
    }

    fn do_return(&mut self, memory: &mut ZMemory, header: &Header, value: u16) -> ZmResult<Flow> {
        let frame = self.frames.pop().expect("frame stack is never empty");
        if self.frames.is_empty() {
            return Ok(Flow::Halted);
        }
        self.pc = frame.return_pc;
        if let Some(target) = frame.store_target {
            self.write_variable(memory, header, target, value)?;
        }
        Ok(Flow::Normal)
    }

    fn take_branch(&mut self, instr: &Instruction, memory: &mut ZMemory, header: &Header, condition: bool) -> ZmResult<Flow> {
        match instr.branch {
            None => {
                self.pc = instr.next_address;
                Ok(Flow::Normal)
            }
            Some(branch) if branch.on_true == condition => match branch.target {
                BranchTarget::ReturnFalse => self.do_return(memory, header, 0),
                BranchTarget::ReturnTrue => self.do_return(memory, header, 1),
                BranchTarget::Offset(offset) => {
                    self.pc = branch_destination(instr.next_address, offset);
                    Ok(Flow::Normal)
                }
            },
            Some(_) => {
                self.pc = instr.next_address;
                Ok(Flow::Normal)
            }
        }
    }

    /// Fetch, decode and execute the next instruction.
    pub fn step<H: Host>(
        &mut self,
        memory: &mut ZMemory,
        objects: &ObjectTable,
        dictionary: &mut Option<Dictionary>,
        header: &mut Header,
        rng: &mut ZRng,
        host: &mut H,
    ) -> ZmResult<Flow> {
        let instr = Instruction::decode(memory, self.pc)?;
        self.execute(&instr, memory, objects, dictionary, header, rng, host)
    }

    fn execute<H: Host>(
        &mut self,
        instr: &Instruction,
        memory: &mut ZMemory,
        objects: &ObjectTable,
        dictionary: &mut Option<Dictionary>,
        header: &mut Header,
        rng: &mut ZRng,
        host: &mut H,
    ) -> ZmResult<Flow> {
        use OpCategory::*;

        let ops = self.resolve_all(memory, header, &instr.operands)?;
        let next = instr.next_address;

        match (instr.category, instr.opcode_number) {
            // --- 0OP ---
            (Op0, 0) => self.do_return(memory, header, 1), // rtrue
            (Op0, 1) => self.do_return(memory, header, 0), // rfalse
            (Op0, 2) => {
                // print
                let (text, _) = zscii::decode_string_at(
                    memory,
                    instr.text_address.expect("print carries inline text"),
                    header.abbreviations_base,
                )?;
                host.write_text(&text)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op0, 3) => {
                // print_ret
                let (text, _) = zscii::decode_string_at(
                    memory,
                    instr.text_address.expect("print_ret carries inline text"),
                    header.abbreviations_base,
                )?;
                host.write_text(&text)?;
                host.write_text("\n")?;
                self.do_return(memory, header, 1)
            }
            (Op0, 4) => {
                self.pc = next;
                Ok(Flow::Normal)
            } // nop
            (Op0, 5) => {
                // save: not supported by default hosts; branch reflects success
                let snapshot = memory.dynamic_memory().to_vec();
                let ok = host.save(&snapshot)?;
                debug!("save requested, host reported {}", ok);
                self.take_branch(instr, memory, header, ok)
            }
            (Op0, 6) => {
                // restore
                match host.restore()? {
                    Some(bytes) => {
                        memory.restore_dynamic_memory(&bytes)?;
                        self.take_branch(instr, memory, header, true)
                    }
                    None => {
                        debug!("restore requested, no snapshot available");
                        self.take_branch(instr, memory, header, false)
                    }
                }
            }
            (Op0, 7) => {
                // restart: reset dynamic memory to its as-loaded image, the
                // call stack, and resume at the initial PC.
                memory.reset_dynamic_memory();
                self.frames = vec![Frame::root(0)];
                self.pc = header.initial_pc.as_byte();
                Ok(Flow::Normal)
            }
            (Op0, 8) => {
                // ret_popped
                let value = self.current_frame_mut().pop()?;
                self.do_return(memory, header, value)
            }
            (Op0, 9) => {
                // pop (discard)
                self.current_frame_mut().pop()?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op0, 10) => {
                // quit
                host.quit()?;
                Ok(Flow::Halted)
            }
            (Op0, 11) => {
                host.write_text("\n")?;
                self.pc = next;
                Ok(Flow::Normal)
            } // new_line
            (Op0, 12) => {
                // show_status
                self.emit_status(memory, objects, header, host)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op0, 13) => {
                // verify
                let ok = header.verify_checksum(memory)?;
                self.take_branch(instr, memory, header, ok)
            }

            // --- 1OP ---
            (Op1, 0) => {
                // jz
                self.take_branch(instr, memory, header, ops[0] == 0)
            }
            (Op1, 1) => {
                // get_sibling
                let obj = ops[0] as u8;
                let sibling = objects.get_sibling(memory, obj)?;
                self.write_variable(memory, header, instr.store.unwrap(), sibling as u16)?;
                self.take_branch(instr, memory, header, sibling != 0)
            }
            (Op1, 2) => {
                // get_child
                let obj = ops[0] as u8;
                let child = objects.get_child(memory, obj)?;
                self.write_variable(memory, header, instr.store.unwrap(), child as u16)?;
                self.take_branch(instr, memory, header, child != 0)
            }
            (Op1, 3) => {
                // get_parent
                let obj = ops[0] as u8;
                let parent = objects.get_parent(memory, obj)?;
                self.write_variable(memory, header, instr.store.unwrap(), parent as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 4) => {
                // get_prop_len
                let len = objects.get_prop_len(memory, ops[0])?;
                self.write_variable(memory, header, instr.store.unwrap(), len as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 5) => {
                // inc
                let var = ops[0] as u8;
                let v = self.read_variable(memory, header, var)? as i16;
                self.write_variable(memory, header, var, v.wrapping_add(1) as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 6) => {
                // dec
                let var = ops[0] as u8;
                let v = self.read_variable(memory, header, var)? as i16;
                self.write_variable(memory, header, var, v.wrapping_sub(1) as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 7) => {
                // print_addr
                let (text, _) = zscii::decode_string(memory, Byte(ops[0]), header.abbreviations_base)?;
                host.write_text(&text)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 9) => {
                // remove_obj
                objects.remove_obj(memory, ops[0] as u8)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 10) => {
                // print_obj
                let text = objects.short_name(memory, ops[0] as u8, header.abbreviations_base)?;
                host.write_text(&text)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 11) => {
                // ret
                self.do_return(memory, header, ops[0])
            }
            (Op1, 12) => {
                // jump
                let offset = ops[0] as i16;
                self.pc = branch_destination(next, offset);
                Ok(Flow::Normal)
            }
            (Op1, 13) => {
                // print_paddr
                let (text, _) =
                    zscii::decode_string(memory, Packed(ops[0]), header.abbreviations_base)?;
                host.write_text(&text)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 14) => {
                // load
                let var = ops[0] as u8;
                let value = self.read_variable(memory, header, var)?;
                self.write_variable(memory, header, instr.store.unwrap(), value)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op1, 15) => {
                // not
                self.write_variable(memory, header, instr.store.unwrap(), !ops[0])?;
                self.pc = next;
                Ok(Flow::Normal)
            }

            // --- 2OP ---
            (Op2, 1) => {
                // je: true if any later operand equals the first (variadic via VAR form)
                let matched = ops.len() > 1 && ops[1..].iter().any(|&v| v == ops[0]);
                self.take_branch(instr, memory, header, matched)
            }
            (Op2, 2) => {
                self.take_branch(instr, memory, header, (ops[0] as i16) < (ops[1] as i16))
            } // jl
            (Op2, 3) => {
                self.take_branch(instr, memory, header, (ops[0] as i16) > (ops[1] as i16))
            } // jg
            (Op2, 4) => {
                // dec_chk
                let var = ops[0] as u8;
                let v = self.read_variable(memory, header, var)? as i16;
                let new_v = v.wrapping_sub(1);
                self.write_variable(memory, header, var, new_v as u16)?;
                self.take_branch(instr, memory, header, new_v < ops[1] as i16)
            }
            (Op2, 5) => {
                // inc_chk
                let var = ops[0] as u8;
                let v = self.read_variable(memory, header, var)? as i16;
                let new_v = v.wrapping_add(1);
                self.write_variable(memory, header, var, new_v as u16)?;
                self.take_branch(instr, memory, header, new_v > ops[1] as i16)
            }
            (Op2, 6) => {
                // jin
                let parent = objects.get_parent(memory, ops[0] as u8)?;
                self.take_branch(instr, memory, header, parent == ops[1] as u8)
            }
            (Op2, 7) => {
                // test: bitmap & flags == flags
                self.take_branch(instr, memory, header, ops[0] & ops[1] == ops[1])
            }
            (Op2, 8) => {
                self.write_variable(memory, header, instr.store.unwrap(), ops[0] | ops[1])?;
                self.pc = next;
                Ok(Flow::Normal)
            } // or
            (Op2, 9) => {
                self.write_variable(memory, header, instr.store.unwrap(), ops[0] & ops[1])?;
                self.pc = next;
                Ok(Flow::Normal)
            } // and
            (Op2, 10) => {
                // test_attr
                let set = objects.attr(memory, ops[0] as u8, ops[1] as u8)?;
                self.take_branch(instr, memory, header, set)
            }
            (Op2, 11) => {
                // set_attr
                objects.set_attr(memory, ops[0] as u8, ops[1] as u8)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 12) => {
                // clear_attr
                objects.clear_attr(memory, ops[0] as u8, ops[1] as u8)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 13) => {
                // store
                self.write_variable(memory, header, ops[0] as u8, ops[1])?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 14) => {
                // insert_obj
                objects.insert_obj(memory, ops[0] as u8, ops[1] as u8)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 15) => {
                // loadw
                let addr = ops[0].wrapping_add(2u16.wrapping_mul(ops[1]));
                let value = memory.read_u16(Byte(addr))?;
                self.write_variable(memory, header, instr.store.unwrap(), value)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 16) => {
                // loadb
                let addr = ops[0].wrapping_add(ops[1]);
                let value = memory.read_u8(Byte(addr))? as u16;
                self.write_variable(memory, header, instr.store.unwrap(), value)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 17) => {
                // get_prop
                let value = objects.get_prop(memory, ops[0] as u8, ops[1] as u8)?;
                self.write_variable(memory, header, instr.store.unwrap(), value)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 18) => {
                // get_prop_addr
                let addr = objects.get_prop_addr(memory, ops[0] as u8, ops[1] as u8)?;
                self.write_variable(memory, header, instr.store.unwrap(), addr)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 19) => {
                // get_next_prop
                let number = objects.get_next_prop(memory, ops[0] as u8, ops[1] as u8)?;
                self.write_variable(memory, header, instr.store.unwrap(), number as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Op2, 20) => {
                let v = (ops[0] as i16).wrapping_add(ops[1] as i16);
                self.write_variable(memory, header, instr.store.unwrap(), v as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            } // add
            (Op2, 21) => {
                let v = (ops[0] as i16).wrapping_sub(ops[1] as i16);
                self.write_variable(memory, header, instr.store.unwrap(), v as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            } // sub
            (Op2, 22) => {
                let v = (ops[0] as i16).wrapping_mul(ops[1] as i16);
                self.write_variable(memory, header, instr.store.unwrap(), v as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            } // mul
            (Op2, 23) => {
                let divisor = ops[1] as i16;
                if divisor == 0 {
                    error!("division by zero at {:#06X}", self.pc);
                    return Err(ZmError::DivZero);
                }
                let v = (ops[0] as i16).wrapping_div(divisor);
                self.write_variable(memory, header, instr.store.unwrap(), v as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            } // div
            (Op2, 24) => {
                let divisor = ops[1] as i16;
                if divisor == 0 {
                    error!("modulo by zero at {:#06X}", self.pc);
                    return Err(ZmError::DivZero);
                }
                let v = (ops[0] as i16).wrapping_rem(divisor);
                self.write_variable(memory, header, instr.store.unwrap(), v as u16)?;
                self.pc = next;
                Ok(Flow::Normal)
            } // mod

            // --- VAR ---
            (Var, 0) => {
                // call
                let routine_byte_addr = Packed(ops[0]).as_byte();
                if routine_byte_addr == 0 {
                    if let Some(target) = instr.store {
                        self.write_variable(memory, header, target, 0)?;
                    }
                    self.pc = next;
                    return Ok(Flow::Normal);
                }
                let locals_count = memory.read_u8_offset(routine_byte_addr)?;
                let mut locals = Vec::with_capacity(locals_count as usize);
                for i in 0..locals_count as u32 {
                    locals.push(memory.read_u16_offset(routine_byte_addr + 1 + 2 * i)?);
                }
                let args = &ops[1..];
                for (i, &arg) in args.iter().enumerate() {
                    if i < locals.len() {
                        locals[i] = arg;
                    }
                }
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(ZmError::StackOverflow);
                }
                let arg_count = args.len().min(7) as u8;
                let new_pc = routine_byte_addr + 1 + 2 * locals_count as u32;
                self.frames.push(Frame::new(next, &locals, arg_count, instr.store));
                self.pc = new_pc;
                Ok(Flow::Normal)
            }
            (Var, 1) => {
                // storew
                let addr = ops[0].wrapping_add(2u16.wrapping_mul(ops[1]));
                memory.write_u16(Byte(addr), ops[2])?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 2) => {
                // storeb
                let addr = ops[0].wrapping_add(ops[1]);
                memory.write_u8(Byte(addr), ops[2] as u8)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 3) => {
                // put_prop
                objects.put_prop(memory, ops[0] as u8, ops[1] as u8, ops[2])?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 4) => {
                // sread
                let text_buffer_addr = ops[0];
                let parse_buffer_addr = ops[1];
                self.emit_status(memory, objects, header, host)?;
                match host.read_line()? {
                    HostInput::Quit => {
                        host.quit()?;
                        return Ok(Flow::Halted);
                    }
                    HostInput::Line(line) => {
                        let max_len = memory.read_u8(Byte(text_buffer_addr))? as usize;
                        let truncated: String = line.to_lowercase().chars().take(max_len).collect();
                        let mut writer = memory.writer_at(Byte(text_buffer_addr + 1));
                        for c in truncated.chars() {
                            writer.next_u8(c as u8)?;
                        }
                        writer.next_u8(0)?;
                        if dictionary.is_none() {
                            *dictionary = Some(Dictionary::from_memory(memory, header.dictionary_base)?);
                        }
                        dictionary.as_ref().expect("just populated above").tokenize(
                            memory,
                            Byte(text_buffer_addr),
                            Byte(parse_buffer_addr),
                        )?;
                    }
                }
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 5) => {
                // print_char
                if let Some(c) = zscii::zscii_to_char(ops[0])? {
                    host.write_char(c)?;
                }
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 6) => {
                // print_num
                host.write_text(&(ops[0] as i16).to_string())?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 7) => {
                // random
                let range = ops[0] as i16;
                let value = if range > 0 {
                    rng.range(range as u16)
                } else if range == 0 {
                    rng.reseed_unpredictable();
                    0
                } else {
                    rng.reseed((-range) as u64);
                    0
                };
                self.write_variable(memory, header, instr.store.unwrap(), value)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 8) => {
                // push
                self.current_frame_mut().push(ops[0]);
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 9) => {
                // pull
                let value = self.current_frame_mut().pop()?;
                self.write_variable(memory, header, ops[0] as u8, value)?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 10) => {
                // split_window
                host.split_window(ops[0])?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 11) => {
                // set_window
                host.set_window(ops[0])?;
                self.pc = next;
                Ok(Flow::Normal)
            }
            (Var, 19) | (Var, 20) | (Var, 21) => {
                // output_stream, input_stream, sound_effect: no transcript,
                // auxiliary input, or sound channel is implemented; accepted
                // and ignored rather than faulting the game.
                self.pc = next;
                Ok(Flow::Normal)
            }

            _ => {
                let form = match instr.category {
                    Op0 => "0OP",
                    OpCategory::Op1 => "1OP",
                    OpCategory::Op2 => "2OP",
                    OpCategory::Var => "VAR",
                };
                Err(ZmError::UnsupportedOpcode {
                    form,
                    number: instr.opcode_number,
                })
            }
        }
    }

    fn emit_status<H: Host>(
        &mut self,
        memory: &ZMemory,
        objects: &ObjectTable,
        header: &Header,
        host: &mut H,
    ) -> ZmResult<()> {
        let location_obj = memory.read_u16(Byte(
            header.globals_base.as_byte() as u16 + 2 * (GLOBAL_LOCATION as u16 - 16),
        ))? as u8;
        let location = objects.short_name(memory, location_obj, header.abbreviations_base)?;

        let right = if header.flags1.contains(HeaderFlags1::STATUS_LINE_TYPE) {
            let hours = memory.read_u16(Byte(
                header.globals_base.as_byte() as u16 + 2 * (GLOBAL_SCORE_OR_HOURS as u16 - 16),
            ))?;
            let minutes = memory.read_u16(Byte(
                header.globals_base.as_byte() as u16 + 2 * (GLOBAL_TURNS_OR_MINUTES as u16 - 16),
            ))?;
            StatusRight::Time {
                hours: hours as u8,
                minutes: minutes as u8,
            }
        } else {
            let score = memory.read_u16(Byte(
                header.globals_base.as_byte() as u16 + 2 * (GLOBAL_SCORE_OR_HOURS as u16 - 16),
            ))? as i16;
            let turns = memory.read_u16(Byte(
                header.globals_base.as_byte() as u16 + 2 * (GLOBAL_TURNS_OR_MINUTES as u16 - 16),
            ))?;
            StatusRight::ScoreAndTurns { score, turns }
        };

        host.show_status(&location, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHost;

    impl Host for NullHost {
        fn write_text(&mut self, _text: &str) -> ZmResult<()> {
            Ok(())
        }

        fn show_status(&mut self, _location: &str, _right: StatusRight) -> ZmResult<()> {
            Ok(())
        }

        fn read_line(&mut self) -> ZmResult<HostInput> {
            Ok(HostInput::Quit)
        }

        fn quit(&mut self) -> ZmResult<()> {
            Ok(())
        }
    }

    /// Assemble the fixed 610-byte prefix every test here shares (header,
    /// an empty dictionary, an empty object table, 240 zeroed globals) with
    /// `code` appended at the (always 610, given the fixed prefix sizes)
    /// static memory boundary, then parse it back into the subsystems
    /// `Cpu::step` needs.
    fn build_env(code: &[u8]) -> (ZMemory, Header, ObjectTable, Option<Dictionary>, ZRng, u16) {
        let mut buf = vec![0u8; 0x40];
        buf[0x00] = 3; // version

        let dictionary_addr = 0x40u16;
        buf.resize(0x40 + 4, 0);
        buf[0x41] = 4; // entry size, 0 separators, 0 entries

        let object_table_addr = buf.len() as u16;
        buf.resize(buf.len() + 62, 0); // 31 property defaults, no objects

        let globals_addr = buf.len() as u16;
        buf.resize(buf.len() + 480, 0); // 240 globals

        let static_base = buf.len() as u16;
        let code_addr = buf.len() as u16;
        buf.extend_from_slice(code);
        let high_base = buf.len() as u16;

        buf[0x04] = (high_base >> 8) as u8;
        buf[0x05] = (high_base & 0xFF) as u8;
        buf[0x06] = (code_addr >> 8) as u8;
        buf[0x07] = (code_addr & 0xFF) as u8;
        buf[0x08] = (dictionary_addr >> 8) as u8;
        buf[0x09] = (dictionary_addr & 0xFF) as u8;
        buf[0x0A] = (object_table_addr >> 8) as u8;
        buf[0x0B] = (object_table_addr & 0xFF) as u8;
        buf[0x0C] = (globals_addr >> 8) as u8;
        buf[0x0D] = (globals_addr & 0xFF) as u8;
        buf[0x0E] = (static_base >> 8) as u8;
        buf[0x0F] = (static_base & 0xFF) as u8;

        let memory = ZMemory::from_bytes(buf);
        let header = Header::from_memory(&memory).unwrap();
        let objects = ObjectTable::new(header.object_table_base);
        let rng = ZRng::new(1);
        (memory, header, objects, None, rng, code_addr)
    }

    fn global(memory: &ZMemory, header: &Header, number: u8) -> u16 {
        memory
            .read_u16(Byte(header.globals_base.as_byte() as u16 + 2 * (number as u16 - 16)))
            .unwrap()
    }

    #[test]
    fn add_stores_result_in_global() {
        // Long form, both operands small constants: 2OP:20 add 2 3 -> G00.
        let code = [0x14, 2, 3, 16];
        let (mut memory, mut header, objects, mut dictionary, mut rng, code_addr) = build_env(&code);
        let mut cpu = Cpu::new(code_addr as u32);
        let mut host = NullHost;

        let flow = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();

        assert_eq!(flow, Flow::Normal);
        assert_eq!(global(&memory, &header, 16), 5);
    }

    #[test]
    fn div_by_zero_faults_without_storing() {
        // Long form 2OP:23 div, divisor operand is 0.
        let code = [0x17, 10, 0, 16];
        let (mut memory, mut header, objects, mut dictionary, mut rng, code_addr) = build_env(&code);
        let mut cpu = Cpu::new(code_addr as u32);
        let mut host = NullHost;

        let err = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap_err();

        assert!(matches!(err, ZmError::DivZero));
    }

    #[test]
    fn je_branch_return_true_halts_the_root_frame() {
        // Long form 2OP:1 je 7 7, branching (offset sentinel 1 => return true)
        // when the operands match.
        let code = [0x01, 7, 7, 0b1100_0001];
        let (mut memory, mut header, objects, mut dictionary, mut rng, code_addr) = build_env(&code);
        let mut cpu = Cpu::new(code_addr as u32);
        let mut host = NullHost;

        let flow = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();

        assert_eq!(flow, Flow::Halted);
    }

    #[test]
    fn storew_then_loadw_round_trips_through_memory() {
        // VAR-form storew(array, 0, 0x1234) then loadw(array, 0) -> G00,
        // with `array` a large-constant operand (out of small-constant range).
        let code = [
            0xE1, 0x13, 0x02, 0x6F, 0x00, 0x12, 0x34, // storew 0x026F 0 0x1234
            0xCF, 0x1F, 0x02, 0x6F, 0x00, 16, // loadw 0x026F 0 -> G00
            0x00, 0x00, // scratch word storew/loadw target at 0x026F
        ];
        let (mut memory, mut header, objects, mut dictionary, mut rng, code_addr) = build_env(&code);
        assert_eq!(code_addr, 0x026Fu16 - 13);
        let mut cpu = Cpu::new(code_addr as u32);
        let mut host = NullHost;

        cpu.step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();
        let flow = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();

        assert_eq!(flow, Flow::Normal);
        assert_eq!(global(&memory, &header, 16), 0x1234);
    }

    #[test]
    fn call_pushes_a_frame_and_ret_stores_the_return_value() {
        // VAR:0 call to a 0-local routine that immediately `ret`s 42,
        // storing the result in G00, followed by `quit`.
        let routine_addr: u16 = 0x40 + 4 + 62 + 480 + 6; // code_addr + len(call) + len(quit)
        let packed: u16 = routine_addr / 2;
        let code = [
            0xE0, 0x3F, (packed >> 8) as u8, (packed & 0xFF) as u8, 16, // call routine -> G00
            0xBA, // quit
            0x00, // routine: 0 locals
            0x9B, 42, // ret 42
        ];
        let (mut memory, mut header, objects, mut dictionary, mut rng, code_addr) = build_env(&code);
        assert_eq!(code_addr, routine_addr - 6);
        let mut cpu = Cpu::new(code_addr as u32);
        let mut host = NullHost;

        let after_call = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();
        assert_eq!(after_call, Flow::Normal);

        let after_ret = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();
        assert_eq!(after_ret, Flow::Normal);
        assert_eq!(global(&memory, &header, 16), 42);

        let after_quit = cpu
            .step(&mut memory, &objects, &mut dictionary, &mut header, &mut rng, &mut host)
            .unwrap();
        assert_eq!(after_quit, Flow::Halted);
    }
}
