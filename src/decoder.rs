use bitflags::bitflags;

use crate::cpu::Cpu;
use crate::error::{CpuError, DecodeError};
use crate::modrm::{self, ModRm, Operand};
use crate::registers::{SegReg, Width};

// Architectural limit, prefixes included
pub const MAX_INSTRUCTION_LEN: u32 = 15;
// Longest ModRM group: ModRM + SIB + disp32
const MODRM_WINDOW: usize = 6;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Prefixes: u8 {
        const LOCK = 0x01;
        const REP = 0x02;      // F3, also REPE
        const REPNE = 0x04;    // F2
        const OPSIZE = 0x08;   // 66
        const ADDRSIZE = 0x10; // 67
    }
}

/// An execution routine. Receives the opcode byte that selected it (the second
/// byte for 0F-escaped opcodes).
pub type Handler = fn(&mut Cpu, u8) -> Result<(), CpuError>;

#[derive(Clone, Copy)]
pub enum Dispatch {
    Handler(Handler),
    /// Resolved by the ModRM `reg` field
    Group([Option<Handler>; 8]),
}

pub type DispatchTable = [Option<Dispatch>; 256];

/// Per-instruction decode state. Rebuilt at the start of every instruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeContext {
    /// Offset in CS of the first prefix/opcode byte
    pub start: u32,
    /// Offset in CS of the next unread byte
    pub cursor: u32,
    pub prefixes: Prefixes,
    pub segment_override: Option<SegReg>,
    /// CS descriptor says 32-bit code
    pub default_32: bool,
    /// Primary opcode, or 0F00 | second byte
    pub opcode: u16,
    /// Set by handlers that transfer control; otherwise EIP becomes `cursor`
    pub branch: Option<u32>,
}

impl DecodeContext {
    pub fn new(eip: u32, default_32: bool) -> Self {
        Self {
            start: eip,
            cursor: eip,
            default_32,
            ..Default::default()
        }
    }

    pub fn operand_size(&self) -> Width {
        if self.default_32 != self.prefixes.contains(Prefixes::OPSIZE) {
            Width::Dword
        } else {
            Width::Word
        }
    }

    pub fn address_size(&self) -> Width {
        if self.default_32 != self.prefixes.contains(Prefixes::ADDRSIZE) {
            Width::Dword
        } else {
            Width::Word
        }
    }

    pub fn ip_mask(&self) -> u32 {
        if self.default_32 { 0xFFFF_FFFF } else { 0xFFFF }
    }

    /// Bytes consumed so far.
    pub fn length(&self) -> u32 {
        self.cursor.wrapping_sub(self.start) & self.ip_mask()
    }

    pub fn segment_or(&self, default: SegReg) -> SegReg {
        self.segment_override.unwrap_or(default)
    }
}

impl Cpu {
    fn decode_start_linear(&self) -> u32 {
        self.linear(SegReg::Cs, self.ctx.start)
    }

    fn check_length(&self, extra: u32) -> Result<(), CpuError> {
        if self.ctx.length() + extra > MAX_INSTRUCTION_LEN {
            return Err(DecodeError::TooLong { address: self.decode_start_linear() }.into());
        }
        Ok(())
    }

    pub fn fetch_u8(&mut self) -> Result<u8, CpuError> {
        self.check_length(1)?;
        let address = self.linear(SegReg::Cs, self.ctx.cursor);
        let byte = self.memory.borrow().read_byte(address)?;
        self.ctx.cursor = self.ctx.cursor.wrapping_add(1) & self.ctx.ip_mask();
        Ok(byte)
    }

    pub fn fetch_u16(&mut self) -> Result<u16, CpuError> {
        let lo = self.fetch_u8()?;
        let hi = self.fetch_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn fetch_u32(&mut self) -> Result<u32, CpuError> {
        let lo = self.fetch_u16()? as u32;
        let hi = self.fetch_u16()? as u32;
        Ok((hi << 16) | lo)
    }

    /// Immediate of the operand's own width.
    pub fn fetch_imm(&mut self, width: Width) -> Result<u32, CpuError> {
        match width {
            Width::Byte => Ok(self.fetch_u8()? as u32),
            Width::Word => Ok(self.fetch_u16()? as u32),
            Width::Dword => self.fetch_u32(),
        }
    }

    /// imm8 sign-extended to the operand width.
    pub fn fetch_imm8_sx(&mut self, width: Width) -> Result<u32, CpuError> {
        let byte = self.fetch_u8()?;
        Ok(width.truncate(Width::Byte.sign_extend(byte as u32)))
    }

    /// Offset-sized immediate (moffs, near pointers): follows the address size.
    pub fn fetch_offset(&mut self) -> Result<u32, CpuError> {
        let width = self.ctx.address_size();
        self.fetch_imm(width)
    }

    /// Decode the ModRM at the cursor without moving it.
    pub fn peek_modrm(&self) -> Result<ModRm, CpuError> {
        let address = self.linear(SegReg::Cs, self.ctx.cursor);
        let window = self.memory.borrow().fetch_window(address, MODRM_WINDOW);
        let (modrm, _) = modrm::peek_modrm(&window, self.ctx.address_size(), address)?;
        Ok(modrm)
    }

    /// Decode the ModRM at the cursor and advance past it, SIB and displacement included.
    pub fn consume_modrm(&mut self) -> Result<ModRm, CpuError> {
        let modrm = self.peek_modrm()?;
        let len = modrm.byte_len() as u32;
        self.check_length(len)?;
        self.ctx.cursor = self.ctx.cursor.wrapping_add(len) & self.ctx.ip_mask();
        Ok(modrm)
    }

    /// Resolve the r/m half of a ModRM to a register or a segment:offset.
    pub fn resolve(&self, modrm: &ModRm) -> Operand {
        if modrm.is_register() {
            return Operand::Register(modrm.rm);
        }
        let (segment, offset) = modrm.effective_address(&self.regs);
        Operand::Memory {
            segment: self.ctx.segment_or(segment),
            offset,
        }
    }

    pub fn decode_rm(&mut self) -> Result<(ModRm, Operand), CpuError> {
        let modrm = self.consume_modrm()?;
        let operand = self.resolve(&modrm);
        Ok((modrm, operand))
    }

    /// Like `decode_rm` but the instruction only accepts a memory operand (LEA, LDS, LGDT...).
    pub fn decode_memory_rm(&mut self) -> Result<(ModRm, SegReg, u32), CpuError> {
        let (modrm, operand) = self.decode_rm()?;
        match operand {
            Operand::Memory { segment, offset } => Ok((modrm, segment, offset)),
            Operand::Register(_) => Err(DecodeError::RegisterOperand {
                opcode: self.ctx.opcode as u8,
            }
            .into()),
        }
    }

    fn scan_prefixes(&mut self) -> Result<u8, CpuError> {
        loop {
            let byte = self.fetch_u8()?;
            let ctx = &mut self.ctx;
            match byte {
                0x26 => ctx.segment_override = Some(SegReg::Es),
                0x2E => ctx.segment_override = Some(SegReg::Cs),
                0x36 => ctx.segment_override = Some(SegReg::Ss),
                0x3E => ctx.segment_override = Some(SegReg::Ds),
                0x64 => ctx.segment_override = Some(SegReg::Fs),
                0x65 => ctx.segment_override = Some(SegReg::Gs),
                0x66 => ctx.prefixes.insert(Prefixes::OPSIZE),
                0x67 => ctx.prefixes.insert(Prefixes::ADDRSIZE),
                0xF0 => ctx.prefixes.insert(Prefixes::LOCK),
                // The last repeat prefix wins
                0xF2 => {
                    ctx.prefixes.remove(Prefixes::REP);
                    ctx.prefixes.insert(Prefixes::REPNE);
                }
                0xF3 => {
                    ctx.prefixes.remove(Prefixes::REPNE);
                    ctx.prefixes.insert(Prefixes::REP);
                }
                _ => return Ok(byte),
            }
        }
    }
}

/// Decode and execute one instruction at CS:EIP.
///
/// EIP is only written once the handler has returned successfully, so a
/// failing instruction leaves EIP on its first byte.
pub fn execute_next(cpu: &mut Cpu) -> Result<(), CpuError> {
    let default_32 = cpu.regs.segment(SegReg::Cs).is_32bit();
    cpu.ctx = DecodeContext::new(cpu.regs.eip, default_32);

    let first = cpu.scan_prefixes()?;
    let (dispatch, key, opcode) = if first == 0x0F {
        let second = cpu.fetch_u8()?;
        (cpu.secondary[second as usize], second, 0x0F00 | second as u16)
    } else {
        (cpu.primary[first as usize], first, first as u16)
    };
    cpu.ctx.opcode = opcode;

    let address = cpu.decode_start_linear();
    let unrecognized = |sub_opcode| CpuError::UnrecognizedOpcode {
        opcode,
        sub_opcode,
        address,
    };

    let handler = match dispatch {
        None => return Err(unrecognized(None)),
        Some(Dispatch::Handler(handler)) => handler,
        Some(Dispatch::Group(slots)) => {
            // Peek only; the chosen handler does the real consumption
            let reg = cpu.peek_modrm()?.reg;
            slots[reg as usize].ok_or_else(|| unrecognized(Some(reg)))?
        }
    };

    handler(cpu, key)?;

    // A far transfer may have switched code size; mask with the new CS
    let mask = if cpu.regs.segment(SegReg::Cs).is_32bit() { 0xFFFF_FFFF } else { 0xFFFF };
    cpu.regs.eip = cpu.ctx.branch.unwrap_or(cpu.ctx.cursor) & mask;
    Ok(())
}
