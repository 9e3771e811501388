use crate::error::DecodeError;
use crate::registers::{Registers, SegReg, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sib {
    pub scale: u8,
    pub index: u8,
    pub base: u8,
}

/// One decoded mod-reg-rm field group, plus its SIB byte and displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    pub mode: u8,
    pub reg: u8,
    pub rm: u8,
    pub sib: Option<Sib>,
    /// Sign-extended displacement (zero when none follows)
    pub disp: u32,
    pub disp_len: u8,
    pub address_size: Width,
}

/// Where an r/m operand lives once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// 3-bit register index; the width picks the AL/AX/EAX family view
    Register(u8),
    Memory { segment: SegReg, offset: u32 },
}

impl ModRm {
    pub fn is_register(&self) -> bool {
        self.mode == 3
    }

    /// Bytes this ModRM occupies: itself, the optional SIB and the displacement.
    pub fn byte_len(&self) -> usize {
        1 + self.sib.is_some() as usize + self.disp_len as usize
    }

    /// Offset within the segment plus the segment used when no override is present.
    pub fn effective_address(&self, regs: &Registers) -> (SegReg, u32) {
        match self.address_size {
            Width::Dword => self.effective_address_32(regs),
            _ => self.effective_address_16(regs),
        }
    }

    fn effective_address_16(&self, regs: &Registers) -> (SegReg, u32) {
        let r = |i: u8| regs.read(Width::Word, i);
        // BX=3 SP=4 BP=5 SI=6 DI=7
        let (segment, base) = match self.rm {
            0 => (SegReg::Ds, r(3).wrapping_add(r(6))),
            1 => (SegReg::Ds, r(3).wrapping_add(r(7))),
            2 => (SegReg::Ss, r(5).wrapping_add(r(6))),
            3 => (SegReg::Ss, r(5).wrapping_add(r(7))),
            4 => (SegReg::Ds, r(6)),
            5 => (SegReg::Ds, r(7)),
            6 if self.mode == 0 => (SegReg::Ds, 0),
            6 => (SegReg::Ss, r(5)),
            _ => (SegReg::Ds, r(3)),
        };
        (segment, base.wrapping_add(self.disp) & 0xFFFF)
    }

    fn effective_address_32(&self, regs: &Registers) -> (SegReg, u32) {
        let r = |i: u8| regs.read(Width::Dword, i);
        match self.sib {
            Some(sib) => {
                let no_base = sib.base == 5 && self.mode == 0;
                let base = if no_base { 0 } else { r(sib.base) };
                let index = if sib.index == 4 { 0 } else { r(sib.index) << sib.scale };
                // ESP and EBP bases address the stack
                let segment = if !no_base && (sib.base == 4 || sib.base == 5) {
                    SegReg::Ss
                } else {
                    SegReg::Ds
                };
                (segment, base.wrapping_add(index).wrapping_add(self.disp))
            }
            None if self.mode == 0 && self.rm == 5 => (SegReg::Ds, self.disp),
            None => {
                let segment = if self.rm == 5 { SegReg::Ss } else { SegReg::Ds };
                (segment, r(self.rm).wrapping_add(self.disp))
            }
        }
    }
}

fn read_disp(bytes: &[u8], at: usize, len: u8) -> Option<u32> {
    let slice = bytes.get(at..at + len as usize)?;
    Some(match len {
        0 => 0,
        1 => slice[0] as i8 as i32 as u32,
        2 => i16::from_le_bytes([slice[0], slice[1]]) as i32 as u32,
        _ => u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]),
    })
}

/// Decode the ModRM group at the front of `bytes` without consuming anything.
///
/// Returns the decoded structure and the exact number of bytes it spans. `address`
/// is the linear address of `bytes[0]` and is only used for error reporting.
pub fn peek_modrm(bytes: &[u8], address_size: Width, address: u32) -> Result<(ModRm, usize), DecodeError> {
    let truncated = DecodeError::Truncated { address };
    let byte = *bytes.first().ok_or(truncated)?;
    let mode = byte >> 6;
    let reg = (byte >> 3) & 7;
    let rm = byte & 7;

    let mut sib = None;
    let mut disp_len = 0u8;

    if mode != 3 {
        match address_size {
            Width::Dword => {
                if rm == 4 {
                    let sib_byte = *bytes.get(1).ok_or(truncated)?;
                    let decoded = Sib {
                        scale: sib_byte >> 6,
                        index: (sib_byte >> 3) & 7,
                        base: sib_byte & 7,
                    };
                    sib = Some(decoded);
                }
                disp_len = match mode {
                    0 if rm == 5 && sib.is_none() => 4,
                    0 if sib.is_some_and(|s| s.base == 5) => 4,
                    0 => 0,
                    1 => 1,
                    _ => 4,
                };
            }
            _ => {
                disp_len = match mode {
                    0 if rm == 6 => 2,
                    0 => 0,
                    1 => 1,
                    _ => 2,
                };
            }
        }
    }

    let disp_at = 1 + sib.is_some() as usize;
    let disp = read_disp(bytes, disp_at, disp_len).ok_or(truncated)?;
    let modrm = ModRm {
        mode,
        reg,
        rm,
        sib,
        disp,
        disp_len,
        address_size,
    };
    let len = modrm.byte_len();
    Ok((modrm, len))
}
