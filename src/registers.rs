use bitflags::bitflags;

// Constants for Flag Bits
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFlags: u32 {
        const CF = 0x0000_0001;
        const RESERVED = 0x0000_0002; // Bit 1 reads as 1
        const PF = 0x0000_0004;
        const AF = 0x0000_0010;
        const ZF = 0x0000_0040;
        const SF = 0x0000_0080;
        const TF = 0x0000_0100;
        const IF = 0x0000_0200;
        const DF = 0x0000_0400; // Bit 10
        const OF = 0x0000_0800;
        const IOPL = 0x0000_3000;
        const NT = 0x0000_4000;
        const RF = 0x0001_0000;
        const VM = 0x0002_0000;

        // Flags touched by arithmetic results
        const STATUS = Self::CF.bits() | Self::PF.bits() | Self::AF.bits() |
                       Self::ZF.bits() | Self::SF.bits() | Self::OF.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cr0: u32 {
        const PE = 0x0000_0001; // Protection enable
        const MP = 0x0000_0002;
        const EM = 0x0000_0004;
        const TS = 0x0000_0008;
        const ET = 0x0000_0010;
        const NE = 0x0000_0020;
        const WP = 0x0001_0000;
        const AM = 0x0004_0000;
        const NW = 0x2000_0000;
        const CD = 0x4000_0000;
        const PG = 0x8000_0000;
    }
}

// Architecturally defined EFLAGS bits on a 386
const FLAGS_VALID_MASK: u32 = 0x0003_7FD5;

/// Operand width. All arithmetic is carried out at 32 bits and truncated
/// to one of these on store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    pub fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
        }
    }

    pub fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    pub fn truncate(self, value: u32) -> u32 {
        value & self.mask()
    }

    /// Sign-extend a value of this width to 32 bits.
    pub fn sign_extend(self, value: u32) -> u32 {
        match self {
            Width::Byte => value as u8 as i8 as i32 as u32,
            Width::Word => value as u16 as i16 as i32 as u32,
            Width::Dword => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    Al,
    Cl,
    Dl,
    Bl,
    Ah,
    Ch,
    Dh,
    Bh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    Ax,
    Cx,
    Dx,
    Bx,
    Sp,
    Bp,
    Si,
    Di,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg32 {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegReg {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

// Field-value -> register lookups used by the decoder (ModRM reg/rm, opcode low bits)
pub const REG8_TABLE: [Reg8; 8] = [
    Reg8::Al, Reg8::Cl, Reg8::Dl, Reg8::Bl, Reg8::Ah, Reg8::Ch, Reg8::Dh, Reg8::Bh,
];
pub const REG16_TABLE: [Reg16; 8] = [
    Reg16::Ax, Reg16::Cx, Reg16::Dx, Reg16::Bx, Reg16::Sp, Reg16::Bp, Reg16::Si, Reg16::Di,
];
pub const REG32_TABLE: [Reg32; 8] = [
    Reg32::Eax, Reg32::Ecx, Reg32::Edx, Reg32::Ebx, Reg32::Esp, Reg32::Ebp, Reg32::Esi, Reg32::Edi,
];
pub const SEG_TABLE: [SegReg; 6] = [
    SegReg::Es, SegReg::Cs, SegReg::Ss, SegReg::Ds, SegReg::Fs, SegReg::Gs,
];

impl SegReg {
    /// Decode the 3-bit `sreg` field of MOV Sreg / PUSH / POP.
    pub fn from_encoding(value: u8) -> Option<SegReg> {
        SEG_TABLE.get(value as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SegReg::Es => "ES",
            SegReg::Cs => "CS",
            SegReg::Ss => "SS",
            SegReg::Ds => "DS",
            SegReg::Fs => "FS",
            SegReg::Gs => "GS",
        }
    }
}

// Descriptor attribute bit: default operand/address size (CS) or stack size (SS) is 32-bit
pub const SEG_ATTR_BIG: u16 = 0x4000;

/// Visible selector plus the cached descriptor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u16,
}

impl Segment {
    pub fn real_mode(selector: u16) -> Self {
        Self {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access: 0x0093,
        }
    }

    pub fn flat(selector: u16) -> Self {
        Self {
            selector,
            base: 0,
            limit: 0xFFFF_FFFF,
            access: 0x0093 | SEG_ATTR_BIG,
        }
    }

    pub fn is_32bit(&self) -> bool {
        self.access & SEG_ATTR_BIG != 0
    }
}

/// GDTR / IDTR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableRegister {
    pub base: u32,
    pub limit: u16,
}

/// The architectural register file.
///
/// Each general register family (AL/AH/AX/EAX, ...) lives in one 32-bit
/// cell; the 8- and 16-bit views are derived by masking and shifting, so
/// writes through any view are observed by all others.
#[derive(Debug, Clone)]
pub struct Registers {
    gpr: [u32; 8],
    pub eip: u32,
    flags: CpuFlags,
    segments: [Segment; 6],
    pub cr0: Cr0,
    pub cr2: u32,
    pub cr3: u32,
    pub gdtr: TableRegister,
    pub idtr: TableRegister,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Power-on state: CS=F000 with its base pinned at FFFF0000, IP=FFF0.
    pub fn new() -> Self {
        let mut segments = [Segment::real_mode(0); 6];
        segments[SegReg::Cs as usize] = Segment {
            selector: 0xF000,
            base: 0xFFFF_0000,
            limit: 0xFFFF,
            access: 0x009B,
        };

        Self {
            gpr: [0; 8],
            eip: 0xFFF0,
            flags: CpuFlags::RESERVED,
            segments,
            cr0: Cr0::ET,
            cr2: 0,
            cr3: 0,
            gdtr: TableRegister::default(),
            idtr: TableRegister { base: 0, limit: 0x03FF },
        }
    }

    // Get 8-bit Register
    pub fn get_reg8(&self, reg: Reg8) -> u8 {
        let index = reg as usize;
        if index < 4 {
            self.gpr[index] as u8
        } else {
            (self.gpr[index - 4] >> 8) as u8
        }
    }

    // Set 8-bit Register
    pub fn set_reg8(&mut self, reg: Reg8, value: u8) {
        let index = reg as usize;
        if index < 4 {
            self.gpr[index] = (self.gpr[index] & 0xFFFF_FF00) | value as u32;
        } else {
            let cell = &mut self.gpr[index - 4];
            *cell = (*cell & 0xFFFF_00FF) | ((value as u32) << 8);
        }
    }

    pub fn get_reg16(&self, reg: Reg16) -> u16 {
        self.gpr[reg as usize] as u16
    }

    pub fn set_reg16(&mut self, reg: Reg16, value: u16) {
        let cell = &mut self.gpr[reg as usize];
        *cell = (*cell & 0xFFFF_0000) | value as u32;
    }

    pub fn get_reg32(&self, reg: Reg32) -> u32 {
        self.gpr[reg as usize]
    }

    pub fn set_reg32(&mut self, reg: Reg32, value: u32) {
        self.gpr[reg as usize] = value;
    }

    /// Read the register a 3-bit field names at the given operand width.
    pub fn read(&self, width: Width, index: u8) -> u32 {
        let index = (index & 7) as usize;
        match width {
            Width::Byte => self.get_reg8(REG8_TABLE[index]) as u32,
            Width::Word => self.get_reg16(REG16_TABLE[index]) as u32,
            Width::Dword => self.get_reg32(REG32_TABLE[index]),
        }
    }

    /// Write the register a 3-bit field names, truncating to the width.
    pub fn write(&mut self, width: Width, index: u8, value: u32) {
        let index = (index & 7) as usize;
        match width {
            Width::Byte => self.set_reg8(REG8_TABLE[index], value as u8),
            Width::Word => self.set_reg16(REG16_TABLE[index], value as u16),
            Width::Dword => self.set_reg32(REG32_TABLE[index], value),
        }
    }

    pub fn segment(&self, seg: SegReg) -> Segment {
        self.segments[seg as usize]
    }

    pub fn set_segment(&mut self, seg: SegReg, segment: Segment) {
        self.segments[seg as usize] = segment;
    }

    pub fn get_cpu_flag(&self, flag: CpuFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_cpu_flag(&mut self, flag: CpuFlags, value: bool) {
        self.flags.set(flag, value);
    }

    pub fn get_cpu_flags(&self) -> CpuFlags {
        self.flags
    }

    /// Overwrite EFLAGS, keeping only defined bits and forcing bit 1.
    pub fn set_cpu_flags(&mut self, new_flags: CpuFlags) {
        let sanitized = (new_flags.bits() & FLAGS_VALID_MASK) | CpuFlags::RESERVED.bits();
        self.flags = CpuFlags::from_bits_truncate(sanitized);
    }

    /// Replace the low 16 bits of EFLAGS (POPF / IRET with a 16-bit frame).
    pub fn set_flags_word(&mut self, value: u16) {
        let high = self.flags.bits() & 0xFFFF_0000;
        self.set_cpu_flags(CpuFlags::from_bits_retain(high | value as u32));
    }

    pub fn protected_mode(&self) -> bool {
        self.cr0.contains(Cr0::PE)
    }

    /// Offset-sized IP: the low 16 bits outside 32-bit code.
    pub fn ip(&self) -> u16 {
        self.eip as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_helpers() {
        assert_eq!(Width::Byte.sign_bit(), 0x80);
        assert_eq!(Width::Word.mask(), 0xFFFF);
        assert_eq!(Width::Byte.sign_extend(0xFE), 0xFFFF_FFFE);
        assert_eq!(Width::Word.sign_extend(0x7FFF), 0x7FFF);
        assert_eq!(Width::Dword.truncate(0x1234_5678), 0x1234_5678);
    }

    #[test]
    fn flags_keep_reserved_bit() {
        let mut regs = Registers::new();
        regs.set_cpu_flags(CpuFlags::empty());
        assert!(regs.get_cpu_flag(CpuFlags::RESERVED));

        regs.set_flags_word(0xFFFF);
        assert_eq!(regs.get_cpu_flags().bits() & 0xFFFF, 0x7FD7);
    }
}
