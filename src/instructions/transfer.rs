use crate::cpu::Cpu;
use crate::error::{CpuError, DecodeError};
use crate::modrm::Operand;
use crate::registers::{CpuFlags, Reg8, Reg16, SegReg, Width};

use super::utils::operand_width;

// ========================================================================
// MOV
// ========================================================================

// 88 / 89 / 8A / 8B
pub fn mov(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (modrm, operand) = cpu.decode_rm()?;
    if opcode & 2 == 0 {
        let value = cpu.regs.read(width, modrm.reg);
        cpu.write_operand(operand, width, value)
    } else {
        let value = cpu.read_operand(operand, width)?;
        cpu.regs.write(width, modrm.reg, value);
        Ok(())
    }
}

fn sreg_field(reg: u8) -> Result<SegReg, CpuError> {
    SegReg::from_encoding(reg).ok_or_else(|| DecodeError::BadSegment { encoding: reg }.into())
}

// 8C MOV r/m16, Sreg
pub fn mov_rm_sreg(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (modrm, operand) = cpu.decode_rm()?;
    let seg = sreg_field(modrm.reg)?;
    let selector = cpu.regs.segment(seg).selector as u32;
    // Register destinations take the full operand size, memory always 16 bits
    let width = match operand {
        Operand::Register(_) => cpu.ctx.operand_size(),
        Operand::Memory { .. } => Width::Word,
    };
    cpu.write_operand(operand, width, selector)
}

// 8E MOV Sreg, r/m16
pub fn mov_sreg_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (modrm, operand) = cpu.decode_rm()?;
    let seg = sreg_field(modrm.reg)?;
    if seg == SegReg::Cs {
        return Err(DecodeError::BadSegment { encoding: modrm.reg }.into());
    }
    let selector = cpu.read_operand(operand, Width::Word)? as u16;
    cpu.load_segment(seg, selector);
    Ok(())
}

// A0-A3 MOV acc <-> moffs
pub fn mov_moffs(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let offset = cpu.fetch_offset()?;
    let seg = cpu.ctx.segment_or(SegReg::Ds);
    if opcode & 2 == 0 {
        let value = cpu.read_mem(seg, offset, width)?;
        cpu.regs.write(width, 0, value);
        Ok(())
    } else {
        let value = cpu.regs.read(width, 0);
        cpu.write_mem(seg, offset, width, value)
    }
}

// B0-BF MOV reg, imm
pub fn mov_reg_imm(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = if opcode < 0xB8 {
        Width::Byte
    } else {
        cpu.ctx.operand_size()
    };
    let value = cpu.fetch_imm(width)?;
    cpu.regs.write(width, opcode & 7, value);
    Ok(())
}

// C6 / C7 /0
pub fn mov_rm_imm(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let value = cpu.fetch_imm(width)?;
    cpu.write_operand(operand, width, value)
}

// 0F B6/B7 MOVZX, 0F BE/BF MOVSX
pub fn mov_extend(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let dest_width = cpu.ctx.operand_size();
    let src_width = if opcode & 1 == 0 { Width::Byte } else { Width::Word };
    let (modrm, operand) = cpu.decode_rm()?;
    let value = cpu.read_operand(operand, src_width)?;
    let value = if opcode >= 0xBE {
        src_width.sign_extend(value)
    } else {
        value
    };
    cpu.regs.write(dest_width, modrm.reg, dest_width.truncate(value));
    Ok(())
}

// ========================================================================
// XCHG / LEA / far pointer loads
// ========================================================================

// 86 / 87
pub fn xchg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (modrm, operand) = cpu.decode_rm()?;
    let a = cpu.read_operand(operand, width)?;
    let b = cpu.regs.read(width, modrm.reg);
    cpu.write_operand(operand, width, b)?;
    cpu.regs.write(width, modrm.reg, a);
    Ok(())
}

// 90-97 XCHG eAX, reg (90 is NOP)
pub fn xchg_acc(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let reg = opcode & 7;
    let acc = cpu.regs.read(width, 0);
    let other = cpu.regs.read(width, reg);
    cpu.regs.write(width, 0, other);
    cpu.regs.write(width, reg, acc);
    Ok(())
}

// 8D
pub fn lea(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (modrm, _, offset) = cpu.decode_memory_rm()?;
    cpu.regs.write(width, modrm.reg, width.truncate(offset));
    Ok(())
}

fn load_far_pointer(cpu: &mut Cpu, seg: SegReg) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (modrm, segment, offset) = cpu.decode_memory_rm()?;
    let pointer = cpu.read_mem(segment, offset, width)?;
    let selector = cpu.read_mem(segment, offset.wrapping_add(width.bytes()), Width::Word)? as u16;
    cpu.regs.write(width, modrm.reg, pointer);
    cpu.load_segment(seg, selector);
    Ok(())
}

// C4
pub fn les(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    load_far_pointer(cpu, SegReg::Es)
}

// C5
pub fn lds(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    load_far_pointer(cpu, SegReg::Ds)
}

// 0F B2
pub fn lss(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    load_far_pointer(cpu, SegReg::Ss)
}

// 0F B4
pub fn lfs(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    load_far_pointer(cpu, SegReg::Fs)
}

// 0F B5
pub fn lgs(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    load_far_pointer(cpu, SegReg::Gs)
}

// ========================================================================
// Conversions, XLAT, AH <-> flags
// ========================================================================

// 98 CBW / CWDE
pub fn cbw(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    match cpu.ctx.operand_size() {
        Width::Dword => {
            let ax = cpu.regs.read(Width::Word, 0);
            cpu.regs.write(Width::Dword, 0, Width::Word.sign_extend(ax));
        }
        _ => {
            let al = cpu.regs.get_reg8(Reg8::Al) as u32;
            cpu.regs.write(Width::Word, 0, Width::Byte.sign_extend(al));
        }
    }
    Ok(())
}

// 99 CWD / CDQ
pub fn cwd(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let negative = cpu.regs.read(width, 0) & width.sign_bit() != 0;
    cpu.regs.write(width, 2, if negative { width.mask() } else { 0 });
    Ok(())
}

// D7
pub fn xlat(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let address_width = cpu.ctx.address_size();
    let base = cpu.regs.read(address_width, 3);
    let al = cpu.regs.get_reg8(Reg8::Al) as u32;
    let offset = address_width.truncate(base.wrapping_add(al));
    let seg = cpu.ctx.segment_or(SegReg::Ds);
    let value = cpu.read_mem(seg, offset, Width::Byte)?;
    cpu.regs.set_reg8(Reg8::Al, value as u8);
    Ok(())
}

const AH_FLAGS: CpuFlags = CpuFlags::SF
    .union(CpuFlags::ZF)
    .union(CpuFlags::AF)
    .union(CpuFlags::PF)
    .union(CpuFlags::CF);

// 9F
pub fn lahf(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let flags = cpu.regs.get_cpu_flags().bits() as u8;
    cpu.regs.set_reg8(Reg8::Ah, flags);
    Ok(())
}

// 9E
pub fn sahf(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let ah = cpu.regs.get_reg8(Reg8::Ah) as u32;
    cpu.apply_flags(CpuFlags::from_bits_truncate(ah), AH_FLAGS);
    Ok(())
}

// ========================================================================
// Port I/O
// ========================================================================

pub(super) fn port_read(cpu: &mut Cpu, width: Width, port: u16) -> u32 {
    match width {
        Width::Byte => cpu.io.read_8(port) as u32,
        Width::Word => cpu.io.read_16(port) as u32,
        Width::Dword => cpu.io.read_32(port),
    }
}

pub(super) fn port_write(cpu: &mut Cpu, width: Width, port: u16, value: u32) {
    match width {
        Width::Byte => cpu.io.write_8(port, value as u8),
        Width::Word => cpu.io.write_16(port, value as u16),
        Width::Dword => cpu.io.write_32(port, value),
    }
}

// E4 / E5 / EC / ED
pub fn in_port(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let port = if opcode & 0x08 == 0 {
        cpu.fetch_u8()? as u16
    } else {
        cpu.regs.get_reg16(Reg16::Dx)
    };
    let value = port_read(cpu, width, port);
    cpu.regs.write(width, 0, value);
    Ok(())
}

// E6 / E7 / EE / EF
pub fn out_port(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let port = if opcode & 0x08 == 0 {
        cpu.fetch_u8()? as u16
    } else {
        cpu.regs.get_reg16(Reg16::Dx)
    };
    let value = cpu.regs.read(width, 0);
    port_write(cpu, width, port, value);
    Ok(())
}
