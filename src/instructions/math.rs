use crate::alu::{self, AluOp};
use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::interrupt::DIVIDE_ERROR;
use crate::modrm::Operand;
use crate::registers::{CpuFlags, Reg8, Reg16, Width};

use super::utils::{execute_alu, operand_width};

// ========================================================================
// ADD / ADC / SUB / SBB / CMP (every encoding funnels through execute_alu)
// ========================================================================

pub fn add(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Add)
}

pub fn adc(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Adc)
}

pub fn sub(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Sub)
}

pub fn sbb(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Sbb)
}

pub fn cmp(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Cmp)
}

// ========================================================================
// INC / DEC / NEG
// ========================================================================

fn inc_dec(cpu: &mut Cpu, operand: Operand, width: Width, increment: bool) -> Result<(), CpuError> {
    let value = cpu.read_operand(operand, width)?;
    let result = alu::step(width, value, increment);
    cpu.write_operand(operand, width, result.value)?;
    // CF is left alone
    cpu.apply_flags(result.flags, CpuFlags::STATUS - CpuFlags::CF);
    Ok(())
}

// 40-47 INC r16/r32
pub fn inc_reg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    inc_dec(cpu, Operand::Register(opcode & 7), width, true)
}

// 48-4F DEC r16/r32
pub fn dec_reg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    inc_dec(cpu, Operand::Register(opcode & 7), width, false)
}

// FE/FF /0
pub fn inc_rm(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    inc_dec(cpu, operand, width, true)
}

// FE/FF /1
pub fn dec_rm(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    inc_dec(cpu, operand, width, false)
}

// F6/F7 /3
pub fn neg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let value = cpu.read_operand(operand, width)?;
    let result = alu::binary(AluOp::Sub, width, 0, value, false);
    cpu.write_operand(operand, width, result.value)?;
    cpu.apply_flags(result.flags, CpuFlags::STATUS);
    Ok(())
}

// ========================================================================
// MUL / IMUL
// ========================================================================

fn set_mul_overflow(cpu: &mut Cpu, overflow: bool) {
    cpu.set_cpu_flag(CpuFlags::CF, overflow);
    cpu.set_cpu_flag(CpuFlags::OF, overflow);
}

// Store a double-width product into AX, DX:AX or EDX:EAX
fn store_product(cpu: &mut Cpu, width: Width, product: u64) {
    match width {
        Width::Byte => cpu.regs.set_reg16(Reg16::Ax, product as u16),
        _ => {
            cpu.regs.write(width, 0, product as u32);
            cpu.regs.write(width, 2, (product >> width.bits()) as u32);
        }
    }
}

// F6/F7 /4
pub fn mul(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let src = cpu.read_operand(operand, width)? as u64;
    let acc = cpu.regs.read(width, 0) as u64;

    let product = acc * src;
    store_product(cpu, width, product);
    set_mul_overflow(cpu, product >> width.bits() != 0);
    Ok(())
}

fn signed(width: Width, value: u32) -> i64 {
    width.sign_extend(value) as i32 as i64
}

// F6/F7 /5
pub fn imul(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let src = signed(width, cpu.read_operand(operand, width)?);
    let acc = signed(width, cpu.regs.read(width, 0));

    let product = acc * src;
    store_product(cpu, width, product as u64);
    // Overflow when the upper half is not just the sign of the lower half
    let low = signed(width, width.truncate(product as u32));
    set_mul_overflow(cpu, low != product);
    Ok(())
}

fn imul_into_reg(cpu: &mut Cpu, reg: u8, width: Width, a: u32, b: u32) {
    let product = signed(width, a) * signed(width, b);
    let low = width.truncate(product as u32);
    cpu.regs.write(width, reg, low);
    set_mul_overflow(cpu, signed(width, low) != product);
}

// 0F AF IMUL r, r/m
pub fn imul_reg_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (modrm, operand) = cpu.decode_rm()?;
    let src = cpu.read_operand(operand, width)?;
    let dest = cpu.regs.read(width, modrm.reg);
    imul_into_reg(cpu, modrm.reg, width, dest, src);
    Ok(())
}

// 69 IMUL r, r/m, imm / 6B IMUL r, r/m, imm8
pub fn imul_imm(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (modrm, operand) = cpu.decode_rm()?;
    let imm = if opcode == 0x6B {
        cpu.fetch_imm8_sx(width)?
    } else {
        cpu.fetch_imm(width)?
    };
    let src = cpu.read_operand(operand, width)?;
    imul_into_reg(cpu, modrm.reg, width, src, imm);
    Ok(())
}

// ========================================================================
// DIV / IDIV
// ========================================================================

fn dividend(cpu: &Cpu, width: Width) -> u64 {
    match width {
        Width::Byte => cpu.regs.get_reg16(Reg16::Ax) as u64,
        _ => ((cpu.regs.read(width, 2) as u64) << width.bits()) | cpu.regs.read(width, 0) as u64,
    }
}

fn store_quotient(cpu: &mut Cpu, width: Width, quotient: u32, remainder: u32) {
    match width {
        Width::Byte => {
            cpu.regs.set_reg8(Reg8::Al, quotient as u8);
            cpu.regs.set_reg8(Reg8::Ah, remainder as u8);
        }
        _ => {
            cpu.regs.write(width, 0, quotient);
            cpu.regs.write(width, 2, remainder);
        }
    }
}

// F6/F7 /6
pub fn div(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let divisor = cpu.read_operand(operand, width)? as u64;
    if divisor == 0 {
        return cpu.raise_fault(DIVIDE_ERROR);
    }

    let dividend = dividend(cpu, width);
    let quotient = dividend / divisor;
    if quotient > width.mask() as u64 {
        return cpu.raise_fault(DIVIDE_ERROR);
    }
    store_quotient(cpu, width, quotient as u32, (dividend % divisor) as u32);
    Ok(())
}

// F6/F7 /7
pub fn idiv(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let divisor = signed(width, cpu.read_operand(operand, width)?);
    if divisor == 0 {
        return cpu.raise_fault(DIVIDE_ERROR);
    }

    let raw = dividend(cpu, width);
    let dividend = match width {
        Width::Byte => raw as u16 as i16 as i64,
        Width::Word => raw as u32 as i32 as i64,
        Width::Dword => raw as i64,
    };
    let (Some(quotient), Some(remainder)) = (dividend.checked_div(divisor), dividend.checked_rem(divisor)) else {
        return cpu.raise_fault(DIVIDE_ERROR);
    };

    let half = 1i64 << (width.bits() - 1);
    if quotient < -half || quotient >= half {
        return cpu.raise_fault(DIVIDE_ERROR);
    }
    store_quotient(cpu, width, width.truncate(quotient as u32), width.truncate(remainder as u32));
    Ok(())
}

// ========================================================================
// BCD adjust
// ========================================================================

fn set_szp_byte(cpu: &mut Cpu, value: u8) {
    let flags = alu::logical(Width::Byte, value as u32);
    cpu.apply_flags(flags, CpuFlags::ZF | CpuFlags::SF | CpuFlags::PF);
}

// 27
pub fn daa(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let old_al = cpu.regs.get_reg8(Reg8::Al);
    let old_cf = cpu.get_cpu_flag(CpuFlags::CF);
    let mut al = old_al;
    let mut cf = false;

    if (al & 0x0F) > 9 || cpu.get_cpu_flag(CpuFlags::AF) {
        let (sum, carry) = al.overflowing_add(6);
        al = sum;
        cf = old_cf || carry;
        cpu.set_cpu_flag(CpuFlags::AF, true);
    } else {
        cpu.set_cpu_flag(CpuFlags::AF, false);
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_add(0x60);
        cf = true;
    }

    cpu.regs.set_reg8(Reg8::Al, al);
    cpu.set_cpu_flag(CpuFlags::CF, cf);
    set_szp_byte(cpu, al);
    Ok(())
}

// 2F
pub fn das(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let old_al = cpu.regs.get_reg8(Reg8::Al);
    let old_cf = cpu.get_cpu_flag(CpuFlags::CF);
    let mut al = old_al;
    let mut cf = false;

    if (al & 0x0F) > 9 || cpu.get_cpu_flag(CpuFlags::AF) {
        let (diff, borrow) = al.overflowing_sub(6);
        al = diff;
        cf = old_cf || borrow;
        cpu.set_cpu_flag(CpuFlags::AF, true);
    } else {
        cpu.set_cpu_flag(CpuFlags::AF, false);
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_sub(0x60);
        cf = true;
    }

    cpu.regs.set_reg8(Reg8::Al, al);
    cpu.set_cpu_flag(CpuFlags::CF, cf);
    set_szp_byte(cpu, al);
    Ok(())
}

// 37
pub fn aaa(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let adjust = (cpu.regs.get_reg8(Reg8::Al) & 0x0F) > 9 || cpu.get_cpu_flag(CpuFlags::AF);
    if adjust {
        let ax = cpu.regs.get_reg16(Reg16::Ax).wrapping_add(0x106);
        cpu.regs.set_reg16(Reg16::Ax, ax);
    }
    cpu.set_cpu_flag(CpuFlags::AF, adjust);
    cpu.set_cpu_flag(CpuFlags::CF, adjust);
    let al = cpu.regs.get_reg8(Reg8::Al) & 0x0F;
    cpu.regs.set_reg8(Reg8::Al, al);
    Ok(())
}

// 3F
pub fn aas(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let adjust = (cpu.regs.get_reg8(Reg8::Al) & 0x0F) > 9 || cpu.get_cpu_flag(CpuFlags::AF);
    if adjust {
        let al = cpu.regs.get_reg8(Reg8::Al).wrapping_sub(6);
        let ah = cpu.regs.get_reg8(Reg8::Ah).wrapping_sub(1);
        cpu.regs.set_reg8(Reg8::Al, al);
        cpu.regs.set_reg8(Reg8::Ah, ah);
    }
    cpu.set_cpu_flag(CpuFlags::AF, adjust);
    cpu.set_cpu_flag(CpuFlags::CF, adjust);
    let al = cpu.regs.get_reg8(Reg8::Al) & 0x0F;
    cpu.regs.set_reg8(Reg8::Al, al);
    Ok(())
}

// D4 ib
pub fn aam(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let base = cpu.fetch_u8()?;
    if base == 0 {
        return cpu.raise_fault(DIVIDE_ERROR);
    }
    let al = cpu.regs.get_reg8(Reg8::Al);
    cpu.regs.set_reg8(Reg8::Ah, al / base);
    cpu.regs.set_reg8(Reg8::Al, al % base);
    set_szp_byte(cpu, al % base);
    Ok(())
}

// D5 ib
pub fn aad(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let base = cpu.fetch_u8()?;
    let al = cpu.regs.get_reg8(Reg8::Al);
    let ah = cpu.regs.get_reg8(Reg8::Ah);
    let result = al.wrapping_add(ah.wrapping_mul(base));
    cpu.regs.set_reg16(Reg16::Ax, result as u16);
    set_szp_byte(cpu, result);
    Ok(())
}
