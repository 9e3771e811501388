use crate::alu::{self, AluOp, ShiftOp};
use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::modrm::Operand;
use crate::registers::{CpuFlags, Reg8, Width};

use super::utils::{decode_binary, execute_alu, operand_width};

pub fn or(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Or)
}

pub fn and(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::And)
}

pub fn xor(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute_alu(cpu, opcode, AluOp::Xor)
}

// 84/85, A8/A9, F6/F7 /0 /1: AND without the store
pub fn test(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let ops = decode_binary(cpu, opcode)?;
    let flags = alu::logical(ops.width, ops.a & ops.b);
    cpu.apply_flags(flags, CpuFlags::STATUS);
    Ok(())
}

// F6/F7 /2, no flags
pub fn not(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let value = cpu.read_operand(operand, width)?;
    cpu.write_operand(operand, width, !value & width.mask())
}

// ========================================================================
// Shifts / rotates: C0/C1 by imm8, D0/D1 by 1, D2/D3 by CL
// ========================================================================

fn shift_form(cpu: &mut Cpu, opcode: u8, op: ShiftOp) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let (_, operand) = cpu.decode_rm()?;
    let count = match opcode {
        0xC0 | 0xC1 => cpu.fetch_u8()? as u32,
        0xD0 | 0xD1 => 1,
        _ => cpu.regs.get_reg8(Reg8::Cl) as u32,
    } & 0x1F;

    let value = cpu.read_operand(operand, width)?;
    if let Some(result) = alu::shift(op, width, value, count, cpu.regs.get_cpu_flags()) {
        cpu.write_operand(operand, width, result.value)?;
        cpu.apply_flags(result.flags, CpuFlags::STATUS);
    }
    Ok(())
}

pub fn rol(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Rol)
}

pub fn ror(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Ror)
}

pub fn rcl(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Rcl)
}

pub fn rcr(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Rcr)
}

pub fn shl(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Shl)
}

pub fn shr(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Shr)
}

pub fn sal(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Sal)
}

pub fn sar(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    shift_form(cpu, opcode, ShiftOp::Sar)
}

// ========================================================================
// Bit test family (0F A3/AB/B3/BB, 0F BA /4-/7) and bit scans
// ========================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum BitAction {
    Test,
    Set,
    Reset,
    Complement,
}

fn bit_op(cpu: &mut Cpu, operand: Operand, width: Width, bit: u32, from_register: bool, action: BitAction) -> Result<(), CpuError> {
    // A register bit offset may reach outside the addressed word in memory
    let (operand, bit) = match operand {
        Operand::Memory { segment, offset } if from_register => {
            let signed = width.sign_extend(bit) as i32;
            let step = signed.div_euclid(width.bits() as i32);
            let offset = offset.wrapping_add((step * width.bytes() as i32) as u32);
            (Operand::Memory { segment, offset }, signed.rem_euclid(width.bits() as i32) as u32)
        }
        _ => (operand, bit % width.bits()),
    };

    let value = cpu.read_operand(operand, width)?;
    let mask = 1u32 << bit;
    let updated = match action {
        BitAction::Test => value,
        BitAction::Set => value | mask,
        BitAction::Reset => value & !mask,
        BitAction::Complement => value ^ mask,
    };
    if action != BitAction::Test {
        cpu.write_operand(operand, width, updated)?;
    }
    cpu.set_cpu_flag(CpuFlags::CF, value & mask != 0);
    Ok(())
}

fn bit_reg_form(cpu: &mut Cpu, action: BitAction) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (modrm, operand) = cpu.decode_rm()?;
    let bit = cpu.regs.read(width, modrm.reg);
    bit_op(cpu, operand, width, bit, true, action)
}

fn bit_imm_form(cpu: &mut Cpu, action: BitAction) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (_, operand) = cpu.decode_rm()?;
    let bit = cpu.fetch_u8()? as u32;
    bit_op(cpu, operand, width, bit, false, action)
}

// 0F A3
pub fn bt(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_reg_form(cpu, BitAction::Test)
}

// 0F AB
pub fn bts(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_reg_form(cpu, BitAction::Set)
}

// 0F B3
pub fn btr(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_reg_form(cpu, BitAction::Reset)
}

// 0F BB
pub fn btc(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_reg_form(cpu, BitAction::Complement)
}

pub fn bt_imm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_imm_form(cpu, BitAction::Test)
}

pub fn bts_imm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_imm_form(cpu, BitAction::Set)
}

pub fn btr_imm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_imm_form(cpu, BitAction::Reset)
}

pub fn btc_imm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    bit_imm_form(cpu, BitAction::Complement)
}

// 0F BC BSF / 0F BD BSR
pub fn bit_scan(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (modrm, operand) = cpu.decode_rm()?;
    let value = cpu.read_operand(operand, width)?;
    if value == 0 {
        // Destination is left unchanged
        cpu.set_cpu_flag(CpuFlags::ZF, true);
        return Ok(());
    }
    let index = if opcode == 0xBC {
        value.trailing_zeros()
    } else {
        31 - value.leading_zeros()
    };
    cpu.regs.write(width, modrm.reg, index);
    cpu.set_cpu_flag(CpuFlags::ZF, false);
    Ok(())
}
