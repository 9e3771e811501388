use crate::alu::AluOp;
use crate::cpu::Cpu;
use crate::decoder::Prefixes;
use crate::error::CpuError;
use crate::registers::{CpuFlags, Reg16, SegReg, Width};

use super::transfer::{port_read, port_write};
use super::utils::{count_register, operand_width, set_count_register};

const SI: u8 = 6;
const DI: u8 = 7;

#[derive(Clone, Copy, PartialEq, Eq)]
enum StringOp {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
    Ins,
    Outs,
}

impl StringOp {
    // REPE/REPNE also look at ZF for these
    fn compares(self) -> bool {
        matches!(self, StringOp::Cmps | StringOp::Scas)
    }
}

// Step SI or DI by the element size, backwards when DF is set
fn advance(cpu: &mut Cpu, index: u8, width: Width) {
    let address_width = cpu.ctx.address_size();
    let value = cpu.regs.read(address_width, index);
    let value = if cpu.get_cpu_flag(CpuFlags::DF) {
        value.wrapping_sub(width.bytes())
    } else {
        value.wrapping_add(width.bytes())
    };
    cpu.regs.write(address_width, index, address_width.truncate(value));
}

// One element. Source is DS:SI (overridable), destination is always ES:DI.
fn iteration(cpu: &mut Cpu, op: StringOp, width: Width) -> Result<(), CpuError> {
    let address_width = cpu.ctx.address_size();
    let si = cpu.regs.read(address_width, SI);
    let di = cpu.regs.read(address_width, DI);
    let src = cpu.ctx.segment_or(SegReg::Ds);
    let port = cpu.regs.get_reg16(Reg16::Dx);

    match op {
        StringOp::Movs => {
            let value = cpu.read_mem(src, si, width)?;
            cpu.write_mem(SegReg::Es, di, width, value)?;
            advance(cpu, SI, width);
            advance(cpu, DI, width);
        }
        StringOp::Cmps => {
            let a = cpu.read_mem(src, si, width)?;
            let b = cpu.read_mem(SegReg::Es, di, width)?;
            cpu.alu(AluOp::Cmp, width, a, b);
            advance(cpu, SI, width);
            advance(cpu, DI, width);
        }
        StringOp::Stos => {
            let value = cpu.regs.read(width, 0);
            cpu.write_mem(SegReg::Es, di, width, value)?;
            advance(cpu, DI, width);
        }
        StringOp::Lods => {
            let value = cpu.read_mem(src, si, width)?;
            cpu.regs.write(width, 0, value);
            advance(cpu, SI, width);
        }
        StringOp::Scas => {
            let acc = cpu.regs.read(width, 0);
            let value = cpu.read_mem(SegReg::Es, di, width)?;
            cpu.alu(AluOp::Cmp, width, acc, value);
            advance(cpu, DI, width);
        }
        StringOp::Ins => {
            // Probe the destination first so a fault does not swallow the port read
            cpu.read_mem(SegReg::Es, di, width)?;
            let value = port_read(cpu, width, port);
            cpu.write_mem(SegReg::Es, di, width, value)?;
            advance(cpu, DI, width);
        }
        StringOp::Outs => {
            let value = cpu.read_mem(src, si, width)?;
            port_write(cpu, width, port, value);
            advance(cpu, SI, width);
        }
    }
    Ok(())
}

/// Run a string instruction, repeated under F3/F2.
///
/// The whole repetition completes inside one step. Each element commits its
/// own SI/DI/CX update, so a fault part way leaves a restartable state with
/// EIP still on the instruction.
fn execute(cpu: &mut Cpu, opcode: u8, op: StringOp) -> Result<(), CpuError> {
    let width = operand_width(cpu, opcode);
    let prefixes = cpu.ctx.prefixes;
    if !prefixes.intersects(Prefixes::REP | Prefixes::REPNE) {
        return iteration(cpu, op, width);
    }

    while count_register(cpu) != 0 {
        iteration(cpu, op, width)?;
        let count = count_register(cpu).wrapping_sub(1);
        set_count_register(cpu, count);

        if op.compares() {
            let zf = cpu.get_cpu_flag(CpuFlags::ZF);
            // REPE stops on a mismatch, REPNE on a match
            if prefixes.contains(Prefixes::REP) != zf {
                break;
            }
        }
    }
    Ok(())
}

// A4 / A5
pub fn movs(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Movs)
}

// A6 / A7
pub fn cmps(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Cmps)
}

// AA / AB
pub fn stos(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Stos)
}

// AC / AD
pub fn lods(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Lods)
}

// AE / AF
pub fn scas(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Scas)
}

// 6C / 6D
pub fn ins(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Ins)
}

// 6E / 6F
pub fn outs(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    execute(cpu, opcode, StringOp::Outs)
}
