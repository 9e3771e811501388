use crate::alu::AluOp;
use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::modrm::Operand;
use crate::registers::{CpuFlags, Width};

// Bit 0 of most opcodes selects byte vs. full operand width
pub fn operand_width(cpu: &Cpu, opcode: u8) -> Width {
    if opcode & 1 == 0 {
        Width::Byte
    } else {
        cpu.ctx.operand_size()
    }
}

/// Resolved operands of a two-operand instruction.
pub struct BinaryOperands {
    pub dest: Operand,
    pub width: Width,
    pub a: u32,
    pub b: u32,
}

/// Decode the operand forms shared by ADD..CMP and TEST.
///
/// The low three opcode bits of 00-3D pick the form: rm,reg / reg,rm / acc,imm.
/// 80-83 and F6/F7 take an immediate after the ModRM, 84/85 are TEST rm,reg
/// and A8/A9 TEST acc,imm.
pub fn decode_binary(cpu: &mut Cpu, opcode: u8) -> Result<BinaryOperands, CpuError> {
    let width = operand_width(cpu, opcode);

    let (dest, b) = match opcode {
        0x80 | 0x81 | 0x82 | 0x83 | 0xF6 | 0xF7 => {
            let (_, dest) = cpu.decode_rm()?;
            let b = match opcode {
                0x83 => cpu.fetch_imm8_sx(width)?,
                _ => cpu.fetch_imm(width)?,
            };
            (dest, b)
        }
        0x84 | 0x85 => {
            let (modrm, dest) = cpu.decode_rm()?;
            (dest, cpu.regs.read(width, modrm.reg))
        }
        0xA8 | 0xA9 => (Operand::Register(0), cpu.fetch_imm(width)?),
        _ => match opcode & 7 {
            0 | 1 => {
                let (modrm, dest) = cpu.decode_rm()?;
                (dest, cpu.regs.read(width, modrm.reg))
            }
            2 | 3 => {
                let (modrm, src) = cpu.decode_rm()?;
                let b = cpu.read_operand(src, width)?;
                (Operand::Register(modrm.reg), b)
            }
            _ => (Operand::Register(0), cpu.fetch_imm(width)?),
        },
    };

    let a = cpu.read_operand(dest, width)?;
    Ok(BinaryOperands { dest, width, a, b })
}

/// Shared body of the eight ALU mnemonics. Result and flags commit together,
/// after every operand has been read.
pub fn execute_alu(cpu: &mut Cpu, opcode: u8, op: AluOp) -> Result<(), CpuError> {
    let ops = decode_binary(cpu, opcode)?;
    let carry = cpu.get_cpu_flag(CpuFlags::CF);
    let result = crate::alu::binary(op, ops.width, ops.a, ops.b, carry);
    if op.writes_result() {
        cpu.write_operand(ops.dest, ops.width, result.value)?;
    }
    cpu.apply_flags(result.flags, CpuFlags::STATUS);
    Ok(())
}

/// Evaluate a condition code (the low nibble of Jcc/SETcc).
pub fn condition(cpu: &Cpu, cc: u8) -> bool {
    let f = |flag| cpu.get_cpu_flag(flag);
    let result = match (cc >> 1) & 7 {
        0 => f(CpuFlags::OF),
        1 => f(CpuFlags::CF),
        2 => f(CpuFlags::ZF),
        3 => f(CpuFlags::CF) || f(CpuFlags::ZF),
        4 => f(CpuFlags::SF),
        5 => f(CpuFlags::PF),
        6 => f(CpuFlags::SF) != f(CpuFlags::OF),
        _ => f(CpuFlags::ZF) || (f(CpuFlags::SF) != f(CpuFlags::OF)),
    };
    // Odd codes are the negations
    result != (cc & 1 == 1)
}

/// Count register for REP and LOOP: CX or ECX by address size.
pub fn count_register(cpu: &Cpu) -> u32 {
    cpu.regs.read(cpu.ctx.address_size(), 1)
}

pub fn set_count_register(cpu: &mut Cpu, value: u32) {
    let width = cpu.ctx.address_size();
    cpu.regs.write(width, 1, value);
}
