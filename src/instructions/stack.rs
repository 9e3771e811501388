use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::modrm::Operand;
use crate::registers::{CpuFlags, SegReg, Width};

// ===== Helpers =====

// 06/0E/16/1E/07/17/1F encode the register in bits 3-4; 0F A0/A1/A8/A9 are FS and GS
fn stack_segment(cpu: &Cpu, opcode: u8) -> SegReg {
    if cpu.ctx.opcode >= 0x0F00 {
        if opcode & 0x08 == 0 { SegReg::Fs } else { SegReg::Gs }
    } else {
        match (opcode >> 3) & 3 {
            0 => SegReg::Es,
            1 => SegReg::Cs,
            2 => SegReg::Ss,
            _ => SegReg::Ds,
        }
    }
}

// Run a multi-push sequence; a fault puts SP back where it started
fn atomically<T>(cpu: &mut Cpu, body: impl FnOnce(&mut Cpu) -> Result<T, CpuError>) -> Result<T, CpuError> {
    let saved_sp = cpu.stack_pointer();
    let result = body(cpu);
    if result.is_err() {
        cpu.set_stack_pointer(saved_sp);
    }
    result
}

// ========================================================================
// PUSH / POP
// ========================================================================

// 50-57
pub fn push_reg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    // PUSH SP stores the value from before the decrement
    let value = cpu.regs.read(width, opcode & 7);
    cpu.push(width, value)
}

// 58-5F
pub fn pop_reg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let value = cpu.pop(width)?;
    cpu.regs.write(width, opcode & 7, value);
    Ok(())
}

// 06 / 0E / 16 / 1E, 0F A0 / 0F A8
pub fn push_sreg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let seg = stack_segment(cpu, opcode);
    let selector = cpu.regs.segment(seg).selector as u32;
    cpu.push(cpu.ctx.operand_size(), selector)
}

// 07 / 17 / 1F, 0F A1 / 0F A9
pub fn pop_sreg(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let seg = stack_segment(cpu, opcode);
    let selector = cpu.pop(cpu.ctx.operand_size())? as u16;
    cpu.load_segment(seg, selector);
    Ok(())
}

// FF /6
pub fn push_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (_, operand) = cpu.decode_rm()?;
    let value = cpu.read_operand(operand, width)?;
    cpu.push(width, value)
}

// 8F /0
pub fn pop_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (_, operand) = cpu.decode_rm()?;
    let value = cpu.peek_stack(width, 0)?;
    let sp = cpu.stack_pointer().wrapping_add(width.bytes());
    match operand {
        Operand::Register(_) => {
            cpu.set_stack_pointer(sp);
            cpu.write_operand(operand, width, value)
        }
        Operand::Memory { .. } => {
            cpu.write_operand(operand, width, value)?;
            cpu.set_stack_pointer(sp);
            Ok(())
        }
    }
}

// 68 imm16/32, 6A imm8 sign-extended
pub fn push_imm(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let value = if opcode == 0x6A {
        cpu.fetch_imm8_sx(width)?
    } else {
        cpu.fetch_imm(width)?
    };
    cpu.push(width, value)
}

// 60: AX CX DX BX SP BP SI DI, SP as it was before the first push
pub fn pusha(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let values: Vec<u32> = (0..8).map(|index| cpu.regs.read(width, index)).collect();
    atomically(cpu, |cpu| {
        for value in values {
            cpu.push(width, value)?;
        }
        Ok(())
    })
}

// 61: the stored SP slot is skipped
pub fn popa(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let mut values = [0u32; 8];
    for (slot, value) in values.iter_mut().enumerate() {
        *value = cpu.peek_stack(width, width.bytes() * slot as u32)?;
    }
    let sp = cpu.stack_pointer().wrapping_add(width.bytes() * 8);
    cpu.set_stack_pointer(sp);
    for (slot, value) in values.iter().enumerate() {
        let index = 7 - slot as u8;
        if index != 4 {
            cpu.regs.write(width, index, *value);
        }
    }
    Ok(())
}

// 9C
pub fn pushf(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let flags = cpu.regs.get_cpu_flags() - (CpuFlags::VM | CpuFlags::RF);
    cpu.push(width, width.truncate(flags.bits()))
}

// 9D
pub fn popf(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let value = cpu.pop(width)?;
    match width {
        Width::Dword => {
            // VM is not writable from POPFD
            let vm = cpu.regs.get_cpu_flags() & CpuFlags::VM;
            let flags = (CpuFlags::from_bits_retain(value) - CpuFlags::VM) | vm;
            cpu.regs.set_cpu_flags(flags);
        }
        _ => cpu.regs.set_flags_word(value as u16),
    }
    Ok(())
}

// ========================================================================
// ENTER / LEAVE
// ========================================================================

// C8 imm16, imm8
pub fn enter(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let stack_width = cpu.stack_width();
    let size = cpu.fetch_u16()? as u32;
    let level = cpu.fetch_u8()? & 0x1F;

    let frame = atomically(cpu, |cpu| {
        let bp = cpu.regs.read(width, 5);
        cpu.push(width, bp)?;
        let frame = cpu.stack_pointer();

        let mut outer = cpu.regs.read(stack_width, 5);
        for _ in 1..level.max(1) {
            outer = stack_width.truncate(outer.wrapping_sub(width.bytes()));
            let saved = cpu.read_mem(SegReg::Ss, outer, width)?;
            cpu.push(width, saved)?;
        }
        if level > 0 {
            cpu.push(width, frame)?;
        }
        Ok(frame)
    })?;

    cpu.regs.write(width, 5, frame);
    let sp = cpu.stack_pointer().wrapping_sub(size);
    cpu.set_stack_pointer(sp);
    Ok(())
}

// C9
pub fn leave(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let stack_width = cpu.stack_width();
    let frame = cpu.regs.read(stack_width, 5);
    let saved_bp = cpu.read_mem(SegReg::Ss, frame, width)?;
    cpu.set_stack_pointer(frame.wrapping_add(width.bytes()));
    cpu.regs.write(width, 5, saved_bp);
    Ok(())
}
