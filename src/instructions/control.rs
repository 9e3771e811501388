use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::interrupt::{BREAKPOINT, OVERFLOW};
use crate::registers::{CpuFlags, SegReg, Width};

use super::utils::{condition, count_register, set_count_register};

// ===== Helpers =====

// Relative targets wrap at the operand size
fn relative_target(cpu: &Cpu, displacement: u32) -> u32 {
    cpu.ctx.cursor.wrapping_add(displacement) & cpu.ctx.operand_size().mask()
}

fn fetch_rel8(cpu: &mut Cpu) -> Result<u32, CpuError> {
    let byte = cpu.fetch_u8()?;
    Ok(Width::Byte.sign_extend(byte as u32))
}

fn fetch_rel(cpu: &mut Cpu) -> Result<u32, CpuError> {
    let width = cpu.ctx.operand_size();
    let value = cpu.fetch_imm(width)?;
    Ok(width.sign_extend(value))
}

// Push CS then the return offset; SP is restored if the second store faults
fn push_far_return(cpu: &mut Cpu, width: Width) -> Result<(), CpuError> {
    let saved_sp = cpu.stack_pointer();
    let cs = cpu.regs.segment(SegReg::Cs).selector as u32;
    let ret = cpu.ctx.cursor;
    cpu.push(width, cs)?;
    if let Err(e) = cpu.push(width, ret) {
        cpu.set_stack_pointer(saved_sp);
        return Err(e);
    }
    Ok(())
}

fn far_transfer(cpu: &mut Cpu, selector: u16, offset: u32) {
    cpu.load_segment(SegReg::Cs, selector);
    cpu.ctx.branch = Some(offset);
}

// Memory operand holding offset:selector (FF /3, FF /5)
fn read_far_pointer(cpu: &mut Cpu) -> Result<(u16, u32), CpuError> {
    let width = cpu.ctx.operand_size();
    let (_, segment, offset) = cpu.decode_memory_rm()?;
    let target = cpu.read_mem(segment, offset, width)?;
    let selector = cpu.read_mem(segment, offset.wrapping_add(width.bytes()), Width::Word)? as u16;
    Ok((selector, target))
}

// ========================================================================
// JMP / CALL
// ========================================================================

// E9 rel16/32, EB rel8
pub fn jmp_rel(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let displacement = if opcode == 0xEB {
        fetch_rel8(cpu)?
    } else {
        fetch_rel(cpu)?
    };
    cpu.ctx.branch = Some(relative_target(cpu, displacement));
    Ok(())
}

// E8
pub fn call_rel(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let displacement = fetch_rel(cpu)?;
    let target = relative_target(cpu, displacement);
    cpu.push(width, cpu.ctx.cursor)?;
    cpu.ctx.branch = Some(target);
    Ok(())
}

// EA ptr16:16/32
pub fn jmp_far(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let offset = cpu.fetch_imm(cpu.ctx.operand_size())?;
    let selector = cpu.fetch_u16()?;
    far_transfer(cpu, selector, offset);
    Ok(())
}

// 9A ptr16:16/32
pub fn call_far(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let offset = cpu.fetch_imm(width)?;
    let selector = cpu.fetch_u16()?;
    push_far_return(cpu, width)?;
    far_transfer(cpu, selector, offset);
    Ok(())
}

// FF /2
pub fn call_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (_, operand) = cpu.decode_rm()?;
    let target = cpu.read_operand(operand, width)?;
    cpu.push(width, cpu.ctx.cursor)?;
    cpu.ctx.branch = Some(target);
    Ok(())
}

// FF /3
pub fn call_far_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (selector, offset) = read_far_pointer(cpu)?;
    push_far_return(cpu, width)?;
    far_transfer(cpu, selector, offset);
    Ok(())
}

// FF /4
pub fn jmp_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let (_, operand) = cpu.decode_rm()?;
    let target = cpu.read_operand(operand, width)?;
    cpu.ctx.branch = Some(target);
    Ok(())
}

// FF /5
pub fn jmp_far_rm(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (selector, offset) = read_far_pointer(cpu)?;
    far_transfer(cpu, selector, offset);
    Ok(())
}

// ========================================================================
// RET / RETF
// ========================================================================

// C3, C2 imm16
pub fn ret(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let release = if opcode == 0xC2 { cpu.fetch_u16()? as u32 } else { 0 };
    let target = cpu.pop(cpu.ctx.operand_size())?;
    let sp = cpu.stack_pointer().wrapping_add(release);
    cpu.set_stack_pointer(sp);
    cpu.ctx.branch = Some(target);
    Ok(())
}

// CB, CA imm16
pub fn retf(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let width = cpu.ctx.operand_size();
    let release = if opcode == 0xCA { cpu.fetch_u16()? as u32 } else { 0 };
    let offset = cpu.peek_stack(width, 0)?;
    let selector = cpu.peek_stack(width, width.bytes())? as u16;
    let sp = cpu
        .stack_pointer()
        .wrapping_add(width.bytes() * 2)
        .wrapping_add(release);
    cpu.set_stack_pointer(sp);
    far_transfer(cpu, selector, offset);
    Ok(())
}

// ========================================================================
// Conditional transfers
// ========================================================================

// 70-7F
pub fn jcc_short(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let displacement = fetch_rel8(cpu)?;
    if condition(cpu, opcode & 0x0F) {
        cpu.ctx.branch = Some(relative_target(cpu, displacement));
    }
    Ok(())
}

// 0F 80-8F
pub fn jcc_near(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let displacement = fetch_rel(cpu)?;
    if condition(cpu, opcode & 0x0F) {
        cpu.ctx.branch = Some(relative_target(cpu, displacement));
    }
    Ok(())
}

// 0F 90-9F
pub fn setcc(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let (_, operand) = cpu.decode_rm()?;
    let value = condition(cpu, opcode & 0x0F) as u32;
    cpu.write_operand(operand, Width::Byte, value)
}

// E0 LOOPNE, E1 LOOPE, E2 LOOP
pub fn loop_family(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    let displacement = fetch_rel8(cpu)?;
    let width = cpu.ctx.address_size();
    let count = width.truncate(count_register(cpu).wrapping_sub(1));
    set_count_register(cpu, count);

    let zf = cpu.get_cpu_flag(CpuFlags::ZF);
    let taken = count != 0
        && match opcode {
            0xE0 => !zf,
            0xE1 => zf,
            _ => true,
        };
    if taken {
        cpu.ctx.branch = Some(relative_target(cpu, displacement));
    }
    Ok(())
}

// E3 JCXZ / JECXZ
pub fn jcxz(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let displacement = fetch_rel8(cpu)?;
    if count_register(cpu) == 0 {
        cpu.ctx.branch = Some(relative_target(cpu, displacement));
    }
    Ok(())
}

// ========================================================================
// Interrupts
// ========================================================================

// CD imm8
pub fn int(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let vector = cpu.fetch_u8()?;
    cpu.software_interrupt(vector)
}

// CC
pub fn int3(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.software_interrupt(BREAKPOINT)
}

// CE
pub fn into(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    if cpu.get_cpu_flag(CpuFlags::OF) {
        cpu.software_interrupt(OVERFLOW)?;
    }
    Ok(())
}

// CF
pub fn iret(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.interrupt_return(cpu.ctx.operand_size())
}
