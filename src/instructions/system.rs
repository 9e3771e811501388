use log::debug;

use crate::cpu::Cpu;
use crate::error::{CpuError, DecodeError};
use crate::modrm::Operand;
use crate::registers::{Cr0, TableRegister, Width};

// ========================================================================
// Descriptor table registers (0F 01 /0-/3)
// ========================================================================

// 16-bit operand size only keeps 24 bits of the base
fn table_base_mask(cpu: &Cpu) -> u32 {
    match cpu.ctx.operand_size() {
        Width::Dword => 0xFFFF_FFFF,
        _ => 0x00FF_FFFF,
    }
}

fn load_table(cpu: &mut Cpu) -> Result<TableRegister, CpuError> {
    let (_, segment, offset) = cpu.decode_memory_rm()?;
    let limit = cpu.read_mem(segment, offset, Width::Word)? as u16;
    let base = cpu.read_mem(segment, offset.wrapping_add(2), Width::Dword)?;
    Ok(TableRegister {
        base: base & table_base_mask(cpu),
        limit,
    })
}

fn store_table(cpu: &mut Cpu, table: TableRegister) -> Result<(), CpuError> {
    let (_, segment, offset) = cpu.decode_memory_rm()?;
    // Check both halves are writable before storing either
    cpu.read_mem(segment, offset.wrapping_add(2), Width::Dword)?;
    cpu.write_mem(segment, offset, Width::Word, table.limit as u32)?;
    let base = table.base & table_base_mask(cpu);
    cpu.write_mem(segment, offset.wrapping_add(2), Width::Dword, base)
}

// 0F 01 /0
pub fn sgdt(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let table = cpu.regs.gdtr;
    store_table(cpu, table)
}

// 0F 01 /1
pub fn sidt(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let table = cpu.regs.idtr;
    store_table(cpu, table)
}

// 0F 01 /2
pub fn lgdt(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let table = load_table(cpu)?;
    debug!("[CPU] LGDT base {:08X} limit {:04X}", table.base, table.limit);
    cpu.regs.gdtr = table;
    Ok(())
}

// 0F 01 /3
pub fn lidt(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let table = load_table(cpu)?;
    debug!("[CPU] LIDT base {:08X} limit {:04X}", table.base, table.limit);
    cpu.regs.idtr = table;
    Ok(())
}

// ========================================================================
// Machine status word
// ========================================================================

// 0F 01 /4
pub fn smsw(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (_, operand) = cpu.decode_rm()?;
    let width = match operand {
        Operand::Register(_) => cpu.ctx.operand_size(),
        Operand::Memory { .. } => Width::Word,
    };
    let msw = cpu.regs.cr0.bits();
    cpu.write_operand(operand, width, width.truncate(msw))
}

// 0F 01 /6: loads PE/MP/EM/TS; PE can be set here but not cleared
pub fn lmsw(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (_, operand) = cpu.decode_rm()?;
    let value = cpu.read_operand(operand, Width::Word)?;
    let low = Cr0::PE | Cr0::MP | Cr0::EM | Cr0::TS;

    let current = cpu.regs.cr0;
    let mut cr0 = (current - low) | (Cr0::from_bits_truncate(value) & low);
    if current.contains(Cr0::PE) {
        cr0 |= Cr0::PE;
    }
    cpu.write_cr0(cr0.bits())
}

// 0F 06
pub fn clts(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.regs.cr0.remove(Cr0::TS);
    Ok(())
}

// ========================================================================
// MOV to/from control registers
// ========================================================================

// The mod field is ignored; these always name a 32-bit register
fn control_operands(cpu: &mut Cpu) -> Result<(u8, u8), CpuError> {
    let byte = cpu.fetch_u8()?;
    Ok(((byte >> 3) & 7, byte & 7))
}

// 0F 20
pub fn mov_from_cr(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (index, reg) = control_operands(cpu)?;
    let value = match index {
        0 => cpu.regs.cr0.bits(),
        2 => cpu.regs.cr2,
        3 => cpu.regs.cr3,
        _ => return Err(DecodeError::BadControlRegister { index }.into()),
    };
    cpu.regs.write(Width::Dword, reg, value);
    Ok(())
}

// 0F 22
pub fn mov_to_cr(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let (index, reg) = control_operands(cpu)?;
    let value = cpu.regs.read(Width::Dword, reg);
    match index {
        0 => cpu.write_cr0(value),
        2 => {
            cpu.regs.cr2 = value;
            Ok(())
        }
        3 => {
            cpu.regs.cr3 = value;
            Ok(())
        }
        _ => Err(DecodeError::BadControlRegister { index }.into()),
    }
}
