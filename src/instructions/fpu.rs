use log::trace;

use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::interrupt::DEVICE_NOT_AVAILABLE;
use crate::registers::Cr0;

// D8-DF: coprocessor escapes. The operand is decoded and skipped; with
// CR0.EM or CR0.TS set the instruction traps to #NM instead.
pub fn escape(cpu: &mut Cpu, opcode: u8) -> Result<(), CpuError> {
    if cpu.regs.cr0.intersects(Cr0::EM | Cr0::TS) {
        return cpu.raise_fault(DEVICE_NOT_AVAILABLE);
    }
    let modrm = cpu.consume_modrm()?;
    trace!("[FPU] {:02X} /{} ignored", opcode, modrm.reg);
    Ok(())
}
