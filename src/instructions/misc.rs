use log::debug;

use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::interrupt::DEVICE_NOT_AVAILABLE;
use crate::registers::{Cr0, CpuFlags, SegReg};

// F8
pub fn clc(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.set_cpu_flag(CpuFlags::CF, false);
    Ok(())
}

// F9
pub fn stc(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.set_cpu_flag(CpuFlags::CF, true);
    Ok(())
}

// F5
pub fn cmc(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    let carry = cpu.get_cpu_flag(CpuFlags::CF);
    cpu.set_cpu_flag(CpuFlags::CF, !carry);
    Ok(())
}

// FC
pub fn cld(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.set_cpu_flag(CpuFlags::DF, false);
    Ok(())
}

// FD
pub fn std(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.set_cpu_flag(CpuFlags::DF, true);
    Ok(())
}

// FA
pub fn cli(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.set_cpu_flag(CpuFlags::IF, false);
    Ok(())
}

// FB
pub fn sti(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    cpu.set_cpu_flag(CpuFlags::IF, true);
    Ok(())
}

// F4: EIP already points past HLT, so a serviced interrupt returns after it
pub fn hlt(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    debug!("[CPU] HLT at {:04X}:{:08X}", cpu.regs.segment(SegReg::Cs).selector, cpu.ctx.start);
    cpu.halt();
    Ok(())
}

// 9B: waits on the coprocessor, which never has anything outstanding
pub fn wait(cpu: &mut Cpu, _opcode: u8) -> Result<(), CpuError> {
    if cpu.regs.cr0.contains(Cr0::MP | Cr0::TS) {
        return cpu.raise_fault(DEVICE_NOT_AVAILABLE);
    }
    Ok(())
}
