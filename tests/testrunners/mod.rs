#![allow(dead_code)]

use rust_386::config::CpuConfig;
use rust_386::cpu::{Cpu, StepOutcome};
use rust_386::error::CpuError;
use rust_386::registers::{Reg16, SegReg, Width};

pub const CODE_START: u32 = 0x100;

// Real-mode CPU with CS=DS=ES=SS=0, IP=0x100, SP=0xFFFE and no ROM
pub fn new_cpu() -> Cpu {
    new_cpu_with(CpuConfig::default())
}

pub fn new_cpu_with(config: CpuConfig) -> Cpu {
    let mut cpu = Cpu::new(config, Vec::new()).expect("trace file must be creatable");
    for seg in [SegReg::Cs, SegReg::Ds, SegReg::Es, SegReg::Ss] {
        cpu.load_segment(seg, 0);
    }
    cpu.regs.eip = CODE_START;
    cpu.regs.set_reg16(Reg16::Sp, 0xFFFE);
    cpu
}

pub fn load_code(cpu: &mut Cpu, code: &[u8]) -> u32 {
    let address = cpu.linear(SegReg::Cs, cpu.regs.eip);
    cpu.memory
        .borrow_mut()
        .load(address, code)
        .expect("code must fit in RAM");
    address
}

pub fn run_cpu_code(cpu: &mut Cpu, code: &[u8]) -> Result<(), CpuError> {
    // 1. Write code at CS:IP
    let start_ip = cpu.regs.eip;
    load_code(cpu, code);

    // 2. Execution loop, capped to catch runaway tests
    let mut instructions_left = 100;
    loop {
        if instructions_left == 0 {
            break;
        }
        instructions_left -= 1;

        // Stop once IP leaves the code buffer
        let offset = cpu.regs.eip.wrapping_sub(start_ip) as usize;
        if offset >= code.len() {
            break;
        }

        match cpu.step()? {
            StepOutcome::Executed => {}
            StepOutcome::Halted | StepOutcome::Faulted => break,
        }
    }
    Ok(())
}

// Write bytes at seg:offset
pub fn poke(cpu: &mut Cpu, seg: SegReg, offset: u32, bytes: &[u8]) {
    let address = cpu.linear(seg, offset);
    cpu.memory
        .borrow_mut()
        .load(address, bytes)
        .expect("data must fit in RAM");
}

pub fn peek_word(cpu: &Cpu, seg: SegReg, offset: u32) -> u16 {
    cpu.read_mem(seg, offset, Width::Word)
        .expect("readable") as u16
}

// Byte count worked out from the addressing tables, independently of the decoder
pub fn modrm_span(modrm: u8, sib: u8, address_size: Width) -> usize {
    let mode = modrm >> 6;
    let rm = modrm & 7;
    if mode == 3 {
        return 1;
    }
    match address_size {
        Width::Dword => {
            let has_sib = rm == 4;
            let disp = match mode {
                0 if !has_sib && rm == 5 => 4,
                0 if has_sib && sib & 7 == 5 => 4,
                0 => 0,
                1 => 1,
                _ => 4,
            };
            1 + has_sib as usize + disp
        }
        _ => match mode {
            0 if rm == 6 => 3,
            0 => 1,
            1 => 2,
            _ => 3,
        },
    }
}
