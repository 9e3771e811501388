use std::cell::RefCell;
use std::rc::Rc;

use rust_386::bus::{Bus, BusDevice, BusMessage, DeviceCategory, DeviceId, Subject};
use rust_386::config::CpuConfig;
use rust_386::cpu::{Cpu, CpuState, StepOutcome};
use rust_386::error::{CpuError, MemoryFault};
use rust_386::memory::AddressingMode;
use rust_386::registers::{Cr0, CpuFlags, Reg16, Reg32, SegReg, Width};

mod testrunners;
use testrunners::{load_code, new_cpu, new_cpu_with, peek_word, poke, run_cpu_code};

const PIC_ID: DeviceId = 77;

#[derive(Default)]
struct Watcher {
    id: DeviceId,
    seen: Vec<BusMessage>,
}

impl BusDevice for Watcher {
    fn set_bus_id(&mut self, id: DeviceId) {
        self.id = id;
    }

    fn bus_id(&self) -> DeviceId {
        self.id
    }

    fn receive(&mut self, message: &BusMessage, _bus: &Bus) {
        self.seen.push(message.clone());
    }
}

fn raise(cpu: &Cpu, vector: u8) {
    let message = BusMessage::new(Subject::RaiseInterrupt, PIC_ID, vec![vector]);
    cpu.bus.send_to_one(DeviceCategory::Cpu, &message).unwrap();
}

// IVT entries: 20h -> 0000:0400, 21h -> 0000:0500
fn install_vectors(cpu: &mut Cpu) {
    poke(cpu, SegReg::Ds, 0x20 * 4, &[0x00, 0x04, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00]);
}

#[test]
fn test_external_interrupt_waits_for_if() {
    let mut cpu = new_cpu();
    install_vectors(&mut cpu);
    // NOP ; STI ; NOP
    load_code(&mut cpu, &[0x90, 0xFB, 0x90]);

    raise(&cpu, 0x20);
    assert_eq!(cpu.pending_interrupts(), 1);

    assert_eq!(cpu.step(), Ok(StepOutcome::Executed));
    assert_eq!(cpu.regs.eip, 0x101, "IF clear: the NOP runs instead");
    assert_eq!(cpu.pending_interrupts(), 1);

    cpu.step().unwrap(); // STI
    assert_eq!(cpu.step(), Ok(StepOutcome::Executed));
    assert_eq!(cpu.regs.eip, 0x0400, "Serviced once IF is set");
    assert_eq!(cpu.pending_interrupts(), 0);
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0xFFF8), 0x0102, "Return to the next instruction");
    assert!(!cpu.get_cpu_flag(CpuFlags::IF));
}

#[test]
fn test_pending_interrupts_are_fifo() {
    let mut cpu = new_cpu();
    install_vectors(&mut cpu);
    // Handlers re-enable interrupts: STI at both entry points
    poke(&mut cpu, SegReg::Cs, 0x0400, &[0xFB]);
    poke(&mut cpu, SegReg::Cs, 0x0500, &[0xFB]);
    cpu.set_cpu_flag(CpuFlags::IF, true);
    load_code(&mut cpu, &[0x90]);

    raise(&cpu, 0x21);
    raise(&cpu, 0x20);

    cpu.step().unwrap();
    assert_eq!(cpu.regs.eip, 0x0500, "First raised, first served");
    cpu.step().unwrap(); // STI in the handler
    cpu.step().unwrap();
    assert_eq!(cpu.regs.eip, 0x0400);
}

#[test]
fn test_interrupt_releases_halt() {
    let mut cpu = new_cpu();
    install_vectors(&mut cpu);
    cpu.set_cpu_flag(CpuFlags::IF, true);
    load_code(&mut cpu, &[0xF4]);

    assert_eq!(cpu.step(), Ok(StepOutcome::Halted));
    assert_eq!(cpu.step(), Ok(StepOutcome::Halted), "Stays halted with nothing pending");
    assert_eq!(cpu.state, CpuState::Halted);

    raise(&cpu, 0x21);
    assert_eq!(cpu.step(), Ok(StepOutcome::Executed));
    assert_eq!(cpu.state, CpuState::Running);
    assert_eq!(cpu.regs.eip, 0x0500);
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0xFFF8), 0x0101, "Handler returns past the HLT");
}

#[test]
fn test_delivery_is_announced_on_the_bus() {
    let mut cpu = new_cpu();
    install_vectors(&mut cpu);
    let watcher = Rc::new(RefCell::new(Watcher::default()));
    cpu.bus.register(watcher.clone(), DeviceCategory::InterruptController);

    // INT 20
    load_code(&mut cpu, &[0xCD, 0x20]);
    cpu.step().unwrap();

    let recorded = watcher.borrow();
    let seen = &recorded.seen;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].subject, Subject::InterruptRaised);
    assert_eq!(seen[0].payload, vec![0x20]);
    assert_eq!(seen[0].sender, cpu.bus_id());
}

#[test]
fn test_debug_devices_receive_instruction_log() {
    let mut cpu = new_cpu();
    let watcher = Rc::new(RefCell::new(Watcher::default()));
    cpu.bus.register(watcher.clone(), DeviceCategory::Debug);

    load_code(&mut cpu, &[0x90, 0x90]);
    cpu.step().unwrap();
    cpu.step().unwrap();

    let recorded = watcher.borrow();
    let seen = &recorded.seen;
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|m| m.subject == Subject::InstructionLog));
    assert_eq!(seen[1].payload, 0x101u32.to_le_bytes().to_vec());
}

#[test]
fn test_protected_mode_gate_delivery_and_iretd() {
    let mut cpu = new_cpu();
    cpu.write_cr0((Cr0::PE | Cr0::ET).bits()).unwrap();
    assert_eq!(cpu.memory.borrow().mode(), AddressingMode::Protected);

    cpu.load_segment(SegReg::Cs, 0x08);
    cpu.load_segment(SegReg::Ss, 0x10);
    cpu.regs.set_reg32(Reg32::Esp, 0x8000);
    cpu.regs.idtr.base = 0x1000;
    cpu.regs.idtr.limit = 0x7FF;

    // Gate 21h: offset 0002_0000, selector 08, present 32-bit interrupt gate
    cpu.write_linear(0x1000 + 0x21 * 8, Width::Dword, 0x0008_0000).unwrap();
    cpu.write_linear(0x1000 + 0x21 * 8 + 4, Width::Dword, 0x0002_8E00).unwrap();
    // Handler: IRETD (32-bit code segment)
    cpu.write_linear(0x2_0000, Width::Byte, 0xCF).unwrap();

    // INT 21
    load_code(&mut cpu, &[0xCD, 0x21]);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.eip, 0x0002_0000);
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0x08);
    assert_eq!(cpu.regs.get_reg32(Reg32::Esp), 0x7FF4, "Three dwords pushed");
    assert_eq!(cpu.read_linear(0x7FF4, Width::Dword), Ok(0x102));
    assert_eq!(cpu.read_linear(0x7FF8, Width::Dword), Ok(0x08));

    cpu.step().unwrap();
    assert_eq!(cpu.regs.eip, 0x102);
    assert_eq!(cpu.regs.get_reg32(Reg32::Esp), 0x8000);
}

#[test]
fn test_interrupt_frame_is_all_or_nothing() {
    let mut cpu = new_cpu_with(CpuConfig::default().with_ram_kb(64));
    install_vectors(&mut cpu);
    // SS base F000: the FLAGS slot fits in RAM, the CS slot wraps to SS:FFFE past the end
    cpu.load_segment(SegReg::Ss, 0x0F00);
    cpu.regs.set_reg16(Reg16::Sp, 0x0002);

    // INT 21
    let result = run_cpu_code(&mut cpu, &[0xCD, 0x21]);
    assert_eq!(result, Err(CpuError::Memory(MemoryFault { address: 0x1EFFE, width: 2 })));
    assert_eq!(cpu.regs.get_reg16(Reg16::Sp), 0x0002, "SP unchanged");
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0x0000), 0, "Nothing stored on the stack");
    assert_eq!(cpu.regs.eip, 0x100);
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0);
}
