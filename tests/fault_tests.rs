use std::cell::RefCell;
use std::rc::Rc;

use rust_386::config::{CpuConfig, OpcodePolicy};
use rust_386::cpu::{Cpu, CpuState, StepOutcome, StopReason};
use rust_386::diagnostics::RecordingSink;
use rust_386::error::{CpuError, MemoryFault};
use rust_386::registers::{Reg8, Reg16, SegReg};

mod testrunners;
use testrunners::{load_code, new_cpu, new_cpu_with, run_cpu_code};

fn attach_recorder(cpu: &mut Cpu) -> Rc<RefCell<RecordingSink>> {
    let sink = Rc::new(RefCell::new(RecordingSink::default()));
    cpu.set_sink(Box::new(sink.clone()));
    sink
}

#[test]
fn test_unrecognized_opcode_dumps_once() {
    let mut cpu = new_cpu();
    let sink = attach_recorder(&mut cpu);
    cpu.regs.set_reg16(Reg16::Bx, 0xBEEF);

    let result = run_cpu_code(&mut cpu, &[0x0F, 0x0B]);
    let expected = CpuError::UnrecognizedOpcode { opcode: 0x0F0B, sub_opcode: None, address: 0x100 };
    assert_eq!(result, Err(expected));
    assert_eq!(cpu.state, CpuState::Faulted);
    assert_eq!(cpu.last_fault(), Some(expected));

    {
        let recorded = sink.borrow();
        assert_eq!(recorded.dumps.len(), 1, "Exactly one core dump");
        let dump = &recorded.dumps[0];
        assert_eq!(dump.registers.eip, 0x100, "Dump shows the faulting instruction");
        assert_eq!(dump.code_address, 0x100);
        assert_eq!(&dump.code[..2], &[0x0F, 0x0B]);
        let text = dump.to_string();
        assert!(text.contains("0F0B"), "dump names the opcode: {}", text);
        assert!(text.contains("EBX:0000BEEF"), "dump lists registers: {}", text);
    }

    // Further steps do nothing and do not dump again
    assert_eq!(cpu.step(), Ok(StepOutcome::Faulted));
    assert_eq!(cpu.step(), Ok(StepOutcome::Faulted));
    assert_eq!(sink.borrow().dumps.len(), 1);
    assert_eq!(cpu.regs.eip, 0x100);
}

#[test]
fn test_skip_policy_notes_and_continues() {
    let config = CpuConfig::default().with_opcode_policy(OpcodePolicy::Skip);
    let mut cpu = new_cpu_with(config);
    let sink = attach_recorder(&mut cpu);

    // 0F 0B (undefined) ; MOV AL, 1
    run_cpu_code(&mut cpu, &[0x0F, 0x0B, 0xB0, 0x01]).unwrap();

    assert_eq!(cpu.regs.get_reg8(Reg8::Al), 1);
    assert_eq!(cpu.state, CpuState::Running);
    let recorded = sink.borrow();
    assert!(recorded.dumps.is_empty());
    assert_eq!(recorded.notes.len(), 1);
    assert!(recorded.notes[0].contains("0F0B"), "note was {}", recorded.notes[0]);
}

#[test]
fn test_skip_policy_never_skips_memory_faults() {
    let config = CpuConfig::default()
        .with_ram_kb(64)
        .with_opcode_policy(OpcodePolicy::Skip);
    let mut cpu = new_cpu_with(config);
    cpu.load_segment(SegReg::Ds, 0x2000);
    // MOV AX, [0000] reads linear 0x20000, past the end of RAM
    let result = run_cpu_code(&mut cpu, &[0xA1, 0x00, 0x00]);
    assert_eq!(result, Err(CpuError::Memory(MemoryFault { address: 0x20000, width: 2 })));
    assert_eq!(cpu.regs.eip, 0x100, "EIP stays on the faulting instruction");
    assert_eq!(cpu.state, CpuState::Faulted);
}

#[test]
fn test_loop_guard_catches_self_jump() {
    let mut cpu = new_cpu();
    let sink = attach_recorder(&mut cpu);
    // JMP $
    let result = run_cpu_code(&mut cpu, &[0xEB, 0xFE]);
    assert_eq!(result, Err(CpuError::LoopDetected { address: 0x100 }));
    assert_eq!(sink.borrow().dumps.len(), 1);
}

#[test]
fn test_without_loop_guard_step_budget_ends_run() {
    let mut config = CpuConfig::default();
    config.loop_guard = false;
    config.max_steps = Some(10);
    let mut cpu = new_cpu_with(config);
    load_code(&mut cpu, &[0xEB, 0xFE]);

    let outcome = cpu.run();
    assert_eq!(outcome.reason, StopReason::StepBudget);
    assert_eq!(outcome.steps, 10);
    assert_eq!(cpu.state, CpuState::Running);
}

#[test]
fn test_run_stops_at_halt() {
    let mut cpu = new_cpu();
    // MOV AL, 1 ; HLT
    load_code(&mut cpu, &[0xB0, 0x01, 0xF4]);
    let outcome = cpu.run();
    assert_eq!(outcome.reason, StopReason::Halted);
    assert_eq!(outcome.steps, 2);
    assert_eq!(cpu.regs.get_reg8(Reg8::Al), 1);
}

#[test]
fn test_run_reports_fault() {
    let mut cpu = new_cpu();
    // NOP ; FF /7
    load_code(&mut cpu, &[0x90, 0xFF, 0xF8]);
    let outcome = cpu.run();
    assert_eq!(
        outcome.reason,
        StopReason::Fault(CpuError::UnrecognizedOpcode { opcode: 0xFF, sub_opcode: Some(7), address: 0x101 })
    );
    assert_eq!(outcome.steps, 2);

    // Running again reports the same fault without executing anything
    let again = cpu.run();
    assert_eq!(again.reason, outcome.reason);
    assert_eq!(again.steps, 1);
}

#[test]
fn test_stop_at_ip_zero() {
    let mut config = CpuConfig::default();
    config.stop_at_ip_zero = true;
    let mut cpu = new_cpu_with(config);
    // JMP rel16 to offset 0
    load_code(&mut cpu, &[0xE9, 0xFD, 0xFE]);
    let outcome = cpu.run();
    assert_eq!(outcome.reason, StopReason::IpZero);
    assert_eq!(outcome.steps, 1);
    assert_eq!(cpu.regs.eip, 0);
}

#[test]
fn test_trace_sink_sees_each_instruction() {
    let mut cpu = new_cpu();
    let sink = Rc::new(RefCell::new(RecordingSink {
        record_instructions: true,
        ..Default::default()
    }));
    cpu.set_sink(Box::new(sink.clone()));

    // MOV AL, 1 ; HLT
    load_code(&mut cpu, &[0xB0, 0x01, 0xF4]);
    cpu.run();

    let recorded = sink.borrow();
    assert_eq!(recorded.instructions.len(), 2);
    let first = &recorded.instructions[0];
    assert_eq!(first.eip, 0x100);
    assert_eq!(first.bytes, vec![0xB0, 0x01]);
    assert!(first.text.starts_with("mov al"), "text was {}", first.text);
    assert!(recorded.instructions[1].text.starts_with("hlt"));
}

#[test]
fn test_trace_path_writes_trace_file() {
    let path = std::env::temp_dir().join(format!("rust386-trace-{}.log", std::process::id()));
    let mut config = CpuConfig::default();
    config.trace_path = Some(path.clone());
    let mut cpu = new_cpu_with(config);

    // MOV AL, 1 ; HLT
    load_code(&mut cpu, &[0xB0, 0x01, 0xF4]);
    assert_eq!(cpu.run().reason, StopReason::Halted);
    drop(cpu);

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert!(text.starts_with("[TRACE] Started"), "trace was {}", text);
    assert!(text.contains("mov al"), "trace was {}", text);
    assert!(text.contains("hlt"), "trace was {}", text);
}

#[test]
fn test_unwritable_trace_path_is_reported() {
    let mut config = CpuConfig::default();
    config.trace_path = Some(std::env::temp_dir().join("no-such-dir-rust386").join("trace.log"));
    assert!(Cpu::new(config, Vec::new()).is_err());
}

#[test]
fn test_loop_guard_compares_linear_addresses() {
    // JMP F000:FFF0 at the reset vector
    let mut rom = vec![0xF4; 0x10000];
    rom[0xFFF0..0xFFF5].copy_from_slice(&[0xEA, 0xF0, 0xFF, 0x00, 0xF0]);
    let mut cpu = Cpu::new(CpuConfig::default(), rom).unwrap();

    // Same CS:IP, but the base drops from FFFF0000 to F0000
    assert_eq!(cpu.step(), Ok(StepOutcome::Executed));
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0xF000);
    assert_eq!(cpu.regs.eip, 0xFFF0);

    // The shadow copy jumps to itself
    assert_eq!(cpu.step(), Err(CpuError::LoopDetected { address: 0xF_FFF0 }));
}
