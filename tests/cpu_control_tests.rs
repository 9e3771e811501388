use rust_386::cpu::{Cpu, CpuState, StepOutcome};
use rust_386::registers::{CpuFlags, Reg8, Reg16, SegReg};

mod testrunners;
use testrunners::{load_code, new_cpu, peek_word, poke, run_cpu_code};

// Step a fixed number of instructions, wherever control goes
fn step_n(cpu: &mut Cpu, count: usize) {
    for _ in 0..count {
        assert_eq!(cpu.step(), Ok(StepOutcome::Executed));
    }
}

#[test]
fn test_jz_short_backwards_and_fallthrough() {
    let mut cpu = new_cpu();
    cpu.set_cpu_flag(CpuFlags::ZF, true);
    // JZ -18
    run_cpu_code(&mut cpu, &[0x74, 0xEE]).unwrap();
    assert_eq!(cpu.regs.eip, 0x00F0, "Taken: 0x102 - 0x12");

    let mut cpu = new_cpu();
    cpu.set_cpu_flag(CpuFlags::ZF, false);
    run_cpu_code(&mut cpu, &[0x74, 0xEE]).unwrap();
    assert_eq!(cpu.regs.eip, 0x0102, "Not taken: next instruction");
}

#[test]
fn test_near_jump_wraps_at_16_bits() {
    let mut cpu = new_cpu();
    // JMP rel16 FF00: 0x103 + 0xFF00 wraps to 0x0003
    run_cpu_code(&mut cpu, &[0xE9, 0x00, 0xFF]).unwrap();
    assert_eq!(cpu.regs.eip, 0x0003);
}

#[test]
fn test_jcc_near_form() {
    let mut cpu = new_cpu();
    cpu.set_cpu_flag(CpuFlags::CF, true);
    // JNC rel16 +0x10 (not taken) ; JC rel16 +0x10
    run_cpu_code(&mut cpu, &[0x0F, 0x83, 0x10, 0x00, 0x0F, 0x82, 0x10, 0x00]).unwrap();
    assert_eq!(cpu.regs.eip, 0x0118);
}

#[test]
fn test_signed_conditions() {
    let mut cpu = new_cpu();
    // MOV AL, -1 ; CMP AL, 1 ; JL +2 ; MOV BL, 1 ; MOV BH, 1
    let code = [0xB0, 0xFF, 0x3C, 0x01, 0x7C, 0x02, 0xB3, 0x01, 0xB7, 0x01];
    run_cpu_code(&mut cpu, &code).unwrap();
    assert_eq!(cpu.regs.get_reg8(Reg8::Bl), 0, "JL taken for -1 < 1");
    assert_eq!(cpu.regs.get_reg8(Reg8::Bh), 1);

    let mut cpu = new_cpu();
    // Same compare, JB is unsigned: 0xFF is not below 1
    let code = [0xB0, 0xFF, 0x3C, 0x01, 0x72, 0x02, 0xB3, 0x01, 0xB7, 0x01];
    run_cpu_code(&mut cpu, &code).unwrap();
    assert_eq!(cpu.regs.get_reg8(Reg8::Bl), 1);
}

#[test]
fn test_call_and_ret() {
    let mut cpu = new_cpu();
    let code = [
        0xE8, 0x03, 0x00, // CALL 0106
        0xF4, // HLT
        0x90, 0x90, // padding
        0xB8, 0x34, 0x12, // MOV AX, 1234
        0xC3, // RET
    ];
    run_cpu_code(&mut cpu, &code).unwrap();
    assert_eq!(cpu.regs.get_reg16(Reg16::Ax), 0x1234);
    assert_eq!(cpu.regs.get_reg16(Reg16::Sp), 0xFFFE, "Stack balanced");
    assert_eq!(cpu.state, CpuState::Halted);
    assert_eq!(cpu.regs.eip, 0x0104, "Halted after the HLT");
}

#[test]
fn test_ret_releases_arguments() {
    let mut cpu = new_cpu();
    let code = [
        0x6A, 0x01, // PUSH 1
        0x6A, 0x02, // PUSH 2
        0xE8, 0x01, 0x00, // CALL 0108
        0xF4, // HLT
        0xC2, 0x04, 0x00, // RET 4
    ];
    run_cpu_code(&mut cpu, &code).unwrap();
    assert_eq!(cpu.regs.get_reg16(Reg16::Sp), 0xFFFE);
    assert_eq!(cpu.state, CpuState::Halted);
}

#[test]
fn test_indirect_jump_and_call() {
    let mut cpu = new_cpu();
    cpu.regs.set_reg16(Reg16::Bx, 0x0107);
    // JMP BX ; (skipped) MOV AL, 1 ; HLT at 0107
    run_cpu_code(&mut cpu, &[0xFF, 0xE3, 0xB0, 0x01, 0x90, 0x90, 0x90, 0xF4]).unwrap();
    assert_eq!(cpu.regs.get_reg8(Reg8::Al), 0);
    assert_eq!(cpu.state, CpuState::Halted);

    let mut cpu = new_cpu();
    poke(&mut cpu, SegReg::Ds, 0x0500, &[0x05, 0x01]);
    // CALL [0500] ; HLT ; RET at 0105
    run_cpu_code(&mut cpu, &[0xFF, 0x16, 0x00, 0x05, 0xF4, 0xC3]).unwrap();
    assert_eq!(cpu.state, CpuState::Halted);
    assert_eq!(cpu.regs.eip, 0x0105);
}

#[test]
fn test_loop_counts_down() {
    let mut cpu = new_cpu();
    let code = [
        0xB9, 0x03, 0x00, // MOV CX, 3
        0x31, 0xC0, // XOR AX, AX
        0x40, // INC AX
        0xE2, 0xFD, // LOOP -3
    ];
    run_cpu_code(&mut cpu, &code).unwrap();
    assert_eq!(cpu.regs.get_reg16(Reg16::Ax), 3);
    assert_eq!(cpu.regs.get_reg16(Reg16::Cx), 0);
}

#[test]
fn test_loope_stops_on_mismatch() {
    let mut cpu = new_cpu();
    let code = [
        0xB9, 0x05, 0x00, // MOV CX, 5
        0x40, // INC AX (AX=1, ZF clear)
        0xE1, 0xFD, // LOOPE -3
    ];
    run_cpu_code(&mut cpu, &code).unwrap();
    assert_eq!(cpu.regs.get_reg16(Reg16::Ax), 1, "ZF clear ends LOOPE at once");
    assert_eq!(cpu.regs.get_reg16(Reg16::Cx), 4);
}

#[test]
fn test_jcxz() {
    let mut cpu = new_cpu();
    cpu.regs.set_reg16(Reg16::Cx, 0);
    // JCXZ +2 ; MOV AL, 1 ; MOV AH, 2
    run_cpu_code(&mut cpu, &[0xE3, 0x02, 0xB0, 0x01, 0xB4, 0x02]).unwrap();
    assert_eq!(cpu.regs.get_reg16(Reg16::Ax), 0x0200);

    let mut cpu = new_cpu();
    cpu.regs.set_reg16(Reg16::Cx, 1);
    run_cpu_code(&mut cpu, &[0xE3, 0x02, 0xB0, 0x01, 0xB4, 0x02]).unwrap();
    assert_eq!(cpu.regs.get_reg16(Reg16::Ax), 0x0201);
}

#[test]
fn test_far_jump_reloads_cs() {
    let mut cpu = new_cpu();
    // JMP 2000:1000
    run_cpu_code(&mut cpu, &[0xEA, 0x00, 0x10, 0x00, 0x20]).unwrap();
    let cs = cpu.regs.segment(SegReg::Cs);
    assert_eq!(cs.selector, 0x2000);
    assert_eq!(cs.base, 0x20000);
    assert_eq!(cpu.regs.eip, 0x1000);
    assert_eq!(cpu.linear(SegReg::Cs, cpu.regs.eip), 0x21000);
}

#[test]
fn test_far_call_and_retf() {
    let mut cpu = new_cpu();
    // Far routine at 0030:0000 (linear 0x300): MOV AL, 7 ; RETF
    poke(&mut cpu, SegReg::Ds, 0x0300, &[0xB0, 0x07, 0xCB]);
    // CALL 0030:0000 ; HLT
    load_code(&mut cpu, &[0x9A, 0x00, 0x00, 0x30, 0x00, 0xF4]);

    step_n(&mut cpu, 1);
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0x0030);
    assert_eq!(cpu.regs.eip, 0);
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0xFFFA), 0x0105, "Return offset on top");
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0xFFFC), 0x0000, "Return CS below it");

    step_n(&mut cpu, 2);
    assert_eq!(cpu.regs.segment(SegReg::Cs).selector, 0x0000);
    assert_eq!(cpu.regs.eip, 0x0105);
    assert_eq!(cpu.regs.get_reg16(Reg16::Sp), 0xFFFE);
    assert_eq!(cpu.regs.get_reg8(Reg8::Al), 7);
    assert_eq!(cpu.step(), Ok(StepOutcome::Halted));
}

#[test]
fn test_int_and_iret_round_trip() {
    let mut cpu = new_cpu();
    // IVT[21h] -> 0000:0300
    poke(&mut cpu, SegReg::Ds, 0x21 * 4, &[0x00, 0x03, 0x00, 0x00]);
    // Handler: MOV AL, 42 ; IRET
    poke(&mut cpu, SegReg::Cs, 0x0300, &[0xB0, 0x42, 0xCF]);
    cpu.set_cpu_flag(CpuFlags::IF, true);
    // INT 21 ; MOV AH, 1
    load_code(&mut cpu, &[0xCD, 0x21, 0xB4, 0x01]);

    step_n(&mut cpu, 1);
    assert_eq!(cpu.regs.eip, 0x0300);
    assert!(!cpu.get_cpu_flag(CpuFlags::IF), "Handler runs with IF clear");
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0xFFF8), 0x0102, "Saved IP follows the INT");

    step_n(&mut cpu, 3);
    assert_eq!(cpu.regs.get_reg16(Reg16::Ax), 0x0142);
    assert_eq!(cpu.regs.eip, 0x0104);
    assert_eq!(cpu.regs.get_reg16(Reg16::Sp), 0xFFFE);
    assert!(cpu.get_cpu_flag(CpuFlags::IF), "IRET restores the saved flags");
}

#[test]
fn test_int3_and_into() {
    let mut cpu = new_cpu();
    poke(&mut cpu, SegReg::Ds, 3 * 4, &[0x00, 0x04, 0x00, 0x00]);
    poke(&mut cpu, SegReg::Ds, 4 * 4, &[0x00, 0x05, 0x00, 0x00]);

    // INTO with OF clear is a no-op
    load_code(&mut cpu, &[0xCE, 0xCC]);
    step_n(&mut cpu, 1);
    assert_eq!(cpu.regs.eip, 0x0101);

    // INT3 is one byte and saves the address after it
    step_n(&mut cpu, 1);
    assert_eq!(cpu.regs.eip, 0x0400);
    assert_eq!(peek_word(&cpu, SegReg::Ss, 0xFFF8), 0x0102);

    let mut cpu = new_cpu();
    poke(&mut cpu, SegReg::Ds, 4 * 4, &[0x00, 0x05, 0x00, 0x00]);
    cpu.set_cpu_flag(CpuFlags::OF, true);
    load_code(&mut cpu, &[0xCE]);
    step_n(&mut cpu, 1);
    assert_eq!(cpu.regs.eip, 0x0500, "INTO vectors through 4 when OF is set");
}
