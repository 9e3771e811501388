use rust_386::alu::{self, AluOp, ShiftOp};
use rust_386::registers::{CpuFlags, Width};

// Reference flags for an 8-bit add or subtract, spelled out bit by bit
fn reference_flags(a: u8, b: u8, subtract: bool) -> (u8, CpuFlags) {
    let (r, carry) = if subtract {
        a.overflowing_sub(b)
    } else {
        a.overflowing_add(b)
    };
    let overflow = if subtract {
        ((a ^ b) & (a ^ r) & 0x80) != 0
    } else {
        ((a ^ r) & (b ^ r) & 0x80) != 0
    };

    let mut flags = CpuFlags::empty();
    flags.set(CpuFlags::CF, carry);
    flags.set(CpuFlags::OF, overflow);
    flags.set(CpuFlags::AF, (a ^ b ^ r) & 0x10 != 0);
    flags.set(CpuFlags::ZF, r == 0);
    flags.set(CpuFlags::SF, r & 0x80 != 0);
    flags.set(CpuFlags::PF, r.count_ones() % 2 == 0);
    (r, flags)
}

#[test]
fn test_add_and_sub_flags_exhaustive_8bit() {
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            for (op, subtract) in [(AluOp::Add, false), (AluOp::Sub, true), (AluOp::Cmp, true)] {
                let (value, flags) = reference_flags(a, b, subtract);
                let result = alu::binary(op, Width::Byte, a as u32, b as u32, false);
                assert_eq!(result.value, value as u32, "{:?} {:02X},{:02X}", op, a, b);
                assert_eq!(result.flags, flags, "{:?} {:02X},{:02X}", op, a, b);
            }
        }
    }
}

#[test]
fn test_word_and_dword_boundaries() {
    let r = alu::binary(AluOp::Add, Width::Word, 0x7FFF, 1, false);
    assert_eq!(r.value, 0x8000);
    assert!(r.flags.contains(CpuFlags::OF | CpuFlags::SF));
    assert!(!r.flags.contains(CpuFlags::CF));

    let r = alu::binary(AluOp::Add, Width::Dword, 0xFFFF_FFFF, 1, false);
    assert_eq!(r.value, 0);
    assert!(r.flags.contains(CpuFlags::CF | CpuFlags::ZF | CpuFlags::AF));

    let r = alu::binary(AluOp::Sub, Width::Dword, 0, 1, false);
    assert_eq!(r.value, 0xFFFF_FFFF);
    assert!(r.flags.contains(CpuFlags::CF | CpuFlags::SF));
    assert!(!r.flags.contains(CpuFlags::OF));

    // Operands wider than the width are truncated first
    let r = alu::binary(AluOp::Add, Width::Byte, 0x1FF, 0x101, false);
    assert_eq!(r.value, 0x00);
    assert!(r.flags.contains(CpuFlags::CF));
}

#[test]
fn test_carry_chain_through_adc_sbb() {
    // 0x00FF + 0x0001 as two byte halves
    let low = alu::binary(AluOp::Add, Width::Byte, 0xFF, 0x01, false);
    let high = alu::binary(AluOp::Adc, Width::Byte, 0x00, 0x00, low.flags.contains(CpuFlags::CF));
    assert_eq!((high.value << 8) | low.value, 0x0100);

    // 0x0100 - 0x0001
    let low = alu::binary(AluOp::Sub, Width::Byte, 0x00, 0x01, false);
    let high = alu::binary(AluOp::Sbb, Width::Byte, 0x01, 0x00, low.flags.contains(CpuFlags::CF));
    assert_eq!((high.value << 8) | low.value, 0x00FF);

    // SBB with borrow in and equal operands borrows again
    let r = alu::binary(AluOp::Sbb, Width::Word, 5, 5, true);
    assert_eq!(r.value, 0xFFFF);
    assert!(r.flags.contains(CpuFlags::CF));
}

#[test]
fn test_inc_dec_leave_carry_out() {
    let r = alu::step(Width::Byte, 0xFF, true);
    assert_eq!(r.value, 0);
    assert!(!r.flags.contains(CpuFlags::CF), "INC never reports carry");
    assert!(r.flags.contains(CpuFlags::ZF | CpuFlags::AF));

    let r = alu::step(Width::Word, 0x8000, false);
    assert_eq!(r.value, 0x7FFF);
    assert!(r.flags.contains(CpuFlags::OF));
}

#[test]
fn test_shift_count_zero_changes_nothing() {
    assert_eq!(alu::shift(ShiftOp::Shl, Width::Word, 0x1234, 0, CpuFlags::CF), None);
    assert_eq!(alu::shift(ShiftOp::Rcr, Width::Byte, 0x01, 0, CpuFlags::empty()), None);
}

#[test]
fn test_shift_results() {
    let r = alu::shift(ShiftOp::Shl, Width::Byte, 0x81, 1, CpuFlags::empty()).unwrap();
    assert_eq!(r.value, 0x02);
    assert!(r.flags.contains(CpuFlags::CF));
    assert!(r.flags.contains(CpuFlags::OF), "Top bit changed on a single shift");

    let r = alu::shift(ShiftOp::Sar, Width::Word, 0x8000, 4, CpuFlags::empty()).unwrap();
    assert_eq!(r.value, 0xF800);

    let r = alu::shift(ShiftOp::Shr, Width::Dword, 0x8000_0001, 1, CpuFlags::empty()).unwrap();
    assert_eq!(r.value, 0x4000_0000);
    assert!(r.flags.contains(CpuFlags::CF));

    let r = alu::shift(ShiftOp::Rol, Width::Byte, 0x81, 1, CpuFlags::empty()).unwrap();
    assert_eq!(r.value, 0x03);
    assert!(r.flags.contains(CpuFlags::CF));

    // RCL rotates through the carry: 9 bits for a byte
    let r = alu::shift(ShiftOp::Rcl, Width::Byte, 0x80, 1, CpuFlags::empty()).unwrap();
    assert_eq!(r.value, 0x00);
    assert!(r.flags.contains(CpuFlags::CF));
    let r = alu::shift(ShiftOp::Rcl, Width::Byte, 0x00, 1, CpuFlags::CF).unwrap();
    assert_eq!(r.value, 0x01);
}
