use crate::registers::{CpuFlags, Width};

/// The eight classic two-operand ALU operations, in ModRM `/digit` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

const ALU_OPS: [AluOp; 8] = [
    AluOp::Add,
    AluOp::Or,
    AluOp::Adc,
    AluOp::Sbb,
    AluOp::And,
    AluOp::Sub,
    AluOp::Xor,
    AluOp::Cmp,
];

impl AluOp {
    pub fn from_index(index: u8) -> AluOp {
        ALU_OPS[(index & 7) as usize]
    }

    pub fn writes_result(self) -> bool {
        self != AluOp::Cmp
    }
}

/// Truncated result plus the status flags it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u32,
    pub flags: CpuFlags,
}

// Even number of set bits in the low byte
pub fn parity(value: u32) -> bool {
    (value as u8).count_ones() % 2 == 0
}

fn szp(width: Width, value: u32) -> CpuFlags {
    let mut flags = CpuFlags::empty();
    flags.set(CpuFlags::ZF, value == 0);
    flags.set(CpuFlags::SF, value & width.sign_bit() != 0);
    flags.set(CpuFlags::PF, parity(value));
    flags
}

/// Run one ALU operation. The arithmetic happens on 64-bit intermediates so
/// carry and overflow fall out of the untruncated value.
pub fn binary(op: AluOp, width: Width, a: u32, b: u32, carry_in: bool) -> AluResult {
    let a = width.truncate(a);
    let b = width.truncate(b);
    let mask = width.mask() as u64;
    let sign = width.sign_bit();
    let mut flags = CpuFlags::empty();

    let value = match op {
        AluOp::Add | AluOp::Adc => {
            let c = (op == AluOp::Adc && carry_in) as u64;
            let wide = a as u64 + b as u64 + c;
            let r = (wide & mask) as u32;
            flags.set(CpuFlags::CF, wide > mask);
            flags.set(CpuFlags::OF, (a ^ r) & (b ^ r) & sign != 0);
            flags.set(CpuFlags::AF, (a ^ b ^ r) & 0x10 != 0);
            r
        }
        AluOp::Sub | AluOp::Sbb | AluOp::Cmp => {
            let c = (op == AluOp::Sbb && carry_in) as u64;
            let wide = (a as u64).wrapping_sub(b as u64).wrapping_sub(c);
            let r = (wide & mask) as u32;
            flags.set(CpuFlags::CF, b as u64 + c > a as u64);
            flags.set(CpuFlags::OF, (a ^ b) & (a ^ r) & sign != 0);
            flags.set(CpuFlags::AF, (a ^ b ^ r) & 0x10 != 0);
            r
        }
        AluOp::And => a & b,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
    };

    AluResult {
        value,
        flags: flags | szp(width, value),
    }
}

/// INC/DEC: like ADD/SUB 1 but the caller keeps CF.
pub fn step(width: Width, a: u32, increment: bool) -> AluResult {
    let op = if increment { AluOp::Add } else { AluOp::Sub };
    let mut result = binary(op, width, a, 1, false);
    result.flags.remove(CpuFlags::CF);
    result
}

/// Logical result flags (TEST and friends): CF and OF clear.
pub fn logical(width: Width, value: u32) -> CpuFlags {
    szp(width, width.truncate(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sal,
    Sar,
}

const SHIFT_OPS: [ShiftOp; 8] = [
    ShiftOp::Rol,
    ShiftOp::Ror,
    ShiftOp::Rcl,
    ShiftOp::Rcr,
    ShiftOp::Shl,
    ShiftOp::Shr,
    ShiftOp::Sal,
    ShiftOp::Sar,
];

impl ShiftOp {
    pub fn from_index(index: u8) -> ShiftOp {
        SHIFT_OPS[(index & 7) as usize]
    }
}

/// Shift or rotate `value` by `count` (already masked to 5 bits by the caller).
///
/// `flags` is the current status; the returned flags replace it. A zero count
/// returns `None` and leaves everything untouched.
pub fn shift(op: ShiftOp, width: Width, value: u32, count: u32, flags: CpuFlags) -> Option<AluResult> {
    if count == 0 {
        return None;
    }
    let bits = width.bits();
    let mask = width.mask();
    let sign = width.sign_bit();
    let v = width.truncate(value);
    let msb = |x: u32| x & sign != 0;
    let mut out = flags;

    let value = match op {
        ShiftOp::Rol | ShiftOp::Ror => {
            let n = count % bits;
            let r = if op == ShiftOp::Rol {
                ((v << n) | (v.checked_shr(bits - n).unwrap_or(0))) & mask
            } else {
                ((v >> n) | (v.checked_shl(bits - n).unwrap_or(0))) & mask
            };
            let r = if n == 0 { v } else { r };
            if op == ShiftOp::Rol {
                let cf = r & 1 != 0;
                out.set(CpuFlags::CF, cf);
                out.set(CpuFlags::OF, msb(r) != cf);
            } else {
                out.set(CpuFlags::CF, msb(r));
                out.set(CpuFlags::OF, msb(r) != msb(r << 1));
            }
            return Some(AluResult { value: r, flags: out });
        }
        ShiftOp::Rcl | ShiftOp::Rcr => {
            let n = count % (bits + 1);
            let mut r = v;
            let mut cf = flags.contains(CpuFlags::CF);
            for _ in 0..n {
                if op == ShiftOp::Rcl {
                    let out_bit = msb(r);
                    r = ((r << 1) | cf as u32) & mask;
                    cf = out_bit;
                } else {
                    let out_bit = r & 1 != 0;
                    r = (r >> 1) | if cf { sign } else { 0 };
                    cf = out_bit;
                }
            }
            out.set(CpuFlags::CF, cf);
            if op == ShiftOp::Rcl {
                out.set(CpuFlags::OF, msb(r) != cf);
            } else {
                out.set(CpuFlags::OF, msb(r) != msb(r << 1));
            }
            return Some(AluResult { value: r, flags: out });
        }
        ShiftOp::Shl | ShiftOp::Sal => {
            let wide = (v as u64) << count;
            let r = (wide & mask as u64) as u32;
            let cf = count <= bits && (wide >> bits) & 1 != 0;
            out.set(CpuFlags::CF, cf);
            out.set(CpuFlags::OF, msb(r) != cf);
            r
        }
        ShiftOp::Shr => {
            let cf = count <= bits && (v as u64 >> (count - 1)) & 1 != 0;
            let r = (v as u64 >> count) as u32;
            out.set(CpuFlags::CF, cf);
            out.set(CpuFlags::OF, msb(v));
            r
        }
        ShiftOp::Sar => {
            let signed = width.sign_extend(v) as i32 as i64;
            let n = count.min(bits);
            let cf = (signed >> (n - 1)) & 1 != 0;
            let r = ((signed >> n) as u32) & mask;
            out.set(CpuFlags::CF, cf);
            out.remove(CpuFlags::OF);
            r
        }
    };

    out.remove(CpuFlags::ZF | CpuFlags::SF | CpuFlags::PF | CpuFlags::AF);
    Some(AluResult {
        value,
        flags: out | szp(width, value),
    })
}
