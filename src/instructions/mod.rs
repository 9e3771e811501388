use crate::decoder::{Dispatch, DispatchTable, Handler};

pub mod utils;
pub mod fpu;
pub mod math;
pub mod logic;
pub mod control;
pub mod transfer;
pub mod stack;
pub mod string;
pub mod misc;
pub mod system;

// ===== Table builders =====

fn single(table: &mut DispatchTable, opcode: u8, handler: Handler) {
    table[opcode as usize] = Some(Dispatch::Handler(handler));
}

fn range(table: &mut DispatchTable, first: u8, last: u8, handler: Handler) {
    for opcode in first..=last {
        single(table, opcode, handler);
    }
}

fn group(table: &mut DispatchTable, opcode: u8, slots: [Option<Handler>; 8]) {
    table[opcode as usize] = Some(Dispatch::Group(slots));
}

// Opcodes 00-3D: six encodings per ALU operation
fn alu_row(table: &mut DispatchTable, base: u8, handler: Handler) {
    range(table, base, base + 5, handler);
}

const ALU_GROUP: [Option<Handler>; 8] = [
    Some(math::add),
    Some(logic::or),
    Some(math::adc),
    Some(math::sbb),
    Some(logic::and),
    Some(math::sub),
    Some(logic::xor),
    Some(math::cmp),
];

const SHIFT_GROUP: [Option<Handler>; 8] = [
    Some(logic::rol),
    Some(logic::ror),
    Some(logic::rcl),
    Some(logic::rcr),
    Some(logic::shl),
    Some(logic::shr),
    Some(logic::sal),
    Some(logic::sar),
];

/// One-byte opcode map.
pub fn primary_table() -> DispatchTable {
    let mut t: DispatchTable = [None; 256];

    // --- Arithmetic / logic ---
    alu_row(&mut t, 0x00, math::add);
    alu_row(&mut t, 0x08, logic::or);
    alu_row(&mut t, 0x10, math::adc);
    alu_row(&mut t, 0x18, math::sbb);
    alu_row(&mut t, 0x20, logic::and);
    alu_row(&mut t, 0x28, math::sub);
    alu_row(&mut t, 0x30, logic::xor);
    alu_row(&mut t, 0x38, math::cmp);
    for opcode in [0x80, 0x81, 0x82, 0x83] {
        group(&mut t, opcode, ALU_GROUP);
    }
    range(&mut t, 0x84, 0x85, logic::test);
    range(&mut t, 0xA8, 0xA9, logic::test);
    range(&mut t, 0x40, 0x47, math::inc_reg);
    range(&mut t, 0x48, 0x4F, math::dec_reg);
    single(&mut t, 0x69, math::imul_imm);
    single(&mut t, 0x6B, math::imul_imm);
    single(&mut t, 0x27, math::daa);
    single(&mut t, 0x2F, math::das);
    single(&mut t, 0x37, math::aaa);
    single(&mut t, 0x3F, math::aas);
    single(&mut t, 0xD4, math::aam);
    single(&mut t, 0xD5, math::aad);
    for opcode in [0xF6, 0xF7] {
        group(
            &mut t,
            opcode,
            [
                Some(logic::test),
                Some(logic::test),
                Some(logic::not),
                Some(math::neg),
                Some(math::mul),
                Some(math::imul),
                Some(math::div),
                Some(math::idiv),
            ],
        );
    }
    group(&mut t, 0xFE, [Some(math::inc_rm), Some(math::dec_rm), None, None, None, None, None, None]);

    // --- Shifts / rotates ---
    for opcode in [0xC0, 0xC1, 0xD0, 0xD1, 0xD2, 0xD3] {
        group(&mut t, opcode, SHIFT_GROUP);
    }

    // --- Data transfer ---
    range(&mut t, 0x88, 0x8B, transfer::mov);
    single(&mut t, 0x8C, transfer::mov_rm_sreg);
    single(&mut t, 0x8D, transfer::lea);
    single(&mut t, 0x8E, transfer::mov_sreg_rm);
    range(&mut t, 0xA0, 0xA3, transfer::mov_moffs);
    range(&mut t, 0xB0, 0xBF, transfer::mov_reg_imm);
    for opcode in [0xC6, 0xC7] {
        group(&mut t, opcode, [Some(transfer::mov_rm_imm), None, None, None, None, None, None, None]);
    }
    range(&mut t, 0x86, 0x87, transfer::xchg);
    range(&mut t, 0x90, 0x97, transfer::xchg_acc);
    single(&mut t, 0xC4, transfer::les);
    single(&mut t, 0xC5, transfer::lds);
    single(&mut t, 0x98, transfer::cbw);
    single(&mut t, 0x99, transfer::cwd);
    single(&mut t, 0xD7, transfer::xlat);
    single(&mut t, 0x9E, transfer::sahf);
    single(&mut t, 0x9F, transfer::lahf);
    for opcode in [0xE4, 0xE5, 0xEC, 0xED] {
        single(&mut t, opcode, transfer::in_port);
    }
    for opcode in [0xE6, 0xE7, 0xEE, 0xEF] {
        single(&mut t, opcode, transfer::out_port);
    }

    // --- Stack ---
    range(&mut t, 0x50, 0x57, stack::push_reg);
    range(&mut t, 0x58, 0x5F, stack::pop_reg);
    for opcode in [0x06, 0x0E, 0x16, 0x1E] {
        single(&mut t, opcode, stack::push_sreg);
    }
    for opcode in [0x07, 0x17, 0x1F] {
        single(&mut t, opcode, stack::pop_sreg);
    }
    single(&mut t, 0x60, stack::pusha);
    single(&mut t, 0x61, stack::popa);
    single(&mut t, 0x68, stack::push_imm);
    single(&mut t, 0x6A, stack::push_imm);
    group(&mut t, 0x8F, [Some(stack::pop_rm), None, None, None, None, None, None, None]);
    single(&mut t, 0x9C, stack::pushf);
    single(&mut t, 0x9D, stack::popf);
    single(&mut t, 0xC8, stack::enter);
    single(&mut t, 0xC9, stack::leave);

    // --- Strings ---
    range(&mut t, 0x6C, 0x6D, string::ins);
    range(&mut t, 0x6E, 0x6F, string::outs);
    range(&mut t, 0xA4, 0xA5, string::movs);
    range(&mut t, 0xA6, 0xA7, string::cmps);
    range(&mut t, 0xAA, 0xAB, string::stos);
    range(&mut t, 0xAC, 0xAD, string::lods);
    range(&mut t, 0xAE, 0xAF, string::scas);

    // --- Control flow ---
    range(&mut t, 0x70, 0x7F, control::jcc_short);
    single(&mut t, 0x9A, control::call_far);
    range(&mut t, 0xC2, 0xC3, control::ret);
    range(&mut t, 0xCA, 0xCB, control::retf);
    single(&mut t, 0xCC, control::int3);
    single(&mut t, 0xCD, control::int);
    single(&mut t, 0xCE, control::into);
    single(&mut t, 0xCF, control::iret);
    range(&mut t, 0xE0, 0xE2, control::loop_family);
    single(&mut t, 0xE3, control::jcxz);
    single(&mut t, 0xE8, control::call_rel);
    single(&mut t, 0xE9, control::jmp_rel);
    single(&mut t, 0xEA, control::jmp_far);
    single(&mut t, 0xEB, control::jmp_rel);
    group(
        &mut t,
        0xFF,
        [
            Some(math::inc_rm),
            Some(math::dec_rm),
            Some(control::call_rm),
            Some(control::call_far_rm),
            Some(control::jmp_rm),
            Some(control::jmp_far_rm),
            Some(stack::push_rm),
            None,
        ],
    );

    // --- Flags / processor control ---
    single(&mut t, 0x9B, misc::wait);
    single(&mut t, 0xF4, misc::hlt);
    single(&mut t, 0xF5, misc::cmc);
    single(&mut t, 0xF8, misc::clc);
    single(&mut t, 0xF9, misc::stc);
    single(&mut t, 0xFA, misc::cli);
    single(&mut t, 0xFB, misc::sti);
    single(&mut t, 0xFC, misc::cld);
    single(&mut t, 0xFD, misc::std);

    // --- Coprocessor ---
    range(&mut t, 0xD8, 0xDF, fpu::escape);

    t
}

/// Two-byte (0F xx) opcode map.
pub fn secondary_table() -> DispatchTable {
    let mut t: DispatchTable = [None; 256];

    // --- System ---
    group(
        &mut t,
        0x01,
        [
            Some(system::sgdt),
            Some(system::sidt),
            Some(system::lgdt),
            Some(system::lidt),
            Some(system::smsw),
            None,
            Some(system::lmsw),
            None,
        ],
    );
    single(&mut t, 0x06, system::clts);
    single(&mut t, 0x20, system::mov_from_cr);
    single(&mut t, 0x22, system::mov_to_cr);

    // --- Control flow ---
    range(&mut t, 0x80, 0x8F, control::jcc_near);
    range(&mut t, 0x90, 0x9F, control::setcc);

    // --- FS / GS ---
    single(&mut t, 0xA0, stack::push_sreg);
    single(&mut t, 0xA1, stack::pop_sreg);
    single(&mut t, 0xA8, stack::push_sreg);
    single(&mut t, 0xA9, stack::pop_sreg);

    // --- Bit operations ---
    single(&mut t, 0xA3, logic::bt);
    single(&mut t, 0xAB, logic::bts);
    single(&mut t, 0xB3, logic::btr);
    single(&mut t, 0xBB, logic::btc);
    group(
        &mut t,
        0xBA,
        [
            None,
            None,
            None,
            None,
            Some(logic::bt_imm),
            Some(logic::bts_imm),
            Some(logic::btr_imm),
            Some(logic::btc_imm),
        ],
    );
    range(&mut t, 0xBC, 0xBD, logic::bit_scan);

    // --- Data transfer ---
    single(&mut t, 0xAF, math::imul_reg_rm);
    single(&mut t, 0xB2, transfer::lss);
    single(&mut t, 0xB4, transfer::lfs);
    single(&mut t, 0xB5, transfer::lgs);
    range(&mut t, 0xB6, 0xB7, transfer::mov_extend);
    range(&mut t, 0xBE, 0xBF, transfer::mov_extend);

    t
}
