//! x86-64 template bytes.
//!
//! Every `[rbp + disp32]` operand addresses a `CpuState` field and is left
//! as a zeroed immediate slot. Scratch registers are `eax`, `ecx`, `edx`.
//! Slot order in each table is the order the emitter supplies values in.

use ppcjit_core::{RegionSelector, Slot, Template, Width};

use super::regs::{REGION_A, REGION_B};

const fn region_selector(offset: u16) -> RegionSelector {
    RegionSelector {
        offset,
        mask: 0x07,
        region_a: REGION_A.low3(),
        region_b: REGION_B.low3(),
    }
}

// -- global stubs --

/// `fn(env: *mut CpuState, entry: *const u8) -> u32`
///
/// Slots: `LINK_REGION_A`, `LINK_REGION_B`.
pub static PROLOGUE: Template = Template {
    name: "prologue",
    code: &[
        0x55, // push rbp
        0x53, // push rbx
        0x41, 0x54, // push r12
        0x41, 0x55, // push r13
        0x41, 0x56, // push r14
        0x41, 0x57, // push r15
        0x48, 0x83, 0xEC, 0x08, // sub rsp, 8
        0x48, 0x89, 0xFD, // mov rbp, rdi
        0x4C, 0x8B, 0xB5, 0, 0, 0, 0, // mov r14, [rbp + region_a]
        0x4C, 0x8B, 0xBD, 0, 0, 0, 0, // mov r15, [rbp + region_b]
        0xFF, 0xE6, // jmp rsi
    ],
    slots: &[Slot::imm32(20), Slot::imm32(27)],
};

pub static EPILOGUE: Template = Template {
    name: "epilogue",
    code: &[
        0x48, 0x83, 0xC4, 0x08, // add rsp, 8
        0x41, 0x5F, // pop r15
        0x41, 0x5E, // pop r14
        0x41, 0x5D, // pop r13
        0x41, 0x5C, // pop r12
        0x5B, // pop rbx
        0x5D, // pop rbp
        0xC3, // ret
    ],
    slots: &[],
};

/// `mov eax, code; jmp epilogue`
///
/// Slots: exit code, epilogue.
pub static EXIT_STUB: Template = Template {
    name: "exit_stub",
    code: &[0xB8, 0, 0, 0, 0, 0xE9, 0, 0, 0, 0],
    slots: &[Slot::imm32(1), Slot::rel32(6)],
};

// -- data movement --

/// `mov dword [rbp + dst], imm32`. Slots: dst, imm.
pub static STORE_IMM: Template = Template {
    name: "store_imm",
    code: &[0xC7, 0x85, 0, 0, 0, 0, 0, 0, 0, 0],
    slots: &[Slot::imm32(2), Slot::imm32(6)],
};

/// `mov dword [rbp + dst], 0`. Slots: dst.
pub static STORE_ZERO: Template = Template {
    name: "store_zero",
    code: &[0xC7, 0x85, 0, 0, 0, 0, 0, 0, 0, 0],
    slots: &[Slot::imm32(2)],
};

/// Slots: src, dst.
pub static MOVE: Template = Template {
    name: "move",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + src]
        0x89, 0x85, 0, 0, 0, 0, // mov [rbp + dst], eax
    ],
    slots: &[Slot::imm32(2), Slot::imm32(8)],
};

macro_rules! alu_imm {
    ($name:ident, $label:literal, $op:literal) => {
        /// `dst = src <op> imm32`. Slots: src, imm, dst.
        pub static $name: Template = Template {
            name: $label,
            code: &[
                0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + src]
                $op, 0, 0, 0, 0, // <op> eax, imm32
                0x89, 0x85, 0, 0, 0, 0, // mov [rbp + dst], eax
            ],
            slots: &[Slot::imm32(2), Slot::imm32(7), Slot::imm32(13)],
        };
    };
}

alu_imm!(ADD_IMM, "add_imm", 0x05);
alu_imm!(OR_IMM, "or_imm", 0x0D);
alu_imm!(XOR_IMM, "xor_imm", 0x35);

macro_rules! alu_reg {
    ($name:ident, $label:literal, $op:literal) => {
        /// `dst = a <op> b`. Slots: a, b, dst.
        pub static $name: Template = Template {
            name: $label,
            code: &[
                0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + a]
                $op, 0x85, 0, 0, 0, 0, // <op> eax, [rbp + b]
                0x89, 0x85, 0, 0, 0, 0, // mov [rbp + dst], eax
            ],
            slots: &[Slot::imm32(2), Slot::imm32(8), Slot::imm32(14)],
        };
    };
}

alu_reg!(ADD, "add", 0x03);
alu_reg!(SUB, "sub", 0x2B);
alu_reg!(AND, "and", 0x23);
alu_reg!(OR, "or", 0x0B);
alu_reg!(XOR, "xor", 0x33);

/// Slots: a, b, dst.
pub static MULLW: Template = Template {
    name: "mullw",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + a]
        0x0F, 0xAF, 0x85, 0, 0, 0, 0, // imul eax, [rbp + b]
        0x89, 0x85, 0, 0, 0, 0, // mov [rbp + dst], eax
    ],
    slots: &[Slot::imm32(2), Slot::imm32(9), Slot::imm32(15)],
};

// -- guest memory (big-endian) --

/// `rd = load32be(r14 + (ra + d))`. Slots: ra, d, rd.
pub static LOAD_WORD: Template = Template {
    name: "lwz",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + ra]
        0x05, 0, 0, 0, 0, // add eax, d
        0x41, 0x8B, 0x04, 0x06, // mov eax, [r14 + rax]
        0x0F, 0xC8, // bswap eax
        0x89, 0x85, 0, 0, 0, 0, // mov [rbp + rd], eax
    ],
    slots: &[Slot::imm32(2), Slot::imm32(7), Slot::imm32(19)],
};

/// `store32be(r14 + (ra + d), rs)`. Slots: ra, d, rs.
pub static STORE_WORD: Template = Template {
    name: "stw",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + ra]
        0x05, 0, 0, 0, 0, // add eax, d
        0x8B, 0x8D, 0, 0, 0, 0, // mov ecx, [rbp + rs]
        0x0F, 0xC9, // bswap ecx
        0x41, 0x89, 0x0C, 0x06, // mov [r14 + rax], ecx
    ],
    slots: &[Slot::imm32(2), Slot::imm32(7), Slot::imm32(13)],
};

/// Load from a fixed host address inside region A or B. ModR/M at 2
/// selects `r14` or `r15` as base. Slots: address, rd.
pub static LOAD_WORD_ABS: Template = Template {
    name: "lwz_abs",
    code: &[
        0x41, 0x8B, 0x86, 0, 0, 0, 0, // mov eax, [r14 + disp32]
        0x0F, 0xC8, // bswap eax
        0x89, 0x85, 0, 0, 0, 0, // mov [rbp + rd], eax
    ],
    slots: &[Slot::canonical32(3, region_selector(2)), Slot::imm32(11)],
};

/// Store to a fixed host address inside region A or B. ModR/M at 10
/// selects the base. Slots: rs, address.
pub static STORE_WORD_ABS: Template = Template {
    name: "stw_abs",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + rs]
        0x0F, 0xC8, // bswap eax
        0x41, 0x89, 0x86, 0, 0, 0, 0, // mov [r14 + disp32], eax
    ],
    slots: &[Slot::imm32(2), Slot::canonical32(11, region_selector(10))],
};

/// `load32be(r14 + ea)` for a literal guest address whose host address
/// no region delta can reach. Slots: ea, rd.
pub static LOAD_WORD_EA: Template = Template {
    name: "lwz_ea",
    code: &[
        0xB8, 0, 0, 0, 0, // mov eax, ea
        0x41, 0x8B, 0x04, 0x06, // mov eax, [r14 + rax]
        0x0F, 0xC8, // bswap eax
        0x89, 0x85, 0, 0, 0, 0, // mov [rbp + rd], eax
    ],
    slots: &[Slot::imm32(1), Slot::imm32(13)],
};

/// `store32be(r14 + ea, rs)`. Slots: ea, rs.
pub static STORE_WORD_EA: Template = Template {
    name: "stw_ea",
    code: &[
        0xB8, 0, 0, 0, 0, // mov eax, ea
        0x8B, 0x8D, 0, 0, 0, 0, // mov ecx, [rbp + rs]
        0x0F, 0xC9, // bswap ecx
        0x41, 0x89, 0x0C, 0x06, // mov [r14 + rax], ecx
    ],
    slots: &[Slot::imm32(1), Slot::imm32(7)],
};

// -- compares --

macro_rules! compare {
    ($name:ident, $label:literal, [$($cmp:literal),+], $lt:literal, $gt:literal, $base:literal) => {
        /// Writes LT/GT/EQ of one CR field. Slots: ra, rhs, shift, cr,
        /// keep-mask, cr.
        pub static $name: Template = Template {
            name: $label,
            code: &[
                0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + ra]
                $($cmp),+, // cmp eax, rhs
                0x0F, $lt, 0xC1, // setl/setb cl
                0x0F, $gt, 0xC2, // setg/seta dl
                0x0F, 0x94, 0xC0, // sete al
                0x0F, 0xB6, 0xC9, // movzx ecx, cl
                0x0F, 0xB6, 0xD2, // movzx edx, dl
                0x0F, 0xB6, 0xC0, // movzx eax, al
                0xC1, 0xE1, 0x03, // shl ecx, 3
                0xC1, 0xE2, 0x02, // shl edx, 2
                0xD1, 0xE0, // shl eax, 1
                0x09, 0xC8, // or eax, ecx
                0x09, 0xD0, // or eax, edx
                0xC1, 0xE0, 0, // shl eax, shift
                0x8B, 0x8D, 0, 0, 0, 0, // mov ecx, [rbp + cr]
                0x81, 0xE1, 0, 0, 0, 0, // and ecx, keep
                0x09, 0xC1, // or ecx, eax
                0x89, 0x8D, 0, 0, 0, 0, // mov [rbp + cr], ecx
            ],
            slots: &[
                Slot::imm32(2),
                Slot::imm32(7 + $base),
                Slot::imm(43 + $base, Width::W8),
                Slot::imm32(46 + $base),
                Slot::imm32(52 + $base),
                Slot::imm32(60 + $base),
            ],
        };
    };
}

compare!(CMP_IMM, "cmpwi", [0x3D, 0, 0, 0, 0], 0x9C, 0x9F, 0);
compare!(CMPL_IMM, "cmplwi", [0x3D, 0, 0, 0, 0], 0x92, 0x97, 0);
compare!(CMP_REG, "cmpw", [0x3B, 0x85, 0, 0, 0, 0], 0x9C, 0x9F, 1);
compare!(CMPL_REG, "cmplw", [0x3B, 0x85, 0, 0, 0, 0], 0x92, 0x97, 1);

// -- control flow --

/// `if --ctr == 0 goto fallthrough`. Slots: ctr, fallthrough label.
pub static DEC_CTR_BRANCH: Template = Template {
    name: "bdnz",
    code: &[
        0xFF, 0x8D, 0, 0, 0, 0, // dec dword [rbp + ctr]
        0x0F, 0x84, 0, 0, 0, 0, // jz fallthrough
    ],
    slots: &[Slot::imm32(2), Slot::rel32(8)],
};

/// `if cr & mask == 0 goto fallthrough`. Slots: cr, mask, fallthrough label.
pub static CR_SET_BRANCH: Template = Template {
    name: "bc_cr_set",
    code: &[
        0xF7, 0x85, 0, 0, 0, 0, 0, 0, 0, 0, // test dword [rbp + cr], mask
        0x0F, 0x84, 0, 0, 0, 0, // jz fallthrough
    ],
    slots: &[Slot::imm32(2), Slot::imm32(6), Slot::rel32(12)],
};

/// `if cr & mask != 0 goto fallthrough`. Slots: cr, mask, fallthrough label.
pub static CR_CLEAR_BRANCH: Template = Template {
    name: "bc_cr_clear",
    code: &[
        0xF7, 0x85, 0, 0, 0, 0, 0, 0, 0, 0, // test dword [rbp + cr], mask
        0x0F, 0x85, 0, 0, 0, 0, // jnz fallthrough
    ],
    slots: &[Slot::imm32(2), Slot::imm32(6), Slot::rel32(12)],
};

/// `pc = src & !3`. Slots: src (lr/ctr), pc.
pub static INDIRECT_TARGET: Template = Template {
    name: "indirect_target",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + src]
        0x83, 0xE0, 0xFC, // and eax, -4
        0x89, 0x85, 0, 0, 0, 0, // mov [rbp + pc], eax
    ],
    slots: &[Slot::imm32(2), Slot::imm32(11)],
};

/// Probe the jump cache for `pc`; enter the hit or fall back to the
/// dispatcher. Slots: pc, index mask, jump cache pointer, dispatch stub.
pub static INDIRECT_LOOKUP: Template = Template {
    name: "indirect_lookup",
    code: &[
        0x8B, 0x85, 0, 0, 0, 0, // mov eax, [rbp + pc]
        0x89, 0xC2, // mov edx, eax
        0xC1, 0xEA, 0x02, // shr edx, 2
        0x81, 0xE2, 0, 0, 0, 0, // and edx, mask
        0x48, 0xC1, 0xE2, 0x04, // shl rdx, 4
        0x48, 0x03, 0x95, 0, 0, 0, 0, // add rdx, [rbp + jump_cache]
        0x48, 0x39, 0x02, // cmp [rdx], rax
        0x0F, 0x85, 0, 0, 0, 0, // jne dispatch
        0xFF, 0x62, 0x08, // jmp [rdx + 8]
    ],
    slots: &[Slot::imm32(2), Slot::imm32(13), Slot::imm32(24), Slot::rel32(33)],
};

/// Leave through the preempt stub when the preemption word is non-zero.
/// Slots: preempt pointer, preempt stub.
pub static PREEMPT_CHECK: Template = Template {
    name: "preempt_check",
    code: &[
        0x48, 0x8B, 0x85, 0, 0, 0, 0, // mov rax, [rbp + preempt]
        0x8B, 0x00, // mov eax, [rax]
        0x85, 0xC0, // test eax, eax
        0x0F, 0x85, 0, 0, 0, 0, // jnz preempt
    ],
    slots: &[Slot::imm32(3), Slot::rel32(13)],
};

/// Block exit. Points at the dispatch stub until its target is chained.
pub static CHAIN_JUMP: Template = Template {
    name: "chain_jmp",
    code: &[0xE9, 0, 0, 0, 0],
    slots: &[Slot::branch32(1)],
};

// -- interpreter fallback --

/// `handler(env, opcode)` via `call rel32`. Slots: opcode, handler.
pub static CALL_DIRECT: Template = Template {
    name: "call_direct",
    code: &[
        0x48, 0x89, 0xEF, // mov rdi, rbp
        0xBE, 0, 0, 0, 0, // mov esi, opcode
        0xE8, 0, 0, 0, 0, // call handler
    ],
    slots: &[Slot::imm32(4), Slot::rel32(9)],
};

/// `handler(env, opcode)` through an absolute address. Slots: opcode,
/// handler.
pub static CALL_ABSOLUTE: Template = Template {
    name: "call_absolute",
    code: &[
        0x48, 0x89, 0xEF, // mov rdi, rbp
        0xBE, 0, 0, 0, 0, // mov esi, opcode
        0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, // mov rax, handler
        0xFF, 0xD0, // call rax
    ],
    slots: &[Slot::imm32(4), Slot::imm(10, Width::W64)],
};
