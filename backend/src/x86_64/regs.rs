/// Host registers named by the x86-64 templates, numbered as ModR/M and REX
/// encode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Register field of a ModR/M byte or of a `push`/`pop` opcode.
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// R8-R15 take a REX.B prefix (`0x41`) in `push`/`pop`.
    #[inline]
    pub const fn is_extended(self) -> bool {
        (self as u8) >= 8
    }
}

/// Holds the `CpuState` pointer while translated code runs.
pub const ENV: Reg = Reg::Rbp;

/// Holds the region A base. Canonical slots select it through ModR/M.
pub const REGION_A: Reg = Reg::R14;

/// Holds the region B base.
pub const REGION_B: Reg = Reg::R15;

/// Saved by the prologue in this order, restored in reverse by the epilogue.
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// `(env, opcode)` for interpreter helpers.
pub const CALL_ARG_REGS: [Reg; 2] = [Reg::Rdi, Reg::Rsi];

/// `sub rsp` after the pushes; keeps helper calls 16-byte aligned.
pub const STACK_ADDEND: u8 = {
    let pushed = (1 + CALLEE_SAVED.len()) * 8;
    ((16 - pushed % 16) % 16) as u8
};
