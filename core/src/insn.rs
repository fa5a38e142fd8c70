//! Decoded guest instructions as handed over by the translator.

use crate::state::CpuState;

/// Interpreter entry point used for instructions without a dedicated
/// template. Receives the CPU state (with `pc` already synchronized) and
/// the raw 32-bit opcode.
pub type InterpHandler = extern "C" fn(&mut CpuState, u32);

/// One decoded PowerPC instruction at guest address `pc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestInsn {
    pub pc: u32,
    pub op: Op,
}

impl GuestInsn {
    #[inline]
    pub const fn new(pc: u32, op: Op) -> Self {
        Self { pc, op }
    }
}

/// Condition of a `bc` branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    /// `bdnz`: decrement CTR, branch if it is now non-zero.
    DecCtrNonZero,
    /// Branch if CR bit `bi` (0 = MSB) is set.
    CrSet(u8),
    /// Branch if CR bit `bi` is clear.
    CrClear(u8),
}

/// Guest operation subset covered by templates.
///
/// Register fields are GPR numbers (0..32), `crf` is a CR field (0..8).
/// `ra == 0` in `addi`/`lwz`/`stw` means the literal zero, as on hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Li { rd: u8, simm: i16 },
    Addi { rd: u8, ra: u8, simm: i16 },
    Add { rd: u8, ra: u8, rb: u8 },
    Subf { rd: u8, ra: u8, rb: u8 },
    Mullw { rd: u8, ra: u8, rb: u8 },
    And { ra: u8, rs: u8, rb: u8 },
    Or { ra: u8, rs: u8, rb: u8 },
    Xor { ra: u8, rs: u8, rb: u8 },
    Ori { ra: u8, rs: u8, uimm: u16 },
    Xori { ra: u8, rs: u8, uimm: u16 },
    Lwz { rd: u8, ra: u8, d: i16 },
    Stw { rs: u8, ra: u8, d: i16 },
    /// Load from a guest address known at translation time.
    LwzAbs { rd: u8, addr: u32 },
    /// Store to a guest address known at translation time.
    StwAbs { rs: u8, addr: u32 },
    Cmpw { crf: u8, ra: u8, rb: u8 },
    Cmplw { crf: u8, ra: u8, rb: u8 },
    Cmpwi { crf: u8, ra: u8, simm: i16 },
    Cmplwi { crf: u8, ra: u8, uimm: u16 },
    Mtctr { rs: u8 },
    Mtlr { rs: u8 },
    Mfctr { rd: u8 },
    Mflr { rd: u8 },
    CallInterpreter { handler: InterpHandler, opcode: u32 },

    // -- terminals --
    B { target: u32 },
    Bl { target: u32 },
    Bc { cond: BranchCond, target: u32 },
    Blr,
    Bctr,
    Sc,
    Icbi { ra: u8, rb: u8 },
}

impl Op {
    /// Whether the instruction ends a basic block.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Op::B { .. }
                | Op::Bl { .. }
                | Op::Bc { .. }
                | Op::Blr
                | Op::Bctr
                | Op::Sc
                | Op::Icbi { .. }
        )
    }
}
