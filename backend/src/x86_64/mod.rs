pub mod regs;
pub mod templates;

use ppcjit_core::{OpClass, Shape, Template, TemplateKey, TemplateRegistry};

pub use regs::Reg;

/// Template table for x86-64 hosts (System V ABI).
#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64Templates;

impl TemplateRegistry for X86_64Templates {
    fn host_name(&self) -> &'static str {
        "x86_64"
    }

    fn lookup(&self, key: TemplateKey) -> Option<&'static Template> {
        use templates::*;
        use OpClass as C;
        use Shape as S;

        let t: &'static Template = match (key.class, key.shape) {
            (C::StoreImm, S::Imm) => &STORE_IMM,
            (C::StoreImm, S::Zero) => &STORE_ZERO,
            (C::Move, S::Reg) => &MOVE,
            // x + 0, x | 0, x ^ 0
            (C::AddImm | C::OrImm | C::XorImm, S::Zero) => &MOVE,
            (C::AddImm, S::Imm) => &ADD_IMM,
            (C::OrImm, S::Imm) => &OR_IMM,
            (C::XorImm, S::Imm) => &XOR_IMM,
            (C::Add, S::Reg) => &ADD,
            (C::Subf, S::Reg) => &SUB,
            (C::And, S::Reg) => &AND,
            (C::Or, S::Reg) => &OR,
            (C::Xor, S::Reg) => &XOR,
            (C::Mullw, S::Reg) => &MULLW,
            (C::LoadWord, S::Imm) => &LOAD_WORD,
            (C::StoreWord, S::Imm) => &STORE_WORD,
            (C::LoadWord, S::Absolute) => &LOAD_WORD_EA,
            (C::StoreWord, S::Absolute) => &STORE_WORD_EA,
            (C::LoadWordAbs, S::Absolute) => &LOAD_WORD_ABS,
            (C::StoreWordAbs, S::Absolute) => &STORE_WORD_ABS,
            (C::Compare, S::Imm) => &CMP_IMM,
            (C::Compare, S::Reg) => &CMP_REG,
            (C::CompareLogical, S::Imm) => &CMPL_IMM,
            (C::CompareLogical, S::Reg) => &CMPL_REG,
            (C::CondBranch, S::CtrNonZero) => &DEC_CTR_BRANCH,
            (C::CondBranch, S::CrSet) => &CR_SET_BRANCH,
            (C::CondBranch, S::CrClear) => &CR_CLEAR_BRANCH,
            (C::IndirectTarget, S::Reg) => &INDIRECT_TARGET,
            (C::CallHelper, S::Direct) => &CALL_DIRECT,
            (C::CallHelper, S::Absolute) => &CALL_ABSOLUTE,
            (C::PreemptCheck, S::Fixed) => &PREEMPT_CHECK,
            (C::ChainJump, S::Direct) => &CHAIN_JUMP,
            (C::IndirectLookup, S::Fixed) => &INDIRECT_LOOKUP,
            (C::ExitStub, S::Fixed) => &EXIT_STUB,
            (C::Prologue, S::Fixed) => &PROLOGUE,
            (C::Epilogue, S::Fixed) => &EPILOGUE,
            _ => return None,
        };
        Some(t)
    }
}
