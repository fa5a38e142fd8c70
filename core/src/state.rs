//! Emulated CPU state and the field offsets templates are patched with.
//!
//! Translated code addresses every guest register as `[env + offset]`,
//! where `env` is the `CpuState` pointer pinned in a host register by the
//! prologue. The offsets below are the only coupling between the layout and
//! the emitted code.

use core::mem::offset_of;
use core::sync::atomic::AtomicU32;

use crate::block::JumpEntry;

/// Host pointers translated code needs while it runs.
///
/// Filled in by the engine before every entry into translated code.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct JitLink {
    /// Preemption word polled at every block exit.
    pub preempt: *const AtomicU32,
    /// Base of the direct-mapped jump cache used by indirect branches.
    pub jump_cache: *const JumpEntry,
    /// Base of region A (guest memory window).
    pub region_a: usize,
    /// Base of region B (kernel-state block).
    pub region_b: usize,
}

impl Default for JitLink {
    fn default() -> Self {
        Self {
            preempt: core::ptr::null(),
            jump_cache: core::ptr::null(),
            region_a: 0,
            region_b: 0,
        }
    }
}

/// PowerPC user-level register file.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct CpuState {
    pub gpr: [u32; 32],
    pub cr: u32,
    pub xer: u32,
    pub lr: u32,
    pub ctr: u32,
    pub pc: u32,
    /// Effective address of the last `icbi`, read by the dispatcher.
    pub icbi_ea: u32,
    pub link: JitLink,
}

impl CpuState {
    pub fn new() -> Self {
        Self::default()
    }

    /// CR field `crf` as a 4-bit value (LT GT EQ SO).
    pub fn cr_field(&self, crf: u8) -> u32 {
        (self.cr >> (28 - 4 * u32::from(crf))) & 0xF
    }
}

pub const GPR: usize = offset_of!(CpuState, gpr);
pub const CR: usize = offset_of!(CpuState, cr);
pub const XER: usize = offset_of!(CpuState, xer);
pub const LR: usize = offset_of!(CpuState, lr);
pub const CTR: usize = offset_of!(CpuState, ctr);
pub const PC: usize = offset_of!(CpuState, pc);
pub const ICBI_EA: usize = offset_of!(CpuState, icbi_ea);

const LINK: usize = offset_of!(CpuState, link);
pub const LINK_PREEMPT: usize = LINK + offset_of!(JitLink, preempt);
pub const LINK_JUMP_CACHE: usize = LINK + offset_of!(JitLink, jump_cache);
pub const LINK_REGION_A: usize = LINK + offset_of!(JitLink, region_a);
pub const LINK_REGION_B: usize = LINK + offset_of!(JitLink, region_b);

/// Offset of general-purpose register `n`.
#[inline]
pub const fn gpr(n: u8) -> usize {
    assert!(n < 32);
    GPR + 4 * n as usize
}

/// Values left in the return register when translated code hands control
/// back to the dispatcher.
pub mod exit {
    /// Look up `pc` and continue.
    pub const DISPATCH: u32 = 0;
    /// The preemption word was non-zero at a block boundary.
    pub const PREEMPT: u32 = 1;
    /// `sc` executed; `pc` points after it.
    pub const SYSCALL: u32 = 2;
    /// `icbi` executed; `icbi_ea` holds the effective address.
    pub const INVALIDATE: u32 = 3;
}

/// CR field helpers shared by the compare templates and their users.
pub mod crf {
    pub const LT: u32 = 0b1000;
    pub const GT: u32 = 0b0100;
    pub const EQ: u32 = 0b0010;
    pub const SO: u32 = 0b0001;

    /// Bit position of field `crf` inside CR.
    #[inline]
    pub const fn shift(crf: u8) -> u32 {
        28 - 4 * crf as u32
    }

    /// CR with field `crf` cleared, as an AND mask.
    #[inline]
    pub const fn keep_mask(crf: u8) -> u32 {
        !(0xF << shift(crf))
    }

    /// Single-bit mask of CR bit `bi` (0 = MSB).
    #[inline]
    pub const fn bit(bi: u8) -> u32 {
        1 << (31 - bi as u32)
    }
}
