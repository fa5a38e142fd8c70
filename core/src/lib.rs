pub mod block;
pub mod config;
pub mod error;
pub mod insn;
pub mod preempt;
pub mod state;
pub mod template;

pub use block::{
    Block, BlockId, BlockState, BranchSite, ExitSlot, JumpCache, JumpEntry, TerminalKind,
    JUMP_CACHE_SIZE,
};
pub use config::{GuestWindow, JitConfig, RegionBases, MAX_CODE_BUFFER_SIZE};
pub use error::{JitError, Result};
pub use insn::{BranchCond, GuestInsn, InterpHandler, Op};
pub use preempt::{PreemptEvents, PreemptionFlag};
pub use state::{CpuState, JitLink};
pub use template::{
    OpClass, Region, RegionSelector, Shape, Slot, SlotKind, Template, TemplateKey,
    TemplateRegistry, Width,
};
