//! Block translation engine and dispatcher.
//!
//! Drives the lookup → translate → execute cycle: guest instructions from
//! a [`GuestTranslator`] are laid down as template instances in the code
//! buffer, blocks are chained to each other as their targets appear, and
//! control returns to the dispatcher only on a cache miss, an indirect
//! branch miss, or a preemption request.

pub mod block_cache;
pub mod chain;
pub mod emitter;
pub mod exec_loop;

pub use block_cache::BlockCache;
pub use chain::{ChainTable, PendingChain};
pub use exec_loop::ExitReason;

use std::sync::Arc;

use ppcjit_backend::{CodeBuffer, Relocator};
use ppcjit_core::state::{self, exit};
use ppcjit_core::{
    Block, BlockId, GuestInsn, JitConfig, OpClass, PreemptionFlag, Result, Shape, TemplateKey,
    TemplateRegistry,
};
use tracing::debug;

/// Source of guest instructions, consulted on every cache miss.
pub trait GuestTranslator {
    /// Decode the basic block starting at `pc`, at most `max_insns` long.
    fn translate(&mut self, pc: u32, max_insns: usize) -> Vec<GuestInsn>;
}

impl<F> GuestTranslator for F
where
    F: FnMut(u32, usize) -> Vec<GuestInsn>,
{
    fn translate(&mut self, pc: u32, max_insns: usize) -> Vec<GuestInsn> {
        self(pc, max_insns)
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub blocks_translated: u64,
    pub insns_translated: u64,
    pub flushes: u64,
    pub chain_links: u64,
    pub invalidated_blocks: u64,
}

/// Buffer offsets of the code emitted once at engine start.
#[derive(Debug, Clone, Copy)]
pub struct Stubs {
    pub prologue: usize,
    pub epilogue: usize,
    /// Returns `exit::DISPATCH`; default target of every unchained exit.
    pub dispatch: usize,
    pub preempt: usize,
    pub syscall: usize,
    pub invalidate: usize,
}

/// Translation engine for one CPU context.
pub struct Engine<R: TemplateRegistry> {
    pub(crate) registry: R,
    pub(crate) config: JitConfig,
    pub(crate) preempt: Arc<PreemptionFlag>,
    pub(crate) buf: CodeBuffer,
    pub(crate) reloc: Relocator,
    pub(crate) cache: BlockCache,
    pub(crate) chains: ChainTable,
    pub(crate) stubs: Stubs,
    pub(crate) stats: Stats,
}

#[cfg(target_arch = "x86_64")]
impl Engine<ppcjit_backend::HostTemplates> {
    /// Engine using the template table of the build host.
    pub fn new(config: JitConfig, preempt: Arc<PreemptionFlag>) -> Result<Self> {
        Self::with_registry(ppcjit_backend::HostTemplates::default(), config, preempt)
    }
}

impl<R: TemplateRegistry> Engine<R> {
    /// Validate the configuration and the registry, map the code buffer
    /// and emit the global stubs.
    pub fn with_registry(
        registry: R,
        config: JitConfig,
        preempt: Arc<PreemptionFlag>,
    ) -> Result<Self> {
        config.validate()?;
        registry.validate()?;

        let mut buf = CodeBuffer::new(config.code_buffer_size)?;
        let reloc = Relocator::new(config.regions);
        let stubs = emit_stubs(&registry, &reloc, &mut buf)?;
        buf.set_code_start();
        buf.sync_icache(0, buf.code_start());

        debug!(
            host = registry.host_name(),
            capacity = buf.capacity(),
            code_start = buf.code_start(),
            "engine ready"
        );

        let cache = BlockCache::new(buf.addr_at(0));
        Ok(Self {
            registry,
            config,
            preempt,
            buf,
            reloc,
            cache,
            chains: ChainTable::new(),
            stubs,
            stats: Stats::default(),
        })
    }

    /// Resident block for `pc`.
    pub fn lookup(&self, pc: u32) -> Option<BlockId> {
        self.cache.lookup(pc)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        self.cache.get(id)
    }

    pub fn blocks(&self) -> &BlockCache {
        &self.cache
    }

    pub fn chains(&self) -> &ChainTable {
        &self.chains
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn code_buffer(&self) -> &CodeBuffer {
        &self.buf
    }

    pub fn stubs(&self) -> &Stubs {
        &self.stubs
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn preemption(&self) -> &Arc<PreemptionFlag> {
        &self.preempt
    }

    /// Drop every block and chain entry and reset the code buffer.
    pub fn invalidate_all(&mut self) {
        self.flush("explicit");
    }

    pub(crate) fn flush(&mut self, reason: &'static str) {
        let dropped = self.cache.flush();
        self.chains.clear();
        self.buf.flush();
        self.stats.flushes += 1;
        debug!(reason, dropped, "code buffer flushed");
    }
}

fn emit_stubs<R: TemplateRegistry>(
    registry: &R,
    reloc: &Relocator,
    buf: &mut CodeBuffer,
) -> Result<Stubs> {
    let fixed = |class| registry.get(TemplateKey::new(class, Shape::Fixed));

    let mut prologue = reloc.place(buf, fixed(OpClass::Prologue)?);
    reloc.patch(buf, &mut prologue, 0, state::LINK_REGION_A as u64)?;
    reloc.patch(buf, &mut prologue, 1, state::LINK_REGION_B as u64)?;
    prologue.seal();

    let epilogue = reloc.place(buf, fixed(OpClass::Epilogue)?);
    epilogue.seal();
    let epilogue_addr = buf.addr_at(epilogue.offset) as u64;

    let exit_stub = fixed(OpClass::ExitStub)?;
    let mut stub = |code: u32| -> Result<usize> {
        let mut inst = reloc.place(buf, exit_stub);
        reloc.patch(buf, &mut inst, 0, u64::from(code))?;
        reloc.patch(buf, &mut inst, 1, epilogue_addr)?;
        inst.seal();
        Ok(inst.offset)
    };

    Ok(Stubs {
        prologue: prologue.offset,
        epilogue: epilogue.offset,
        dispatch: stub(exit::DISPATCH)?,
        preempt: stub(exit::PREEMPT)?,
        syscall: stub(exit::SYSCALL)?,
        invalidate: stub(exit::INVALIDATE)?,
    })
}
