//! Direct block chaining.
//!
//! Every direct exit starts out jumping to the dispatch stub. When its
//! target block is resident the jump is repointed at the target's host
//! entry; until then the exit waits in the [`ChainTable`] under the target
//! PC and is patched the moment a block for that PC is published. The
//! target keeps a reverse list of incoming links so invalidation can route
//! them back through the dispatcher.

use rustc_hash::FxHashMap;

use ppcjit_core::{BlockId, BlockState, Result, TemplateRegistry};
use tracing::{debug, trace};

use crate::Engine;

/// An exit still routed to the dispatcher while waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChain {
    pub src: BlockId,
    /// Index into the source block's exits.
    pub exit: usize,
}

/// Open exits keyed by the guest PC they continue at.
#[derive(Debug, Default)]
pub struct ChainTable {
    pending: FxHashMap<u32, Vec<PendingChain>>,
}

impl ChainTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, target_pc: u32, src: BlockId, exit: usize) {
        let list = self.pending.entry(target_pc).or_default();
        let entry = PendingChain { src, exit };
        if !list.contains(&entry) {
            list.push(entry);
        }
    }

    /// Remove and return every exit waiting for `target_pc`.
    pub fn take(&mut self, target_pc: u32) -> Vec<PendingChain> {
        self.pending.remove(&target_pc).unwrap_or_default()
    }

    /// Exits waiting for `target_pc`.
    pub fn pending_for(&self, target_pc: u32) -> &[PendingChain] {
        self.pending.get(&target_pc).map_or(&[], Vec::as_slice)
    }

    /// Drop every entry whose source is `src`.
    pub fn remove_source(&mut self, src: BlockId) {
        self.pending.retain(|_, list| {
            list.retain(|p| p.src != src);
            !list.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Total number of open exits.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<R: TemplateRegistry> Engine<R> {
    /// Point exit `exit` of `src` straight at `dst`.
    pub(crate) fn link(&mut self, src: BlockId, exit: usize, dst: BlockId) -> Result<()> {
        let target = self.cache.get(dst).host_offset;
        let slot = self.cache.get(src).exits[exit];
        if slot.linked == Some(dst) {
            return Ok(());
        }
        if let Some(old) = slot.linked {
            self.cache.get_mut(old).incoming.retain(|&e| e != (src, exit));
        }

        self.reloc.relink(&mut self.buf, slot.site, target)?;
        self.buf.sync_icache(slot.site.at, slot.site.width.bytes());

        let block = self.cache.get_mut(src);
        block.exits[exit].linked = Some(dst);
        block.refresh_state();
        self.cache.get_mut(dst).incoming.push((src, exit));
        self.stats.chain_links += 1;
        trace!(?src, exit, ?dst, "chained");
        Ok(())
    }

    /// Route exit `exit` of `src` back to the dispatch stub.
    pub(crate) fn unlink(&mut self, src: BlockId, exit: usize) -> Result<()> {
        let slot = self.cache.get(src).exits[exit];
        self.reloc.relink(&mut self.buf, slot.site, self.stubs.dispatch)?;
        self.buf.sync_icache(slot.site.at, slot.site.width.bytes());

        let block = self.cache.get_mut(src);
        block.exits[exit].linked = None;
        block.refresh_state();
        trace!(?src, exit, "unchained");
        Ok(())
    }

    /// Patch every exit waiting for the freshly published block `dst`.
    pub(crate) fn resolve_pending(&mut self, dst: BlockId) -> Result<()> {
        let pc = self.cache.get(dst).entry_pc;
        for PendingChain { src, exit } in self.chains.take(pc) {
            if self.cache.get(src).is_valid() {
                self.link(src, exit, dst)?;
            }
        }
        Ok(())
    }

    /// Remove every block overlapping `[start, end)` or exiting into it.
    /// `end` may be `1 << 32` to reach the top of the address space.
    ///
    /// Links from surviving blocks into removed ones fall back to the
    /// dispatcher and wait in the chain table for a replacement. Returns
    /// the number of blocks removed.
    pub fn invalidate_range(&mut self, start: u32, end: u64) -> Result<usize> {
        let victims = self.cache.affected_by(start, end);
        self.invalidate_blocks(&victims)?;
        if !victims.is_empty() {
            debug!(start, end, victims = victims.len(), "invalidated range");
        }
        Ok(victims.len())
    }

    pub(crate) fn invalidate_blocks(&mut self, victims: &[BlockId]) -> Result<()> {
        for &id in victims {
            self.cache.get_mut(id).state = BlockState::Invalidated;
        }

        for &id in victims {
            self.cache.unpublish(id);
            let entry_pc = self.cache.get(id).entry_pc;

            let incoming = std::mem::take(&mut self.cache.get_mut(id).incoming);
            for (src, exit) in incoming {
                if !self.cache.get(src).is_valid() {
                    continue;
                }
                self.unlink(src, exit)?;
                if self.config.direct_chaining {
                    self.chains.add(entry_pc, src, exit);
                }
            }

            let exits = std::mem::take(&mut self.cache.get_mut(id).exits);
            for (exit, slot) in exits.iter().enumerate() {
                if let Some(dst) = slot.linked {
                    self.cache.get_mut(dst).incoming.retain(|&e| e != (id, exit));
                }
            }
            self.cache.get_mut(id).exits = exits;
            self.chains.remove_source(id);
        }

        self.stats.invalidated_blocks += victims.len() as u64;
        Ok(())
    }
}
