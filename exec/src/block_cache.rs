use rustc_hash::FxHashMap;

use ppcjit_core::{Block, BlockId, BlockState, JumpCache, JumpEntry};

/// Storage and PC lookup for translated blocks.
///
/// Blocks live in an append-only vector addressed by [`BlockId`]; only a
/// full flush empties it. A hashed index maps entry PCs to the resident
/// block, with the direct-mapped [`JumpCache`] in front of it.
pub struct BlockCache {
    blocks: Vec<Block>,
    index: FxHashMap<u32, BlockId>,
    jump_cache: JumpCache,
    /// Host address of code buffer offset 0.
    code_base: usize,
}

impl BlockCache {
    pub fn new(code_base: usize) -> Self {
        Self {
            blocks: Vec::new(),
            index: FxHashMap::default(),
            jump_cache: JumpCache::new(),
            code_base,
        }
    }

    /// Allocate a block in the `Emitting` state.
    pub fn alloc(&mut self, entry_pc: u32, end_pc: u64, icount: u32) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, entry_pc, end_pc, icount));
        id
    }

    /// Drop a block whose emission was abandoned. Must be the last one
    /// allocated.
    pub fn discard(&mut self, id: BlockId) {
        assert_eq!(id.index() + 1, self.blocks.len(), "discarding a published block");
        assert_eq!(self.blocks[id.index()].state, BlockState::Emitting);
        self.blocks.pop();
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Resident block whose entry is `pc`.
    pub fn lookup(&self, pc: u32) -> Option<BlockId> {
        if let Some(id) = self.jump_cache.lookup(pc) {
            return Some(id);
        }
        self.index.get(&pc).copied()
    }

    /// [`lookup`](Self::lookup), refilling the jump cache on an index hit.
    pub fn find(&mut self, pc: u32) -> Option<BlockId> {
        if let Some(id) = self.jump_cache.lookup(pc) {
            return Some(id);
        }
        let id = *self.index.get(&pc)?;
        let host = self.code_base + self.blocks[id.index()].host_offset;
        self.jump_cache.insert(pc, id, host);
        Some(id)
    }

    /// Make a fully emitted block reachable by PC.
    pub fn publish(&mut self, id: BlockId) {
        let block = &mut self.blocks[id.index()];
        assert_eq!(block.state, BlockState::Emitting, "block {id:?} published twice");
        block.state = BlockState::Partial;
        block.refresh_state();
        let pc = block.entry_pc;
        let host = self.code_base + block.host_offset;
        self.index.insert(pc, id);
        self.jump_cache.insert(pc, id, host);
    }

    /// Make `id` unreachable by PC. Its state is left to the caller.
    pub fn unpublish(&mut self, id: BlockId) {
        let pc = self.blocks[id.index()].entry_pc;
        if self.index.get(&pc) == Some(&id) {
            self.index.remove(&pc);
        }
        if self.jump_cache.lookup(pc) == Some(id) {
            self.jump_cache.remove(pc);
        }
    }

    /// Resident blocks that overlap `[start, end)` or have an exit into it.
    pub fn affected_by(&self, start: u32, end: u64) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.is_valid() && (b.intersects(start, end) || b.targets_range(start, end)))
            .map(|b| b.id)
            .collect()
    }

    /// Forget every block. Returns how many were resident.
    pub fn flush(&mut self) -> usize {
        let resident = self.len();
        self.blocks.clear();
        self.index.clear();
        self.jump_cache.invalidate();
        resident
    }

    /// Number of resident blocks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every block allocated since the last flush, including invalidated
    /// ones.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn jump_cache(&self) -> &JumpCache {
        &self.jump_cache
    }

    /// Table base handed to translated code.
    pub fn jump_cache_ptr(&self) -> *const JumpEntry {
        self.jump_cache.as_ptr()
    }
}
