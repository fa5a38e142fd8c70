use crate::template::Width;

/// Index of a block in the engine's block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Location of a re-patchable PC-relative branch field in the code buffer.
///
/// All positions are byte offsets from the start of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchSite {
    /// First byte of the displacement field.
    pub at: usize,
    /// Position the displacement is measured from.
    pub anchor: usize,
    pub width: Width,
}

/// How a block hands control onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// One or two direct exits that can be chained to other blocks.
    Chained,
    /// `blr` / `bctr`: inline jump-cache probe, dispatcher on miss.
    Indirect,
    /// Always leaves through a dispatcher stub (`sc`, `icbi`).
    Dispatcher,
}

/// Block lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Emitting,
    /// Resident with at least one exit still routed to the dispatcher.
    Partial,
    /// Resident with every direct exit linked to its target block.
    Chained,
    Invalidated,
}

/// One direct exit of a block.
#[derive(Debug, Clone, Copy)]
pub struct ExitSlot {
    /// Guest PC the exit continues at.
    pub target_pc: u32,
    /// Jump field that gets repointed when chaining changes.
    pub site: BranchSite,
    /// Block the jump currently lands in, `None` while it lands in the
    /// dispatcher stub.
    pub linked: Option<BlockId>,
}

/// A translated guest basic block.
///
/// Maps a guest range `[entry_pc, end_pc)` to a contiguous run of host code
/// `[host_offset, host_offset + host_size)` in the code buffer.
#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub entry_pc: u32,
    /// One past the last guest byte covered. Held as `u64` so a block
    /// ending at the top of the address space gets `1 << 32`, not 0.
    pub end_pc: u64,
    /// Number of guest instructions translated.
    pub icount: u32,
    pub host_offset: usize,
    pub host_size: usize,
    pub exits: Vec<ExitSlot>,
    pub terminal: TerminalKind,
    pub state: BlockState,
    /// Exits of other blocks that currently jump straight into this one,
    /// as `(source block, exit index)`.
    pub incoming: Vec<(BlockId, usize)>,
}

impl Block {
    pub fn new(id: BlockId, entry_pc: u32, end_pc: u64, icount: u32) -> Self {
        Self {
            id,
            entry_pc,
            end_pc,
            icount,
            host_offset: 0,
            host_size: 0,
            exits: Vec::new(),
            terminal: TerminalKind::Chained,
            state: BlockState::Emitting,
            incoming: Vec::new(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !matches!(self.state, BlockState::Emitting | BlockState::Invalidated)
    }

    /// Whether the guest range `[start, end)` overlaps this block.
    #[inline]
    pub fn intersects(&self, start: u32, end: u64) -> bool {
        u64::from(self.entry_pc) < end && u64::from(start) < self.end_pc
    }

    /// Whether any exit (linked or not) continues inside `[start, end)`.
    pub fn targets_range(&self, start: u32, end: u64) -> bool {
        self.exits
            .iter()
            .any(|e| e.target_pc >= start && u64::from(e.target_pc) < end)
    }

    /// Recompute `Partial` / `Chained` from the exit links.
    pub fn refresh_state(&mut self) {
        if !self.is_valid() {
            return;
        }
        self.state = if self.exits.iter().all(|e| e.linked.is_some()) {
            BlockState::Chained
        } else {
            BlockState::Partial
        };
    }
}

/// Number of entries in the direct-mapped jump cache.
pub const JUMP_CACHE_SIZE: usize = 1 << 12;

/// Jump cache entry as read by translated code: `tag` is the guest PC
/// zero-extended to 64 bits, `host` the absolute host entry address.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpEntry {
    pub tag: u64,
    pub host: u64,
}

impl JumpEntry {
    /// Never equal to a zero-extended 32-bit PC.
    pub const INVALID: JumpEntry = JumpEntry {
        tag: u64::MAX,
        host: 0,
    };
}

/// Direct-mapped PC → block cache shared between the dispatcher and the
/// inline lookup of indirect branches.
///
/// Indexed by `(pc >> 2) & (JUMP_CACHE_SIZE - 1)`.
pub struct JumpCache {
    entries: Box<[JumpEntry]>,
    ids: Box<[Option<BlockId>]>,
}

impl JumpCache {
    pub fn new() -> Self {
        Self {
            entries: vec![JumpEntry::INVALID; JUMP_CACHE_SIZE].into_boxed_slice(),
            ids: vec![None; JUMP_CACHE_SIZE].into_boxed_slice(),
        }
    }

    #[inline]
    pub const fn index(pc: u32) -> usize {
        (pc as usize >> 2) & (JUMP_CACHE_SIZE - 1)
    }

    pub fn lookup(&self, pc: u32) -> Option<BlockId> {
        let i = Self::index(pc);
        if self.entries[i].tag == u64::from(pc) {
            self.ids[i]
        } else {
            None
        }
    }

    pub fn insert(&mut self, pc: u32, id: BlockId, host: usize) {
        let i = Self::index(pc);
        self.entries[i] = JumpEntry {
            tag: u64::from(pc),
            host: host as u64,
        };
        self.ids[i] = Some(id);
    }

    /// Drop the entry for `pc` if it is the one cached in its line.
    pub fn remove(&mut self, pc: u32) {
        let i = Self::index(pc);
        if self.entries[i].tag == u64::from(pc) {
            self.entries[i] = JumpEntry::INVALID;
            self.ids[i] = None;
        }
    }

    pub fn invalidate(&mut self) {
        self.entries.fill(JumpEntry::INVALID);
        self.ids.fill(None);
    }

    /// Raw entry, as the inline lookup sees it.
    #[inline]
    pub fn entry(&self, pc: u32) -> JumpEntry {
        self.entries[Self::index(pc)]
    }

    /// Table base for [`crate::state::JitLink::jump_cache`]. Stable for the
    /// lifetime of the cache.
    #[inline]
    pub fn as_ptr(&self) -> *const JumpEntry {
        self.entries.as_ptr()
    }
}

impl Default for JumpCache {
    fn default() -> Self {
        Self::new()
    }
}
