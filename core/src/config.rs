use crate::error::{JitError, Result};

/// Host base addresses of the two data regions canonical-address slots are
/// synthesized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionBases {
    /// Guest memory window: guest address `x` lives at host `a + x`.
    pub a: usize,
    /// Kernel-state block.
    pub b: usize,
}

/// Guest address range backed by region B instead of region A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestWindow {
    pub guest_base: u32,
    pub len: u32,
}

impl GuestWindow {
    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.guest_base) < self.len
    }
}

/// Largest accepted `code_buffer_size`. Every jump inside the buffer is a
/// rel32, so the buffer must stay well inside the signed 32-bit span even
/// after page rounding.
pub const MAX_CODE_BUFFER_SIZE: usize = 1 << 30;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Size of the executable code buffer; rounded up to the page size.
    pub code_buffer_size: usize,
    pub regions: RegionBases,
    /// Guest addresses mapped into region B, e.g. the kernel data page.
    pub kernel_window: Option<GuestWindow>,
    /// Upper bound on instructions requested from the translator per block.
    pub max_block_insns: usize,
    /// Patch block exits straight into their successors. When off, every
    /// exit goes back through the dispatcher.
    pub direct_chaining: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            code_buffer_size: 16 * 1024 * 1024,
            regions: RegionBases::default(),
            kernel_window: None,
            max_block_insns: 512,
            direct_chaining: true,
        }
    }
}

impl JitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.code_buffer_size == 0 {
            return Err(JitError::InvalidConfig("code_buffer_size must be non-zero"));
        }
        if self.code_buffer_size > MAX_CODE_BUFFER_SIZE {
            return Err(JitError::InvalidConfig(
                "code_buffer_size exceeds the rel32 jump range",
            ));
        }
        if self.max_block_insns == 0 {
            return Err(JitError::InvalidConfig("max_block_insns must be non-zero"));
        }
        if matches!(self.kernel_window, Some(w) if w.len == 0) {
            return Err(JitError::InvalidConfig("kernel_window must not be empty"));
        }
        Ok(())
    }

    /// Host address backing guest address `addr`.
    pub fn host_addr(&self, addr: u32) -> usize {
        match self.kernel_window {
            Some(w) if w.contains(addr) => {
                self.regions.b.wrapping_add((addr - w.guest_base) as usize)
            }
            _ => self.regions.a.wrapping_add(addr as usize),
        }
    }
}
