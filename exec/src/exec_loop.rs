use ppcjit_core::state::exit;
use ppcjit_core::{CpuState, JitLink, PreemptEvents, Result, TemplateRegistry};
use tracing::trace;

use crate::{Engine, GuestTranslator};

/// Size of the guest cache line `icbi` invalidates.
const ICBI_LINE: u32 = 32;

/// Why [`Engine::run`] handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The preemption word was non-zero at a block boundary. The events are
    /// still pending; the caller clears the ones it handles.
    Preempted(PreemptEvents),
    /// `sc` executed; `pc` points at the next instruction.
    SystemCall,
}

/// Entry trampoline: `prologue(env, block_entry) -> exit code`.
type PrologueFn = unsafe extern "C" fn(*mut CpuState, *const u8) -> u32;

impl<R: TemplateRegistry> Engine<R> {
    /// Execute guest code from `cpu.pc` until preempted or a system call.
    ///
    /// # Safety
    /// Runs generated host code against `cpu`. Region A and B must map the
    /// guest memory every executed load and store touches, and any
    /// interpreter handler referenced by translated blocks must be sound
    /// for the state it is handed.
    pub unsafe fn run<T: GuestTranslator>(
        &mut self,
        cpu: &mut CpuState,
        translator: &mut T,
    ) -> Result<ExitReason> {
        cpu.link = JitLink {
            preempt: self.preempt.as_ptr(),
            jump_cache: self.cache.jump_cache_ptr(),
            region_a: self.config.regions.a,
            region_b: self.config.regions.b,
        };
        let prologue: PrologueFn =
            core::mem::transmute(self.buf.addr_at(self.stubs.prologue) as *const u8);

        loop {
            if self.preempt.check() {
                return Ok(ExitReason::Preempted(self.preempt.pending()));
            }

            let pc = cpu.pc;
            let id = match self.cache.find(pc) {
                Some(id) => id,
                None => {
                    let insns = translator.translate(pc, self.config.max_block_insns);
                    self.emit_block(pc, &insns)?
                }
            };
            let entry = self.buf.addr_at(self.cache.get(id).host_offset) as *const u8;

            match prologue(cpu as *mut CpuState, entry) {
                exit::DISPATCH => trace!(pc = cpu.pc, "dispatch"),
                exit::PREEMPT => {
                    return Ok(ExitReason::Preempted(self.preempt.pending()));
                }
                exit::SYSCALL => return Ok(ExitReason::SystemCall),
                exit::INVALIDATE => {
                    let line = cpu.icbi_ea & !(ICBI_LINE - 1);
                    let end = u64::from(line) + u64::from(ICBI_LINE);
                    self.invalidate_range(line, end)?;
                }
                code => unreachable!("translated code returned unknown exit code {code}"),
            }
        }
    }
}
