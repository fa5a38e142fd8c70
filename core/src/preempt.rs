//! Cooperative preemption word.
//!
//! Any thread may raise an event; translated code polls the word at every
//! block exit and leaves through the preempt stub when it is non-zero. The
//! run loop returns the pending events to its caller, who clears them once
//! handled.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Asynchronous events that stop translated code at the next block
    /// boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PreemptEvents: u32 {
        /// Leave the run loop and return to the embedder.
        const EXEC_RETURN = 1 << 0;
        /// An interrupt line was raised.
        const TRIGGER_INTERRUPT = 1 << 1;
        /// Deliver a pending interrupt.
        const HANDLE_INTERRUPT = 1 << 2;
        /// Enter the debugger/monitor.
        const ENTER_MONITOR = 1 << 3;
        /// Periodic timer tick.
        const TIMER = 1 << 4;
    }
}

/// Shared preemption word.
#[derive(Debug, Default)]
pub struct PreemptionFlag {
    word: AtomicU32,
}

impl PreemptionFlag {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    /// Raise `events`. Safe to call from any thread.
    #[inline]
    pub fn set(&self, events: PreemptEvents) {
        self.word.fetch_or(events.bits(), Ordering::Release);
    }

    /// Acknowledge `events`.
    #[inline]
    pub fn clear(&self, events: PreemptEvents) {
        self.word.fetch_and(!events.bits(), Ordering::AcqRel);
    }

    /// Overwrite the whole word.
    #[inline]
    pub fn init(&self, events: PreemptEvents) {
        self.word.store(events.bits(), Ordering::Release);
    }

    /// Whether any event is pending.
    #[inline]
    pub fn check(&self) -> bool {
        self.word.load(Ordering::Acquire) != 0
    }

    /// Whether all of `events` are pending.
    #[inline]
    pub fn test(&self, events: PreemptEvents) -> bool {
        self.pending().contains(events)
    }

    /// Snapshot of pending events. Unknown bits are kept.
    #[inline]
    pub fn pending(&self) -> PreemptEvents {
        PreemptEvents::from_bits_retain(self.word.load(Ordering::Acquire))
    }

    /// Address polled by translated code.
    #[inline]
    pub fn as_ptr(&self) -> *const AtomicU32 {
        &self.word
    }
}
