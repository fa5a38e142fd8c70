pub mod code_buffer;
pub mod reloc;
pub mod x86_64;

pub use code_buffer::{CodeBuffer, Reserve};
pub use reloc::{displacement, Instance, Relocator};
pub use x86_64::X86_64Templates;

/// Template registry for the host this crate is built for.
#[cfg(target_arch = "x86_64")]
pub type HostTemplates = X86_64Templates;
