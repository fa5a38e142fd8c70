use thiserror::Error;

use crate::template::{TemplateKey, Width};

pub type Result<T> = std::result::Result<T, JitError>;

/// Fatal translation-engine errors.
///
/// Every variant is a configuration problem: retrying the same translation
/// cannot succeed, so callers are expected to end the emulation session.
/// Code buffer exhaustion is not an error; it is recovered by a flush.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("no template registered for {0:?}")]
    MissingTemplate(TemplateKey),

    #[error("host address {target:#x} is not reachable from either data region with a {width:?} displacement")]
    RegionsNotColocated { target: u64, width: Width },

    #[error("displacement from {at:#x} to {target:#x} does not fit in {width:?}")]
    DisplacementOutOfRange { at: u64, target: u64, width: Width },

    #[error("block needs {requested} bytes but the code buffer only has {usable} usable bytes")]
    BlockTooLarge { requested: usize, usable: usize },

    #[error("translator produced no instructions at pc {pc:#010x}")]
    EmptyBlock { pc: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("code buffer allocation failed: {0}")]
    Mmap(#[from] std::io::Error),
}
