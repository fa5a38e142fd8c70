//! Host code templates and their patchable slots.
//!
//! A template is a fixed run of host machine code produced ahead of time for
//! one guest-operation shape. Operands that vary per instance (guest register
//! offsets, literal constants, branch targets, data-region addresses) are
//! left as zeroed holes described by [`Slot`]s and filled in by the
//! relocation applier after the bytes are copied into the code buffer.

use crate::error::{JitError, Result};

/// Width of a patchable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        (self.bytes() * 8) as u32
    }

    /// Whether `v` is representable as a signed value of this width.
    pub const fn fits_signed(self, v: i64) -> bool {
        match self {
            Width::W64 => true,
            _ => {
                let half = 1i64 << (self.bits() - 1);
                v >= -half && v < half
            }
        }
    }

    /// Keep only the low `bits()` bits of `v`.
    pub const fn truncate(self, v: u64) -> u64 {
        match self {
            Width::W64 => v,
            _ => v & ((1u64 << self.bits()) - 1),
        }
    }

    /// Sign-extend the low `bits()` bits of `v`.
    pub const fn sign_extend(self, v: u64) -> i64 {
        let shift = 64 - self.bits();
        ((v << shift) as i64) >> shift
    }
}

/// Which of the two configured data regions a canonical address is
/// synthesized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Guest memory window.
    A,
    /// Kernel-state block.
    B,
}

/// Byte inside a template that names the base register holding a region base.
///
/// Patching a canonical address rewrites `byte & !mask | region_x` at
/// `offset`, so the same template serves both regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSelector {
    pub offset: u16,
    pub mask: u8,
    pub region_a: u8,
    pub region_b: u8,
}

impl RegionSelector {
    #[inline]
    pub const fn code(&self, region: Region) -> u8 {
        match region {
            Region::A => self.region_a,
            Region::B => self.region_b,
        }
    }

    /// Decode the region a selector byte currently names.
    pub fn decode(&self, byte: u8) -> Option<Region> {
        match byte & self.mask {
            v if v == self.region_a => Some(Region::A),
            v if v == self.region_b => Some(Region::B),
            _ => None,
        }
    }
}

/// Relocation kinds for template slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Constant written verbatim, truncated to `Width`.
    ImmediateAbsolute(Width),
    /// `target - (instance + anchor)`, used by PC-relative jumps and calls.
    /// `anchor` is the template offset the host CPU measures from (the end
    /// of the instruction on x86-64).
    DisplacementRelative { width: Width, anchor: u16 },
    /// Host pointer rebuilt as `region base + sign_extend(value)`.
    CanonicalAddress { width: Width, selector: RegionSelector },
    /// PC-relative jump whose destination is another block. Patched first
    /// with a safe default, then re-patched whenever chaining changes.
    ForwardBranch { width: Width, anchor: u16 },
}

impl SlotKind {
    #[inline]
    pub const fn width(self) -> Width {
        match self {
            SlotKind::ImmediateAbsolute(w) => w,
            SlotKind::DisplacementRelative { width, .. }
            | SlotKind::CanonicalAddress { width, .. }
            | SlotKind::ForwardBranch { width, .. } => width,
        }
    }

    /// Forward branches are the only slots that may be written more than once.
    #[inline]
    pub const fn is_forward(self) -> bool {
        matches!(self, SlotKind::ForwardBranch { .. })
    }
}

/// A patchable hole inside a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Byte offset of the field from the start of the template.
    pub offset: u16,
    pub kind: SlotKind,
}

impl Slot {
    pub const fn imm(offset: u16, width: Width) -> Self {
        Self {
            offset,
            kind: SlotKind::ImmediateAbsolute(width),
        }
    }

    pub const fn imm32(offset: u16) -> Self {
        Self::imm(offset, Width::W32)
    }

    /// 32-bit displacement measured from the end of the field.
    pub const fn rel32(offset: u16) -> Self {
        Self {
            offset,
            kind: SlotKind::DisplacementRelative {
                width: Width::W32,
                anchor: offset + 4,
            },
        }
    }

    pub const fn branch32(offset: u16) -> Self {
        Self {
            offset,
            kind: SlotKind::ForwardBranch {
                width: Width::W32,
                anchor: offset + 4,
            },
        }
    }

    pub const fn canonical32(offset: u16, selector: RegionSelector) -> Self {
        Self {
            offset,
            kind: SlotKind::CanonicalAddress {
                width: Width::W32,
                selector,
            },
        }
    }

    /// One past the last byte this slot writes.
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset as usize + self.kind.width().bytes()
    }
}

/// Immutable host code template.
#[derive(Debug)]
pub struct Template {
    pub name: &'static str,
    pub code: &'static [u8],
    pub slots: &'static [Slot],
}

impl Template {
    #[inline]
    pub const fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Bitmask covering every slot.
    #[inline]
    pub fn all_slots_mask(&self) -> u32 {
        debug_assert!(self.slots.len() <= 32);
        if self.slots.len() == 32 {
            u32::MAX
        } else {
            (1u32 << self.slots.len()) - 1
        }
    }
}

/// Guest-operation classes a template can implement, plus the block
/// plumbing the emitter lays around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    StoreImm,
    Move,
    AddImm,
    Add,
    Subf,
    And,
    Or,
    Xor,
    Mullw,
    OrImm,
    XorImm,
    LoadWord,
    StoreWord,
    LoadWordAbs,
    StoreWordAbs,
    Compare,
    CompareLogical,
    CondBranch,
    IndirectTarget,
    CallHelper,
    // -- block plumbing --
    PreemptCheck,
    ChainJump,
    IndirectLookup,
    ExitStub,
    Prologue,
    Epilogue,
}

/// Operand shape refining an [`OpClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// All operands are registers / CPU-state fields.
    Reg,
    /// One operand is a literal immediate.
    Imm,
    /// The immediate is zero and a shorter template applies.
    Zero,
    /// Branch if the selected CR bit is set.
    CrSet,
    /// Branch if the selected CR bit is clear.
    CrClear,
    /// Decrement CTR, branch if the result is non-zero.
    CtrNonZero,
    /// PC-relative target.
    Direct,
    /// Target given as an absolute host or guest address.
    Absolute,
    /// Plumbing template with a single form.
    Fixed,
}

/// Registry lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub class: OpClass,
    pub shape: Shape,
}

impl TemplateKey {
    #[inline]
    pub const fn new(class: OpClass, shape: Shape) -> Self {
        Self { class, shape }
    }

    /// Every key the block emitter can ask for. A registry missing any of
    /// them is rejected before the first block is translated.
    pub const REQUIRED: &'static [TemplateKey] = &[
        TemplateKey::new(OpClass::StoreImm, Shape::Imm),
        TemplateKey::new(OpClass::StoreImm, Shape::Zero),
        TemplateKey::new(OpClass::Move, Shape::Reg),
        TemplateKey::new(OpClass::AddImm, Shape::Imm),
        TemplateKey::new(OpClass::AddImm, Shape::Zero),
        TemplateKey::new(OpClass::Add, Shape::Reg),
        TemplateKey::new(OpClass::Subf, Shape::Reg),
        TemplateKey::new(OpClass::And, Shape::Reg),
        TemplateKey::new(OpClass::Or, Shape::Reg),
        TemplateKey::new(OpClass::Xor, Shape::Reg),
        TemplateKey::new(OpClass::Mullw, Shape::Reg),
        TemplateKey::new(OpClass::OrImm, Shape::Imm),
        TemplateKey::new(OpClass::OrImm, Shape::Zero),
        TemplateKey::new(OpClass::XorImm, Shape::Imm),
        TemplateKey::new(OpClass::XorImm, Shape::Zero),
        TemplateKey::new(OpClass::LoadWord, Shape::Imm),
        TemplateKey::new(OpClass::StoreWord, Shape::Imm),
        TemplateKey::new(OpClass::LoadWord, Shape::Absolute),
        TemplateKey::new(OpClass::StoreWord, Shape::Absolute),
        TemplateKey::new(OpClass::LoadWordAbs, Shape::Absolute),
        TemplateKey::new(OpClass::StoreWordAbs, Shape::Absolute),
        TemplateKey::new(OpClass::Compare, Shape::Reg),
        TemplateKey::new(OpClass::Compare, Shape::Imm),
        TemplateKey::new(OpClass::CompareLogical, Shape::Reg),
        TemplateKey::new(OpClass::CompareLogical, Shape::Imm),
        TemplateKey::new(OpClass::CondBranch, Shape::CrSet),
        TemplateKey::new(OpClass::CondBranch, Shape::CrClear),
        TemplateKey::new(OpClass::CondBranch, Shape::CtrNonZero),
        TemplateKey::new(OpClass::IndirectTarget, Shape::Reg),
        TemplateKey::new(OpClass::CallHelper, Shape::Direct),
        TemplateKey::new(OpClass::CallHelper, Shape::Absolute),
        TemplateKey::new(OpClass::PreemptCheck, Shape::Fixed),
        TemplateKey::new(OpClass::ChainJump, Shape::Direct),
        TemplateKey::new(OpClass::IndirectLookup, Shape::Fixed),
        TemplateKey::new(OpClass::ExitStub, Shape::Fixed),
        TemplateKey::new(OpClass::Prologue, Shape::Fixed),
        TemplateKey::new(OpClass::Epilogue, Shape::Fixed),
    ];
}

/// Read-only table of host templates.
///
/// One implementation exists per host architecture; the engine picks the
/// one matching `target_arch` at build time.
pub trait TemplateRegistry {
    /// Human-readable host name, for logs.
    fn host_name(&self) -> &'static str;

    /// Template implementing `key`, if the host provides one.
    fn lookup(&self, key: TemplateKey) -> Option<&'static Template>;

    /// Lookup that treats a gap as a fatal configuration error.
    fn get(&self, key: TemplateKey) -> Result<&'static Template> {
        self.lookup(key).ok_or(JitError::MissingTemplate(key))
    }

    /// Check that every key the emitter can produce is covered.
    fn validate(&self) -> Result<()> {
        for &key in TemplateKey::REQUIRED {
            self.get(key)?;
        }
        Ok(())
    }
}
