//! Relocation applier.
//!
//! Copies templates into the code buffer and fills their slots. Every
//! value handed to [`Relocator::patch`] is in the slot's natural unit:
//! the literal for immediates, an absolute host address for displacements,
//! forward branches and canonical addresses.

use ppcjit_core::{BranchSite, JitError, Region, RegionBases, Result, SlotKind, Template, Width};
use tracing::trace;

use crate::code_buffer::CodeBuffer;

/// One template copied into the code buffer.
#[derive(Debug, Clone, Copy)]
pub struct Instance {
    /// Buffer offset of the first template byte.
    pub offset: usize,
    pub template: &'static Template,
    patched: u32,
}

impl Instance {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.template.len()
    }

    #[inline]
    pub fn is_patched(&self, idx: usize) -> bool {
        self.patched & (1 << idx) != 0
    }

    /// Buffer location of forward-branch slot `idx`.
    pub fn branch_site(&self, idx: usize) -> BranchSite {
        let slot = &self.template.slots[idx];
        match slot.kind {
            SlotKind::ForwardBranch { width, anchor }
            | SlotKind::DisplacementRelative { width, anchor } => BranchSite {
                at: self.offset + slot.offset as usize,
                anchor: self.offset + anchor as usize,
                width,
            },
            other => panic!(
                "slot {idx} of `{}` is {other:?}, not a branch",
                self.template.name
            ),
        }
    }

    /// Assert that every slot has been written. Called before the instance
    /// becomes reachable.
    pub fn seal(&self) {
        let all = self.template.all_slots_mask();
        assert!(
            self.patched & all == all,
            "`{}` at {:#x} published with unpatched slots {:#b}",
            self.template.name,
            self.offset,
            all & !self.patched
        );
    }
}

/// Patches template slots against a fixed pair of data regions.
#[derive(Debug, Clone, Copy)]
pub struct Relocator {
    regions: RegionBases,
}

impl Relocator {
    pub fn new(regions: RegionBases) -> Self {
        Self { regions }
    }

    #[inline]
    pub fn regions(&self) -> RegionBases {
        self.regions
    }

    /// Copy `template` at the cursor. All slots start unpatched.
    pub fn place(&self, buf: &mut CodeBuffer, template: &'static Template) -> Instance {
        let offset = buf.append(template.code);
        Instance {
            offset,
            template,
            patched: 0,
        }
    }

    /// Fill slot `idx` of `inst` with `value`.
    ///
    /// Non-branch slots may be written once; a second write is a bug in the
    /// emitter and panics.
    pub fn patch(
        &self,
        buf: &mut CodeBuffer,
        inst: &mut Instance,
        idx: usize,
        value: u64,
    ) -> Result<()> {
        let slot = inst.template.slots[idx];
        assert!(
            slot.kind.is_forward() || !inst.is_patched(idx),
            "slot {idx} of `{}` at {:#x} patched twice",
            inst.template.name,
            inst.offset
        );
        let at = inst.offset + slot.offset as usize;

        match slot.kind {
            SlotKind::ImmediateAbsolute(width) => write_field(buf, at, width, value),
            SlotKind::DisplacementRelative { width, anchor }
            | SlotKind::ForwardBranch { width, anchor } => {
                let from = buf.addr_at(inst.offset + anchor as usize) as u64;
                let disp = displacement(from, value, width)?;
                write_field(buf, at, width, disp as u64);
            }
            SlotKind::CanonicalAddress { width, selector } => {
                let (region, delta) = self.canonical(value, width)?;
                write_field(buf, at, width, delta as u64);
                let sel_at = inst.offset + selector.offset as usize;
                let byte = buf.read_u8(sel_at);
                buf.patch_u8(sel_at, (byte & !selector.mask) | selector.code(region));
            }
        }
        inst.patched |= 1 << idx;
        Ok(())
    }

    /// Repoint an already emitted jump at buffer offset `target`.
    pub fn relink(&self, buf: &mut CodeBuffer, site: BranchSite, target: usize) -> Result<()> {
        let from = buf.addr_at(site.anchor) as u64;
        let to = buf.addr_at(target) as u64;
        let disp = displacement(from, to, site.width)?;
        trace!(at = site.at, target, "relink");
        write_field(buf, site.at, site.width, disp as u64);
        Ok(())
    }

    /// Buffer offset a branch field currently lands on.
    pub fn branch_target(buf: &CodeBuffer, site: BranchSite) -> usize {
        let raw = read_field(buf, site.at, site.width);
        let disp = site.width.sign_extend(raw);
        (site.anchor as i64 + disp) as usize
    }

    /// Choose the region `target` is expressed against and the signed
    /// delta to store. Region A is preferred.
    pub fn canonical(&self, target: u64, width: Width) -> Result<(Region, i64)> {
        for (region, base) in [(Region::A, self.regions.a), (Region::B, self.regions.b)] {
            let delta = (target as i128) - (base as i128);
            if let Ok(delta) = i64::try_from(delta) {
                if width.fits_signed(delta) {
                    return Ok((region, delta));
                }
            }
        }
        Err(JitError::RegionsNotColocated { target, width })
    }

    /// Host address a patched canonical-address slot resolves to.
    pub fn decode_canonical(&self, buf: &CodeBuffer, inst: &Instance, idx: usize) -> Option<u64> {
        let slot = inst.template.slots[idx];
        let SlotKind::CanonicalAddress { width, selector } = slot.kind else {
            return None;
        };
        let sel = buf.read_u8(inst.offset + selector.offset as usize);
        let base = match selector.decode(sel)? {
            Region::A => self.regions.a,
            Region::B => self.regions.b,
        };
        let raw = read_field(buf, inst.offset + slot.offset as usize, width);
        Some((base as u64).wrapping_add(width.sign_extend(raw) as u64))
    }
}

/// `target - from`, checked against `width`.
pub fn displacement(from: u64, target: u64, width: Width) -> Result<i64> {
    let disp = (target as i128) - (from as i128);
    match i64::try_from(disp) {
        Ok(disp) if width.fits_signed(disp) => Ok(disp),
        _ => Err(JitError::DisplacementOutOfRange {
            at: from,
            target,
            width,
        }),
    }
}

fn write_field(buf: &mut CodeBuffer, at: usize, width: Width, value: u64) {
    match width {
        Width::W8 => buf.patch(at, &(value as u8).to_ne_bytes()),
        Width::W16 => buf.patch(at, &(value as u16).to_ne_bytes()),
        Width::W32 => buf.patch(at, &(value as u32).to_ne_bytes()),
        Width::W64 => buf.patch(at, &value.to_ne_bytes()),
    }
}

fn read_field(buf: &CodeBuffer, at: usize, width: Width) -> u64 {
    let bytes = buf.read(at, width.bytes());
    match width {
        Width::W8 => u64::from(bytes[0]),
        Width::W16 => u64::from(u16::from_ne_bytes([bytes[0], bytes[1]])),
        Width::W32 => u64::from(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        Width::W64 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(bytes);
            u64::from_ne_bytes(b)
        }
    }
}
