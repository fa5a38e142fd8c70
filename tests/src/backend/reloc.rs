use proptest::prelude::*;

use ppcjit_backend::x86_64::templates::{CHAIN_JUMP, EXIT_STUB, LOAD_WORD_ABS, STORE_IMM};
use ppcjit_backend::{displacement, CodeBuffer, Relocator};
use ppcjit_core::{JitError, Region, RegionBases, Slot, SlotKind, Template, Width};

static NARROW: Template = Template {
    name: "narrow",
    code: &[0xEB, 0, 0x66, 0, 0],
    slots: &[
        Slot::imm(3, Width::W16),
        Slot {
            offset: 1,
            kind: SlotKind::DisplacementRelative {
                width: Width::W8,
                anchor: 2,
            },
        },
    ],
};

fn reloc(a: usize, b: usize) -> Relocator {
    Relocator::new(RegionBases { a, b })
}

fn read_i32(buf: &CodeBuffer, at: usize) -> i64 {
    buf.read_u32(at) as i32 as i64
}

#[test]
fn immediate_is_truncated() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    let mut inst = r.place(&mut buf, &NARROW);
    r.patch(&mut buf, &mut inst, 0, 0x1_2345).unwrap();
    assert_eq!(buf.read(3, 2), &0x2345u16.to_ne_bytes()[..]);
}

#[test]
fn store_imm_fields() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    let mut inst = r.place(&mut buf, &STORE_IMM);
    r.patch(&mut buf, &mut inst, 0, 0x90).unwrap();
    r.patch(&mut buf, &mut inst, 1, 0xFFFF_FFFF).unwrap();
    inst.seal();
    assert_eq!(buf.as_slice(), &[0xC7, 0x85, 0x90, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn displacement_from_anchor() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    buf.append(&[0x90; 100]);
    let mut inst = r.place(&mut buf, &EXIT_STUB);
    let target = buf.addr_at(20) as u64;
    r.patch(&mut buf, &mut inst, 0, 3).unwrap();
    r.patch(&mut buf, &mut inst, 1, target).unwrap();
    inst.seal();
    // jmp at 105, anchor at 110.
    assert_eq!(read_i32(&buf, 106), 20 - 110);
    assert_eq!(buf.read_u32(101), 3);
}

#[test]
fn displacement_width_limit() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    let mut inst = r.place(&mut buf, &NARROW);
    let anchor = buf.addr_at(2) as u64;

    let mut probe = inst;
    assert!(r.patch(&mut buf, &mut probe, 1, anchor + 127).is_ok());

    match r.patch(&mut buf, &mut inst, 1, anchor + 128) {
        Err(JitError::DisplacementOutOfRange { at, target, width }) => {
            assert_eq!(at, anchor);
            assert_eq!(target, anchor + 128);
            assert_eq!(width, Width::W8);
        }
        other => panic!("expected DisplacementOutOfRange, got {other:?}"),
    }
    assert!(displacement(1000, 1000 - 128, Width::W8).is_ok());
    assert!(displacement(1000, 1000 - 129, Width::W8).is_err());
}

#[test]
fn canonical_prefers_region_a_up_to_i32_max() {
    let a = 0x1000_0000_0000usize;
    let b = a + 0x1_0000_0000;
    let r = reloc(a, b);

    let edge = a as u64 + i32::MAX as u64;
    assert_eq!(r.canonical(edge, Width::W32).unwrap(), (Region::A, i32::MAX as i64));

    // One byte further is out of reach of A but close to B.
    let (region, delta) = r.canonical(edge + 1, Width::W32).unwrap();
    assert_eq!(region, Region::B);
    assert_eq!(b as i64 + delta, edge as i64 + 1);

    let below = a as u64 - 0x8000_0000;
    assert_eq!(r.canonical(below, Width::W32).unwrap(), (Region::A, i32::MIN as i64));
}

#[test]
fn canonical_fails_when_no_region_reaches() {
    let a = 0x1000_0000_0000usize;
    let r = reloc(a, a + 0x10_0000_0000);
    let target = a as u64 + i32::MAX as u64 + 1;
    match r.canonical(target, Width::W32) {
        Err(JitError::RegionsNotColocated { target: t, width }) => {
            assert_eq!(t, target);
            assert_eq!(width, Width::W32);
        }
        other => panic!("expected RegionsNotColocated, got {other:?}"),
    }
}

#[test]
fn canonical_rewrites_selector() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let a = 0x1000_0000_0000usize;
    let b = 0x2000_0000_0000usize;
    let r = reloc(a, b);

    let mut in_a = r.place(&mut buf, &LOAD_WORD_ABS);
    r.patch(&mut buf, &mut in_a, 0, a as u64 + 0x40).unwrap();
    r.patch(&mut buf, &mut in_a, 1, 0x10).unwrap();
    in_a.seal();
    assert_eq!(buf.read_u8(in_a.offset + 2), 0x86);
    assert_eq!(r.decode_canonical(&buf, &in_a, 0), Some(a as u64 + 0x40));

    let mut in_b = r.place(&mut buf, &LOAD_WORD_ABS);
    r.patch(&mut buf, &mut in_b, 0, b as u64 - 8).unwrap();
    r.patch(&mut buf, &mut in_b, 1, 0x10).unwrap();
    assert_eq!(buf.read_u8(in_b.offset + 2), 0x87);
    assert_eq!(read_i32(&buf, in_b.offset + 3), -8);
    assert_eq!(r.decode_canonical(&buf, &in_b, 0), Some(b as u64 - 8));
    assert_eq!(r.decode_canonical(&buf, &in_b, 1), None);
}

#[test]
#[should_panic(expected = "patched twice")]
fn double_patch_panics() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    let mut inst = r.place(&mut buf, &STORE_IMM);
    r.patch(&mut buf, &mut inst, 0, 1).unwrap();
    let _ = r.patch(&mut buf, &mut inst, 0, 2);
}

#[test]
#[should_panic(expected = "unpatched slots")]
fn seal_detects_missing_slot() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    let mut inst = r.place(&mut buf, &STORE_IMM);
    r.patch(&mut buf, &mut inst, 1, 1).unwrap();
    inst.seal();
}

#[test]
fn forward_branch_repatches() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    buf.append(&[0xC3; 64]);
    let mut inst = r.place(&mut buf, &CHAIN_JUMP);
    let (first, second) = (buf.addr_at(0) as u64, buf.addr_at(16) as u64);
    r.patch(&mut buf, &mut inst, 0, first).unwrap();
    r.patch(&mut buf, &mut inst, 0, second).unwrap();
    inst.seal();

    let site = inst.branch_site(0);
    assert_eq!(site.at, 65);
    assert_eq!(site.anchor, 69);
    assert_eq!(Relocator::branch_target(&buf, site), 16);

    r.relink(&mut buf, site, 32).unwrap();
    assert_eq!(Relocator::branch_target(&buf, site), 32);
    assert_eq!(read_i32(&buf, 65), 32 - 69);
}

#[test]
#[should_panic(expected = "not a branch")]
fn branch_site_of_immediate_panics() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let r = reloc(0, 0);
    let inst = r.place(&mut buf, &STORE_IMM);
    let _ = inst.branch_site(0);
}

proptest! {
    #[test]
    fn displacement_lands_on_target(pos in 0usize..2048, target in 0usize..4096) {
        let mut buf = CodeBuffer::new(8192).unwrap();
        let r = reloc(0, 0);
        buf.append(&vec![0x90; pos]);
        let mut inst = r.place(&mut buf, &CHAIN_JUMP);
        let addr = buf.addr_at(target) as u64;
        r.patch(&mut buf, &mut inst, 0, addr).unwrap();
        let site = inst.branch_site(0);
        prop_assert_eq!(Relocator::branch_target(&buf, site), target);
        prop_assert_eq!(read_i32(&buf, site.at), target as i64 - site.anchor as i64);
    }

    #[test]
    fn displacement_matches_width(from in any::<u32>(), target in any::<u32>()) {
        let d = target as i64 - from as i64;
        let res = displacement(from as u64, target as u64, Width::W16);
        prop_assert_eq!(res.is_ok(), (i16::MIN as i64..=i16::MAX as i64).contains(&d));
        if let Ok(v) = res {
            prop_assert_eq!(v, d);
        }
    }

    #[test]
    fn canonical_round_trip(delta in any::<i32>(), use_b in any::<bool>()) {
        let a = 0x1000_0000_0000usize;
        let b = 0x3000_0000_0000usize;
        let r = reloc(a, b);
        let base = if use_b { b } else { a };
        let target = (base as i64 + delta as i64) as u64;

        let mut buf = CodeBuffer::new(4096).unwrap();
        let mut inst = r.place(&mut buf, &LOAD_WORD_ABS);
        r.patch(&mut buf, &mut inst, 0, target).unwrap();
        prop_assert_eq!(r.decode_canonical(&buf, &inst, 0), Some(target));

        let (region, d) = r.canonical(target, Width::W32).unwrap();
        prop_assert_eq!(region, if use_b { Region::B } else { Region::A });
        prop_assert_eq!(d, delta as i64);
    }

    #[test]
    fn canonical_beyond_both_regions_fails(extra in 1u64..0x1000_0000) {
        let a = 0x1000_0000_0000usize;
        let r = reloc(a, a + 0x100_0000_0000);
        let target = a as u64 + i32::MAX as u64 + extra;
        prop_assert!(
            matches!(
                r.canonical(target, Width::W32),
                Err(JitError::RegionsNotColocated { .. })
            ),
            "target {:#x} should be unreachable",
            target
        );
    }
}
