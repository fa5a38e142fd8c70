use ppcjit_backend::Relocator;
use ppcjit_core::{BlockId, BlockState, JitConfig, Op};
use ppcjit_exec::{ChainTable, PendingChain};

use crate::support::{engine, engine_with, filler, seq, TestEngine};

fn lands_in(e: &TestEngine, src: BlockId, exit: usize) -> usize {
    let site = e.block(src).exits[exit].site;
    Relocator::branch_target(e.code_buffer(), site)
}

fn entry(e: &TestEngine, id: BlockId) -> usize {
    e.block(id).host_offset
}

#[test]
fn fallthrough_is_patched_when_successor_appears() {
    let mut e = engine();
    let a = e.emit_block(0x1000, &filler(0x1000, 2)).unwrap();
    assert_eq!(lands_in(&e, a, 0), e.stubs().dispatch);

    let b = e.emit_block(0x1008, &seq(0x1008, &[Op::Blr])).unwrap();
    assert_eq!(e.block(a).exits[0].linked, Some(b));
    assert_eq!(lands_in(&e, a, 0), entry(&e, b));
    assert_eq!(e.block(a).state, BlockState::Chained);
    assert_eq!(e.block(b).incoming, [(a, 0)]);
    assert!(e.chains().is_empty());
    assert_eq!(e.stats().chain_links, 1);
}

#[test]
fn resident_target_is_linked_at_emission() {
    let mut e = engine();
    let t = e.emit_block(0x2000, &seq(0x2000, &[Op::Sc])).unwrap();
    let a = e
        .emit_block(0x1000, &seq(0x1000, &[Op::B { target: 0x2000 }]))
        .unwrap();
    assert_eq!(lands_in(&e, a, 0), entry(&e, t));
    assert_eq!(e.block(a).state, BlockState::Chained);
    assert!(e.chains().is_empty());
}

#[test]
fn converging_exits_link_in_either_order() {
    for target_first in [false, true] {
        let mut e = engine();
        let emit_target = |e: &mut TestEngine| e.emit_block(0x3000, &seq(0x3000, &[Op::Blr])).unwrap();
        let t0 = target_first.then(|| emit_target(&mut e));
        let a = e
            .emit_block(0x1000, &seq(0x1000, &[Op::B { target: 0x3000 }]))
            .unwrap();
        let c = e
            .emit_block(0x2000, &seq(0x2000, &[Op::Bl { target: 0x3000 }]))
            .unwrap();
        let t = t0.unwrap_or_else(|| emit_target(&mut e));

        for src in [a, c] {
            assert_eq!(e.block(src).exits[0].linked, Some(t));
            assert_eq!(lands_in(&e, src, 0), entry(&e, t));
        }
        let mut incoming = e.block(t).incoming.clone();
        incoming.sort();
        assert_eq!(incoming, [(a, 0), (c, 0)]);
        assert!(e.chains().is_empty());
    }
}

#[test]
fn self_loop_links_to_itself() {
    let mut e = engine();
    let insns = seq(
        0x1000,
        &[Op::Addi { rd: 3, ra: 3, simm: 1 }, Op::B { target: 0x1000 }],
    );
    let id = e.emit_block(0x1000, &insns).unwrap();
    assert_eq!(e.block(id).exits[0].linked, Some(id));
    assert_eq!(e.block(id).incoming, [(id, 0)]);
    assert_eq!(lands_in(&e, id, 0), entry(&e, id));
    assert_eq!(e.block(id).state, BlockState::Chained);
}

#[test]
fn conditional_exits_link_independently() {
    let mut e = engine();
    let insns = seq(
        0x1000,
        &[Op::Bc { cond: ppcjit_core::BranchCond::DecCtrNonZero, target: 0x1000 }],
    );
    let id = e.emit_block(0x1000, &insns).unwrap();
    assert_eq!(e.block(id).exits[0].linked, Some(id));
    assert_eq!(e.block(id).exits[1].linked, None);
    assert_eq!(e.block(id).state, BlockState::Partial);
    assert_eq!(e.chains().pending_for(0x1004), &[PendingChain { src: id, exit: 1 }]);

    let next = e.emit_block(0x1004, &seq(0x1004, &[Op::Sc])).unwrap();
    assert_eq!(e.block(id).exits[1].linked, Some(next));
    assert_eq!(e.block(id).state, BlockState::Chained);
}

#[test]
fn disabled_chaining_keeps_dispatcher_exits() {
    let mut e = engine_with(JitConfig {
        code_buffer_size: 1 << 20,
        direct_chaining: false,
        ..JitConfig::default()
    });
    let a = e.emit_block(0x1000, &filler(0x1000, 2)).unwrap();
    e.emit_block(0x1008, &seq(0x1008, &[Op::Blr])).unwrap();

    assert_eq!(e.block(a).exits[0].linked, None);
    assert_eq!(lands_in(&e, a, 0), e.stubs().dispatch);
    assert!(e.chains().is_empty());
    assert_eq!(e.stats().chain_links, 0);
}

#[test]
fn chain_table_bookkeeping() {
    let mut t = ChainTable::new();
    t.add(0x2000, BlockId(0), 0);
    t.add(0x2000, BlockId(0), 0);
    t.add(0x2000, BlockId(1), 1);
    t.add(0x3000, BlockId(1), 0);
    assert_eq!(t.len(), 3);

    t.remove_source(BlockId(1));
    assert_eq!(t.len(), 1);
    assert!(t.pending_for(0x3000).is_empty());

    assert_eq!(t.take(0x2000), [PendingChain { src: BlockId(0), exit: 0 }]);
    assert!(t.take(0x2000).is_empty());
    assert!(t.is_empty());
}
