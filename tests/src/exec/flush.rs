use ppcjit_core::{JitConfig, JitError};

use crate::support::{engine, engine_with, filler};

fn small() -> JitConfig {
    JitConfig {
        code_buffer_size: 4096,
        ..JitConfig::default()
    }
}

#[test]
fn exhausted_buffer_starts_over() {
    let mut e = engine_with(small());
    let first_pc = 0x1000;
    let mut pc = first_pc;
    let mut last = None;
    for _ in 0..10_000 {
        let id = e.emit_block(pc, &filler(pc, 20)).unwrap();
        last = Some((pc, id));
        if e.stats().flushes > 0 {
            break;
        }
        pc += 0x100;
    }
    assert_eq!(e.stats().flushes, 1);

    let (last_pc, last_id) = last.unwrap();
    assert_eq!(e.lookup(first_pc), None);
    assert_eq!(e.lookup(last_pc), Some(last_id));
    assert_eq!(e.blocks().len(), 1);
    assert_eq!(e.block(last_id).host_offset, e.code_buffer().code_start());
    // Only the survivor's fallthrough is still open.
    assert_eq!(e.chains().len(), 1);

    // Earlier code is translated again on demand.
    e.emit_block(first_pc, &filler(first_pc, 20)).unwrap();
    assert!(e.lookup(first_pc).is_some());
}

#[test]
fn block_larger_than_buffer_is_rejected() {
    let mut e = engine_with(small());
    let before = e.code_buffer().offset();
    let n = e.code_buffer().capacity() / 10 + 1;
    let err = e.emit_block(0x1000, &filler(0x1000, n)).unwrap_err();
    assert!(matches!(err, JitError::BlockTooLarge { .. }));
    assert_eq!(e.code_buffer().offset(), before);
    assert_eq!(e.stats().flushes, 0);
}

#[test]
fn invalidate_all_resets_everything() {
    let mut e = engine();
    e.emit_block(0x1000, &filler(0x1000, 4)).unwrap();
    e.emit_block(0x2000, &filler(0x2000, 4)).unwrap();

    e.invalidate_all();
    assert!(e.blocks().is_empty());
    assert!(e.chains().is_empty());
    assert_eq!(e.code_buffer().offset(), e.code_buffer().code_start());
    assert_eq!(e.lookup(0x1000), None);
    assert_eq!(e.stats().flushes, 1);
}
