use ppcjit_core::{
    Block, BlockId, BlockState, BranchSite, ExitSlot, JumpCache, JumpEntry, Width,
    JUMP_CACHE_SIZE,
};

fn site() -> BranchSite {
    BranchSite {
        at: 1,
        anchor: 5,
        width: Width::W32,
    }
}

#[test]
fn intersects_half_open() {
    let b = Block::new(BlockId(0), 0x1000, 0x1010, 4);
    assert!(b.intersects(0x1000, 0x1001));
    assert!(b.intersects(0x100c, 0x2000));
    assert!(b.intersects(0x0, 0xffff_ffff));
    assert!(!b.intersects(0x1010, 0x1020));
    assert!(!b.intersects(0x0f00, 0x1000));
}

#[test]
fn block_at_top_of_address_space_ends_past_u32() {
    let b = Block::new(BlockId(0), 0xffff_fffc, 1 << 32, 1);
    assert!(b.intersects(0xffff_ffe0, 1 << 32));
    assert!(b.intersects(0xffff_fffc, 0xffff_fffd));
    assert!(!b.intersects(0x0, 0x20));
}

#[test]
fn targets_range_checks_exits() {
    let mut b = Block::new(BlockId(0), 0x1000, 0x1004, 1);
    b.exits.push(ExitSlot {
        target_pc: 0x2000,
        site: site(),
        linked: None,
    });
    assert!(b.targets_range(0x2000, 0x2004));
    assert!(!b.targets_range(0x2004, 0x3000));

    b.exits[0].target_pc = 0xffff_fffc;
    assert!(b.targets_range(0xffff_ffe0, 1 << 32));
}

#[test]
fn state_follows_links() {
    let mut b = Block::new(BlockId(0), 0x1000, 0x1004, 1);
    assert_eq!(b.state, BlockState::Emitting);
    assert!(!b.is_valid());
    b.refresh_state();
    assert_eq!(b.state, BlockState::Emitting);

    b.state = BlockState::Partial;
    b.exits.push(ExitSlot {
        target_pc: 0x2000,
        site: site(),
        linked: None,
    });
    b.refresh_state();
    assert_eq!(b.state, BlockState::Partial);

    b.exits[0].linked = Some(BlockId(1));
    b.refresh_state();
    assert_eq!(b.state, BlockState::Chained);

    b.state = BlockState::Invalidated;
    b.refresh_state();
    assert_eq!(b.state, BlockState::Invalidated);
}

#[test]
fn jump_cache_direct_mapped() {
    let mut jc = JumpCache::new();
    assert_eq!(jc.lookup(0x1000), None);

    jc.insert(0x1000, BlockId(3), 0xdead_0000);
    assert_eq!(jc.lookup(0x1000), Some(BlockId(3)));
    assert_eq!(
        jc.entry(0x1000),
        JumpEntry {
            tag: 0x1000,
            host: 0xdead_0000
        }
    );

    // Same line, different tag.
    let alias = 0x1000 + (JUMP_CACHE_SIZE as u32) * 4;
    assert_eq!(JumpCache::index(alias), JumpCache::index(0x1000));
    assert_eq!(jc.lookup(alias), None);

    // Removing the alias leaves the resident entry alone.
    jc.remove(alias);
    assert_eq!(jc.lookup(0x1000), Some(BlockId(3)));

    jc.insert(alias, BlockId(4), 0xbeef_0000);
    assert_eq!(jc.lookup(0x1000), None);
    assert_eq!(jc.lookup(alias), Some(BlockId(4)));

    jc.invalidate();
    assert_eq!(jc.lookup(alias), None);
    assert_eq!(jc.entry(alias), JumpEntry::INVALID);
}

#[test]
fn jump_entry_layout() {
    assert_eq!(std::mem::size_of::<JumpEntry>(), 16);
    assert_eq!(std::mem::offset_of!(JumpEntry, host), 8);
}
