use std::sync::Arc;
use std::thread;

use ppcjit_core::{PreemptEvents, PreemptionFlag};

#[test]
fn starts_clear() {
    let flag = PreemptionFlag::new();
    assert!(!flag.check());
    assert!(flag.pending().is_empty());
}

#[test]
fn set_and_clear_are_per_bit() {
    let flag = PreemptionFlag::new();
    flag.set(PreemptEvents::TIMER);
    flag.set(PreemptEvents::TRIGGER_INTERRUPT);
    assert!(flag.check());
    assert!(flag.test(PreemptEvents::TIMER | PreemptEvents::TRIGGER_INTERRUPT));

    flag.clear(PreemptEvents::TIMER);
    assert!(flag.check());
    assert_eq!(flag.pending(), PreemptEvents::TRIGGER_INTERRUPT);

    flag.clear(PreemptEvents::TRIGGER_INTERRUPT);
    assert!(!flag.check());
}

#[test]
fn init_overwrites() {
    let flag = PreemptionFlag::new();
    flag.set(PreemptEvents::ENTER_MONITOR);
    flag.init(PreemptEvents::EXEC_RETURN);
    assert_eq!(flag.pending(), PreemptEvents::EXEC_RETURN);
    flag.init(PreemptEvents::empty());
    assert!(!flag.check());
}

#[test]
fn word_is_visible_through_pointer() {
    let flag = PreemptionFlag::new();
    flag.set(PreemptEvents::HANDLE_INTERRUPT);
    let word = unsafe { &*flag.as_ptr() };
    assert_eq!(
        word.load(std::sync::atomic::Ordering::Acquire),
        PreemptEvents::HANDLE_INTERRUPT.bits()
    );
}

#[test]
fn set_from_many_threads() {
    let flag = Arc::new(PreemptionFlag::new());
    let events = [
        PreemptEvents::EXEC_RETURN,
        PreemptEvents::TRIGGER_INTERRUPT,
        PreemptEvents::HANDLE_INTERRUPT,
        PreemptEvents::ENTER_MONITOR,
        PreemptEvents::TIMER,
    ];
    let handles: Vec<_> = events
        .iter()
        .map(|&ev| {
            let flag = Arc::clone(&flag);
            thread::spawn(move || flag.set(ev))
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(flag.pending(), PreemptEvents::all());
}
