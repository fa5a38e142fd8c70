use ppcjit_backend::{CodeBuffer, Reserve};
use ppcjit_core::JitError;

#[test]
fn append_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let at = buf.append(&[0x90, 0xEF, 0xBE, 0xAD, 0xDE]);
    assert_eq!(at, 0);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), u32::from_ne_bytes([0xEF, 0xBE, 0xAD, 0xDE]));
    assert_eq!(buf.append(&[0xC3]), 5);
}

#[test]
fn patch_in_place() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.append(&[0; 8]);
    buf.patch(2, &[1, 2, 3]);
    buf.patch_u8(7, 0xAA);
    assert_eq!(buf.as_slice(), &[0, 0, 1, 2, 3, 0, 0, 0xAA]);
}

#[test]
fn size_rounds_to_page() {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let buf = CodeBuffer::new(100).unwrap();
    assert_eq!(buf.capacity(), page);
    let buf = CodeBuffer::new(page + 1).unwrap();
    assert_eq!(buf.capacity(), 2 * page);
}

#[test]
fn zero_size_rejected() {
    assert!(matches!(CodeBuffer::new(0), Err(JitError::InvalidConfig(_))));
}

#[test]
fn reserve_flushes_to_code_start() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.append(&[0xCC; 64]);
    buf.set_code_start();
    assert_eq!(buf.code_start(), 64);
    assert_eq!(buf.usable(), buf.capacity() - 64);

    let fill = buf.remaining() - 50;
    assert_eq!(buf.reserve(fill).unwrap(), Reserve::Ready);
    buf.append(&vec![0x90; fill]);
    assert_eq!(buf.reserve(50).unwrap(), Reserve::Ready);

    assert_eq!(buf.reserve(100).unwrap(), Reserve::Flushed);
    assert_eq!(buf.offset(), 64);
    // Stubs below the code start survive.
    assert_eq!(buf.read(0, 64), &[0xCC; 64][..]);
}

#[test]
fn reserve_exact_fit_does_not_flush() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.append(&[0; 96]);
    let left = buf.remaining();
    assert_eq!(buf.reserve(left).unwrap(), Reserve::Ready);
    buf.append(&vec![0; left]);
    assert_eq!(buf.remaining(), 0);
}

#[test]
fn oversized_request_is_fatal() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.append(&[0; 16]);
    buf.set_code_start();
    let usable = buf.usable();
    match buf.reserve(usable + 1) {
        Err(JitError::BlockTooLarge { requested, usable: u }) => {
            assert_eq!(requested, usable + 1);
            assert_eq!(u, usable);
        }
        other => panic!("expected BlockTooLarge, got {other:?}"),
    }
    // Cursor untouched.
    assert_eq!(buf.offset(), 16);
}

#[test]
fn rewind_discards_tail() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.append(&[1; 10]);
    buf.set_code_start();
    buf.append(&[2; 10]);
    buf.rewind(10);
    assert_eq!(buf.offset(), 10);
}

#[test]
#[should_panic(expected = "code buffer overflow")]
fn append_past_end_panics() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let cap = buf.capacity();
    buf.append(&vec![0; cap + 1]);
}

#[test]
fn addresses_round_trip() {
    let buf = CodeBuffer::new(4096).unwrap();
    let addr = buf.addr_at(123);
    assert_eq!(addr, buf.base_ptr() as usize + 123);
    assert_eq!(buf.offset_of(addr), Some(123));
    assert_eq!(buf.offset_of(buf.base_ptr() as usize + buf.capacity()), None);
}
