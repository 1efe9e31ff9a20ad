//! The stateless adapter over the process-global handle.

use {
    firn::{shm, SharedAlloc},
    os_ext::{O_CREAT, O_RDWR, O_TRUNC},
    std::alloc::{GlobalAlloc, Layout},
};

#[test]
fn adapter_allocates_from_the_shared_arena()
{
    shm::open(None, O_RDWR | O_CREAT | O_TRUNC, 0o600).unwrap();

    let alloc = SharedAlloc;
    let layout = Layout::from_size_align(64, 16).unwrap();

    // SAFETY: layout has nonzero size; p is freed with the same layout.
    unsafe {
        let p = alloc.alloc(layout);
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);

        p.write_bytes(0x3c, layout.size());
        assert_eq!(p.add(layout.size() - 1).read(), 0x3c);

        alloc.dealloc(p, layout);
    }

    // Alignments beyond the arena's payload alignment are refused.
    let over_aligned = Layout::from_size_align(64, 32).unwrap();
    // SAFETY: a null return means no allocation took place.
    assert!(unsafe { alloc.alloc(over_aligned) }.is_null());

    shm::close().unwrap();
    shm::unlink().unwrap();
}
