//! Exhaustion is reported cleanly and leaves the arena usable.

use {
    firn::{heap::MAX_SIZE, shm, Error},
    os_ext::{O_CREAT, O_RDWR, O_TRUNC},
    std::fs,
};

#[test]
fn exhaustion_is_reported_without_growing_the_segment()
{
    let name = shm::open(None, O_RDWR | O_CREAT | O_TRUNC, 0o600).unwrap();
    let path = format!("/dev/shm/{name}");

    // No amount of doubling can fit the request plus its overhead.
    let err = shm::allocate(MAX_SIZE).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory));

    // The failed growth never became visible in the backing file.
    assert_eq!(fs::metadata(&path).unwrap().len(), 4096);

    // The arena still serves ordinary requests.
    let p = shm::allocate(64).unwrap();
    // SAFETY: p is a fresh 64-byte allocation.
    unsafe {
        p.write_bytes(0xa5, 64);
        assert_eq!(p.add(63).read(), 0xa5);
        shm::deallocate(p).unwrap();
    }

    shm::close().unwrap();
    shm::unlink().unwrap();
}
