//! Geometric growth, observed through the size of the backing file.

use {
    firn::shm,
    os_ext::{O_CREAT, O_RDWR, O_TRUNC},
    std::fs,
};

#[test]
fn growth_doubles_the_backing_file()
{
    let name = shm::open(None, O_RDWR | O_CREAT | O_TRUNC, 0o600).unwrap();

    // Named segments appear under /dev/shm on Linux, which lets the
    // committed size be watched from outside the allocator.
    let path = format!("/dev/shm/{name}");
    let file_len = || fs::metadata(&path).unwrap().len();

    assert_eq!(file_len(), 4096);

    let mut live = Vec::new();
    while file_len() == 4096 {
        live.push(shm::allocate(256).unwrap());
    }
    assert_eq!(file_len(), 8192);

    while file_len() == 8192 {
        live.push(shm::allocate(256).unwrap());
    }
    assert_eq!(file_len(), 16384);

    for p in live {
        // SAFETY: p came from allocate and is dropped here.
        unsafe { shm::deallocate(p).unwrap(); }
    }

    shm::close().unwrap();
    shm::unlink().unwrap();
}
