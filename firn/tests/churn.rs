//! Mixed allocate/deallocate churn compared against a heap-backed control.

use {
    firn::shm,
    os_ext::{O_CREAT, O_RDWR, O_TRUNC},
};

/// Deterministic pseudo-random sequence; the tests need no rand crate.
fn next(state: &mut u64) -> u64
{
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state >> 33
}

#[test]
fn churn_matches_a_heap_backed_control()
{
    let name = format!("firn-churn-{}.shm", os_ext::getpid());
    let canonical = shm::open(Some(&name), O_RDWR | O_CREAT | O_TRUNC, 0o600).unwrap();
    assert_eq!(canonical, name);
    assert_eq!(shm::name(), name);
    assert_eq!(shm::oflag(), O_RDWR | O_CREAT | O_TRUNC);
    assert_eq!(shm::mode().unwrap() & 0o777, 0o600);

    // The name is not needed anymore; the segment lives on until closed.
    shm::unlink().unwrap();

    let mut rng = 0x5eed_1e55_0b5e_55edu64;
    let mut control: Vec<Vec<u32>> = Vec::new();
    let mut shared: Vec<*mut u32> = Vec::new();

    for _ in 0 .. 100 {
        if next(&mut rng) % 2 == 1 {
            // Push a vector of up to 100 random integers to both worlds.
            let len = (next(&mut rng) % 100) as usize;
            let values: Vec<u32> = (0 .. len).map(|_| next(&mut rng) as u32).collect();

            let p = shm::allocate(len * 4).unwrap().cast::<u32>();
            assert_eq!(p.is_null(), len == 0);
            for (i, v) in values.iter().enumerate() {
                // SAFETY: p spans len integers.
                unsafe { p.add(i).write(*v); }
            }

            control.push(values);
            shared.push(p);
        } else if !control.is_empty() {
            // Pop a random vector from both worlds, comparing first.
            let index = next(&mut rng) as usize % control.len();
            let values = control.remove(index);
            let p = shared.remove(index);

            for (i, v) in values.iter().enumerate() {
                // SAFETY: p spans the vector's integers until deallocated.
                assert_eq!(unsafe { p.add(i).read() }, *v);
            }

            // SAFETY: p came from allocate and is dropped here.
            unsafe { shm::deallocate(p.cast()).unwrap(); }
        }
    }

    // Whatever survived the churn still matches, element by element.
    assert_eq!(shared.len(), control.len());
    for (p, values) in shared.iter().zip(&control) {
        for (i, v) in values.iter().enumerate() {
            // SAFETY: p spans the vector's integers.
            assert_eq!(unsafe { p.add(i).read() }, *v);
        }
    }

    for p in shared {
        // SAFETY: p came from allocate and is dropped here.
        unsafe { shm::deallocate(p.cast()).unwrap(); }
    }

    shm::close().unwrap();
    assert_eq!(shm::oflag(), 0);
}
