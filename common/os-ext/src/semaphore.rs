//! POSIX semaphores.
//!
//! These wrappers operate on raw `sem_t` pointers rather than owned
//! values, because a process-shared semaphore lives wherever the sharing
//! processes placed it (typically inside a shared-memory mapping), not in
//! memory owned by this crate.

use {crate::retry_on_eintr, std::io};

/// Call sem_init(3) with the given arguments.
///
/// # Safety
///
/// `sem` must point to writable memory large enough for a `sem_t`,
/// and that memory must not hold an initialized semaphore.
pub unsafe fn sem_init(sem: *mut libc::sem_t, pshared: bool, value: libc::c_uint)
    -> io::Result<()>
{
    let result = libc::sem_init(sem, pshared as libc::c_int, value);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call sem_wait(3) with the given arguments.
///
/// # Safety
///
/// `sem` must point to an initialized semaphore.
pub unsafe fn sem_wait(sem: *mut libc::sem_t) -> io::Result<()>
{
    retry_on_eintr(|| {
        let result = libc::sem_wait(sem);

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}

/// Call sem_post(3) with the given arguments.
///
/// # Safety
///
/// `sem` must point to an initialized semaphore.
pub unsafe fn sem_post(sem: *mut libc::sem_t) -> io::Result<()>
{
    let result = libc::sem_post(sem);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call sem_destroy(3) with the given arguments.
///
/// # Safety
///
/// `sem` must point to an initialized semaphore
/// that no process is blocked on.
pub unsafe fn sem_destroy(sem: *mut libc::sem_t) -> io::Result<()>
{
    let result = libc::sem_destroy(sem);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests
{
    use {super::*, std::mem::MaybeUninit};

    #[test]
    fn wait_and_post()
    {
        let mut sem = MaybeUninit::<libc::sem_t>::uninit();

        // SAFETY: sem is writable and uninitialized.
        unsafe {
            sem_init(sem.as_mut_ptr(), false, 1).unwrap();
            sem_wait(sem.as_mut_ptr()).unwrap();
            sem_post(sem.as_mut_ptr()).unwrap();
            sem_destroy(sem.as_mut_ptr()).unwrap();
        }
    }
}
