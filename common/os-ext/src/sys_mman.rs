use {
    crate::cstr::IntoCStr,
    std::{
        ffi::CStr,
        io,
        os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
        ptr::NonNull,
    },
};

/// Call shm_open(3) with the given arguments.
///
/// `mode` is only significant when `oflag` contains `O_CREAT`.
/// POSIX specifies that the new descriptor has `FD_CLOEXEC` set.
pub fn shm_open<'a>(
    name: impl IntoCStr<'a>,
    oflag: libc::c_int,
    mode: libc::mode_t,
) -> io::Result<OwnedFd>
{
    #[inline(never)]
    fn monomorphic(name: &CStr, oflag: libc::c_int, mode: libc::mode_t)
        -> io::Result<OwnedFd>
    {
        // SAFETY: name is NUL-terminated.
        let fd = unsafe { libc::shm_open(name.as_ptr(), oflag, mode) };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a new, open file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    let name = name.into_cstr()?;
    monomorphic(&name, oflag, mode)
}

/// Call shm_unlink(3) with the given arguments.
pub fn shm_unlink<'a>(name: impl IntoCStr<'a>) -> io::Result<()>
{
    #[inline(never)]
    fn monomorphic(name: &CStr) -> io::Result<()>
    {
        // SAFETY: name is NUL-terminated.
        let result = unsafe { libc::shm_unlink(name.as_ptr()) };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    let name = name.into_cstr()?;
    monomorphic(&name)
}

/// Call mmap(2) with the given arguments.
///
/// If `fd` is [`None`], `-1` is passed,
/// which is what `MAP_ANONYMOUS` expects.
///
/// # Safety
///
/// With `MAP_FIXED` the kernel will happily replace existing mappings,
/// invalidating any pointers into them; the caller must ensure the
/// requested range is safe to take over. `MAP_FIXED_NOREPLACE` does not
/// replace mappings and merely requires `addr` to be a hint the caller
/// may see ignored on kernels that lack the flag.
pub unsafe fn mmap(
    addr:   *mut libc::c_void,
    length: usize,
    prot:   libc::c_int,
    flags:  libc::c_int,
    fd:     Option<BorrowedFd>,
    offset: libc::off_t,
) -> io::Result<NonNull<libc::c_void>>
{
    let fd = fd.map(|fd| fd.as_raw_fd()).unwrap_or(-1);

    let mapped = libc::mmap(addr, length, prot, flags, fd, offset);

    if mapped == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // mmap(2) never returns a null mapping on success.
    Ok(NonNull::new_unchecked(mapped))
}

/// Call munmap(2) with the given arguments.
///
/// # Safety
///
/// The range must be a mapping obtained from [`mmap`] and
/// no pointer into it may be used afterwards.
pub unsafe fn munmap(addr: NonNull<libc::c_void>, length: usize)
    -> io::Result<()>
{
    let result = libc::munmap(addr.as_ptr(), length);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{fstat, ftruncate, getpid},
        std::{os::unix::io::AsFd, ptr},
    };

    #[test]
    fn segment_round_trip()
    {
        let name = format!("os-ext-test-{}.shm", getpid());

        let fd = shm_open(
            name.as_str(),
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o600,
        ).unwrap();

        // A freshly truncated segment is empty until grown.
        assert_eq!(fstat(fd.as_fd()).unwrap().st_size, 0);
        ftruncate(fd.as_fd(), 8192).unwrap();
        assert_eq!(fstat(fd.as_fd()).unwrap().st_size, 8192);

        // SAFETY: no fixed address is requested.
        let addr = unsafe {
            mmap(
                ptr::null_mut(),
                8192,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                Some(fd.as_fd()),
                0,
            )
        }.unwrap();

        // SAFETY: the mapping is fresh and writable.
        unsafe {
            let bytes = addr.as_ptr().cast::<u8>();
            bytes.write(0x5c);
            assert_eq!(bytes.read(), 0x5c);
            munmap(addr, 8192).unwrap();
        }

        shm_unlink(name.as_str()).unwrap();
    }

    #[test]
    fn unlink_of_absent_name_fails()
    {
        let name = format!("os-ext-absent-{}.shm", getpid());
        let err = shm_unlink(name.as_str()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
