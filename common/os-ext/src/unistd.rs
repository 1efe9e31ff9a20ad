use {
    crate::retry_on_eintr,
    std::{
        io,
        os::unix::io::{AsRawFd, BorrowedFd},
    },
};

/// Call ftruncate(2) with the given arguments.
pub fn ftruncate(fd: BorrowedFd, length: libc::off_t) -> io::Result<()>
{
    retry_on_eintr(|| {
        // SAFETY: ftruncate does not access memory through its arguments.
        let result = unsafe { libc::ftruncate(fd.as_raw_fd(), length) };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}

/// Call getpid(2).
pub fn getpid() -> libc::pid_t
{
    // SAFETY: getpid is always successful.
    unsafe { libc::getpid() }
}
