//! Extra items for talking to the operating system.
//!
//! This crate provides a safe, low-level interface to the operating system.
//! The functions in this crate are named after their underlying system calls,
//! and their behavior is identical except for the differences listed below.
//! The exact semantics of each function can be found in their man pages.
//! This is in contrast with the std crate, which gives no such guarantees.
//! This is a trade-off against cross-platform compatibility.
//!
//! # Differences with underlying system calls
//!
//! Errors are reported using [`Result`] rather than
//! through `errno` and an arbitrary return value.
//!
//! Regular string arguments are accepted instead of NUL-terminated strings.
//! They are automatically made NUL-terminated by the wrapper functions.
//! If an interior NUL is found within the string,
//! the wrapper function fails with `EINVAL`.
//!
//! If the system call fails with `EINTR` (interrupted),
//! the wrapper function automatically retries it.
//!
//! [`Result`]: `std::io::Result`

#![warn(missing_docs)]

pub use {
    self::{cstr::*, semaphore::*, sys_mman::*, sys_stat::*, unistd::*},
    libc::{
        MAP_FIXED_NOREPLACE, MAP_SHARED,
        O_CREAT, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY,
        PROT_READ, PROT_WRITE,
        c_int, c_uint, mode_t, off_t, pid_t, sem_t,
    },
};

use std::io::{self, ErrorKind::Interrupted};

mod cstr;
mod semaphore;
mod sys_mman;
mod sys_stat;
mod unistd;

// Cannot `pub use` as that would also export the fstat function.
#[allow(missing_docs, non_camel_case_types)]
pub type stat = libc::stat;

/// Call `f` until it no longer fails with `EINTR`.
fn retry_on_eintr<F, T>(mut f: F) -> io::Result<T>
    where F: FnMut() -> io::Result<T>
{
    loop {
        match f() {
            Err(err) if err.kind() == Interrupted => continue,
            result                                => return result,
        }
    }
}
