use {std::io, thiserror::Error};

/// Errors surfaced by the segment handle and the allocator.
///
/// Heap-corruption conditions (a mangled boundary tag, an unaligned
/// payload pointer) are deliberately not represented here: once the arena
/// is untrustworthy there is nothing sensible a caller could do with an
/// error value, so those conditions panic instead.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum Error
{
    /// A system call failed.
    #[error("{what}: {source}")]
    System
    {
        what: &'static str,
        source: io::Error,
    },

    /// The named segment already exceeds the maximum mappable size.
    #[error("shared memory segment too large: {0} bytes")]
    TooLarge(u64),

    /// The base address recorded by the master could not be reclaimed.
    #[error("cannot map shared memory segment at base address {addr:#x}")]
    AttachFailed
    {
        addr: usize,
    },

    /// Geometric growth cannot satisfy the request within the size limit.
    #[error("shared memory arena exhausted")]
    OutOfMemory,

    #[error("shared memory segment is already open")]
    AlreadyOpen,

    #[error("shared memory segment is not open")]
    NotOpen,
}

/// Result with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Wrap an [`io::Error`] as [`Error::System`], labeled with the syscall.
pub(crate) fn sys(what: &'static str) -> impl FnOnce(io::Error) -> Error
{
    move |source| Error::System{what, source}
}
