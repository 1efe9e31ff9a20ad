//! Dynamic memory allocation inside POSIX named shared memory.
//!
//! A group of cooperating processes maps one shared-memory segment at the
//! same virtual address in each of them. The segment starts with an
//! arena header and is otherwise tiled by boundary-tagged chunks; because
//! every process sees the same addresses, plain pointers stored inside
//! the segment (both the allocator's own free-list links and whatever
//! pointer-rich structures callers build) stay valid across process
//! boundaries.
//!
//! One process, the *master*, opens the segment with `O_TRUNC` and
//! initializes the arena. Everyone else attaches and is re-mapped to the
//! master's base address. A process-shared semaphore embedded in the
//! arena serializes all heap mutation; the backing file grows by
//! geometric doubling when the arena runs out of free chunks, up to a
//! fixed maximum that is reserved as address space from the start.
//!
//! ```no_run
//! let name = firn::shm::open(
//!     None,
//!     os_ext::O_RDWR | os_ext::O_CREAT | os_ext::O_TRUNC,
//!     0o600,
//! )?;
//!
//! let p = firn::shm::allocate(256)?;
//! // ... share `p` with processes that attached to `name` ...
//! unsafe { firn::shm::deallocate(p)?; }
//!
//! firn::shm::close()?;
//! firn::shm::unlink()?;
//! # Ok::<(), firn::Error>(())
//! ```
//!
//! Requires Linux 4.17 or newer for `MAP_FIXED_NOREPLACE`, which keeps a
//! failed attach from corrupting unrelated mappings.

#![warn(missing_docs)]

pub use self::{alloc::SharedAlloc, error::{Error, Result}};

pub mod heap;
pub mod shm;

mod alloc;
mod error;
