//! In-place heap management for the shared arena.
//!
//! The arena occupies a shared-memory segment from offset 0. It starts
//! with the [`Arena`] header (the inter-process semaphore, the base
//! address recorded at creation, the committed size, and the free-list
//! dummy heads), followed by boundary-tagged chunks that tile the
//! committed bytes without gaps.
//!
//! Everything in the arena is addressed with absolute pointers: the
//! free-list links and the recorded base address are only meaningful
//! because every attached process maps the segment at the same virtual
//! address. The attachment protocol in [`crate::shm`] guarantees that.
//!
//! All operations that mutate chunk or free-list state run under the
//! embedded semaphore, acquired through a guard that releases on every
//! exit path.

pub use self::{chunk::*, free_list::*};

use {
    crate::error::{sys, Error, Result},
    std::{
        mem::size_of,
        os::unix::io::BorrowedFd,
        ptr,
    },
};

pub mod chunk;
pub mod free_list;

/// Smallest committed segment size: one typical page.
///
/// Hard-coded for simplicity; the arena header is
/// guaranteed to fit (checked at compile time).
pub const MIN_SIZE: usize = 4096;

/// Largest committed segment size, and the size of every mapping.
///
/// The limit is considered acceptable for typical use; a larger setting
/// can make `mmap` fail on some systems, since the whole window is
/// reserved up front.
pub const MAX_SIZE: usize = 1 << (if usize::BITS == 64 { 32 } else { 30 });

/// The arena header, a singleton at offset 0 of the segment.
///
/// The alignment matches the payload alignment so that the first real
/// chunk, which starts immediately after the header, is aligned too.
#[repr(C, align(16))]
pub struct Arena
{
    /// Process-shared binary semaphore serializing all heap mutation.
    ///
    /// Semaphores support inter-process use more portably than mutexes.
    sem: libc::sem_t,

    /// Base address the master recorded when it created the arena.
    ///
    /// Every other process must map the segment at this address.
    addr: *mut Arena,

    /// Committed (truncated) segment bytes. Grows monotonically.
    size: usize,

    /// Free-list dummy heads, one per size class.
    free_lists: FreeLists,
}

// The header must fit the smallest committed segment.
const _: () = assert!(size_of::<Arena>() <= MIN_SIZE);

/// Scoped hold on the arena's semaphore.
///
/// Acquired around every heap operation; the drop implementation posts
/// the semaphore on all exit paths, including unwinding.
struct Lock
{
    sem: *mut libc::sem_t,
}

impl Lock
{
    /// Block until the arena's semaphore is acquired.
    ///
    /// # Safety
    ///
    /// `arena` must point to a live, initialized arena.
    unsafe fn acquire(arena: *mut Arena) -> Result<Self>
    {
        let sem = ptr::addr_of_mut!((*arena).sem);
        os_ext::sem_wait(sem).map_err(sys("sem_wait"))?;
        Ok(Self{sem})
    }
}

impl Drop for Lock
{
    fn drop(&mut self)
    {
        // SAFETY: acquire verified the semaphore.
        if let Err(err) = unsafe { os_ext::sem_post(self.sem) } {
            // Failing to post wedges every sharing process;
            // nothing recoverable remains.
            panic!("sem_post: {err}");
        }
    }
}

impl Arena
{
    /// Placement-initialize a fresh arena. Master only.
    ///
    /// Initializes the process-shared semaphore, records the base address
    /// and the committed size, empties the free lists, and covers the
    /// remainder of the committed bytes with one free chunk (when that
    /// remainder can hold a chunk at all).
    ///
    /// # Safety
    ///
    /// `arena` must be the base of a writable `MAX_SIZE` mapping of the
    /// segment with at least `size` committed bytes, and no other process
    /// may be using the segment yet.
    pub unsafe fn create(arena: *mut Arena, size: usize) -> Result<()>
    {
        os_ext::sem_init(ptr::addr_of_mut!((*arena).sem), true, 1)
            .map_err(sys("sem_init"))?;

        ptr::addr_of_mut!((*arena).addr).write(arena);
        ptr::addr_of_mut!((*arena).size).write(size);
        FreeLists::init(ptr::addr_of_mut!((*arena).free_lists));

        let rest = size - size_of::<Arena>();
        if rest >= MIN_CHUNK_SIZE {
            Self::add_chunk(arena, Self::first_chunk(arena), rest);
        }

        Ok(())
    }

    /// Destroy the semaphore. Master only, on close.
    ///
    /// # Safety
    ///
    /// `arena` must point to a live arena, and no process may be blocked
    /// on (or about to use) the semaphore.
    pub unsafe fn destroy(arena: *mut Arena) -> Result<()>
    {
        os_ext::sem_destroy(ptr::addr_of_mut!((*arena).sem))
            .map_err(sys("sem_destroy"))
    }

    /// The base address recorded by the master.
    ///
    /// # Safety
    ///
    /// `arena` must point to a mapped, initialized arena header.
    pub unsafe fn base(arena: *const Arena) -> *mut Arena
    {
        (*arena).addr
    }

    /// Committed segment bytes.
    ///
    /// # Safety
    ///
    /// `arena` must point to a mapped, initialized arena header.
    pub unsafe fn committed(arena: *const Arena) -> usize
    {
        (*arena).size
    }

    /// Allocate `size` bytes from the arena.
    ///
    /// Returns a payload address aligned to [`DATA_ALIGN`], valid in
    /// every process attached to the segment. A zero `size` returns null
    /// without taking the semaphore. `fd` is the segment's descriptor,
    /// used to grow the backing file when no free chunk fits.
    ///
    /// # Safety
    ///
    /// `arena` must point to a live arena mapped read-write, and `fd`
    /// must refer to its backing segment.
    pub unsafe fn allocate(
        arena: *mut Arena,
        fd: BorrowedFd,
        size: usize,
    ) -> Result<*mut u8>
    {
        if size == 0 {
            return Ok(ptr::null_mut());
        }

        let size = size.checked_add(DATA_ALIGN - 1)
            .ok_or(Error::OutOfMemory)?
            & !(DATA_ALIGN - 1);

        let _lock = Lock::acquire(arena)?;

        let free_lists = ptr::addr_of_mut!((*arena).free_lists);
        if let Some(c) = FreeLists::first_fit(free_lists, size) {
            Self::allocate_chunk(arena, c, size);
            return Ok(c.data());
        }

        let need = size.checked_add(size_of::<Chunk>())
            .ok_or(Error::OutOfMemory)?;
        let c = Self::extend(arena, fd, need)?;
        Self::allocate_chunk(arena, c, size);
        Ok(c.data())
    }

    /// Return a payload to the arena.
    ///
    /// Null is a no-op. The chunk is marked free and immediately
    /// coalesced with free neighbors.
    ///
    /// # Panics
    ///
    /// Panics if `data` is unaligned or does not refer to a currently
    /// allocated chunk; both indicate corruption or misuse, after which
    /// the arena cannot be trusted.
    ///
    /// # Safety
    ///
    /// `arena` must point to a live arena mapped read-write, and `data`
    /// must be null or a payload address previously returned by
    /// [`allocate`][`Self::allocate`] on this arena (in any process) and
    /// not returned since.
    pub unsafe fn deallocate(arena: *mut Arena, data: *mut u8) -> Result<()>
    {
        if data.is_null() {
            return Ok(());
        }

        let _lock = Lock::acquire(arena)?;

        let c = ChunkRef::from_data(data);
        assert!(c.allocated(), "deallocate of a chunk that is not allocated");

        (*c.footer()).size = c.size();
        Self::coalesce(arena, c);
        Ok(())
    }

    /// First byte past the arena header: the start of the first chunk.
    unsafe fn first_chunk(arena: *mut Arena) -> *mut u8
    {
        arena.cast::<u8>().add(size_of::<Arena>())
    }

    /// Satisfy a request from a free chunk that fits it.
    ///
    /// Unlinks the chunk; when the surplus can hold a chunk of its own it
    /// is split off and re-entered, otherwise the whole chunk is handed
    /// out and its footer marked allocated.
    unsafe fn allocate_chunk(arena: *mut Arena, c: ChunkRef, size: usize)
    {
        assert!(size % DATA_ALIGN == 0, "allocation size unaligned");
        assert!(c.size() >= size, "chunk too small for the request");

        FreeLists::unlink(c);

        let remainder = c.size() - size;
        if remainder >= MIN_CHUNK_SIZE {
            Self::split(arena, c, remainder);
        } else {
            (*c.footer()).size = 0;
        }
    }

    /// Shrink `c` to its allocated portion and
    /// give the trailing `remainder` bytes a life of their own.
    unsafe fn split(arena: *mut Arena, c: ChunkRef, remainder: usize)
    {
        assert!(remainder >= MIN_CHUNK_SIZE, "split remainder too small");
        assert!(remainder % DATA_ALIGN == 0, "split remainder unaligned");

        (*c.header()).size -= remainder;

        // The footer moved inward with the reduced size.
        (*c.footer()).size = 0;
        (*c.footer()).next = ptr::null_mut();

        Self::add_chunk(arena, c.end(), remainder);
    }

    /// Write boundary tags for a free chunk of footprint `size` at `addr`
    /// and enter it into the heap, coalescing with free neighbors.
    ///
    /// Returns the chunk the bytes ended up in (larger than `size` when
    /// neighbors were merged). The result is always a member of the
    /// appropriate free list.
    unsafe fn add_chunk(arena: *mut Arena, addr: *mut u8, size: usize) -> ChunkRef
    {
        assert!(size % DATA_ALIGN == 0, "chunk footprint unaligned");
        assert!(size >= MIN_CHUNK_SIZE, "chunk footprint too small");

        let c = ChunkRef::from_addr(addr);
        (*c.header()).size = size - size_of::<Chunk>();
        (*c.header()).prev = ptr::null_mut();
        (*c.footer()).size = (*c.header()).size;
        (*c.footer()).next = ptr::null_mut();

        Self::coalesce(arena, c)
    }

    /// Merge a free chunk with its free neighbors and
    /// insert the result into its free list.
    ///
    /// The neighbors are unlinked first, so the recursive re-entry
    /// through [`add_chunk`][`Self::add_chunk`] finds no further free
    /// neighbor and terminates by inserting.
    unsafe fn coalesce(arena: *mut Arena, c: ChunkRef) -> ChunkRef
    {
        let before = Self::before(arena, c);
        let after = Self::after(arena, c);

        if before.is_none() && after.is_none() {
            FreeLists::insert(ptr::addr_of_mut!((*arena).free_lists), c);
            return c;
        }

        let mut combined = c.full_size();
        if let Some(b) = before {
            FreeLists::unlink(b);
            combined += b.full_size();
        }
        if let Some(a) = after {
            FreeLists::unlink(a);
            combined += a.full_size();
        }

        let leftmost = before.unwrap_or(c);
        Self::add_chunk(arena, leftmost.addr(), combined)
    }

    /// The preceding chunk, if there is one and it is free.
    ///
    /// Reads the footer that ends immediately before `c`; its status
    /// encoding is what makes this lookup possible without traversal.
    unsafe fn before(arena: *mut Arena, c: ChunkRef) -> Option<ChunkRef>
    {
        if c.addr() == Self::first_chunk(arena) {
            return None;
        }

        let footer = c.addr().sub(size_of::<ChunkFooter>()).cast::<ChunkFooter>();
        let size = (*footer).size;
        if size == 0 {
            return None; // allocated
        }

        let data = footer.cast::<u8>().sub(size);
        Some(ChunkRef::from_data(data))
    }

    /// The following chunk, if there is one and it is free.
    unsafe fn after(arena: *mut Arena, c: ChunkRef) -> Option<ChunkRef>
    {
        let next = c.end();
        if next as usize + MIN_CHUNK_SIZE > arena as usize + (*arena).size {
            return None;
        }

        let n = ChunkRef::from_addr(next);
        if n.allocated() {
            return None;
        }

        Some(n)
    }

    /// Grow the committed size until at least `need` new bytes exist.
    ///
    /// Doubles geometrically, truncates the backing file, and covers the
    /// newly committed range with one free chunk (merged with the old
    /// tail chunk when that was free). Nothing becomes visible when the
    /// request cannot be satisfied within [`MAX_SIZE`].
    unsafe fn extend(
        arena: *mut Arena,
        fd: BorrowedFd,
        need: usize,
    ) -> Result<ChunkRef>
    {
        let committed = (*arena).size;

        let mut grown = committed;
        while grown < MAX_SIZE && grown - committed < need {
            // The committed size need not be a power of two
            // (an attacher may have created the file at any size),
            // so doubling is clamped to the mapping window.
            grown = (grown * 2).min(MAX_SIZE);
        }
        if grown - committed < need {
            return Err(Error::OutOfMemory);
        }

        os_ext::ftruncate(fd, grown as libc::off_t).map_err(sys("ftruncate"))?;
        log::debug!("extended segment: {committed} -> {grown} bytes");

        let addr = arena.cast::<u8>().add(committed);
        ptr::addr_of_mut!((*arena).size).write(grown);
        Ok(Self::add_chunk(arena, addr, grown - committed))
    }
}
