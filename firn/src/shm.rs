//! The process-local segment handle.
//!
//! Exactly one named shared-memory segment can be open per process; the
//! handle is process-global because the arena's clients (for instance the
//! [`SharedAlloc`][`crate::SharedAlloc`] adapter) are stateless. The
//! handle tracks what is private to this process: the segment name, the
//! descriptor, and the open flags. Everything else lives inside the
//! segment itself and is shared.
//!
//! The process that opens the segment with `O_TRUNC` is the *master*: it
//! wipes and initializes the arena, and the address of its mapping
//! becomes the one true base address. Any other process (an *attacher*)
//! maps the segment wherever the kernel suggests, reads the recorded base
//! out of the arena header, and re-maps at that base when the two differ.
//! The re-mapping uses `MAP_FIXED_NOREPLACE`, so an address clash fails
//! the attach instead of silently corrupting some other mapping; Linux
//! 4.17 or newer honors the flag.
//!
//! Open the segment write-only and the arena header cannot be read, which
//! breaks the attach path. The flag combination is accepted for
//! completeness but of little use.
//!
//! Use [`allocate`] and [`deallocate`] strictly between [`open`] and
//! [`close`].

use {
    crate::{
        error::{sys, Error, Result},
        heap::{Arena, MAX_SIZE, MIN_SIZE},
    },
    std::{
        ffi::CString,
        io,
        os::unix::io::{AsFd, BorrowedFd, OwnedFd},
        ptr::{self, NonNull},
        sync::{Mutex, MutexGuard, PoisonError},
    },
};

/// Per-process handle state.
struct State
{
    /// Segment name; generated from the process id on first use.
    name: Option<CString>,

    /// Present while the segment is open.
    open: Option<Open>,
}

struct Open
{
    fd: OwnedFd,
    oflag: libc::c_int,
    arena: NonNull<Arena>,
}

// SAFETY: the arena pointer refers to the shared mapping, which stays
// valid for as long as `Open` exists; all mutation of arena state is
// serialized by the arena's own inter-process semaphore, and the handle
// state itself is behind `STATE`.
unsafe impl Send for Open {}

static STATE: Mutex<State> = Mutex::new(State{name: None, open: None});

fn lock() -> MutexGuard<'static, State>
{
    // A panic in a critical section poisons the mutex, but the handle
    // state itself is just plain data; keep serving it.
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The current segment name, generating the default if none is set.
fn current_name(state: &mut State) -> CString
{
    state.name.get_or_insert_with(|| {
        let name = format!("{}.shm", os_ext::getpid());
        CString::new(name).expect("Digits contain no NUL")
    }).clone()
}

/// Mapping protections implied by the open flags.
fn map_prot(oflag: libc::c_int) -> libc::c_int
{
    let mut prot = os_ext::PROT_READ;
    if oflag & os_ext::O_WRONLY != 0 {
        prot &= !os_ext::PROT_READ;
    }
    if oflag & os_ext::O_RDWR != 0 {
        prot |= os_ext::PROT_WRITE;
    }
    prot
}

/// Open the named shared-memory segment and attach to its arena.
///
/// A `name` of [`None`] uses the process-default name, `<pid>.shm` (or
/// whatever name an earlier call established). Exactly one cooperating
/// process should pass `O_TRUNC`, making it the master that initializes
/// the arena; everyone else attaches to the existing arena at the
/// master's base address. `mode` is only significant together with
/// `O_CREAT`.
///
/// Returns the canonical segment name.
pub fn open(
    name: Option<&str>,
    oflag: libc::c_int,
    mode: libc::mode_t,
) -> Result<String>
{
    let mut state = lock();

    if state.open.is_some() {
        return Err(Error::AlreadyOpen);
    }

    if let Some(name) = name {
        let name = CString::new(name).map_err(|_| Error::System{
            what: "shm_open",
            source: io::Error::from_raw_os_error(libc::EINVAL),
        })?;
        state.name = Some(name);
    }

    let cname = current_name(&mut state);
    let fd = os_ext::shm_open(&*cname, oflag, mode).map_err(sys("shm_open"))?;
    let arena = attach(fd.as_fd(), oflag)?;

    state.open = Some(Open{fd, oflag, arena});

    Ok(cname.into_string().expect("Segment names are valid UTF-8"))
}

/// Size the segment, map it, and initialize or locate the arena.
fn attach(fd: BorrowedFd, oflag: libc::c_int) -> Result<NonNull<Arena>>
{
    let st = os_ext::fstat(fd).map_err(sys("fstat"))?;

    if st.st_size as u64 > MAX_SIZE as u64 {
        return Err(Error::TooLarge(st.st_size as u64));
    }

    // Commit at least one page so the arena header always fits.
    let mut size = st.st_size as usize;
    if size < MIN_SIZE {
        os_ext::ftruncate(fd, MIN_SIZE as libc::off_t).map_err(sys("ftruncate"))?;
        size = MIN_SIZE;
    }

    // The whole window is mapped up front; growth later only needs to
    // truncate the backing file, never to move the mapping.
    let prot = map_prot(oflag);

    // SAFETY: no fixed address is requested.
    let mapped = unsafe {
        os_ext::mmap(ptr::null_mut(), MAX_SIZE, prot, os_ext::MAP_SHARED, Some(fd), 0)
    }.map_err(sys("mmap"))?;

    let arena = mapped.cast::<Arena>();

    if oflag & os_ext::O_TRUNC != 0 {
        // Master: the segment content is gone, build a fresh arena here.
        // SAFETY: fresh MAX_SIZE mapping with `size` committed bytes.
        if let Err(err) = unsafe { Arena::create(arena.as_ptr(), size) } {
            // SAFETY: unmapping the mapping made above.
            let _ = unsafe { os_ext::munmap(mapped, MAX_SIZE) };
            return Err(err);
        }
        log::debug!("created arena at {:p}, {size} committed bytes", arena.as_ptr());
        return Ok(arena);
    }

    // Attacher: every process must use the base recorded by the master.
    // SAFETY: the master initialized the header we just mapped.
    let base = unsafe { Arena::base(arena.as_ptr()) };
    if base == arena.as_ptr() {
        log::debug!("attached arena at its recorded base {base:p}");
        return Ok(arena);
    }

    // SAFETY: unmapping the mapping made above.
    unsafe { os_ext::munmap(mapped, MAX_SIZE) }.map_err(sys("munmap"))?;

    // SAFETY: MAP_FIXED_NOREPLACE does not replace existing mappings.
    let remapped = unsafe {
        os_ext::mmap(
            base.cast(),
            MAX_SIZE,
            prot,
            os_ext::MAP_SHARED | os_ext::MAP_FIXED_NOREPLACE,
            Some(fd),
            0,
        )
    }.map_err(|_| Error::AttachFailed{addr: base as usize})?;

    if remapped.as_ptr() != base.cast() {
        // A kernel that predates MAP_FIXED_NOREPLACE treats the base as
        // a mere hint; an arena anywhere else is unusable.
        // SAFETY: unmapping the mapping made above.
        let _ = unsafe { os_ext::munmap(remapped, MAX_SIZE) };
        return Err(Error::AttachFailed{addr: base as usize});
    }

    log::debug!("re-mapped arena at recorded base {base:p}");
    Ok(remapped.cast())
}

/// Detach from the arena and close the segment, keeping the name.
///
/// The master additionally destroys the arena's semaphore, so it should
/// close only after every attacher is done with the segment.
pub fn close() -> Result<()>
{
    let mut state = lock();
    let open = state.open.take().ok_or(Error::NotOpen)?;
    let arena = open.arena.as_ptr();

    let destroyed = if open.oflag & os_ext::O_TRUNC != 0 {
        // SAFETY: the arena is live until the munmap below.
        unsafe { Arena::destroy(arena) }
    } else {
        Ok(())
    };

    // SAFETY: unmapping the attach-time mapping; `open` is already gone
    // from the state, so no later call can use the dangling arena.
    unsafe { os_ext::munmap(open.arena.cast(), MAX_SIZE) }
        .map_err(sys("munmap"))?;

    log::debug!("closed segment");
    destroyed
}

/// Remove the segment name from the filesystem.
///
/// The segment itself lives on until the last descriptor and mapping are
/// gone; calling this right after the last [`open`] is the conventional
/// way to avoid leaking the name.
pub fn unlink() -> Result<()>
{
    let mut state = lock();
    let name = current_name(&mut state);
    os_ext::shm_unlink(&*name).map_err(sys("shm_unlink"))
}

/// The file mode of the segment's inode.
///
/// Not necessarily equal to the mode passed to [`open`]; the kernel
/// applies the umask and an existing segment keeps its mode.
pub fn mode() -> Result<libc::mode_t>
{
    let state = lock();
    let open = state.open.as_ref().ok_or(Error::NotOpen)?;
    let st = os_ext::fstat(open.fd.as_fd()).map_err(sys("fstat"))?;
    Ok(st.st_mode)
}

/// The current segment name.
///
/// Available whether or not the segment is open.
pub fn name() -> String
{
    let mut state = lock();
    current_name(&mut state).into_string().expect("Segment names are valid UTF-8")
}

/// The open flags, or 0 while the segment is closed.
pub fn oflag() -> libc::c_int
{
    let state = lock();
    state.open.as_ref().map(|open| open.oflag).unwrap_or(0)
}

/// Allocate `n` bytes from the shared arena.
///
/// The returned address is aligned to the payload alignment and valid in
/// every process attached to the segment. `n` of zero returns null
/// without taking the arena semaphore.
pub fn allocate(n: usize) -> Result<*mut u8>
{
    if n == 0 {
        return Ok(ptr::null_mut());
    }

    let state = lock();
    let open = state.open.as_ref().ok_or(Error::NotOpen)?;

    // SAFETY: the arena is attached read-write for as long as it is open.
    unsafe { Arena::allocate(open.arena.as_ptr(), open.fd.as_fd(), n) }
}

/// Return a payload to the shared arena. Null is a no-op.
///
/// # Panics
///
/// Panics on evidence of corruption or misuse: an unaligned pointer, or
/// one whose chunk is not currently allocated.
///
/// # Safety
///
/// `p` must be null or an address previously returned by [`allocate`]
/// (in any attached process) and not deallocated since.
pub unsafe fn deallocate(p: *mut u8) -> Result<()>
{
    if p.is_null() {
        return Ok(());
    }

    let state = lock();
    let open = state.open.as_ref().ok_or(Error::NotOpen)?;

    Arena::deallocate(open.arena.as_ptr(), p)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn prot_follows_oflag()
    {
        assert_eq!(map_prot(os_ext::O_RDONLY), os_ext::PROT_READ);
        assert_eq!(map_prot(os_ext::O_WRONLY), 0);
        assert_eq!(
            map_prot(os_ext::O_RDWR),
            os_ext::PROT_READ | os_ext::PROT_WRITE,
        );
        assert_eq!(
            map_prot(os_ext::O_RDWR | os_ext::O_CREAT | os_ext::O_TRUNC),
            os_ext::PROT_READ | os_ext::PROT_WRITE,
        );
    }

    #[test]
    fn name_defaults_to_pid()
    {
        assert_eq!(name(), format!("{}.shm", os_ext::getpid()));
    }

    #[test]
    fn closed_handle_misuse_is_reported()
    {
        // These run against the closed process-global handle; opening
        // happens only in the per-binary integration tests.
        assert!(matches!(close(), Err(Error::NotOpen)));
        assert!(matches!(mode(), Err(Error::NotOpen)));
        assert!(matches!(allocate(1), Err(Error::NotOpen)));
        assert_eq!(oflag(), 0);

        // Nil requests do not need an open segment.
        assert!(allocate(0).unwrap().is_null());
        // SAFETY: null is a no-op.
        unsafe { deallocate(ptr::null_mut()).unwrap(); }
    }
}
