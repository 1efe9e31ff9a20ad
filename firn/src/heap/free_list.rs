//! Segregated free lists.
//!
//! One doubly-linked list per power-of-two size class, each headed by a
//! dummy chunk embedded in the arena header. The dummy heads never carry a
//! payload; their zero header size makes the footer computation land on
//! their own footer field, so list manipulation never special-cases them.
//! A free chunk's back link lives in its header and its forward link in
//! its footer, which is what the boundary tags have room for.

use {
    super::chunk::{self, Chunk, ChunkRef, N_FREE_LISTS},
    std::{mem::size_of, ptr},
};

/// The dummy heads of all size classes.
///
/// Lives inside the arena header, in shared memory; all operations go
/// through raw pointers for that reason.
#[repr(C)]
pub struct FreeLists
{
    heads: [Chunk; N_FREE_LISTS],
}

impl FreeLists
{
    /// Zero every dummy head, making all lists empty.
    ///
    /// # Safety
    ///
    /// `this` must point to writable memory large enough for `FreeLists`.
    pub unsafe fn init(this: *mut FreeLists)
    {
        ptr::write_bytes(this.cast::<u8>(), 0, size_of::<FreeLists>());
    }

    /// The dummy head of the given size class.
    ///
    /// # Safety
    ///
    /// `this` must point to initialized free lists.
    unsafe fn head(this: *mut FreeLists, index: usize) -> ChunkRef
    {
        ChunkRef::from_link(ptr::addr_of_mut!((*this).heads[index]))
    }

    /// Insert a free chunk at the head of its size class.
    ///
    /// # Safety
    ///
    /// `c` must be a free chunk in a live arena that is
    /// not currently a member of any list.
    pub unsafe fn insert(this: *mut FreeLists, c: ChunkRef)
    {
        let head = Self::head(this, chunk::list_index(c.size()));
        let next = (*head.footer()).next;

        (*head.footer()).next = c.link();
        (*c.header()).prev = head.link();
        (*c.footer()).next = next;

        if !next.is_null() {
            (*ChunkRef::from_link(next).header()).prev = c.link();
        }
    }

    /// Unlink a chunk from the list that contains it.
    ///
    /// # Safety
    ///
    /// `c` must be a member of some free list.
    pub unsafe fn unlink(c: ChunkRef)
    {
        let prev = (*c.header()).prev;
        let next = (*c.footer()).next;

        (*c.header()).prev = ptr::null_mut();
        (*c.footer()).next = ptr::null_mut();

        // The back link is never null for a listed chunk;
        // at the front of the list it refers to the dummy head.
        (*ChunkRef::from_link(prev).footer()).next = next;

        if !next.is_null() {
            (*ChunkRef::from_link(next).header()).prev = prev;
        }
    }

    /// First-fit search for a free chunk with at least `size` payload.
    ///
    /// Starts in the size class of `size` and ascends through the larger
    /// classes; within a class the least recently inserted chunks are
    /// visited last.
    ///
    /// # Safety
    ///
    /// `this` must point to initialized free lists in a live arena.
    pub unsafe fn first_fit(this: *mut FreeLists, size: usize) -> Option<ChunkRef>
    {
        for index in chunk::list_index(size) .. N_FREE_LISTS {
            let mut link = (*Self::head(this, index).footer()).next;
            while !link.is_null() {
                let c = ChunkRef::from_link(link);
                if c.size() >= size {
                    return Some(c);
                }
                link = (*c.footer()).next;
            }
        }
        None
    }
}

#[cfg(test)]
impl FreeLists
{
    /// The members of one size class, front to back.
    ///
    /// Asserts that every forward link is mirrored by a back link.
    ///
    /// # Safety
    ///
    /// `this` must point to initialized free lists in a live arena.
    pub(crate) unsafe fn members(this: *mut FreeLists, index: usize) -> Vec<ChunkRef>
    {
        let head = Self::head(this, index);
        let mut out = Vec::new();

        let mut prev = head.link();
        let mut link = (*head.footer()).next;
        while !link.is_null() {
            let c = ChunkRef::from_link(link);
            assert_eq!((*c.header()).prev, prev, "free-list links are not mirrored");
            out.push(c);
            prev = link;
            link = (*c.footer()).next;
        }

        out
    }
}
