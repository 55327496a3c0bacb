//! Object registry
//!
//! Two intrusive structures: the Root list, a singly-linked list of every
//! live managed object, and the soft-root ring, a doubly-linked ring of
//! objects the application has pinned. Both are headed by a sentinel node
//! of the managed header type, so the lists are never empty and splicing
//! needs no special cases.
//!
//! The sentinels live on the heap, which keeps pointers into the lists
//! (most importantly the sweep cursor, a pointer to a link *field*) valid
//! no matter where the collector context value itself moves.

use core::ptr::{self, NonNull};

use crate::flags::ObjectFlags;
use crate::gc_header::GcHeader;
use crate::object::{vtable_of, SentinelNode};

/// Allocate a bare sentinel header.
fn alloc_sentinel() -> NonNull<GcHeader> {
    let layout = GcHeader::layout_for_size(0);
    unsafe {
        let ptr = alloc::alloc::alloc(layout) as *mut GcHeader;
        let Some(header) = NonNull::new(ptr) else {
            alloc::alloc::handle_alloc_error(layout);
        };
        header.as_ptr().write(GcHeader::new(
            0,
            vtable_of::<SentinelNode>(),
            ObjectFlags::WHITE0,
        ));
        (*header.as_ptr())
            .flags
            .insert(ObjectFlags::SENTINEL | ObjectFlags::FIXED);
        header
    }
}

unsafe fn free_sentinel(header: NonNull<GcHeader>) {
    let layout = GcHeader::layout_for_size(0);
    alloc::alloc::dealloc(header.as_ptr() as *mut u8, layout);
}

/// The Root list: every live managed object, newest first, behind a
/// sentinel head.
pub(crate) struct RootList {
    sentinel: NonNull<GcHeader>,
}

impl RootList {
    pub(crate) fn new() -> RootList {
        RootList {
            sentinel: alloc_sentinel(),
        }
    }

    #[inline]
    pub(crate) fn sentinel(&self) -> NonNull<GcHeader> {
        self.sentinel
    }

    /// The link field the sweep cursor starts from.
    #[inline]
    pub(crate) fn first_link(&mut self) -> *mut *mut GcHeader {
        unsafe { &mut (*self.sentinel.as_ptr()).next }
    }

    /// O(1) insert behind the sentinel. Called for every managed
    /// allocation.
    #[inline]
    pub(crate) fn insert(&mut self, header: NonNull<GcHeader>) {
        unsafe {
            let s = self.sentinel.as_ptr();
            (*header.as_ptr()).next = (*s).next;
            (*s).next = header.as_ptr();
        }
    }

    /// Unlink an object by chasing link fields from the head. If the sweep
    /// cursor currently names the victim's own link field, it is retargeted
    /// at the link that used to point at the victim, so a resumed sweep
    /// continues seamlessly.
    ///
    /// Returns false if the object was not on the list.
    pub(crate) fn unlink(
        &mut self,
        header: NonNull<GcHeader>,
        sweep_pos: &mut *mut *mut GcHeader,
    ) -> bool {
        let target = header.as_ptr();
        unsafe {
            let mut link: *mut *mut GcHeader = self.first_link();
            while !(*link).is_null() {
                if *link == target {
                    if *sweep_pos == ptr::addr_of_mut!((*target).next) {
                        *sweep_pos = link;
                    }
                    *link = (*target).next;
                    (*target).next = ptr::null_mut();
                    return true;
                }
                link = &mut (**link).next;
            }
        }
        false
    }

    /// Iterate the objects on the list (the sentinel excluded).
    pub(crate) fn iter(&self) -> RootIter {
        RootIter {
            cur: unsafe { (*self.sentinel.as_ptr()).next },
        }
    }
}

impl Drop for RootList {
    fn drop(&mut self) {
        unsafe { free_sentinel(self.sentinel) }
    }
}

pub(crate) struct RootIter {
    cur: *mut GcHeader,
}

impl Iterator for RootIter {
    type Item = NonNull<GcHeader>;

    fn next(&mut self) -> Option<NonNull<GcHeader>> {
        let cur = NonNull::new(self.cur)?;
        self.cur = unsafe { (*cur.as_ptr()).next };
        Some(cur)
    }
}

/// The soft-root ring: a doubly-linked ring of pinned objects around a
/// sentinel head. Pin and unpin are O(1).
pub(crate) struct SoftRootRing {
    sentinel: NonNull<GcHeader>,
}

impl SoftRootRing {
    pub(crate) fn new() -> SoftRootRing {
        let sentinel = alloc_sentinel();
        unsafe {
            (*sentinel.as_ptr()).soft_next = sentinel.as_ptr();
            (*sentinel.as_ptr()).soft_prev = sentinel.as_ptr();
        }
        SoftRootRing { sentinel }
    }

    /// Pin an object: link it into the ring right after the sentinel and
    /// flag it. Pinning twice is a no-op.
    pub(crate) fn pin(&mut self, header: NonNull<GcHeader>) {
        unsafe {
            let h = header.as_ptr();
            if (*h).flags.contains(ObjectFlags::SOFT_ROOT) {
                return;
            }
            let s = self.sentinel.as_ptr();
            (*h).soft_next = (*s).soft_next;
            (*h).soft_prev = s;
            (*(*s).soft_next).soft_prev = h;
            (*s).soft_next = h;
            (*h).flags.insert(ObjectFlags::SOFT_ROOT);
        }
    }

    /// Unpin an object. Unpinning an object that is not pinned is a no-op.
    pub(crate) fn unpin(&mut self, header: NonNull<GcHeader>) {
        unsafe {
            let h = header.as_ptr();
            if !(*h).flags.contains(ObjectFlags::SOFT_ROOT) {
                return;
            }
            (*(*h).soft_prev).soft_next = (*h).soft_next;
            (*(*h).soft_next).soft_prev = (*h).soft_prev;
            (*h).soft_next = ptr::null_mut();
            (*h).soft_prev = ptr::null_mut();
            (*h).flags.remove(ObjectFlags::SOFT_ROOT);
        }
    }

    /// Iterate the pinned objects.
    pub(crate) fn iter(&self) -> SoftRootIter {
        SoftRootIter {
            sentinel: self.sentinel.as_ptr(),
            cur: unsafe { (*self.sentinel.as_ptr()).soft_next },
        }
    }
}

impl Drop for SoftRootRing {
    fn drop(&mut self) {
        unsafe { free_sentinel(self.sentinel) }
    }
}

pub(crate) struct SoftRootIter {
    sentinel: *mut GcHeader,
    cur: *mut GcHeader,
}

impl Iterator for SoftRootIter {
    type Item = NonNull<GcHeader>;

    fn next(&mut self) -> Option<NonNull<GcHeader>> {
        if self.cur == self.sentinel {
            return None;
        }
        let cur = NonNull::new(self.cur)?;
        self.cur = unsafe { (*cur.as_ptr()).soft_next };
        Some(cur)
    }
}
