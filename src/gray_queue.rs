//! Gray list for tri-color marking
//!
//! The frontier of discovered-but-unscanned objects, threaded through the
//! `gray_next` field of each header so that pushing and popping never
//! allocate. Push order is LIFO; the order in which gray objects are
//! scanned is not observable.

use core::ptr::{self, NonNull};

use crate::gc_header::GcHeader;

/// Intrusive stack of gray objects waiting to be scanned.
pub(crate) struct GrayList {
    head: *mut GcHeader,
}

impl GrayList {
    pub(crate) const fn new() -> GrayList {
        GrayList {
            head: ptr::null_mut(),
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Paint a white object gray and push it.
    ///
    /// The caller has already checked the object is white and not released,
    /// so the object cannot be on the list twice.
    #[inline]
    pub(crate) fn push(&mut self, header: NonNull<GcHeader>) {
        unsafe {
            let h = header.as_ptr();
            debug_assert!((*h).is_white());
            (*h).white_to_gray();
            (*h).gray_next = self.head;
            self.head = h;
        }
    }

    /// Pop the most recently pushed gray object.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<NonNull<GcHeader>> {
        let head = NonNull::new(self.head)?;
        unsafe {
            self.head = (*head.as_ptr()).gray_next;
            (*head.as_ptr()).gray_next = ptr::null_mut();
        }
        Some(head)
    }

    /// Remove an object from anywhere in the list, if present. Used by the
    /// direct-free path, which may fire while the object is gray.
    pub(crate) fn unlink(&mut self, header: NonNull<GcHeader>) {
        let target = header.as_ptr();
        unsafe {
            let mut link: *mut *mut GcHeader = &mut self.head;
            while !(*link).is_null() {
                if *link == target {
                    *link = (*target).gray_next;
                    (*target).gray_next = ptr::null_mut();
                    return;
                }
                link = &mut (**link).gray_next;
            }
        }
    }

    /// Number of objects on the list.
    #[inline]
    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while !cur.is_null() {
            n += 1;
            cur = unsafe { (*cur).gray_next };
        }
        n
    }

    /// Iterate the list without unlinking.
    pub(crate) fn iter(&self) -> GrayIter {
        GrayIter { cur: self.head }
    }
}

pub(crate) struct GrayIter {
    cur: *mut GcHeader,
}

impl Iterator for GrayIter {
    type Item = NonNull<GcHeader>;

    fn next(&mut self) -> Option<NonNull<GcHeader>> {
        let cur = NonNull::new(self.cur)?;
        self.cur = unsafe { (*cur.as_ptr()).gray_next };
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ObjectFlags;
    use crate::object::{vtable_of, SentinelNode};

    fn header() -> GcHeader {
        GcHeader::new(0, vtable_of::<SentinelNode>(), ObjectFlags::WHITE0)
    }

    #[test]
    fn push_pop_is_lifo_and_paints_gray() {
        let mut a = header();
        let mut b = header();
        let mut list = GrayList::new();
        assert!(list.is_empty());

        list.push(NonNull::from(&mut a));
        list.push(NonNull::from(&mut b));
        assert!(a.is_gray());
        assert!(b.is_gray());
        assert_eq!(list.len(), 2);

        assert_eq!(list.pop(), Some(NonNull::from(&mut b)));
        assert_eq!(list.pop(), Some(NonNull::from(&mut a)));
        assert_eq!(list.pop(), None);
        assert!(a.gray_next.is_null());
    }

    #[test]
    fn unlink_removes_from_the_middle() {
        let mut a = header();
        let mut b = header();
        let mut c = header();
        let mut list = GrayList::new();
        list.push(NonNull::from(&mut a));
        list.push(NonNull::from(&mut b));
        list.push(NonNull::from(&mut c));

        list.unlink(NonNull::from(&mut b));
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop(), Some(NonNull::from(&mut c)));
        assert_eq!(list.pop(), Some(NonNull::from(&mut a)));
    }
}
