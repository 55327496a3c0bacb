//! Managed pointer types
//!
//! Two pointer types split the work. `GcPtr<T>` is a live, non-null handle
//! to a managed object: the collector hands one out at allocation and the
//! read barrier reconstructs one from a slot; because every managed
//! allocation carries a header right in front of the data, a `GcPtr` can
//! answer the header questions the barriers and the mark primitive ask.
//! `ObjPtr<T>` is the nullable field type managed objects embed for
//! references to other managed objects: every read goes through the read
//! barrier, which yields null once the referent has been condemned. Both
//! are trivially copyable — the host embeds them in objects it assumes are
//! bitwise-movable, so they carry no hidden state, no destructor and no
//! ownership.

use core::ptr::{self, NonNull};

use crate::flags::ObjectFlags;
use crate::gc_header::GcHeader;

/// A live, non-null handle to a managed object.
///
/// Obtained from [`Gc::alloc`](crate::Gc::alloc) or by reading an
/// [`ObjPtr`] slot through the read barrier; there is no way to conjure one
/// from an arbitrary pointer, so a `GcPtr` always sits on top of a
/// collector-made allocation with its [`GcHeader`] in front. Holding one
/// does not keep the object alive — reachable storage must be reported by a
/// mark operation or a marker callback, and a handle kept across a
/// collection without that may dangle.
#[repr(transparent)]
pub struct GcPtr<T> {
    data: NonNull<T>,
}

impl<T> GcPtr<T> {
    /// Wrap a pointer to the data of a collector-made allocation. Callers
    /// guarantee the provenance; everything else this type offers relies
    /// on the header sitting in front of `data`.
    #[inline]
    pub(crate) fn from_data(data: NonNull<T>) -> GcPtr<T> {
        GcPtr { data }
    }

    /// The raw object pointer, for storing into an [`ObjPtr`] slot or
    /// comparing identities.
    #[inline]
    pub fn as_ptr(self) -> *mut T {
        self.data.as_ptr()
    }

    /// The object's header.
    #[inline]
    pub(crate) fn header(self) -> NonNull<GcHeader> {
        unsafe { NonNull::new_unchecked(GcHeader::from_object_ptr(self.data.as_ptr())) }
    }

    /// The object's flag word.
    #[inline]
    pub(crate) fn flags(self) -> ObjectFlags {
        unsafe { (*self.header().as_ptr()).flags }
    }

    /// Has the application condemned this object? The read barrier turns
    /// such handles into null.
    #[inline]
    pub(crate) fn is_condemned(self) -> bool {
        self.flags().contains(ObjectFlags::EUTHANIZE)
    }
}

impl<T> Clone for GcPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcPtr<T> {}

impl<T> PartialEq for GcPtr<T> {
    /// Object identity: same allocation, regardless of collector state.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T> Eq for GcPtr<T> {}

impl<T> core::ops::Deref for GcPtr<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.data.as_ref() }
    }
}

impl<T> core::ops::DerefMut for GcPtr<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.data.as_mut() }
    }
}

impl<T> core::fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("GcPtr").field(&self.data).finish()
    }
}

/// A nullable managed pointer field with read-barrier semantics.
///
/// Reads go through [`ObjPtr::get`] / [`ObjPtr::get_mut`], which yield
/// `None` once the referent has been condemned — managed pointers behave as
/// weak references with respect to objects the application has marked for
/// death, without the collector walking all pointers to them. Equality
/// compares the raw pointers, not the barrier-filtered view, so comparisons
/// keep working while the referent is condemned.
///
/// Storing into an `ObjPtr` embedded in a managed object must be paired
/// with [`Gc::write_barrier`](crate::Gc::write_barrier); storing into one
/// that lives outside any managed object (a global table, a stack slot
/// reached by a marker callback) with
/// [`Gc::write_barrier_global`](crate::Gc::write_barrier_global).
#[repr(transparent)]
pub struct ObjPtr<T> {
    ptr: *mut T,
}

impl<T> ObjPtr<T> {
    /// The null pointer.
    #[inline]
    pub const fn null() -> ObjPtr<T> {
        ObjPtr {
            ptr: ptr::null_mut(),
        }
    }

    /// Wrap a managed pointer.
    #[inline]
    pub fn new(ptr: GcPtr<T>) -> ObjPtr<T> {
        ObjPtr { ptr: ptr.as_ptr() }
    }

    /// Store a managed pointer. The caller invokes the write barrier.
    #[inline]
    pub fn store(&mut self, ptr: GcPtr<T>) {
        self.ptr = ptr.as_ptr();
    }

    /// Null the slot.
    #[inline]
    pub fn clear(&mut self) {
        self.ptr = ptr::null_mut();
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Read through the read barrier: `None` if the slot is null or the
    /// referent has been condemned. The slot itself is left untouched.
    #[inline]
    pub fn get(&self) -> Option<GcPtr<T>> {
        let ptr = GcPtr::from_data(NonNull::new(self.ptr)?);
        if ptr.is_condemned() {
            return None;
        }
        Some(ptr)
    }

    /// Read through the read barrier; additionally nulls the slot when the
    /// referent has been condemned, so later reads are cheap and the dead
    /// reference does not linger.
    #[inline]
    pub fn get_mut(&mut self) -> Option<GcPtr<T>> {
        let ptr = GcPtr::from_data(NonNull::new(self.ptr)?);
        if ptr.is_condemned() {
            self.ptr = ptr::null_mut();
            return None;
        }
        Some(ptr)
    }

    /// Read bypassing the read barrier, for debug output and serialization.
    #[inline]
    pub fn force_get(&self) -> Option<GcPtr<T>> {
        NonNull::new(self.ptr).map(GcPtr::from_data)
    }
}

impl<T> Clone for ObjPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjPtr<T> {}

impl<T> Default for ObjPtr<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<GcPtr<T>> for ObjPtr<T> {
    #[inline]
    fn from(ptr: GcPtr<T>) -> Self {
        ObjPtr::new(ptr)
    }
}

impl<T> From<Option<GcPtr<T>>> for ObjPtr<T> {
    #[inline]
    fn from(ptr: Option<GcPtr<T>>) -> Self {
        match ptr {
            Some(p) => ObjPtr::new(p),
            None => ObjPtr::null(),
        }
    }
}

impl<T> PartialEq for ObjPtr<T> {
    /// Raw comparison, unaffected by condemnation.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for ObjPtr<T> {}

impl<T> PartialEq<GcPtr<T>> for ObjPtr<T> {
    #[inline]
    fn eq(&self, other: &GcPtr<T>) -> bool {
        self.ptr == other.as_ptr()
    }
}

impl<T> core::fmt::Debug for ObjPtr<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.ptr.is_null() {
            write!(f, "ObjPtr(null)")
        } else {
            write!(f, "ObjPtr({:p})", self.ptr)
        }
    }
}
