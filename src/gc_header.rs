//! GC header for tri-color marking
//!
//! Every managed object has a GcHeader prepended to track GC state.
//! Layout: | GcHeader | ... object data ... |
//!
//! The header threads the object onto the collector's intrusive lists: the
//! registry of every live object (`next`), the gray list during marking
//! (`gray_next`, reused for the kill list once the object has been swept
//! out of the registry), and the soft-root ring when the application pins
//! the object (`soft_next` / `soft_prev`).

use core::alloc::Layout;
use core::ptr;

use crate::flags::ObjectFlags;
use crate::object::ObjectVtable;

/// Header prepended to every managed allocation.
///
/// This header is placed immediately before the object data in memory.
/// Managed pointers point at the object data, so collector code offsets
/// back to find the header.
#[repr(C)]
pub struct GcHeader {
    pub(crate) flags: ObjectFlags,
    /// Size of the object data, not including the header
    pub(crate) alloc_size: usize,
    /// Next object in the registry, or in the kill list after sweep unlinks
    /// the object
    pub(crate) next: *mut GcHeader,
    /// Next object in the gray list while this object is gray
    pub(crate) gray_next: *mut GcHeader,
    /// Soft-root ring links; null while the object is not pinned
    pub(crate) soft_next: *mut GcHeader,
    pub(crate) soft_prev: *mut GcHeader,
    /// Dispatch table of the concrete managed type
    pub(crate) vtable: &'static ObjectVtable,
}

impl GcHeader {
    /// Size of the GC header (kept aligned to 8 bytes)
    pub const SIZE: usize = core::mem::size_of::<GcHeader>();

    /// Alignment of managed allocations. Managed types must not require
    /// more than this.
    pub const ALIGN: usize = 8;

    /// Create a new header for an allocation of `alloc_size` data bytes,
    /// painted with the given birth white.
    #[inline]
    pub(crate) fn new(
        alloc_size: usize,
        vtable: &'static ObjectVtable,
        white: ObjectFlags,
    ) -> GcHeader {
        GcHeader {
            flags: white,
            alloc_size,
            next: ptr::null_mut(),
            gray_next: ptr::null_mut(),
            soft_next: ptr::null_mut(),
            soft_prev: ptr::null_mut(),
            vtable,
        }
    }

    /// Get the flag word.
    #[inline]
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// Get the object data size (not including the header).
    #[inline]
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// Get the total allocation size (header plus padded data).
    #[inline]
    pub fn total_size(&self) -> usize {
        Self::layout_for_size(self.alloc_size).size()
    }

    // ========================================================================
    // Color transitions
    // ========================================================================

    #[inline]
    pub(crate) fn is_white(&self) -> bool {
        self.flags.is_white()
    }

    #[inline]
    pub(crate) fn is_black(&self) -> bool {
        self.flags.is_black()
    }

    #[inline]
    pub(crate) fn is_gray(&self) -> bool {
        self.flags.is_gray()
    }

    /// Clear the white bits, turning a white object gray. The caller links
    /// the object onto the gray list.
    #[inline]
    pub(crate) fn white_to_gray(&mut self) {
        self.flags.remove(ObjectFlags::WHITE_MASK);
    }

    /// Turn a gray object black once its references have been scanned.
    #[inline]
    pub(crate) fn gray_to_black(&mut self) {
        self.flags.insert(ObjectFlags::BLACK);
    }

    /// Repaint the object with the given white, dropping any other color.
    #[inline]
    pub(crate) fn make_white(&mut self, white: ObjectFlags) {
        self.flags.remove(ObjectFlags::COLOR_MASK);
        self.flags.insert(white);
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Get a pointer to the object data (immediately after the header).
    #[inline]
    pub(crate) fn object_ptr(&self) -> *mut u8 {
        unsafe { (self as *const GcHeader as *mut u8).add(Self::SIZE) }
    }

    /// Get the GcHeader from an object pointer.
    ///
    /// # Safety
    /// `object_ptr` must point to the data of an allocation made by the
    /// collector, so that a GcHeader sits immediately before it.
    #[inline]
    pub(crate) unsafe fn from_object_ptr<T>(object_ptr: *const T) -> *mut GcHeader {
        (object_ptr as *mut u8).sub(Self::SIZE) as *mut GcHeader
    }

    /// Get the layout for an allocation with `size` data bytes.
    #[inline]
    pub(crate) fn layout_for_size(size: usize) -> Layout {
        let total_size = Self::SIZE + align_up(size, Self::ALIGN);
        Layout::from_size_align(total_size, Self::ALIGN).unwrap()
    }
}

/// Align a value up to the given alignment.
#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
