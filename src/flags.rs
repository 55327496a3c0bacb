//! Object flag bitset
//!
//! Every managed object carries a flag word combining its mark color with a
//! handful of orthogonal attributes. The two whites swap roles each
//! collection cycle; gray is not a bit but the absence of any color bit
//! while the object sits on the gray list.

use bitflags::bitflags;

bitflags! {
    /// Flags stored in every [`GcHeader`](crate::GcHeader).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// Object is white (type 0)
        const WHITE0 = 1 << 0;
        /// Object is white (type 1)
        const WHITE1 = 1 << 1;
        /// Object is black: scanned this cycle
        const BLACK = 1 << 2;
        /// Object is fixed and must never be collected
        const FIXED = 1 << 3;
        /// Object is soft-rooted: pinned by the application
        const SOFT_ROOT = 1 << 4;
        /// Object wants to die: read barriers null references to it and the
        /// next sweep collects it
        const EUTHANIZE = 1 << 5;
        /// The collector is currently tearing this object down
        const CLEANUP = 1 << 6;
        /// Object is being freed outside the collector and that is okay, so
        /// don't log a warning
        const YES_REALLY_DELETE = 1 << 7;
        /// Object serves as the sentinel of an intrusive list
        const SENTINEL = 1 << 8;
        /// Object should not be archived by the external serializer
        const TRANSIENT = 1 << 9;
        /// Object was released from the collector and must be ignored by
        /// every collector phase
        const RELEASED = 1 << 10;

        /// Both white bits
        const WHITE_MASK = Self::WHITE0.bits() | Self::WHITE1.bits();
        /// All color bits
        const COLOR_MASK = Self::WHITE_MASK.bits() | Self::BLACK.bits();
    }
}

impl ObjectFlags {
    /// Is either white bit set?
    #[inline]
    pub fn is_white(self) -> bool {
        self.intersects(ObjectFlags::WHITE_MASK)
    }

    /// Is the black bit set?
    #[inline]
    pub fn is_black(self) -> bool {
        self.contains(ObjectFlags::BLACK)
    }

    /// Gray is the absence of any color bit.
    #[inline]
    pub fn is_gray(self) -> bool {
        !self.intersects(ObjectFlags::COLOR_MASK)
    }

    /// Does this flag word carry exactly the given white?
    #[inline]
    pub fn has_white(self, white: ObjectFlags) -> bool {
        self.intersection(ObjectFlags::WHITE_MASK) == white
    }

    /// The complement white of `white` within the white mask.
    #[inline]
    pub fn other_white(white: ObjectFlags) -> ObjectFlags {
        white ^ ObjectFlags::WHITE_MASK
    }
}
