//! Debug heap walker
//!
//! Walks the collector's lists and re-derives the invariants the phase
//! machine and the barriers are supposed to preserve: the tri-color
//! invariant, registry uniqueness, gray-list/color agreement, soft-ring
//! integrity and the managed-byte ledger. The walker mutates nothing; mark
//! operations run in inspection mode, so it sees exactly the edges the
//! collector would.
//!
//! Intended for tests and debug builds; it walks the whole heap.

use core::ptr::NonNull;

use hashbrown::HashSet;

use crate::collector::Gc;
use crate::flags::ObjectFlags;
use crate::gc_header::GcHeader;
use crate::marker::Marker;

/// Aggregate counts from a successful walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    /// Objects in the registry (sentinel excluded).
    pub objects: usize,
    /// Objects swept out but not yet destroyed.
    pub pending_destroy: usize,
    /// Managed bytes accounted for, headers included.
    pub managed_bytes: usize,
    pub black: usize,
    pub gray: usize,
    pub white: usize,
}

/// A broken heap invariant.
#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("black object references a collection candidate")]
    BlackReferencesCandidate,
    #[error("object appears in the registry more than once")]
    DuplicateRegistryNode,
    #[error("released object still in the registry")]
    ReleasedInRegistry,
    #[error("gray list does not agree with object colors")]
    GrayListMismatch,
    #[error("soft-root ring member not flagged or not registered")]
    SoftRingMismatch,
    #[error("managed byte ledger does not match live headers: ledger {ledger}, walked {walked}")]
    ByteLedgerMismatch { ledger: usize, walked: usize },
    #[error("live object count does not match the registry: counted {counted}, recorded {recorded}")]
    ObjectCountMismatch { counted: usize, recorded: usize },
}

/// Validate the heap. Cheap enough for tests after every mutation, far too
/// slow for the game loop.
pub fn validate(gc: &Gc) -> Result<WalkStats, InvariantViolation> {
    let mut stats = WalkStats::default();
    let mut seen: HashSet<*mut GcHeader> = HashSet::new();

    // Registry: uniqueness, no released nodes, color counts, byte tally.
    for header in gc.roots.iter() {
        let h = header.as_ptr();
        if !seen.insert(h) {
            return Err(InvariantViolation::DuplicateRegistryNode);
        }
        let flags = unsafe { (*h).flags };
        if flags.contains(ObjectFlags::RELEASED) {
            return Err(InvariantViolation::ReleasedInRegistry);
        }
        stats.objects += 1;
        stats.managed_bytes += unsafe { (*h).total_size() };
        if flags.is_black() {
            stats.black += 1;
        } else if flags.is_gray() {
            stats.gray += 1;
        } else {
            stats.white += 1;
        }
    }

    // Objects awaiting destruction still own their bytes.
    let mut kill = gc.kill;
    while let Some(header) = NonNull::new(kill) {
        let h = header.as_ptr();
        stats.pending_destroy += 1;
        stats.managed_bytes += unsafe { (*h).total_size() };
        kill = unsafe { (*h).next };
    }

    // Tri-color invariant: no black object references an object still
    // carrying the condemned white. Condemned objects are exempt — their
    // slots are nulled lazily by the read barrier and the mark primitive.
    let condemned = gc.current_white;
    for header in gc.roots.iter() {
        let h = header.as_ptr();
        let flags = unsafe { (*h).flags };
        if !flags.is_black() {
            continue;
        }
        let mut broken = false;
        let mut report = |child: NonNull<GcHeader>| {
            let child_flags = unsafe { (*child.as_ptr()).flags };
            if child_flags.has_white(condemned) && !child_flags.contains(ObjectFlags::EUTHANIZE) {
                broken = true;
            }
        };
        let mut marker = Marker::inspector(&mut report);
        unsafe {
            let vtable = (*h).vtable;
            (vtable.mark)((*h).object_ptr(), &mut marker);
        }
        if broken {
            return Err(InvariantViolation::BlackReferencesCandidate);
        }
    }

    // Gray list agrees with the color encoding. The registry sentinel is
    // marked like any root, so it may sit on the list; it is not a counted
    // object.
    let mut listed_gray = 0;
    for header in gc.gray.iter() {
        let flags = unsafe { (*header.as_ptr()).flags };
        if !flags.is_gray() || flags.contains(ObjectFlags::RELEASED) {
            return Err(InvariantViolation::GrayListMismatch);
        }
        if flags.contains(ObjectFlags::SENTINEL) {
            continue;
        }
        listed_gray += 1;
    }
    if listed_gray != stats.gray {
        return Err(InvariantViolation::GrayListMismatch);
    }

    // Every ring member is flagged and registered.
    for pinned in gc.soft.iter() {
        let flags = unsafe { (*pinned.as_ptr()).flags };
        if !flags.contains(ObjectFlags::SOFT_ROOT) || !seen.contains(&pinned.as_ptr()) {
            return Err(InvariantViolation::SoftRingMismatch);
        }
    }

    if stats.managed_bytes != gc.accountant.managed_bytes {
        return Err(InvariantViolation::ByteLedgerMismatch {
            ledger: gc.accountant.managed_bytes,
            walked: stats.managed_bytes,
        });
    }
    let counted = stats.objects + stats.pending_destroy;
    if counted != gc.num_objects {
        return Err(InvariantViolation::ObjectCountMismatch {
            counted,
            recorded: gc.num_objects,
        });
    }

    Ok(stats)
}
