//! Marking visitor
//!
//! A `Marker` is handed to every mark operation and marker callback. It
//! carries the primitive the whole collector is built on: look at a managed
//! pointer slot, null it if the referent is condemned, and otherwise grey
//! the referent if it has not been discovered yet.
//!
//! The walker reuses the same visitor in an inspection mode that reports
//! outgoing edges without mutating anything, so invariant checks see
//! exactly the edges the collector would.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::flags::ObjectFlags;
use crate::gc_header::GcHeader;
use crate::gray_queue::GrayList;
use crate::pointer::{GcPtr, ObjPtr};

/// A registered root-enumeration callback.
///
/// External systems register one at startup for roots the collector cannot
/// see (globals, stacks, handler tables) and call `mark` / `mark_array` on
/// the managed pointers they own. Callbacks run in registration order on
/// every root-marking pass; registration is append-only.
pub type MarkerCallback = Box<dyn Fn(&mut Marker<'_>)>;

enum MarkSink<'a> {
    /// Normal collection: grey undiscovered objects, null condemned slots.
    Gray(&'a mut GrayList),
    /// Walker inspection: report every outgoing edge, mutate nothing.
    Inspect(&'a mut dyn FnMut(NonNull<GcHeader>)),
}

/// Visitor passed to mark operations and marker callbacks.
pub struct Marker<'a> {
    sink: MarkSink<'a>,
}

impl<'a> Marker<'a> {
    pub(crate) fn new(gray: &'a mut GrayList) -> Marker<'a> {
        Marker {
            sink: MarkSink::Gray(gray),
        }
    }

    pub(crate) fn inspector(report: &'a mut dyn FnMut(NonNull<GcHeader>)) -> Marker<'a> {
        Marker {
            sink: MarkSink::Inspect(report),
        }
    }

    /// Mark through a managed pointer slot.
    ///
    /// Null slots are ignored. A slot whose referent is condemned is nulled
    /// (the read barrier applied at mark time). Otherwise the referent is
    /// greyed if it is still white and has not been released.
    pub fn mark<T>(&mut self, slot: &mut ObjPtr<T>) {
        let Some(ptr) = slot.force_get() else {
            return;
        };
        let header = ptr.header();
        match &mut self.sink {
            MarkSink::Inspect(report) => report(header),
            MarkSink::Gray(gray) => unsafe {
                let flags = (*header.as_ptr()).flags;
                if flags.contains(ObjectFlags::EUTHANIZE) {
                    slot.clear();
                } else if flags.is_white() && !flags.contains(ObjectFlags::RELEASED) {
                    gray.push(header);
                }
            },
        }
    }

    /// Mark every slot of an array.
    pub fn mark_array<T>(&mut self, slots: &mut [ObjPtr<T>]) {
        for slot in slots {
            self.mark(slot);
        }
    }

    /// Mark a managed pointer that does not live in a nullable slot
    /// (a handle held by value, a list sentinel). There is no slot to null,
    /// so condemned referents are simply skipped.
    pub fn mark_ptr<T>(&mut self, ptr: GcPtr<T>) {
        self.mark_header(ptr.header());
    }

    pub(crate) fn mark_header(&mut self, header: NonNull<GcHeader>) {
        match &mut self.sink {
            MarkSink::Inspect(report) => report(header),
            MarkSink::Gray(gray) => unsafe {
                let flags = (*header.as_ptr()).flags;
                if !flags.contains(ObjectFlags::EUTHANIZE)
                    && !flags.contains(ObjectFlags::RELEASED)
                    && flags.is_white()
                {
                    gray.push(header);
                }
            },
        }
    }
}
