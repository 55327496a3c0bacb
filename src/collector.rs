//! The collector context
//!
//! `Gc` owns every process-wide piece of collector state: the object
//! registry, the soft-root ring, the gray list, the kill list, the
//! allocation ledger, the marker-callback registry and the phase machine.
//! The engine creates one per process; tests create one per case.
//!
//! Collection is incremental: `step` does a bounded amount of work sized by
//! the allocation volume since the previous step, and the phase machine
//! cycles Pause → Propagate → Sweep → Destroy → Done → Pause. The collector
//! only ever runs inside `check_gc`, `step`, `full_gc` and `final_gc`;
//! barrier calls are synchronous and never suspend.

use alloc::boxed::Box;
use core::ptr::{self, NonNull};

use crate::accountant::Accountant;
use crate::flags::ObjectFlags;
use crate::gc_header::GcHeader;
use crate::gray_queue::GrayList;
use crate::marker::{Marker, MarkerCallback};
use crate::object::{vtable_of, GcObject};
use crate::options::GcOptions;
use crate::pointer::GcPtr;
use crate::registry::{RootList, SoftRootRing};

/// Objects examined per sweep step.
const SWEEP_BATCH: usize = 40;

/// Budget charge per object swept.
const SWEEP_COST: usize = 16;

/// Objects finalized and released per destroy step.
const DESTROY_BATCH: usize = 32;

/// Collector phase. A full cycle runs Pause → Propagate → Sweep → Destroy →
/// Done and back to Pause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcPhase {
    /// Idle between cycles. The next step marks roots and starts a cycle.
    Pause,
    /// Draining the gray list, blackening as it goes.
    Propagate,
    /// Walking the registry, reclaiming unmarked objects onto the kill
    /// list.
    Sweep,
    /// Finalizing and releasing the objects the sweep condemned.
    Destroy,
    /// Cycle bookkeeping before returning to Pause.
    Done,
}

impl Default for GcPhase {
    fn default() -> Self {
        GcPhase::Pause
    }
}

/// Result type for managed allocations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Managed allocation failure.
#[derive(Debug, thiserror::Error)]
#[error("managed allocation failed")]
pub struct AllocError;

/// The collector context.
pub struct Gc {
    pub(crate) roots: RootList,
    pub(crate) soft: SoftRootRing,
    pub(crate) gray: GrayList,
    /// Objects swept out of the registry, awaiting finalization. Linked
    /// through `next`, which is free once the object left the registry.
    pub(crate) kill: *mut GcHeader,
    pub(crate) phase: GcPhase,
    /// During Sweep: the link field that points at the next candidate.
    /// Naming a link field rather than a node makes unlinking O(1) and
    /// survives list reshaping between steps.
    pub(crate) sweep_pos: *mut *mut GcHeader,
    /// The white currently marking collection candidates. Its complement
    /// is the white mid-cycle allocations are born with.
    pub(crate) current_white: ObjectFlags,
    pub(crate) accountant: Accountant,
    markers: alloc::vec::Vec<MarkerCallback>,
    pause: u32,
    step_mul: u32,
    /// Set for the duration of the shutdown collection: root marking is
    /// skipped and `FIXED` is not honored.
    final_cycle: bool,
    pub(crate) num_objects: usize,
    bytes_freed_this_cycle: usize,
    objects_freed_this_cycle: usize,
}

impl Gc {
    /// Create a collector with default tunables.
    pub fn new() -> Gc {
        Gc::with_options(GcOptions::default())
    }

    /// Create a collector with the given tunables.
    pub fn with_options(options: GcOptions) -> Gc {
        Gc {
            roots: RootList::new(),
            soft: SoftRootRing::new(),
            gray: GrayList::new(),
            kill: ptr::null_mut(),
            phase: GcPhase::Pause,
            sweep_pos: ptr::null_mut(),
            current_white: ObjectFlags::WHITE0,
            accountant: Accountant::new(options.threshold),
            markers: alloc::vec::Vec::new(),
            pause: options.pause,
            step_mul: options.step_mul,
            final_cycle: false,
            num_objects: 0,
            bytes_freed_this_cycle: 0,
            objects_freed_this_cycle: 0,
        }
    }

    // ========================================================================
    // Allocation and accounting
    // ========================================================================

    /// Allocate a managed object.
    ///
    /// The object is linked into the registry, painted with the birth white
    /// of the current phase (mid-cycle allocations survive the in-flight
    /// cycle), and its bytes are reported to the ledger. May advance the
    /// collector first if the threshold has been crossed.
    ///
    /// Managed types must not require alignment above [`GcHeader::ALIGN`].
    pub fn alloc<T: GcObject>(&mut self, value: T) -> AllocResult<GcPtr<T>> {
        debug_assert!(!self.final_cycle, "allocation during the final collection");
        debug_assert!(core::mem::align_of::<T>() <= GcHeader::ALIGN);

        #[cfg(feature = "gc_stress_test")]
        self.step();
        self.check_gc();

        let layout = GcHeader::layout_for_size(core::mem::size_of::<T>());
        unsafe {
            let raw = alloc::alloc::alloc(layout);
            if raw.is_null() {
                return Err(AllocError);
            }
            let header = raw as *mut GcHeader;
            header.write(GcHeader::new(
                core::mem::size_of::<T>(),
                vtable_of::<T>(),
                self.birth_white(),
            ));
            self.roots.insert(NonNull::new_unchecked(header));

            let object = (*header).object_ptr() as *mut T;
            object.write(value);

            self.accountant.report_managed_alloc(layout.size());
            self.num_objects += 1;
            Ok(GcPtr::from_data(NonNull::new_unchecked(object)))
        }
    }

    /// Report a non-managed allocation that should influence pacing
    /// (strings, buffers, ...).
    #[inline]
    pub fn report_alloc(&mut self, bytes: usize) {
        self.accountant.report_alloc(bytes);
    }

    /// Report a non-managed deallocation.
    #[inline]
    pub fn report_dealloc(&mut self, bytes: usize) {
        self.accountant.report_dealloc(bytes);
    }

    /// Report a non-managed reallocation.
    #[inline]
    pub fn report_realloc(&mut self, old: usize, new: usize) {
        self.accountant.report_realloc(old, new);
    }

    /// Current live bytes, managed and external together.
    #[inline]
    pub fn alloc_bytes(&self) -> usize {
        self.accountant.alloc_bytes
    }

    /// Number of live managed objects.
    #[inline]
    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    /// Live bytes at which the next collection step triggers.
    #[inline]
    pub fn threshold(&self) -> usize {
        self.accountant.threshold
    }

    #[inline]
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    /// Percentage growth of the live set before the next cycle.
    pub fn set_pause(&mut self, pause: u32) {
        self.pause = pause;
    }

    /// Collector work per byte allocated, as a percentage.
    pub fn set_step_mul(&mut self, step_mul: u32) {
        self.step_mul = step_mul;
    }

    // ========================================================================
    // Roots
    // ========================================================================

    /// Register a marker callback enumerating roots the collector cannot
    /// see. Callbacks run in registration order on every root-marking pass;
    /// registration is append-only.
    pub fn add_marker<F>(&mut self, callback: F)
    where
        F: Fn(&mut Marker<'_>) + 'static,
    {
        self.markers.push(Box::new(callback));
    }

    /// Pin an object: it is treated as unconditionally reachable until
    /// unpinned.
    pub fn add_soft_root<T>(&mut self, ptr: GcPtr<T>) {
        self.soft.pin(ptr.header());
    }

    /// Unpin an object.
    pub fn del_soft_root<T>(&mut self, ptr: GcPtr<T>) {
        self.soft.unpin(ptr.header());
    }

    // ========================================================================
    // Object lifecycle
    // ========================================================================

    /// The application's kill request: from now on read barriers return
    /// null for this object, and the next sweep collects it.
    pub fn condemn<T>(&mut self, ptr: GcPtr<T>) {
        unsafe {
            (*ptr.header().as_ptr()).flags.insert(ObjectFlags::EUTHANIZE);
        }
    }

    /// Mark a direct free of this object as intentional, suppressing the
    /// warning [`Gc::free_now`] would otherwise log.
    pub fn allow_direct_free<T>(&mut self, ptr: GcPtr<T>) {
        unsafe {
            (*ptr.header().as_ptr())
                .flags
                .insert(ObjectFlags::YES_REALLY_DELETE);
        }
    }

    /// Free a managed object immediately, outside the normal sweep path.
    ///
    /// Logs a warning unless the free was announced with
    /// [`Gc::allow_direct_free`]. Objects the collector is already tearing
    /// down are left alone.
    pub fn free_now<T>(&mut self, ptr: GcPtr<T>) {
        unsafe {
            let header = ptr.header();
            let h = header.as_ptr();
            let flags = (*h).flags;
            let type_name = ((*h).vtable.type_name)();
            if flags.contains(ObjectFlags::RELEASED) {
                return;
            }
            if flags.contains(ObjectFlags::CLEANUP) {
                tracing::warn!(
                    type_name,
                    "direct free of an object the collector is destroying; ignored"
                );
                return;
            }
            if !flags.contains(ObjectFlags::YES_REALLY_DELETE) {
                tracing::warn!(type_name, "managed object freed outside the collector");
            }
            if flags.contains(ObjectFlags::SOFT_ROOT) {
                self.soft.unpin(header);
            }
            if (*h).is_gray() {
                self.gray.unlink(header);
            }
            if self.roots.unlink(header, &mut self.sweep_pos) {
                (*h).flags.insert(ObjectFlags::CLEANUP);
                self.destroy_object(header);
            }
        }
    }

    /// Mark an object as exempt from collection (class metadata and the
    /// like). Only the shutdown collection reclaims fixed objects.
    pub fn set_fixed<T>(&mut self, ptr: GcPtr<T>, fixed: bool) {
        unsafe {
            let flags = &mut (*ptr.header().as_ptr()).flags;
            flags.set(ObjectFlags::FIXED, fixed);
        }
    }

    /// Mark an object as not-to-be-archived for the external serializer.
    /// The collector itself ignores this flag.
    pub fn set_transient<T>(&mut self, ptr: GcPtr<T>, transient: bool) {
        unsafe {
            let flags = &mut (*ptr.header().as_ptr()).flags;
            flags.set(ObjectFlags::TRANSIENT, transient);
        }
    }

    /// Read an object's flag word.
    pub fn flags_of<T>(&self, ptr: GcPtr<T>) -> ObjectFlags {
        ptr.flags()
    }

    // ========================================================================
    // Write barriers
    // ========================================================================

    /// Write barrier for a managed pointer field inside a managed object.
    ///
    /// Call unconditionally on every store; the barrier short-circuits
    /// itself when no action is needed. While the gray list is being
    /// drained the barrier pushes the pointed-to object forward onto it;
    /// once sweeping has begun that would leak, so the pointing object is
    /// repainted white instead and gets re-examined next cycle.
    pub fn write_barrier<T, U>(&mut self, pointing: GcPtr<T>, pointed: GcPtr<U>) {
        unsafe {
            let src = pointing.header().as_ptr();
            let dst = pointed.header().as_ptr();
            if (*src).flags.contains(ObjectFlags::CLEANUP)
                || (*dst).flags.intersects(
                    ObjectFlags::EUTHANIZE | ObjectFlags::CLEANUP | ObjectFlags::RELEASED,
                )
            {
                return;
            }
            if !((*src).is_black() && (*dst).is_white()) {
                return;
            }
            if self.phase == GcPhase::Propagate {
                self.gray.push(pointed.header());
            } else {
                (*src).make_white(self.birth_white());
            }
        }
    }

    /// Write barrier for a store whose location is not inside a managed
    /// object (a global, a container cell, a stack slot reached through a
    /// marker callback): treat it as a black root now pointing at
    /// `pointed`.
    pub fn write_barrier_global<T>(&mut self, pointed: GcPtr<T>) {
        if self.phase != GcPhase::Propagate {
            return;
        }
        let dst_flags = pointed.flags();
        if dst_flags.is_white()
            && !dst_flags.intersects(ObjectFlags::EUTHANIZE | ObjectFlags::RELEASED)
        {
            self.gray.push(pointed.header());
        }
    }

    // ========================================================================
    // Collection driving
    // ========================================================================

    /// Step the collector if allocation has crossed the threshold.
    pub fn check_gc(&mut self) {
        if self.accountant.over_threshold() {
            self.step();
        }
    }

    /// Force the next allocation check to start collecting.
    pub fn start_collection(&mut self) {
        self.accountant.threshold = self.accountant.alloc_bytes;
    }

    /// Perform one bounded unit of collector work.
    ///
    /// The budget scales with the bytes allocated since the previous step;
    /// marking charges per object scanned (by size), sweeping and
    /// destruction per object visited.
    pub fn step(&mut self) {
        let mut budget = self.accountant.take_step_budget(self.step_mul);
        loop {
            let cost = self.single_step();
            if self.phase == GcPhase::Pause {
                // Completed a cycle; the threshold was re-armed for the
                // next one.
                return;
            }
            if cost >= budget {
                break;
            }
            budget -= cost;
        }
        self.accountant.rearm_mid_cycle();
    }

    /// Run the state machine until a cycle completes: the in-flight cycle
    /// if one is underway, otherwise a fresh cycle from Pause back to
    /// Pause. Objects allocated while the cycle was in flight survive it.
    pub fn full_gc(&mut self) {
        if self.phase == GcPhase::Pause {
            self.single_step();
        }
        while self.phase != GcPhase::Pause {
            self.single_step();
        }
    }

    /// The shutdown collection: root marking is skipped and `FIXED` is not
    /// honored, so every object still registered is finalized and
    /// released. Allocating during it is forbidden.
    pub fn final_gc(&mut self) {
        while self.phase != GcPhase::Pause {
            self.single_step();
        }
        self.final_cycle = true;
        loop {
            self.single_step();
            if self.phase == GcPhase::Pause {
                break;
            }
        }
        self.final_cycle = false;
    }

    // ========================================================================
    // The state machine
    // ========================================================================

    pub(crate) fn single_step(&mut self) -> usize {
        match self.phase {
            GcPhase::Pause => {
                self.mark_roots();
                0
            }
            GcPhase::Propagate => match self.gray.pop() {
                Some(header) => self.propagate_mark(header),
                None => {
                    self.atomic();
                    0
                }
            },
            GcPhase::Sweep => self.sweep_step(),
            GcPhase::Destroy => self.destroy_step(),
            GcPhase::Done => {
                self.finish_cycle();
                0
            }
        }
    }

    /// The white newly allocated (or barrier-repainted) objects receive
    /// right now: the survivor white while a cycle is in flight, the next
    /// cycle's candidate white otherwise.
    #[inline]
    fn birth_white(&self) -> ObjectFlags {
        match self.phase {
            GcPhase::Propagate | GcPhase::Sweep | GcPhase::Destroy => {
                ObjectFlags::other_white(self.current_white)
            }
            GcPhase::Pause | GcPhase::Done => self.current_white,
        }
    }

    /// Atomic root marking: every marker callback in registration order,
    /// every pinned (and not condemned) object, and the registry sentinel.
    fn mark_root_set(&mut self) {
        let Gc {
            gray,
            markers,
            soft,
            roots,
            ..
        } = self;
        let mut marker = Marker::new(gray);
        for callback in markers.iter() {
            callback(&mut marker);
        }
        for pinned in soft.iter() {
            marker.mark_header(pinned);
        }
        marker.mark_header(roots.sentinel());
    }

    fn mark_roots(&mut self) {
        debug_assert!(self.gray.is_empty());
        if !self.final_cycle {
            self.mark_root_set();
        }
        self.phase = GcPhase::Propagate;
    }

    /// Blacken one gray object and scan its outgoing references. Condemned
    /// objects are not scanned; whatever they reference dies with them
    /// unless reachable some other way.
    fn propagate_mark(&mut self, header: NonNull<GcHeader>) -> usize {
        unsafe {
            let h = header.as_ptr();
            debug_assert!((*h).is_gray());
            (*h).gray_to_black();
            let cost = GcHeader::SIZE + (*h).alloc_size;
            if !(*h).flags.contains(ObjectFlags::EUTHANIZE) {
                let vtable = (*h).vtable;
                let object = (*h).object_ptr();
                let mut marker = Marker::new(&mut self.gray);
                (vtable.mark)(object, &mut marker);
            }
            cost
        }
    }

    /// The gray list has drained: re-mark the roots to catch stores the
    /// forward barrier could not see (objects greyed and blackened before
    /// the store), drain again in one go, then arm the sweep cursor.
    fn atomic(&mut self) {
        if !self.final_cycle {
            self.mark_root_set();
            while let Some(header) = self.gray.pop() {
                self.propagate_mark(header);
            }
        }
        self.sweep_pos = self.roots.first_link();
        self.phase = GcPhase::Sweep;
    }

    /// Walk up to `SWEEP_BATCH` registry nodes from the saved cursor.
    /// Candidates still carrying the condemned white are unlinked onto the
    /// kill list; every survivor is repainted with the survivor white so
    /// the flip at the end of the cycle turns it into the next cycle's
    /// candidate.
    fn sweep_step(&mut self) -> usize {
        let condemned = self.current_white;
        let survivor = ObjectFlags::other_white(condemned);
        let mut visited = 0;
        unsafe {
            while visited < SWEEP_BATCH {
                let link = self.sweep_pos;
                let cur = *link;
                if cur.is_null() {
                    self.sweep_pos = ptr::null_mut();
                    self.phase = GcPhase::Destroy;
                    break;
                }
                visited += 1;
                let flags = (*cur).flags;
                let dead = flags.has_white(condemned)
                    && (!flags.contains(ObjectFlags::FIXED) || self.final_cycle);
                if dead {
                    *link = (*cur).next;
                    if flags.contains(ObjectFlags::SOFT_ROOT) {
                        self.soft.unpin(NonNull::new_unchecked(cur));
                    }
                    (*cur)
                        .flags
                        .insert(ObjectFlags::EUTHANIZE | ObjectFlags::CLEANUP);
                    (*cur).next = self.kill;
                    self.kill = cur;
                } else {
                    (*cur).make_white(survivor);
                    self.sweep_pos = ptr::addr_of_mut!((*cur).next);
                }
            }
        }
        visited * SWEEP_COST
    }

    /// Finalize and release up to `DESTROY_BATCH` swept objects. Once the
    /// kill list drains the whites flip: last cycle's survivor white
    /// becomes the next cycle's condemned candidate.
    fn destroy_step(&mut self) -> usize {
        let mut cost = 0;
        let mut count = 0;
        while count < DESTROY_BATCH {
            let Some(header) = NonNull::new(self.kill) else {
                self.current_white = ObjectFlags::other_white(self.current_white);
                unsafe {
                    (*self.roots.sentinel().as_ptr()).make_white(self.current_white);
                }
                self.phase = GcPhase::Done;
                break;
            };
            unsafe {
                self.kill = (*header.as_ptr()).next;
                cost += self.destroy_object(header);
            }
            count += 1;
        }
        cost
    }

    /// Finalize, drop and release one object. The released flag is set
    /// before the memory goes away so re-entrant collector entry points
    /// ignore the object.
    unsafe fn destroy_object(&mut self, header: NonNull<GcHeader>) -> usize {
        let h = header.as_ptr();
        let vtable = (*h).vtable;
        let object = (*h).object_ptr();
        (vtable.finalize)(object);
        (vtable.drop_in_place)(object);
        (*h).flags.remove(ObjectFlags::CLEANUP);
        (*h).flags.insert(ObjectFlags::RELEASED);

        let layout = GcHeader::layout_for_size((*h).alloc_size);
        self.accountant.report_managed_dealloc(layout.size());
        self.num_objects -= 1;
        self.bytes_freed_this_cycle += layout.size();
        self.objects_freed_this_cycle += 1;
        alloc::alloc::dealloc(h as *mut u8, layout);
        layout.size()
    }

    fn finish_cycle(&mut self) {
        self.accountant.arm_next_cycle(self.pause);
        tracing::debug!(
            freed_objects = self.objects_freed_this_cycle,
            freed_bytes = self.bytes_freed_this_cycle,
            live_objects = self.num_objects,
            live_bytes = self.accountant.alloc_bytes,
            threshold = self.accountant.threshold,
            "collection cycle complete"
        );
        self.bytes_freed_this_cycle = 0;
        self.objects_freed_this_cycle = 0;
        self.phase = GcPhase::Pause;
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Gc {
    /// Tear the heap down: every remaining object is finalized and
    /// released, fixed and pinned ones included.
    fn drop(&mut self) {
        self.final_gc();
    }
}
