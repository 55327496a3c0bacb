//! Collector tests
//!
//! Scenario tests for the collection cycle, the barriers and the pinning
//! paths: the situations that would leak memory, free live objects or
//! corrupt the registry if the phase machine mishandled them.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::gc_header::GcHeader;
use crate::walker::{validate, InvariantViolation};
use crate::{Gc, GcObject, GcOptionsBuilder, GcPhase, GcPtr, Marker, ObjPtr};

/// A managed test object holding one outgoing reference.
struct Node {
    value: u64,
    next: ObjPtr<Node>,
    finalized: Option<Rc<Cell<u32>>>,
}

impl GcObject for Node {
    fn mark(&mut self, marker: &mut Marker<'_>) {
        marker.mark(&mut self.next);
    }

    fn finalize(&mut self) {
        if let Some(counter) = &self.finalized {
            counter.set(counter.get() + 1);
        }
    }
}

/// Heap bytes one Node occupies, header included.
fn node_size() -> usize {
    GcHeader::layout_for_size(core::mem::size_of::<Node>()).size()
}

fn node(gc: &mut Gc, value: u64) -> GcPtr<Node> {
    gc.alloc(Node {
        value,
        next: ObjPtr::null(),
        finalized: None,
    })
    .unwrap()
}

fn counted_node(gc: &mut Gc, value: u64, counter: &Rc<Cell<u32>>) -> GcPtr<Node> {
    gc.alloc(Node {
        value,
        next: ObjPtr::null(),
        finalized: Some(counter.clone()),
    })
    .unwrap()
}

/// Store `to` into `from.next` with the write barrier applied, the way
/// engine code mutates managed pointer fields.
fn link(gc: &mut Gc, from: GcPtr<Node>, to: GcPtr<Node>) {
    let mut from = from;
    from.next.store(to);
    gc.write_barrier(from, to);
}

type RootTable = Rc<RefCell<Vec<ObjPtr<Node>>>>;

/// Register a marker callback enumerating a shared root table, standing in
/// for the engine's global tables.
fn install_roots(gc: &mut Gc) -> RootTable {
    let table: RootTable = Rc::new(RefCell::new(Vec::new()));
    let roots = table.clone();
    gc.add_marker(move |marker| {
        for slot in roots.borrow_mut().iter_mut() {
            marker.mark(slot);
        }
    });
    table
}

// ============================================================================
// Basic allocation and collection
// ============================================================================

#[test]
fn alloc_registers_and_counts() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 42);
    assert_eq!(a.value, 42);
    assert_eq!(gc.num_objects(), 1);
    assert_eq!(gc.alloc_bytes(), node_size());
    validate(&gc).unwrap();
}

#[test]
fn unreachable_objects_are_collected() {
    let mut gc = Gc::new();
    for i in 0..10 {
        node(&mut gc, i);
    }
    assert_eq!(gc.num_objects(), 10);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
    assert_eq!(gc.alloc_bytes(), 0);
    validate(&gc).unwrap();
}

#[test]
fn marker_roots_keep_objects_alive() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);

    let a = node(&mut gc, 1);
    roots.borrow_mut().push(ObjPtr::new(a));
    for i in 0..10 {
        node(&mut gc, i);
    }

    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
    assert_eq!(a.value, 1);

    roots.borrow_mut().clear();
    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

#[test]
fn simple_collection_with_soft_root() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    let _c = node(&mut gc, 3);
    link(&mut gc, a, b);
    gc.add_soft_root(a);

    let before = gc.alloc_bytes();
    gc.full_gc();

    assert_eq!(gc.num_objects(), 2);
    assert_eq!(gc.alloc_bytes(), before - node_size());
    assert_eq!(a.value, 1);
    let mut a = a;
    assert_eq!(a.next.get().unwrap().value, 2);
    validate(&gc).unwrap();
}

#[test]
fn reference_chain_is_fully_traced() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);

    let head = node(&mut gc, 0);
    let mut prev = head;
    for i in 1..100 {
        let next = node(&mut gc, i);
        link(&mut gc, prev, next);
        prev = next;
    }
    roots.borrow_mut().push(ObjPtr::new(head));

    gc.full_gc();
    assert_eq!(gc.num_objects(), 100);

    roots.borrow_mut().clear();
    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

// ============================================================================
// Cycles
// ============================================================================

#[test]
fn cycle_is_collected() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    link(&mut gc, a, b);
    link(&mut gc, b, a);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

#[test]
fn rooted_cycle_survives() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    let c = node(&mut gc, 3);
    link(&mut gc, a, b);
    link(&mut gc, b, c);
    link(&mut gc, c, a);
    roots.borrow_mut().push(ObjPtr::new(a));

    gc.full_gc();
    assert_eq!(gc.num_objects(), 3);
    validate(&gc).unwrap();
}

#[test]
fn condemned_cycle_is_collected_and_reads_null() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    link(&mut gc, a, b);
    link(&mut gc, b, a);
    gc.condemn(a);
    gc.condemn(b);

    let mut a = a;
    assert!(a.next.get().is_none());

    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

// ============================================================================
// Condemnation and the read barrier
// ============================================================================

#[test]
fn condemned_referent_reads_null_and_slot_clears() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    link(&mut gc, a, b);
    gc.add_soft_root(a);

    gc.condemn(b);
    let mut a = a;

    // The shared read filters but leaves the slot alone.
    assert!(a.next.get().is_none());
    assert!(a.next.get().is_none());
    assert!(!a.next.is_null());
    assert!(a.next.force_get().is_some());

    // Comparisons keep using the raw pointer.
    assert_eq!(a.next, b);

    // The mutable read also clears the slot.
    assert!(a.next.get_mut().is_none());
    assert!(a.next.is_null());

    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
    validate(&gc).unwrap();
}

#[test]
fn condemned_object_is_collected_even_while_referenced() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    link(&mut gc, a, b);
    gc.add_soft_root(a);
    gc.condemn(b);

    // Nothing reads the slot before the cycle; the mark primitive nulls it.
    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
    let mut a = a;
    assert!(a.next.is_null());
}

#[test]
fn condemned_finalizer_runs_once() {
    let mut gc = Gc::new();
    let counter = Rc::new(Cell::new(0));
    let a = counted_node(&mut gc, 1, &counter);
    gc.condemn(a);

    gc.full_gc();
    assert_eq!(counter.get(), 1);
    gc.full_gc();
    assert_eq!(counter.get(), 1);
}

// ============================================================================
// Soft roots
// ============================================================================

#[test]
fn soft_root_survives_repeated_collections() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 7);
    gc.add_soft_root(a);

    for _ in 0..10 {
        gc.full_gc();
        assert_eq!(gc.num_objects(), 1);
    }

    gc.del_soft_root(a);
    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

#[test]
fn soft_root_pins_its_reachable_graph() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    link(&mut gc, a, b);
    gc.add_soft_root(a);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 2);
    validate(&gc).unwrap();
}

// ============================================================================
// Fixed objects
// ============================================================================

#[test]
fn fixed_object_survives_every_cycle() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    gc.set_fixed(a, true);

    for _ in 0..100 {
        gc.full_gc();
    }
    assert_eq!(gc.num_objects(), 1);

    gc.set_fixed(a, false);
    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

// ============================================================================
// Incremental cycles and the barriers
// ============================================================================

#[test]
fn mid_cycle_allocation_survives_the_inflight_cycle() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let a = node(&mut gc, 1);
    roots.borrow_mut().push(ObjPtr::new(a));

    gc.single_step();
    assert_eq!(gc.phase(), GcPhase::Propagate);

    // Born mid-cycle with no references from anywhere.
    let d = node(&mut gc, 99);
    gc.full_gc();
    assert_eq!(gc.num_objects(), 2);
    assert_eq!(d.value, 99);

    // The next cycle collects it.
    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
}

#[test]
fn allocation_during_destroy_survives_to_the_next_cycle() {
    let mut gc = Gc::new();
    for i in 0..40 {
        node(&mut gc, i);
    }

    while gc.phase() != GcPhase::Destroy {
        gc.single_step();
    }
    let e = node(&mut gc, 5);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
    assert_eq!(e.value, 5);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

#[test]
fn forward_barrier_rescues_a_store_into_a_black_object() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    roots.borrow_mut().push(ObjPtr::new(a));

    gc.single_step();
    while !gc.flags_of(a).is_black() {
        gc.single_step();
    }
    assert_eq!(gc.phase(), GcPhase::Propagate);

    // Black object gains a reference to a white one mid-propagate.
    link(&mut gc, a, b);
    assert!(gc.flags_of(b).is_gray());

    gc.full_gc();
    assert_eq!(gc.num_objects(), 2);
    validate(&gc).unwrap();
}

#[test]
fn unbarriered_store_into_a_black_object_loses_the_target() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    roots.borrow_mut().push(ObjPtr::new(a));

    gc.single_step();
    while !gc.flags_of(a).is_black() {
        gc.single_step();
    }

    // The store the barrier never saw: the walker flags it, and the cycle
    // collects the target.
    let mut a_mut = a;
    a_mut.next.store(b);
    assert!(matches!(
        validate(&gc),
        Err(InvariantViolation::BlackReferencesCandidate)
    ));

    a_mut.next.clear();
    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
    validate(&gc).unwrap();
}

#[test]
fn backward_barrier_repaints_the_source_during_sweep() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let r = node(&mut gc, 1);
    roots.borrow_mut().push(ObjPtr::new(r));
    for i in 0..50 {
        node(&mut gc, i);
    }

    while gc.phase() != GcPhase::Sweep {
        gc.single_step();
    }
    assert!(gc.flags_of(r).is_black());

    // The gray list is no longer drained, so the source is repainted white
    // for re-examination instead of greying the target.
    let f = node(&mut gc, 9);
    link(&mut gc, r, f);
    assert!(gc.flags_of(r).is_white());
    assert!(!gc.flags_of(f).is_black());

    gc.full_gc();
    assert_eq!(gc.num_objects(), 2);
    validate(&gc).unwrap();
}

#[test]
fn global_write_barrier_greys_during_propagate_only() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);

    // Outside a cycle: nothing to repair.
    gc.write_barrier_global(a);
    assert!(gc.flags_of(a).is_white());

    gc.single_step();
    assert_eq!(gc.phase(), GcPhase::Propagate);
    gc.write_barrier_global(a);
    assert!(gc.flags_of(a).is_gray());

    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
}

#[test]
fn completed_cycle_leaves_a_white_heap_and_empty_gray_list() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    for i in 0..20 {
        let n = node(&mut gc, i);
        if i % 2 == 0 {
            roots.borrow_mut().push(ObjPtr::new(n));
        }
    }

    gc.full_gc();
    assert_eq!(gc.num_objects(), 10);
    for header in gc.roots.iter() {
        let flags = unsafe { (*header.as_ptr()).flags };
        assert!(flags.has_white(gc.current_white));
    }
    assert!(gc.gray.is_empty());
    validate(&gc).unwrap();
}

#[test]
fn consecutive_collections_are_idempotent() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    link(&mut gc, a, b);
    roots.borrow_mut().push(ObjPtr::new(a));
    for i in 0..10 {
        node(&mut gc, i);
    }

    gc.full_gc();
    let survivors = gc.num_objects();
    let bytes = gc.alloc_bytes();

    gc.full_gc();
    assert_eq!(gc.num_objects(), survivors);
    assert_eq!(gc.alloc_bytes(), bytes);
    validate(&gc).unwrap();
}

// ============================================================================
// Pacing
// ============================================================================

#[test]
fn allocation_pressure_drives_collection() {
    let mut gc = Gc::with_options(
        GcOptionsBuilder::new()
            .threshold(512)
            .step_mul(10_000)
            .build(),
    );

    for i in 0..200 {
        node(&mut gc, i);
    }
    // The allocation stream alone keeps the garbage bounded.
    assert!(gc.num_objects() < 100);
    validate(&gc).unwrap();
}

#[test]
fn start_collection_arms_the_next_check() {
    // A small step multiplier so one step cannot finish the whole cycle.
    let mut gc = Gc::with_options(GcOptionsBuilder::new().step_mul(10).build());
    for i in 0..100 {
        node(&mut gc, i);
    }
    assert!(gc.threshold() > gc.alloc_bytes());
    gc.check_gc();
    assert_eq!(gc.phase(), GcPhase::Pause);

    gc.start_collection();
    assert_eq!(gc.threshold(), gc.alloc_bytes());
    gc.check_gc();
    assert_ne!(gc.phase(), GcPhase::Pause);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 0);
}

#[test]
fn external_allocations_influence_the_ledger() {
    let mut gc = Gc::new();
    gc.report_alloc(10_000);
    gc.report_realloc(10_000, 4_000);
    assert_eq!(gc.alloc_bytes(), 4_000);

    let _a = node(&mut gc, 1);
    assert_eq!(gc.alloc_bytes(), 4_000 + node_size());

    gc.full_gc();
    assert_eq!(gc.alloc_bytes(), 4_000);
    gc.report_dealloc(4_000);
    assert_eq!(gc.alloc_bytes(), 0);
}

// ============================================================================
// Direct free
// ============================================================================

#[test]
fn announced_direct_free_reclaims_immediately() {
    let mut gc = Gc::new();
    let counter = Rc::new(Cell::new(0));
    let a = counted_node(&mut gc, 1, &counter);

    gc.allow_direct_free(a);
    gc.free_now(a);
    assert_eq!(gc.num_objects(), 0);
    assert_eq!(gc.alloc_bytes(), 0);
    assert_eq!(counter.get(), 1);
    validate(&gc).unwrap();
}

#[test]
fn unannounced_direct_free_still_reclaims() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    // Logs a warning, but the object is released all the same.
    gc.free_now(a);
    assert_eq!(gc.num_objects(), 0);
}

#[test]
fn direct_free_of_a_pinned_object_unpins_it() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    gc.add_soft_root(a);
    gc.allow_direct_free(a);
    gc.free_now(a);
    assert_eq!(gc.num_objects(), 0);
    gc.full_gc();
    validate(&gc).unwrap();
}

#[test]
fn direct_free_during_a_sweep_repairs_the_cursor() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let mut held = Vec::new();
    for i in 0..50 {
        let n = node(&mut gc, i);
        roots.borrow_mut().push(ObjPtr::new(n));
        held.push(n);
    }

    while gc.phase() != GcPhase::Sweep {
        gc.single_step();
    }
    // One sweep batch: the registry runs newest-first, so the cursor is now
    // parked on the link field of the 40th-newest node, held[10].
    gc.single_step();

    // Free the node the cursor is parked on, then the one just ahead of it.
    for ptr in [held[10], held[9]] {
        roots.borrow_mut().retain(|slot| *slot != ObjPtr::new(ptr));
        gc.allow_direct_free(ptr);
        gc.free_now(ptr);
    }
    validate(&gc).unwrap();

    gc.full_gc();
    assert_eq!(gc.num_objects(), 48);
    validate(&gc).unwrap();
}

// ============================================================================
// Final collection
// ============================================================================

#[test]
fn final_collection_reclaims_everything() {
    let mut gc = Gc::new();
    let roots = install_roots(&mut gc);
    let counter = Rc::new(Cell::new(0));

    let a = counted_node(&mut gc, 1, &counter);
    gc.set_fixed(a, true);
    let b = counted_node(&mut gc, 2, &counter);
    gc.add_soft_root(b);
    let c = counted_node(&mut gc, 3, &counter);
    roots.borrow_mut().push(ObjPtr::new(c));
    let _d = counted_node(&mut gc, 4, &counter);

    gc.final_gc();
    assert_eq!(gc.num_objects(), 0);
    assert_eq!(gc.alloc_bytes(), 0);
    assert_eq!(counter.get(), 4);
    let stats = validate(&gc).unwrap();
    assert_eq!(stats.objects, 0);

    roots.borrow_mut().clear();
}

// ============================================================================
// Misc surface
// ============================================================================

struct Bag {
    items: [ObjPtr<Node>; 3],
}

impl GcObject for Bag {
    fn mark(&mut self, marker: &mut Marker<'_>) {
        marker.mark_array(&mut self.items);
    }
}

#[test]
fn mark_array_traces_every_slot() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    let c = node(&mut gc, 3);
    let bag = gc
        .alloc(Bag {
            items: [ObjPtr::new(a), ObjPtr::new(b), ObjPtr::new(c)],
        })
        .unwrap();
    gc.add_soft_root(bag);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 4);
}

#[test]
fn every_marker_callback_contributes_roots() {
    let mut gc = Gc::new();
    let first = install_roots(&mut gc);
    let second = install_roots(&mut gc);

    let a = node(&mut gc, 1);
    let b = node(&mut gc, 2);
    first.borrow_mut().push(ObjPtr::new(a));
    second.borrow_mut().push(ObjPtr::new(b));

    gc.full_gc();
    assert_eq!(gc.num_objects(), 2);
}

#[test]
fn transient_flag_is_carried_but_ignored() {
    let mut gc = Gc::new();
    let a = node(&mut gc, 1);
    gc.set_transient(a, true);
    gc.add_soft_root(a);

    gc.full_gc();
    assert_eq!(gc.num_objects(), 1);
    assert!(gc
        .flags_of(a)
        .contains(crate::ObjectFlags::TRANSIENT));

    gc.set_transient(a, false);
    assert!(!gc
        .flags_of(a)
        .contains(crate::ObjectFlags::TRANSIENT));
}
