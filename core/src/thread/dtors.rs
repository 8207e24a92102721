//! Global destructor chain for thread-local slots.
//!
//! A singly-linked list of `{slot, destructor}` nodes, one per key with a
//! destructor on backends without native TLS callbacks. The head is only
//! ever updated by compare-and-exchange on an atomic pointer cell, because
//! exiting threads walk the chain without taking any lock.

use core::ffi::c_void;
use core::ptr::NonNull;

use strata_hal::imp::tls;
use strata_hal::SlotDtor;

use crate::atomic::AtomicPtrCell;
use crate::mem;

struct DtorNode {
    slot: usize,
    dtor: SlotDtor,
    next: *mut DtorNode,
}

static CHAIN_HEAD: AtomicPtrCell = AtomicPtrCell::new(core::ptr::null_mut());

/// Links a `{slot, destructor}` node at the head of the chain.
///
/// Pushes are serialized by the key-materialization mutex; the CAS guards
/// against the concurrent lock-free walkers, so a failure here means the
/// serialization contract was broken.
pub(crate) fn push(slot: usize, dtor: SlotDtor) -> bool {
    let head = CHAIN_HEAD.get();
    let node = match mem::alloc_record(DtorNode {
        slot,
        dtor,
        next: head as *mut DtorNode,
    }) {
        Some(node) => node,
        None => {
            log::error!("dtors::push: failed to allocate chain node");
            return false;
        }
    };

    if !CHAIN_HEAD.compare_and_exchange(head, node.as_ptr() as *mut c_void) {
        log::error!("dtors::push: chain head moved under the materialization mutex");
        // SAFETY: the node was never published.
        unsafe { mem::free_record(node) };
        return false;
    }
    true
}

/// Runs the calling thread's pending destructors to a fixed point.
///
/// Each pass walks every node; a non-null slot value is cleared to null
/// *before* its destructor runs, so destructors touching other keys are
/// safe. Passes repeat until one completes without invoking anything,
/// which covers destructors that store into other keys.
pub(crate) fn run_thread_dtors() {
    loop {
        let mut invoked = false;
        let mut node = CHAIN_HEAD.get() as *const DtorNode;
        while !node.is_null() {
            // SAFETY: nodes are never unlinked outside shutdown, so the
            // chain stays readable for the lifetime of the thread.
            let current = unsafe { &*node };
            // SAFETY: the slot is live; it was allocated by a key.
            let value = unsafe { tls::slot_get(current.slot) };
            if !value.is_null() {
                // SAFETY: as above; the dtor contract is the key's.
                unsafe {
                    tls::slot_set(current.slot, core::ptr::null_mut());
                    (current.dtor)(value);
                }
                invoked = true;
            }
            node = current.next;
        }
        if !invoked {
            break;
        }
    }
}

/// Tears the chain down: runs the calling thread's destructors, then frees
/// every node and its platform slot.
///
/// Single-threaded by the lifecycle contract.
pub(crate) fn shutdown() {
    run_thread_dtors();

    let mut node = CHAIN_HEAD.get() as *mut DtorNode;
    while !node.is_null() {
        // SAFETY: teardown owns the chain exclusively.
        unsafe {
            let next = (*node).next;
            tls::slot_free((*node).slot);
            mem::free_record(NonNull::new_unchecked(node));
            node = next;
        }
    }
    CHAIN_HEAD.set(core::ptr::null_mut());
}
