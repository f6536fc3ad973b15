//! Reference counted reclamation: safe-read, release and reclaim.
//!
//! A node's count covers every transient reference a thread holds through
//! [`Pool::safe_read`] and every link stored in a node outside the pool
//! (`next` or `back_link`). Pool links are not counted.
//!
//! The release that drops the count from one reference to zero also sets the
//! claim bit, in the same CAS. Exactly one thread observes that transition
//! per lifetime of a node, and that thread reclaims it: it takes the key,
//! drops the node's own outgoing links and pushes it onto its free stack.
//! Allocation clears the claim bit again.
//!
//! A node that left the chain still links forward, and whoever holds it keeps
//! that successor out of the pool. [`Pool::compact_links`] points such links
//! straight at the live chain so the run in between can be reclaimed.
//! [`Pool::sweep`] does it for every node in use and runs before an
//! allocation reports exhaustion.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::node::{CLAIM, HEAD, Idx, NIL, REF, TAIL};
use crate::pool::Pool;

impl<T> Pool<T> {
    /// Reads `slot` and returns its target with one counted reference held,
    /// or `NIL` if the slot is empty.
    ///
    /// The count is taken speculatively and confirmed by re-reading the slot.
    /// If the slot moved in between, the node may already have been recycled,
    /// so the speculative reference is dropped and the read retried.
    pub(crate) fn safe_read(&self, slot: &AtomicU32) -> Idx {
        loop {
            let q = slot.load(Ordering::Acquire);
            if q == NIL {
                return NIL;
            }
            self.node(q).refct_claim.fetch_add(REF, Ordering::AcqRel);
            if slot.load(Ordering::Acquire) == q {
                return q;
            }
            self.release(q);
        }
    }

    /// Takes one more counted reference on a node the caller already holds.
    #[inline]
    pub(crate) fn add_ref(&self, idx: Idx) {
        if idx == NIL {
            return;
        }
        let old = self.node(idx).refct_claim.fetch_add(REF, Ordering::AcqRel);
        debug_assert!(old >= REF, "add_ref on an unreferenced node {idx}");
    }

    /// Drops one counted reference, reclaiming the node if it was the last.
    pub(crate) fn release(&self, idx: Idx) {
        if idx == NIL {
            return;
        }
        if self.decrement_and_test_and_set(idx) {
            self.reclaim(idx);
        }
    }

    /// Subtracts one reference, clamping at the claimed floor.
    ///
    /// Returns `true` only for the transition that reached zero and set the
    /// claim bit.
    fn decrement_and_test_and_set(&self, idx: Idx) -> bool {
        let word = &self.node(idx).refct_claim;
        let mut old = word.load(Ordering::Relaxed);

        loop {
            let new = match old.checked_sub(REF) {
                Some(0) | None => CLAIM,
                Some(n) => n,
            };
            match word.compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return (old - new) & CLAIM == CLAIM,
                Err(actual) => old = actual,
            }
        }
    }

    /// Clears the claim bit of a node just popped off a free stack.
    #[inline]
    pub(crate) fn clear_claim(&self, idx: Idx) {
        let old = self.node(idx).refct_claim.fetch_sub(CLAIM, Ordering::AcqRel);
        debug_assert_eq!(old & CLAIM, CLAIM, "node {idx} was not claimed");
    }

    /// Moves `link` from `expected` to `new`, handing a fresh reference on
    /// `new` to the link and dropping the one `expected` held.
    ///
    /// The caller must hold `new`.
    pub(crate) fn swing(&self, link: &AtomicU32, expected: Idx, new: Idx) -> bool {
        self.add_ref(new);
        if link
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.release(expected);
            true
        } else {
            self.release(new);
            false
        }
    }

    /// From an auxiliary node the caller holds, follows auxiliary successors
    /// to the last one before a cell and returns it with a reference held.
    ///
    /// Returns `NIL` if the walk meets a node with no successor.
    fn run_end(&self, start: Idx) -> Idx {
        let mut f = start;
        self.add_ref(f);
        loop {
            let next = self.node(f).next.load(Ordering::Acquire);
            if next == NIL {
                self.release(f);
                return NIL;
            }
            if self.is_cell(next) {
                return f;
            }
            let q = self.safe_read(&self.node(f).next);
            self.release(f);
            if q == NIL {
                return NIL;
            }
            f = q;
        }
    }

    /// Repoints the links of a node the caller holds past whatever is no
    /// longer live.
    ///
    /// `next` skips a run of auxiliary nodes to the last one before a cell.
    /// Every node in the run already links to an auxiliary node, so no insert
    /// can land there and skipping it loses nothing. A cell's `back_link`
    /// skips deleted cells to the nearest one not deleted. `next` only
    /// moves forward in list order and `back_link` only backward, so neither
    /// can close a cycle.
    pub(crate) fn compact_links(&self, idx: Idx) {
        let node = self.node(idx);

        let v = self.safe_read(&node.next);
        if v != NIL && !self.is_cell(v) {
            let f = self.run_end(v);
            if f != NIL {
                if f != v {
                    self.swing(&node.next, v, f);
                }
                self.release(f);
            }
        }
        self.release(v);

        if !node.is_cell() {
            return;
        }
        let b = self.safe_read(&node.back_link);
        if b == NIL {
            return;
        }
        let mut l = b;
        self.add_ref(l);
        while self.node(l).is_deleted() {
            let q = self.safe_read(&self.node(l).back_link);
            if q == NIL {
                break;
            }
            self.release(l);
            l = q;
        }
        if l != b {
            self.swing(&node.back_link, b, l);
        }
        self.release(l);
        self.release(b);
    }

    /// Compacts the links of every node currently out of the pools.
    ///
    /// A thread stalled on a node that left the chain pins nothing beyond
    /// the live successor afterwards.
    #[cold]
    pub(crate) fn sweep(&self) {
        for idx in 0..self.slots() as Idx {
            if idx == TAIL || !self.try_pin(idx) {
                continue;
            }
            self.compact_links(idx);
            self.release(idx);
        }
    }

    /// Takes a reference on `idx` unless it is claimed.
    ///
    /// The increment is speculative like in [`safe_read`](Self::safe_read):
    /// on a claimed node it is undone, and whoever pops the node meanwhile
    /// holds its own reference.
    fn try_pin(&self, idx: Idx) -> bool {
        let old = self.node(idx).refct_claim.fetch_add(REF, Ordering::AcqRel);
        if old & CLAIM == CLAIM {
            self.release(idx);
            return false;
        }
        true
    }

    /// Returns a claimed node to its pool and drops its outgoing links.
    ///
    /// Dropping a link may claim the target in turn. Successor chains are
    /// followed in a loop; back-links recurse, bounded by the number of
    /// consecutive deleted cells still waiting on each other.
    fn reclaim(&self, mut idx: Idx) {
        loop {
            debug_assert!(idx != HEAD && idx != TAIL, "sentinel {idx} reclaimed");
            let node = self.node(idx);

            let next = node.next.swap(NIL, Ordering::AcqRel);
            let back = node.back_link.swap(NIL, Ordering::AcqRel);
            // SAFETY: this thread set the claim bit; nobody else holds a
            // counted reference through which the key could be read.
            drop(unsafe { node.take_key() });
            self.push_free(idx);

            self.release(back);
            if next != NIL && self.decrement_and_test_and_set(next) {
                idx = next;
                continue;
            }
            return;
        }
    }
}
