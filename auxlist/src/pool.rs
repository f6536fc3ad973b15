//! Fixed-capacity node arena with one lock-free free stack per node kind.
//!
//! The arena is materialized once at construction. Slots are never allocated
//! or freed afterwards; they move between the chain and the two free stacks
//! under the reference counting protocol in [`reclaim`](crate::reclaim).
//!
//! ```text
//! index:  0     1     2          3 .. 3+cap      3+cap .. 3+2cap
//!         HEAD  TAIL  FIRST_AUX  cells            auxiliary nodes
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use tracing::trace;

use crate::error::ListError;
use crate::node::{FIRST_AUX, HEAD, Idx, NIL, Node, NodeKind, RESERVED, TAIL};

/// Largest capacity whose slots are all addressable without colliding with
/// [`NIL`].
pub const MAX_CAPACITY: usize = (NIL as usize - RESERVED) / 2;

/// Sweeps an allocation runs against an empty free stack before giving up.
const SWEEPS: usize = 2;

/// Node accounting taken while no operation is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Keyed cells reachable from the head sentinel.
    pub live_cells: usize,
    /// Auxiliary nodes reachable from the head sentinel.
    pub linked_aux: usize,
    /// Cells sitting in the free cell stack.
    pub free_cells: usize,
    /// Auxiliary nodes sitting in the free auxiliary stack.
    pub free_aux: usize,
    /// Slots seen twice, or seen neither in the chain nor in a pool.
    pub misplaced: usize,
}

pub(crate) struct Pool<T> {
    nodes: Box<[Node<T>]>,
    // Both heads are CAS targets for every thread.
    free_cells: CachePadded<AtomicU32>,
    free_aux: CachePadded<AtomicU32>,
    capacity: usize,
}

impl<T> Pool<T> {
    /// Builds the arena, the two sentinels, the first auxiliary node and
    /// `capacity` free nodes of each kind.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`].
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity <= MAX_CAPACITY, "capacity overflow");

        let first_cell = RESERVED;
        let first_aux = RESERVED + capacity;
        let end = RESERVED + 2 * capacity;

        let mut nodes = Vec::with_capacity(end);
        // HEAD: pinned. TAIL: pinned + FIRST_AUX's link. FIRST_AUX: HEAD's link.
        nodes.push(Node::linked(NodeKind::Cell, FIRST_AUX, 1));
        nodes.push(Node::linked(NodeKind::Cell, NIL, 2));
        nodes.push(Node::linked(NodeKind::Auxiliary, TAIL, 1));

        for i in first_cell..end {
            let (kind, last) = if i < first_aux {
                (NodeKind::Cell, first_aux - 1)
            } else {
                (NodeKind::Auxiliary, end - 1)
            };
            let next = if i == last { NIL } else { (i + 1) as Idx };
            nodes.push(Node::pooled(kind, next));
        }

        let head_of = |start: usize| {
            if capacity == 0 { NIL } else { start as Idx }
        };

        Self {
            nodes: nodes.into_boxed_slice(),
            free_cells: CachePadded::new(AtomicU32::new(head_of(first_cell))),
            free_aux: CachePadded::new(AtomicU32::new(head_of(first_aux))),
            capacity,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of arena slots, sentinels included.
    #[inline]
    pub(crate) fn slots(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn node(&self, idx: Idx) -> &Node<T> {
        debug_assert_ne!(idx, NIL);
        &self.nodes[idx as usize]
    }

    /// Whether `idx` names a cell (sentinels included). `NIL` is not a cell.
    #[inline]
    pub(crate) fn is_cell(&self, idx: Idx) -> bool {
        idx != NIL && self.node(idx).is_cell()
    }

    #[inline]
    fn free_head(&self, kind: NodeKind) -> &AtomicU32 {
        match kind {
            NodeKind::Cell => &self.free_cells,
            NodeKind::Auxiliary => &self.free_aux,
        }
    }

    /// Pops a node of `kind` off its free stack.
    ///
    /// The returned node carries exactly one counted reference, owned by the
    /// caller, and has no successor or back-link.
    ///
    /// An empty stack is swept first: nodes held only through links of nodes
    /// that already left the chain are released and handed out. Exhaustion is
    /// reported once a sweep leaves the stack empty.
    pub(crate) fn alloc(&self, kind: NodeKind) -> Result<Idx, ListError> {
        let head = self.free_head(kind);
        let backoff = Backoff::new();
        let mut sweeps = 0;

        loop {
            // The counted read pins the candidate in the pool: it cannot be
            // popped, used, reclaimed and pushed back underneath the CAS.
            let p = self.safe_read(head);
            if p == NIL {
                if sweeps < SWEEPS {
                    sweeps += 1;
                    trace!(?kind, sweeps, "free stack empty, sweeping");
                    self.sweep();
                    continue;
                }
                return Err(ListError::CapacityExhausted {
                    kind,
                    capacity: self.capacity,
                });
            }

            let node = self.node(p);
            let next = node.next.load(Ordering::Acquire);
            if head
                .compare_exchange(p, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Reset while still claimed, so a sweep that pins the node
                // never sees its old pool link.
                node.next.store(NIL, Ordering::Relaxed);
                node.back_link.store(NIL, Ordering::Relaxed);
                self.clear_claim(p);
                return Ok(p);
            }

            self.release(p);
            backoff.spin();
        }
    }

    #[inline]
    pub(crate) fn alloc_cell(&self) -> Result<Idx, ListError> {
        self.alloc(NodeKind::Cell)
    }

    #[inline]
    pub(crate) fn alloc_aux(&self) -> Result<Idx, ListError> {
        self.alloc(NodeKind::Auxiliary)
    }

    /// Pushes a claimed node back onto the free stack of its kind.
    pub(crate) fn push_free(&self, idx: Idx) {
        let node = self.node(idx);
        let head = self.free_head(node.kind());
        let mut top = head.load(Ordering::Relaxed);

        loop {
            node.next.store(top, Ordering::Relaxed);
            match head.compare_exchange_weak(top, idx, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => top = actual,
            }
        }
    }

    /// Walks the chain and both free stacks.
    ///
    /// `&mut self` guarantees no operation is in flight.
    pub(crate) fn audit(&mut self) -> PoolStats {
        let mut seen = vec![false; self.nodes.len()];
        let mut stats = PoolStats::default();
        seen[HEAD as usize] = true;

        let mut mark = |idx: Idx, stats: &mut PoolStats| -> bool {
            let slot = &mut seen[idx as usize];
            if *slot {
                stats.misplaced += 1;
                return false;
            }
            *slot = true;
            true
        };

        let mut cur = self.nodes[HEAD as usize].next.load(Ordering::Acquire);
        while cur != NIL {
            if !mark(cur, &mut stats) {
                break;
            }
            if cur == TAIL {
                break;
            }
            match self.node(cur).kind() {
                NodeKind::Cell => stats.live_cells += 1,
                NodeKind::Auxiliary => stats.linked_aux += 1,
            }
            cur = self.node(cur).next.load(Ordering::Acquire);
        }

        for kind in [NodeKind::Cell, NodeKind::Auxiliary] {
            let mut cur = self.free_head(kind).load(Ordering::Acquire);
            while cur != NIL {
                if !mark(cur, &mut stats) {
                    break;
                }
                match kind {
                    NodeKind::Cell => stats.free_cells += 1,
                    NodeKind::Auxiliary => stats.free_aux += 1,
                }
                cur = self.node(cur).next.load(Ordering::Acquire);
            }
        }

        stats.misplaced += seen.iter().filter(|s| !**s).count();
        stats
    }
}
