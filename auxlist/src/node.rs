//! Node model for the auxiliary-node list.
//!
//! Every slot of the arena is a [`Node`]. A node is either a *cell*, which
//! carries a key and a back-link, or an *auxiliary* node, which carries
//! nothing and only separates two cells so that splicing a cell in or out is
//! a single-word CAS.
//!
//! References between nodes are `u32` slot indices. [`NIL`] is the empty
//! reference.
//!
//! The `refct_claim` word packs two fields:
//! - bit 0: the claim bit, set once the count has dropped to zero and the
//!   node has been handed to (or sits in) its pool.
//! - bits 1..: the reference count, in steps of [`REF`].

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Slot index of a node inside the arena.
pub(crate) type Idx = u32;

/// The empty reference.
pub(crate) const NIL: Idx = Idx::MAX;

/// Head sentinel. Takes the cell role, never carries a key.
pub(crate) const HEAD: Idx = 0;

/// Tail sentinel. Takes the cell role, never carries a key.
pub(crate) const TAIL: Idx = 1;

/// Auxiliary node linking `HEAD` to `TAIL` in an empty list.
pub(crate) const FIRST_AUX: Idx = 2;

/// Number of slots reserved ahead of the pooled nodes.
pub(crate) const RESERVED: usize = 3;

/// Claim bit.
pub(crate) const CLAIM: usize = 1;

/// One counted reference.
pub(crate) const REF: usize = 2;

/// Variant of a node.
///
/// Fixed per slot for the lifetime of the arena, so the variant of any index
/// can be inspected without holding a counted reference to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Key-bearing node.
    Cell,
    /// Link-only node.
    Auxiliary,
}

/// A slot of the arena.
pub(crate) struct Node<T> {
    /// Successor in the chain, or next free node while pooled.
    pub(crate) next: AtomicU32,

    /// Packed claim bit and reference count.
    pub(crate) refct_claim: AtomicUsize,

    /// Predecessor cell recorded at logical deletion. Always `NIL` on
    /// auxiliary nodes.
    pub(crate) back_link: AtomicU32,

    /// Key of a cell. `None` on auxiliary nodes, sentinels and pooled cells.
    pub(crate) key: UnsafeCell<Option<T>>,

    kind: NodeKind,
}

impl<T> Node<T> {
    /// A node that starts life in a pool: claimed, no references.
    pub(crate) fn pooled(kind: NodeKind, next: Idx) -> Self {
        Self {
            next: AtomicU32::new(next),
            refct_claim: AtomicUsize::new(CLAIM),
            back_link: AtomicU32::new(NIL),
            key: UnsafeCell::new(None),
            kind,
        }
    }

    /// A node that starts life linked into the chain with `refs` counted
    /// references. Sentinels include one reference nobody ever releases.
    pub(crate) fn linked(kind: NodeKind, next: Idx, refs: usize) -> Self {
        Self {
            next: AtomicU32::new(next),
            refct_claim: AtomicUsize::new(refs * REF),
            back_link: AtomicU32::new(NIL),
            key: UnsafeCell::new(None),
            kind,
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    #[inline]
    pub(crate) fn is_cell(&self) -> bool {
        self.kind == NodeKind::Cell
    }

    /// Whether this cell has been logically deleted.
    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.back_link.load(Ordering::Acquire) != NIL
    }

    /// Shared view of the key.
    ///
    /// # Safety
    ///
    /// The caller must hold a counted reference to this node, or own it
    /// exclusively. Either keeps the key from being taken by a reclaimer.
    #[inline]
    pub(crate) unsafe fn key(&self) -> Option<&T> {
        unsafe { (*self.key.get()).as_ref() }
    }

    /// Store the key of a freshly allocated cell and borrow it back.
    ///
    /// # Safety
    ///
    /// The caller must own the node exclusively (allocated, not yet
    /// published) and must stop using the returned reference before
    /// releasing its last reference to the node.
    #[inline]
    pub(crate) unsafe fn init_key(&self, key: T) -> &T {
        unsafe { (*self.key.get()).insert(key) }
    }

    /// Move the key out of a node claimed for reclamation.
    ///
    /// # Safety
    ///
    /// The reference count must have reached zero with the claim bit set by
    /// the caller.
    #[inline]
    pub(crate) unsafe fn take_key(&self) -> Option<T> {
        unsafe { (*self.key.get()).take() }
    }
}

// SAFETY: links and counts are atomics. The key is written only by the
// exclusive owner of a node and read only under a counted reference.
unsafe impl<T: Send> Send for Node<T> {}
// SAFETY: see above; shared readers only ever obtain `&T`.
unsafe impl<T: Send + Sync> Sync for Node<T> {}
