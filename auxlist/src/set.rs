//! The public lock-free set.

use core::borrow::Borrow;
use core::fmt;
use core::sync::atomic::Ordering;

use crossbeam_utils::Backoff;
use tracing::{debug, trace};

use crate::cursor::Cursor;
use crate::error::ListError;
use crate::node::{Idx, NIL};
use crate::pool::{Pool, PoolStats};

/// Capacity used by [`ListSet::new`].
pub const DEFAULT_CAPACITY: usize = 100;

/// Lock-free set of keys over a singly linked list with auxiliary nodes.
///
/// All nodes come from a pool materialized at construction, so a set holds
/// at most [`capacity`](ListSet::capacity) keys and never touches the
/// allocator afterwards. Nodes are recycled through reference counting; a
/// thread traversing the list always holds a counted reference on the nodes
/// it looks at.
///
/// Keys are compared for equality only. A new key is appended after the last
/// cell, so the chain keeps insertion order, not key order.
///
/// # Example
///
/// ```
/// use auxlist::ListSet;
///
/// let set = ListSet::with_capacity(4);
/// assert_eq!(set.insert("a"), Ok(true));
/// assert_eq!(set.insert("a"), Ok(false));
/// assert!(set.contains("a"));
/// assert!(set.remove("a"));
/// assert!(!set.contains("a"));
/// ```
pub struct ListSet<T> {
    pool: Pool<T>,
}

impl<T> ListSet<T> {
    /// Creates a set holding up to [`DEFAULT_CAPACITY`] keys.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a set holding up to `capacity` keys.
    ///
    /// Preallocates `capacity` cells, `capacity` auxiliary nodes, two
    /// sentinels and one auxiliary node linking them.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`](crate::MAX_CAPACITY).
    pub fn with_capacity(capacity: usize) -> Self {
        let pool = Pool::new(capacity);
        debug!(capacity, "materialized node pool");
        Self { pool }
    }

    /// Maximum number of keys the set can hold at once.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Accounts for every node of the set.
    ///
    /// Requires exclusive access, so no operation can be in flight. In a
    /// consistent set `live_cells + free_cells == capacity`,
    /// `linked_aux + free_aux == capacity + 1` and `misplaced == 0`.
    pub fn stats(&mut self) -> PoolStats {
        self.pool.audit()
    }

    /// Returns `true` if the set contains `key`.
    #[doc(alias = "find")]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut cursor = Cursor::first(&self.pool);
        cursor.scan_for(key)
    }

    /// Removes `key`. Returns `false` if it was not present.
    #[doc(alias = "delete")]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let backoff = Backoff::new();
        let mut cursor = Cursor::first(&self.pool);

        loop {
            if !cursor.scan_for(key) {
                return false;
            }
            if self.try_delete(&cursor) {
                return true;
            }
            cursor.advance_repair();
            backoff.spin();
        }
    }

    /// Unlinks `cursor.target` from `cursor.pre_aux`, then splices out the
    /// auxiliary run it leaves behind.
    fn try_delete(&self, cursor: &Cursor<'_, T>) -> bool {
        let pool = &self.pool;
        let d = cursor.target;
        let mut n = pool.safe_read(&pool.node(d).next);

        if !pool.swing(&pool.node(cursor.pre_aux).next, d, n) {
            pool.release(n);
            return false;
        }

        // Nearest predecessor that is not itself deleted. The back-link names
        // it rather than `pre_cell`, so deleted cells never link to each
        // other and one held cell cannot pin a history of deletions.
        let mut p = cursor.pre_cell;
        pool.add_ref(p);
        while pool.node(p).is_deleted() {
            let q = pool.safe_read(&pool.node(p).back_link);
            if q == NIL {
                break;
            }
            pool.release(p);
            p = q;
        }

        // Logical deletion point.
        pool.add_ref(p);
        pool.node(d).back_link.store(p, Ordering::Release);

        let mut s = pool.safe_read(&pool.node(p).next);

        // Last auxiliary node before the next cell.
        let mut bordered = true;
        while !pool.is_cell(pool.node(n).next.load(Ordering::Acquire)) {
            let q = pool.safe_read(&pool.node(n).next);
            if q == NIL {
                bordered = false;
                break;
            }
            pool.release(n);
            n = q;
        }

        let backoff = Backoff::new();
        while bordered && !pool.swing(&pool.node(p).next, s, n) {
            pool.release(s);
            s = pool.safe_read(&pool.node(p).next);
            // Give up once `p` is gone or `n` no longer borders a cell;
            // whoever caused that repairs the chain from there.
            bordered = !pool.node(p).is_deleted()
                && pool.is_cell(pool.node(n).next.load(Ordering::Acquire));
            backoff.spin();
        }

        // `pre_aux` now links to an auxiliary node and `d` is deleted. Point
        // both at the live chain so a thread still holding either pins
        // nothing stale.
        pool.compact_links(cursor.pre_aux);
        pool.compact_links(d);

        pool.release(p);
        pool.release(s);
        pool.release(n);
        true
    }
}

impl<T: Eq> ListSet<T> {
    /// Adds `key` to the set.
    ///
    /// Returns `Ok(true)` if it was inserted and `Ok(false)` if an equal key
    /// was already present. Fails with [`ListError::CapacityExhausted`] when
    /// no node is free, even if the key turns out to be a duplicate.
    pub fn insert(&self, key: T) -> Result<bool, ListError> {
        let pool = &self.pool;
        let cell = pool.alloc_cell().inspect_err(|err| trace!(%err, "insert rejected"))?;
        let aux = match pool.alloc_aux() {
            Ok(aux) => aux,
            Err(err) => {
                trace!(%err, "insert rejected");
                pool.release(cell);
                return Err(err);
            }
        };

        // Our reference on `aux` becomes the cell's link to it.
        pool.node(cell).next.store(aux, Ordering::Release);
        // SAFETY: `cell` is unpublished. `key` is not used once the cell is
        // published or released.
        let key = unsafe { pool.node(cell).init_key(key) };

        let backoff = Backoff::new();
        let mut cursor = Cursor::first(pool);

        loop {
            if cursor.scan_for(key) {
                drop(cursor);
                // Cascades into `aux` and whatever it was pointed at.
                pool.release(cell);
                return Ok(false);
            }
            if self.try_insert(&cursor, cell, aux) {
                return Ok(true);
            }
            cursor.advance_repair();
            backoff.spin();
        }
    }

    /// Links `cell -> aux -> target` in front of `cursor.target`.
    fn try_insert(&self, cursor: &Cursor<'_, T>, cell: Idx, aux: Idx) -> bool {
        let pool = &self.pool;
        let target = cursor.target;
        let link = &pool.node(aux).next;

        let old = link.load(Ordering::Relaxed);
        if old != target {
            pool.add_ref(target);
            link.store(target, Ordering::Release);
            pool.release(old);
        }

        // On success our reference on `cell` becomes `pre_aux`'s link.
        if pool
            .node(cursor.pre_aux)
            .next
            .compare_exchange(target, cell, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            pool.release(target);
            return true;
        }
        false
    }
}

impl<T> Default for ListSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ListSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSet")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for ListSet<T> {
    fn drop(&mut self) {
        // Keys still in cells are dropped with the arena.
        trace!(capacity = self.pool.capacity(), "dropping set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn empty_set_finds_nothing() {
        let set: ListSet<u64> = ListSet::with_capacity(4);
        for k in 0..10 {
            assert!(!set.contains(&k));
        }
    }

    #[test]
    fn insert_find_remove() {
        let set = ListSet::with_capacity(4);
        assert_eq!(set.insert(3), Ok(true));
        assert!(set.contains(&3));
        assert!(set.remove(&3));
        assert!(!set.contains(&3));
        assert!(!set.remove(&3));
    }

    #[test]
    fn duplicate_insert_returns_nodes_to_pool() {
        let mut set = ListSet::with_capacity(2);
        assert_eq!(set.insert(1), Ok(true));
        assert_eq!(set.insert(1), Ok(false));

        let stats = set.stats();
        assert_eq!(stats.live_cells, 1);
        assert_eq!(stats.free_cells, 1);
        assert_eq!(stats.linked_aux + stats.free_aux, 3);
        assert_eq!(stats.misplaced, 0);
    }

    #[test]
    fn capacity_is_enforced_and_recovered() {
        let set = ListSet::with_capacity(3);
        for k in 0..3 {
            assert_eq!(set.insert(k), Ok(true));
        }
        assert_eq!(
            set.insert(3),
            Err(ListError::CapacityExhausted {
                kind: NodeKind::Cell,
                capacity: 3,
            })
        );
        assert!(set.remove(&1));
        assert_eq!(set.insert(3), Ok(true));
        assert!(set.insert(4).is_err());
    }

    #[test]
    fn removal_in_the_middle_keeps_neighbours() {
        let mut set = ListSet::with_capacity(8);
        for k in 0..5 {
            set.insert(k).unwrap();
        }
        assert!(set.remove(&2));
        assert!(set.remove(&3));
        for k in [0, 1, 4] {
            assert!(set.contains(&k));
        }
        for k in [2, 3] {
            assert!(!set.contains(&k));
        }

        let stats = set.stats();
        assert_eq!(stats.live_cells, 3);
        assert_eq!(stats.free_cells, 5);
        assert_eq!(stats.linked_aux + stats.free_aux, 9);
        assert_eq!(stats.misplaced, 0);
    }

    #[test]
    fn back_link_skips_deleted_predecessors() {
        let set = ListSet::with_capacity(4);
        for k in [1, 2, 3] {
            set.insert(k).unwrap();
        }
        let pool = &set.pool;

        let first = {
            let mut cursor = Cursor::first(pool);
            assert!(cursor.scan_for(&1));
            cursor.target
        };

        // Stale cursor on 3: its `pre_cell` (2) is removed underneath it.
        let mut cursor = Cursor::first(pool);
        assert!(cursor.scan_for(&3));
        let second = cursor.pre_cell;
        assert!(set.remove(&2));
        assert!(pool.node(second).is_deleted());

        assert!(set.try_delete(&cursor));
        let third = cursor.target;
        assert_eq!(pool.node(third).back_link.load(Ordering::Acquire), first);
        drop(cursor);

        assert!(set.contains(&1));
        assert!(!set.contains(&2));
        assert!(!set.contains(&3));
    }

    #[test]
    fn held_cursor_does_not_starve_inserts() {
        let mut set = ListSet::with_capacity(2);
        {
            // Pins FIRST_AUX, which the first removal strands.
            let _cursor = Cursor::first(&set.pool);
            for k in 0..100 {
                assert_eq!(set.insert(k), Ok(true), "round {k}");
                assert!(set.remove(&k));
            }
        }

        let stats = set.stats();
        assert_eq!(stats.live_cells, 0);
        assert_eq!(stats.free_cells, 2);
        assert_eq!(stats.linked_aux + stats.free_aux, 3);
        assert_eq!(stats.misplaced, 0);
    }

    #[test]
    fn borrowed_lookups() {
        let set = ListSet::with_capacity(2);
        set.insert(String::from("key")).unwrap();
        assert!(set.contains("key"));
        assert!(set.remove("key"));
        assert!(!set.contains("key"));
    }
}
