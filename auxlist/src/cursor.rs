//! Traversal cursor with lazy unlinking of stranded auxiliary nodes.
//!
//! A cursor holds three counted references:
//!
//! ```text
//! pre_cell -> pre_aux -> target
//!   cell       aux       cell | TAIL
//! ```
//!
//! Deletions leave runs of consecutive auxiliary nodes behind. Every time the
//! cursor moves it walks over such a run and tries to point `pre_cell`
//! straight past it, so traversal stays short without a background sweeper.

use core::borrow::Borrow;
use core::sync::atomic::Ordering;

use crate::node::{HEAD, Idx, NIL, TAIL};
use crate::pool::Pool;

pub(crate) struct Cursor<'a, T> {
    pool: &'a Pool<T>,
    pub(crate) pre_cell: Idx,
    pub(crate) pre_aux: Idx,
    pub(crate) target: Idx,
}

impl<'a, T> Cursor<'a, T> {
    /// A cursor positioned on the first cell (or `TAIL`) after `HEAD`.
    pub(crate) fn first(pool: &'a Pool<T>) -> Self {
        pool.add_ref(HEAD);
        let pre_aux = pool.safe_read(&pool.node(HEAD).next);
        let mut cursor = Self {
            pool,
            pre_cell: HEAD,
            pre_aux,
            target: NIL,
        };
        cursor.advance_repair();
        cursor
    }

    /// Re-synchronizes `target` with `pre_aux.next`, skipping and compacting
    /// any run of auxiliary nodes on the way.
    pub(crate) fn advance_repair(&mut self) {
        let pool = self.pool;
        let mut p = self.pre_aux;
        if pool.node(p).next.load(Ordering::Acquire) == self.target {
            return;
        }

        let mut n = pool.safe_read(&pool.node(p).next);
        pool.release(self.target);
        self.target = NIL;

        while !pool.is_cell(n) {
            if n == NIL {
                // `p` has no successor: nothing to follow, start over.
                pool.release(p);
                self.restart();
                return;
            }
            // Best effort: unlink `p` from `pre_cell`. Losing the race only
            // means somebody else changed the link first.
            pool.swing(&pool.node(self.pre_cell).next, p, n);

            pool.release(p);
            p = n;
            n = pool.safe_read(&pool.node(p).next);
        }

        self.pre_aux = p;
        self.target = n;
    }

    /// Moves back to the first cell after `HEAD`. `pre_aux` and `target`
    /// must already be released.
    fn restart(&mut self) {
        let pool = self.pool;
        pool.release(self.pre_cell);
        pool.add_ref(HEAD);
        self.pre_cell = HEAD;
        self.pre_aux = pool.safe_read(&pool.node(HEAD).next);
        self.target = NIL;
        self.advance_repair();
    }

    /// Moves one cell forward. Returns `false` when already at `TAIL`.
    pub(crate) fn step(&mut self) -> bool {
        if self.target == TAIL {
            return false;
        }

        let pool = self.pool;
        pool.release(self.pre_cell);
        // The reference held on `target` moves over to `pre_cell`.
        self.pre_cell = self.target;
        self.target = NIL;

        pool.release(self.pre_aux);
        self.pre_aux = pool.safe_read(&pool.node(self.pre_cell).next);
        self.advance_repair();
        true
    }

    /// Scans forward from `target` for a cell whose key equals `key`.
    ///
    /// Stops on the match with `target` on the matching cell, or at `TAIL`.
    pub(crate) fn scan_for<Q>(&mut self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        while self.target != TAIL {
            // SAFETY: the cursor holds a counted reference on `target`.
            let found = unsafe { self.pool.node(self.target).key() }
                .is_some_and(|k| k.borrow() == key);
            if found {
                return true;
            }
            self.step();
        }
        false
    }
}

impl<T> Drop for Cursor<'_, T> {
    fn drop(&mut self) {
        self.pool.release(self.target);
        self.pool.release(self.pre_aux);
        self.pool.release(self.pre_cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FIRST_AUX;

    /// Links `keys` after HEAD the way a successful insert would.
    fn build(pool: &Pool<u32>, keys: &[u32]) -> Vec<(Idx, Idx)> {
        let mut linked = vec![];
        let mut pre_aux = FIRST_AUX;
        for &key in keys {
            let cell = pool.alloc_cell().unwrap();
            let aux = pool.alloc_aux().unwrap();
            unsafe { pool.node(cell).init_key(key) };
            pool.node(cell).next.store(aux, Ordering::Release);
            // Take over pre_aux's link to TAIL.
            pool.node(aux).next.store(TAIL, Ordering::Release);
            pool.node(pre_aux).next.store(cell, Ordering::Release);
            linked.push((cell, aux));
            pre_aux = aux;
        }
        linked
    }

    #[test]
    fn first_on_empty_list_lands_on_tail() {
        let pool: Pool<u32> = Pool::new(2);
        let cursor = Cursor::first(&pool);
        assert_eq!(cursor.pre_cell, HEAD);
        assert_eq!(cursor.pre_aux, FIRST_AUX);
        assert_eq!(cursor.target, TAIL);
    }

    #[test]
    fn step_walks_cells_in_chain_order() {
        let pool: Pool<u32> = Pool::new(4);
        let linked = build(&pool, &[10, 20, 30]);

        let mut cursor = Cursor::first(&pool);
        assert_eq!(cursor.target, linked[0].0);
        assert!(cursor.step());
        assert_eq!(cursor.pre_cell, linked[0].0);
        assert_eq!(cursor.pre_aux, linked[0].1);
        assert_eq!(cursor.target, linked[1].0);
        assert!(cursor.step());
        assert!(cursor.step());
        assert_eq!(cursor.target, TAIL);
        assert!(!cursor.step());
    }

    #[test]
    fn scan_stops_on_match_or_tail() {
        let pool: Pool<u32> = Pool::new(4);
        let linked = build(&pool, &[1, 2, 3]);

        let mut cursor = Cursor::first(&pool);
        assert!(cursor.scan_for(&2));
        assert_eq!(cursor.target, linked[1].0);
        assert!(!cursor.scan_for(&9));
        assert_eq!(cursor.target, TAIL);
    }

    #[test]
    fn advance_repair_compacts_auxiliary_runs() {
        let mut pool: Pool<u32> = Pool::new(4);
        let linked = build(&pool, &[1]);
        let (cell, aux) = linked[0];

        // Strand an extra auxiliary node between HEAD's aux and the cell:
        // HEAD -> FIRST_AUX -> stray -> cell.
        let stray = pool.alloc_aux().unwrap();
        pool.node(stray).next.store(cell, Ordering::Release);
        pool.node(FIRST_AUX).next.store(stray, Ordering::Release);

        {
            let cursor = Cursor::first(&pool);
            assert_eq!(cursor.pre_aux, stray);
            assert_eq!(cursor.target, cell);
            assert_eq!(pool.node(HEAD).next.load(Ordering::Acquire), stray);
        }

        let stats = pool.audit();
        assert_eq!(stats.live_cells, 1);
        assert_eq!(stats.linked_aux, 2);
        // FIRST_AUX was unlinked and went back to the auxiliary pool.
        assert_eq!(stats.free_aux, 4 - 2 + 1);
        assert_eq!(stats.misplaced, 0);
        assert_eq!(pool.node(aux).next.load(Ordering::Acquire), TAIL);
    }

    #[test]
    fn dangling_auxiliary_restarts_from_head() {
        let mut pool: Pool<u32> = Pool::new(2);
        let linked = build(&pool, &[1]);
        let dangling = pool.alloc_aux().unwrap();

        {
            pool.add_ref(HEAD);
            let mut cursor = Cursor {
                pool: &pool,
                pre_cell: HEAD,
                pre_aux: dangling,
                target: TAIL,
            };
            pool.add_ref(TAIL);
            cursor.advance_repair();
            assert_eq!(cursor.pre_cell, HEAD);
            assert_eq!(cursor.pre_aux, FIRST_AUX);
            assert_eq!(cursor.target, linked[0].0);
        }

        let stats = pool.audit();
        assert_eq!(stats.live_cells, 1);
        assert_eq!(stats.free_aux, 1);
        assert_eq!(stats.misplaced, 0);
    }

    #[test]
    fn dropping_a_cursor_releases_everything() {
        let pool: Pool<u32> = Pool::new(2);
        let linked = build(&pool, &[5]);
        let (cell, _) = linked[0];
        let before = pool.node(cell).refct_claim.load(Ordering::Relaxed);
        {
            let mut cursor = Cursor::first(&pool);
            assert!(cursor.scan_for(&5));
            assert_eq!(
                pool.node(cell).refct_claim.load(Ordering::Relaxed),
                before + crate::node::REF
            );
        }
        assert_eq!(pool.node(cell).refct_claim.load(Ordering::Relaxed), before);
    }
}
