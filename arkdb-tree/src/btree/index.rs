//! Ordered index tree: maps a column value to the set of row positions
//! holding it, keeping index maintenance logarithmic even when a value
//! repeats across many rows.
//!
//! Implemented as two same-length [`BTree`]s kept in lockstep: `values` holds
//! one entry per distinct value in ascending order, and `rows` holds, at the
//! same position, the root ref of a small sub-[`BTree`] of that value's row
//! numbers (also kept sorted). A value's row set is itself a compact B+-tree
//! rather than a flat list, so adding or removing one occurrence of a
//! common value never touches the outer `values`/`rows` pair.

use alloc::vec::Vec;

use crate::store::{NodeReader, NodeStore};
use crate::{Error, Ref};

use super::BTree;

#[derive(Debug, Clone, Copy)]
pub struct IndexTree {
    values: BTree,
    rows: BTree,
}

impl IndexTree {
    pub fn new_empty<S: NodeStore>(store: &mut S) -> Result<Self, Error> {
        Ok(Self {
            values: BTree::new_empty(store)?,
            rows: BTree::new_empty(store)?,
        })
    }

    pub fn from_roots(values_root: Ref, rows_root: Ref) -> Self {
        Self {
            values: BTree::from_root(values_root),
            rows: BTree::from_root(rows_root),
        }
    }

    pub fn values_root(&self) -> Ref {
        self.values.root()
    }

    pub fn rows_root(&self) -> Ref {
        self.rows.root()
    }

    pub fn distinct_values<R: NodeReader>(&self, store: &R) -> Result<usize, Error> {
        self.values.len(store)
    }

    /// Record that `row` now holds `value`.
    pub fn insert_row<S: NodeStore>(
        &mut self,
        store: &mut S,
        value: i64,
        row: usize,
    ) -> Result<(), Error> {
        let pos = self.values.lower_bound(store, value)?;
        let exists = pos < self.values.len(store)? && self.values.get(store, pos)? == value;
        if exists {
            let rows_ref = self.rows.get_ref(store, pos)?;
            let mut set = BTree::from_root(rows_ref);
            let at = set.lower_bound(store, row as i64)?;
            if at >= set.len(store)? || set.get(store, at)? != row as i64 {
                set.insert(store, at, row as i64)?;
            }
            self.rows.set(store, pos, set.root() as i64)?;
        } else {
            let mut set = BTree::new_empty(store)?;
            set.insert(store, 0, row as i64)?;
            self.values.insert(store, pos, value)?;
            self.rows.insert(store, pos, set.root() as i64)?;
        }
        Ok(())
    }

    /// Record that `row` no longer holds `value`. A no-op if it didn't.
    pub fn remove_row<S: NodeStore>(
        &mut self,
        store: &mut S,
        value: i64,
        row: usize,
    ) -> Result<(), Error> {
        let pos = self.values.lower_bound(store, value)?;
        if pos >= self.values.len(store)? || self.values.get(store, pos)? != value {
            return Ok(());
        }
        let rows_ref = self.rows.get_ref(store, pos)?;
        let mut set = BTree::from_root(rows_ref);
        let at = set.lower_bound(store, row as i64)?;
        if at < set.len(store)? && set.get(store, at)? == row as i64 {
            set.erase(store, at)?;
        }
        if set.len(store)? == 0 {
            self.values.erase(store, pos)?;
            self.rows.erase(store, pos)?;
        } else {
            self.rows.set(store, pos, set.root() as i64)?;
        }
        Ok(())
    }

    /// All row positions currently holding `value`, in ascending order.
    pub fn rows_for<R: NodeReader>(
        &self,
        store: &R,
        value: i64,
        sink: &mut Vec<usize>,
    ) -> Result<(), Error> {
        let pos = self.values.lower_bound(store, value)?;
        if pos >= self.values.len(store)? || self.values.get(store, pos)? != value {
            return Ok(());
        }
        let set = BTree::from_root(self.rows.get_ref(store, pos)?);
        let n = set.len(store)?;
        for idx in 0..n {
            sink.push(set.get(store, idx)? as usize);
        }
        Ok(())
    }

    /// Every row holding a value in `[low, high]`, in value order and then
    /// row order within each value.
    pub fn rows_in_range<R: NodeReader>(
        &self,
        store: &R,
        low: i64,
        high: i64,
        sink: &mut Vec<usize>,
    ) -> Result<(), Error> {
        let start = self.values.lower_bound(store, low)?;
        let end = self.values.upper_bound(store, high)?;
        for pos in start..end {
            let value = self.values.get(store, pos)?;
            self.rows_for(store, value, sink)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::TestStore;
    use super::*;

    #[test]
    fn duplicate_values_accumulate_row_sets() {
        let mut store = TestStore::new();
        let mut idx = IndexTree::new_empty(&mut store).unwrap();
        idx.insert_row(&mut store, 10, 0).unwrap();
        idx.insert_row(&mut store, 20, 1).unwrap();
        idx.insert_row(&mut store, 10, 2).unwrap();
        idx.insert_row(&mut store, 10, 3).unwrap();

        assert_eq!(idx.distinct_values(&store).unwrap(), 2);
        let mut rows = Vec::new();
        idx.rows_for(&store, 10, &mut rows).unwrap();
        assert_eq!(rows, vec![0, 2, 3]);
    }

    #[test]
    fn removing_last_row_drops_the_value() {
        let mut store = TestStore::new();
        let mut idx = IndexTree::new_empty(&mut store).unwrap();
        idx.insert_row(&mut store, 5, 0).unwrap();
        idx.remove_row(&mut store, 5, 0).unwrap();
        assert_eq!(idx.distinct_values(&store).unwrap(), 0);
        let mut rows = Vec::new();
        idx.rows_for(&store, 5, &mut rows).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn range_query_spans_several_values() {
        let mut store = TestStore::new();
        let mut idx = IndexTree::new_empty(&mut store).unwrap();
        for row in 0..20usize {
            idx.insert_row(&mut store, (row % 5) as i64, row).unwrap();
        }
        let mut rows = Vec::new();
        idx.rows_in_range(&store, 1, 3, &mut rows).unwrap();
        rows.sort_unstable();
        let expect: Vec<usize> = (0..20).filter(|r| matches!(r % 5, 1 | 2 | 3)).collect();
        assert_eq!(rows, expect);
    }
}
