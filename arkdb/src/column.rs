//! Per-column storage atop the array/B+-tree layer: either a scalar B+-tree
//! (`Int`) or a binary/string column (`Str`, see [`crate::binary`]), plus an
//! optional ordered secondary index — the "B+-tree of a scalar type, or a
//! pair (value tree, string-index tree)" the data model calls for.
//!
//! An int column's index is the tree crate's own [`IndexTree`]: it groups
//! rows by exact value and is built for `rows_in_range`/`rows_for` queries.
//! A string column can't reuse it directly (`IndexTree` only orders `i64`),
//! so [`StringIndex`] keeps its own B+-tree of row numbers in sorted string
//! order, with comparisons done by reading the column back out through
//! `BinaryColumn` rather than by a generic `Ord` the tree crate could apply
//! on its own.

use arkdb_tree::array::Array;
use arkdb_tree::btree::index::IndexTree;
use arkdb_tree::btree::BTree;
use arkdb_tree::{NodeReader, NodeStore, Ref};

use crate::binary::BinaryColumn;
use crate::Error;

/// The declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Str,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ColumnStorage {
    Int(BTree),
    Str(BinaryColumn),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ColumnIndex {
    Int(IndexTree),
    Str(StringIndex),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Column {
    pub storage: ColumnStorage,
    pub index: Option<ColumnIndex>,
}

impl Column {
    pub fn ty(&self) -> ColumnType {
        match self.storage {
            ColumnStorage::Int(_) => ColumnType::Int,
            ColumnStorage::Str(_) => ColumnType::Str,
        }
    }

    pub fn new_empty<S: NodeStore>(store: &mut S, ty: ColumnType) -> Result<Self, Error> {
        let storage = match ty {
            ColumnType::Int => ColumnStorage::Int(BTree::new_empty(store)?),
            ColumnType::Str => ColumnStorage::Str(BinaryColumn::new_empty(store)?),
        };
        Ok(Self { storage, index: None })
    }

    pub fn len<R: NodeReader>(&self, store: &R) -> Result<usize, Error> {
        match &self.storage {
            ColumnStorage::Int(t) => t.len(store),
            ColumnStorage::Str(c) => c.len(store),
        }
    }

    fn descriptor(&self) -> [u64; 5] {
        match (&self.storage, &self.index) {
            (ColumnStorage::Int(t), idx) => {
                let (ia, ib) = match idx {
                    Some(ColumnIndex::Int(it)) => (it.values_root(), it.rows_root()),
                    _ => (0, 0),
                };
                [0, t.root(), 0, ia, ib]
            }
            (ColumnStorage::Str(c), idx) => {
                let (a, b) = c.roots();
                let ia = match idx {
                    Some(ColumnIndex::Str(s)) => s.root(),
                    _ => 0,
                };
                [1, a, b, ia, 0]
            }
        }
    }

    fn from_descriptor(descr: [u64; 5]) -> Self {
        let [kind, a, b, ia, ib] = descr;
        if kind == 0 {
            let storage = ColumnStorage::Int(BTree::from_root(a));
            let index = if ia != 0 || ib != 0 {
                Some(ColumnIndex::Int(IndexTree::from_roots(ia, ib)))
            } else {
                None
            };
            Self { storage, index }
        } else {
            let storage = ColumnStorage::Str(BinaryColumn::from_roots(a, b));
            let index = if ia != 0 { Some(ColumnIndex::Str(StringIndex::from_root(ia))) } else { None };
            Self { storage, index }
        }
    }

    pub fn encode_ref<S: NodeStore>(&self, store: &mut S) -> Result<Ref, Error> {
        let descr = self.descriptor();
        Ok(Array::bulk_build_refs(store, &descr, false, false)?.ref_())
    }

    pub fn decode_ref<R: NodeReader>(store: &R, r: Ref) -> Result<Self, Error> {
        let a = Array::from_ref(r);
        let mut descr = [0u64; 5];
        for (i, slot) in descr.iter_mut().enumerate() {
            *slot = a.get_ref(store, i)?;
        }
        Ok(Self::from_descriptor(descr))
    }
}

/// A column of row positions kept sorted by the string value each row holds,
/// supporting `begins_with` prefix scans over otherwise insertion-ordered
/// string data.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StringIndex {
    order: BTree,
}

impl StringIndex {
    pub fn new_empty<S: NodeStore>(store: &mut S) -> Result<Self, Error> {
        Ok(Self { order: BTree::new_empty(store)? })
    }

    pub fn from_root(root: Ref) -> Self {
        Self { order: BTree::from_root(root) }
    }

    pub fn root(&self) -> Ref {
        self.order.root()
    }

    /// First position among the already-indexed rows whose string is `>=
    /// value`, found by binary search, reading each candidate row's string
    /// back out of `col` to compare.
    fn position_for<R: NodeReader>(
        &self,
        store: &R,
        col: &BinaryColumn,
        value: &[u8],
    ) -> Result<usize, Error> {
        let n = self.order.len(store)?;
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let row = self.order.get(store, mid)? as usize;
            let mid_val = col.get(store, row)?;
            if mid_val.as_slice() < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    pub fn insert_row<S: NodeStore>(
        &mut self,
        store: &mut S,
        col: &BinaryColumn,
        row: usize,
        value: &[u8],
    ) -> Result<(), Error> {
        let pos = self.position_for(store, col, value)?;
        self.order.insert(store, pos, row as i64)
    }

    /// Every row whose string starts with `prefix`, in sorted order.
    pub fn begins_with<R: NodeReader>(
        &self,
        store: &R,
        col: &BinaryColumn,
        prefix: &[u8],
    ) -> Result<Vec<usize>, Error> {
        let n = self.order.len(store)?;
        let start = self.position_for(store, col, prefix)?;
        let mut out = Vec::new();
        let mut i = start;
        while i < n {
            let row = self.order.get(store, i)? as usize;
            let v = col.get(store, row)?;
            if v.starts_with(prefix) {
                out.push(row);
                i += 1;
            } else {
                break;
            }
        }
        Ok(out)
    }
}
