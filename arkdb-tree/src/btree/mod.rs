//! The copy-on-write B+-tree of arrays (C4): sequences, ordered index trees,
//! and (via the engine crate) the group directory are all built on top of
//! this module.
//!
//! **Node layout.** A leaf is a plain [`Array`] (`has_refs = false`) holding
//! payload values directly. An interior node is an [`Array`] with
//! `has_refs = true` whose first `n` slots are child refs and whose last slot
//! is the ref of a sibling offsets array (`has_refs = false`) holding the `n`
//! cumulative element counts of the children — "arrays of child-refs followed
//! by an offset sequence", read literally as one array plus one trailing
//! pointer to the other. A ref-valued sequence (e.g. a column of child table
//! refs) stores its payload as plain `i64` bit patterns at the leaf level;
//! the `as i64 <-> as u64` cast round-trips exactly, so no separate has-refs
//! leaf representation is needed.
//!
//! Every mutating operation here rebuilds the full sibling list at the
//! touched level with [`build_interior`] rather than patching counts
//! in place. That costs an extra `O(fan-out)` pass per level instead of a
//! handful of targeted updates, but it collapses insert, erase, split, merge
//! and redistribute into one code path — a worthwhile trade given fan-out is
//! capped at a few thousand.

pub mod cursor;
pub mod index;

use alloc::vec::Vec;

use crate::array::Array;
use crate::store::{NodeReader, NodeStore};
use crate::{Error, Ref, DEFAULT_LEAF_SIZE, DEFAULT_NODE_SIZE};

/// A B+-tree identified by the ref of its current root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    root: Ref,
}

enum Insert {
    Done(Ref),
    Split { left: Ref, right: Ref },
}

pub(crate) fn num_children<R: NodeReader>(store: &R, r: Ref) -> Result<usize, Error> {
    Ok(Array::from_ref(r).len(store)? - 1)
}

pub(crate) fn child_ref<R: NodeReader>(store: &R, r: Ref, k: usize) -> Result<Ref, Error> {
    Array::from_ref(r).get_ref(store, k)
}

pub(crate) fn offsets_ref<R: NodeReader>(store: &R, r: Ref) -> Result<Ref, Error> {
    let n = Array::from_ref(r).len(store)?;
    Array::from_ref(r).get_ref(store, n - 1)
}

pub(crate) fn load_children_vec<R: NodeReader>(store: &R, r: Ref) -> Result<Vec<Ref>, Error> {
    let n = num_children(store, r)?;
    (0..n).map(|k| child_ref(store, r, k)).collect()
}

/// Smallest `k` with `offset[k] > i`, and `i`'s offset within `child[k]`.
pub(crate) fn find_child<R: NodeReader>(
    store: &R,
    r: Ref,
    i: usize,
) -> Result<(usize, usize), Error> {
    let offs = Array::from_ref(offsets_ref(store, r)?);
    let k = offs.upper_bound(store, i as i64)?;
    let base = if k == 0 { 0 } else { offs.get(store, k - 1)? as usize };
    Ok((k, i - base))
}

pub(crate) fn child_base_offset<R: NodeReader>(
    store: &R,
    r: Ref,
    k: usize,
) -> Result<usize, Error> {
    if k == 0 {
        return Ok(0);
    }
    let offs = Array::from_ref(offsets_ref(store, r)?);
    Ok(offs.get(store, k - 1)? as usize)
}

pub(crate) fn subtree_count<R: NodeReader>(store: &R, r: Ref) -> Result<usize, Error> {
    let a = Array::from_ref(r);
    if a.is_interior(store)? {
        let offs = Array::from_ref(offsets_ref(store, r)?);
        let n = offs.len(store)?;
        if n == 0 {
            Ok(0)
        } else {
            Ok(offs.get(store, n - 1)? as usize)
        }
    } else {
        a.len(store)
    }
}

fn first_value<R: NodeReader>(store: &R, r: Ref) -> Result<i64, Error> {
    let a = Array::from_ref(r);
    if !a.is_interior(store)? {
        return a.get(store, 0);
    }
    first_value(store, child_ref(store, r, 0)?)
}

/// Rebuild an interior node from a fresh list of child refs, recomputing the
/// offsets array from scratch.
pub(crate) fn build_interior<S: NodeStore>(store: &mut S, children: &[Ref]) -> Result<Ref, Error> {
    let mut cum = 0i64;
    let mut offsets_vals = Vec::with_capacity(children.len());
    for &c in children {
        cum += subtree_count(store, c)? as i64;
        offsets_vals.push(cum);
    }
    let offsets = Array::bulk_build_values(store, &offsets_vals, false, false)?;
    let mut slots: Vec<Ref> = children.to_vec();
    slots.push(offsets.ref_());
    Ok(Array::bulk_build_refs(store, &slots, true, false)?.ref_())
}

fn insert_rec<S: NodeStore>(
    store: &mut S,
    r: Ref,
    i: usize,
    v: i64,
    leaf_cap: usize,
    node_cap: usize,
) -> Result<Insert, Error> {
    let a = Array::from_ref(r);
    if !a.is_interior(store)? {
        let mut leaf = a;
        leaf.insert(store, i, v)?;
        let len = leaf.len(store)?;
        if len <= leaf_cap {
            return Ok(Insert::Done(leaf.ref_()));
        }
        let mid = len / 2;
        let mut right_vals = Vec::with_capacity(len - mid);
        for idx in mid..len {
            right_vals.push(leaf.get(store, idx)?);
        }
        leaf.truncate(store, mid)?;
        let right = Array::bulk_build_values(store, &right_vals, false, false)?;
        return Ok(Insert::Split { left: leaf.ref_(), right: right.ref_() });
    }

    let (k, local_i) = find_child(store, r, i)?;
    let mut children = load_children_vec(store, r)?;
    let result = insert_rec(store, children[k], local_i, v, leaf_cap, node_cap)?;
    match result {
        Insert::Done(new_child) => children[k] = new_child,
        Insert::Split { left, right } => {
            children[k] = left;
            children.insert(k + 1, right);
        }
    }
    if children.len() <= node_cap {
        Ok(Insert::Done(build_interior(store, &children)?))
    } else {
        let mid = children.len() / 2;
        let left = build_interior(store, &children[..mid])?;
        let right = build_interior(store, &children[mid..])?;
        Ok(Insert::Split { left, right })
    }
}

fn leaf_vals<R: NodeReader>(store: &R, r: Ref) -> Result<Vec<i64>, Error> {
    let a = Array::from_ref(r);
    let n = a.len(store)?;
    (0..n).map(|i| a.get(store, i)).collect()
}

/// Merge or evenly redistribute two adjacent leaves, returning the
/// replacement ref(s).
fn rebalance_leaves<S: NodeStore>(
    store: &mut S,
    left: Ref,
    right: Ref,
    leaf_cap: usize,
) -> Result<Insert, Error> {
    let mut combined = leaf_vals(store, left)?;
    combined.extend(leaf_vals(store, right)?);
    if combined.len() <= leaf_cap {
        let merged = Array::bulk_build_values(store, &combined, false, false)?;
        Ok(Insert::Done(merged.ref_()))
    } else {
        let mid = combined.len() / 2;
        let l = Array::bulk_build_values(store, &combined[..mid], false, false)?;
        let r = Array::bulk_build_values(store, &combined[mid..], false, false)?;
        Ok(Insert::Split { left: l.ref_(), right: r.ref_() })
    }
}

fn rebalance_interiors<S: NodeStore>(
    store: &mut S,
    left: Ref,
    right: Ref,
    node_cap: usize,
) -> Result<Insert, Error> {
    let mut combined = load_children_vec(store, left)?;
    combined.extend(load_children_vec(store, right)?);
    if combined.len() <= node_cap {
        Ok(Insert::Done(build_interior(store, &combined)?))
    } else {
        let mid = combined.len() / 2;
        let l = build_interior(store, &combined[..mid])?;
        let r = build_interior(store, &combined[mid..])?;
        Ok(Insert::Split { left: l, right: r })
    }
}

fn erase_rec<S: NodeStore>(
    store: &mut S,
    r: Ref,
    i: usize,
    leaf_cap: usize,
    node_cap: usize,
) -> Result<Ref, Error> {
    let a = Array::from_ref(r);
    if !a.is_interior(store)? {
        let mut leaf = a;
        leaf.erase(store, i)?;
        return Ok(leaf.ref_());
    }

    let (k, local_i) = find_child(store, r, i)?;
    let mut children = load_children_vec(store, r)?;
    children[k] = erase_rec(store, children[k], local_i, leaf_cap, node_cap)?;

    let child_is_leaf = !Array::from_ref(children[k]).is_interior(store)?;
    let count = subtree_count(store, children[k])?;
    let min_count = if child_is_leaf { leaf_cap / 2 } else { node_cap / 2 };

    if count < min_count && children.len() > 1 {
        let (sib, keep_left) = if k > 0 { (k - 1, true) } else { (k + 1, false) };
        let (left_idx, right_idx) = if keep_left { (sib, k) } else { (k, sib) };
        let result = if child_is_leaf {
            rebalance_leaves(store, children[left_idx], children[right_idx], leaf_cap)?
        } else {
            rebalance_interiors(store, children[left_idx], children[right_idx], node_cap)?
        };
        match result {
            Insert::Done(merged) => {
                children[left_idx] = merged;
                children.remove(right_idx);
            }
            Insert::Split { left, right } => {
                children[left_idx] = left;
                children[right_idx] = right;
            }
        }
    }

    if children.len() == 1 {
        return Ok(children[0]);
    }
    build_interior(store, &children)
}

fn set_rec<S: NodeStore>(store: &mut S, r: Ref, i: usize, v: i64) -> Result<Ref, Error> {
    let a = Array::from_ref(r);
    if !a.is_interior(store)? {
        let mut leaf = a;
        leaf.set(store, i, v)?;
        return Ok(leaf.ref_());
    }
    let (k, local_i) = find_child(store, r, i)?;
    let mut children = load_children_vec(store, r)?;
    children[k] = set_rec(store, children[k], local_i, v)?;
    build_interior(store, &children)
}

fn get_rec<R: NodeReader>(store: &R, r: Ref, i: usize) -> Result<i64, Error> {
    let a = Array::from_ref(r);
    if !a.is_interior(store)? {
        return a.get(store, i);
    }
    let (k, local_i) = find_child(store, r, i)?;
    get_rec(store, child_ref(store, r, k)?, local_i)
}

fn bound_rec<R: NodeReader>(store: &R, r: Ref, v: i64, upper: bool) -> Result<usize, Error> {
    let a = Array::from_ref(r);
    if !a.is_interior(store)? {
        return if upper { a.upper_bound(store, v) } else { a.lower_bound(store, v) };
    }
    let n = num_children(store, r)?;
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let fv = first_value(store, child_ref(store, r, mid)?)?;
        if fv <= v {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let k = lo.saturating_sub(1);
    let local = bound_rec(store, child_ref(store, r, k)?, v, upper)?;
    Ok(child_base_offset(store, r, k)? + local)
}

impl BTree {
    pub fn new_empty<S: NodeStore>(store: &mut S) -> Result<Self, Error> {
        let leaf = Array::new_empty(store, false, false, false)?;
        Ok(Self { root: leaf.ref_() })
    }

    pub fn from_root(root: Ref) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Ref {
        self.root
    }

    pub fn len<R: NodeReader>(&self, store: &R) -> Result<usize, Error> {
        subtree_count(store, self.root)
    }

    pub fn is_empty<R: NodeReader>(&self, store: &R) -> Result<bool, Error> {
        Ok(self.len(store)? == 0)
    }

    pub fn get<R: NodeReader>(&self, store: &R, i: usize) -> Result<i64, Error> {
        let len = self.len(store)?;
        if i >= len {
            return Err(Error::IndexOutOfRange { index: i, len });
        }
        get_rec(store, self.root, i)
    }

    pub fn get_ref<R: NodeReader>(&self, store: &R, i: usize) -> Result<Ref, Error> {
        Ok(self.get(store, i)? as u64)
    }

    pub fn insert<S: NodeStore>(&mut self, store: &mut S, i: usize, v: i64) -> Result<(), Error> {
        self.insert_with_fanout(store, i, v, DEFAULT_LEAF_SIZE, DEFAULT_NODE_SIZE)
    }

    pub fn insert_with_fanout<S: NodeStore>(
        &mut self,
        store: &mut S,
        i: usize,
        v: i64,
        leaf_cap: usize,
        node_cap: usize,
    ) -> Result<(), Error> {
        match insert_rec(store, self.root, i, v, leaf_cap, node_cap)? {
            Insert::Done(r) => self.root = r,
            Insert::Split { left, right } => self.root = build_interior(store, &[left, right])?,
        }
        Ok(())
    }

    pub fn push<S: NodeStore>(&mut self, store: &mut S, v: i64) -> Result<(), Error> {
        let len = self.len(store)?;
        self.insert(store, len, v)
    }

    pub fn erase<S: NodeStore>(&mut self, store: &mut S, i: usize) -> Result<(), Error> {
        self.erase_with_fanout(store, i, DEFAULT_LEAF_SIZE, DEFAULT_NODE_SIZE)
    }

    pub fn erase_with_fanout<S: NodeStore>(
        &mut self,
        store: &mut S,
        i: usize,
        leaf_cap: usize,
        node_cap: usize,
    ) -> Result<(), Error> {
        self.root = erase_rec(store, self.root, i, leaf_cap, node_cap)?;
        Ok(())
    }

    pub fn set<S: NodeStore>(&mut self, store: &mut S, i: usize, v: i64) -> Result<(), Error> {
        self.root = set_rec(store, self.root, i, v)?;
        Ok(())
    }

    /// First position `i` with `get(i) >= v` on a value-sorted tree.
    pub fn lower_bound<R: NodeReader>(&self, store: &R, v: i64) -> Result<usize, Error> {
        bound_rec(store, self.root, v, false)
    }

    /// First position `i` with `get(i) > v` on a value-sorted tree.
    pub fn upper_bound<R: NodeReader>(&self, store: &R, v: i64) -> Result<usize, Error> {
        bound_rec(store, self.root, v, true)
    }

    pub fn bulk_build<S: NodeStore>(store: &mut S, values: &[i64]) -> Result<Self, Error> {
        Self::bulk_build_with_fanout(store, values, DEFAULT_LEAF_SIZE, DEFAULT_NODE_SIZE)
    }

    pub fn bulk_build_with_fanout<S: NodeStore>(
        store: &mut S,
        values: &[i64],
        leaf_cap: usize,
        node_cap: usize,
    ) -> Result<Self, Error> {
        if values.is_empty() {
            return Self::new_empty(store);
        }
        let mut level = Vec::new();
        let mut idx = 0;
        while idx < values.len() {
            let end = (idx + leaf_cap).min(values.len());
            level.push(Array::bulk_build_values(store, &values[idx..end], false, false)?.ref_());
            idx = end;
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(node_cap));
            let mut i = 0;
            while i < level.len() {
                let end = (i + node_cap).min(level.len());
                next.push(build_interior(store, &level[i..end])?);
                i = end;
            }
            level = next;
        }
        Ok(Self { root: level[0] })
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use alloc::vec;
    use alloc::vec::Vec;

    use crate::store::{NodeReader, NodeStore};
    use crate::{Error, Ref};

    /// A byte-arena `NodeStore` for unit tests: refs are 1-based indices into
    /// a vector of owned allocations.
    pub struct TestStore {
        slots: Vec<Vec<u8>>,
    }

    impl TestStore {
        pub fn new() -> Self {
            Self { slots: Vec::new() }
        }
    }

    impl NodeReader for TestStore {
        fn resolve(&self, r: Ref) -> Result<&[u8], Error> {
            self.slots
                .get((r as usize).wrapping_sub(1))
                .map(|v| v.as_slice())
                .ok_or(Error::CorruptRef(r))
        }
    }

    impl NodeStore for TestStore {
        fn alloc(&mut self, capacity: usize) -> Result<(Ref, &mut [u8]), Error> {
            self.slots.push(vec![0u8; capacity]);
            let idx = self.slots.len();
            Ok((idx as u64, self.slots[idx - 1].as_mut_slice()))
        }

        fn grow(&mut self, r: Ref, capacity: usize) -> Result<(Ref, &mut [u8]), Error> {
            let idx = (r as usize).wrapping_sub(1);
            let slot = self.slots.get_mut(idx).ok_or(Error::CorruptRef(r))?;
            slot.resize(capacity, 0);
            Ok((r, slot.as_mut_slice()))
        }

        fn resolve_mut(&mut self, r: Ref) -> Result<&mut [u8], Error> {
            let idx = (r as usize).wrapping_sub(1);
            self.slots
                .get_mut(idx)
                .map(|v| v.as_mut_slice())
                .ok_or(Error::CorruptRef(r))
        }

        fn free(&mut self, _r: Ref) {}

        fn owns(&self, _r: Ref) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::TestStore;
    use super::*;

    #[test]
    fn insert_grows_and_splits_leaves() {
        let mut store = TestStore::new();
        let mut tree = BTree::new_empty(&mut store).unwrap();
        for i in 0..300i64 {
            tree.insert_with_fanout(&mut store, i as usize, i, 16, 4).unwrap();
        }
        assert_eq!(tree.len(&store).unwrap(), 300);
        for i in 0..300usize {
            assert_eq!(tree.get(&store, i).unwrap(), i as i64);
        }
    }

    #[test]
    fn erase_shrinks_tree_and_preserves_order() {
        let mut store = TestStore::new();
        let values: Vec<i64> = (0..300).collect();
        let mut tree = BTree::bulk_build_with_fanout(&mut store, &values, 16, 4).unwrap();
        for _ in 0..200 {
            tree.erase_with_fanout(&mut store, 50, 16, 4).unwrap();
        }
        assert_eq!(tree.len(&store).unwrap(), 100);
        let mut expect: Vec<i64> = (0..50).collect();
        expect.extend(250..300);
        for (i, &v) in expect.iter().enumerate() {
            assert_eq!(tree.get(&store, i).unwrap(), v);
        }
    }

    #[test]
    fn bulk_build_matches_incremental_insert() {
        let mut store_a = TestStore::new();
        let values: Vec<i64> = (0..1000).map(|i| i * 3).collect();
        let bulk = BTree::bulk_build_with_fanout(&mut store_a, &values, 32, 8).unwrap();

        let mut store_b = TestStore::new();
        let mut incr = BTree::new_empty(&mut store_b).unwrap();
        for (i, &v) in values.iter().enumerate() {
            incr.insert_with_fanout(&mut store_b, i, v, 32, 8).unwrap();
        }

        assert_eq!(bulk.len(&store_a).unwrap(), incr.len(&store_b).unwrap());
        for i in 0..values.len() {
            assert_eq!(bulk.get(&store_a, i).unwrap(), incr.get(&store_b, i).unwrap());
        }
    }

    #[test]
    fn bounds_on_value_sorted_tree() {
        let mut store = TestStore::new();
        let values: Vec<i64> = (0..500).map(|i| i * 2).collect();
        let tree = BTree::bulk_build_with_fanout(&mut store, &values, 20, 6).unwrap();
        assert_eq!(tree.lower_bound(&store, 7).unwrap(), 4);
        assert_eq!(tree.upper_bound(&store, 8).unwrap(), 5);
        assert_eq!(tree.lower_bound(&store, 0).unwrap(), 0);
        assert_eq!(tree.upper_bound(&store, 10_000).unwrap(), 500);
    }

    #[test]
    fn set_updates_value_without_changing_length() {
        let mut store = TestStore::new();
        let values: Vec<i64> = (0..200).collect();
        let mut tree = BTree::bulk_build_with_fanout(&mut store, &values, 16, 4).unwrap();
        tree.set(&mut store, 150, 9_999_999).unwrap();
        assert_eq!(tree.len(&store).unwrap(), 200);
        assert_eq!(tree.get(&store, 150).unwrap(), 9_999_999);
        assert_eq!(tree.get(&store, 149).unwrap(), 149);
    }
}
