//! Range-iteration cursor: a stack of `(node, child_index)` frames that walks
//! leaves left to right without re-descending from the root for each
//! element.

use alloc::vec::Vec;

use crate::array::Array;
use crate::store::NodeReader;
use crate::{Error, Ref};

use super::{child_ref, find_child, num_children};

/// A forward cursor over a [`super::BTree`]'s elements, starting at a given
/// position. Valid for the lifetime of the snapshot backing `store`.
pub struct Cursor<'a, R: NodeReader> {
    store: &'a R,
    stack: Vec<(Ref, usize)>,
    leaf: Ref,
    leaf_pos: usize,
    leaf_len: usize,
}

impl<'a, R: NodeReader> Cursor<'a, R> {
    pub fn new(store: &'a R, root: Ref, start: usize) -> Result<Self, Error> {
        let mut stack = Vec::new();
        let mut node = root;
        let mut i = start;
        loop {
            let a = Array::from_ref(node);
            if !a.is_interior(store)? {
                let leaf_len = a.len(store)?;
                return Ok(Self { store, stack, leaf: node, leaf_pos: i, leaf_len });
            }
            let (k, local_i) = find_child(store, node, i)?;
            stack.push((node, k));
            node = child_ref(store, node, k)?;
            i = local_i;
        }
    }

    /// Advance past the current leaf, descending into the next sibling
    /// subtree's leftmost leaf.
    fn advance_leaf(&mut self) -> Result<bool, Error> {
        loop {
            let Some((node, k)) = self.stack.pop() else {
                return Ok(false);
            };
            let n = num_children(self.store, node)?;
            if k + 1 < n {
                self.stack.push((node, k + 1));
                let mut child = child_ref(self.store, node, k + 1)?;
                loop {
                    let a = Array::from_ref(child);
                    if !a.is_interior(self.store)? {
                        self.leaf = child;
                        self.leaf_pos = 0;
                        self.leaf_len = a.len(self.store)?;
                        return Ok(true);
                    }
                    self.stack.push((child, 0));
                    child = child_ref(self.store, child, 0)?;
                }
            }
        }
    }

    /// The next element's value, or `None` when the cursor is exhausted.
    pub fn next(&mut self) -> Result<Option<i64>, Error> {
        loop {
            if self.leaf_pos < self.leaf_len {
                let v = Array::from_ref(self.leaf).get(self.store, self.leaf_pos)?;
                self.leaf_pos += 1;
                return Ok(Some(v));
            }
            if !self.advance_leaf()? {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::TestStore;
    use super::super::BTree;
    use super::*;

    #[test]
    fn cursor_yields_every_element_in_order() {
        let mut store = TestStore::new();
        let values: Vec<i64> = (0..2500).collect();
        let tree = BTree::bulk_build_with_fanout(&mut store, &values, 100, 8).unwrap();
        let mut cursor = Cursor::new(&store, tree.root(), 0).unwrap();
        let mut out = Vec::new();
        while let Some(v) = cursor.next().unwrap() {
            out.push(v);
        }
        assert_eq!(out, values);
    }

    #[test]
    fn cursor_can_start_mid_tree() {
        let mut store = TestStore::new();
        let values: Vec<i64> = (0..500).collect();
        let tree = BTree::bulk_build_with_fanout(&mut store, &values, 50, 4).unwrap();
        let mut cursor = Cursor::new(&store, tree.root(), 300).unwrap();
        assert_eq!(cursor.next().unwrap(), Some(300));
        assert_eq!(cursor.next().unwrap(), Some(301));
    }
}
