//! Binary/string column storage: a pair of B+-trees — `offsets` holding
//! cumulative end-offsets (so locating a row's payload is a binary search
//! over sibling cumulative counts, the same pattern the B+-tree's own
//! interior nodes use for child ranges) and `blob` holding the concatenated
//! bytes, one `i64` per byte. Column values are never fixed-width, so unlike
//! an int column there's no single array slot to overwrite in place; insert
//! and erase shift every later entry's offset.

use arkdb_tree::btree::BTree;
use arkdb_tree::{NodeReader, NodeStore, Ref};

use crate::Error;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BinaryColumn {
    offsets: BTree,
    blob: BTree,
}

impl BinaryColumn {
    pub fn new_empty<S: NodeStore>(store: &mut S) -> Result<Self, Error> {
        Ok(Self { offsets: BTree::new_empty(store)?, blob: BTree::new_empty(store)? })
    }

    pub fn from_roots(offsets: Ref, blob: Ref) -> Self {
        Self { offsets: BTree::from_root(offsets), blob: BTree::from_root(blob) }
    }

    pub fn roots(&self) -> (Ref, Ref) {
        (self.offsets.root(), self.blob.root())
    }

    pub fn len<R: NodeReader>(&self, store: &R) -> Result<usize, Error> {
        Ok(self.offsets.len(store)?)
    }

    fn start_of<R: NodeReader>(&self, store: &R, i: usize) -> Result<usize, Error> {
        if i == 0 {
            Ok(0)
        } else {
            Ok(self.offsets.get(store, i - 1)? as usize)
        }
    }

    pub fn get<R: NodeReader>(&self, store: &R, i: usize) -> Result<Vec<u8>, Error> {
        let len = self.offsets.len(store)?;
        if i >= len {
            return Err(Error::IndexOutOfRange { index: i, len });
        }
        let start = self.start_of(store, i)?;
        let end = self.offsets.get(store, i)? as usize;
        let mut out = Vec::with_capacity(end - start);
        for pos in start..end {
            out.push(self.blob.get(store, pos)? as u8);
        }
        Ok(out)
    }

    pub fn push<S: NodeStore>(&mut self, store: &mut S, bytes: &[u8]) -> Result<(), Error> {
        let blob_len = self.blob.len(store)?;
        for &b in bytes {
            self.blob.push(store, b as i64)?;
        }
        self.offsets.push(store, (blob_len + bytes.len()) as i64)?;
        Ok(())
    }

    /// Insert a new entry at logical row `i`, shifting every later offset by
    /// the payload length.
    pub fn insert<S: NodeStore>(&mut self, store: &mut S, i: usize, bytes: &[u8]) -> Result<(), Error> {
        let n = self.offsets.len(store)?;
        if i > n {
            return Err(Error::IndexOutOfRange { index: i, len: n });
        }
        let at = self.start_of(store, i)?;
        for (k, &b) in bytes.iter().enumerate() {
            self.blob.insert(store, at + k, b as i64)?;
        }
        self.offsets.insert(store, i, (at + bytes.len()) as i64)?;
        for j in (i + 1)..=n {
            let v = self.offsets.get(store, j)?;
            self.offsets.set(store, j, v + bytes.len() as i64)?;
        }
        Ok(())
    }

    pub fn erase<S: NodeStore>(&mut self, store: &mut S, i: usize) -> Result<(), Error> {
        let n = self.offsets.len(store)?;
        if i >= n {
            return Err(Error::IndexOutOfRange { index: i, len: n });
        }
        let start = self.start_of(store, i)?;
        let end = self.offsets.get(store, i)? as usize;
        let removed = (end - start) as i64;
        for _ in start..end {
            self.blob.erase(store, start)?;
        }
        self.offsets.erase(store, i)?;
        for j in i..self.offsets.len(store)? {
            let v = self.offsets.get(store, j)?;
            self.offsets.set(store, j, v - removed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::tests_support::VecStore;

    #[test]
    fn push_then_get_round_trips() {
        let mut store = VecStore::new();
        let mut col = BinaryColumn::new_empty(&mut store).unwrap();
        col.push(&mut store, b"hello").unwrap();
        col.push(&mut store, b"").unwrap();
        col.push(&mut store, b"world!").unwrap();
        assert_eq!(col.len(&store).unwrap(), 3);
        assert_eq!(col.get(&store, 0).unwrap(), b"hello");
        assert_eq!(col.get(&store, 1).unwrap(), b"");
        assert_eq!(col.get(&store, 2).unwrap(), b"world!");
    }

    #[test]
    fn insert_shifts_later_offsets() {
        let mut store = VecStore::new();
        let mut col = BinaryColumn::new_empty(&mut store).unwrap();
        col.push(&mut store, b"aa").unwrap();
        col.push(&mut store, b"ccc").unwrap();
        col.insert(&mut store, 1, b"b").unwrap();
        assert_eq!(col.get(&store, 0).unwrap(), b"aa");
        assert_eq!(col.get(&store, 1).unwrap(), b"b");
        assert_eq!(col.get(&store, 2).unwrap(), b"ccc");
    }

    #[test]
    fn erase_shifts_later_offsets_down() {
        let mut store = VecStore::new();
        let mut col = BinaryColumn::new_empty(&mut store).unwrap();
        for s in ["aa", "bbb", "c"] {
            col.push(&mut store, s.as_bytes()).unwrap();
        }
        col.erase(&mut store, 0).unwrap();
        assert_eq!(col.len(&store).unwrap(), 2);
        assert_eq!(col.get(&store, 0).unwrap(), b"bbb");
        assert_eq!(col.get(&store, 1).unwrap(), b"c");
    }
}
