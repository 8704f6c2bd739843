//! The group directory (part of C5's data model): the single per-commit
//! entry point that maps table names to table roots, reachable from the
//! top reference's `group_root` field.
//!
//! Table names live in a [`BinaryColumn`] in creation order; table roots
//! live in a parallel `BTree` of the same length, the ref's bit pattern
//! cast to `i64` the same way a column's own secondary index stores row
//! numbers. There is no hash index over names — a group directory is
//! expected to hold at most a few hundred tables, so a linear scan over the
//! name column resolves a lookup cheaply enough not to warrant one.

use arkdb_tree::array::Array;
use arkdb_tree::btree::BTree;
use arkdb_tree::{NodeReader, NodeStore, Ref};

use crate::binary::BinaryColumn;
use crate::Error;

#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupDir {
    names: BinaryColumn,
    roots: BTree,
}

impl GroupDir {
    pub fn empty<S: NodeStore>(store: &mut S) -> Result<Self, Error> {
        Ok(Self { names: BinaryColumn::new_empty(store)?, roots: BTree::new_empty(store)? })
    }

    pub fn from_root<R: NodeReader>(store: &R, r: Ref) -> Result<Self, Error> {
        if r == 0 {
            let names = BinaryColumn::from_roots(0, 0);
            return Ok(Self { names, roots: BTree::from_root(0) });
        }
        let a = Array::from_ref(r);
        let names = BinaryColumn::from_roots(a.get_ref(store, 0)?, a.get_ref(store, 1)?);
        let roots = BTree::from_root(a.get_ref(store, 2)?);
        Ok(Self { names, roots })
    }

    pub fn root<S: NodeStore>(&self, store: &mut S) -> Result<Ref, Error> {
        let (noff, nblob) = self.names.roots();
        let values = [noff, nblob, self.roots.root()];
        Ok(Array::bulk_build_refs(store, &values, false, false)?.ref_())
    }

    pub fn len<R: NodeReader>(&self, store: &R) -> Result<usize, Error> {
        self.names.len(store)
    }

    pub fn table_names<R: NodeReader>(&self, store: &R) -> Result<Vec<String>, Error> {
        let n = self.names.len(store)?;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let bytes = self.names.get(store, i)?;
            out.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(out)
    }

    fn find<R: NodeReader>(&self, store: &R, name: &str) -> Result<Option<usize>, Error> {
        let n = self.names.len(store)?;
        for i in 0..n {
            if self.names.get(store, i)? == name.as_bytes() {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub fn table_root<R: NodeReader>(&self, store: &R, name: &str) -> Result<Option<Ref>, Error> {
        match self.find(store, name)? {
            Some(i) => Ok(Some(self.roots.get_ref(store, i)?)),
            None => Ok(None),
        }
    }

    pub fn create_table<S: NodeStore>(&mut self, store: &mut S, name: &str, table_root: Ref) -> Result<(), Error> {
        if self.find(store, name)?.is_some() {
            return Err(Error::TableAlreadyExists { name: name.to_string() });
        }
        self.names.push(store, name.as_bytes())?;
        self.roots.insert(store, self.roots.len(store)?, table_root as i64)?;
        Ok(())
    }

    pub fn set_table_root<S: NodeStore>(&mut self, store: &mut S, name: &str, table_root: Ref) -> Result<(), Error> {
        let i = self.find(store, name)?.ok_or_else(|| Error::NoSuchTable { name: name.to_string() })?;
        self.roots.set(store, i, table_root as i64)
    }

    pub fn drop_table<S: NodeStore>(&mut self, store: &mut S, name: &str) -> Result<(), Error> {
        let i = self.find(store, name)?.ok_or_else(|| Error::NoSuchTable { name: name.to_string() })?;
        self.names.erase(store, i)?;
        self.roots.erase(store, i)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::tests_support::VecStore;

    #[test]
    fn create_find_and_drop_round_trip() {
        let mut store = VecStore::new();
        let mut g = GroupDir::empty(&mut store).unwrap();
        g.create_table(&mut store, "widgets", 42).unwrap();
        g.create_table(&mut store, "gadgets", 99).unwrap();
        assert_eq!(g.table_root(&store, "widgets").unwrap(), Some(42));
        assert_eq!(g.table_names(&store).unwrap(), vec!["widgets", "gadgets"]);

        g.drop_table(&mut store, "widgets").unwrap();
        assert_eq!(g.table_root(&store, "widgets").unwrap(), None);
        assert_eq!(g.table_root(&store, "gadgets").unwrap(), Some(99));
    }

    #[test]
    fn create_duplicate_table_errors() {
        let mut store = VecStore::new();
        let mut g = GroupDir::empty(&mut store).unwrap();
        g.create_table(&mut store, "t", 1).unwrap();
        assert!(matches!(
            g.create_table(&mut store, "t", 2),
            Err(Error::TableAlreadyExists { .. })
        ));
    }

    #[test]
    fn root_round_trips_through_store() {
        let mut store = VecStore::new();
        let mut g = GroupDir::empty(&mut store).unwrap();
        g.create_table(&mut store, "t", 7).unwrap();
        let r = g.root(&mut store).unwrap();
        let reloaded = GroupDir::from_root(&store, r).unwrap();
        assert_eq!(reloaded.table_root(&store, "t").unwrap(), Some(7));
    }
}
