//! The persistent free-list: three same-length B+-trees (offsets, sizes,
//! versions) reachable from the top reference, in the same parallel-trees
//! idiom the ordered index uses to pair values with row sets.
//!
//! The in-memory side of a write transaction never touches this directly —
//! it works with a flat `Vec<FreeEntry>` (see `slab::SlabAllocator`) and only
//! this module knows how to load that vector from, and rebuild it back into,
//! the three on-disk trees.

use arkdb_tree::btree::BTree;
use arkdb_tree::{NodeReader, NodeStore, Ref};

use crate::slab::FreeEntry;
use crate::Error;

pub(crate) struct PersistentFreeList {
    offsets: BTree,
    sizes: BTree,
    versions: BTree,
}

impl PersistentFreeList {
    pub fn new_empty<S: NodeStore>(store: &mut S) -> Result<Self, Error> {
        Ok(Self {
            offsets: BTree::new_empty(store)?,
            sizes: BTree::new_empty(store)?,
            versions: BTree::new_empty(store)?,
        })
    }

    pub fn from_roots(offsets: Ref, sizes: Ref, versions: Ref) -> Self {
        Self {
            offsets: BTree::from_root(offsets),
            sizes: BTree::from_root(sizes),
            versions: BTree::from_root(versions),
        }
    }

    pub fn roots(&self) -> (Ref, Ref, Ref) {
        (self.offsets.root(), self.sizes.root(), self.versions.root())
    }

    pub fn load_all<R: NodeReader>(&self, store: &R) -> Result<Vec<FreeEntry>, Error> {
        let len = self.offsets.len(store)?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let pos = self.offsets.get(store, i)? as u64;
            let size = self.sizes.get(store, i)? as u32;
            let version = self.versions.get(store, i)? as u64;
            out.push(FreeEntry { pos, size, version });
        }
        Ok(out)
    }

    /// Coalesce adjacent entries (merging takes the larger, more
    /// conservative version, since the merged region isn't free until every
    /// region that composes it is) and rebuild all three trees from scratch.
    pub fn rebuild<S: NodeStore>(store: &mut S, mut entries: Vec<FreeEntry>) -> Result<Self, Error> {
        entries.sort_by_key(|e| e.pos);
        let mut merged: Vec<FreeEntry> = Vec::with_capacity(entries.len());
        for e in entries {
            if let Some(last) = merged.last_mut() {
                if last.pos + last.size as u64 == e.pos {
                    last.size += e.size;
                    last.version = last.version.max(e.version);
                    continue;
                }
            }
            merged.push(e);
        }

        let offsets_vals: Vec<i64> = merged.iter().map(|e| e.pos as i64).collect();
        let sizes_vals: Vec<i64> = merged.iter().map(|e| e.size as i64).collect();
        let versions_vals: Vec<i64> = merged.iter().map(|e| e.version as i64).collect();

        let offsets = BTree::bulk_build(store, &offsets_vals)?;
        let sizes = BTree::bulk_build(store, &sizes_vals)?;
        let versions = BTree::bulk_build(store, &versions_vals)?;
        Ok(Self { offsets, sizes, versions })
    }
}
