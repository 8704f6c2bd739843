//! The top reference (the C1/C5 boundary): a tiny array whose children are
//! the group root, the free-list's three tree roots, the file-format
//! version, and the logical file size — exactly the fields the file
//! header's active slot ultimately points at.

use arkdb_tree::array::Array;
use arkdb_tree::{NodeReader, NodeStore, Ref};

use crate::header::FORMAT_VERSION;
use crate::Error;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TopRef {
    pub group_root: Ref,
    pub freelist_offsets: Ref,
    pub freelist_sizes: Ref,
    pub freelist_versions: Ref,
    pub format_version: u16,
    pub logical_file_size: u64,
}

impl TopRef {
    pub fn empty() -> Self {
        Self {
            group_root: 0,
            freelist_offsets: 0,
            freelist_sizes: 0,
            freelist_versions: 0,
            format_version: FORMAT_VERSION,
            logical_file_size: 0,
        }
    }

    /// A brand new database, or one that has never committed, has no
    /// top-ref yet: `r == 0` reads back as an all-empty group and free-list.
    pub fn decode<R: NodeReader>(store: &R, r: Ref) -> Result<Self, Error> {
        if r == 0 {
            return Ok(Self::empty());
        }
        let a = Array::from_ref(r);
        Ok(Self {
            group_root: a.get_ref(store, 0)?,
            freelist_offsets: a.get_ref(store, 1)?,
            freelist_sizes: a.get_ref(store, 2)?,
            freelist_versions: a.get_ref(store, 3)?,
            format_version: a.get_ref(store, 4)? as u16,
            logical_file_size: a.get_ref(store, 5)?,
        })
    }

    pub fn encode<S: NodeStore>(&self, store: &mut S) -> Result<Ref, Error> {
        let values = [
            self.group_root,
            self.freelist_offsets,
            self.freelist_sizes,
            self.freelist_versions,
            self.format_version as u64,
            self.logical_file_size,
        ];
        Ok(Array::bulk_build_refs(store, &values, false, false)?.ref_())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::tests_support::VecStore;

    #[test]
    fn round_trips_through_a_store() {
        let mut store = VecStore::new();
        let top = TopRef {
            group_root: 8,
            freelist_offsets: 16,
            freelist_sizes: 24,
            freelist_versions: 32,
            format_version: FORMAT_VERSION,
            logical_file_size: 4096,
        };
        let r = top.encode(&mut store).unwrap();
        let back = TopRef::decode(&store, r).unwrap();
        assert_eq!(back.group_root, 8);
        assert_eq!(back.logical_file_size, 4096);
        assert_eq!(back.format_version, FORMAT_VERSION);
    }

    #[test]
    fn null_ref_is_an_empty_database() {
        let store = crate::slab::tests_support::VecStore::new();
        let top = TopRef::decode(&store, 0).unwrap();
        assert_eq!(top.group_root, 0);
        assert_eq!(top.logical_file_size, 0);
    }
}
