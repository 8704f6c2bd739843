//! The slab allocator (C2): translates [`Ref`]s to bytes and manages free
//! space on behalf of exactly one write transaction at a time.
//!
//! Every node is self-describing — its 8-byte header carries its own byte
//! capacity — so translation never needs a separate `ref -> size` table:
//! `resolve` peeks the header to learn how many bytes to hand back. This is
//! also what lets a freshly reopened database serve reads before any
//! allocation happens in the new process.
//!
//! New allocations are served, in order, from (a) a free-list entry carried
//! over from the snapshot this writer started from, filtered down to
//! entries already safe to reuse, then (b) a bump pointer into the mapped
//! file, growing the file (`ftruncate` + remap) when the bump pointer runs
//! past the current mapping. Growing the physical file early is safe even
//! though the transaction hasn't committed: readers only ever look at bytes
//! below the *logical* file size recorded in their snapshot's top-ref, and
//! that field doesn't move until the commit flips the header flag.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arkdb_tree::{Error as TreeError, NodeHeader, NodeReader, NodeStore, Ref};

use crate::header::HEADER_SIZE;
use crate::storage::{ExpandStorage, StorageInner};
use crate::Error;

/// A read-only view over the mapped file, usable from any thread holding a
/// snapshot. Resolving a ref never blocks and never touches `storage`.
#[derive(Clone)]
pub(crate) struct Mapping {
    maps: Vec<&'static [u8]>,
}

impl Mapping {
    pub fn new(maps: Vec<&'static [u8]>) -> Self {
        Self { maps }
    }

    fn locate(&self, r: u64) -> Option<(&[u8], u64)> {
        let mut base = 0u64;
        for m in &self.maps {
            let end = base + m.len() as u64;
            if r < end {
                return Some((m, base));
            }
            base = end;
        }
        None
    }

    pub fn total_len(&self) -> u64 {
        self.maps.iter().map(|m| m.len() as u64).sum()
    }

    /// The file header always lives at the very start of the first map.
    pub fn header_bytes(&self) -> &[u8] {
        let first = self.maps[0];
        &first[..HEADER_SIZE.min(first.len())]
    }

    fn resolve_bytes(&self, r: Ref) -> Result<&[u8], TreeError> {
        if r == 0 {
            return Err(TreeError::CorruptRef(r));
        }
        let (map, base) = self.locate(r).ok_or(TreeError::CorruptRef(r))?;
        let local = (r - base) as usize;
        let head = map.get(local..local + NodeHeader::SIZE).ok_or(TreeError::CorruptRef(r))?;
        let header = NodeHeader::decode(head)?;
        map.get(local..local + header.capacity as usize).ok_or(TreeError::CorruptRef(r))
    }
}

impl NodeReader for Mapping {
    fn resolve(&self, r: Ref) -> Result<&[u8], TreeError> {
        self.resolve_bytes(r)
    }
}

/// One free-list entry: a reclaimable byte range and the writer version that
/// freed it.
#[derive(Debug, Clone, Copy)]
pub struct FreeEntry {
    pub pos: u64,
    pub size: u32,
    pub version: u64,
}

/// The exclusive allocator view owned by one write transaction. Built from
/// the committed free-list (already filtered down to entries the manager
/// has determined are safe to reuse right now) and the current logical file
/// size.
pub(crate) struct SlabAllocator {
    mapping: Mapping,
    storage: Arc<Mutex<StorageInner>>,
    /// Entries available for immediate reuse this transaction, best-fit
    /// searched linearly (bounded by how many versions have accumulated
    /// since the last compaction, which stays small in practice).
    reusable: Vec<FreeEntry>,
    /// Bump pointer for new allocations once the reusable free-list is
    /// exhausted. Starts at the committed logical file size.
    next_offset: u64,
    /// Size of the last growth, for the geometric growth policy.
    last_growth: u64,
    /// Regions freed during this transaction, tagged with this writer's
    /// version, to be folded into the persistent free-list at commit.
    freed: Vec<(Ref, u32)>,
    writer_version: u64,
    max_size: Option<u64>,
    /// Refs this transaction itself has allocated or reallocated, as
    /// opposed to refs merely inherited (read-only) from the snapshot it
    /// began from. Only a ref in this set is safe to mutate in place —
    /// everything else may still be the live backing of an older reader's
    /// mapping.
    owned: HashSet<Ref>,
}

impl SlabAllocator {
    pub fn new(
        mapping: Mapping,
        storage: Arc<Mutex<StorageInner>>,
        reusable: Vec<FreeEntry>,
        logical_size: u64,
        writer_version: u64,
        max_size: Option<u64>,
    ) -> Self {
        Self {
            mapping,
            storage,
            reusable,
            next_offset: logical_size.max(HEADER_SIZE as u64),
            last_growth: 0,
            freed: Vec::new(),
            writer_version,
            max_size,
            owned: HashSet::new(),
        }
    }

    pub fn logical_size(&self) -> u64 {
        self.next_offset
    }

    /// The free-list delta accumulated this transaction, to be folded into
    /// the persistent free-list at commit.
    pub fn take_freed(&mut self) -> Vec<(Ref, u32, u64)> {
        std::mem::take(&mut self.freed)
            .into_iter()
            .map(|(r, size)| (r, size, self.writer_version))
            .collect()
    }

    /// Whatever reusable entries this transaction never consumed, handed
    /// back to the commit path so they're folded into the rebuilt
    /// persistent free-list rather than silently dropped.
    pub fn take_remaining_reusable(&mut self) -> Vec<FreeEntry> {
        std::mem::take(&mut self.reusable)
    }

    fn take_reusable(&mut self, size: usize) -> Option<FreeEntry> {
        let mut best: Option<usize> = None;
        for (i, e) in self.reusable.iter().enumerate() {
            if (e.size as usize) >= size && best.map(|b: usize| e.size < self.reusable[b].size).unwrap_or(true) {
                best = Some(i);
            }
        }
        best.map(|i| self.reusable.remove(i))
    }

    /// # Safety
    /// The caller must not retain the returned slice past the next call that
    /// could invalidate the mapping (an `expand`). `alloc`/`grow` internally
    /// uphold this by never handing out a slice into a map they're about to
    /// replace.
    unsafe fn mut_slice(&self, offset: u64, len: usize) -> Result<&'static mut [u8], TreeError> {
        let (map, base) = self.mapping.locate(offset).ok_or(TreeError::CorruptRef(offset))?;
        let local = (offset - base) as usize;
        let slice = map.get(local..local + len).ok_or(TreeError::CorruptRef(offset))?;
        let ptr = slice.as_ptr() as *mut u8;
        Ok(std::slice::from_raw_parts_mut(ptr, len))
    }

    fn ensure_capacity(&mut self, end: u64) -> Result<(), Error> {
        if end <= self.mapping.total_len() {
            return Ok(());
        }
        if let Some(max) = self.max_size {
            if end > max {
                return Err(Error::StorageFull { requested: (end - self.next_offset) as usize });
            }
        }
        let tail_waste = self.mapping.total_len() - self.next_offset.min(self.mapping.total_len());
        // Never let an allocation straddle two maps: abandon the tiny
        // remaining tail of the current map and grow enough to cover the
        // whole pending allocation from a fresh map boundary.
        self.next_offset += tail_waste;
        let needed = end - self.mapping.total_len();
        let growth = needed.max(self.last_growth.saturating_mul(2)).max(64 * 1024);
        let mut storage = self.storage.lock().expect("storage mutex poisoned");
        let expanded = unsafe { storage.expand(growth as usize)? };
        drop(storage);
        match expanded {
            ExpandStorage::ReplaceLastMap(slice) => {
                let last = self.mapping.maps.last_mut().expect("at least one map");
                *last = slice;
            }
            ExpandStorage::NewMap(slice) => {
                self.mapping.maps.push(slice);
            }
        }
        self.last_growth = growth;
        Ok(())
    }
}

impl NodeReader for SlabAllocator {
    fn resolve(&self, r: Ref) -> Result<&[u8], TreeError> {
        self.mapping.resolve_bytes(r)
    }
}

impl NodeStore for SlabAllocator {
    fn alloc(&mut self, capacity: usize) -> Result<(Ref, &mut [u8]), TreeError> {
        let capacity = capacity.div_ceil(8) * 8;
        if let Some(entry) = self.take_reusable(capacity) {
            self.owned.insert(entry.pos);
            let slice = unsafe { self.mut_slice(entry.pos, entry.size as usize) }?;
            slice.fill(0);
            return Ok((entry.pos, slice));
        }
        let pos = self.next_offset;
        self.ensure_capacity(pos + capacity as u64)
            .map_err(|_| TreeError::StorageFull)?;
        self.next_offset += capacity as u64;
        self.owned.insert(pos);
        let slice = unsafe { self.mut_slice(pos, capacity) }?;
        slice.fill(0);
        Ok((pos, slice))
    }

    fn grow(&mut self, r: Ref, capacity: usize) -> Result<(Ref, &mut [u8]), TreeError> {
        let old = self.resolve(r)?;
        let old_len = old.len();
        if capacity <= old_len && self.owned.contains(&r) {
            return Ok((r, unsafe { self.mut_slice(r, old_len) }?));
        }
        let copy = old.to_vec();
        self.free(r);
        let (new_ref, slice) = self.alloc(capacity.max(old_len))?;
        slice[..copy.len()].copy_from_slice(&copy);
        Ok((new_ref, slice))
    }

    fn resolve_mut(&mut self, r: Ref) -> Result<&mut [u8], TreeError> {
        let len = self.resolve(r)?.len();
        unsafe { self.mut_slice(r, len) }
    }

    fn owns(&self, r: Ref) -> bool {
        self.owned.contains(&r)
    }

    fn free(&mut self, r: Ref) {
        self.owned.remove(&r);
        if let Ok(bytes) = self.resolve(r) {
            if let Ok(header) = NodeHeader::decode(bytes) {
                self.freed.push((r, header.capacity));
            }
        }
    }
}

/// A minimal byte-arena `NodeStore`, shared by the unit tests of the
/// table/column/group layer so they don't need a real memory-mapped file.
/// Mirrors the `TestStore` the tree crate uses for the same purpose.
#[cfg(test)]
pub(crate) mod tests_support {
    use arkdb_tree::{Error as TreeError, NodeReader, NodeStore, Ref};

    pub(crate) struct VecStore {
        slots: Vec<Vec<u8>>,
    }

    impl VecStore {
        pub fn new() -> Self {
            Self { slots: Vec::new() }
        }
    }

    impl NodeReader for VecStore {
        fn resolve(&self, r: Ref) -> Result<&[u8], TreeError> {
            self.slots
                .get((r as usize).wrapping_sub(1))
                .map(|v| v.as_slice())
                .ok_or(TreeError::CorruptRef(r))
        }
    }

    impl NodeStore for VecStore {
        fn alloc(&mut self, capacity: usize) -> Result<(Ref, &mut [u8]), TreeError> {
            self.slots.push(vec![0u8; capacity]);
            let idx = self.slots.len();
            Ok((idx as u64, self.slots[idx - 1].as_mut_slice()))
        }

        fn grow(&mut self, r: Ref, capacity: usize) -> Result<(Ref, &mut [u8]), TreeError> {
            let idx = (r as usize).wrapping_sub(1);
            let slot = self.slots.get_mut(idx).ok_or(TreeError::CorruptRef(r))?;
            slot.resize(capacity, 0);
            Ok((r, slot.as_mut_slice()))
        }

        fn resolve_mut(&mut self, r: Ref) -> Result<&mut [u8], TreeError> {
            let idx = (r as usize).wrapping_sub(1);
            self.slots
                .get_mut(idx)
                .map(|v| v.as_mut_slice())
                .ok_or(TreeError::CorruptRef(r))
        }

        fn free(&mut self, _r: Ref) {}

        /// This arena only ever backs one throwaway transaction, so every
        /// ref it hands out is owned by it.
        fn owns(&self, _r: Ref) -> bool {
            true
        }
    }
}
