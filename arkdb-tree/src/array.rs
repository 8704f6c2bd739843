//! The array node (C3): the universal bounded-width packed vector that forms
//! every leaf and interior node of every B+-tree in the database.
//!
//! An array node is a held [`Ref`] plus the 8-byte header and tightly packed
//! payload that live at that ref. Mutating operations always go through a
//! [`NodeStore`] and may move the node to a fresh `Ref` — the node itself is
//! immutable once committed, so every mutation is copy-on-write at the node
//! granularity, and the caller (the B+-tree layer) is responsible for
//! threading the new `Ref` back up the spine.
//!
//! Rather than shifting packed bits in place, mutating operations decode the
//! whole element list, apply the edit, recompute the minimal sufficient
//! width, and re-encode. Leaf and interior fan-out are capped (`L`/`N` in the
//! spec, both ~1000 by default), so this stays well within a single cache
//! line's worth of work and keeps the bit-packing logic in one place instead
//! of duplicated across every mutating operation.

use alloc::vec::Vec;

use crate::header::{NodeHeader, Width};
use crate::store::{NodeReader, NodeStore};
use crate::{Error, Ref};

/// A node identified by the [`Ref`] it currently lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Array {
    r: Ref,
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 0 {
        return 0;
    }
    if bits == 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

fn decode_raw(payload: &[u8], width: Width, i: usize) -> u64 {
    let bits = width.bits() as usize;
    if bits == 0 {
        return 0;
    }
    if bits < 8 {
        let per_byte = 8 / bits;
        let byte_idx = i / per_byte;
        let shift = (i % per_byte) * bits;
        let mask = (1u64 << bits) - 1;
        ((payload[byte_idx] as u64) >> shift) & mask
    } else {
        let bytes = bits / 8;
        let byte_idx = i * bytes;
        let mut buf = [0u8; 8];
        buf[..bytes].copy_from_slice(&payload[byte_idx..byte_idx + bytes]);
        u64::from_le_bytes(buf)
    }
}

fn encode_raw(payload: &mut [u8], width: Width, i: usize, v: u64) {
    let bits = width.bits() as usize;
    if bits == 0 {
        return;
    }
    if bits < 8 {
        let per_byte = 8 / bits;
        let byte_idx = i / per_byte;
        let shift = (i % per_byte) * bits;
        let mask = (1u64 << bits) - 1;
        let v = (v & mask) as u8;
        payload[byte_idx] &= !((mask as u8) << shift);
        payload[byte_idx] |= v << shift;
    } else {
        let bytes = bits / 8;
        let byte_idx = i * bytes;
        let b = v.to_le_bytes();
        payload[byte_idx..byte_idx + bytes].copy_from_slice(&b[..bytes]);
    }
}

impl Array {
    /// Wrap an already-live ref without validating it. Validation happens on
    /// first use, in [`Array::header`].
    pub fn from_ref(r: Ref) -> Self {
        Self { r }
    }

    pub fn ref_(&self) -> Ref {
        self.r
    }

    /// Allocate a new, empty array node.
    pub fn new_empty<S: NodeStore>(
        store: &mut S,
        has_refs: bool,
        is_interior: bool,
        context: bool,
    ) -> Result<Self, Error> {
        let (r, buf) = store.alloc(NodeHeader::SIZE)?;
        let header = NodeHeader {
            is_interior,
            width: Width::W0,
            has_refs,
            context,
            count: 0,
            capacity: buf.len() as u32,
        };
        buf[..NodeHeader::SIZE].copy_from_slice(&header.encode()?);
        Ok(Self { r })
    }

    pub fn header<R: NodeReader>(&self, store: &R) -> Result<NodeHeader, Error> {
        let bytes = store.resolve(self.r)?;
        NodeHeader::decode(bytes)
    }

    pub fn len<R: NodeReader>(&self, store: &R) -> Result<usize, Error> {
        Ok(self.header(store)?.count as usize)
    }

    pub fn is_empty<R: NodeReader>(&self, store: &R) -> Result<bool, Error> {
        Ok(self.len(store)? == 0)
    }

    pub fn is_interior<R: NodeReader>(&self, store: &R) -> Result<bool, Error> {
        Ok(self.header(store)?.is_interior)
    }

    pub fn has_refs<R: NodeReader>(&self, store: &R) -> Result<bool, Error> {
        Ok(self.header(store)?.has_refs)
    }

    pub fn context<R: NodeReader>(&self, store: &R) -> Result<bool, Error> {
        Ok(self.header(store)?.context)
    }

    fn checked_index(len: usize, i: usize) -> Result<(), Error> {
        if i >= len {
            return Err(Error::IndexOutOfRange { index: i, len });
        }
        Ok(())
    }

    /// Read a signed, sign-extended element.
    pub fn get<R: NodeReader>(&self, store: &R, i: usize) -> Result<i64, Error> {
        let header = self.header(store)?;
        Self::checked_index(header.count as usize, i)?;
        let bytes = store.resolve(self.r)?;
        let payload = &bytes[NodeHeader::SIZE..];
        let raw = decode_raw(payload, header.width, i);
        Ok(sign_extend(raw, header.width.bits()))
    }

    /// Read an unsigned element, for has-refs arrays whose payload holds
    /// child [`Ref`]s or row offsets rather than signed integers.
    pub fn get_ref<R: NodeReader>(&self, store: &R, i: usize) -> Result<Ref, Error> {
        let header = self.header(store)?;
        Self::checked_index(header.count as usize, i)?;
        let bytes = store.resolve(self.r)?;
        let payload = &bytes[NodeHeader::SIZE..];
        Ok(decode_raw(payload, header.width, i))
    }

    /// First index `i` in `0..len()` with `get(i) >= v`, or `len()` if none.
    pub fn lower_bound<R: NodeReader>(&self, store: &R, v: i64) -> Result<usize, Error> {
        let len = self.len(store)?;
        let mut lo = 0usize;
        let mut hi = len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(store, mid)? < v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// First index `i` in `0..len()` with `get(i) > v`, or `len()` if none.
    pub fn upper_bound<R: NodeReader>(&self, store: &R, v: i64) -> Result<usize, Error> {
        let len = self.len(store)?;
        let mut lo = 0usize;
        let mut hi = len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(store, mid)? <= v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Linear scan over `[begin, end)` for the first element equal to `v`.
    pub fn find_first<R: NodeReader>(
        &self,
        store: &R,
        v: i64,
        begin: usize,
        end: usize,
    ) -> Result<Option<usize>, Error> {
        let len = self.len(store)?;
        let end = end.min(len);
        for i in begin..end {
            if self.get(store, i)? == v {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Linear scan over `[begin, end)`, pushing every matching index to
    /// `sink`.
    pub fn find_all<R: NodeReader>(
        &self,
        store: &R,
        sink: &mut Vec<usize>,
        v: i64,
        begin: usize,
        end: usize,
    ) -> Result<(), Error> {
        let len = self.len(store)?;
        let end = end.min(len);
        for i in begin..end {
            if self.get(store, i)? == v {
                sink.push(i);
            }
        }
        Ok(())
    }

    fn read_all_raw<R: NodeReader>(&self, store: &R) -> Result<(NodeHeader, Vec<u64>), Error> {
        let header = self.header(store)?;
        let bytes = store.resolve(self.r)?;
        let payload = &bytes[NodeHeader::SIZE..];
        let n = header.count as usize;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let raw = decode_raw(payload, header.width, i);
            let v = if header.has_refs {
                raw
            } else {
                sign_extend(raw, header.width.bits()) as u64
            };
            out.push(v);
        }
        Ok((header, out))
    }

    /// Re-derive the minimal width for `values`, (re)allocate if necessary,
    /// and rewrite the whole node. `values` are pre-truncated two's
    /// complement patterns: full 64-bit signed values for non-ref arrays, raw
    /// unsigned refs otherwise.
    fn write_all_raw<S: NodeStore>(
        &mut self,
        store: &mut S,
        header: NodeHeader,
        values: &[u64],
    ) -> Result<(), Error> {
        let width = if header.has_refs {
            values
                .iter()
                .fold(Width::W0, |acc, &v| acc.max(Width::smallest_for_unsigned(v)))
        } else {
            values.iter().fold(Width::W0, |acc, &v| {
                acc.max(Width::smallest_for_signed(v as i64))
            })
        };
        let count = values.len() as u32;
        let needed = (NodeHeader::SIZE + width.payload_bytes(values.len())).div_ceil(8) * 8;

        // In-place rewrite is only sound when this ref was itself allocated
        // by the current write transaction. A ref inherited from the
        // snapshot the transaction began from may still be the live
        // backing of an older reader's view, even if it happens to have
        // slack capacity; such a node must always be copied forward
        // through `grow`, which frees the old ref (deferred until no
        // reader can see it) and hands back a fresh one.
        let (new_ref, buf) = if needed <= header.capacity as usize && store.owns(self.r) {
            (self.r, store.resolve_mut(self.r)?)
        } else {
            store.grow(self.r, needed)?
        };

        let new_header = NodeHeader {
            is_interior: header.is_interior,
            width,
            has_refs: header.has_refs,
            context: header.context,
            count,
            capacity: buf.len() as u32,
        };
        buf[..NodeHeader::SIZE].copy_from_slice(&new_header.encode()?);
        let payload = &mut buf[NodeHeader::SIZE..];
        payload.fill(0);
        for (i, &v) in values.iter().enumerate() {
            encode_raw(payload, width, i, v);
        }
        self.r = new_ref;
        Ok(())
    }

    pub fn set<S: NodeStore>(&mut self, store: &mut S, i: usize, v: i64) -> Result<(), Error> {
        let (header, mut values) = self.read_all_raw(store)?;
        Self::checked_index(values.len(), i)?;
        values[i] = v as u64;
        self.write_all_raw(store, header, &values)
    }

    pub fn set_ref<S: NodeStore>(&mut self, store: &mut S, i: usize, v: Ref) -> Result<(), Error> {
        let (header, mut values) = self.read_all_raw(store)?;
        Self::checked_index(values.len(), i)?;
        values[i] = v;
        self.write_all_raw(store, header, &values)
    }

    pub fn insert<S: NodeStore>(&mut self, store: &mut S, i: usize, v: i64) -> Result<(), Error> {
        let (header, mut values) = self.read_all_raw(store)?;
        if i > values.len() {
            return Err(Error::IndexOutOfRange { index: i, len: values.len() });
        }
        values.insert(i, v as u64);
        self.write_all_raw(store, header, &values)
    }

    pub fn insert_ref<S: NodeStore>(
        &mut self,
        store: &mut S,
        i: usize,
        v: Ref,
    ) -> Result<(), Error> {
        let (header, mut values) = self.read_all_raw(store)?;
        if i > values.len() {
            return Err(Error::IndexOutOfRange { index: i, len: values.len() });
        }
        values.insert(i, v);
        self.write_all_raw(store, header, &values)
    }

    pub fn erase<S: NodeStore>(&mut self, store: &mut S, i: usize) -> Result<(), Error> {
        let (header, mut values) = self.read_all_raw(store)?;
        Self::checked_index(values.len(), i)?;
        values.remove(i);
        self.write_all_raw(store, header, &values)
    }

    pub fn truncate<S: NodeStore>(&mut self, store: &mut S, n: usize) -> Result<(), Error> {
        let (header, mut values) = self.read_all_raw(store)?;
        if n >= values.len() {
            return Ok(());
        }
        values.truncate(n);
        self.write_all_raw(store, header, &values)
    }

    pub fn push<S: NodeStore>(&mut self, store: &mut S, v: i64) -> Result<(), Error> {
        let len = self.len(store)?;
        self.insert(store, len, v)
    }

    pub fn push_ref<S: NodeStore>(&mut self, store: &mut S, v: Ref) -> Result<(), Error> {
        let len = self.len(store)?;
        self.insert_ref(store, len, v)
    }

    /// Structural (byte-for-byte) copy into a freshly allocated node, used by
    /// copy-on-write when a node is shared with an older snapshot.
    pub fn clone_deep<S: NodeStore>(&self, store: &mut S) -> Result<Self, Error> {
        let bytes = store.resolve(self.r)?;
        let len = bytes.len();
        let mut copy = Vec::with_capacity(len);
        copy.extend_from_slice(bytes);
        let (r, buf) = store.alloc(len)?;
        buf[..len].copy_from_slice(&copy);
        Ok(Self { r })
    }

    /// Build a node directly from a full element list (bottom-up bulk load),
    /// skipping the incremental insert path.
    pub fn bulk_build_values<S: NodeStore>(
        store: &mut S,
        values: &[i64],
        is_interior: bool,
        context: bool,
    ) -> Result<Self, Error> {
        let mut a = Self::new_empty(store, false, is_interior, context)?;
        let header = a.header(store)?;
        let raw: Vec<u64> = values.iter().map(|&v| v as u64).collect();
        a.write_all_raw(store, header, &raw)?;
        Ok(a)
    }

    /// Like [`Array::bulk_build_values`] but for has-refs arrays (child
    /// pointers or cumulative offsets).
    pub fn bulk_build_refs<S: NodeStore>(
        store: &mut S,
        values: &[Ref],
        is_interior: bool,
        context: bool,
    ) -> Result<Self, Error> {
        let mut a = Self::new_empty(store, true, is_interior, context)?;
        let header = a.header(store)?;
        a.write_all_raw(store, header, values)?;
        Ok(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    /// A trivial byte-arena `NodeStore` for unit tests: every ref is just an
    /// index into a vector of owned allocations, offset by one so ref `0`
    /// stays reserved for the null subtree.
    struct TestStore {
        slots: Vec<Vec<u8>>,
    }

    impl TestStore {
        fn new() -> Self {
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

    #[test]
    fn get_after_set_round_trips_sign_extension() {
        let mut store = TestStore::new();
        let mut a = Array::new_empty(&mut store, false, false, false).unwrap();
        for v in [0i64, -1, 127, -128, 1_000_000, -1_000_000, i64::MIN, i64::MAX] {
            a.push(&mut store, v).unwrap();
        }
        let len = a.len(&store).unwrap();
        assert_eq!(len, 8);
        let expected = [0i64, -1, 127, -128, 1_000_000, -1_000_000, i64::MIN, i64::MAX];
        for (i, &v) in expected.iter().enumerate() {
            assert_eq!(a.get(&store, i).unwrap(), v);
        }
    }

    #[test]
    fn width_zero_is_all_zero_with_no_payload() {
        let mut store = TestStore::new();
        let mut a = Array::new_empty(&mut store, false, false, false).unwrap();
        for _ in 0..5 {
            a.push(&mut store, 0).unwrap();
        }
        let header = a.header(&store).unwrap();
        assert_eq!(header.width.bits(), 0);
        for i in 0..5 {
            assert_eq!(a.get(&store, i).unwrap(), 0);
        }
    }

    #[test]
    fn insert_then_erase_restores_values() {
        let mut store = TestStore::new();
        let mut a = Array::new_empty(&mut store, false, false, false).unwrap();
        for v in [10i64, 20, 30, 40] {
            a.push(&mut store, v).unwrap();
        }
        a.insert(&mut store, 2, 25).unwrap();
        assert_eq!(
            (0..5).map(|i| a.get(&store, i).unwrap()).collect::<Vec<_>>(),
            vec![10, 20, 25, 30, 40]
        );
        a.erase(&mut store, 2).unwrap();
        assert_eq!(
            (0..4).map(|i| a.get(&store, i).unwrap()).collect::<Vec<_>>(),
            vec![10, 20, 30, 40]
        );
    }

    #[test]
    fn bounds_on_sorted_array() {
        let mut store = TestStore::new();
        let a = Array::bulk_build_values(&mut store, &[1, 3, 3, 5, 7], false, false).unwrap();
        assert_eq!(a.lower_bound(&store, 3).unwrap(), 1);
        assert_eq!(a.upper_bound(&store, 3).unwrap(), 3);
        assert_eq!(a.lower_bound(&store, 8).unwrap(), 5);
        assert_eq!(a.upper_bound(&store, 0).unwrap(), 0);
    }

    #[test]
    fn find_first_and_find_all() {
        let mut store = TestStore::new();
        let a = Array::bulk_build_values(&mut store, &[4, 2, 4, 9, 4], false, false).unwrap();
        assert_eq!(a.find_first(&store, 4, 0, 5).unwrap(), Some(0));
        let mut sink = Vec::new();
        a.find_all(&store, &mut sink, 4, 0, 5).unwrap();
        assert_eq!(sink, vec![0, 2, 4]);
    }

    #[test]
    fn out_of_range_get_on_empty_array() {
        let mut store = TestStore::new();
        let a = Array::new_empty(&mut store, false, false, false).unwrap();
        assert_eq!(
            a.get(&store, 0),
            Err(Error::IndexOutOfRange { index: 0, len: 0 })
        );
    }
}
