//! The seam between the array/B+-tree layer (C3/C4) and the slab allocator
//! (C2). Everything in this crate reaches the backing bytes only through a
//! `NodeStore` implementation, so it has no idea whether those bytes live in
//! a memory-mapped file, an overflow slab, or (in tests) a plain `Vec`.

use crate::{Error, Ref};

/// Read-only access to committed nodes, as seen from one immutable snapshot.
pub trait NodeReader {
    /// Resolve a [`Ref`] to the bytes of the node it addresses (header
    /// included). Fails with [`Error::CorruptRef`] if the ref does not
    /// resolve to a live node under this snapshot.
    fn resolve(&self, r: Ref) -> Result<&[u8], Error>;
}

/// Mutable access used while building or modifying a tree. A `NodeStore` is
/// owned exclusively by one write transaction; every allocation it hands out
/// is invisible to readers until the transaction commits and flips the
/// top-reference.
pub trait NodeStore: NodeReader {
    /// Allocate a brand-new node with at least `capacity` bytes (header
    /// included, already rounded up to a multiple of 8), zero-initialized.
    /// Returns its [`Ref`] and a mutable view over the whole allocation.
    fn alloc(&mut self, capacity: usize) -> Result<(Ref, &mut [u8]), Error>;

    /// Grow (or shrink) the allocation backing `r` to at least `capacity`
    /// bytes, preserving its current contents. Implementations are free to
    /// move the node to a new [`Ref`] if the current allocation cannot be
    /// extended in place; the caller must use the returned `Ref` afterwards.
    /// The old `Ref` is implicitly freed.
    fn grow(&mut self, r: Ref, capacity: usize) -> Result<(Ref, &mut [u8]), Error>;

    /// Mutable access to an already-owned, not-yet-committed node, without
    /// reallocating it.
    fn resolve_mut(&mut self, r: Ref) -> Result<&mut [u8], Error>;

    /// Record that `r` is no longer referenced by the tree under
    /// construction. Per the lifecycle rules, the bytes are not actually
    /// reusable until every snapshot that could see them has been released;
    /// that gating is the allocator's responsibility, not this trait's.
    fn free(&mut self, r: Ref);

    /// Whether `r` was allocated or reallocated by this write transaction,
    /// as opposed to inherited, read-only, from the snapshot it began from.
    /// `resolve_mut` is only sound to call on a ref this returns `true` for
    /// — a node reachable from the committed snapshot may still be mapped
    /// into a live reader's view, and mutating it in place would corrupt
    /// that reader's read. Callers that hold a ref of unknown provenance
    /// must go through `grow` (or an equivalent copy-first path) instead.
    fn owns(&self, r: Ref) -> bool;
}
