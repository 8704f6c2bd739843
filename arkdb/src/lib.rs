//! Embedded, file-backed, MVCC object database: storage and transaction
//! core.
//!
//! Five components compose the core, dependencies flowing downward:
//!
//! - **C1** file mapping & header ([`header`], [`storage`]) — the
//!   memory-mapped region and the two alternating top-references.
//! - **C2** slab allocator ([`slab`]) — translates [`arkdb_tree::Ref`]s to
//!   live pointers and manages free space.
//! - **C3/C4** array node and B+-tree of arrays — live in the sibling
//!   `arkdb-tree` crate, generic over the [`arkdb_tree::NodeStore`] trait so
//!   that crate has no knowledge of mmap, files, or locking.
//! - **C5** transaction manager ([`txn`]) — coordinates read snapshots and
//!   the single writer across processes, via a sidecar `.lock` file
//!   ([`lockfile`]).
//!
//! Layered on top of C1–C5, `column`/`table`/`group` implement the
//! column/table/group data model: a table is a named, same-length
//! collection of [`ColumnType::Int`] or [`ColumnType::Str`] columns, each
//! with an optional ordered secondary index, reachable from a group
//! directory at the root of every snapshot.

mod binary;
mod column;
mod daemon;
mod error;
mod freelist;
mod group;
mod header;
mod lockfile;
mod slab;
mod storage;
mod table;
mod topref;
mod txn;

pub use column::ColumnType;
pub use error::Error;
pub use table::{Table, Value};
pub use txn::{Database, DurabilityLevel, OpenOptions, ReadTransaction, WriteTransaction};
