//! The transaction manager (C5): publishes read snapshots, arbitrates the
//! single writer, and drives the commit protocol described in the teacher's
//! own `FileHeader`/`SlabAllocator`/`LockFile` modules.
//!
//! A [`Database`] opened on a path coordinates with other processes through
//! a sidecar `.lock` file ([`crate::lockfile::LockFile`]); one opened
//! anonymously (no backing path) has no other process to coordinate with,
//! so it falls back to an in-process [`LocalCoordinator`] with the same
//! reader-ring/writer-mutex/commit-counter shape.

use std::fs::OpenOptions as FsOpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use memmap2::{MmapMut, MmapRaw};

use crate::column::ColumnType;
use crate::freelist::PersistentFreeList;
use crate::group::GroupDir;
use crate::header::{FileHeader, FORMAT_VERSION, HEADER_SIZE};
use crate::lockfile::{self, LockFile};
use crate::slab::{FreeEntry, Mapping, SlabAllocator};
use crate::storage::StorageInner;
use crate::table::{Table, Value};
use crate::topref::TopRef;
use crate::{daemon::CommitDaemon, Error};

/// How aggressively a commit pushes bytes to disk before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityLevel {
    /// `fsync` before the commit flip returns — the default, and the only
    /// mode that survives a host crash with no data loss.
    #[default]
    Full,
    /// Flip immediately; the OS page cache may still lose the write on a
    /// host crash (a process crash is still fully recoverable).
    MemOnly,
    /// Flip immediately and hand the version to a background daemon that
    /// fsyncs in commit order; [`Database::sync`] blocks until it catches up.
    Async,
}

/// Builder for opening a [`Database`], generalizing the teacher's
/// `OpenOptions` with the durability/size knobs this core adds.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    durability: DurabilityLevel,
    max_size: Option<u64>,
    initial_size: u64,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { durability: DurabilityLevel::Full, max_size: None, initial_size: 64 * 1024 }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durability(mut self, level: DurabilityLevel) -> Self {
        self.durability = level;
        self
    }

    /// Caps how large the logical file may grow; exceeding it surfaces
    /// `Error::StorageFull` from the allocator rather than growing forever.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Database, Error> {
        Database::open_with(self, path.as_ref())
    }

    pub fn open_anon(self) -> Result<Database, Error> {
        Database::open_anon_with(self)
    }
}

enum Coordinator {
    Shared(Mutex<LockFile>),
    Local(LocalCoordinator),
}

/// The in-process stand-in for the sidecar lock file, used by anonymous
/// databases that have no path for other processes to find.
struct LocalCoordinator {
    writer: Arc<(Mutex<bool>, Condvar)>,
    readers: Mutex<Vec<(u64, u32)>>,
    commit_counter: Mutex<u64>,
}

impl LocalCoordinator {
    fn new() -> Self {
        Self {
            writer: Arc::new((Mutex::new(false), Condvar::new())),
            readers: Mutex::new(Vec::new()),
            commit_counter: Mutex::new(0),
        }
    }
}

/// Holds whichever writer mutex was actually taken — the cross-process
/// `.lock` file's advisory lock, or the in-process condvar-backed one —
/// for the lifetime of a write transaction.
enum WriterToken {
    Shared(lockfile::WriterGuard),
    Local(LocalWriterGuard),
}

struct LocalWriterGuard {
    lock: Arc<(Mutex<bool>, Condvar)>,
}

impl Drop for LocalWriterGuard {
    fn drop(&mut self) {
        let (m, cvar) = &*self.lock;
        let mut held = m.lock().expect("writer mutex poisoned");
        *held = false;
        cvar.notify_one();
    }
}

impl Coordinator {
    fn register_reader(&self, version: u64) -> Result<(), Error> {
        match self {
            Coordinator::Shared(l) => l.lock().expect("lock file mutex poisoned").register_reader(version),
            Coordinator::Local(l) => {
                let mut readers = l.readers.lock().expect("reader list poisoned");
                if let Some(slot) = readers.iter_mut().find(|(v, _)| *v == version) {
                    slot.1 += 1;
                } else {
                    readers.push((version, 1));
                }
                Ok(())
            }
        }
    }

    fn release_reader(&self, version: u64) -> Result<(), Error> {
        match self {
            Coordinator::Shared(l) => l.lock().expect("lock file mutex poisoned").release_reader(version),
            Coordinator::Local(l) => {
                let mut readers = l.readers.lock().expect("reader list poisoned");
                if let Some(pos) = readers.iter().position(|(v, _)| *v == version) {
                    readers[pos].1 -= 1;
                    if readers[pos].1 == 0 {
                        readers.remove(pos);
                    }
                }
                Ok(())
            }
        }
    }

    fn commit_counter(&self) -> u64 {
        match self {
            Coordinator::Shared(l) => l.lock().expect("lock file mutex poisoned").commit_counter(),
            Coordinator::Local(l) => *l.commit_counter.lock().expect("commit counter poisoned"),
        }
    }

    fn min_live_version(&self) -> u64 {
        match self {
            Coordinator::Shared(l) => l.lock().expect("lock file mutex poisoned").min_live_version(),
            Coordinator::Local(l) => {
                let readers = l.readers.lock().expect("reader list poisoned");
                readers.iter().map(|(v, _)| *v).min().unwrap_or_else(|| self.commit_counter())
            }
        }
    }

    fn advance_commit_counter(&self) -> Result<u64, Error> {
        match self {
            Coordinator::Shared(l) => l.lock().expect("lock file mutex poisoned").advance_commit_counter(),
            Coordinator::Local(l) => {
                let mut c = l.commit_counter.lock().expect("commit counter poisoned");
                *c += 1;
                Ok(*c)
            }
        }
    }

    fn lock_writer(&self) -> Result<WriterToken, Error> {
        match self {
            Coordinator::Shared(l) => {
                Ok(WriterToken::Shared(l.lock().expect("lock file mutex poisoned").lock_writer()?))
            }
            Coordinator::Local(l) => {
                let (m, cvar) = &*l.writer;
                let mut held = m.lock().expect("writer mutex poisoned");
                while *held {
                    held = cvar.wait(held).expect("writer mutex poisoned");
                }
                *held = true;
                Ok(WriterToken::Local(LocalWriterGuard { lock: Arc::clone(&l.writer) }))
            }
        }
    }

    fn try_lock_writer(&self) -> Result<WriterToken, Error> {
        match self {
            Coordinator::Shared(l) => {
                Ok(WriterToken::Shared(l.lock().expect("lock file mutex poisoned").try_lock_writer()?))
            }
            Coordinator::Local(l) => {
                let (m, _) = &*l.writer;
                let mut held = m.lock().expect("writer mutex poisoned");
                if *held {
                    return Err(Error::WriteConflict);
                }
                *held = true;
                Ok(WriterToken::Local(LocalWriterGuard { lock: Arc::clone(&l.writer) }))
            }
        }
    }
}

/// An open database: the memory map, the cross-process (or in-process)
/// coordinator, and the optional async-commit daemon.
pub struct Database {
    storage: Arc<Mutex<StorageInner>>,
    coordinator: Arc<Coordinator>,
    durability: DurabilityLevel,
    max_size: Option<u64>,
    daemon: Option<Arc<CommitDaemon>>,
    _path: Option<PathBuf>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        OpenOptions::new().open(path)
    }

    pub fn open_anon() -> Result<Self, Error> {
        OpenOptions::new().open_anon()
    }

    fn open_with(opts: OpenOptions, path: &Path) -> Result<Self, Error> {
        let file = FsOpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        if is_new {
            file.set_len(opts.initial_size)?;
        }
        let map = MmapRaw::map_raw(&file)?;
        if is_new {
            let mut header = FileHeader::new_empty();
            let mut buf = [0u8; HEADER_SIZE];
            header.encode(&mut buf);
            unsafe {
                std::slice::from_raw_parts_mut(map.as_mut_ptr(), HEADER_SIZE).copy_from_slice(&buf);
            }
            map.flush()?;
        }
        let lock = LockFile::open(lock_path(path))?;
        Self::finish_open(
            opts,
            StorageInner::init(map, Some(file)),
            Coordinator::Shared(Mutex::new(lock)),
            Some(path.to_path_buf()),
        )
    }

    fn open_anon_with(opts: OpenOptions) -> Result<Self, Error> {
        let map = MmapRaw::from(MmapMut::map_anon(opts.initial_size as usize)?);
        let mut header = FileHeader::new_empty();
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        unsafe {
            std::slice::from_raw_parts_mut(map.as_mut_ptr(), HEADER_SIZE).copy_from_slice(&buf);
        }
        Self::finish_open(opts, StorageInner::init(map, None), Coordinator::Local(LocalCoordinator::new()), None)
    }

    fn finish_open(opts: OpenOptions, storage: StorageInner, coordinator: Coordinator, path: Option<PathBuf>) -> Result<Self, Error> {
        tracing::debug!(page_size = page_size::get(), durability = ?opts.durability, "opening database");
        let storage = Arc::new(Mutex::new(storage));
        let daemon = match opts.durability {
            DurabilityLevel::Async => Some(Arc::new(CommitDaemon::spawn(Arc::clone(&storage)))),
            _ => None,
        };
        Ok(Self {
            storage,
            coordinator: Arc::new(coordinator),
            durability: opts.durability,
            max_size: opts.max_size,
            daemon,
            _path: path,
        })
    }

    fn current_mapping_and_header(&self) -> Result<(Mapping, FileHeader), Error> {
        let guard = self.storage.lock().expect("storage mutex poisoned");
        let maps = unsafe { guard.get_maps() };
        drop(guard);
        let mapping = Mapping::new(maps);
        let header = FileHeader::decode(mapping.header_bytes())?;
        Ok((mapping, header))
    }

    pub fn begin_read(&self) -> Result<ReadTransaction, Error> {
        let (mapping, header) = self.current_mapping_and_header()?;
        let version = self.coordinator.commit_counter();
        self.coordinator.register_reader(version)?;
        let top = TopRef::decode(&mapping, header.active_top())?;
        Ok(ReadTransaction {
            storage: Arc::clone(&self.storage),
            coordinator: Arc::clone(&self.coordinator),
            mapping,
            version,
            top,
        })
    }

    pub fn begin_write(&self) -> Result<WriteTransaction, Error> {
        self.begin_write_inner(true)
    }

    pub fn try_begin_write(&self) -> Result<WriteTransaction, Error> {
        self.begin_write_inner(false)
    }

    fn begin_write_inner(&self, block: bool) -> Result<WriteTransaction, Error> {
        let writer_guard =
            if block { self.coordinator.lock_writer()? } else { self.coordinator.try_lock_writer()? };
        let (mapping, header) = self.current_mapping_and_header()?;
        let top = TopRef::decode(&mapping, header.active_top())?;
        let group = GroupDir::from_root(&mapping, top.group_root)?;
        let freelist = PersistentFreeList::from_roots(top.freelist_offsets, top.freelist_sizes, top.freelist_versions);
        let all_free = freelist.load_all(&mapping)?;
        let min_live = self.coordinator.min_live_version();
        let mut reusable = Vec::new();
        let mut retained = Vec::new();
        for entry in all_free {
            if entry.version <= min_live {
                reusable.push(entry);
            } else {
                retained.push(entry);
            }
        }
        let writer_version = self.coordinator.commit_counter() + 1;
        let allocator = SlabAllocator::new(
            mapping,
            Arc::clone(&self.storage),
            reusable,
            top.logical_file_size,
            writer_version,
            self.max_size,
        );
        Ok(WriteTransaction {
            storage: Arc::clone(&self.storage),
            coordinator: Arc::clone(&self.coordinator),
            daemon: self.daemon.clone(),
            durability: self.durability,
            writer_guard: Some(writer_guard),
            allocator,
            group,
            retained_free: retained,
            header,
        })
    }

    /// Block until `version` has been durably fsynced by the async-commit
    /// daemon. A no-op for `Full`/`MemOnly` databases, which already fsync
    /// (or deliberately don't) inline at commit time.
    pub fn sync(&self, version: u64) -> Result<(), Error> {
        match &self.daemon {
            Some(d) => d.wait_for(version),
            None => Ok(()),
        }
    }
}

/// An immutable view of the database as of the moment it was opened.
/// Readers never block and never see a partially committed state.
pub struct ReadTransaction {
    #[allow(dead_code)]
    storage: Arc<Mutex<StorageInner>>,
    coordinator: Arc<Coordinator>,
    mapping: Mapping,
    version: u64,
    top: TopRef,
}

impl ReadTransaction {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn open_table(&self, name: &str) -> Result<Table, Error> {
        let group = GroupDir::from_root(&self.mapping, self.top.group_root)?;
        let root = group.table_root(&self.mapping, name)?.ok_or_else(|| Error::NoSuchTable { name: name.to_string() })?;
        Table::open(&self.mapping, root)
    }

    pub fn table_names(&self) -> Result<Vec<String>, Error> {
        GroupDir::from_root(&self.mapping, self.top.group_root)?.table_names(&self.mapping)
    }

    pub fn get(&self, name: &str, row: usize, col: usize) -> Result<Value, Error> {
        self.open_table(name)?.get(&self.mapping, row, col)
    }

    pub fn sum_int(&self, name: &str, col: usize) -> Result<i64, Error> {
        self.open_table(name)?.sum_int(&self.mapping, col)
    }

    pub fn scan_int(&self, name: &str, col: usize) -> Result<Vec<i64>, Error> {
        self.open_table(name)?.scan_int(&self.mapping, col)
    }

    pub fn lower_bound_int(&self, name: &str, col: usize, value: i64) -> Result<usize, Error> {
        self.open_table(name)?.lower_bound_int(&self.mapping, col, value)
    }

    pub fn range_query(&self, name: &str, col: usize, low: i64, high: i64) -> Result<Vec<usize>, Error> {
        self.open_table(name)?.range_query(&self.mapping, col, low, high)
    }

    pub fn begins_with(&self, name: &str, col: usize, prefix: &str) -> Result<Vec<usize>, Error> {
        self.open_table(name)?.begins_with(&self.mapping, col, prefix)
    }

    pub fn find_row(&self, name: &str, col: usize, value: &Value) -> Result<Option<usize>, Error> {
        self.open_table(name)?.find_row(&self.mapping, col, value)
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        if let Err(e) = self.coordinator.release_reader(self.version) {
            tracing::warn!(version = self.version, error = %e, "failed to release reader slot");
        }
    }
}

/// The single in-flight write transaction, exclusively owned by the thread
/// that started it. Every mutating method takes `&mut self` and operates
/// directly against the writer's own `SlabAllocator`.
pub struct WriteTransaction {
    storage: Arc<Mutex<StorageInner>>,
    coordinator: Arc<Coordinator>,
    daemon: Option<Arc<CommitDaemon>>,
    durability: DurabilityLevel,
    writer_guard: Option<WriterToken>,
    allocator: SlabAllocator,
    group: GroupDir,
    /// Free-list entries from before this transaction that are not yet
    /// reusable (too-new `version`); carried through to the rebuilt
    /// free-list untouched.
    retained_free: Vec<FreeEntry>,
    header: FileHeader,
}

impl WriteTransaction {
    pub fn create_table(&mut self, name: &str, columns: &[(&str, ColumnType)]) -> Result<(), Error> {
        let names: Vec<&str> = columns.iter().map(|(n, _)| *n).collect();
        let types: Vec<ColumnType> = columns.iter().map(|(_, t)| *t).collect();
        let table = Table::create(&mut self.allocator, &names, &types)?;
        let root = table.write(&mut self.allocator)?;
        self.group.create_table(&mut self.allocator, name, root)
    }

    pub fn open_table(&self, name: &str) -> Result<Table, Error> {
        let root = self.group.table_root(&self.allocator, name)?.ok_or_else(|| Error::NoSuchTable { name: name.to_string() })?;
        Table::open(&self.allocator, root)
    }

    pub fn save_table(&mut self, name: &str, table: &Table) -> Result<(), Error> {
        let root = table.write(&mut self.allocator)?;
        self.group.set_table_root(&mut self.allocator, name, root)
    }

    /// Append a row to table `name` and persist the updated root. `Table`'s
    /// own mutating methods need a `NodeStore`, which only this transaction's
    /// allocator provides, so row-level mutation goes through the
    /// transaction rather than directly through a `Table` handle.
    pub fn append_row(&mut self, name: &str, values: &[Value]) -> Result<usize, Error> {
        let mut table = self.open_table(name)?;
        let row = table.append_row(&mut self.allocator, values)?;
        self.save_table(name, &table)?;
        Ok(row)
    }

    pub fn delete_row(&mut self, name: &str, row: usize) -> Result<(), Error> {
        let mut table = self.open_table(name)?;
        table.delete_row(&mut self.allocator, row)?;
        self.save_table(name, &table)
    }

    pub fn build_index(&mut self, name: &str, col: usize) -> Result<(), Error> {
        let mut table = self.open_table(name)?;
        table.build_index(&mut self.allocator, col)?;
        self.save_table(name, &table)
    }

    pub fn clear_table(&mut self, name: &str) -> Result<(), Error> {
        let mut table = self.open_table(name)?;
        table.clear(&mut self.allocator)?;
        self.save_table(name, &table)
    }

    pub fn get(&self, name: &str, row: usize, col: usize) -> Result<Value, Error> {
        self.open_table(name)?.get(&self.allocator, row, col)
    }

    pub fn sum_int(&self, name: &str, col: usize) -> Result<i64, Error> {
        self.open_table(name)?.sum_int(&self.allocator, col)
    }

    pub fn lower_bound_int(&self, name: &str, col: usize, value: i64) -> Result<usize, Error> {
        self.open_table(name)?.lower_bound_int(&self.allocator, col, value)
    }

    pub fn range_query(&self, name: &str, col: usize, low: i64, high: i64) -> Result<Vec<usize>, Error> {
        self.open_table(name)?.range_query(&self.allocator, col, low, high)
    }

    pub fn begins_with(&self, name: &str, col: usize, prefix: &str) -> Result<Vec<usize>, Error> {
        self.open_table(name)?.begins_with(&self.allocator, col, prefix)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), Error> {
        self.group.drop_table(&mut self.allocator, name)
    }

    pub fn table_names(&self) -> Result<Vec<String>, Error> {
        self.group.table_names(&self.allocator)
    }

    /// Run the seven-step commit protocol from the component design: fold
    /// the free-list, stage the new top-ref, fsync if `Full`, flip the
    /// header flag, hand off to the async daemon if `Async`, then bump the
    /// commit counter and release the writer mutex.
    pub fn commit(mut self) -> Result<u64, Error> {
        let group_root = self.group.root(&mut self.allocator)?;

        let mut entries = self.allocator.take_remaining_reusable();
        entries.extend(std::mem::take(&mut self.retained_free));
        entries.extend(
            self.allocator
                .take_freed()
                .into_iter()
                .map(|(pos, size, version)| FreeEntry { pos, size, version }),
        );
        let freelist = PersistentFreeList::rebuild(&mut self.allocator, entries)?;
        let (fo, fs, fv) = freelist.roots();

        let new_top = TopRef {
            group_root,
            freelist_offsets: fo,
            freelist_sizes: fs,
            freelist_versions: fv,
            format_version: FORMAT_VERSION,
            logical_file_size: self.allocator.logical_size(),
        };
        let top_ref = new_top.encode(&mut self.allocator)?;

        let storage = self.storage.lock().expect("storage mutex poisoned");
        let header_bytes = unsafe { storage.header_slice_mut() };
        self.header.stage(header_bytes, top_ref);
        if self.durability == DurabilityLevel::Full {
            storage.flush()?;
        }
        self.header.flip(header_bytes);
        if self.durability == DurabilityLevel::Full {
            storage.flush()?;
        }
        drop(storage);

        let new_version = self.coordinator.advance_commit_counter()?;
        if self.durability == DurabilityLevel::Async {
            if let Some(daemon) = &self.daemon {
                daemon.enqueue(new_version);
            }
        }
        tracing::info!(version = new_version, durability = ?self.durability, "committed write transaction");
        self.writer_guard.take();
        Ok(new_version)
    }

    /// Discard every change made in this transaction. Nothing on disk has
    /// changed; the allocator's in-memory deltas are simply dropped.
    pub fn rollback(self) {
        tracing::debug!("rolled back write transaction");
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(".lock");
    PathBuf::from(s)
}
