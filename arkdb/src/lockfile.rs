//! The sidecar `.lock` file (part of C5): the one shared mutable surface
//! between processes. Everything in it is a fixed-size, `bytemuck`-plain
//! struct memory-mapped by every participant, so no participant needs to
//! parse or grow it.
//!
//! Mutation of the reader ring is protected by `reader_mutex`; starting a
//! write transaction is protected by `writer_mutex`. Both are implemented as
//! whole-file advisory locks via `fs4`, not futexes inside the mapped bytes —
//! that keeps the fixed-size layout simple and gives us free, for-the-OS
//! stale-lock cleanup on process death, at the cost of the lock call itself
//! being a syscall rather than a few atomic instructions. The commit
//! counter and reader slots are plain fields, only ever touched while the
//! corresponding mutex is held.

use std::fs::File;
use std::io;
use std::path::Path;

use fs4::fs_std::FileExt;
use memmap2::MmapRaw;

use crate::Error;

pub const MAX_READERS: usize = 256;
const LOCK_MAGIC: u32 = 0x4152_4b44; // "ARKD"

#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ReaderSlot {
    pub version: u64,
    pub ref_count: u32,
    pub pid: u32,
}

/// The full fixed-size layout of the `.lock` file, mapped by every
/// participant.
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(C)]
pub struct LockFileLayout {
    magic: u32,
    _reserved: u32,
    /// Bumped whenever the data file is remapped to a new size.
    pub generation: u64,
    /// Monotonic, wraps only at 2^63.
    pub commit_counter: u64,
    pub min_live_version: u64,
    readers: [ReaderSlot; MAX_READERS],
}

/// A process's handle onto the shared lock file: the mapping plus the two
/// whole-file advisory locks layered over disjoint byte ranges of it.
pub struct LockFile {
    file: File,
    map: MmapRaw,
}

impl LockFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        let len = file.metadata()?.len();
        let needed = std::mem::size_of::<LockFileLayout>() as u64;
        if len < needed {
            file.set_len(needed)?;
        }
        let map = MmapRaw::map_raw(&file)?;
        let mut lf = Self { file, map };
        lf.with_layout_mut(|layout| {
            if layout.magic != LOCK_MAGIC {
                *layout = LockFileLayout::zeroed();
                layout.magic = LOCK_MAGIC;
            }
        });
        Ok(lf)
    }

    fn with_layout_mut<R>(&mut self, f: impl FnOnce(&mut LockFileLayout) -> R) -> R {
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.map.as_mut_ptr(), self.map.len()) };
        let layout: &mut LockFileLayout = bytemuck::from_bytes_mut(&mut bytes[..std::mem::size_of::<LockFileLayout>()]);
        f(layout)
    }

    fn with_layout<R>(&self, f: impl FnOnce(&LockFileLayout) -> R) -> R {
        let bytes = unsafe { std::slice::from_raw_parts(self.map.as_ptr(), self.map.len()) };
        let layout: &LockFileLayout = bytemuck::from_bytes(&bytes[..std::mem::size_of::<LockFileLayout>()]);
        f(layout)
    }

    /// Acquire the reader-ring mutex, run `f`, release it. Held only for the
    /// brief window it takes to register or release a reader slot.
    fn with_reader_lock<R>(&mut self, f: impl FnOnce(&mut LockFileLayout) -> R) -> io::Result<R> {
        FileExt::lock_exclusive(&self.file)?;
        let ret = self.with_layout_mut(f);
        FileExt::unlock(&self.file)?;
        Ok(ret)
    }

    pub fn commit_counter(&self) -> u64 {
        self.with_layout(|l| l.commit_counter)
    }

    pub fn min_live_version(&self) -> u64 {
        self.with_layout(|l| l.min_live_version)
    }

    pub fn generation(&self) -> u64 {
        self.with_layout(|l| l.generation)
    }

    pub fn bump_generation(&mut self) -> Result<(), Error> {
        self.with_reader_lock(|l| l.generation += 1)?;
        Ok(())
    }

    /// Register a new reader at `version`, reclaiming any slot whose PID is
    /// dead first. Returns `TooManyReaders` if the ring is full.
    pub fn register_reader(&mut self, version: u64) -> Result<(), Error> {
        let pid = std::process::id();
        self.with_reader_lock(|l| {
            for slot in l.readers.iter_mut() {
                if slot.ref_count > 0 && slot.version == version {
                    slot.ref_count += 1;
                    return Ok(());
                }
            }
            for slot in l.readers.iter_mut() {
                if slot.ref_count == 0 || !pid_alive(slot.pid) {
                    *slot = ReaderSlot { version, ref_count: 1, pid };
                    return Ok(());
                }
            }
            Err(Error::TooManyReaders)
        })?
    }

    /// Release one reference to the reader slot at `version`, reclaiming the
    /// slot and advancing `min_live_version` if it was the last one.
    pub fn release_reader(&mut self, version: u64) -> Result<(), Error> {
        self.with_reader_lock(|l| {
            for slot in l.readers.iter_mut() {
                if slot.ref_count > 0 && slot.version == version {
                    slot.ref_count -= 1;
                    if slot.ref_count == 0 {
                        *slot = ReaderSlot::zeroed();
                    }
                    break;
                }
            }
            let min = l
                .readers
                .iter()
                .filter(|s| s.ref_count > 0)
                .map(|s| s.version)
                .min();
            if let Some(min) = min {
                l.min_live_version = min;
            } else {
                l.min_live_version = l.commit_counter;
            }
        })?;
        Ok(())
    }

    /// Block until the writer mutex is free, and hold it until the returned
    /// guard is dropped.
    ///
    /// The lock is taken on a cloned file descriptor (advisory locks are
    /// scoped to the open file description, which a clone shares) so the
    /// guard can outlive any transient borrow of this `LockFile` — a write
    /// transaction holds it for its whole lifetime, long after whatever
    /// briefly borrowed `&self` to start it has gone away.
    pub fn lock_writer(&self) -> Result<WriterGuard, Error> {
        let file = self.file.try_clone()?;
        file.lock_exclusive()?;
        Ok(WriterGuard { file })
    }

    /// Try to take the writer mutex without blocking, failing with
    /// `WriteConflict` if it's already held.
    pub fn try_lock_writer(&self) -> Result<WriterGuard, Error> {
        let file = self.file.try_clone()?;
        if !file.try_lock_exclusive()? {
            return Err(Error::WriteConflict);
        }
        Ok(WriterGuard { file })
    }

    pub fn advance_commit_counter(&mut self) -> Result<u64, Error> {
        self.with_reader_lock(|l| {
            l.commit_counter = l.commit_counter.wrapping_add(1) & ((1 << 63) - 1);
            l.commit_counter
        })
    }
}

/// Holds the cross-process writer mutex for the lifetime of a write
/// transaction. Released on drop, which is how a crashed writer's lock is
/// freed — the OS releases advisory locks when the holding process exits.
pub struct WriterGuard {
    file: File,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // A zero-signal kill probes liveness without sending a real signal.
    unsafe { libc_kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Non-Unix platforms have no portable zero-signal probe here; treat
    // every slot as potentially live and rely on ref-count reclamation.
    true
}

#[cfg(unix)]
extern "C" {
    #[link_name = "kill"]
    fn libc_kill(pid: i32, sig: i32) -> i32;
}
