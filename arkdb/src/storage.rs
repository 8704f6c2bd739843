use std::fs::File;

use memmap2::{MmapMut, MmapOptions, MmapRaw, RemapOptions};

use crate::Error;

pub(crate) enum ExpandStorage {
    ReplaceLastMap(&'static mut [u8]),
    NewMap(&'static mut [u8]),
}

/// Tracks every memory map backing the database (there can be more than one,
/// since growth may add a map rather than replace one) and the optional
/// backing file. Readers keep their own snapshot of this via [`crate::slab::Mapping`];
/// only the writer and the commit path touch it directly.
pub(crate) struct StorageInner {
    maps: Vec<MmapRaw>,
    file: Option<File>,
}

impl StorageInner {
    pub fn init(map: MmapRaw, file: Option<File>) -> Self {
        Self { maps: vec![map], file }
    }

    /// Extract raw slices pointing at the memory maps with unbounded
    /// lifetimes.
    ///
    /// # Safety
    ///
    /// The caller must ensure the returned references don't outlive the
    /// memory maps, by dropping them before `self` is dropped and never
    /// presenting them as genuinely `'static` to code that doesn't uphold
    /// the same condition.
    pub unsafe fn get_maps(&self) -> Vec<&'static [u8]> {
        self.maps
            .iter()
            .map(|m| {
                let len = m.len();
                let ptr = m.as_ptr();
                std::slice::from_raw_parts(ptr, len)
            })
            .collect()
    }

    /// Grow the backing storage: extend the file and remap, or — for an
    /// anonymous map — grow in place if the platform allows it, else append
    /// a new map.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other code still dereferences a slice
    /// handed out by a previous call for the region being replaced, unless
    /// that region is the one returned as `ReplaceLastMap`.
    pub unsafe fn expand(&mut self, new_alloc: usize) -> Result<ExpandStorage, Error> {
        if let Some(file) = self.file.as_ref() {
            let current_size = file.metadata()?.len();
            file.set_len(current_size + new_alloc as u64)?;
            file.sync_all()?;

            #[cfg(target_os = "linux")]
            {
                let map = self.maps.last_mut().unwrap_unchecked();
                let new_size = map.len() + new_alloc;
                if map.remap(new_size, RemapOptions::new().may_move(false)).is_ok() {
                    let slice = std::slice::from_raw_parts_mut(map.as_mut_ptr(), map.len());
                    return Ok(ExpandStorage::ReplaceLastMap(slice));
                }
            }

            let map = MmapOptions::new().offset(current_size).len(new_alloc).map_raw(file)?;
            let ret = std::slice::from_raw_parts_mut(map.as_mut_ptr(), new_alloc);
            self.maps.push(map);
            Ok(ExpandStorage::NewMap(ret))
        } else {
            #[cfg(target_os = "linux")]
            {
                let map = self.maps.last_mut().unwrap_unchecked();
                let new_size = map.len() + new_alloc;
                if map.remap(new_size, RemapOptions::new().may_move(false)).is_ok() {
                    let slice = std::slice::from_raw_parts_mut(map.as_mut_ptr(), map.len());
                    return Ok(ExpandStorage::ReplaceLastMap(slice));
                }
            }

            let map = MmapRaw::from(MmapMut::map_anon(new_alloc)?);
            let ret = std::slice::from_raw_parts_mut(map.as_mut_ptr(), new_alloc);
            self.maps.push(map);
            Ok(ExpandStorage::NewMap(ret))
        }
    }

    /// Flush every map to disk. A no-op for anonymous maps.
    #[cfg(not(windows))]
    pub fn flush(&self) -> Result<(), Error> {
        if self.file.is_none() {
            return Ok(());
        }
        for map in self.maps.iter() {
            map.flush()?;
        }
        Ok(())
    }

    #[cfg(windows)]
    pub fn flush(&self) -> Result<(), Error> {
        if self.file.is_none() {
            return Ok(());
        }
        let (last, rest) = self.maps.split_last().expect("at least one map");
        for map in rest.iter() {
            map.flush_async()?;
        }
        last.flush()?;
        Ok(())
    }

    pub fn total_len(&self) -> usize {
        self.maps.iter().map(|m| m.len()).sum()
    }

    /// The first `HEADER_SIZE` bytes of the mapping, as a mutable slice with
    /// an unbounded lifetime.
    ///
    /// # Safety
    ///
    /// Only the writer, holding the cross-process writer mutex, may call
    /// this; the returned slice must not outlive the memory maps.
    pub unsafe fn header_slice_mut(&self) -> &'static mut [u8] {
        let first = &self.maps[0];
        let len = crate::header::HEADER_SIZE.min(first.len());
        std::slice::from_raw_parts_mut(first.as_mut_ptr(), len)
    }
}
