//! The filesystem manager: the process-wide collection of attached volumes
//! and open file handles, and the dispatch layer that turns a path into a
//! locked `Volume` plus the directory-engine/FAT-engine calls that satisfy
//! one public operation.
//!
//! Volumes and handles are owned by fixed-size arrays here rather than
//! referenced by pointer from each other, so a handle carries only a `lun`
//! and an index -- never a borrow back into this struct.

pub mod boot_sector;
pub mod cache;
pub mod dir;
pub mod file;
pub mod find;
pub mod format;
pub mod path;
pub mod table;
pub mod types;
pub mod volume;

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::mutex::Mutex;
use crate::util::time::{Clock, DateTime};

pub use file::{FileHandle, OpenMode, SeekOrigin, HANDLE_CLOSED, HANDLE_OPEN};
pub use find::{FindIter, FindResult};
pub use types::FatType;
pub use volume::Volume;

pub const MAX_VOLUMES: usize = 4;
pub const MAX_HANDLES: usize = 16;

/// Summary returned by `get_volume_info`.
#[derive(Debug, Clone, Copy)]
pub struct VolumeInfo {
    pub fat_type: FatType,
    pub total_sectors: u64,
    pub free_sectors: u64,
}

/// File attribute query result.
pub type FileAttributes = u8;

pub struct Manager {
    volumes: [Mutex<Option<Volume>>; MAX_VOLUMES],
    handles: [FileHandle; MAX_HANDLES],
}

impl Manager {
    pub fn new() -> Self {
        Self {
            volumes: [
                Mutex::new(None),
                Mutex::new(None),
                Mutex::new(None),
                Mutex::new(None),
            ],
            handles: [FileHandle::closed(); MAX_HANDLES],
        }
    }

    /// Attaches the volume on `lun`, parsing its BPB. `verbose` is accepted
    /// for interface parity with the host monitor but does not otherwise
    /// change behavior (logging is unconditional via the `log` facade).
    pub fn init<D: BlockDevice>(&mut self, dev: &mut D, lun: u8, verbose: bool) -> Result<()> {
        let slot = self.volume_slot(lun)?;
        let vol = Volume::attach(dev, lun)?;
        if verbose {
            log::info!("attached lun {} as {:?}, {} clusters", lun, vol.fat_type, vol.cluster_count);
        }
        slot.cs(|v| *v = Some(vol));
        Ok(())
    }

    pub fn format<D: BlockDevice, C: Clock>(
        &mut self,
        dev: &mut D,
        lun: u8,
        cluster_size: u32,
        clock: &C,
    ) -> Result<()> {
        let vol = format::format(dev, lun, cluster_size, clock)?;
        let slot = self.volume_slot(lun)?;
        slot.cs(|v| *v = Some(vol));
        Ok(())
    }

    pub fn get_volume_info<D: BlockDevice>(&mut self, dev: &mut D, lun: u8) -> Result<VolumeInfo> {
        self.with_volume(lun, |vol| {
            let free = vol.count_free_clusters(dev)?;
            Ok(VolumeInfo {
                fat_type: vol.fat_type,
                total_sectors: vol.data_start + vol.cluster_count as u64 * vol.sectors_per_cluster as u64,
                free_sectors: free as u64 * vol.sectors_per_cluster as u64,
            })
        })
    }

    fn volume_slot(&mut self, lun: u8) -> Result<&mut Mutex<Option<Volume>>> {
        self.volumes.get_mut(lun as usize).ok_or(Error::PathNotFound)
    }

    /// Runs `f` with the mounted volume on `lun` locked for the duration --
    /// the per-volume binary semaphore the concurrency model calls for.
    fn with_volume<D: BlockDevice, R>(
        &mut self,
        lun: u8,
        f: impl FnOnce(&mut Volume) -> Result<R>,
    ) -> Result<R> {
        let slot = self.volumes.get(lun as usize).ok_or(Error::PathNotFound)?;
        slot.cs(|opt| match opt {
            Some(vol) => f(vol),
            None => Err(Error::DiskAccessError),
        })
    }

    /// Resolves `path` to (volume lun, containing directory's start
    /// cluster, leaf name), descending through every segment but the last.
    fn resolve_dir<D: BlockDevice>(&mut self, dev: &mut D, path: &str) -> Result<(u8, u32, heapless_leaf::Leaf)> {
        let parsed = path::parse(path)?;
        let (dir_part, leaf) = path::split_leaf(parsed.segments);
        let lun = parsed.lun;

        let dir_cluster = self.with_volume(lun, |vol| {
            let mut cluster = 0u32;
            for seg in path::segments(dir_part) {
                let entry = vol.find_entry(dev, cluster, seg)?.ok_or(Error::PathNotFound)?;
                if !entry.short.is_directory() {
                    return Err(Error::PathNotFound);
                }
                cluster = entry.short.first_cluster;
            }
            Ok(cluster)
        })?;

        Ok((lun, dir_cluster, heapless_leaf::Leaf::from_str(leaf)))
    }

    fn alloc_handle(&mut self) -> Result<usize> {
        self.handles
            .iter()
            .position(|h| !h.is_open())
            .ok_or(Error::InsufficientMemory)
    }

    pub fn open<D: BlockDevice>(&mut self, dev: &mut D, path: &str, mode: OpenMode) -> Result<usize> {
        let (lun, dir_cluster, leaf) = self.resolve_dir(dev, path)?;

        let (start_cluster, file_size, dir_entry) = self.with_volume(lun, |vol| {
            let entry = vol.find_entry(dev, dir_cluster, leaf.as_str())?.ok_or(Error::FileNotFound)?;
            if entry.short.is_directory() {
                return Err(Error::FileNotFound);
            }
            Ok((entry.short.first_cluster, entry.short.file_size, entry.short_slot))
        })?;

        let idx = self.alloc_handle()?;
        self.handles[idx] = FileHandle {
            opened: HANDLE_OPEN,
            lun,
            mode,
            start_cluster,
            current_cluster: start_cluster,
            prev_cluster: 0,
            file_pointer: 0,
            file_size,
            dir_entry,
            parent_dir_cluster: dir_cluster,
        };
        Ok(idx)
    }

    pub fn create<D: BlockDevice, C: Clock>(
        &mut self,
        dev: &mut D,
        path: &str,
        attrs: u8,
        clock: &C,
    ) -> Result<usize> {
        let (lun, dir_cluster, leaf) = self.resolve_dir(dev, path)?;
        let now = clock.now();

        let dir_entry = self.with_volume(lun, |vol| {
            if vol.fat_type == crate::fat::types::FatType::Fat12 {
                return Err(Error::InternalError);
            }

            if let Some(existing) = vol.find_entry(dev, dir_cluster, leaf.as_str())? {
                vol.erase_entry(dev, &existing)?;
            }

            write_new_entry(vol, dev, dir_cluster, leaf.as_str(), attrs, 0, 0, &now)
        })?;

        let idx = self.alloc_handle()?;
        self.handles[idx] = FileHandle {
            opened: HANDLE_OPEN,
            lun,
            mode: OpenMode::ReadWrite,
            start_cluster: 0,
            current_cluster: 0,
            prev_cluster: 0,
            file_pointer: 0,
            file_size: 0,
            dir_entry,
            parent_dir_cluster: dir_cluster,
        };
        Ok(idx)
    }

    pub fn create_directory<D: BlockDevice, C: Clock>(
        &mut self,
        dev: &mut D,
        path: &str,
        clock: &C,
    ) -> Result<()> {
        let (lun, dir_cluster, leaf) = self.resolve_dir(dev, path)?;
        let now = clock.now();

        self.with_volume(lun, |vol| {
            if vol.find_entry(dev, dir_cluster, leaf.as_str())?.is_some() {
                return Err(Error::AlreadyExists);
            }

            let new_cluster = vol.alloc_one(dev)?;
            if new_cluster == 0 {
                return Err(Error::DiskFull);
            }
            vol.set_entry(dev, new_cluster, vol.fat_type.eof_min())?;
            vol.zero_new_cluster(dev, new_cluster)?;

            let loc = write_new_entry(
                vol,
                dev,
                dir_cluster,
                leaf.as_str(),
                crate::fat::types::attr::DIRECTORY,
                new_cluster,
                0,
                &now,
            )?;
            let _ = loc;

            vol.write_dot_entries(dev, new_cluster, dir_cluster, &now)
        })
    }

    pub fn read<D: BlockDevice>(&mut self, dev: &mut D, handle: usize, buf: &mut [u8]) -> Result<u32> {
        let h = self.handles.get_mut(handle).ok_or(Error::InternalError)?;
        if !h.is_open() {
            return Err(Error::InternalError);
        }
        let lun = h.lun;
        let slot = self.volumes.get(lun as usize).ok_or(Error::PathNotFound)?;
        slot.cs(|opt| match opt {
            Some(vol) => h.read(vol, dev, buf),
            None => Err(Error::DiskAccessError),
        })
    }

    pub fn write<D: BlockDevice>(&mut self, dev: &mut D, handle: usize, buf: &[u8]) -> Result<u32> {
        let h = self.handles.get_mut(handle).ok_or(Error::InternalError)?;
        if !h.is_open() {
            return Err(Error::InternalError);
        }
        let lun = h.lun;
        let slot = self.volumes.get(lun as usize).ok_or(Error::PathNotFound)?;
        slot.cs(|opt| match opt {
            Some(vol) => h.write(vol, dev, buf),
            None => Err(Error::DiskAccessError),
        })
    }

    pub fn seek<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        handle: usize,
        offset: i64,
        origin: SeekOrigin,
    ) -> Result<u32> {
        let h = self.handles.get_mut(handle).ok_or(Error::InternalError)?;
        if !h.is_open() {
            return Err(Error::InternalError);
        }
        let lun = h.lun;
        let slot = self.volumes.get(lun as usize).ok_or(Error::PathNotFound)?;
        slot.cs(|opt| match opt {
            Some(vol) => h.seek(vol, dev, offset, origin),
            None => Err(Error::DiskAccessError),
        })
    }

    pub fn close<D: BlockDevice>(&mut self, dev: &mut D, handle: usize) -> Result<()> {
        let h = self.handles.get_mut(handle).ok_or(Error::InternalError)?;
        if !h.is_open() {
            return Err(Error::InternalError);
        }
        let lun = h.lun;
        let slot = self.volumes.get(lun as usize).ok_or(Error::PathNotFound)?;
        slot.cs(|opt| match opt {
            Some(vol) => h.close(vol, dev),
            None => Err(Error::DiskAccessError),
        })
    }

    pub fn get_file_size(&self, handle: usize) -> Result<u32> {
        let h = self.handles.get(handle).ok_or(Error::InternalError)?;
        if !h.is_open() {
            return Err(Error::InternalError);
        }
        Ok(h.file_size)
    }

    pub fn set_file_time<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        handle: usize,
        created: Option<DateTime>,
        accessed: Option<DateTime>,
        modified: Option<DateTime>,
    ) -> Result<()> {
        let h = self.handles.get(handle).ok_or(Error::InternalError)?;
        if !h.is_open() {
            return Err(Error::InternalError);
        }
        let (lun, loc) = (h.lun, h.dir_entry);

        self.with_volume(lun, |vol| vol.set_entry_times(dev, loc, created, accessed, modified))
    }

    pub fn get_file_attributes<D: BlockDevice>(&mut self, dev: &mut D, path: &str) -> Result<FileAttributes> {
        let (lun, dir_cluster, leaf) = self.resolve_dir(dev, path)?;
        self.with_volume(lun, |vol| {
            vol.find_entry(dev, dir_cluster, leaf.as_str())?
                .map(|e| e.short.attr)
                .ok_or(Error::FileNotFound)
        })
    }

    pub fn file_exists<D: BlockDevice>(&mut self, dev: &mut D, path: &str) -> bool {
        self.get_file_attributes(dev, path).is_ok()
    }

    pub fn delete_file<D: BlockDevice>(&mut self, dev: &mut D, path: &str) -> Result<()> {
        let (lun, dir_cluster, leaf) = self.resolve_dir(dev, path)?;
        self.with_volume(lun, |vol| {
            let entry = vol.find_entry(dev, dir_cluster, leaf.as_str())?.ok_or(Error::FileNotFound)?;
            if entry.short.first_cluster != 0 {
                let bytes_per_cluster = vol.bytes_per_cluster() as u64;
                let expected = (entry.short.file_size as u64 + bytes_per_cluster - 1) / bytes_per_cluster;
                vol.free_chain(dev, entry.short.first_cluster, Some(expected.max(1)))?;
            }
            vol.erase_entry(dev, &entry)?;
            vol.flush(dev);
            Ok(())
        })
    }

    pub fn find_first<D: BlockDevice>(&mut self, dev: &mut D, pattern: &str) -> Result<Option<(FindIter, FindResult)>> {
        let parsed = path::parse(pattern)?;
        let (dir_part, leaf_pattern) = path::split_leaf(parsed.segments);
        let lun = parsed.lun;

        let dir_cluster = self.with_volume(lun, |vol| {
            let mut cluster = 0u32;
            for seg in path::segments(dir_part) {
                let entry = vol.find_entry(dev, cluster, seg)?.ok_or(Error::PathNotFound)?;
                cluster = entry.short.first_cluster;
            }
            Ok(cluster)
        })?;

        self.with_volume(lun, |vol| vol.find_first(dev, dir_cluster, leaf_pattern))
    }

    pub fn find_next<D: BlockDevice>(&mut self, dev: &mut D, iter: &mut FindIter) -> Result<Option<FindResult>> {
        let lun = iter.lun;
        self.with_volume(lun, |vol| vol.find_next(dev, iter))
    }

    pub fn close_find(&mut self, iter: &mut FindIter) {
        iter.done = true;
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity owned leaf-name buffer (mirrors `dir::heapless_name`, but
/// sized for a path segment rather than a whole name chain).
mod heapless_leaf {
    pub struct Leaf {
        buf: [u8; 260],
        len: usize,
    }

    impl Leaf {
        pub fn from_str(s: &str) -> Self {
            let mut buf = [0u8; 260];
            let bytes = s.as_bytes();
            let len = bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            Self { buf, len }
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
        }
    }
}

/// Shared by `create` and `create_directory`: generates the 8.3 (and, if
/// needed, LFN) entry block for `leaf`, stamps the supplied timestamp into
/// every time field, and writes it via `find_free_slots`/`write_entry`.
fn write_new_entry<D: BlockDevice>(
    vol: &mut Volume,
    dev: &mut D,
    dir_cluster: u32,
    leaf: &str,
    attrs: u8,
    first_cluster: u32,
    file_size: u32,
    now: &DateTime,
) -> Result<dir::SlotLocation> {
    let (date, time) = crate::util::time::pack(*now);

    let mut short = dir::ShortEntry {
        name: [b' '; 8],
        ext: [b' '; 3],
        attr: attrs,
        crt_time_tenth: 0,
        crt_time: time,
        crt_date: date,
        lst_acc_date: date,
        wrt_time: time,
        wrt_date: date,
        first_cluster,
        file_size,
    };

    if path::is_83_filename(leaf) {
        let (name, ext) = path::pack_83(leaf);
        short.name = name;
        short.ext = ext;
        let at = vol.find_free_slots(dev, dir_cluster, 1)?;
        vol.write_entry(dev, dir_cluster, at, &[], &short)?;
        Ok(dir::SlotLocation { cluster: dir_cluster, index_in_dir: at.index_in_dir })
    } else {
        let (name, ext) = vol.generate_short_name(dev, dir_cluster, leaf)?;
        short.name = name;
        short.ext = ext;
        let checksum = short.lfn_checksum();
        let (slots, count) = dir::build_lfn_slots(leaf, checksum);
        let at = vol.find_free_slots(dev, dir_cluster, count as u32 + 1)?;
        vol.write_entry(dev, dir_cluster, at, &slots[..count], &short)?;
        Ok(dir::SlotLocation { cluster: dir_cluster, index_in_dir: at.index_in_dir + count as u32 })
    }
}
