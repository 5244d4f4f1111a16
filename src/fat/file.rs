//! File handle state and the read/write/seek/close operations that walk a
//! cluster chain incrementally as the file position model requires.
//!
//! Handles don't hold a pointer back to their volume -- per the manager's
//! arena design, they carry only a `lun`, which the caller (the manager)
//! resolves to a `Volume` before calling any of these methods.

use crate::error::{Error, Result};
use crate::fat::dir::SlotLocation;
use crate::fat::volume::Volume;
use crate::block::BlockDevice;

pub const HANDLE_CLOSED: u8 = 0;
pub const HANDLE_OPEN: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SeekOrigin {
    Begin,
    Current,
    End,
}

/// One entry in the global, fixed-size open-file table.
#[derive(Debug, Clone, Copy)]
pub struct FileHandle {
    pub opened: u8,
    pub lun: u8,
    pub mode: OpenMode,

    pub start_cluster: u32,
    pub current_cluster: u32,
    pub prev_cluster: u32,

    pub file_pointer: u32,
    pub file_size: u32,

    /// Where this file's short entry lives, so `close` can write back an
    /// updated size/cluster. The parent directory's start cluster too, in
    /// case nothing else recorded it.
    pub dir_entry: SlotLocation,
    pub parent_dir_cluster: u32,
}

impl FileHandle {
    pub fn closed() -> Self {
        Self {
            opened: HANDLE_CLOSED,
            lun: 0,
            mode: OpenMode::Read,
            start_cluster: 0,
            current_cluster: 0,
            prev_cluster: 0,
            file_pointer: 0,
            file_size: 0,
            dir_entry: SlotLocation { cluster: 0, index_in_dir: 0 },
            parent_dir_cluster: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened == HANDLE_OPEN
    }

    /// Reads up to `buf.len()` bytes starting at the current file pointer,
    /// clamped to the remaining file size, returning the number of bytes
    /// actually read.
    pub fn read<D: BlockDevice>(&mut self, vol: &mut Volume, dev: &mut D, buf: &mut [u8]) -> Result<u32> {
        let remaining_in_file = self.file_size.saturating_sub(self.file_pointer);
        let want = (buf.len() as u32).min(remaining_in_file);

        let bytes_per_cluster = vol.bytes_per_cluster();
        let mut done = 0u32;

        while done < want {
            if self.current_cluster == 0 || !vol.is_valid_cluster(self.current_cluster) {
                // `want` was already clamped to the file's recorded size, so
                // running out of chain before it is satisfied means the FAT
                // chain is shorter than the directory entry claims.
                return Err(Error::FatBrokenError);
            }

            let offset_in_cluster = self.file_pointer % bytes_per_cluster;
            let this_iter = (want - done).min(bytes_per_cluster - offset_in_cluster);

            let sector_in_cluster = offset_in_cluster / vol.bytes_per_sector as u32;
            let offset_in_sector = offset_in_cluster % vol.bytes_per_sector as u32;
            let sector = vol.cluster_to_sector(self.current_cluster) + sector_in_cluster as u64;

            let dst = &mut buf[done as usize..(done + this_iter) as usize];
            if !crate::block::read_partial_sector(
                dev,
                self.lun,
                sector,
                &mut vol.scratch,
                offset_in_sector as usize,
                dst,
            ) {
                return Err(Error::DiskAccessError);
            }

            done += this_iter;
            self.file_pointer += this_iter;

            if self.file_pointer % bytes_per_cluster == 0 && done < want {
                self.prev_cluster = self.current_cluster;
                let (next, is_eof) = vol.next_cluster(dev, self.current_cluster)?;
                self.current_cluster = if is_eof { 0 } else { next };
            }
        }

        Ok(done)
    }

    /// Writes `buf`, allocating new clusters as needed, advancing the file
    /// pointer, and growing `file_size` if the write extends past it.
    pub fn write<D: BlockDevice>(&mut self, vol: &mut Volume, dev: &mut D, buf: &[u8]) -> Result<u32> {
        if !self.mode.writable() {
            return Err(Error::InternalError);
        }

        let bytes_per_cluster = vol.bytes_per_cluster();
        let want = buf.len() as u32;
        let mut done = 0u32;

        while done < want {
            if self.current_cluster == 0 || !vol.is_valid_cluster(self.current_cluster) {
                let new = vol.alloc_one(dev)?;
                if new == 0 {
                    return Err(Error::DiskFull);
                }
                vol.set_entry(dev, new, vol.fat_type.eof_min())?;

                if self.start_cluster == 0 {
                    self.start_cluster = new;
                } else {
                    vol.set_entry(dev, self.prev_cluster, new)?;
                }
                self.current_cluster = new;
            }

            let offset_in_cluster = self.file_pointer % bytes_per_cluster;
            let this_iter = (want - done).min(bytes_per_cluster - offset_in_cluster);

            let sector_in_cluster = offset_in_cluster / vol.bytes_per_sector as u32;
            let offset_in_sector = offset_in_cluster % vol.bytes_per_sector as u32;
            let sector = vol.cluster_to_sector(self.current_cluster) + sector_in_cluster as u64;

            let src = &buf[done as usize..(done + this_iter) as usize];
            if !crate::block::write_partial_sector(
                dev,
                self.lun,
                sector,
                &mut vol.scratch,
                offset_in_sector as usize,
                src,
            ) {
                return Err(Error::DiskAccessError);
            }

            done += this_iter;
            self.file_pointer += this_iter;
            self.file_size = self.file_size.max(self.file_pointer);

            if self.file_pointer % bytes_per_cluster == 0 && done < want {
                self.prev_cluster = self.current_cluster;
                let (next, is_eof) = vol.next_cluster(dev, self.current_cluster)?;
                self.current_cluster = if is_eof { 0 } else { next };
            }
        }

        Ok(done)
    }

    /// Computes the absolute target position for a seek, without yet
    /// performing the traversal.
    pub fn seek_target(&self, offset: i64, origin: SeekOrigin) -> Result<u32> {
        let base = match origin {
            SeekOrigin::Begin => 0i64,
            SeekOrigin::Current => self.file_pointer as i64,
            SeekOrigin::End => self.file_size as i64,
        };
        let target = base + offset;
        if target < 0 || target as u64 > self.file_size as u64 {
            return Err(Error::InternalError);
        }
        Ok(target as u32)
    }

    /// Seeks to `offset` relative to `origin`. If the destination lies in
    /// the cluster already resident, only the pointer moves; otherwise the
    /// chain is re-walked from `start_cluster`.
    pub fn seek<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
        offset: i64,
        origin: SeekOrigin,
    ) -> Result<u32> {
        let target = self.seek_target(offset, origin)?;
        let bytes_per_cluster = vol.bytes_per_cluster();

        let same_cluster = bytes_per_cluster != 0
            && self.current_cluster != 0
            && target / bytes_per_cluster == self.file_pointer / bytes_per_cluster;

        if same_cluster {
            self.file_pointer = target;
            return Ok(target);
        }

        let mut cluster = self.start_cluster;
        let mut prev = 0u32;
        let hops = if bytes_per_cluster == 0 { 0 } else { target / bytes_per_cluster };

        for _ in 0..hops {
            if cluster == 0 {
                break;
            }
            let (next, is_eof) = vol.next_cluster(dev, cluster)?;
            prev = cluster;
            cluster = if is_eof { 0 } else { next };
        }

        self.current_cluster = cluster;
        self.prev_cluster = prev;
        self.file_pointer = target;
        Ok(target)
    }

    /// Re-reads the owning directory entry's sector and rewrites the size
    /// and first-cluster fields if they've drifted, then flushes the FAT
    /// cache and (FAT32) the FSInfo free-cluster hint.
    pub fn close<D: BlockDevice>(&mut self, vol: &mut Volume, dev: &mut D) -> Result<()> {
        if self.mode.writable() {
            vol.update_dir_entry_size(dev, self.dir_entry, self.start_cluster, self.file_size)?;
        }

        if !vol.flush(dev) {
            return Err(Error::DiskAccessError);
        }

        self.opened = HANDLE_CLOSED;
        Ok(())
    }
}
