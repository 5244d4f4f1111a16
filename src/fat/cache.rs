//! The single-sector FAT write-back cache.
//!
//! Every volume keeps exactly one FAT sector resident. Reading a different
//! sector flushes the dirty one first (to both FAT copies, if a mirror
//! exists); nothing else in the driver is allowed to write a FAT sector
//! directly.

use crate::block::{BlockDevice, Sector};
use crate::fat::types::NO_CACHED_SECTOR;

#[derive(Debug)]
pub struct FatCache {
    pub buf: Sector,
    pub cached_sector: u64,
    pub dirty: bool,
}

impl Default for FatCache {
    fn default() -> Self {
        Self { buf: Sector::default(), cached_sector: NO_CACHED_SECTOR, dirty: false }
    }
}

impl FatCache {
    /// Ensures `sector` is resident in `self.buf`, flushing a dirty cache
    /// first if it holds a different sector.
    pub fn load<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        lun: u8,
        first_fat_start: u64,
        second_fat_start: u64,
        sector: u64,
    ) -> bool {
        if self.cached_sector == sector {
            return true;
        }

        if !self.flush(dev, lun, first_fat_start, second_fat_start) {
            return false;
        }

        if !dev.read(lun, self.buf.as_mut_slice(), sector, 1) {
            return false;
        }

        self.cached_sector = sector;
        true
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Writes the cached sector back to both FAT copies, if it is dirty and
    /// a sector is actually cached. Always clears the dirty flag on success
    /// so a later retry is possible on failure (the spec calls this out
    /// explicitly: a write failure must leave the cache dirty).
    pub fn flush<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        lun: u8,
        first_fat_start: u64,
        second_fat_start: u64,
    ) -> bool {
        if !self.dirty || self.cached_sector == NO_CACHED_SECTOR {
            return true;
        }

        if !dev.write(lun, self.buf.as_slice(), self.cached_sector, 1) {
            return false;
        }

        if second_fat_start != 0 {
            let mirror = self.cached_sector - first_fat_start + second_fat_start;
            if !dev.write(lun, self.buf.as_slice(), mirror, 1) {
                return false;
            }
        }

        self.dirty = false;
        true
    }
}
