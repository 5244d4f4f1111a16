//! The FAT chain engine: next-cluster lookup, entry writes, allocation, and
//! the free-cluster scan. Everything here funnels through the volume's
//! single-sector [`FatCache`](super::cache::FatCache).

use core::convert::TryInto;

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::fat::types::{FatType, FIRST_DATA_CLUSTER};
use crate::fat::volume::Volume;

impl Volume {
    /// Byte offset of `cluster`'s entry within the FAT, and the sector that
    /// contains its first byte.
    fn entry_location(&self, cluster: u32) -> (u64, usize) {
        let byte_offset = match self.fat_type {
            FatType::Fat12 => (cluster as u64 * 3) / 2,
            FatType::Fat16 => cluster as u64 * 2,
            FatType::Fat32 => cluster as u64 * 4,
        };

        let sector = self.first_fat_start + byte_offset / self.bytes_per_sector as u64;
        let offset = (byte_offset % self.bytes_per_sector as u64) as usize;
        (sector, offset)
    }

    /// Looks up the next cluster in the chain after `current`.
    ///
    /// For FAT32, cluster 0 is a special case meaning "begin walking the
    /// root directory", which the spec asks us to translate to
    /// `root_cluster`.
    pub fn next_cluster<D: BlockDevice>(&mut self, dev: &mut D, current: u32) -> Result<(u32, bool)> {
        let current = if self.fat_type == FatType::Fat32 && current == 0 {
            self.root_cluster
        } else {
            current
        };

        match self.fat_type {
            FatType::Fat12 => self.next_cluster_fat12(dev, current),
            FatType::Fat16 => self.next_cluster_fixed_width(dev, current, 2),
            FatType::Fat32 => self.next_cluster_fixed_width(dev, current, 4),
        }
    }

    fn load_fat_sector<D: BlockDevice>(&mut self, dev: &mut D, sector: u64) -> Result<()> {
        if self.fat_cache.load(dev, self.lun, self.first_fat_start, self.second_fat_start, sector) {
            Ok(())
        } else {
            Err(Error::DiskAccessError)
        }
    }

    fn next_cluster_fixed_width<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        current: u32,
        width: usize,
    ) -> Result<(u32, bool)> {
        let (sector, offset) = self.entry_location(current);
        self.load_fat_sector(dev, sector)?;

        let raw = if width == 2 {
            u16::from_le_bytes(self.fat_cache.buf[offset..offset + 2].try_into().unwrap()) as u32
        } else {
            u32::from_le_bytes(self.fat_cache.buf[offset..offset + 4].try_into().unwrap()) & 0x0FFF_FFFF
        };

        Ok((raw, raw >= self.fat_type.eof_min()))
    }

    fn next_cluster_fat12<D: BlockDevice>(&mut self, dev: &mut D, current: u32) -> Result<(u32, bool)> {
        let (sector, offset) = self.entry_location(current);
        self.load_fat_sector(dev, sector)?;

        let lo = self.fat_cache.buf[offset];
        let hi = if offset + 1 < self.bytes_per_sector as usize {
            self.fat_cache.buf[offset + 1]
        } else {
            // The 12-bit entry straddles a sector boundary: flush, load the
            // next sector, and take the high byte from there.
            self.load_fat_sector(dev, sector + 1)?;
            self.fat_cache.buf[0]
        };

        let word = u16::from_le_bytes([lo, hi]);
        let raw = if current & 1 == 1 { word >> 4 } else { word & 0x0FFF } as u32;

        Ok((raw, raw >= self.fat_type.eof_min()))
    }

    /// Overwrites `current`'s entry with `new`, returning the previous value
    /// and whether that previous value was an EOF marker. FAT12 has no
    /// write support (the spec inherits this gap from the source driver).
    pub fn set_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        current: u32,
        new: u32,
    ) -> Result<(u32, bool)> {
        if self.fat_type == FatType::Fat12 {
            return Err(Error::InternalError);
        }

        let (sector, offset) = self.entry_location(current);
        self.load_fat_sector(dev, sector)?;

        let width = self.fat_type.bytes_per_entry() as usize;
        let old = if width == 2 {
            u16::from_le_bytes(self.fat_cache.buf[offset..offset + 2].try_into().unwrap()) as u32
        } else {
            u32::from_le_bytes(self.fat_cache.buf[offset..offset + 4].try_into().unwrap()) & 0x0FFF_FFFF
        };

        if width == 2 {
            self.fat_cache.buf[offset..offset + 2].copy_from_slice(&(new as u16).to_le_bytes());
        } else {
            // Preserve the top 4 reserved bits, per the FAT32 spec.
            let preserved = u32::from_le_bytes(self.fat_cache.buf[offset..offset + 4].try_into().unwrap())
                & 0xF000_0000;
            let packed = preserved | (new & 0x0FFF_FFFF);
            self.fat_cache.buf[offset..offset + 4].copy_from_slice(&packed.to_le_bytes());
        }
        self.fat_cache.mark_dirty();

        Ok((old, old >= self.fat_type.eof_min()))
    }

    /// Finds one free cluster via a linear scan starting at the allocation
    /// hint, wrapping once. Returns `0` on disk-full, matching the source's
    /// sentinel convention.
    pub fn alloc_one<D: BlockDevice>(&mut self, dev: &mut D) -> Result<u32> {
        let start = self
            .last_free_cluster
            .or(self.fs_info_free_hint)
            .unwrap_or(FIRST_DATA_CLUSTER)
            .max(FIRST_DATA_CLUSTER);

        let end = self.cluster_count + FIRST_DATA_CLUSTER;
        let scan_order = (start..end).chain(FIRST_DATA_CLUSTER..start);

        for candidate in scan_order {
            let (entry, _) = self.next_cluster_raw(dev, candidate)?;
            if entry == 0 {
                self.last_free_cluster = Some(candidate + 1);
                self.fs_info_dirty = true;
                return Ok(candidate);
            }
        }

        Ok(0)
    }

    /// Like `next_cluster` but never substitutes cluster 0 for the FAT32
    /// root; used by the free-cluster scanner, which walks raw entries.
    fn next_cluster_raw<D: BlockDevice>(&mut self, dev: &mut D, cluster: u32) -> Result<(u32, bool)> {
        match self.fat_type {
            FatType::Fat12 => self.next_cluster_fat12(dev, cluster),
            FatType::Fat16 => self.next_cluster_fixed_width(dev, cluster, 2),
            FatType::Fat32 => self.next_cluster_fixed_width(dev, cluster, 4),
        }
    }

    /// Allocates and links enough clusters to hold `size_bytes`, terminating
    /// the chain with an EOF marker. On a mid-allocation failure, the
    /// partial chain is left terminated rather than dangling.
    pub fn alloc_chain<D: BlockDevice>(&mut self, dev: &mut D, size_bytes: u64) -> Result<u32> {
        let bytes_per_cluster = self.bytes_per_cluster() as u64;
        let clusters_needed = if size_bytes == 0 {
            1
        } else {
            (size_bytes + bytes_per_cluster - 1) / bytes_per_cluster
        };

        let mut head = 0u32;
        let mut prev = 0u32;

        for _ in 0..clusters_needed {
            let new = self.alloc_one(dev)?;
            if new == 0 {
                if prev != 0 {
                    self.set_entry(dev, prev, self.fat_type.eof_min())?;
                }
                return Err(Error::DiskFull);
            }

            self.set_entry(dev, new, self.fat_type.eof_min())?;
            if prev == 0 {
                head = new;
            } else {
                self.set_entry(dev, prev, new)?;
            }
            prev = new;
        }

        Ok(head)
    }

    /// Appends one newly-allocated cluster after `last`, and marks it EOF.
    /// Used by writes that grow an existing file past its current chain.
    pub fn grow_chain<D: BlockDevice>(&mut self, dev: &mut D, last: u32) -> Result<u32> {
        let new = self.alloc_one(dev)?;
        if new == 0 {
            return Err(Error::DiskFull);
        }
        self.set_entry(dev, new, self.fat_type.eof_min())?;
        self.set_entry(dev, last, new)?;
        Ok(new)
    }

    /// Frees every cluster in the chain starting at `start`. `expected_clusters`,
    /// when given, is the chain length the file's size predicts; a chain that
    /// runs out (entry reads 0) before reaching it without ever having hit an
    /// EOF marker is broken -- a chain that simply ends exactly on schedule
    /// just freed its own tail, which is not corruption.
    pub fn free_chain<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        start: u32,
        expected_clusters: Option<u64>,
    ) -> Result<()> {
        let mut current = start;
        let mut freed = 0u64;
        while self.is_valid_cluster(current) {
            let (next, is_eof) = self.next_cluster_raw(dev, current)?;
            self.set_entry(dev, current, 0)?;
            freed += 1;
            if is_eof {
                break;
            }
            if next == 0 {
                if let Some(expected) = expected_clusters {
                    if freed < expected {
                        return Err(Error::FatBrokenError);
                    }
                }
                break;
            }
            current = next;
        }
        if let Some(hint) = self.last_free_cluster {
            if start < hint {
                self.last_free_cluster = Some(start);
            }
        } else {
            self.last_free_cluster = Some(start);
        }
        self.fs_info_dirty = true;
        Ok(())
    }

    /// Full scan of the FAT, refreshing `last_free_cluster` to the first
    /// free cluster found after a run of used ones (preserved from the
    /// source driver as the allocation-start hint).
    pub fn count_free_clusters<D: BlockDevice>(&mut self, dev: &mut D) -> Result<u32> {
        let mut free = 0u32;
        let mut prev_used = false;

        for cluster in FIRST_DATA_CLUSTER..(self.cluster_count + FIRST_DATA_CLUSTER) {
            let (entry, _) = self.next_cluster_raw(dev, cluster)?;
            if entry == 0 {
                free += 1;
                if prev_used {
                    self.last_free_cluster = Some(cluster);
                }
                prev_used = false;
            } else {
                prev_used = true;
            }
        }

        Ok(free)
    }

}
