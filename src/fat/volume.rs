//! Volume recognition: turning a raw block device + LUN into a fully
//! resolved geometry (the "disk control block" in the spec's terms).

use crate::block::{BlockDevice, Sector, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::fat::boot_sector::{Bpb, FsInfo, MbrPartitionEntry};
use crate::fat::cache::FatCache;
use crate::fat::types::FatType;

/// One attached, mounted volume. Everything a FAT operation needs to touch a
/// sector on disk lives here; the mutable state (FAT cache, scratch buffer,
/// free-cluster hint) is implicitly protected by the manager's per-volume
/// lock, so this type itself does not need interior mutability.
#[derive(Debug)]
pub struct Volume {
    pub lun: u8,
    pub fat_type: FatType,

    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,

    /// Offset (in sectors) of this volume within the device; 0 if the whole
    /// device is the volume.
    pub volume_start: u64,

    pub first_fat_start: u64,
    pub second_fat_start: u64,
    pub sectors_per_fat: u32,

    /// FAT12/16 only: the fixed-size root directory region.
    pub root_dir_start: u64,
    pub root_dir_sectors: u32,

    /// FAT32 only: the root directory is an ordinary cluster chain.
    pub root_cluster: u32,

    pub data_start: u64,
    pub cluster_count: u32,

    /// FAT32 only: sector holding the FSInfo free-cluster hint.
    pub fs_info_sector: u64,
    pub fs_info_free_hint: Option<u32>,

    pub last_free_cluster: Option<u32>,
    /// Set whenever `last_free_cluster` changes; `flush` writes it back to
    /// the FSInfo sector (FAT32 only) and clears it.
    pub fs_info_dirty: bool,

    pub fat_cache: FatCache,
    pub scratch: Sector,
}

impl Volume {
    /// Mounts the volume on `lun`, validating capacity/sector-size and
    /// locating the BPB either at sector 0 or, if that isn't a FAT boot
    /// sector, via the first MBR partition entry.
    pub fn attach<D: BlockDevice>(dev: &mut D, lun: u8) -> Result<Self> {
        if !dev.is_ready(lun) {
            return Err(Error::DiskAccessError);
        }

        let (_sector_count, bytes_per_sector) =
            dev.get_capacity(lun).ok_or(Error::DiskAccessError)?;
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(Error::DiskAccessError);
        }

        let mut sector0 = Sector::default();
        if !dev.read(lun, sector0.as_mut_slice(), 0, 1) {
            return Err(Error::DiskAccessError);
        }

        let volume_start: u64 = if Bpb::is_boot_sector(sector0.as_slice()) {
            0
        } else {
            let entry = MbrPartitionEntry::read(sector0.as_slice());
            if entry.partition_type == 0 {
                return Err(Error::PathNotFound);
            }
            let start = entry.first_lba as u64;
            if !dev.read(lun, sector0.as_mut_slice(), start, 1) {
                return Err(Error::DiskAccessError);
            }
            start
        };

        Self::from_bpb(Bpb::read(sector0.as_slice()), lun, volume_start, dev)
    }

    fn from_bpb<D: BlockDevice>(bpb: Bpb, lun: u8, volume_start: u64, dev: &mut D) -> Result<Self> {
        let first_fat_start = volume_start + bpb.reserved_sectors as u64;
        let sectors_per_fat = bpb.sectors_per_fat();
        let second_fat_start = if bpb.num_fats >= 2 {
            first_fat_start + sectors_per_fat as u64
        } else {
            0
        };

        let root_dir_start = first_fat_start + (bpb.num_fats as u64) * (sectors_per_fat as u64);
        let root_dir_sectors = bpb.root_dir_sectors();

        let fat_type = bpb.fat_type();

        let (root_cluster, data_start) = if fat_type == FatType::Fat32 {
            let data_start = root_dir_start; // root dir sectors is 0 for FAT32
            (bpb.root_cluster, data_start)
        } else {
            (0, root_dir_start + root_dir_sectors as u64)
        };

        let mut fs_info_free_hint = None;
        let fs_info_sector = volume_start + 1;
        if fat_type == FatType::Fat32 && bpb.fs_info_sector != 0 {
            let mut fsinfo = Sector::default();
            if dev.read(lun, fsinfo.as_mut_slice(), fs_info_sector, 1) {
                if let Some(info) = FsInfo::read(fsinfo.as_slice()) {
                    if info.free_cluster_count != 0xFFFF_FFFF {
                        fs_info_free_hint = Some(info.free_cluster_count);
                    }
                }
            }
        }

        Ok(Self {
            lun,
            fat_type,
            bytes_per_sector: bpb.bytes_per_sector,
            sectors_per_cluster: bpb.sectors_per_cluster,
            volume_start,
            first_fat_start,
            second_fat_start,
            sectors_per_fat,
            root_dir_start,
            root_dir_sectors,
            root_cluster,
            data_start,
            cluster_count: bpb.cluster_count(),
            fs_info_sector,
            fs_info_free_hint,
            last_free_cluster: None,
            fs_info_dirty: false,
            fat_cache: FatCache::default(),
            scratch: Sector::default(),
        })
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Converts a data cluster number to its first sector.
    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        (cluster as u64 - 2) * self.sectors_per_cluster as u64 + self.data_start
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster < self.cluster_count + 2
    }

    pub fn flush<D: BlockDevice>(&mut self, dev: &mut D) -> bool {
        if self.fat_type == FatType::Fat32 && self.fs_info_dirty {
            if self.sync_fs_info(dev) {
                self.fs_info_dirty = false;
            }
        }
        self.fat_cache.flush(dev, self.lun, self.first_fat_start, self.second_fat_start)
    }

    fn sync_fs_info<D: BlockDevice>(&mut self, dev: &mut D) -> bool {
        let mut sector = Sector::default();
        if !dev.read(self.lun, sector.as_mut_slice(), self.fs_info_sector, 1) {
            return false;
        }
        let mut info = FsInfo::read(sector.as_slice()).unwrap_or(FsInfo {
            free_cluster_count: 0xFFFF_FFFF,
            next_free_cluster: 0xFFFF_FFFF,
        });
        info.next_free_cluster = self.last_free_cluster.unwrap_or(0xFFFF_FFFF);
        info.write(sector.as_mut_slice());
        dev.write(self.lun, sector.as_slice(), self.fs_info_sector, 1)
    }
}
