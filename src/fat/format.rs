//! Volume (re)formatting: builds a fresh FAT16 or FAT32 boot sector, zeroes
//! both FAT copies and the root directory region, and seeds the reserved
//! FAT entries.

use crate::block::{BlockDevice, Sector};
use crate::error::{Error, Result};
use crate::fat::types::FatType;
use crate::fat::volume::Volume;
use crate::util::time::Clock;

const FAT12_MAX_ENTRIES: u32 = FatType::FAT12_MAX_CLUSTERS;
const FAT16_MAX_ENTRIES: u32 = FatType::FAT16_MAX_CLUSTERS;

/// FAT32 default cluster-size scale, by total capacity.
fn default_sectors_per_cluster_fat32(total_sectors: u64) -> u8 {
    const SECTORS_PER_GIB: u64 = (1u64 << 30) / 512;
    if total_sectors <= 8 * SECTORS_PER_GIB {
        8
    } else if total_sectors <= 16 * SECTORS_PER_GIB {
        16
    } else if total_sectors <= 32 * SECTORS_PER_GIB {
        32
    } else {
        64
    }
}

/// FAT16 default cluster-size scale, by total capacity (8 MiB .. 2 GiB).
fn default_sectors_per_cluster_fat16(total_sectors: u64) -> u8 {
    if total_sectors < 65536 {
        1
    } else if total_sectors < 131072 {
        2
    } else if total_sectors < 262144 {
        4
    } else if total_sectors < 524288 {
        8
    } else if total_sectors < 1048576 {
        16
    } else if total_sectors < 2097152 {
        32
    } else {
        64
    }
}

fn zero_range<D: BlockDevice>(dev: &mut D, lun: u8, start: u64, count: u64) -> Result<()> {
    let zero = Sector::default();
    for i in 0..count {
        if !dev.write(lun, zero.as_slice(), start + i, 1) {
            return Err(Error::DiskAccessError);
        }
    }
    Ok(())
}

/// Formats the volume on `lun` as FAT32 if it would need more than
/// `FAT16_MAX_ENTRIES` clusters, else as FAT16. `cluster_size` in bytes, or
/// 0 to pick a capacity-scaled default. Re-mounts the volume afterward so
/// the in-memory geometry reflects what was just written.
pub fn format<D: BlockDevice, C: Clock>(
    dev: &mut D,
    lun: u8,
    cluster_size: u32,
    clock: &C,
) -> Result<Volume> {
    if !dev.is_ready(lun) {
        return Err(Error::DiskAccessError);
    }
    let (total_sectors, bytes_per_sector) = dev.get_capacity(lun).ok_or(Error::DiskAccessError)?;
    if bytes_per_sector as usize != crate::block::SECTOR_SIZE {
        return Err(Error::DiskAccessError);
    }

    match try_format_fat32(dev, lun, total_sectors, cluster_size, clock) {
        Ok(()) => {}
        Err(Error::DiskFull) => try_format_fat16(dev, lun, total_sectors, cluster_size, clock)?,
        Err(e) => return Err(e),
    }

    Volume::attach(dev, lun)
}

fn try_format_fat32<D: BlockDevice, C: Clock>(
    dev: &mut D,
    lun: u8,
    total_sectors: u64,
    cluster_size: u32,
    clock: &C,
) -> Result<()> {
    let sectors_per_cluster = if cluster_size != 0 {
        (cluster_size / crate::block::SECTOR_SIZE as u32) as u8
    } else {
        default_sectors_per_cluster_fat32(total_sectors)
    };

    let reserved_sectors: u32 = 32;
    let sectors_per_fat =
        (((total_sectors / sectors_per_cluster as u64) * 4 + 511) / 512) as u32;
    let fat_entries = (total_sectors as i64
        - reserved_sectors as i64
        - 2 * sectors_per_fat as i64)
        / sectors_per_cluster as i64;

    if fat_entries <= FAT16_MAX_ENTRIES as i64 {
        return Err(Error::DiskFull);
    }

    let first_fat_start = reserved_sectors as u64;
    let second_fat_start = first_fat_start + sectors_per_fat as u64;
    let root_cluster_sector = second_fat_start + sectors_per_fat as u64;

    let mut boot = Sector::default();
    write_common_bpb(&mut boot, sectors_per_cluster, reserved_sectors as u16, 2, 0, total_sectors);
    boot[0x024..0x028].copy_from_slice(&sectors_per_fat.to_le_bytes());
    boot[0x02C..0x030].copy_from_slice(&2u32.to_le_bytes()); // root_cluster
    boot[0x030..0x032].copy_from_slice(&1u16.to_le_bytes()); // fs_info_sector
    boot[0x032..0x034].copy_from_slice(&6u16.to_le_bytes()); // backup_boot_sector
    boot[0x042] = 0x29; // ext boot signature
    boot[0x047..0x052].copy_from_slice(b"NO NAME    ");
    boot[0x052..0x05A].copy_from_slice(b"FAT32   ");
    boot[0x1FE..0x200].copy_from_slice(&[0x55, 0xAA]);

    if !dev.write(lun, boot.as_slice(), 0, 1) {
        return Err(Error::DiskAccessError);
    }
    if !dev.write(lun, boot.as_slice(), 6, 1) {
        return Err(Error::DiskAccessError);
    }

    let mut fs_info = Sector::default();
    let free_clusters = fat_entries as u32 - 1; // cluster 2 (root) is used
    crate::fat::boot_sector::FsInfo { free_cluster_count: free_clusters, next_free_cluster: 3 }
        .write(fs_info.as_mut_slice());
    if !dev.write(lun, fs_info.as_slice(), 1, 1) || !dev.write(lun, fs_info.as_slice(), 7, 1) {
        return Err(Error::DiskAccessError);
    }

    zero_range(dev, lun, first_fat_start, sectors_per_fat as u64)?;
    zero_range(dev, lun, second_fat_start, sectors_per_fat as u64)?;
    zero_range(dev, lun, root_cluster_sector, sectors_per_cluster as u64)?;

    write_reserved_fat_entries(dev, lun, first_fat_start, second_fat_start, 0x0FFF_FFF8, true)?;

    let _ = clock;
    Ok(())
}

fn try_format_fat16<D: BlockDevice, C: Clock>(
    dev: &mut D,
    lun: u8,
    total_sectors: u64,
    cluster_size: u32,
    clock: &C,
) -> Result<()> {
    if total_sectors < 16384 {
        return Err(Error::DiskFull);
    }

    let sectors_per_cluster = if cluster_size != 0 {
        (cluster_size / crate::block::SECTOR_SIZE as u32) as u8
    } else {
        default_sectors_per_cluster_fat16(total_sectors)
    };

    let reserved_sectors: u32 = 1;
    let root_entries: u16 = 512;
    let root_dir_sectors = (root_entries as u32 * 32 + 511) / 512;
    let sectors_per_fat =
        (((total_sectors / sectors_per_cluster as u64) * 2 + 511) / 512) as u32;

    let fat_entries = (total_sectors as i64
        - reserved_sectors as i64
        - 2 * sectors_per_fat as i64
        - root_dir_sectors as i64)
        / sectors_per_cluster as i64;

    if fat_entries <= FAT12_MAX_ENTRIES as i64 {
        return Err(Error::DiskFull);
    }

    let first_fat_start = reserved_sectors as u64;
    let second_fat_start = first_fat_start + sectors_per_fat as u64;
    let root_dir_start = second_fat_start + sectors_per_fat as u64;

    let mut boot = Sector::default();
    write_common_bpb(&mut boot, sectors_per_cluster, reserved_sectors as u16, 2, root_entries, total_sectors);
    boot[0x016..0x018].copy_from_slice(&(sectors_per_fat as u16).to_le_bytes());
    boot[0x026] = 0x29; // ext boot signature (FAT12/16 layout)
    boot[0x02B..0x036].copy_from_slice(b"NO NAME    ");
    boot[0x036..0x03E].copy_from_slice(b"FAT16   ");
    boot[0x1FE..0x200].copy_from_slice(&[0x55, 0xAA]);

    if !dev.write(lun, boot.as_slice(), 0, 1) {
        return Err(Error::DiskAccessError);
    }

    zero_range(dev, lun, first_fat_start, sectors_per_fat as u64)?;
    zero_range(dev, lun, second_fat_start, sectors_per_fat as u64)?;
    zero_range(dev, lun, root_dir_start, root_dir_sectors as u64)?;

    write_reserved_fat_entries(dev, lun, first_fat_start, second_fat_start, 0xFFF8, false)?;

    let _ = clock;
    Ok(())
}

/// Fields shared between the FAT16 and FAT32 boot sector layout at their
/// common offsets.
fn write_common_bpb(
    boot: &mut Sector,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    root_entries: u16,
    total_sectors: u64,
) {
    boot[0x000] = 0xEB;
    boot[0x001] = 0x58;
    boot[0x002] = 0x90;
    boot[0x003..0x00B].copy_from_slice(b"FATDRV  ");
    boot[0x00B..0x00D].copy_from_slice(&(crate::block::SECTOR_SIZE as u16).to_le_bytes());
    boot[0x00D] = sectors_per_cluster;
    boot[0x00E..0x010].copy_from_slice(&reserved_sectors.to_le_bytes());
    boot[0x010] = num_fats;
    boot[0x011..0x013].copy_from_slice(&root_entries.to_le_bytes());
    if total_sectors <= 0xFFFF {
        boot[0x013..0x015].copy_from_slice(&(total_sectors as u16).to_le_bytes());
    } else {
        boot[0x020..0x024].copy_from_slice(&(total_sectors as u32).to_le_bytes());
    }
    boot[0x015] = if total_sectors != 0 { 0xF8 } else { 0xF0 };
}

/// Writes FAT entries 0 and 1 (media byte + all-ones padding) to both FAT
/// copies, and, for FAT32, entry 2 (the root cluster) as EOF.
fn write_reserved_fat_entries<D: BlockDevice>(
    dev: &mut D,
    lun: u8,
    first_fat_start: u64,
    second_fat_start: u64,
    eof_marker: u32,
    is_fat32: bool,
) -> Result<()> {
    let mut sector = Sector::default();
    if is_fat32 {
        sector[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
        sector[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        sector[8..12].copy_from_slice(&eof_marker.to_le_bytes());
    } else {
        sector[0..2].copy_from_slice(&0xFFF8u16.to_le_bytes());
        sector[2..4].copy_from_slice(&0xFFFFu16.to_le_bytes());
    }

    if !dev.write(lun, sector.as_slice(), first_fat_start, 1) {
        return Err(Error::DiskAccessError);
    }
    if second_fat_start != 0 && !dev.write(lun, sector.as_slice(), second_fat_start, 1) {
        return Err(Error::DiskAccessError);
    }
    Ok(())
}
