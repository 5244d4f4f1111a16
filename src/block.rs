//! The block device interface the driver is built on top of.
//!
//! This is the one collaborator the specification calls out as external:
//! sector I/O is assumed synchronous and is supplied by the host (an SD card
//! driver, a RAM disk, a file on a dev box, ...). The driver never talks to
//! hardware directly.

use generic_array::GenericArray;
use typenum::consts::U512;

pub const SECTOR_SIZE: usize = 512;

/// One 512-byte sector, stack-allocated so the driver stays `no_std`-friendly.
pub type Sector = GenericArray<u8, U512>;

/// Implemented by the host for each attached logical unit.
///
/// `lun` is an index chosen by the host (drive letter `A` = 0, `B` = 1, ...);
/// this trait multiplexes over it rather than handing out one object per
/// volume, matching the C-style `eDisk_Read(drv, buf, sector, count)` shape
/// this crate is meant to bind against.
pub trait BlockDevice {
    fn is_ready(&mut self, lun: u8) -> bool;

    /// Returns `(sector_count, bytes_per_sector)`. The driver requires
    /// `bytes_per_sector == 512`.
    fn get_capacity(&mut self, lun: u8) -> Option<(u64, u16)>;

    fn read(&mut self, lun: u8, buf: &mut [u8], sector: u64, count: u32) -> bool;

    fn write(&mut self, lun: u8, buf: &[u8], sector: u64, count: u32) -> bool;
}

/// Reads a byte range that may not be sector-aligned into `dst`, via
/// `scratch`.
pub fn read_partial_sector<D: BlockDevice>(
    dev: &mut D,
    lun: u8,
    sector: u64,
    scratch: &mut Sector,
    offset: usize,
    dst: &mut [u8],
) -> bool {
    debug_assert!(offset + dst.len() <= SECTOR_SIZE);

    if !dev.read(lun, scratch.as_mut_slice(), sector, 1) {
        return false;
    }
    dst.copy_from_slice(&scratch[offset..offset + dst.len()]);
    true
}

/// Writes a byte range that may not be sector-aligned from `src`, via
/// `scratch`. Aligned full-sector writes skip the pre-read: if `offset == 0`
/// and `src.len() == SECTOR_SIZE` there is nothing in the old sector worth
/// preserving.
pub fn write_partial_sector<D: BlockDevice>(
    dev: &mut D,
    lun: u8,
    sector: u64,
    scratch: &mut Sector,
    offset: usize,
    src: &[u8],
) -> bool {
    debug_assert!(offset + src.len() <= SECTOR_SIZE);

    if offset == 0 && src.len() == SECTOR_SIZE {
        return dev.write(lun, src, sector, 1);
    }

    if !dev.read(lun, scratch.as_mut_slice(), sector, 1) {
        return false;
    }
    scratch[offset..offset + src.len()].copy_from_slice(src);
    dev.write(lun, scratch.as_slice(), sector, 1)
}
