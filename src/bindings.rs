//! C bindings for this crate: a `BlockDevice` shim over an external
//! `eDisk_*` driver, plus a thin `#[no_mangle]` wrapper around `Manager`
//! for hosts that can't link the Rust API directly.
//!
//! The manager instance lives in a file-scope `static mut` rather than
//! behind `Box`: this crate has no global allocator story on the `no_std`
//! target this binding is meant for, so the C caller gets one fixed
//! instance instead of one per call.

use core::ffi::{c_char, CStr};

use crate::block::BlockDevice;
use crate::fat::{Manager, OpenMode, SeekOrigin};
use crate::util::time::EpochClock;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DResult {
    /// Successful
    ResOk = 0,
    /// R/W Error
    ResError = 1,
    /// Write Protected
    ResWrPrt = 2,
    /// Not Ready
    ResNotRdy = 3,
    /// Invalid Parameter
    ResParErr = 4,
}

extern "C" {
    fn eDisk_Status(drv: u8) -> DResult;
    fn eDisk_GetCapacity(drv: u8, sectors: *mut u64, bytes_per_sector: *mut u16) -> DResult;
    fn eDisk_Read(drv: u8, buff: *mut u8, sector: u32, count: u32) -> DResult;
    fn eDisk_Write(drv: u8, buff: *const u8, sector: u32, count: u32) -> DResult;
}

/// A `BlockDevice` that multiplexes over the `eDisk_*` FFI boundary the way
/// the driver's `lun` parameter already expects: one drive number per call,
/// no per-volume object on the Rust side.
pub struct EDiskStorage;

impl BlockDevice for EDiskStorage {
    fn is_ready(&mut self, lun: u8) -> bool {
        matches!(unsafe { eDisk_Status(lun) }, DResult::ResOk)
    }

    fn get_capacity(&mut self, lun: u8) -> Option<(u64, u16)> {
        let mut sectors: u64 = 0;
        let mut bytes_per_sector: u16 = 0;
        match unsafe { eDisk_GetCapacity(lun, &mut sectors, &mut bytes_per_sector) } {
            DResult::ResOk => Some((sectors, bytes_per_sector)),
            _ => None,
        }
    }

    fn read(&mut self, lun: u8, buf: &mut [u8], sector: u64, count: u32) -> bool {
        // `eDisk_Read` takes a 32-bit sector number; volumes bound to this
        // binding are assumed to fit within 2^32 sectors (2TiB at 512B).
        matches!(unsafe { eDisk_Read(lun, buf.as_mut_ptr(), sector as u32, count) }, DResult::ResOk)
    }

    fn write(&mut self, lun: u8, buf: &[u8], sector: u64, count: u32) -> bool {
        matches!(unsafe { eDisk_Write(lun, buf.as_ptr(), sector as u32, count) }, DResult::ResOk)
    }
}

static mut MANAGER: Option<Manager> = None;

fn manager() -> &'static mut Manager {
    unsafe { MANAGER.get_or_insert_with(Manager::new) }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiOpenMode {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
}

impl From<FfiOpenMode> for OpenMode {
    fn from(m: FfiOpenMode) -> Self {
        match m {
            FfiOpenMode::Read => OpenMode::Read,
            FfiOpenMode::Write => OpenMode::Write,
            FfiOpenMode::ReadWrite => OpenMode::ReadWrite,
        }
    }
}

unsafe fn path_from_c<'a>(path: *const c_char) -> Option<&'a str> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok()
}

#[no_mangle]
pub extern "C" fn fatfs_mount(lun: u8) -> DResult {
    let mut dev = EDiskStorage;
    match manager().init(&mut dev, lun, false) {
        Ok(()) => DResult::ResOk,
        Err(_) => DResult::ResError,
    }
}

#[no_mangle]
pub extern "C" fn fatfs_format(lun: u8, cluster_size: u32) -> DResult {
    let mut dev = EDiskStorage;
    match manager().format(&mut dev, lun, cluster_size, &EpochClock) {
        Ok(()) => DResult::ResOk,
        Err(_) => DResult::ResError,
    }
}

/// Returns a non-negative handle index on success, or -1 on failure.
#[no_mangle]
pub extern "C" fn fatfs_open(path: *const c_char, mode: FfiOpenMode) -> i32 {
    let path = match unsafe { path_from_c(path) } {
        Some(p) => p,
        None => return -1,
    };
    let mut dev = EDiskStorage;
    match manager().open(&mut dev, path, mode.into()) {
        Ok(idx) => idx as i32,
        Err(_) => -1,
    }
}

/// Returns a non-negative handle index on success, or -1 on failure.
#[no_mangle]
pub extern "C" fn fatfs_create(path: *const c_char) -> i32 {
    let path = match unsafe { path_from_c(path) } {
        Some(p) => p,
        None => return -1,
    };
    let mut dev = EDiskStorage;
    match manager().create(&mut dev, path, crate::fat::types::attr::ARCHIVE, &EpochClock) {
        Ok(idx) => idx as i32,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn fatfs_mkdir(path: *const c_char) -> DResult {
    let path = match unsafe { path_from_c(path) } {
        Some(p) => p,
        None => return DResult::ResParErr,
    };
    let mut dev = EDiskStorage;
    match manager().create_directory(&mut dev, path, &EpochClock) {
        Ok(()) => DResult::ResOk,
        Err(_) => DResult::ResError,
    }
}

/// Returns the number of bytes read, or -1 on failure.
#[no_mangle]
pub extern "C" fn fatfs_read(handle: usize, buf: *mut u8, len: u32) -> i32 {
    if buf.is_null() {
        return -1;
    }
    let mut dev = EDiskStorage;
    let slice = unsafe { core::slice::from_raw_parts_mut(buf, len as usize) };
    match manager().read(&mut dev, handle, slice) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

/// Returns the number of bytes written, or -1 on failure.
#[no_mangle]
pub extern "C" fn fatfs_write(handle: usize, buf: *const u8, len: u32) -> i32 {
    if buf.is_null() {
        return -1;
    }
    let mut dev = EDiskStorage;
    let slice = unsafe { core::slice::from_raw_parts(buf, len as usize) };
    match manager().write(&mut dev, handle, slice) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn fatfs_seek(handle: usize, offset: i64, origin: u8) -> i32 {
    let origin = match origin {
        0 => SeekOrigin::Begin,
        1 => SeekOrigin::Current,
        _ => SeekOrigin::End,
    };
    let mut dev = EDiskStorage;
    match manager().seek(&mut dev, handle, offset, origin) {
        Ok(pos) => pos as i32,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn fatfs_close(handle: usize) -> DResult {
    let mut dev = EDiskStorage;
    match manager().close(&mut dev, handle) {
        Ok(()) => DResult::ResOk,
        Err(_) => DResult::ResError,
    }
}

#[no_mangle]
pub extern "C" fn fatfs_delete(path: *const c_char) -> DResult {
    let path = match unsafe { path_from_c(path) } {
        Some(p) => p,
        None => return DResult::ResParErr,
    };
    let mut dev = EDiskStorage;
    match manager().delete_file(&mut dev, path) {
        Ok(()) => DResult::ResOk,
        Err(_) => DResult::ResError,
    }
}
