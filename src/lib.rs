// Mark the crate as no_std if the feature is enabled (and only)
#![cfg_attr(all(feature = "no_std", not(test)), no_std)]

#[allow(unused_extern_crates)]
extern crate core; // makes rls actually look into the standard library (hack)

// Gotta do this since we're a staticlib:
// (it'd be nicer to be able to use `panic_halt` or its ilk, but alas)

#[cfg_attr(target_os = "none", panic_handler)]
#[cfg(target_os = "none")]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

pub mod block;
pub mod error;
pub mod fat;
pub mod mutex;
pub mod util;

#[cfg(feature = "bindings")]
pub mod bindings;

pub use error::{Error, Result};
pub use fat::{FatType, FileHandle, FindIter, FindResult, Manager, OpenMode, SeekOrigin};
