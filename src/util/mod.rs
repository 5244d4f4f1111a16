//! Small, self-contained helpers used across the driver.

pub mod bits;
pub mod wildcard;
pub mod time;

pub use bits::Bits;
