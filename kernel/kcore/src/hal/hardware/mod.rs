//! Device implementations.

#[cfg(any(test, feature = "hosted"))]
pub mod ramdisk;
