//! Kernel memory plumbing: a hashed LRU disk block cache and a per-CPU
//! physical page allocator.
//!
//! The hardware the kernel runs on is reached through the traits in
//! [`hal`]. With the `hosted` feature (and under `cargo test`) threads
//! stand in for CPUs and a RAM disk stands in for the block device.

#![no_std]
#![allow(clippy::missing_safety_doc)]

#[cfg(any(test, feature = "hosted"))]
extern crate std;

pub mod arch;
pub mod hal;
pub mod io;
pub mod mem;
pub mod param;
pub mod sync;

pub use crate::{
    hal::{BlockDevice, Cpu, Scheduler},
    io::{
        bio::{BufGuard, BufferCache},
        buf::BlockId,
    },
    mem::kalloc::{KernelAllocator, KernelMemory},
};
