//! Services the core consumes from the rest of the kernel.
//!
//! The buffer cache and the page allocator never talk to hardware or to
//! the scheduler directly; they are written against these traits so the
//! same code runs on a real machine and on the hosted platform.

use crate::param::BSIZE;

pub mod hardware;
pub mod platform;

/// Per-CPU state and interrupt control.
pub trait Cpu: Sync {
    /// Index of the CPU running the caller, below `NCPU`.
    ///
    /// Only stable while interrupts are off (see `push_off`).
    fn current_id(&self) -> usize;
    /// Disable interrupts on this CPU. Nests: it takes as many
    /// `pop_off` calls to turn them back on.
    fn push_off(&self);
    fn pop_off(&self);
}

/// Process-level services.
pub trait Scheduler: Cpu {
    /// Identifier of the running process. Never 0.
    fn current_pid(&self) -> usize;
    /// Put the current process to sleep on `chan`.
    ///
    /// `release` is called exactly once, after the process is committed to
    /// sleeping, so a `wakeup(chan)` issued after it returns is never lost.
    /// May return spuriously; callers re-check their condition.
    fn sleep(&self, chan: usize, release: &mut dyn FnMut());
    /// Wake up all processes sleeping on `chan`.
    fn wakeup(&self, chan: usize);
    /// Timer tick counter.
    fn ticks(&self) -> u32;
}

/// Synchronous whole-block transfers.
pub trait BlockDevice: Sync {
    /// Read block `blockno` of device `dev` into `data`, or write `data` to
    /// it when `write` is set. Returns once the transfer is complete.
    fn transfer(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool);
}
