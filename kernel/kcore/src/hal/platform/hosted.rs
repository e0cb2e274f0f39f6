//! Userspace platform: every OS thread is a process, and each thread can
//! bind itself to one of the `NCPU` virtual CPUs.

use crate::{
    hal::{Cpu, Scheduler},
    param::NCPU,
};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::{
    cell::Cell,
    sync::{Condvar, Mutex, PoisonError},
};

std::thread_local! {
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
    /// Depth of push_off() nesting.
    static INTERRUPT_DISABLE_LAYERS: Cell<usize> = const { Cell::new(0) };
    static PID: Cell<usize> = const { Cell::new(0) };
}

static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

/// Virtual CPUs backed by thread-local state.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostCpu;
impl HostCpu {
    /// Run the calling thread on CPU `id` from now on.
    pub fn set_current(id: usize) {
        if id >= NCPU {
            panic!("set_current: no cpu {}", id);
        }
        if HostCpu::depth() != 0 {
            panic!("set_current: interrupts off");
        }
        CPU_ID.with(|cpu| cpu.set(id));
    }
    /// Current push_off() nesting depth of the calling thread.
    pub fn depth() -> usize {
        INTERRUPT_DISABLE_LAYERS.with(Cell::get)
    }
}
impl Cpu for HostCpu {
    fn current_id(&self) -> usize {
        CPU_ID.with(Cell::get)
    }
    fn push_off(&self) {
        INTERRUPT_DISABLE_LAYERS.with(|layers| layers.set(layers.get() + 1));
    }
    fn pop_off(&self) {
        INTERRUPT_DISABLE_LAYERS.with(|layers| match layers.get() {
            0 => panic!("pop_off"),
            n => layers.set(n - 1),
        });
    }
}

/// Sleep and wakeup on top of a condition variable.
///
/// Channels are not tracked: `wakeup` rouses every sleeper and the ones
/// that were not meant to run go back to sleep after re-checking.
#[derive(Debug, Default)]
pub struct HostScheduler {
    gate: Mutex<()>,
    cond: Condvar,
    ticks: AtomicU32,
}
impl HostScheduler {
    pub const fn new() -> HostScheduler {
        HostScheduler {
            gate: Mutex::new(()),
            cond: Condvar::new(),
            ticks: AtomicU32::new(0),
        }
    }
    /// Advance the clock by one tick, returning the new value.
    pub fn tick(&self) -> u32 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }
}
impl Cpu for HostScheduler {
    fn current_id(&self) -> usize {
        HostCpu.current_id()
    }
    fn push_off(&self) {
        HostCpu.push_off()
    }
    fn pop_off(&self) {
        HostCpu.pop_off()
    }
}
impl Scheduler for HostScheduler {
    fn current_pid(&self) -> usize {
        PID.with(|pid| {
            if pid.get() == 0 {
                pid.set(NEXT_PID.fetch_add(1, Ordering::Relaxed));
            }
            pid.get()
        })
    }
    fn sleep(&self, _chan: usize, release: &mut dyn FnMut()) {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        release();
        let _gate = self
            .cond
            .wait(gate)
            .unwrap_or_else(PoisonError::into_inner);
    }
    fn wakeup(&self, _chan: usize) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
    fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }
}
