use super::spinmutex::SpinMutex;
use crate::hal::Scheduler;
use core::ptr::addr_of;

struct SleeplockState {
    locked: bool,
    /// Process holding the lock.
    pid: usize,
}

/// Long-term lock for processes.
///
/// Waiting for a sleeplock gives the CPU away instead of spinning, so it
/// may be held across disk I/O.
pub struct Sleeplock {
    state: SpinMutex<SleeplockState>,
}
impl Sleeplock {
    pub const fn new() -> Sleeplock {
        Sleeplock {
            state: SpinMutex::new(SleeplockState {
                locked: false,
                pid: 0,
            }),
        }
    }
    fn chan(&self) -> usize {
        addr_of!(*self) as usize
    }
    pub fn lock_unguarded<S: Scheduler + ?Sized>(&self, scheduler: &S) {
        let mut state = self.state.lock(scheduler);
        while state.locked {
            // Put the process to sleep until it gets released.
            state.sleep(self.chan(), scheduler);
        }
        state.locked = true;
        state.pid = scheduler.current_pid();
    }
    pub fn unlock<S: Scheduler + ?Sized>(&self, scheduler: &S) {
        let mut state = self.state.lock(scheduler);
        state.locked = false;
        state.pid = 0;
        scheduler.wakeup(self.chan());
    }
    /// Is the lock held by the current process?
    pub fn held_by_current<S: Scheduler + ?Sized>(&self, scheduler: &S) -> bool {
        let state = self.state.lock(scheduler);
        state.locked && state.pid == scheduler.current_pid()
    }
}
impl Default for Sleeplock {
    fn default() -> Sleeplock {
        Sleeplock::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::platform::hosted::HostScheduler;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn tracks_holder() {
        let sched = HostScheduler::new();
        let lock = Sleeplock::new();
        assert!(!lock.held_by_current(&sched));
        lock.lock_unguarded(&sched);
        assert!(lock.held_by_current(&sched));
        thread::scope(|s| {
            s.spawn(|| assert!(!lock.held_by_current(&sched)));
        });
        lock.unlock(&sched);
        assert!(!lock.held_by_current(&sched));
    }

    #[test]
    fn waiter_sleeps_until_release() {
        let sched = HostScheduler::new();
        let lock = Sleeplock::new();
        let released = AtomicBool::new(false);
        lock.lock_unguarded(&sched);
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                lock.lock_unguarded(&sched);
                let saw_release = released.load(Ordering::Acquire);
                lock.unlock(&sched);
                saw_release
            });
            thread::sleep(std::time::Duration::from_millis(20));
            released.store(true, Ordering::Release);
            lock.unlock(&sched);
            assert!(waiter.join().unwrap());
        });
    }
}
