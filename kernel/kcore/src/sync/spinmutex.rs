use crate::{
    arch::trap::InterruptBlocker,
    hal::{Cpu, Scheduler},
};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut, Drop},
    sync::atomic::{AtomicBool, Ordering},
};

/// Mutual exclusion for short critical sections.
///
/// Interrupts stay off on the locking CPU while the lock is held, so a
/// holder is never preempted and never waits on I/O.
pub struct SpinMutex<T> {
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}
impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> SpinMutex<T> {
        SpinMutex {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(value),
        }
    }
    pub fn lock<'m, C: Cpu + ?Sized>(&'m self, cpu: &'m C) -> SpinMutexGuard<'m, T, C> {
        let blocker = InterruptBlocker::new(cpu);
        self.lock_raw();
        SpinMutexGuard {
            mutex: self,
            blocker,
        }
    }
    fn lock_raw(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}
unsafe impl<T> Sync for SpinMutex<T> where T: Send {}

pub struct SpinMutexGuard<'m, T, C: Cpu + ?Sized> {
    mutex: &'m SpinMutex<T>,
    // Dropped after the lock is released.
    blocker: InterruptBlocker<'m, C>,
}
impl<'m, T, C: Cpu + ?Sized> SpinMutexGuard<'m, T, C> {
    /// Sleep on `chan` until `wakeup(chan)` is called somewhere
    /// else, yielding the lock until then.
    pub fn sleep<S: Scheduler + ?Sized>(&mut self, chan: usize, scheduler: &S) {
        let mutex = self.mutex;
        let cpu = self.blocker.cpu();
        // Give up the interrupt-disable layer along with the lock.
        scheduler.sleep(chan, &mut || {
            unsafe { mutex.unlock() };
            cpu.pop_off();
        });
        // Tidy up and reacquire the lock.
        cpu.push_off();
        mutex.lock_raw();
    }
}
impl<'m, T, C: Cpu + ?Sized> Deref for SpinMutexGuard<'m, T, C> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}
impl<'m, T, C: Cpu + ?Sized> DerefMut for SpinMutexGuard<'m, T, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.inner.get() }
    }
}
impl<'m, T, C: Cpu + ?Sized> Drop for SpinMutexGuard<'m, T, C> {
    fn drop(&mut self) {
        unsafe { self.mutex.unlock() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::platform::hosted::{HostCpu, HostScheduler};
    use std::{sync::Mutex, thread, vec::Vec};

    /// Notes the push_off depth of every sleeper once it gave up its lock.
    #[derive(Default)]
    struct DepthRecorder {
        inner: HostScheduler,
        depths: Mutex<Vec<usize>>,
    }
    impl Cpu for DepthRecorder {
        fn current_id(&self) -> usize {
            self.inner.current_id()
        }
        fn push_off(&self) {
            self.inner.push_off()
        }
        fn pop_off(&self) {
            self.inner.pop_off()
        }
    }
    impl Scheduler for DepthRecorder {
        fn current_pid(&self) -> usize {
            self.inner.current_pid()
        }
        fn sleep(&self, chan: usize, release: &mut dyn FnMut()) {
            self.inner.sleep(chan, &mut || {
                release();
                self.depths.lock().unwrap().push(HostCpu::depth());
            });
        }
        fn wakeup(&self, chan: usize) {
            self.inner.wakeup(chan)
        }
        fn ticks(&self) -> u32 {
            self.inner.ticks()
        }
    }

    #[test]
    fn guard_disables_interrupts() {
        let mutex = SpinMutex::new(0u32);
        {
            let mut guard = mutex.lock(&HostCpu);
            *guard += 1;
            assert!(mutex.is_locked());
            assert_eq!(HostCpu::depth(), 1);
        }
        assert!(!mutex.is_locked());
        assert_eq!(HostCpu::depth(), 0);
        assert_eq!(*mutex.lock(&HostCpu), 1);
    }

    #[test]
    fn unlocks_on_panic() {
        let mutex = SpinMutex::new(());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = mutex.lock(&HostCpu);
            panic!("inside critical section");
        }));
        assert!(result.is_err());
        assert!(!mutex.is_locked());
        assert_eq!(HostCpu::depth(), 0);
    }

    #[test]
    fn counts_under_contention() {
        let mutex = SpinMutex::new(0usize);
        thread::scope(|s| {
            for cpu in 0..4 {
                let mutex = &mutex;
                s.spawn(move || {
                    HostCpu::set_current(cpu);
                    for _ in 0..1000 {
                        *mutex.lock(&HostCpu) += 1;
                    }
                });
            }
        });
        assert_eq!(*mutex.lock(&HostCpu), 4000);
    }

    #[test]
    fn sleep_gives_up_interrupt_layer() {
        let sched = DepthRecorder::default();
        let ready = SpinMutex::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                let mut ready = ready.lock(&sched);
                while !*ready {
                    ready.sleep(1, &sched);
                }
                assert_eq!(HostCpu::depth(), 1);
            });
            loop {
                {
                    let mut ready = ready.lock(&sched);
                    if !sched.depths.lock().unwrap().is_empty() {
                        *ready = true;
                        break;
                    }
                }
                thread::yield_now();
            }
            sched.wakeup(1);
        });
        let depths = sched.depths.lock().unwrap();
        assert!(!depths.is_empty());
        assert!(depths.iter().all(|&depth| depth == 0));
        assert_eq!(HostCpu::depth(), 0);
    }
}
