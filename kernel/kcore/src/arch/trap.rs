//! Preemption control.

use crate::hal::Cpu;
use core::marker::PhantomData;

/// Keeps interrupts (and with them, preemption) off on the current CPU
/// for as long as it lives.
///
/// Code that reads `Cpu::current_id` and then touches per-CPU state must
/// hold one of these across the whole sequence, otherwise the process
/// could migrate between the two steps.
pub struct InterruptBlocker<'c, C: Cpu + ?Sized> {
    cpu: &'c C,
    // Tied to the CPU that created it.
    _not_send: PhantomData<*const ()>,
}
impl<'c, C: Cpu + ?Sized> InterruptBlocker<'c, C> {
    pub fn new(cpu: &'c C) -> InterruptBlocker<'c, C> {
        cpu.push_off();
        InterruptBlocker {
            cpu,
            _not_send: PhantomData,
        }
    }
    pub fn cpu(&self) -> &'c C {
        self.cpu
    }
}
impl<'c, C: Cpu + ?Sized> core::ops::Drop for InterruptBlocker<'c, C> {
    fn drop(&mut self) {
        self.cpu.pop_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::platform::hosted::HostCpu;

    #[test]
    fn blockers_nest() {
        let cpu = HostCpu;
        assert_eq!(HostCpu::depth(), 0);
        {
            let _outer = InterruptBlocker::new(&cpu);
            let _inner = InterruptBlocker::new(&cpu);
            assert_eq!(HostCpu::depth(), 2);
        }
        assert_eq!(HostCpu::depth(), 0);
    }
}
