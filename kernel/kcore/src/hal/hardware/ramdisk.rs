//! Ramdisk that keeps every written block in memory.
//!
//! Blocks that were never written read back as zeroes.

use crate::{hal::BlockDevice, param::BSIZE};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

#[derive(Debug, Default)]
pub struct RamDisk {
    blocks: Mutex<BTreeMap<(u32, u32), [u8; BSIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}
impl RamDisk {
    pub const fn new() -> RamDisk {
        RamDisk {
            blocks: Mutex::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
    /// Store `data` as the contents of a block without counting a write.
    pub fn load(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((dev, blockno), *data);
    }
    /// Current contents of a block.
    pub fn block(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(dev, blockno))
            .copied()
            .unwrap_or([0; BSIZE])
    }
    /// Number of block reads issued so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }
    /// Number of block writes issued so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}
impl BlockDevice for RamDisk {
    fn transfer(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool) {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        if write {
            blocks.insert((dev, blockno), *data);
            self.writes.fetch_add(1, Ordering::AcqRel);
        } else {
            *data = blocks.get(&(dev, blockno)).copied().unwrap_or([0; BSIZE]);
            self.reads.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_blocks_are_zero() {
        let disk = RamDisk::new();
        let mut data = [7u8; BSIZE];
        disk.transfer(1, 42, &mut data, false);
        assert_eq!(data, [0; BSIZE]);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn writes_are_per_device() {
        let disk = RamDisk::new();
        let mut data = [9u8; BSIZE];
        disk.transfer(1, 3, &mut data, true);
        assert_eq!(disk.block(1, 3), [9; BSIZE]);
        assert_eq!(disk.block(2, 3), [0; BSIZE]);
        assert_eq!(disk.writes(), 1);
    }
}
