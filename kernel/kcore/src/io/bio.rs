//! Buffer cache.
//!
//! The buffer cache is a hash table of buckets, each holding a
//! fixed number of buf structures with cached copies of disk block
//! contents. Caching disk blocks in memory reduces the number of disk
//! reads and also provides a synchronization point for disk blocks used
//! by multiple processes.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call bread.
//! - After changing buffer data, call write on it to write it to disk.
//! - When done with the buffer, call release (or drop it).
//! - Only one process at a time can use a buffer,
//!   so do not keep them longer than necessary.
//!
//! A block always lives in bucket `blockno % NBUCKET`. Each bucket's
//! spinlock protects the identity, reference count and last use time of
//! its buffers; the contents are protected by each buffer's sleeplock.

use super::buf::{BlockId, Buffer, BufferMeta};
use crate::{
    hal::{BlockDevice, Scheduler},
    param::{BSIZE, NBUCKET, NBUFSLOT},
    sync::spinmutex::{SpinMutex, SpinMutexGuard},
};
use core::{
    ops::{Deref, DerefMut},
    ptr,
};
use log::trace;

struct Bucket {
    lock: SpinMutex<[BufferMeta; NBUFSLOT]>,
    buffers: [Buffer; NBUFSLOT],
}
impl Bucket {
    #[allow(clippy::declare_interior_mutable_const)]
    const fn new() -> Bucket {
        const EMPTY: Buffer = Buffer::new();
        Bucket {
            lock: SpinMutex::new([BufferMeta::UNUSED; NBUFSLOT]),
            buffers: [EMPTY; NBUFSLOT],
        }
    }
    /// Slot holding `buf`, if it is one of ours.
    fn slot_of(&self, buf: &Buffer) -> Option<usize> {
        self.buffers.iter().position(|slot| ptr::eq(slot, buf))
    }
}

/// Unused slot with the smallest last use time, lowest index first.
fn least_recently_used(slots: &[BufferMeta]) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .filter(|(_, meta)| meta.refcnt == 0)
        .min_by_key(|(_, meta)| meta.lastuse)
        .map(|(slot, _)| slot)
}

fn bucket_of(blockno: u32) -> usize {
    blockno as usize % NBUCKET
}

pub struct BufferCache<S: Scheduler, D: BlockDevice> {
    scheduler: S,
    disk: D,
    buckets: [Bucket; NBUCKET],
}
impl<S: Scheduler, D: BlockDevice> BufferCache<S, D> {
    /// An empty cache. Being `const`, it can be placed in a `static`.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new(scheduler: S, disk: D) -> BufferCache<S, D> {
        const EMPTY: Bucket = Bucket::new();
        BufferCache {
            scheduler,
            disk,
            buckets: [EMPTY; NBUCKET],
        }
    }
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// Look through the buffer cache for block on device dev.
    ///
    /// If not found, allocate a buffer.
    /// In either case, return locked buffer.
    pub fn bget(&self, dev: u32, blockno: u32) -> BufGuard<'_, S, D> {
        let id = BlockId { dev, blockno };
        let bucket = &self.buckets[bucket_of(blockno)];
        let mut slots = bucket.lock.lock(&self.scheduler);
        let now = self.scheduler.ticks();

        // Is the block already cached?
        let slot = match slots.iter().position(|meta| meta.id == Some(id)) {
            Some(slot) => {
                slots[slot].refcnt += 1;
                slots[slot].lastuse = now;
                slot
            }
            None => {
                // Not cached.
                // Recycle the least recently used unused buffer.
                let Some(slot) = least_recently_used(&*slots) else {
                    panic!("bget: no buffers");
                };
                if let Some(old) = slots[slot].id {
                    trace!(
                        "bget: {:?} replaces {:?} in bucket {} slot {}",
                        id,
                        old,
                        bucket_of(blockno),
                        slot
                    );
                }
                slots[slot] = BufferMeta {
                    id: Some(id),
                    refcnt: 1,
                    lastuse: now,
                };
                bucket.buffers[slot].set_valid(false);
                slot
            }
        };
        // Never wait for a sleeplock with the bucket locked.
        drop(slots);

        let buf = &bucket.buffers[slot];
        buf.lock.lock_unguarded(&self.scheduler);
        BufGuard {
            cache: self,
            buf,
            id,
            slot,
        }
    }

    /// Return a locked buffer with the contents of the indicated block.
    pub fn bread(&self, dev: u32, blockno: u32) -> BufGuard<'_, S, D> {
        let mut b = self.bget(dev, blockno);
        if !b.buf.is_valid() {
            self.disk.transfer(dev, blockno, &mut *b, false);
            b.buf.set_valid(true);
        }
        b
    }

    /// Take an extra reference to `buf` so it stays cached
    /// without holding its lock.
    pub fn bpin(&self, buf: &Buffer) {
        let (mut slots, slot) = self.lock_bucket_of(buf, "bpin");
        slots[slot].refcnt += 1;
    }

    /// Drop a reference taken with `bpin`.
    pub fn bunpin(&self, buf: &Buffer) {
        self.unref(buf, "bunpin");
    }

    /// Number of references currently held on `buf`.
    pub fn refcnt(&self, buf: &Buffer) -> u32 {
        let (slots, slot) = self.lock_bucket_of(buf, "refcnt");
        slots[slot].refcnt
    }

    /// Is the block resident in the cache?
    pub fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        let id = BlockId { dev, blockno };
        self.buckets[bucket_of(blockno)]
            .lock
            .lock(&self.scheduler)
            .iter()
            .any(|meta| meta.id == Some(id))
    }

    /// Lock the bucket owning `buf` and find its slot.
    fn lock_bucket_of(
        &self,
        buf: &Buffer,
        caller: &str,
    ) -> (SpinMutexGuard<'_, [BufferMeta; NBUFSLOT], S>, usize) {
        let found = self
            .buckets
            .iter()
            .find_map(|bucket| Some((bucket, bucket.slot_of(buf)?)));
        match found {
            Some((bucket, slot)) => (bucket.lock.lock(&self.scheduler), slot),
            None => panic!("{}: buffer from another cache", caller),
        }
    }

    fn unref(&self, buf: &Buffer, caller: &str) {
        let (mut slots, slot) = self.lock_bucket_of(buf, caller);
        let meta = &mut slots[slot];
        match meta.refcnt.checked_sub(1) {
            Some(refcnt) => meta.refcnt = refcnt,
            None => panic!("{}: refcnt underflow", caller),
        }
    }
}

/// A buffer locked by the current process.
///
/// Dropping the guard releases the buffer; `release` does the
/// same after checking the caller still holds it.
pub struct BufGuard<'c, S: Scheduler, D: BlockDevice> {
    cache: &'c BufferCache<S, D>,
    buf: &'c Buffer,
    id: BlockId,
    slot: usize,
}
impl<'c, S: Scheduler, D: BlockDevice> BufGuard<'c, S, D> {
    pub fn dev(&self) -> u32 {
        self.id.dev
    }
    pub fn blockno(&self) -> u32 {
        self.id.blockno
    }
    /// Bucket the block hashes to.
    pub fn bucket(&self) -> usize {
        bucket_of(self.id.blockno)
    }
    /// Index of the buffer within its bucket.
    pub fn slot(&self) -> usize {
        self.slot
    }
    /// The underlying slot, for `bpin` and `bunpin`. Outlives the guard.
    pub fn buffer(&self) -> &'c Buffer {
        self.buf
    }
    fn holding(&self) -> bool {
        self.buf.lock.held_by_current(&self.cache.scheduler)
    }

    /// Write the buffer's contents to disk. Must be locked.
    pub fn write(&mut self) {
        if !self.holding() {
            panic!("bwrite");
        }
        let data = unsafe { self.buf.data_mut() };
        self.cache
            .disk
            .transfer(self.id.dev, self.id.blockno, data, true);
    }

    /// Release a locked buffer.
    pub fn release(self) {
        if !self.holding() {
            panic!("brelse");
        }
    }
}
impl<'c, S: Scheduler, D: BlockDevice> Deref for BufGuard<'c, S, D> {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { self.buf.data() }
    }
}
impl<'c, S: Scheduler, D: BlockDevice> DerefMut for BufGuard<'c, S, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.buf.data_mut() }
    }
}
impl<'c, S: Scheduler, D: BlockDevice> Drop for BufGuard<'c, S, D> {
    fn drop(&mut self) {
        self.cache.unref(self.buf, "brelse");
        self.buf.lock.unlock(&self.cache.scheduler);
    }
}
