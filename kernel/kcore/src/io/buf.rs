use crate::{param::BSIZE, sync::sleeplock::Sleeplock};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

/// Identity of a cached disk block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

/// Bookkeeping for one buffer slot, protected by its bucket's lock.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BufferMeta {
    /// Block cached in this slot, `None` until first use.
    pub id: Option<BlockId>,
    pub refcnt: u32,
    /// Tick of the last `bget` of this slot.
    pub lastuse: u32,
}
impl BufferMeta {
    pub const UNUSED: BufferMeta = BufferMeta {
        id: None,
        refcnt: 0,
        lastuse: 0,
    };
}

/// One slot of the buffer cache.
///
/// The payload is only reachable through a `BufGuard`, which holds
/// the sleeplock.
pub struct Buffer {
    /// Has data been read from disk?
    valid: AtomicBool,
    pub(crate) lock: Sleeplock,
    data: UnsafeCell<[u8; BSIZE]>,
}
impl Buffer {
    pub(crate) const fn new() -> Buffer {
        Buffer {
            valid: AtomicBool::new(false),
            lock: Sleeplock::new(),
            data: UnsafeCell::new([0; BSIZE]),
        }
    }
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
    /// The caller must hold `self.lock`.
    pub(crate) unsafe fn data(&self) -> &[u8; BSIZE] {
        &*self.data.get()
    }
    /// The caller must hold `self.lock` and have no other
    /// reference to the payload.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut [u8; BSIZE] {
        &mut *self.data.get()
    }
}
// The payload is only touched while holding the sleeplock.
unsafe impl Sync for Buffer {}
