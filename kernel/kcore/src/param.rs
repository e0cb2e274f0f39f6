/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Number of buffer cache buckets
pub const NBUCKET: usize = 13;
/// Buffers per bucket
pub const NBUFSLOT: usize = 7;
/// Size of the disk block cache
pub const NBUF: usize = NBUCKET * NBUFSLOT;
/// Block size.
pub const BSIZE: usize = 1024;
