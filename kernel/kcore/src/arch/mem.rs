//! Architecture-agnostic memory constants.

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

pub fn round_up_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}
