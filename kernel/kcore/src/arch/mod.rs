pub mod mem;
pub mod trap;
