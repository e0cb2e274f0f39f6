#[cfg(any(test, feature = "hosted"))]
pub mod hosted;
