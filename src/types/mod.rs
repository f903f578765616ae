//! Value types shared by the scan core

mod wide_int;

pub use wide_int::*;
