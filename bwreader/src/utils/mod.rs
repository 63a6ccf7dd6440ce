pub mod file;
pub mod fill;
pub mod merge;

pub use file::*;
