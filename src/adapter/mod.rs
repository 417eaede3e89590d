//! Concrete implementations of the storage port

pub mod storage;

pub use storage::*;
