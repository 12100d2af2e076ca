//! Side-effecting parts of the engine: files, processes, clocks.

pub mod archive;
pub mod atomic;
pub mod config;
pub mod contracts;
pub mod executor;
pub mod init;
pub mod process;
pub mod timer;
pub mod tree_store;
