//! # Variant cache
//!
//! Storage for compiled shader variants. Variants are looked up by `{cache id, key bytes}`, their machine code lives
//! in one growable code buffer shared by all programs.
//!
//! Compiles that are still running are represented by a [CompileFence] that waiters block on.
//! The [DiskCache] trait is the boundary to persistent storage.
#![deny(warnings)]

use thiserror::Error;

mod cache;
mod disk;
mod fence;

pub use cache::{
    CacheEvents, CacheId, KernelRef, ProgramCache, ProgramCacheConfig, INITIAL_CODE_SIZE, KERNEL_ALIGNMENT,
};
pub use disk::{disk_key, DiskCache, MemoryDiskCache};
pub use fence::CompileFence;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Program cache would need {requested} bytes, but is limited to {max}")]
    OutOfMemory { requested: usize, max: usize },
    #[error("Failed to (de)serialize cache blob: {0}")]
    Serialize(#[from] serde_json::Error),
}
