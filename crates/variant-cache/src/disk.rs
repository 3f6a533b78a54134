use std::sync::{Mutex, PoisonError};

use ahash::AHashMap;

use crate::CacheId;

///On-disk (or otherwise persistent) blob store for compiled variants.
///
/// The cache only hands out the opaque blobs, (de)serialization is up to the caller.
pub trait DiskCache: Send + Sync {
    fn retrieve(&self, key: &[u8; 32]) -> Option<Vec<u8>>;
    fn store(&self, key: &[u8; 32], blob: &[u8]);
}

///Key of a variant in the disk cache. Combines the source hash of the program with the in-memory key.
pub fn disk_key(source_hash: &[u8; 32], id: CacheId, key: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_hash);
    hasher.update(&[id as u8]);
    hasher.update(key);
    *hasher.finalize().as_bytes()
}

///Disk cache that never leaves memory. Used for tests and when no cache directory is configured.
#[derive(Default)]
pub struct MemoryDiskCache {
    blobs: Mutex<AHashMap<[u8; 32], Vec<u8>>>,
}

impl MemoryDiskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiskCache for MemoryDiskCache {
    fn retrieve(&self, key: &[u8; 32]) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn store(&self, key: &[u8; 32], blob: &[u8]) {
        log::trace!("storing {} byte blob in disk cache", blob.len());
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*key, blob.to_vec());
    }
}
