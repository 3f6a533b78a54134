//! In-memory program cache.
//!
//! Maps `{cache id, key bytes}` to compiled variants and owns the code buffer all kernels are uploaded into.
//! Kernels with byte-identical assembly share one upload.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::CacheError;

///Which kind of program a cache entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheId {
    Vs,
    Tcs,
    Tes,
    Gs,
    Fs,
    Cs,
    Blorp,
    ///Gen4/5 fixed function clip program.
    Clip,
    ///Gen4/5 fixed function setup program.
    Sf,
    ///Gen4/5 fixed function geometry program used for streamout and quads.
    FfGs,
}

///A kernel's location in the code buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelRef {
    pub offset: u32,
    pub size: u32,
}

bitflags! {
    ///Side effects of an upload that the state emission has to react to.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct CacheEvents: u32 {
        ///The code buffer was reallocated, instruction base address has to be re-emitted.
        const BASE_ADDRESS_CHANGED = 1 << 0;
        ///Gen4 encodes kernel pointers in state, every shader pointer has to be re-emitted.
        const REEMIT_ALL_SHADERS = 1 << 1;
    }
}

pub const KERNEL_ALIGNMENT: u32 = 64;
pub const INITIAL_CODE_SIZE: usize = 16 * 1024;

#[derive(Clone, Debug)]
pub struct ProgramCacheConfig {
    pub ver: u32,
    pub initial_size: usize,
    ///Largest size the code buffer may grow to.
    pub max_size: usize,
}

impl ProgramCacheConfig {
    pub fn for_gen(ver: u32) -> Self {
        ProgramCacheConfig {
            ver,
            initial_size: INITIAL_CODE_SIZE,
            max_size: 64 * 1024 * 1024,
        }
    }
}

struct CacheInner<V> {
    entries: AHashMap<CacheId, AHashMap<Vec<u8>, Arc<V>>>,
    kernels: Vec<KernelRef>,
    code: Vec<u8>,
    next_offset: u32,
    events: CacheEvents,
}

impl<V> CacheInner<V> {
    fn new(initial_size: usize) -> Self {
        CacheInner {
            entries: AHashMap::default(),
            kernels: Vec::new(),
            code: vec![0; initial_size],
            next_offset: 0,
            events: CacheEvents::empty(),
        }
    }

    fn find_existing_assembly(&self, assembly: &[u8]) -> Option<KernelRef> {
        self.kernels.iter().copied().find(|k| {
            k.size as usize == assembly.len()
                && &self.code[k.offset as usize..(k.offset + k.size) as usize] == assembly
        })
    }

    ///Makes room for `size` more bytes, doubling the buffer as often as needed.
    fn grow_for(&mut self, size: u32, config: &ProgramCacheConfig) -> Result<(), CacheError> {
        let needed = self.next_offset as usize + size as usize;
        if needed <= self.code.len() {
            return Ok(());
        }

        let mut new_size = self.code.len().max(1);
        while new_size < needed {
            new_size *= 2;
        }
        if new_size > config.max_size {
            return Err(CacheError::OutOfMemory {
                requested: new_size,
                max: config.max_size,
            });
        }

        log::debug!("growing program cache {} -> {} bytes", self.code.len(), new_size);
        self.code.resize(new_size, 0);
        self.events |= CacheEvents::BASE_ADDRESS_CHANGED;
        if config.ver == 4 {
            self.events |= CacheEvents::REEMIT_ALL_SHADERS;
        }
        Ok(())
    }

    fn upload(&mut self, assembly: &[u8], config: &ProgramCacheConfig) -> Result<KernelRef, CacheError> {
        if let Some(existing) = self.find_existing_assembly(assembly) {
            log::trace!("reusing kernel at {:#x}", existing.offset);
            return Ok(existing);
        }

        let size = u32::try_from(assembly.len()).map_err(|_| CacheError::OutOfMemory {
            requested: assembly.len(),
            max: config.max_size,
        })?;
        self.grow_for(size, config)?;

        let kernel = KernelRef {
            offset: self.next_offset,
            size,
        };
        self.code[kernel.offset as usize..(kernel.offset + size) as usize].copy_from_slice(assembly);
        self.next_offset = align(kernel.offset + size, KERNEL_ALIGNMENT);
        self.kernels.push(kernel);
        Ok(kernel)
    }
}

///Thread safe variant cache. `V` is the compiled variant type, which the cache owns.
pub struct ProgramCache<V> {
    config: ProgramCacheConfig,
    inner: Mutex<CacheInner<V>>,
}

impl<V> ProgramCache<V> {
    pub fn new(config: ProgramCacheConfig) -> Self {
        let inner = CacheInner::new(config.initial_size);
        ProgramCache {
            config,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn find(&self, id: CacheId, key: &[u8]) -> Option<Arc<V>> {
        self.lock().entries.get(&id).and_then(|m| m.get(key)).cloned()
    }

    ///Uploads `assembly` (or finds an identical kernel) and inserts the variant `make` builds for it.
    ///
    /// If a variant for `{id, key}` already exists, that one is returned and nothing is uploaded, so every lookup of
    /// a key sees the same variant.
    pub fn insert(
        &self,
        id: CacheId,
        key: &[u8],
        assembly: &[u8],
        make: impl FnOnce(KernelRef) -> V,
    ) -> Result<Arc<V>, CacheError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.entries.get(&id).and_then(|m| m.get(key)) {
            return Ok(existing.clone());
        }

        let kernel = inner.upload(assembly, &self.config)?;
        let variant = Arc::new(make(kernel));
        inner
            .entries
            .entry(id)
            .or_default()
            .insert(key.to_vec(), variant.clone());
        Ok(variant)
    }

    ///Uploads a kernel without a cache entry, deduplicated against all other kernels.
    pub fn upload_kernel(&self, assembly: &[u8]) -> Result<KernelRef, CacheError> {
        self.lock().upload(assembly, &self.config)
    }

    ///Copies a kernel out of the code buffer.
    pub fn kernel_bytes(&self, kernel: KernelRef) -> Option<Vec<u8>> {
        let inner = self.lock();
        let end = kernel.offset as usize + kernel.size as usize;
        inner.code.get(kernel.offset as usize..end).map(|b| b.to_vec())
    }

    ///Returns and resets the events accumulated since the last call.
    pub fn take_events(&self) -> CacheEvents {
        std::mem::take(&mut self.lock().events)
    }

    pub fn code_size(&self) -> usize {
        self.lock().code.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    ///Drops all variants and starts over with a fresh code buffer.
    pub fn clear(&self) {
        let mut inner = self.lock();
        *inner = CacheInner::new(self.config.initial_size);
        inner.events = CacheEvents::BASE_ADDRESS_CHANGED;
    }
}

fn align(v: u32, a: u32) -> u32 {
    (v + a - 1) & !(a - 1)
}
