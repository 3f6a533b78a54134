use std::sync::Arc;

use variant_cache::*;

#[derive(Debug, PartialEq)]
struct Variant {
    kernel: KernelRef,
    tag: u32,
}

fn cache() -> ProgramCache<Variant> {
    ProgramCache::new(ProgramCacheConfig::for_gen(9))
}

#[test]
fn find_after_insert_is_stable() {
    let cache = cache();
    assert!(cache.find(CacheId::Fs, b"key").is_none());

    let inserted = cache
        .insert(CacheId::Fs, b"key", &[1, 2, 3, 4], |kernel| Variant { kernel, tag: 1 })
        .unwrap();
    let a = cache.find(CacheId::Fs, b"key").unwrap();
    let b = cache.find(CacheId::Fs, b"key").unwrap();
    assert!(Arc::ptr_eq(&a, &b), "same key must yield the same variant");
    assert!(Arc::ptr_eq(&a, &inserted));

    assert!(cache.find(CacheId::Fs, b"kez").is_none(), "one byte changed");
    assert!(cache.find(CacheId::Vs, b"key").is_none(), "other cache id");
}

#[test]
fn first_inserter_wins() {
    let cache = cache();
    let first = cache
        .insert(CacheId::Vs, b"k", &[1; 8], |kernel| Variant { kernel, tag: 1 })
        .unwrap();
    let second = cache
        .insert(CacheId::Vs, b"k", &[2; 8], |kernel| Variant { kernel, tag: 2 })
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.tag, 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn identical_code_is_shared() {
    let cache = cache();
    let code = [0xabu8; 100];
    let a = cache
        .insert(CacheId::Vs, b"a", &code, |kernel| Variant { kernel, tag: 0 })
        .unwrap();
    let b = cache
        .insert(CacheId::Fs, b"b", &code, |kernel| Variant { kernel, tag: 0 })
        .unwrap();
    assert_eq!(a.kernel, b.kernel, "byte identical assembly shares storage");

    let c = cache
        .insert(CacheId::Fs, b"c", &code[..99], |kernel| Variant { kernel, tag: 0 })
        .unwrap();
    assert_ne!(c.kernel.offset, a.kernel.offset, "different size is not a match");
    assert_eq!(c.kernel.offset, 128, "kernels are 64 byte aligned");
    assert_eq!(cache.kernel_bytes(c.kernel).unwrap(), code[..99].to_vec());
}

#[test]
fn growth_reports_base_address_change() {
    let cache = cache();
    cache.upload_kernel(&[1; 1000]).unwrap();
    assert_eq!(cache.take_events(), CacheEvents::empty());

    cache.upload_kernel(&vec![2; INITIAL_CODE_SIZE]).unwrap();
    assert_eq!(cache.code_size(), 2 * INITIAL_CODE_SIZE);
    assert_eq!(cache.take_events(), CacheEvents::BASE_ADDRESS_CHANGED);
    assert_eq!(cache.take_events(), CacheEvents::empty(), "events are consumed");
}

#[test]
fn gen4_growth_reemits_shaders() {
    let cache: ProgramCache<Variant> = ProgramCache::new(ProgramCacheConfig::for_gen(4));
    cache.upload_kernel(&vec![1; INITIAL_CODE_SIZE + 1]).unwrap();
    assert_eq!(
        cache.take_events(),
        CacheEvents::BASE_ADDRESS_CHANGED | CacheEvents::REEMIT_ALL_SHADERS
    );
}

#[test]
fn exhaustion_is_an_error() {
    let cache: ProgramCache<Variant> = ProgramCache::new(ProgramCacheConfig {
        ver: 9,
        initial_size: 256,
        max_size: 1024,
    });
    cache.upload_kernel(&[1; 512]).unwrap();
    let res = cache.insert(CacheId::Cs, b"big", &[2; 1024], |kernel| Variant { kernel, tag: 0 });
    assert!(matches!(
        res,
        Err(CacheError::OutOfMemory {
            requested: 2048,
            max: 1024
        })
    ));
    assert!(cache.is_empty(), "failed insert leaves no entry");
    assert_eq!(cache.code_size(), 512, "buffer is untouched");
}

#[test]
fn clear_resets_everything() {
    let cache = cache();
    cache
        .insert(CacheId::Blorp, b"blit", &[3; 64], |kernel| Variant { kernel, tag: 0 })
        .unwrap();
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.code_size(), INITIAL_CODE_SIZE);
    assert!(cache.take_events().contains(CacheEvents::BASE_ADDRESS_CHANGED));

    let kernel = cache.upload_kernel(&[3; 64]).unwrap();
    assert_eq!(kernel.offset, 0, "old kernels are gone");
}

#[test]
fn memory_disk_cache() {
    let disk = MemoryDiskCache::new();
    let key = disk_key(&[1; 32], CacheId::Vs, b"key");
    assert!(disk.retrieve(&key).is_none());
    disk.store(&key, b"blob");
    assert_eq!(disk.retrieve(&key), Some(b"blob".to_vec()));
    assert_eq!(disk.len(), 1);
}
