//! Decoded image cache with LRU eviction
//!
//! Caches delivered visuals by request key with a memory limit. Policy
//! gating is the pipeline's job; the cache stores whatever it is given.
//! Bitmaps it evicts or replaces go back to the attached pool once nothing
//! else holds them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bitmap::{Image, PixelFormat};
use crate::pool::BitmapPool;
use crate::request::{Options, Scale, Size};

/// Cache key for delivered images
///
/// Two requests with equal keys are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Normalized input datum
    pub data: String,
    /// Resolved size
    pub size: Size,
    pub scale: Scale,
    pub pixel_format: PixelFormat,
    /// Transformation cache keys, in application order
    pub transformations: Vec<String>,
}

impl CacheKey {
    pub fn new(data: impl Into<String>, size: Size) -> Self {
        Self {
            data: data.into(),
            size,
            scale: Scale::default(),
            pixel_format: PixelFormat::default(),
            transformations: Vec::new(),
        }
    }

    /// Take scale and pixel format from the request's options
    pub fn with_options(mut self, options: &Options) -> Self {
        self.scale = options.scale;
        self.pixel_format = options.pixel_format;
        self
    }

    pub fn with_transformations(mut self, keys: Vec<String>) -> Self {
        self.transformations = keys;
        self
    }
}

/// A cached visual plus whether it was subsampled
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub image: Image,
    pub is_sampled: bool,
}

struct CacheEntry {
    value: CachedImage,
    size: usize,
    last_access: u64,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Access tick -> key, oldest first
    lru: BTreeMap<u64, CacheKey>,
    access_counter: u64,
    max_memory: usize,
    current_memory: usize,
    hits: u64,
    misses: u64,
    pool: Option<BitmapPool>,
}

impl CacheInner {
    fn touch(&mut self, key: &CacheKey) -> Option<CachedImage> {
        self.access_counter += 1;
        let tick = self.access_counter;
        let entry = self.entries.get_mut(key)?;
        self.lru.remove(&entry.last_access);
        entry.last_access = tick;
        self.lru.insert(tick, key.clone());
        Some(entry.value.clone())
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CachedImage> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.last_access);
        self.current_memory -= entry.size;
        Some(entry.value)
    }

    /// Evict least recently used entry
    fn evict_lru(&mut self) -> Option<CachedImage> {
        let (_, key) = self.lru.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.current_memory -= entry.size;
        tracing::trace!(data = %key.data, bytes = entry.size, "memory cache eviction");
        Some(entry.value)
    }
}

/// Hand discarded bitmaps back to `pool` when the cache held the last reference
fn recycle(pool: Option<&BitmapPool>, discarded: Vec<CachedImage>) {
    let Some(pool) = pool else {
        return;
    };
    for cached in discarded {
        if let Image::Bitmap(bitmap) = cached.image {
            if let Ok(bitmap) = Arc::try_unwrap(bitmap) {
                pool.release(bitmap);
            }
        }
    }
}

/// Shared, bounded memory cache
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl MemoryCache {
    /// Create a new cache with memory limit (in bytes)
    pub fn new(max_memory: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                lru: BTreeMap::new(),
                access_counter: 0,
                max_memory,
                current_memory: 0,
                hits: 0,
                misses: 0,
                pool: None,
            })),
        }
    }

    /// Return discarded bitmaps to `pool`
    pub fn with_bitmap_pool(self, pool: BitmapPool) -> Self {
        self.lock().pool = Some(pool);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get an image from cache
    pub fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut inner = self.lock();
        match inner.touch(key) {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert an image into cache
    pub fn put(&self, key: CacheKey, value: CachedImage) {
        let size = value.image.byte_size();
        let mut inner = self.lock();
        let mut discarded: Vec<CachedImage> = inner.remove(&key).into_iter().collect();

        // Don't cache if image is larger than entire cache
        if size > inner.max_memory {
            let pool = inner.pool.clone();
            drop(inner);
            recycle(pool.as_ref(), discarded);
            return;
        }

        // Evict until we have space
        while inner.current_memory + size > inner.max_memory {
            match inner.evict_lru() {
                Some(evicted) => discarded.push(evicted),
                None => break,
            }
        }

        inner.access_counter += 1;
        let tick = inner.access_counter;
        inner.current_memory += size;
        inner.lru.insert(tick, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size,
                last_access: tick,
            },
        );
        let pool = inner.pool.clone();
        drop(inner);
        recycle(pool.as_ref(), discarded);
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CachedImage> {
        self.lock().remove(key)
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut inner = self.lock();
        let discarded = inner.entries.drain().map(|(_, entry)| entry.value).collect();
        inner.lru.clear();
        inner.current_memory = 0;
        let pool = inner.pool.clone();
        drop(inner);
        recycle(pool.as_ref(), discarded);
    }

    /// Number of cached images
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current memory usage
    pub fn memory_usage(&self) -> usize {
        self.lock().current_memory
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            current_memory: inner.current_memory,
            max_memory: inner.max_memory,
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(50 * 1024 * 1024)
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub current_memory: usize,
    pub max_memory: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}
