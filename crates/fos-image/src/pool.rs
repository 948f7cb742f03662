//! Bitmap memory pool
//!
//! Reuses raster buffers between decodes to reduce allocations. Buffers are
//! bucketed by exact (width, height, format); the pool is bounded by total
//! bytes and evicts the least recently released buffer first.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bitmap::{Bitmap, BitmapTooLarge, PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl PoolKey {
    fn of(bitmap: &Bitmap) -> Self {
        Self {
            width: bitmap.width(),
            height: bitmap.height(),
            format: bitmap.format(),
        }
    }
}

struct PoolInner {
    /// Released buffers per bucket, oldest at the front
    buckets: HashMap<PoolKey, VecDeque<(u64, Bitmap)>>,
    /// Release tick -> bucket, for global eviction order
    released: BTreeMap<u64, PoolKey>,
    tick: u64,
    total_bytes: usize,
    max_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl PoolInner {
    fn evict_oldest(&mut self) -> bool {
        let Some((tick, key)) = self.released.pop_first() else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            if let Some(pos) = bucket.iter().position(|(t, _)| *t == tick) {
                if let Some((_, bitmap)) = bucket.remove(pos) {
                    self.total_bytes -= bitmap.byte_size();
                    self.evictions += 1;
                }
            }
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        true
    }
}

/// Shared pool of reusable bitmaps
#[derive(Clone)]
pub struct BitmapPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl Default for BitmapPool {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024) // 64 MB default limit
    }
}

impl BitmapPool {
    /// Create a pool holding at most `max_bytes` of released buffers
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                buckets: HashMap::new(),
                released: BTreeMap::new(),
                tick: 0,
                total_bytes: 0,
                max_bytes,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checkout a cleared bitmap (reused from the pool or newly allocated)
    ///
    /// The returned guard releases the buffer back to the pool when dropped
    /// unless it is detached with [`PooledBitmap::into_bitmap`]. Fails only
    /// when a new buffer of that size can't be addressed.
    pub fn checkout(&self, width: u32, height: u32, format: PixelFormat) -> Result<PooledBitmap, BitmapTooLarge> {
        let key = PoolKey { width, height, format };
        let reused = {
            let mut inner = self.lock();
            let taken = inner.buckets.get_mut(&key).and_then(VecDeque::pop_back);
            match taken {
                Some((tick, bitmap)) => {
                    inner.released.remove(&tick);
                    inner.total_bytes -= bitmap.byte_size();
                    if inner.buckets.get(&key).is_some_and(VecDeque::is_empty) {
                        inner.buckets.remove(&key);
                    }
                    inner.hits += 1;
                    Some(bitmap)
                }
                None => {
                    inner.misses += 1;
                    None
                }
            }
        };

        let bitmap = match reused {
            Some(mut bitmap) => {
                bitmap.clear();
                bitmap
            }
            None => Bitmap::new(width, height, format)?,
        };
        Ok(self.adopt(bitmap))
    }

    /// Track an externally allocated bitmap so it returns here when dropped
    pub fn adopt(&self, bitmap: Bitmap) -> PooledBitmap {
        PooledBitmap {
            bitmap,
            pool: Some(self.clone()),
        }
    }

    /// Return a bitmap to the pool
    pub fn release(&self, bitmap: Bitmap) {
        let bytes = bitmap.byte_size();
        if bytes == 0 {
            return;
        }

        let mut inner = self.lock();
        if bytes > inner.max_bytes {
            return; // Drop the buffer
        }

        inner.tick += 1;
        let tick = inner.tick;
        let key = PoolKey::of(&bitmap);
        inner.buckets.entry(key).or_default().push_back((tick, bitmap));
        inner.released.insert(tick, key);
        inner.total_bytes += bytes;

        while inner.total_bytes > inner.max_bytes {
            if !inner.evict_oldest() {
                break;
            }
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            total_bytes: inner.total_bytes,
            max_bytes: inner.max_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            num_buffers: inner.released.len(),
        }
    }

    /// Drop all pooled buffers
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.buckets.clear();
        inner.released.clear();
        inner.total_bytes = 0;
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub num_buffers: usize,
}

/// A bitmap checked out of a [`BitmapPool`]
///
/// Dropping the guard releases the buffer to its pool, so every exit path
/// (error, cancellation, superseded by a transformation) returns it.
pub struct PooledBitmap {
    bitmap: Bitmap,
    pool: Option<BitmapPool>,
}

impl PooledBitmap {
    /// Detach from the pool and take ownership of the bitmap
    pub fn into_bitmap(mut self) -> Bitmap {
        self.pool = None;
        mem::replace(&mut self.bitmap, Bitmap::empty())
    }
}

impl Deref for PooledBitmap {
    type Target = Bitmap;

    fn deref(&self) -> &Bitmap {
        &self.bitmap
    }
}

impl DerefMut for PooledBitmap {
    fn deref_mut(&mut self) -> &mut Bitmap {
        &mut self.bitmap
    }
}

impl Drop for PooledBitmap {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let bitmap = mem::replace(&mut self.bitmap, Bitmap::empty());
            pool.release(bitmap);
        }
    }
}

impl std::fmt::Debug for PooledBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBitmap")
            .field("bitmap", &self.bitmap)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
