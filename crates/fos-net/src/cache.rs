//! Persistent Response Cache
//!
//! Stores fetched bodies on disk, one file per URL, bounded by total size
//! with least-recently-accessed eviction. Entries survive restarts.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::NetError;

const BODY_EXT: &str = "body";
const TYPE_EXT: &str = "type";
const TEMP_EXT: &str = "tmp";

/// Cached response entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Response body
    pub body: Vec<u8>,
    /// Content type, if the response carried one
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    size: u64,
    last_accessed: u64,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, EntryMeta>,
    current_size: u64,
    clock: u64,
}

impl Index {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, stem: String, size: u64) {
        let last_accessed = self.tick();
        if let Some(old) = self.entries.insert(stem, EntryMeta { size, last_accessed }) {
            self.current_size = self.current_size.saturating_sub(old.size);
        }
        self.current_size += size;
    }

    fn remove(&mut self, stem: &str) -> bool {
        match self.entries.remove(stem) {
            Some(meta) => {
                self.current_size = self.current_size.saturating_sub(meta.size);
                true
            }
            None => false,
        }
    }

    /// Evict least recently accessed entries until `max` is respected,
    /// never evicting `keep`
    fn evict_to(&mut self, max: u64, keep: &str) -> Vec<String> {
        let mut victims = Vec::new();
        while self.current_size > max {
            let oldest = self
                .entries
                .iter()
                .filter(|(stem, _)| stem.as_str() != keep)
                .min_by_key(|(_, meta)| meta.last_accessed)
                .map(|(stem, _)| stem.clone());
            let Some(stem) = oldest else {
                break;
            };
            self.remove(&stem);
            victims.push(stem);
        }
        victims
    }
}

/// On-disk HTTP body cache
///
/// Cheap to clone; clones share the directory index.
#[derive(Debug, Clone)]
pub struct DiskCache {
    inner: Arc<DiskCacheInner>,
}

#[derive(Debug)]
struct DiskCacheInner {
    dir: PathBuf,
    max_size_bytes: u64,
    index: Mutex<Index>,
    next_temp: AtomicU64,
}

impl DiskCache {
    /// Open (or create) a cache rooted at `dir`
    ///
    /// Existing entries are indexed oldest first by modification time.
    /// Temp files left behind by interrupted writes are deleted.
    pub fn open(dir: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self, NetError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut found: Vec<(SystemTime, String, u64)> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(BODY_EXT) => {}
                Some(TEMP_EXT) => {
                    if let Err(err) = std::fs::remove_file(&path) {
                        tracing::warn!(path = %path.display(), %err, "failed to remove stale temp file");
                    }
                    continue;
                }
                _ => continue,
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let meta = std::fs::metadata(&path)?;
            found.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), stem.to_string(), meta.len()));
        }
        found.sort();

        let mut index = Index::default();
        for (_, stem, size) in found {
            index.insert(stem, size);
        }
        tracing::debug!(dir = %dir.display(), entries = index.entries.len(), bytes = index.current_size, "disk cache opened");

        Ok(Self {
            inner: Arc::new(DiskCacheInner {
                dir,
                max_size_bytes,
                index: Mutex::new(index),
                next_temp: AtomicU64::new(0),
            }),
        })
    }

    fn index(&self) -> std::sync::MutexGuard<'_, Index> {
        self.inner.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stem(key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }

    fn path(&self, stem: &str, ext: &str) -> PathBuf {
        self.inner.dir.join(format!("{stem}.{ext}"))
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Check if a key is cached (without updating access time)
    pub fn contains(&self, key: &str) -> bool {
        self.index().entries.contains_key(&Self::stem(key))
    }

    /// Get a cached response
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, NetError> {
        let stem = Self::stem(key);
        if !self.index().entries.contains_key(&stem) {
            return Ok(None);
        }

        let body = match smol::fs::read(self.path(&stem, BODY_EXT)).await {
            Ok(body) => body,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Removed behind our back
                self.index().remove(&stem);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let content_type = smol::fs::read_to_string(self.path(&stem, TYPE_EXT)).await.ok();

        let mut index = self.index();
        let tick = index.tick();
        if let Some(meta) = index.entries.get_mut(&stem) {
            meta.last_accessed = tick;
        }
        Ok(Some(CacheEntry { body, content_type }))
    }

    /// Store a response body
    ///
    /// Bodies larger than the whole cache are skipped.
    pub async fn put(&self, key: &str, body: &[u8], content_type: Option<&str>) -> Result<(), NetError> {
        let size = body.len() as u64;
        if size > self.inner.max_size_bytes {
            tracing::debug!(key, size, "response too large for disk cache");
            return Ok(());
        }

        let stem = Self::stem(key);
        let temp = self.inner.next_temp.fetch_add(1, Ordering::Relaxed);
        let temp_path = self.inner.dir.join(format!("{stem}.{temp}.{TEMP_EXT}"));
        if let Err(err) = self.write_entry(&stem, &temp_path, body, content_type).await {
            let _ = remove_if_exists(temp_path).await;
            return Err(err.into());
        }

        let victims = {
            let mut index = self.index();
            index.insert(stem.clone(), size);
            index.evict_to(self.inner.max_size_bytes, &stem)
        };
        for victim in victims {
            tracing::debug!(entry = %victim, "evicting from disk cache");
            self.remove_files(&victim).await?;
        }
        Ok(())
    }

    async fn write_entry(&self, stem: &str, temp_path: &Path, body: &[u8], content_type: Option<&str>) -> io::Result<()> {
        smol::fs::write(temp_path, body).await?;
        match content_type {
            Some(content_type) => smol::fs::write(self.path(stem, TYPE_EXT), content_type).await?,
            None => remove_if_exists(self.path(stem, TYPE_EXT)).await?,
        }
        smol::fs::rename(temp_path, self.path(stem, BODY_EXT)).await
    }

    /// Remove a cached response
    pub async fn remove(&self, key: &str) -> Result<bool, NetError> {
        let stem = Self::stem(key);
        let removed = self.index().remove(&stem);
        if removed {
            self.remove_files(&stem).await?;
        }
        Ok(removed)
    }

    /// Clear all entries
    pub async fn clear(&self) -> Result<(), NetError> {
        let stems: Vec<String> = {
            let mut index = self.index();
            let stems = index.entries.keys().cloned().collect();
            *index = Index::default();
            stems
        };
        for stem in stems {
            self.remove_files(&stem).await?;
        }
        Ok(())
    }

    async fn remove_files(&self, stem: &str) -> Result<(), NetError> {
        remove_if_exists(self.path(stem, BODY_EXT)).await?;
        remove_if_exists(self.path(stem, TYPE_EXT)).await?;
        Ok(())
    }

    /// Total bytes of cached bodies
    pub fn size_bytes(&self) -> u64 {
        self.index().current_size
    }

    /// Get cache stats
    pub fn stats(&self) -> CacheStats {
        let index = self.index();
        CacheStats {
            entry_count: index.entries.len(),
            total_size: index.current_size,
            max_size: self.inner.max_size_bytes,
        }
    }
}

async fn remove_if_exists(path: PathBuf) -> io::Result<()> {
    match smol::fs::remove_file(&path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size: u64,
    pub max_size: u64,
}

impl CacheStats {
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.total_size as f64 / self.max_size as f64
        }
    }
}
