// Cross-instance cache
//   Shared by every read session in the process. Entries can vanish at any
//   time under the size bounds, so a miss after an earlier hit is normal.

use crate::config::Settings;
use crate::CloudRangeResult;
use moka::sync::Cache;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

mod signal;
#[cfg(feature = "async")]
mod connections;

pub use signal::{ClearListener, ClearSignal};
#[cfg(feature = "async")]
pub use connections::ConnectionCache;

pub type CachedBytes = Arc<Vec<u8>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub uri: String,
    pub tile_index: usize,
}

impl CacheKey {
    pub fn new(uri: impl Into<String>, tile_index: usize) -> Self {
        Self {
            uri: uri.into(),
            tile_index,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.uri, self.tile_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_tile_bytes: u64,
    pub max_header_bytes: u64,
    pub max_size_entries: u64,
    pub time_to_idle: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tile_bytes: 256 * 1024 * 1024,
            max_header_bytes: 64 * 1024 * 1024,
            max_size_entries: 10_000,
            time_to_idle: None,
        }
    }
}

impl CacheConfig {
    pub fn from_settings(settings: &Settings) -> CloudRangeResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_tile_bytes: settings
                .get_parsed("cache.tile_bytes")?
                .unwrap_or(defaults.max_tile_bytes),
            max_header_bytes: settings
                .get_parsed("cache.header_bytes")?
                .unwrap_or(defaults.max_header_bytes),
            max_size_entries: settings
                .get_parsed("cache.size_entries")?
                .unwrap_or(defaults.max_size_entries),
            time_to_idle: settings
                .get_parsed::<u64>("cache.idle_secs")?
                .map(Duration::from_secs),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tiles: u64,
    pub tile_bytes: u64,
    pub headers: u64,
    pub header_bytes: u64,
    pub file_sizes: u64,
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheStats({} tiles / {}B, {} headers / {}B, {} sizes)",
            self.tiles, self.tile_bytes, self.headers, self.header_bytes, self.file_sizes
        )
    }
}

fn byte_weigher<K>(_key: &K, bytes: &CachedBytes) -> u32 {
    bytes.len().try_into().unwrap_or(u32::MAX)
}

fn bytes_store<K>(max_bytes: u64, time_to_idle: Option<Duration>) -> Cache<K, CachedBytes>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
{
    let builder = Cache::builder()
        .max_capacity(max_bytes)
        .weigher(byte_weigher::<K>);
    match time_to_idle {
        Some(idle) => builder.time_to_idle(idle).build(),
        None => builder.build(),
    }
}

/// Tile bytes, header bytes and object sizes shared across read sessions
pub struct RemoteCache {
    tiles: Cache<CacheKey, CachedBytes>,
    headers: Cache<String, CachedBytes>,
    file_sizes: Cache<String, u64>,
    signal: ClearSignal,
}

impl RemoteCache {
    /// Creates a cache subscribed to `signal`, so a notify clears it.
    pub fn new(config: CacheConfig, signal: ClearSignal) -> Arc<Self> {
        let mut file_sizes = Cache::builder().max_capacity(config.max_size_entries);
        if let Some(idle) = config.time_to_idle {
            file_sizes = file_sizes.time_to_idle(idle);
        }
        let cache = Arc::new(Self {
            tiles: bytes_store(config.max_tile_bytes, config.time_to_idle),
            headers: bytes_store(config.max_header_bytes, config.time_to_idle),
            file_sizes: file_sizes.build(),
            signal: signal.clone(),
        });
        signal.subscribe(&cache);
        cache
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(CacheConfig::default(), ClearSignal::new())
    }

    pub fn signal(&self) -> &ClearSignal {
        &self.signal
    }

    pub fn get_tile(&self, key: &CacheKey) -> Option<CachedBytes> {
        let hit = self.tiles.get(key);
        trace!("tile {key}: {}", if hit.is_some() { "hit" } else { "miss" });
        hit
    }

    pub fn put_tile(&self, key: CacheKey, bytes: CachedBytes) {
        self.tiles.insert(key, bytes);
    }

    pub fn has_tile(&self, key: &CacheKey) -> bool {
        self.tiles.contains_key(key)
    }

    pub fn get_header(&self, uri: &str) -> Option<CachedBytes> {
        self.headers.get(uri)
    }

    pub fn put_header(&self, uri: &str, bytes: CachedBytes) {
        self.headers.insert(uri.to_string(), bytes);
    }

    pub fn has_header(&self, uri: &str) -> bool {
        self.headers.contains_key(uri)
    }

    pub fn get_file_size(&self, uri: &str) -> Option<u64> {
        self.file_sizes.get(uri)
    }

    pub fn put_file_size(&self, uri: &str, size: u64) {
        self.file_sizes.insert(uri.to_string(), size);
    }

    pub fn has_file_size(&self, uri: &str) -> bool {
        self.file_sizes.contains_key(uri)
    }

    /// Clears this cache and every other listener on its signal.
    pub fn clear(&self) {
        self.signal.notify();
    }

    pub fn stats(&self) -> CacheStats {
        self.tiles.run_pending_tasks();
        self.headers.run_pending_tasks();
        self.file_sizes.run_pending_tasks();
        CacheStats {
            tiles: self.tiles.entry_count(),
            tile_bytes: self.tiles.weighted_size(),
            headers: self.headers.entry_count(),
            header_bytes: self.headers.weighted_size(),
            file_sizes: self.file_sizes.entry_count(),
        }
    }
}

impl ClearListener for RemoteCache {
    fn cleared(&self) {
        self.tiles.invalidate_all();
        self.headers.invalidate_all();
        self.file_sizes.invalidate_all();
    }
}

impl std::fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("tiles", &self.tiles.entry_count())
            .field("headers", &self.headers.entry_count())
            .field("file_sizes", &self.file_sizes.entry_count())
            .finish()
    }
}
