#![cfg(feature = "async")]

use crate::backend::{BackendFactory, RangeFetch, RangeReadBackend};
use crate::cache::{CacheKey, CachedBytes, RemoteCache};
use crate::config::RemoteObjectHandle;
use crate::range::{compose, merge_chunks, reconcile, ByteRange, ChunkMap};
use crate::registry::{TileEntry, TileRangeRegistry};
use crate::{CloudRangeError, CloudRangeResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::*;

/// Tiles produced by one `read_tiles` call
#[derive(Debug, Default)]
pub struct TileRead {
    pub tiles: BTreeMap<usize, CachedBytes>,
    pub failed: Vec<(usize, String)>,
}

impl TileRead {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self) -> CloudRangeResult<BTreeMap<usize, CachedBytes>> {
        if self.failed.is_empty() {
            Ok(self.tiles)
        } else {
            Err(CloudRangeError::MissingTiles(self.failed))
        }
    }
}

/// Bytes of `range` out of merged chunks, if one chunk covers all of it
fn slice_chunk(chunks: &ChunkMap, range: ByteRange) -> Option<Vec<u8>> {
    let (start, bytes) = chunks.range(..=range.start).next_back()?;
    let from = (range.start - start) as usize;
    let to = from + range.len() as usize;
    bytes.get(from..to).map(|slice| slice.to_vec())
}

/// One reader's view of a remote object.
///
/// Tiles are registered as the format parser discovers them, then read in
/// batches. Header, size and tile bytes go through the shared cache unless
/// the handle opts out.
pub struct RangeSession {
    handle: RemoteObjectHandle,
    backend: Arc<dyn RangeReadBackend>,
    cache: Arc<RemoteCache>,
    registry: TileRangeRegistry,
    header_length: u64,
    header: Option<CachedBytes>,
}

impl RangeSession {
    pub fn new(
        handle: RemoteObjectHandle,
        backend: Arc<dyn RangeReadBackend>,
        cache: Arc<RemoteCache>,
        header_length: u64,
    ) -> Self {
        Self {
            handle,
            backend,
            cache,
            registry: TileRangeRegistry::new(header_length.saturating_sub(1)),
            header_length,
            header: None,
        }
    }

    pub async fn open(
        factory: &BackendFactory,
        cache: Arc<RemoteCache>,
        handle: RemoteObjectHandle,
        header_length: u64,
    ) -> CloudRangeResult<Self> {
        let backend = factory.open(&handle, header_length).await?;
        Ok(Self::new(handle, backend, cache, header_length))
    }

    pub fn handle(&self) -> &RemoteObjectHandle {
        &self.handle
    }

    pub fn backend(&self) -> &Arc<dyn RangeReadBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &TileRangeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TileRangeRegistry {
        &mut self.registry
    }

    pub fn register_tile(&mut self, index: usize, offset: u64, byte_length: u64) -> TileEntry {
        self.registry.register(index, offset, byte_length)
    }

    fn use_cache(&self) -> bool {
        self.handle.use_cache()
    }

    /// Object size, or None if the object doesn't exist
    pub async fn size(&self) -> CloudRangeResult<Option<u64>> {
        let uri = self.handle.uri();
        if self.use_cache() {
            if let Some(size) = self.cache.get_file_size(uri) {
                return Ok(Some(size));
            }
        }
        match self.backend.size().await {
            Ok(size) => {
                if self.use_cache() {
                    self.cache.put_file_size(uri, size);
                }
                Ok(Some(size))
            }
            Err(CloudRangeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Header bytes, or None if the object doesn't exist
    pub async fn header(&mut self) -> CloudRangeResult<Option<CachedBytes>> {
        if let Some(header) = &self.header {
            return Ok(Some(header.clone()));
        }

        let uri = self.handle.uri().to_string();
        let cached = match self.use_cache() {
            true => self.cache.get_header(&uri),
            false => None,
        };
        if cached.is_none() && self.use_cache() {
            if let Some(size) = self.cache.get_file_size(&uri) {
                self.backend.seed_size(size);
            }
        }
        let header = match cached {
            Some(header) => header,
            None => match self.backend.read_header(self.header_length).await {
                Ok(bytes) => {
                    let header = Arc::new(bytes);
                    if self.use_cache() {
                        self.cache.put_header(&uri, header.clone());
                    }
                    header
                }
                Err(CloudRangeError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            },
        };

        // Whatever we hold is never fetched again
        self.backend.set_header_length(header.len() as u64);
        self.header = Some(header.clone());
        Ok(Some(header))
    }

    async fn require_header(&mut self) -> CloudRangeResult<CachedBytes> {
        self.header()
            .await?
            .ok_or_else(|| CloudRangeError::NotFound(self.handle.uri().to_string()))
    }

    /// Reads registered tiles, serving what it can from the cache.
    ///
    /// Missing tiles are fetched with coalesced range requests. Tiles whose
    /// bytes could not be fetched are listed in `TileRead::failed`; the rest
    /// are returned and cached.
    pub async fn read_tiles(&mut self, indices: &[usize]) -> CloudRangeResult<TileRead> {
        let header = self.require_header().await?;
        let uri = self.handle.uri().to_string();

        let mut read = TileRead::default();
        let mut missing: Vec<TileEntry> = vec![];
        for index in indices {
            let tile = *self
                .registry
                .get(*index)
                .ok_or(CloudRangeError::UnknownTile(*index))?;
            if tile.byte_length == 0 {
                read.tiles.insert(tile.index, Arc::new(vec![]));
                continue;
            }
            if self.use_cache() {
                if let Some(bytes) = self.cache.get_tile(&CacheKey::new(uri.as_str(), tile.index)) {
                    read.tiles.insert(tile.index, bytes);
                    continue;
                }
            }
            missing.push(tile);
        }
        if missing.is_empty() {
            return Ok(read);
        }

        let ranges = self.registry.ranges_for(missing.iter().map(|tile| tile.index));
        let composed = compose(ranges);
        let requested = reconcile(&composed, header.len() as u64);
        debug!(
            "{uri}: {} tiles missing, {} ranges after composing, {} to fetch",
            missing.len(),
            composed.len(),
            requested.len()
        );

        let RangeFetch { chunks, failures } = self.backend.read_ranges(requested).await?;
        let needs_header = missing
            .iter()
            .any(|tile| tile.offset < header.len() as u64);
        let merged = match needs_header {
            true => merge_chunks(chunks.into_iter().chain([(0, header.to_vec())])),
            false => merge_chunks(chunks),
        };

        for tile in missing {
            let Some(range) = tile.range() else {
                let reason = format!(
                    "{} bytes at {} run past the end of the address space",
                    tile.byte_length, tile.offset
                );
                warn!("{uri}: tile {} unavailable: {reason}", tile.index);
                read.failed.push((tile.index, reason));
                continue;
            };
            match slice_chunk(&merged, range) {
                Some(bytes) => {
                    let bytes = Arc::new(bytes);
                    if self.use_cache() {
                        self.cache
                            .put_tile(CacheKey::new(uri.as_str(), tile.index), bytes.clone());
                    }
                    read.tiles.insert(tile.index, bytes);
                }
                None => {
                    let reason = failures
                        .iter()
                        .find(|(failed, _)| failed.start <= range.end && range.start <= failed.end)
                        .map(|(_, e)| e.to_string())
                        .unwrap_or_else(|| format!("{range} not covered by fetched bytes"));
                    warn!("{uri}: tile {} unavailable: {reason}", tile.index);
                    read.failed.push((tile.index, reason));
                }
            }
        }

        Ok(read)
    }

    /// Reads arbitrary ranges and returns them merged, header bytes included where requested.
    pub async fn read_ranges(&mut self, ranges: &[ByteRange]) -> CloudRangeResult<RangeFetch> {
        let header = self.require_header().await?;
        let header_length = header.len() as u64;

        let requested = reconcile(ranges, header_length);
        let RangeFetch { chunks, failures } = self.backend.read_ranges(requested).await?;

        let needs_header = ranges.iter().any(|range| range.start < header_length);
        let chunks = match needs_header {
            true => merge_chunks(chunks.into_iter().chain([(0, header.to_vec())])),
            false => merge_chunks(chunks),
        };
        Ok(RangeFetch { chunks, failures })
    }
}

impl std::fmt::Debug for RangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeSession")
            .field("handle", &self.handle)
            .field("registry", &self.registry)
            .field("header_length", &self.header_length)
            .field("header", &self.header.as_ref().map(|h| h.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_tiles_out_of_merged_chunks() {
        let mut chunks = ChunkMap::new();
        chunks.insert(0, (0..100).collect());
        chunks.insert(200, (200..250).map(|i| i as u8).collect());

        let tile = ByteRange { start: 10, end: 12 };
        assert_eq!(slice_chunk(&chunks, tile), Some(vec![10, 11, 12]));
        let tile = ByteRange { start: 210, end: 211 };
        assert_eq!(slice_chunk(&chunks, tile), Some(vec![210, 211]));
        // Runs past the end of the first chunk
        assert_eq!(slice_chunk(&chunks, ByteRange { start: 95, end: 105 }), None);
        // Falls in the gap
        assert_eq!(slice_chunk(&chunks, ByteRange { start: 150, end: 160 }), None);
    }

    #[test]
    fn tile_read_result() {
        let mut read = TileRead::default();
        read.tiles.insert(1, Arc::new(vec![1]));
        assert!(read.is_complete());
        read.failed.push((2, "timed out".into()));
        assert!(matches!(
            read.into_result(),
            Err(CloudRangeError::MissingTiles(failed)) if failed[0].0 == 2
        ));
    }
}
