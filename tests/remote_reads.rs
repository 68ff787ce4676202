#![cfg(feature = "async")]

use cloudrange::{
    AsyncReadRange, BackendConfig, BackendKind, ByteRange, CloudRangeError, RangeReadBackend,
    RangeReader, RangeSession, RemoteCache, RemoteObjectHandle, Settings,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const OBJECT_SIZE: usize = 8192;

/// In-memory object with uneven per-range latency
#[derive(Default)]
struct FakeObject {
    bytes: Vec<u8>,
    reads: AtomicUsize,
    size_requests: AtomicUsize,
    hang_at: Option<u64>,
    delays: HashMap<u64, u64>,
    missing: bool,
}

impl FakeObject {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bytes: expected(0, OBJECT_SIZE as u64),
            ..Default::default()
        })
    }

    fn hanging_at(offset: u64) -> Arc<Self> {
        Arc::new(Self {
            bytes: expected(0, OBJECT_SIZE as u64),
            hang_at: Some(offset),
            ..Default::default()
        })
    }

    /// Per-range delays in milliseconds, keyed by range start
    fn with_delays(delays: HashMap<u64, u64>) -> Arc<Self> {
        Arc::new(Self {
            bytes: expected(0, OBJECT_SIZE as u64),
            delays,
            ..Default::default()
        })
    }

    fn missing() -> Arc<Self> {
        Arc::new(Self {
            missing: true,
            ..Default::default()
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn size_requests(&self) -> usize {
        self.size_requests.load(Ordering::SeqCst)
    }
}

/// xorshift64, enough to scramble delays reproducibly
fn shuffled_delays(seed: u64, n: usize, max_ms: u64) -> Vec<u64> {
    let mut state = seed.max(1);
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state % max_ms
        })
        .collect()
}

impl AsyncReadRange for FakeObject {
    fn size_async(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            self.size_requests.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(Error::new(ErrorKind::NotFound, "no such object"));
            }
            Ok(self.bytes.len() as u64)
        })
    }

    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(Error::new(ErrorKind::NotFound, "no such object"));
            }
            if self.hang_at == Some(range.start) {
                futures::future::pending::<()>().await;
            }
            let delay = match self.delays.get(&range.start) {
                Some(ms) => *ms,
                None => (range.start / 100) % 7,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let start = (range.start as usize).min(self.bytes.len());
            let end = (range.end_exclusive() as usize).min(self.bytes.len());
            Ok(self.bytes[start..end].to_vec())
        })
    }
}

fn expected(start: u64, end_exclusive: u64) -> Vec<u8> {
    (start..end_exclusive).map(|i| (i % 251) as u8).collect()
}

fn r(start: u64, end: u64) -> ByteRange {
    ByteRange { start, end }
}

fn handle(uri: &str, use_cache: bool) -> RemoteObjectHandle {
    let settings = Settings::new().with_env_lookup(|_| None);
    let config = BackendConfig::resolve(&settings, BackendKind::File).unwrap();
    RemoteObjectHandle::new(uri, use_cache, Arc::new(config))
}

fn session(
    uri: &str,
    object: &Arc<FakeObject>,
    cache: &Arc<RemoteCache>,
    header_length: u64,
) -> RangeSession {
    let backend: Arc<dyn RangeReadBackend> = Arc::new(
        RangeReader::new(uri, object.clone(), header_length)
            .with_timeout(Duration::from_millis(200)),
    );
    RangeSession::new(handle(uri, true), backend, cache.clone(), header_length)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn disjoint_ranges_come_back_keyed_by_start() {
    init_logging();
    let object = FakeObject::new();
    let backend = RangeReader::new("mem://disjoint", object.clone(), 0);

    let fetch = backend
        .read_ranges(vec![r(1000, 1009), r(100, 199), r(300, 349)])
        .await
        .unwrap();

    assert!(fetch.is_complete());
    assert_eq!(
        fetch.chunks.keys().copied().collect::<Vec<_>>(),
        vec![100, 300, 1000]
    );
    assert_eq!(fetch.chunks[&100], expected(100, 200));
    assert_eq!(fetch.chunks[&300], expected(300, 350));
    assert_eq!(fetch.chunks[&1000], expected(1000, 1010));
    assert_eq!(object.reads(), 3);
}

#[tokio::test]
async fn completion_order_does_not_change_keys() {
    let starts: Vec<u64> = (0..16).map(|i| i * 400 + 10).collect();
    let mut delays: HashMap<u64, u64> = starts
        .iter()
        .copied()
        .zip(shuffled_delays(0x5eed, starts.len(), 40))
        .collect();
    // First submitted finishes last
    delays.insert(starts[0], 80);
    let object = FakeObject::with_delays(delays);
    let backend = RangeReader::new("mem://shuffled", object.clone(), 0);

    let ranges: Vec<ByteRange> = starts.iter().map(|start| r(*start, start + 49)).collect();
    let fetch = backend.read_ranges(ranges).await.unwrap();

    assert!(fetch.is_complete());
    assert_eq!(fetch.chunks.keys().copied().collect::<Vec<_>>(), starts);
    for start in starts {
        assert_eq!(fetch.chunks[&start], expected(start, start + 50));
    }
}

#[tokio::test]
async fn hanging_header_read_times_out() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::hanging_at(0);
    let backend: Arc<dyn RangeReadBackend> = Arc::new(
        RangeReader::new("mem://slow-header", object.clone(), 256)
            .with_timeout(Duration::from_millis(50)),
    );
    let mut reader =
        RangeSession::new(handle("mem://slow-header", true), backend, cache.clone(), 256);
    reader.register_tile(0, 1000, 10);

    let header = tokio::time::timeout(Duration::from_secs(2), reader.header())
        .await
        .expect("header read is bounded by the backend timeout");
    assert!(matches!(header, Err(CloudRangeError::Timeout(range)) if range == r(0, 255)));
    assert!(!cache.has_header("mem://slow-header"));

    let tiles = tokio::time::timeout(Duration::from_secs(2), reader.read_tiles(&[0]))
        .await
        .expect("tile read is bounded by the backend timeout");
    assert!(matches!(tiles, Err(CloudRangeError::Timeout(_))));
}

#[tokio::test]
async fn hanging_range_times_out_alone() {
    init_logging();
    let object = FakeObject::hanging_at(500);
    let backend = RangeReader::new("mem://hang", object.clone(), 0)
        .with_timeout(Duration::from_millis(50));

    let fetch = backend
        .read_ranges(vec![r(100, 199), r(500, 599), r(700, 799)])
        .await
        .unwrap();

    assert_eq!(fetch.chunks.len(), 2);
    assert_eq!(fetch.failures.len(), 1);
    assert!(matches!(
        fetch.failures[0],
        (range, CloudRangeError::Timeout(timed_out)) if range == r(500, 599) && timed_out == range
    ));
    assert!(matches!(
        fetch.into_result(),
        Err(CloudRangeError::PartialRead(partial)) if partial.fetched.len() == 2
    ));
}

#[tokio::test]
async fn concurrency_limit_still_reads_everything() {
    let object = FakeObject::new();
    let backend = RangeReader::new("mem://narrow", object.clone(), 0).with_max_concurrency(1);

    let ranges: Vec<ByteRange> = (0..20).map(|i| r(i * 200, i * 200 + 99)).collect();
    let fetch = backend.read_ranges(ranges).await.unwrap();

    assert!(fetch.is_complete());
    assert_eq!(fetch.chunks.len(), 20);
    assert_eq!(object.reads(), 20);
}

#[tokio::test]
async fn tiles_are_shared_across_sessions() {
    init_logging();
    let cache = RemoteCache::with_defaults();

    let first = FakeObject::new();
    let mut reader = session("mem://shared", &first, &cache, 256);
    reader.register_tile(0, 1000, 100);
    reader.register_tile(1, 1100, 100);
    reader.register_tile(2, 2000, 50);
    let read = reader.read_tiles(&[0, 1, 2]).await.unwrap();

    assert!(read.is_complete());
    assert_eq!(*read.tiles[&0], expected(1000, 1100));
    assert_eq!(*read.tiles[&1], expected(1100, 1200));
    assert_eq!(*read.tiles[&2], expected(2000, 2050));
    // Header, then tiles 0 and 1 in one request, then tile 2
    assert_eq!(first.reads(), 3);

    let second = FakeObject::new();
    let mut reader = session("mem://shared", &second, &cache, 256);
    reader.register_tile(0, 1000, 100);
    reader.register_tile(1, 1100, 100);
    reader.register_tile(2, 2000, 50);
    let read = reader.read_tiles(&[2, 0, 1]).await.unwrap();

    assert_eq!(read.tiles.len(), 3);
    assert_eq!(*read.tiles[&1], expected(1100, 1200));
    assert_eq!(second.reads(), 0);
}

#[tokio::test]
async fn clearing_the_cache_forces_refetch() {
    let cache = RemoteCache::with_defaults();
    let first = FakeObject::new();
    let mut reader = session("mem://clear", &first, &cache, 256);
    reader.register_tile(0, 4000, 64);
    reader.read_tiles(&[0]).await.unwrap();
    assert!(cache.has_header("mem://clear"));

    cache.clear();
    assert!(!cache.has_header("mem://clear"));

    let second = FakeObject::new();
    let mut reader = session("mem://clear", &second, &cache, 256);
    reader.register_tile(0, 4000, 64);
    let read = reader.read_tiles(&[0]).await.unwrap();
    assert_eq!(*read.tiles[&0], expected(4000, 4064));
    assert_eq!(second.reads(), 2);
}

#[tokio::test]
async fn uncached_handle_always_fetches() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::new();
    let backend: Arc<dyn RangeReadBackend> =
        Arc::new(RangeReader::new("mem://nocache", object.clone(), 128));
    let mut reader = RangeSession::new(handle("mem://nocache", false), backend, cache.clone(), 128);
    reader.register_tile(7, 512, 32);

    reader.read_tiles(&[7]).await.unwrap();
    reader.read_tiles(&[7]).await.unwrap();

    // One header read, then the tile twice
    assert_eq!(object.reads(), 3);
    assert!(!cache.has_header("mem://nocache"));
    assert_eq!(cache.stats().tiles, 0);
}

#[tokio::test]
async fn missing_object_is_none_and_not_cached() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::missing();
    let mut reader = session("mem://missing", &object, &cache, 256);

    assert_eq!(reader.size().await.unwrap(), None);
    assert!(reader.header().await.unwrap().is_none());
    assert!(!cache.has_file_size("mem://missing"));
    assert!(!cache.has_header("mem://missing"));

    reader.register_tile(0, 1000, 10);
    let result = reader.read_tiles(&[0]).await;
    assert!(matches!(result, Err(e) if e.is_not_found()));
}

#[tokio::test]
async fn tiles_inside_header_come_from_header_bytes() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::new();
    let mut reader = session("mem://header", &object, &cache, 1024);
    // Entirely inside, straddling, then just past the header
    reader.register_tile(0, 600, 200);
    reader.register_tile(1, 1000, 100);
    reader.register_tile(2, 1100, 50);
    assert_eq!(reader.registry().header_size(), 599);

    let read = reader.read_tiles(&[0, 1, 2]).await.unwrap();

    assert!(read.is_complete());
    assert_eq!(*read.tiles[&0], expected(600, 800));
    assert_eq!(*read.tiles[&1], expected(1000, 1100));
    assert_eq!(*read.tiles[&2], expected(1100, 1150));
    // Header, then only the bytes past it
    assert_eq!(object.reads(), 2);
}

#[tokio::test]
async fn failed_tiles_are_reported_and_not_cached() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::hanging_at(2000);
    let mut reader = session("mem://partial", &object, &cache, 256);
    reader.register_tile(0, 1000, 100);
    reader.register_tile(1, 2000, 100);
    reader.register_tile(2, 3000, 100);

    let read = reader.read_tiles(&[0, 1, 2]).await.unwrap();

    assert_eq!(read.tiles.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(read.failed.len(), 1);
    assert_eq!(read.failed[0].0, 1);
    assert!(read.failed[0].1.contains("Timeout"));
    assert!(cache.has_tile(&cloudrange::CacheKey::new("mem://partial", 0)));
    assert!(!cache.has_tile(&cloudrange::CacheKey::new("mem://partial", 1)));
    assert!(matches!(
        read.into_result(),
        Err(CloudRangeError::MissingTiles(missing)) if missing.len() == 1
    ));
}

#[tokio::test]
async fn tile_past_address_space_is_reported() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::new();
    let mut reader = session("mem://overflow", &object, &cache, 256);
    reader.register_tile(0, 1000, 10);
    reader.register_tile(1, u64::MAX - 5, 100);

    let read = reader.read_tiles(&[0, 1]).await.unwrap();

    assert_eq!(read.tiles.keys().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(read.failed.len(), 1);
    assert_eq!(read.failed[0].0, 1);
    assert!(!read.is_complete());
    assert!(matches!(read.into_result(), Err(CloudRangeError::MissingTiles(_))));
}

#[tokio::test]
async fn cached_size_skips_size_request() {
    let cache = RemoteCache::with_defaults();
    cache.put_file_size("mem://sized", OBJECT_SIZE as u64);
    let object = FakeObject::new();
    let mut reader = session("mem://sized", &object, &cache, 256);
    reader.register_tile(0, 3000, 20);

    let read = reader.read_tiles(&[0]).await.unwrap();

    assert_eq!(*read.tiles[&0], expected(3000, 3020));
    assert_eq!(reader.size().await.unwrap(), Some(OBJECT_SIZE as u64));
    assert_eq!(object.size_requests(), 0);
}

#[tokio::test]
async fn unknown_tile_is_an_error() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::new();
    let mut reader = session("mem://unknown", &object, &cache, 256);
    reader.register_tile(0, 1000, 100);

    let result = reader.read_tiles(&[0, 9]).await;
    assert!(matches!(result, Err(CloudRangeError::UnknownTile(9))));
}

#[tokio::test]
async fn session_range_reads_include_header_bytes() {
    let cache = RemoteCache::with_defaults();
    let object = FakeObject::new();
    let mut reader = session("mem://ranges", &object, &cache, 512);

    let fetch = reader.read_ranges(&[r(100, 199), r(400, 699), r(5000, 5099)]).await.unwrap();

    assert!(fetch.is_complete());
    let chunks = fetch.into_result().unwrap();
    assert_eq!(chunks.keys().copied().collect::<Vec<_>>(), vec![0, 5000]);
    assert_eq!(chunks[&0], expected(0, 700));
    assert_eq!(chunks[&5000], expected(5000, 5100));
}
