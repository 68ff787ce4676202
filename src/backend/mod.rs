// Range-read backends
//   RangeReadBackend is the contract a read session talks to. RangeReader
//   provides it for any AsyncReadRange: header-aware reconciliation, size
//   memoization and bounded concurrent fan-out of range requests.

#![cfg(feature = "async")]

use crate::error::PartialRead;
use crate::io::AsyncReadRange;
use crate::range::{reconcile, ByteRange, ChunkMap};
use crate::{CloudRangeError, CloudRangeResult};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, Semaphore};
use tracing::*;

mod factory;

pub use factory::BackendFactory;

pub trait RangeReadBackend: Send + Sync {
    /// Identifier of the object this backend is bound to
    fn uri(&self) -> &str;

    /// Leading bytes the caller already holds; `read_ranges` never refetches them
    fn header_length(&self) -> u64;

    fn set_header_length(&self, header_length: u64);

    /// Object size known from elsewhere (the shared cache), so `size` needs no request
    fn seed_size(&self, size: u64);

    /// Object size, fetched once per backend
    fn size(&self) -> BoxFuture<'_, CloudRangeResult<u64>>;

    /// Fetches the first `header_length` bytes (fewer for smaller objects) and
    /// records them as the header region.
    fn read_header(&self, header_length: u64) -> BoxFuture<'_, CloudRangeResult<Vec<u8>>>;

    /// Fetches every range not covered by the header concurrently and waits for all of them.
    fn read_ranges(&self, ranges: Vec<ByteRange>) -> BoxFuture<'_, CloudRangeResult<RangeFetch>>;
}

/// Result of one `read_ranges` batch, keyed by the offset of each chunk's first byte
#[derive(Debug, Default)]
pub struct RangeFetch {
    pub chunks: ChunkMap,
    pub failures: Vec<(ByteRange, CloudRangeError)>,
}

impl RangeFetch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The chunks, or a `PartialRead` carrying them if any range failed
    pub fn into_result(self) -> CloudRangeResult<ChunkMap> {
        if self.failures.is_empty() {
            Ok(self.chunks)
        } else {
            Err(CloudRangeError::PartialRead(PartialRead {
                fetched: self.chunks,
                failed: self.failures,
            }))
        }
    }
}

fn lift_io_error(uri: &str, e: io::Error) -> CloudRangeError {
    match e.kind() {
        io::ErrorKind::NotFound => CloudRangeError::NotFound(uri.to_string()),
        _ => CloudRangeError::ReadError(e),
    }
}

/// Backend contract over any `AsyncReadRange`
pub struct RangeReader<R> {
    uri: String,
    reader: Arc<R>,
    header_length: AtomicU64,
    size: OnceCell<u64>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl<R: AsyncReadRange + 'static> RangeReader<R> {
    pub fn new(uri: impl Into<String>, reader: R, header_length: u64) -> Self {
        Self {
            uri: uri.into(),
            reader: Arc::new(reader),
            header_length: AtomicU64::new(header_length),
            size: OnceCell::new(),
            timeout: Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS),
            permits: Arc::new(Semaphore::new(crate::config::DEFAULT_MAX_CONCURRENCY)),
        }
    }

    /// Bound on each individual range request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
        self
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    async fn fetch_size(&self) -> CloudRangeResult<u64> {
        self.size
            .get_or_try_init(|| async {
                let size = tokio::time::timeout(self.timeout, self.reader.size_async())
                    .await
                    .map_err(|_| {
                        warn!("Size of {} timed out after {:?}", self.uri, self.timeout);
                        CloudRangeError::ReadError(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("size of {} timed out after {:?}", self.uri, self.timeout),
                        ))
                    })?
                    .map_err(|e| lift_io_error(&self.uri, e))?;
                debug!("{} is {size} bytes", self.uri);
                Ok::<u64, CloudRangeError>(size)
            })
            .await
            .copied()
    }

    async fn fetch_header(&self, header_length: u64) -> CloudRangeResult<Vec<u8>> {
        let size = self.fetch_size().await?;
        let header = match ByteRange::from_offset_len(0, header_length.min(size)) {
            Some(range) => {
                tokio::time::timeout(self.timeout, self.reader.read_range_exact_async(range))
                    .await
                    .map_err(|_| {
                        warn!("Header {range} of {} timed out after {:?}", self.uri, self.timeout);
                        CloudRangeError::Timeout(range)
                    })?
                    .map_err(|e| lift_io_error(&self.uri, e))?
            }
            None => vec![],
        };
        self.set_header_length(header.len() as u64);
        Ok(header)
    }

    async fn fetch_ranges(&self, ranges: Vec<ByteRange>) -> CloudRangeResult<RangeFetch> {
        let header_length = self.header_length();
        let mut pending = reconcile(&ranges, header_length);
        pending.sort();
        pending.dedup();
        if pending.len() < ranges.len() {
            trace!(
                "{}: {} of {} ranges left after header ({header_length}B)",
                self.uri,
                pending.len(),
                ranges.len()
            );
        }

        let t0 = Instant::now();
        let tasks = pending.iter().map(|range| {
            let range = *range;
            let reader = self.reader.clone();
            let permits = self.permits.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| io::Error::other(format!("{e:?}")))?;
                match tokio::time::timeout(timeout, reader.read_range_exact_async(range)).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{range} timed out after {timeout:?}"),
                    )),
                }
            })
        });
        let results = join_all(tasks).await;

        let mut fetch = RangeFetch::default();
        for (range, result) in pending.into_iter().zip(results) {
            match result {
                Ok(Ok(bytes)) => {
                    fetch.chunks.insert(range.start, bytes);
                }
                Ok(Err(e)) => {
                    warn!("Failed to read {range} of {}: {e}", self.uri);
                    let error = match e.kind() {
                        io::ErrorKind::TimedOut => CloudRangeError::Timeout(range),
                        _ => lift_io_error(&self.uri, e),
                    };
                    fetch.failures.push((range, error));
                }
                Err(e) => {
                    warn!("Failed to join while reading {range} of {}: {e:?}", self.uri);
                    fetch.failures.push((range, CloudRangeError::AsyncJoinError(e)));
                }
            }
        }
        debug!(
            "{}: fetched {} ranges ({} failed) in {}ms",
            self.uri,
            fetch.chunks.len(),
            fetch.failures.len(),
            t0.elapsed().as_millis()
        );

        Ok(fetch)
    }
}

impl<R: AsyncReadRange + 'static> RangeReadBackend for RangeReader<R> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn header_length(&self) -> u64 {
        self.header_length.load(Ordering::Acquire)
    }

    fn set_header_length(&self, header_length: u64) {
        self.header_length.store(header_length, Ordering::Release);
    }

    fn seed_size(&self, size: u64) {
        // First size wins
        let _ = self.size.set(size);
    }

    fn size(&self) -> BoxFuture<'_, CloudRangeResult<u64>> {
        self.fetch_size().boxed()
    }

    fn read_header(&self, header_length: u64) -> BoxFuture<'_, CloudRangeResult<Vec<u8>>> {
        self.fetch_header(header_length).boxed()
    }

    fn read_ranges(&self, ranges: Vec<ByteRange>) -> BoxFuture<'_, CloudRangeResult<RangeFetch>> {
        self.fetch_ranges(ranges).boxed()
    }
}

impl<R> std::fmt::Debug for RangeReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeReader")
            .field("uri", &self.uri)
            .field("header_length", &self.header_length)
            .field("size", &self.size.get())
            .field("timeout", &self.timeout)
            .finish()
    }
}
