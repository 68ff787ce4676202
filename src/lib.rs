mod error;
pub mod cache;
pub mod config;
pub mod range;
pub mod registry;

#[cfg(feature = "async")]
pub mod backend;
#[cfg(feature = "async")]
pub mod io;
#[cfg(feature = "async")]
mod session;

pub use cache::{CacheConfig, CacheKey, CachedBytes, ClearListener, ClearSignal, RemoteCache};
pub use config::{BackendConfig, BackendKind, RemoteObjectHandle, Settings};
pub use error::{CloudRangeError, CloudRangeResult, PartialRead};
pub use range::{compose, merge_chunks, reconcile, ByteRange, ChunkMap, RangeComposer};
pub use registry::{TileEntry, TileRangeRegistry};

#[cfg(feature = "async")]
pub use backend::{BackendFactory, RangeFetch, RangeReadBackend, RangeReader};
#[cfg(feature = "async")]
pub use io::{fs::PathReader, AsyncReadRange};
#[cfg(feature = "http")]
pub use io::http::HttpReader;
#[cfg(feature = "s3")]
pub use io::s3::S3Reader;
#[cfg(feature = "async")]
pub use session::{RangeSession, TileRead};
