use super::AsyncReadRange;
use crate::range::ByteRange;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::{Result, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Local file reader, opening the file per request so reads can overlap
#[derive(Clone, Debug)]
pub struct PathReader(PathBuf);

impl PathReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self(path.as_ref().to_path_buf())
    }

    /// Accepts plain paths and `file://` URIs
    pub fn from_uri(uri: &str) -> Self {
        Self::new(uri.strip_prefix("file://").unwrap_or(uri))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl AsyncReadRange for PathReader {
    fn size_async(&self) -> BoxFuture<'_, Result<u64>> {
        async move { Ok(tokio::fs::metadata(&self.0).await?.len()) }.boxed()
    }

    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        async move {
            let mut file = TokioFile::open(&self.0).await?;
            file.seek(SeekFrom::Start(range.start)).await?;
            let mut buffer = Vec::with_capacity(range.len() as usize);
            file.take(range.len()).read_to_end(&mut buffer).await?;
            Ok(buffer)
        }
        .boxed()
    }
}
