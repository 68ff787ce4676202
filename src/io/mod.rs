// I/O Traits
//   AsyncReadRange is stateless I/O against one remote object
//   Key difference from AsyncRead + AsyncSeek is self is immutable, which is what
//   lets many byte-range requests against the same object run at once
//   Required methods
//     fn size_async(&self) -> BoxFuture<Result<u64>>
//     fn read_range_async(&self, range: ByteRange) -> BoxFuture<Result<Vec<u8>>>
//   Provided methods
//     fn read_range_exact_async(&self, range: ByteRange) -> BoxFuture<Result<Vec<u8>>>

#![cfg(feature = "async")]

use crate::range::ByteRange;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::{Error, ErrorKind, Result, SeekFrom};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::Mutex as TokioMutex;

pub mod fs;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "s3")]
pub mod s3;

pub trait AsyncReadRange: Send + Sync {
    /// Total size of the object in bytes
    fn size_async(&self) -> BoxFuture<'_, Result<u64>>;

    /// Asynchronously read the bytes of an inclusive range
    ///
    /// May return fewer bytes than requested at the end of the object. A
    /// missing object is reported as `ErrorKind::NotFound`.
    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>>;

    fn read_range_exact_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        let n = range.len();
        async move {
            match self.read_range_async(range).await {
                Ok(bytes) if bytes.len() as u64 == n => Ok(bytes),
                Ok(bytes) => Err(Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("Short read for {range}: {} < {n}", bytes.len()),
                )),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }
}

impl<R: AsyncReadRange + ?Sized> AsyncReadRange for Arc<R> {
    fn size_async(&self) -> BoxFuture<'_, Result<u64>> {
        (**self).size_async()
    }

    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        (**self).read_range_async(range)
    }
}

impl<R: AsyncRead + AsyncSeek + Send + Sync + Unpin> AsyncReadRange for TokioMutex<R> {
    fn size_async(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut locked_self = self.lock().await;
            locked_self.seek(SeekFrom::End(0)).await
        })
    }

    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        // Yes, it is rather ugly... but so is async.
        Box::pin(async move {
            let mut locked_self = self.lock().await;
            locked_self.seek(SeekFrom::Start(range.start)).await?;
            let mut buf = Vec::with_capacity(range.len() as usize);
            (&mut *locked_self).take(range.len()).read_to_end(&mut buf).await?;
            Ok(buf)
        })
    }
}
