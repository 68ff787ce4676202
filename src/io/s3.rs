#![cfg(feature = "s3")]

use super::AsyncReadRange;
use crate::range::ByteRange;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::Client;
use futures::future::BoxFuture;
use std::fmt;
use std::io::{Error, ErrorKind, Result};

pub struct S3Reader {
    client: Client,
    bucket: String,
    key: String,
}

impl S3Reader {
    pub fn new(client: Client, bucket: &str, key: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn map_sdk_error<E: fmt::Debug>(&self, err: SdkError<E>) -> Error {
        if let SdkError::ServiceError(ref service_err) = err {
            match service_err.raw().status().as_u16() {
                404 => {
                    return Error::new(
                        ErrorKind::NotFound,
                        format!("s3://{}/{} not found", self.bucket, self.key),
                    )
                }
                416 => {
                    return Error::new(
                        ErrorKind::InvalidInput,
                        format!("Range not satisfiable for s3://{}/{}", self.bucket, self.key),
                    )
                }
                401 | 403 => {
                    return Error::new(ErrorKind::PermissionDenied, format!("{err:?}"));
                }
                _ => {}
            }
        }
        Error::new(ErrorKind::NotConnected, format!("{err:?}"))
    }
}

impl fmt::Debug for S3Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Reader")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .finish()
    }
}

impl AsyncReadRange for S3Reader {
    fn size_async(&self) -> BoxFuture<'_, Result<u64>> {
        let request = self.client.head_object().bucket(&self.bucket).key(&self.key);

        Box::pin(async move {
            let response = request.send().await.map_err(|e| self.map_sdk_error(e))?;
            response
                .content_length()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidData,
                        format!("No content length for s3://{}/{}", self.bucket, self.key),
                    )
                })
        })
    }

    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range.http_header()); // GOTCHA byte range includes end

        Box::pin(async move {
            let response = request.send().await.map_err(|e| self.map_sdk_error(e))?;
            let bytes = response.body.collect().await.map_err(|err| {
                Error::new(
                    ErrorKind::Interrupted,
                    format!("Failed to read from S3 download stream: {err:?}"),
                )
            })?;
            Ok(bytes.into_bytes().to_vec())
        })
    }
}
