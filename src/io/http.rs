use super::AsyncReadRange;
use crate::config::HttpSettings;
use crate::range::ByteRange;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, IntoUrl, RequestBuilder, Response, StatusCode, Url};
use std::io::{Error, ErrorKind, Result};
use tracing::*;

#[derive(Clone)]
pub struct HttpReader {
    client: Client,
    url: Url,
    auth: HttpSettings,
}

impl HttpReader {
    pub fn new<U: IntoUrl>(url: U) -> Result<Self> {
        Self::with_client(Client::new(), url, HttpSettings::default())
    }

    /// Reader sharing an existing connection pool
    pub fn with_client<U: IntoUrl>(client: Client, url: U, auth: HttpSettings) -> Result<Self> {
        Ok(Self {
            client,
            url: url
                .into_url()
                .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("{e:?}")))?,
            auth,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth.user {
            Some(user) => request.basic_auth(user, self.auth.password.as_ref()),
            None => request,
        }
    }

    fn check_status(&self, response: &Response) -> Result<()> {
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::new(
                ErrorKind::NotFound,
                format!("{} not found", self.url),
            )),
            StatusCode::RANGE_NOT_SATISFIABLE => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Range not satisfiable for {}", self.url),
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::new(
                ErrorKind::PermissionDenied,
                format!("{} for {}", response.status(), self.url),
            )),
            status => Err(Error::other(format!("{status} for {}", self.url))),
        }
    }
}

impl std::fmt::Debug for HttpReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReader")
            .field("url", &self.url.as_str())
            .field("user", &self.auth.user)
            .finish()
    }
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<&str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Total length from a `Content-Range: bytes 0-0/12345` header
fn total_from_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

impl AsyncReadRange for HttpReader {
    fn size_async(&self) -> BoxFuture<'_, Result<u64>> {
        async move {
            let response = self
                .authorize(self.client.head(self.url.clone()))
                .send()
                .await
                .map_err(|e| Error::new(ErrorKind::NotConnected, format!("{e:?}")))?;
            match self.check_status(&response) {
                Ok(()) => {
                    if let Some(size) =
                        header_str(&response, CONTENT_LENGTH).and_then(|v| v.parse().ok())
                    {
                        return Ok(size);
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Err(e),
                Err(e) => debug!("HEAD {} failed: {e}", self.url),
            }

            // Some servers refuse HEAD or omit the length, ask for one byte instead
            debug!("No Content-Length from HEAD {}, probing range", self.url);
            let response = self
                .authorize(self.client.get(self.url.clone()))
                .header(RANGE, "bytes=0-0")
                .send()
                .await
                .map_err(|e| Error::new(ErrorKind::NotConnected, format!("{e:?}")))?;
            self.check_status(&response)?;
            header_str(&response, CONTENT_RANGE)
                .and_then(total_from_content_range)
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidData,
                        format!("No object size reported for {}", self.url),
                    )
                })
        }
        .boxed()
    }

    fn read_range_async(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>>> {
        let request = self
            .authorize(self.client.get(self.url.clone()))
            .header(RANGE, range.http_header());

        async move {
            trace!("requesting {} of {}", range.http_header(), self.url);
            let response = request
                .send()
                .await
                .map_err(|e| Error::new(ErrorKind::NotConnected, format!("{e:?}")))?;
            self.check_status(&response)?;
            let partial = response.status() == StatusCode::PARTIAL_CONTENT;

            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::new(ErrorKind::InvalidData, format!("{e:?}")))?;

            if partial {
                Ok(bytes.to_vec())
            } else {
                // Server ignored the Range header and sent the whole object
                warn!("{} ignored byte range request", self.url);
                let start = (range.start as usize).min(bytes.len());
                let end = (range.end_exclusive() as usize).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            }
        }
        .boxed()
    }
}
