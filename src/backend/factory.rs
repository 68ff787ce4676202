use super::{RangeReadBackend, RangeReader};
use crate::cache::ClearSignal;
use crate::config::{BackendConfig, BackendKind, RemoteObjectHandle};
use crate::io::fs::PathReader;
use crate::io::AsyncReadRange;
use crate::{CloudRangeError, CloudRangeResult};
use std::sync::Arc;
use tracing::*;

#[cfg(any(feature = "http", feature = "s3"))]
use crate::cache::ConnectionCache;
#[cfg(feature = "http")]
use crate::io::http::HttpReader;
#[cfg(feature = "s3")]
use {
    crate::config::S3Settings,
    crate::io::s3::S3Reader,
    aws_config::{BehaviorVersion, Region},
};

/// Opens backends by kind, sharing storage clients between objects in the same container
pub struct BackendFactory {
    #[cfg(feature = "http")]
    http_clients: Arc<ConnectionCache<reqwest::Client>>,
    #[cfg(feature = "s3")]
    s3_clients: Arc<ConnectionCache<aws_sdk_s3::Client>>,
}

impl BackendFactory {
    /// Client caches subscribe to `signal` and empty on every clear.
    #[cfg_attr(not(any(feature = "http", feature = "s3")), allow(unused_variables))]
    pub fn new(signal: &ClearSignal) -> Self {
        Self {
            #[cfg(feature = "http")]
            http_clients: ConnectionCache::new("http", signal),
            #[cfg(feature = "s3")]
            s3_clients: ConnectionCache::new("s3", signal),
        }
    }

    /// Backend for `handle`, treating the first `header_length` bytes as the header region.
    pub async fn open(
        &self,
        handle: &RemoteObjectHandle,
        header_length: u64,
    ) -> CloudRangeResult<Arc<dyn RangeReadBackend>> {
        let config = handle.config();
        let uri = handle.uri();
        debug!("Opening {handle}");
        match config.kind {
            BackendKind::File => Ok(bind(uri, PathReader::from_uri(uri), header_length, config)),
            #[cfg(feature = "http")]
            BackendKind::Http => {
                let reader = self.http_reader(uri, config).await?;
                Ok(bind(uri, reader, header_length, config))
            }
            #[cfg(feature = "s3")]
            BackendKind::S3 => {
                let reader = self.s3_reader(uri, config).await?;
                Ok(bind(uri, reader, header_length, config))
            }
            #[allow(unreachable_patterns)]
            kind => Err(CloudRangeError::Config(format!(
                "{kind} backend is not enabled in this build"
            ))),
        }
    }

    #[cfg(feature = "http")]
    async fn http_reader(&self, uri: &str, config: &BackendConfig) -> CloudRangeResult<HttpReader> {
        let url = reqwest::Url::parse(uri)
            .map_err(|_| CloudRangeError::UnsupportedUri(uri.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| CloudRangeError::UnsupportedUri(uri.to_string()))?
            .to_string();
        let client = self
            .http_clients
            .try_get_or_connect(&host, async { reqwest::Client::builder().build() })
            .await
            .map_err(|e| CloudRangeError::Config(format!("http client for {host}: {e:?}")))?;
        Ok(HttpReader::with_client(client, url, config.http.clone())?)
    }

    #[cfg(feature = "s3")]
    async fn s3_reader(&self, uri: &str, config: &BackendConfig) -> CloudRangeResult<S3Reader> {
        let settings = config.s3()?;
        let (bucket, key) = settings.locate(uri)?;
        let client = self
            .s3_clients
            .get_or_connect(&settings.connection_key(&bucket), connect_s3(settings))
            .await;
        Ok(S3Reader::new(client, &bucket, &key))
    }
}

fn bind<R: AsyncReadRange + 'static>(
    uri: &str,
    reader: R,
    header_length: u64,
    config: &BackendConfig,
) -> Arc<dyn RangeReadBackend> {
    Arc::new(
        RangeReader::new(uri, reader, header_length)
            .with_timeout(config.timeout)
            .with_max_concurrency(config.max_concurrency),
    )
}

#[cfg(feature = "s3")]
async fn connect_s3(settings: &S3Settings) -> aws_sdk_s3::Client {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));
    if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        let credentials = aws_sdk_s3::config::Credentials::new(
            key_id.clone(),
            secret.clone(),
            None,
            None,
            "cloudrange-config",
        );
        loader = loader.credentials_provider(credentials);
    }
    let sdk_config = loader.load().await;

    let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(settings.force_path_style);
    if let Some(endpoint) = &settings.endpoint {
        s3_config = s3_config.endpoint_url(endpoint.clone());
    }
    aws_sdk_s3::Client::from_conf(s3_config.build())
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory").finish_non_exhaustive()
    }
}
