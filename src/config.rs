// Configuration
//   Settings lookups fall through: explicit value, then environment variable
//   (dotted key upper-snake-cased, s3.region -> S3_REGION), then process
//   properties handed in by the embedding application.

use crate::{CloudRangeError, CloudRangeResult};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct Settings {
    explicit: HashMap<String, String>,
    properties: HashMap<String, String>,
    env: EnvLookup,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            explicit: HashMap::new(),
            properties: HashMap::new(),
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.explicit.insert(key.to_string(), value.into());
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Replaces the environment lookup, mostly so tests don't depend on the real environment.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub fn env_key(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.explicit
            .get(key)
            .cloned()
            .or_else(|| (self.env)(&Self::env_key(key)))
            .or_else(|| self.properties.get(key).cloned())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, key: &str) -> CloudRangeResult<String> {
        self.get(key).ok_or_else(|| {
            CloudRangeError::Config(format!(
                "missing required setting {key} (or env {})",
                Self::env_key(key)
            ))
        })
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> CloudRangeResult<Option<T>> {
        match self.get(key) {
            Some(value) => value.trim().parse().map(Some).map_err(|_| {
                CloudRangeError::Config(format!("invalid value for {key}: {value:?}"))
            }),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may hold credentials
        f.debug_struct("Settings")
            .field("explicit", &self.explicit.keys().collect::<Vec<_>>())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Http,
    S3,
    File,
}

impl BackendKind {
    /// Backend implied by a URI scheme; bare paths are local files.
    pub fn from_uri(uri: &str) -> CloudRangeResult<Self> {
        match uri.split_once("://") {
            Some((scheme, _)) => scheme
                .parse()
                .map_err(|_| CloudRangeError::UnsupportedUri(uri.to_string())),
            None => Ok(BackendKind::File),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Http => "http",
            BackendKind::S3 => "s3",
            BackendKind::File => "file",
        }
    }
}

impl FromStr for BackendKind {
    type Err = CloudRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(BackendKind::Http),
            "s3" => Ok(BackendKind::S3),
            "file" | "fs" => Ok(BackendKind::File),
            other => Err(CloudRangeError::Config(format!(
                "unknown backend type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct HttpSettings {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for HttpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSettings")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub default_bucket: Option<String>,
    pub force_path_style: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("default_bucket", &self.default_bucket)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

impl S3Settings {
    fn resolve(settings: &Settings) -> CloudRangeResult<Self> {
        let access_key_id = settings.get("s3.access_key_id");
        let secret_access_key = settings.get("s3.secret_access_key");
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(CloudRangeError::Config(
                "s3.access_key_id and s3.secret_access_key must be set together".to_string(),
            ));
        }
        Ok(Self {
            region: settings.require("s3.region")?,
            endpoint: settings.get("s3.endpoint"),
            access_key_id,
            secret_access_key,
            default_bucket: settings.get("s3.bucket"),
            force_path_style: settings.get_parsed("s3.force_path_style")?.unwrap_or(false),
        })
    }

    /// Identity of the client serving `bucket` under these settings.
    ///
    /// Same bucket name behind another endpoint, region or account is a
    /// different connection.
    pub fn connection_key(&self, bucket: &str) -> String {
        format!(
            "{}|{}|{}|{}|{bucket}",
            self.endpoint.as_deref().unwrap_or(""),
            self.region,
            self.access_key_id.as_deref().unwrap_or(""),
            self.force_path_style,
        )
    }

    /// Splits an identifier into (bucket, key).
    ///
    /// `s3://bucket/key` names both; anything else is a key in the configured bucket.
    pub fn locate(&self, uri: &str) -> CloudRangeResult<(String, String)> {
        let located = match uri.strip_prefix("s3://") {
            Some(rest) => rest
                .split_once('/')
                .map(|(bucket, key)| (bucket.to_string(), key.to_string())),
            None => self
                .default_bucket
                .clone()
                .map(|bucket| (bucket, uri.trim_start_matches('/').to_string())),
        };
        match located {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
            _ => Err(CloudRangeError::UnsupportedUri(uri.to_string())),
        }
    }
}

/// Everything needed to open a backend of one kind, resolved once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub http: HttpSettings,
    pub s3: Option<S3Settings>,
}

impl BackendConfig {
    /// Resolves the config for `kind`. Missing required values fail here rather than on first read.
    pub fn resolve(settings: &Settings, kind: BackendKind) -> CloudRangeResult<Self> {
        let timeout_ms = settings
            .get_parsed("range_read.timeout_ms")?
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let max_concurrency = settings
            .get_parsed("range_read.max_concurrency")?
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .max(1);
        let http = HttpSettings {
            user: settings.get("http.user"),
            password: settings.get("http.password"),
        };
        let s3 = match kind {
            BackendKind::S3 => Some(S3Settings::resolve(settings)?),
            _ => None,
        };
        Ok(Self {
            kind,
            timeout: Duration::from_millis(timeout_ms),
            max_concurrency,
            http,
            s3,
        })
    }

    /// Picks the kind from `backend.type`, falling back to the URI scheme.
    pub fn for_uri(settings: &Settings, uri: &str) -> CloudRangeResult<Self> {
        let kind = match settings.get("backend.type") {
            Some(name) => name.parse()?,
            None => BackendKind::from_uri(uri)?,
        };
        Self::resolve(settings, kind)
    }

    pub fn s3(&self) -> CloudRangeResult<&S3Settings> {
        self.s3
            .as_ref()
            .ok_or_else(|| CloudRangeError::Config(format!("{} backend has no s3 settings", self.kind)))
    }
}

/// Identifies one remote object for the lifetime of a read session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObjectHandle {
    uri: String,
    use_cache: bool,
    config: Arc<BackendConfig>,
}

impl RemoteObjectHandle {
    pub fn new(uri: impl Into<String>, use_cache: bool, config: Arc<BackendConfig>) -> Self {
        Self {
            uri: uri.into(),
            use_cache,
            config,
        }
    }

    pub fn from_settings(settings: &Settings, uri: &str) -> CloudRangeResult<Self> {
        let use_cache = settings.get_parsed("cache.enabled")?.unwrap_or(true);
        let config = BackendConfig::for_uri(settings, uri)?;
        Ok(Self::new(uri, use_cache, Arc::new(config)))
    }

    /// Same backend, credentials and cache policy, different object
    pub fn with_uri(&self, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            use_cache: self.use_cache,
            config: self.config.clone(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn config(&self) -> &Arc<BackendConfig> {
        &self.config
    }
}

impl fmt::Display for RemoteObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.config.kind, self.uri)
    }
}
