use super::{ClearListener, ClearSignal};
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use tracing::*;

/// Storage clients memoized per container (bucket, host).
///
/// Concurrent requests for the same container wait on a single construction
/// instead of racing to build duplicates. Requests for other containers are
/// not blocked.
pub struct ConnectionCache<C> {
    name: &'static str,
    connections: Cache<String, C>,
}

impl<C> ConnectionCache<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, signal: &ClearSignal) -> Arc<Self> {
        let cache = Arc::new(Self {
            name,
            connections: Cache::builder().max_capacity(256).build(),
        });
        signal.subscribe(&cache);
        cache
    }

    pub async fn get_or_connect<F>(&self, container: &str, connect: F) -> C
    where
        F: Future<Output = C>,
    {
        self.connections
            .get_with(container.to_string(), async {
                debug!("{} connecting to {container}", self.name);
                connect.await
            })
            .await
    }

    pub async fn try_get_or_connect<F, E>(&self, container: &str, connect: F) -> Result<C, Arc<E>>
    where
        F: Future<Output = Result<C, E>>,
        E: Send + Sync + 'static,
    {
        self.connections
            .try_get_with(container.to_string(), async {
                debug!("{} connecting to {container}", self.name);
                connect.await
            })
            .await
    }

    pub fn contains(&self, container: &str) -> bool {
        self.connections.contains_key(container)
    }
}

impl<C> ClearListener for ConnectionCache<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn cleared(&self) {
        debug!("{} connections cleared", self.name);
        self.connections.invalidate_all();
    }
}
