use std::sync::{Arc, Mutex, Weak};
use tracing::*;

/// Something that drops its cached state when the process-wide cache is cleared
pub trait ClearListener: Send + Sync {
    fn cleared(&self);
}

/// Fan-out point for "clear all caches" requests.
///
/// Cloning shares the listener list, so a configuration reload can hold its
/// own handle. Listeners are held weakly and pruned once dropped.
#[derive(Clone, Default)]
pub struct ClearSignal {
    listeners: Arc<Mutex<Vec<Weak<dyn ClearListener>>>>,
}

impl ClearSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` without keeping it alive.
    pub fn subscribe<L: ClearListener + 'static>(&self, listener: &Arc<L>) {
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn ClearListener> = weak;
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(weak);
    }

    /// Clears every live listener. Returns how many were notified.
    pub fn notify(&self) -> usize {
        // Snapshot so listeners may subscribe or notify from inside `cleared`
        let live: Vec<Arc<dyn ClearListener>> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        debug!("Clearing {} caches", live.len());
        for listener in live.iter() {
            listener.cleared();
        }
        live.len()
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .iter()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for ClearSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClearSignal({} listeners)", self.listener_count())
    }
}
