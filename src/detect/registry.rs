use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceAdapter;
use crate::detect::catalog::ModelEntry;

/// Adapter shared between sessions.
///
/// Wrapped in `Mutex` because `InferenceAdapter::infer` takes `&mut self`.
pub type SharedAdapter = Arc<Mutex<Box<dyn InferenceAdapter>>>;

/// Turns a model file into a ready adapter.
pub trait ModelLoader: Send + Sync {
    fn load(&self, entry: &ModelEntry) -> Result<Box<dyn InferenceAdapter>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&ModelEntry) -> Result<Box<dyn InferenceAdapter>> + Send + Sync,
{
    fn load(&self, entry: &ModelEntry) -> Result<Box<dyn InferenceAdapter>> {
        self(entry)
    }
}

/// Lazily loaded adapters keyed by model identifier.
///
/// Holds at most `capacity` models; the least recently used one is evicted
/// when a new model is loaded into a full cache.
pub struct ModelCache<L: ModelLoader> {
    loader: L,
    capacity: usize,
    // front = most recently used
    entries: Mutex<VecDeque<(String, SharedAdapter)>>,
}

impl<L: ModelLoader> ModelCache<L> {
    pub fn new(loader: L, capacity: usize) -> Self {
        Self {
            loader,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Return the cached adapter for `entry`, loading it on first use.
    pub fn get_or_load(&self, entry: &ModelEntry) -> Result<SharedAdapter> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("model cache lock poisoned"))?;

        if let Some(pos) = entries.iter().position(|(id, _)| id == &entry.id) {
            if let Some(hit) = entries.remove(pos) {
                let adapter = hit.1.clone();
                entries.push_front(hit);
                return Ok(adapter);
            }
        }

        log::info!("loading model {} from {}", entry.id, entry.path.display());
        let mut adapter = self.loader.load(entry)?;
        adapter.warm_up()?;
        let adapter: SharedAdapter = Arc::new(Mutex::new(adapter));

        while entries.len() >= self.capacity {
            if let Some((evicted, _)) = entries.pop_back() {
                log::debug!("evicting model {} from cache", evicted);
            }
        }
        entries.push_front((entry.id.clone(), adapter.clone()));
        Ok(adapter)
    }

    /// Identifiers currently cached, most recently used first.
    pub fn cached(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
