use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sha2::{Digest, Sha256};
use shared::PredictionResult;

pub fn content_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

/// Bounded LRU of prediction results keyed by image content hash. Clones share
/// the same storage. A capacity of zero disables caching.
#[derive(Clone)]
pub struct PredictionCache {
    entries: Option<Arc<Mutex<LruCache<String, PredictionResult>>>>,
}

impl PredictionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity)
                .map(|cap| Arc::new(Mutex::new(LruCache::new(cap)))),
        }
    }

    pub fn get(&self, key: &str) -> Option<PredictionResult> {
        let entries = self.entries.as_ref()?;
        match entries.lock() {
            Ok(mut guard) => guard.get(key).cloned(),
            Err(_) => {
                log::warn!("Prediction cache lock poisoned, treating as miss");
                None
            }
        }
    }

    pub fn insert(&self, key: String, result: PredictionResult) {
        if let Some(entries) = &self.entries {
            if let Ok(mut guard) = entries.lock() {
                guard.put(key, result);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok().map(|guard| guard.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
