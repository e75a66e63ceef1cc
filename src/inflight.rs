use std::{collections::HashMap, future::Future, sync::Arc};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// Coalesces concurrent lookups for the same URL into one run. Only requests
/// that overlap share a result: the slot is dropped as soon as the run ends.
pub struct Inflight<T> {
    slots: Arc<Mutex<HashMap<String, Arc<OnceCell<T>>>>>,
}

impl<T> Default for Inflight<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Clone for Inflight<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

pub fn fingerprint(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.trim().as_bytes()))
}

impl<T: Clone> Inflight<T> {
    pub async fn run<F, Fut>(&self, url: &str, fetch: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = fingerprint(url);
        let slot = {
            let mut slots = self.slots.lock().await;
            if slots.contains_key(&key) {
                debug!("Joining in-flight lookup {key}");
            }
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let value = slot.get_or_init(fetch).await.clone();

        let mut slots = self.slots.lock().await;
        if slots
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            slots.remove(&key);
        }

        value
    }

    #[cfg(test)]
    async fn pending(&self) -> usize {
        self.slots.lock().await.len()
    }
}
