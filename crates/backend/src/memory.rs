use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::BackendError;
use crate::{Backend, ObjectInfo};

/// In-memory object store used by tests. Tracks a per-name fetch counter
/// so the "at-most-one-download per volume" testable property can be
/// asserted directly against the backend rather than inferred indirectly.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetch_counts: Arc<Mutex<HashMap<String, usize>>>,
    injected_failures: Arc<Mutex<HashMap<String, usize>>>,
    get_calls: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, name: impl Into<String>, data: Vec<u8>) {
        self.objects.lock().await.insert(name.into(), data);
    }

    /// Make the next `count` `get()` calls for `name` fail transiently,
    /// exercising the Downloader's retry-with-backoff path.
    pub async fn fail_next_gets(&self, name: impl Into<String>, count: usize) {
        self.injected_failures.lock().await.insert(name.into(), count);
    }

    pub async fn fetch_count(&self, name: &str) -> usize {
        *self.fetch_counts.lock().await.get(name).unwrap_or(&0)
    }

    pub fn total_get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

impl Backend for MemoryBackend {
    #[instrument(skip(self))]
    fn list(&self) -> BoxFuture<'_, Result<Vec<ObjectInfo>, BackendError>> {
        Box::pin(async move {
            let objects = self.objects.lock().await;
            Ok(objects
                .iter()
                .map(|(name, data)| ObjectInfo {
                    name: name.clone(),
                    size: data.len() as u64,
                })
                .collect())
        })
    }

    #[instrument(skip(self))]
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BackendError>> {
        Box::pin(async move {
            self.get_calls.fetch_add(1, Ordering::SeqCst);

            {
                let mut failures = self.injected_failures.lock().await;
                if let Some(remaining) = failures.get_mut(name) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(BackendError::transient(format!(
                            "injected failure for {name}"
                        )));
                    }
                }
            }

            *self
                .fetch_counts
                .lock()
                .await
                .entry(name.to_string())
                .or_insert(0) += 1;

            let objects = self.objects.lock().await;
            objects
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(name.to_string()))
        })
    }

    #[instrument(skip(self, data))]
    fn put<'a>(&'a self, name: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<u64, BackendError>> {
        Box::pin(async move {
            let len = data.len() as u64;
            self.objects.lock().await.insert(name.to_string(), data);
            Ok(len)
        })
    }

    #[instrument(skip(self))]
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.objects
                .lock()
                .await
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| BackendError::NotFound(name.to_string()))
        })
    }

    #[instrument(skip(self))]
    fn rename<'a>(
        &'a self,
        old_name: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let mut objects = self.objects.lock().await;
            let data = objects
                .remove(old_name)
                .ok_or_else(|| BackendError::NotFound(old_name.to_string()))?;
            objects.insert(new_name.to_string(), data);
            Ok(())
        })
    }
}
