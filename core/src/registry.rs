//! Model registry
//!
//! Thread-safe bidirectional index between model keys and worker endpoints:
//!
//! 1. Workers register the models they serve
//! 2. The dispatch service looks up the worker for an incoming request
//! 3. Registrations are removed when a worker deregisters or dies
//!
//! A model key is `name` when the version is empty, else `name:version`.
//! All three indices live behind one mutex; operations never block on I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Build a model key from a name and an optional version.
pub fn model_key(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", name, version)
    }
}

#[derive(Debug, Default)]
struct Indices {
    /// model_key -> worker endpoint
    model_to_worker: HashMap<String, String>,
    /// worker_id -> set of model keys it registered
    worker_to_models: HashMap<String, HashSet<String>>,
    /// worker_id -> worker endpoint
    worker_endpoints: HashMap<String, String>,
}

/// Registry mapping model keys to worker endpoints, with a reverse index
/// by worker id for bulk eviction.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    indices: Mutex<Indices>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model served by a worker. Upserts the forward entry
    /// (last writer wins) and records the reverse and endpoint entries.
    pub fn register(
        &self,
        model_name: &str,
        model_version: &str,
        worker_endpoint: &str,
        worker_id: &str,
    ) {
        let key = model_key(model_name, model_version);
        let mut indices = self.indices.lock().unwrap();

        indices
            .model_to_worker
            .insert(key.clone(), worker_endpoint.to_string());
        indices
            .worker_to_models
            .entry(worker_id.to_string())
            .or_default()
            .insert(key.clone());
        indices
            .worker_endpoints
            .insert(worker_id.to_string(), worker_endpoint.to_string());

        tracing::info!(
            model = %key,
            endpoint = %worker_endpoint,
            worker_id = %worker_id,
            "registered model"
        );
    }

    /// Look up the worker endpoint for `(name, version)`.
    ///
    /// Exact match first; when a version was requested and the exact key is
    /// absent, fall back to the versionless entry `(name, "")`. This
    /// two-step is the only fallback rule: an empty-version lookup never
    /// resolves to a specific version.
    pub fn lookup(&self, model_name: &str, model_version: &str) -> Option<String> {
        let indices = self.indices.lock().unwrap();

        let key = model_key(model_name, model_version);
        if let Some(endpoint) = indices.model_to_worker.get(&key) {
            return Some(endpoint.clone());
        }

        if !model_version.is_empty() {
            if let Some(endpoint) = indices.model_to_worker.get(model_name) {
                tracing::debug!(model = %key, fallback = %model_name, "lookup via versionless fallback");
                return Some(endpoint.clone());
            }
        }

        None
    }

    /// Remove one model registration. Returns whether an entry was removed.
    /// When the worker's last model goes away, its reverse and endpoint
    /// records are dropped too.
    pub fn unregister_model(&self, model_name: &str, model_version: &str, worker_id: &str) -> bool {
        let key = model_key(model_name, model_version);
        let mut indices = self.indices.lock().unwrap();

        if indices.model_to_worker.remove(&key).is_none() {
            return false;
        }

        let worker_empty = match indices.worker_to_models.get_mut(worker_id) {
            Some(models) => {
                models.remove(&key);
                models.is_empty()
            }
            None => false,
        };
        if worker_empty {
            indices.worker_to_models.remove(worker_id);
            indices.worker_endpoints.remove(worker_id);
        }

        tracing::info!(model = %key, worker_id = %worker_id, "unregistered model");
        true
    }

    /// Remove every model registered by `worker_id`, plus its reverse and
    /// endpoint records. Returns how many forward entries were dropped.
    pub fn unregister_worker(&self, worker_id: &str) -> usize {
        let mut indices = self.indices.lock().unwrap();

        let mut count = 0;
        if let Some(models) = indices.worker_to_models.remove(worker_id) {
            for key in &models {
                if indices.model_to_worker.remove(key).is_some() {
                    count += 1;
                }
            }
        }
        indices.worker_endpoints.remove(worker_id);

        tracing::info!(worker_id = %worker_id, models = count, "unregistered worker");
        count
    }

    /// All registered model keys, sorted.
    pub fn list_models(&self) -> Vec<String> {
        let indices = self.indices.lock().unwrap();
        let mut models: Vec<_> = indices.model_to_worker.keys().cloned().collect();
        models.sort();
        models
    }

    /// Model keys registered by one worker, sorted.
    pub fn list_models_by_worker(&self, worker_id: &str) -> Vec<String> {
        let indices = self.indices.lock().unwrap();
        let mut models: Vec<_> = indices
            .worker_to_models
            .get(worker_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        models.sort();
        models
    }

    /// The endpoint a worker registered with, if it has any live models.
    pub fn worker_endpoint(&self, worker_id: &str) -> Option<String> {
        self.indices
            .lock()
            .unwrap()
            .worker_endpoints
            .get(worker_id)
            .cloned()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.indices.lock().unwrap().model_to_worker.len()
    }

    /// True when no models are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
