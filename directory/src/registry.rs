//! Replica registry
//!
//! Maps replica ids to endpoints and capability offers. Routing collects
//! every replica with at least one offer satisfying the query and picks one
//! uniformly at random (simple load spreading).
//!
//! Each registration carries a generation token. Entry lifetime is coupled
//! to a control stream, and a replica may reconnect and re-register before
//! the old stream's cleanup runs; generation-checked removal keeps that
//! stale cleanup from evicting the newer registration.

use infermux_core::capability::Capability;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Mutex;

/// A registered replica.
#[derive(Debug, Clone)]
pub struct ReplicaEntry {
    /// Replica identifier
    pub replica_id: String,
    /// Endpoint remote clients should dial, e.g. "host:8001"
    pub endpoint: String,
    /// Capability offers
    pub capabilities: Vec<Capability>,
    generation: u64,
}

/// A routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Endpoint of the selected replica
    pub endpoint: String,
    /// Id of the selected replica
    pub replica_id: String,
}

#[derive(Debug, Default)]
struct State {
    replicas: HashMap<String, ReplicaEntry>,
    next_generation: u64,
}

/// Thread-safe replica registry.
#[derive(Debug, Default)]
pub struct DirectoryRegistry {
    state: Mutex<State>,
}

impl DirectoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replica, replacing any prior entry for the same id.
    /// Returns the generation token required to remove this registration.
    pub fn register(
        &self,
        replica_id: &str,
        endpoint: &str,
        capabilities: Vec<Capability>,
    ) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_generation += 1;
        let generation = state.next_generation;

        state.replicas.insert(
            replica_id.to_string(),
            ReplicaEntry {
                replica_id: replica_id.to_string(),
                endpoint: endpoint.to_string(),
                capabilities,
                generation,
            },
        );

        tracing::info!(replica_id = %replica_id, endpoint = %endpoint, "registered replica");
        generation
    }

    /// Remove a registration, but only when it is still the generation that
    /// created it. Returns whether an entry was removed.
    pub fn unregister(&self, replica_id: &str, generation: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.replicas.get(replica_id) {
            Some(entry) if entry.generation == generation => {
                state.replicas.remove(replica_id);
                tracing::info!(replica_id = %replica_id, "unregistered replica");
                true
            }
            Some(_) => {
                tracing::debug!(
                    replica_id = %replica_id,
                    "skipping stale unregister, replica re-registered"
                );
                false
            }
            None => false,
        }
    }

    /// Pick one replica whose offers satisfy `query`, uniformly at random
    /// among all matches; `exclude_replica_id` removes one candidate (used
    /// by delegation so a dispatcher never routes back to itself).
    pub fn route(&self, query: &Capability, exclude_replica_id: Option<&str>) -> Option<RouteMatch> {
        let state = self.state.lock().unwrap();

        let matches: Vec<&ReplicaEntry> = state
            .replicas
            .values()
            .filter(|entry| Some(entry.replica_id.as_str()) != exclude_replica_id)
            .filter(|entry| entry.capabilities.iter().any(|offer| offer.satisfies(query)))
            .collect();

        matches.choose(&mut rand::thread_rng()).map(|entry| RouteMatch {
            endpoint: entry.endpoint.clone(),
            replica_id: entry.replica_id.clone(),
        })
    }

    /// Snapshot of all registered replicas.
    pub fn list(&self) -> Vec<ReplicaEntry> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<_> = state.replicas.values().cloned().collect();
        entries.sort_by(|a, b| a.replica_id.cmp(&b.replica_id));
        entries
    }

    /// Number of registered replicas.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().replicas.len()
    }

    /// True when no replicas are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn chat_offer() -> Vec<Capability> {
        vec![Capability::new().with("type", "chat")]
    }

    #[test]
    fn route_matches_subset_queries() {
        let registry = DirectoryRegistry::new();
        registry.register(
            "r1",
            "host1:8001",
            vec![Capability::new().with("type", "chat").with("model", "qwen2")],
        );

        let found = registry
            .route(&Capability::new().with("type", "chat"), None)
            .unwrap();
        assert_eq!(found.replica_id, "r1");

        assert!(registry
            .route(&Capability::new().with("type", "embed"), None)
            .is_none());
    }

    #[test]
    fn empty_query_matches_any_replica() {
        let registry = DirectoryRegistry::new();
        registry.register("r1", "host1:8001", chat_offer());

        assert!(registry.route(&Capability::new(), None).is_some());
    }

    #[test]
    fn exclude_removes_candidate() {
        let registry = DirectoryRegistry::new();
        registry.register("r1", "host1:8001", chat_offer());
        registry.register("r2", "host2:8001", chat_offer());

        let query = Capability::new().with("type", "chat");
        for _ in 0..20 {
            let found = registry.route(&query, Some("r1")).unwrap();
            assert_eq!(found.replica_id, "r2");
        }

        registry.register("r3", "host3:8001", vec![Capability::new().with("type", "embed")]);
        assert!(registry
            .route(&Capability::new().with("type", "embed"), Some("r3"))
            .is_none());
    }

    #[test]
    fn selection_spreads_over_all_matches() {
        let registry = DirectoryRegistry::new();
        registry.register("r1", "host1:8001", chat_offer());
        registry.register("r2", "host2:8001", chat_offer());

        let query = Capability::new().with("type", "chat");
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(registry.route(&query, None).unwrap().replica_id);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn reregister_replaces_entry() {
        let registry = DirectoryRegistry::new();
        registry.register("r1", "host1:8001", chat_offer());
        registry.register("r1", "host1:9001", chat_offer());

        let entries = registry.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].endpoint, "host1:9001");
    }

    #[test]
    fn stale_generation_cannot_unregister_newer_entry() {
        let registry = DirectoryRegistry::new();
        let first = registry.register("r1", "host1:8001", chat_offer());
        let second = registry.register("r1", "host1:9001", chat_offer());

        // The old control stream's cleanup arrives after the reconnect.
        assert!(!registry.unregister("r1", first));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("r1", second));
        assert!(registry.is_empty());
    }
}
