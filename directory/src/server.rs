//! Directory HTTP server
//!
//! Endpoints:
//! - `POST /register`: register a replica; the response is an SSE stream
//!   that acts as the control stream: the entry lives exactly as long as
//!   the stream. Keep-alive events go out every 5 seconds; any stream
//!   error (including a failed keep-alive write) deregisters the replica.
//! - `GET /route?k=v&...`: capability query; optional `exclude_replica_id`
//! - `GET /registry`: snapshot of registered replicas
//! - `GET /health`: health check

use crate::registry::DirectoryRegistry;
use crate::{Error, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use infermux_core::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Cadence of keep-alive events on the registration control stream.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    registry: Arc<DirectoryRegistry>,
}

/// Body of `POST /register`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Replica identifier
    pub replica_id: String,
    /// Endpoint remote clients should dial
    pub endpoint: String,
    /// Capability offers
    pub capabilities: Vec<Capability>,
}

/// Body of a successful `GET /route`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RouteResponse {
    /// Endpoint of the selected replica
    pub endpoint: String,
    /// Id of the selected replica
    pub replica_id: String,
}

#[derive(Debug, Serialize)]
struct RegistryEntryBody {
    replica_id: String,
    endpoint: String,
    capabilities: Vec<Capability>,
}

#[derive(Debug, Serialize)]
struct RegistryResponse {
    replicas: Vec<RegistryEntryBody>,
    total: usize,
}

/// Removes a registration when the control stream ends, unless a newer
/// generation replaced it.
struct RegistrationGuard {
    registry: Arc<DirectoryRegistry>,
    replica_id: String,
    generation: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.registry.unregister(&self.replica_id, self.generation) {
            tracing::info!(replica_id = %self.replica_id, "control stream closed, replica removed");
        }
    }
}

struct ControlStream {
    guard: RegistrationGuard,
    keepalive: tokio::time::Interval,
    pending: Option<String>,
}

/// Build the directory router.
pub fn router(registry: Arc<DirectoryRegistry>) -> Router {
    Router::new()
        .route("/register", post(register_handler))
        .route("/route", get(route_handler))
        .route("/registry", get(registry_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { registry })
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

/// POST /register: store the entry and hand back the control stream.
async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let generation = state.registry.register(
        &request.replica_id,
        &request.endpoint,
        request.capabilities,
    );

    let confirmation = serde_json::json!({
        "status": "registered",
        "replica_id": request.replica_id,
    })
    .to_string();

    let control = ControlStream {
        guard: RegistrationGuard {
            registry: Arc::clone(&state.registry),
            replica_id: request.replica_id,
            generation,
        },
        // First tick only after one full interval; the confirmation event
        // goes out immediately.
        keepalive: tokio::time::interval_at(
            tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
            KEEPALIVE_INTERVAL,
        ),
        pending: Some(confirmation),
    };

    let stream = futures::stream::unfold(control, |mut control| async move {
        if let Some(confirmation) = control.pending.take() {
            return Some((Ok::<_, Infallible>(Event::default().data(confirmation)), control));
        }
        control.keepalive.tick().await;
        let alive = serde_json::json!({"status": "alive"}).to_string();
        Some((Ok(Event::default().data(alive)), control))
    });

    Sse::new(stream)
}

/// GET /route: query params form the capability query.
async fn route_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> std::result::Result<Json<RouteResponse>, (StatusCode, Json<serde_json::Value>)> {
    let mut params = params;
    let exclude = params.remove("exclude_replica_id");
    let query: Capability = params.into_iter().collect();

    match state.registry.route(&query, exclude.as_deref()) {
        Some(found) => Ok(Json(RouteResponse {
            endpoint: found.endpoint,
            replica_id: found.replica_id,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no matching replica"})),
        )),
    }
}

/// GET /registry: snapshot of current entries.
async fn registry_handler(State(state): State<AppState>) -> Json<RegistryResponse> {
    let replicas: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .map(|entry| RegistryEntryBody {
            replica_id: entry.replica_id,
            endpoint: entry.endpoint,
            capabilities: entry.capabilities,
        })
        .collect();
    let total = replicas.len();

    Json(RegistryResponse { replicas, total })
}

/// Directory HTTP server.
pub struct DirectoryServer {
    bind_address: String,
    registry: Arc<DirectoryRegistry>,
}

impl DirectoryServer {
    /// Create a server bound to `bind_address` once served.
    pub fn new(bind_address: String, registry: Arc<DirectoryRegistry>) -> Self {
        Self {
            bind_address,
            registry,
        }
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| Error::Server(format!("failed to bind {}: {}", self.bind_address, e)))?;

        tracing::info!(addr = %self.bind_address, "directory listening");

        axum::serve(listener, router(self.registry))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Server(format!("serve error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_unregisters_matching_generation() {
        let registry = Arc::new(DirectoryRegistry::new());
        let generation = registry.register("r1", "host:8001", Vec::new());

        let guard = RegistrationGuard {
            registry: Arc::clone(&registry),
            replica_id: "r1".to_string(),
            generation,
        };
        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_guard_leaves_new_registration_alone() {
        let registry = Arc::new(DirectoryRegistry::new());
        let old_generation = registry.register("r1", "host:8001", Vec::new());
        let guard = RegistrationGuard {
            registry: Arc::clone(&registry),
            replica_id: "r1".to_string(),
            generation: old_generation,
        };

        // Replica reconnected before the old stream's cleanup ran.
        registry.register("r1", "host:9001", Vec::new());
        drop(guard);

        let entries = registry.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].endpoint, "host:9001");
    }
}
