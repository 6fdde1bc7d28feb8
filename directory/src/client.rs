//! Directory client
//!
//! Used by dispatchers for two things: capability lookups (`/route`) and
//! keeping their own registration alive. Registration lifetime is coupled
//! to the SSE control stream, so the client holds the stream open for as
//! long as it wants to stay registered and re-registers whenever the
//! stream drops.

use crate::server::{RegisterRequest, RouteResponse};
use crate::{Error, Result};
use futures::StreamExt;
use infermux_core::capability::Capability;
use std::time::Duration;

/// Delay before re-opening a dropped registration stream.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP client for one directory server.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    /// Create a client for the directory at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Resolve a capability query to a replica, or `None` when no replica
    /// matches.
    pub async fn route(
        &self,
        query: &Capability,
        exclude_replica_id: Option<&str>,
    ) -> Result<Option<RouteResponse>> {
        let mut request = self.http.get(format!("{}/route", self.base_url));
        for (key, value) in query.iter() {
            request = request.query(&[(key, value)]);
        }
        if let Some(exclude) = exclude_replica_id {
            request = request.query(&[("exclude_replica_id", exclude)]);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.text().await?;
        let route: RouteResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("malformed /route response: {}", e)))?;
        Ok(Some(route))
    }

    /// Open a registration control stream and consume it until it ends.
    /// Returning at all means the registration has been (or is about to
    /// be) dropped by the server.
    pub async fn register_once(&self, registration: &RegisterRequest) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(registration)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            tracing::trace!(bytes = chunk.len(), "directory keep-alive");
        }
        Ok(())
    }

    /// Keep a registration alive until `shutdown` signals: hold the
    /// control stream open, re-register with a short backoff whenever it
    /// drops.
    pub async fn maintain(
        &self,
        registration: RegisterRequest,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                result = self.register_once(&registration) => match result {
                    Ok(()) => tracing::warn!(
                        replica_id = %registration.replica_id,
                        "directory control stream ended, re-registering"
                    ),
                    Err(e) => tracing::warn!(
                        replica_id = %registration.replica_id,
                        error = %e,
                        "directory registration failed, retrying"
                    ),
                },
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }
}
