//! API Handlers
//!
//! HTTP request handlers for each dashboard cache endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::cache::{CacheKey, CacheOptions, EntityCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::identity::{IdentityProvider, StaticIdentity};
use crate::models::{
    ClearResponse, CollectionStats, EntitiesResponse, HealthResponse, Neuron, SnsDescriptor,
    StatsResponse,
};
use crate::storage::DurableStorage;
use crate::upstream::EntitySource;

/// Header carrying the caller's principal.
pub const PRINCIPAL_HEADER: &str = "x-principal";

/// Scope under which the SNS directory is cached.
pub const SNS_SCOPE: &str = "snses";

/// Application state shared across all handlers.
///
/// One cache per collection, both over the same durable storage under
/// distinct prefixes.
#[derive(Clone)]
pub struct AppState {
    pub neurons: EntityCache<Vec<Neuron>>,
    pub snses: EntityCache<Vec<SnsDescriptor>>,
    pub source: Arc<dyn EntitySource>,
}

impl AppState {
    /// Creates a new AppState with the given caches and upstream.
    pub fn new(
        neurons: EntityCache<Vec<Neuron>>,
        snses: EntityCache<Vec<SnsDescriptor>>,
        source: Arc<dyn EntitySource>,
    ) -> Self {
        Self {
            neurons,
            snses,
            source,
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(
        config: &Config,
        storage: Arc<dyn DurableStorage>,
        source: Arc<dyn EntitySource>,
    ) -> Self {
        Self::new(
            EntityCache::new(Arc::clone(&storage), CacheOptions::from_config(config, "neurons")),
            EntityCache::new(storage, CacheOptions::from_config(config, "snses")),
            source,
        )
    }
}

/// Query string accepted by the collection endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct FetchParams {
    /// Evict and refetch instead of reading through the cache
    #[serde(default)]
    pub refresh: bool,
}

fn identity(headers: &HeaderMap) -> StaticIdentity {
    StaticIdentity::from_header(
        headers
            .get(PRINCIPAL_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

fn principal(headers: &HeaderMap) -> Result<String> {
    identity(headers)
        .current_principal()
        .ok_or(CacheError::Unauthenticated)
}

fn neuron_key(headers: &HeaderMap, governance: &str) -> Result<(String, CacheKey)> {
    let owner = principal(headers)?;
    let key = CacheKey::new(owner.clone(), governance)?;
    Ok((owner, key))
}

/// Handler for GET /neurons/:governance
///
/// Returns the caller's neurons in `governance`, stale-while-refresh.
pub async fn neurons_handler(
    State(state): State<AppState>,
    Path(governance): Path<String>,
    Query(params): Query<FetchParams>,
    headers: HeaderMap,
) -> Result<Json<EntitiesResponse<Vec<Neuron>>>> {
    let (owner, key) = neuron_key(&headers, &governance)?;
    let source = Arc::clone(&state.source);
    let fetch = move || source.list_neurons(&owner, &governance);

    if params.refresh {
        let entry = state.neurons.refresh(&key, fetch).await?;
        return Ok(Json(EntitiesResponse::refreshed(entry.value, entry.stored_at)));
    }

    let lookup = state.neurons.get_or_fetch(&key, fetch).await?;
    Ok(Json(EntitiesResponse::from_lookup(lookup)))
}

/// Handler for GET /snses
///
/// Returns the SNS directory, cached under the caller or the anonymous owner.
pub async fn snses_handler(
    State(state): State<AppState>,
    Query(params): Query<FetchParams>,
    headers: HeaderMap,
) -> Result<Json<EntitiesResponse<Vec<SnsDescriptor>>>> {
    let key = CacheKey::for_identity(&identity(&headers), SNS_SCOPE)?;
    let source = Arc::clone(&state.source);
    let fetch = move || source.list_snses();

    if params.refresh {
        let entry = state.snses.refresh(&key, fetch).await?;
        return Ok(Json(EntitiesResponse::refreshed(entry.value, entry.stored_at)));
    }

    let lookup = state.snses.get_or_fetch(&key, fetch).await?;
    Ok(Json(EntitiesResponse::from_lookup(lookup)))
}

/// Handler for DELETE /cache
///
/// Logout: drops the caller's entries in both collections and cancels their
/// fetches. Other principals keep their entries.
pub async fn clear_all_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>> {
    let owner = principal(&headers)?;
    let removed =
        state.neurons.clear_owner(&owner).await? + state.snses.clear_owner(&owner).await?;
    info!(owner = %owner, removed, "principal logged out");
    Ok(Json(ClearResponse::new(&format!("entries of {}", owner), removed)))
}

/// Handler for DELETE /cache/neurons/:governance
///
/// Drops the caller's cached neurons for one governance canister.
pub async fn clear_neurons_handler(
    State(state): State<AppState>,
    Path(governance): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>> {
    let (_, key) = neuron_key(&headers, &governance)?;
    let removed = state.neurons.clear(Some(&key)).await?;
    Ok(Json(ClearResponse::new(&key.to_string(), removed)))
}

/// Handler for GET /stats
///
/// Returns per-collection cache counters.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        neurons: CollectionStats::new(state.neurons.stats().await, state.neurons.epoch()),
        snses: CollectionStats::new(state.snses.stats().await, state.snses.epoch()),
    })
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
