//! HTTP routes for the read API

use super::bootstrap::{Bootstrapper, ItemPage, PageRequest};
use super::ApiError;
use crate::HarvestError;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub bootstrapper: Bootstrapper,
}

#[derive(Debug, Deserialize)]
pub struct VideosQuery {
    q: Option<String>,
    page: Option<u64>,
    page_size: Option<u64>,
}

/// Builds the read API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/videos", get(list_videos))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        // The dashboard is served from another origin
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

async fn list_videos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VideosQuery>,
) -> Result<Json<ItemPage>, ApiError> {
    let page = PageRequest::new(params.page, params.page_size)?;
    let items = state
        .bootstrapper
        .list(params.q.as_deref(), page)
        .await?;
    Ok(Json(items))
}

/// Serves the read API on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState>, shutdown: F) -> Result<(), HarvestError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Read API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Read API stopped");
    Ok(())
}
