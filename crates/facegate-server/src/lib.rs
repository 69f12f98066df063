//! HTTP surface of the face verification service.
//!
//! The routes and their response contract mirror the service's API:
//! enroll/verify/detect POST endpoints, a delete endpoint keyed by user id,
//! and a health probe that never fails.

pub mod error;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/face/enroll", post(routes::enroll))
        .route("/api/face/verify", post(routes::verify))
        .route("/api/face/delete/{user_id}", delete(routes::delete_user))
        .route("/api/face/detect", post(routes::detect))
        .fallback(routes::endpoint_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "face verification service listening");
    axum::serve(listener, router(state)).await
}
