use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::routes::{basket_routes, catalog_routes, system_routes};
use crate::state::AppState;

/// Build the complete Axum application:
/// - /api/list-update, /upload, /uploads/*  (catalog)
/// - /api/basket/*                          (session baskets)
/// - /system/*                              (alive, version, stats)
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(catalog_routes::routes(state.clone()))

        // /api/basket/*
        .nest("/api/basket", basket_routes::routes(state.clone()))

        // /system/*
        .nest("/system", system_routes::routes(state))

        // Logging middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
