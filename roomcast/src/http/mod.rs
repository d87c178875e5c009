//! HTTP surface: the join endpoint plus health and room introspection

mod error;
mod health;
mod join;
mod rooms;

use axum::{http::HeaderValue, routing::post, Router};
use roomcast_sfu::{Negotiator, SfuRegistry};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;

pub use error::{AppError, AppResult};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SfuRegistry>,
    pub negotiator: Arc<Negotiator>,
    pub config: Arc<Config>,
}

/// Build the router with CORS and request tracing
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/join", post(join::join_room))
        // Path used by the browser client
        .route("/sfu/join", post(join::join_room))
        .merge(health::create_health_router())
        .merge(rooms::create_rooms_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}
