//! API module
//!
//! Shared request state, the global router and the middleware stack. Each
//! feature contributes its own route table under `/v1/<featurePlural>`.

pub mod extract;
pub mod middleware;
pub mod response;

use std::sync::Arc;

use axum::http::{HeaderName, Method};
use axum::{routing::get, Router};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::TokenSigner;
use crate::config::Config;
use crate::error::{global, AppError};
use crate::features::Feature;
use crate::queue::Broker;
use crate::registry::Registry;

pub use extract::Args;
pub use response::Success;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<Registry>,
    pub broker: Broker,
    pub signer: TokenSigner,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, registry: Registry, broker: Broker, config: Config) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            broker,
            signer: TokenSigner::new(&config.jwt_secret),
            config: Arc::new(config),
        }
    }
}

/// Build the application router from the feature list
pub fn build_router(state: AppState, features: &[Box<dyn Feature>]) -> Router {
    let mut v1 = Router::new();
    for feature in features {
        v1 = v1.nest(&format!("/{}", feature.path()), feature.routes());
    }

    // Layers run outermost-last: localize -> logging -> auth -> handler
    let api = v1
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::logging_middleware));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/v1", api)
        .fallback(not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::localize_errors,
        ))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> AppError {
    AppError::Coded(global::NOT_FOUND)
}
