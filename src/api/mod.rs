//! REST API endpoints.
//!
//! A thin axum JSON layer over [`Pool`](crate::pool::Pool): stats reads,
//! roster saves, cache clearing, and provider search.

pub mod routes;
pub mod state;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::ScoreError;
use crate::etl::StatsError;
use crate::models::Sport;
use crate::pool::PoolError;
use crate::roster::RosterError;
use state::AppState;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        let message = err.to_string();
        match &err {
            PoolError::UnknownCategory(_) => ApiError::NotFound(message),
            PoolError::InvalidSearch(_) | PoolError::Roster(RosterError::Validation(_)) => {
                ApiError::BadRequest(message)
            }
            PoolError::Search { .. } => ApiError::Upstream(message),
            PoolError::Stats(stats) => match stats.root() {
                StatsError::Score(ScoreError::UnknownCategory(_)) => ApiError::BadRequest(message),
                StatsError::Score(ScoreError::Fetch { .. } | ScoreError::Incomplete { .. }) => {
                    ApiError::Upstream(message)
                }
                _ => ApiError::Internal(message),
            },
            _ => ApiError::Internal(message),
        }
    }
}

/// Resolve a sport from its URL slug.
pub fn parse_sport(slug: &str) -> Result<Sport, ApiError> {
    slug.parse::<Sport>().map_err(ApiError::NotFound)
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", get(routes::search::search))
        .route("/api/:sport/stats", get(routes::stats::get_stats))
        .route(
            "/api/:sport/friends",
            get(routes::admin::list_friends).post(routes::admin::save_friends),
        )
        .route(
            "/api/:sport/players",
            get(routes::admin::list_players).post(routes::admin::save_players),
        )
        .route(
            "/api/:sport/years",
            get(routes::admin::list_years).post(routes::admin::save_years),
        )
        .route("/api/:sport/cache/clear", post(routes::admin::clear_cache))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
