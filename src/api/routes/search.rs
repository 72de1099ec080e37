use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::state::AppState;
use crate::api::ApiError;
use crate::models::{CategoryId, SearchResult};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub category: CategoryId,
    pub year: i32,
    pub q: String,
    #[serde(default)]
    pub active_only: bool,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let results = state
        .pool
        .search(params.category, params.year, &params.q, params.active_only)
        .await?;
    Ok(Json(results))
}
