use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::state::AppState;
use crate::api::{parse_sport, ApiError};
use crate::etl::EtlStats;
use crate::models::{ScoreCategory, Sport};

/// Scores of a sport, or an empty body when no year is active.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub sport: Sport,
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etl_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etl_refresh_time: Option<DateTime<Utc>>,
    pub score_categories: Vec<ScoreCategory>,
}

impl StatsResponse {
    fn empty(sport: Sport) -> Self {
        Self {
            sport,
            year: None,
            etl_time: None,
            etl_refresh_time: None,
            score_categories: Vec::new(),
        }
    }
}

impl From<EtlStats> for StatsResponse {
    fn from(stats: EtlStats) -> Self {
        Self {
            sport: stats.sport,
            year: Some(stats.year),
            etl_time: Some(stats.etl_time),
            etl_refresh_time: Some(stats.etl_refresh_time),
            score_categories: stats.score_categories,
        }
    }
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(sport): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    let sport = parse_sport(&sport)?;
    let stats = state.pool.get_stats(sport).await?;
    Ok(Json(
        stats.map_or_else(|| StatsResponse::empty(sport), StatsResponse::from),
    ))
}
