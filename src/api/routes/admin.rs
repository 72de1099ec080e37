//! Roster reads and saves, plus cache clearing.
//!
//! The pool's roster calls hit SQLite synchronously, so handlers run them on
//! the blocking pool.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::state::AppState;
use crate::api::{parse_sport, ApiError};
use crate::models::{Friend, Player, Year};
use crate::pool::{Pool, PoolError};

async fn blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Pool) -> Result<T, PoolError> + Send + 'static,
{
    let pool = Arc::clone(&state.pool);
    let value = tokio::task::spawn_blocking(move || call(&pool))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(value)
}

pub async fn list_friends(
    State(state): State<AppState>,
    Path(sport): Path<String>,
) -> Result<Json<Vec<Friend>>, ApiError> {
    let sport = parse_sport(&sport)?;
    Ok(Json(blocking(&state, move |pool| pool.friends(sport)).await?))
}

pub async fn save_friends(
    State(state): State<AppState>,
    Path(sport): Path<String>,
    Json(friends): Json<Vec<Friend>>,
) -> Result<StatusCode, ApiError> {
    let sport = parse_sport(&sport)?;
    blocking(&state, move |pool| pool.save_friends(sport, &friends)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_players(
    State(state): State<AppState>,
    Path(sport): Path<String>,
) -> Result<Json<Vec<Player>>, ApiError> {
    let sport = parse_sport(&sport)?;
    Ok(Json(blocking(&state, move |pool| pool.players(sport)).await?))
}

pub async fn save_players(
    State(state): State<AppState>,
    Path(sport): Path<String>,
    Json(players): Json<Vec<Player>>,
) -> Result<StatusCode, ApiError> {
    let sport = parse_sport(&sport)?;
    blocking(&state, move |pool| pool.save_players(sport, &players)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_years(
    State(state): State<AppState>,
    Path(sport): Path<String>,
) -> Result<Json<Vec<Year>>, ApiError> {
    let sport = parse_sport(&sport)?;
    Ok(Json(blocking(&state, move |pool| pool.years(sport)).await?))
}

pub async fn save_years(
    State(state): State<AppState>,
    Path(sport): Path<String>,
    Json(years): Json<Vec<Year>>,
) -> Result<StatusCode, ApiError> {
    let sport = parse_sport(&sport)?;
    blocking(&state, move |pool| pool.save_years(sport, &years)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cache(
    State(state): State<AppState>,
    Path(sport): Path<String>,
) -> Result<StatusCode, ApiError> {
    let sport = parse_sport(&sport)?;
    blocking(&state, move |pool| pool.clear_cache(sport)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::api::build_router;
    use crate::api::routes::test_support::{get_json, post_json, test_state};

    #[tokio::test]
    async fn test_save_and_list_years() {
        let app = build_router(test_state());

        let (status, _) = post_json(
            app.clone(),
            "/api/nfl/years",
            r#"[{"value": 2020, "active": false}, {"value": 2019, "active": true}]"#,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = get_json(app, "/api/nfl/years").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "value": 2019, "active": true },
                { "value": 2020, "active": false }
            ])
        );
    }

    #[tokio::test]
    async fn test_two_active_years_rejected() {
        let app = build_router(test_state());

        let (status, body) = post_json(
            app,
            "/api/mlb/years",
            r#"[{"value": 2019, "active": true}, {"value": 2020, "active": true}]"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_friend_rename() {
        let app = build_router(test_state());
        post_json(
            app.clone(),
            "/api/mlb/years",
            r#"[{"value": 2019, "active": true}]"#,
        )
        .await;
        post_json(
            app.clone(),
            "/api/mlb/friends",
            r#"[{"id": 0, "display_order": 1, "name": "Carl"}]"#,
        )
        .await;
        let (_, friends) = get_json(app.clone(), "/api/mlb/friends").await;
        let carl = friends[0]["id"].clone();

        let renamed = json!([{ "id": carl, "display_order": 1, "name": "Carlos" }]);
        let (status, _) = post_json(app.clone(), "/api/mlb/friends", &renamed.to_string()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, friends) = get_json(app, "/api/mlb/friends").await;
        assert_eq!(friends, renamed);
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let app = build_router(test_state());

        let (status, _) = post_json(app, "/api/mlb/friends", r#"{"name": "Carl"}"#).await;

        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let app = build_router(test_state());

        let (status, _) = post_json(app.clone(), "/api/mlb/cache/clear", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = post_json(app, "/api/cfl/cache/clear", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
