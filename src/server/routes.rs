use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::facade::{CountRequest, FollowRequest, FollowersRequest, ListRequest};
use crate::server::AppState;
use crate::Error;

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Deserialize)]
pub struct ExportParams {
    pub subject_id: i64,
    pub kind: i32,
}

#[derive(Deserialize)]
pub struct SubjectParams {
    pub subject_id: i64,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn api_error(e: Error) -> (StatusCode, Json<ErrorResponse>) {
    if !e.is_caller_visible() {
        // Cache errors are absorbed below the facade
        tracing::error!(error = %e, "Internal error reached the API");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: "internal error".to_string() }),
        );
    }
    let status = match &e {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::Conflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn to_json<T: Serialize>(value: &T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })))
}

pub async fn follow(State(state): State<Arc<AppState>>, Json(req): Json<FollowRequest>) -> ApiResult {
    state.graph.follow(&req).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

pub async fn unfollow(State(state): State<Arc<AppState>>, Json(req): Json<FollowRequest>) -> ApiResult {
    state.graph.unfollow(&req).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

pub async fn list_follows(State(state): State<Arc<AppState>>, Query(req): Query<ListRequest>) -> ApiResult {
    let page = state.graph.list_follows(&req).await.map_err(api_error)?;
    to_json(&page)
}

pub async fn list_followers(State(state): State<Arc<AppState>>, Query(req): Query<FollowersRequest>) -> ApiResult {
    let page = state.graph.list_followers(&req).await.map_err(api_error)?;
    to_json(&page)
}

pub async fn get_counts(State(state): State<Arc<AppState>>, Query(req): Query<CountRequest>) -> ApiResult {
    let counts = state.graph.get_counts(&req).await.map_err(api_error)?;
    to_json(&counts)
}

pub async fn export_follows(State(state): State<Arc<AppState>>, Query(params): Query<ExportParams>) -> ApiResult {
    let stream = state.graph.stream_all(params.subject_id, params.kind).map_err(api_error)?;
    let pages = stream.collect_pages().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "subject_id": params.subject_id,
        "pages": pages,
    })))
}

pub async fn export_followers(State(state): State<Arc<AppState>>, Query(params): Query<SubjectParams>) -> ApiResult {
    let pages = state
        .graph
        .stream_followers(params.subject_id)
        .collect_pages()
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "subject_id": params.subject_id,
        "pages": pages,
    })))
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult {
    let stats = state.graph.stats().await.map_err(api_error)?;
    to_json(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(api_error(Error::InvalidArgument("kind".into())).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            api_error(Error::Conflict { subject: 1, target: 2, kind: crate::RelationKind::Person }).0,
            StatusCode::CONFLICT
        );
        assert_eq!(api_error(Error::StoreUnavailable("down".into())).0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_cache_errors_are_not_leaked() {
        let (status, Json(body)) = api_error(Error::CacheDegraded("redis timeout".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.error.contains("redis"));
    }
}
