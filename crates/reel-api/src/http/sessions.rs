//! Session management routes that map one-to-one onto registry operations.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path as AxumPath, State},
};
use reel_events::SessionState;
use reel_torrent_core::{ContentDescriptor, InfoHash};
use tracing::info;

use crate::http::errors::ApiError;
use crate::models::{DeleteResponse, DescriptorRequest, SessionView, StartRequest};
use crate::state::ApiState;

fn parse_hash(raw: &str) -> Result<InfoHash, ApiError> {
    InfoHash::parse(raw).map_err(ApiError::from)
}

pub(crate) async fn start_session(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let descriptor = ContentDescriptor::new(request.descriptor, request.title.unwrap_or_default());
    let snapshot = state.sessions.control().start(descriptor).await?;
    Ok(Json(SessionView::from(snapshot)))
}

pub(crate) async fn torrent_data(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DescriptorRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let parsed = ContentDescriptor::new(request.descriptor, String::new()).parse()?;
    let snapshot = state.sessions.inspector().get(&parsed.hash).await?;
    Ok(Json(SessionView::from(snapshot)))
}

pub(crate) async fn pause_session(
    State(state): State<Arc<ApiState>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<SessionView>, ApiError> {
    let hash = parse_hash(&hash)?;
    let snapshot = state.sessions.control().pause(&hash).await?;
    Ok(Json(SessionView::from(snapshot)))
}

pub(crate) async fn resume_session(
    State(state): State<Arc<ApiState>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<SessionView>, ApiError> {
    let hash = parse_hash(&hash)?;
    let snapshot = state.sessions.control().resume(&hash).await?;
    Ok(Json(SessionView::from(snapshot)))
}

pub(crate) async fn delete_session(
    State(state): State<Arc<ApiState>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let hash = parse_hash(&hash)?;
    state.sessions.control().delete(&hash).await?;
    Ok(Json(DeleteResponse {
        hash: hash.to_string(),
        state: SessionState::Deleted,
    }))
}

pub(crate) async fn restore_sessions(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let restored = state.sessions.control().restore().await?;
    info!(count = restored.len(), "sessions restored on request");
    Ok(Json(restored.into_iter().map(SessionView::from).collect()))
}

pub(crate) async fn list_sessions(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = state.sessions.inspector().list().await?;
    Ok(Json(sessions.into_iter().map(SessionView::from).collect()))
}
