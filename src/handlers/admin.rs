//! Runtime rule and channel management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{AlertChannel, AlertRule};

use super::AppState;

/// GET /api/v1/rules
pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<AlertRule>> {
    Json(state.monitor.rules().list_rules())
}

/// POST /api/v1/rules
pub async fn add_rule(
    State(state): State<AppState>,
    Json(rule): Json<AlertRule>,
) -> Result<StatusCode, AppError> {
    if rule.id.is_empty() {
        return Err(AppError::Validation("Rule id must not be empty".to_string()));
    }
    // Reject dangling channel references at registration time, same as
    // startup validation does.
    let known: Vec<String> = state
        .monitor
        .dispatcher()
        .list_channels()
        .into_iter()
        .map(|c| c.name)
        .collect();
    for channel in &rule.channels {
        if !known.contains(channel) {
            return Err(AppError::Validation(format!(
                "Rule references unknown channel '{}'",
                channel
            )));
        }
    }

    state.monitor.rules().add_rule(rule)?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/rules/:id
pub async fn remove_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlertRule>, AppError> {
    Ok(Json(state.monitor.rules().remove_rule(&id)?))
}

/// GET /api/v1/channels
pub async fn list_channels(State(state): State<AppState>) -> Json<Vec<AlertChannel>> {
    Json(state.monitor.dispatcher().list_channels())
}

/// POST /api/v1/channels
pub async fn add_channel(
    State(state): State<AppState>,
    Json(channel): Json<AlertChannel>,
) -> Result<StatusCode, AppError> {
    if channel.name.is_empty() {
        return Err(AppError::Validation(
            "Channel name must not be empty".to_string(),
        ));
    }
    state.monitor.dispatcher().add_channel(channel)?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/channels/:name
pub async fn remove_channel(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AlertChannel>, AppError> {
    Ok(Json(state.monitor.dispatcher().remove_channel(&name)?))
}

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

/// PUT /api/v1/channels/:name/enabled
pub async fn set_channel_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<EnabledBody>,
) -> Result<StatusCode, AppError> {
    state
        .monitor
        .dispatcher()
        .set_channel_enabled(&name, body.enabled)?;
    Ok(StatusCode::NO_CONTENT)
}
