use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::service::DeliveryReport;
use super::types::{DevicePlatform, NotificationCreate, NotificationPayload};
use crate::api::AppState;
use crate::auth::{CurrentUser, Permission, UserRole};
use crate::error::{AppError, AppJson, AppQuery, Validator};
use crate::store::{NotificationRecord, RecipientFilter};

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub result: DeliveryReport,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub recipients: usize,
    pub result: DeliveryReport,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    pub platform: DevicePlatform,
    #[serde(default)]
    pub device_name: Option<String>,
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<NotificationCreate>,
) -> Result<Json<SendResponse>, AppError> {
    user.require(Permission::AdminUsers)?;
    Validator::new()
        .check(!request.recipient_ids.is_empty(), "recipient_ids", "must not be empty")
        .non_empty("title", &request.payload.title)
        .finish()?;

    let result = state.notifier.send(&request).await;
    info!(
        sender = user.id(),
        kind = %request.payload.kind,
        recipients = request.recipient_ids.len(),
        "Notification dispatched"
    );
    Ok(Json(SendResponse { success: true, result }))
}

/// Send one payload to a group chosen by project and/or role. Recipients
/// never leave the caller's company unless the caller is a super admin.
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppQuery(query): AppQuery<BroadcastQuery>,
    AppJson(payload): AppJson<NotificationPayload>,
) -> Result<Json<BroadcastResponse>, AppError> {
    user.require(Permission::AdminUsers)?;
    Validator::new().non_empty("title", &payload.title).finish()?;

    let company_id = if user.user.role == UserRole::SuperAdmin {
        None
    } else {
        Some(
            user.user
                .company_id
                .as_deref()
                .ok_or_else(|| AppError::Forbidden("Broadcast requires a company account".to_string()))?,
        )
    };

    let recipient_ids = {
        let db = state.lock_db()?;
        if let Some(project_id) = &query.project_id {
            let visible = db
                .get_project(project_id)?
                .is_some_and(|p| company_id.is_none() || p.company_id.as_deref() == company_id);
            if !visible {
                return Err(AppError::NotFound("Project not found".to_string()));
            }
        }
        db.recipient_ids(&RecipientFilter {
            company_id,
            project_id: query.project_id.as_deref(),
            role: query.role,
        })?
    };

    let request = NotificationCreate {
        recipient_ids,
        payload,
        priority: None,
        channels: None,
    };
    let result = state.notifier.send(&request).await;
    info!(
        sender = user.id(),
        kind = %request.payload.kind,
        project_id = query.project_id.as_deref().unwrap_or("-"),
        role = query.role.map_or("-", |r| r.as_str()),
        recipients = request.recipient_ids.len(),
        "Notification broadcast"
    );
    Ok(Json(BroadcastResponse {
        success: true,
        recipients: request.recipient_ids.len(),
        result,
    }))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(user_id): Path<String>,
    AppQuery(query): AppQuery<ListQuery>,
) -> Result<Json<NotificationList>, AppError> {
    if user.id() != user_id {
        user.require(Permission::AdminUsers)?;
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(AppError::validation("limit", format!("must be between 1 and {MAX_LIST_LIMIT}")));
    }

    let db = state.lock_db()?;
    Ok(Json(NotificationList {
        notifications: db.list_notifications(&user_id, query.unread_only, limit, query.offset)?,
        unread_count: db.unread_count(&user_id)?,
    }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.lock_db()?.mark_notification_read(user.id(), &id)?;
    Ok(Json(serde_json::json!({"success": true})))
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let marked = state.lock_db()?.mark_all_notifications_read(user.id())?;
    Ok(Json(serde_json::json!({"success": true, "marked": marked})))
}

pub async fn register_device(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<RegisterDeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    Validator::new().non_empty("token", &request.token).finish()?;
    state.lock_db()?.save_device_token(
        user.id(),
        request.token.trim(),
        request.platform,
        request.device_name.as_deref(),
    )?;
    info!(user = user.id(), platform = %request.platform, "Device registered");
    Ok((StatusCode::CREATED, Json(serde_json::json!({"success": true}))))
}

pub async fn unregister_device(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    state.lock_db()?.delete_device_token(user.id(), &token)?;
    Ok(StatusCode::NO_CONTENT)
}
