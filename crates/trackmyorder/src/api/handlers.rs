//! HTTP handlers for the chat API.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use trackmyorder_protocol::{Conversation, ConversationStatus, TrackingId};

use crate::auth::RequireChatAccess;
use crate::chat::ConversationFilter;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub chat: Conversation,
}

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<Conversation>,
}

/// Response for staff mutations of a conversation.
#[derive(Debug, Serialize)]
pub struct ChatUpdateResponse {
    pub message: String,
    pub chat: Conversation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDeletedResponse {
    pub message: String,
    pub tracking_id: TrackingId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    #[serde(default)]
    pub tracking_id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

fn tracking_id(raw: &str) -> ApiResult<TrackingId> {
    TrackingId::parse(raw).ok_or_else(|| ApiError::bad_request("tracking ID is required"))
}

fn parse_status(raw: &str) -> ApiResult<ConversationStatus> {
    raw.parse::<ConversationStatus>()
        .map_err(ApiError::bad_request)
}

/// Get a conversation by tracking ID.
///
/// GET /api/chats/{tracking_id}
pub async fn get_chat(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ChatResponse>> {
    let id = tracking_id(&raw_id)?;
    let chat = state
        .store
        .find_by_tracking_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Conversation not found: {}", id)))?;

    Ok(Json(ChatResponse { chat }))
}

/// Open a conversation, or return the existing one.
///
/// POST /api/chats
pub async fn create_chat(
    State(state): State<AppState>,
    Json(request): Json<CreateChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let id = TrackingId::parse(&request.tracking_id)
        .filter(|_| !request.customer_name.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("tracking ID and customer name are required"))?;

    let chat = state
        .store
        .find_or_create(
            &id,
            &request.customer_name,
            request.customer_email.as_deref(),
        )
        .await?;

    Ok(Json(ChatResponse { chat }))
}

/// List conversations, newest activity first.
///
/// GET /api/chats?status=
pub async fn list_chats(
    State(state): State<AppState>,
    _staff: RequireChatAccess,
    Query(query): Query<ListChatsQuery>,
) -> ApiResult<Json<ChatListResponse>> {
    let filter = match query.status.as_deref().map(str::trim) {
        None | Some("") => ConversationFilter::default(),
        Some(raw) => ConversationFilter::with_status(parse_status(raw)?),
    };

    let chats = state.store.list_all(filter).await?;
    Ok(Json(ChatListResponse { chats }))
}

/// Change a conversation's status.
///
/// PUT /api/chats/{tracking_id}/status
pub async fn update_chat_status(
    State(state): State<AppState>,
    staff: RequireChatAccess,
    Path(raw_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<Json<ChatUpdateResponse>> {
    let id = tracking_id(&raw_id)?;
    let status = match request.status.as_deref().map(str::trim) {
        None | Some("") => return Err(ApiError::bad_request("status is required")),
        Some(raw) => parse_status(raw)?,
    };

    let chat = state.hub.update_status(&id, status).await?;
    info!(
        "Conversation {} set to {} by {} ({})",
        id,
        status,
        staff.0.display_name(),
        staff.0.id()
    );

    Ok(Json(ChatUpdateResponse {
        message: "Conversation status updated".to_string(),
        chat,
    }))
}

/// Clear the unread flag.
///
/// PUT /api/chats/{tracking_id}/read
pub async fn mark_chat_read(
    State(state): State<AppState>,
    staff: RequireChatAccess,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ChatUpdateResponse>> {
    let id = tracking_id(&raw_id)?;
    let chat = state.hub.mark_read(&id).await?;
    info!(
        "Conversation {} marked read by {} ({})",
        id,
        staff.0.display_name(),
        staff.0.id()
    );

    Ok(Json(ChatUpdateResponse {
        message: "Conversation marked as read".to_string(),
        chat,
    }))
}

/// Permanently delete a conversation and its history.
///
/// DELETE /api/chats/{tracking_id}
pub async fn delete_chat(
    State(state): State<AppState>,
    staff: RequireChatAccess,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ChatDeletedResponse>> {
    let id = tracking_id(&raw_id)?;
    state.store.delete(&id).await?;
    info!(
        "Conversation {} deleted by {} ({})",
        id,
        staff.0.display_name(),
        staff.0.id()
    );

    Ok(Json(ChatDeletedResponse {
        message: "Conversation deleted".to_string(),
        tracking_id: id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Resolved").unwrap(), ConversationStatus::Resolved);
        assert!(matches!(parse_status("archived"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_blank_tracking_id_rejected() {
        assert!(matches!(tracking_id("  "), Err(ApiError::BadRequest(_))));
        assert_eq!(tracking_id(" trk-9 ").unwrap().as_str(), "TRK-9");
    }
}
