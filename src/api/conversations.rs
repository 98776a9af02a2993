use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{body, created, ok, parse_id};
use crate::errors::AppError;
use crate::middleware::auth::AuthContext;
use crate::views::ConversationQuery;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListParams {
    fn query(&self) -> Result<ConversationQuery, AppError> {
        let number = |name: &str, raw: &Option<String>| -> Result<Option<i64>, AppError> {
            match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => s
                    .parse()
                    .map(Some)
                    .map_err(|_| AppError::validation(format!("{} must be an integer", name))),
            }
        };
        ConversationQuery::parse(
            self.status.as_deref(),
            number("limit", &self.limit)?,
            number("offset", &self.offset)?,
        )
    }
}

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    pub message: String,
    pub tenant_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub agent_id: Option<i64>,
}

fn page_response(page: crate::models::views::ConversationPage) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": page.data,
        "pagination": page.pagination,
    }))
}

pub async fn agent_conversations(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .views
        .agent_conversations(auth.identity.user_id, params.query()?)
        .await?;
    Ok(page_response(page))
}

pub async fn customer_conversations(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .views
        .customer_conversations(auth.identity.user_id, params.query()?)
        .await?;
    Ok(page_response(page))
}

/// Shared by the customer, agent and staff routes; visibility follows the
/// caller's role.
pub async fn channel_detail(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .views
        .channel_detail(auth.identity, parse_id(&id)?)
        .await?;
    Ok(ok(detail))
}

pub async fn available_channels(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.views.available_channels().await?))
}

pub async fn agent_stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.views.agent_stats(auth.identity.user_id).await?))
}

pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<CreateChannelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let (channel, message) = state
        .desk
        .create_channel(auth.identity, req.tenant_id, &req.message)
        .await?;
    Ok(created(json!({ "channel": channel, "message": message })))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let channel_id = parse_id(&id)?;
    let req = body(payload)?;
    let message = state
        .desk
        .send_message(auth.identity, channel_id, &req.message)
        .await?;
    Ok(created(message))
}

/// Agent self-claim. A body is optional; if it names an agent it must be the
/// caller.
pub async fn claim_channel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    payload: Option<Json<AssignRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let channel_id = parse_id(&id)?;
    let target = payload.and_then(|Json(r)| r.agent_id);
    let channel = state
        .desk
        .assign_channel(auth.identity, channel_id, target)
        .await?;
    Ok(ok(channel))
}

/// Admin assignment or reassignment to `agent_id`.
pub async fn assign_channel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let channel_id = parse_id(&id)?;
    let req = body(payload)?;
    let channel = state
        .desk
        .assign_channel(auth.identity, channel_id, req.agent_id)
        .await?;
    Ok(ok(channel))
}

pub async fn close_channel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let channel = state
        .desk
        .close_channel(auth.identity, parse_id(&id)?)
        .await?;
    Ok(ok(channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(status: Option<&str>, limit: Option<&str>, offset: Option<&str>) -> ListParams {
        ListParams {
            status: status.map(String::from),
            limit: limit.map(String::from),
            offset: offset.map(String::from),
        }
    }

    #[test]
    fn test_list_params() {
        let q = params(Some("assigned"), Some("25"), None).query().unwrap();
        assert_eq!(q.limit, 25);
        assert_eq!(q.offset, 0);
        assert!(params(None, Some("ten"), None).query().is_err());
        assert_eq!(params(None, Some(""), None).query().unwrap().limit, 10);
    }
}
