//! Chat service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::ApiResult,
    matchmaker::MatchOutcome,
    middleware::auth_middleware,
    models::User,
    state::AppState,
    ws::ws_upgrade,
};

#[derive(Debug, Default, Deserialize)]
pub struct StartChatRequest {
    pub interests: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndChatRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub reported_user_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
    pub chat_id: Option<Uuid>,
}

/// Create the router for the chat service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/chat/start", post(start_chat))
        .route("/chat/end/:id", post(end_chat))
        .route("/chat/history", get(chat_history))
        .route("/chat/report", post(report_user))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "chat-service",
        "online": state.gateway.presence().len(),
    }))
}

/// Request a partner over HTTP
pub async fn start_chat(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Option<Json<StartChatRequest>>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    let outcome = state.gateway.find_chat(&user, body.interests).await?;

    let response = match outcome {
        MatchOutcome::Attached {
            session_id,
            peer_id,
        } => json!({
            "message": "Chat started",
            "sessionId": session_id,
            "status": "active",
            "peerId": peer_id,
        }),
        MatchOutcome::Waiting { session_id } => json!({
            "message": "Waiting for a partner",
            "sessionId": session_id,
            "status": "waiting",
        }),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// End one of the caller's sessions
pub async fn end_chat(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    body: Option<Json<EndChatRequest>>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    state
        .gateway
        .end_chat(user.id, id, body.reason.as_deref())
        .await?;

    Ok(Json(json!({ "message": "Chat ended" })))
}

/// Paged chat history of the caller
pub async fn chat_history(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .gateway
        .history(user.id, query.page, query.limit)
        .await?;

    Ok(Json(page))
}

/// File a report against another user
pub async fn report_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<ReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .gateway
        .report(
            user.id,
            payload.reported_user_id,
            payload.chat_id,
            &payload.reason,
            payload.description,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Report submitted successfully",
            "report": report,
        })),
    ))
}
