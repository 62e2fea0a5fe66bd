use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::Validate;

use application::{CreateConversationRequest, ReactToMessageRequest, SendMessageRequest};
use domain::{Conversation, Message, MessageId, Reactions};

use crate::{
    auth::{handshake_credential, AuthUser, HandshakeQuery},
    error::ApiError,
    state::AppState,
    ws_connection::{reject, WebSocketConnection},
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateConversationPayload {
    #[validate(length(min = 1, message = "participantIds must not be empty"))]
    participant_ids: Vec<String>,
    #[validate(length(max = 200))]
    title: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessagePayload {
    #[serde(rename = "type", default = "default_message_type")]
    message_type: String,
    #[validate(length(min = 1, max = 10000))]
    content: String,
}

fn default_message_type() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ReactionPayload {
    #[validate(length(min = 1))]
    reaction_type: String,
    #[validate(length(min = 1))]
    action: String,
}

/// 成功响应外层结构
#[derive(Debug, Serialize)]
struct Envelope<T> {
    status: &'static str,
    data: T,
}

fn success<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: "success",
        data,
    })
}

#[derive(Debug, Serialize)]
struct ConversationData {
    conversation: Conversation,
    created: bool,
}

#[derive(Debug, Serialize)]
struct MessageData {
    message: Message,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReactionData {
    message_id: MessageId,
    reactions: Reactions,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/{conversation_id}/messages", post(send_message))
        .route("/messages/{message_id}/reactions", post(react_to_message))
}

/// 存活检查，附带当前在线情况
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthData {
    status: &'static str,
    connections: usize,
    online_users: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthData> {
    let sessions = state.gateway.sessions();
    Json(HealthData {
        status: "ok",
        connections: sessions.connection_count().await,
        online_users: sessions.online_users().await.len(),
    })
}

async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<Envelope<ConversationData>>), ApiError> {
    payload.validate()?;

    let created = state
        .conversation_service
        .create_conversation(CreateConversationRequest {
            initiator: user,
            participant_ids: payload.participant_ids,
            title: payload.title,
        })
        .await?;

    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        success(ConversationData {
            conversation: created.conversation,
            created: created.created,
        }),
    ))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Envelope<MessageData>>), ApiError> {
    payload.validate()?;

    let message = state
        .message_service
        .send_message(SendMessageRequest {
            conversation_id,
            sender: user,
            message_type: payload.message_type,
            content: payload.content,
        })
        .await?;

    Ok((StatusCode::CREATED, success(MessageData { message })))
}

async fn react_to_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
    Json(payload): Json<ReactionPayload>,
) -> Result<Json<Envelope<ReactionData>>, ApiError> {
    payload.validate()?;

    let update = state
        .message_service
        .react(ReactToMessageRequest {
            message_id,
            user,
            reaction_type: payload.reaction_type,
            action: payload.action,
        })
        .await?;

    Ok(success(ReactionData {
        message_id: update.message_id,
        reactions: update.reactions,
    }))
}

/// 升级后才做握手认证，失败时客户端能收到 `error` 帧
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = handshake_credential(query, &headers);

    ws.on_upgrade(move |socket| async move {
        match state.gateway.admit(credential).await {
            Ok(admission) => {
                WebSocketConnection::new(socket, state, admission)
                    .run()
                    .await
            }
            Err(err) => reject(socket, err).await,
        }
    })
}
