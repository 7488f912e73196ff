use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::Method,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use mimigram_shared::{GroupId, MessageId, UserId};
use mimigram_store::{Database, MemoryStore, Persistence, StoreError};

use crate::accounts::{self, ChatListItem, ProfileUpdate, PublicProfile, RegisterRequest, UserSummary};
use crate::auth::AuthUser;
use crate::config::{ServerConfig, StorageBackend};
use crate::conversation::{MessageDraft, MessageView};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::groups::{self, CreateGroup, GroupDetails, GroupUpdate};
use crate::messaging::{self, Thread};
use crate::presence::PresenceRegistry;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub store: Persistence,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Persistence, config: ServerConfig) -> Self {
        Self {
            store,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(PresenceRegistry::new()))),
            config: Arc::new(config),
        }
    }

    /// Open the storage backend named by `config.storage`.
    pub fn open(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match &config.storage {
            StorageBackend::DefaultPath => Persistence::new(Arc::new(Database::new()?)),
            StorageBackend::Path(path) => Persistence::new(Arc::new(Database::open_at(path)?)),
            StorageBackend::Memory => Persistence::new(Arc::new(MemoryStore::new())),
        };
        Ok(Self::new(store, config))
    }

    /// State over a fresh in-memory store. Nothing survives the process.
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(Persistence::new(Arc::new(MemoryStore::new())), config)
    }
}

#[cfg(test)]
pub fn test_state() -> AppState {
    AppState::in_memory(ServerConfig::default())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        // Accounts
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(own_profile))
        .route("/profile/:id", get(public_profile))
        .route("/updateProfile", post(update_profile))
        .route("/search", get(search))
        .route("/block", post(block))
        .route("/unblock", post(unblock))
        // Direct chats
        .route("/addChat", post(add_chat))
        .route("/chats", get(list_chats))
        .route("/sendMessage", post(send_direct))
        .route("/messages/:chatId", get(list_direct))
        .route("/react", post(react_direct))
        .route("/message/:messageId", patch(edit_direct).delete(delete_direct))
        .route("/mark-read", post(mark_read))
        // Groups
        .route("/createGroup", post(create_group))
        .route("/group/:groupId", get(group_details))
        .route("/group/:groupId/update", patch(update_group))
        .route("/group/:groupId/addMember", post(add_member))
        .route("/group/:groupId/removeMember", delete(remove_member))
        .route("/group/:groupId/leave", post(leave_group))
        .route("/group/:groupId/messages", get(list_group))
        .route("/group/:groupId/sendMessage", post(send_group))
        .route("/group/:groupId/react", post(react_group))
        .route(
            "/group/:groupId/message/:messageId",
            patch(edit_group).delete(delete_group),
        )
        // Stickers
        .route("/add-sticker", post(add_sticker))
        .route("/get-stickers", get(list_stickers))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(state.config.max_body_size)),
        )
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, ServerError>;

fn ok() -> Json<Value> {
    Json(json!({ "success": true }))
}

// ─── Service info ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    registration_open: bool,
    online_users: usize,
    connections: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        registration_open: state.config.registration_open,
        online_users: state.dispatcher.presence().online_users().await.len(),
        connections: state.dispatcher.connection_count().await,
    })
}

// ─── Accounts ───

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRef {
    user_id: UserId,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    username: String,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Value> {
    let user = accounts::register(&state, req)?;
    Ok(Json(json!({ "success": true, "id": user.id })))
}

async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Value> {
    let session = accounts::login(&state, &req.username, &req.password)?;
    Ok(Json(json!({
        "success": true,
        "token": session.token,
        "id": session.id,
    })))
}

async fn own_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<mimigram_store::Profile> {
    Ok(Json(accounts::own_profile(&state, &user.id)?))
}

async fn public_profile(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<UserId>,
) -> ApiResult<PublicProfile> {
    Ok(Json(accounts::public_profile(&state, &id).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Value> {
    let profile = accounts::update_profile(&state, &user.id, update)?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

async fn search(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Option<UserSummary>> {
    Ok(Json(accounts::search(&state, &user.id, &query.username)?))
}

async fn block(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<UserRef>,
) -> ApiResult<Value> {
    accounts::set_blocked(&state, &user.id, &req.user_id, true)?;
    Ok(ok())
}

async fn unblock(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<UserRef>,
) -> ApiResult<Value> {
    accounts::set_blocked(&state, &user.id, &req.user_id, false)?;
    Ok(ok())
}

// ─── Direct chats ───

#[derive(Deserialize)]
struct AddChatRequest {
    #[serde(default)]
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendDirectRequest {
    #[serde(alias = "receiverId")]
    chat_id: UserId,
    #[serde(flatten)]
    draft: MessageDraft,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactRequest {
    #[serde(default)]
    chat_id: Option<UserId>,
    message_id: MessageId,
    #[serde(default)]
    emoji: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditRequest {
    #[serde(default)]
    chat_id: Option<UserId>,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRef {
    chat_id: UserId,
}

fn direct_thread(state: &AppState, actor: UserId, peer: Option<UserId>) -> Result<Thread, ServerError> {
    let peer = peer.ok_or_else(|| ServerError::Validation("chatId is required".into()))?;
    Thread::direct(state, actor, peer)
}

async fn add_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<AddChatRequest>,
) -> ApiResult<Value> {
    let peer = accounts::add_chat(&state, &user, &req.username)?;
    Ok(Json(json!({ "success": true, "chatId": peer })))
}

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Vec<ChatListItem>> {
    Ok(Json(accounts::list_chats(&state, &user.id).await?))
}

async fn send_direct(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<SendDirectRequest>,
) -> ApiResult<Value> {
    let thread = Thread::direct(&state, user.id, req.chat_id)?;
    let message = messaging::send(&state, &thread, req.draft).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn list_direct(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(peer): Path<UserId>,
) -> ApiResult<Vec<MessageView>> {
    let thread = Thread::direct(&state, user.id, peer)?;
    Ok(Json(messaging::list(&state, &thread)?))
}

async fn react_direct(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ReactRequest>,
) -> ApiResult<Value> {
    let thread = direct_thread(&state, user.id, req.chat_id)?;
    let reactions = messaging::react(&state, &thread, &req.message_id, &req.emoji).await?;
    Ok(Json(json!({ "success": true, "reactions": reactions })))
}

async fn edit_direct(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<MessageId>,
    Json(req): Json<EditRequest>,
) -> ApiResult<Value> {
    let thread = direct_thread(&state, user.id, req.chat_id)?;
    let message = messaging::edit(&state, &thread, &message_id, &req.text).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn delete_direct(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<MessageId>,
    Json(req): Json<ChatRef>,
) -> ApiResult<Value> {
    let thread = Thread::direct(&state, user.id, req.chat_id)?;
    messaging::delete(&state, &thread, &message_id).await?;
    Ok(ok())
}

async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ChatRef>,
) -> ApiResult<Value> {
    let changed = messaging::mark_read(&state, user.id, req.chat_id).await?;
    Ok(Json(json!({ "success": true, "changed": changed })))
}

// ─── Groups ───

async fn create_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateGroup>,
) -> ApiResult<Value> {
    let group = groups::create(&state, &user.id, req)?;
    Ok(Json(json!({ "success": true, "groupId": group.id })))
}

async fn group_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
) -> ApiResult<GroupDetails> {
    Ok(Json(groups::details(&state, &user.id, &group_id)?))
}

async fn update_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<GroupUpdate>,
) -> ApiResult<Value> {
    let group = groups::update(&state, &user.id, &group_id, req)?;
    Ok(Json(json!({ "success": true, "group": group })))
}

async fn add_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<UserRef>,
) -> ApiResult<Value> {
    let group = groups::add_member(&state, &user.id, &group_id, &req.user_id)?;
    Ok(Json(json!({ "success": true, "members": group.members })))
}

async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<UserRef>,
) -> ApiResult<Value> {
    let group = groups::remove_member(&state, &user.id, &group_id, &req.user_id)?;
    Ok(Json(json!({ "success": true, "members": group.members })))
}

async fn leave_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
) -> ApiResult<Value> {
    let username = groups::leave(&state, &user.id, &group_id)?;
    Ok(Json(json!({ "success": true, "username": username })))
}

async fn list_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
) -> ApiResult<Vec<MessageView>> {
    let thread = Thread::group(&state, user.id, group_id)?;
    Ok(Json(messaging::list(&state, &thread)?))
}

async fn send_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Json(draft): Json<MessageDraft>,
) -> ApiResult<Value> {
    let thread = Thread::group(&state, user.id, group_id)?;
    let message = messaging::send(&state, &thread, draft).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn react_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<ReactRequest>,
) -> ApiResult<Value> {
    let thread = Thread::group(&state, user.id, group_id)?;
    let reactions = messaging::react(&state, &thread, &req.message_id, &req.emoji).await?;
    Ok(Json(json!({ "success": true, "reactions": reactions })))
}

async fn edit_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((group_id, message_id)): Path<(GroupId, MessageId)>,
    Json(req): Json<EditRequest>,
) -> ApiResult<Value> {
    let thread = Thread::group(&state, user.id, group_id)?;
    let message = messaging::edit(&state, &thread, &message_id, &req.text).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((group_id, message_id)): Path<(GroupId, MessageId)>,
) -> ApiResult<Value> {
    let thread = Thread::group(&state, user.id, group_id)?;
    messaging::delete(&state, &thread, &message_id).await?;
    Ok(ok())
}

// ─── Stickers ───

#[derive(Deserialize)]
struct StickerRequest {
    #[serde(default)]
    sticker: Value,
}

async fn add_sticker(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<StickerRequest>,
) -> ApiResult<Value> {
    accounts::add_sticker(&state, &user.id, req.sticker)?;
    Ok(ok())
}

async fn list_stickers(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Vec<Value>> {
    Ok(Json(accounts::list_stickers(&state, &user.id)?))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
