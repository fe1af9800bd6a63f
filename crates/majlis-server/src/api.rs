use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use majlis_core::{
    BanDuration, CreditQueue, GameConfig, GateDecision, GiftReceipt, Majlis, NewRoom, NewUser,
    RoomFlags,
};
use majlis_shared::{
    AdminRole, Broadcast, DisplayId, Notification, NotificationKind, Room, RoomId, StoreItem,
    User, UserUid, Wallet, WealthTransaction, WelcomeRequest,
};
use majlis_store::{DocumentStore, Snapshot, Subscription};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Header carrying the caller's uid, resolved upstream by the auth provider.
pub const USER_HEADER: &str = "x-user-uid";

pub struct AppState<S> {
    pub majlis: Majlis<S>,
    pub credits: CreditQueue,
    pub config: Arc<ServerConfig>,
    pub started: Instant,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            majlis: self.majlis.clone(),
            credits: self.credits.clone(),
            config: Arc::clone(&self.config),
            started: self.started,
        }
    }
}

impl<S: DocumentStore + 'static> AppState<S> {
    pub fn new(majlis: Majlis<S>, credits: CreditQueue, config: ServerConfig) -> Self {
        Self {
            majlis,
            credits,
            config: Arc::new(config),
            started: Instant::now(),
        }
    }
}

pub fn build_router<S: DocumentStore + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info::<S>))
        // Accounts
        .route("/users", post(create_user::<S>))
        .route("/users/me", get(get_me::<S>).delete(delete_me::<S>))
        .route("/users/me/events", get(user_events::<S>))
        .route("/users/by-display-id/:display_id", get(search_user::<S>))
        // Rooms
        .route("/rooms", get(list_rooms::<S>).post(create_room::<S>))
        .route("/rooms/by-host/:display_id", get(rooms_by_host::<S>))
        .route("/rooms/:id", get(get_room::<S>).delete(delete_room::<S>))
        .route("/rooms/:id/events", get(room_events::<S>))
        .route("/rooms/:id/gate", get(room_gate::<S>))
        .route("/rooms/:id/enter", post(enter_room::<S>))
        .route("/rooms/:id/exit", post(exit_room::<S>))
        .route("/rooms/:id/bans", post(ban_user::<S>))
        .route("/rooms/:id/bans/:display_id", delete(unban_user::<S>))
        .route("/rooms/:id/admins", post(add_room_admin::<S>))
        .route("/rooms/:id/admins/:display_id", delete(remove_room_admin::<S>))
        .route("/rooms/:id/game", post(update_game_config::<S>))
        // Seats
        .route("/rooms/:id/seats/leave", post(leave_seat::<S>))
        .route("/rooms/:id/seats/count", post(change_seat_count::<S>))
        .route("/rooms/:id/seats/:index/take", post(take_seat::<S>))
        .route("/rooms/:id/seats/:index/kick", post(kick_seat::<S>))
        .route("/rooms/:id/seats/:index/lock", post(lock_seat::<S>))
        .route("/rooms/:id/seats/:index/mute", post(mute_seat::<S>))
        // Economy
        .route("/rooms/:id/gifts", post(send_gift::<S>))
        .route("/rooms/:id/wealth/distribute", post(distribute_wealth::<S>))
        .route("/rooms/:id/wealth/history", get(wealth_history::<S>))
        .route("/wallet/exchange", post(exchange_coins::<S>))
        .route("/wallet/purchase", post(purchase_item::<S>))
        .route("/store-items", get(list_store_items::<S>))
        .route("/wallet/agency-transfer", post(agency_transfer::<S>))
        // Notifications
        .route("/notifications", get(list_notifications::<S>))
        .route("/notifications/read", post(mark_notifications_read::<S>))
        .route("/welcome-requests", post(submit_welcome_request::<S>))
        // Admin
        .route("/admin/status", get(admin_status::<S>))
        .route("/admin/users/:uid/ban", post(admin_ban::<S>))
        .route("/admin/users/:uid/role", post(admin_role::<S>))
        .route("/admin/users/:uid/vip", post(admin_vip::<S>))
        .route("/admin/users/:uid/agent", post(admin_agent::<S>))
        .route("/admin/users/:uid/agency-top-up", post(admin_top_up::<S>))
        .route("/admin/users/:uid/can-create-room", post(admin_can_create_room::<S>))
        .route("/admin/users/:uid/welcome-agent", post(admin_welcome_agent::<S>))
        .route("/admin/users/:uid/diamonds", post(admin_diamonds::<S>))
        .route("/admin/users/:uid/wallet-delta", post(admin_wallet_delta::<S>))
        .route("/admin/users/:uid/reset-coins", post(admin_reset_coins::<S>))
        .route("/admin/users/:uid/notify", post(admin_notify::<S>))
        .route("/admin/broadcasts", post(admin_broadcast::<S>))
        .route("/admin/store-items", post(admin_store_item::<S>))
        .route("/admin/rooms/:id/flags", post(admin_room_flags::<S>))
        .route("/admin/maintenance/:task", post(admin_maintenance::<S>))
        .route("/admin/welcome-requests", get(admin_welcome_requests::<S>))
        .route("/admin/welcome-requests/:id/:decision", post(admin_welcome_decision::<S>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

/// Run a blocking economy operation off the async executor.
async fn run<S, T, F>(state: &AppState<S>, f: F) -> Result<T, ServerError>
where
    S: DocumentStore + 'static,
    T: Send + 'static,
    F: FnOnce(&Majlis<S>) -> majlis_core::Result<T> + Send + 'static,
{
    let majlis = state.majlis.clone();
    tokio::task::spawn_blocking(move || f(&majlis))
        .await
        .map_err(|e| ServerError::Internal(format!("worker task failed: {e}")))?
        .map_err(ServerError::from)
}

fn caller(headers: &HeaderMap) -> Result<UserUid, ServerError> {
    let uid = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::Unauthorized(format!("Missing {USER_HEADER} header")))?;
    Ok(UserUid::new(uid))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Unauthorized("Missing Authorization header".into()))?;
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

fn display_id(raw: &str) -> Result<DisplayId, ServerError> {
    DisplayId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn snapshot_json(snapshot: Snapshot) -> Value {
    match snapshot {
        Snapshot::Document { document, .. } => document.map(|d| d.data).unwrap_or(Value::Null),
        Snapshot::Query(docs) => Value::Array(docs.into_iter().map(|d| d.data).collect()),
    }
}

/// Stream snapshots until the client disconnects, which drops the
/// subscription and releases the listener.
fn snapshot_stream(sub: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(sub, |mut sub| async move {
        let snapshot = sub.recv().await?;
        let event = Event::default()
            .event("snapshot")
            .data(snapshot_json(snapshot).to_string());
        Some((Ok(event), sub))
    })
}

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    admin_enabled: bool,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    backend: String,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

const OK: Json<OkResponse> = Json(OkResponse { ok: true });

#[derive(Deserialize)]
struct CreateUserRequest {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(flatten)]
    profile: NewUser,
}

#[derive(Deserialize)]
struct FlagRequest {
    value: bool,
}

#[derive(Deserialize)]
struct SeatCountRequest {
    seat_count: usize,
}

#[derive(Deserialize)]
struct SeatQuery {
    seat: Option<usize>,
}

#[derive(Deserialize)]
struct GiftRequest {
    seat_index: usize,
    cost: i64,
    #[serde(default)]
    gift_id: Option<String>,
}

#[derive(Deserialize)]
struct TargetAmountRequest {
    target_display_id: String,
    amount: i64,
}

#[derive(Deserialize)]
struct TargetRequest {
    target_display_id: String,
}

#[derive(Deserialize)]
struct BanRequest {
    target_display_id: String,
    /// Omit for a permanent ban.
    #[serde(default)]
    minutes: Option<i64>,
}

/// Only the id is read; price and currency come from the catalog.
#[derive(Deserialize)]
struct PurchaseRequest {
    item_id: String,
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: i64,
}

#[derive(Deserialize)]
struct DeltaRequest {
    delta: i64,
}

#[derive(Deserialize)]
struct NotificationQuery {
    #[serde(default)]
    kind: Option<NotificationKind>,
}

#[derive(Deserialize)]
struct GlobalBanRequest {
    duration: BanDuration,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Option<AdminRole>,
}

#[derive(Deserialize)]
struct VipRequest {
    level: u8,
    #[serde(default)]
    days: Option<i64>,
}

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

#[derive(Deserialize)]
struct MessageRequest {
    title: String,
    body: String,
}

// ---------------------------------------------------------------------------
// Public
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        admin_enabled: state.config.admin_token.is_some(),
    })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

async fn create_user<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ServerError> {
    let uid = caller(&headers)?;
    let user = run(&state, move |m| {
        m.create_user_profile(&uid, req.device_id.as_deref(), req.profile)
    })
    .await?;
    Ok(Json(user))
}

async fn get_me<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<User>, ServerError> {
    let uid = caller(&headers)?;
    let user = run(&state, move |m| {
        m.get_user(&uid)?
            .ok_or_else(|| majlis_core::EconomyError::UserNotFound(uid.to_string()))
    })
    .await?;
    Ok(Json(user))
}

async fn delete_me<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ServerError> {
    let uid = caller(&headers)?;
    run(&state, move |m| m.delete_user(&uid)).await?;
    Ok(OK)
}

async fn user_events<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let uid = caller(&headers)?;
    let sub = run(&state, move |m| m.listen_to_user(&uid)).await?;
    Ok(Sse::new(snapshot_stream(sub)).keep_alive(KeepAlive::default()))
}

async fn search_user<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Path(raw): Path<String>,
) -> Result<Json<User>, ServerError> {
    let id = display_id(&raw)?;
    let user = run(&state, move |m| {
        m.search_user_by_display_id(&id)?
            .ok_or_else(|| majlis_core::EconomyError::TargetNotFound(id))
    })
    .await?;
    Ok(Json(user))
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

async fn create_room<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<NewRoom>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| m.create_room(&uid, req)).await?;
    Ok(Json(room))
}

async fn list_rooms<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<Room>>, ServerError> {
    Ok(Json(run(&state, |m| m.list_rooms()).await?))
}

async fn rooms_by_host<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<Room>>, ServerError> {
    let host = display_id(&raw)?;
    Ok(Json(run(&state, move |m| m.rooms_by_host(&host)).await?))
}

async fn get_room<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Room>, ServerError> {
    let room_id = RoomId::new(id);
    let room = run(&state, move |m| {
        m.get_room(&room_id)?
            .ok_or(majlis_core::EconomyError::RoomNotFound(room_id))
    })
    .await?;
    Ok(Json(room))
}

async fn delete_room<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ServerError> {
    let uid = caller(&headers)?;
    run(&state, move |m| m.delete_room(&RoomId::new(id), &uid)).await?;
    Ok(OK)
}

async fn room_events<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let sub = run(&state, move |m| m.listen_to_room(&RoomId::new(id))).await?;
    Ok(Sse::new(snapshot_stream(sub)).keep_alive(KeepAlive::default()))
}

/// Entry decision, or the seat decision when `?seat=N` is given.
async fn room_gate<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<SeatQuery>,
) -> Result<Json<GateDecision>, ServerError> {
    let uid = caller(&headers)?;
    let room_id = RoomId::new(id);
    let decision = run(&state, move |m| match q.seat {
        Some(seat) => m.seat_decision(&room_id, &uid, seat),
        None => m.entry_decision(&room_id, &uid),
    })
    .await?;
    Ok(Json(decision))
}

async fn enter_room<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    Ok(Json(run(&state, move |m| m.enter_room(&RoomId::new(id), &uid)).await?))
}

async fn exit_room<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    Ok(Json(run(&state, move |m| m.exit_room(&RoomId::new(id), &uid)).await?))
}

async fn ban_user<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<BanRequest>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&req.target_display_id)?;
    let room = run(&state, move |m| {
        m.ban_user_from_room(&RoomId::new(id), &uid, &target, req.minutes)
    })
    .await?;
    Ok(Json(room))
}

async fn unban_user<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, raw)): Path<(String, String)>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&raw)?;
    let room = run(&state, move |m| {
        m.unban_user_from_room(&RoomId::new(id), &uid, &target)
    })
    .await?;
    Ok(Json(room))
}

async fn add_room_admin<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&req.target_display_id)?;
    let room = run(&state, move |m| m.add_room_admin(&RoomId::new(id), &uid, &target)).await?;
    Ok(Json(room))
}

async fn remove_room_admin<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, raw)): Path<(String, String)>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&raw)?;
    let room = run(&state, move |m| {
        m.remove_room_admin(&RoomId::new(id), &uid, &target)
    })
    .await?;
    Ok(Json(room))
}

async fn update_game_config<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(config): Json<GameConfig>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| {
        m.update_game_config(&RoomId::new(id), &uid, config)
    })
    .await?;
    Ok(Json(room))
}

// ---------------------------------------------------------------------------
// Seats
// ---------------------------------------------------------------------------

async fn take_seat<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| m.take_seat(&RoomId::new(id), index, &uid)).await?;
    Ok(Json(room))
}

async fn leave_seat<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    Ok(Json(run(&state, move |m| m.leave_seat(&RoomId::new(id), &uid)).await?))
}

async fn kick_seat<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| {
        m.kick_user_from_seat(&RoomId::new(id), &uid, index)
    })
    .await?;
    Ok(Json(room))
}

async fn lock_seat<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<FlagRequest>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| {
        m.toggle_seat_lock(&RoomId::new(id), &uid, index, req.value)
    })
    .await?;
    Ok(Json(room))
}

async fn mute_seat<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<FlagRequest>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| {
        m.toggle_seat_mute(&RoomId::new(id), &uid, index, req.value)
    })
    .await?;
    Ok(Json(room))
}

async fn change_seat_count<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SeatCountRequest>,
) -> Result<Json<Room>, ServerError> {
    let uid = caller(&headers)?;
    let room = run(&state, move |m| {
        m.change_seat_count(&RoomId::new(id), &uid, req.seat_count)
    })
    .await?;
    Ok(Json(room))
}

// ---------------------------------------------------------------------------
// Economy
// ---------------------------------------------------------------------------

async fn send_gift<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<GiftRequest>,
) -> Result<Json<GiftReceipt>, ServerError> {
    let uid = caller(&headers)?;
    let receipt = run(&state, move |m| {
        m.send_gift(&RoomId::new(id), &uid, req.seat_index, req.cost, req.gift_id)
    })
    .await?;
    if let Some(credit) = &receipt.credit {
        state.credits.enqueue(credit.clone());
    }
    Ok(Json(receipt))
}

async fn distribute_wealth<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<TargetAmountRequest>,
) -> Result<Json<WealthTransaction>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&req.target_display_id)?;
    let record = run(&state, move |m| {
        m.distribute_room_wealth(&RoomId::new(id), &uid, &target, req.amount)
    })
    .await?;
    Ok(Json(record))
}

async fn wealth_history<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WealthTransaction>>, ServerError> {
    Ok(Json(run(&state, move |m| m.wealth_history(&RoomId::new(id))).await?))
}

async fn exchange_coins<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<AmountRequest>,
) -> Result<Json<Wallet>, ServerError> {
    let uid = caller(&headers)?;
    let wallet = run(&state, move |m| m.exchange_coins_to_diamonds(&uid, req.amount)).await?;
    Ok(Json(wallet))
}

async fn purchase_item<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<User>, ServerError> {
    let uid = caller(&headers)?;
    Ok(Json(
        run(&state, move |m| m.purchase_store_item(&uid, &req.item_id)).await?,
    ))
}

async fn list_store_items<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<StoreItem>>, ServerError> {
    Ok(Json(run(&state, |m| m.list_store_items()).await?))
}

async fn agency_transfer<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<TargetAmountRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&req.target_display_id)?;
    run(&state, move |m| m.transfer_agency_diamonds(&uid, &target, req.amount)).await?;
    Ok(OK)
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

async fn list_notifications<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Query(q): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let uid = caller(&headers)?;
    let kind = q.kind.unwrap_or(NotificationKind::System);
    Ok(Json(run(&state, move |m| m.list_notifications(&uid, kind)).await?))
}

async fn mark_notifications_read<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<CountResponse>, ServerError> {
    let uid = caller(&headers)?;
    let count = run(&state, move |m| m.mark_system_notifications_read(&uid)).await?;
    Ok(Json(CountResponse { count }))
}

async fn submit_welcome_request<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<TargetRequest>,
) -> Result<Json<WelcomeRequest>, ServerError> {
    let uid = caller(&headers)?;
    let target = display_id(&req.target_display_id)?;
    Ok(Json(run(&state, move |m| m.submit_welcome_request(&uid, &target)).await?))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

async fn admin_status<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        backend: format!("{:?}", state.config.backend),
        uptime_secs: state.started.elapsed().as_secs(),
    }))
}

/// Shared shape of the per-user admin endpoints.
async fn admin_user_op<S, F>(
    state: &AppState<S>,
    headers: &HeaderMap,
    uid: String,
    f: F,
) -> Result<Json<OkResponse>, ServerError>
where
    S: DocumentStore + 'static,
    F: FnOnce(&Majlis<S>, &UserUid) -> majlis_core::Result<()> + Send + 'static,
{
    verify_admin_token(headers, &state.config)?;
    let uid = UserUid::new(uid);
    run(state, move |m| f(m, &uid)).await?;
    Ok(OK)
}

async fn admin_ban<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<GlobalBanRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| m.set_global_ban(uid, req.duration)).await
}

async fn admin_role<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| m.set_admin_role(uid, req.role)).await
}

async fn admin_vip<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<VipRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| {
        m.set_vip(uid, req.level, req.days)
    })
    .await
}

async fn admin_agent<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| m.set_agent(uid, req.enabled)).await
}

async fn admin_top_up<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| m.top_up_agency(uid, req.amount)).await
}

async fn admin_can_create_room<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| {
        m.set_can_create_room(uid, req.enabled)
    })
    .await
}

async fn admin_welcome_agent<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, move |m, uid| {
        m.set_welcome_agent(uid, req.enabled)
    })
    .await
}

async fn admin_diamonds<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<DeltaRequest>,
) -> Result<Json<Wallet>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let uid = UserUid::new(uid);
    Ok(Json(run(&state, move |m| m.admin_adjust_diamonds(&uid, req.delta)).await?))
}

/// Top-ups and refunds that count towards daily profit.
async fn admin_wallet_delta<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<Wallet>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let uid = UserUid::new(uid);
    Ok(Json(run(&state, move |m| m.apply_wallet_delta(&uid, req.amount)).await?))
}

async fn admin_reset_coins<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> Result<Json<OkResponse>, ServerError> {
    admin_user_op(&state, &headers, uid, |m, uid| m.reset_coins(uid)).await
}

async fn admin_notify<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<Notification>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let uid = UserUid::new(uid);
    let note = run(&state, move |m| {
        m.send_system_notification(&uid, &req.title, &req.body)
    })
    .await?;
    Ok(Json(note))
}

async fn admin_broadcast<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<MessageRequest>,
) -> Result<Json<Broadcast>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let broadcast = run(&state, move |m| {
        m.broadcast_official_message(&req.title, &req.body)
    })
    .await?;
    Ok(Json(broadcast))
}

async fn admin_store_item<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(item): Json<StoreItem>,
) -> Result<Json<StoreItem>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let saved = item.clone();
    run(&state, move |m| m.upsert_store_item(&item)).await?;
    Ok(Json(saved))
}

async fn admin_room_flags<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(flags): Json<RoomFlags>,
) -> Result<Json<Room>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    Ok(Json(run(&state, move |m| m.set_room_flags(&RoomId::new(id), flags)).await?))
}

async fn admin_maintenance<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(task): Path<String>,
) -> Result<Json<CountResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let op: fn(&Majlis<S>) -> majlis_core::Result<usize> = match task.as_str() {
        "reset-cups" => |m| m.reset_all_room_cups(),
        "reset-ghosts" => |m| m.reset_all_ghost_users(),
        "reset-coins" => |m| m.reset_all_users_coins(),
        "sync-room-ids" => |m| m.sync_room_ids_with_host_ids(),
        "delete-all-rooms" => |m| m.delete_all_rooms(),
        other => {
            return Err(ServerError::BadRequest(format!(
                "Unknown maintenance task: {other}"
            )))
        }
    };
    let count = run(&state, op).await?;
    info!(task = %task, count, "Maintenance task finished");
    Ok(Json(CountResponse { count }))
}

async fn admin_welcome_requests<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<WelcomeRequest>>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    Ok(Json(run(&state, |m| m.pending_welcome_requests()).await?))
}

async fn admin_welcome_decision<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path((id, decision)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    match decision.as_str() {
        "approve" => run(&state, move |m| m.approve_welcome_request(&id)).await?,
        "reject" => run(&state, move |m| m.reject_welcome_request(&id)).await?,
        other => {
            return Err(ServerError::BadRequest(format!(
                "Unknown decision: {other}"
            )))
        }
    }
    Ok(OK)
}

pub async fn serve<S: DocumentStore + 'static>(
    state: AppState<S>,
    addr: std::net::SocketAddr,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
