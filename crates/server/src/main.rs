use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use server_api::ApiContext;
use shared::{
    domain::{AgendaItemId, ListOfSpeakersId, SpeakerId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AddSpeakerRequest, AgendaItemSummary, ConfigEntry, ListOfSpeakersPayload,
        MarkSpeakerRequest, ServerEvent, SetClosedRequest, SortSpeakersRequest, StartSpeechRequest,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use uuid::Uuid;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginResponse {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct CreateAgendaItemRequest {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SetConfigBody {
    value: String,
}

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };
    let (events, _) = broadcast::channel(256);

    let state = AppState { api, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/agenda", get(http_list_agenda))
        .route("/agenda", post(http_create_agenda_item))
        .route("/agenda/:agenda_item_id", delete(http_delete_agenda_item))
        .route("/lists_of_speakers/:list_id", get(http_get_list_of_speakers))
        .route(
            "/lists_of_speakers/:list_id/speakers",
            post(http_add_speaker),
        )
        .route(
            "/lists_of_speakers/:list_id/speakers/:speaker_id",
            delete(http_remove_speaker),
        )
        .route("/lists_of_speakers/:list_id/start", post(http_start_speech))
        .route("/lists_of_speakers/:list_id/stop", post(http_stop_speech))
        .route("/lists_of_speakers/:list_id/mark", post(http_mark_speaker))
        .route("/lists_of_speakers/:list_id/sort", post(http_sort_speakers))
        .route(
            "/lists_of_speakers/:list_id/readd_last",
            post(http_readd_last_speaker),
        )
        .route("/lists_of_speakers/:list_id/close", post(http_set_closed))
        .route("/config", get(http_list_config))
        .route("/config/:key", get(http_get_config).put(http_set_config))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn publish_list_update(state: &AppState, list_of_speakers: ListOfSpeakersPayload) {
    let _ = state
        .events
        .send(ServerEvent::ListOfSpeakersUpdated { list_of_speakers });
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let user_id: UserId = server_api::login(&state.api, &req.username)
        .await
        .map_err(reject)?;
    Ok(Json(LoginResponse { user_id: user_id.0 }))
}

async fn http_list_agenda(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgendaItemSummary>>, (StatusCode, Json<ApiError>)> {
    let items = server_api::list_agenda(&state.api).await.map_err(reject)?;
    Ok(Json(items))
}

async fn http_create_agenda_item(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAgendaItemRequest>,
) -> Result<Json<AgendaItemSummary>, (StatusCode, Json<ApiError>)> {
    let item = server_api::create_agenda_item(&state.api, &req.title)
        .await
        .map_err(reject)?;
    // Announce the fresh (empty) list so caches learn about it right away.
    if let Ok(payload) =
        server_api::get_list_of_speakers(&state.api, item.list_of_speakers_id).await
    {
        publish_list_update(&state, payload);
    }
    Ok(Json(item))
}

async fn http_delete_agenda_item(
    State(state): State<Arc<AppState>>,
    Path(agenda_item_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let list_of_speakers_id =
        server_api::delete_agenda_item(&state.api, AgendaItemId(agenda_item_id))
            .await
            .map_err(reject)?;
    let _ = state
        .events
        .send(ServerEvent::ListOfSpeakersDeleted {
            list_of_speakers_id,
        });
    Ok(StatusCode::NO_CONTENT)
}

async fn http_get_list_of_speakers(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::get_list_of_speakers(&state.api, ListOfSpeakersId(list_id))
        .await
        .map_err(reject)?;
    Ok(Json(payload))
}

async fn http_add_speaker(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Json(req): Json<AddSpeakerRequest>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::add_speaker(&state.api, ListOfSpeakersId(list_id), UserId(req.user_id))
        .await
        .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_remove_speaker(
    State(state): State<Arc<AppState>>,
    Path((list_id, speaker_id)): Path<(i64, i64)>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::remove_speaker(
        &state.api,
        ListOfSpeakersId(list_id),
        SpeakerId(speaker_id),
    )
    .await
    .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_start_speech(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Json(req): Json<StartSpeechRequest>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::start_speech(
        &state.api,
        ListOfSpeakersId(list_id),
        SpeakerId(req.speaker_id),
    )
    .await
    .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_stop_speech(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::stop_current_speech(&state.api, ListOfSpeakersId(list_id))
        .await
        .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_mark_speaker(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Json(req): Json<MarkSpeakerRequest>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::mark_speaker(
        &state.api,
        ListOfSpeakersId(list_id),
        SpeakerId(req.speaker_id),
        req.marked,
    )
    .await
    .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_sort_speakers(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Json(req): Json<SortSpeakersRequest>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let ordered: Vec<SpeakerId> = req.ordered_speaker_ids.into_iter().map(SpeakerId).collect();
    let payload = server_api::sort_speakers(&state.api, ListOfSpeakersId(list_id), &ordered)
        .await
        .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_readd_last_speaker(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::readd_last_speaker(&state.api, ListOfSpeakersId(list_id))
        .await
        .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_set_closed(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Json(req): Json<SetClosedRequest>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    let payload = server_api::set_closed(&state.api, ListOfSpeakersId(list_id), req.closed)
        .await
        .map_err(reject)?;
    publish_list_update(&state, payload.clone());
    Ok(Json(payload))
}

async fn http_list_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConfigEntry>>, (StatusCode, Json<ApiError>)> {
    let entries = server_api::list_config(&state.api).await.map_err(reject)?;
    Ok(Json(entries))
}

async fn http_get_config(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ConfigEntry>, (StatusCode, Json<ApiError>)> {
    let entry = server_api::get_config(&state.api, &key)
        .await
        .map_err(reject)?;
    Ok(Json(entry))
}

async fn http_set_config(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<SetConfigBody>,
) -> Result<Json<ConfigEntry>, (StatusCode, Json<ApiError>)> {
    let entry = server_api::set_config(&state.api, &key, &req.value)
        .await
        .map_err(reject)?;
    let _ = state.events.send(ServerEvent::ConfigUpdated {
        key: entry.key.clone(),
        value: entry.value.clone(),
    });
    Ok(Json(entry))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let connection_id = Uuid::new_v4();
    info!(%connection_id, "websocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Push-only socket: drain and ignore whatever the client sends.
    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
    info!(%connection_id, "websocket client disconnected");
}
