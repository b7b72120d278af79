use super::*;

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{
        AgendaItemId, ListOfSpeakersId, SpeakerId, SpeakerState, UserId,
        GLOBAL_LIST_OF_SPEAKERS_KEY,
    },
    error::{ApiError, ErrorCode},
    protocol::{ConfigEntry, ListOfSpeakersPayload, ServerEvent, SpeakerPayload},
};
use tokio::sync::{broadcast, watch};

fn speaker(id: i64, weight: i64, state: SpeakerState) -> SpeakerPayload {
    SpeakerPayload {
        speaker_id: SpeakerId(id),
        list_of_speakers_id: ListOfSpeakersId(1),
        user_id: UserId(id),
        username: None,
        weight,
        state,
        marked: false,
        begin_time: None,
        end_time: None,
    }
}

fn list(id: i64, speakers: Vec<SpeakerPayload>) -> ListOfSpeakersPayload {
    ListOfSpeakersPayload {
        list_of_speakers_id: ListOfSpeakersId(id),
        agenda_item_id: AgendaItemId(id),
        title: format!("item {id}"),
        closed: false,
        speakers,
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<PanelState>,
    pred: impl Fn(&PanelState) -> bool,
) -> PanelState {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let state = rx.borrow().clone();
                if pred(&state) {
                    return state;
                }
            }
            rx.changed().await.expect("panel state sender alive");
        }
    })
    .await
    .expect("timed out waiting for panel state")
}

fn queue_ids(state: &PanelState) -> Vec<i64> {
    state
        .waiting_speakers
        .as_ref()
        .expect("waiting queue")
        .iter()
        .map(|s| s.speaker_id.0)
        .collect()
}

#[tokio::test]
async fn panel_projects_the_waiting_queue_in_weight_order() {
    let cache = ViewModelCache::new();
    let route = RouteParamsSource::new();
    route.navigate_to_id(1);
    let panel = SpeakersPanel::new(cache.clone(), ConfigStore::new(), route.subscribe());
    let mut rx = panel.subscribe();

    cache.insert(list(
        1,
        vec![
            speaker(1, 5, SpeakerState::Waiting),
            speaker(2, 2, SpeakerState::Current),
            speaker(3, 1, SpeakerState::Waiting),
        ],
    ));

    let state = wait_for(&mut rx, |s| !s.is_loading).await;
    assert_eq!(state.list_of_speakers_id, Some(ListOfSpeakersId(1)));
    assert_eq!(queue_ids(&state), vec![3, 1]);
    assert_eq!(
        state.list_of_speakers.expect("view").speakers.len(),
        3,
        "the full view keeps non-waiting speakers"
    );
}

#[tokio::test]
async fn null_emissions_leave_the_ready_state_untouched() {
    let cache = ViewModelCache::new();
    let route = RouteParamsSource::new();
    route.navigate_to_id(1);
    let panel = SpeakersPanel::new(cache.clone(), ConfigStore::new(), route.subscribe());
    let mut rx = panel.subscribe();

    cache.insert(list(1, vec![speaker(3, 1, SpeakerState::Waiting)]));
    wait_for(&mut rx, |s| !s.is_loading).await;

    cache.remove(ListOfSpeakersId(1));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = panel.state();
    assert!(!state.is_loading);
    assert_eq!(queue_ids(&state), vec![3]);
}

#[tokio::test]
async fn every_emission_replaces_the_queue_wholesale() {
    let cache = ViewModelCache::new();
    let route = RouteParamsSource::new();
    route.navigate_to_id(1);
    let panel = SpeakersPanel::new(cache.clone(), ConfigStore::new(), route.subscribe());
    let mut rx = panel.subscribe();

    cache.insert(list(
        1,
        vec![
            speaker(1, 1, SpeakerState::Waiting),
            speaker(2, 2, SpeakerState::Waiting),
        ],
    ));
    wait_for(&mut rx, |s| {
        s.waiting_speakers.as_ref().map(Vec::len) == Some(2)
    })
    .await;

    cache.insert(list(1, vec![speaker(9, 1, SpeakerState::Waiting)]));
    let state = wait_for(&mut rx, |s| {
        s.waiting_speakers.as_ref().map(Vec::len) == Some(1)
    })
    .await;
    assert_eq!(queue_ids(&state), vec![9]);
}

#[tokio::test]
async fn unresolved_id_keeps_the_panel_loading() {
    let cache = ViewModelCache::new();
    let config = ConfigStore::new();
    let route = RouteParamsSource::new();
    let panel = SpeakersPanel::new(cache.clone(), config.clone(), route.subscribe());
    let mut rx = panel.subscribe();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = panel.state();
    assert!(state.is_loading);
    assert!(state.list_of_speakers_id.is_none());

    // The config fallback is read again on the next navigation event.
    config.set(GLOBAL_LIST_OF_SPEAKERS_KEY, "2");
    route.navigate(RouteParams::new());
    let state = wait_for(&mut rx, |s| s.list_of_speakers_id.is_some()).await;
    assert_eq!(state.list_of_speakers_id, Some(ListOfSpeakersId(2)));
    assert!(state.is_loading, "still loading until a view model arrives");

    cache.insert(list(2, Vec::new()));
    let state = wait_for(&mut rx, |s| !s.is_loading).await;
    assert_eq!(state.waiting_speakers.map(|q| q.len()), Some(0));
}

#[tokio::test]
async fn navigation_switches_to_the_new_list() {
    let cache = ViewModelCache::new();
    cache.insert(list(1, vec![speaker(1, 1, SpeakerState::Waiting)]));
    cache.insert(list(2, vec![speaker(5, 1, SpeakerState::Waiting)]));

    let route = RouteParamsSource::new();
    route.navigate_to_id(1);
    let panel = SpeakersPanel::new(cache.clone(), ConfigStore::new(), route.subscribe());
    let mut rx = panel.subscribe();
    wait_for(&mut rx, |s| !s.is_loading).await;

    route.navigate_to_id(2);
    let state = wait_for(&mut rx, |s| {
        s.list_of_speakers_id == Some(ListOfSpeakersId(2)) && !s.is_loading
    })
    .await;
    assert_eq!(queue_ids(&state), vec![5]);
}

#[tokio::test]
async fn states_stream_starts_with_the_current_state() {
    use tokio_stream::StreamExt as _;

    let cache = ViewModelCache::new();
    let route = RouteParamsSource::new();
    route.navigate_to_id(1);
    let panel = SpeakersPanel::new(cache.clone(), ConfigStore::new(), route.subscribe());

    let mut states = panel.states();
    let first = tokio_stream::StreamExt::next(&mut states).await.expect("initial state");
    assert!(first.is_loading);

    cache.insert(list(1, vec![speaker(3, 1, SpeakerState::Waiting)]));
    let ready = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let state = tokio_stream::StreamExt::next(&mut states).await.expect("stream alive");
            if !state.is_loading {
                return state;
            }
        }
    })
    .await
    .expect("ready state");
    assert_eq!(queue_ids(&ready), vec![3]);
}

#[tokio::test]
async fn dropping_the_panel_releases_the_subscription() {
    let cache = ViewModelCache::new();
    let route = RouteParamsSource::new();
    route.navigate_to_id(1);
    let panel = SpeakersPanel::new(cache.clone(), ConfigStore::new(), route.subscribe());
    let mut rx = panel.subscribe();

    drop(panel);

    tokio::time::timeout(Duration::from_secs(2), async move {
        loop {
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("panel task should end after drop");
}

#[derive(Clone)]
struct StubState {
    events: broadcast::Sender<ServerEvent>,
}

async fn spawn_stub() -> (SocketAddr, broadcast::Sender<ServerEvent>) {
    let (events, _) = broadcast::channel(16);
    let state = StubState {
        events: events.clone(),
    };

    let app = Router::new()
        .route("/login", post(stub_login))
        .route("/config", get(stub_config))
        .route("/lists_of_speakers/:id", get(stub_list))
        .route("/lists_of_speakers/:id/speakers", post(stub_reject_speaker))
        .route("/ws", get(stub_ws))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, events)
}

async fn stub_login() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "user_id": 1 }))
}

async fn stub_config() -> Json<Vec<ConfigEntry>> {
    Json(vec![ConfigEntry {
        key: GLOBAL_LIST_OF_SPEAKERS_KEY.into(),
        value: "1".into(),
    }])
}

async fn stub_list(
    Path(id): Path<i64>,
) -> Result<Json<ListOfSpeakersPayload>, (StatusCode, Json<ApiError>)> {
    if id == 1 {
        Ok(Json(list(1, vec![speaker(1, 1, SpeakerState::Waiting)])))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NotFound, "list of speakers not found")),
        ))
    }
}

async fn stub_reject_speaker() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError::new(ErrorCode::Validation, "list of speakers is closed")),
    )
}

async fn stub_ws(ws: WebSocketUpgrade, State(state): State<StubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        use axum::extract::ws::Message;

        let mut events_rx = state.events.subscribe();
        let (mut sender, _receiver) = socket.split();
        while let Ok(event) = events_rx.recv().await {
            let text = serde_json::to_string(&event).expect("encode event");
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    })
}

#[tokio::test]
async fn client_feeds_cache_and_config_from_rest_and_socket() {
    let (addr, events) = spawn_stub().await;
    let client = AssemblyClient::new(&format!("http://{addr}")).expect("client");

    let user = client.login("alice").await.expect("login");
    assert_eq!(user, UserId(1));
    assert_eq!(client.current_user(), Some(UserId(1)));

    client.refresh_config().await.expect("config");
    assert_eq!(
        client.config().instant(GLOBAL_LIST_OF_SPEAKERS_KEY).as_deref(),
        Some("1")
    );

    let primed = client.prime_list(ListOfSpeakersId(1)).await.expect("prime");
    assert_eq!(primed.map(|p| p.speakers.len()), Some(1));
    assert!(client
        .prime_list(ListOfSpeakersId(99))
        .await
        .expect("prime missing")
        .is_none());

    let err = client
        .add_speaker(ListOfSpeakersId(1), UserId(1))
        .await
        .expect_err("server rejects");
    assert!(matches!(err, ClientError::Api(api) if api.code == ErrorCode::Validation));

    client.connect_events().await.expect("socket");
    let mut rx = client.cache().observe(ListOfSpeakersId(1));

    tokio::time::timeout(Duration::from_secs(2), async {
        while events.receiver_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket subscriber");

    events
        .send(ServerEvent::ListOfSpeakersUpdated {
            list_of_speakers: list(
                1,
                vec![
                    speaker(1, 1, SpeakerState::Waiting),
                    speaker(2, 2, SpeakerState::Waiting),
                ],
            ),
        })
        .expect("send event");

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if rx.borrow().as_ref().map(|p| p.speakers.len()) == Some(2) {
                return;
            }
            rx.changed().await.expect("cache slot alive");
        }
    })
    .await
    .expect("socket update reached the cache");

    client.disconnect_events();
}
