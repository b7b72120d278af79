use shared::{
    domain::{ListOfSpeakersId, SpeakerState, GLOBAL_LIST_OF_SPEAKERS_KEY},
    protocol::{ListOfSpeakersPayload, SpeakerPayload},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::{cache::ViewModelCache, config::ConfigStore, route::RouteParams};

/// Resolves which list of speakers to display: the route's `id` parameter if
/// it parses as an integer, otherwise the assembly-wide config value. When
/// neither parses there is nothing to observe.
pub fn resolve_list_of_speakers_id(
    params: &RouteParams,
    config: &ConfigStore,
) -> Option<ListOfSpeakersId> {
    let from_route = params.get("id").and_then(|raw| raw.parse::<i64>().ok());
    let from_config = || {
        config
            .instant(GLOBAL_LIST_OF_SPEAKERS_KEY)
            .and_then(|raw| raw.parse::<i64>().ok())
    };
    from_route.or_else(from_config).map(ListOfSpeakersId)
}

/// Derives the ordered waiting queue from one view-model emission: sort the
/// full set by weight, keep the waiting speakers, sort the subset by weight
/// again. The second sort is redundant while the filter preserves order, but
/// it stays as an explicit idempotent step so the subset remains ordered even
/// if the first sort ever goes away.
pub fn waiting_queue(list_of_speakers: &ListOfSpeakersPayload) -> Vec<SpeakerPayload> {
    let mut speakers = list_of_speakers.speakers.clone();
    speakers.sort_by_key(|speaker| speaker.weight);
    let mut waiting: Vec<SpeakerPayload> = speakers
        .into_iter()
        .filter(|speaker| speaker.state == SpeakerState::Waiting)
        .collect();
    waiting.sort_by_key(|speaker| speaker.weight);
    waiting
}

/// What the renderer reads. `is_loading` stays `true` until the first
/// non-null emission for the resolved id arrives; an id that never resolves
/// to a known list keeps the panel loading indefinitely.
#[derive(Debug, Clone)]
pub struct PanelState {
    pub is_loading: bool,
    pub list_of_speakers_id: Option<ListOfSpeakersId>,
    pub list_of_speakers: Option<ListOfSpeakersPayload>,
    pub waiting_speakers: Option<Vec<SpeakerPayload>>,
}

impl PanelState {
    fn initial() -> Self {
        Self {
            is_loading: true,
            list_of_speakers_id: None,
            list_of_speakers: None,
            waiting_speakers: None,
        }
    }
}

/// Holds the panel's background subscription and releases it on drop.
struct SubscriptionGuard {
    handle: JoinHandle<()>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The live speakers panel: re-resolves the id on every navigation, observes
/// the view model for that id, and replaces the published state wholesale on
/// every non-null emission.
pub struct SpeakersPanel {
    state_rx: watch::Receiver<PanelState>,
    _subscription: SubscriptionGuard,
}

impl SpeakersPanel {
    pub fn new(
        cache: ViewModelCache,
        config: ConfigStore,
        params_rx: watch::Receiver<RouteParams>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PanelState::initial());
        let handle = tokio::spawn(run(cache, config, params_rx, state_tx));
        Self {
            state_rx,
            _subscription: SubscriptionGuard { handle },
        }
    }

    pub fn state(&self) -> PanelState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelState> {
        self.state_rx.clone()
    }

    /// Panel states as a stream, starting with the current one.
    pub fn states(&self) -> WatchStream<PanelState> {
        WatchStream::new(self.subscribe())
    }
}

async fn run(
    cache: ViewModelCache,
    config: ConfigStore,
    mut params_rx: watch::Receiver<RouteParams>,
    state_tx: watch::Sender<PanelState>,
) {
    loop {
        let params = params_rx.borrow_and_update().clone();
        let resolved = resolve_list_of_speakers_id(&params, &config);
        state_tx.send_modify(|state| {
            if state.list_of_speakers_id != resolved {
                state.list_of_speakers_id = resolved;
                state.is_loading = true;
                state.list_of_speakers = None;
                state.waiting_speakers = None;
            }
        });

        let Some(id) = resolved else {
            debug!("no list of speakers id resolved, waiting for navigation");
            if params_rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut view_rx = cache.observe(id);
        loop {
            // Null emissions leave the published state untouched.
            if let Some(view) = view_rx.borrow_and_update().clone() {
                let queue = waiting_queue(&view);
                state_tx.send_modify(|state| {
                    state.is_loading = false;
                    state.list_of_speakers = Some(view);
                    state.waiting_speakers = Some(queue);
                });
            }

            tokio::select! {
                changed = view_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = params_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    // Navigation: drop this observation and re-resolve.
                    break;
                }
            }
        }
    }
}
