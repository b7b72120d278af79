use std::sync::Mutex;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{
    domain::{ListOfSpeakersId, SpeakerId, UserId},
    error::ApiError,
    protocol::{
        AddSpeakerRequest, AgendaItemSummary, ConfigEntry, ListOfSpeakersPayload,
        MarkSpeakerRequest, ServerEvent, SetClosedRequest, SortSpeakersRequest, StartSpeechRequest,
    },
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;

use crate::{cache::ViewModelCache, config::ConfigStore};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Api(ApiError),
    #[error("event socket failed: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("cannot derive a websocket url from {0}")]
    WebsocketUrl(Url),
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct SetConfigBody {
    value: String,
}

#[derive(Debug, Serialize)]
struct CreateAgendaItemRequest {
    title: String,
}

/// Gateway to the assembly server: REST for operations, one push socket for
/// the event feed. Every list payload that passes through here also primes
/// the view-model cache, so panels see data without waiting for the feed.
pub struct AssemblyClient {
    http: Client,
    base_url: Url,
    cache: ViewModelCache,
    config: ConfigStore,
    user_id: Mutex<Option<UserId>>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl AssemblyClient {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(server_url)?;
        Ok(Self {
            http: Client::new(),
            base_url,
            cache: ViewModelCache::new(),
            config: ConfigStore::new(),
            user_id: Mutex::new(None),
            feed: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &ViewModelCache {
        &self.cache
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn current_user(&self) -> Option<UserId> {
        *self.user_id.lock().expect("user mutex poisoned")
    }

    pub async fn login(&self, username: &str) -> Result<UserId, ClientError> {
        let response: LoginResponse = self
            .post_json(
                "/login",
                &LoginRequest {
                    username: username.to_string(),
                },
            )
            .await?;
        let user_id = UserId(response.user_id);
        *self.user_id.lock().expect("user mutex poisoned") = Some(user_id);
        Ok(user_id)
    }

    pub async fn fetch_agenda(&self) -> Result<Vec<AgendaItemSummary>, ClientError> {
        self.get_json("/agenda").await
    }

    pub async fn create_agenda_item(&self, title: &str) -> Result<AgendaItemSummary, ClientError> {
        self.post_json(
            "/agenda",
            &CreateAgendaItemRequest {
                title: title.to_string(),
            },
        )
        .await
    }

    /// Fetches one list into the cache. An unknown id is not an error; it
    /// just leaves the cache slot empty.
    pub async fn prime_list(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<Option<ListOfSpeakersPayload>, ClientError> {
        let url = self.endpoint(&format!("/lists_of_speakers/{}", list_of_speakers_id.0))?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let payload: ListOfSpeakersPayload = Self::decode(response).await?;
        self.cache.insert(payload.clone());
        Ok(Some(payload))
    }

    /// Takes the config snapshot the panels read synchronously.
    pub async fn refresh_config(&self) -> Result<(), ClientError> {
        let entries: Vec<ConfigEntry> = self.get_json("/config").await?;
        self.config.replace(entries);
        Ok(())
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<ConfigEntry, ClientError> {
        let url = self.endpoint(&format!("/config/{key}"))?;
        let response = self
            .http
            .put(url)
            .json(&SetConfigBody {
                value: value.to_string(),
            })
            .send()
            .await?;
        let entry: ConfigEntry = Self::decode(response).await?;
        self.config.set(entry.key.clone(), entry.value.clone());
        Ok(entry)
    }

    pub async fn add_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        user_id: UserId,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/speakers", list_of_speakers_id.0),
            &AddSpeakerRequest { user_id: user_id.0 },
        )
        .await
    }

    pub async fn remove_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        speaker_id: SpeakerId,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        let url = self.endpoint(&format!(
            "/lists_of_speakers/{}/speakers/{}",
            list_of_speakers_id.0, speaker_id.0
        ))?;
        let response = self.http.delete(url).send().await?;
        let payload: ListOfSpeakersPayload = Self::decode(response).await?;
        self.cache.insert(payload.clone());
        Ok(payload)
    }

    pub async fn start_speech(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        speaker_id: SpeakerId,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/start", list_of_speakers_id.0),
            &StartSpeechRequest {
                speaker_id: speaker_id.0,
            },
        )
        .await
    }

    pub async fn stop_current_speech(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/stop", list_of_speakers_id.0),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn mark_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        speaker_id: SpeakerId,
        marked: bool,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/mark", list_of_speakers_id.0),
            &MarkSpeakerRequest {
                speaker_id: speaker_id.0,
                marked,
            },
        )
        .await
    }

    pub async fn sort_speakers(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        ordered_speaker_ids: &[SpeakerId],
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/sort", list_of_speakers_id.0),
            &SortSpeakersRequest {
                ordered_speaker_ids: ordered_speaker_ids.iter().map(|id| id.0).collect(),
            },
        )
        .await
    }

    pub async fn readd_last_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/readd_last", list_of_speakers_id.0),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn set_closed(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        closed: bool,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        self.mutate_list(
            &format!("/lists_of_speakers/{}/close", list_of_speakers_id.0),
            &SetClosedRequest { closed },
        )
        .await
    }

    /// Opens the push socket and feeds every event into the cache and the
    /// config snapshot. A previous feed, if any, is released first.
    pub async fn connect_events(&self) -> Result<(), ClientError> {
        let mut ws_url = self.base_url.join("/ws")?;
        let scheme = if ws_url.scheme() == "https" { "wss" } else { "ws" };
        if ws_url.set_scheme(scheme).is_err() {
            return Err(ClientError::WebsocketUrl(ws_url));
        }

        let (stream, _) = connect_async(ws_url.as_str()).await?;
        let (_write, mut read) = stream.split();

        let cache = self.cache.clone();
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(error) => {
                        warn!(%error, "event socket failed");
                        break;
                    }
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        config.apply(&event);
                        cache.apply(&event);
                    }
                    Err(error) => warn!(%error, "dropping undecodable event"),
                }
            }
            info!("event socket closed");
        });

        let mut feed = self.feed.lock().expect("feed mutex poisoned");
        if let Some(previous) = feed.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    pub fn disconnect_events(&self) {
        let mut feed = self.feed.lock().expect("feed mutex poisoned");
        if let Some(handle) = feed.take() {
            handle.abort();
        }
    }

    async fn mutate_list<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ListOfSpeakersPayload, ClientError> {
        let payload: ListOfSpeakersPayload = self.post_json(path, body).await?;
        self.cache.insert(payload.clone());
        Ok(payload)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.http.get(self.endpoint(path)?).send().await?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.http.post(self.endpoint(path)?).json(body).send().await?;
        Self::decode(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let err = response.json::<ApiError>().await?;
            Err(ClientError::Api(err))
        }
    }
}

impl Drop for AssemblyClient {
    fn drop(&mut self) {
        self.disconnect_events();
    }
}
