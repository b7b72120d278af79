use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AgendaItemId, ListOfSpeakersId, SpeakerId, SpeakerState, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItemSummary {
    pub agenda_item_id: AgendaItemId,
    pub title: String,
    pub list_of_speakers_id: ListOfSpeakersId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerPayload {
    pub speaker_id: SpeakerId,
    pub list_of_speakers_id: ListOfSpeakersId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub weight: i64,
    pub state: SpeakerState,
    pub marked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Full view model of one list of speakers. Always shipped wholesale; the
/// `speakers` collection carries no ordering guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOfSpeakersPayload {
    pub list_of_speakers_id: ListOfSpeakersId,
    pub agenda_item_id: AgendaItemId,
    pub title: String,
    pub closed: bool,
    pub speakers: Vec<SpeakerPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSpeakerRequest {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSpeechRequest {
    pub speaker_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkSpeakerRequest {
    pub speaker_id: i64,
    pub marked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpeakersRequest {
    pub ordered_speaker_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetClosedRequest {
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ListOfSpeakersUpdated {
        list_of_speakers: ListOfSpeakersPayload,
    },
    ListOfSpeakersDeleted {
        list_of_speakers_id: ListOfSpeakersId,
    },
    ConfigUpdated {
        key: String,
        value: String,
    },
    Error(ApiError),
}
