use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(AgendaItemId);
id_newtype!(ListOfSpeakersId);
id_newtype!(SpeakerId);

/// Config key holding the id of the assembly-wide list of speakers.
pub const GLOBAL_LIST_OF_SPEAKERS_KEY: &str = "agenda_global_list_of_speakers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerState {
    Waiting,
    Current,
    Finished,
}

impl SpeakerState {
    /// A speaker's lifecycle is carried by its timestamps: not yet called up,
    /// called up, or done. `end_time` without `begin_time` cannot be produced
    /// by any operation and is treated as finished.
    pub fn from_times(begin_time: Option<DateTime<Utc>>, end_time: Option<DateTime<Utc>>) -> Self {
        match (begin_time, end_time) {
            (None, None) => SpeakerState::Waiting,
            (Some(_), None) => SpeakerState::Current,
            _ => SpeakerState::Finished,
        }
    }
}
