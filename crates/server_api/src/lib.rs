use chrono::Utc;
use shared::{
    domain::{AgendaItemId, ListOfSpeakersId, SpeakerId, SpeakerState, UserId},
    error::{ApiError, ErrorCode},
    protocol::{AgendaItemSummary, ConfigEntry, ListOfSpeakersPayload, SpeakerPayload},
};
use storage::{Storage, StoredListOfSpeakers, StoredSpeaker};
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<UserId, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "username cannot be empty",
        ));
    }
    ctx.storage.create_user(username).await.map_err(internal)
}

pub async fn list_agenda(ctx: &ApiContext) -> Result<Vec<AgendaItemSummary>, ApiError> {
    let items = ctx.storage.list_agenda_items().await.map_err(internal)?;
    Ok(items
        .into_iter()
        .map(|item| AgendaItemSummary {
            agenda_item_id: item.agenda_item_id,
            title: item.title,
            list_of_speakers_id: item.list_of_speakers_id,
        })
        .collect())
}

pub async fn create_agenda_item(
    ctx: &ApiContext,
    title: &str,
) -> Result<AgendaItemSummary, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title cannot be empty"));
    }
    let (agenda_item_id, list_of_speakers_id) = ctx
        .storage
        .create_agenda_item(title)
        .await
        .map_err(internal)?;
    info!(
        agenda_item_id = agenda_item_id.0,
        list_of_speakers_id = list_of_speakers_id.0,
        "created agenda item"
    );
    Ok(AgendaItemSummary {
        agenda_item_id,
        title: title.to_string(),
        list_of_speakers_id,
    })
}

pub async fn delete_agenda_item(
    ctx: &ApiContext,
    agenda_item_id: AgendaItemId,
) -> Result<ListOfSpeakersId, ApiError> {
    ctx.storage
        .delete_agenda_item(agenda_item_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "agenda item not found"))
}

pub async fn get_list_of_speakers(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    load_payload(ctx, list_of_speakers_id).await
}

pub async fn add_speaker(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    user_id: UserId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    let list = ensure_list(ctx, list_of_speakers_id).await?;
    if list.closed {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "list of speakers is closed",
        ));
    }
    ctx.storage
        .username_for_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "user not found"))?;
    if ctx
        .storage
        .find_waiting_speaker(list_of_speakers_id, user_id)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "user is already on the list of speakers",
        ));
    }

    let speaker_id = ctx
        .storage
        .add_speaker(list_of_speakers_id, user_id)
        .await
        .map_err(internal)?;
    info!(
        list_of_speakers_id = list_of_speakers_id.0,
        speaker_id = speaker_id.0,
        user_id = user_id.0,
        "speaker added"
    );
    load_payload(ctx, list_of_speakers_id).await
}

pub async fn remove_speaker(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    speaker_id: SpeakerId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    ensure_speaker_in_list(ctx, list_of_speakers_id, speaker_id).await?;
    ctx.storage
        .remove_speaker(speaker_id)
        .await
        .map_err(internal)?;
    load_payload(ctx, list_of_speakers_id).await
}

/// Gives the floor to a waiting speaker. Whoever currently has the floor is
/// finished first, so at most one speaker is ever current.
pub async fn start_speech(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    speaker_id: SpeakerId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    let speaker = ensure_speaker_in_list(ctx, list_of_speakers_id, speaker_id).await?;
    if speaker.begin_time.is_some() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "speaker already had the floor",
        ));
    }

    let now = Utc::now();
    if let Some(current) = ctx
        .storage
        .current_speaker(list_of_speakers_id)
        .await
        .map_err(internal)?
    {
        ctx.storage
            .end_speech(current, now)
            .await
            .map_err(internal)?;
    }
    ctx.storage
        .begin_speech(speaker_id, now)
        .await
        .map_err(internal)?;
    info!(
        list_of_speakers_id = list_of_speakers_id.0,
        speaker_id = speaker_id.0,
        "speech started"
    );
    load_payload(ctx, list_of_speakers_id).await
}

pub async fn stop_current_speech(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    ensure_list(ctx, list_of_speakers_id).await?;
    let current = ctx
        .storage
        .current_speaker(list_of_speakers_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "nobody has the floor"))?;
    ctx.storage
        .end_speech(current, Utc::now())
        .await
        .map_err(internal)?;
    info!(
        list_of_speakers_id = list_of_speakers_id.0,
        speaker_id = current.0,
        "speech stopped"
    );
    load_payload(ctx, list_of_speakers_id).await
}

pub async fn mark_speaker(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    speaker_id: SpeakerId,
    marked: bool,
) -> Result<ListOfSpeakersPayload, ApiError> {
    ensure_speaker_in_list(ctx, list_of_speakers_id, speaker_id).await?;
    ctx.storage
        .set_marked(speaker_id, marked)
        .await
        .map_err(internal)?;
    load_payload(ctx, list_of_speakers_id).await
}

/// Manual reorder of the waiting queue. The given ids must be exactly the
/// waiting speakers of the list; their positions become the new weights.
pub async fn sort_speakers(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    ordered_speaker_ids: &[SpeakerId],
) -> Result<ListOfSpeakersPayload, ApiError> {
    ensure_list(ctx, list_of_speakers_id).await?;
    let waiting = ctx
        .storage
        .waiting_speaker_ids(list_of_speakers_id)
        .await
        .map_err(internal)?;

    let mut expected: Vec<SpeakerId> = waiting.clone();
    expected.sort_by_key(|id| id.0);
    let mut given: Vec<SpeakerId> = ordered_speaker_ids.to_vec();
    given.sort_by_key(|id| id.0);
    given.dedup();
    if expected != given {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "sort order must contain every waiting speaker exactly once",
        ));
    }

    ctx.storage
        .set_speaker_weights(list_of_speakers_id, ordered_speaker_ids)
        .await
        .map_err(internal)?;
    load_payload(ctx, list_of_speakers_id).await
}

/// Puts the most recently finished speaker back at the front of the queue,
/// with its timestamps cleared.
pub async fn readd_last_speaker(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    ensure_list(ctx, list_of_speakers_id).await?;
    let last = ctx
        .storage
        .last_finished_speaker(list_of_speakers_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "no speaker has finished yet"))?;
    let speaker = ctx
        .storage
        .load_speaker(last)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "speaker not found"))?;
    if ctx
        .storage
        .find_waiting_speaker(list_of_speakers_id, speaker.user_id)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "user is already on the list of speakers",
        ));
    }

    let front = ctx
        .storage
        .min_weight(list_of_speakers_id)
        .await
        .map_err(internal)?
        .unwrap_or(1)
        - 1;
    ctx.storage
        .requeue_speaker(last, front)
        .await
        .map_err(internal)?;
    load_payload(ctx, list_of_speakers_id).await
}

pub async fn set_closed(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    closed: bool,
) -> Result<ListOfSpeakersPayload, ApiError> {
    ensure_list(ctx, list_of_speakers_id).await?;
    ctx.storage
        .set_closed(list_of_speakers_id, closed)
        .await
        .map_err(internal)?;
    load_payload(ctx, list_of_speakers_id).await
}

pub async fn list_config(ctx: &ApiContext) -> Result<Vec<ConfigEntry>, ApiError> {
    let entries = ctx.storage.config_all().await.map_err(internal)?;
    Ok(entries
        .into_iter()
        .map(|(key, value)| ConfigEntry { key, value })
        .collect())
}

pub async fn get_config(ctx: &ApiContext, key: &str) -> Result<ConfigEntry, ApiError> {
    let value = ctx
        .storage
        .config_get(key)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "config key not found"))?;
    Ok(ConfigEntry {
        key: key.to_string(),
        value,
    })
}

pub async fn set_config(ctx: &ApiContext, key: &str, value: &str) -> Result<ConfigEntry, ApiError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "config key cannot be empty",
        ));
    }
    ctx.storage
        .config_set(key, value)
        .await
        .map_err(internal)?;
    Ok(ConfigEntry {
        key: key.to_string(),
        value: value.to_string(),
    })
}

async fn ensure_list(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
) -> Result<StoredListOfSpeakers, ApiError> {
    ctx.storage
        .load_list_of_speakers(list_of_speakers_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "list of speakers not found"))
}

async fn ensure_speaker_in_list(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
    speaker_id: SpeakerId,
) -> Result<StoredSpeaker, ApiError> {
    ensure_list(ctx, list_of_speakers_id).await?;
    let speaker = ctx
        .storage
        .load_speaker(speaker_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "speaker not found"))?;
    if speaker.list_of_speakers_id != list_of_speakers_id {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "speaker does not belong to this list",
        ));
    }
    Ok(speaker)
}

async fn load_payload(
    ctx: &ApiContext,
    list_of_speakers_id: ListOfSpeakersId,
) -> Result<ListOfSpeakersPayload, ApiError> {
    let list = ensure_list(ctx, list_of_speakers_id).await?;
    let speakers = ctx
        .storage
        .list_speakers(list_of_speakers_id)
        .await
        .map_err(internal)?;
    Ok(ListOfSpeakersPayload {
        list_of_speakers_id: list.list_of_speakers_id,
        agenda_item_id: list.agenda_item_id,
        title: list.title,
        closed: list.closed,
        speakers: speakers.into_iter().map(speaker_payload).collect(),
    })
}

fn speaker_payload(speaker: StoredSpeaker) -> SpeakerPayload {
    SpeakerPayload {
        speaker_id: speaker.speaker_id,
        list_of_speakers_id: speaker.list_of_speakers_id,
        user_id: speaker.user_id,
        username: Some(speaker.username),
        weight: speaker.weight,
        state: SpeakerState::from_times(speaker.begin_time, speaker.end_time),
        marked: speaker.marked,
        begin_time: speaker.begin_time,
        end_time: speaker.end_time,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
