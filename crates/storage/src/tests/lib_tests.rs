use super::*;
use shared::domain::GLOBAL_LIST_OF_SPEAKERS_KEY;

async fn seeded_list(storage: &Storage) -> (ListOfSpeakersId, UserId, UserId) {
    let (_, list_id) = storage
        .create_agenda_item("General debate")
        .await
        .expect("agenda item");
    let alice = storage.create_user("alice").await.expect("alice");
    let bob = storage.create_user("bob").await.expect("bob");
    (list_id, alice, bob)
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("assembly.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn agenda_item_owns_a_list_of_speakers() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (item_id, list_id) = storage
        .create_agenda_item("Budget 2026")
        .await
        .expect("agenda item");

    let list = storage
        .load_list_of_speakers(list_id)
        .await
        .expect("load")
        .expect("list exists");
    assert_eq!(list.agenda_item_id, item_id);
    assert_eq!(list.title, "Budget 2026");
    assert!(!list.closed);

    let items = storage.list_agenda_items().await.expect("agenda");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].list_of_speakers_id, list_id);
}

#[tokio::test]
async fn unknown_list_loads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let list = storage
        .load_list_of_speakers(ListOfSpeakersId(4711))
        .await
        .expect("load");
    assert!(list.is_none());
}

#[tokio::test]
async fn add_speaker_appends_with_increasing_weight() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (list_id, alice, bob) = seeded_list(&storage).await;

    storage.add_speaker(list_id, alice).await.expect("alice");
    storage.add_speaker(list_id, bob).await.expect("bob");

    let speakers = storage.list_speakers(list_id).await.expect("speakers");
    assert_eq!(speakers.len(), 2);
    assert_eq!(speakers[0].weight, 1);
    assert_eq!(speakers[1].weight, 2);
    assert!(speakers.iter().all(|s| s.begin_time.is_none()));
}

#[tokio::test]
async fn speech_lifecycle_is_carried_by_timestamps() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (list_id, alice, _) = seeded_list(&storage).await;
    let speaker = storage.add_speaker(list_id, alice).await.expect("speaker");

    let begin = Utc::now();
    assert!(storage.begin_speech(speaker, begin).await.expect("begin"));
    assert_eq!(
        storage.current_speaker(list_id).await.expect("current"),
        Some(speaker)
    );

    // A second begin on the same speaker is a no-op.
    assert!(!storage.begin_speech(speaker, Utc::now()).await.expect("rebegin"));

    assert!(storage.end_speech(speaker, Utc::now()).await.expect("end"));
    assert_eq!(storage.current_speaker(list_id).await.expect("current"), None);

    let stored = storage
        .load_speaker(speaker)
        .await
        .expect("load")
        .expect("exists");
    assert!(stored.begin_time.is_some());
    assert!(stored.end_time.is_some());
}

#[tokio::test]
async fn set_speaker_weights_rewrites_manual_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (list_id, alice, bob) = seeded_list(&storage).await;
    let first = storage.add_speaker(list_id, alice).await.expect("first");
    let second = storage.add_speaker(list_id, bob).await.expect("second");

    storage
        .set_speaker_weights(list_id, &[second, first])
        .await
        .expect("sort");

    let ordered = storage.waiting_speaker_ids(list_id).await.expect("waiting");
    assert_eq!(ordered, vec![second, first]);
}

#[tokio::test]
async fn requeue_puts_finished_speaker_back_in_front() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (list_id, alice, bob) = seeded_list(&storage).await;
    let done = storage.add_speaker(list_id, alice).await.expect("done");
    let waiting = storage.add_speaker(list_id, bob).await.expect("waiting");

    storage.begin_speech(done, Utc::now()).await.expect("begin");
    storage.end_speech(done, Utc::now()).await.expect("end");
    assert_eq!(
        storage.last_finished_speaker(list_id).await.expect("last"),
        Some(done)
    );

    let front = storage.min_weight(list_id).await.expect("min").expect("some") - 1;
    storage.requeue_speaker(done, front).await.expect("requeue");

    let ordered = storage.waiting_speaker_ids(list_id).await.expect("waiting");
    assert_eq!(ordered, vec![done, waiting]);
    let stored = storage.load_speaker(done).await.expect("load").expect("exists");
    assert!(stored.begin_time.is_none() && stored.end_time.is_none());
}

#[tokio::test]
async fn removes_speakers_and_reports_missing_ones() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (list_id, alice, _) = seeded_list(&storage).await;
    let speaker = storage.add_speaker(list_id, alice).await.expect("speaker");

    assert!(storage.remove_speaker(speaker).await.expect("remove"));
    assert!(!storage.remove_speaker(speaker).await.expect("remove again"));
    assert!(storage.list_speakers(list_id).await.expect("speakers").is_empty());
}

#[tokio::test]
async fn closing_a_list_is_persisted() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (list_id, _, _) = seeded_list(&storage).await;

    assert!(storage.set_closed(list_id, true).await.expect("close"));
    let list = storage
        .load_list_of_speakers(list_id)
        .await
        .expect("load")
        .expect("exists");
    assert!(list.closed);

    assert!(!storage
        .set_closed(ListOfSpeakersId(999), true)
        .await
        .expect("close missing"));
}

#[tokio::test]
async fn deleting_an_agenda_item_removes_list_and_speakers() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (item_id, list_id) = storage
        .create_agenda_item("Elections")
        .await
        .expect("agenda item");
    let alice = storage.create_user("alice").await.expect("alice");
    storage.add_speaker(list_id, alice).await.expect("speaker");

    let deleted = storage
        .delete_agenda_item(item_id)
        .await
        .expect("delete");
    assert_eq!(deleted, Some(list_id));
    assert!(storage
        .load_list_of_speakers(list_id)
        .await
        .expect("load")
        .is_none());
    assert!(storage
        .delete_agenda_item(item_id)
        .await
        .expect("delete again")
        .is_none());
}

#[tokio::test]
async fn config_round_trips_and_defaults_to_missing() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage
        .config_get(GLOBAL_LIST_OF_SPEAKERS_KEY)
        .await
        .expect("get")
        .is_none());

    storage
        .config_set(GLOBAL_LIST_OF_SPEAKERS_KEY, "3")
        .await
        .expect("set");
    storage
        .config_set(GLOBAL_LIST_OF_SPEAKERS_KEY, "7")
        .await
        .expect("overwrite");

    assert_eq!(
        storage
            .config_get(GLOBAL_LIST_OF_SPEAKERS_KEY)
            .await
            .expect("get"),
        Some("7".to_string())
    );
    let all = storage.config_all().await.expect("all");
    assert_eq!(all, vec![(GLOBAL_LIST_OF_SPEAKERS_KEY.to_string(), "7".to_string())]);
}
