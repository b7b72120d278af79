use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use shared::{
    domain::ListOfSpeakersId,
    protocol::{ListOfSpeakersPayload, ServerEvent},
};
use tokio::sync::watch;

/// Reactive cache of list-of-speakers view models, keyed by id.
///
/// `observe` hands out a receiver that carries the current cached value
/// immediately and every later update. All observers of one id share a single
/// slot; ids nobody has primed yet observe `None`.
#[derive(Clone, Default)]
pub struct ViewModelCache {
    slots: Arc<Mutex<HashMap<ListOfSpeakersId, watch::Sender<Option<ListOfSpeakersPayload>>>>>,
}

impl ViewModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> watch::Receiver<Option<ListOfSpeakersPayload>> {
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        slots
            .entry(list_of_speakers_id)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Current cached value without subscribing.
    pub fn get(&self, list_of_speakers_id: ListOfSpeakersId) -> Option<ListOfSpeakersPayload> {
        let slots = self.slots.lock().expect("cache mutex poisoned");
        slots
            .get(&list_of_speakers_id)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Replaces the cached view model wholesale and wakes every observer.
    pub fn insert(&self, payload: ListOfSpeakersPayload) {
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        let slot = slots
            .entry(payload.list_of_speakers_id)
            .or_insert_with(|| watch::channel(None).0);
        slot.send_replace(Some(payload));
    }

    pub fn remove(&self, list_of_speakers_id: ListOfSpeakersId) {
        let slots = self.slots.lock().expect("cache mutex poisoned");
        if let Some(slot) = slots.get(&list_of_speakers_id) {
            slot.send_replace(None);
        }
    }

    /// Routes one server event into the cache. Events that do not concern
    /// list view models are ignored.
    pub fn apply(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ListOfSpeakersUpdated { list_of_speakers } => {
                self.insert(list_of_speakers.clone());
            }
            ServerEvent::ListOfSpeakersDeleted {
                list_of_speakers_id,
            } => {
                self.remove(*list_of_speakers_id);
            }
            _ => {}
        }
    }
}
