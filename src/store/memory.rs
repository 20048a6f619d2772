use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, instrument};

use super::{publish, sort_newest_first, ChangeEvent, ChangeStream, EventStore, StoreError};
use super::CHANGE_CHANNEL_CAPACITY;
use crate::catalog::{self, EventTypeRecord};
use crate::model::{Incident, IncidentId, IncidentPatch, IncidentQuery};

/// Process-local store. Serves tests, demos and single-device hosts; every
/// handle shares one change channel, so it also models several clients
/// talking to the same backend.
pub struct InMemoryEventStore {
    incidents: RwLock<HashMap<IncidentId, Incident>>,
    changes: broadcast::Sender<ChangeEvent>,
    event_types: Vec<EventTypeRecord>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            incidents: RwLock::new(HashMap::new()),
            changes,
            event_types: catalog::built_in_records(),
        }
    }

    /// Store preloaded with `incidents`, without emitting changes.
    #[must_use]
    pub fn seeded(incidents: impl IntoIterator<Item = Incident>) -> Self {
        let store = Self::new();
        let map = incidents.into_iter().map(|i| (i.id.clone(), i)).collect();
        Self {
            incidents: RwLock::new(map),
            ..store
        }
    }

    #[must_use]
    pub fn with_event_types(mut self, records: Vec<EventTypeRecord>) -> Self {
        self.event_types = records;
        self
    }

    pub async fn len(&self) -> usize {
        self.incidents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.incidents.read().await.is_empty()
    }

    pub async fn get(&self, id: &IncidentId) -> Option<Incident> {
        self.incidents.read().await.get(id).cloned()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip_all, fields(incident_id = %incident.id))]
    async fn insert(&self, incident: Incident) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.write().await;
        if incidents.contains_key(&incident.id) {
            return Err(StoreError::Duplicate(incident.id));
        }
        incidents.insert(incident.id.clone(), incident.clone());
        drop(incidents);

        info!("incident inserted");
        publish(&self.changes, ChangeEvent::Inserted(incident.clone()));
        Ok(incident)
    }

    #[instrument(skip(self, patch), fields(incident_id = %id))]
    async fn update(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let changed = incident.apply_patch(patch);
        let updated = incident.clone();
        drop(incidents);

        if changed {
            info!("incident updated");
            publish(&self.changes, ChangeEvent::Updated(updated.clone()));
        }
        Ok(updated)
    }

    async fn query(&self, query: &IncidentQuery) -> Result<Vec<Incident>, StoreError> {
        let mut matched: Vec<Incident> = self
            .incidents
            .read()
            .await
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        sort_newest_first(&mut matched);
        Ok(matched)
    }

    fn subscribe(&self) -> ChangeStream {
        ChangeStream::new(self.changes.subscribe())
    }

    async fn event_types(&self) -> Result<Vec<EventTypeRecord>, StoreError> {
        Ok(self.event_types.clone())
    }
}
