//! Boundary to the authoritative incident store and its live-change channel.

mod memory;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite;

pub use self::memory::InMemoryEventStore;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::sqlite::{SqliteEventStore, IN_MEMORY_PATH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::catalog::{self, EventTypeRecord};
use crate::model::{Incident, IncidentId, IncidentPatch, IncidentQuery};

/// Buffered notifications per subscriber before it starts lagging.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("incident already exists: {0}")]
    Duplicate(IncidentId),

    #[error("incident not found: {0}")]
    NotFound(IncidentId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Backend(String),

    #[error("corrupted row {id}: {reason}")]
    Corrupted { id: String, reason: String },
}

/// Live-change notification. Delivery is at-least-once; consumers must be
/// idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "incident", rename_all = "snake_case")]
pub enum ChangeEvent {
    Inserted(Incident),
    Updated(Incident),
    /// Some notifications were lost; only "something changed" is known.
    Resync,
}

impl ChangeEvent {
    #[must_use]
    pub fn incident(&self) -> Option<&Incident> {
        match self {
            Self::Inserted(i) | Self::Updated(i) => Some(i),
            Self::Resync => None,
        }
    }
}

/// Subscription handle. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeStream {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeStream {
    #[must_use]
    pub fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Next change, or `None` once the store has shut its channel.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "change stream lagged, requesting resync");
                Some(ChangeEvent::Resync)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists a new incident. Ids are unique; a second insert of the same id
    /// fails with [`StoreError::Duplicate`].
    async fn insert(&self, incident: Incident) -> Result<Incident, StoreError>;

    /// Applies `patch` and returns the stored incident. A patch that changes
    /// nothing succeeds without emitting a change.
    async fn update(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident, StoreError>;

    /// Matching incidents, newest first.
    async fn query(&self, query: &IncidentQuery) -> Result<Vec<Incident>, StoreError>;

    fn subscribe(&self) -> ChangeStream;

    /// Event-type catalog rows. Stores without one serve the built-in set.
    async fn event_types(&self) -> Result<Vec<EventTypeRecord>, StoreError> {
        Ok(catalog::built_in_records())
    }
}

/// Newest first; id breaks ties so results are deterministic.
pub(crate) fn sort_newest_first(incidents: &mut [Incident]) {
    incidents.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn publish(changes: &broadcast::Sender<ChangeEvent>, event: ChangeEvent) {
    // No subscribers is normal before the engine starts.
    if changes.send(event).is_err() {
        tracing::debug!("change published with no subscribers");
    }
}
