//! Reconciliation engine between the UI, the device and the incident store.
//!
//! The engine keeps a local, filtered view of active incidents. Every mutation
//! and every remote change ends in a fresh query of the current scope; query
//! results are the only thing that ever replaces the view. Three guards keep
//! that view consistent when calls interleave:
//!
//! - a sequence number, so results older than the last applied ones are dropped
//! - the filter captured at query start, so results for a replaced filter are dropped
//! - a bounded tombstone set, so an incident seen resolved never comes back

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock as StdRwLock, Weak};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{EventTypeCatalog, RenderCapabilities};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::filter;
use crate::geocode::ReverseGeocoder;
use crate::identity::IdentityProvider;
use crate::location::LocationProvider;
use crate::model::{
    Coordinate, EventFilter, EventType, Incident, IncidentId, IncidentPatch, IncidentQuery,
    Location, Reporter, UnixTimeMs,
};
use crate::notify::{Notification, Notifier};
use crate::store::{ChangeEvent, ChangeStream, EventStore, StoreError};

pub const REPORTED_MESSAGE: &str = "Event reported successfully!";
pub const RESOLVED_MESSAGE: &str = "Event marked as resolved";
pub const PREVIEW_LOCATION_FAILED_MESSAGE: &str = "Could not get your location";

// ============================================================================
// Public types
// ============================================================================

/// Collaborators the engine talks to. All are shared handles so hosts can keep
/// their own references (e.g. to flip the signed-in user).
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn EventStore>,
    pub location: Arc<dyn LocationProvider>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn Notifier>,
}

/// Everything the UI renders from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    /// Active incidents admitted by `filter`, newest first.
    pub events: Vec<Incident>,
    pub filter: EventFilter,
    pub is_loading: bool,
    pub last_error: Option<SyncError>,
}

/// Result of a location check that does not report anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPreview {
    pub coordinate: Coordinate,
    pub address: String,
}

// ============================================================================
// Internal state
// ============================================================================

struct EngineState {
    events: Vec<Incident>,
    filter: EventFilter,
    in_flight: usize,
    last_error: Option<SyncError>,
    next_seq: u64,
    applied_seq: u64,
    tombstones: LruCache<IncidentId, ()>,
}

impl EngineState {
    fn new(tombstone_capacity: NonZeroUsize) -> Self {
        Self {
            events: Vec::new(),
            filter: EventFilter::All,
            in_flight: 0,
            last_error: None,
            next_seq: 0,
            applied_seq: 0,
            tombstones: LruCache::new(tombstone_capacity),
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            events: self.events.clone(),
            filter: self.filter.clone(),
            is_loading: self.in_flight > 0,
            last_error: self.last_error.clone(),
        }
    }

    fn bury(&mut self, id: &IncidentId) {
        self.tombstones.put(id.clone(), ());
        self.events.retain(|e| &e.id != id);
    }

    /// Replaces the view with a query result: one entry per id (first wins,
    /// results arrive newest first), nothing tombstoned, nothing outside the
    /// filter.
    fn reconcile(&mut self, incidents: Vec<Incident>) {
        let mut seen = HashSet::with_capacity(incidents.len());
        let mut fresh = Vec::with_capacity(incidents.len());
        for incident in incidents {
            if !incident.is_active {
                self.tombstones.put(incident.id.clone(), ());
                continue;
            }
            if self.tombstones.contains(&incident.id) || !seen.insert(incident.id.clone()) {
                continue;
            }
            fresh.push(incident);
        }
        self.events = filter::select(&fresh, &self.filter);
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct EventSyncEngine {
    deps: EngineDeps,
    capabilities: RenderCapabilities,
    state: RwLock<EngineState>,
    snapshots: watch::Sender<EngineSnapshot>,
    catalog: StdRwLock<Arc<EventTypeCatalog>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl EventSyncEngine {
    #[must_use]
    pub fn new(deps: EngineDeps, config: &SyncConfig) -> Self {
        let capacity = NonZeroUsize::new(config.tombstone_capacity).unwrap_or(NonZeroUsize::MIN);
        let (snapshots, _) = watch::channel(EngineSnapshot::default());
        Self {
            deps,
            capabilities: RenderCapabilities::built_in(),
            state: RwLock::new(EngineState::new(capacity)),
            snapshots,
            catalog: StdRwLock::new(Arc::new(EventTypeCatalog::default())),
            listener: Mutex::new(None),
        }
    }

    /// Declares which type keys the UI can draw. Takes effect at `start`.
    #[must_use]
    pub fn with_render_capabilities(mut self, capabilities: RenderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    // --- Lifecycle ---

    /// Loads the type catalog, subscribes to store changes and runs the
    /// initial query. Calling it on a running engine only refreshes.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        if self.is_listening() {
            debug!("engine already started");
            return self.refresh().await;
        }

        let catalog = EventTypeCatalog::load(self.deps.store.as_ref(), &self.capabilities).await;
        info!(types = catalog.len(), "event type catalog loaded");
        if let Ok(mut slot) = self.catalog.write() {
            *slot = Arc::new(catalog);
        }

        // Subscribe before querying so nothing between the two is missed.
        let changes = self.deps.store.subscribe();
        let handle = tokio::spawn(listen(Arc::downgrade(self), changes));
        match self.listener.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(handle) {
                    previous.abort();
                }
            }
            Err(_) => {
                error!("listener slot poisoned, change stream not attached");
                handle.abort();
            }
        }

        self.refresh().await
    }

    /// Releases the store subscription. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = self.listener.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
            info!("engine shut down");
        }
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    // --- Observation ---

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<EventTypeCatalog> {
        self.catalog
            .read()
            .map(|c| Arc::clone(&*c))
            .unwrap_or_else(|_| Arc::new(EventTypeCatalog::default()))
    }

    // --- Operations ---

    /// Reports a new incident at the device's current position.
    #[instrument(skip(self, description), fields(event_type = %event_type))]
    pub async fn report(
        &self,
        event_type: EventType,
        description: Option<String>,
    ) -> SyncResult<Incident> {
        let Some(coordinate) = self.deps.location.acquire().await else {
            return Err(self.fail(SyncError::LocationUnavailable).await);
        };

        let address = self.deps.geocoder.resolve(coordinate).await;
        let reporter = Reporter::from_identity(self.deps.identity.current_user());
        let incident = Incident::new(
            event_type,
            Location::new(coordinate, address),
            reporter,
            description,
            UnixTimeMs::now(),
        );

        let stored = match self.deps.store.insert(incident).await {
            Ok(stored) => stored,
            Err(e) => return Err(self.fail(SyncError::from_write(e)).await),
        };
        info!(incident_id = %stored.id, "incident reported");

        self.succeed(REPORTED_MESSAGE).await;
        // A failed re-query is recorded on its own; the report itself stands.
        let _ = self.refresh().await;
        Ok(stored)
    }

    /// Marks an incident resolved. Requires a signed-in user.
    #[instrument(skip(self), fields(incident_id = %id))]
    pub async fn resolve(&self, id: &IncidentId) -> SyncResult<()> {
        if self.deps.identity.current_user().is_none() {
            warn!("resolve attempted without a signed-in user");
            return Err(self.fail(SyncError::Unauthorized).await);
        }

        match self
            .deps
            .store
            .update(id, &IncidentPatch::deactivate())
            .await
        {
            Ok(incident) => {
                if !incident.is_active {
                    self.state.write().await.bury(&incident.id);
                }
            }
            Err(StoreError::NotFound(_)) => debug!("incident not in store, nothing to resolve"),
            Err(e) => return Err(self.fail(SyncError::from_write(e)).await),
        }

        self.succeed(RESOLVED_MESSAGE).await;
        let _ = self.refresh().await;
        Ok(())
    }

    /// Switches the visible type and re-queries. The last filter set wins.
    #[instrument(skip(self), fields(filter = %filter))]
    pub async fn set_filter(&self, filter: EventFilter) -> SyncResult<()> {
        {
            let mut state = self.state.write().await;
            state.events = filter::select(&state.events, &filter);
            state.filter = filter;
            self.publish(&state);
        }
        self.refresh().await
    }

    /// Reacts to a store notification by re-querying the current scope.
    pub async fn on_remote_change(&self, change: ChangeEvent) -> SyncResult<()> {
        if let Some(incident) = change.incident() {
            debug!(incident_id = %incident.id, active = incident.is_active, "remote change");
            if !incident.is_active {
                let mut state = self.state.write().await;
                state.bury(&incident.id);
                self.publish(&state);
            }
        } else {
            debug!("remote resync requested");
        }
        self.refresh().await
    }

    /// Re-queries the current scope and applies the result if still current.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> SyncResult<()> {
        let (seq, filter) = {
            let mut state = self.state.write().await;
            state.next_seq += 1;
            state.in_flight += 1;
            self.publish(&state);
            (state.next_seq, state.filter.clone())
        };

        let result = self
            .deps
            .store
            .query(&IncidentQuery::for_filter(&filter))
            .await;

        let mut state = self.state.write().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        let current = state.filter == filter && seq > state.applied_seq;

        match result {
            Ok(incidents) if current => {
                state.reconcile(incidents);
                state.applied_seq = seq;
                state.last_error = None;
                debug!(seq, count = state.events.len(), "query applied");
                self.publish(&state);
                Ok(())
            }
            Ok(_) => {
                debug!(seq, applied = state.applied_seq, "discarding stale query result");
                self.publish(&state);
                Ok(())
            }
            Err(e) => {
                let err = SyncError::from_read(e);
                if current {
                    error!(seq, error = %err, "query failed");
                    state.last_error = Some(err.clone());
                    self.publish(&state);
                    drop(state);
                    self.deps
                        .notifier
                        .notify(Notification::error(err.user_facing_message()));
                } else {
                    warn!(seq, error = %err, "superseded query failed");
                    self.publish(&state);
                }
                Err(err)
            }
        }
    }

    /// Current position and its address, without reporting anything.
    #[instrument(skip(self))]
    pub async fn preview_location(&self) -> SyncResult<LocationPreview> {
        let Some(coordinate) = self.deps.location.acquire().await else {
            return Err(self
                .fail_with(
                    SyncError::LocationUnavailable,
                    PREVIEW_LOCATION_FAILED_MESSAGE.to_string(),
                )
                .await);
        };
        let address = self.deps.geocoder.resolve(coordinate).await;
        self.clear_error().await;
        Ok(LocationPreview {
            coordinate,
            address,
        })
    }

    // --- Helpers ---

    fn publish(&self, state: &EngineState) {
        self.snapshots.send_replace(state.snapshot());
    }

    async fn fail(&self, err: SyncError) -> SyncError {
        let message = err.user_facing_message();
        self.fail_with(err, message).await
    }

    /// Records `err` like [`Self::fail`] but toasts `message` instead of the
    /// error's default wording.
    async fn fail_with(&self, err: SyncError, message: String) -> SyncError {
        warn!(code = err.code(), error = %err, "operation failed");
        {
            let mut state = self.state.write().await;
            state.last_error = Some(err.clone());
            self.publish(&state);
        }
        self.deps.notifier.notify(Notification::error(message));
        err
    }

    async fn clear_error(&self) {
        let mut state = self.state.write().await;
        if state.last_error.take().is_some() {
            self.publish(&state);
        }
    }

    async fn succeed(&self, message: &str) {
        self.clear_error().await;
        self.deps.notifier.notify(Notification::success(message));
    }
}

impl Drop for EventSyncEngine {
    fn drop(&mut self) {
        if let Ok(slot) = self.listener.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

async fn listen(engine: Weak<EventSyncEngine>, mut changes: ChangeStream) {
    while let Some(change) = changes.next().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        // Failures are already recorded and surfaced by the engine.
        let _ = engine.on_remote_change(change).await;
    }
    debug!("change listener stopped");
}
