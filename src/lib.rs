//! Event synchronisation and geolocation core for a live civic incident map.
//!
//! Residents report incidents (power outages, traffic jams, police activity,
//! long queues) at their current position; everyone else sees them on a map
//! that follows the shared store in near real time. [`EventSyncEngine`] owns
//! the local view and reconciles it with the store; the UI reads
//! [`EngineSnapshot`]s and calls `report`, `resolve` and `set_filter`.
//!
//! Everything outside the engine is a trait seam, so hosts plug in their own
//! store, geolocation, identity and toast surfaces.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geocode;
pub mod identity;
pub mod location;
pub mod logging;
pub mod model;
pub mod notify;
pub mod store;
pub mod view;

pub use catalog::{EventTypeCatalog, RenderCapabilities};
pub use config::{load_config, EngineConfig};
pub use engine::{EngineDeps, EngineSnapshot, EventSyncEngine, LocationPreview};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use geocode::{NominatimGeocoder, ReverseGeocoder};
pub use identity::{IdentityProvider, SessionIdentity};
pub use location::{GeolocationDevice, LocationAcquirer, LocationProvider, PositionOptions};
pub use model::{Coordinate, EventFilter, EventType, Incident, IncidentId, UnixTimeMs, UserId};
pub use notify::{Notification, Notifier, ToastKind};
pub use store::{ChangeEvent, EventStore, InMemoryEventStore, StoreError};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use store::SqliteEventStore;

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Opens the SQLite store named by `config.store`.
///
/// # Errors
///
/// Returns [`StoreError`] if the database cannot be opened or migrated.
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub fn open_store(config: &EngineConfig) -> Result<std::sync::Arc<dyn EventStore>, StoreError> {
    let store = SqliteEventStore::from_config(&config.store)?;
    tracing::info!(path = %config.store.sqlite_path, "incident store opened");
    Ok(std::sync::Arc::new(store))
}

/// Builds the production collaborators from `config`: Nominatim geocoding,
/// the callback-based device wrapped by [`LocationAcquirer`], and the given
/// store, identity and notifier.
///
/// # Errors
///
/// Returns [`geocode::GeocodeError`] if the geocoder endpoint is invalid.
pub fn default_deps(
    config: &EngineConfig,
    store: std::sync::Arc<dyn EventStore>,
    device: Option<std::sync::Arc<dyn GeolocationDevice>>,
    identity: std::sync::Arc<dyn IdentityProvider>,
    notifier: std::sync::Arc<dyn Notifier>,
) -> Result<EngineDeps, geocode::GeocodeError> {
    let geocoder = NominatimGeocoder::new(&config.geocoder)?;
    let options = PositionOptions {
        enable_high_accuracy: config.location.high_accuracy,
    };
    Ok(EngineDeps {
        store,
        location: std::sync::Arc::new(LocationAcquirer::new(device, options, notifier.clone())),
        geocoder: std::sync::Arc::new(geocoder),
        identity,
        notifier,
    })
}
