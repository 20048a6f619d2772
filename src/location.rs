//! Device location acquisition.
//!
//! Platform geolocation APIs are callback based. [`LocationAcquirer`] turns a
//! single `get_current_position` request into a future that always settles,
//! and converts every failure into `None` plus one user-visible notification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::model::Coordinate;
use crate::notify::{Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
        }
    }
}

/// Raw reading as reported by the platform, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location request timed out")]
    Timeout,
    #[error("position unavailable")]
    Unavailable,
    #[error("geolocation not supported")]
    Unsupported,
}

impl LocationError {
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => "Location permission denied",
            Self::Timeout => "Timed out while getting your location",
            Self::Unavailable => "Could not get your location",
            Self::Unsupported => "Geolocation is not supported on this device",
        }
    }
}

pub type PositionCallback = Box<dyn FnOnce(Result<Position, LocationError>) + Send + 'static>;

/// Platform geolocation capability. Implementations call `callback` at most
/// once; dropping it uncalled counts as "position unavailable".
pub trait GeolocationDevice: Send + Sync {
    fn get_current_position(&self, options: PositionOptions, callback: PositionCallback);
}

/// Engine-facing seam. Never fails loudly: `None` means the report must abort.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn acquire(&self) -> Option<Coordinate>;
}

pub struct LocationAcquirer {
    device: Option<Arc<dyn GeolocationDevice>>,
    options: PositionOptions,
    notifier: Arc<dyn Notifier>,
}

impl LocationAcquirer {
    /// `device` is `None` on platforms without a geolocation capability.
    pub fn new(
        device: Option<Arc<dyn GeolocationDevice>>,
        options: PositionOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            device,
            options,
            notifier,
        }
    }

    /// Single-shot request without the notification side effect.
    pub async fn try_acquire(&self) -> Result<Coordinate, LocationError> {
        let device = self.device.as_ref().ok_or(LocationError::Unsupported)?;

        let (tx, rx) = oneshot::channel();
        device.get_current_position(
            self.options,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let position = rx.await.map_err(|_| LocationError::Unavailable)??;

        Coordinate::new(position.latitude, position.longitude).map_err(|e| {
            warn!(error = %e, "device returned an invalid position");
            LocationError::Unavailable
        })
    }
}

#[async_trait]
impl LocationProvider for LocationAcquirer {
    async fn acquire(&self) -> Option<Coordinate> {
        match self.try_acquire().await {
            Ok(coordinate) => {
                debug!(%coordinate, "location acquired");
                Some(coordinate)
            }
            Err(e) => {
                warn!(error = %e, "location acquisition failed");
                self.notifier.notify(Notification::error(e.user_message()));
                None
            }
        }
    }
}

/// Device that always reports one fixed position, e.g. a pin the user dropped
/// on the map or a desktop host with a configured home location.
#[derive(Debug, Clone, Copy)]
pub struct PinnedDevice {
    position: Position,
}

impl PinnedDevice {
    #[must_use]
    pub const fn new(coordinate: Coordinate) -> Self {
        Self {
            position: Position {
                latitude: coordinate.lat(),
                longitude: coordinate.lng(),
                accuracy_m: None,
            },
        }
    }
}

impl GeolocationDevice for PinnedDevice {
    fn get_current_position(&self, _options: PositionOptions, callback: PositionCallback) {
        callback(Ok(self.position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use std::sync::Mutex;

    struct ScriptedDevice {
        result: Option<Result<Position, LocationError>>,
        seen_options: Mutex<Vec<PositionOptions>>,
    }

    impl ScriptedDevice {
        fn new(result: Option<Result<Position, LocationError>>) -> Self {
            Self {
                result,
                seen_options: Mutex::new(Vec::new()),
            }
        }
    }

    impl GeolocationDevice for ScriptedDevice {
        fn get_current_position(&self, options: PositionOptions, callback: PositionCallback) {
            self.seen_options.lock().unwrap().push(options);
            if let Some(result) = self.result {
                // Platforms answer from their own thread.
                std::thread::spawn(move || callback(result));
            }
        }
    }

    fn position(lat: f64, lng: f64) -> Position {
        Position {
            latitude: lat,
            longitude: lng,
            accuracy_m: Some(5.0),
        }
    }

    fn acquirer(
        device: Option<Arc<dyn GeolocationDevice>>,
    ) -> (LocationAcquirer, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let acquirer = LocationAcquirer::new(device, PositionOptions::default(), notifier.clone());
        (acquirer, notifier)
    }

    #[tokio::test]
    async fn test_success_requests_high_accuracy() {
        let device = Arc::new(ScriptedDevice::new(Some(Ok(position(40.71, -74.0)))));
        let (acquirer, notifier) = acquirer(Some(device.clone()));

        let coordinate = acquirer.acquire().await.unwrap();
        assert_eq!(coordinate.lat(), 40.71);
        assert_eq!(coordinate.lng(), -74.0);
        assert!(notifier.messages().is_empty());
        assert!(device.seen_options.lock().unwrap()[0].enable_high_accuracy);
    }

    #[tokio::test]
    async fn test_permission_denied_notifies_once() {
        let device = Arc::new(ScriptedDevice::new(Some(Err(LocationError::PermissionDenied))));
        let (acquirer, notifier) = acquirer(Some(device));

        assert!(acquirer.acquire().await.is_none());
        assert_eq!(notifier.messages(), vec!["Location permission denied"]);
    }

    #[tokio::test]
    async fn test_dropped_callback_is_unavailable() {
        let device = Arc::new(ScriptedDevice::new(None));
        let (acquirer, notifier) = acquirer(Some(device));

        assert_eq!(acquirer.try_acquire().await, Err(LocationError::Unavailable));
        assert!(acquirer.acquire().await.is_none());
        assert_eq!(notifier.messages(), vec!["Could not get your location"]);
    }

    #[tokio::test]
    async fn test_missing_device_is_unsupported() {
        let (acquirer, notifier) = acquirer(None);
        assert_eq!(acquirer.try_acquire().await, Err(LocationError::Unsupported));
        assert!(acquirer.acquire().await.is_none());
        assert_eq!(
            notifier.messages(),
            vec!["Geolocation is not supported on this device"]
        );
    }

    #[tokio::test]
    async fn test_invalid_reading_is_rejected() {
        let device = Arc::new(ScriptedDevice::new(Some(Ok(position(f64::NAN, 0.0)))));
        let (acquirer, _) = acquirer(Some(device));
        assert_eq!(acquirer.try_acquire().await, Err(LocationError::Unavailable));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_independent() {
        let device = Arc::new(ScriptedDevice::new(Some(Ok(position(1.0, 2.0)))));
        let (acquirer, _) = acquirer(Some(device.clone()));

        let (a, b) = tokio::join!(acquirer.acquire(), acquirer.acquire());
        assert!(a.is_some() && b.is_some());
        assert_eq!(device.seen_options.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pinned_device() {
        let pin = Coordinate::new(51.5074, -0.1278).unwrap();
        let (acquirer, _) = acquirer(Some(Arc::new(PinnedDevice::new(pin))));
        assert_eq!(acquirer.acquire().await, Some(pin));
    }
}
