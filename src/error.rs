use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    LocationUnavailable,
    GeocodeFailed,
    StoreWriteFailed,
    StoreReadFailed,
    Unauthorized,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::LocationUnavailable => "LOCATION_UNAVAILABLE",
            Self::GeocodeFailed => "GEOCODE_FAILED",
            Self::StoreWriteFailed => "STORE_WRITE_FAILED",
            Self::StoreReadFailed => "STORE_READ_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

/// Failure of an engine operation, as surfaced to the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SyncError {
    #[error("location unavailable")]
    LocationUnavailable,

    #[error("address lookup failed: {0}")]
    GeocodeFailed(String),

    #[error("store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("store read failed: {0}")]
    StoreReadFailed(String),

    #[error("sign-in required")]
    Unauthorized,
}

impl SyncError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::LocationUnavailable => ErrorKind::LocationUnavailable,
            Self::GeocodeFailed(_) => ErrorKind::GeocodeFailed,
            Self::StoreWriteFailed(_) => ErrorKind::StoreWriteFailed,
            Self::StoreReadFailed(_) => ErrorKind::StoreReadFailed,
            Self::Unauthorized => ErrorKind::Unauthorized,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::LocationUnavailable => {
                "Could not get your location to report event".to_string()
            }
            Self::GeocodeFailed(_) => "Address lookup failed".to_string(),
            Self::StoreWriteFailed(_) => "Could not save your change. Please try again.".to_string(),
            Self::StoreReadFailed(_) => "Could not load events. Please try again.".to_string(),
            Self::Unauthorized => "Please sign in to resolve events".to_string(),
        }
    }

    pub(crate) fn from_write(e: StoreError) -> Self {
        Self::StoreWriteFailed(e.to_string())
    }

    pub(crate) fn from_read(e: StoreError) -> Self {
        Self::StoreReadFailed(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
