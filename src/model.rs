use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(IncidentId);
typed_id!(UserId);

impl IncidentId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(crate::get_current_time_ms())
    }
}

// --- Coordinate: validated, NaN-safe ---

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lng)
    }
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lng(self) -> f64 {
        self.lng
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.lat, self.lng)
    }
}

// --- Event types ---

/// Kind of incident. Keys outside the built-in set are kept verbatim so that
/// incidents written by newer clients still load and render in degraded form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PowerOutage,
    TrafficJam,
    PoliceActivity,
    LongQueue,
    Other(String),
}

impl EventType {
    pub const BUILT_IN: [EventType; 4] = [
        EventType::PowerOutage,
        EventType::TrafficJam,
        EventType::PoliceActivity,
        EventType::LongQueue,
    ];

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PowerOutage => "power-outage",
            Self::TrafficJam => "traffic-jam",
            Self::PoliceActivity => "police-activity",
            Self::LongQueue => "long-queue",
            Self::Other(key) => key,
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "power-outage" => Self::PowerOutage,
            "traffic-jam" => Self::TrafficJam,
            "police-activity" => Self::PoliceActivity,
            "long-queue" => Self::LongQueue,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub const fn is_built_in(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for EventType {
    fn from(key: String) -> Self {
        Self::from_key(&key)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active view selector: every active incident, or one type only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventFilter {
    #[default]
    All,
    Type(EventType),
}

impl EventFilter {
    #[must_use]
    pub fn admits(&self, event_type: &EventType) -> bool {
        match self {
            Self::All => true,
            Self::Type(t) => t == event_type,
        }
    }
}

impl From<String> for EventFilter {
    fn from(key: String) -> Self {
        if key.trim() == "all" {
            Self::All
        } else {
            Self::Type(EventType::from_key(&key))
        }
    }
}

impl From<EventFilter> for String {
    fn from(filter: EventFilter) -> Self {
        filter.to_string()
    }
}

impl From<EventType> for EventFilter {
    fn from(event_type: EventType) -> Self {
        Self::Type(event_type)
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Type(t) => f.write_str(t.as_str()),
        }
    }
}

// --- Reporter ---

pub const ANONYMOUS_REPORTER: &str = "Anonymous";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Reporter {
    Anonymous,
    User(UserId),
}

impl Reporter {
    #[must_use]
    pub fn from_identity(identity: Option<UserId>) -> Self {
        identity.map_or(Self::Anonymous, Self::User)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Anonymous => ANONYMOUS_REPORTER,
            Self::User(id) => id.as_str(),
        }
    }
}

impl From<String> for Reporter {
    fn from(raw: String) -> Self {
        if raw.is_empty() || raw == ANONYMOUS_REPORTER {
            Self::Anonymous
        } else {
            Self::User(UserId(raw))
        }
    }
}

impl From<Reporter> for String {
    fn from(reporter: Reporter) -> Self {
        reporter.as_str().to_string()
    }
}

// --- Incident ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Location {
    /// Coordinates and address always travel together.
    pub fn new(coordinate: Coordinate, address: impl Into<String>) -> Self {
        Self {
            lat: coordinate.lat(),
            lng: coordinate.lng(),
            address: address.into(),
        }
    }

    pub fn coordinate(&self) -> Result<Coordinate, CoordinateError> {
        Coordinate::new(self.lat, self.lng)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: IncidentId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub location: Location,
    pub reporter: Reporter,
    pub created_at: UnixTimeMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
}

impl Incident {
    /// Fresh, active incident with a newly generated id.
    pub fn new(
        event_type: EventType,
        location: Location,
        reporter: Reporter,
        description: Option<String>,
        created_at: UnixTimeMs,
    ) -> Self {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Self {
            id: IncidentId::generate(),
            event_type,
            location,
            reporter,
            created_at,
            description,
            is_active: true,
        }
    }

    /// Marks the incident resolved. Returns `false` if it already was.
    pub fn resolve(&mut self) -> bool {
        let was_active = self.is_active;
        self.is_active = false;
        was_active
    }

    /// Applies a patch without ever reactivating. Returns whether anything changed.
    pub fn apply_patch(&mut self, patch: &IncidentPatch) -> bool {
        match patch.is_active {
            Some(false) => self.resolve(),
            Some(true) | None => false,
        }
    }
}

/// Partial update accepted by [`crate::store::EventStore::update`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl IncidentPatch {
    #[must_use]
    pub const fn deactivate() -> Self {
        Self {
            is_active: Some(false),
        }
    }
}

/// Store-side filter. `None` fields are unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
}

impl IncidentQuery {
    /// Scope the engine queries for a given filter: active only, plus the type.
    #[must_use]
    pub fn for_filter(filter: &EventFilter) -> Self {
        Self {
            is_active: Some(true),
            event_type: match filter {
                EventFilter::All => None,
                EventFilter::Type(t) => Some(t.clone()),
            },
        }
    }

    #[must_use]
    pub fn matches(&self, incident: &Incident) -> bool {
        self.is_active.is_none_or(|a| incident.is_active == a)
            && self
                .event_type
                .as_ref()
                .is_none_or(|t| &incident.event_type == t)
    }
}
