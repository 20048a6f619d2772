//! Event-type catalog: display metadata for every type the map can draw.
//!
//! Loaded once at startup from the store and checked against what the UI says
//! it can render. Anything it cannot render falls back to [`UNKNOWN_EVENT`].

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::EventType;
use crate::store::EventStore;

pub const UNKNOWN_EVENT: &str = "Unknown Event";

/// Row of the store's event-type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeRecord {
    pub key: String,
    pub label: String,
}

/// Marker fill and border, as CSS hex colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerStyle {
    pub color: &'static str,
    pub border_color: &'static str,
}

impl MarkerStyle {
    pub const NEUTRAL: Self = Self {
        color: "#6b7280",
        border_color: "#4b5563",
    };

    #[must_use]
    pub fn for_type(event_type: &EventType) -> Self {
        match event_type {
            EventType::PowerOutage => Self {
                color: "#ef4444",
                border_color: "#b91c1c",
            },
            EventType::TrafficJam => Self {
                color: "#f59e0b",
                border_color: "#d97706",
            },
            EventType::PoliceActivity => Self {
                color: "#3b82f6",
                border_color: "#2563eb",
            },
            EventType::LongQueue => Self {
                color: "#fbbf24",
                border_color: "#f59e0b",
            },
            EventType::Other(_) => Self::NEUTRAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub event_type: EventType,
    pub label: String,
    pub style: MarkerStyle,
    /// `false` for entries standing in for a type the UI cannot draw.
    pub supported: bool,
}

/// Type keys the host UI knows how to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCapabilities {
    keys: BTreeSet<String>,
}

impl Default for RenderCapabilities {
    fn default() -> Self {
        Self::built_in()
    }
}

impl RenderCapabilities {
    #[must_use]
    pub fn built_in() -> Self {
        Self::new(EventType::BUILT_IN.iter().map(EventType::as_str))
    }

    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys.into_iter().map(|k| k.as_ref().trim().to_string()).collect(),
        }
    }

    #[must_use]
    pub fn supports(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Display label for the built-in types.
#[must_use]
pub fn built_in_label(event_type: &EventType) -> &'static str {
    match event_type {
        EventType::PowerOutage => "Power Outage",
        EventType::TrafficJam => "Traffic Jam",
        EventType::PoliceActivity => "Police Activity",
        EventType::LongQueue => "Long Queue",
        EventType::Other(_) => UNKNOWN_EVENT,
    }
}

#[must_use]
pub fn built_in_records() -> Vec<EventTypeRecord> {
    EventType::BUILT_IN
        .iter()
        .map(|t| EventTypeRecord {
            key: t.as_str().to_string(),
            label: built_in_label(t).to_string(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct EventTypeCatalog {
    entries: HashMap<EventType, CatalogEntry>,
    order: Vec<EventType>,
}

impl Default for EventTypeCatalog {
    fn default() -> Self {
        Self::from_records(built_in_records(), &RenderCapabilities::built_in())
    }
}

impl EventTypeCatalog {
    /// Builds the catalog, keeping only records the UI can render. Blank and
    /// repeated keys are skipped.
    #[must_use]
    pub fn from_records(records: Vec<EventTypeRecord>, caps: &RenderCapabilities) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();

        for record in records {
            let key = record.key.trim();
            if key.is_empty() {
                warn!("skipping event type with empty key");
                continue;
            }
            if !caps.supports(key) {
                debug!(key, "event type not renderable, will show as unknown");
                continue;
            }

            let event_type = EventType::from_key(key);
            if entries.contains_key(&event_type) {
                continue;
            }
            let label = match record.label.trim() {
                "" => built_in_label(&event_type).to_string(),
                label => label.to_string(),
            };
            let style = MarkerStyle::for_type(&event_type);
            order.push(event_type.clone());
            entries.insert(
                event_type.clone(),
                CatalogEntry {
                    event_type,
                    label,
                    style,
                    supported: true,
                },
            );
        }

        Self { entries, order }
    }

    /// Loads from `store`, falling back to the built-in set if that fails.
    pub async fn load(store: &dyn EventStore, caps: &RenderCapabilities) -> Self {
        match store.event_types().await {
            Ok(records) => Self::from_records(records, caps),
            Err(e) => {
                warn!(error = %e, "event type catalog unavailable, using built-in types");
                Self::from_records(built_in_records(), caps)
            }
        }
    }

    /// Entry for `event_type`; unknown or unrenderable types get a degraded one.
    #[must_use]
    pub fn entry(&self, event_type: &EventType) -> CatalogEntry {
        self.entries.get(event_type).cloned().unwrap_or_else(|| CatalogEntry {
            event_type: event_type.clone(),
            label: UNKNOWN_EVENT.to_string(),
            style: MarkerStyle::NEUTRAL,
            supported: false,
        })
    }

    #[must_use]
    pub fn label(&self, event_type: &EventType) -> String {
        self.entry(event_type).label
    }

    /// Supported entries in catalog order, for filter chips and the report form.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.order.iter().filter_map(|t| self.entries.get(t))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::model::{Incident, IncidentId, IncidentPatch, IncidentQuery};
    use crate::store::{ChangeStream, InMemoryEventStore, StoreError};

    #[test]
    fn test_built_in_catalog() {
        let catalog = EventTypeCatalog::default();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.label(&EventType::PowerOutage), "Power Outage");
        assert_eq!(catalog.label(&EventType::LongQueue), "Long Queue");
        let keys: Vec<_> = catalog.entries().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            keys,
            vec!["power-outage", "traffic-jam", "police-activity", "long-queue"]
        );
    }

    #[test]
    fn test_unknown_type_degrades() {
        let catalog = EventTypeCatalog::default();
        let entry = catalog.entry(&EventType::Other("sinkhole".into()));
        assert_eq!(entry.label, UNKNOWN_EVENT);
        assert_eq!(entry.style, MarkerStyle::NEUTRAL);
        assert!(!entry.supported);
    }

    #[test]
    fn test_unrenderable_records_are_dropped() {
        let mut records = built_in_records();
        records.push(EventTypeRecord {
            key: "flooding".into(),
            label: "Flooding".into(),
        });

        let catalog = EventTypeCatalog::from_records(records.clone(), &RenderCapabilities::built_in());
        assert_eq!(catalog.label(&EventType::Other("flooding".into())), UNKNOWN_EVENT);

        let caps = RenderCapabilities::new(["power-outage", "flooding"]);
        let catalog = EventTypeCatalog::from_records(records, &caps);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.label(&EventType::Other("flooding".into())), "Flooding");
        assert_eq!(catalog.label(&EventType::TrafficJam), UNKNOWN_EVENT);
    }

    #[test]
    fn test_blank_label_uses_built_in() {
        let records = vec![EventTypeRecord {
            key: "traffic-jam".into(),
            label: " ".into(),
        }];
        let catalog = EventTypeCatalog::from_records(records, &RenderCapabilities::built_in());
        assert_eq!(catalog.label(&EventType::TrafficJam), "Traffic Jam");
    }

    struct BrokenCatalogStore(InMemoryEventStore);

    #[async_trait]
    impl EventStore for BrokenCatalogStore {
        async fn insert(&self, incident: Incident) -> Result<Incident, StoreError> {
            self.0.insert(incident).await
        }
        async fn update(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident, StoreError> {
            self.0.update(id, patch).await
        }
        async fn query(&self, query: &IncidentQuery) -> Result<Vec<Incident>, StoreError> {
            self.0.query(query).await
        }
        fn subscribe(&self) -> ChangeStream {
            self.0.subscribe()
        }
        async fn event_types(&self) -> Result<Vec<EventTypeRecord>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_load_falls_back_on_store_failure() {
        let store = BrokenCatalogStore(InMemoryEventStore::new());
        let catalog = EventTypeCatalog::load(&store, &RenderCapabilities::built_in()).await;
        assert_eq!(catalog.len(), 4);
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = InMemoryEventStore::new().with_event_types(vec![EventTypeRecord {
            key: "power-outage".into(),
            label: "Blackout".into(),
        }]);
        let catalog = EventTypeCatalog::load(&store, &RenderCapabilities::built_in()).await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.label(&EventType::PowerOutage), "Blackout");
    }
}
