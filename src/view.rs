//! Projections of engine state for the map and the incident list.

use geojson::{feature, Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use serde::{Deserialize, Serialize};

use crate::catalog::{EventTypeCatalog, MarkerStyle};
use crate::model::{Coordinate, EventType, Incident};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Where the map opens before any incident or position is known.
pub const DEFAULT_MAP_CENTER: (f64, f64) = (40.7128, -74.006);
pub const DEFAULT_MAP_ZOOM: u8 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMarker {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    pub lat: f64,
    pub lng: f64,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub color: String,
    pub border_color: String,
}

impl MapMarker {
    #[must_use]
    pub fn from_incident(incident: &Incident, catalog: &EventTypeCatalog) -> Self {
        let entry = catalog.entry(&incident.event_type);
        Self::build(incident, entry.label, entry.style)
    }

    fn build(incident: &Incident, title: String, style: MarkerStyle) -> Self {
        Self {
            id: incident.id.to_string(),
            event_type: incident.event_type.clone(),
            title,
            lat: incident.location.lat,
            lng: incident.location.lng,
            address: incident.location.address.clone(),
            description: incident.description.clone(),
            is_active: incident.is_active,
            color: style.color.to_string(),
            border_color: style.border_color.to_string(),
        }
    }

    fn to_feature(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("type".into(), JsonValue::from(self.event_type.as_str()));
        properties.insert("title".into(), JsonValue::from(self.title.clone()));
        properties.insert("address".into(), JsonValue::from(self.address.clone()));
        if let Some(description) = &self.description {
            properties.insert("description".into(), JsonValue::from(description.clone()));
        }
        properties.insert("isActive".into(), JsonValue::from(self.is_active));
        properties.insert("color".into(), JsonValue::from(self.color.clone()));
        properties.insert("borderColor".into(), JsonValue::from(self.border_color.clone()));

        Feature {
            bbox: None,
            // GeoJSON positions are [longitude, latitude].
            geometry: Some(Geometry::new(Value::Point(vec![self.lng, self.lat]))),
            id: Some(feature::Id::String(self.id.clone())),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

#[must_use]
pub fn map_markers(events: &[Incident], catalog: &EventTypeCatalog) -> Vec<MapMarker> {
    events
        .iter()
        .map(|incident| MapMarker::from_incident(incident, catalog))
        .collect()
}

/// Point features for map layers that take GeoJSON directly.
#[must_use]
pub fn to_feature_collection(markers: &[MapMarker]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: markers.iter().map(MapMarker::to_feature).collect(),
        foreign_members: None,
    }
}

/// One row of the incident list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCard {
    pub id: String,
    pub title: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub time_ago: String,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_text: Option<String>,
    pub can_resolve: bool,
}

/// List rows in view order. `origin` adds distances; `signed_in` decides
/// whether the resolve action is offered.
#[must_use]
pub fn incident_cards(
    events: &[Incident],
    catalog: &EventTypeCatalog,
    now_ms: u64,
    origin: Option<Coordinate>,
    signed_in: bool,
) -> Vec<IncidentCard> {
    events
        .iter()
        .map(|incident| {
            let distance = origin.and_then(|from| {
                incident
                    .location
                    .coordinate()
                    .ok()
                    .map(|to| haversine_distance(from, to))
            });
            IncidentCard {
                id: incident.id.to_string(),
                title: catalog.label(&incident.event_type),
                address: incident.location.address.clone(),
                description: incident.description.clone(),
                time_ago: format_time_ago(incident.created_at.0, now_ms),
                created_at_ms: incident.created_at.0,
                distance_meters: distance,
                distance_text: distance.map(format_distance),
                can_resolve: signed_in && incident.is_active,
            }
        })
        .collect()
}

#[must_use]
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    let minutes = now_ms.saturating_sub(timestamp_ms) / 60_000;
    if minutes < 1 {
        return "Just now".into();
    }
    if minutes == 1 {
        return "1 minute ago".into();
    }
    if minutes < 60 {
        return format!("{minutes} minutes ago");
    }

    let hours = minutes / 60;
    if hours == 1 {
        return "1 hour ago".into();
    }
    if hours < 24 {
        return format!("{hours} hours ago");
    }

    let days = hours / 24;
    if days == 1 {
        "1 day ago".into()
    } else {
        format!("{days} days ago")
    }
}

#[must_use]
pub fn haversine_distance(p1: Coordinate, p2: Coordinate) -> f64 {
    let lat1 = p1.lat().to_radians();
    let lat2 = p2.lat().to_radians();
    let delta_lat = (p2.lat() - p1.lat()).to_radians();
    let delta_lng = (p2.lng() - p1.lng()).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::incident;

    const MINUTE: u64 = 60_000;

    #[test]
    fn test_format_time_ago() {
        let t = 1_000_000_000;
        assert_eq!(format_time_ago(t, t), "Just now");
        assert_eq!(format_time_ago(t, t + 59_999), "Just now");
        assert_eq!(format_time_ago(t, t + MINUTE), "1 minute ago");
        assert_eq!(format_time_ago(t, t + 5 * MINUTE), "5 minutes ago");
        assert_eq!(format_time_ago(t, t + 60 * MINUTE), "1 hour ago");
        assert_eq!(format_time_ago(t, t + 150 * MINUTE), "2 hours ago");
        assert_eq!(format_time_ago(t, t + 24 * 60 * MINUTE), "1 day ago");
        assert_eq!(format_time_ago(t, t + 3 * 24 * 60 * MINUTE), "3 days ago");
        // clock skew
        assert_eq!(format_time_ago(t + MINUTE, t), "Just now");
    }

    #[test]
    fn test_marker_uses_catalog() {
        let catalog = EventTypeCatalog::default();
        let marker = MapMarker::from_incident(&incident("1", EventType::PowerOutage, true), &catalog);
        assert_eq!(marker.title, "Power Outage");
        assert_eq!(marker.color, "#ef4444");

        let odd = MapMarker::from_incident(
            &incident("2", EventType::Other("sinkhole".into()), true),
            &catalog,
        );
        assert_eq!(odd.title, "Unknown Event");
        assert_eq!(odd.color, MarkerStyle::NEUTRAL.color);
    }

    #[test]
    fn test_marker_json_shape() {
        let catalog = EventTypeCatalog::default();
        let marker = MapMarker::from_incident(&incident("1", EventType::TrafficJam, true), &catalog);
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["type"], "traffic-jam");
        assert_eq!(json["isActive"], true);
        assert_eq!(json["borderColor"], "#d97706");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_feature_collection() {
        let catalog = EventTypeCatalog::default();
        let mut event = incident("abc", EventType::LongQueue, true);
        event.description = Some("Around the block".into());
        let collection = to_feature_collection(&map_markers(&[event], &catalog));

        assert_eq!(collection.features.len(), 1);
        let json: JsonValue = serde_json::to_value(&collection).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        let feature = &json["features"][0];
        assert_eq!(feature["id"], "abc");
        assert_eq!(feature["geometry"]["coordinates"][0], -74.006);
        assert_eq!(feature["geometry"]["coordinates"][1], 40.7128);
        assert_eq!(feature["properties"]["title"], "Long Queue");
        assert_eq!(feature["properties"]["description"], "Around the block");
    }

    #[test]
    fn test_cards() {
        let catalog = EventTypeCatalog::default();
        let event = incident("1", EventType::PoliceActivity, true);
        let now = event.created_at.0 + 5 * MINUTE;

        let cards = incident_cards(std::slice::from_ref(&event), &catalog, now, None, false);
        assert_eq!(cards[0].title, "Police Activity");
        assert_eq!(cards[0].time_ago, "5 minutes ago");
        assert!(!cards[0].can_resolve);
        assert!(cards[0].distance_text.is_none());

        let origin = Coordinate::new(40.7128, -74.006).unwrap();
        let cards = incident_cards(&[event], &catalog, now, Some(origin), true);
        assert!(cards[0].can_resolve);
        assert_eq!(cards[0].distance_text.as_deref(), Some("0 m"));
    }

    #[test]
    fn test_haversine_known_distance() {
        let london = Coordinate::new(51.5074, -0.1278).unwrap();
        let paris = Coordinate::new(48.8566, 2.3522).unwrap();
        let distance = haversine_distance(london, paris);
        assert!((distance - 343_500.0).abs() < 2_000.0);
        assert!(format_distance(distance).ends_with(" km"));
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(12.4), "12 m");
        assert_eq!(format_distance(1_500.0), "1.5 km");
        assert_eq!(format_distance(f64::NAN), "Unknown");
    }
}
