//! Reverse geocoding: coordinates to a display address.
//!
//! Address lookup is advisory. Every failure collapses to
//! [`UNKNOWN_LOCATION`]; callers never see an error and nothing is retried.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::GeocoderConfig;
use crate::model::Coordinate;

pub const UNKNOWN_LOCATION: &str = "Unknown location";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("invalid geocoder endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("response has no display name")]
    MissingAddress,
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Display address for `coordinate`, or [`UNKNOWN_LOCATION`].
    async fn resolve(&self, coordinate: Coordinate) -> String;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    display_name: Option<String>,
}

fn parse_display_name(body: &[u8]) -> Result<String, GeocodeError> {
    let response: ReverseResponse = serde_json::from_slice(body)?;
    response
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or(GeocodeError::MissingAddress)
}

/// Nominatim-compatible `/reverse?lat=..&lon=..&format=json` client.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: Url,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let base_url = validate_endpoint(&config.base_url)?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, base_url })
    }

    fn reverse_url(&self, coordinate: Coordinate) -> Result<Url, GeocodeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GeocodeError::InvalidEndpoint {
                url: self.base_url.to_string(),
                reason: "URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push("reverse");
        url.query_pairs_mut()
            .append_pair("lat", &coordinate.lat().to_string())
            .append_pair("lon", &coordinate.lng().to_string())
            .append_pair("format", "json");
        Ok(url)
    }

    /// One lookup attempt, with the failure class preserved.
    #[instrument(skip_all, fields(coordinate = %coordinate))]
    pub async fn try_resolve(&self, coordinate: Coordinate) -> Result<String, GeocodeError> {
        let url = self.reverse_url(coordinate)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_display_name(&body)
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn resolve(&self, coordinate: Coordinate) -> String {
        match self.try_resolve(coordinate).await {
            Ok(address) => {
                debug!(%address, "address resolved");
                address
            }
            Err(e) => {
                warn!(error = %e, "reverse geocoding failed, using placeholder");
                UNKNOWN_LOCATION.to_string()
            }
        }
    }
}

fn validate_endpoint(raw: &str) -> Result<Url, GeocodeError> {
    let invalid = |reason: String| GeocodeError::InvalidEndpoint {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!(
            "invalid scheme '{}', only 'http' and 'https' are allowed",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(invalid("URL must have a host".to_string()));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("URL cannot be a base".to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: &str) -> GeocoderConfig {
        GeocoderConfig {
            base_url: base_url.to_string(),
            ..GeocoderConfig::default()
        }
    }

    /// Serves exactly one canned response and hands back the request head.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
                if n == 0 || head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&head).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_parse_display_name() {
        assert_eq!(
            parse_display_name(br#"{"display_name":"5th Ave, NY","lat":"40.7"}"#).unwrap(),
            "5th Ave, NY"
        );
        assert!(matches!(
            parse_display_name(br#"{"error":"Unable to geocode"}"#),
            Err(GeocodeError::MissingAddress)
        ));
        assert!(matches!(
            parse_display_name(br#"{"display_name":"   "}"#),
            Err(GeocodeError::MissingAddress)
        ));
        assert!(matches!(
            parse_display_name(b"<html>"),
            Err(GeocodeError::Parse(_))
        ));
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(NominatimGeocoder::new(&config("https://nominatim.openstreetmap.org")).is_ok());
        assert!(NominatimGeocoder::new(&config("ftp://example.com")).is_err());
        assert!(NominatimGeocoder::new(&config("not a url")).is_err());
        assert!(NominatimGeocoder::new(&config("mailto:someone@example.com")).is_err());
    }

    #[test]
    fn test_reverse_url_shape() {
        let geocoder = NominatimGeocoder::new(&config("https://geo.example.com/api/")).unwrap();
        let url = geocoder
            .reverse_url(Coordinate::new(40.71, -74.0).unwrap())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://geo.example.com/api/reverse?lat=40.71&lon=-74&format=json"
        );
    }

    #[tokio::test]
    async fn test_resolves_display_name() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"display_name":"5th Ave, NY"}"#).await;
        let geocoder = NominatimGeocoder::new(&config(&base)).unwrap();

        let address = geocoder
            .resolve(Coordinate::new(40.71, -74.0).unwrap())
            .await;
        assert_eq!(address, "5th Ave, NY");

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /reverse?lat=40.71&lon=-74&format=json"));
    }

    #[tokio::test]
    async fn test_http_error_is_classified() {
        let (base, _server) = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
        let geocoder = NominatimGeocoder::new(&config(&base)).unwrap();

        let coordinate = Coordinate::new(1.0, 2.0).unwrap();
        assert!(matches!(
            geocoder.try_resolve(coordinate).await,
            Err(GeocodeError::Status(503))
        ));
    }

    #[tokio::test]
    async fn test_connection_failure_degrades_to_placeholder() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let geocoder = NominatimGeocoder::new(&config(&format!("http://{addr}"))).unwrap();
        let address = geocoder.resolve(Coordinate::new(1.0, 2.0).unwrap()).await;
        assert_eq!(address, UNKNOWN_LOCATION);
    }
}
