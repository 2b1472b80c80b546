//! Device listing fetches and their normalization into [`Device`] records.

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::Error;
use super::Result;
use super::client::ApiTransport;
use super::client::Method;
use super::model::Device;
use super::model::DeviceMap;

pub const DEVICES_PATH: &str = "/v1/devices";

/// Where the polling coordinator gets device listings from.
#[async_trait]
pub trait DeviceSource: Send + Sync + 'static {
    async fn fetch_devices(&self, language: &str) -> Result<DeviceMap>;
}

/// Fetches the full device listing over an [`ApiTransport`].
pub struct SnapshotFetcher<T> {
    transport: T,
}

impl<T: ApiTransport> SnapshotFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn fetch(&self, language: &str) -> Result<DeviceMap> {
        let response = self
            .transport
            .request(Method::Get, DEVICES_PATH, &[("language", language)], None)
            .await?;

        match response.status {
            200 => {}
            401 => return Err(Error::AuthExpired),
            status => {
                return Err(Error::FetchFailed {
                    status,
                    body: response.text(),
                });
            }
        }

        let listing: Map<String, Value> = response
            .json()
            .map_err(|e| Error::Decode(e.to_string()))?;
        Ok(normalize(listing))
    }
}

#[async_trait]
impl<T: ApiTransport + 'static> DeviceSource for SnapshotFetcher<T> {
    async fn fetch_devices(&self, language: &str) -> Result<DeviceMap> {
        self.fetch(language).await
    }
}

/// Normalize every listing entry, skipping those whose identity can't be parsed.
pub fn normalize(listing: Map<String, Value>) -> DeviceMap {
    let mut devices = DeviceMap::new();
    for (key, raw) in listing {
        match Device::from_raw(&key, raw) {
            Ok(device) => {
                debug!(
                    "Device {} (type {}) has {} state facets",
                    device.device_id,
                    device.hardware_type,
                    device.state.len()
                );
                devices.insert(device.device_id.clone(), device);
            }
            Err(e) => warn!("Skipping device {}: unparsable ident block: {}", key, e),
        }
    }
    devices
}

/// Scripted device source for coordinator and integration tests.
///
/// `calls` counts fetches that got past the optional gate.
#[cfg(test)]
pub struct MockSource {
    results: std::sync::Mutex<std::collections::VecDeque<Result<DeviceMap>>>,
    pub calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    gate: Option<std::sync::Arc<tokio::sync::Semaphore>>,
}

#[cfg(test)]
impl MockSource {
    pub fn new(results: Vec<Result<DeviceMap>>) -> Self {
        Self {
            results: std::sync::Mutex::new(results.into()),
            calls: Default::default(),
            gate: None,
        }
    }

    /// Each fetch waits for one permit on `gate` before answering.
    pub fn gated(
        gate: std::sync::Arc<tokio::sync::Semaphore>,
        results: Vec<Result<DeviceMap>>,
    ) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(results)
        }
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceSource for MockSource {
    async fn fetch_devices(&self, _language: &str) -> Result<DeviceMap> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("no scripted result".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::integrations::miele::client::MockTransport;
    use crate::integrations::miele::model::fixtures;

    #[tokio::test]
    async fn test_fetch_normalizes_listing() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(
            200,
            json!({"000123": fixtures::washer_json(5), "000456": fixtures::hood_json()}),
        );

        let fetcher = SnapshotFetcher::new(mock.clone());
        let devices = fetcher.fetch("de").await.unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices["000123"].hardware_type, 1);
        assert_eq!(devices["000456"].name, "Kitchen hood");

        let requests = mock.requests();
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "/v1/devices");
        assert_eq!(
            requests[0].query,
            vec![("language".to_string(), "de".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unparsable_device_is_skipped() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(
            200,
            json!({"000123": fixtures::washer_json(5), "broken": {"state": {}}}),
        );

        let devices = SnapshotFetcher::new(mock).fetch("en").await.unwrap();
        assert_eq!(devices.keys().collect::<Vec<_>>(), vec!["000123"]);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let mock = Arc::new(MockTransport::new());
        mock.push_status(401, "");
        mock.push_status(503, "maintenance");
        mock.push_status(200, "<html>");
        mock.push_error(Error::Transport("connection reset".to_string()));
        let fetcher = SnapshotFetcher::new(mock);

        assert_eq!(fetcher.fetch("en").await.unwrap_err(), Error::AuthExpired);
        assert_eq!(
            fetcher.fetch("en").await.unwrap_err(),
            Error::FetchFailed {
                status: 503,
                body: "maintenance".to_string()
            }
        );
        assert!(matches!(
            fetcher.fetch("en").await.unwrap_err(),
            Error::Decode(_)
        ));
        assert_eq!(
            fetcher.fetch("en").await.unwrap_err(),
            Error::Transport("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(200, json!({}));
        assert!(SnapshotFetcher::new(mock).fetch("en").await.unwrap().is_empty());
    }
}
