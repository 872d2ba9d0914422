//! External device catalog: where each reader/antenna sits

use crate::domain::types::DeviceEntry;
use crate::infra::error::EngineError;
use async_trait::async_trait;
use std::time::Duration;

/// Source of location → facility mappings
#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    async fn fetch(&self) -> Result<Vec<DeviceEntry>, EngineError>;
}

/// Catalog served as a JSON array of `{"locationId", "facilityId", "kind"}`
pub struct HttpDeviceCatalog {
    url: String,
    client: reqwest::Client,
}

impl HttpDeviceCatalog {
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { url: url.to_string(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeviceCatalog for HttpDeviceCatalog {
    async fn fetch(&self) -> Result<Vec<DeviceEntry>, EngineError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::CatalogStatus(status.as_u16()));
        }
        Ok(response.json::<Vec<DeviceEntry>>().await?)
    }
}

/// Fixed catalog, used when entries come from configuration only
pub struct StaticDeviceCatalog {
    entries: Vec<DeviceEntry>,
}

impl StaticDeviceCatalog {
    pub fn new(entries: Vec<DeviceEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl DeviceCatalog for StaticDeviceCatalog {
    async fn fetch(&self) -> Result<Vec<DeviceEntry>, EngineError> {
        Ok(self.entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LocationKind;

    #[tokio::test]
    async fn test_static_catalog_returns_entries() {
        let catalog = StaticDeviceCatalog::new(vec![DeviceEntry {
            location_id: "L1".to_string(),
            facility_id: "Front".to_string(),
            kind: LocationKind::Exit,
        }]);
        let entries = catalog.fetch().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LocationKind::Exit);
    }

    #[tokio::test]
    async fn test_http_catalog_unreachable_is_error() {
        let catalog = HttpDeviceCatalog::new("http://127.0.0.1:1/devices", 200).unwrap();
        let err = catalog.fetch().await.unwrap_err();
        assert_eq!(err.code(), "catalog_unavailable");
    }
}
