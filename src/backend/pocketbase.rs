//! PocketBase REST client

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{FileUrlBuilder, Record, RecordStore};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// Records requested per page when listing a collection
const PER_PAGE: usize = 500;

/// Client for a PocketBase-compatible record store
#[derive(Debug, Clone)]
pub struct PocketBaseClient {
    base_url: Url,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    items: Vec<Value>,
}

impl PocketBaseClient {
    /// Create a client from the backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let raw = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BackendError::InvalidUrl("no backend URL configured".to_string()))?;

        let base_url =
            Url::parse(raw).map_err(|e| BackendError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(raw.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::InvalidUrl(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self { base_url, http })
    }

    /// Base URL of the store
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, encoding each one
    fn endpoint<I>(&self, segments: I) -> Url
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl FileUrlBuilder for PocketBaseClient {
    fn file_url(&self, record: &Record, file_name: &str) -> Result<String, BackendError> {
        let non_empty = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        };

        let id = non_empty("id")
            .ok_or_else(|| BackendError::MissingFileIdentity("record has no id".to_string()))?;
        let collection = non_empty("collectionId")
            .or_else(|| non_empty("collectionName"))
            .ok_or_else(|| {
                BackendError::MissingFileIdentity(format!("record {} has no collection", id))
            })?;
        if file_name.is_empty() {
            return Err(BackendError::MissingFileIdentity(format!(
                "record {} has an empty file name",
                id
            )));
        }

        Ok(self
            .endpoint(["api", "files", collection, id, file_name])
            .to_string())
    }
}

impl RecordStore for PocketBaseClient {
    async fn list_records(
        &self,
        collection: &str,
        sort: &str,
        expand: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        let url = self.endpoint(["api", "collections", collection, "records"]);
        let request_error = |e: reqwest::Error| BackendError::Request {
            collection: collection.to_string(),
            message: e.to_string(),
        };

        let mut records = Vec::new();
        let mut page = 1usize;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("perPage", PER_PAGE.to_string()),
            ];
            if !sort.is_empty() {
                query.push(("sort", sort.to_string()));
            }
            if let Some(expand) = expand {
                query.push(("expand", expand.to_string()));
            }

            tracing::debug!("Listing {} page {}", collection, page);

            let response = self
                .http
                .get(url.clone())
                .query(&query)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(request_error)?;

            let body: ListPage = response.json().await.map_err(|e| BackendError::Response {
                collection: collection.to_string(),
                message: e.to_string(),
            })?;

            let count = body.items.len();
            records.extend(body.items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        tracing::info!("Fetched {} records from {}", records.len(), collection);
        Ok(records)
    }
}
