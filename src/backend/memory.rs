//! In-memory record store, loaded from JSON fixtures

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use super::{FileUrlBuilder, Record, RecordStore};
use crate::error::BackendError;

/// Record store holding whole collections in memory.
///
/// Records are expected to be stored already expanded, so `expand` is
/// ignored. File URLs follow the same `/api/files/...` layout as the REST
/// backend, rooted at `base_url`.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    base_url: String,
    collections: HashMap<String, Vec<Value>>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collections: HashMap::new(),
        }
    }

    /// Add or replace a collection
    pub fn with_collection(mut self, name: &str, records: Vec<Value>) -> Self {
        self.collections.insert(name.to_string(), records);
        self
    }

    /// Load collections from a JSON file shaped `{ "<collection>": [records] }`
    pub fn from_file<P: AsRef<Path>>(path: P, base_url: &str) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BackendError::Fixture(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents, base_url)
    }

    /// Parse collections from a JSON document shaped `{ "<collection>": [records] }`
    pub fn from_json(json: &str, base_url: &str) -> Result<Self, BackendError> {
        let collections: HashMap<String, Vec<Value>> =
            serde_json::from_str(json).map_err(|e| BackendError::Fixture(e.to_string()))?;

        let mut store = Self::new(base_url);
        store.collections = collections;
        Ok(store)
    }
}

impl FileUrlBuilder for MemoryRecordStore {
    fn file_url(&self, record: &Record, file_name: &str) -> Result<String, BackendError> {
        let text = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        };

        match (text("collectionId").or_else(|| text("collectionName")), text("id")) {
            (Some(collection), Some(id)) if !file_name.is_empty() => Ok(format!(
                "{}/api/files/{}/{}/{}",
                self.base_url, collection, id, file_name
            )),
            _ => Err(BackendError::MissingFileIdentity(format!(
                "{} has no collection/id",
                file_name
            ))),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    async fn list_records(
        &self,
        collection: &str,
        sort: &str,
        _expand: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        let mut records = self
            .collections
            .get(collection)
            .cloned()
            .ok_or_else(|| BackendError::Request {
                collection: collection.to_string(),
                message: "unknown collection".to_string(),
            })?;

        let keys: Vec<(&str, bool)> = sort
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| match k.strip_prefix('-') {
                Some(field) => (field, true),
                None => (k.trim_start_matches('+'), false),
            })
            .collect();

        if !keys.is_empty() {
            records.sort_by(|a, b| {
                keys.iter()
                    .map(|(field, descending)| {
                        let order = compare_fields(a.get(*field), b.get(*field));
                        if *descending {
                            order.reverse()
                        } else {
                            order
                        }
                    })
                    .find(|order| *order != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        Ok(records)
    }
}

/// Order two field values: missing first, then numbers, then strings
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => rank(x).cmp(&rank(y)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
