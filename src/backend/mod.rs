//! Record store collaborators
//!
//! Categories and assets live in a remote record store. The store is a
//! trait so the customization engine can run against the PocketBase REST
//! API or an in-memory fixture set.

pub mod memory;
pub mod pocketbase;

pub use memory::MemoryRecordStore;
pub use pocketbase::PocketBaseClient;

use serde_json::Value;
use std::future::Future;

use crate::error::BackendError;

/// A backend record: a JSON object in document order
pub type Record = serde_json::Map<String, Value>;

/// Builds fetchable URLs for files kept in the backend's storage
pub trait FileUrlBuilder {
    /// URL of `file_name` attached to `record`
    fn file_url(&self, record: &Record, file_name: &str) -> Result<String, BackendError>;
}

/// A queryable record store
pub trait RecordStore: FileUrlBuilder + Send + Sync {
    /// Every record of `collection`, ordered by `sort` (`+field` / `-field`,
    /// comma separated), with the relations named in `expand` inlined
    fn list_records(
        &self,
        collection: &str,
        sort: &str,
        expand: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Value>, BackendError>> + Send;
}

/// Whether a record carries the identity the backend needs to locate its files
pub fn has_file_identity(record: &Record) -> bool {
    record.contains_key("collectionId") || record.contains_key("collectionName")
}
