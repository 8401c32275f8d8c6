//! Avatar Configurator - customization state for 3D avatars
//!
//! A Rust library for building avatar customizers on top of a record
//! backend:
//! - Loads customization categories and assets from PocketBase
//! - Resolves model and thumbnail file references in loosely shaped records
//! - Keeps the selection consistent with layer and bundled-asset rules
//! - Exports the assembled scene as an optimized GLB

pub mod avatar;
pub mod backend;
pub mod config;
pub mod error;
pub mod export;

pub use avatar::{CustomizationStore, Snapshot};
pub use backend::{MemoryRecordStore, PocketBaseClient, RecordStore};
pub use config::Config;
pub use error::{ConfiguratorError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
