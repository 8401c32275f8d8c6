//! Avatar customization module
//!
//! Catalog types, file reference resolution, layer and lock rules, and the
//! store that ties them together.

pub mod assets;
pub mod catalog;
pub mod resolver;
pub mod rules;
pub mod state;
pub mod store;

pub use assets::{asset_icon, asset_label, is_asset_locked, AssetUrlService};
pub use catalog::{Asset, Category, LayerId};
pub use rules::{Customization, CustomizationEntry, LockEntry, LockedGroups};
pub use state::{Pose, SkinTone, Stage, UiMode};
pub use store::{CustomizationStore, PendingDownload, SceneCapabilities, Snapshot};
