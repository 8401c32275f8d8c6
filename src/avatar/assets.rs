//! Asset URL resolution and presentation hints

use serde_json::Value;

use super::catalog::{is_truthy, Asset};
use super::resolver::{self, FieldSet, ReferenceKind, IMAGE_FIELDS, MODEL_FIELDS};
use crate::backend::{has_file_identity, FileUrlBuilder, Record};

/// Where to look for an icon class when the asset is equipped
const ICON_ACTIVE_CANDIDATES: &[&[&str]] = &[
    &["icons", "active"],
    &["iconActive"],
    &["activeIcon"],
    &["icon_active"],
    &["active_icon"],
    &["iconActiveClass"],
    &["activeIconClass"],
];

const ICON_INACTIVE_CANDIDATES: &[&[&str]] = &[
    &["icons", "inactive"],
    &["iconInactive"],
    &["inactiveIcon"],
    &["icon_inactive"],
    &["inactive_icon"],
    &["iconInactiveClass"],
    &["inactiveIconClass"],
];

const LABEL_ACTIVE_CANDIDATES: &[&[&str]] = &[
    &["labels", "active"],
    &["labelActive"],
    &["activeLabel"],
    &["label_active"],
    &["active_label"],
];

const LABEL_INACTIVE_CANDIDATES: &[&[&str]] = &[
    &["labels", "inactive"],
    &["labelInactive"],
    &["inactiveLabel"],
    &["label_inactive"],
    &["inactive_label"],
];

/// Flags marking an asset as bundled with something else
const LOCKED_FLAG_FIELDS: &[&str] = &["locked", "isLocked", "pinned", "isPinned", "bundled", "isBundled"];

/// Sub-values most likely to hold a thumbnail, tried before a full scan
const THUMBNAIL_SOURCES: &[&[&str]] = &[
    &["thumbnail"],
    &["thumb"],
    &["image"],
    &["icons", "inactive"],
    &["icons", "active"],
];

pub const DEFAULT_ACTIVE_ICON: &str = "bi-check2-circle";
pub const DEFAULT_INACTIVE_ICON: &str = "bi-plus-circle";
pub const DEFAULT_LOCKED_ICON: &str = "bi-pin-angle-fill";

pub const DEFAULT_ACTIVE_LABEL: &str = "Equipped";
pub const DEFAULT_INACTIVE_LABEL: &str = "Tap to equip";
pub const DEFAULT_LOCKED_LABEL: &str = "Bundled";

/// Turns file references found in asset records into fetchable URLs
#[derive(Debug, Clone, Copy)]
pub struct AssetUrlService<'b, B: ?Sized> {
    backend: &'b B,
}

impl<'b, B: FileUrlBuilder + ?Sized> AssetUrlService<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// URL of the asset's 3D model
    pub fn model_url(&self, asset: &Asset) -> Option<String> {
        self.record_url(asset.record(), &MODEL_FIELDS)
    }

    /// URL of the asset's thumbnail image
    pub fn thumbnail_url(&self, asset: &Asset) -> Option<String> {
        let record = asset.record();

        THUMBNAIL_SOURCES
            .iter()
            .find_map(|path| match value_at_path(record, path) {
                Some(source) if !source.is_null() => self.file_url(record, source, &IMAGE_FIELDS),
                _ => self.record_url(record, &IMAGE_FIELDS),
            })
            .or_else(|| self.record_url(record, &IMAGE_FIELDS))
    }

    /// URL of the first file inside `value`, which was taken from `record`.
    ///
    /// Never fails: a backend that cannot build the URL degrades to the raw
    /// reference.
    pub fn file_url(&self, record: &Record, value: &Value, fields: &FieldSet) -> Option<String> {
        let resolved = resolver::resolve(value, Some(record), fields)?;
        self.finish(record, resolved)
    }

    fn record_url(&self, record: &Record, fields: &FieldSet) -> Option<String> {
        let resolved = resolver::resolve_record(record, fields)?;
        self.finish(record, resolved)
    }

    fn finish(&self, record: &Record, resolved: resolver::Resolved<'_>) -> Option<String> {
        let reference = resolved.reference;

        if reference.kind == ReferenceKind::Url {
            return Some(reference.raw_value);
        }

        let owner = resolved
            .owner
            .or_else(|| has_file_identity(record).then_some(record));

        if let Some(owner) = owner {
            match self.backend.file_url(owner, &reference.file_name) {
                Ok(url) => return Some(url),
                Err(e) => {
                    tracing::warn!(
                        record = ?record.get("id"),
                        file = %reference.file_name,
                        "Unable to resolve asset URL from backend: {}",
                        e
                    );
                }
            }
        }

        Some(reference.raw_value).filter(|raw| !raw.is_empty())
    }
}

/// Whether the asset is flagged as locked, pinned or bundled
pub fn is_asset_locked(asset: &Asset) -> bool {
    LOCKED_FLAG_FIELDS
        .iter()
        .any(|field| asset.get(field).is_some_and(is_truthy))
}

/// Icon class to show for the asset
pub fn asset_icon(asset: &Asset, active: bool) -> String {
    let candidates = if active {
        ICON_ACTIVE_CANDIDATES
    } else {
        ICON_INACTIVE_CANDIDATES
    };

    pick_first_string(asset.record(), candidates).unwrap_or_else(|| {
        if is_asset_locked(asset) {
            DEFAULT_LOCKED_ICON.to_string()
        } else if active {
            DEFAULT_ACTIVE_ICON.to_string()
        } else {
            DEFAULT_INACTIVE_ICON.to_string()
        }
    })
}

/// Label to show for the asset
pub fn asset_label(asset: &Asset, active: bool) -> String {
    let candidates = if active {
        LABEL_ACTIVE_CANDIDATES
    } else {
        LABEL_INACTIVE_CANDIDATES
    };

    pick_first_string(asset.record(), candidates).unwrap_or_else(|| {
        if is_asset_locked(asset) {
            DEFAULT_LOCKED_LABEL.to_string()
        } else if active {
            DEFAULT_ACTIVE_LABEL.to_string()
        } else {
            DEFAULT_INACTIVE_LABEL.to_string()
        }
    })
}

fn value_at_path<'a>(record: &'a Record, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(record.get(*first)?, |current, segment| current.get(*segment))
}

fn pick_first_string(record: &Record, candidates: &[&[&str]]) -> Option<String> {
    candidates.iter().find_map(|path| {
        value_at_path(record, path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}
