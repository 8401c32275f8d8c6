//! Categories and assets as they come out of the record store

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Record;

/// A selectable item belonging to one category.
///
/// Backend records are loosely shaped, so the raw record is kept whole and
/// the known fields are read through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset {
    record: Record,
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Asset {
    /// Wrap a backend record
    pub fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// Wrap a JSON value, if it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(record) => Some(Self::from_record(record)),
            _ => None,
        }
    }

    pub fn id(&self) -> &str {
        self.str_field("id").unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.str_field("name").unwrap_or_default()
    }

    /// The category this asset declares it belongs to (id or expanded record)
    pub fn group(&self) -> Option<&Value> {
        self.record.get("group").filter(|v| !v.is_null())
    }

    /// Optional asset type, e.g. `"avatar"` for base bodies
    pub fn asset_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn is_default(&self) -> bool {
        self.record.get("isDefault").is_some_and(is_truthy)
    }

    /// Categories this asset locks while equipped (single id, record, or list)
    pub fn locked_groups(&self) -> Option<&Value> {
        self.record.get("lockedGroups").filter(|v| is_truthy(v))
    }

    /// Raw field access
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.record.get(key)
    }

    /// The underlying backend record
    pub fn record(&self) -> &Record {
        &self.record
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.record.get(key).and_then(Value::as_str)
    }
}

/// A named customization slot (e.g. "Head", "Top")
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub position: f64,
    /// Whether the slot may be left empty
    pub removable: bool,
    /// Asset id equipped on first load
    pub starting_asset: Option<String>,
    /// Colours offered for this slot, from the expanded palette relation
    pub color_palette: Vec<String>,
    /// Assets whose `group` is this category
    pub assets: Vec<Asset>,
    #[serde(skip)]
    record: Record,
}

impl Category {
    /// Build a category from a backend record
    pub fn from_record(record: Record) -> Self {
        let text = |key: &str| record.get(key).and_then(identifier_of).filter(|s| !s.is_empty());

        let color_palette = record
            .get("expand")
            .and_then(|e| e.get("colorPalette"))
            .and_then(|p| p.get("colors"))
            .and_then(Value::as_array)
            .map(|colors| {
                colors
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: text("id").unwrap_or_default(),
            name: text("name").unwrap_or_default(),
            slug: text("slug"),
            position: record.get("position").and_then(Value::as_f64).unwrap_or(0.0),
            removable: record.get("removable").is_some_and(is_truthy),
            starting_asset: text("startingAsset"),
            color_palette,
            assets: Vec::new(),
            record,
        }
    }

    /// Build a category from a JSON value, if it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(record) => Some(Self::from_record(record)),
            _ => None,
        }
    }

    /// The underlying backend record
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Pick the asset equipped when nothing has been chosen yet.
    ///
    /// Order: explicit starting asset, then an asset flagged default, then an
    /// avatar base, then the first asset for slots that cannot be empty.
    pub fn default_asset(&self) -> Option<&Asset> {
        self.starting_asset
            .as_deref()
            .and_then(|id| self.assets.iter().find(|a| a.id() == id))
            .or_else(|| self.assets.iter().find(|a| a.is_default()))
            .or_else(|| self.assets.iter().find(|a| a.asset_type() == Some("avatar")))
            .or_else(|| {
                if self.removable {
                    None
                } else {
                    self.assets.first()
                }
            })
    }

    /// Default colour: the first palette entry, or empty
    pub fn default_color(&self) -> String {
        self.color_palette.first().cloned().unwrap_or_default()
    }
}

/// An exclusivity tag shared by assets/categories.
///
/// Text and numeric tags never compare equal, so `"1"` and `1` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum LayerId {
    Text(String),
    Number(String),
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerId::Text(s) | LayerId::Number(s) => write!(f, "{}", s),
        }
    }
}

/// JSON truthiness: null, false, 0 and "" are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of a scalar identifier
pub(crate) fn identifier_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn category(value: Value) -> Category {
        Category::from_value(value).unwrap()
    }

    fn asset(value: Value) -> Asset {
        Asset::from_value(value).unwrap()
    }

    #[test]
    fn test_category_fields() {
        let c = category(json!({
            "id": "c1",
            "name": "Hair",
            "position": 3,
            "removable": true,
            "startingAsset": "",
            "expand": { "colorPalette": { "colors": ["#111", "#222"] } }
        }));

        assert_eq!(c.id, "c1");
        assert_eq!(c.name, "Hair");
        assert_eq!(c.position, 3.0);
        assert!(c.removable);
        assert!(c.starting_asset.is_none());
        assert_eq!(c.default_color(), "#111");
    }

    #[test]
    fn test_starting_asset_beats_default_flag() {
        let mut c = category(json!({ "id": "c", "name": "Top", "startingAsset": "x" }));
        c.assets = vec![
            asset(json!({ "id": "d", "name": "Flagged", "isDefault": true })),
            asset(json!({ "id": "x", "name": "Starter" })),
        ];

        assert_eq!(c.default_asset().map(Asset::id), Some("x"));
    }

    #[test]
    fn test_default_asset_fallbacks() {
        let mut c = category(json!({ "id": "c", "name": "Body", "removable": true }));
        c.assets = vec![
            asset(json!({ "id": "a", "name": "A" })),
            asset(json!({ "id": "b", "name": "B", "type": "avatar" })),
        ];
        assert_eq!(c.default_asset().map(Asset::id), Some("b"));

        c.assets.truncate(1);
        assert!(c.default_asset().is_none());

        c.removable = false;
        assert_eq!(c.default_asset().map(Asset::id), Some("a"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!(2)));
    }

    #[test]
    fn test_assets_compare_by_id() {
        let a = asset(json!({ "id": "1", "name": "Hat" }));
        let b = asset(json!({ "id": "1", "name": "Renamed" }));
        assert_eq!(a, b);
        assert!(a.locked_groups().is_none());
    }
}
