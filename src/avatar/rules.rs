//! Layer and lock rules over the customization state.
//!
//! Two kinds of exclusivity apply between categories:
//!
//! - **Layers**: assets (or their categories) tagged with the same layer
//!   identity occupy the same slot, so at most one of them may be equipped.
//! - **Locks**: an equipped asset may declare other categories as locked
//!   (bundled with it). Locks are advisory metadata for the UI and never
//!   clear a selection by themselves.
//!
//! Everything here is a pure function of the customization and the
//! category list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::catalog::{identifier_of, is_truthy, Asset, Category, LayerId};
use crate::backend::Record;

/// Field names that may carry a layer identity, in lookup order
pub const LAYER_KEYS: &[&str] = &[
    "layer",
    "layerId",
    "layer_id",
    "layerName",
    "layer_name",
    "layerKey",
    "layer_key",
    "layerGroup",
    "layer_group",
    "layerCategory",
    "layer_category",
    "layerSlug",
    "layer_slug",
];

/// What is equipped in one category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomizationEntry {
    pub asset: Option<Asset>,
    pub color: String,
}

/// Category name -> current selection
pub type Customization = BTreeMap<String, CustomizationEntry>;

/// One reason a category is locked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    /// Name of the asset holding the lock
    pub name: String,
    /// Category that asset is equipped in
    pub category_name: String,
}

/// Locked category name -> who locks it, in discovery order
pub type LockedGroups = BTreeMap<String, Vec<LockEntry>>;

/// Layer identities of a record: the first layer alias that yields any
fn layer_ids_from(record: &Record) -> Vec<LayerId> {
    let mut layers = Vec::new();

    for key in LAYER_KEYS {
        if let Some(value) = record.get(*key) {
            collect_layer_values(value, &mut layers);
            if !layers.is_empty() {
                return layers;
            }
        }
    }

    if let Some(expanded) = record.get("expand").and_then(|e| e.get("layer")) {
        collect_layer_values(expanded, &mut layers);
    }

    layers
}

fn collect_layer_values(value: &Value, out: &mut Vec<LayerId>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(LayerId::Text(s.clone())),
        Value::Number(n) => out.push(LayerId::Number(n.to_string())),
        Value::Array(items) => {
            for item in items {
                collect_layer_values(item, out);
            }
        }
        Value::Object(record) => {
            let key = ["id", "name", "slug"]
                .into_iter()
                .find_map(|key| record.get(key).filter(|v| is_truthy(v)));
            match key {
                Some(Value::String(s)) => out.push(LayerId::Text(s.clone())),
                Some(Value::Number(n)) => out.push(LayerId::Number(n.to_string())),
                _ => {}
            }
        }
        _ => {}
    }
}

/// Layer identities of an equipped asset; the category's own layer is the
/// fallback when the asset declares none
pub fn layer_ids(asset: &Asset, category: Option<&Category>) -> Vec<LayerId> {
    let layers = layer_ids_from(asset.record());
    if !layers.is_empty() {
        return layers;
    }
    category
        .map(|c| layer_ids_from(c.record()))
        .unwrap_or_default()
}

/// Normalize a whole customization so no two categories share a layer.
///
/// Categories are processed in order and the earlier one keeps its asset.
pub fn apply_layer_rules(customization: &Customization, categories: &[Category]) -> Customization {
    let mut updated = customization.clone();
    let mut claimed: HashMap<LayerId, &str> = HashMap::new();

    for category in categories {
        let Some(entry) = updated.get_mut(&category.name) else {
            continue;
        };
        let layers = match entry.asset.as_ref() {
            Some(asset) => layer_ids(asset, Some(category)),
            None => continue,
        };
        if layers.is_empty() {
            continue;
        }

        let keeper = layers.iter().find_map(|layer| {
            claimed
                .get(layer)
                .filter(|owner| **owner != category.name)
                .map(|owner| (layer, *owner))
        });

        if let Some((layer, owner)) = keeper {
            tracing::debug!(
                "Clearing {}: layer {} already taken by {}",
                category.name,
                layer,
                owner
            );
            entry.asset = None;
            continue;
        }

        for layer in layers {
            claimed.insert(layer, category.name.as_str());
        }
    }

    updated
}

/// Clear every other category whose asset shares a layer with a new
/// explicit selection in `target_category`.
pub fn clear_layer_conflicts(
    customization: &Customization,
    categories: &[Category],
    target_category: &str,
    target_layers: &[LayerId],
) -> Customization {
    let mut updated = customization.clone();
    if target_layers.is_empty() {
        return updated;
    }

    let wanted: HashSet<&LayerId> = target_layers.iter().collect();

    for category in categories {
        if category.name == target_category {
            continue;
        }
        let Some(entry) = updated.get_mut(&category.name) else {
            continue;
        };
        let conflicts = entry
            .asset
            .as_ref()
            .is_some_and(|asset| {
                layer_ids(asset, Some(category))
                    .iter()
                    .any(|layer| wanted.contains(layer))
            });

        if conflicts {
            tracing::debug!(
                "Clearing {}: conflicts with new selection in {}",
                category.name,
                target_category
            );
            entry.asset = None;
        }
    }

    updated
}

/// Derive which categories are locked by the equipped assets.
///
/// Entries are visited in category order, then any entries for names
/// outside the category list.
pub fn apply_locked_assets(customization: &Customization, categories: &[Category]) -> LockedGroups {
    let mut locked = LockedGroups::new();

    let ordered = categories
        .iter()
        .filter_map(|c| customization.get_key_value(&c.name))
        .chain(
            customization
                .iter()
                .filter(|(name, _)| !categories.iter().any(|c| &c.name == *name)),
        );

    for (category_name, entry) in ordered {
        let Some(asset) = entry.asset.as_ref() else {
            continue;
        };
        let Some(locked_groups) = asset.locked_groups() else {
            continue;
        };

        let locking_name = asset
            .group()
            .and_then(identifier_of)
            .and_then(|group| find_category_by_identifier(categories, &group))
            .or_else(|| categories.iter().find(|c| &c.name == category_name))
            .map(|c| c.name.as_str())
            .unwrap_or(category_name.as_str());

        let groups = match locked_groups {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            single => vec![single],
        };

        for group in groups {
            let Some(identifier) = resolve_group_identifier(group) else {
                continue;
            };
            let Some(target) = find_category_by_identifier(categories, &identifier) else {
                tracing::debug!("{} locks unknown group {}", asset.name(), identifier);
                continue;
            };
            if target.name == locking_name {
                continue;
            }

            let entries = locked.entry(target.name.clone()).or_default();
            let already = entries
                .iter()
                .any(|e| e.name == asset.name() && e.category_name == locking_name);
            if !already {
                entries.push(LockEntry {
                    name: asset.name().to_string(),
                    category_name: locking_name.to_string(),
                });
            }
        }
    }

    locked
}

/// Find a category by id, then name, then slug
pub fn find_category_by_identifier<'c>(
    categories: &'c [Category],
    identifier: &str,
) -> Option<&'c Category> {
    categories
        .iter()
        .find(|c| c.id == identifier)
        .or_else(|| categories.iter().find(|c| c.name == identifier))
        .or_else(|| {
            categories
                .iter()
                .find(|c| c.slug.as_deref() == Some(identifier))
        })
}

/// Reduce a locked-group reference to an identifier string
pub fn resolve_group_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(record) => ["id", "group", "name", "slug"]
            .into_iter()
            .find_map(|key| record.get(key).filter(|v| is_truthy(v)))
            .and_then(resolve_group_identifier),
        _ => None,
    }
}
