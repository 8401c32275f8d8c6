//! File reference resolution over loosely-shaped backend records.
//!
//! Records from the store carry their model and thumbnail files under many
//! different field names, sometimes nested inside expanded relations or
//! arrays. The resolver walks a record depth-first, trying a prioritized
//! list of field names before scanning every other field, and classifies
//! the first string with an allowed extension as either a URL or a file
//! stored by the backend.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::backend::{has_file_identity, Record};

/// Nesting depth at which the walk gives up on a branch
const MAX_DEPTH: usize = 64;

/// Extensions and field names to look for
#[derive(Debug, Clone, Copy)]
pub struct FieldSet {
    pub extensions: &'static [&'static str],
    pub keys: &'static [&'static str],
}

pub const MODEL_EXTENSIONS: &[&str] = &[".glb", ".gltf", ".fbx"];

pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".svg"];

pub const MODEL_FIELD_KEYS: &[&str] = &[
    "url",
    "uri",
    "href",
    "file",
    "fileName",
    "filename",
    "files",
    "model",
    "modelFile",
    "model_file",
    "modelPath",
    "model_path",
    "modelUrl",
    "model_url",
    "asset",
    "assetFile",
    "asset_file",
    "assetPath",
    "asset_path",
    "assetUrl",
    "asset_url",
    "source",
    "path",
    "src",
    "downloadUrl",
    "download_url",
];

pub const IMAGE_FIELD_KEYS: &[&str] = &[
    "thumbnail",
    "thumbnailUrl",
    "thumbnail_url",
    "thumbnailFile",
    "thumbnail_file",
    "thumbnailPath",
    "thumbnail_path",
    "thumb",
    "thumbUrl",
    "thumb_url",
    "thumbFile",
    "thumb_file",
    "image",
    "imageUrl",
    "image_url",
    "imageFile",
    "image_file",
    "imagePath",
    "image_path",
    "icon",
    "iconUrl",
    "icon_url",
    "iconFile",
    "icon_file",
    "cover",
    "coverUrl",
    "cover_url",
    "preview",
    "previewUrl",
    "preview_url",
    "art",
    "artUrl",
    "art_url",
];

/// 3D model files
pub const MODEL_FIELDS: FieldSet = FieldSet {
    extensions: MODEL_EXTENSIONS,
    keys: MODEL_FIELD_KEYS,
};

/// Thumbnails and icons
pub const IMAGE_FIELDS: FieldSet = FieldSet {
    extensions: IMAGE_EXTENSIONS,
    keys: IMAGE_FIELD_KEYS,
};

/// How a file reference has to be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    /// Already fetchable as-is
    Url,
    /// A file name the backend resolves against its storage
    StoredFile,
}

/// A usable model or image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub kind: ReferenceKind,
    /// Trimmed original string
    pub raw_value: String,
    /// Last path segment, without query or fragment
    pub file_name: String,
}

impl FileReference {
    /// Classify a string, if it names a file with one of `extensions`
    pub fn parse(value: &str, extensions: &[&str]) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }

        let without_fragment = trimmed.split('#').next().unwrap_or_default();
        let without_query = without_fragment.split('?').next().unwrap_or_default();
        let lower = without_query.to_lowercase();

        if !extensions.iter().any(|ext| lower.ends_with(ext)) {
            return None;
        }

        let file_name = without_query.rsplit('/').next().unwrap_or_default();
        if file_name.is_empty() {
            return None;
        }

        let is_absolute = trimmed.starts_with("http://") || trimmed.starts_with("https://");
        let is_rooted = trimmed.starts_with('/') && !trimmed.starts_with("//");
        let has_separator = trimmed.contains('/');

        let kind = if is_absolute || is_rooted || has_separator {
            ReferenceKind::Url
        } else {
            ReferenceKind::StoredFile
        };

        Some(Self {
            kind,
            raw_value: trimmed.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

/// A reference together with the record that owns it.
///
/// The owner is the nearest enclosing record with file storage identity,
/// which is what the backend needs to build a URL for a stored file.
#[derive(Debug, Clone)]
pub struct Resolved<'a> {
    pub reference: FileReference,
    pub owner: Option<&'a Record>,
}

/// Resolve the first file reference inside `value`.
///
/// `context` is the record the value was taken from; it becomes the owner
/// unless a nested record with storage identity is found on the way down.
pub fn resolve<'a>(
    value: &'a Value,
    context: Option<&'a Record>,
    fields: &FieldSet,
) -> Option<Resolved<'a>> {
    Walker::new(fields).visit(value, context, 0)
}

/// Resolve the first file reference inside a record
pub fn resolve_record<'a>(record: &'a Record, fields: &FieldSet) -> Option<Resolved<'a>> {
    Walker::new(fields).visit_object(record, Some(record), 0)
}

struct Walker<'f> {
    fields: &'f FieldSet,
    /// Addresses of containers already walked
    visited: HashSet<usize>,
}

impl<'f> Walker<'f> {
    fn new(fields: &'f FieldSet) -> Self {
        Self {
            fields,
            visited: HashSet::new(),
        }
    }

    fn visit<'a>(
        &mut self,
        value: &'a Value,
        context: Option<&'a Record>,
        depth: usize,
    ) -> Option<Resolved<'a>> {
        match value {
            Value::String(s) => {
                let reference = FileReference::parse(s, self.fields.extensions)?;
                Some(Resolved {
                    reference,
                    owner: context.filter(|record| has_file_identity(record)),
                })
            }
            Value::Array(items) => {
                if !self.enter(items as *const Vec<Value> as usize, depth) {
                    return None;
                }
                items
                    .iter()
                    .find_map(|item| self.visit(item, context, depth + 1))
            }
            Value::Object(record) => self.visit_object(record, context, depth),
            _ => None,
        }
    }

    fn visit_object<'a>(
        &mut self,
        record: &'a Record,
        context: Option<&'a Record>,
        depth: usize,
    ) -> Option<Resolved<'a>> {
        if !self.enter(record as *const Record as usize, depth) {
            return None;
        }

        let context = if has_file_identity(record) {
            Some(record)
        } else {
            context
        };

        let fields = self.fields;
        for key in fields.keys {
            if let Some(child) = record.get(*key) {
                if let Some(resolved) = self.visit(child, context, depth + 1) {
                    return Some(resolved);
                }
            }
        }

        record
            .iter()
            .filter(|(key, _)| !fields.keys.contains(&key.as_str()))
            .find_map(|(_, child)| self.visit(child, context, depth + 1))
    }

    /// Mark a container as walked; false if it was seen or is too deep
    fn enter(&mut self, address: usize, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            tracing::debug!("File reference walk stopped at depth {}", depth);
            return false;
        }
        self.visited.insert(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_classification() {
        let r = FileReference::parse("  hat_x1.glb ", MODEL_EXTENSIONS).unwrap();
        assert_eq!(r.kind, ReferenceKind::StoredFile);
        assert_eq!(r.raw_value, "hat_x1.glb");
        assert_eq!(r.file_name, "hat_x1.glb");

        let r = FileReference::parse("https://cdn.example/m/Hat.GLB?v=2#top", MODEL_EXTENSIONS)
            .unwrap();
        assert_eq!(r.kind, ReferenceKind::Url);
        assert_eq!(r.file_name, "Hat.GLB");

        let r = FileReference::parse("//cdn.example/hat.glb", MODEL_EXTENSIONS).unwrap();
        assert_eq!(r.kind, ReferenceKind::Url);

        let r = FileReference::parse("/models/hat.gltf", MODEL_EXTENSIONS).unwrap();
        assert_eq!(r.kind, ReferenceKind::Url);

        let r = FileReference::parse("models/hat.fbx", MODEL_EXTENSIONS).unwrap();
        assert_eq!(r.kind, ReferenceKind::Url);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(FileReference::parse("", MODEL_EXTENSIONS).is_none());
        assert!(FileReference::parse("   ", MODEL_EXTENSIONS).is_none());
        assert!(FileReference::parse("hat.png", MODEL_EXTENSIONS).is_none());
        assert!(FileReference::parse("hat", MODEL_EXTENSIONS).is_none());
        assert!(FileReference::parse("hat.glb.txt", MODEL_EXTENSIONS).is_none());
    }

    #[test]
    fn test_prioritized_keys_before_scan() {
        let asset = record(json!({
            "id": "a1",
            "notes": "other.glb",
            "model": "main.glb",
        }));

        let resolved = resolve_record(&asset, &MODEL_FIELDS).unwrap();
        assert_eq!(resolved.reference.raw_value, "main.glb");
    }

    #[test]
    fn test_key_priority_order() {
        let asset = record(json!({
            "src": "third.glb",
            "file": "second.glb",
            "url": "https://x/first.glb",
        }));

        let resolved = resolve_record(&asset, &MODEL_FIELDS).unwrap();
        assert_eq!(resolved.reference.raw_value, "https://x/first.glb");
    }

    #[test]
    fn test_fallback_scan_in_document_order() {
        let asset = record(json!({
            "meta": { "variants": ["readme.txt", "nested/a.glb"] },
            "extra": "b.glb",
        }));

        let resolved = resolve_record(&asset, &MODEL_FIELDS).unwrap();
        assert_eq!(resolved.reference.raw_value, "nested/a.glb");
        assert_eq!(resolved.reference.kind, ReferenceKind::Url);
    }

    #[test]
    fn test_array_first_match() {
        let value = json!(["nope", { "file": "one.glb" }, "two.glb"]);
        let resolved = resolve(&value, None, &MODEL_FIELDS).unwrap();
        assert_eq!(resolved.reference.raw_value, "one.glb");
        assert!(resolved.owner.is_none());
    }

    #[test]
    fn test_owner_is_nearest_record_with_identity() {
        let asset = record(json!({
            "id": "a1",
            "collectionId": "assets",
            "expand": {
                "model": {
                    "id": "m9",
                    "collectionName": "models",
                    "file": "body.glb"
                }
            }
        }));

        let resolved = resolve_record(&asset, &MODEL_FIELDS).unwrap();
        let owner = resolved.owner.unwrap();
        assert_eq!(owner.get("id"), Some(&json!("m9")));

        let plain = record(json!({ "id": "a1", "collectionId": "assets", "file": "x.glb" }));
        let resolved = resolve_record(&plain, &MODEL_FIELDS).unwrap();
        assert_eq!(resolved.owner.unwrap().get("id"), Some(&json!("a1")));
    }

    #[test]
    fn test_no_owner_without_identity() {
        let asset = record(json!({ "id": "a1", "file": "x.glb" }));
        let resolved = resolve_record(&asset, &MODEL_FIELDS).unwrap();
        assert!(resolved.owner.is_none());
    }

    #[test]
    fn test_deep_nesting_terminates() {
        let mut value = json!({ "leaf": "deep.glb" });
        for _ in 0..200 {
            value = json!({ "next": value });
        }
        assert!(resolve(&value, None, &MODEL_FIELDS).is_none());

        let shallow = json!({ "a": { "b": { "c": "ok.glb" } } });
        assert!(resolve(&shallow, None, &MODEL_FIELDS).is_some());
    }

    #[test]
    fn test_scalars_resolve_to_none() {
        assert!(resolve(&json!(12), None, &MODEL_FIELDS).is_none());
        assert!(resolve(&json!(null), None, &MODEL_FIELDS).is_none());
        assert!(resolve(&json!({}), None, &IMAGE_FIELDS).is_none());
    }
}
