//! GLB export collaborator built on the `gltf` crate.
//!
//! Scenes arrive as GLB buffers (or files) produced by the renderer. The
//! document keeps the glTF JSON as a generic value next to the binary
//! chunk so the transforms in [`super::optimize`] can rewrite index
//! references and buffer data without a full typed model.

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::path::PathBuf;

use super::{optimize, ExportBackend, TransformOp};
use crate::error::ExportError;

/// A scene as the renderer hands it over
#[derive(Debug, Clone)]
pub enum GlbScene {
    /// An in-memory GLB buffer
    Bytes(Vec<u8>),
    /// A GLB file on disk
    File(PathBuf),
}

/// A parsed GLB: JSON chunk plus optional binary chunk
#[derive(Debug, Clone, PartialEq)]
pub struct GlbDocument {
    pub json: Value,
    pub bin: Option<Vec<u8>>,
}

impl GlbDocument {
    /// Parse a GLB container
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ExportError> {
        let glb = gltf::Glb::from_slice(bytes).map_err(|e| ExportError::Parse(e.to_string()))?;
        let json: Value =
            serde_json::from_slice(&glb.json).map_err(|e| ExportError::Parse(e.to_string()))?;
        if !json.is_object() {
            return Err(ExportError::Parse("glTF root is not an object".to_string()));
        }

        Ok(Self {
            json,
            bin: glb.bin.map(Cow::into_owned),
        })
    }

    /// Write the document as a GLB container
    pub fn to_vec(&self) -> Result<Vec<u8>, ExportError> {
        let json = serde_json::to_vec(&self.json).map_err(|e| ExportError::Serialize(e.to_string()))?;

        let glb = gltf::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                // recomputed by the writer
                length: 0,
            },
            json: Cow::Owned(json),
            bin: self.bin.as_deref().map(Cow::Borrowed),
        };

        glb.to_vec().map_err(|e| ExportError::Serialize(e.to_string()))
    }

    /// Number of entries in a top-level array such as `"materials"`
    pub fn count(&self, key: &str) -> usize {
        self.json
            .get(key)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// The JSON root and the binary chunk, borrowed together
    fn parts_mut(&mut self) -> Option<(&mut Map<String, Value>, &mut Option<Vec<u8>>)> {
        let root = self.json.as_object_mut()?;
        Some((root, &mut self.bin))
    }
}

/// Export collaborator for GLB scenes
#[derive(Debug, Clone, Default)]
pub struct GltfBackend;

impl GltfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExportBackend for GltfBackend {
    type Scene = GlbScene;
    type Document = GlbDocument;

    async fn export_binary(&self, scene: &GlbScene) -> Result<Vec<u8>, ExportError> {
        match scene {
            GlbScene::Bytes(bytes) => Ok(bytes.clone()),
            GlbScene::File(path) => tokio::fs::read(path)
                .await
                .map_err(|e| ExportError::Scene(format!("{}: {}", path.display(), e))),
        }
    }

    fn parse_binary(&self, bytes: &[u8]) -> Result<GlbDocument, ExportError> {
        GlbDocument::from_slice(bytes)
    }

    async fn transform(
        &self,
        mut document: GlbDocument,
        ops: &[TransformOp],
    ) -> Result<GlbDocument, ExportError> {
        for op in ops {
            let (root, bin) = document.parts_mut().ok_or_else(|| ExportError::Transform {
                op: op.to_string(),
                message: "glTF root is not an object".to_string(),
            })?;

            match op {
                TransformOp::Prune => {
                    let removed = optimize::prune(root, bin);
                    tracing::debug!("prune removed {} entries", removed);
                }
                TransformOp::Dedup => {
                    let merged = optimize::dedup(root, bin);
                    tracing::debug!("dedup merged {} entries", merged);
                }
                TransformOp::Compress => {
                    let narrowed = optimize::compress(root, bin);
                    tracing::debug!("compress narrowed {} index accessors", narrowed);
                }
                TransformOp::Quantize => {
                    let quantized = optimize::quantize(root, bin);
                    tracing::debug!("quantize rewrote {} attribute accessors", quantized);
                }
            }
        }
        Ok(document)
    }

    async fn serialize_binary(&self, document: GlbDocument) -> Result<Vec<u8>, ExportError> {
        document.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::optimize::fixture::{floats, u32s, Fixture};
    use crate::export::optimize::KHR_MESH_QUANTIZATION;
    use crate::export::OPTIMIZATION_SEQUENCE;
    use serde_json::json;

    fn sample() -> GlbDocument {
        GlbDocument {
            json: json!({
                "asset": { "version": "2.0" },
                "scenes": [{ "nodes": [0] }],
                "nodes": [{ "mesh": 1 }],
                "meshes": [
                    { "name": "orphan", "primitives": [{ "attributes": {}, "material": 0 }] },
                    { "name": "body", "primitives": [{ "attributes": {}, "material": 1 }] }
                ],
                "materials": [{ "name": "orphaned" }, { "name": "skin" }],
                "images": [{ "uri": "skin.png" }]
            }),
            bin: Some(vec![0, 1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_glb_round_trip_through_backend() {
        let backend = GltfBackend::new();
        let bytes = sample().to_vec().unwrap();
        assert_eq!(&bytes[..4], b"glTF");

        let exported = backend
            .export_binary(&GlbScene::Bytes(bytes))
            .await
            .unwrap();
        let doc = backend.parse_binary(&exported).unwrap();
        assert_eq!(doc.bin.as_deref(), Some(&[0u8, 1, 2, 3][..]));

        let doc = backend
            .transform(doc, &OPTIMIZATION_SEQUENCE)
            .await
            .unwrap();
        assert_eq!(doc.count("materials"), 1);
        assert_eq!(doc.count("images"), 0);
        // no buffer entry describes the chunk, so it is carried as is
        assert_eq!(doc.bin.as_deref(), Some(&[0u8, 1, 2, 3][..]));

        let written = backend.serialize_binary(doc).await.unwrap();
        let reparsed = GlbDocument::from_slice(&written).unwrap();
        assert_eq!(reparsed.count("meshes"), 1);
    }

    #[tokio::test]
    async fn test_optimization_sequence_shrinks_scene() {
        let mut fixture = Fixture::new(json!({
            "asset": { "version": "2.0" },
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "name": "body", "mesh": 0 }, { "name": "detached", "mesh": 1 }]
        }));
        let triangle: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let position = fixture.accessor(&floats(&triangle), 5126, "VEC3", 3, 34962);
        let normal = fixture.accessor(&floats(&[0.0f32, 0.0, 1.0].repeat(3)), 5126, "VEC3", 3, 34962);
        let index = fixture.accessor(&u32s(&[0, 1, 2]), 5125, "SCALAR", 3, 34963);
        let spare = fixture.accessor(&floats(&[0.5; 192]), 5126, "VEC3", 64, 34962);
        fixture.insert(
            "meshes",
            json!([
                { "primitives": [{ "attributes": { "POSITION": position, "NORMAL": normal }, "indices": index }] },
                { "primitives": [{ "attributes": { "POSITION": spare } }] }
            ]),
        );
        let (root, bin) = fixture.finish();
        let scene = GlbDocument {
            json: Value::Object(root),
            bin,
        };
        let original = scene.to_vec().unwrap();

        let backend = GltfBackend::new();
        let doc = backend.parse_binary(&original).unwrap();
        let doc = backend
            .transform(doc, &OPTIMIZATION_SEQUENCE)
            .await
            .unwrap();

        assert_eq!(doc.count("nodes"), 1);
        assert_eq!(doc.count("meshes"), 1);
        assert_eq!(doc.count("accessors"), 3);
        assert_eq!(doc.count("bufferViews"), 3);
        assert_eq!(doc.json["accessors"][2]["componentType"], json!(5123));
        assert_eq!(doc.json["accessors"][1]["componentType"], json!(5122));
        assert_eq!(doc.json["extensionsRequired"], json!([KHR_MESH_QUANTIZATION]));

        let written = backend.serialize_binary(doc).await.unwrap();
        assert!(written.len() < original.len());
        let reparsed = GlbDocument::from_slice(&written).unwrap();
        assert_eq!(
            reparsed.json["buffers"][0]["byteLength"],
            json!(reparsed.bin.as_ref().map_or(0, Vec::len))
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            GlbDocument::from_slice(b"not a glb at all"),
            Err(ExportError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_scene_file() {
        let backend = GltfBackend::new();
        let scene = GlbScene::File(PathBuf::from("/nonexistent/scene.glb"));
        assert!(matches!(
            backend.export_binary(&scene).await,
            Err(ExportError::Scene(_))
        ));
    }
}
