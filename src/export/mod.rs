//! Model export pipeline
//!
//! Turns the live scene into a downloadable GLB: the scene is serialized by
//! the rendering collaborator, parsed into a document, optimized with a
//! fixed sequence of transforms, written back out and packaged as a file.

pub mod glb;
pub mod optimize;
pub mod service;

pub use glb::{GlbDocument, GlbScene, GltfBackend};
pub use service::{DownloadRequest, ExportService};

use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::ExportError;

/// MIME type of exported models
pub const EXPORT_MIME_TYPE: &str = "application/octet-stream";

/// Document optimizations, applied in [`OPTIMIZATION_SEQUENCE`] order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOp {
    /// Remove unused nodes, textures and other data
    Prune,
    /// Merge duplicate vertex or texture data
    Dedup,
    /// Narrow index buffers to 16 bits
    Compress,
    /// Store vertex attributes as normalized integers
    Quantize,
}

impl std::fmt::Display for TransformOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformOp::Prune => write!(f, "prune"),
            TransformOp::Dedup => write!(f, "dedup"),
            TransformOp::Compress => write!(f, "compress"),
            TransformOp::Quantize => write!(f, "quantize"),
        }
    }
}

pub const OPTIMIZATION_SEQUENCE: [TransformOp; 4] = [
    TransformOp::Prune,
    TransformOp::Dedup,
    TransformOp::Compress,
    TransformOp::Quantize,
];

/// The rendering/export collaborator
pub trait ExportBackend: Send + Sync {
    /// Live scene handle
    type Scene: Sync;
    /// In-memory document model
    type Document: Send;

    /// Serialize the scene to a binary interchange buffer
    fn export_binary(
        &self,
        scene: &Self::Scene,
    ) -> impl Future<Output = Result<Vec<u8>, ExportError>> + Send;

    /// Parse a binary buffer into a document
    fn parse_binary(&self, bytes: &[u8]) -> Result<Self::Document, ExportError>;

    /// Apply `ops` to the document, in order
    fn transform(
        &self,
        document: Self::Document,
        ops: &[TransformOp],
    ) -> impl Future<Output = Result<Self::Document, ExportError>> + Send;

    /// Write a document back to a binary buffer
    fn serialize_binary(
        &self,
        document: Self::Document,
    ) -> impl Future<Output = Result<Vec<u8>, ExportError>> + Send;
}

/// A finished export, ready to be saved
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    /// Write the artifact into `dir`, returning the file path
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ExportError::Save(format!("{}: {}", dir.display(), e)))?;

        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.bytes)
            .await
            .map_err(|e| ExportError::Save(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Saved {} ({} bytes)", path.display(), self.bytes.len());
        Ok(path)
    }
}

/// Runs exports against a backend, one at a time
pub struct ExportPipeline<B> {
    backend: B,
    file_prefix: String,
    in_flight: Mutex<()>,
}

impl<B: ExportBackend> ExportPipeline<B> {
    pub fn new(backend: B, file_prefix: &str) -> Self {
        Self {
            backend,
            file_prefix: file_prefix.to_string(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Export the scene.
    ///
    /// Fails with [`ExportError::Busy`] while another export is running.
    pub async fn export(&self, scene: &B::Scene) -> Result<ExportArtifact, ExportError> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            tracing::warn!("Export requested while another export is running");
            ExportError::Busy
        })?;

        let result = self.run(scene).await;
        match &result {
            Ok(artifact) => tracing::info!(
                "Exported {} ({} bytes)",
                artifact.file_name,
                artifact.bytes.len()
            ),
            Err(e) => tracing::error!("Export failed: {}", e),
        }
        result
    }

    async fn run(&self, scene: &B::Scene) -> Result<ExportArtifact, ExportError> {
        let exported = self.backend.export_binary(scene).await?;
        tracing::debug!("Scene serialized to {} bytes", exported.len());

        let document = self.backend.parse_binary(&exported)?;
        let document = self
            .backend
            .transform(document, &OPTIMIZATION_SEQUENCE)
            .await?;
        let bytes = self.backend.serialize_binary(document).await?;

        Ok(ExportArtifact {
            file_name: self.file_name(),
            mime_type: EXPORT_MIME_TYPE,
            bytes,
        })
    }

    fn file_name(&self) -> String {
        format!(
            "{}_{}.glb",
            self.file_prefix,
            chrono::Utc::now().timestamp_millis()
        )
    }
}
