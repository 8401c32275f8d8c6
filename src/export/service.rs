//! Export service wired to the store's scene capabilities
//!
//! The store only knows it can ask for a download. The service owns the
//! scene and the pipeline, turns those requests into files on disk, and
//! answers each request with the saved path or the export error.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::{ExportBackend, ExportPipeline};
use crate::avatar::store::{CapabilityError, PendingDownload, SceneCapabilities};
use crate::config::ExportConfig;
use crate::error::ExportError;

/// A queued download
#[derive(Debug)]
pub struct DownloadRequest {
    pub requested_at: DateTime<Utc>,
    reply: oneshot::Sender<Result<PathBuf, ExportError>>,
}

/// Capabilities handed to the store; forwards requests to the service
#[derive(Debug, Clone)]
struct ChannelCapabilities {
    tx: mpsc::UnboundedSender<DownloadRequest>,
}

impl SceneCapabilities for ChannelCapabilities {
    fn request_download(&self) -> Result<PendingDownload, CapabilityError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(DownloadRequest {
                requested_at: Utc::now(),
                reply,
            })
            .map_err(|_| "export service stopped")?;
        Ok(PendingDownload::new(outcome))
    }

    fn request_screenshot(&self) -> Result<(), CapabilityError> {
        Err("screenshots need an attached renderer".into())
    }
}

/// Serves download requests against a single scene
pub struct ExportService<B: ExportBackend> {
    pipeline: ExportPipeline<B>,
    scene: B::Scene,
    output_dir: PathBuf,
    rx: mpsc::UnboundedReceiver<DownloadRequest>,
}

impl<B: ExportBackend> ExportService<B> {
    /// Create the service and the capabilities to register with the store
    pub fn new(
        backend: B,
        scene: B::Scene,
        config: &ExportConfig,
    ) -> (Self, Arc<dyn SceneCapabilities>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            pipeline: ExportPipeline::new(backend, &config.file_prefix),
            scene,
            output_dir: config.output_dir.clone(),
            rx,
        };
        (service, Arc::new(ChannelCapabilities { tx }))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Handle requests until every capability handle is dropped.
    ///
    /// Each outcome goes back to its requester. Returns the number of
    /// requests served.
    pub async fn run(mut self) -> usize {
        let mut served = 0;

        while let Some(request) = self.rx.recv().await {
            tracing::debug!("Download requested at {}", request.requested_at);

            let result = match self.pipeline.export(&self.scene).await {
                Ok(artifact) => artifact.save_to(&self.output_dir).await,
                Err(e) => Err(e),
            };
            if request.reply.send(result).is_err() {
                tracing::debug!("Download requester went away before the export finished");
            }
            served += 1;
        }

        tracing::debug!("Export service stopped after {} requests", served);
        served
    }
}
